//! Container configuration.

use rill_stream::StreamConfig;

use crate::error::EventError;

/// Configuration for an [`EventContainer`](crate::EventContainer).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ContainerConfig {
    /// Event type name, used in log output.
    pub name: String,
    /// Configuration for every stream the container creates.
    pub stream: StreamConfig,
}

impl ContainerConfig {
    /// Config with default stream settings.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stream: StreamConfig::default(),
        }
    }

    /// Replace the stream settings.
    pub fn with_stream(mut self, stream: StreamConfig) -> Self {
        self.stream = stream;
        self
    }

    /// Check structural invariants.
    pub fn validate(&self) -> Result<(), EventError> {
        if self.name.is_empty() {
            return Err(EventError::InvalidConfig {
                reason: "container name must not be empty".into(),
            });
        }
        self.stream.validate()?;
        Ok(())
    }
}
