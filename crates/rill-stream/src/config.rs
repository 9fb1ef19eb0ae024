//! Stream configuration parameters.

use crate::error::StreamError;

/// Configuration for event streams.
///
/// Controls block sizing. Validated at stream construction; immutable
/// afterwards.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StreamConfig {
    /// Size of each block in bytes, including the link header.
    ///
    /// Default: 4096. Must exceed [`StreamConfig::HEADER_BYTES`] and fit
    /// in a `u32`.
    pub block_size: usize,
}

impl StreamConfig {
    /// Default block size: one 4KB page.
    pub const DEFAULT_BLOCK_SIZE: usize = 4096;

    /// Bytes of every block reserved for its next-block link.
    pub const HEADER_BYTES: usize = std::mem::size_of::<usize>();

    /// Create a config with the default block size.
    pub fn new() -> Self {
        Self {
            block_size: Self::DEFAULT_BLOCK_SIZE,
        }
    }

    /// Create a config with a custom block size.
    ///
    /// Tiny block sizes are useful in tests to force block overflow.
    pub fn with_block_size(block_size: usize) -> Self {
        Self { block_size }
    }

    /// Check structural invariants.
    pub fn validate(&self) -> Result<(), StreamError> {
        if self.block_size <= Self::HEADER_BYTES {
            return Err(StreamError::InvalidConfig {
                reason: format!(
                    "block_size must exceed the {}-byte block header (got {})",
                    Self::HEADER_BYTES,
                    self.block_size,
                ),
            });
        }
        if u32::try_from(self.block_size).is_err() {
            return Err(StreamError::InvalidConfig {
                reason: format!(
                    "block_size must fit in u32 offsets (got {})",
                    self.block_size
                ),
            });
        }
        Ok(())
    }

    /// Usable payload bytes per block. This is also the largest single
    /// allocation a writer accepts.
    pub fn usable_bytes(&self) -> usize {
        self.block_size.saturating_sub(Self::HEADER_BYTES)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_block_is_one_page() {
        let config = StreamConfig::default();
        assert_eq!(config.block_size, 4096);
        assert_eq!(
            config.usable_bytes(),
            4096 - std::mem::size_of::<usize>()
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn header_sized_block_rejected() {
        let config = StreamConfig::with_block_size(StreamConfig::HEADER_BYTES);
        assert!(matches!(
            config.validate(),
            Err(StreamError::InvalidConfig { .. })
        ));
    }

    #[test]
    fn tiny_block_accepted() {
        let config = StreamConfig::with_block_size(StreamConfig::HEADER_BYTES + 1);
        assert!(config.validate().is_ok());
        assert_eq!(config.usable_bytes(), 1);
    }
}
