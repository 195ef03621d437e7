//! ORM configuration.

/// Configuration for loader and unit-of-work behavior.
#[derive(Debug, Clone)]
pub struct OrmConfig {
    /// Maximum number of parent keys in one `IN (...)` list of a separate query.
    pub in_batch_size: usize,
    /// Join single-valued same-database relations into the parent query.
    ///
    /// When false every relation is fetched with its own query.
    pub join_single_valued: bool,
}

impl Default for OrmConfig {
    fn default() -> Self {
        Self {
            in_batch_size: 500,
            join_single_valued: true,
        }
    }
}

impl OrmConfig {
    /// Create new default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the IN-list chunk size (builder pattern). Zero is treated as one.
    #[must_use]
    pub fn in_batch_size(mut self, size: usize) -> Self {
        self.in_batch_size = size.max(1);
        self
    }

    /// Set whether single-valued relations are joined (builder pattern).
    #[must_use]
    pub fn join_single_valued(mut self, value: bool) -> Self {
        self.join_single_valued = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = OrmConfig::default();
        assert_eq!(config.in_batch_size, 500);
        assert!(config.join_single_valued);
    }

    #[test]
    fn test_builder_clamps_batch_size() {
        let config = OrmConfig::new().in_batch_size(0).join_single_valued(false);
        assert_eq!(config.in_batch_size, 1);
        assert!(!config.join_single_valued);
    }
}
