//! Broker configuration.

use serde::{Deserialize, Serialize};

use crate::error::{BrokerError, BrokerResult};

/// Configuration shared by the broker and the identifier service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Base IRI prepended to generated identifiers.
    pub namespace: String,
    /// Fixed prefix of saved generation names.
    pub generation_prefix: String,
    /// Reject a tolerance comparator on a non-floating property instead of
    /// discarding it with a warning.
    pub strict_tolerance: bool,
    /// Check that individuals assigned to an object property belong to its
    /// referenced concept.
    pub check_object_ranges: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            namespace: "urn:modelstate:".to_string(),
            generation_prefix: "gen".to_string(),
            strict_tolerance: false,
            check_object_ranges: true,
        }
    }
}

impl BrokerConfig {
    /// Parses a configuration from JSON; missing fields take their defaults.
    pub fn from_json_str(json: &str) -> BrokerResult<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| BrokerError::internal(format!("invalid broker configuration: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Must hold before constructing a broker or identifier service.
    pub fn validate(&self) -> BrokerResult<()> {
        if self.namespace.is_empty() {
            return Err(BrokerError::internal("namespace must not be empty"));
        }
        if self.generation_prefix.is_empty() {
            return Err(BrokerError::internal("generation_prefix must not be empty"));
        }
        if self
            .generation_prefix
            .chars()
            .any(|c| !(c.is_ascii_alphanumeric() || c == '_'))
        {
            return Err(BrokerError::internal(format!(
                "generation_prefix '{}' must be alphanumeric",
                self.generation_prefix
            )));
        }
        Ok(())
    }
}
