/// A rule set that cannot be evaluated. Fatal for the compliance stage only.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Rule at `index` has a blank id.
    #[error("rule at index {index} has an empty id")]
    EmptyRuleId { index: usize },

    #[error("duplicate rule id '{0}'")]
    DuplicateRuleId(String),

    /// Duration bounds that no value can satisfy, or a bound rule with nothing to check.
    #[error("rule '{rule_id}' has invalid bounds: {reason}")]
    InvalidBounds { rule_id: String, reason: String },

    #[error("rule '{rule_id}' has an invalid pattern: {source}")]
    InvalidPattern {
        rule_id: String,
        source: regex::Error,
    },

    /// A clause selector with no clause types.
    #[error("rule '{rule_id}' lists no clause types")]
    EmptyClauseTypes { rule_id: String },

    #[error("rule '{rule_id}' has an empty {field}")]
    EmptyField { rule_id: String, field: &'static str },

    /// Failed to parse a TOML rule file.
    #[error("failed to parse rule set: {0}")]
    Toml(#[from] toml::de::Error),

    /// Failed to parse a JSON rule file.
    #[error("failed to parse rule set: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to read rule file '{path}': {source}")]
    ReadFile {
        path: String,
        source: std::io::Error,
    },
}
