pub mod engine;
pub mod error;
pub mod rules;

pub use engine::{ComplianceFinding, evaluate};
pub use error::ConfigError;
pub use rules::{
    AppliesTo, DurationField, Expectation, PatternScope, PresenceTarget, RuleCheck, RuleDefinition,
    RuleSet, Severity,
};
