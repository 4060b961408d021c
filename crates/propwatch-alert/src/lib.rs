//! Alert rule evaluation and alert instance lifecycle.
//!
//! [`evaluator::classify`] maps a metric value onto a rule's red, yellow and
//! green bands without side effects, so it serves both scheduled evaluation
//! and what-if previews. [`manager::AlertInstanceManager`] turns triggering
//! classifications into deduplicated, stateful alert instances.

pub mod error;
pub mod evaluator;
pub mod manager;
pub mod validate;


pub use error::{AlertError, Result};
pub use evaluator::{classify, preview, Classification, RulePreview};
pub use manager::{AlertInstanceManager, TriggerOutcome};
pub use validate::validate_rule;
