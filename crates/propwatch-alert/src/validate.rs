use crate::error::{AlertError, Result};
use propwatch_common::types::AlertRule;

/// Rejects malformed rules before they reach a store.
///
/// Channel and metric names are checked when the rule is parsed; this covers
/// the structural rules a parsed value can still violate.
pub fn validate_rule(rule: &AlertRule) -> Result<()> {
    if rule.name.trim().is_empty() {
        return Err(AlertError::Validation("name must not be empty".into()));
    }

    if rule.thresholds.is_empty() {
        return Err(AlertError::Validation(
            "at least one threshold bound must be set".into(),
        ));
    }

    for (level, band) in rule.thresholds.bands() {
        for bound in [band.min, band.max].into_iter().flatten() {
            if !bound.is_finite() {
                return Err(AlertError::Validation(format!(
                    "{level} bound {bound} is not a finite number"
                )));
            }
        }
        if let (Some(min), Some(max)) = (band.min, band.max) {
            if min > max {
                return Err(AlertError::Validation(format!(
                    "{level} min {min} is greater than max {max}"
                )));
            }
        }
    }

    if rule.target_ids.is_empty() {
        return Err(AlertError::Validation(
            "rule must apply to at least one target".into(),
        ));
    }
    if rule.target_ids.iter().any(|t| t.trim().is_empty()) {
        return Err(AlertError::Validation("target ids must not be blank".into()));
    }

    Ok(())
}
