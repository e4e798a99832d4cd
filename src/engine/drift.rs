//! # Drift guard
//!
//! Flags statistically suspicious field changes before they are applied:
//! price jumps beyond a configured fraction of the target's current value,
//! and quantity swings beyond an absolute bound. A flagged change is routed
//! to manual review regardless of the field's configured policy.

use serde_json::Value as JsonValue;

use crate::config::DriftGuardConfig;

/// Guard that screens planned writes for outlier changes.
#[derive(Debug, Clone)]
pub struct DriftGuard {
    enabled: bool,
    max_price_jump_pct: f64,
    max_quantity_jump: i64,
}

impl DriftGuard {
    pub fn from_config(config: &DriftGuardConfig) -> Self {
        Self {
            enabled: config.enabled,
            max_price_jump_pct: config.max_price_jump_pct,
            max_quantity_jump: config.max_quantity_jump,
        }
    }

    /// A guard that never flags, for callers that opt out.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            max_price_jump_pct: f64::MAX,
            max_quantity_jump: i64::MAX,
        }
    }

    /// Whether replacing `target` with `source` on `field` is suspicious
    /// enough to hold for review.
    pub fn flags(&self, field: &str, source: &JsonValue, target: &JsonValue) -> bool {
        if !self.enabled {
            return false;
        }

        if is_price_field(field) {
            if let (Some(new), Some(old)) = (source.as_f64(), target.as_f64()) {
                if old > 0.0 {
                    return ((new - old) / old).abs() > self.max_price_jump_pct;
                }
            }
            return false;
        }

        if is_quantity_field(field) {
            if let (Some(new), Some(old)) = (source.as_i64(), target.as_i64()) {
                return (new - old).abs() > self.max_quantity_jump;
            }
        }

        false
    }
}

fn is_price_field(field: &str) -> bool {
    field == "price" || field.ends_with("_price")
}

fn is_quantity_field(field: &str) -> bool {
    field == "quantity" || field == "inventory" || field.ends_with("_quantity")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn guard() -> DriftGuard {
        DriftGuard::from_config(&DriftGuardConfig {
            enabled: true,
            max_price_jump_pct: 0.5,
            max_quantity_jump: 100,
        })
    }

    #[test]
    fn test_price_jump_beyond_bound_is_flagged() {
        let guard = guard();

        assert!(guard.flags("price", &json!(31.0), &json!(10.0)));
        assert!(!guard.flags("price", &json!(12.0), &json!(10.0)));
        assert!(guard.flags("sale_price", &json!(0.5), &json!(10.0)));
    }

    #[test]
    fn test_quantity_swing_beyond_bound_is_flagged() {
        let guard = guard();

        assert!(guard.flags("quantity", &json!(500), &json!(10)));
        assert!(!guard.flags("quantity", &json!(60), &json!(10)));
        assert!(guard.flags("inventory", &json!(0), &json!(5000)));
    }

    #[test]
    fn test_non_numeric_and_unknown_fields_pass() {
        let guard = guard();

        assert!(!guard.flags("price", &json!("n/a"), &json!(10.0)));
        assert!(!guard.flags("title", &json!("Widget"), &json!("Gadget")));
    }

    #[test]
    fn test_disabled_guard_never_flags() {
        let guard = DriftGuard::disabled();
        assert!(!guard.flags("price", &json!(1_000_000.0), &json!(0.01)));
    }
}
