//! # Conflict resolver
//!
//! Applies the deterministic resolution policy to a field-level conflict, or
//! defers it to manual review. Every resolution decision is logged with full
//! before/after values, independent of whether the write ultimately lands.

use serde_json::Value as JsonValue;
use tracing::info;
use uuid::Uuid;

use crate::engine::processor::{FieldConflict, FieldPolicy};

/// Outcome of resolving one conflict.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// Apply this value to the target
    UseValue(JsonValue),
    /// Keep the target's current value; no write
    KeepTarget,
    /// No automatic resolution; surface as a review item
    Manual,
}

/// Resolve a conflict under its field policy.
///
/// Newest-wins compares last-modified timestamps from both systems and
/// resolves ties to the source. When either timestamp is missing the
/// comparison is meaningless, so the conflict falls back to manual review
/// rather than guessing.
pub fn resolve(job_id: Uuid, external_id: &str, conflict: &FieldConflict) -> Resolution {
    let resolution = match conflict.policy {
        FieldPolicy::SourceWins => Resolution::UseValue(conflict.source_value.clone()),
        FieldPolicy::TargetWins => Resolution::KeepTarget,
        FieldPolicy::NewestWins => match (conflict.source_modified, conflict.target_modified) {
            (Some(source_ts), Some(target_ts)) => {
                if source_ts >= target_ts {
                    Resolution::UseValue(conflict.source_value.clone())
                } else {
                    Resolution::KeepTarget
                }
            }
            _ => Resolution::Manual,
        },
        FieldPolicy::Manual => Resolution::Manual,
    };

    info!(
        job_id = %job_id,
        external_id,
        field = %conflict.field,
        policy = conflict.policy.as_str(),
        source_value = %conflict.source_value,
        target_value = %conflict
            .target_value
            .clone()
            .unwrap_or(JsonValue::Null),
        resolution = resolution_label(&resolution),
        resolved_at = %chrono::Utc::now().to_rfc3339(),
        "Conflict resolution decided"
    );

    resolution
}

fn resolution_label(resolution: &Resolution) -> &'static str {
    match resolution {
        Resolution::UseValue(_) => "source_value",
        Resolution::KeepTarget => "target_value",
        Resolution::Manual => "manual_review",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn conflict(policy: FieldPolicy) -> FieldConflict {
        FieldConflict {
            field: "price".to_string(),
            source_value: json!(7.5),
            target_value: Some(json!(10.0)),
            policy,
            source_modified: None,
            target_modified: None,
        }
    }

    #[test]
    fn test_source_wins_uses_source_value() {
        let resolution = resolve(Uuid::new_v4(), "sku-1", &conflict(FieldPolicy::SourceWins));
        assert_eq!(resolution, Resolution::UseValue(json!(7.5)));
    }

    #[test]
    fn test_target_wins_keeps_target() {
        let resolution = resolve(Uuid::new_v4(), "sku-1", &conflict(FieldPolicy::TargetWins));
        assert_eq!(resolution, Resolution::KeepTarget);
    }

    #[test]
    fn test_manual_defers() {
        let resolution = resolve(Uuid::new_v4(), "sku-1", &conflict(FieldPolicy::Manual));
        assert_eq!(resolution, Resolution::Manual);
    }

    #[test]
    fn test_newest_wins_picks_newer_side() {
        let mut c = conflict(FieldPolicy::NewestWins);
        c.source_modified = Some(Utc.with_ymd_and_hms(2025, 11, 2, 0, 0, 0).unwrap());
        c.target_modified = Some(Utc.with_ymd_and_hms(2025, 11, 1, 0, 0, 0).unwrap());
        assert_eq!(
            resolve(Uuid::new_v4(), "sku-1", &c),
            Resolution::UseValue(json!(7.5))
        );

        c.source_modified = Some(Utc.with_ymd_and_hms(2025, 10, 1, 0, 0, 0).unwrap());
        assert_eq!(resolve(Uuid::new_v4(), "sku-1", &c), Resolution::KeepTarget);
    }

    #[test]
    fn test_newest_wins_tie_resolves_to_source() {
        let mut c = conflict(FieldPolicy::NewestWins);
        let ts = Utc.with_ymd_and_hms(2025, 11, 1, 12, 0, 0).unwrap();
        c.source_modified = Some(ts);
        c.target_modified = Some(ts);

        assert_eq!(
            resolve(Uuid::new_v4(), "sku-1", &c),
            Resolution::UseValue(json!(7.5))
        );
    }

    #[test]
    fn test_newest_wins_without_timestamps_falls_back_to_manual() {
        let resolution = resolve(Uuid::new_v4(), "sku-1", &conflict(FieldPolicy::NewestWins));
        assert_eq!(resolution, Resolution::Manual);
    }
}
