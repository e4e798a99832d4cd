//! # Record processor
//!
//! Validates a single record, compares source against current target state,
//! and plans the action: create when the target has no record, skip when
//! every compared field already matches, update for fields the tenant marked
//! authoritative-source, and a conflict for fields whose policy needs the
//! resolver. A record's fields are applied all-or-nothing per chunk attempt,
//! so a record with any manual conflict plans no writes at all.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use crate::adapters::TargetState;
use crate::engine::drift::DriftGuard;
use crate::models::job_record;

/// Bulk operation types accepted at submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationType {
    InventorySync,
    PriceSync,
    BulkImport,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::InventorySync => "inventory-sync",
            OperationType::PriceSync => "price-sync",
            OperationType::BulkImport => "bulk-import",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "inventory-sync" => Some(OperationType::InventorySync),
            "price-sync" => Some(OperationType::PriceSync),
            "bulk-import" => Some(OperationType::BulkImport),
            _ => None,
        }
    }
}

/// Conflict resolution policy for a field. Closed set; anything else in a
/// submission is a validation error, never interpreted at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldPolicy {
    SourceWins,
    TargetWins,
    NewestWins,
    Manual,
}

impl FieldPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldPolicy::SourceWins => "source-wins",
            FieldPolicy::TargetWins => "target-wins",
            FieldPolicy::NewestWins => "newest-wins",
            FieldPolicy::Manual => "manual",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "source-wins" => Some(FieldPolicy::SourceWins),
            "target-wins" => Some(FieldPolicy::TargetWins),
            "newest-wins" => Some(FieldPolicy::NewestWins),
            "manual" => Some(FieldPolicy::Manual),
            _ => None,
        }
    }
}

/// Per-tenant field policy lookup table.
///
/// Fields without an entry default to manual, since silent data loss is
/// worse than a stalled record.
#[derive(Debug, Clone, Default)]
pub struct PolicyTable {
    fields: BTreeMap<String, FieldPolicy>,
}

impl PolicyTable {
    pub fn new(fields: BTreeMap<String, FieldPolicy>) -> Self {
        Self { fields }
    }

    /// Parse a `{"field": "policy"}` JSON object. Unknown policy names are
    /// rejected with the offending field.
    pub fn from_json(value: Option<&JsonValue>) -> Result<Self, String> {
        let Some(value) = value else {
            return Ok(Self::default());
        };

        let Some(object) = value.as_object() else {
            return Err("field policies must be an object".to_string());
        };

        let mut fields = BTreeMap::new();
        for (field, policy_value) in object {
            let policy_str = policy_value
                .as_str()
                .ok_or_else(|| format!("policy for field '{}' must be a string", field))?;
            let policy = FieldPolicy::parse(policy_str).ok_or_else(|| {
                format!(
                    "unknown policy '{}' for field '{}' (expected one of: source-wins, target-wins, newest-wins, manual)",
                    policy_str, field
                )
            })?;
            fields.insert(field.clone(), policy);
        }

        Ok(Self { fields })
    }

    pub fn to_json(&self) -> JsonValue {
        JsonValue::Object(
            self.fields
                .iter()
                .map(|(field, policy)| (field.clone(), JsonValue::from(policy.as_str())))
                .collect(),
        )
    }

    pub fn policy_for(&self, field: &str) -> FieldPolicy {
        self.fields.get(field).copied().unwrap_or(FieldPolicy::Manual)
    }
}

/// A record as read from the durable record source.
#[derive(Debug, Clone)]
pub struct SourceRecord {
    pub external_id: String,
    pub fields: BTreeMap<String, JsonValue>,
    pub last_modified: Option<DateTime<Utc>>,
}

impl SourceRecord {
    /// Build from a persisted job record row.
    pub fn from_model(model: &job_record::Model) -> Self {
        let fields = model
            .payload
            .as_object()
            .map(|object| object.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default();

        Self {
            external_id: model.external_id.clone(),
            fields,
            last_modified: model.source_modified_at.map(|ts| ts.to_utc()),
        }
    }
}

/// A field-level divergence the resolver must decide.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldConflict {
    pub field: String,
    pub source_value: JsonValue,
    pub target_value: Option<JsonValue>,
    pub policy: FieldPolicy,
    pub source_modified: Option<DateTime<Utc>>,
    pub target_modified: Option<DateTime<Utc>>,
}

/// Planned handling for one record.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordPlan {
    /// Validation failed; recorded as a failed outcome, no side effects
    Invalid { reason: String },
    /// Target has no corresponding record; write all fields
    Create { writes: BTreeMap<String, JsonValue> },
    /// Every compared field already matches; idempotent no-op
    Skip,
    /// Target exists and differs
    Diff {
        /// Fields resolved without the resolver (authoritative-source)
        writes: BTreeMap<String, JsonValue>,
        /// Fields whose policy needs the resolver
        conflicts: Vec<FieldConflict>,
        /// Target values of every differing field, for the audit snapshot
        before: BTreeMap<String, JsonValue>,
    },
}

/// Validate and plan a single record against the target's current state.
pub fn plan_record(
    operation: OperationType,
    record: &SourceRecord,
    target: Option<&TargetState>,
    policies: &PolicyTable,
    drift: &DriftGuard,
) -> RecordPlan {
    if let Err(reason) = validate_record(operation, record) {
        return RecordPlan::Invalid { reason };
    }

    let Some(target) = target else {
        return RecordPlan::Create {
            writes: record.fields.clone(),
        };
    };

    let mut writes = BTreeMap::new();
    let mut conflicts = Vec::new();
    let mut before = BTreeMap::new();

    for (field, source_value) in &record.fields {
        let target_value = target.fields.get(field);

        if target_value == Some(source_value) {
            continue;
        }

        before.insert(
            field.clone(),
            target_value.cloned().unwrap_or(JsonValue::Null),
        );

        // An outlier change overrides the field's policy: hold for review.
        let suspicious = target_value
            .map(|current| drift.flags(field, source_value, current))
            .unwrap_or(false);

        let policy = if suspicious {
            FieldPolicy::Manual
        } else {
            policies.policy_for(field)
        };

        match policy {
            FieldPolicy::SourceWins => {
                writes.insert(field.clone(), source_value.clone());
            }
            FieldPolicy::TargetWins => {
                // Authoritative-target fields are left untouched.
            }
            FieldPolicy::NewestWins | FieldPolicy::Manual => {
                conflicts.push(FieldConflict {
                    field: field.clone(),
                    source_value: source_value.clone(),
                    target_value: target_value.cloned(),
                    policy,
                    source_modified: record.last_modified,
                    target_modified: target.last_modified,
                });
            }
        }
    }

    if writes.is_empty() && conflicts.is_empty() {
        return RecordPlan::Skip;
    }

    RecordPlan::Diff {
        writes,
        conflicts,
        before,
    }
}

/// Schema validation: required fields, value ranges, referential keys.
fn validate_record(operation: OperationType, record: &SourceRecord) -> Result<(), String> {
    if record.external_id.trim().is_empty() {
        return Err("record id must not be empty".to_string());
    }

    if record.fields.is_empty() {
        return Err("record has no fields to synchronize".to_string());
    }

    match operation {
        OperationType::InventorySync => {
            require_quantity(record, "quantity")?;
        }
        OperationType::PriceSync => {
            require_price(record, "price")?;
        }
        OperationType::BulkImport => {
            let sku = record
                .fields
                .get("sku")
                .and_then(|v| v.as_str())
                .ok_or_else(|| "bulk import requires a string 'sku' field".to_string())?;
            if sku.trim().is_empty() {
                return Err("'sku' must not be empty".to_string());
            }
            if record.fields.contains_key("quantity") {
                require_quantity(record, "quantity")?;
            }
            if record.fields.contains_key("price") {
                require_price(record, "price")?;
            }
        }
    }

    Ok(())
}

fn require_quantity(record: &SourceRecord, field: &str) -> Result<(), String> {
    let value = record
        .fields
        .get(field)
        .ok_or_else(|| format!("required field '{}' is missing", field))?;
    match value.as_i64() {
        Some(quantity) if quantity >= 0 => Ok(()),
        Some(quantity) => Err(format!("'{}' must not be negative, got {}", field, quantity)),
        None => Err(format!("'{}' must be an integer", field)),
    }
}

fn require_price(record: &SourceRecord, field: &str) -> Result<(), String> {
    let value = record
        .fields
        .get(field)
        .ok_or_else(|| format!("required field '{}' is missing", field))?;
    match value.as_f64() {
        Some(price) if price.is_finite() && price >= 0.0 => Ok(()),
        Some(price) => Err(format!("'{}' must be a non-negative number, got {}", field, price)),
        None => Err(format!("'{}' must be a number", field)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record(fields: &[(&str, JsonValue)]) -> SourceRecord {
        SourceRecord {
            external_id: "sku-100".to_string(),
            fields: fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
            last_modified: None,
        }
    }

    fn target(fields: &[(&str, JsonValue)]) -> TargetState {
        TargetState::new(
            fields
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        )
    }

    fn source_wins(field: &str) -> PolicyTable {
        PolicyTable::new(BTreeMap::from([(field.to_string(), FieldPolicy::SourceWins)]))
    }

    #[test]
    fn test_missing_target_plans_create() {
        let record = record(&[("quantity", json!(7))]);
        let plan = plan_record(
            OperationType::InventorySync,
            &record,
            None,
            &PolicyTable::default(),
            &DriftGuard::disabled(),
        );

        match plan {
            RecordPlan::Create { writes } => assert_eq!(writes.get("quantity"), Some(&json!(7))),
            other => panic!("expected create, got {:?}", other),
        }
    }

    #[test]
    fn test_matching_fields_plan_skip() {
        let record = record(&[("quantity", json!(10))]);
        let state = target(&[("quantity", json!(10))]);

        let plan = plan_record(
            OperationType::InventorySync,
            &record,
            Some(&state),
            &PolicyTable::default(),
            &DriftGuard::disabled(),
        );

        assert_eq!(plan, RecordPlan::Skip);
    }

    #[test]
    fn test_source_wins_field_plans_update_without_conflict() {
        let record = record(&[("quantity", json!(7))]);
        let state = target(&[("quantity", json!(10))]);

        let plan = plan_record(
            OperationType::InventorySync,
            &record,
            Some(&state),
            &source_wins("quantity"),
            &DriftGuard::disabled(),
        );

        match plan {
            RecordPlan::Diff {
                writes,
                conflicts,
                before,
            } => {
                assert_eq!(writes.get("quantity"), Some(&json!(7)));
                assert!(conflicts.is_empty());
                assert_eq!(before.get("quantity"), Some(&json!(10)));
            }
            other => panic!("expected diff, got {:?}", other),
        }
    }

    #[test]
    fn test_target_wins_field_is_left_untouched() {
        let mut policies = BTreeMap::new();
        policies.insert("quantity".to_string(), FieldPolicy::TargetWins);

        let record = record(&[("quantity", json!(7))]);
        let state = target(&[("quantity", json!(10))]);

        let plan = plan_record(
            OperationType::InventorySync,
            &record,
            Some(&state),
            &PolicyTable::new(policies),
            &DriftGuard::disabled(),
        );

        // The only differing field is authoritative-target, so nothing to do.
        assert_eq!(plan, RecordPlan::Skip);
    }

    #[test]
    fn test_unspecified_policy_produces_conflict() {
        let record = record(&[("price", json!(9.5))]);
        let state = target(&[("price", json!(10.0))]);

        let plan = plan_record(
            OperationType::PriceSync,
            &record,
            Some(&state),
            &PolicyTable::default(),
            &DriftGuard::disabled(),
        );

        match plan {
            RecordPlan::Diff { conflicts, .. } => {
                assert_eq!(conflicts.len(), 1);
                assert_eq!(conflicts[0].field, "price");
                assert_eq!(conflicts[0].policy, FieldPolicy::Manual);
            }
            other => panic!("expected diff with conflict, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_record_plans_no_side_effects() {
        let record = record(&[("quantity", json!(-3))]);

        let plan = plan_record(
            OperationType::InventorySync,
            &record,
            None,
            &PolicyTable::default(),
            &DriftGuard::disabled(),
        );

        assert!(matches!(plan, RecordPlan::Invalid { .. }));
    }

    #[test]
    fn test_bulk_import_requires_sku() {
        let record = record(&[("title", json!("Widget"))]);

        let plan = plan_record(
            OperationType::BulkImport,
            &record,
            None,
            &PolicyTable::default(),
            &DriftGuard::disabled(),
        );

        assert!(matches!(plan, RecordPlan::Invalid { .. }));
    }

    #[test]
    fn test_drift_guard_overrides_source_wins() {
        let guard = DriftGuard::from_config(&crate::config::DriftGuardConfig {
            enabled: true,
            max_price_jump_pct: 0.5,
            max_quantity_jump: 1000,
        });

        let record = record(&[("price", json!(100.0))]);
        let state = target(&[("price", json!(10.0))]);

        let plan = plan_record(
            OperationType::PriceSync,
            &record,
            Some(&state),
            &source_wins("price"),
            &guard,
        );

        match plan {
            RecordPlan::Diff {
                writes, conflicts, ..
            } => {
                assert!(writes.is_empty());
                assert_eq!(conflicts.len(), 1);
                assert_eq!(conflicts[0].policy, FieldPolicy::Manual);
            }
            other => panic!("expected held diff, got {:?}", other),
        }
    }

    #[test]
    fn test_policy_table_rejects_unknown_policy() {
        let value = json!({"price": "loudest-wins"});
        assert!(PolicyTable::from_json(Some(&value)).is_err());

        let value = json!({"price": "newest-wins"});
        let table = PolicyTable::from_json(Some(&value)).unwrap();
        assert_eq!(table.policy_for("price"), FieldPolicy::NewestWins);
        assert_eq!(table.policy_for("unlisted"), FieldPolicy::Manual);
    }
}
