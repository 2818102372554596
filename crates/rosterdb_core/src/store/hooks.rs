//! Pre-commit hooks run by the store before single-record writes.
//!
//! # Invariants
//! - Hooks only touch fields the schema declares.
//! - Bulk updates never run hooks.

use crate::error::RepoResult;
use crate::model::schema::EntitySchema;
use crate::model::value::{Record, Value};
use crate::store::patch::Patch;
use chrono::Utc;

/// Invoked by the store right before a record is inserted or patched.
pub trait PreCommitHook: Send + Sync {
    fn before_insert(&self, schema: &EntitySchema, record: &mut Record) -> RepoResult<()>;

    fn before_update(&self, schema: &EntitySchema, patch: &mut Patch) -> RepoResult<()>;
}

/// Stamps `created_at`/`updated_at` (epoch millis) and, when an auditor is
/// configured, `created_by`/`last_modified_by`.
#[derive(Debug, Clone, Default)]
pub struct AuditingHook {
    auditor: Option<String>,
}

impl AuditingHook {
    pub fn new(auditor: Option<String>) -> Self {
        Self { auditor }
    }

    fn auditor_value(&self) -> Option<Value> {
        self.auditor.as_deref().map(Value::from)
    }
}

impl PreCommitHook for AuditingHook {
    fn before_insert(&self, schema: &EntitySchema, record: &mut Record) -> RepoResult<()> {
        let now = Utc::now().timestamp_millis();
        if schema.has_field("created_at") {
            record.put("created_at", now);
        }
        if schema.has_field("updated_at") {
            record.put("updated_at", now);
        }
        if let Some(auditor) = self.auditor_value() {
            if schema.has_field("created_by") {
                record.put("created_by", auditor.clone());
            }
            if schema.has_field("last_modified_by") {
                record.put("last_modified_by", auditor);
            }
        }
        Ok(())
    }

    fn before_update(&self, schema: &EntitySchema, patch: &mut Patch) -> RepoResult<()> {
        if schema.has_field("updated_at") {
            patch.put("updated_at", Utc::now().timestamp_millis());
        }
        if let Some(auditor) = self.auditor_value() {
            if schema.has_field("last_modified_by") {
                patch.put("last_modified_by", auditor);
            }
        }
        Ok(())
    }
}
