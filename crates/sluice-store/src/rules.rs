//! Rule persistence with version-on-change semantics.
//!
//! The header row is mutable; `(condition, action)` pairs are immutable
//! `rule_versions` rows. Any change to either field inserts a new
//! version and retargets `current_version_id`; metadata edits only bump
//! `updated_at`.

use serde_json::Value;
use sqlx::{PgPool, Postgres, QueryBuilder};

use sluice_core::rule::{Rule, RuleVersion};
use sluice_core::{condition, Action, Error, Result};

use crate::events::Page;
use crate::rows::{RuleRow, RuleVersionRow, RULE_COLUMNS, RULE_VERSION_COLUMNS};

/// Input for rule creation.
#[derive(Debug, Clone)]
pub struct NewRule {
    /// Human-readable name.
    pub name: String,
    /// Event type the rule applies to.
    pub event_type: String,
    /// Whitelisted condition expression.
    pub condition: Value,
    /// Typed action record.
    pub action: Value,
    /// Whether the rule participates in evaluation.
    pub active: bool,
}

/// Partial update for a rule. `None` fields are left unchanged.
#[derive(Debug, Clone, Default)]
pub struct RulePatch {
    /// New name.
    pub name: Option<String>,
    /// New event type.
    pub event_type: Option<String>,
    /// New active flag.
    pub active: Option<bool>,
    /// New condition; versions when it differs from the current one.
    pub condition: Option<Value>,
    /// New action; versions when it differs from the current one.
    pub action: Option<Value>,
}

/// Filters for rule listing.
#[derive(Debug, Clone, Default)]
pub struct RuleFilter {
    /// Restrict by active flag.
    pub active: Option<bool>,
    /// Restrict by event type.
    pub event_type: Option<String>,
}

/// Postgres-backed rule store.
#[derive(Debug, Clone)]
pub struct RuleStore {
    pool: PgPool,
}

impl RuleStore {
    /// Creates a store over the shared pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Creates a rule header and its version 1 in one transaction.
    ///
    /// # Errors
    ///
    /// Returns a validation error when the condition or action fails
    /// the boundary contract, and a storage error when the insert
    /// fails.
    pub async fn create(&self, new: NewRule) -> Result<(Rule, RuleVersion)> {
        validate_definition(&new.condition, &new.action)?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::storage_with_source("rule create begin failed", e))?;

        let sql = format!(
            "INSERT INTO rules (name, event_type, active) VALUES ($1, $2, $3) \
             RETURNING {RULE_COLUMNS}"
        );
        let rule: RuleRow = sqlx::query_as(&sql)
            .bind(&new.name)
            .bind(&new.event_type)
            .bind(new.active)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| Error::storage_with_source("rule insert failed", e))?;

        let sql = format!(
            "INSERT INTO rule_versions (rule_id, condition, action, version) \
             VALUES ($1, $2, $3, 1) RETURNING {RULE_VERSION_COLUMNS}"
        );
        let version: RuleVersionRow = sqlx::query_as(&sql)
            .bind(rule.id)
            .bind(&new.condition)
            .bind(&new.action)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| Error::storage_with_source("rule version insert failed", e))?;

        let sql = format!(
            "UPDATE rules SET current_version_id = $1 WHERE id = $2 RETURNING {RULE_COLUMNS}"
        );
        let rule: RuleRow = sqlx::query_as(&sql)
            .bind(version.id)
            .bind(rule.id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| Error::storage_with_source("rule pointer update failed", e))?;

        tx.commit()
            .await
            .map_err(|e| Error::storage_with_source("rule create commit failed", e))?;

        Ok((rule.into(), version.into()))
    }

    /// Fetches one rule by id.
    ///
    /// # Errors
    ///
    /// Returns not-found when the id does not exist.
    pub async fn get(&self, id: i64) -> Result<Rule> {
        let sql = format!("SELECT {RULE_COLUMNS} FROM rules WHERE id = $1");
        let row: Option<RuleRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::storage_with_source("rule lookup failed", e))?;
        Ok(row.ok_or_else(|| Error::not_found("rule", id))?.into())
    }

    /// Fetches a rule together with its current version.
    ///
    /// # Errors
    ///
    /// Returns not-found when the rule does not exist.
    pub async fn get_with_version(&self, id: i64) -> Result<(Rule, Option<RuleVersion>)> {
        let rule = self.get(id).await?;
        let version = match rule.current_version_id {
            Some(version_id) => {
                let sql = format!(
                    "SELECT {RULE_VERSION_COLUMNS} FROM rule_versions WHERE id = $1"
                );
                let row: Option<RuleVersionRow> = sqlx::query_as(&sql)
                    .bind(version_id)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(|e| Error::storage_with_source("version lookup failed", e))?;
                row.map(Into::into)
            }
            None => None,
        };
        Ok((rule, version))
    }

    /// Lists rules matching the filter, ordered by id ascending.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the query fails.
    pub async fn list(&self, filter: &RuleFilter, page: Page) -> Result<Vec<Rule>> {
        let mut qb =
            QueryBuilder::<Postgres>::new(format!("SELECT {RULE_COLUMNS} FROM rules"));
        let mut sep = " WHERE ";
        if let Some(active) = filter.active {
            qb.push(sep).push("active = ").push_bind(active);
            sep = " AND ";
        }
        if let Some(event_type) = filter.event_type.clone() {
            qb.push(sep).push("event_type = ").push_bind(event_type);
        }
        qb.push(" ORDER BY id ASC LIMIT ");
        qb.push_bind(page.limit);
        qb.push(" OFFSET ");
        qb.push_bind(page.offset);

        let rows: Vec<RuleRow> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::storage_with_source("rule listing failed", e))?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    /// Applies a partial update.
    ///
    /// Header fields update in place. When the patch carries a
    /// condition or action that differs from the current version, a
    /// new version is inserted with the next sequence number and the
    /// pointer retargets; otherwise no version is created.
    ///
    /// # Errors
    ///
    /// Returns not-found when the rule does not exist, a validation
    /// error when the new definition fails the boundary contract, and
    /// a storage error when the transaction fails.
    pub async fn update(&self, id: i64, patch: RulePatch) -> Result<(Rule, Option<RuleVersion>)> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| Error::storage_with_source("rule update begin failed", e))?;

        let sql = format!("SELECT {RULE_COLUMNS} FROM rules WHERE id = $1 FOR UPDATE");
        let rule: Option<RuleRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| Error::storage_with_source("rule lookup failed", e))?;
        let rule = rule.ok_or_else(|| Error::not_found("rule", id))?;

        let current: Option<RuleVersionRow> = match rule.current_version_id {
            Some(version_id) => {
                let sql = format!(
                    "SELECT {RULE_VERSION_COLUMNS} FROM rule_versions WHERE id = $1"
                );
                sqlx::query_as(&sql)
                    .bind(version_id)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(|e| Error::storage_with_source("version lookup failed", e))?
            }
            None => None,
        };

        let next_condition = patch
            .condition
            .clone()
            .or_else(|| current.as_ref().map(|v| v.condition.clone()));
        let next_action = patch
            .action
            .clone()
            .or_else(|| current.as_ref().map(|v| v.action.clone()));

        let definition_changed = match (&next_condition, &next_action) {
            (Some(condition), Some(action)) => current.as_ref().map_or(true, |v| {
                v.condition != *condition || v.action != *action
            }),
            _ => false,
        };

        let mut new_version: Option<RuleVersionRow> = None;
        let mut current_version_id = rule.current_version_id;
        if definition_changed {
            let (condition, action) = (
                next_condition.unwrap_or(Value::Null),
                next_action.unwrap_or(Value::Null),
            );
            validate_definition(&condition, &action)?;

            let next_seq = current.as_ref().map_or(1, |v| v.version + 1);
            let sql = format!(
                "INSERT INTO rule_versions (rule_id, condition, action, version) \
                 VALUES ($1, $2, $3, $4) RETURNING {RULE_VERSION_COLUMNS}"
            );
            let inserted: RuleVersionRow = sqlx::query_as(&sql)
                .bind(id)
                .bind(&condition)
                .bind(&action)
                .bind(next_seq)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| Error::storage_with_source("rule version insert failed", e))?;
            current_version_id = Some(inserted.id);
            new_version = Some(inserted);
        }

        let sql = format!(
            "UPDATE rules \
             SET name = $1, event_type = $2, active = $3, current_version_id = $4, \
                 updated_at = now() \
             WHERE id = $5 RETURNING {RULE_COLUMNS}"
        );
        let updated: RuleRow = sqlx::query_as(&sql)
            .bind(patch.name.as_deref().unwrap_or(&rule.name))
            .bind(patch.event_type.as_deref().unwrap_or(&rule.event_type))
            .bind(patch.active.unwrap_or(rule.active))
            .bind(current_version_id)
            .bind(id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| Error::storage_with_source("rule header update failed", e))?;

        tx.commit()
            .await
            .map_err(|e| Error::storage_with_source("rule update commit failed", e))?;

        Ok((updated.into(), new_version.map(Into::into)))
    }

    /// Soft delete: marks the rule inactive.
    ///
    /// # Errors
    ///
    /// Returns not-found when the rule does not exist.
    pub async fn deactivate(&self, id: i64) -> Result<Rule> {
        let sql = format!(
            "UPDATE rules SET active = FALSE, updated_at = now() \
             WHERE id = $1 RETURNING {RULE_COLUMNS}"
        );
        let row: Option<RuleRow> = sqlx::query_as(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| Error::storage_with_source("rule deactivate failed", e))?;
        Ok(row.ok_or_else(|| Error::not_found("rule", id))?.into())
    }

    /// All versions of a rule, newest first.
    ///
    /// # Errors
    ///
    /// Returns not-found when the rule does not exist.
    pub async fn versions(&self, rule_id: i64) -> Result<Vec<RuleVersion>> {
        self.get(rule_id).await?;
        let sql = format!(
            "SELECT {RULE_VERSION_COLUMNS} FROM rule_versions \
             WHERE rule_id = $1 ORDER BY version DESC"
        );
        let rows: Vec<RuleVersionRow> = sqlx::query_as(&sql)
            .bind(rule_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| Error::storage_with_source("version listing failed", e))?;
        Ok(rows.into_iter().map(Into::into).collect())
    }
}

/// The boundary contract for rule definitions: the condition passes
/// the expression validator and the action parses to a known tag.
fn validate_definition(condition_value: &Value, action_value: &Value) -> Result<()> {
    condition::validate(condition_value)?;
    Action::from_value(action_value)?.validate()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn definition_validation_rejects_bad_conditions() {
        let action = json!({"type": "noop"});
        assert!(validate_definition(&json!("paid"), &action).is_err());
        assert!(validate_definition(&json!({"regex": ["a"]}), &action).is_err());
        assert!(
            validate_definition(&json!({"==": [{"var": "status"}, "paid"]}), &action).is_ok()
        );
    }

    #[test]
    fn definition_validation_rejects_bad_actions() {
        let condition = json!({"==": [{"var": "a"}, 1]});
        assert!(validate_definition(&condition, &json!({"type": "teleport"})).is_err());
        assert!(validate_definition(
            &condition,
            &json!({"type": "call_webhook", "params": {"url": "not-a-url", "method": "POST"}})
        )
        .is_err());
    }
}
