//! Filtered reads over the append-only audit log.

use lapfin_workflow::{AuditAction, Role};
use serde::Deserialize;
use sqlx::{QueryBuilder, Sqlite, SqlitePool};

use crate::errors::{Result, ServerError};
use crate::models::{AuditEntry, AuditRecord};

pub const DEFAULT_LIMIT: i64 = 50;
pub const MAX_LIMIT: i64 = 500;

/// Query-string filters for `GET /audit-logs`. All fields are optional and
/// combined with AND.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuditFilter {
    pub actor_id: Option<String>,
    pub actor_role: Option<Role>,
    pub action: Option<AuditAction>,
    pub application_id: Option<i64>,
    /// Inclusive lower bound, RFC 3339 or Unix seconds.
    pub from: Option<String>,
    /// Inclusive upper bound, RFC 3339 or Unix seconds.
    pub to: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Parse a filter bound given either as Unix seconds or an RFC 3339 string.
pub fn parse_bound(raw: &str) -> Result<i64> {
    if let Ok(secs) = raw.parse::<i64>() {
        return Ok(secs);
    }
    chrono::DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.timestamp())
        .map_err(|_| ServerError::Validation(format!("invalid timestamp: {raw}")))
}

impl AuditFilter {
    pub fn for_application(application_id: i64) -> Self {
        AuditFilter {
            application_id: Some(application_id),
            limit: Some(MAX_LIMIT),
            ..Default::default()
        }
    }

    fn limit(&self) -> i64 {
        self.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT)
    }

    fn offset(&self) -> i64 {
        self.offset.unwrap_or(0).max(0)
    }

    fn build(&self) -> Result<QueryBuilder<'_, Sqlite>> {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT id, action, actor_id, actor_role, application_id, details, timestamp \
             FROM audit_log WHERE 1 = 1",
        );
        if let Some(actor_id) = &self.actor_id {
            qb.push(" AND actor_id = ").push_bind(actor_id.as_str());
        }
        if let Some(role) = self.actor_role {
            qb.push(" AND actor_role = ").push_bind(role.as_str());
        }
        if let Some(action) = self.action {
            qb.push(" AND action = ").push_bind(action.as_str());
        }
        if let Some(application_id) = self.application_id {
            qb.push(" AND application_id = ").push_bind(application_id);
        }
        if let Some(from) = &self.from {
            qb.push(" AND timestamp >= ").push_bind(parse_bound(from)?);
        }
        if let Some(to) = &self.to {
            qb.push(" AND timestamp <= ").push_bind(parse_bound(to)?);
        }
        qb.push(" ORDER BY timestamp DESC, id DESC LIMIT ")
            .push_bind(self.limit())
            .push(" OFFSET ")
            .push_bind(self.offset());
        Ok(qb)
    }
}

/// Run `filter` against the log, newest first.
pub async fn query(pool: &SqlitePool, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
    let mut qb = filter.build()?;
    let rows = qb.build_query_as::<AuditRecord>().fetch_all(pool).await?;
    rows.into_iter().map(AuditEntry::try_from).collect()
}
