use crate::errors::Result;
use chrono::Utc;
use sqlx::Postgres;
use uuid::Uuid;

/// One append-only audit row. Written inside the same transaction as the
/// state change it describes, so a rolled-back operation leaves no trace.
#[derive(Debug)]
pub struct AuditEntry<'a> {
    pub actor: &'a str,
    pub action: &'a str,
    pub entity_type: &'a str,
    pub entity_id: String,
    pub before: Option<serde_json::Value>,
    pub after: Option<serde_json::Value>,
    pub outcome: &'a str,
}

pub async fn record<'e, E>(executor: E, entry: AuditEntry<'_>) -> Result<()>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO audit_log (id, actor, action, entity_type, entity_id, before, after, outcome, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(entry.actor)
    .bind(entry.action)
    .bind(entry.entity_type)
    .bind(&entry.entity_id)
    .bind(entry.before)
    .bind(entry.after)
    .bind(entry.outcome)
    .bind(Utc::now())
    .execute(executor)
    .await?;

    Ok(())
}
