use anyhow::Result;

use super::kv::Lifetime;
use super::schema::Database;

fn table(lifetime: Lifetime) -> &'static str {
    match lifetime {
        Lifetime::Durable => "user_preferences",
        Lifetime::Session => "session_state",
    }
}

impl Database {
    // ========================================================================
    // Lifetime-qualified Operations
    // ========================================================================

    pub(crate) async fn get_value(&self, lifetime: Lifetime, key: &str) -> Result<Option<String>> {
        let sql = format!("SELECT value FROM {} WHERE key = ?", table(lifetime));
        let row: Option<(String,)> = sqlx::query_as(&sql)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.map(|(value,)| value))
    }

    pub(crate) async fn set_value(&self, lifetime: Lifetime, key: &str, value: &str) -> Result<()> {
        let sql = format!(
            r#"
            INSERT INTO {} (key, value, updated_at)
            VALUES (?, ?, datetime('now'))
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        "#,
            table(lifetime)
        );
        sqlx::query(&sql)
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    pub(crate) async fn remove_value(&self, lifetime: Lifetime, key: &str) -> Result<()> {
        let sql = format!("DELETE FROM {} WHERE key = ?", table(lifetime));
        sqlx::query(&sql).bind(key).execute(&self.pool).await?;
        Ok(())
    }
}
