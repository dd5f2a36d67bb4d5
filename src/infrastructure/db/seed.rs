//! Catalog maintenance: table bootstrap, template upserts and embedding
//! backfill. These are the only writes the service ever performs.

use super::{Backend, SqlStore, TemplateStore};
use crate::domain::error::{AppError, Result};
use crate::infrastructure::embedding::{embedding_to_bytes, Embedder};
use tracing::{info, warn};

pub async fn ensure_templates_table(store: &SqlStore) -> Result<()> {
    let table = &store.settings().templates_table;
    let result = match store.backend() {
        Backend::Sqlite(pool) => {
            sqlx::query(&format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    name TEXT NOT NULL UNIQUE,
                    intent_text TEXT NOT NULL,
                    sql_template TEXT NOT NULL,
                    embedding BLOB
                )",
                table
            ))
            .execute(pool)
            .await
            .map(|_| ())
        }
        Backend::Postgres(pool) => {
            sqlx::query(&format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    id BIGSERIAL PRIMARY KEY,
                    name TEXT NOT NULL UNIQUE,
                    intent_text TEXT NOT NULL,
                    sql_template TEXT NOT NULL,
                    embedding BYTEA
                )",
                table
            ))
            .execute(pool)
            .await
            .map(|_| ())
        }
    };
    result.map_err(|e| AppError::DatabaseError(format!("Failed to create table: {}", e)))?;
    Ok(())
}

/// Insert a template, or replace the one with the same name. The stored
/// embedding is cleared so the next backfill recomputes it.
pub async fn upsert_template(
    store: &SqlStore,
    name: &str,
    intent_text: &str,
    sql_template: &str,
) -> Result<()> {
    if name.trim().is_empty() || intent_text.trim().is_empty() || sql_template.trim().is_empty() {
        return Err(AppError::ValidationError(
            "Template name, intent and SQL must not be empty".to_string(),
        ));
    }

    let table = &store.settings().templates_table;
    let result = match store.backend() {
        Backend::Sqlite(pool) => {
            sqlx::query(&format!(
                "INSERT INTO {} (name, intent_text, sql_template, embedding)
                 VALUES (?1, ?2, ?3, NULL)
                 ON CONFLICT(name) DO UPDATE SET
                    intent_text = excluded.intent_text,
                    sql_template = excluded.sql_template,
                    embedding = NULL",
                table
            ))
            .bind(name)
            .bind(intent_text)
            .bind(sql_template)
            .execute(pool)
            .await
            .map(|_| ())
        }
        Backend::Postgres(pool) => {
            sqlx::query(&format!(
                "INSERT INTO {} (name, intent_text, sql_template, embedding)
                 VALUES ($1, $2, $3, NULL)
                 ON CONFLICT(name) DO UPDATE SET
                    intent_text = excluded.intent_text,
                    sql_template = excluded.sql_template,
                    embedding = NULL",
                table
            ))
            .bind(name)
            .bind(intent_text)
            .bind(sql_template)
            .execute(pool)
            .await
            .map(|_| ())
        }
    };
    result.map_err(|e| AppError::DatabaseError(format!("Failed to save template: {}", e)))?;
    info!("Saved template '{}'", name);
    Ok(())
}

pub async fn store_embedding(store: &SqlStore, id: i64, embedding: &[f32]) -> Result<()> {
    let table = &store.settings().templates_table;
    let bytes = embedding_to_bytes(embedding);
    let result = match store.backend() {
        Backend::Sqlite(pool) => {
            sqlx::query(&format!("UPDATE {} SET embedding = ?1 WHERE id = ?2", table))
                .bind(bytes)
                .bind(id)
                .execute(pool)
                .await
                .map(|_| ())
        }
        Backend::Postgres(pool) => {
            sqlx::query(&format!("UPDATE {} SET embedding = $1 WHERE id = $2", table))
                .bind(bytes)
                .bind(id)
                .execute(pool)
                .await
                .map(|_| ())
        }
    };
    result.map_err(|e| AppError::DatabaseError(format!("Failed to store embedding: {}", e)))
}

/// Embed the intent text of every template that has no usable embedding.
/// Returns how many templates were updated.
pub async fn backfill_embeddings(store: &SqlStore, embedder: &dyn Embedder) -> Result<usize> {
    let templates = store.load_templates().await?;
    let mut updated = 0;

    for template in templates.iter().filter(|t| t.embedding.is_none()) {
        let embedding = embedder.embed(&template.intent_text).await.map_err(|e| {
            warn!(template = %template.name, "Embedding failed: {}", e);
            e
        })?;
        store_embedding(store, template.id, &embedding).await?;
        info!("Embedded template '{}' ({} dims)", template.name, embedding.len());
        updated += 1;
    }

    info!(
        "Backfill complete: {} of {} templates embedded",
        updated,
        templates.len()
    );
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::db::test_support::memory_store;
    use crate::infrastructure::embedding::HashEmbedder;

    #[tokio::test]
    async fn test_upsert_then_backfill() {
        let store = memory_store(4).await;
        ensure_templates_table(&store).await.unwrap();
        ensure_templates_table(&store).await.unwrap();

        upsert_template(&store, "employees", "list all employees", "SELECT * FROM employees")
            .await
            .unwrap();
        upsert_template(
            &store,
            "sales_by_region",
            "total sales for a region",
            "SELECT region, SUM(amt) FROM sales WHERE region={region}",
        )
        .await
        .unwrap();

        let before = store.load_templates().await.unwrap();
        assert_eq!(before.len(), 2);
        assert!(before.iter().all(|t| t.embedding.is_none()));
        assert_eq!(before[0].name, "employees");

        let embedder = HashEmbedder::new(32).unwrap();
        assert_eq!(backfill_embeddings(&store, &embedder).await.unwrap(), 2);
        assert_eq!(backfill_embeddings(&store, &embedder).await.unwrap(), 0);

        let after = store.load_templates().await.unwrap();
        let expected = embedder.embed_sync("total sales for a region").unwrap();
        assert_eq!(after[1].embedding.as_deref(), Some(expected.as_slice()));
    }

    #[tokio::test]
    async fn test_upsert_replaces_by_name_and_clears_embedding() {
        let store = memory_store(4).await;
        ensure_templates_table(&store).await.unwrap();
        upsert_template(&store, "t", "old intent", "SELECT 1").await.unwrap();
        let embedder = HashEmbedder::new(8).unwrap();
        backfill_embeddings(&store, &embedder).await.unwrap();

        upsert_template(&store, "t", "new intent", "SELECT 2").await.unwrap();
        let templates = store.load_templates().await.unwrap();
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0].intent_text, "new intent");
        assert_eq!(templates[0].sql_text, "SELECT 2");
        assert!(templates[0].embedding.is_none());
    }

    #[tokio::test]
    async fn test_upsert_rejects_empty_fields() {
        let store = memory_store(4).await;
        ensure_templates_table(&store).await.unwrap();
        assert!(matches!(
            upsert_template(&store, "t", " ", "SELECT 1").await,
            Err(AppError::ValidationError(_))
        ));
    }
}
