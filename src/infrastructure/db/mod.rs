//! SQL stores backed by sqlx.
//!
//! One [`SqlStore`] serves both the template catalog and statement execution.
//! The backend (SQLite or PostgreSQL) is picked from the connection URL.

pub mod postgres;
pub mod seed;
pub mod sqlite;

use crate::application::use_cases::result_streamer::{
    CellValue, DecimalPolicy, RowSender, RowStream,
};
use crate::application::use_cases::template_binder::{BindStyle, BoundStatement};
use crate::domain::error::{AppError, Result};
use crate::domain::template::Template;
use crate::infrastructure::config::{DatabaseSettings, StreamingSettings};
use crate::infrastructure::embedding::bytes_to_embedding;
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[async_trait]
pub trait TemplateStore: Send + Sync {
    /// All templates in catalog order, embeddings decoded.
    async fn load_templates(&self) -> Result<Vec<Template>>;
}

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    fn bind_style(&self) -> BindStyle;

    /// Run `bound` and hand back its rows lazily.
    async fn execute(&self, bound: &BoundStatement) -> Result<RowStream>;
}

/// Channel sizing and value conversion for row streams.
#[derive(Debug, Clone, Copy)]
pub struct StreamOptions {
    pub channel_capacity: usize,
    pub decimal_policy: DecimalPolicy,
}

impl From<&StreamingSettings> for StreamOptions {
    fn from(settings: &StreamingSettings) -> Self {
        Self {
            channel_capacity: settings.channel_capacity,
            decimal_policy: settings.decimal_policy,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Backend {
    Sqlite(SqlitePool),
    Postgres(PgPool),
}

#[derive(Debug, Clone)]
pub struct SqlStore {
    backend: Backend,
    settings: DatabaseSettings,
    stream: StreamOptions,
}

impl SqlStore {
    pub async fn connect(settings: &DatabaseSettings, stream: StreamOptions) -> Result<Self> {
        let url = settings.url.trim();
        let acquire_timeout = Duration::from_secs(settings.connect_timeout_secs);

        let backend = if url.starts_with("sqlite:") {
            let options = SqliteConnectOptions::from_str(url)
                .map_err(|e| {
                    AppError::DatabaseError(format!("Failed to parse connection string: {}", e))
                })?
                .create_if_missing(true);
            let pool = SqlitePoolOptions::new()
                .max_connections(settings.max_connections)
                .acquire_timeout(acquire_timeout)
                .connect_with(options)
                .await
                .map_err(|e| AppError::DatabaseError(format!("Failed to connect: {}", e)))?;
            Backend::Sqlite(pool)
        } else if url.starts_with("postgres:") || url.starts_with("postgresql:") {
            let options = PgConnectOptions::from_str(url).map_err(|e| {
                AppError::DatabaseError(format!("Failed to parse connection string: {}", e))
            })?;
            let pool = PgPoolOptions::new()
                .max_connections(settings.max_connections)
                .acquire_timeout(acquire_timeout)
                .connect_with(options)
                .await
                .map_err(|e| {
                    AppError::DatabaseError(format!("Failed to connect to PostgreSQL: {}", e))
                })?;
            Backend::Postgres(pool)
        } else {
            return Err(AppError::ConfigError(format!(
                "Unsupported database url: {}",
                url
            )));
        };

        info!(
            "Connected to {} store (templates table '{}')",
            backend.label(),
            settings.templates_table
        );

        Ok(Self {
            backend,
            settings: settings.clone(),
            stream,
        })
    }

    pub fn with_backend(backend: Backend, settings: DatabaseSettings, stream: StreamOptions) -> Self {
        Self {
            backend,
            settings,
            stream,
        }
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn settings(&self) -> &DatabaseSettings {
        &self.settings
    }

    fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.settings.query_timeout_secs)
    }

    pub async fn close(&self) {
        match &self.backend {
            Backend::Sqlite(pool) => pool.close().await,
            Backend::Postgres(pool) => pool.close().await,
        }
    }
}

impl Backend {
    pub fn label(&self) -> &'static str {
        match self {
            Backend::Sqlite(_) => "sqlite",
            Backend::Postgres(_) => "postgres",
        }
    }
}

#[async_trait]
impl TemplateStore for SqlStore {
    async fn load_templates(&self) -> Result<Vec<Template>> {
        let sql = format!(
            "SELECT CAST(id AS BIGINT) AS id, name, intent_text, sql_template, embedding \
             FROM {} ORDER BY id",
            self.settings.templates_table
        );

        let entities = match &self.backend {
            Backend::Sqlite(pool) => sqlx::query_as::<_, TemplateEntity>(&sql)
                .fetch_all(pool)
                .await,
            Backend::Postgres(pool) => sqlx::query_as::<_, TemplateEntity>(&sql)
                .fetch_all(pool)
                .await,
        }
        .map_err(|e| AppError::DatabaseError(format!("Failed to load templates: {}", e)))?;

        info!("Loaded {} templates", entities.len());
        Ok(entities.into_iter().map(Template::from).collect())
    }
}

#[async_trait]
impl ExecutionStore for SqlStore {
    fn bind_style(&self) -> BindStyle {
        match self.backend {
            Backend::Sqlite(_) => BindStyle::QuestionNumbered,
            Backend::Postgres(_) => BindStyle::Dollar,
        }
    }

    async fn execute(&self, bound: &BoundStatement) -> Result<RowStream> {
        if self.settings.read_only && !is_read_only_statement(&bound.sql) {
            return Err(AppError::ExecutionFailure(
                "Only a single SELECT or WITH statement may be executed".to_string(),
            ));
        }

        match &self.backend {
            Backend::Sqlite(pool) => {
                sqlite::execute(pool, bound, self.stream, self.query_timeout()).await
            }
            Backend::Postgres(pool) => {
                postgres::execute(pool, bound, self.stream, self.query_timeout()).await
            }
        }
    }
}

/// Bound SQL and its serialized parameters, carried for failure logs.
#[derive(Debug, Clone)]
pub(crate) struct StatementLog {
    pub sql: String,
    pub params: String,
}

impl StatementLog {
    pub fn new(bound: &BoundStatement) -> Self {
        Self {
            sql: bound.sql.clone(),
            params: serde_json::to_string(&bound.params).unwrap_or_default(),
        }
    }
}

/// How a producer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Finish {
    /// The statement ran to its end or reported its own error.
    Done,
    /// The consumer left or the first row never came; the statement may
    /// still be running and must be stopped.
    Abandoned,
}

/// Forward rows from a sqlx fetch stream into `tx` until the statement ends,
/// fails, or the consumer goes away. Every wait on the store is raced against
/// the consumer closing the channel, so a dropped [`RowStream`] is noticed
/// even while the statement has produced nothing yet.
pub(crate) async fn pump_rows<R, S, D>(
    mut rows: S,
    decode: D,
    tx: &RowSender,
    statement: &StatementLog,
    first_row_timeout: Duration,
) -> Finish
where
    S: Stream<Item = std::result::Result<R, sqlx::Error>> + Unpin,
    D: Fn(&R) -> Vec<CellValue>,
{
    let first = tokio::select! {
        _ = tx.closed() => {
            debug!("Row consumer went away before the first row");
            return Finish::Abandoned;
        }
        item = tokio::time::timeout(first_row_timeout, rows.next()) => item,
    };

    let mut next = match first {
        Ok(item) => item,
        Err(_) => {
            error!(
                sql = %statement.sql,
                params = %statement.params,
                "Query timed out after {} seconds",
                first_row_timeout.as_secs()
            );
            tx.send_error(AppError::ExecutionFailure(format!(
                "Query timed out after {} seconds",
                first_row_timeout.as_secs()
            )))
            .await;
            return Finish::Abandoned;
        }
    };

    let mut sent = 0usize;
    while let Some(item) = next {
        match item {
            Ok(row) => {
                if !tx.send_row(decode(&row)).await {
                    debug!("Row consumer went away after {} rows", sent);
                    return Finish::Abandoned;
                }
                sent += 1;
            }
            Err(e) => {
                error!(
                    sql = %statement.sql,
                    params = %statement.params,
                    "Row fetch failed after {} rows: {}",
                    sent,
                    e
                );
                tx.send_error(AppError::ExecutionFailure(e.to_string())).await;
                return Finish::Done;
            }
        }

        next = tokio::select! {
            _ = tx.closed() => {
                debug!("Row consumer went away after {} rows", sent);
                return Finish::Abandoned;
            }
            item = rows.next() => item,
        };
    }

    debug!("Streamed {} rows", sent);
    Finish::Done
}

#[derive(sqlx::FromRow)]
struct TemplateEntity {
    id: i64,
    name: String,
    intent_text: String,
    sql_template: String,
    embedding: Option<Vec<u8>>,
}

impl From<TemplateEntity> for Template {
    fn from(e: TemplateEntity) -> Self {
        let embedding = match e.embedding.as_deref().map(bytes_to_embedding) {
            Some(Ok(v)) => Some(v),
            Some(Err(err)) => {
                warn!(template = %e.name, "Ignoring stored embedding: {}", err);
                None
            }
            None => None,
        };
        Template {
            id: e.id,
            name: e.name,
            intent_text: e.intent_text,
            sql_text: e.sql_template,
            embedding,
        }
    }
}

/// True when `sql` is one SELECT (or WITH ... SELECT) statement.
///
/// Leading comments and parentheses are skipped. A `;` outside quotes is only
/// allowed as the final character.
pub fn is_read_only_statement(sql: &str) -> bool {
    let body = strip_leading_noise(sql);
    let keyword: String = body
        .chars()
        .take_while(|c| c.is_ascii_alphabetic())
        .collect::<String>()
        .to_uppercase();
    if keyword != "SELECT" && keyword != "WITH" {
        return false;
    }
    !has_inner_statement_separator(body)
}

fn strip_leading_noise(sql: &str) -> &str {
    let mut rest = sql;
    loop {
        let trimmed = rest.trim_start_matches(|c: char| c.is_whitespace() || c == '(');
        if let Some(after) = trimmed.strip_prefix("--") {
            rest = after.find('\n').map(|i| &after[i + 1..]).unwrap_or("");
        } else if let Some(after) = trimmed.strip_prefix("/*") {
            rest = after.find("*/").map(|i| &after[i + 2..]).unwrap_or("");
        } else {
            return trimmed;
        }
    }
}

fn has_inner_statement_separator(sql: &str) -> bool {
    let mut quote: Option<char> = None;
    for (i, c) in sql.char_indices() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => quote = Some(c),
            None if c == ';' => return !sql[i + 1..].trim().is_empty(),
            None => {}
        }
    }
    false
}
