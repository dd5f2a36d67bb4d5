use super::{pump_rows, Finish, StatementLog, StreamOptions};
use crate::application::use_cases::result_streamer::{CellValue, RowSender, RowStream};
use crate::application::use_cases::template_binder::BoundStatement;
use crate::domain::error::{AppError, Result};
use crate::domain::parameters::ParamValue;
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::pool::PoolConnection;
use sqlx::postgres::{PgArguments, PgConnection, PgPool, PgRow, Postgres};
use sqlx::query::Query;
use sqlx::{Column, Connection, Decode, Executor, Row, Statement, Type, TypeInfo, ValueRef};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Same contract as the SQLite executor, with `$n` binds and typed decoding.
pub async fn execute(
    pool: &PgPool,
    bound: &BoundStatement,
    options: StreamOptions,
    query_timeout: Duration,
) -> Result<RowStream> {
    let (conn, columns) = tokio::time::timeout(query_timeout, prepare(pool, &bound.sql))
        .await
        .map_err(|_| {
            AppError::ExecutionFailure(format!(
                "Query preparation timed out after {} seconds",
                query_timeout.as_secs()
            ))
        })??;

    let (tx, stream) = RowStream::channel(columns, options.channel_capacity, options.decimal_policy);
    let values: Vec<ParamValue> = bound.positional_values().into_iter().cloned().collect();

    tokio::spawn(produce_rows(
        pool.clone(),
        conn,
        StatementLog::new(bound),
        values,
        tx,
        query_timeout,
    ));
    Ok(stream)
}

async fn prepare(pool: &PgPool, sql: &str) -> Result<(PoolConnection<Postgres>, Vec<String>)> {
    let mut conn = pool
        .acquire()
        .await
        .map_err(|e| AppError::ExecutionFailure(format!("Failed to acquire connection: {}", e)))?;
    let columns = {
        let statement = (&mut *conn)
            .prepare(sql)
            .await
            .map_err(|e| AppError::ExecutionFailure(e.to_string()))?;
        statement
            .columns()
            .iter()
            .map(|c| c.name().to_string())
            .collect()
    };
    Ok((conn, columns))
}

/// Run the statement and feed its rows to `tx`.
///
/// An abandoned statement keeps running server side, so its backend gets a
/// cancel request and the connection is closed instead of going back to the
/// pool with unread results.
async fn produce_rows(
    pool: PgPool,
    mut conn: PoolConnection<Postgres>,
    statement: StatementLog,
    values: Vec<ParamValue>,
    tx: RowSender,
    first_row_timeout: Duration,
) {
    let backend_pid: Option<i32> = sqlx::query_scalar("SELECT pg_backend_pid()")
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| warn!("Could not read backend pid: {}", e))
        .ok();

    let finish = {
        let mut query = sqlx::query(&statement.sql);
        for value in &values {
            query = bind_value(query, value);
        }
        pump_rows(
            query.fetch(&mut *conn),
            decode_row,
            &tx,
            &statement,
            first_row_timeout,
        )
        .await
    };

    if finish == Finish::Abandoned {
        conn.close_on_drop();
        drop(conn);
        if let Some(pid) = backend_pid {
            cancel_backend(&pool, pid).await;
        }
    }
}

// The cancel goes over its own short-lived connection; the pool may have
// no free slot while the abandoned statement holds one.
async fn cancel_backend(pool: &PgPool, pid: i32) {
    let options = pool.connect_options();
    let mut conn = match PgConnection::connect_with(&options).await {
        Ok(conn) => conn,
        Err(e) => {
            warn!(pid, "Could not open connection to cancel statement: {}", e);
            return;
        }
    };
    match sqlx::query_scalar::<_, bool>("SELECT pg_cancel_backend($1)")
        .bind(pid)
        .fetch_one(&mut conn)
        .await
    {
        Ok(cancelled) => info!(pid, cancelled, "Cancelled abandoned statement"),
        Err(e) => warn!(pid, "Cancel request failed: {}", e),
    }
    if let Err(e) = conn.close().await {
        debug!("Closing cancel connection failed: {}", e);
    }
}

fn bind_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &ParamValue,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        ParamValue::Int(i) => query.bind(*i),
        ParamValue::Float(f) => query.bind(*f),
        ParamValue::Text(s) => query.bind(s.clone()),
    }
}

pub fn decode_row(row: &PgRow) -> Vec<CellValue> {
    (0..row.columns().len())
        .map(|i| decode_cell(row, i))
        .collect()
}

fn get<'r, T>(row: &'r PgRow, index: usize) -> Option<T>
where
    T: Decode<'r, Postgres> + Type<Postgres>,
{
    row.try_get::<T, _>(index).ok()
}

fn decode_cell(row: &PgRow, index: usize) -> CellValue {
    let type_name = match row.try_get_raw(index) {
        Ok(raw) if raw.is_null() => return CellValue::Null,
        Ok(raw) => raw.type_info().name().to_string(),
        Err(_) => return CellValue::Null,
    };

    let value = match type_name.as_str() {
        "BOOL" => get::<bool>(row, index).map(CellValue::Bool),
        "INT2" => get::<i16>(row, index).map(|v| CellValue::Int(v.into())),
        "INT4" => get::<i32>(row, index).map(|v| CellValue::Int(v.into())),
        "INT8" => get::<i64>(row, index).map(CellValue::Int),
        "FLOAT4" => get::<f32>(row, index).map(|v| CellValue::Float(v.into())),
        "FLOAT8" => get::<f64>(row, index).map(CellValue::Float),
        "NUMERIC" => get::<BigDecimal>(row, index).map(CellValue::Decimal),
        "DATE" => get::<NaiveDate>(row, index).map(CellValue::Date),
        "TIME" => get::<NaiveTime>(row, index).map(CellValue::Time),
        "TIMESTAMP" => get::<NaiveDateTime>(row, index).map(CellValue::DateTime),
        "TIMESTAMPTZ" => get::<DateTime<Utc>>(row, index).map(CellValue::DateTimeUtc),
        "BYTEA" => get::<Vec<u8>>(row, index).map(CellValue::Bytes),
        "JSON" | "JSONB" => get::<serde_json::Value>(row, index).map(CellValue::Json),
        _ => get::<String>(row, index).map(CellValue::Text),
    };

    value.unwrap_or_else(|| {
        debug!("Unsupported PostgreSQL type {} at column {}", type_name, index);
        CellValue::Null
    })
}
