use super::{pump_rows, Finish, StatementLog, StreamOptions};
use crate::application::use_cases::result_streamer::{CellValue, RowSender, RowStream};
use crate::application::use_cases::template_binder::BoundStatement;
use crate::domain::error::{AppError, Result};
use crate::domain::parameters::ParamValue;
use sqlx::pool::PoolConnection;
use sqlx::query::Query;
use sqlx::sqlite::{Sqlite, SqliteArguments, SqlitePool, SqliteRow};
use sqlx::{Column, Executor, Row, Statement, TypeInfo, ValueRef};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

// VM instructions between interrupt checks
const INTERRUPT_CHECK_OPS: i32 = 1000;

/// Prepare `bound` on a pooled connection, then stream its rows from a
/// spawned task that owns the connection.
pub async fn execute(
    pool: &SqlitePool,
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
        conn,
        StatementLog::new(bound),
        values,
        tx,
        query_timeout,
    ));
    Ok(stream)
}

async fn prepare(pool: &SqlitePool, sql: &str) -> Result<(PoolConnection<Sqlite>, Vec<String>)> {
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
/// SQLite evaluates on a worker thread that only notices a dropped fetch
/// between rows, so a progress handler is armed for the run and trips when
/// the consumer leaves. The handler is removed before the connection goes
/// back to the pool.
async fn produce_rows(
    mut conn: PoolConnection<Sqlite>,
    statement: StatementLog,
    values: Vec<ParamValue>,
    tx: RowSender,
    first_row_timeout: Duration,
) {
    let interrupt = Arc::new(AtomicBool::new(false));
    let armed = match conn.lock_handle().await {
        Ok(mut handle) => {
            let flag = interrupt.clone();
            handle.set_progress_handler(INTERRUPT_CHECK_OPS, move || {
                !flag.load(Ordering::Relaxed)
            });
            true
        }
        Err(e) => {
            warn!("Could not arm statement interrupt: {}", e);
            false
        }
    };

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
        interrupt.store(true, Ordering::Relaxed);
    }

    if armed {
        // waits for the worker to unwind the interrupted step
        let disarmed = match conn.lock_handle().await {
            Ok(mut handle) => {
                handle.remove_progress_handler();
                true
            }
            Err(e) => {
                warn!("Could not disarm statement interrupt: {}", e);
                false
            }
        };
        if !disarmed {
            conn.close_on_drop();
        }
    }
}

fn bind_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &ParamValue,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        ParamValue::Int(i) => query.bind(*i),
        ParamValue::Float(f) => query.bind(*f),
        ParamValue::Text(s) => query.bind(s.clone()),
    }
}

pub fn decode_row(row: &SqliteRow) -> Vec<CellValue> {
    (0..row.columns().len())
        .map(|i| decode_cell(row, i))
        .collect()
}

// SQLite is dynamically typed, so decode by the storage class of the value
fn decode_cell(row: &SqliteRow, index: usize) -> CellValue {
    let type_name = match row.try_get_raw(index) {
        Ok(raw) if raw.is_null() => return CellValue::Null,
        Ok(raw) => raw.type_info().name().to_string(),
        Err(_) => return CellValue::Null,
    };

    let value = match type_name.as_str() {
        "INTEGER" | "BOOLEAN" => row.try_get::<i64, _>(index).ok().map(CellValue::Int),
        "REAL" | "NUMERIC" => row.try_get::<f64, _>(index).ok().map(CellValue::Float),
        "BLOB" => row.try_get::<Vec<u8>, _>(index).ok().map(CellValue::Bytes),
        _ => row.try_get::<String, _>(index).ok().map(CellValue::Text),
    };

    value.unwrap_or_else(|| {
        debug!("Unsupported SQLite value of type {} at column {}", type_name, index);
        CellValue::Null
    })
}
