//! Result Streamer
//!
//! Rows travel from the store to the caller through a bounded channel. The
//! producer side (a task that owns the database connection) pushes decoded
//! cells; the consumer side is a [`RowStream`] yielding one [`ResultRow`] at a
//! time.
//!
//! Lifecycle guarantees:
//! - Column names are fixed before the first row and shared by every row
//! - A slow consumer stalls the producer once the channel is full
//! - Dropping the stream closes the channel; the producer sees the failed
//!   send, stops fetching and releases its connection

use crate::domain::error::{AppError, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use bigdecimal::{BigDecimal, ToPrimitive};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use futures::Stream;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio::sync::mpsc;

/// How fixed-point decimals are written out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecimalPolicy {
    /// Convert to a JSON number; precision may be lost.
    #[default]
    Float,
    /// Keep the exact decimal text.
    String,
}

/// One decoded cell, before JSON conversion.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Decimal(BigDecimal),
    Text(String),
    Date(NaiveDate),
    Time(NaiveTime),
    DateTime(NaiveDateTime),
    DateTimeUtc(DateTime<Utc>),
    Json(Value),
    Bytes(Vec<u8>),
}

impl CellValue {
    pub fn to_json(&self, policy: DecimalPolicy) -> Value {
        match self {
            CellValue::Null => Value::Null,
            CellValue::Bool(b) => Value::Bool(*b),
            CellValue::Int(i) => Value::from(*i),
            CellValue::Float(f) => float_json(*f),
            CellValue::Decimal(d) => match policy {
                DecimalPolicy::Float => d.to_f64().map(float_json).unwrap_or(Value::Null),
                DecimalPolicy::String => Value::String(d.to_string()),
            },
            CellValue::Text(s) => Value::String(s.clone()),
            CellValue::Date(d) => Value::String(d.format("%Y-%m-%d").to_string()),
            CellValue::Time(t) => Value::String(t.format("%H:%M:%S%.f").to_string()),
            CellValue::DateTime(dt) => Value::String(dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string()),
            CellValue::DateTimeUtc(dt) => Value::String(dt.to_rfc3339()),
            CellValue::Json(v) => v.clone(),
            CellValue::Bytes(b) => Value::String(BASE64.encode(b)),
        }
    }
}

// NaN and infinities have no JSON form
fn float_json(f: f64) -> Value {
    serde_json::Number::from_f64(f)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// One output record: column name → JSON value, in column order.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultRow {
    columns: Arc<Vec<String>>,
    values: Vec<Value>,
}

impl ResultRow {
    pub fn new(columns: Arc<Vec<String>>, cells: Vec<CellValue>, policy: DecimalPolicy) -> Self {
        let values = cells.iter().map(|c| c.to_json(policy)).collect();
        Self { columns, values }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.values.get(i))
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

impl Serialize for ResultRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.values.len()))?;
        for (column, value) in self.columns.iter().zip(self.values.iter()) {
            map.serialize_entry(column, value)?;
        }
        map.end()
    }
}

/// Producer half of a row channel.
#[derive(Debug, Clone)]
pub struct RowSender {
    tx: mpsc::Sender<Result<Vec<CellValue>>>,
}

impl RowSender {
    /// Push one row. Returns `false` once the consumer is gone.
    pub async fn send_row(&self, cells: Vec<CellValue>) -> bool {
        self.tx.send(Ok(cells)).await.is_ok()
    }

    /// Push a terminal error. The producer should stop afterwards.
    pub async fn send_error(&self, err: AppError) -> bool {
        self.tx.send(Err(err)).await.is_ok()
    }

    /// Resolves once the consumer has dropped its [`RowStream`].
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

/// Lazy, finite, non-restartable sequence of result rows.
pub struct RowStream {
    columns: Arc<Vec<String>>,
    rx: mpsc::Receiver<Result<Vec<CellValue>>>,
    policy: DecimalPolicy,
}

impl RowStream {
    /// Open a bounded row channel for `columns`.
    pub fn channel(
        columns: Vec<String>,
        capacity: usize,
        policy: DecimalPolicy,
    ) -> (RowSender, RowStream) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            RowSender { tx },
            RowStream {
                columns: Arc::new(columns),
                rx,
                policy,
            },
        )
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }
}

impl Stream for RowStream {
    type Item = Result<ResultRow>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(Ok(cells))) => Poll::Ready(Some(Ok(ResultRow::new(
                this.columns.clone(),
                cells,
                this.policy,
            )))),
            Poll::Ready(Some(Err(err))) => Poll::Ready(Some(Err(err))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}
