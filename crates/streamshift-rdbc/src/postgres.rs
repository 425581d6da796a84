//! PostgreSQL backend implementation for streamshift-rdbc
//!
//! Provides PostgreSQL-specific implementations:
//! - Connection over a single `tokio-postgres` client
//! - `?` to `$n` placeholder translation
//! - Parameter encoding driven by the server-inferred parameter type

use async_trait::async_trait;
use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use rust_decimal::Decimal;
use std::error::Error as StdError;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};
use uuid::Uuid;

use crate::connection::{Connection, ConnectionConfig, ConnectionFactory};
use crate::dialect::{PostgresDialect, SqlDialect};
use crate::error::{Error, Result};
use crate::types::{Row, Value};

type EncodeResult = std::result::Result<IsNull, Box<dyn StdError + Sync + Send>>;

/// Rewrite positional `?` markers to `$1..$n`.
///
/// Markers inside string literals and quoted identifiers are left alone.
pub fn rewrite_placeholders(sql: &str) -> String {
    let dialect = PostgresDialect;
    let mut out = String::with_capacity(sql.len() + 8);
    let mut in_literal = false;
    let mut in_identifier = false;
    let mut index = 0;

    for ch in sql.chars() {
        match ch {
            '\'' if !in_identifier => {
                in_literal = !in_literal;
                out.push(ch);
            }
            '"' if !in_literal => {
                in_identifier = !in_identifier;
                out.push(ch);
            }
            '?' if !in_literal && !in_identifier => {
                index += 1;
                out.push_str(&dialect.placeholder(index));
            }
            _ => out.push(ch),
        }
    }
    out
}

fn is_text_type(ty: &Type) -> bool {
    matches!(
        *ty,
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN
    )
}

fn mismatch(value: &Value, ty: &Type) -> Box<dyn StdError + Sync + Send> {
    format!("cannot encode {} value as {}", value.sql_type(), ty).into()
}

fn encode_integer(n: i64, ty: &Type, out: &mut BytesMut) -> EncodeResult {
    match *ty {
        Type::INT2 => i16::try_from(n)?.to_sql(ty, out),
        Type::INT4 => i32::try_from(n)?.to_sql(ty, out),
        Type::INT8 => n.to_sql(ty, out),
        Type::FLOAT4 => (n as f32).to_sql(ty, out),
        Type::FLOAT8 => (n as f64).to_sql(ty, out),
        Type::NUMERIC => Decimal::from(n).to_sql(ty, out),
        Type::BOOL => (n != 0).to_sql(ty, out),
        _ if is_text_type(ty) => n.to_string().as_str().to_sql(ty, out),
        _ => Err(mismatch(&Value::Int64(n), ty)),
    }
}

fn encode_float(f: f64, ty: &Type, out: &mut BytesMut) -> EncodeResult {
    match *ty {
        Type::FLOAT4 => (f as f32).to_sql(ty, out),
        Type::FLOAT8 => f.to_sql(ty, out),
        Type::NUMERIC => Decimal::from_f64_retain(f)
            .ok_or_else(|| format!("{} is not representable as NUMERIC", f))?
            .to_sql(ty, out),
        Type::INT2 | Type::INT4 | Type::INT8 if f.fract() == 0.0 => {
            encode_integer(f as i64, ty, out)
        }
        _ if is_text_type(ty) => f.to_string().as_str().to_sql(ty, out),
        _ => Err(mismatch(&Value::Float64(f), ty)),
    }
}

fn parse_timestamp(s: &str) -> Option<NaiveDateTime> {
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
        .or_else(|| DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.naive_utc()))
}

fn encode_text(s: &str, ty: &Type, out: &mut BytesMut) -> EncodeResult {
    match *ty {
        _ if is_text_type(ty) => s.to_sql(ty, out),
        Type::INT2 | Type::INT4 | Type::INT8 => encode_integer(i64::from_str(s.trim())?, ty, out),
        Type::FLOAT4 | Type::FLOAT8 => encode_float(f64::from_str(s.trim())?, ty, out),
        Type::NUMERIC => Decimal::from_str(s.trim())?.to_sql(ty, out),
        Type::BOOL => Value::String(s.to_string())
            .as_bool()
            .ok_or_else(|| format!("'{}' is not a boolean", s))?
            .to_sql(ty, out),
        Type::DATE => NaiveDate::parse_from_str(s, "%Y-%m-%d")?.to_sql(ty, out),
        Type::TIME => NaiveTime::parse_from_str(s, "%H:%M:%S%.f")?.to_sql(ty, out),
        Type::TIMESTAMP => parse_timestamp(s)
            .ok_or_else(|| format!("'{}' is not a timestamp", s))?
            .to_sql(ty, out),
        Type::TIMESTAMPTZ => parse_timestamp(s)
            .ok_or_else(|| format!("'{}' is not a timestamp", s))?
            .and_utc()
            .to_sql(ty, out),
        Type::UUID => Uuid::parse_str(s)?.to_sql(ty, out),
        Type::JSON | Type::JSONB => serde_json::from_str::<serde_json::Value>(s)
            .unwrap_or_else(|_| serde_json::Value::String(s.to_string()))
            .to_sql(ty, out),
        _ => Err(mismatch(&Value::String(s.to_string()), ty)),
    }
}

fn encode_timestamp(dt: NaiveDateTime, ty: &Type, out: &mut BytesMut) -> EncodeResult {
    match *ty {
        Type::TIMESTAMP => dt.to_sql(ty, out),
        Type::TIMESTAMPTZ => dt.and_utc().to_sql(ty, out),
        Type::DATE => dt.date().to_sql(ty, out),
        Type::INT8 => dt.and_utc().timestamp_millis().to_sql(ty, out),
        _ if is_text_type(ty) => dt
            .format("%Y-%m-%d %H:%M:%S%.f")
            .to_string()
            .as_str()
            .to_sql(ty, out),
        _ => Err(mismatch(&Value::DateTime(dt), ty)),
    }
}

impl ToSql for Value {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> EncodeResult {
        match self {
            Value::Null => Ok(IsNull::Yes),
            Value::Bool(b) => match *ty {
                Type::BOOL => b.to_sql(ty, out),
                Type::INT2 | Type::INT4 | Type::INT8 => encode_integer(i64::from(*b), ty, out),
                _ if is_text_type(ty) => b.to_string().as_str().to_sql(ty, out),
                _ => Err(mismatch(self, ty)),
            },
            Value::Int32(n) => encode_integer(i64::from(*n), ty, out),
            Value::Int64(n) => encode_integer(*n, ty, out),
            Value::Float64(f) => encode_float(*f, ty, out),
            Value::String(s) => encode_text(s, ty, out),
            Value::Date(d) => match *ty {
                Type::DATE => d.to_sql(ty, out),
                Type::TIMESTAMP | Type::TIMESTAMPTZ => {
                    encode_timestamp(d.and_time(NaiveTime::default()), ty, out)
                }
                _ if is_text_type(ty) => d.to_string().as_str().to_sql(ty, out),
                _ => Err(mismatch(self, ty)),
            },
            Value::DateTime(dt) => encode_timestamp(*dt, ty, out),
            Value::DateTimeTz(dt) => match *ty {
                Type::TIMESTAMPTZ => dt.to_sql(ty, out),
                _ => encode_timestamp(dt.naive_utc(), ty, out),
            },
            Value::Uuid(u) => match *ty {
                Type::UUID => u.to_sql(ty, out),
                _ if is_text_type(ty) => u.to_string().as_str().to_sql(ty, out),
                _ => Err(mismatch(self, ty)),
            },
            Value::Json(j) => match *ty {
                Type::JSON | Type::JSONB => j.to_sql(ty, out),
                _ if is_text_type(ty) => j.to_string().as_str().to_sql(ty, out),
                _ => Err(mismatch(self, ty)),
            },
        }
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// Convert a tokio-postgres row to a Row
fn pg_row_to_row(pg_row: &tokio_postgres::Row) -> Row {
    pg_row
        .columns()
        .iter()
        .enumerate()
        .map(|(i, col)| (col.name().to_string(), pg_value_to_value(pg_row, i, col.type_())))
        .collect()
}

fn pg_value_to_value(row: &tokio_postgres::Row, idx: usize, pg_type: &Type) -> Value {
    fn get<'a, T>(row: &'a tokio_postgres::Row, idx: usize) -> Option<T>
    where
        T: tokio_postgres::types::FromSql<'a>,
    {
        row.try_get::<_, Option<T>>(idx).ok().flatten()
    }

    let value = match *pg_type {
        Type::BOOL => get::<bool>(row, idx).map(Value::Bool),
        Type::INT2 => get::<i16>(row, idx).map(|v| Value::Int32(i32::from(v))),
        Type::INT4 => get::<i32>(row, idx).map(Value::Int32),
        Type::INT8 => get::<i64>(row, idx).map(Value::Int64),
        Type::FLOAT4 => get::<f32>(row, idx).map(|v| Value::Float64(f64::from(v))),
        Type::FLOAT8 => get::<f64>(row, idx).map(Value::Float64),
        Type::NUMERIC => get::<Decimal>(row, idx).map(|d| Value::String(d.to_string())),
        Type::DATE => get::<NaiveDate>(row, idx).map(Value::Date),
        Type::TIMESTAMP => get::<NaiveDateTime>(row, idx).map(Value::DateTime),
        Type::TIMESTAMPTZ => get::<DateTime<Utc>>(row, idx).map(Value::DateTimeTz),
        Type::UUID => get::<Uuid>(row, idx).map(Value::Uuid),
        Type::JSON | Type::JSONB => get::<serde_json::Value>(row, idx).map(Value::Json),
        _ => get::<String>(row, idx).map(Value::String),
    };
    value.unwrap_or(Value::Null)
}

fn map_pg_error(err: tokio_postgres::Error, sql: &str) -> Error {
    if err.is_closed() {
        return Error::connection_with_source("connection closed", err);
    }
    let Some(db) = err.as_db_error() else {
        // client-side failure, e.g. a parameter that cannot be bound as its column type
        let message = err.to_string();
        if message.starts_with("error serializing parameter") {
            return Error::encoding(message);
        }
        return Error::Query {
            message,
            sql: Some(sql.to_string()),
            sqlstate: None,
            source: Some(Box::new(err)),
        };
    };

    let code = db.code().code();
    if code.starts_with("23") {
        return Error::constraint(db.constraint().unwrap_or("unknown"), db.message());
    }
    if code.starts_with("08") {
        return Error::connection(db.message().to_string());
    }
    if code == "57014" {
        return Error::timeout(db.message().to_string());
    }
    let message = db.message().to_string();
    let sqlstate = code.to_string();
    Error::Query {
        message,
        sql: Some(sql.to_string()),
        sqlstate: Some(sqlstate),
        source: Some(Box::new(err)),
    }
}

/// PostgreSQL connection implementation
pub struct PgConnection {
    client: tokio_postgres::Client,
    closed: AtomicBool,
}

impl PgConnection {
    /// Create a new connection from a tokio-postgres client
    pub fn new(client: tokio_postgres::Client) -> Self {
        Self {
            client,
            closed: AtomicBool::new(false),
        }
    }

    /// Get the underlying client
    pub fn client(&self) -> &tokio_postgres::Client {
        &self.client
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Relaxed) || self.client.is_closed() {
            return Err(Error::connection("connection is closed"));
        }
        Ok(())
    }
}

fn param_refs(params: &[Value]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|v| v as &(dyn ToSql + Sync)).collect()
}

#[async_trait]
impl Connection for PgConnection {
    async fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        self.ensure_open()?;
        let native = rewrite_placeholders(sql);

        let pg_rows = self
            .client
            .query(native.as_str(), &param_refs(params))
            .await
            .map_err(|e| map_pg_error(e, sql))?;

        Ok(pg_rows.iter().map(pg_row_to_row).collect())
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        self.ensure_open()?;
        let native = rewrite_placeholders(sql);

        self.client
            .execute(native.as_str(), &param_refs(params))
            .await
            .map_err(|e| map_pg_error(e, sql))
    }

    async fn is_valid(&self) -> bool {
        if self.ensure_open().is_err() {
            return false;
        }
        self.client.simple_query("SELECT 1").await.is_ok()
    }

    async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

/// PostgreSQL connection factory
#[derive(Debug, Clone, Default)]
pub struct PgConnectionFactory;

#[async_trait]
impl ConnectionFactory for PgConnectionFactory {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
        let mut pg_config = tokio_postgres::Config::from_str(&config.url)
            .map_err(|e| Error::config(format!("invalid connection url: {}", e)))?;
        if let Some(password) = &config.password {
            pg_config.password(password);
        }
        if let Some(name) = &config.application_name {
            pg_config.application_name(name);
        }
        pg_config.connect_timeout(Duration::from_millis(config.connect_timeout_ms));

        let (client, connection) = pg_config
            .connect(tokio_postgres::NoTls)
            .await
            .map_err(|e| Error::connection_with_source("failed to connect", e))?;

        let url = config.redacted_url();
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::error!(url = %url, error = %e, "PostgreSQL connection terminated");
            }
        });

        Ok(Box::new(PgConnection::new(client)))
    }
}

/// Connect to PostgreSQL database
pub async fn connect(config: &ConnectionConfig) -> Result<Box<dyn Connection>> {
    PgConnectionFactory.connect(config).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_placeholders() {
        assert_eq!(
            rewrite_placeholders("UPDATE \"t\" SET \"a\" = ?, \"b\" = ? WHERE \"id\" = ?"),
            "UPDATE \"t\" SET \"a\" = $1, \"b\" = $2 WHERE \"id\" = $3"
        );
    }

    #[test]
    fn test_rewrite_skips_quoted_regions() {
        assert_eq!(
            rewrite_placeholders("SELECT '?', \"col?\" FROM t WHERE x = ? AND y = 'it''s?'"),
            "SELECT '?', \"col?\" FROM t WHERE x = $1 AND y = 'it''s?'"
        );
    }

    #[test]
    fn test_encode_narrows_integers() {
        let mut buf = BytesMut::new();
        assert!(Value::Int64(42).to_sql(&Type::INT4, &mut buf).is_ok());
        assert_eq!(buf.len(), 4);

        let mut buf = BytesMut::new();
        assert!(Value::Int64(i64::MAX).to_sql(&Type::INT4, &mut buf).is_err());
    }

    #[test]
    fn test_encode_text_into_typed_columns() {
        let mut buf = BytesMut::new();
        let date = Value::String("2024-02-29".into());
        assert!(date.to_sql(&Type::DATE, &mut buf).is_ok());

        let mut buf = BytesMut::new();
        let bad = Value::String("not-a-uuid".into());
        assert!(bad.to_sql(&Type::UUID, &mut buf).is_err());
    }

    #[test]
    fn test_encode_null() {
        let mut buf = BytesMut::new();
        assert!(matches!(
            Value::Null.to_sql(&Type::INT4, &mut buf),
            Ok(IsNull::Yes)
        ));
    }
}
