//! PostgreSQL connection implementation

use async_trait::async_trait;
use bytes::BytesMut;
use gistools_core::{
    ColumnMeta, Connection, GisError, QueryResult, Result, Row, SchemaIntrospection,
    StatementResult, Transaction, Value,
};
use native_tls::TlsConnector;
use postgres_native_tls::MakeTlsConnector;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Mutex;
use tokio_postgres::{
    Client, NoTls, Row as PgRow,
    config::SslMode,
    types::{FromSql, ToSql, Type},
};

use crate::numeric;

pub(crate) fn format_postgres_error(error: &tokio_postgres::Error) -> String {
    let Some(db_error) = error.as_db_error() else {
        return error.to_string();
    };

    let code = db_error.code();
    let mut message = db_error.message().to_string();

    if let Some(detail) = db_error.detail() {
        if !detail.trim().is_empty() {
            message.push_str(&format!(" (detail: {})", detail));
        }
    }

    if let Some(hint) = db_error.hint() {
        if !hint.trim().is_empty() {
            message.push_str(&format!(" (hint: {})", hint));
        }
    }

    match code.code() {
        "42701" => format!("column already exists: {}", message),
        "42P06" => format!("schema already exists: {}", message),
        "42703" => format!("column does not exist: {}", message),
        "42P01" => format!("table does not exist: {}", message),
        "42501" => format!("permission denied: {}", message),
        "23505" => format!("duplicate value violates unique constraint: {}", message),
        "23502" => format!("null value violates not-null constraint: {}", message),
        "22P02" => format!("invalid input syntax: {}", message),
        _ => format!("{} (code: {})", message, code.code()),
    }
}

/// TLS connector for `prefer`/`require`; like libpq, neither mode verifies
/// the server certificate.
fn build_tls_connector() -> Result<MakeTlsConnector> {
    let connector = TlsConnector::builder()
        .danger_accept_invalid_certs(true)
        .danger_accept_invalid_hostnames(true)
        .build()
        .map_err(|e| GisError::Connection(format!("Failed to build TLS connector: {}", e)))?;
    Ok(MakeTlsConnector::new(connector))
}

/// PostgreSQL connection wrapper
pub struct PostgresConnection {
    client: Arc<Mutex<Client>>,
    closed: AtomicBool,
}

impl PostgresConnection {
    /// Connect using a keyword/value or URL connection string
    #[tracing::instrument(skip(connection_string))]
    pub async fn connect(connection_string: &str) -> Result<Self> {
        let config = tokio_postgres::Config::from_str(connection_string)
            .map_err(|e| GisError::Configuration(format!("Invalid connection string: {}", e)))?;
        let ssl_mode = config.get_ssl_mode();

        tracing::info!(
            hosts = ?config.get_hosts(),
            database = ?config.get_dbname(),
            ssl_mode = ?ssl_mode,
            "connecting to PostgreSQL database"
        );

        let client = match ssl_mode {
            SslMode::Disable => {
                let (client, connection) = config.connect(NoTls).await.map_err(|e| {
                    GisError::Connection(format!(
                        "Failed to connect to PostgreSQL: {}",
                        format_postgres_error(&e)
                    ))
                })?;
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        tracing::error!(error = %e, "PostgreSQL connection error");
                    }
                });
                client
            }
            _ => {
                let tls = build_tls_connector()?;
                let (client, connection) = config.connect(tls).await.map_err(|e| {
                    GisError::Connection(format!(
                        "Failed to connect to PostgreSQL: {}",
                        format_postgres_error(&e)
                    ))
                })?;
                tokio::spawn(async move {
                    if let Err(e) = connection.await {
                        tracing::error!(error = %e, "PostgreSQL connection error");
                    }
                });
                client
            }
        };

        tracing::debug!("PostgreSQL connection established");
        Ok(Self {
            client: Arc::new(Mutex::new(client)),
            closed: AtomicBool::new(false),
        })
    }
}

/// Owned parameter value that tokio-postgres can bind.
///
/// Built against the prepared statement's parameter types so integers are
/// written with the right width and text cells reach typed columns.
#[derive(Debug)]
enum PgValue {
    Null,
    Bool(bool),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    Numeric(String),
    /// Integer too wide for the target column
    OutOfRange(i64),
    Text(String),
    Bytes(Vec<u8>),
    Uuid(uuid::Uuid),
    Json(serde_json::Value),
    Date(chrono::NaiveDate),
    Time(chrono::NaiveTime),
    DateTime(chrono::NaiveDateTime),
    DateTimeUtc(chrono::DateTime<chrono::Utc>),
}

impl PgValue {
    fn for_type(value: &Value, target: &Type) -> Self {
        match value {
            Value::Null => PgValue::Null,
            Value::Bool(v) => PgValue::Bool(*v),
            Value::Int16(v) => Self::from_int(*v as i64, target),
            Value::Int32(v) => Self::from_int(*v as i64, target),
            Value::Int64(v) => Self::from_int(*v, target),
            Value::Float32(v) => Self::from_float(*v as f64, target),
            Value::Float64(v) => Self::from_float(*v, target),
            Value::Decimal(v) | Value::String(v) => Self::from_text(v, target),
            Value::Bytes(v) => PgValue::Bytes(v.clone()),
            Value::Uuid(v) => PgValue::Uuid(*v),
            Value::Json(v) => PgValue::Json(v.clone()),
            Value::Date(v) => PgValue::Date(*v),
            Value::Time(v) => PgValue::Time(*v),
            Value::DateTime(v) => PgValue::DateTime(*v),
            Value::DateTimeUtc(v) => PgValue::DateTimeUtc(*v),
        }
    }

    /// Values outside a narrower column's range are kept whole so the bind
    /// fails instead of storing a wrapped number.
    fn from_int(value: i64, target: &Type) -> Self {
        match *target {
            Type::INT2 => i16::try_from(value)
                .map(PgValue::Int16)
                .unwrap_or(PgValue::OutOfRange(value)),
            Type::INT4 => i32::try_from(value)
                .map(PgValue::Int32)
                .unwrap_or(PgValue::OutOfRange(value)),
            Type::FLOAT4 => PgValue::Float32(value as f32),
            Type::FLOAT8 => PgValue::Float64(value as f64),
            Type::NUMERIC => PgValue::Numeric(value.to_string()),
            Type::TEXT | Type::VARCHAR | Type::BPCHAR => PgValue::Text(value.to_string()),
            _ => PgValue::Int64(value),
        }
    }

    fn from_float(value: f64, target: &Type) -> Self {
        match *target {
            Type::FLOAT4 => PgValue::Float32(value as f32),
            Type::NUMERIC => PgValue::Numeric(value.to_string()),
            Type::TEXT | Type::VARCHAR | Type::BPCHAR => PgValue::Text(value.to_string()),
            _ => PgValue::Float64(value),
        }
    }

    /// Text cells are coerced into the column's type when they parse; anything
    /// else is sent as text and the server reports the mismatch.
    fn from_text(value: &str, target: &Type) -> Self {
        let trimmed = value.trim();
        let parsed = match *target {
            Type::INT2 | Type::INT4 | Type::INT8 => trimmed
                .parse::<i64>()
                .ok()
                .map(|v| Self::from_int(v, target)),
            Type::FLOAT4 => trimmed.parse().ok().map(PgValue::Float32),
            Type::FLOAT8 => trimmed.parse().ok().map(PgValue::Float64),
            Type::NUMERIC => Some(PgValue::Numeric(trimmed.to_string())),
            Type::BOOL => match trimmed.to_ascii_lowercase().as_str() {
                "true" | "t" | "1" | "yes" | "y" => Some(PgValue::Bool(true)),
                "false" | "f" | "0" | "no" | "n" => Some(PgValue::Bool(false)),
                _ => None,
            },
            Type::DATE => chrono::NaiveDate::parse_from_str(trimmed, "%Y-%m-%d")
                .ok()
                .map(PgValue::Date),
            Type::TIME => chrono::NaiveTime::parse_from_str(trimmed, "%H:%M:%S%.f")
                .ok()
                .map(PgValue::Time),
            Type::TIMESTAMP => parse_timestamp(trimmed).map(PgValue::DateTime),
            Type::TIMESTAMPTZ => chrono::DateTime::parse_from_rfc3339(trimmed)
                .ok()
                .map(|ts| ts.with_timezone(&chrono::Utc))
                .or_else(|| parse_timestamp(trimmed).map(|ts| ts.and_utc()))
                .map(PgValue::DateTimeUtc),
            Type::UUID => uuid::Uuid::parse_str(trimmed).ok().map(PgValue::Uuid),
            Type::JSON | Type::JSONB => serde_json::from_str(value).ok().map(PgValue::Json),
            _ => None,
        };
        parsed.unwrap_or_else(|| PgValue::Text(value.to_string()))
    }
}

fn parse_timestamp(value: &str) -> Option<chrono::NaiveDateTime> {
    chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%.f")
        .or_else(|_| chrono::NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f"))
        .ok()
        .or_else(|| {
            chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
        })
}

impl ToSql for PgValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<postgres_types::IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            PgValue::Null => Ok(postgres_types::IsNull::Yes),
            PgValue::Bool(v) => v.to_sql(ty, out),
            PgValue::Int16(v) => v.to_sql(ty, out),
            PgValue::Int32(v) => v.to_sql(ty, out),
            PgValue::Int64(v) => v.to_sql(ty, out),
            PgValue::Float32(v) => v.to_sql(ty, out),
            PgValue::Float64(v) => v.to_sql(ty, out),
            PgValue::Numeric(v) => {
                numeric::encode(v, out)?;
                Ok(postgres_types::IsNull::No)
            }
            PgValue::OutOfRange(v) => Err(format!("{} is out of range for type {}", v, ty).into()),
            PgValue::Text(v) => v.to_sql(ty, out),
            PgValue::Bytes(v) => v.to_sql(ty, out),
            PgValue::Uuid(v) => v.to_sql(ty, out),
            PgValue::Json(v) => v.to_sql(ty, out),
            PgValue::Date(v) => v.to_sql(ty, out),
            PgValue::Time(v) => v.to_sql(ty, out),
            PgValue::DateTime(v) => v.to_sql(ty, out),
            PgValue::DateTimeUtc(v) => v.to_sql(ty, out),
        }
    }

    fn accepts(_: &Type) -> bool {
        true
    }

    postgres_types::to_sql_checked!();
}

/// NUMERIC read as decimal text
struct PgNumeric(String);

impl<'a> FromSql<'a> for PgNumeric {
    fn from_sql(
        _: &Type,
        raw: &'a [u8],
    ) -> std::result::Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        Ok(Self(numeric::decode(raw)?))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

/// Raw UTF-8 payload for types without a dedicated mapping (enums, citext, ...)
struct PgText(String);

impl<'a> FromSql<'a> for PgText {
    fn from_sql(
        _: &Type,
        raw: &'a [u8],
    ) -> std::result::Result<Self, Box<dyn std::error::Error + Sync + Send>> {
        Ok(Self(String::from_utf8(raw.to_vec())?))
    }

    fn accepts(_: &Type) -> bool {
        true
    }
}

fn cell<'a, T: FromSql<'a>>(row: &'a PgRow, idx: usize) -> Option<T> {
    row.try_get::<_, Option<T>>(idx).ok().flatten()
}

/// Convert a PostgreSQL row cell to a [`Value`]; undecodable cells read as NULL
fn postgres_to_value(row: &PgRow, idx: usize) -> Value {
    let value = match row.columns()[idx].type_().name() {
        "bool" => cell(row, idx).map(Value::Bool),
        "int2" => cell(row, idx).map(Value::Int16),
        "int4" => cell(row, idx).map(Value::Int32),
        "int8" => cell(row, idx).map(Value::Int64),
        "float4" => cell(row, idx).map(Value::Float32),
        "float8" => cell(row, idx).map(Value::Float64),
        "numeric" => cell::<PgNumeric>(row, idx).map(|n| Value::Decimal(n.0)),
        "text" | "varchar" | "bpchar" | "name" => cell(row, idx).map(Value::String),
        "bytea" => cell(row, idx).map(Value::Bytes),
        "uuid" => cell(row, idx).map(Value::Uuid),
        "json" | "jsonb" => cell(row, idx).map(Value::Json),
        "date" => cell(row, idx).map(Value::Date),
        "time" => cell(row, idx).map(Value::Time),
        "timestamp" => cell(row, idx).map(Value::DateTime),
        "timestamptz" => cell(row, idx).map(Value::DateTimeUtc),
        _ => cell::<PgText>(row, idx).map(|text| Value::String(text.0)),
    };
    value.unwrap_or(Value::Null)
}

async fn run_query(client: &Client, sql: &str, params: &[Value]) -> Result<QueryResult> {
    let start_time = std::time::Instant::now();

    // Prepare first so we know the target type of each parameter
    let statement = client.prepare(sql).await.map_err(|e| {
        GisError::Query(format!("Failed to prepare query: {}", format_postgres_error(&e)))
    })?;
    let pg_params = bind_params(statement.params(), params);
    let param_refs: Vec<&(dyn ToSql + Sync)> =
        pg_params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

    let pg_rows = client.query(&statement, &param_refs).await.map_err(|e| {
        GisError::Query(format!("Failed to execute query: {}", format_postgres_error(&e)))
    })?;

    let columns: Vec<ColumnMeta> = statement
        .columns()
        .iter()
        .enumerate()
        .map(|(ordinal, col)| ColumnMeta {
            name: col.name().to_string(),
            data_type: col.type_().name().to_string(),
            ordinal,
        })
        .collect();
    let column_names: Vec<String> = columns.iter().map(|c| c.name.clone()).collect();

    let rows = pg_rows
        .iter()
        .map(|pg_row| {
            let values = (0..columns.len())
                .map(|idx| postgres_to_value(pg_row, idx))
                .collect();
            Row::new(column_names.clone(), values)
        })
        .collect::<Vec<_>>();

    let execution_time_ms = start_time.elapsed().as_millis() as u64;
    tracing::debug!(
        row_count = rows.len(),
        execution_time_ms = execution_time_ms,
        "query executed successfully"
    );

    Ok(QueryResult {
        id: uuid::Uuid::new_v4(),
        columns,
        rows,
        execution_time_ms,
    })
}

async fn run_execute(client: &Client, sql: &str, params: &[Value]) -> Result<StatementResult> {
    let statement = client.prepare(sql).await.map_err(|e| {
        GisError::Query(format!(
            "Failed to prepare statement: {}",
            format_postgres_error(&e)
        ))
    })?;
    let pg_params = bind_params(statement.params(), params);
    let param_refs: Vec<&(dyn ToSql + Sync)> =
        pg_params.iter().map(|p| p as &(dyn ToSql + Sync)).collect();

    let affected_rows = client
        .execute(&statement, &param_refs)
        .await
        .map_err(|e| {
            GisError::Query(format!(
                "Failed to execute statement: {}",
                format_postgres_error(&e)
            ))
        })?;

    tracing::debug!(affected_rows, "statement executed");
    Ok(StatementResult { affected_rows })
}

fn bind_params(types: &[Type], params: &[Value]) -> Vec<PgValue> {
    params
        .iter()
        .enumerate()
        .map(|(i, value)| PgValue::for_type(value, types.get(i).unwrap_or(&Type::TEXT)))
        .collect()
}

/// PostgreSQL transaction wrapper
///
/// Shares the connection's client; the caller owns the connection for the
/// lifetime of the transaction, so no other statement interleaves.
pub struct PostgresTransaction {
    client: Arc<Mutex<Client>>,
    finished: bool,
}

impl Drop for PostgresTransaction {
    fn drop(&mut self) {
        if !self.finished {
            tracing::warn!("PostgreSQL transaction dropped without commit or rollback");
        }
    }
}

#[async_trait]
impl Transaction for PostgresTransaction {
    async fn commit(mut self: Box<Self>) -> Result<()> {
        tracing::debug!("committing PostgreSQL transaction");
        let client = self.client.lock().await;
        client.batch_execute("COMMIT").await.map_err(|e| {
            GisError::Query(format!(
                "Failed to commit transaction: {}",
                format_postgres_error(&e)
            ))
        })?;
        drop(client);
        self.finished = true;
        Ok(())
    }

    async fn rollback(mut self: Box<Self>) -> Result<()> {
        tracing::debug!("rolling back PostgreSQL transaction");
        let client = self.client.lock().await;
        client.batch_execute("ROLLBACK").await.map_err(|e| {
            GisError::Query(format!(
                "Failed to rollback transaction: {}",
                format_postgres_error(&e)
            ))
        })?;
        drop(client);
        self.finished = true;
        Ok(())
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let client = self.client.lock().await;
        run_query(&client, sql, params).await
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        let client = self.client.lock().await;
        run_execute(&client, sql, params).await
    }
}

#[async_trait]
impl Connection for PostgresConnection {
    fn driver_name(&self) -> &str {
        "postgresql"
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        let client = self.client.lock().await;
        run_execute(&client, sql, params).await
    }

    #[tracing::instrument(skip(self, sql, params), fields(sql_preview = %sql.chars().take(100).collect::<String>()))]
    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        let client = self.client.lock().await;
        run_query(&client, sql, params).await
    }

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>> {
        tracing::debug!("beginning PostgreSQL transaction");
        let client = self.client.lock().await;
        client.batch_execute("BEGIN").await.map_err(|e| {
            GisError::Query(format!(
                "Failed to begin transaction: {}",
                format_postgres_error(&e)
            ))
        })?;
        drop(client);

        Ok(Box::new(PostgresTransaction {
            client: Arc::clone(&self.client),
            finished: false,
        }))
    }

    async fn close(&self) -> Result<()> {
        tracing::debug!("closing PostgreSQL connection");
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
            || self
                .client
                .try_lock()
                .map(|client| client.is_closed())
                .unwrap_or(false)
    }

    fn as_schema_introspection(&self) -> Option<&dyn SchemaIntrospection> {
        Some(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integers_follow_the_target_width() {
        assert!(matches!(PgValue::for_type(&Value::Int64(5), &Type::INT4), PgValue::Int32(5)));
        assert!(matches!(PgValue::for_type(&Value::Int32(5), &Type::INT8), PgValue::Int64(5)));
        assert!(matches!(
            PgValue::for_type(&Value::Int32(5), &Type::NUMERIC),
            PgValue::Numeric(ref s) if s == "5"
        ));
    }

    #[test]
    fn integers_outside_the_column_range_are_not_narrowed() {
        assert!(matches!(
            PgValue::for_type(&Value::Int32(32767), &Type::INT2),
            PgValue::Int16(32767)
        ));
        assert!(matches!(
            PgValue::for_type(&Value::Int32(-32768), &Type::INT2),
            PgValue::Int16(-32768)
        ));
        assert!(matches!(
            PgValue::for_type(&Value::Int32(70000), &Type::INT2),
            PgValue::OutOfRange(70000)
        ));
        assert!(matches!(
            PgValue::for_type(&Value::Int64(2_147_483_647), &Type::INT4),
            PgValue::Int32(2_147_483_647)
        ));
        assert!(matches!(
            PgValue::for_type(&Value::Int64(3_000_000_000), &Type::INT4),
            PgValue::OutOfRange(3_000_000_000)
        ));
        assert!(matches!(
            PgValue::for_type(&Value::String("70000".into()), &Type::INT2),
            PgValue::OutOfRange(70000)
        ));
    }

    #[test]
    fn out_of_range_integers_fail_to_bind() {
        let mut out = BytesMut::new();
        let err = PgValue::for_type(&Value::Int64(3_000_000_000), &Type::INT4)
            .to_sql(&Type::INT4, &mut out)
            .err()
            .expect("does not fit int4");
        assert_eq!(err.to_string(), "3000000000 is out of range for type int4");
        assert!(out.is_empty());
    }

    #[test]
    fn text_cells_are_coerced_when_they_parse() {
        assert!(matches!(
            PgValue::for_type(&Value::String(" 42 ".into()), &Type::INT4),
            PgValue::Int32(42)
        ));
        assert!(matches!(
            PgValue::for_type(&Value::String("yes".into()), &Type::BOOL),
            PgValue::Bool(true)
        ));
        assert!(matches!(
            PgValue::for_type(&Value::String("2024-03-01".into()), &Type::TIMESTAMP),
            PgValue::DateTime(_)
        ));
        assert!(matches!(
            PgValue::for_type(&Value::String("abc".into()), &Type::INT4),
            PgValue::Text(ref s) if s == "abc"
        ));
    }

    #[test]
    fn timestamps_accept_common_layouts() {
        assert!(parse_timestamp("2024-03-01 10:20:30").is_some());
        assert!(parse_timestamp("2024-03-01T10:20:30.5").is_some());
        assert!(parse_timestamp("2024-03-01").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }
}
