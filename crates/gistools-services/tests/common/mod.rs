//! Common test utilities and mocks
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use gistools_core::{
    ColumnInfo, ColumnMeta, Connection, ConnectionConfig, DatabaseDriver, GisError, QueryResult,
    Result, Row, SchemaInfo, SchemaIntrospection, SpatialColumnInfo, SpatialKind,
    StatementResult, TableInfo, TableType, Transaction, Value,
};
use gistools_services::{ConnectionService, SchemaService, StatusLog, always_confirm};
use gistools_settings::{ConfigStore, JsonConfigStore};

/// Catalog contents the mock answers introspection calls from.
/// Executed DDL is applied to it so reloads see the change.
#[derive(Default)]
pub struct Catalog {
    pub schemas: Vec<String>,
    pub tables: Vec<TableInfo>,
    pub columns: Vec<ColumnInfo>,
    pub primary_keys: HashMap<(String, String), Vec<String>>,
    pub spatial: Vec<SpatialColumnInfo>,
}

impl Catalog {
    fn add_schema(&mut self, schema: &str) {
        if !self.schemas.iter().any(|s| s == schema) {
            self.schemas.push(schema.to_string());
        }
    }

    fn add_column(&mut self, schema: &str, table: &str, name: &str, udt: &str) {
        let ordinal = self
            .columns
            .iter()
            .filter(|c| c.schema == schema && c.table == table)
            .count() as i32
            + 1;
        let data_type = match udt {
            "geometry" | "geography" => "USER-DEFINED".to_string(),
            "int4" => "integer".to_string(),
            "varchar" => "character varying".to_string(),
            other => other.to_string(),
        };
        self.columns.push(ColumnInfo {
            schema: schema.into(),
            table: table.into(),
            name: name.into(),
            ordinal,
            data_type,
            udt_name: udt.into(),
            nullable: true,
            default_value: None,
            max_length: None,
        });
    }
}

/// Mock connection for testing service-layer logic without a real database.
///
/// Clones share the catalog and every log, so a `MockDriver` can hand out
/// "fresh" connections that all record into the same place.
#[derive(Clone)]
pub struct MockConnection {
    pub catalog: Arc<Mutex<Catalog>>,
    /// SQL-pattern-based responses: if a query contains the pattern string,
    /// the corresponding result is returned instead of an empty one.
    pub query_responses: Vec<(String, QueryResult)>,
    /// Executes whose SQL contains any of these patterns fail
    pub execute_failures: Vec<String>,
    pub affected_rows: u64,
    pub execute_delay: Option<Duration>,
    pub introspection_fails: bool,
    /// Log of all statements passed to `execute`
    pub execute_log: Arc<Mutex<Vec<String>>>,
    /// Log of all SQL passed to `query`
    pub query_log: Arc<Mutex<Vec<String>>>,
    /// BEGIN / statements / COMMIT / ROLLBACK as seen by transactions
    pub transaction_log: Arc<Mutex<Vec<(String, Vec<Value>)>>>,
}

impl MockConnection {
    pub fn new() -> Self {
        Self {
            catalog: Arc::new(Mutex::new(Catalog::default())),
            query_responses: vec![],
            execute_failures: vec![],
            affected_rows: 1,
            execute_delay: None,
            introspection_fails: false,
            execute_log: Arc::new(Mutex::new(Vec::new())),
            query_log: Arc::new(Mutex::new(Vec::new())),
            transaction_log: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_schema(self, schema: &str) -> Self {
        self.catalog.lock().add_schema(schema);
        self
    }

    pub fn with_table(self, schema: &str, table: &str) -> Self {
        {
            let mut catalog = self.catalog.lock();
            catalog.add_schema(schema);
            catalog.tables.push(TableInfo {
                schema: schema.into(),
                name: table.into(),
                table_type: TableType::Table,
            });
        }
        self
    }

    pub fn with_view(self, schema: &str, view: &str) -> Self {
        {
            let mut catalog = self.catalog.lock();
            catalog.add_schema(schema);
            catalog.tables.push(TableInfo {
                schema: schema.into(),
                name: view.into(),
                table_type: TableType::View,
            });
        }
        self
    }

    /// Add a column; `udt` is the underlying type name (`int4`, `text`, `geometry`, ...)
    pub fn with_column(self, schema: &str, table: &str, name: &str, udt: &str) -> Self {
        self.catalog.lock().add_column(schema, table, name, udt);
        self
    }

    pub fn with_primary_key(self, schema: &str, table: &str, columns: &[&str]) -> Self {
        self.catalog.lock().primary_keys.insert(
            (schema.to_string(), table.to_string()),
            columns.iter().map(|c| c.to_string()).collect(),
        );
        self
    }

    /// Register a spatial column (also added as a table column)
    pub fn with_spatial(
        self,
        schema: &str,
        table: &str,
        column: &str,
        geometry_type: &str,
        srid: i32,
        kind: SpatialKind,
    ) -> Self {
        {
            let mut catalog = self.catalog.lock();
            catalog.add_column(schema, table, column, kind.type_name());
            catalog.spatial.push(SpatialColumnInfo {
                schema: schema.into(),
                table: table.into(),
                column: column.into(),
                geometry_type: geometry_type.into(),
                srid,
                kind,
            });
        }
        self
    }

    /// Register a response for queries containing the given SQL pattern.
    pub fn with_query_response(
        mut self,
        sql_contains: impl Into<String>,
        result: QueryResult,
    ) -> Self {
        self.query_responses.push((sql_contains.into(), result));
        self
    }

    pub fn with_execute_failure(mut self, sql_contains: impl Into<String>) -> Self {
        self.execute_failures.push(sql_contains.into());
        self
    }

    pub fn with_affected_rows(mut self, rows: u64) -> Self {
        self.affected_rows = rows;
        self
    }

    pub fn with_execute_delay(mut self, delay: Duration) -> Self {
        self.execute_delay = Some(delay);
        self
    }

    pub fn with_introspection_failure(mut self) -> Self {
        self.introspection_fails = true;
        self
    }

    pub fn execute_log(&self) -> Vec<String> {
        self.execute_log.lock().clone()
    }

    pub fn query_log(&self) -> Vec<String> {
        self.query_log.lock().clone()
    }

    pub fn transaction_log(&self) -> Vec<(String, Vec<Value>)> {
        self.transaction_log.lock().clone()
    }

    /// Executed statements starting with `ALTER TABLE`
    pub fn alter_statements(&self) -> Vec<String> {
        self.execute_log()
            .into_iter()
            .filter(|sql| sql.starts_with("ALTER TABLE"))
            .collect()
    }

    pub fn spatial_srid(&self, schema: &str, table: &str, column: &str) -> Option<i32> {
        self.catalog
            .lock()
            .spatial
            .iter()
            .find(|s| s.schema == schema && s.table == table && s.column == column)
            .map(|s| s.srid)
    }

    fn check_introspection(&self) -> Result<()> {
        if self.introspection_fails {
            Err(GisError::Query("catalog unavailable".into()))
        } else {
            Ok(())
        }
    }

    fn check_execute(&self, sql: &str) -> Result<()> {
        if self
            .execute_failures
            .iter()
            .any(|pattern| sql.contains(pattern.as_str()))
        {
            return Err(GisError::Query(format!("ERROR: statement failed: {}", sql)));
        }
        Ok(())
    }

    /// Mirror the DDL the services issue into the catalog
    fn apply_ddl(&self, sql: &str) {
        let idents = quoted_identifiers(sql);
        let mut catalog = self.catalog.lock();
        if sql.starts_with("CREATE SCHEMA") {
            if let Some(schema) = idents.first() {
                catalog.add_schema(schema);
            }
        } else if sql.contains(" ADD COLUMN ") && idents.len() >= 3 {
            let type_name = sql.rsplit('"').next().unwrap_or("").trim().to_string();
            catalog.add_column(&idents[0], &idents[1], &idents[2], &type_name);
        } else if sql.contains(" DROP COLUMN ") && idents.len() >= 3 {
            catalog.columns.retain(|c| {
                !(c.schema == idents[0] && c.table == idents[1] && c.name == idents[2])
            });
        } else if sql.contains(" ALTER COLUMN ") && idents.len() >= 3 {
            let srid = sql
                .split(" TYPE ")
                .nth(1)
                .and_then(|rest| rest.split(')').next())
                .and_then(|inner| inner.rsplit(',').next())
                .and_then(|srid| srid.trim().parse::<i32>().ok());
            if let Some(srid) = srid {
                for column in catalog.spatial.iter_mut().filter(|s| {
                    s.schema == idents[0] && s.table == idents[1] && s.column == idents[2]
                }) {
                    column.srid = srid;
                }
            }
        }
    }
}

/// `"a"."b""c"` → `["a", "b\"c"]`
pub fn quoted_identifiers(sql: &str) -> Vec<String> {
    let mut idents = Vec::new();
    let mut chars = sql.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '"' {
            continue;
        }
        let mut ident = String::new();
        while let Some(c) = chars.next() {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    ident.push('"');
                } else {
                    break;
                }
            } else {
                ident.push(c);
            }
        }
        idents.push(ident);
    }
    idents
}

/// Build a query result from column names and rows
pub fn result_set(columns: &[&str], rows: Vec<Vec<Value>>) -> QueryResult {
    let names: Vec<String> = columns.iter().map(|c| c.to_string()).collect();
    let mut result = QueryResult::empty();
    result.columns = names
        .iter()
        .enumerate()
        .map(|(ordinal, name)| ColumnMeta {
            name: name.clone(),
            data_type: String::new(),
            ordinal,
        })
        .collect();
    result.rows = rows
        .into_iter()
        .map(|values| Row::new(names.clone(), values))
        .collect();
    result
}

#[async_trait]
impl Connection for MockConnection {
    fn driver_name(&self) -> &str {
        "mock"
    }

    async fn execute(&self, sql: &str, _params: &[Value]) -> Result<StatementResult> {
        self.execute_log.lock().push(sql.to_string());
        if let Some(delay) = self.execute_delay {
            tokio::time::sleep(delay).await;
        }
        self.check_execute(sql)?;
        self.apply_ddl(sql);
        Ok(StatementResult {
            affected_rows: self.affected_rows,
        })
    }

    async fn query(&self, sql: &str, _params: &[Value]) -> Result<QueryResult> {
        self.query_log.lock().push(sql.to_string());
        for (pattern, result) in &self.query_responses {
            if sql.contains(pattern.as_str()) {
                return Ok(result.clone());
            }
        }
        Ok(QueryResult::empty())
    }

    async fn begin_transaction(&self) -> Result<Box<dyn Transaction>> {
        self.transaction_log.lock().push(("BEGIN".into(), vec![]));
        Ok(Box::new(MockTransaction {
            connection: self.clone(),
        }))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    fn is_closed(&self) -> bool {
        false
    }

    fn as_schema_introspection(&self) -> Option<&dyn SchemaIntrospection> {
        Some(self)
    }
}

pub struct MockTransaction {
    connection: MockConnection,
}

#[async_trait]
impl Transaction for MockTransaction {
    async fn commit(self: Box<Self>) -> Result<()> {
        self.connection
            .transaction_log
            .lock()
            .push(("COMMIT".into(), vec![]));
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<()> {
        self.connection
            .transaction_log
            .lock()
            .push(("ROLLBACK".into(), vec![]));
        Ok(())
    }

    async fn query(&self, sql: &str, params: &[Value]) -> Result<QueryResult> {
        self.connection
            .transaction_log
            .lock()
            .push((sql.to_string(), params.to_vec()));
        if let Some(delay) = self.connection.execute_delay {
            tokio::time::sleep(delay).await;
        }
        self.connection.check_execute(sql)?;
        for (pattern, result) in &self.connection.query_responses {
            if sql.contains(pattern.as_str()) {
                return Ok(result.clone());
            }
        }
        Ok(QueryResult::empty())
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> Result<StatementResult> {
        self.connection
            .transaction_log
            .lock()
            .push((sql.to_string(), params.to_vec()));
        if let Some(delay) = self.connection.execute_delay {
            tokio::time::sleep(delay).await;
        }
        self.connection.check_execute(sql)?;
        Ok(StatementResult {
            affected_rows: self.connection.affected_rows,
        })
    }
}

#[async_trait]
impl SchemaIntrospection for MockConnection {
    async fn list_schemas(&self) -> Result<Vec<SchemaInfo>> {
        self.check_introspection()?;
        Ok(self
            .catalog
            .lock()
            .schemas
            .iter()
            .map(|name| SchemaInfo { name: name.clone() })
            .collect())
    }

    async fn schema_exists(&self, schema: &str) -> Result<bool> {
        self.check_introspection()?;
        Ok(self.catalog.lock().schemas.iter().any(|s| s == schema))
    }

    async fn list_tables(&self, schema: &str) -> Result<Vec<TableInfo>> {
        self.check_introspection()?;
        let mut tables: Vec<TableInfo> = self
            .catalog
            .lock()
            .tables
            .iter()
            .filter(|t| t.schema == schema)
            .cloned()
            .collect();
        tables.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(tables)
    }

    async fn list_all_columns(&self) -> Result<Vec<ColumnInfo>> {
        self.check_introspection()?;
        Ok(self.catalog.lock().columns.clone())
    }

    async fn get_columns(&self, schema: &str, table: &str) -> Result<Vec<ColumnInfo>> {
        self.check_introspection()?;
        Ok(self
            .catalog
            .lock()
            .columns
            .iter()
            .filter(|c| c.schema == schema && c.table == table)
            .cloned()
            .collect())
    }

    async fn column_exists(&self, schema: &str, table: &str, column: &str) -> Result<bool> {
        self.check_introspection()?;
        Ok(self
            .catalog
            .lock()
            .columns
            .iter()
            .any(|c| c.schema == schema && c.table == table && c.name.eq_ignore_ascii_case(column)))
    }

    async fn tables_with_column(&self, schema: &str, column: &str) -> Result<Vec<String>> {
        self.check_introspection()?;
        Ok(self
            .catalog
            .lock()
            .columns
            .iter()
            .filter(|c| c.schema == schema && c.name.eq_ignore_ascii_case(column))
            .map(|c| c.table.clone())
            .collect())
    }

    async fn get_primary_key(&self, schema: &str, table: &str) -> Result<Vec<String>> {
        self.check_introspection()?;
        Ok(self
            .catalog
            .lock()
            .primary_keys
            .get(&(schema.to_string(), table.to_string()))
            .cloned()
            .unwrap_or_default())
    }

    async fn list_spatial_columns(
        &self,
        schema: Option<&str>,
        table: Option<&str>,
    ) -> Result<Vec<SpatialColumnInfo>> {
        self.check_introspection()?;
        Ok(self
            .catalog
            .lock()
            .spatial
            .iter()
            .filter(|s| schema.is_none_or(|schema| s.schema == schema))
            .filter(|s| table.is_none_or(|table| s.table == table))
            .cloned()
            .collect())
    }
}

/// Driver handing out clones of one mock connection
pub struct MockDriver {
    pub connection: MockConnection,
    pub connects: AtomicUsize,
    pub test_fails: bool,
}

impl MockDriver {
    pub fn new(connection: MockConnection) -> Self {
        Self {
            connection,
            connects: AtomicUsize::new(0),
            test_fails: false,
        }
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DatabaseDriver for MockDriver {
    fn name(&self) -> &'static str {
        "mock"
    }

    async fn connect(&self, _connection_string: &str) -> Result<Arc<dyn Connection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(self.connection.clone()))
    }

    async fn test_connection(&self, _connection_string: &str) -> Result<()> {
        if self.test_fails {
            Err(GisError::Connection("connection refused".into()))
        } else {
            Ok(())
        }
    }

    fn build_connection_string(&self, config: &ConnectionConfig) -> String {
        format!(
            "host={} port={} dbname={} user={}",
            config.host, config.port, config.database, config.username
        )
    }
}

/// Connection service pointed at `connection`
pub fn connected(connection: &MockConnection) -> Arc<ConnectionService> {
    let service = ConnectionService::new(Arc::new(MockDriver::new(connection.clone())));
    service.set_connection_string(Some("host=mock dbname=gis".to_string()));
    Arc::new(service)
}

/// Everything a schema service test needs, with the config file in a temp dir
pub struct Harness {
    pub connection: MockConnection,
    pub service: SchemaService,
    pub status: Arc<StatusLog>,
    pub store: Arc<JsonConfigStore>,
    pub confirmations: Arc<Mutex<Vec<String>>>,
    _dir: tempfile::TempDir,
}

impl Harness {
    pub fn new(connection: MockConnection) -> Self {
        Self::with_confirm(connection, true)
    }

    /// `answer` is returned by the delete confirmation callback
    pub fn with_confirm(connection: MockConnection, answer: bool) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let store = Arc::new(JsonConfigStore::new(dir.path().join("config.json")));
        let status = Arc::new(StatusLog::new());
        let confirmations = Arc::new(Mutex::new(Vec::new()));
        let asked = confirmations.clone();
        let confirm: gistools_services::Confirm = if answer {
            let always = always_confirm();
            Arc::new(move |prompt: &str| {
                asked.lock().push(prompt.to_string());
                always(prompt)
            })
        } else {
            Arc::new(move |prompt: &str| {
                asked.lock().push(prompt.to_string());
                false
            })
        };
        let service = SchemaService::new(
            connected(&connection),
            store.clone() as Arc<dyn ConfigStore>,
            status.clone(),
            confirm,
        );
        Self {
            connection,
            service,
            status,
            store,
            confirmations,
            _dir: dir,
        }
    }

    pub fn latest_status(&self) -> String {
        self.status.latest().unwrap_or_default()
    }
}

/// `geo.parcels(id int4 PK, owner varchar, geom geometry MULTIPOLYGON 4326)`
/// plus `geo.roads(id int4, name text)` and a view `geo.parcel_summary`
pub fn parcels_fixture() -> MockConnection {
    MockConnection::new()
        .with_schema("public")
        .with_table("geo", "parcels")
        .with_column("geo", "parcels", "id", "int4")
        .with_column("geo", "parcels", "owner", "varchar")
        .with_spatial("geo", "parcels", "geom", "MULTIPOLYGON", 4326, SpatialKind::Geometry)
        .with_primary_key("geo", "parcels", &["id"])
        .with_table("geo", "roads")
        .with_column("geo", "roads", "id", "int4")
        .with_column("geo", "roads", "name", "text")
        .with_view("geo", "parcel_summary")
}
