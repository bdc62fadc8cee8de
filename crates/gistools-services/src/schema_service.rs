//! Schema metadata and DDL orchestration
//!
//! Owns the schema tree for the current load cycle, applies the field
//! config overlay, and runs the schema-changing operations:
//!
//! - add a field to one table, or to every base table of a schema
//! - drop a field (after confirmation)
//! - reproject the spatial columns of a table to another SRID
//! - create a schema
//!
//! Each operation opens its own connection, runs under a timeout, and is
//! serialized by a busy flag. Failures are published to the status sink and
//! returned; nothing is retried and partial batches are not rolled back.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;

use gistools_core::{Connection, SchemaIntrospection};
use gistools_schema::{
    ColumnDisplay, FieldConfigIndex, MetadataLoader, SchemaTree, apply_to_table, apply_to_tree,
    project,
};
use gistools_settings::{ConfigStore, DEFAULT_OPERATION_TIMEOUT_SECS};

use crate::connection_service::ConnectionService;
use crate::ddl::{DdlBuilder, FieldSpec};
use crate::error::{ServiceError, ServiceResult};
use crate::status::{Confirm, StatusSink};

/// Where the in-flight operation is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OperationPhase {
    #[default]
    Idle,
    Validating,
    Executing,
    Reloading,
}

/// Current schema / table / column selection
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Selection {
    pub schema: Option<String>,
    pub table: Option<String>,
    pub column: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LoadSummary {
    pub schemas: usize,
    pub tables: usize,
    pub columns: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum BatchAddOutcome {
    /// The schema has no base tables
    NoTables,
    Completed { added: usize, skipped: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ConversionOutcome {
    /// The table has no geometry or geography columns
    NoSpatialColumns,
    /// `skipped` columns were already at the target SRID
    Completed { converted: usize, skipped: usize },
}

#[derive(Default)]
struct SchemaState {
    tree: SchemaTree,
    overlay: FieldConfigIndex,
    selection: Selection,
    phase: OperationPhase,
}

struct BusyGuard<'a>(&'a AtomicBool);

impl<'a> BusyGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

fn catalog(connection: &dyn Connection) -> ServiceResult<&dyn SchemaIntrospection> {
    connection.as_schema_introspection().ok_or_else(|| {
        ServiceError::MetadataUnavailable(format!(
            "driver '{}' does not support schema introspection",
            connection.driver_name()
        ))
    })
}

fn metadata_error(err: gistools_core::GisError) -> ServiceError {
    ServiceError::MetadataUnavailable(err.to_string())
}

pub struct SchemaService {
    connections: Arc<ConnectionService>,
    config_store: Arc<dyn ConfigStore>,
    status: Arc<dyn StatusSink>,
    confirm: Confirm,
    timeout: Duration,
    state: Mutex<SchemaState>,
    busy: AtomicBool,
}

impl SchemaService {
    pub fn new(
        connections: Arc<ConnectionService>,
        config_store: Arc<dyn ConfigStore>,
        status: Arc<dyn StatusSink>,
        confirm: Confirm,
    ) -> Self {
        Self {
            connections,
            config_store,
            status,
            confirm,
            timeout: Duration::from_secs(DEFAULT_OPERATION_TIMEOUT_SECS),
            state: Mutex::new(SchemaState::default()),
            busy: AtomicBool::new(false),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn tree(&self) -> SchemaTree {
        self.state.lock().tree.clone()
    }

    pub fn selection(&self) -> Selection {
        self.state.lock().selection.clone()
    }

    pub fn phase(&self) -> OperationPhase {
        self.state.lock().phase
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    fn set_phase(&self, phase: OperationPhase) {
        tracing::trace!(?phase, "phase");
        self.state.lock().phase = phase;
    }

    fn publish(&self, message: &str) {
        self.status.publish(message);
    }

    // Selection

    pub fn select_schema(&self, schema: Option<&str>) {
        let mut state = self.state.lock();
        state.selection = Selection {
            schema: schema.map(str::to_string),
            table: None,
            column: None,
        };
    }

    pub fn select_table(&self, schema: &str, table: &str) {
        let mut state = self.state.lock();
        state.selection = Selection {
            schema: Some(schema.to_string()),
            table: Some(table.to_string()),
            column: None,
        };
    }

    pub fn select_column(&self, column: Option<&str>) {
        self.state.lock().selection.column = column.map(str::to_string);
    }

    // Availability

    pub fn can_add_field(&self, name: &str) -> bool {
        !self.is_busy() && self.selection().table.is_some() && !name.trim().is_empty()
    }

    /// Batch add targets a whole schema, so no table may be selected
    pub fn can_batch_add_field(&self, name: &str) -> bool {
        let selection = self.selection();
        !self.is_busy()
            && selection.schema.is_some()
            && selection.table.is_none()
            && !name.trim().is_empty()
    }

    pub fn can_convert_coordinate_system(&self, srid: Option<i32>) -> bool {
        !self.is_busy() && self.selection().table.is_some() && srid.is_some_and(|s| s > 0)
    }

    pub fn can_delete_field(&self) -> bool {
        let selection = self.selection();
        !self.is_busy() && selection.table.is_some() && selection.column.is_some()
    }

    pub fn can_add_schema(&self, name: &str) -> bool {
        !self.is_busy() && !name.trim().is_empty()
    }

    /// Run one operation: busy gate, timeout, status on failure, back to idle
    async fn guarded<T>(
        &self,
        operation: &'static str,
        work: impl Future<Output = ServiceResult<T>>,
    ) -> ServiceResult<T> {
        let Some(_guard) = BusyGuard::acquire(&self.busy) else {
            let err = ServiceError::Busy;
            self.publish(&err.to_string());
            return Err(err);
        };

        let result = match tokio::time::timeout(self.timeout, work).await {
            Ok(result) => result,
            Err(_) => Err(ServiceError::Timeout(self.timeout)),
        };
        self.set_phase(OperationPhase::Idle);

        if let Err(e) = &result {
            tracing::warn!(operation, error = %e, "operation failed");
            self.publish(&e.to_string());
        }
        result
    }

    /// Re-read one table's columns and re-apply the overlay to it
    async fn reload_table(
        &self,
        connection: Arc<dyn Connection>,
        schema: &str,
        table: &str,
    ) -> ServiceResult<()> {
        self.set_phase(OperationPhase::Reloading);
        let columns = MetadataLoader::new(connection)
            .load_table_columns(schema, table)
            .await?;

        let mut state = self.state.lock();
        let SchemaState { tree, overlay, .. } = &mut *state;
        let node = tree.ensure_table(schema, table);
        node.replace_columns(columns);
        apply_to_table(overlay, node);
        Ok(())
    }

    /// Rebuild the whole tree; the selection is kept where it still exists
    async fn reload_all(&self, connection: Arc<dyn Connection>) -> ServiceResult<LoadSummary> {
        self.set_phase(OperationPhase::Reloading);
        let records = match self.config_store.load_field_configs() {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(error = ?e, "could not read field configs, loading without overlay");
                Vec::new()
            }
        };
        let mut tree = MetadataLoader::new(connection).load_all().await?;
        let overlay = FieldConfigIndex::build(records);
        apply_to_tree(&overlay, &mut tree);

        let summary = LoadSummary {
            schemas: tree.schemas.len(),
            tables: tree.table_count(),
            columns: tree.column_count(),
        };

        let mut state = self.state.lock();
        let selection = &mut state.selection;
        if let Some(schema) = selection.schema.clone() {
            if tree.schema(&schema).is_none() {
                *selection = Selection::default();
            } else if let Some(table) = selection.table.clone() {
                match tree.table(&schema, &table) {
                    None => {
                        selection.table = None;
                        selection.column = None;
                    }
                    Some(node) => {
                        if let Some(column) = &selection.column {
                            if node.column(column).is_none() {
                                selection.column = None;
                            }
                        }
                    }
                }
            }
        }
        state.tree = tree;
        state.overlay = overlay;
        Ok(summary)
    }

    /// Load the full metadata tree and apply the saved field configs
    #[tracing::instrument(skip(self))]
    pub async fn load_schema(&self) -> ServiceResult<LoadSummary> {
        self.guarded("load_schema", async {
            self.connections.require_target()?;
            let connection = self.connections.open().await?;
            let summary = self.reload_all(connection).await?;
            tracing::info!(
                schemas = summary.schemas,
                tables = summary.tables,
                columns = summary.columns,
                "schema loaded"
            );
            self.publish(&format!(
                "Loaded {} schemas, {} tables",
                summary.schemas, summary.tables
            ));
            Ok(summary)
        })
        .await
    }

    /// Persist the display attributes of every column; returns the record count
    #[tracing::instrument(skip(self))]
    pub async fn save_field_configs(&self) -> ServiceResult<usize> {
        self.guarded("save_field_configs", async {
            let records = project(&self.state.lock().tree);
            self.config_store
                .save_field_configs(&records)
                .map_err(|e| ServiceError::Config(format!("{:#}", e)))?;
            let count = records.len();
            self.state.lock().overlay = FieldConfigIndex::build(records);
            tracing::info!(records = count, "field configs saved");
            self.publish(&format!("Saved {} field configs", count));
            Ok(count)
        })
        .await
    }

    /// Replace the display attributes of one column in the tree
    pub fn update_column_display(
        &self,
        schema: &str,
        table: &str,
        column: &str,
        display: ColumnDisplay,
    ) -> ServiceResult<()> {
        let mut state = self.state.lock();
        let node = state
            .tree
            .column_mut(schema, table, column)
            .ok_or_else(|| {
                ServiceError::ValidationFailed(format!(
                    "Unknown column {}.{}.{}",
                    schema, table, column
                ))
            })?;
        node.display = display;
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    pub async fn add_schema(&self, name: &str) -> ServiceResult<()> {
        self.guarded("add_schema", async {
            self.connections.require_target()?;
            self.set_phase(OperationPhase::Validating);
            let name = name.trim();
            if name.is_empty() {
                return Err(ServiceError::ValidationFailed(
                    "Schema name is required".to_string(),
                ));
            }

            let connection = self.connections.open().await?;
            let exists = catalog(connection.as_ref())?
                .schema_exists(name)
                .await
                .map_err(metadata_error)?;
            if exists {
                return Err(ServiceError::Conflict(format!(
                    "Schema '{}' already exists",
                    name
                )));
            }

            self.set_phase(OperationPhase::Executing);
            let sql = DdlBuilder::create_schema(name);
            tracing::debug!(sql = %sql, "creating schema");
            connection.execute(&sql, &[]).await?;

            {
                let mut state = self.state.lock();
                if !state.tree.has_schema_ci(name) {
                    state.tree.ensure_schema(name);
                }
            }
            tracing::info!(schema = %name, "schema created");
            self.publish(&format!("Schema '{}' created", name));
            Ok(())
        })
        .await
    }

    /// Add one column to one table; returns the new column's name.
    ///
    /// The column must not exist in the loaded tree (ignoring case) nor in the
    /// live catalog. The table is reloaded and the new column selected.
    #[tracing::instrument(skip(self))]
    pub async fn add_field(
        &self,
        schema: &str,
        table: &str,
        name: &str,
        field_type: &str,
        length: Option<&str>,
    ) -> ServiceResult<String> {
        self.guarded("add_field", async {
            self.connections.require_target()?;
            self.set_phase(OperationPhase::Validating);
            let field = FieldSpec::parse(name, field_type, length)?;

            let known = self
                .state
                .lock()
                .tree
                .table(schema, table)
                .is_some_and(|t| t.has_column_ci(&field.name));
            if known {
                return Err(ServiceError::Conflict(format!(
                    "Field '{}' already exists",
                    field.name
                )));
            }

            let connection = self.connections.open().await?;
            let exists = catalog(connection.as_ref())?
                .column_exists(schema, table, &field.name)
                .await
                .map_err(metadata_error)?;
            if exists {
                return Err(ServiceError::Conflict(format!(
                    "Field '{}' already exists",
                    field.name
                )));
            }

            self.set_phase(OperationPhase::Executing);
            let sql = DdlBuilder::add_column(schema, table, &field);
            tracing::debug!(sql = %sql, "adding column");
            connection.execute(&sql, &[]).await?;

            self.reload_table(connection, schema, table).await?;
            let selected = {
                let mut state = self.state.lock();
                let column = state
                    .tree
                    .table(schema, table)
                    .and_then(|t| {
                        t.columns
                            .iter()
                            .find(|c| c.name.eq_ignore_ascii_case(&field.name))
                    })
                    .map(|c| c.name.clone());
                state.selection = Selection {
                    schema: Some(schema.to_string()),
                    table: Some(table.to_string()),
                    column: column.clone(),
                };
                column.unwrap_or_else(|| field.name.clone())
            };

            tracing::info!(schema, table, column = %selected, "field added");
            self.publish(&format!("Field '{}' added to {}.{}", selected, schema, table));
            Ok(selected)
        })
        .await
    }

    /// Add one column to every base table of `schema`.
    ///
    /// Tables that already have the column are skipped. The first failing
    /// ALTER stops the run; tables altered before it keep the column.
    #[tracing::instrument(skip(self))]
    pub async fn batch_add_field(
        &self,
        schema: &str,
        name: &str,
        field_type: &str,
        length: Option<&str>,
    ) -> ServiceResult<BatchAddOutcome> {
        self.guarded("batch_add_field", async {
            self.connections.require_target()?;
            self.set_phase(OperationPhase::Validating);
            let schema = schema.trim();
            if schema.is_empty() {
                return Err(ServiceError::ValidationFailed(
                    "No schema selected".to_string(),
                ));
            }
            let field = FieldSpec::parse(name, field_type, length)?;

            let connection = self.connections.open().await?;
            let tables = MetadataLoader::new(connection.clone())
                .load_base_tables(schema)
                .await?;
            if tables.is_empty() {
                self.publish(&format!("Schema '{}' has no tables", schema));
                return Ok(BatchAddOutcome::NoTables);
            }

            let existing: HashSet<String> = catalog(connection.as_ref())?
                .tables_with_column(schema, &field.name)
                .await
                .map_err(metadata_error)?
                .into_iter()
                .map(|t| t.to_lowercase())
                .collect();

            self.set_phase(OperationPhase::Executing);
            let (mut added, mut skipped) = (0, 0);
            for table in &tables {
                if existing.contains(&table.to_lowercase()) {
                    skipped += 1;
                    continue;
                }
                let sql = DdlBuilder::add_column(schema, table, &field);
                tracing::debug!(sql = %sql, "adding column");
                if let Err(e) = connection.execute(&sql, &[]).await {
                    return Err(ServiceError::BatchAborted {
                        completed: added,
                        skipped,
                        target: format!("{}.{}", schema, table),
                        message: e.to_string(),
                    });
                }
                added += 1;
            }

            self.reload_all(connection).await?;
            tracing::info!(schema, column = %field.name, added, skipped, "batch field add completed");
            self.publish(&format!(
                "Field '{}' added to {} tables, {} skipped",
                field.name, added, skipped
            ));
            Ok(BatchAddOutcome::Completed { added, skipped })
        })
        .await
    }

    /// Drop a column after the confirmation callback agrees.
    ///
    /// Returns `false` when the user declined; no SQL is sent in that case.
    #[tracing::instrument(skip(self))]
    pub async fn delete_field(&self, schema: &str, table: &str, column: &str) -> ServiceResult<bool> {
        self.guarded("delete_field", async {
            self.connections.require_target()?;
            self.set_phase(OperationPhase::Validating);
            if column.trim().is_empty() {
                return Err(ServiceError::ValidationFailed(
                    "No field selected".to_string(),
                ));
            }

            let prompt = format!(
                "Delete field '{}' from {}.{}? This cannot be undone.",
                column, schema, table
            );
            if !(self.confirm)(&prompt) {
                tracing::debug!(column, "delete cancelled");
                self.publish("Delete cancelled");
                return Ok(false);
            }

            let connection = self.connections.open().await?;
            self.set_phase(OperationPhase::Executing);
            let sql = DdlBuilder::drop_column(schema, table, column);
            tracing::debug!(sql = %sql, "dropping column");
            connection.execute(&sql, &[]).await?;

            self.reload_table(connection, schema, table).await?;
            self.state.lock().selection.column = None;
            tracing::info!(schema, table, column, "field deleted");
            self.publish(&format!("Field '{}' deleted", column));
            Ok(true)
        })
        .await
    }

    /// Reproject every geometry/geography column of a table to `srid`.
    ///
    /// Columns already at `srid` are skipped without SQL, so
    /// `converted + skipped` equals the number of spatial columns.
    #[tracing::instrument(skip(self))]
    pub async fn convert_coordinate_system(
        &self,
        schema: &str,
        table: &str,
        srid: i32,
    ) -> ServiceResult<ConversionOutcome> {
        self.guarded("convert_coordinate_system", async {
            self.connections.require_target()?;
            self.set_phase(OperationPhase::Validating);
            if srid <= 0 {
                return Err(ServiceError::ValidationFailed(format!(
                    "Invalid target SRID {}",
                    srid
                )));
            }

            let connection = self.connections.open().await?;
            let spatial = MetadataLoader::new(connection.clone())
                .load_spatial_columns(schema, table)
                .await?;
            if spatial.is_empty() {
                self.publish(&format!("{}.{} has no spatial columns", schema, table));
                return Ok(ConversionOutcome::NoSpatialColumns);
            }

            self.set_phase(OperationPhase::Executing);
            let (mut converted, mut skipped) = (0, 0);
            for column in &spatial {
                if column.srid == srid {
                    skipped += 1;
                    continue;
                }
                let sql = DdlBuilder::alter_spatial_column(
                    schema,
                    table,
                    &column.column,
                    &column.geometry_type,
                    column.kind,
                    srid,
                );
                tracing::debug!(sql = %sql, from = column.srid, to = srid, "converting column");
                if let Err(e) = connection.execute(&sql, &[]).await {
                    return Err(ServiceError::BatchAborted {
                        completed: converted,
                        skipped,
                        target: format!("{}.{}.{}", schema, table, column.column),
                        message: e.to_string(),
                    });
                }
                converted += 1;
            }

            self.reload_table(connection, schema, table).await?;
            tracing::info!(schema, table, srid, converted, skipped, "coordinate system converted");
            self.publish(&format!(
                "Converted {} columns to SRID {}, {} skipped",
                converted, srid, skipped
            ));
            Ok(ConversionOutcome::Completed { converted, skipped })
        })
        .await
    }
}
