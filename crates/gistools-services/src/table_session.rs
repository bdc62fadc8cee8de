//! Editable snapshot of one table's rows
//!
//! A session loads at most `row_limit` rows of the selectable (non-spatial)
//! columns and tracks inserts, cell edits and deletes until `commit`.
//! Edits are only accepted when every primary key column was loaded;
//! otherwise the session is read-only.

use std::sync::Arc;
use std::time::Duration;

use gistools_core::{ColumnInfo, Transaction, Value};
use serde::Serialize;
use gistools_schema::MetadataLoader;
use gistools_settings::{DEFAULT_OPERATION_TIMEOUT_SECS, DEFAULT_ROW_LIMIT, ExplorerSettings};

use crate::connection_service::ConnectionService;
use crate::ddl::DdlBuilder;
use crate::error::{ServiceError, ServiceResult};
use crate::values::parse_cell;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    pub row_limit: usize,
    pub timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            row_limit: DEFAULT_ROW_LIMIT,
            timeout: Duration::from_secs(DEFAULT_OPERATION_TIMEOUT_SECS),
        }
    }
}

impl From<&ExplorerSettings> for SessionOptions {
    fn from(settings: &ExplorerSettings) -> Self {
        Self {
            row_limit: settings.row_limit,
            timeout: Duration::from_secs(settings.operation_timeout_secs),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowState {
    Unchanged,
    Inserted,
    Modified,
    Deleted,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EditableRow {
    pub values: Vec<Value>,
    /// Values as loaded; `None` for rows added in this session
    original: Option<Vec<Value>>,
    state: RowState,
}

impl EditableRow {
    fn loaded(values: Vec<Value>) -> Self {
        Self {
            original: Some(values.clone()),
            values,
            state: RowState::Unchanged,
        }
    }

    pub fn state(&self) -> RowState {
        self.state
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Insert,
    Update,
    Delete,
}

/// A parameterized statement derived from the pending edits
#[derive(Debug, Clone, PartialEq)]
pub struct PendingStatement {
    pub kind: StatementKind,
    /// Index of the session row the statement writes
    pub row: usize,
    pub sql: String,
    pub params: Vec<Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CommitSummary {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
}

impl CommitSummary {
    pub fn total(&self) -> usize {
        self.inserted + self.updated + self.deleted
    }
}

struct Snapshot {
    columns: Vec<ColumnInfo>,
    primary_key: Vec<String>,
    rows: Vec<Vec<Value>>,
    notice: Option<String>,
}

pub struct TableEditSession {
    connections: Arc<ConnectionService>,
    schema: String,
    table: String,
    columns: Vec<ColumnInfo>,
    primary_key: Vec<String>,
    rows: Vec<EditableRow>,
    options: SessionOptions,
    notice: Option<String>,
}

impl TableEditSession {
    /// Load a bounded row snapshot on a worker task
    #[tracing::instrument(skip(connections, options), fields(row_limit = options.row_limit))]
    pub async fn load(
        connections: Arc<ConnectionService>,
        schema: &str,
        table: &str,
        options: SessionOptions,
    ) -> ServiceResult<Self> {
        connections.require_target()?;

        let mut task = tokio::spawn(load_snapshot(
            connections.clone(),
            schema.to_string(),
            table.to_string(),
            options.row_limit,
        ));
        let snapshot = match tokio::time::timeout(options.timeout, &mut task).await {
            Ok(Ok(result)) => result?,
            Ok(Err(join_error)) => {
                return Err(ServiceError::ServerError(format!(
                    "row loading task failed: {}",
                    join_error
                )));
            }
            Err(_) => {
                task.abort();
                return Err(ServiceError::Timeout(options.timeout));
            }
        };

        tracing::info!(
            rows = snapshot.rows.len(),
            columns = snapshot.columns.len(),
            primary_key = ?snapshot.primary_key,
            "table data loaded"
        );

        Ok(Self {
            connections,
            schema: schema.to_string(),
            table: table.to_string(),
            columns: snapshot.columns,
            primary_key: snapshot.primary_key,
            rows: snapshot.rows.into_iter().map(EditableRow::loaded).collect(),
            options,
            notice: snapshot.notice,
        })
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn primary_key(&self) -> &[String] {
        &self.primary_key
    }

    pub fn has_primary_key(&self) -> bool {
        !self.primary_key.is_empty()
    }

    pub fn rows(&self) -> &[EditableRow] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    /// Why the session is empty or read-only, if it is
    pub fn notice(&self) -> Option<&str> {
        self.notice.as_deref()
    }

    pub fn has_pending_changes(&self) -> bool {
        self.rows.iter().any(|r| r.state != RowState::Unchanged)
    }

    fn ensure_editable(&self) -> ServiceResult<()> {
        if self.columns.is_empty() {
            return Err(ServiceError::ReadOnly(format!(
                "{}.{} has no selectable columns",
                self.schema, self.table
            )));
        }
        if !self.has_primary_key() {
            return Err(ServiceError::ReadOnly(format!(
                "{}.{} has no primary key; edits are disabled",
                self.schema, self.table
            )));
        }
        Ok(())
    }

    fn column_index(&self, column: &str) -> ServiceResult<usize> {
        self.columns
            .iter()
            .position(|c| c.name == column)
            .ok_or_else(|| ServiceError::ValidationFailed(format!("Unknown column '{}'", column)))
    }

    fn row_mut(&mut self, index: usize) -> ServiceResult<&mut EditableRow> {
        let count = self.rows.len();
        self.rows.get_mut(index).ok_or_else(|| {
            ServiceError::ValidationFailed(format!("Row {} out of range ({} rows)", index, count))
        })
    }

    /// Append an all-NULL row; returns its index
    pub fn add_row(&mut self) -> ServiceResult<usize> {
        self.ensure_editable()?;
        self.rows.push(EditableRow {
            values: vec![Value::Null; self.columns.len()],
            original: None,
            state: RowState::Inserted,
        });
        Ok(self.rows.len() - 1)
    }

    /// Mark a row for deletion; it stays visible until commit
    pub fn delete_row(&mut self, index: usize) -> ServiceResult<()> {
        self.ensure_editable()?;
        let row = self.row_mut(index)?;
        row.state = RowState::Deleted;
        Ok(())
    }

    pub fn update_cell(&mut self, index: usize, column: &str, value: Value) -> ServiceResult<()> {
        self.ensure_editable()?;
        let column_index = self.column_index(column)?;
        let row = self.row_mut(index)?;
        if row.state == RowState::Deleted {
            return Err(ServiceError::ValidationFailed(format!(
                "Row {} is marked for deletion",
                index
            )));
        }
        row.values[column_index] = value;
        if row.state == RowState::Unchanged && row.original.as_ref() != Some(&row.values) {
            row.state = RowState::Modified;
        }
        Ok(())
    }

    /// Update a cell from grid text, parsed by the column's type
    pub fn update_cell_text(&mut self, index: usize, column: &str, text: &str) -> ServiceResult<()> {
        let column_index = self.column_index(column)?;
        let value = parse_cell(text, &self.columns[column_index].udt_name);
        self.update_cell(index, column, value)
    }

    fn key_clause(&self, original: &[Value], params: &mut Vec<Value>) -> ServiceResult<String> {
        let mut conditions = Vec::with_capacity(self.primary_key.len());
        for key in &self.primary_key {
            let index = self.column_index(key)?;
            params.push(original[index].clone());
            conditions.push(format!("{} = ${}", DdlBuilder::quote_ident(key), params.len()));
        }
        Ok(conditions.join(" AND "))
    }

    /// INSERT / UPDATE / DELETE statements for the pending edits, in row order
    pub fn pending_statements(&self) -> ServiceResult<Vec<PendingStatement>> {
        self.ensure_editable()?;
        let target = DdlBuilder::qualified_table(&self.schema, &self.table);
        let mut statements = Vec::new();

        for (row_index, row) in self.rows.iter().enumerate() {
            match (row.state, &row.original) {
                (RowState::Unchanged, _) => {}
                // Added and deleted before commit: nothing to send
                (RowState::Deleted, None) => {}
                (RowState::Inserted, _) | (RowState::Modified, None) => {
                    let mut names = Vec::new();
                    let mut params = Vec::new();
                    for (column, value) in self.columns.iter().zip(&row.values) {
                        if !value.is_null() {
                            names.push(DdlBuilder::quote_ident(&column.name));
                            params.push(value.clone());
                        }
                    }
                    // Stored values, server defaults included, become the new baseline
                    let returning: Vec<String> = self
                        .columns
                        .iter()
                        .map(|c| DdlBuilder::quote_ident(&c.name))
                        .collect();
                    let sql = if names.is_empty() {
                        format!(
                            "INSERT INTO {} DEFAULT VALUES RETURNING {}",
                            target,
                            returning.join(", ")
                        )
                    } else {
                        let placeholders: Vec<String> =
                            (1..=params.len()).map(|i| format!("${}", i)).collect();
                        format!(
                            "INSERT INTO {} ({}) VALUES ({}) RETURNING {}",
                            target,
                            names.join(", "),
                            placeholders.join(", "),
                            returning.join(", ")
                        )
                    };
                    statements.push(PendingStatement {
                        kind: StatementKind::Insert,
                        row: row_index,
                        sql,
                        params,
                    });
                }
                (RowState::Modified, Some(original)) => {
                    let mut assignments = Vec::new();
                    let mut params = Vec::new();
                    for (index, column) in self.columns.iter().enumerate() {
                        if row.values[index] != original[index] {
                            params.push(row.values[index].clone());
                            assignments.push(format!(
                                "{} = ${}",
                                DdlBuilder::quote_ident(&column.name),
                                params.len()
                            ));
                        }
                    }
                    if assignments.is_empty() {
                        continue;
                    }
                    let key = self.key_clause(original, &mut params)?;
                    statements.push(PendingStatement {
                        kind: StatementKind::Update,
                        row: row_index,
                        sql: format!(
                            "UPDATE {} SET {} WHERE {}",
                            target,
                            assignments.join(", "),
                            key
                        ),
                        params,
                    });
                }
                (RowState::Deleted, Some(original)) => {
                    let mut params = Vec::new();
                    let key = self.key_clause(original, &mut params)?;
                    statements.push(PendingStatement {
                        kind: StatementKind::Delete,
                        row: row_index,
                        sql: format!("DELETE FROM {} WHERE {}", target, key),
                        params,
                    });
                }
            }
        }
        Ok(statements)
    }

    /// Write all pending edits in one transaction.
    ///
    /// On failure the transaction is rolled back and the markers are kept;
    /// callers should reload before editing further.
    #[tracing::instrument(skip(self), fields(schema = %self.schema, table = %self.table))]
    pub async fn commit(&mut self) -> ServiceResult<CommitSummary> {
        let statements = self.pending_statements()?;
        if statements.is_empty() {
            return Ok(CommitSummary::default());
        }

        let timeout = self.options.timeout;
        let (summary, inserted) =
            match tokio::time::timeout(timeout, self.run_commit(&statements)).await {
                Ok(result) => result?,
                Err(_) => return Err(ServiceError::Timeout(timeout)),
            };

        for (index, values) in inserted {
            if let Some(row) = self.rows.get_mut(index) {
                row.values = values;
            }
        }
        self.rows.retain(|row| row.state != RowState::Deleted);
        for row in &mut self.rows {
            row.original = Some(row.values.clone());
            row.state = RowState::Unchanged;
        }
        tracing::info!(
            inserted = summary.inserted,
            updated = summary.updated,
            deleted = summary.deleted,
            "changes committed"
        );
        Ok(summary)
    }

    async fn run_commit(&self, statements: &[PendingStatement]) -> ServiceResult<CommitOutcome> {
        let connection = self.connections.open().await?;
        let transaction = connection.begin_transaction().await?;
        let outcome = execute_batch(transaction.as_ref(), statements, self.columns.len()).await;
        match outcome {
            Ok(outcome) => {
                transaction.commit().await?;
                Ok(outcome)
            }
            Err(e) => {
                if let Err(rollback_error) = transaction.rollback().await {
                    tracing::warn!(error = %rollback_error, "rollback failed");
                }
                Err(e)
            }
        }
    }
}

/// Counts plus the stored values of each inserted row, by row index
type CommitOutcome = (CommitSummary, Vec<(usize, Vec<Value>)>);

async fn execute_batch(
    transaction: &dyn Transaction,
    statements: &[PendingStatement],
    width: usize,
) -> ServiceResult<CommitOutcome> {
    let mut summary = CommitSummary::default();
    let mut inserted = Vec::new();
    for statement in statements {
        tracing::debug!(sql = %statement.sql, "executing");
        if statement.kind == StatementKind::Insert {
            let result = transaction.query(&statement.sql, &statement.params).await?;
            let Some(stored) = result.rows.into_iter().next() else {
                return Err(ServiceError::Conflict(format!(
                    "Insert of row {} stored nothing",
                    statement.row
                )));
            };
            let mut values = stored.values;
            values.resize(width, Value::Null);
            inserted.push((statement.row, values));
            summary.inserted += 1;
            continue;
        }

        let result = transaction.execute(&statement.sql, &statement.params).await?;
        if result.affected_rows == 0 {
            return Err(ServiceError::Conflict(
                "No rows matched - the row may have been modified or deleted by another user"
                    .to_string(),
            ));
        }
        match statement.kind {
            StatementKind::Update => summary.updated += 1,
            _ => summary.deleted += 1,
        }
    }
    Ok((summary, inserted))
}

async fn load_snapshot(
    connections: Arc<ConnectionService>,
    schema: String,
    table: String,
    row_limit: usize,
) -> ServiceResult<Snapshot> {
    let connection = connections.open().await?;
    let loader = MetadataLoader::new(connection.clone());

    let columns = loader.load_selectable_columns(&schema, &table).await?;
    if columns.is_empty() {
        return Ok(Snapshot {
            columns,
            primary_key: Vec::new(),
            rows: Vec::new(),
            notice: Some(format!("{}.{} has no selectable columns", schema, table)),
        });
    }

    let mut primary_key = loader.load_primary_key_columns(&schema, &table).await?;
    let mut notice = None;
    if primary_key.is_empty() {
        notice = Some(format!("{}.{} has no primary key; read-only", schema, table));
    } else if !primary_key
        .iter()
        .all(|key| columns.iter().any(|c| &c.name == key))
    {
        primary_key.clear();
        notice = Some(format!(
            "{}.{} primary key is not fully selectable; read-only",
            schema, table
        ));
    }

    let select_list: Vec<String> = columns
        .iter()
        .map(|c| DdlBuilder::quote_ident(&c.name))
        .collect();
    let sql = format!(
        "SELECT {} FROM {} LIMIT {}",
        select_list.join(", "),
        DdlBuilder::qualified_table(&schema, &table),
        row_limit
    );
    tracing::debug!(sql = %sql, "loading rows");
    let result = connection.query(&sql, &[]).await?;

    let width = columns.len();
    let rows = result
        .rows
        .into_iter()
        .map(|row| {
            let mut values = row.values;
            values.resize(width, Value::Null);
            values
        })
        .collect();

    Ok(Snapshot {
        columns,
        primary_key,
        rows,
        notice,
    })
}
