//! Schema → table → rows browsing
//!
//! Selecting a schema loads its base tables and selects the first one;
//! that nested selection is suppressed from loading so the data is read
//! exactly once per cascade. Selecting the current value again is a no-op.

use std::sync::Arc;

use gistools_schema::MetadataLoader;

use crate::connection_service::ConnectionService;
use crate::error::{ServiceError, ServiceResult};
use crate::status::StatusSink;
use crate::table_session::{CommitSummary, SessionOptions, TableEditSession};

const DEFAULT_SCHEMA: &str = "public";

pub struct DataExplorer {
    connections: Arc<ConnectionService>,
    status: Arc<dyn StatusSink>,
    options: SessionOptions,
    schemas: Vec<String>,
    tables: Vec<String>,
    selected_schema: Option<String>,
    selected_table: Option<String>,
    suppress_auto_load: bool,
    session: Option<TableEditSession>,
}

impl DataExplorer {
    pub fn new(
        connections: Arc<ConnectionService>,
        status: Arc<dyn StatusSink>,
        options: SessionOptions,
    ) -> Self {
        Self {
            connections,
            status,
            options,
            schemas: Vec::new(),
            tables: Vec::new(),
            selected_schema: None,
            selected_table: None,
            suppress_auto_load: false,
            session: None,
        }
    }

    pub fn schemas(&self) -> &[String] {
        &self.schemas
    }

    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    pub fn selected_schema(&self) -> Option<&str> {
        self.selected_schema.as_deref()
    }

    pub fn selected_table(&self) -> Option<&str> {
        self.selected_table.as_deref()
    }

    pub fn session(&self) -> Option<&TableEditSession> {
        self.session.as_ref()
    }

    pub fn session_mut(&mut self) -> Option<&mut TableEditSession> {
        self.session.as_mut()
    }

    fn report<T>(&self, result: ServiceResult<T>) -> ServiceResult<T> {
        if let Err(e) = &result {
            tracing::warn!(error = %e, "data explorer operation failed");
            self.status.publish(&e.to_string());
        }
        result
    }

    /// Load schema names and select `public`, or the first schema
    pub async fn load_schemas(&mut self) -> ServiceResult<()> {
        self.load_schemas_selecting(None).await
    }

    /// `load_schemas`, with `table` picked in the default schema's cascade
    #[tracing::instrument(skip(self))]
    pub async fn load_schemas_selecting(&mut self, table: Option<String>) -> ServiceResult<()> {
        let result = self.load_schema_names().await;
        let schemas = self.report(result)?;
        let default = schemas
            .iter()
            .find(|s| s.as_str() == DEFAULT_SCHEMA)
            .or_else(|| schemas.first())
            .cloned();
        self.schemas = schemas;
        self.select(default, table).await
    }

    async fn load_schema_names(&self) -> ServiceResult<Vec<String>> {
        let connection = self.connections.open().await?;
        Ok(MetadataLoader::new(connection).load_schema_names().await?)
    }

    /// Select a schema, load its base tables, select the first table and load its rows
    pub async fn select_schema(&mut self, schema: Option<String>) -> ServiceResult<()> {
        self.select(schema, None).await
    }

    /// Like `select_schema`, but the cascade selects `table` instead of the
    /// first table. Rows are still read once.
    #[tracing::instrument(skip(self))]
    pub async fn select(&mut self, schema: Option<String>, table: Option<String>) -> ServiceResult<()> {
        if schema == self.selected_schema {
            return match table {
                Some(_) => self.select_table(table).await,
                None => Ok(()),
            };
        }
        self.selected_schema = schema.clone();
        self.tables.clear();
        self.selected_table = None;
        self.session = None;

        let Some(schema) = schema else {
            return Ok(());
        };

        let result = self.load_tables(&schema).await;
        self.tables = self.report(result)?;

        let initial = match table {
            Some(table) if self.tables.contains(&table) => Some(table),
            Some(table) => {
                return self.report(Err(ServiceError::ValidationFailed(format!(
                    "Table '{}' not found in schema '{}'",
                    table, schema
                ))));
            }
            None => self.tables.first().cloned(),
        };
        self.suppress_auto_load = true;
        let selected = self.select_table(initial).await;
        self.suppress_auto_load = false;
        selected?;

        if self.selected_table.is_some() {
            self.load_data().await?;
        } else {
            self.status
                .publish(&format!("Schema '{}' has no tables", schema));
        }
        Ok(())
    }

    async fn load_tables(&self, schema: &str) -> ServiceResult<Vec<String>> {
        let connection = self.connections.open().await?;
        Ok(MetadataLoader::new(connection).load_base_tables(schema).await?)
    }

    /// Select a table and load its rows, unless a cascade is in progress
    #[tracing::instrument(skip(self))]
    pub async fn select_table(&mut self, table: Option<String>) -> ServiceResult<()> {
        if table == self.selected_table {
            return Ok(());
        }
        self.selected_table = table;
        self.session = None;

        if self.suppress_auto_load || self.selected_table.is_none() {
            return Ok(());
        }
        self.load_data().await
    }

    /// (Re)load the selected table into a fresh edit session
    pub async fn load_data(&mut self) -> ServiceResult<()> {
        self.session = None;
        let (Some(schema), Some(table)) = (self.selected_schema.clone(), self.selected_table.clone())
        else {
            return self.report(Err(ServiceError::ValidationFailed(
                "Select a schema and a table first".to_string(),
            )));
        };

        let result = TableEditSession::load(
            self.connections.clone(),
            &schema,
            &table,
            self.options,
        )
        .await;
        let session = self.report(result)?;

        match session.notice() {
            Some(notice) => self.status.publish(notice),
            None => self.status.publish(&format!(
                "Loaded {} rows from {}.{}",
                session.row_count(),
                schema,
                table
            )),
        }
        self.session = Some(session);
        Ok(())
    }

    /// Commit the current session's edits
    pub async fn commit(&mut self) -> ServiceResult<CommitSummary> {
        let result = match self.session.as_mut() {
            Some(session) => session.commit().await,
            None => Err(ServiceError::ValidationFailed("No table loaded".to_string())),
        };
        let summary = self.report(result)?;
        self.status.publish(&format!(
            "Saved: {} inserted, {} updated, {} deleted",
            summary.inserted, summary.updated, summary.deleted
        ));
        Ok(summary)
    }
}
