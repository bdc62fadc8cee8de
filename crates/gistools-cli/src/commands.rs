//! Subcommand handlers
//!
//! Each handler wires the services together for one invocation and prints
//! its result. Outcome messages come from the services through the status
//! sink.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, bail};
use gistools_driver_postgres::PostgresDriver;
use gistools_services::{
    ConnectionService, CoordinateSystem, DataExplorer, SchemaService, ServiceResult,
    SessionOptions, StatusSink, TableEditSession, always_confirm,
};
use gistools_settings::{AppConfig, ConfigStore, ConnectionSettings, JsonConfigStore};

use crate::output::{ConsoleStatus, render_session, render_tree, stdin_confirm};
use crate::{ConnectionArgs, DisplayArgs, OutputFormat, RowFilter};

/// Everything a command needs, built from the config file and flags
pub struct Context {
    pub store: Arc<JsonConfigStore>,
    pub config: AppConfig,
    pub connections: Arc<ConnectionService>,
    pub status: Arc<dyn StatusSink>,
}

impl Context {
    pub fn new(store: JsonConfigStore, args: &ConnectionArgs) -> anyhow::Result<Self> {
        let config = store
            .load()
            .with_context(|| format!("reading {}", store.path().display()))?;
        let connections = Arc::new(ConnectionService::new(Arc::new(PostgresDriver::new())));
        let settings = args.resolve(config.connection.clone());
        if !settings.database.trim().is_empty() {
            connections.configure(&settings, args.password.as_deref());
        }
        Ok(Self {
            store: Arc::new(store),
            config,
            connections,
            status: Arc::new(ConsoleStatus),
        })
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.config.explorer.operation_timeout_secs)
    }

    fn session_options(&self, limit: Option<usize>) -> SessionOptions {
        let mut options = SessionOptions::from(&self.config.explorer);
        if let Some(limit) = limit {
            options.row_limit = limit;
        }
        options
    }

    fn schema_service(&self, assume_yes: bool) -> SchemaService {
        let confirm = if assume_yes {
            always_confirm()
        } else {
            stdin_confirm()
        };
        SchemaService::new(
            self.connections.clone(),
            self.store.clone(),
            self.status.clone(),
            confirm,
        )
        .with_timeout(self.timeout())
    }

    /// Publish a service failure the service itself did not report
    fn report<T>(&self, result: ServiceResult<T>) -> anyhow::Result<T> {
        if let Err(e) = &result {
            self.status.publish(&e.to_string());
        }
        Ok(result?)
    }

    async fn edit_session(&self, schema: &str, table: &str) -> anyhow::Result<TableEditSession> {
        let result =
            TableEditSession::load(self.connections.clone(), schema, table, self.session_options(None))
                .await;
        let session = self.report(result)?;
        if let Some(notice) = session.notice() {
            self.status.publish(notice);
        }
        Ok(session)
    }

    async fn commit(&self, session: &mut TableEditSession) -> anyhow::Result<()> {
        let result = session.commit().await;
        let summary = self.report(result)?;
        self.status.publish(&format!(
            "Saved: {} inserted, {} updated, {} deleted",
            summary.inserted, summary.updated, summary.deleted
        ));
        Ok(())
    }
}

/// Persist the connection flags as the new defaults
pub fn configure(store: &JsonConfigStore, args: &ConnectionArgs) -> anyhow::Result<()> {
    let current = store.load_connection()?;
    let settings = args.resolve(current);
    store.save_connection(&settings)?;
    println!(
        "Saved connection {}@{}:{}/{} to {}",
        settings.username,
        settings.host,
        settings.port,
        settings.database,
        store.path().display()
    );
    Ok(())
}

pub async fn test_connection(ctx: &Context) -> anyhow::Result<()> {
    let result = ctx.report(ctx.connections.test_connection().await)?;
    match result.error {
        None => println!("{}", result.message),
        Some(error) => bail!("{}: {}", result.message, error),
    }
    Ok(())
}

pub async fn schema(
    ctx: &Context,
    schema: Option<&str>,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let service = ctx.schema_service(true);
    service.load_schema().await?;
    let tree = service.tree();
    match format {
        OutputFormat::Table => println!("{}", render_tree(&tree, schema)),
        OutputFormat::Json => {
            let json = match schema {
                Some(name) => serde_json::to_string_pretty(
                    &tree
                        .schema(name)
                        .with_context(|| format!("schema '{}' not found", name))?,
                )?,
                None => serde_json::to_string_pretty(&tree)?,
            };
            println!("{}", json);
        }
    }
    Ok(())
}

/// Write the current display attributes of every column to the config file
pub async fn save_fields(ctx: &Context) -> anyhow::Result<()> {
    let service = ctx.schema_service(true);
    service.load_schema().await?;
    service.save_field_configs().await?;
    Ok(())
}

pub async fn set_display(
    ctx: &Context,
    schema: &str,
    table: &str,
    column: &str,
    args: &DisplayArgs,
) -> anyhow::Result<()> {
    let service = ctx.schema_service(true);
    service.load_schema().await?;

    let mut display = service
        .tree()
        .column(schema, table, column)
        .map(|c| c.display.clone())
        .with_context(|| format!("column {}.{}.{} not found", schema, table, column))?;
    args.apply(&mut display);
    ctx.report(service.update_column_display(schema, table, column, display))?;
    service.save_field_configs().await?;
    Ok(())
}

pub async fn add_schema(ctx: &Context, name: &str) -> anyhow::Result<()> {
    ctx.schema_service(true).add_schema(name).await?;
    Ok(())
}

pub async fn add_field(
    ctx: &Context,
    schema: &str,
    table: &str,
    name: &str,
    field_type: &str,
    length: Option<&str>,
) -> anyhow::Result<()> {
    let service = ctx.schema_service(true);
    service.load_schema().await?;
    service
        .add_field(schema, table, name, field_type, length)
        .await?;
    Ok(())
}

pub async fn batch_add_field(
    ctx: &Context,
    schema: &str,
    name: &str,
    field_type: &str,
    length: Option<&str>,
) -> anyhow::Result<()> {
    ctx.schema_service(true)
        .batch_add_field(schema, name, field_type, length)
        .await?;
    Ok(())
}

pub async fn drop_field(
    ctx: &Context,
    schema: &str,
    table: &str,
    column: &str,
    assume_yes: bool,
) -> anyhow::Result<()> {
    ctx.schema_service(assume_yes)
        .delete_field(schema, table, column)
        .await?;
    Ok(())
}

pub async fn convert_srid(
    ctx: &Context,
    schema: &str,
    table: &str,
    srid: Option<i32>,
    crs: Option<&str>,
) -> anyhow::Result<()> {
    let srid = match (srid, crs) {
        (Some(srid), _) => srid,
        (None, Some(name)) => {
            CoordinateSystem::find(name)
                .with_context(|| {
                    let known: Vec<String> = CoordinateSystem::presets()
                        .iter()
                        .map(|c| format!("{} ({})", c.name, c.srid))
                        .collect();
                    format!(
                        "unknown coordinate system '{}'; known: {}",
                        name,
                        known.join(", ")
                    )
                })?
                .srid
        }
        (None, None) => bail!("pass --srid or --crs"),
    };
    ctx.schema_service(true)
        .convert_coordinate_system(schema, table, srid)
        .await?;
    Ok(())
}

/// Browse data: without a schema the default schema is used, without a
/// table the schema's first table
pub async fn show_data(
    ctx: &Context,
    schema: Option<String>,
    table: Option<String>,
    limit: Option<usize>,
) -> anyhow::Result<()> {
    let mut explorer = DataExplorer::new(
        ctx.connections.clone(),
        ctx.status.clone(),
        ctx.session_options(limit),
    );

    match schema {
        Some(schema) => explorer.select(Some(schema), table).await?,
        None => explorer.load_schemas_selecting(table).await?,
    }

    if explorer.tables().len() > 1 {
        println!("Tables: {}", explorer.tables().join(", "));
    }
    if let Some(session) = explorer.session() {
        println!("{}.{}", session.schema(), session.table());
        println!("{}", render_session(session));
    }
    Ok(())
}

pub async fn insert_row(
    ctx: &Context,
    schema: &str,
    table: &str,
    values: &[(String, String)],
) -> anyhow::Result<()> {
    let mut session = ctx.edit_session(schema, table).await?;
    let index = ctx.report(session.add_row())?;
    for (column, text) in values {
        ctx.report(session.update_cell_text(index, column, text))?;
    }
    ctx.commit(&mut session).await
}

pub async fn update_cell(
    ctx: &Context,
    schema: &str,
    table: &str,
    filter: &RowFilter,
    column: &str,
    value: &str,
) -> anyhow::Result<()> {
    let mut session = ctx.edit_session(schema, table).await?;
    let index = filter.find(&session)?;
    ctx.report(session.update_cell_text(index, column, value))?;
    ctx.commit(&mut session).await
}

pub async fn delete_row(
    ctx: &Context,
    schema: &str,
    table: &str,
    filter: &RowFilter,
    assume_yes: bool,
) -> anyhow::Result<()> {
    let mut session = ctx.edit_session(schema, table).await?;
    let index = filter.find(&session)?;
    let prompt = format!(
        "Delete the row of {}.{} where {} = {}?",
        schema,
        table,
        filter.column(),
        filter.value()
    );
    if !assume_yes && !stdin_confirm()(&prompt) {
        ctx.status.publish("Delete cancelled");
        return Ok(());
    }
    ctx.report(session.delete_row(index))?;
    ctx.commit(&mut session).await
}

/// Connection settings the flags leave unset come from the config file
impl ConnectionArgs {
    pub fn resolve(&self, stored: ConnectionSettings) -> ConnectionSettings {
        ConnectionSettings {
            host: self.host.clone().unwrap_or(stored.host),
            port: self.port.unwrap_or(stored.port),
            database: self.database.clone().unwrap_or(stored.database),
            username: self.username.clone().unwrap_or(stored.username),
        }
    }
}
