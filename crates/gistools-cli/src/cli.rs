//! gistools command-line interface
//!
//! Inspect PostGIS schema metadata, change table structure and edit rows
//! from the terminal. Connection flags fall back to the saved defaults in
//! the config file (`gistools configure` writes them); the password is only
//! ever read from `--password` or `GISTOOLS_PASSWORD`.

mod commands;
mod logging;
mod output;

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context as _, bail};
use clap::{Args, Parser, Subcommand, ValueEnum};
use gistools_schema::ColumnDisplay;
use gistools_services::{FieldType, ServiceError, TableEditSession};
use gistools_settings::JsonConfigStore;

use crate::commands::Context;
use crate::logging::LoggingConfig;

#[derive(Parser)]
#[command(
    name = "gistools",
    version,
    about = "PostGIS schema metadata, DDL and table editing tools"
)]
struct Cli {
    #[command(flatten)]
    connection: ConnectionArgs,

    /// Config file (default: <config dir>/gistools/config.json)
    #[arg(long, global = true, env = "GISTOOLS_CONFIG")]
    config: Option<PathBuf>,

    /// Debug logging for the gistools crates
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Also write JSON logs to the default log directory
    #[arg(long, global = true)]
    log: bool,

    /// Also write JSON logs to this directory
    #[arg(long, global = true, env = "GISTOOLS_LOG_DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Args, Debug, Default)]
pub struct ConnectionArgs {
    #[arg(long, global = true, env = "GISTOOLS_HOST")]
    pub host: Option<String>,

    #[arg(long, global = true, env = "GISTOOLS_PORT")]
    pub port: Option<u16>,

    #[arg(short = 'd', long, global = true, env = "GISTOOLS_DATABASE")]
    pub database: Option<String>,

    #[arg(short = 'U', long, global = true, env = "GISTOOLS_USER")]
    pub username: Option<String>,

    #[arg(long, global = true, env = "GISTOOLS_PASSWORD", hide_env_values = true)]
    pub password: Option<String>,
}

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

/// Display attribute changes; unset flags keep the current value
#[derive(Args, Debug, Default)]
pub struct DisplayArgs {
    #[arg(long)]
    pub alias: Option<String>,

    #[arg(long, conflicts_with = "show")]
    pub hide: bool,

    #[arg(long)]
    pub show: bool,

    /// Local type label
    #[arg(long = "type")]
    pub local_type: Option<String>,

    #[arg(long = "length")]
    pub local_length: Option<i32>,

    #[arg(long = "default")]
    pub local_default: Option<String>,
}

impl DisplayArgs {
    pub fn apply(&self, display: &mut ColumnDisplay) {
        if let Some(alias) = &self.alias {
            display.alias = alias.clone();
        }
        if self.hide {
            display.visible = false;
        }
        if self.show {
            display.visible = true;
        }
        if let Some(local_type) = &self.local_type {
            display.local_type = local_type.clone();
        }
        if let Some(length) = self.local_length {
            display.local_length = Some(length);
        }
        if let Some(default) = &self.local_default {
            display.local_default = default.clone();
        }
    }
}

/// Identifies one loaded row by the text of one of its cells
#[derive(Args, Debug, Clone)]
pub struct RowFilter {
    /// `column=value`; must match exactly one loaded row
    #[arg(long = "where", value_parser = parse_assignment)]
    pub filter: (String, String),
}

impl RowFilter {
    pub fn column(&self) -> &str {
        &self.filter.0
    }

    pub fn value(&self) -> &str {
        &self.filter.1
    }

    pub fn find(&self, session: &TableEditSession) -> anyhow::Result<usize> {
        let index = session
            .column_names()
            .iter()
            .position(|c| *c == self.column())
            .with_context(|| format!("unknown column '{}'", self.column()))?;
        let matches: Vec<usize> = session
            .rows()
            .iter()
            .enumerate()
            .filter(|(_, row)| row.values[index].to_string() == self.value())
            .map(|(i, _)| i)
            .collect();
        match matches.as_slice() {
            [row] => Ok(*row),
            [] => bail!("no loaded row has {} = {}", self.column(), self.value()),
            _ => bail!(
                "{} loaded rows have {} = {}; use a key column",
                matches.len(),
                self.column(),
                self.value()
            ),
        }
    }
}

fn parse_assignment(input: &str) -> Result<(String, String), String> {
    match input.split_once('=') {
        Some((column, value)) if !column.trim().is_empty() => {
            Ok((column.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected column=value, got '{}'", input)),
    }
}

#[derive(Subcommand)]
enum Command {
    /// Save the connection flags as defaults
    Configure,

    /// Check that the database is reachable
    TestConnection,

    /// Print schemas, tables and columns with their display settings
    Schema {
        /// Only this schema
        schema: Option<String>,

        #[arg(long, value_enum, default_value_t)]
        format: OutputFormat,
    },

    /// Store the display settings of every column in the config file
    SaveFields,

    /// Change how a column is displayed
    SetDisplay {
        schema: String,
        table: String,
        column: String,

        #[command(flatten)]
        display: DisplayArgs,
    },

    /// Create a schema
    AddSchema { name: String },

    /// Add a column to one table
    AddField {
        schema: String,
        table: String,
        name: String,

        #[arg(long = "type", default_value = "text", value_parser = field_type_name)]
        field_type: String,

        #[arg(long)]
        length: Option<String>,
    },

    /// Add a column to every table of a schema
    BatchAddField {
        schema: String,
        name: String,

        #[arg(long = "type", default_value = "text", value_parser = field_type_name)]
        field_type: String,

        #[arg(long)]
        length: Option<String>,
    },

    /// Drop a column
    DropField {
        schema: String,
        table: String,
        column: String,

        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },

    /// Reproject the spatial columns of a table
    ConvertSrid {
        schema: String,
        table: String,

        #[arg(long, required_unless_present = "crs", conflicts_with = "crs")]
        srid: Option<i32>,

        /// Preset name: "WGS 84", "Web Mercator" or "CGCS2000"
        #[arg(long)]
        crs: Option<String>,
    },

    /// Show the rows of a table
    ShowData {
        schema: Option<String>,
        table: Option<String>,

        #[arg(long)]
        limit: Option<usize>,
    },

    /// Insert a row
    InsertRow {
        schema: String,
        table: String,

        /// `column=value`, repeatable; `null` stores NULL
        #[arg(long = "set", value_parser = parse_assignment)]
        values: Vec<(String, String)>,
    },

    /// Change one cell of a row
    UpdateCell {
        schema: String,
        table: String,

        #[command(flatten)]
        row: RowFilter,

        #[arg(long)]
        column: String,

        #[arg(long)]
        value: String,
    },

    /// Delete a row
    DeleteRow {
        schema: String,
        table: String,

        #[command(flatten)]
        row: RowFilter,

        #[arg(short, long)]
        yes: bool,
    },
}

fn field_type_name(input: &str) -> Result<String, String> {
    FieldType::parse(input)
        .map(|t| t.to_string())
        .map_err(|e| e.to_string())
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let store = match &cli.config {
        Some(path) => JsonConfigStore::new(path.clone()),
        None => JsonConfigStore::open_default()?,
    };

    if let Command::Configure = cli.command {
        return commands::configure(&store, &cli.connection);
    }

    let ctx = Context::new(store, &cli.connection)?;
    match cli.command {
        Command::Configure => Ok(()),
        Command::TestConnection => commands::test_connection(&ctx).await,
        Command::Schema { schema, format } => {
            commands::schema(&ctx, schema.as_deref(), format).await
        }
        Command::SaveFields => commands::save_fields(&ctx).await,
        Command::SetDisplay {
            schema,
            table,
            column,
            display,
        } => commands::set_display(&ctx, &schema, &table, &column, &display).await,
        Command::AddSchema { name } => commands::add_schema(&ctx, &name).await,
        Command::AddField {
            schema,
            table,
            name,
            field_type,
            length,
        } => {
            commands::add_field(&ctx, &schema, &table, &name, &field_type, length.as_deref()).await
        }
        Command::BatchAddField {
            schema,
            name,
            field_type,
            length,
        } => {
            commands::batch_add_field(&ctx, &schema, &name, &field_type, length.as_deref()).await
        }
        Command::DropField {
            schema,
            table,
            column,
            yes,
        } => commands::drop_field(&ctx, &schema, &table, &column, yes).await,
        Command::ConvertSrid {
            schema,
            table,
            srid,
            crs,
        } => commands::convert_srid(&ctx, &schema, &table, srid, crs.as_deref()).await,
        Command::ShowData {
            schema,
            table,
            limit,
        } => commands::show_data(&ctx, schema, table, limit).await,
        Command::InsertRow {
            schema,
            table,
            values,
        } => commands::insert_row(&ctx, &schema, &table, &values).await,
        Command::UpdateCell {
            schema,
            table,
            row,
            column,
            value,
        } => commands::update_cell(&ctx, &schema, &table, &row, &column, &value).await,
        Command::DeleteRow {
            schema,
            table,
            row,
            yes,
        } => commands::delete_row(&ctx, &schema, &table, &row, yes).await,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_dir = match (&cli.log_dir, cli.log) {
        (Some(dir), _) => Some(dir.clone()),
        (None, true) => Some(logging::log_directory()),
        (None, false) => None,
    };
    let _log_guard = match logging::init(&LoggingConfig {
        log_dir,
        verbose: cli.verbose,
    }) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("warning: logging disabled: {:#}", e);
            None
        }
    };

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::debug!(error = ?e, "command failed");
            // Service failures were already shown through the status sink
            if e.downcast_ref::<ServiceError>().is_none() {
                eprintln!("error: {:#}", e);
            }
            ExitCode::FAILURE
        }
    }
}
