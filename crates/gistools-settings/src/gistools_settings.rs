//! gistools settings
//!
//! Persisted application configuration:
//! - Connection defaults (host, port, database, user; never the password)
//! - Per-column display overrides (`FieldConfig`)
//! - Data explorer defaults (row limit, operation timeout)

use serde::{Deserialize, Serialize};

mod settings_file;
mod store;

pub use settings_file::*;
pub use store::*;

pub const DEFAULT_ROW_LIMIT: usize = 200;
pub const DEFAULT_OPERATION_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub connection: ConnectionSettings,
    pub field_configs: Vec<FieldConfig>,
    pub explorer: ExplorerSettings,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionSettings {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            host: "localhost".into(),
            port: 5432,
            database: String::new(),
            username: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExplorerSettings {
    /// Maximum rows loaded into an edit session
    pub row_limit: usize,
    pub operation_timeout_secs: u64,
}

impl Default for ExplorerSettings {
    fn default() -> Self {
        Self {
            row_limit: DEFAULT_ROW_LIMIT,
            operation_timeout_secs: DEFAULT_OPERATION_TIMEOUT_SECS,
        }
    }
}

/// Locally persisted display override for one column, keyed by
/// `(schema, table, column)`.
///
/// Blank `alias`, `local_type` and `local_default` mean "use the database value".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct FieldConfig {
    pub schema: String,
    pub table: String,
    pub column: String,
    pub visible: bool,
    pub alias: String,
    pub local_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_length: Option<i32>,
    pub local_default: String,
}

impl Default for FieldConfig {
    fn default() -> Self {
        Self {
            schema: String::new(),
            table: String::new(),
            column: String::new(),
            visible: true,
            alias: String::new(),
            local_type: String::new(),
            local_length: None,
            local_default: String::new(),
        }
    }
}

impl FieldConfig {
    pub fn new(schema: &str, table: &str, column: &str) -> Self {
        Self {
            schema: schema.to_string(),
            table: table.to_string(),
            column: column.to_string(),
            ..Default::default()
        }
    }

    /// Whether every part of the key is non-blank
    pub fn has_key(&self) -> bool {
        !self.schema.trim().is_empty()
            && !self.table.trim().is_empty()
            && !self.column.trim().is_empty()
    }
}
