//! PostgreSQL driver implementation

use async_trait::async_trait;
use gistools_core::{Connection, ConnectionConfig, DatabaseDriver, GisError, Result};
use std::sync::Arc;

use crate::PostgresConnection;

const DEFAULT_PORT: u16 = 5432;
const DEFAULT_CONNECT_TIMEOUT_SECS: &str = "5";
const DEFAULT_SSL_MODE: &str = "prefer";

/// PostgreSQL database driver
pub struct PostgresDriver;

impl PostgresDriver {
    pub fn new() -> Self {
        tracing::debug!("PostgreSQL driver initialized");
        Self
    }
}

impl Default for PostgresDriver {
    fn default() -> Self {
        Self::new()
    }
}

/// Quote a keyword/value connection-string value when it contains spaces,
/// quotes or backslashes.
fn quote_value(value: &str) -> String {
    let needs_quotes = value.is_empty()
        || value
            .chars()
            .any(|c| c.is_whitespace() || c == '\'' || c == '\\');
    if needs_quotes {
        format!("'{}'", value.replace('\\', "\\\\").replace('\'', "\\'"))
    } else {
        value.to_string()
    }
}

#[async_trait]
impl DatabaseDriver for PostgresDriver {
    fn name(&self) -> &'static str {
        "postgres"
    }

    fn display_name(&self) -> &'static str {
        "PostgreSQL"
    }

    fn default_port(&self) -> Option<u16> {
        Some(DEFAULT_PORT)
    }

    async fn connect(&self, connection_string: &str) -> Result<Arc<dyn Connection>> {
        let conn = PostgresConnection::connect(connection_string)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "failed to connect to PostgreSQL database");
                e
            })?;
        Ok(Arc::new(conn))
    }

    #[tracing::instrument(skip(self, connection_string))]
    async fn test_connection(&self, connection_string: &str) -> Result<()> {
        tracing::debug!("testing PostgreSQL connection");
        let conn = self.connect(connection_string).await?;
        let result = conn.query("SELECT 1", &[]).await?;
        conn.close().await?;
        if result.has_rows() {
            Ok(())
        } else {
            Err(GisError::Connection("probe query returned no rows".into()))
        }
    }

    fn build_connection_string(&self, config: &ConnectionConfig) -> String {
        let host = match config.host.trim() {
            "" => "localhost",
            host => host,
        };
        let port = if config.port > 0 {
            config.port
        } else {
            DEFAULT_PORT
        };

        let mut parts = vec![
            format!("host={}", quote_value(host)),
            format!("port={}", port),
        ];
        if !config.database.trim().is_empty() {
            parts.push(format!("dbname={}", quote_value(config.database.trim())));
        }
        if !config.username.trim().is_empty() {
            parts.push(format!("user={}", quote_value(config.username.trim())));
        }
        if let Some(password) = config.password.as_deref().filter(|p| !p.is_empty()) {
            parts.push(format!("password={}", quote_value(password)));
        }
        parts.push(format!(
            "connect_timeout={}",
            config
                .param("connect_timeout")
                .unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS)
        ));
        parts.push(format!(
            "sslmode={}",
            config.param("sslmode").unwrap_or(DEFAULT_SSL_MODE)
        ));
        parts.push(format!(
            "application_name={}",
            quote_value(config.param("application_name").unwrap_or("gistools"))
        ));

        parts.join(" ")
    }
}
