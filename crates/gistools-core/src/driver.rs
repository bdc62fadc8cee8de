//! Database driver trait definition

use crate::{Connection, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// Parameters used to build a connection string
#[derive(Debug, Clone, Default)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    /// Never persisted; supplied per session
    pub password: Option<String>,
    /// Extra driver parameters (e.g. `sslmode`, `connect_timeout`)
    pub params: HashMap<String, String>,
}

impl ConnectionConfig {
    pub fn new(host: &str, port: u16, database: &str, username: &str) -> Self {
        Self {
            host: host.to_string(),
            port,
            database: database.to_string(),
            username: username.to_string(),
            password: None,
            params: HashMap::new(),
        }
    }

    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn with_param(mut self, key: &str, value: impl Into<String>) -> Self {
        self.params.insert(key.to_string(), value.into());
        self
    }

    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(|s| s.as_str())
    }
}

/// A database driver: turns connection strings into live connections
#[async_trait]
pub trait DatabaseDriver: Send + Sync {
    /// Driver identifier (e.g. "postgres")
    fn name(&self) -> &'static str;

    fn display_name(&self) -> &'static str {
        self.name()
    }

    fn default_port(&self) -> Option<u16> {
        None
    }

    /// Open a connection from a driver-specific connection string
    async fn connect(&self, connection_string: &str) -> Result<Arc<dyn Connection>>;

    /// Open a connection and run a trivial probe query
    async fn test_connection(&self, connection_string: &str) -> Result<()>;

    /// Build a connection string from structured parameters
    fn build_connection_string(&self, config: &ConnectionConfig) -> String;
}
