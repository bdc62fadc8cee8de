//! Connection target management
//!
//! Holds the current connection string and opens a short-lived connection
//! per operation.

use parking_lot::RwLock;
use std::sync::Arc;

use gistools_core::{Connection, ConnectionConfig, DatabaseDriver};
use gistools_settings::ConnectionSettings;

use crate::error::{ServiceError, ServiceResult};

/// Connection-string provider shared by the schema and data services
pub struct ConnectionService {
    driver: Arc<dyn DatabaseDriver>,
    connection_string: RwLock<Option<String>>,
}

impl ConnectionService {
    pub fn new(driver: Arc<dyn DatabaseDriver>) -> Self {
        Self {
            driver,
            connection_string: RwLock::new(None),
        }
    }

    /// Build and store the connection string for `settings`
    pub fn configure(&self, settings: &ConnectionSettings, password: Option<&str>) {
        let mut config = ConnectionConfig::new(
            &settings.host,
            settings.port,
            &settings.database,
            &settings.username,
        );
        if let Some(password) = password {
            config = config.with_password(password);
        }
        let connection_string = self.driver.build_connection_string(&config);
        tracing::debug!(
            host = %settings.host,
            port = settings.port,
            database = %settings.database,
            "connection target configured"
        );
        *self.connection_string.write() = Some(connection_string);
    }

    pub fn set_connection_string(&self, connection_string: Option<String>) {
        *self.connection_string.write() = connection_string;
    }

    pub fn connection_string(&self) -> Option<String> {
        self.connection_string.read().clone()
    }

    pub fn is_configured(&self) -> bool {
        self.connection_string
            .read()
            .as_deref()
            .is_some_and(|s| !s.trim().is_empty())
    }

    /// The current connection string, or `NotConnected` when none is set
    pub fn require_target(&self) -> ServiceResult<String> {
        self.connection_string
            .read()
            .clone()
            .filter(|s| !s.trim().is_empty())
            .ok_or(ServiceError::NotConnected)
    }

    /// Open a fresh connection to the current target
    pub async fn open(&self) -> ServiceResult<Arc<dyn Connection>> {
        let connection_string = self.require_target()?;
        self.driver.connect(&connection_string).await.map_err(|e| {
            tracing::error!(error = %e, "connection failed");
            ServiceError::ServerError(e.to_string())
        })
    }

    /// Probe the current target with a trivial query
    #[tracing::instrument(skip(self))]
    pub async fn test_connection(&self) -> ServiceResult<TestResult> {
        let connection_string = self.require_target()?;
        let result = match self.driver.test_connection(&connection_string).await {
            Ok(()) => {
                tracing::info!("connection test successful");
                TestResult {
                    success: true,
                    message: "Connection successful".to_string(),
                    error: None,
                }
            }
            Err(e) => {
                tracing::warn!(error = %e, "connection test failed");
                TestResult {
                    success: false,
                    message: "Connection failed".to_string(),
                    error: Some(e.to_string()),
                }
            }
        };
        Ok(result)
    }
}

/// Result of a connection test
#[derive(Debug, Clone)]
pub struct TestResult {
    pub success: bool,
    /// User-friendly message
    pub message: String,
    pub error: Option<String>,
}
