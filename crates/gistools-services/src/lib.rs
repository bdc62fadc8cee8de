//! gistools services layer
//!
//! Services orchestrate the schema and data operations and keep the
//! selection / busy state a front end binds to.
//!
//! # Architecture
//!
//! ```text
//! Front end (gistools-cli)
//!     ↓
//! Service Layer (gistools-services) ← This crate
//!     ↓
//! Domain Layer (gistools-schema, gistools-settings)
//!     ↓
//! Infrastructure Layer (gistools-core, gistools-driver-postgres)
//! ```
//!
//! # Services
//!
//! - [`ConnectionService`] - Connection target and connection tests
//! - [`SchemaService`] - Metadata tree, overlay persistence and DDL orchestration
//! - [`TableEditSession`] - Editable row snapshot of one table
//! - [`DataExplorer`] - Schema → table → rows selection cascade

mod connection_service;
mod data_explorer;
mod ddl;
mod error;
mod schema_service;
mod status;
mod table_session;
mod values;

pub use connection_service::{ConnectionService, TestResult};
pub use data_explorer::DataExplorer;
pub use ddl::{CoordinateSystem, DdlBuilder, FieldSpec, FieldType};
pub use error::{ServiceError, ServiceResult};
pub use schema_service::{
    BatchAddOutcome, ConversionOutcome, LoadSummary, OperationPhase, SchemaService, Selection,
};
pub use status::{Confirm, StatusLog, StatusSink, always_confirm};
pub use table_session::{
    CommitSummary, EditableRow, PendingStatement, RowState, SessionOptions, StatementKind,
    TableEditSession,
};
pub use values::parse_cell;
