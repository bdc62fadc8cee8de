//! gistools core - shared abstractions for the PostGIS schema tools
//!
//! This crate provides the fundamental traits and types that all other
//! gistools crates depend on. It defines:
//!
//! - `DatabaseDriver` - Trait for opening connections from a connection string
//! - `Connection` - Trait for database connections
//! - `SchemaIntrospection` - Catalog queries (schemas, tables, columns, keys, spatial columns)
//! - Common types like `Value`, `Row`, `QueryResult`

mod connection;
mod driver;
mod error;
mod schema;
mod types;

pub use connection::*;
pub use driver::*;
pub use error::*;
pub use schema::*;
pub use types::*;
