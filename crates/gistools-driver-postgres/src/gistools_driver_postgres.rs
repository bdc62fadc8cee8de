//! PostgreSQL/PostGIS driver implementation

mod connection;
mod driver;
mod numeric;
mod schema;

pub use connection::PostgresConnection;
pub use driver::PostgresDriver;
