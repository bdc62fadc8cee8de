//! Schema introspection traits and types

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Catalog access used to build the schema tree and to probe before DDL
#[async_trait]
pub trait SchemaIntrospection: Send + Sync {
    /// List user schemas (system schemas excluded)
    async fn list_schemas(&self) -> Result<Vec<SchemaInfo>>;

    /// Whether a schema with exactly this name exists
    async fn schema_exists(&self, schema: &str) -> Result<bool>;

    /// List tables and views in a schema, ordered by name
    async fn list_tables(&self, schema: &str) -> Result<Vec<TableInfo>>;

    /// Every column of every user table, ordered by schema, table, ordinal position
    async fn list_all_columns(&self) -> Result<Vec<ColumnInfo>>;

    /// Columns of one table, ordered by ordinal position
    async fn get_columns(&self, schema: &str, table: &str) -> Result<Vec<ColumnInfo>>;

    /// Whether the table has a column with this name, ignoring case
    async fn column_exists(&self, schema: &str, table: &str, column: &str) -> Result<bool>;

    /// Names of the tables in `schema` that have a column named `column`, ignoring case
    async fn tables_with_column(&self, schema: &str, column: &str) -> Result<Vec<String>>;

    /// Primary key columns in key order; empty when the table has no primary key
    async fn get_primary_key(&self, schema: &str, table: &str) -> Result<Vec<String>>;

    /// Geometry and geography columns registered in the PostGIS catalog views.
    /// `None` widens the filter to all schemas / all tables.
    async fn list_spatial_columns(
        &self,
        schema: Option<&str>,
        table: Option<&str>,
    ) -> Result<Vec<SpatialColumnInfo>>;
}

/// Schema information
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaInfo {
    pub name: String,
}

/// Table information (basic)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableInfo {
    pub schema: String,
    pub name: String,
    pub table_type: TableType,
}

/// Table type as reported by `information_schema.tables`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TableType {
    Table,
    View,
    ForeignTable,
    Temporary,
}

impl TableType {
    pub fn from_catalog(table_type: &str) -> Self {
        match table_type {
            "VIEW" => TableType::View,
            "FOREIGN" | "FOREIGN TABLE" => TableType::ForeignTable,
            "LOCAL TEMPORARY" => TableType::Temporary,
            _ => TableType::Table,
        }
    }

    pub fn is_base_table(&self) -> bool {
        matches!(self, TableType::Table)
    }
}

/// Column information from `information_schema.columns`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub schema: String,
    pub table: String,
    pub name: String,
    /// 1-based position within the table
    pub ordinal: i32,
    /// Declared type (`data_type`), e.g. `character varying`, `USER-DEFINED`
    pub data_type: String,
    /// Underlying type name (`udt_name`), e.g. `varchar`, `geometry`
    pub udt_name: String,
    pub nullable: bool,
    pub default_value: Option<String>,
    pub max_length: Option<i32>,
}

impl ColumnInfo {
    /// Whether the column holds PostGIS geometry or geography values
    pub fn is_spatial(&self) -> bool {
        self.udt_name.eq_ignore_ascii_case("geometry")
            || self.udt_name.eq_ignore_ascii_case("geography")
    }
}

/// Which PostGIS catalog view registered a spatial column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpatialKind {
    Geometry,
    Geography,
}

impl SpatialKind {
    /// Type keyword used in DDL (`geometry` / `geography`)
    pub fn type_name(&self) -> &'static str {
        match self {
            SpatialKind::Geometry => "geometry",
            SpatialKind::Geography => "geography",
        }
    }
}

/// A row of `geometry_columns` or `geography_columns`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpatialColumnInfo {
    pub schema: String,
    pub table: String,
    pub column: String,
    /// PostGIS type modifier, e.g. `POINT`, `MULTIPOLYGON`, `GEOMETRY`
    pub geometry_type: String,
    pub srid: i32,
    pub kind: SpatialKind,
}
