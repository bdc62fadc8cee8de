//! PostgreSQL / PostGIS catalog introspection
//!
//! Catalog views expose domain types (`sql_identifier`, `cardinal_number`),
//! so every selected column is cast to a plain type the driver decodes.

use async_trait::async_trait;
use gistools_core::{
    ColumnInfo, Connection, Result, Row, SchemaInfo, SchemaIntrospection, SpatialColumnInfo,
    SpatialKind, TableInfo, TableType, Value,
};

use crate::PostgresConnection;

const LIST_SCHEMAS_SQL: &str = "SELECT schema_name::text
     FROM information_schema.schemata
     WHERE schema_name NOT IN ('information_schema', 'pg_catalog')
     ORDER BY schema_name";

const SCHEMA_EXISTS_SQL: &str =
    "SELECT 1 FROM information_schema.schemata WHERE schema_name = $1";

const LIST_TABLES_SQL: &str = "SELECT table_schema::text, table_name::text, table_type::text
     FROM information_schema.tables
     WHERE table_schema = $1
     ORDER BY table_name";

const COLUMN_SELECT: &str = "SELECT
        table_schema::text,
        table_name::text,
        column_name::text,
        ordinal_position::int,
        data_type::text,
        udt_name::text,
        is_nullable::text,
        column_default::text,
        character_maximum_length::int
     FROM information_schema.columns";

const COLUMN_EXISTS_SQL: &str = "SELECT 1 FROM information_schema.columns
     WHERE table_schema = $1 AND table_name = $2 AND lower(column_name) = lower($3)";

const TABLES_WITH_COLUMN_SQL: &str = "SELECT table_name::text FROM information_schema.columns
     WHERE table_schema = $1 AND lower(column_name) = lower($2)";

const PRIMARY_KEY_SQL: &str = "SELECT kcu.column_name::text
     FROM information_schema.table_constraints tc
     JOIN information_schema.key_column_usage kcu
       ON tc.constraint_name = kcu.constraint_name
       AND tc.table_schema = kcu.table_schema
       AND tc.table_name = kcu.table_name
     WHERE tc.constraint_type = 'PRIMARY KEY'
       AND tc.table_schema = $1
       AND tc.table_name = $2
     ORDER BY kcu.ordinal_position";

fn all_columns_sql() -> String {
    format!(
        "{} WHERE table_schema NOT IN ('information_schema', 'pg_catalog') ORDER BY table_schema, table_name, ordinal_position",
        COLUMN_SELECT
    )
}

fn table_columns_sql() -> String {
    format!(
        "{} WHERE table_schema = $1 AND table_name = $2 ORDER BY ordinal_position",
        COLUMN_SELECT
    )
}

/// Query against `public.geometry_columns` or `public.geography_columns`,
/// optionally filtered by schema and table.
fn spatial_columns_sql(kind: SpatialKind, by_schema: bool, by_table: bool) -> String {
    let (view, column_field) = match kind {
        SpatialKind::Geometry => ("public.geometry_columns", "f_geometry_column"),
        SpatialKind::Geography => ("public.geography_columns", "f_geography_column"),
    };
    let mut filters = Vec::new();
    if by_schema {
        filters.push(format!("f_table_schema = ${}", filters.len() + 1));
    }
    if by_table {
        filters.push(format!("f_table_name = ${}", filters.len() + 1));
    }
    let where_clause = if filters.is_empty() {
        String::new()
    } else {
        format!(" WHERE {}", filters.join(" AND "))
    };
    format!(
        "SELECT f_table_schema::text, f_table_name::text, {column_field}::text, type::text, srid::int FROM {view}{where_clause} ORDER BY f_table_schema, f_table_name, {column_field}"
    )
}

fn column_from_row(row: &Row) -> ColumnInfo {
    ColumnInfo {
        schema: row.get_string(0),
        table: row.get_string(1),
        name: row.get_string(2),
        ordinal: row.get(3).and_then(|v| v.as_i32()).unwrap_or_default(),
        data_type: row.get_string(4),
        udt_name: row.get_string(5),
        nullable: row.get(6).and_then(|v| v.as_bool()).unwrap_or(true),
        default_value: row.get(7).and_then(|v| v.as_str()).map(|s| s.to_string()),
        max_length: row.get(8).and_then(|v| v.as_i32()),
    }
}

fn spatial_from_row(row: &Row, kind: SpatialKind) -> SpatialColumnInfo {
    SpatialColumnInfo {
        schema: row.get_string(0),
        table: row.get_string(1),
        column: row.get_string(2),
        geometry_type: row.get_string(3),
        srid: row.get(4).and_then(|v| v.as_i32()).unwrap_or_default(),
        kind,
    }
}

fn text(value: &str) -> Value {
    Value::String(value.to_string())
}

#[async_trait]
impl SchemaIntrospection for PostgresConnection {
    #[tracing::instrument(skip(self))]
    async fn list_schemas(&self) -> Result<Vec<SchemaInfo>> {
        let result = self.query(LIST_SCHEMAS_SQL, &[]).await?;
        Ok(result
            .rows
            .iter()
            .map(|row| SchemaInfo {
                name: row.get_string(0),
            })
            .collect())
    }

    #[tracing::instrument(skip(self))]
    async fn schema_exists(&self, schema: &str) -> Result<bool> {
        let result = self.query(SCHEMA_EXISTS_SQL, &[text(schema)]).await?;
        Ok(result.has_rows())
    }

    #[tracing::instrument(skip(self))]
    async fn list_tables(&self, schema: &str) -> Result<Vec<TableInfo>> {
        let result = self.query(LIST_TABLES_SQL, &[text(schema)]).await?;
        Ok(result
            .rows
            .iter()
            .map(|row| TableInfo {
                schema: row.get_string(0),
                name: row.get_string(1),
                table_type: TableType::from_catalog(&row.get_string(2)),
            })
            .collect())
    }

    #[tracing::instrument(skip(self))]
    async fn list_all_columns(&self) -> Result<Vec<ColumnInfo>> {
        let result = self.query(&all_columns_sql(), &[]).await?;
        Ok(result.rows.iter().map(column_from_row).collect())
    }

    #[tracing::instrument(skip(self))]
    async fn get_columns(&self, schema: &str, table: &str) -> Result<Vec<ColumnInfo>> {
        let result = self
            .query(&table_columns_sql(), &[text(schema), text(table)])
            .await?;
        Ok(result.rows.iter().map(column_from_row).collect())
    }

    #[tracing::instrument(skip(self))]
    async fn column_exists(&self, schema: &str, table: &str, column: &str) -> Result<bool> {
        let result = self
            .query(COLUMN_EXISTS_SQL, &[text(schema), text(table), text(column)])
            .await?;
        Ok(result.has_rows())
    }

    #[tracing::instrument(skip(self))]
    async fn tables_with_column(&self, schema: &str, column: &str) -> Result<Vec<String>> {
        let result = self
            .query(TABLES_WITH_COLUMN_SQL, &[text(schema), text(column)])
            .await?;
        Ok(result.rows.iter().map(|row| row.get_string(0)).collect())
    }

    #[tracing::instrument(skip(self))]
    async fn get_primary_key(&self, schema: &str, table: &str) -> Result<Vec<String>> {
        let result = self
            .query(PRIMARY_KEY_SQL, &[text(schema), text(table)])
            .await?;
        Ok(result.rows.iter().map(|row| row.get_string(0)).collect())
    }

    #[tracing::instrument(skip(self))]
    async fn list_spatial_columns(
        &self,
        schema: Option<&str>,
        table: Option<&str>,
    ) -> Result<Vec<SpatialColumnInfo>> {
        let params: Vec<Value> = schema.into_iter().chain(table).map(text).collect();
        let mut columns = Vec::new();
        for kind in [SpatialKind::Geometry, SpatialKind::Geography] {
            let sql = spatial_columns_sql(kind, schema.is_some(), table.is_some());
            let result = self.query(&sql, &params).await?;
            columns.extend(result.rows.iter().map(|row| spatial_from_row(row, kind)));
        }
        Ok(columns)
    }
}
