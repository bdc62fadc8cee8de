//! Metadata loading from catalog views

use std::sync::Arc;

use gistools_core::{ColumnInfo, Connection, SchemaIntrospection, SpatialColumnInfo};

use crate::{ColumnNode, SchemaError, SchemaResult, SchemaTree};

/// Builds the schema tree from a live connection
pub struct MetadataLoader {
    connection: Arc<dyn Connection>,
}

impl MetadataLoader {
    pub fn new(connection: Arc<dyn Connection>) -> Self {
        Self { connection }
    }

    fn introspection(&self) -> SchemaResult<&dyn SchemaIntrospection> {
        self.connection
            .as_schema_introspection()
            .ok_or_else(|| SchemaError::SchemaNotSupported(self.connection.driver_name().into()))
    }

    /// Load every user schema with its tables and columns.
    ///
    /// Schemas come from one query and columns from another; schemas or
    /// tables referenced by a column row are created on demand. Spatial
    /// attributes are merged when the PostGIS catalog views are readable.
    #[tracing::instrument(skip(self))]
    pub async fn load_all(&self) -> SchemaResult<SchemaTree> {
        let catalog = self.introspection()?;
        let mut tree = SchemaTree::new();

        for schema in catalog.list_schemas().await? {
            tree.ensure_schema(&schema.name);
        }

        for info in catalog.list_all_columns().await? {
            tree.ensure_table(&info.schema, &info.table)
                .columns
                .push(ColumnNode::from_catalog(&info));
        }

        match catalog.list_spatial_columns(None, None).await {
            Ok(spatial) => attach_spatial(&mut tree, &spatial),
            Err(e) => {
                tracing::warn!(error = %e, "spatial catalog views unavailable, loading without SRID info");
            }
        }

        tracing::info!(
            schemas = tree.schemas.len(),
            tables = tree.table_count(),
            columns = tree.column_count(),
            "schema metadata loaded"
        );
        Ok(tree)
    }

    /// Columns of one table in ordinal order, with spatial attributes
    #[tracing::instrument(skip(self))]
    pub async fn load_table_columns(&self, schema: &str, table: &str) -> SchemaResult<Vec<ColumnNode>> {
        let catalog = self.introspection()?;
        let mut columns: Vec<ColumnNode> = catalog
            .get_columns(schema, table)
            .await?
            .iter()
            .map(ColumnNode::from_catalog)
            .collect();

        if columns.iter().any(|c| is_spatial_type(&c.udt_name)) {
            match catalog.list_spatial_columns(Some(schema), Some(table)).await {
                Ok(spatial) => {
                    for info in &spatial {
                        if let Some(column) = columns.iter_mut().find(|c| c.name == info.column) {
                            column.attach_spatial(info);
                        }
                    }
                }
                Err(e) => tracing::warn!(error = %e, schema, table, "could not read spatial columns"),
            }
        }
        Ok(columns)
    }

    /// Columns that can be selected into a grid: everything except
    /// geometry and geography columns
    pub async fn load_selectable_columns(
        &self,
        schema: &str,
        table: &str,
    ) -> SchemaResult<Vec<ColumnInfo>> {
        let columns = self.introspection()?.get_columns(schema, table).await?;
        Ok(columns.into_iter().filter(|c| !c.is_spatial()).collect())
    }

    /// Primary key columns in key order; empty when the table has none
    pub async fn load_primary_key_columns(
        &self,
        schema: &str,
        table: &str,
    ) -> SchemaResult<Vec<String>> {
        Ok(self.introspection()?.get_primary_key(schema, table).await?)
    }

    pub async fn load_spatial_columns(
        &self,
        schema: &str,
        table: &str,
    ) -> SchemaResult<Vec<SpatialColumnInfo>> {
        Ok(self
            .introspection()?
            .list_spatial_columns(Some(schema), Some(table))
            .await?)
    }

    pub async fn load_schema_names(&self) -> SchemaResult<Vec<String>> {
        let schemas = self.introspection()?.list_schemas().await?;
        Ok(schemas.into_iter().map(|s| s.name).collect())
    }

    /// Names of the base tables in `schema` (views excluded)
    pub async fn load_base_tables(&self, schema: &str) -> SchemaResult<Vec<String>> {
        let tables = self.introspection()?.list_tables(schema).await?;
        Ok(tables
            .into_iter()
            .filter(|t| t.table_type.is_base_table())
            .map(|t| t.name)
            .collect())
    }
}

fn is_spatial_type(udt_name: &str) -> bool {
    udt_name.eq_ignore_ascii_case("geometry") || udt_name.eq_ignore_ascii_case("geography")
}

fn attach_spatial(tree: &mut SchemaTree, spatial: &[SpatialColumnInfo]) {
    for info in spatial {
        if let Some(column) = tree.column_mut(&info.schema, &info.table, &info.column) {
            column.attach_spatial(info);
        }
    }
}
