//! Schema / table / column tree
//!
//! Database attributes are read-only and replaced wholesale on reload.
//! Display attributes start from the database values and are overwritten
//! by the overlay.

use gistools_core::{ColumnInfo, SpatialColumnInfo, SpatialKind};
use serde::Serialize;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SchemaTree {
    pub schemas: Vec<SchemaNode>,
}

impl SchemaTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.schemas.is_empty()
    }

    pub fn schema(&self, name: &str) -> Option<&SchemaNode> {
        self.schemas.iter().find(|s| s.name == name)
    }

    pub fn schema_mut(&mut self, name: &str) -> Option<&mut SchemaNode> {
        self.schemas.iter_mut().find(|s| s.name == name)
    }

    /// Case-insensitive schema lookup
    pub fn has_schema_ci(&self, name: &str) -> bool {
        self.schemas.iter().any(|s| s.name.eq_ignore_ascii_case(name))
    }

    /// Get the schema node, appending it when it has not been seen yet
    pub fn ensure_schema(&mut self, name: &str) -> &mut SchemaNode {
        let index = match self.schemas.iter().position(|s| s.name == name) {
            Some(index) => index,
            None => {
                self.schemas.push(SchemaNode::new(name));
                self.schemas.len() - 1
            }
        };
        &mut self.schemas[index]
    }

    pub fn table(&self, schema: &str, table: &str) -> Option<&TableNode> {
        self.schema(schema).and_then(|s| s.table(table))
    }

    pub fn table_mut(&mut self, schema: &str, table: &str) -> Option<&mut TableNode> {
        self.schema_mut(schema).and_then(|s| s.table_mut(table))
    }

    pub fn ensure_table(&mut self, schema: &str, table: &str) -> &mut TableNode {
        self.ensure_schema(schema).ensure_table(table)
    }

    pub fn column(&self, schema: &str, table: &str, column: &str) -> Option<&ColumnNode> {
        self.table(schema, table).and_then(|t| t.column(column))
    }

    pub fn column_mut(
        &mut self,
        schema: &str,
        table: &str,
        column: &str,
    ) -> Option<&mut ColumnNode> {
        self.table_mut(schema, table)
            .and_then(|t| t.column_mut(column))
    }

    pub fn table_count(&self) -> usize {
        self.schemas.iter().map(|s| s.tables.len()).sum()
    }

    pub fn column_count(&self) -> usize {
        self.schemas
            .iter()
            .flat_map(|s| s.tables.iter())
            .map(|t| t.columns.len())
            .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaNode {
    pub name: String,
    pub tables: Vec<TableNode>,
}

impl SchemaNode {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            tables: Vec::new(),
        }
    }

    pub fn table(&self, name: &str) -> Option<&TableNode> {
        self.tables.iter().find(|t| t.name == name)
    }

    pub fn table_mut(&mut self, name: &str) -> Option<&mut TableNode> {
        self.tables.iter_mut().find(|t| t.name == name)
    }

    pub fn ensure_table(&mut self, name: &str) -> &mut TableNode {
        let index = match self.tables.iter().position(|t| t.name == name) {
            Some(index) => index,
            None => {
                self.tables.push(TableNode::new(&self.name, name));
                self.tables.len() - 1
            }
        };
        &mut self.tables[index]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableNode {
    pub schema: String,
    pub name: String,
    pub columns: Vec<ColumnNode>,
}

impl TableNode {
    pub fn new(schema: &str, name: &str) -> Self {
        Self {
            schema: schema.to_string(),
            name: name.to_string(),
            columns: Vec::new(),
        }
    }

    pub fn column(&self, name: &str) -> Option<&ColumnNode> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_mut(&mut self, name: &str) -> Option<&mut ColumnNode> {
        self.columns.iter_mut().find(|c| c.name == name)
    }

    pub fn has_column_ci(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name.eq_ignore_ascii_case(name))
    }

    pub fn replace_columns(&mut self, columns: Vec<ColumnNode>) {
        self.columns = columns;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ColumnNode {
    pub name: String,
    /// `information_schema.columns.data_type`
    pub data_type: String,
    pub udt_name: String,
    pub nullable: bool,
    pub max_length: Option<i32>,
    pub default_value: Option<String>,
    /// Present when PostGIS registers the column in `geometry_columns` / `geography_columns`
    pub spatial: Option<SpatialAttributes>,
    pub display: ColumnDisplay,
}

impl ColumnNode {
    pub fn from_catalog(info: &ColumnInfo) -> Self {
        Self {
            name: info.name.clone(),
            data_type: info.data_type.clone(),
            udt_name: info.udt_name.clone(),
            nullable: info.nullable,
            max_length: info.max_length,
            default_value: info.default_value.clone(),
            spatial: None,
            display: ColumnDisplay::from_database(
                &info.name,
                &info.data_type,
                info.max_length,
                info.default_value.as_deref(),
            ),
        }
    }

    /// The display attributes a column has before any overlay is applied
    pub fn database_display(&self) -> ColumnDisplay {
        ColumnDisplay::from_database(
            &self.name,
            &self.data_type,
            self.max_length,
            self.default_value.as_deref(),
        )
    }

    pub fn attach_spatial(&mut self, info: &SpatialColumnInfo) {
        self.spatial = Some(SpatialAttributes {
            geometry_type: info.geometry_type.clone(),
            srid: info.srid,
            kind: info.kind,
        });
    }
}

/// Transient PostGIS attributes of a spatial column
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpatialAttributes {
    pub geometry_type: String,
    pub srid: i32,
    pub kind: SpatialKind,
}

impl SpatialAttributes {
    pub fn is_geography(&self) -> bool {
        self.kind == SpatialKind::Geography
    }
}

/// Locally editable display attributes of a column
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ColumnDisplay {
    pub visible: bool,
    pub alias: String,
    pub local_type: String,
    pub local_length: Option<i32>,
    pub local_default: String,
}

impl ColumnDisplay {
    pub fn from_database(
        column: &str,
        data_type: &str,
        max_length: Option<i32>,
        default_value: Option<&str>,
    ) -> Self {
        Self {
            visible: true,
            alias: column.to_string(),
            local_type: data_type.to_string(),
            local_length: max_length,
            local_default: default_value.unwrap_or_default().to_string(),
        }
    }
}
