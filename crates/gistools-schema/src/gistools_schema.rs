//! gistools schema - live metadata tree with a local display overlay
//!
//! This crate provides:
//! - The schema / table / column tree (`SchemaTree`)
//! - `MetadataLoader`, which builds the tree from catalog views
//! - The field config overlay: `FieldConfigIndex`, `apply_*` and `project`

mod error;
mod loader;
mod model;
mod overlay;

pub use error::{SchemaError, SchemaResult};
pub use loader::MetadataLoader;
pub use model::{ColumnDisplay, ColumnNode, SchemaNode, SchemaTree, SpatialAttributes, TableNode};
pub use overlay::{FieldConfigIndex, apply_to_column, apply_to_table, apply_to_tree, project};

// Re-export the persisted overlay record so callers need one import
pub use gistools_settings::FieldConfig;
