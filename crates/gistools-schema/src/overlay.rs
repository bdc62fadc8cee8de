//! Field config overlay
//!
//! Persisted `FieldConfig` records are indexed once per load and applied to
//! freshly read columns. `project` produces the records to save back, so
//! applying the projection of a tree reproduces its display attributes.

use std::collections::HashMap;

use gistools_settings::FieldConfig;

use crate::{ColumnDisplay, ColumnNode, SchemaTree, TableNode};

type FieldKey = (String, String, String);

/// Lookup of field configs by `(schema, table, column)`
#[derive(Debug, Clone, Default)]
pub struct FieldConfigIndex {
    records: HashMap<FieldKey, FieldConfig>,
}

impl FieldConfigIndex {
    /// Index `records`; when a key appears twice the last record wins.
    /// Records with a blank key part are dropped.
    pub fn build(records: impl IntoIterator<Item = FieldConfig>) -> Self {
        let mut index = HashMap::new();
        for record in records {
            if !record.has_key() {
                tracing::debug!(?record, "skipping field config without a full key");
                continue;
            }
            let key = (
                record.schema.clone(),
                record.table.clone(),
                record.column.clone(),
            );
            index.insert(key, record);
        }
        Self { records: index }
    }

    pub fn get(&self, schema: &str, table: &str, column: &str) -> Option<&FieldConfig> {
        self.records
            .get(&(schema.to_string(), table.to_string(), column.to_string()))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn non_blank(value: &str) -> Option<&str> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}

/// Overwrite the display attributes of `column` from its matching record.
///
/// Returns whether a record matched. Blank alias falls back to the column
/// name, blank type and default fall back to the database values, and an
/// absent length keeps the current one.
pub fn apply_to_column(
    index: &FieldConfigIndex,
    schema: &str,
    table: &str,
    column: &mut ColumnNode,
) -> bool {
    let Some(record) = index.get(schema, table, &column.name) else {
        return false;
    };
    let database = column.database_display();
    column.display = ColumnDisplay {
        visible: record.visible,
        alias: non_blank(&record.alias)
            .unwrap_or(&column.name)
            .to_string(),
        local_type: non_blank(&record.local_type)
            .map(str::to_string)
            .unwrap_or(database.local_type),
        // A cleared length cannot be told apart from "not saved"
        local_length: record.local_length.or(column.display.local_length),
        local_default: non_blank(&record.local_default)
            .map(str::to_string)
            .unwrap_or(database.local_default),
    };
    true
}

/// Apply the overlay to every column of one table; returns the match count
pub fn apply_to_table(index: &FieldConfigIndex, table: &mut TableNode) -> usize {
    let mut matched = 0;
    for column in table.columns.iter_mut() {
        if apply_to_column(index, &table.schema, &table.name, column) {
            matched += 1;
        }
    }
    matched
}

pub fn apply_to_tree(index: &FieldConfigIndex, tree: &mut SchemaTree) -> usize {
    tree.schemas
        .iter_mut()
        .flat_map(|schema| schema.tables.iter_mut())
        .map(|table| apply_to_table(index, table))
        .sum()
}

/// One record per column with non-blank schema, table and column names
pub fn project(tree: &SchemaTree) -> Vec<FieldConfig> {
    let mut records = Vec::new();
    for schema in tree.schemas.iter().filter(|s| non_blank(&s.name).is_some()) {
        for table in schema.tables.iter().filter(|t| non_blank(&t.name).is_some()) {
            for column in table.columns.iter().filter(|c| non_blank(&c.name).is_some()) {
                records.push(FieldConfig {
                    schema: schema.name.clone(),
                    table: table.name.clone(),
                    column: column.name.clone(),
                    visible: column.display.visible,
                    alias: column.display.alias.clone(),
                    local_type: column.display.local_type.clone(),
                    local_length: column.display.local_length,
                    local_default: column.display.local_default.clone(),
                });
            }
        }
    }
    records
}

#[cfg(test)]
mod tests {
    use super::*;
    use gistools_core::ColumnInfo;
    use pretty_assertions::assert_eq;

    fn column(name: &str, data_type: &str, max_length: Option<i32>, default: Option<&str>) -> ColumnNode {
        ColumnNode::from_catalog(&ColumnInfo {
            schema: "geo".into(),
            table: "parcels".into(),
            name: name.into(),
            ordinal: 1,
            data_type: data_type.into(),
            udt_name: data_type.into(),
            nullable: true,
            default_value: default.map(str::to_string),
            max_length,
        })
    }

    fn parcels_tree() -> SchemaTree {
        let mut tree = SchemaTree::new();
        tree.ensure_table("geo", "parcels").replace_columns(vec![
            column("id", "integer", None, Some("nextval('parcels_id_seq')")),
            column("owner", "character varying", Some(80), None),
            column("geom", "USER-DEFINED", None, None),
        ]);
        tree.ensure_table("geo", "roads")
            .replace_columns(vec![column("name", "text", None, None)]);
        tree
    }

    #[test]
    fn matching_record_overrides_display() {
        let index = FieldConfigIndex::build([FieldConfig {
            visible: false,
            alias: "Shape".into(),
            ..FieldConfig::new("geo", "parcels", "geom")
        }]);
        let mut geom = column("geom", "USER-DEFINED", None, None);

        assert!(apply_to_column(&index, "geo", "parcels", &mut geom));
        assert!(!geom.display.visible);
        assert_eq!(geom.display.alias, "Shape");
        assert_eq!(geom.display.local_type, "USER-DEFINED");
        assert_eq!(geom.display.local_default, "");
    }

    #[test]
    fn blank_overrides_fall_back_to_database_values() {
        let index = FieldConfigIndex::build([FieldConfig {
            alias: "  ".into(),
            local_type: String::new(),
            local_length: None,
            local_default: String::new(),
            ..FieldConfig::new("geo", "parcels", "owner")
        }]);
        let mut owner = column("owner", "character varying", Some(80), Some("'n/a'"));
        let before = owner.display.clone();

        apply_to_column(&index, "geo", "parcels", &mut owner);
        assert_eq!(owner.display, before);
    }

    #[test]
    fn unmatched_columns_are_untouched() {
        let index = FieldConfigIndex::build([FieldConfig::new("geo", "roads", "geom")]);
        let mut geom = column("geom", "USER-DEFINED", None, None);
        geom.display.alias = "edited".into();

        assert!(!apply_to_column(&index, "geo", "parcels", &mut geom));
        assert_eq!(geom.display.alias, "edited");
    }

    #[test]
    fn last_duplicate_wins() {
        let index = FieldConfigIndex::build([
            FieldConfig {
                alias: "first".into(),
                ..FieldConfig::new("geo", "parcels", "id")
            },
            FieldConfig {
                alias: "second".into(),
                ..FieldConfig::new("geo", "parcels", "id")
            },
        ]);
        assert_eq!(index.len(), 1);
        assert_eq!(
            index.get("geo", "parcels", "id").map(|r| r.alias.as_str()),
            Some("second")
        );
    }

    #[test]
    fn records_without_a_full_key_are_dropped() {
        let index = FieldConfigIndex::build([
            FieldConfig::new("geo", " ", "id"),
            FieldConfig::new("", "parcels", "id"),
            FieldConfig::new("geo", "parcels", "id"),
        ]);
        assert_eq!(index.len(), 1);
        assert!(index.get("geo", " ", "id").is_none());
    }

    #[test]
    fn applying_twice_is_idempotent() {
        let index = FieldConfigIndex::build([FieldConfig {
            alias: "Owner".into(),
            local_type: "varchar".into(),
            local_length: Some(120),
            local_default: "'unknown'".into(),
            ..FieldConfig::new("geo", "parcels", "owner")
        }]);
        let mut tree = parcels_tree();
        apply_to_tree(&index, &mut tree);
        let once = tree.clone();
        apply_to_tree(&index, &mut tree);
        assert_eq!(tree, once);
    }

    #[test]
    fn projection_round_trips_onto_a_fresh_tree() {
        let mut edited = parcels_tree();
        if let Some(geom) = edited.column_mut("geo", "parcels", "geom") {
            geom.display.visible = false;
            geom.display.alias = "Shape".into();
        }
        if let Some(owner) = edited.column_mut("geo", "parcels", "owner") {
            owner.display.local_type = "varchar".into();
            owner.display.local_length = Some(120);
            owner.display.local_default = "'unknown'".into();
        }
        let records = project(&edited);
        assert_eq!(records.len(), 4);

        let mut fresh = parcels_tree();
        let matched = apply_to_tree(&FieldConfigIndex::build(records), &mut fresh);
        assert_eq!(matched, 4);
        assert_eq!(fresh, edited);
    }

    #[test]
    fn projection_skips_blank_names() {
        let mut tree = parcels_tree();
        tree.ensure_table("geo", " ")
            .replace_columns(vec![column("x", "text", None, None)]);
        tree.ensure_table("geo", "blank_column")
            .replace_columns(vec![column("", "text", None, None)]);
        assert_eq!(project(&tree).len(), 4);
    }
}
