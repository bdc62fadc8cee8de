//! DDL statement text
//!
//! Every identifier is quoted; lengths and SRIDs are integers before they
//! reach the statement text.

use std::str::FromStr;

use gistools_core::SpatialKind;
use strum::IntoEnumIterator;

use crate::error::{ServiceError, ServiceResult};

/// Column types offered when adding a field
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Default,
    strum::EnumString,
    strum::Display,
    strum::EnumIter,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum FieldType {
    #[default]
    Text,
    Varchar,
    Int,
    Bigint,
    Numeric,
    Boolean,
    Date,
    Timestamp,
}

impl FieldType {
    /// Parse a user-supplied type name; blank means `text`
    pub fn parse(input: &str) -> ServiceResult<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Ok(FieldType::Text);
        }
        FieldType::from_str(input).map_err(|_| {
            ServiceError::ValidationFailed(format!(
                "Unsupported field type '{}'; expected one of: {}",
                input,
                Self::names().join(", ")
            ))
        })
    }

    pub fn names() -> Vec<&'static str> {
        FieldType::iter().map(<&'static str>::from).collect()
    }
}

/// A validated new-column definition
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldSpec {
    pub name: String,
    pub field_type: FieldType,
    pub length: Option<u32>,
}

impl FieldSpec {
    /// Validate raw input: the name is trimmed and must be non-blank, the type
    /// must be in the allow-list, and a supplied length must be a positive integer.
    pub fn parse(name: &str, field_type: &str, length: Option<&str>) -> ServiceResult<Self> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ServiceError::ValidationFailed(
                "Field name is required".to_string(),
            ));
        }

        let length = match length.map(str::trim).filter(|l| !l.is_empty()) {
            None => None,
            Some(raw) => match raw.parse::<u32>() {
                Ok(value) if value > 0 && value <= i32::MAX as u32 => Some(value),
                _ => {
                    return Err(ServiceError::ValidationFailed(format!(
                        "Field length must be a positive integer, got '{}'",
                        raw
                    )));
                }
            },
        };

        Ok(Self {
            name: name.to_string(),
            field_type: FieldType::parse(field_type)?,
            length,
        })
    }

    /// `type` or `type(len)`
    pub fn type_definition(&self) -> String {
        match self.length {
            Some(length) => format!("{}({})", self.field_type, length),
            None => self.field_type.to_string(),
        }
    }
}

/// Named coordinate reference systems offered for conversion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinateSystem {
    pub name: &'static str,
    pub srid: i32,
}

impl CoordinateSystem {
    pub const WGS84: CoordinateSystem = CoordinateSystem {
        name: "WGS 84",
        srid: 4326,
    };
    pub const WEB_MERCATOR: CoordinateSystem = CoordinateSystem {
        name: "Web Mercator",
        srid: 3857,
    };
    pub const CGCS2000: CoordinateSystem = CoordinateSystem {
        name: "CGCS2000",
        srid: 4490,
    };

    pub fn presets() -> [CoordinateSystem; 3] {
        [Self::WGS84, Self::WEB_MERCATOR, Self::CGCS2000]
    }

    pub fn by_srid(srid: i32) -> Option<CoordinateSystem> {
        Self::presets().into_iter().find(|crs| crs.srid == srid)
    }

    /// Look up a preset by SRID or (case-insensitive) name
    pub fn find(input: &str) -> Option<CoordinateSystem> {
        let input = input.trim();
        if let Ok(srid) = input.parse::<i32>() {
            return Self::by_srid(srid);
        }
        Self::presets()
            .into_iter()
            .find(|crs| crs.name.eq_ignore_ascii_case(input))
    }
}

/// Builds the DDL statements issued by the schema service
pub struct DdlBuilder;

impl DdlBuilder {
    /// `"` + identifier with `"` doubled + `"`
    pub fn quote_ident(identifier: &str) -> String {
        format!("\"{}\"", identifier.replace('"', "\"\""))
    }

    pub fn qualified_table(schema: &str, table: &str) -> String {
        format!(
            "{}.{}",
            Self::quote_ident(schema),
            Self::quote_ident(table)
        )
    }

    pub fn add_column(schema: &str, table: &str, field: &FieldSpec) -> String {
        format!(
            "ALTER TABLE {} ADD COLUMN {} {}",
            Self::qualified_table(schema, table),
            Self::quote_ident(&field.name),
            field.type_definition()
        )
    }

    pub fn drop_column(schema: &str, table: &str, column: &str) -> String {
        format!(
            "ALTER TABLE {} DROP COLUMN {}",
            Self::qualified_table(schema, table),
            Self::quote_ident(column)
        )
    }

    /// Reproject a geometry or geography column to `srid`
    pub fn alter_spatial_column(
        schema: &str,
        table: &str,
        column: &str,
        geometry_type: &str,
        kind: SpatialKind,
        srid: i32,
    ) -> String {
        let quoted = Self::quote_ident(column);
        let using = match kind {
            SpatialKind::Geometry => format!("ST_Transform({}, {})", quoted, srid),
            SpatialKind::Geography => {
                format!("ST_Transform({}::geometry, {})::geography", quoted, srid)
            }
        };
        format!(
            "ALTER TABLE {} ALTER COLUMN {} TYPE {}({}, {}) USING {}",
            Self::qualified_table(schema, table),
            quoted,
            kind.type_name(),
            sanitize_geometry_type(geometry_type),
            srid,
            using
        )
    }

    pub fn create_schema(schema: &str) -> String {
        format!("CREATE SCHEMA {}", Self::quote_ident(schema))
    }
}

/// PostGIS type modifiers are bare keywords (`POINT`, `MULTIPOLYGONZ`, ...);
/// anything else collapses to the generic `GEOMETRY`.
fn sanitize_geometry_type(geometry_type: &str) -> String {
    let trimmed = geometry_type.trim();
    if !trimmed.is_empty() && trimmed.chars().all(|c| c.is_ascii_alphanumeric()) {
        trimmed.to_ascii_uppercase()
    } else {
        "GEOMETRY".to_string()
    }
}
