//! Typed parsing of grid cell text

use gistools_core::Value;

/// Parse cell text using the column's underlying type (`udt_name`).
///
/// `NULL` (any case) is a SQL NULL; an empty cell is an empty string for
/// text columns and NULL otherwise. Values the type cannot parse stay text
/// and are left for the server to reject.
pub fn parse_cell(text: &str, column_type: &str) -> Value {
    let column_type = column_type.trim().to_lowercase();

    if text.eq_ignore_ascii_case("null") {
        return Value::Null;
    }
    if text.is_empty() {
        return if is_string_type(&column_type) {
            Value::String(String::new())
        } else {
            Value::Null
        };
    }

    if is_string_type(&column_type) {
        return Value::String(text.to_string());
    }

    let trimmed = text.trim();
    if is_boolean_type(&column_type) {
        return match trimmed.to_lowercase().as_str() {
            "true" | "t" | "1" | "yes" => Value::Bool(true),
            "false" | "f" | "0" | "no" => Value::Bool(false),
            _ => Value::String(text.to_string()),
        };
    }

    if is_integer_type(&column_type) {
        return match trimmed.parse::<i64>() {
            Ok(v) => match i32::try_from(v) {
                Ok(small) => Value::Int32(small),
                Err(_) => Value::Int64(v),
            },
            Err(_) => Value::String(text.to_string()),
        };
    }

    if is_float_type(&column_type) {
        return match trimmed.parse::<f64>() {
            Ok(v) => Value::Float64(v),
            Err(_) => Value::String(text.to_string()),
        };
    }

    if is_decimal_type(&column_type) {
        return if is_decimal_literal(trimmed) {
            Value::Decimal(trimmed.to_string())
        } else {
            Value::String(text.to_string())
        };
    }

    // Dates, timestamps, uuids, json: the driver converts text by parameter type
    Value::String(text.to_string())
}

pub fn is_string_type(column_type: &str) -> bool {
    matches!(
        column_type,
        "text"
            | "varchar"
            | "char"
            | "bpchar"
            | "name"
            | "citext"
            | "character varying"
            | "character"
    )
}

fn is_boolean_type(column_type: &str) -> bool {
    matches!(column_type, "bool" | "boolean")
}

fn is_integer_type(column_type: &str) -> bool {
    matches!(
        column_type,
        "int2" | "int4" | "int8" | "smallint" | "integer" | "bigint" | "int"
    )
}

fn is_float_type(column_type: &str) -> bool {
    matches!(column_type, "float4" | "float8" | "real" | "double precision")
}

fn is_decimal_type(column_type: &str) -> bool {
    matches!(column_type, "numeric" | "decimal" | "money")
}

/// `[+-]digits[.digits]` or `NaN`; no exponents or infinities
fn is_decimal_literal(text: &str) -> bool {
    if text.eq_ignore_ascii_case("nan") {
        return true;
    }
    let unsigned = text.strip_prefix(['-', '+']).unwrap_or(text);
    let (integer, fraction) = unsigned.split_once('.').unwrap_or((unsigned, ""));
    let digits = |part: &str| part.chars().all(|c| c.is_ascii_digit());
    !(integer.is_empty() && fraction.is_empty()) && digits(integer) && digits(fraction)
}
