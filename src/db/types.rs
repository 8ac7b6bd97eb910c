//! Database-agnostic type mappings.
//!
//! Column types come back from metadata queries as raw strings
//! (`character varying`, `bigint unsigned`, `DECIMAL(10,2)`). They are kept
//! verbatim on the column node and classified here into a [`TypeTag`].

use crate::models::{DialectKind, TypeTag};

/// Classify a raw database type name.
pub fn normalize_type(raw: &str, kind: DialectKind) -> TypeTag {
    let lower = raw.trim().to_lowercase();
    // Strip length/precision and array markers: `varchar(30)`, `int4[]`
    let base = lower
        .split('(')
        .next()
        .unwrap_or_default()
        .trim_end_matches("[]")
        .trim();

    if base.is_empty() {
        // SQLite columns may be declared without a type
        return TypeTag::Other;
    }

    // Types whose names would trip the substring checks below
    if base.starts_with("interval") || base == "point" || base.contains("range") {
        return TypeTag::Other;
    }

    // Decimal/Numeric - check first as it overlaps with "numeric" in float checks
    if base.contains("decimal") || base.contains("numeric") || base == "money" {
        // SQLite's NUMERIC is an affinity, not an exact type
        if kind == DialectKind::SQLite && base == "numeric" {
            return TypeTag::Float;
        }
        return TypeTag::Decimal;
    }

    if base == "bool" || base == "boolean" || base == "bit" {
        return TypeTag::Boolean;
    }

    if base.contains("int") || base.contains("serial") {
        return TypeTag::Integer;
    }

    if base.contains("float") || base.contains("double") || base == "real" {
        return TypeTag::Float;
    }

    if base == "json" || base == "jsonb" {
        return TypeTag::Json;
    }

    if base == "uuid" || base == "uniqueidentifier" {
        return TypeTag::Uuid;
    }

    if base.contains("blob") || base.contains("binary") || base == "bytea" {
        return TypeTag::Binary;
    }

    if base.starts_with("timestamp") || base.starts_with("datetime") {
        return TypeTag::Timestamp;
    }
    if base == "date" {
        return TypeTag::Date;
    }
    if base.starts_with("time") {
        return TypeTag::Time;
    }

    if base.contains("char")
        || base.contains("text")
        || base.contains("clob")
        || base == "string"
        || base == "name"
        || base == "citext"
        || base == "enum"
        || base == "set"
    {
        return TypeTag::Text;
    }

    TypeTag::Other
}
