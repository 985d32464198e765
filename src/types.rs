//! Column type lattice: the warehouse types a column can be resolved to and
//! the per-value probes that decide whether a raw text value fits each one.
//!
//! Inference walks [`TypeKind::DISCOVERY_ORDER`] and keeps the first kind for
//! which every value of a column probes true. [`TypeKind::Varchar`] accepts
//! anything up to [`MAX_VARCHAR_WIDTH`] bytes and is the universal fallback.
//! Empty values are SQL NULL on load and satisfy every kind.

use std::{borrow::Cow, fmt, str::FromStr, sync::OnceLock};

use anyhow::{Result, anyhow, bail};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

/// Widest VARCHAR the warehouse supports, in bytes.
pub const MAX_VARCHAR_WIDTH: usize = 65535;

/// Width assumed for catalog types that carry no explicit length (`text`).
pub const DEFAULT_VARCHAR_WIDTH: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TypeKind {
    Date,
    TimestampTz,
    Timestamp,
    SmallInt,
    Integer,
    BigInt,
    Double,
    Boolean,
    Varchar,
}

impl TypeKind {
    /// Candidate order for inference; the first kind that fits every value wins.
    pub const DISCOVERY_ORDER: [TypeKind; 9] = [
        TypeKind::Date,
        TypeKind::TimestampTz,
        TypeKind::Timestamp,
        TypeKind::SmallInt,
        TypeKind::Integer,
        TypeKind::BigInt,
        TypeKind::Double,
        TypeKind::Boolean,
        TypeKind::Varchar,
    ];

    pub fn sql_name(&self) -> &'static str {
        match self {
            TypeKind::Date => "DATE",
            TypeKind::TimestampTz => "TIMESTAMPTZ",
            TypeKind::Timestamp => "TIMESTAMP",
            TypeKind::SmallInt => "SMALLINT",
            TypeKind::Integer => "INTEGER",
            TypeKind::BigInt => "BIGINT",
            TypeKind::Double => "DOUBLE PRECISION",
            TypeKind::Boolean => "BOOLEAN",
            TypeKind::Varchar => "VARCHAR",
        }
    }

    pub fn is_integer(&self) -> bool {
        matches!(self, TypeKind::SmallInt | TypeKind::Integer | TypeKind::BigInt)
    }
}

impl fmt::Display for TypeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.sql_name())
    }
}

/// A resolved column type. `width` is only set for VARCHAR and is measured in
/// UTF-8 bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColumnType {
    pub kind: TypeKind,
    pub width: Option<usize>,
}

impl ColumnType {
    pub fn scalar(kind: TypeKind) -> Self {
        debug_assert!(kind != TypeKind::Varchar);
        Self { kind, width: None }
    }

    pub fn varchar(width: usize) -> Self {
        Self {
            kind: TypeKind::Varchar,
            width: Some(width.max(1)),
        }
    }

    pub fn is_varchar(&self) -> bool {
        self.kind == TypeKind::Varchar
    }

    /// Declared VARCHAR width, or zero for every other kind.
    pub fn varchar_width(&self) -> usize {
        if self.is_varchar() {
            self.width.unwrap_or(1)
        } else {
            0
        }
    }

    /// Grows a VARCHAR width to at least `width`. Widths never shrink.
    pub fn widen_to(&mut self, width: usize) {
        if self.is_varchar() {
            self.width = Some(self.varchar_width().max(width).max(1));
        }
    }

    /// Renders a cell for the bulk load. BOOLEAN cells become `true`/`false`
    /// and integral cells drop a zero fractional part; empty cells stay empty.
    pub fn coerce<'a>(&self, value: &'a str) -> Cow<'a, str> {
        if value.is_empty() {
            return Cow::Borrowed(value);
        }
        match self.kind {
            TypeKind::Boolean => match value.to_ascii_lowercase().as_str() {
                "1" | "true" => Cow::Borrowed("true"),
                "0" | "false" => Cow::Borrowed("false"),
                _ => Cow::Borrowed(value),
            },
            kind if kind.is_integer() => Cow::Borrowed(strip_zero_fraction(value)),
            _ => Cow::Borrowed(value),
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TypeKind::Varchar => write!(f, "VARCHAR({})", self.varchar_width()),
            kind => f.write_str(kind.sql_name()),
        }
    }
}

fn length_suffix() -> &'static Regex {
    static LENGTH: OnceLock<Regex> = OnceLock::new();
    LENGTH.get_or_init(|| Regex::new(r"\((\d+)(?:\s*,\s*\d+)?\)").expect("static regex"))
}

impl FromStr for ColumnType {
    type Err = anyhow::Error;

    /// Accepts both caller spellings (`varchar(10)`, `double precision`) and
    /// catalog spellings (`character varying(256)`, `int4`, `float8`).
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim().to_ascii_lowercase();
        let width = length_suffix()
            .captures(&normalized)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().parse::<usize>())
            .transpose()
            .map_err(|err| anyhow!("Invalid length in column type '{value}': {err}"))?;
        let base = match normalized.find('(') {
            Some(idx) => normalized[..idx].trim(),
            None => normalized.as_str(),
        };
        let kind = match base {
            "date" => TypeKind::Date,
            "timestamptz" | "timestamp with time zone" => TypeKind::TimestampTz,
            "timestamp" | "timestamp without time zone" | "datetime" => TypeKind::Timestamp,
            "smallint" | "int2" => TypeKind::SmallInt,
            "integer" | "int" | "int4" => TypeKind::Integer,
            "bigint" | "int8" => TypeKind::BigInt,
            "double precision" | "double" | "float" | "float8" | "float4" | "real"
            | "numeric" | "decimal" => TypeKind::Double,
            "boolean" | "bool" => TypeKind::Boolean,
            "varchar" | "character varying" | "char" | "character" | "nchar" | "bpchar"
            | "nvarchar" | "text" | "string" => TypeKind::Varchar,
            _ => bail!("Unsupported column type '{value}'"),
        };
        if kind == TypeKind::Varchar {
            let width = width.unwrap_or(DEFAULT_VARCHAR_WIDTH);
            if width > MAX_VARCHAR_WIDTH {
                bail!("VARCHAR width {width} exceeds the maximum of {MAX_VARCHAR_WIDTH}");
            }
            Ok(ColumnType::varchar(width))
        } else {
            Ok(ColumnType::scalar(kind))
        }
    }
}

impl Serialize for ColumnType {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ColumnType {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let token = String::deserialize(deserializer)?;
        ColumnType::from_str(&token).map_err(|err| de::Error::custom(err.to_string()))
    }
}

/// Running state carried across one column scan.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeState {
    /// Longest value seen so far, in UTF-8 bytes.
    pub max_width: usize,
}

impl TypeState {
    /// Width the column would need as a VARCHAR (at least 1).
    pub fn varchar_width(&self) -> usize {
        self.max_width.max(1)
    }
}

/// Decides whether `value` is representable as `kind`, updating `state`.
pub fn probe(kind: TypeKind, value: &str, state: &mut TypeState) -> bool {
    if kind == TypeKind::Varchar {
        let width = value.len();
        state.max_width = state.max_width.max(width);
        return width <= MAX_VARCHAR_WIDTH;
    }
    if value.is_empty() {
        return true;
    }
    match kind {
        TypeKind::Date => NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok(),
        TypeKind::TimestampTz => DateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S%z").is_ok(),
        TypeKind::Timestamp => NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S").is_ok(),
        TypeKind::SmallInt => parse_integer(value).is_some_and(|v| i16::try_from(v).is_ok()),
        TypeKind::Integer => parse_integer(value).is_some_and(|v| i32::try_from(v).is_ok()),
        TypeKind::BigInt => parse_integer(value).is_some(),
        TypeKind::Double => value.parse::<f64>().is_ok(),
        TypeKind::Boolean => matches!(
            value.to_ascii_lowercase().as_str(),
            "0" | "1" | "true" | "false"
        ),
        TypeKind::Varchar => unreachable!("handled above"),
    }
}

/// Parses an integer, tolerating a fractional part made only of zeros (`"3.0"`).
pub fn parse_integer(value: &str) -> Option<i64> {
    strip_zero_fraction(value).parse::<i64>().ok()
}

fn strip_zero_fraction(value: &str) -> &str {
    match value.split_once('.') {
        Some((whole, fraction)) if fraction.bytes().all(|b| b == b'0') => whole,
        _ => value,
    }
}
