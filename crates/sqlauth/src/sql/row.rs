//! Schema-less user rows.

use std::fmt;

use sqlx::mysql::MySqlRow;
use sqlx::postgres::PgRow;
use sqlx::sqlite::SqliteRow;
use sqlx::types::JsonValue;
use sqlx::types::Uuid;
use sqlx::types::chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::{Column, ColumnIndex, Decode, Row, TypeInfo, ValueRef};

/// A single column value as returned by the driver.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Null,
    Text(String),
    Integer(i64),
    Real(f64),
    Boolean(bool),
    Bytes(Vec<u8>),
}

impl ColumnValue {
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Textual form used for attributes, or `None` for null.
    ///
    /// Booleans render as `"1"`/`"0"` so that drivers with a native boolean
    /// type agree with those storing flags as integers.
    pub fn to_text(&self) -> Option<String> {
        match self {
            Self::Null => None,
            Self::Text(s) => Some(s.clone()),
            Self::Integer(i) => Some(i.to_string()),
            Self::Real(f) => Some(f.to_string()),
            Self::Boolean(b) => Some(if *b { "1" } else { "0" }.to_string()),
            Self::Bytes(b) => Some(String::from_utf8_lossy(b).into_owned()),
        }
    }
}

impl fmt::Display for ColumnValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_text() {
            Some(s) => f.write_str(&s),
            None => f.write_str("NULL"),
        }
    }
}

impl From<&str> for ColumnValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for ColumnValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for ColumnValue {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl From<f64> for ColumnValue {
    fn from(f: f64) -> Self {
        Self::Real(f)
    }
}

impl From<bool> for ColumnValue {
    fn from(b: bool) -> Self {
        Self::Boolean(b)
    }
}

impl<T: Into<ColumnValue>> From<Option<T>> for ColumnValue {
    fn from(v: Option<T>) -> Self {
        v.map_or(Self::Null, Into::into)
    }
}

/// One matched database row, columns kept in driver order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserRow {
    columns: Vec<(String, ColumnValue)>,
}

impl UserRow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: append a column.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<ColumnValue>) -> Self {
        self.push(name, value);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<ColumnValue>) {
        self.columns.push((name.into(), value.into()));
    }

    /// Value of the first column called `name`.
    pub fn get(&self, name: &str) -> Option<&ColumnValue> {
        self.columns
            .iter()
            .find(|(column, _)| column == name)
            .map(|(_, value)| value)
    }

    #[inline]
    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ColumnValue)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Build a row from any driver row, reading column names at runtime.
    fn from_row<R: Row>(
        row: &R,
        decode: fn(&R, usize) -> Result<ColumnValue, sqlx::Error>,
    ) -> Result<Self, sqlx::Error> {
        let mut out = Self::new();
        for (idx, column) in row.columns().iter().enumerate() {
            out.push(column.name(), decode(row, idx)?);
        }
        Ok(out)
    }

    pub(crate) fn from_sqlite_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        Self::from_row(row, decode_sqlite)
    }

    pub(crate) fn from_pg_row(row: &PgRow) -> Result<Self, sqlx::Error> {
        Self::from_row(row, decode_postgres)
    }

    pub(crate) fn from_mysql_row(row: &MySqlRow) -> Result<Self, sqlx::Error> {
        Self::from_row(row, decode_mysql)
    }
}

/// Uppercase type name of a column value, `None` for SQL NULL.
fn value_type<R>(row: &R, idx: usize) -> Result<Option<String>, sqlx::Error>
where
    R: Row,
    usize: ColumnIndex<R>,
{
    let raw = row.try_get_raw(idx)?;
    if raw.is_null() {
        return Ok(None);
    }
    Ok(Some(raw.type_info().name().to_ascii_uppercase()))
}

/// Text when the value is valid UTF-8, raw bytes otherwise.
fn text_or_bytes<R>(row: &R, idx: usize) -> Result<ColumnValue, sqlx::Error>
where
    R: Row,
    usize: ColumnIndex<R>,
    for<'r> String: Decode<'r, R::Database>,
    for<'r> Vec<u8>: Decode<'r, R::Database>,
{
    match row.try_get_unchecked::<String, _>(idx) {
        Ok(text) => Ok(ColumnValue::Text(text)),
        Err(_) => row
            .try_get_unchecked::<Vec<u8>, _>(idx)
            .map(ColumnValue::Bytes),
    }
}

#[inline]
fn display(value: impl fmt::Display) -> ColumnValue {
    ColumnValue::Text(value.to_string())
}

fn unsigned(value: u64) -> ColumnValue {
    i64::try_from(value).map_or_else(|_| display(value), ColumnValue::Integer)
}

// SQLite reports the storage class of the value; declared column types such
// as DATETIME or BOOLEAN only exist as affinities.
fn decode_sqlite(row: &SqliteRow, idx: usize) -> Result<ColumnValue, sqlx::Error> {
    let Some(ty) = value_type(row, idx)? else {
        return Ok(ColumnValue::Null);
    };
    Ok(match ty.as_str() {
        "INTEGER" => ColumnValue::Integer(row.try_get_unchecked(idx)?),
        "REAL" => ColumnValue::Real(row.try_get_unchecked(idx)?),
        "BLOB" => ColumnValue::Bytes(row.try_get_unchecked(idx)?),
        _ => text_or_bytes(row, idx)?,
    })
}

fn decode_postgres(row: &PgRow, idx: usize) -> Result<ColumnValue, sqlx::Error> {
    let Some(ty) = value_type(row, idx)? else {
        return Ok(ColumnValue::Null);
    };
    Ok(match ty.as_str() {
        "BOOL" => ColumnValue::Boolean(row.try_get_unchecked(idx)?),
        "INT2" => ColumnValue::Integer(row.try_get_unchecked::<i16, _>(idx)?.into()),
        "INT4" => ColumnValue::Integer(row.try_get_unchecked::<i32, _>(idx)?.into()),
        "INT8" => ColumnValue::Integer(row.try_get_unchecked(idx)?),
        "FLOAT4" => display(row.try_get_unchecked::<f32, _>(idx)?),
        "FLOAT8" => ColumnValue::Real(row.try_get_unchecked(idx)?),
        "NUMERIC" => {
            let raw: Vec<u8> = row.try_get_unchecked(idx)?;
            let text = pg_numeric_text(&raw).ok_or_else(|| sqlx::Error::ColumnDecode {
                index: idx.to_string(),
                source: "malformed NUMERIC value".into(),
            })?;
            ColumnValue::Text(text)
        }
        "DATE" => display(row.try_get_unchecked::<NaiveDate, _>(idx)?),
        "TIME" => display(row.try_get_unchecked::<NaiveTime, _>(idx)?),
        "TIMESTAMP" => display(row.try_get_unchecked::<NaiveDateTime, _>(idx)?),
        "TIMESTAMPTZ" => display(row.try_get_unchecked::<DateTime<Utc>, _>(idx)?.to_rfc3339()),
        "UUID" => display(row.try_get_unchecked::<Uuid, _>(idx)?),
        "JSON" | "JSONB" => display(row.try_get_unchecked::<JsonValue, _>(idx)?),
        "BYTEA" => ColumnValue::Bytes(row.try_get_unchecked(idx)?),
        _ => text_or_bytes(row, idx)?,
    })
}

fn decode_mysql(row: &MySqlRow, idx: usize) -> Result<ColumnValue, sqlx::Error> {
    let Some(ty) = value_type(row, idx)? else {
        return Ok(ColumnValue::Null);
    };
    Ok(match ty.as_str() {
        "BOOLEAN" => ColumnValue::Boolean(row.try_get_unchecked(idx)?),
        "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => {
            ColumnValue::Integer(row.try_get_unchecked(idx)?)
        }
        "TINYINT UNSIGNED" | "SMALLINT UNSIGNED" | "MEDIUMINT UNSIGNED" | "INT UNSIGNED"
        | "BIGINT UNSIGNED" | "YEAR" => unsigned(row.try_get_unchecked(idx)?),
        "FLOAT" => display(row.try_get_unchecked::<f32, _>(idx)?),
        "DOUBLE" => ColumnValue::Real(row.try_get_unchecked(idx)?),
        "DATE" => display(row.try_get_unchecked::<NaiveDate, _>(idx)?),
        "TIME" => display(row.try_get_unchecked::<NaiveTime, _>(idx)?),
        "DATETIME" | "TIMESTAMP" => display(row.try_get_unchecked::<NaiveDateTime, _>(idx)?),
        "BINARY" | "VARBINARY" | "BLOB" | "TINYBLOB" | "MEDIUMBLOB" | "LONGBLOB" | "BIT"
        | "GEOMETRY" => ColumnValue::Bytes(row.try_get_unchecked(idx)?),
        // DECIMAL, ENUM, SET and JSON arrive as strings
        _ => text_or_bytes(row, idx)?,
    })
}

/// Render a PostgreSQL binary NUMERIC as decimal text.
///
/// Layout: ndigits, weight, sign, dscale (all 16-bit big endian), followed by
/// `ndigits` base-10000 digits. `weight` is the power of 10000 of the first
/// digit.
fn pg_numeric_text(buf: &[u8]) -> Option<String> {
    let word = |offset: usize| {
        buf.get(offset..offset + 2)
            .map(|b| u16::from_be_bytes([b[0], b[1]]))
    };
    let ndigits = usize::from(word(0)?);
    let weight = i32::from(word(2)? as i16);
    let sign = word(4)?;
    let dscale = usize::from(word(6)?);
    let digits = (0..ndigits)
        .map(|i| word(8 + 2 * i))
        .collect::<Option<Vec<u16>>>()?;

    match sign {
        0x0000 | 0x4000 => {}
        0xC000 => return Some("NaN".to_string()),
        0xD000 => return Some("Infinity".to_string()),
        0xF000 => return Some("-Infinity".to_string()),
        _ => return None,
    }

    let digit = |i: i32| {
        usize::try_from(i)
            .ok()
            .and_then(|i| digits.get(i).copied())
            .unwrap_or(0)
    };

    let mut out = String::new();
    if sign == 0x4000 {
        out.push('-');
    }
    if weight < 0 {
        out.push('0');
    } else {
        out.push_str(&digit(0).to_string());
        for i in 1..=weight {
            out.push_str(&format!("{:04}", digit(i)));
        }
    }

    if dscale > 0 {
        let mut fraction = String::new();
        let mut i = weight + 1;
        while fraction.len() < dscale {
            fraction.push_str(&format!("{:04}", digit(i)));
            i += 1;
        }
        fraction.truncate(dscale);
        out.push('.');
        out.push_str(&fraction);
    }
    Some(out)
}
