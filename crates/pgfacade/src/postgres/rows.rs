//! Row decoding.
//!
//! Every column is decoded to JSON by its PostgreSQL type. Types without a
//! natural JSON form (numeric, dates, uuid, bytea) become strings; types this
//! module does not know decode to `null`.
//!
//! Numeric values are rendered from the wire digits, so `NaN`, `Infinity`
//! and values of any precision survive. Infinite dates and timestamps become
//! `"infinity"` and `"-infinity"`.

use std::error::Error as StdError;
use std::fmt::Write as _;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, Utc};
use serde_json::Value;
use tokio_postgres::Row as PgRow;
use tokio_postgres::types::{FromSql, Kind, Type};
use uuid::Uuid;

use crate::error::DriverError;
use crate::query::Row;

/// Decode a driver row into a JSON row, keeping column order.
pub(crate) fn decode_row(row: &PgRow) -> Result<Row, DriverError> {
    let mut out = Row::new();
    for (idx, column) in row.columns().iter().enumerate() {
        let value = decode_column(row, idx, column.type_()).map_err(|e| DriverError::Decode {
            column: column.name().to_string(),
            message: e.to_string(),
        })?;
        out.insert(column.name().to_string(), value);
    }
    Ok(out)
}

fn decode_column(row: &PgRow, idx: usize, ty: &Type) -> Result<Value, tokio_postgres::Error> {
    match *ty {
        Type::BOOL => scalar(row, idx, Value::Bool),
        Type::INT2 => scalar(row, idx, |v: i16| Value::from(v)),
        Type::INT4 => scalar(row, idx, |v: i32| Value::from(v)),
        Type::INT8 => scalar(row, idx, |v: i64| Value::from(v)),
        Type::OID => scalar(row, idx, |v: u32| Value::from(v)),
        Type::FLOAT4 => scalar(row, idx, |v: f32| Value::from(v)),
        Type::FLOAT8 => scalar(row, idx, |v: f64| Value::from(v)),
        Type::NUMERIC => scalar(row, idx, |v: NumericText| Value::String(v.0)),
        Type::TEXT | Type::VARCHAR | Type::BPCHAR | Type::NAME | Type::UNKNOWN => {
            scalar(row, idx, Value::String)
        }
        Type::JSON | Type::JSONB => scalar(row, idx, |v: Value| v),
        Type::UUID => scalar(row, idx, uuid),
        Type::DATE => scalar(row, idx, |v: Bounded<NaiveDate>| v.render(date)),
        Type::TIME => scalar(row, idx, time),
        Type::TIMESTAMP => scalar(row, idx, |v: Bounded<NaiveDateTime>| v.render(timestamp)),
        Type::TIMESTAMPTZ => scalar(row, idx, |v: Bounded<DateTime<Utc>>| v.render(timestamptz)),
        Type::BYTEA => scalar(row, idx, |v: Vec<u8>| Value::String(hex(&v))),

        Type::BOOL_ARRAY => array(row, idx, Value::Bool),
        Type::INT2_ARRAY => array(row, idx, |v: i16| Value::from(v)),
        Type::INT4_ARRAY => array(row, idx, |v: i32| Value::from(v)),
        Type::INT8_ARRAY => array(row, idx, |v: i64| Value::from(v)),
        Type::FLOAT4_ARRAY => array(row, idx, |v: f32| Value::from(v)),
        Type::FLOAT8_ARRAY => array(row, idx, |v: f64| Value::from(v)),
        Type::NUMERIC_ARRAY => array(row, idx, |v: NumericText| Value::String(v.0)),
        Type::TEXT_ARRAY | Type::VARCHAR_ARRAY | Type::BPCHAR_ARRAY | Type::NAME_ARRAY => {
            array(row, idx, Value::String)
        }
        Type::JSON_ARRAY | Type::JSONB_ARRAY => array(row, idx, |v: Value| v),
        Type::UUID_ARRAY => array(row, idx, uuid),
        Type::DATE_ARRAY => array(row, idx, |v: Bounded<NaiveDate>| v.render(date)),
        Type::TIMESTAMP_ARRAY => array(row, idx, |v: Bounded<NaiveDateTime>| v.render(timestamp)),
        Type::TIMESTAMPTZ_ARRAY => {
            array(row, idx, |v: Bounded<DateTime<Utc>>| v.render(timestamptz))
        }

        _ => match ty.kind() {
            Kind::Enum(_) => scalar(row, idx, |v: EnumLabel| Value::String(v.0)),
            Kind::Array(member) if matches!(member.kind(), Kind::Enum(_)) => {
                array(row, idx, |v: EnumLabel| Value::String(v.0))
            }
            _ => {
                tracing::debug!(column = idx, ty = %ty, "no JSON mapping for column type, decoding as null");
                Ok(Value::Null)
            }
        },
    }
}

fn scalar<T>(row: &PgRow, idx: usize, f: impl Fn(T) -> Value) -> Result<Value, tokio_postgres::Error>
where
    T: for<'a> FromSql<'a>,
{
    Ok(row.try_get::<_, Option<T>>(idx)?.map_or(Value::Null, f))
}

fn array<T>(row: &PgRow, idx: usize, f: impl Fn(T) -> Value) -> Result<Value, tokio_postgres::Error>
where
    T: for<'a> FromSql<'a>,
{
    Ok(match row.try_get::<_, Option<Vec<Option<T>>>>(idx)? {
        Some(items) => Value::Array(
            items
                .into_iter()
                .map(|item| item.map_or(Value::Null, &f))
                .collect(),
        ),
        None => Value::Null,
    })
}

fn uuid(v: Uuid) -> Value {
    Value::String(v.to_string())
}

fn date(v: NaiveDate) -> Value {
    Value::String(v.format("%Y-%m-%d").to_string())
}

fn time(v: NaiveTime) -> Value {
    Value::String(v.format("%H:%M:%S%.f").to_string())
}

fn timestamp(v: NaiveDateTime) -> Value {
    Value::String(v.format("%Y-%m-%dT%H:%M:%S%.f").to_string())
}

fn timestamptz(v: DateTime<Utc>) -> Value {
    Value::String(v.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

/// Render bytes in PostgreSQL's `\x` hex output format.
fn hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(2 + bytes.len() * 2);
    out.push_str("\\x");
    for b in bytes {
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// A NUMERIC value in its canonical text form.
///
/// Decoded from the binary representation directly: a header of digit
/// count, weight, sign and display scale followed by base-10000 digits.
struct NumericText(String);

const NUMERIC_POS: u16 = 0x0000;
const NUMERIC_NEG: u16 = 0x4000;
const NUMERIC_NAN: u16 = 0xC000;
const NUMERIC_PINF: u16 = 0xD000;
const NUMERIC_NINF: u16 = 0xF000;

impl<'a> FromSql<'a> for NumericText {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn StdError + Sync + Send>> {
        let mut words = raw
            .chunks_exact(2)
            .map(|w| u16::from_be_bytes([w[0], w[1]]));
        let mut next = || words.next().ok_or("truncated numeric value");

        let ndigits = usize::from(next()?);
        let weight = i32::from(next()? as i16);
        let sign = next()?;
        let dscale = usize::from(next()?);

        match sign {
            NUMERIC_POS | NUMERIC_NEG => {}
            NUMERIC_NAN => return Ok(Self("NaN".into())),
            NUMERIC_PINF => return Ok(Self("Infinity".into())),
            NUMERIC_NINF => return Ok(Self("-Infinity".into())),
            other => return Err(format!("invalid numeric sign 0x{other:04x}").into()),
        }

        let digits = (0..ndigits)
            .map(|_| next().and_then(|d| if d < 10_000 { Ok(d) } else { Err("invalid numeric digit") }))
            .collect::<Result<Vec<u16>, _>>()?;
        let digit = |i: i32| usize::try_from(i).ok().and_then(|i| digits.get(i)).copied().unwrap_or(0);

        let mut out = String::new();
        if sign == NUMERIC_NEG {
            out.push('-');
        }
        if weight < 0 {
            out.push('0');
        } else {
            let _ = write!(out, "{}", digit(0));
            for i in 1..=weight {
                let _ = write!(out, "{:04}", digit(i));
            }
        }

        if dscale > 0 {
            let mut fraction = String::with_capacity(dscale + 4);
            let mut i = weight + 1;
            while fraction.len() < dscale {
                let _ = write!(fraction, "{:04}", digit(i));
                i += 1;
            }
            fraction.truncate(dscale);
            out.push('.');
            out.push_str(&fraction);
        }

        Ok(Self(out))
    }

    fn accepts(ty: &Type) -> bool {
        *ty == Type::NUMERIC
    }
}

/// A date or timestamp that may be `infinity` or `-infinity`.
///
/// PostgreSQL stores these as the extreme values of the underlying integer,
/// which chrono cannot represent.
enum Bounded<T> {
    Value(T),
    Infinity,
    NegInfinity,
}

impl<T> Bounded<T> {
    fn render(self, f: impl Fn(T) -> Value) -> Value {
        match self {
            Self::Value(v) => f(v),
            Self::Infinity => Value::String("infinity".into()),
            Self::NegInfinity => Value::String("-infinity".into()),
        }
    }
}

impl<'a, T: FromSql<'a>> FromSql<'a> for Bounded<T> {
    fn from_sql(ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn StdError + Sync + Send>> {
        let (max, min) = match raw.len() {
            4 => (raw == i32::MAX.to_be_bytes(), raw == i32::MIN.to_be_bytes()),
            8 => (raw == i64::MAX.to_be_bytes(), raw == i64::MIN.to_be_bytes()),
            _ => (false, false),
        };
        if max {
            Ok(Self::Infinity)
        } else if min {
            Ok(Self::NegInfinity)
        } else {
            T::from_sql(ty, raw).map(Self::Value)
        }
    }

    fn accepts(ty: &Type) -> bool {
        T::accepts(ty)
    }
}

/// Label of a user-defined enum value.
struct EnumLabel(String);

impl<'a> FromSql<'a> for EnumLabel {
    fn from_sql(_ty: &Type, raw: &'a [u8]) -> Result<Self, Box<dyn StdError + Sync + Send>> {
        Ok(Self(std::str::from_utf8(raw)?.to_string()))
    }

    fn accepts(ty: &Type) -> bool {
        matches!(ty.kind(), Kind::Enum(_))
    }
}
