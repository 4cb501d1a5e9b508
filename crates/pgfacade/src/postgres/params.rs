//! JSON parameter encoding.
//!
//! Parameters arrive as `serde_json::Value`s and are encoded against the
//! type the server inferred for each placeholder. Strings are accepted for
//! any scalar type whose text form parses, so `"42"` binds to an `int4`
//! parameter the same way it would in text mode.

use std::error::Error as StdError;
use std::str::FromStr;

use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime};
use rust_decimal::Decimal;
use serde_json::{Number, Value};
use tokio_postgres::types::{IsNull, Kind, ToSql, Type, to_sql_checked};
use uuid::Uuid;

type BoxError = Box<dyn StdError + Sync + Send>;

/// A JSON value bound as a statement parameter.
#[derive(Debug)]
pub(crate) struct SqlParam<'a>(pub(crate) &'a Value);

impl ToSql for SqlParam<'_> {
    fn to_sql(&self, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
        encode(self.0, ty, out)
    }

    fn accepts(_ty: &Type) -> bool {
        true
    }

    to_sql_checked!();
}

/// Wrap values for binding.
pub(crate) fn bind(values: &[Value]) -> Vec<SqlParam<'_>> {
    values.iter().map(SqlParam).collect()
}

/// Borrow bound values in the form `tokio_postgres` takes.
pub(crate) fn as_refs<'a>(params: &'a [SqlParam<'a>]) -> Vec<&'a (dyn ToSql + Sync)> {
    params.iter().map(|p| p as &(dyn ToSql + Sync)).collect()
}

fn encode(value: &Value, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    if value.is_null() {
        return Ok(IsNull::Yes);
    }
    if matches!(*ty, Type::JSON | Type::JSONB) {
        return value.to_sql(ty, out);
    }

    match (ty.kind(), value) {
        (Kind::Array(_), Value::Array(items)) => bind(items).to_sql(ty, out),
        (Kind::Enum(_), Value::String(label)) => {
            out.extend_from_slice(label.as_bytes());
            Ok(IsNull::No)
        }
        (_, Value::Bool(b)) => encode_bool(*b, ty, out),
        (_, Value::Number(n)) => encode_number(n, ty, out),
        (_, Value::String(s)) => encode_str(s, ty, out),
        _ => Err(mismatch(value, ty)),
    }
}

fn encode_bool(b: bool, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    match *ty {
        Type::BOOL => b.to_sql(ty, out),
        _ if is_text(ty) => (if b { "true" } else { "false" }).to_sql(ty, out),
        _ => Err(mismatch(&Value::Bool(b), ty)),
    }
}

fn encode_number(n: &Number, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    let out_of_range = || -> BoxError { format!("{n} is out of range for {ty}").into() };

    match *ty {
        Type::INT2 => {
            let v = n.as_i64().and_then(|v| i16::try_from(v).ok());
            v.ok_or_else(out_of_range)?.to_sql(ty, out)
        }
        Type::INT4 => {
            let v = n.as_i64().and_then(|v| i32::try_from(v).ok());
            v.ok_or_else(out_of_range)?.to_sql(ty, out)
        }
        Type::INT8 => n.as_i64().ok_or_else(out_of_range)?.to_sql(ty, out),
        Type::OID => {
            let v = n.as_u64().and_then(|v| u32::try_from(v).ok());
            v.ok_or_else(out_of_range)?.to_sql(ty, out)
        }
        #[allow(clippy::cast_possible_truncation)]
        Type::FLOAT4 => (n.as_f64().ok_or_else(out_of_range)? as f32).to_sql(ty, out),
        Type::FLOAT8 => n.as_f64().ok_or_else(out_of_range)?.to_sql(ty, out),
        Type::NUMERIC => parse_decimal(&n.to_string())?.to_sql(ty, out),
        _ if is_text(ty) => n.to_string().as_str().to_sql(ty, out),
        _ => Err(mismatch(&Value::Number(n.clone()), ty)),
    }
}

fn encode_str(s: &str, ty: &Type, out: &mut BytesMut) -> Result<IsNull, BoxError> {
    if is_text(ty) {
        return s.to_sql(ty, out);
    }

    let s = s.trim();
    match *ty {
        Type::BOOL => parse_bool(s)?.to_sql(ty, out),
        Type::INT2 => i16::from_str(s)?.to_sql(ty, out),
        Type::INT4 => i32::from_str(s)?.to_sql(ty, out),
        Type::INT8 => i64::from_str(s)?.to_sql(ty, out),
        Type::OID => u32::from_str(s)?.to_sql(ty, out),
        Type::FLOAT4 => f32::from_str(s)?.to_sql(ty, out),
        Type::FLOAT8 => f64::from_str(s)?.to_sql(ty, out),
        Type::NUMERIC => parse_decimal(s)?.to_sql(ty, out),
        Type::UUID => Uuid::parse_str(s)?.to_sql(ty, out),
        Type::DATE => NaiveDate::from_str(s)?.to_sql(ty, out),
        Type::TIME => NaiveTime::from_str(s)?.to_sql(ty, out),
        Type::TIMESTAMP => parse_timestamp(s)?.to_sql(ty, out),
        Type::TIMESTAMPTZ => DateTime::parse_from_rfc3339(s)?.to_sql(ty, out),
        Type::BYTEA => parse_bytea(s)?.to_sql(ty, out),
        _ => Err(mismatch(&Value::String(s.to_string()), ty)),
    }
}

fn is_text(ty: &Type) -> bool {
    <&str as ToSql>::accepts(ty)
}

fn parse_bool(s: &str) -> Result<bool, BoxError> {
    match s.to_ascii_lowercase().as_str() {
        "t" | "true" | "y" | "yes" | "on" | "1" => Ok(true),
        "f" | "false" | "n" | "no" | "off" | "0" => Ok(false),
        _ => Err(format!("invalid input syntax for type boolean: {s:?}").into()),
    }
}

fn parse_decimal(s: &str) -> Result<Decimal, BoxError> {
    Decimal::from_str_exact(s)
        .or_else(|_| Decimal::from_scientific(s))
        .map_err(|e| format!("invalid numeric {s:?}: {e}").into())
}

fn parse_timestamp(s: &str) -> Result<NaiveDateTime, BoxError> {
    NaiveDateTime::from_str(s)
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f"))
        .map_err(Into::into)
}

fn parse_bytea(s: &str) -> Result<Vec<u8>, BoxError> {
    let hex = s
        .strip_prefix("\\x")
        .ok_or_else(|| format!("bytea parameters must be \\x-prefixed hex, got {s:?}"))?;
    if !hex.is_ascii() || hex.len() % 2 != 0 {
        return Err("bytea parameter is not an even number of hex digits".into());
    }
    (0..hex.len())
        .step_by(2)
        .map(|i| u8::from_str_radix(&hex[i..i + 2], 16).map_err(Into::into))
        .collect()
}

fn mismatch(value: &Value, ty: &Type) -> BoxError {
    let kind = match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    };
    format!("cannot bind a JSON {kind} to a parameter of type {ty}").into()
}
