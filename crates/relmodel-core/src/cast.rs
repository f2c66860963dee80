//! Attribute cast table.
//!
//! Casts are declared per attribute on an [`EntityDef`](crate::EntityDef) as
//! tagged [`Cast`] variants. Tags are parsed and validated once, when the
//! entity type is registered; the functions in this module then apply them:
//!
//! - [`cast`] converts a raw stored value into its attribute representation
//! - [`normalize_for_storage`] converts an assigned value into its stored form
//! - [`compare_for_dirty`] decides whether a raw value differs from its original

use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use chrono::format::{Item, StrftimeItems};
use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use rust_decimal::{Decimal, RoundingStrategy};

use crate::Result;
use crate::error::{EncodingError, Error, TypeError};
use crate::value::Value;

/// Largest scale a `decimal:N` cast accepts.
pub const MAX_DECIMAL_SCALE: u32 = 28;

/// A registered attribute cast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Cast {
    /// `int` / `integer`
    Int,
    /// `float` / `real` / `double`
    Float,
    /// `decimal:N`, a fixed-point string with `scale` fractional digits
    Decimal { scale: u32 },
    /// `string`
    String,
    /// `bool` / `boolean`
    Bool,
    /// `array`, decoded JSON document
    Array,
    /// `json`, decoded JSON document
    Json,
    /// `object`, decoded JSON wrapped in an object container
    Object,
    /// `collection`, decoded JSON wrapped in a collection container
    Collection,
    /// `date` / `date:FMT`, midnight-truncated date-time
    Date { format: Option<String> },
    /// `datetime` / `datetime:FMT` / `custom_datetime:FMT`
    DateTime { format: Option<String> },
    /// `timestamp`, integer epoch seconds
    Timestamp,
    /// Any tag this table does not know; values pass through unchanged
    Other(String),
}

impl Cast {
    /// Parse a cast tag such as `"decimal:2"` or `"datetime:%d/%m/%Y"`.
    ///
    /// Unknown tags become [`Cast::Other`]. A known parameterized tag with a
    /// missing or invalid parameter is a configuration error.
    #[allow(clippy::result_large_err)]
    pub fn parse(tag: &str) -> Result<Self> {
        let tag = tag.trim();
        let (name, param) = match tag.split_once(':') {
            Some((name, param)) => (name, Some(param)),
            None => (tag, None),
        };

        let cast = match name.to_ascii_lowercase().as_str() {
            "int" | "integer" => Cast::Int,
            "real" | "float" | "double" => Cast::Float,
            "decimal" => {
                let raw = param.ok_or_else(|| {
                    Error::config("decimal cast requires a scale, e.g. \"decimal:2\"")
                })?;
                let scale = raw.trim().parse::<u32>().map_err(|_| {
                    Error::config(format!("invalid decimal scale '{}' in cast '{}'", raw, tag))
                })?;
                if scale > MAX_DECIMAL_SCALE {
                    return Err(Error::config(format!(
                        "decimal scale {} exceeds maximum of {}",
                        scale, MAX_DECIMAL_SCALE
                    )));
                }
                Cast::Decimal { scale }
            }
            "string" => Cast::String,
            "bool" | "boolean" => Cast::Bool,
            "array" => Cast::Array,
            "json" => Cast::Json,
            "object" => Cast::Object,
            "collection" => Cast::Collection,
            "date" | "immutable_date" => Cast::Date {
                format: validated_format(tag, param)?,
            },
            "datetime" | "immutable_datetime" => Cast::DateTime {
                format: validated_format(tag, param)?,
            },
            "custom_datetime" | "immutable_custom_datetime" => {
                let format = validated_format(tag, param)?;
                if format.is_none() {
                    return Err(Error::config(format!("cast '{}' requires a format", tag)));
                }
                Cast::DateTime { format }
            }
            "timestamp" => Cast::Timestamp,
            _ => Cast::Other(tag.to_string()),
        };
        Ok(cast)
    }

    /// Casts whose stored form is a JSON string.
    pub fn is_json(&self) -> bool {
        matches!(
            self,
            Cast::Array | Cast::Json | Cast::Object | Cast::Collection
        )
    }

    /// Casts that make the attribute a date field.
    pub fn is_date(&self) -> bool {
        matches!(self, Cast::Date { .. } | Cast::DateTime { .. })
    }

    /// Explicit serialization format, if the cast declares one.
    pub fn date_format(&self) -> Option<&str> {
        match self {
            Cast::Date { format } | Cast::DateTime { format } => format.as_deref(),
            _ => None,
        }
    }
}

impl FromStr for Cast {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Cast::parse(s)
    }
}

impl fmt::Display for Cast {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cast::Int => write!(f, "int"),
            Cast::Float => write!(f, "float"),
            Cast::Decimal { scale } => write!(f, "decimal:{}", scale),
            Cast::String => write!(f, "string"),
            Cast::Bool => write!(f, "bool"),
            Cast::Array => write!(f, "array"),
            Cast::Json => write!(f, "json"),
            Cast::Object => write!(f, "object"),
            Cast::Collection => write!(f, "collection"),
            Cast::Date { format: None } => write!(f, "date"),
            Cast::Date { format: Some(fmt) } => write!(f, "date:{}", fmt),
            Cast::DateTime { format: None } => write!(f, "datetime"),
            Cast::DateTime { format: Some(fmt) } => write!(f, "datetime:{}", fmt),
            Cast::Timestamp => write!(f, "timestamp"),
            Cast::Other(tag) => write!(f, "{}", tag),
        }
    }
}

#[allow(clippy::result_large_err)]
fn validated_format(tag: &str, param: Option<&str>) -> Result<Option<String>> {
    let Some(format) = param.map(str::trim).filter(|f| !f.is_empty()) else {
        return Ok(None);
    };
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(Error::config(format!(
            "invalid date format '{}' in cast '{}'",
            format, tag
        )));
    }
    Ok(Some(format.to_string()))
}

// ============================================================================
// Numeric helpers
// ============================================================================

const NUMERIC_PREFIX: &str = r"^\s*[+-]?(\d+(\.\d*)?|\.\d+)([eE][+-]?\d+)?";

fn numeric_prefix() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| match Regex::new(NUMERIC_PREFIX) {
            Ok(re) => Some(re),
            Err(e) => {
                tracing::warn!(error = %e, "numeric pattern failed to compile");
                None
            }
        })
        .as_ref()
}

/// Is `s` a complete numeric literal (optional sign, fraction, exponent,
/// surrounding whitespace)?
pub fn is_numeric_str(s: &str) -> bool {
    numeric_prefix()
        .and_then(|re| re.find(s))
        .is_some_and(|m| s[m.end()..].trim().is_empty())
}

/// Is this value numeric in the loose sense used for uncast dirty checks?
pub fn is_numeric(value: &Value) -> bool {
    match value {
        Value::Int(_) | Value::Double(_) => true,
        Value::Text(s) | Value::Decimal(s) => is_numeric_str(s),
        _ => false,
    }
}

/// Leading numeric portion of a string as f64; `0.0` when there is none.
fn leading_f64(s: &str) -> f64 {
    numeric_prefix()
        .and_then(|re| re.find(s))
        .and_then(|m| m.as_str().trim().parse::<f64>().ok())
        .unwrap_or(0.0)
}

#[allow(clippy::cast_possible_truncation)]
fn to_int(value: &Value) -> i64 {
    match value {
        Value::Int(v) => *v,
        Value::Bool(b) => i64::from(*b),
        Value::Double(v) if v.is_finite() => v.trunc() as i64,
        Value::Double(_) => 0,
        Value::Text(s) | Value::Decimal(s) => s
            .trim()
            .parse::<i64>()
            .unwrap_or_else(|_| leading_f64(s).trunc() as i64),
        Value::DateTime(dt) => dt.and_utc().timestamp(),
        Value::Array(items) => i64::from(!items.is_empty()),
        Value::Object(map) => i64::from(!map.is_empty()),
        Value::Json(_) | Value::Null => 0,
    }
}

fn to_float(value: &Value) -> f64 {
    match value {
        Value::Double(v) => *v,
        Value::Int(v) => *v as f64,
        Value::Bool(b) => f64::from(u8::from(*b)),
        Value::Text(s) | Value::Decimal(s) => match s.as_str() {
            "Infinity" => f64::INFINITY,
            "-Infinity" => f64::NEG_INFINITY,
            "NaN" => f64::NAN,
            other => leading_f64(other),
        },
        other => to_int(other) as f64,
    }
}

fn to_bool(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Int(v) => *v != 0,
        Value::Double(v) => *v != 0.0,
        Value::Text(s) | Value::Decimal(s) => !(s.is_empty() || s == "0"),
        Value::DateTime(_) => true,
        Value::Json(v) => match v {
            serde_json::Value::Null => false,
            serde_json::Value::Bool(b) => *b,
            serde_json::Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
            serde_json::Value::String(s) => !(s.is_empty() || s == "0"),
            serde_json::Value::Array(items) => !items.is_empty(),
            serde_json::Value::Object(map) => !map.is_empty(),
        },
        Value::Object(map) => !map.is_empty(),
        Value::Array(items) => !items.is_empty(),
    }
}

#[allow(clippy::result_large_err)]
fn to_decimal(value: &Value) -> Result<Decimal> {
    let parsed = match value {
        Value::Int(v) => Some(Decimal::from(*v)),
        Value::Bool(b) => Some(Decimal::from(i64::from(*b))),
        Value::Double(v) => Decimal::try_from(*v).ok(),
        Value::Text(s) | Value::Decimal(s) => {
            let s = s.trim();
            Decimal::from_str(s)
                .or_else(|_| Decimal::from_scientific(s))
                .ok()
        }
        _ => None,
    };
    parsed.ok_or_else(|| {
        Error::Type(TypeError {
            expected: "decimal",
            actual: value.type_name().to_string(),
            column: None,
        })
    })
}

fn decode_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Text(s) => match serde_json::from_str(s) {
            Ok(decoded) => decoded,
            Err(e) => {
                tracing::trace!(error = %e, "stored JSON failed to decode, treating as null");
                serde_json::Value::Null
            }
        },
        other => other.to_json(),
    }
}

// ============================================================================
// Dates
// ============================================================================

fn standard_date() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"^(\d{4})-(\d{1,2})-(\d{1,2})$").ok())
        .as_ref()
}

const FALLBACK_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
];

fn from_timestamp(secs: i64) -> Option<NaiveDateTime> {
    chrono::DateTime::from_timestamp(secs, 0).map(|dt| dt.naive_utc())
}

/// Interpret a value as a date-time.
///
/// Accepts date-time values, epoch seconds (integers or numeric strings),
/// `YYYY-MM-DD` dates (midnight), strings in the stored `date_format`, and a
/// handful of common ISO-8601 layouts.
#[allow(clippy::result_large_err, clippy::cast_possible_truncation)]
pub fn as_date_time(value: &Value, date_format: &str) -> Result<NaiveDateTime> {
    let parsed = match value {
        Value::DateTime(dt) => Some(*dt),
        Value::Int(secs) => from_timestamp(*secs),
        Value::Double(secs) if secs.is_finite() => from_timestamp(secs.trunc() as i64),
        Value::Text(s) => parse_date_string(s.trim(), date_format),
        _ => None,
    };
    parsed.ok_or_else(|| {
        Error::Type(TypeError {
            expected: "date-time",
            actual: match value {
                Value::Text(s) => format!("unparseable date '{}'", s),
                other => other.type_name().to_string(),
            },
            column: None,
        })
    })
}

fn parse_date_string(s: &str, date_format: &str) -> Option<NaiveDateTime> {
    if is_numeric_str(s) {
        if let Ok(secs) = s.parse::<i64>() {
            return from_timestamp(secs);
        }
    }
    if standard_date().is_some_and(|re| re.is_match(s)) {
        return NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0));
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, date_format) {
        return Some(dt);
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, date_format) {
        return d.and_hms_opt(0, 0, 0);
    }
    if let Ok(dt) = chrono::DateTime::parse_from_rfc3339(s) {
        return Some(dt.naive_utc());
    }
    FALLBACK_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(s, fmt).ok())
}

/// Render a date-like value in the stored `date_format`.
#[allow(clippy::result_large_err)]
pub fn from_date_time(value: &Value, date_format: &str) -> Result<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }
    let dt = as_date_time(value, date_format)?;
    Ok(Value::Text(dt.format(date_format).to_string()))
}

fn start_of_day(dt: NaiveDateTime) -> NaiveDateTime {
    dt.date().and_time(chrono::NaiveTime::MIN)
}

// ============================================================================
// Cast application
// ============================================================================

/// Apply `cast` to a raw stored value.
///
/// NULL stays NULL for every cast. Malformed stored JSON decodes to NULL.
#[allow(clippy::result_large_err)]
pub fn cast(cast: &Cast, value: &Value, date_format: &str) -> Result<Value> {
    if value.is_null() {
        return Ok(Value::Null);
    }

    let out = match cast {
        Cast::Int => Value::Int(to_int(value)),
        Cast::Float => Value::Double(to_float(value)),
        Cast::Decimal { scale } => {
            let rounded = to_decimal(value)?
                .round_dp_with_strategy(*scale, RoundingStrategy::MidpointAwayFromZero);
            Value::Decimal(format!("{:.*}", *scale as usize, rounded))
        }
        Cast::String => match value.to_loose_string() {
            Some(s) => Value::Text(s),
            None => Value::Text(value.to_json().to_string()),
        },
        Cast::Bool => Value::Bool(to_bool(value)),
        Cast::Array | Cast::Json => Value::Json(decode_json(value)),
        Cast::Object => match decode_json(value) {
            serde_json::Value::Object(map) => Value::Object(map),
            other => Value::Json(other),
        },
        Cast::Collection => match decode_json(value) {
            serde_json::Value::Null => Value::Array(Vec::new()),
            serde_json::Value::Array(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            serde_json::Value::Object(map) => Value::Object(map),
            scalar => Value::Array(vec![Value::from(scalar)]),
        },
        Cast::Date { .. } => Value::DateTime(start_of_day(as_date_time(value, date_format)?)),
        Cast::DateTime { .. } => Value::DateTime(as_date_time(value, date_format)?),
        Cast::Timestamp => Value::Int(as_date_time(value, date_format)?.and_utc().timestamp()),
        Cast::Other(_) => value.clone(),
    };
    Ok(out)
}

/// Encode a value as a JSON string for storage.
///
/// Non-finite floats have no JSON representation and fail with an
/// [`EncodingError`] naming `attribute`.
#[allow(clippy::result_large_err)]
pub fn encode_json(attribute: &str, value: &Value) -> Result<String> {
    fn has_non_finite(value: &Value) -> bool {
        match value {
            Value::Double(v) => !v.is_finite(),
            Value::Array(items) => items.iter().any(has_non_finite),
            _ => false,
        }
    }

    if has_non_finite(value) {
        return Err(Error::Encoding(EncodingError {
            attribute: attribute.to_string(),
            message: "Inf and NaN cannot be JSON encoded".to_string(),
            source: None,
        }));
    }
    serde_json::to_string(&value.to_json()).map_err(|e| {
        Error::Encoding(EncodingError {
            attribute: attribute.to_string(),
            message: e.to_string(),
            source: Some(Box::new(e)),
        })
    })
}

/// Convert an assigned value into its stored form.
///
/// Date fields are rendered in `date_format`; JSON-family casts are encoded
/// to a string. Everything else is stored as given.
#[allow(clippy::result_large_err)]
pub fn normalize_for_storage(
    attribute: &str,
    cast: Option<&Cast>,
    is_date: bool,
    value: Value,
    date_format: &str,
) -> Result<Value> {
    if value.is_null() {
        return Ok(value);
    }
    if is_date {
        return from_date_time(&value, date_format).map_err(|e| match e {
            Error::Type(mut te) => {
                te.column = Some(attribute.to_string());
                Error::Type(te)
            }
            e => e,
        });
    }
    if cast.is_some_and(Cast::is_json) {
        return encode_json(attribute, &value).map(Value::Text);
    }
    Ok(value)
}

/// Decide whether `current` differs from `original`.
///
/// `original` is `None` when the attribute was absent at the last sync, which
/// always counts as a change. Comparison depends on the cast:
///
/// - date fields compare in their stored `date_format`
/// - `object` / `collection` compare decoded JSON
/// - `float` compares within 4 machine epsilons
/// - `decimal` compares numerically
/// - other known casts compare cast values
/// - uncast attributes are equal only when both sides are numeric and their
///   string renderings match, so `"5"` equals `5` but `"5.0"` does not
pub fn compare_for_dirty(
    cast: Option<&Cast>,
    is_date: bool,
    current: &Value,
    original: Option<&Value>,
    date_format: &str,
) -> bool {
    let Some(original) = original else {
        return true;
    };
    if current == original {
        return false;
    }
    if current.is_null() {
        return true;
    }

    if is_date {
        return match (
            from_date_time(current, date_format),
            from_date_time(original, date_format),
        ) {
            (Ok(a), Ok(b)) => a != b,
            _ => true,
        };
    }

    match cast {
        Some(Cast::Object | Cast::Collection) => decode_json(current) != decode_json(original),
        #[allow(clippy::float_cmp)]
        Some(Cast::Float) => {
            if original.is_null() {
                return true;
            }
            let (a, b) = (to_float(current), to_float(original));
            // NaN never lands within tolerance, so it always reads as a change.
            !(a == b || (a - b).abs() < f64::EPSILON * 4.0)
        }
        Some(Cast::Decimal { .. }) => match (to_decimal(current), to_decimal(original)) {
            (Ok(a), Ok(b)) => a != b,
            _ => true,
        },
        Some(c @ (Cast::Int | Cast::String | Cast::Bool | Cast::Array | Cast::Json | Cast::Timestamp)) => {
            match (cast_for_compare(c, current, date_format), cast_for_compare(c, original, date_format)) {
                (Some(a), Some(b)) => a != b,
                _ => true,
            }
        }
        _ => !loose_numeric_equal(current, original),
    }
}

fn cast_for_compare(c: &Cast, value: &Value, date_format: &str) -> Option<Value> {
    cast(c, value, date_format).ok()
}

fn loose_numeric_equal(a: &Value, b: &Value) -> bool {
    if !(is_numeric(a) && is_numeric(b)) {
        return false;
    }
    match (a.to_loose_string(), b.to_loose_string()) {
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FMT: &str = "%Y-%m-%d %H:%M:%S";

    fn dt(s: &str) -> NaiveDateTime {
        NaiveDateTime::parse_from_str(s, FMT).unwrap()
    }

    #[test]
    fn parse_known_tags() {
        assert_eq!(Cast::parse("integer").unwrap(), Cast::Int);
        assert_eq!(Cast::parse("double").unwrap(), Cast::Float);
        assert_eq!(Cast::parse("decimal:2").unwrap(), Cast::Decimal { scale: 2 });
        assert_eq!(Cast::parse("boolean").unwrap(), Cast::Bool);
        assert_eq!(
            Cast::parse("custom_datetime:%d/%m/%Y").unwrap(),
            Cast::DateTime {
                format: Some("%d/%m/%Y".to_string())
            }
        );
        assert_eq!(
            Cast::parse("App\\Casts\\Money").unwrap(),
            Cast::Other("App\\Casts\\Money".to_string())
        );
    }

    #[test]
    fn parse_rejects_malformed_parameters() {
        assert!(Cast::parse("decimal").unwrap_err().is_programmer_error());
        assert!(Cast::parse("decimal:two").is_err());
        assert!(Cast::parse("decimal:40").is_err());
        assert!(Cast::parse("custom_datetime").is_err());
        assert!(Cast::parse("datetime:%Q").is_err());
    }

    #[test]
    fn display_round_trips_tag() {
        for tag in ["int", "decimal:3", "datetime:%Y", "collection", "timestamp"] {
            assert_eq!(Cast::parse(tag).unwrap().to_string(), tag);
        }
    }

    #[test]
    fn numeric_detection() {
        assert!(is_numeric_str("5"));
        assert!(is_numeric_str(" -1.5e3 "));
        assert!(is_numeric_str(".5"));
        assert!(!is_numeric_str("5 apples"));
        assert!(!is_numeric_str(""));
        assert!(!is_numeric(&Value::Bool(true)));
    }

    #[test]
    fn int_cast_is_lenient() {
        assert_eq!(cast(&Cast::Int, &Value::from("42"), FMT).unwrap(), Value::Int(42));
        assert_eq!(cast(&Cast::Int, &Value::from("12abc"), FMT).unwrap(), Value::Int(12));
        assert_eq!(cast(&Cast::Int, &Value::from("1.9"), FMT).unwrap(), Value::Int(1));
        assert_eq!(cast(&Cast::Int, &Value::Double(-2.7), FMT).unwrap(), Value::Int(-2));
        assert_eq!(cast(&Cast::Int, &Value::Null, FMT).unwrap(), Value::Null);
    }

    #[test]
    fn float_cast_special_literals() {
        let inf = cast(&Cast::Float, &Value::from("Infinity"), FMT).unwrap();
        assert_eq!(inf, Value::Double(f64::INFINITY));
        let neg = cast(&Cast::Float, &Value::from("-Infinity"), FMT).unwrap();
        assert_eq!(neg, Value::Double(f64::NEG_INFINITY));
        match cast(&Cast::Float, &Value::from("NaN"), FMT).unwrap() {
            Value::Double(v) => assert!(v.is_nan()),
            other => panic!("expected double, got {other:?}"),
        }
        assert_eq!(cast(&Cast::Float, &Value::from("2.5"), FMT).unwrap(), Value::Double(2.5));
    }

    #[test]
    fn decimal_cast_rounds_to_scale() {
        let c = Cast::Decimal { scale: 2 };
        assert_eq!(cast(&c, &Value::from("1.005"), FMT).unwrap(), Value::Decimal("1.01".into()));
        assert_eq!(cast(&c, &Value::Int(3), FMT).unwrap(), Value::Decimal("3.00".into()));
        assert_eq!(cast(&c, &Value::from("-0.125"), FMT).unwrap(), Value::Decimal("-0.13".into()));
        assert!(cast(&c, &Value::from("abc"), FMT).is_err());
    }

    #[test]
    fn bool_and_string_casts() {
        assert_eq!(cast(&Cast::Bool, &Value::from("0"), FMT).unwrap(), Value::Bool(false));
        assert_eq!(cast(&Cast::Bool, &Value::from(""), FMT).unwrap(), Value::Bool(false));
        assert_eq!(cast(&Cast::Bool, &Value::from("no"), FMT).unwrap(), Value::Bool(true));
        assert_eq!(cast(&Cast::Bool, &Value::Int(2), FMT).unwrap(), Value::Bool(true));
        assert_eq!(cast(&Cast::String, &Value::Int(7), FMT).unwrap(), Value::from("7"));
        assert_eq!(cast(&Cast::String, &Value::Bool(true), FMT).unwrap(), Value::from("1"));
    }

    #[test]
    fn json_family_casts_wrap_containers() {
        let raw = Value::from(r#"{"a":1}"#);
        assert_eq!(
            cast(&Cast::Json, &raw, FMT).unwrap(),
            Value::Json(serde_json::json!({"a": 1}))
        );
        assert!(matches!(cast(&Cast::Object, &raw, FMT).unwrap(), Value::Object(_)));

        let list = Value::from("[1,\"x\"]");
        assert_eq!(
            cast(&Cast::Collection, &list, FMT).unwrap(),
            Value::Array(vec![Value::Int(1), Value::from("x")])
        );
        assert_eq!(
            cast(&Cast::Collection, &Value::from("null"), FMT).unwrap(),
            Value::Array(Vec::new())
        );
        assert_eq!(
            cast(&Cast::Array, &Value::from("{not json"), FMT).unwrap(),
            Value::Json(serde_json::Value::Null)
        );
    }

    #[test]
    fn date_casts() {
        let date = Cast::Date { format: None };
        assert_eq!(
            cast(&date, &Value::from("2024-03-05 13:14:15"), FMT).unwrap(),
            Value::DateTime(dt("2024-03-05 00:00:00"))
        );
        let datetime = Cast::DateTime { format: None };
        assert_eq!(
            cast(&datetime, &Value::from("2024-03-05"), FMT).unwrap(),
            Value::DateTime(dt("2024-03-05 00:00:00"))
        );
        assert_eq!(
            cast(&datetime, &Value::Int(0), FMT).unwrap(),
            Value::DateTime(dt("1970-01-01 00:00:00"))
        );
        assert_eq!(
            cast(&Cast::Timestamp, &Value::from("1970-01-02 00:00:00"), FMT).unwrap(),
            Value::Int(86_400)
        );
        assert!(cast(&datetime, &Value::from("yesterday-ish"), FMT).is_err());
    }

    #[test]
    fn unknown_cast_passes_through() {
        let other = Cast::Other("encrypted".to_string());
        assert_eq!(cast(&other, &Value::from("x"), FMT).unwrap(), Value::from("x"));
    }

    #[test]
    fn storage_normalization() {
        let stored = normalize_for_storage(
            "published_at",
            None,
            true,
            Value::DateTime(dt("2024-01-02 03:04:05")),
            FMT,
        )
        .unwrap();
        assert_eq!(stored, Value::from("2024-01-02 03:04:05"));

        let stored = normalize_for_storage(
            "tags",
            Some(&Cast::Array),
            false,
            Value::Array(vec![Value::from("a"), Value::Int(1)]),
            FMT,
        )
        .unwrap();
        assert_eq!(stored, Value::from(r#"["a",1]"#));

        let err = normalize_for_storage(
            "scores",
            Some(&Cast::Json),
            false,
            Value::Array(vec![Value::Double(f64::NAN)]),
            FMT,
        )
        .unwrap_err();
        match err {
            Error::Encoding(e) => assert_eq!(e.attribute, "scores"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn float_dirty_uses_epsilon() {
        let c = Some(&Cast::Float);
        let sum = Value::Double(0.1 + 0.2);
        assert!(!compare_for_dirty(c, false, &sum, Some(&Value::Double(0.3)), FMT));
        assert!(compare_for_dirty(c, false, &Value::Double(0.31), Some(&Value::Double(0.3)), FMT));
        assert!(compare_for_dirty(c, false, &Value::Double(1.0), Some(&Value::Null), FMT));
        assert!(compare_for_dirty(c, false, &Value::Null, Some(&Value::Double(1.0)), FMT));
    }

    #[test]
    fn float_dirty_treats_nan_as_a_change() {
        let c = Some(&Cast::Float);
        let one = Value::Double(1.0);
        assert!(compare_for_dirty(c, false, &Value::Double(f64::NAN), Some(&one), FMT));
        assert!(compare_for_dirty(c, false, &Value::from("NaN"), Some(&Value::from("1.5")), FMT));
        assert!(compare_for_dirty(c, false, &one, Some(&Value::from("NaN")), FMT));

        let inf = Value::Double(f64::INFINITY);
        assert!(!compare_for_dirty(c, false, &inf, Some(&inf), FMT));
        assert!(!compare_for_dirty(c, false, &Value::from("Infinity"), Some(&inf), FMT));
        assert!(compare_for_dirty(c, false, &Value::from("-Infinity"), Some(&inf), FMT));
    }

    #[test]
    fn date_dirty_normalizes_format() {
        let raw = Value::from("2024-01-02 00:00:00");
        assert!(!compare_for_dirty(None, true, &Value::from("2024-01-02"), Some(&raw), FMT));
        assert!(compare_for_dirty(None, true, &Value::from("2024-01-03"), Some(&raw), FMT));
    }

    #[test]
    fn json_object_dirty_ignores_key_order() {
        let c = Some(&Cast::Object);
        let a = Value::from(r#"{"a":1,"b":2}"#);
        let b = Value::from(r#"{"b":2,"a":1}"#);
        assert!(!compare_for_dirty(c, false, &a, Some(&b), FMT));
    }

    #[test]
    fn primitive_casts_compare_cast_values() {
        let c = Some(&Cast::Int);
        assert!(!compare_for_dirty(c, false, &Value::from("5"), Some(&Value::Int(5)), FMT));
        let b = Some(&Cast::Bool);
        assert!(!compare_for_dirty(b, false, &Value::Int(1), Some(&Value::Bool(true)), FMT));
        let d = Some(&Cast::Decimal { scale: 2 });
        assert!(!compare_for_dirty(d, false, &Value::from("1.50"), Some(&Value::from("1.5")), FMT));
    }

    #[test]
    fn uncast_fallback_is_loose_numeric() {
        assert!(!compare_for_dirty(None, false, &Value::from("5"), Some(&Value::Int(5)), FMT));
        assert!(compare_for_dirty(None, false, &Value::from("5.0"), Some(&Value::Int(5)), FMT));
        assert!(compare_for_dirty(None, false, &Value::from("a"), Some(&Value::from("b")), FMT));
        assert!(compare_for_dirty(None, false, &Value::Int(1), None, FMT));
    }
}
