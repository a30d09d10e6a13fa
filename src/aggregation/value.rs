//! Normalized row values and conversions into typed record fields

use chrono::{DateTime, TimeZone, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

use crate::aggregation::tree::EngineScalar;

/// Scalar stored in a flattened row
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum FieldValue {
    Text(String),
    Integer(i64),
    Decimal(f64),
    Instant(DateTime<Utc>),
    /// Engine value with no supported scalar kind, passed through untouched
    Raw(Value),
}

impl FieldValue {
    fn kind(&self) -> &'static str {
        match self {
            FieldValue::Text(_) => "text",
            FieldValue::Integer(_) => "integer",
            FieldValue::Decimal(_) => "decimal",
            FieldValue::Instant(_) => "instant",
            FieldValue::Raw(_) => "raw",
        }
    }
}

/// Coerce an engine-native scalar into a row value.
///
/// Never fails: values that fit no supported kind come back as
/// [`FieldValue::Raw`].
pub fn normalize(scalar: &EngineScalar) -> FieldValue {
    match scalar {
        EngineScalar::Keyword(s) => FieldValue::Text(s.clone()),
        EngineScalar::Long(n) => FieldValue::Integer(*n),
        EngineScalar::Double(f) if f.is_finite() => FieldValue::Decimal(*f),
        // NaN/inf have no JSON form, serde_json maps them to null
        EngineScalar::Double(f) => FieldValue::Raw(Value::from(*f)),
        EngineScalar::Timestamp(millis) => match Utc.timestamp_millis_opt(*millis).single() {
            Some(instant) => FieldValue::Instant(instant),
            None => FieldValue::Raw(Value::from(*millis)),
        },
        EngineScalar::Json(value) => normalize_json(value),
    }
}

fn normalize_json(value: &Value) -> FieldValue {
    match value {
        Value::String(s) => FieldValue::Text(s.clone()),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                FieldValue::Integer(i)
            } else if let Some(f) = n.as_f64() {
                FieldValue::Decimal(f)
            } else {
                FieldValue::Raw(value.clone())
            }
        }
        other => FieldValue::Raw(other.clone()),
    }
}

#[derive(Debug, Error, PartialEq)]
#[error("cannot convert {found} value into {expected}")]
pub struct ConversionError {
    pub expected: &'static str,
    pub found: &'static str,
}

impl ConversionError {
    fn new(expected: &'static str, value: &FieldValue) -> Self {
        Self {
            expected,
            found: value.kind(),
        }
    }
}

/// Conversion from a row value into a record field type
pub trait FromFieldValue: Sized {
    fn from_field(value: &FieldValue) -> Result<Self, ConversionError>;
}

impl FromFieldValue for String {
    fn from_field(value: &FieldValue) -> Result<Self, ConversionError> {
        match value {
            FieldValue::Text(s) => Ok(s.clone()),
            FieldValue::Integer(n) => Ok(n.to_string()),
            FieldValue::Decimal(f) => Ok(f.to_string()),
            FieldValue::Instant(t) => Ok(t.to_rfc3339()),
            FieldValue::Raw(_) => Err(ConversionError::new("string", value)),
        }
    }
}

impl FromFieldValue for i64 {
    fn from_field(value: &FieldValue) -> Result<Self, ConversionError> {
        match value {
            FieldValue::Integer(n) => Ok(*n),
            FieldValue::Decimal(f)
                if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64 =>
            {
                Ok(*f as i64)
            }
            FieldValue::Text(s) => s
                .trim()
                .parse::<i64>()
                .map_err(|_| ConversionError::new("integer", value)),
            _ => Err(ConversionError::new("integer", value)),
        }
    }
}

impl FromFieldValue for DateTime<Utc> {
    fn from_field(value: &FieldValue) -> Result<Self, ConversionError> {
        match value {
            FieldValue::Instant(t) => Ok(*t),
            FieldValue::Integer(millis) => Utc
                .timestamp_millis_opt(*millis)
                .single()
                .ok_or_else(|| ConversionError::new("instant", value)),
            FieldValue::Text(s) => DateTime::parse_from_rfc3339(s)
                .map(|t| t.with_timezone(&Utc))
                .map_err(|_| ConversionError::new("instant", value)),
            _ => Err(ConversionError::new("instant", value)),
        }
    }
}

impl<T: FromFieldValue> FromFieldValue for Option<T> {
    fn from_field(value: &FieldValue) -> Result<Self, ConversionError> {
        match value {
            FieldValue::Raw(Value::Null) => Ok(None),
            other => T::from_field(other).map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histogram_key_becomes_instant() {
        let value = normalize(&EngineScalar::Timestamp(1_700_000_000_000));
        assert_eq!(
            value,
            FieldValue::Instant(Utc.timestamp_millis_opt(1_700_000_000_000).unwrap())
        );
    }

    #[test]
    fn test_unsupported_scalars_pass_through() {
        let composite = serde_json::json!({"ip": "10.0.0.1"});
        assert_eq!(
            normalize(&EngineScalar::Json(composite.clone())),
            FieldValue::Raw(composite)
        );
        assert_eq!(
            normalize(&EngineScalar::Double(f64::NAN)),
            FieldValue::Raw(Value::Null)
        );
        assert_eq!(
            normalize(&EngineScalar::Timestamp(i64::MAX)),
            FieldValue::Raw(Value::from(i64::MAX))
        );
    }

    #[test]
    fn test_integer_conversion_rules() {
        assert_eq!(i64::from_field(&FieldValue::Decimal(5.0)), Ok(5));
        assert_eq!(i64::from_field(&FieldValue::Text(" 12 ".into())), Ok(12));
        assert!(i64::from_field(&FieldValue::Decimal(2.5)).is_err());
        assert!(i64::from_field(&FieldValue::Text("many".into())).is_err());
        assert!(i64::from_field(&FieldValue::Raw(Value::Bool(true))).is_err());
    }

    #[test]
    fn test_out_of_range_decimal_is_rejected() {
        // 2^63 is the first double past i64::MAX
        assert!(i64::from_field(&FieldValue::Decimal(9_223_372_036_854_775_808.0)).is_err());
        assert_eq!(
            i64::from_field(&FieldValue::Decimal(i64::MIN as f64)),
            Ok(i64::MIN)
        );
    }

    #[test]
    fn test_optional_field_accepts_null() {
        assert_eq!(
            Option::<i64>::from_field(&FieldValue::Raw(Value::Null)),
            Ok(None)
        );
        assert_eq!(
            Option::<i64>::from_field(&FieldValue::Decimal(3.0)),
            Ok(Some(3))
        );
    }
}
