use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use serde_json::Value;

/// Coerce a value to a string. `Null` becomes the empty string; everything
/// else renders through its JSON form.
pub fn to_string_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Coerce a value to an integer. Strings drop separators and anything after
/// a decimal point; unconvertible values collapse to zero.
pub fn to_i64(value: &Value) -> i64 {
    match value {
        Value::Number(n) => n.as_i64().unwrap_or(0),
        Value::String(s) => pre_decimal(&parsable(s)).parse().unwrap_or(0),
        _ => 0,
    }
}

/// Coerce a value to a boolean.
///
/// The strings `"true"` and `"false"` map to their boolean; any other value
/// evaluates to whether it is non-zero for its type.
pub fn to_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) if s == "true" => true,
        Value::String(s) if s == "false" => false,
        other => !is_zero(other),
    }
}

/// Coerce a value to an `f32`; unconvertible values collapse to zero.
pub fn to_f32(value: &Value) -> f32 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0) as f32,
        Value::String(s) => parsable(s).parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Coerce a value to an `f64`; unconvertible values collapse to zero.
pub fn to_f64(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64().unwrap_or(0.0),
        Value::String(s) => parsable(s).parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Coerce a value to a UTC timestamp.
///
/// Strings parse as RFC 3339 unless a `chrono` format is given; integers
/// are unix epoch seconds. Unconvertible values collapse to the epoch.
pub fn to_datetime(value: &Value, format: Option<&str>) -> DateTime<Utc> {
    match value {
        Value::String(s) => match format {
            Some(format) if !format.is_empty() => NaiveDateTime::parse_from_str(s, format)
                .map(|naive| Utc.from_utc_datetime(&naive))
                .unwrap_or(DateTime::UNIX_EPOCH),
            _ => DateTime::parse_from_rfc3339(s)
                .map(|parsed| parsed.with_timezone(&Utc))
                .unwrap_or(DateTime::UNIX_EPOCH),
        },
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .unwrap_or(DateTime::UNIX_EPOCH),
        _ => DateTime::UNIX_EPOCH,
    }
}

fn is_zero(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64().unwrap_or(0.0) == 0.0,
        Value::String(s) => s.is_empty(),
        Value::Array(_) | Value::Object(_) => false,
    }
}

fn pre_decimal(s: &str) -> String {
    s.split('.').next().unwrap_or(s).to_string()
}

fn parsable(s: &str) -> String {
    s.replace([' ', ','], "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn to_string_value_renders_any_value() {
        assert_eq!(to_string_value(&json!("Hello")), "Hello");
        assert_eq!(to_string_value(&json!(1)), "1");
        assert_eq!(to_string_value(&Value::Null), "");
    }

    #[test]
    fn to_i64_handles_separators_and_decimals() {
        assert_eq!(to_i64(&json!(5)), 5);
        assert_eq!(to_i64(&json!("5")), 5);
        assert_eq!(to_i64(&json!("5.00")), 5);
        assert_eq!(to_i64(&json!("1,005.00")), 1005);
        assert_eq!(to_i64(&json!([1])), 0);
    }

    #[test]
    fn to_bool_uses_zero_values_as_fallback() {
        assert!(to_bool(&json!(true)));
        assert!(to_bool(&json!(5)));
        assert!(!to_bool(&json!(0)));
        assert!(to_bool(&json!("true")));
        assert!(!to_bool(&json!("false")));
        assert!(!to_bool(&json!("")));
        assert!(to_bool(&json!("abcd")));
        assert!(!to_bool(&Value::Null));
    }

    #[test]
    fn to_floats_handle_numbers_and_strings() {
        assert_eq!(to_f32(&json!(1.5)), 1.5);
        assert_eq!(to_f32(&json!(1)), 1.0);
        assert_eq!(to_f32(&json!("1,543.42")), 1543.42);
        assert_eq!(to_f64(&json!("2.25")), 2.25);
        assert_eq!(to_f64(&json!(null)), 0.0);
    }

    #[test]
    fn to_datetime_parses_rfc3339_formats_and_epochs() {
        let rfc = to_datetime(&json!("2017-03-01T10:00:00Z"), None);
        assert_eq!(rfc.timestamp(), 1_488_362_400);

        let formatted = to_datetime(&json!("03/01/2017 10:00:00"), Some("%m/%d/%Y %H:%M:%S"));
        assert_eq!(formatted.timestamp(), 1_488_362_400);

        let epoch = to_datetime(&json!(1_488_362_400), None);
        assert_eq!(epoch.timestamp(), 1_488_362_400);

        assert_eq!(to_datetime(&json!("garbage"), None), DateTime::UNIX_EPOCH);
    }
}
