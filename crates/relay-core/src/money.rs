//! Minor-unit money conversion.

use serde_json::Value;

/// Convert an integer minor-unit amount (cents) into a decimal major-unit
/// amount. The wire value may arrive as a JSON number or a numeric string.
/// Absent, null and non-numeric values map to `None`, never to zero.
pub fn minor_units_to_decimal(value: Option<&Value>) -> Option<f64> {
    let value = value?;
    let cents = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if !cents.is_finite() {
        return None;
    }
    Some(cents / 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn converts_string_and_number_cents() {
        assert_eq!(minor_units_to_decimal(Some(&json!("2500"))), Some(25.0));
        assert_eq!(minor_units_to_decimal(Some(&json!(199))), Some(1.99));
        assert_eq!(minor_units_to_decimal(Some(&json!(0))), Some(0.0));
    }

    #[test]
    fn absent_is_none_not_zero() {
        assert_eq!(minor_units_to_decimal(None), None);
        assert_eq!(minor_units_to_decimal(Some(&Value::Null)), None);
        assert_eq!(minor_units_to_decimal(Some(&json!("not-a-number"))), None);
    }
}
