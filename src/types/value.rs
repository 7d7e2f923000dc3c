use std::fmt;

/// Attribute values a caller can attach to a [`UserContext`](super::UserContext).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// A 64-bit signed integer.
    Int(i64),
    /// A 64-bit floating-point number.
    Float(f64),
    /// A boolean value.
    Bool(bool),
    /// A UTF-8 string.
    String(String),
}

impl Value {
    /// Canonical string form used when matching against segmentation operands.
    ///
    /// Integral floats lose their fractional part (`150.0` becomes `"150"`),
    /// numeric strings are normalized the same way, and the result is trimmed.
    #[must_use]
    pub fn to_tag_string(&self) -> String {
        match self {
            Value::Int(v) => v.to_string(),
            Value::Float(v) => format_number(*v),
            Value::Bool(v) => v.to_string(),
            Value::String(v) => canonical_text(v),
        }
    }
}

/// Render a float without exponent notation, dropping `.0` on integral values.
pub(crate) fn format_number(v: f64) -> String {
    if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

/// Trimmed text with numeric literals re-rendered through [`format_number`].
pub(crate) fn canonical_text(s: &str) -> String {
    let s = s.trim();
    // Only plain decimal text is re-rendered; "NaN", "inf" and friends stay as written.
    let numeric = !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, '.' | '-' | '+' | 'e' | 'E'));
    match s.parse::<f64>() {
        Ok(v) if numeric => format_number(v),
        _ => s.to_owned(),
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_owned())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Bool(v) => write!(f, "{v}"),
            Value::String(v) => write!(f, "\"{v}\""),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_conversions() {
        assert_eq!(Value::from(42_i64), Value::Int(42));
        assert_eq!(Value::from(7_i32), Value::Int(7));
        assert_eq!(Value::from(2.5_f64), Value::Float(2.5));
        assert_eq!(Value::from(true), Value::Bool(true));
        assert_eq!(Value::from("hello"), Value::String("hello".to_owned()));
    }

    #[test]
    fn display() {
        assert_eq!(Value::Int(42).to_string(), "42");
        assert_eq!(Value::Float(3.5).to_string(), "3.5");
        assert_eq!(Value::Bool(true).to_string(), "true");
        assert_eq!(Value::String("hello".into()).to_string(), "\"hello\"");
    }

    #[test]
    fn tag_string_drops_integral_fraction() {
        assert_eq!(Value::Float(150.0).to_tag_string(), "150");
        assert_eq!(Value::Float(150.25).to_tag_string(), "150.25");
        assert_eq!(Value::Int(-3).to_tag_string(), "-3");
    }

    #[test]
    fn tag_string_normalizes_numeric_strings() {
        assert_eq!(Value::from("160").to_tag_string(), "160");
        assert_eq!(Value::from("1.50").to_tag_string(), "1.5");
        assert_eq!(Value::from(" 12.0 ").to_tag_string(), "12");
    }

    #[test]
    fn tag_string_keeps_text() {
        assert_eq!(Value::from("  abc ").to_tag_string(), "abc");
        assert_eq!(Value::from("NaN").to_tag_string(), "NaN");
        assert_eq!(Value::Bool(false).to_tag_string(), "false");
    }

    #[test]
    fn tag_string_has_no_exponent() {
        assert_eq!(Value::Float(0.000_01).to_tag_string(), "0.00001");
    }
}
