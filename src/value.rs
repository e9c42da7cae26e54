//! Runtime values for binding evaluation
//!
//! `Value` is the dynamic value model the evaluator and member resolver
//! exchange. Object identity is `Arc` pointer identity; numeric variants map
//! one-to-one onto the coercion engine's `TypeCode`s.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::coerce::{Ty, TypeCode};
use crate::eval::LambdaValue;

/// A live object in the bound graph. Implementations expose their runtime
/// type name (dotted, e.g. `Demo.ViewModel`) for relative-source matching and
/// `Any` access for resolver downcasts.
pub trait ObjectInstance: Send + Sync {
    fn type_name(&self) -> &str;
    fn as_any(&self) -> &dyn Any;
}

pub type ObjectRef = Arc<dyn ObjectInstance>;

#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Char(char),
    SByte(i8),
    Byte(u8),
    Int16(i16),
    UInt16(u16),
    Int32(i32),
    UInt32(u32),
    Int64(i64),
    UInt64(u64),
    Single(f32),
    Double(f64),
    String(String),
    DateTime(DateTime),
    Object(ObjectRef),
    Lambda(Arc<LambdaValue>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }
}

/// Runtime type of a value as the coercion engine sees it.
pub fn runtime_ty(value: &Value) -> Ty {
    let code = match value {
        Value::Null => TypeCode::Empty,
        Value::Bool(_) => TypeCode::Boolean,
        Value::Char(_) => TypeCode::Char,
        Value::SByte(_) => TypeCode::SByte,
        Value::Byte(_) => TypeCode::Byte,
        Value::Int16(_) => TypeCode::Int16,
        Value::UInt16(_) => TypeCode::UInt16,
        Value::Int32(_) => TypeCode::Int32,
        Value::UInt32(_) => TypeCode::UInt32,
        Value::Int64(_) => TypeCode::Int64,
        Value::UInt64(_) => TypeCode::UInt64,
        Value::Single(_) => TypeCode::Single,
        Value::Double(_) => TypeCode::Double,
        Value::String(_) => TypeCode::String,
        Value::DateTime(_) => TypeCode::DateTime,
        Value::Object(_) | Value::Lambda(_) => TypeCode::Object,
    };
    Ty::new(code)
}

fn as_i128(value: &Value) -> Option<i128> {
    match value {
        Value::SByte(n) => Some(*n as i128),
        Value::Byte(n) => Some(*n as i128),
        Value::Int16(n) => Some(*n as i128),
        Value::UInt16(n) => Some(*n as i128),
        Value::Int32(n) => Some(*n as i128),
        Value::UInt32(n) => Some(*n as i128),
        Value::Int64(n) => Some(*n as i128),
        Value::UInt64(n) => Some(*n as i128),
        _ => None,
    }
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Single(n) => Some(*n as f64),
        Value::Double(n) => Some(*n),
        _ => as_i128(value).map(|n| n as f64),
    }
}

/// Implicitly convert `value` to type `to` per the widening table. Returns
/// None when no implicit conversion exists; never narrows.
pub fn convert_value(value: &Value, to: Ty) -> Option<Value> {
    let from = runtime_ty(value);
    if from.code == to.code {
        return Some(value.clone());
    }
    if value.is_null() {
        // Null flows into any reference or nullable slot.
        return (!to.is_value_type() || to.nullable).then_some(Value::Null);
    }
    match to.code {
        // Boxing is identity in this value model.
        TypeCode::Object => Some(value.clone()),
        _ if !crate::coerce::is_implicitly_convertible(from.code, to.code) => None,
        TypeCode::Int16 => as_i128(value).map(|n| Value::Int16(n as i16)),
        TypeCode::UInt16 => as_i128(value).map(|n| Value::UInt16(n as u16)),
        TypeCode::Int32 => as_i128(value).map(|n| Value::Int32(n as i32)),
        TypeCode::UInt32 => as_i128(value).map(|n| Value::UInt32(n as u32)),
        TypeCode::Int64 => as_i128(value).map(|n| Value::Int64(n as i64)),
        TypeCode::UInt64 => as_i128(value).map(|n| Value::UInt64(n as u64)),
        TypeCode::Single => as_f64(value).map(|n| Value::Single(n as f32)),
        TypeCode::Double => as_f64(value).map(Value::Double),
        _ => None,
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        use Value::*;
        match (self, other) {
            (Null, Null) => true,
            (Bool(a), Bool(b)) => a == b,
            (Char(a), Char(b)) => a == b,
            (SByte(a), SByte(b)) => a == b,
            (Byte(a), Byte(b)) => a == b,
            (Int16(a), Int16(b)) => a == b,
            (UInt16(a), UInt16(b)) => a == b,
            (Int32(a), Int32(b)) => a == b,
            (UInt32(a), UInt32(b)) => a == b,
            (Int64(a), Int64(b)) => a == b,
            (UInt64(a), UInt64(b)) => a == b,
            (Single(a), Single(b)) => a == b,
            (Double(a), Double(b)) => a == b,
            (String(a), String(b)) => a == b,
            (DateTime(a), DateTime(b)) => a == b,
            (Object(a), Object(b)) => Arc::ptr_eq(a, b),
            (Lambda(a), Lambda(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Value::*;
        match self {
            Null => write!(f, "Null"),
            Bool(v) => write!(f, "Bool({v})"),
            Char(v) => write!(f, "Char({v:?})"),
            SByte(v) => write!(f, "SByte({v})"),
            Byte(v) => write!(f, "Byte({v})"),
            Int16(v) => write!(f, "Int16({v})"),
            UInt16(v) => write!(f, "UInt16({v})"),
            Int32(v) => write!(f, "Int32({v})"),
            UInt32(v) => write!(f, "UInt32({v})"),
            Int64(v) => write!(f, "Int64({v})"),
            UInt64(v) => write!(f, "UInt64({v})"),
            Single(v) => write!(f, "Single({v})"),
            Double(v) => write!(f, "Double({v})"),
            String(v) => write!(f, "String({v:?})"),
            DateTime(v) => write!(f, "DateTime({v})"),
            Object(o) => write!(f, "Object({})", o.type_name()),
            Lambda(l) => write!(f, "Lambda(|{}|)", l.params().join(", ")),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Value::*;
        match self {
            Null => Ok(()),
            Bool(v) => write!(f, "{v}"),
            Char(v) => write!(f, "{v}"),
            SByte(v) => write!(f, "{v}"),
            Byte(v) => write!(f, "{v}"),
            Int16(v) => write!(f, "{v}"),
            UInt16(v) => write!(f, "{v}"),
            Int32(v) => write!(f, "{v}"),
            UInt32(v) => write!(f, "{v}"),
            Int64(v) => write!(f, "{v}"),
            UInt64(v) => write!(f, "{v}"),
            Single(v) => write!(f, "{v}"),
            Double(v) => write!(f, "{v}"),
            String(v) => write!(f, "{v}"),
            DateTime(v) => write!(f, "{v}"),
            Object(o) => write!(f, "{}", o.type_name()),
            Lambda(_) => write!(f, "<lambda>"),
        }
    }
}

// ============ DateTime ============

/// Minimal civil date-time, seconds precision. Enough for interpolation
/// format codes and ordering comparisons; no time zones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DateTime {
    pub year: i32,
    pub month: u8,
    pub day: u8,
    pub hour: u8,
    pub minute: u8,
    pub second: u8,
}

impl DateTime {
    pub fn new(year: i32, month: u8, day: u8, hour: u8, minute: u8, second: u8) -> Self {
        DateTime {
            year,
            month,
            day,
            hour,
            minute,
            second,
        }
    }

    pub fn date(year: i32, month: u8, day: u8) -> Self {
        Self::new(year, month, day, 0, 0, 0)
    }

    /// Standard format codes: `d` short date, `t` short time, `g` general.
    /// Unrecognized codes fall back to `Display`.
    pub fn format(&self, code: &str) -> String {
        match code {
            "d" => format!("{}/{}/{}", self.month, self.day, self.year),
            "t" => format!("{:02}:{:02}", self.hour, self.minute),
            "g" => format!(
                "{}/{}/{} {:02}:{:02}",
                self.month, self.day, self.year, self.hour, self.minute
            ),
            _ => self.to_string(),
        }
    }
}

impl fmt::Display for DateTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{} {:02}:{:02}:{:02}",
            self.month, self.day, self.year, self.hour, self.minute, self.second
        )
    }
}

// ============ Formatting ============

/// Format one interpolation hole: apply the format code, then pad to the
/// alignment width (positive right-aligns, negative left-aligns).
pub fn format_value(value: &Value, format: Option<&str>, alignment: Option<i32>) -> String {
    let base = match (format, value) {
        (Some(code), Value::DateTime(dt)) => dt.format(code),
        _ => value.to_string(),
    };
    match alignment {
        Some(width) if width >= 0 => format!("{base:>width$}", width = width as usize),
        Some(width) => format!("{base:<width$}", width = (-width) as usize),
        None => base,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn convert_widens_but_never_narrows() {
        assert_eq!(
            convert_value(&Value::SByte(-3), Ty::new(TypeCode::Int32)),
            Some(Value::Int32(-3))
        );
        assert_eq!(
            convert_value(&Value::Int32(7), Ty::new(TypeCode::Double)),
            Some(Value::Double(7.0))
        );
        assert_eq!(convert_value(&Value::Int64(7), Ty::new(TypeCode::Int32)), None);
        assert_eq!(
            convert_value(&Value::String("x".into()), Ty::new(TypeCode::Int32)),
            None
        );
    }

    #[test]
    fn null_converts_to_reference_and_nullable_only() {
        assert_eq!(
            convert_value(&Value::Null, Ty::new(TypeCode::Object)),
            Some(Value::Null)
        );
        assert_eq!(
            convert_value(&Value::Null, Ty::nullable(TypeCode::Int32)),
            Some(Value::Null)
        );
        assert_eq!(convert_value(&Value::Null, Ty::new(TypeCode::Int32)), None);
    }

    #[test]
    fn alignment_pads_both_directions() {
        assert_eq!(format_value(&Value::Int32(5), None, Some(3)), "  5");
        assert_eq!(format_value(&Value::Int32(5), None, Some(-3)), "5  ");
        assert_eq!(format_value(&Value::Int32(500), None, Some(2)), "500");
    }

    #[test]
    fn date_time_short_date_code() {
        let dt = DateTime::date(2024, 5, 17);
        assert_eq!(dt.format("d"), "5/17/2024");
        assert_eq!(format_value(&Value::DateTime(dt), Some("t"), None), "00:00");
    }
}
