//! Static types and runtime values for ByteScript
//!
//! Every expression has one of the six primitive types at compile time, and
//! every runtime value is one of the five boxed variants. `void` only exists
//! statically: it is the return type of scripts that produce nothing.

use std::fmt;

/// Primitive type of a ByteScript expression, variable or script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScriptType {
    Bool,
    Int,
    Float,
    String,
    Void,
    Object,
}

impl ScriptType {
    pub fn name(&self) -> &'static str {
        match self {
            ScriptType::Bool => "bool",
            ScriptType::Int => "int",
            ScriptType::Float => "float",
            ScriptType::String => "string",
            ScriptType::Void => "void",
            ScriptType::Object => "object",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "bool" => Some(ScriptType::Bool),
            "int" => Some(ScriptType::Int),
            "float" => Some(ScriptType::Float),
            "string" => Some(ScriptType::String),
            "void" => Some(ScriptType::Void),
            "object" => Some(ScriptType::Object),
            _ => None,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, ScriptType::Int | ScriptType::Float)
    }

    /// The single compatibility rule used for declarations, assignments,
    /// returns and call arguments: exact match, or `int` widening to `float`.
    pub fn is_assignable_from(&self, actual: ScriptType) -> bool {
        *self == actual || (*self == ScriptType::Float && actual == ScriptType::Int)
    }

    /// Parse host-provided text (e.g. a command line argument) as a value of
    /// this type.
    pub fn parse_value(&self, text: &str) -> Option<Value> {
        match self {
            ScriptType::Bool => text.parse::<bool>().ok().map(Value::Bool),
            ScriptType::Int => text.parse::<i32>().ok().map(Value::Int),
            ScriptType::Float => text.parse::<f32>().ok().map(Value::Float),
            ScriptType::String => Some(Value::Str(text.to_string())),
            ScriptType::Object => text
                .strip_prefix('#')
                .unwrap_or(text)
                .parse::<u32>()
                .ok()
                .map(|id| Value::Object(ObjectHandle(id))),
            ScriptType::Void => None,
        }
    }
}

impl fmt::Display for ScriptType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Opaque reference to a host-side object. Scripts can pass these around and
/// compare them, nothing more.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectHandle(pub u32);

/// Runtime values in ByteScript
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    Int(i32),
    Float(f32),
    Str(String),
    Object(ObjectHandle),
}

impl Value {
    pub fn script_type(&self) -> ScriptType {
        match self {
            Value::Bool(_) => ScriptType::Bool,
            Value::Int(_) => ScriptType::Int,
            Value::Float(_) => ScriptType::Float,
            Value::Str(_) => ScriptType::String,
            Value::Object(_) => ScriptType::Object,
        }
    }

    pub fn type_name(&self) -> &'static str {
        self.script_type().name()
    }

    /// Numeric view used by mixed int/float operations.
    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Value::Int(n) => Some(*n as f32),
            Value::Float(n) => Some(*n),
            _ => None,
        }
    }

    /// Equality as seen by the `==` operator: numbers compare across int and
    /// float, everything else only within its own variant.
    pub fn script_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Int(_), Value::Float(_)) | (Value::Float(_), Value::Int(_)) => {
                self.as_f32() == other.as_f32()
            }
            _ => self == other,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(n) => write!(f, "{}", n),
            Value::Str(s) => write!(f, "{}", s),
            Value::Object(handle) => write!(f, "<object #{}>", handle.0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_assignability() {
        assert!(ScriptType::Float.is_assignable_from(ScriptType::Int));
        assert!(!ScriptType::Int.is_assignable_from(ScriptType::Float));
        assert!(ScriptType::String.is_assignable_from(ScriptType::String));
        assert!(!ScriptType::String.is_assignable_from(ScriptType::Int));
        assert!(!ScriptType::Object.is_assignable_from(ScriptType::Void));
    }

    #[test]
    fn test_script_eq_crosses_numeric_types() {
        assert!(Value::Int(2).script_eq(&Value::Float(2.0)));
        assert!(!Value::Int(2).script_eq(&Value::Float(2.5)));
        assert!(!Value::Int(1).script_eq(&Value::Bool(true)));
        assert!(Value::Object(ObjectHandle(4)).script_eq(&Value::Object(ObjectHandle(4))));
    }

    #[test]
    fn test_parse_value() {
        assert_eq!(ScriptType::Int.parse_value("-7"), Some(Value::Int(-7)));
        assert_eq!(ScriptType::Float.parse_value("1.5"), Some(Value::Float(1.5)));
        assert_eq!(ScriptType::Bool.parse_value("yes"), None);
        assert_eq!(
            ScriptType::Object.parse_value("#12"),
            Some(Value::Object(ObjectHandle(12)))
        );
        assert_eq!(ScriptType::Void.parse_value(""), None);
    }
}
