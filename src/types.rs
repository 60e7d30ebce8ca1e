use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// The scalar types a message field can carry on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum Type {
    Bool,
    Int,
    Float,
    Double,
    String,
    Bytes,
}

impl Type {
    fn name(&self) -> &'static str {
        use Type::*;
        match self {
            Bool => "Bool",
            Int => "Int",
            Float => "Float",
            Double => "Double",
            String => "String",
            Bytes => "Bytes",
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f32),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn typ(&self) -> Type {
        match self {
            Value::Bool(_) => Type::Bool,
            Value::Int(_) => Type::Int,
            Value::Float(_) => Type::Float,
            Value::Double(_) => Type::Double,
            Value::String(_) => Type::String,
            Value::Bytes(_) => Type::Bytes,
        }
    }
}

pub trait Encode {
    fn encode(val: Self) -> Value;
}

pub trait Decode: Sized {
    fn decode(val: Value) -> Result<Self, TypeMismatch>;
}

/// A Rust type usable as a message field.
///
/// Plain scalars have implicit presence: they are always written and decode
/// to their `Default` when the field is absent. `Option<T>` has explicit
/// presence: `None` is not written and an absent field decodes to `None`.
pub trait FieldValue: Sized {
    const TYPE: Type;

    fn to_value(&self) -> Option<Value>;
    fn from_value(value: Option<Value>) -> Result<Self, TypeMismatch>;
}

macro_rules! impl_scalar {
    ($rust_type:ty, $variant:ident) => {
        impl Encode for $rust_type {
            fn encode(val: $rust_type) -> Value {
                Value::$variant(val)
            }
        }

        impl Decode for $rust_type {
            fn decode(val: Value) -> Result<Self, TypeMismatch> {
                match val {
                    Value::$variant(v) => Ok(v),
                    _ => Err(TypeMismatch::new(val, Type::$variant)),
                }
            }
        }

        impl FieldValue for $rust_type {
            const TYPE: Type = Type::$variant;

            fn to_value(&self) -> Option<Value> {
                Some(<$rust_type as Encode>::encode(self.clone()))
            }

            fn from_value(value: Option<Value>) -> Result<Self, TypeMismatch> {
                match value {
                    Some(value) => <$rust_type as Decode>::decode(value),
                    None => Ok(<$rust_type>::default()),
                }
            }
        }

        impl FieldValue for Option<$rust_type> {
            const TYPE: Type = Type::$variant;

            fn to_value(&self) -> Option<Value> {
                self.clone().map(<$rust_type as Encode>::encode)
            }

            fn from_value(value: Option<Value>) -> Result<Self, TypeMismatch> {
                value.map(<$rust_type as Decode>::decode).transpose()
            }
        }
    };
}

impl_scalar!(bool, Bool);
impl_scalar!(i64, Int);
impl_scalar!(f32, Float);
impl_scalar!(f64, Double);
impl_scalar!(String, String);
impl_scalar!(Vec<u8>, Bytes);

#[derive(Debug, Clone, PartialEq, Error)]
#[error("type mismatch: {value:?} is not a {expected_type}")]
pub struct TypeMismatch {
    value: Value,
    expected_type: Type,
}

impl TypeMismatch {
    pub(crate) fn new(value: Value, expected_type: Type) -> Self {
        Self {
            value,
            expected_type,
        }
    }

    pub fn expected_type(&self) -> Type {
        self.expected_type
    }
}
