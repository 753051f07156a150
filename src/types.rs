//! Typed values carried by call and reply envelopes.
//!
//! Every argument and return value crosses the wire as a [`Value`]. Rust types opt
//! in through [`Typed`], [`Encode`] and [`Decode`]; decoding checks the value
//! against the type's descriptor and reports a [`TypeMismatch`] instead of
//! guessing. Types the value model does not know about can still travel as
//! opaque bincode payloads, see [`opaque_value!`](crate::opaque_value).

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Descriptor of a wire type. Method keys are built from these.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
pub enum Type {
    Nil,
    Bool,
    Int,
    Float,
    String,
    List(Box<Type>),
    Optional(Box<Type>),
    Opaque(String),
}

impl Type {
    pub fn list(item: Type) -> Self {
        Type::List(Box::new(item))
    }

    pub fn optional(inner: Type) -> Self {
        Type::Optional(Box::new(inner))
    }

    pub fn opaque(name: impl Into<String>) -> Self {
        Type::Opaque(name.into())
    }

    fn name(&self) -> &'static str {
        use Type::*;
        match self {
            Nil => "Nil",
            Bool => "Bool",
            Int => "Int",
            Float => "Float",
            String => "String",
            List(_) => "List",
            Optional(_) => "Optional",
            Opaque(_) => "Opaque",
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())?;
        match self {
            Type::List(inner) | Type::Optional(inner) => write!(f, "<{inner}>"),
            Type::Opaque(name) => write!(f, "({name})"),
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub enum Value {
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    List(Vec<Value>),
    /// Presence is tagged so `Some(())` and `Some(None)` survive the trip.
    Optional(Option<Box<Value>>),
    Opaque { type_name: String, bytes: Vec<u8> },
}

impl Value {
    /// Short name of the variant, used in mismatch reports.
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Nil => "Nil",
            Value::Bool(_) => "Bool",
            Value::Int(_) => "Int",
            Value::Float(_) => "Float",
            Value::String(_) => "String",
            Value::List(_) => "List",
            Value::Optional(_) => "Optional",
            Value::Opaque { .. } => "Opaque",
        }
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Nil
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

/// Rust types with a wire type descriptor.
pub trait Typed {
    fn rpc_type() -> Type;
}

pub trait Encode: Typed {
    fn encode(val: Self) -> Result<Value, ValueError>;
}

pub trait Decode: Typed + Sized {
    fn decode(val: Value) -> Result<Self, ValueError>;
}

macro_rules! impl_encode_decode {
    ($rust_type:ty, $rpc_type:expr, $encode_name:pat => $encode_expr:expr, $($from_rpc_arm:tt)*) => {
        impl Typed for $rust_type {
            fn rpc_type() -> Type {
                $rpc_type
            }
        }

        impl Encode for $rust_type {
            fn encode($encode_name: $rust_type) -> Result<Value, ValueError> {
                Ok($encode_expr)
            }
        }

        impl Decode for $rust_type {
            fn decode(val: Value) -> Result<Self, ValueError> {
                Ok(match val {
                    $($from_rpc_arm)*,
                    _ => return Err(TypeMismatch::new(&val, <Self as Typed>::rpc_type()).into()),
                })
            }
        }
    };
}

impl_encode_decode!((), Type::Nil, () => Value::Nil, Value::Nil => ());
impl_encode_decode!(bool, Type::Bool, b => Value::Bool(b), Value::Bool(b) => b);
impl_encode_decode!(f64, Type::Float, x => Value::Float(x), Value::Float(x) => x);
impl_encode_decode!(String, Type::String, s => Value::String(s), Value::String(s) => s);

// All integers share the `Int` descriptor; narrowing is checked both ways.
macro_rules! impl_integer {
    ($($int:ty),*) => {$(
        impl Typed for $int {
            fn rpc_type() -> Type {
                Type::Int
            }
        }

        impl Encode for $int {
            fn encode(n: $int) -> Result<Value, ValueError> {
                i64::try_from(n).map(Value::Int).map_err(|_| ValueError::OutOfRange {
                    value: n.to_string(),
                    target: "i64".to_owned(),
                })
            }
        }

        impl Decode for $int {
            fn decode(val: Value) -> Result<Self, ValueError> {
                match val {
                    Value::Int(n) => <$int>::try_from(n).map_err(|_| ValueError::OutOfRange {
                        value: n.to_string(),
                        target: stringify!($int).to_owned(),
                    }),
                    _ => Err(TypeMismatch::new(&val, Type::Int).into()),
                }
            }
        }
    )*};
}

impl_integer!(i32, i64, u32, u64);

impl<T: Typed> Typed for Vec<T> {
    fn rpc_type() -> Type {
        Type::list(T::rpc_type())
    }
}

impl<T: Encode> Encode for Vec<T> {
    fn encode(items: Self) -> Result<Value, ValueError> {
        items
            .into_iter()
            .map(T::encode)
            .collect::<Result<Vec<_>, _>>()
            .map(Value::List)
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode(val: Value) -> Result<Self, ValueError> {
        match val {
            Value::List(items) => items.into_iter().map(T::decode).collect(),
            _ => Err(TypeMismatch::new(&val, Self::rpc_type()).into()),
        }
    }
}

impl<T: Typed> Typed for Option<T> {
    fn rpc_type() -> Type {
        Type::optional(T::rpc_type())
    }
}

impl<T: Encode> Encode for Option<T> {
    fn encode(opt: Self) -> Result<Value, ValueError> {
        let inner = opt.map(T::encode).transpose()?;
        Ok(Value::Optional(inner.map(Box::new)))
    }
}

impl<T: Decode> Decode for Option<T> {
    fn decode(val: Value) -> Result<Self, ValueError> {
        match val {
            Value::Optional(None) => Ok(None),
            Value::Optional(Some(inner)) => T::decode(*inner).map(Some),
            _ => Err(TypeMismatch::new(&val, Self::rpc_type()).into()),
        }
    }
}

/// Encodes `val` as an opaque bincode payload tagged with `type_name`.
pub fn encode_opaque<T: Serialize>(type_name: &str, val: &T) -> Result<Value, ValueError> {
    let bytes = bincode::serialize(val).map_err(|e| ValueError::Opaque {
        type_name: type_name.to_owned(),
        message: e.to_string(),
    })?;
    Ok(Value::Opaque {
        type_name: type_name.to_owned(),
        bytes,
    })
}

/// Decodes an opaque payload, refusing payloads tagged with another type.
pub fn decode_opaque<T: DeserializeOwned>(type_name: &str, val: Value) -> Result<T, ValueError> {
    match val {
        Value::Opaque {
            type_name: ref found,
            ref bytes,
        } if found == type_name => bincode::deserialize(bytes).map_err(|e| ValueError::Opaque {
            type_name: type_name.to_owned(),
            message: e.to_string(),
        }),
        _ => Err(TypeMismatch::new(&val, Type::opaque(type_name)).into()),
    }
}

/// An ordered argument list. Implemented for tuples of up to six values.
pub trait Arguments: Sized {
    /// Parameter type descriptors, in order.
    fn types() -> Vec<Type>;
    fn encode_all(self) -> Result<Vec<Value>, ValueError>;
    fn decode_all(values: Vec<Value>) -> Result<Self, ValueError>;
}

impl Arguments for () {
    fn types() -> Vec<Type> {
        Vec::new()
    }

    fn encode_all(self) -> Result<Vec<Value>, ValueError> {
        Ok(Vec::new())
    }

    fn decode_all(values: Vec<Value>) -> Result<Self, ValueError> {
        if values.is_empty() {
            Ok(())
        } else {
            Err(ValueError::Arity {
                expected: 0,
                found: values.len(),
            })
        }
    }
}

macro_rules! impl_arguments {
    ($len:expr; $($value:ident : $ty:ident),+) => {
        impl<$($ty: Encode + Decode),+> Arguments for ($($ty,)+) {
            fn types() -> Vec<Type> {
                vec![$($ty::rpc_type()),+]
            }

            fn encode_all(self) -> Result<Vec<Value>, ValueError> {
                let ($($value,)+) = self;
                Ok(vec![$($ty::encode($value)?),+])
            }

            fn decode_all(values: Vec<Value>) -> Result<Self, ValueError> {
                let found = values.len();
                if found != $len {
                    return Err(ValueError::Arity { expected: $len, found });
                }
                let mut values = values.into_iter();
                $(
                    let $value = $ty::decode(
                        values.next().ok_or(ValueError::Arity { expected: $len, found })?,
                    )?;
                )+
                Ok(($($value,)+))
            }
        }
    };
}

impl_arguments!(1; a: A);
impl_arguments!(2; a: A, b: B);
impl_arguments!(3; a: A, b: B, c: C);
impl_arguments!(4; a: A, b: B, c: C, d: D);
impl_arguments!(5; a: A, b: B, c: C, d: D, e: E);
impl_arguments!(6; a: A, b: B, c: C, d: D, e: E, f: F);

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Error)]
#[error("type mismatch: expected {expected}, found {found}")]
pub struct TypeMismatch {
    found: String,
    expected: Type,
}

impl TypeMismatch {
    fn new(value: &Value, expected: Type) -> Self {
        let found = match value {
            Value::Opaque { type_name, .. } => format!("Opaque({type_name})"),
            other => other.kind().to_owned(),
        };
        Self { found, expected }
    }

    pub fn expected(&self) -> &Type {
        &self.expected
    }
}

/// Why a value could not be encoded or decoded.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, Error)]
pub enum ValueError {
    #[error(transparent)]
    Mismatch(#[from] TypeMismatch),

    #[error("{value} does not fit in {target}")]
    OutOfRange { value: String, target: String },

    #[error("opaque {type_name}: {message}")]
    Opaque { type_name: String, message: String },

    #[error("expected {expected} arguments, found {found}")]
    Arity { expected: usize, found: usize },
}
