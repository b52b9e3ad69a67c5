//! Self-describing typed records and the per-endpoint type registry.
//!
//! A [`Record`] pairs a type tag with the bincode encoding of a concrete
//! value. Records travel over TCP inside a length-framed bincode stream, so
//! a decoder can always recover record boundaries; the tag lets it pick the
//! decode function that reconstructs the original concrete type. Decode
//! functions are held in a [`TypeRegistry`], populated by the owning
//! receiver before values of that type arrive.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::{
    any::{self, Any},
    collections::HashMap,
    fmt,
};
use thiserror::Error;

/// Marker for values that can cross the wire: serializable in both
/// directions, identifiable at runtime, and movable between tasks.
///
/// Blanket-implemented; user types only need `Serialize`, `Deserialize`,
/// `Send` and `'static`.
pub trait WireValue: Serialize + DeserializeOwned + Any + Send {}

impl<T: Serialize + DeserializeOwned + Any + Send> WireValue for T {}

/// The stable identifier a type is known by on the wire and in dispatch
/// tables. Both ends of a connection derive it from the same type
/// definition, which is what keeps their registries in agreement.
pub(crate) fn wire_tag<T: Any>() -> &'static str {
    any::type_name::<T>()
}

/// One self-describing value on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Record {
    pub(crate) type_tag: String,
    pub(crate) payload: Vec<u8>,
}

impl Record {
    /// The tag of the encoded value's concrete type.
    pub fn type_tag(&self) -> &str {
        &self.type_tag
    }
}

/// Encode a value into a [`Record`]. The admission check against a sender's
/// registered set happens in the sender; this is the raw codec step.
pub(crate) fn encode_record<T: WireValue>(value: &T) -> Result<Record, bincode::Error> {
    Ok(Record {
        type_tag: wire_tag::<T>().to_owned(),
        payload: bincode::serialize(value)?,
    })
}

/// Decode a record's payload directly as `T`, without registry involvement.
/// Used where the expected type is statically known (nested RPC values).
pub(crate) fn decode_payload<T: WireValue>(record: &Record) -> Result<T, bincode::Error> {
    bincode::deserialize(&record.payload)
}

type DecodeFn = fn(&Record) -> Result<AnyValue, CodecError>;

fn decode_erased<T: WireValue>(record: &Record) -> Result<AnyValue, CodecError> {
    let value: T = decode_payload(record)?;
    Ok(AnyValue {
        tag: wire_tag::<T>(),
        value: Box::new(value),
    })
}

/// Maps type tags to decode functions. Membership doubles as the receiver's
/// accepted set: a record whose tag is absent cannot be reconstructed and is
/// therefore not dispatched.
#[derive(Default)]
pub(crate) struct TypeRegistry {
    decoders: HashMap<&'static str, DecodeFn>,
}

impl TypeRegistry {
    pub(crate) fn register<T: WireValue>(&mut self) {
        self.decoders.insert(wire_tag::<T>(), decode_erased::<T>);
    }

    pub(crate) fn decode(&self, record: &Record) -> Result<AnyValue, CodecError> {
        let decode = self
            .decoders
            .get(record.type_tag.as_str())
            .ok_or_else(|| CodecError::UnknownTag(record.type_tag.clone()))?;
        decode(record)
    }
}

/// A decoded value of some registered type, dispatchable by tag and
/// recoverable as its concrete type via [`AnyValue::downcast`].
pub struct AnyValue {
    tag: &'static str,
    value: Box<dyn Any + Send>,
}

impl AnyValue {
    /// The wire tag of the contained value's type.
    pub fn tag(&self) -> &str {
        self.tag
    }

    /// Whether the contained value is a `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.value.is::<T>()
    }

    /// Recover the concrete value, or get `self` back if the type guess was
    /// wrong.
    pub fn downcast<T: Any>(self) -> Result<T, AnyValue> {
        match self.value.downcast::<T>() {
            Ok(boxed) => Ok(*boxed),
            Err(value) => Err(AnyValue {
                tag: self.tag,
                value,
            }),
        }
    }
}

impl fmt::Debug for AnyValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("AnyValue").field("tag", &self.tag).finish()
    }
}

#[derive(Debug, Error)]
pub enum CodecError {
    /// The record's tag has no registered decode function.
    #[error("unknown type tag {0:?}")]
    UnknownTag(String),

    /// The tag was recognized but the payload did not parse as that type.
    #[error("decoding payload: {0}")]
    Payload(#[from] bincode::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Point {
        x: i32,
        y: i32,
    }

    #[test]
    fn round_trip_through_registry() {
        let mut registry = TypeRegistry::default();
        registry.register::<Point>();

        let original = Point { x: 3, y: -7 };
        let record = encode_record(&original).unwrap();
        assert_eq!(record.type_tag(), wire_tag::<Point>());

        let decoded = registry.decode(&record).unwrap();
        assert!(decoded.is::<Point>());
        assert_eq!(decoded.downcast::<Point>().unwrap(), original);
    }

    #[test]
    fn unknown_tag_is_an_error() {
        let registry = TypeRegistry::default();
        let record = encode_record(&Point { x: 0, y: 0 }).unwrap();
        match registry.decode(&record) {
            Err(CodecError::UnknownTag(tag)) => assert_eq!(tag, wire_tag::<Point>()),
            other => panic!("expected UnknownTag, got {other:?}"),
        }
    }

    #[test]
    fn registration_is_idempotent() {
        let mut registry = TypeRegistry::default();
        registry.register::<String>();
        registry.register::<String>();

        let record = encode_record(&"hello".to_string()).unwrap();
        let decoded = registry.decode(&record).unwrap();
        assert_eq!(decoded.downcast::<String>().unwrap(), "hello");
    }

    #[test]
    fn downcast_to_wrong_type_returns_value() {
        let mut registry = TypeRegistry::default();
        registry.register::<i64>();

        let record = encode_record(&42i64).unwrap();
        let decoded = registry.decode(&record).unwrap();
        let back = decoded.downcast::<String>().unwrap_err();
        assert_eq!(back.downcast::<i64>().unwrap(), 42);
    }

    #[test]
    fn unit_is_wire_eligible() {
        let mut registry = TypeRegistry::default();
        registry.register::<()>();
        let record = encode_record(&()).unwrap();
        registry.decode(&record).unwrap().downcast::<()>().unwrap();
    }
}
