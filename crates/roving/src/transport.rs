//! Collaborator interfaces: message delivery and object marshalling.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{MarshalError, TransportError};
use crate::id::NodeAddress;
use crate::message::{Envelope, Response};
use crate::remotable::Remotable;

/// Delivers requests to named nodes and returns their responses.
///
/// Delivery is at-least-once per explicit retry with no ordering across
/// independent calls. Implementations must not call back into the sending
/// node while holding their own locks.
pub trait Transport: Send + Sync {
    /// Sends `envelope` to `to` and waits for the reply.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when the message cannot be delivered.
    fn send(&self, to: &NodeAddress, envelope: Envelope) -> Result<Response, TransportError>;
}

/// Encodes and decodes the full state of migrating objects.
pub trait Marshaller: Send + Sync {
    /// Serializes `object`.
    ///
    /// # Errors
    ///
    /// Fails when the object's type is unknown to the marshaller.
    fn encode(&self, object: &dyn Remotable) -> Result<Vec<u8>, MarshalError>;

    /// Rebuilds an object from bytes produced by [`Marshaller::encode`].
    ///
    /// # Errors
    ///
    /// Fails on malformed input or an unknown kind.
    fn decode(&self, bytes: &[u8]) -> Result<Arc<dyn Remotable>, MarshalError>;
}

type EncodeFn = dyn Fn(&dyn Any) -> Result<serde_json::Value, MarshalError> + Send + Sync;
type DecodeFn = dyn Fn(serde_json::Value) -> Result<Arc<dyn Remotable>, MarshalError> + Send + Sync;

struct Codec {
    kind: &'static str,
    encode: Box<EncodeFn>,
    decode: Box<DecodeFn>,
}

#[derive(Serialize, Deserialize)]
struct Tagged {
    kind: String,
    state: serde_json::Value,
}

/// A [`Marshaller`] for serde types, keyed by registered type.
///
/// State is written as JSON tagged with the type name, so every node that may
/// receive an object must register the same types.
#[derive(Default)]
pub struct KindMarshaller {
    by_type: RwLock<HashMap<TypeId, Arc<Codec>>>,
    by_kind: RwLock<HashMap<&'static str, Arc<Codec>>>,
}

impl KindMarshaller {
    /// Creates an empty marshaller.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T` for encoding and decoding. Re-registering is a no-op.
    pub fn register<T>(&self) -> &Self
    where
        T: Remotable + Serialize + DeserializeOwned,
    {
        let kind = std::any::type_name::<T>();
        let codec = Arc::new(Codec {
            kind,
            encode: Box::new(move |any| {
                let object = any
                    .downcast_ref::<T>()
                    .ok_or(MarshalError::UnregisteredType(kind))?;
                Ok(serde_json::to_value(object)?)
            }),
            decode: Box::new(|state| {
                let object: T = serde_json::from_value(state)?;
                Ok(Arc::new(object) as Arc<dyn Remotable>)
            }),
        });
        self.by_type
            .write()
            .entry(TypeId::of::<T>())
            .or_insert_with(|| Arc::clone(&codec));
        self.by_kind.write().entry(kind).or_insert(codec);
        self
    }

    /// Returns `true` if `T` has been registered.
    #[must_use]
    pub fn is_registered<T: Remotable>(&self) -> bool {
        self.by_type.read().contains_key(&TypeId::of::<T>())
    }
}

impl Marshaller for KindMarshaller {
    fn encode(&self, object: &dyn Remotable) -> Result<Vec<u8>, MarshalError> {
        let any = object.as_any();
        let codec = self
            .by_type
            .read()
            .get(&Any::type_id(any))
            .cloned()
            .ok_or(MarshalError::UnregisteredType("<unregistered remotable>"))?;
        let tagged = Tagged {
            kind: codec.kind.to_owned(),
            state: (codec.encode)(any)?,
        };
        Ok(serde_json::to_vec(&tagged)?)
    }

    fn decode(&self, bytes: &[u8]) -> Result<Arc<dyn Remotable>, MarshalError> {
        let tagged: Tagged = serde_json::from_slice(bytes)?;
        let codec = self
            .by_kind
            .read()
            .get(tagged.kind.as_str())
            .cloned()
            .ok_or_else(|| MarshalError::UnknownKind(tagged.kind.clone()))?;
        (codec.decode)(tagged.state)
    }
}

impl std::fmt::Debug for KindMarshaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kinds: Vec<&'static str> = self.by_kind.read().keys().copied().collect();
        f.debug_struct("KindMarshaller")
            .field("kinds", &kinds)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicI64, Ordering};

    use super::*;
    use crate::error::InvokeError;

    #[derive(Serialize, Deserialize)]
    struct Cell {
        value: AtomicI64,
    }

    #[crate::remote_methods]
    impl Cell {
        pub fn get(&self, _args: &[u8]) -> Result<Vec<u8>, InvokeError> {
            Ok(self.value.load(Ordering::SeqCst).to_le_bytes().to_vec())
        }
    }

    #[derive(Serialize, Deserialize)]
    struct Other;

    #[crate::remote_methods]
    impl Other {}

    #[test]
    fn encodes_and_rebuilds_registered_types() {
        let marshaller = KindMarshaller::new();
        marshaller.register::<Cell>();
        let bytes = marshaller
            .encode(&Cell {
                value: AtomicI64::new(9),
            })
            .unwrap();
        let rebuilt = marshaller.decode(&bytes).unwrap();
        let cell = rebuilt.as_any().downcast_ref::<Cell>().unwrap();
        assert_eq!(cell.value.load(Ordering::SeqCst), 9);
    }

    #[test]
    fn rejects_unregistered_types() {
        let marshaller = KindMarshaller::new();
        marshaller.register::<Cell>();
        assert!(matches!(
            marshaller.encode(&Other),
            Err(MarshalError::UnregisteredType(_))
        ));
        assert!(!marshaller.is_registered::<Other>());

        let foreign = br#"{"kind":"nope","state":null}"#;
        assert!(matches!(
            marshaller.decode(foreign),
            Err(MarshalError::UnknownKind(kind)) if kind == "nope"
        ));
    }
}
