//! Serializer registry shared by both pipe endpoints.
//!
//! Every message type sent or received over an endpoint must be registered before use. A registration binds a Rust
//! type to a serializer, and the serializer to a numeric id that travels in each frame. Ids only need to be unique
//! within one registry; the two endpoints of a connection must agree on them.
//!
//! The registry is populated once, then shared read-only behind an `Arc`.

use std::any::{Any, TypeId, type_name};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::error::{PipeError, PipeResult};

/// A type-erased message travelling through the transport.
pub type Message = Box<dyn Any + Send>;

/// Turns one message type into payload bytes and back.
pub trait NamedPipeSerializer: Send + Sync {
    /// Id written into every frame produced by this serializer.
    fn id(&self) -> i32;

    /// Append the payload for `value` to `out`. `value` is always of the type this serializer was registered for.
    fn serialize(&self, value: &(dyn Any + Send), out: &mut Vec<u8>) -> PipeResult<()>;

    fn deserialize(&self, payload: &[u8]) -> PipeResult<Message>;
}

/// JSON serializer for any `serde` message type.
pub struct JsonSerializer<T> {
    id: i32,
    _marker: PhantomData<fn() -> T>,
}

impl<T> JsonSerializer<T> {
    pub fn new(id: i32) -> Self {
        Self {
            id,
            _marker: PhantomData,
        }
    }
}

impl<T> NamedPipeSerializer for JsonSerializer<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    fn id(&self) -> i32 {
        self.id
    }

    fn serialize(&self, value: &(dyn Any + Send), out: &mut Vec<u8>) -> PipeResult<()> {
        let value = value.downcast_ref::<T>().ok_or(PipeError::UnregisteredType(type_name::<T>()))?;
        serde_json::to_writer(out, value).map_err(|e| PipeError::Serialize {
            type_name: type_name::<T>(),
            reason: e.to_string(),
        })
    }

    fn deserialize(&self, payload: &[u8]) -> PipeResult<Message> {
        let value: T = serde_json::from_slice(payload).map_err(|e| PipeError::Deserialize {
            id: self.id,
            reason: e.to_string(),
        })?;
        Ok(Box::new(value))
    }
}

/// Empty acknowledgement for requests that carry no reply data.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VoidResponse;

/// Serializer for [`VoidResponse`]: an empty payload.
pub struct VoidSerializer {
    id: i32,
}

impl VoidSerializer {
    pub fn new(id: i32) -> Self {
        Self { id }
    }
}

impl NamedPipeSerializer for VoidSerializer {
    fn id(&self) -> i32 {
        self.id
    }

    fn serialize(&self, _value: &(dyn Any + Send), _out: &mut Vec<u8>) -> PipeResult<()> {
        Ok(())
    }

    fn deserialize(&self, payload: &[u8]) -> PipeResult<Message> {
        if !payload.is_empty() {
            return Err(PipeError::Deserialize {
                id: self.id,
                reason: format!("expected an empty payload, got {} bytes", payload.len()),
            });
        }
        Ok(Box::new(VoidResponse))
    }
}

struct Registration {
    type_name: &'static str,
    serializer: Arc<dyn NamedPipeSerializer>,
}

/// Two-way mapping `type ↔ id ↔ serializer` for one endpoint.
#[derive(Default)]
pub struct SerializerRegistry {
    by_type: HashMap<TypeId, Registration>,
    by_id: HashMap<i32, Arc<dyn NamedPipeSerializer>>,
}

impl SerializerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `serializer` for messages of type `T`.
    pub fn register<T, S>(&mut self, serializer: S) -> PipeResult<&mut Self>
    where
        T: Any + Send,
        S: NamedPipeSerializer + 'static,
    {
        let id = serializer.id();
        if self.by_id.contains_key(&id) {
            return Err(PipeError::DuplicateId(id));
        }
        if self.by_type.contains_key(&TypeId::of::<T>()) {
            return Err(PipeError::DuplicateType(type_name::<T>()));
        }

        let serializer: Arc<dyn NamedPipeSerializer> = Arc::new(serializer);
        self.by_id.insert(id, Arc::clone(&serializer));
        self.by_type.insert(
            TypeId::of::<T>(),
            Registration {
                type_name: type_name::<T>(),
                serializer,
            },
        );
        Ok(self)
    }

    /// Register a JSON serializer for `T` under `id`.
    pub fn register_json<T>(&mut self, id: i32) -> PipeResult<&mut Self>
    where
        T: Serialize + DeserializeOwned + Send + 'static,
    {
        self.register::<T, _>(JsonSerializer::<T>::new(id))
    }

    /// Register the empty-payload [`VoidResponse`] under `id`.
    pub fn register_void(&mut self, id: i32) -> PipeResult<&mut Self> {
        self.register::<VoidResponse, _>(VoidSerializer::new(id))
    }

    /// Serializer registered for the concrete type of `value`.
    pub fn for_value(&self, value: &(dyn Any + Send)) -> PipeResult<&Arc<dyn NamedPipeSerializer>> {
        self.by_type
            .get(&value.type_id())
            .map(|r| &r.serializer)
            .ok_or(PipeError::UnregisteredType("<type-erased message>"))
    }

    /// Serializer registered for `T`.
    pub fn for_type<T: Any>(&self) -> PipeResult<&Arc<dyn NamedPipeSerializer>> {
        self.by_type
            .get(&TypeId::of::<T>())
            .map(|r| &r.serializer)
            .ok_or(PipeError::UnregisteredType(type_name::<T>()))
    }

    /// Serializer registered under `id`.
    pub fn for_id(&self, id: i32) -> PipeResult<&Arc<dyn NamedPipeSerializer>> {
        self.by_id.get(&id).ok_or(PipeError::UnknownSerializerId(id))
    }

    /// Registered type names, for diagnostics.
    pub fn registered_types(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.by_type.values().map(|r| r.type_name).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Serialize a typed message into `(serializer id, payload)`.
    pub fn encode<T: Any + Send>(&self, value: &T) -> PipeResult<(i32, Vec<u8>)> {
        let serializer = self.for_type::<T>()?;
        let mut payload = Vec::new();
        serializer.serialize(value, &mut payload)?;
        Ok((serializer.id(), payload))
    }

    /// Serialize a type-erased message into `(serializer id, payload)`.
    pub fn encode_erased(&self, value: &(dyn Any + Send)) -> PipeResult<(i32, Vec<u8>)> {
        let serializer = self.for_value(value)?;
        let mut payload = Vec::new();
        serializer.serialize(value, &mut payload)?;
        Ok((serializer.id(), payload))
    }

    /// Deserialize a payload tagged with `id`.
    pub fn decode(&self, id: i32, payload: &[u8]) -> PipeResult<Message> {
        self.for_id(id)?.deserialize(payload)
    }
}
