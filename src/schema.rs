//! Message and service declarations.
//!
//! Descriptors are `'static` data produced by the [`message!`](crate::message)
//! and [`service!`](crate::service) macros. They are the runtime form of a
//! schema document: the codec consults them to validate and default fields,
//! the server consults them to route calls.

use crate::{
    codec::CodecError,
    types::{FieldValue, Type, Value},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub enum Label {
    /// Absent on the wire means the type default (or `None`).
    Optional,
    /// Must be present both when encoding and when decoding.
    Required,
}

#[derive(Debug, PartialEq, Eq)]
pub struct FieldDescriptor {
    pub name: &'static str,
    /// Wire position of the field. Never reuse or renumber an id.
    pub id: u32,
    pub ty: Type,
    pub label: Label,
}

#[derive(Debug, PartialEq, Eq)]
pub struct MessageDescriptor {
    pub name: &'static str,
    pub fields: &'static [FieldDescriptor],
}

impl MessageDescriptor {
    pub fn field(&self, id: u32) -> Option<&'static FieldDescriptor> {
        self.fields.iter().find(|field| field.id == id)
    }

    /// First field id declared more than once, if any.
    pub const fn duplicate_id(&self) -> Option<u32> {
        let fields = self.fields;
        let mut i = 0;
        while i < fields.len() {
            let mut j = i + 1;
            while j < fields.len() {
                if fields[i].id == fields[j].id {
                    return Some(fields[i].id);
                }
                j += 1;
            }
            i += 1;
        }
        None
    }

    pub(crate) fn required(&self) -> impl Iterator<Item = &'static FieldDescriptor> {
        self.fields
            .iter()
            .filter(|field| field.label == Label::Required)
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub name: &'static str,
    pub input: &'static MessageDescriptor,
    pub output: &'static MessageDescriptor,
}

#[derive(Debug, PartialEq, Eq)]
pub struct ServiceDescriptor {
    pub name: &'static str,
    pub methods: &'static [MethodDescriptor],
}

impl ServiceDescriptor {
    pub fn method(&self, name: &str) -> Option<&'static MethodDescriptor> {
        self.methods.iter().find(|method| method.name == name)
    }
}

/// A schema-typed value that the codec can put on the wire.
pub trait Message: Sized + Send + 'static {
    const DESCRIPTOR: &'static MessageDescriptor;

    /// Field values keyed by id; `None` marks an absent field.
    fn to_fields(&self) -> Vec<(u32, Option<Value>)>;

    fn from_fields(fields: &mut FieldSet) -> Result<Self, CodecError>;
}

/// Decoded, type-checked field values of one message, keyed by id.
#[derive(Debug, Default)]
pub struct FieldSet {
    values: BTreeMap<u32, Value>,
}

impl FieldSet {
    pub(crate) fn insert(&mut self, id: u32, value: Value) {
        self.values.insert(id, value);
    }

    pub fn contains(&self, id: u32) -> bool {
        self.values.contains_key(&id)
    }

    /// Removes field `id`, falling back to the field type's default when it
    /// was absent.
    pub fn take<T: FieldValue>(&mut self, id: u32) -> Result<T, CodecError> {
        T::from_value(self.values.remove(&id))
            .map_err(|source| CodecError::FieldType { id, source })
    }
}

/// Serializable summary of a bound service, returned by
/// [`Channel::services`](crate::Channel::services).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ServiceInfo {
    pub name: String,
    pub methods: Vec<MethodInfo>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MethodInfo {
    pub name: String,
    pub input: String,
    pub output: String,
}

impl From<&ServiceDescriptor> for ServiceInfo {
    fn from(descriptor: &ServiceDescriptor) -> Self {
        Self {
            name: descriptor.name.to_owned(),
            methods: descriptor
                .methods
                .iter()
                .map(|method| MethodInfo {
                    name: method.name.to_owned(),
                    input: method.input.name.to_owned(),
                    output: method.output.name.to_owned(),
                })
                .collect(),
        }
    }
}
