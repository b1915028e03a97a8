// Type registry
//
// One registry instance is created by the runtime and shared with the
// request/reply and subscription managers. It knows the enumerations and
// structs of the interfaces in use and augments untyped JSON payloads with
// that knowledge.

use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::{PlexusError, Result};

/// Key carrying the type name inside struct payloads
pub const TYPE_NAME_KEY: &str = "_typeName";

const PRIMITIVES: [&str; 9] = [
    "Boolean", "Byte", "Short", "Integer", "Long", "Float", "Double", "String", "Object",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegisteredType {
    Enum { literals: Vec<String> },
    Struct { fields: Vec<(String, String)> },
}

#[derive(Default)]
pub struct TypeRegistry {
    types: DashMap<String, RegisteredType>,
}

impl TypeRegistry {
    pub fn new() -> Self {
        Self {
            types: DashMap::new(),
        }
    }

    pub fn register_enum<I, S>(&self, name: impl Into<String>, literals: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.types.insert(
            name.into(),
            RegisteredType::Enum {
                literals: literals.into_iter().map(Into::into).collect(),
            },
        );
    }

    /// Register a struct with its `(field, type)` members
    pub fn register_struct<I, S, T>(&self, name: impl Into<String>, fields: I)
    where
        I: IntoIterator<Item = (S, T)>,
        S: Into<String>,
        T: Into<String>,
    {
        self.types.insert(
            name.into(),
            RegisteredType::Struct {
                fields: fields
                    .into_iter()
                    .map(|(field, ty)| (field.into(), ty.into()))
                    .collect(),
            },
        );
    }

    pub fn is_registered(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    pub fn decode(&self, bytes: &[u8], type_hint: &str) -> Result<Value> {
        let value: Value = serde_json::from_slice(bytes)?;
        self.augment(value, type_hint)
    }

    /// Deserialize an (augmented) payload into a concrete type
    pub fn decode_as<T: DeserializeOwned>(&self, value: Value, type_hint: &str) -> Result<T> {
        let augmented = self.augment(value, type_hint)?;
        Ok(serde_json::from_value(augmented)?)
    }

    /// Check `value` against the registered type `type_name` and tag structs.
    ///
    /// Primitive and unknown types pass through untouched; `X[]` augments every
    /// element as `X`.
    pub fn augment(&self, value: Value, type_name: &str) -> Result<Value> {
        if let Some(element_type) = type_name.strip_suffix("[]") {
            return match value {
                Value::Array(items) => items
                    .into_iter()
                    .map(|item| self.augment(item, element_type))
                    .collect::<Result<Vec<_>>>()
                    .map(Value::Array),
                other => Err(PlexusError::InvalidArgument(format!(
                    "expected array of {element_type}, got {other}"
                ))),
            };
        }
        if PRIMITIVES.contains(&type_name) {
            return Ok(value);
        }
        let registered = match self.types.get(type_name) {
            Some(registered) => registered.clone(),
            None => return Ok(value),
        };
        match (registered, value) {
            (RegisteredType::Enum { literals }, Value::String(literal)) => {
                if literals.contains(&literal) {
                    Ok(Value::String(literal))
                } else {
                    Err(PlexusError::InvalidArgument(format!(
                        "{literal} is not a literal of enumeration {type_name}"
                    )))
                }
            }
            (RegisteredType::Struct { fields }, Value::Object(members)) => {
                let mut augmented = Map::with_capacity(members.len() + 1);
                for (key, member) in members {
                    let member = match fields.iter().find(|(field, _)| *field == key) {
                        Some((_, field_type)) => self.augment(member, field_type)?,
                        None => member,
                    };
                    augmented.insert(key, member);
                }
                augmented.insert(TYPE_NAME_KEY.to_string(), Value::String(type_name.to_string()));
                Ok(Value::Object(augmented))
            }
            (_, Value::Null) => Ok(Value::Null),
            (_, other) => Err(PlexusError::InvalidArgument(format!(
                "value {other} does not match registered type {type_name}"
            ))),
        }
    }
}
