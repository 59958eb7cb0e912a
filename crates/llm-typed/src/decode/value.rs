//! Decoded values: progressive snapshots and the final result.

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use crate::error::LlmError;

/// A snapshot of a value that is still streaming in.
///
/// Leaves the stream has not finished yet are [`Pending`](Self::Pending).
/// A snapshot never shows a leaf value that a later snapshot could
/// change: strings and numbers appear once terminated, and sequences
/// only list elements that are complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum PartialValue {
    /// Not yet known.
    Pending,
    /// JSON `null`.
    Null,
    /// A boolean.
    Bool(bool),
    /// A terminated number.
    Number(Number),
    /// A terminated string.
    String(String),
    /// A list. `items` holds only elements that are complete.
    Sequence {
        /// Complete elements seen so far.
        items: Vec<PartialValue>,
        /// Whether the closing bracket has been seen.
        complete: bool,
    },
    /// A mapping with arbitrary keys.
    Mapping {
        /// Entries whose value has started, in arrival order.
        entries: IndexMap<String, PartialValue>,
        /// Whether the closing brace has been seen.
        complete: bool,
    },
    /// A record. Every declared field is listed in declaration order
    /// while the record is incomplete.
    Record {
        /// Field values; absent fields are `Pending`.
        fields: IndexMap<String, PartialValue>,
        /// Whether the closing brace has been seen.
        complete: bool,
    },
    /// The chosen alternative of a union.
    Variant {
        /// Label of the chosen alternative.
        name: String,
        /// The alternative's value.
        value: Box<PartialValue>,
    },
}

impl PartialValue {
    /// Returns `true` for [`Pending`](Self::Pending).
    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Returns `true` when nothing inside is pending and every container
    /// is closed.
    pub fn is_complete(&self) -> bool {
        match self {
            Self::Pending => false,
            Self::Null | Self::Bool(_) | Self::Number(_) | Self::String(_) => true,
            Self::Sequence { items, complete } => {
                *complete && items.iter().all(Self::is_complete)
            }
            Self::Mapping { entries: map, complete } | Self::Record { fields: map, complete } => {
                *complete && map.values().all(Self::is_complete)
            }
            Self::Variant { value, .. } => value.is_complete(),
        }
    }

    /// Looks up a record field or mapping entry, looking through a
    /// chosen union variant.
    pub fn get(&self, key: &str) -> Option<&PartialValue> {
        match self {
            Self::Record { fields: map, .. } | Self::Mapping { entries: map, .. } => map.get(key),
            Self::Variant { value, .. } => value.get(key),
            _ => None,
        }
    }

    /// Looks up a sequence element.
    pub fn index(&self, i: usize) -> Option<&PartialValue> {
        match self {
            Self::Sequence { items, .. } => items.get(i),
            Self::Variant { value, .. } => value.index(i),
            _ => None,
        }
    }

    /// The known part of the snapshot as plain JSON.
    ///
    /// Pending record fields and mapping entries are left out, and a
    /// pending root becomes `null`. Union variants are unwrapped to the
    /// inner value.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Pending | Self::Null => Value::Null,
            Self::Bool(b) => Value::Bool(*b),
            Self::Number(n) => Value::Number(n.clone()),
            Self::String(s) => Value::String(s.clone()),
            Self::Sequence { items, .. } => Value::Array(items.iter().map(Self::to_value).collect()),
            Self::Mapping { entries: map, .. } | Self::Record { fields: map, .. } => Value::Object(
                map.iter()
                    .filter(|(_, v)| !v.is_pending())
                    .map(|(k, v)| (k.clone(), v.to_value()))
                    .collect::<Map<_, _>>(),
            ),
            Self::Variant { value, .. } => value.to_value(),
        }
    }

    /// Returns `true` when `self` is `earlier` with some pending parts
    /// filled in or extended, and nothing already known changed.
    pub fn refines(&self, earlier: &PartialValue) -> bool {
        match (earlier, self) {
            (Self::Pending, _) => true,
            (
                Self::Sequence {
                    items: old,
                    complete: old_done,
                },
                Self::Sequence {
                    items: new,
                    complete: new_done,
                },
            ) => {
                new.len() >= old.len()
                    && (!old_done || (*new_done && new.len() == old.len()))
                    && old.iter().zip(new).all(|(o, n)| n.refines(o))
            }
            (
                Self::Mapping {
                    entries: old,
                    complete: old_done,
                },
                Self::Mapping {
                    entries: new,
                    complete: new_done,
                },
            )
            | (
                Self::Record {
                    fields: old,
                    complete: old_done,
                },
                Self::Record {
                    fields: new,
                    complete: new_done,
                },
            ) => {
                (!old_done || *new_done)
                    && old.iter().all(|(k, o)| match new.get(k) {
                        Some(n) => n.refines(o),
                        // An optional field that never arrived.
                        None => o.is_pending() && *new_done,
                    })
            }
            (
                Self::Variant {
                    name: old_name,
                    value: old,
                },
                Self::Variant {
                    name: new_name,
                    value: new,
                },
            ) => old_name == new_name && new.refines(old),
            (old, new) => old == new,
        }
    }
}

/// A fully decoded value that matches its descriptor.
///
/// The wrapper used for non-record roots and the tagged union encoding
/// are already removed: the JSON is in the natural shape of the
/// declared type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CompleteValue(Value);

impl CompleteValue {
    pub(crate) fn new(value: Value) -> Self {
        Self(value)
    }

    /// The value as JSON.
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    /// Consumes the wrapper, returning the JSON.
    pub fn into_value(self) -> Value {
        self.0
    }

    /// Deserializes into a Rust type.
    ///
    /// ```rust
    /// # use llm_typed::decode::CompleteValue;
    /// # fn demo(value: CompleteValue) -> Result<(), llm_typed::LlmError> {
    /// #[derive(serde::Deserialize)]
    /// struct Person {
    ///     name: String,
    ///     age: u32,
    /// }
    /// let person: Person = value.deserialize()?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn deserialize<T: DeserializeOwned>(&self) -> Result<T, LlmError> {
        T::deserialize(&self.0).map_err(|e| {
            LlmError::mismatch("$", format!("cannot deserialize: {e}"), self.0.clone())
        })
    }
}

impl From<CompleteValue> for Value {
    fn from(value: CompleteValue) -> Self {
        value.0
    }
}
