//! Structural type descriptions.
//!
//! A [`TypeDescriptor`] is the single source of truth for a typed call:
//! the schema sent to the provider and the decoder that rebuilds the
//! value are both derived from it. Descriptors are built explicitly with
//! the constructors below; no runtime reflection is involved.
//!
//! ```rust
//! use llm_typed::schema::{Record, TypeDescriptor};
//!
//! let person: TypeDescriptor = Record::new("Person")
//!     .field("name", TypeDescriptor::string())
//!     .field("age", TypeDescriptor::integer().minimum(0.0))
//!     .optional("nickname", TypeDescriptor::string())
//!     .into();
//! ```
//!
//! Recursive shapes go through a [`DescriptorRegistry`]: a record refers
//! to itself by name with [`TypeDescriptor::reference`] and the registry
//! resolves the name.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The JSON kind of a scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarKind {
    /// A JSON string.
    String,
    /// Any JSON number.
    Number,
    /// A JSON number without a fractional part.
    Integer,
    /// `true` or `false`.
    Boolean,
    /// `null`.
    Null,
}

impl ScalarKind {
    /// The JSON Schema `type` keyword for this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Integer => "integer",
            Self::Boolean => "boolean",
            Self::Null => "null",
        }
    }
}

/// A scalar with optional numeric bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scalar {
    /// The scalar's JSON kind.
    pub kind: ScalarKind,
    /// Inclusive lower bound, numbers only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub minimum: Option<f64>,
    /// Inclusive upper bound, numbers only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub maximum: Option<f64>,
}

/// One named field of a [`Record`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Field {
    /// Property name on the wire.
    pub name: String,
    /// Shape of the field's value.
    pub descriptor: TypeDescriptor,
    /// Whether the field must be present.
    pub required: bool,
    /// Shown to the model next to the property.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// A record with an ordered list of fields.
///
/// Field order is preserved everywhere: in the compiled schema, in
/// partial snapshots, and in the final value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Record {
    /// Name used for tool/schema names and union variant labels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Shown to the model as the schema description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Fields in declaration order.
    pub fields: Vec<Field>,
}

/// Recursive description of a target shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TypeDescriptor {
    /// A string, number, integer, boolean, or null.
    Scalar(Scalar),
    /// One of a closed set of scalar values.
    Enum {
        /// The allowed values.
        values: Vec<Value>,
    },
    /// A homogeneous list.
    Sequence {
        /// Shape of every element.
        element: Box<TypeDescriptor>,
    },
    /// An object with arbitrary keys.
    Mapping {
        /// Shape of the keys; must be a string scalar or string enum.
        key: Box<TypeDescriptor>,
        /// Shape of every value.
        value: Box<TypeDescriptor>,
    },
    /// An object with known fields.
    Record(Record),
    /// Exactly one of several distinguishable shapes.
    Union {
        /// The alternatives, in declaration order.
        variants: Vec<TypeDescriptor>,
    },
    /// A named definition held by a [`DescriptorRegistry`].
    Ref {
        /// The definition's name.
        name: String,
    },
}

impl TypeDescriptor {
    fn scalar(kind: ScalarKind) -> Self {
        Self::Scalar(Scalar {
            kind,
            minimum: None,
            maximum: None,
        })
    }

    /// A string scalar.
    pub fn string() -> Self {
        Self::scalar(ScalarKind::String)
    }

    /// A number scalar.
    pub fn number() -> Self {
        Self::scalar(ScalarKind::Number)
    }

    /// An integer scalar.
    pub fn integer() -> Self {
        Self::scalar(ScalarKind::Integer)
    }

    /// A boolean scalar.
    pub fn boolean() -> Self {
        Self::scalar(ScalarKind::Boolean)
    }

    /// The null scalar.
    pub fn null() -> Self {
        Self::scalar(ScalarKind::Null)
    }

    /// A closed set of allowed values.
    pub fn enumeration<I, V>(values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::Enum {
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// A list of `element`.
    pub fn sequence(element: Self) -> Self {
        Self::Sequence {
            element: Box::new(element),
        }
    }

    /// A string-keyed mapping to `value`.
    pub fn mapping(value: Self) -> Self {
        Self::mapping_with_keys(Self::string(), value)
    }

    /// A mapping whose keys are described by `key`.
    pub fn mapping_with_keys(key: Self, value: Self) -> Self {
        Self::Mapping {
            key: Box::new(key),
            value: Box::new(value),
        }
    }

    /// One of `variants`.
    pub fn union<I: IntoIterator<Item = Self>>(variants: I) -> Self {
        Self::Union {
            variants: variants.into_iter().collect(),
        }
    }

    /// `inner` or `null`.
    pub fn optional(inner: Self) -> Self {
        Self::union([inner, Self::null()])
    }

    /// A reference to a named definition.
    pub fn reference(name: impl Into<String>) -> Self {
        Self::Ref { name: name.into() }
    }

    /// Sets an inclusive lower bound on a numeric scalar.
    ///
    /// Has no effect on non-scalar descriptors. Bounds on a non-numeric
    /// scalar are rejected when compiling.
    #[must_use]
    pub fn minimum(mut self, min: f64) -> Self {
        if let Self::Scalar(s) = &mut self {
            s.minimum = Some(min);
        }
        self
    }

    /// Sets an inclusive upper bound on a numeric scalar.
    #[must_use]
    pub fn maximum(mut self, max: f64) -> Self {
        if let Self::Scalar(s) = &mut self {
            s.maximum = Some(max);
        }
        self
    }

    /// A short label for error messages and schema names.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Scalar(s) => s.kind.as_str(),
            Self::Enum { .. } => "enum",
            Self::Sequence { .. } => "list",
            Self::Mapping { .. } => "mapping",
            Self::Record(_) => "object",
            Self::Union { .. } => "union",
            Self::Ref { .. } => "reference",
        }
    }
}

impl From<Record> for TypeDescriptor {
    fn from(record: Record) -> Self {
        Self::Record(record)
    }
}

impl Record {
    /// Creates an empty, named record.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Creates an empty record with no name.
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Sets the description shown to the model.
    #[must_use]
    pub fn describe(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Appends a required field.
    #[must_use]
    pub fn field(self, name: impl Into<String>, descriptor: TypeDescriptor) -> Self {
        self.push(name.into(), descriptor, true, None)
    }

    /// Appends an optional field.
    #[must_use]
    pub fn optional(self, name: impl Into<String>, descriptor: TypeDescriptor) -> Self {
        self.push(name.into(), descriptor, false, None)
    }

    /// Appends a required field with a description.
    #[must_use]
    pub fn documented(
        self,
        name: impl Into<String>,
        descriptor: TypeDescriptor,
        description: impl Into<String>,
    ) -> Self {
        self.push(name.into(), descriptor, true, Some(description.into()))
    }

    fn push(
        mut self,
        name: String,
        descriptor: TypeDescriptor,
        required: bool,
        description: Option<String>,
    ) -> Self {
        self.fields.push(Field {
            name,
            descriptor,
            required,
            description,
        });
        self
    }

    /// Looks up a field by name.
    pub fn get(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Named definitions that [`TypeDescriptor::Ref`] resolves against.
///
/// Cycles between definitions are only accepted when a recursion limit
/// is set; without one, compiling a cyclic descriptor fails with
/// [`LlmError::UnsupportedType`](crate::LlmError::UnsupportedType).
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DescriptorRegistry {
    definitions: BTreeMap<String, TypeDescriptor>,
    recursion_limit: Option<usize>,
}

impl DescriptorRegistry {
    /// Creates an empty registry without a recursion limit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Allows reference cycles, decoding at most `limit` nested
    /// references deep.
    #[must_use]
    pub fn with_recursion_limit(mut self, limit: usize) -> Self {
        self.recursion_limit = Some(limit);
        self
    }

    /// Adds or replaces a named definition.
    #[must_use]
    pub fn define(mut self, name: impl Into<String>, descriptor: impl Into<TypeDescriptor>) -> Self {
        self.definitions.insert(name.into(), descriptor.into());
        self
    }

    /// Resolves a definition by name.
    pub fn get(&self, name: &str) -> Option<&TypeDescriptor> {
        self.definitions.get(name)
    }

    /// The configured recursion limit, if any.
    pub fn recursion_limit(&self) -> Option<usize> {
        self.recursion_limit
    }

    /// All definitions, ordered by name.
    pub fn definitions(&self) -> &BTreeMap<String, TypeDescriptor> {
        &self.definitions
    }
}
