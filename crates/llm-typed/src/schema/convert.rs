//! Building descriptors from existing JSON Schema documents.
//!
//! Rust types that derive [`schemars::JsonSchema`] can be turned into a
//! [`TypeDescriptor`] with [`descriptor_for`]. Only the subset of JSON
//! Schema that descriptors can express is accepted; anything else is
//! [`LlmError::UnsupportedType`].

use serde_json::{Map, Value};

use super::descriptor::{DescriptorRegistry, Field, Record, Scalar, ScalarKind, TypeDescriptor};
use crate::error::LlmError;

impl TypeDescriptor {
    /// Converts a JSON Schema into a descriptor and the registry holding
    /// its `$defs` (or legacy `definitions`).
    ///
    /// ```rust
    /// use llm_typed::schema::TypeDescriptor;
    /// use serde_json::json;
    ///
    /// let (d, _defs) = TypeDescriptor::from_json_schema(&json!({
    ///     "title": "Person",
    ///     "type": "object",
    ///     "properties": {
    ///         "name": { "type": "string" },
    ///         "age": { "type": ["integer", "null"] }
    ///     },
    ///     "required": ["name"]
    /// }))
    /// .unwrap();
    /// assert_eq!(d.kind_name(), "object");
    /// ```
    pub fn from_json_schema(schema: &Value) -> Result<(Self, DescriptorRegistry), LlmError> {
        let mut registry = DescriptorRegistry::new();
        for key in ["$defs", "definitions"] {
            if let Some(defs) = schema.get(key).and_then(Value::as_object) {
                for (name, def) in defs {
                    let descriptor = convert(def, Some(name))?;
                    registry = registry.define(name.clone(), descriptor);
                }
            }
        }
        let root = convert(schema, None)?;
        Ok((root, registry))
    }
}

/// Derives a descriptor for a Rust type through its `schemars` schema.
pub fn descriptor_for<T: schemars::JsonSchema>()
-> Result<(TypeDescriptor, DescriptorRegistry), LlmError> {
    let schema = schemars::schema_for!(T);
    let value = serde_json::to_value(schema)
        .map_err(|e| LlmError::unsupported(format!("schema serialization failed: {e}")))?;
    TypeDescriptor::from_json_schema(&value)
}

fn convert(schema: &Value, def_name: Option<&str>) -> Result<TypeDescriptor, LlmError> {
    let obj = match schema {
        Value::Object(obj) => obj,
        Value::Bool(_) => {
            return Err(LlmError::unsupported(
                "boolean schemas accept arbitrary values",
            ));
        }
        other => return Err(LlmError::unsupported(format!("not a schema: {other}"))),
    };

    if let Some(reference) = obj.get("$ref").and_then(Value::as_str) {
        return ref_name(reference).map(TypeDescriptor::reference);
    }
    if let Some(value) = obj.get("const") {
        return Ok(TypeDescriptor::enumeration([value.clone()]));
    }
    if let Some(values) = obj.get("enum").and_then(Value::as_array) {
        return Ok(TypeDescriptor::enumeration(values.iter().cloned()));
    }
    for key in ["anyOf", "oneOf"] {
        if let Some(variants) = obj.get(key).and_then(Value::as_array) {
            return convert_union(variants);
        }
    }
    if let Some(all_of) = obj.get("allOf").and_then(Value::as_array) {
        return match all_of.as_slice() {
            [single] => convert(single, def_name),
            _ => Err(LlmError::unsupported("allOf with several schemas")),
        };
    }

    match obj.get("type") {
        Some(Value::String(ty)) => convert_typed(ty, obj, def_name),
        Some(Value::Array(types)) => {
            let variants = types
                .iter()
                .map(|t| match t {
                    Value::String(ty) => convert_typed(ty, obj, def_name),
                    other => Err(LlmError::unsupported(format!("invalid type entry {other}"))),
                })
                .collect::<Result<Vec<_>, _>>()?;
            Ok(match <[TypeDescriptor; 1]>::try_from(variants) {
                Ok([single]) => single,
                Err(variants) => TypeDescriptor::union(variants),
            })
        }
        None if obj.contains_key("properties") => convert_typed("object", obj, def_name),
        _ => Err(LlmError::unsupported(format!(
            "schema without a type: {schema}"
        ))),
    }
}

fn convert_union(variants: &[Value]) -> Result<TypeDescriptor, LlmError> {
    // A oneOf of consts is how enums with documented variants come out.
    if !variants.is_empty() && variants.iter().all(|v| v.get("const").is_some()) {
        let values = variants.iter().filter_map(|v| v.get("const").cloned());
        return Ok(TypeDescriptor::enumeration(values));
    }
    variants
        .iter()
        .map(|v| convert(v, None))
        .collect::<Result<Vec<_>, _>>()
        .map(TypeDescriptor::union)
}

fn convert_typed(
    ty: &str,
    obj: &Map<String, Value>,
    def_name: Option<&str>,
) -> Result<TypeDescriptor, LlmError> {
    let numeric = |kind: ScalarKind| -> Result<TypeDescriptor, LlmError> {
        Ok(TypeDescriptor::Scalar(Scalar {
            kind,
            minimum: obj.get("minimum").and_then(Value::as_f64),
            maximum: obj.get("maximum").and_then(Value::as_f64),
        }))
    };
    match ty {
        "string" => Ok(TypeDescriptor::string()),
        "boolean" => Ok(TypeDescriptor::boolean()),
        "null" => Ok(TypeDescriptor::null()),
        "number" => numeric(ScalarKind::Number),
        "integer" => numeric(ScalarKind::Integer),
        "array" => {
            let items = obj
                .get("items")
                .ok_or_else(|| LlmError::unsupported("array schema without items"))?;
            Ok(TypeDescriptor::sequence(convert(items, None)?))
        }
        "object" => convert_object(obj, def_name),
        other => Err(LlmError::unsupported(format!("unknown type `{other}`"))),
    }
}

fn convert_object(
    obj: &Map<String, Value>,
    def_name: Option<&str>,
) -> Result<TypeDescriptor, LlmError> {
    let properties = obj.get("properties").and_then(Value::as_object);
    let additional = obj.get("additionalProperties");

    if properties.is_none() {
        if let Some(value) = additional.filter(|v| v.is_object()) {
            let key = match obj.get("propertyNames") {
                Some(names) => convert(names, None)?,
                None => TypeDescriptor::string(),
            };
            return Ok(TypeDescriptor::mapping_with_keys(key, convert(value, None)?));
        }
    }

    let required: Vec<&str> = obj
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).collect())
        .unwrap_or_default();

    let mut fields = Vec::new();
    for (name, schema) in properties.into_iter().flatten() {
        fields.push(Field {
            name: name.clone(),
            descriptor: convert(schema, None)?,
            required: required.contains(&name.as_str()),
            description: schema
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_owned),
        });
    }

    let name = obj
        .get("title")
        .and_then(Value::as_str)
        .or(def_name)
        .map(str::to_owned);
    Ok(TypeDescriptor::Record(Record {
        name,
        description: obj
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_owned),
        fields,
    }))
}

fn ref_name(reference: &str) -> Result<String, LlmError> {
    ["#/$defs/", "#/definitions/"]
        .iter()
        .find_map(|prefix| reference.strip_prefix(prefix))
        .map(str::to_owned)
        .ok_or_else(|| LlmError::unsupported(format!("unsupported reference `{reference}`")))
}
