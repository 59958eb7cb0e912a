//! Descriptor to schema compilation.
//!
//! [`compile`] is a pure function of its inputs: the same descriptor,
//! registry, and options always produce the same [`SchemaSpec`]. All
//! representability checks happen here, before any request is sent, so a
//! bad descriptor fails fast with [`LlmError::UnsupportedType`].
//!
//! # Wire shape
//!
//! - Records become closed objects (`additionalProperties: false`) whose
//!   `properties` keep declaration order.
//! - A root that is not a record is wrapped as `{"value": ...}` because
//!   providers require an object at the top level. Decoding unwraps it.
//! - Unions become `anyOf` when the provider supports it. Otherwise they
//!   become an object with a `variant` tag naming the chosen alternative
//!   and one optional container per alternative.
//! - Named references become `$ref`s into a root-level `$defs` table.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::sync::OnceLock;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

use super::descriptor::{DescriptorRegistry, Record, ScalarKind, TypeDescriptor};
use crate::error::LlmError;
use crate::provider::{JsonSchema, ResponseFormat, ToolDefinition};

/// Property holding the variant label in the tagged union encoding.
pub const VARIANT_TAG: &str = "variant";

/// Property holding a wrapped non-record root.
pub const WRAPPED_FIELD: &str = "value";

/// Guards resolution of reference chains that never reach a structure.
const MAX_ALIAS_HOPS: usize = 64;

/// Options that change the emitted schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CompileOptions {
    /// Emit unions as `anyOf`. When `false`, unions use the tagged
    /// `variant` encoding.
    pub native_unions: bool,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            native_unions: true,
        }
    }
}

/// The externalized form of a descriptor, ready to send to a provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaSpec {
    /// Identifier used as the response-format or tool name.
    pub name: String,
    /// Description taken from the root record, if any.
    pub description: Option<String>,
    /// The JSON Schema document.
    pub schema: JsonSchema,
    /// Whether the root was wrapped under [`WRAPPED_FIELD`].
    pub wrapped: bool,
    /// `true` when every record field is required and no open mapping or
    /// tagged union is present, so providers can enforce the schema
    /// strictly.
    pub strict_compatible: bool,
}

impl SchemaSpec {
    /// The schema as a native response-format constraint.
    pub fn response_format(&self) -> ResponseFormat {
        ResponseFormat {
            name: self.name.clone(),
            schema: self.schema.clone(),
            strict: self.strict_compatible,
        }
    }

    /// The schema as a single tool the model is forced to call.
    pub fn tool_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name.clone(),
            description: self
                .description
                .clone()
                .unwrap_or_else(|| "Return the result in the required format.".into()),
            parameters: self.schema.clone(),
            strict: self.strict_compatible,
        }
    }
}

/// A compiled descriptor: the [`SchemaSpec`] plus everything needed to
/// decode values against it.
pub struct CompiledSchema {
    spec: SchemaSpec,
    declared: TypeDescriptor,
    registry: DescriptorRegistry,
    options: CompileOptions,
    validator: OnceLock<Result<jsonschema::Validator, String>>,
}

impl fmt::Debug for CompiledSchema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledSchema")
            .field("spec", &self.spec)
            .field("declared", &self.declared)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl CompiledSchema {
    /// The schema to send to the provider.
    pub fn spec(&self) -> &SchemaSpec {
        &self.spec
    }

    /// The descriptor this schema was compiled from.
    pub fn descriptor(&self) -> &TypeDescriptor {
        &self.declared
    }

    /// Definitions used to resolve references.
    pub fn registry(&self) -> &DescriptorRegistry {
        &self.registry
    }

    /// The options the schema was compiled with.
    pub fn options(&self) -> CompileOptions {
        self.options
    }

    /// Checks a parsed wire value against the JSON Schema.
    ///
    /// The validator is built on first use and shared afterwards.
    pub fn validate_wire(&self, value: &Value) -> Result<(), LlmError> {
        let validator = self.validator.get_or_init(|| {
            jsonschema::validator_for(self.spec.schema.as_value()).map_err(|e| e.to_string())
        });
        match validator {
            Ok(v) => crate::provider::check(v, value),
            Err(e) => Err(LlmError::InvalidRequest(format!(
                "compiled schema is not valid JSON Schema: {e}"
            ))),
        }
    }
}

/// Compiles `descriptor` into a schema and decoder plan.
///
/// # Errors
///
/// [`LlmError::UnsupportedType`] when the descriptor cannot be
/// represented:
/// - an empty or non-scalar enum, or duplicate enum values
/// - bounds on a non-numeric scalar, or `minimum > maximum`
/// - mapping keys that are not strings
/// - duplicate record fields
/// - an empty union, or two union variants that no JSON value could
///   tell apart
/// - an unknown reference, or a reference cycle when the registry has no
///   recursion limit
pub fn compile(
    descriptor: &TypeDescriptor,
    registry: &DescriptorRegistry,
    options: CompileOptions,
) -> Result<CompiledSchema, LlmError> {
    let checker = Checker { registry };
    checker.check_reachable(descriptor)?;

    let root = checker.resolve(descriptor)?;
    let mut emitter = Emitter {
        registry,
        options,
        used: BTreeSet::new(),
        strict: true,
    };

    let (mut body, wrapped) = if let TypeDescriptor::Record(_) = root {
        (emitter.emit(root), false)
    } else {
        let wrapper = Record::anonymous().field(WRAPPED_FIELD, descriptor.clone());
        (emitter.emit(&TypeDescriptor::Record(wrapper)), true)
    };

    let defs = emitter.emit_definitions();
    if !defs.is_empty() {
        if let Some(obj) = body.as_object_mut() {
            obj.insert("$defs".into(), Value::Object(defs));
        }
    }

    let description = match root {
        TypeDescriptor::Record(r) => r.description.clone(),
        _ => None,
    };

    Ok(CompiledSchema {
        spec: SchemaSpec {
            name: schema_name(descriptor, root),
            description,
            schema: JsonSchema::new(body),
            wrapped,
            strict_compatible: emitter.strict,
        },
        declared: descriptor.clone(),
        registry: registry.clone(),
        options,
        validator: OnceLock::new(),
    })
}

/// Labels used for union variants in the tagged encoding and in partial
/// snapshots.
///
/// A variant is labelled by its reference or record name, falling back
/// to its kind. Duplicate labels get their position appended.
pub(crate) fn variant_labels(variants: &[TypeDescriptor]) -> Vec<String> {
    let base: Vec<String> = variants
        .iter()
        .map(|v| match v {
            TypeDescriptor::Ref { name } => name.clone(),
            TypeDescriptor::Record(Record { name: Some(n), .. }) => n.clone(),
            other => other.kind_name().to_owned(),
        })
        .collect();
    base.iter()
        .enumerate()
        .map(|(i, label)| {
            if base.iter().filter(|l| *l == label).count() > 1 {
                format!("{label}_{i}")
            } else {
                label.clone()
            }
        })
        .collect()
}

fn schema_name(declared: &TypeDescriptor, resolved: &TypeDescriptor) -> String {
    let base = match (declared, resolved) {
        (TypeDescriptor::Ref { name }, _) => name.as_str(),
        (_, TypeDescriptor::Record(Record { name: Some(n), .. })) => n.as_str(),
        (_, other) => other.kind_name(),
    };
    format!("return_{}", snake_case(base))
}

fn snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    let mut prev_lower = false;
    for c in name.chars() {
        if c.is_ascii_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
            prev_lower = false;
        } else if c.is_ascii_alphanumeric() {
            out.push(c);
            prev_lower = true;
        } else {
            out.push('_');
            prev_lower = false;
        }
    }
    out
}

// ── Checks ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum JsonKind {
    String,
    Number,
    Bool,
    Null,
    Array,
    Object,
}

fn value_kind(value: &Value) -> JsonKind {
    match value {
        Value::String(_) => JsonKind::String,
        Value::Number(_) => JsonKind::Number,
        Value::Bool(_) => JsonKind::Bool,
        Value::Null => JsonKind::Null,
        Value::Array(_) => JsonKind::Array,
        Value::Object(_) => JsonKind::Object,
    }
}

struct Checker<'a> {
    registry: &'a DescriptorRegistry,
}

impl<'a> Checker<'a> {
    /// Follows reference chains to the first structural descriptor.
    fn resolve(&self, mut d: &'a TypeDescriptor) -> Result<&'a TypeDescriptor, LlmError> {
        let mut hops = 0;
        while let TypeDescriptor::Ref { name } = d {
            d = self
                .registry
                .get(name)
                .ok_or_else(|| LlmError::unsupported(format!("unknown reference `{name}`")))?;
            hops += 1;
            if hops > MAX_ALIAS_HOPS {
                return Err(LlmError::unsupported(format!(
                    "reference `{name}` never resolves to a structure"
                )));
            }
        }
        Ok(d)
    }

    /// Checks the descriptor and every definition reachable from it, and
    /// rejects reference cycles unless a recursion limit is configured.
    fn check_reachable(&self, root: &'a TypeDescriptor) -> Result<(), LlmError> {
        self.check(root, "$")?;

        let mut visited = HashSet::new();
        let mut stack = Vec::new();
        self.visit_refs(root, &mut visited, &mut stack)
    }

    fn visit_refs(
        &self,
        d: &'a TypeDescriptor,
        visited: &mut HashSet<&'a str>,
        stack: &mut Vec<&'a str>,
    ) -> Result<(), LlmError> {
        match d {
            TypeDescriptor::Ref { name } => {
                if stack.contains(&name.as_str()) {
                    if self.registry.recursion_limit().is_none() {
                        return Err(LlmError::unsupported(format!(
                            "recursive reference `{name}` requires a recursion limit on the registry"
                        )));
                    }
                    return Ok(());
                }
                if !visited.insert(name.as_str()) {
                    return Ok(());
                }
                let target = self.registry.get(name).ok_or_else(|| {
                    LlmError::unsupported(format!("unknown reference `{name}`"))
                })?;
                self.check(target, &format!("$defs.{name}"))?;
                stack.push(name.as_str());
                let result = self.visit_refs(target, visited, stack);
                stack.pop();
                result
            }
            TypeDescriptor::Sequence { element } => self.visit_refs(element, visited, stack),
            TypeDescriptor::Mapping { key, value } => {
                self.visit_refs(key, visited, stack)?;
                self.visit_refs(value, visited, stack)
            }
            TypeDescriptor::Record(r) => r
                .fields
                .iter()
                .try_for_each(|f| self.visit_refs(&f.descriptor, visited, stack)),
            TypeDescriptor::Union { variants } => variants
                .iter()
                .try_for_each(|v| self.visit_refs(v, visited, stack)),
            TypeDescriptor::Scalar(_) | TypeDescriptor::Enum { .. } => Ok(()),
        }
    }

    fn check(&self, d: &'a TypeDescriptor, path: &str) -> Result<(), LlmError> {
        match d {
            TypeDescriptor::Scalar(s) => {
                let bounded = s.minimum.is_some() || s.maximum.is_some();
                let numeric = matches!(s.kind, ScalarKind::Number | ScalarKind::Integer);
                if bounded && !numeric {
                    return Err(LlmError::unsupported(format!(
                        "{path}: bounds on a {} scalar",
                        s.kind.as_str()
                    )));
                }
                if s.minimum.is_some_and(|m| !m.is_finite())
                    || s.maximum.is_some_and(|m| !m.is_finite())
                {
                    return Err(LlmError::unsupported(format!("{path}: non-finite bound")));
                }
                if let (Some(min), Some(max)) = (s.minimum, s.maximum) {
                    if min > max {
                        return Err(LlmError::unsupported(format!(
                            "{path}: minimum {min} exceeds maximum {max}"
                        )));
                    }
                }
                Ok(())
            }
            TypeDescriptor::Enum { values } => {
                if values.is_empty() {
                    return Err(LlmError::unsupported(format!("{path}: empty enum")));
                }
                for (i, v) in values.iter().enumerate() {
                    if v.is_array() || v.is_object() {
                        return Err(LlmError::unsupported(format!(
                            "{path}: enum values must be scalars, found {v}"
                        )));
                    }
                    if values[..i].contains(v) {
                        return Err(LlmError::unsupported(format!(
                            "{path}: duplicate enum value {v}"
                        )));
                    }
                }
                Ok(())
            }
            TypeDescriptor::Sequence { element } => self.check(element, &format!("{path}[]")),
            TypeDescriptor::Mapping { key, value } => {
                let string_keys = match self.resolve(key)? {
                    TypeDescriptor::Scalar(s) => {
                        s.kind == ScalarKind::String && s.minimum.is_none() && s.maximum.is_none()
                    }
                    TypeDescriptor::Enum { values } => values.iter().all(Value::is_string),
                    _ => false,
                };
                if !string_keys {
                    return Err(LlmError::unsupported(format!(
                        "{path}: mapping keys must be strings, found {}",
                        key.kind_name()
                    )));
                }
                self.check(value, &format!("{path}{{}}"))
            }
            TypeDescriptor::Record(r) => {
                for (i, field) in r.fields.iter().enumerate() {
                    if r.fields[..i].iter().any(|f| f.name == field.name) {
                        return Err(LlmError::unsupported(format!(
                            "{path}: duplicate field `{}`",
                            field.name
                        )));
                    }
                    self.check(&field.descriptor, &format!("{path}.{}", field.name))?;
                }
                Ok(())
            }
            TypeDescriptor::Union { variants } => {
                if variants.is_empty() {
                    return Err(LlmError::unsupported(format!("{path}: empty union")));
                }
                for v in variants {
                    self.check(v, path)?;
                }
                self.check_distinguishable(variants, path)
            }
            TypeDescriptor::Ref { name } => self
                .registry
                .get(name)
                .map(|_| ())
                .ok_or_else(|| LlmError::unsupported(format!("{path}: unknown reference `{name}`"))),
        }
    }

    /// Resolves references and expands nested unions.
    fn flatten(
        &self,
        variants: &'a [TypeDescriptor],
        out: &mut Vec<&'a TypeDescriptor>,
        depth: usize,
    ) -> Result<(), LlmError> {
        if depth > MAX_ALIAS_HOPS {
            return Err(LlmError::unsupported(
                "union refers to itself without an enclosing structure",
            ));
        }
        for v in variants {
            match self.resolve(v)? {
                TypeDescriptor::Union { variants } => self.flatten(variants, out, depth + 1)?,
                other => out.push(other),
            }
        }
        Ok(())
    }

    fn check_distinguishable(
        &self,
        variants: &'a [TypeDescriptor],
        path: &str,
    ) -> Result<(), LlmError> {
        if variant_labels(variants).iter().any(|l| l == VARIANT_TAG) {
            return Err(LlmError::unsupported(format!(
                "{path}: union variant label `{VARIANT_TAG}` collides with the discriminator field"
            )));
        }
        let mut flat = Vec::with_capacity(variants.len());
        self.flatten(variants, &mut flat, 0)?;

        for (i, a) in flat.iter().enumerate() {
            for b in &flat[i + 1..] {
                if !self.distinguishable(a, b) {
                    return Err(LlmError::unsupported(format!(
                        "{path}: union variants `{}` and `{}` cannot be told apart",
                        describe(a),
                        describe(b)
                    )));
                }
            }
        }
        Ok(())
    }

    fn distinguishable(&self, a: &TypeDescriptor, b: &TypeDescriptor) -> bool {
        if kinds(a).is_disjoint(&kinds(b)) {
            return true;
        }
        match (a, b) {
            (TypeDescriptor::Enum { values: va }, TypeDescriptor::Enum { values: vb }) => {
                va.iter().all(|v| !vb.contains(v))
            }
            (TypeDescriptor::Record(ra), TypeDescriptor::Record(rb)) => {
                self.records_distinguishable(ra, rb)
            }
            _ => false,
        }
    }

    /// Two closed records can be told apart when they carry different
    /// constant tags, or when one requires a field the other does not
    /// declare.
    fn records_distinguishable(&self, a: &Record, b: &Record) -> bool {
        let tagged = a.fields.iter().any(|fa| {
            b.get(&fa.name).is_some_and(|fb| {
                fa.required
                    && fb.required
                    && match (constant(&fa.descriptor), constant(&fb.descriptor)) {
                        (Some(x), Some(y)) => x != y,
                        _ => false,
                    }
            })
        });
        let requires_unknown = |x: &Record, y: &Record| {
            x.fields
                .iter()
                .any(|f| f.required && y.get(&f.name).is_none())
        };
        tagged || requires_unknown(a, b) || requires_unknown(b, a)
    }
}

fn constant(d: &TypeDescriptor) -> Option<&Value> {
    match d {
        TypeDescriptor::Enum { values } if values.len() == 1 => values.first(),
        _ => None,
    }
}

fn kinds(d: &TypeDescriptor) -> BTreeSet<JsonKind> {
    match d {
        TypeDescriptor::Scalar(s) => BTreeSet::from([match s.kind {
            ScalarKind::String => JsonKind::String,
            ScalarKind::Number | ScalarKind::Integer => JsonKind::Number,
            ScalarKind::Boolean => JsonKind::Bool,
            ScalarKind::Null => JsonKind::Null,
        }]),
        TypeDescriptor::Enum { values } => values.iter().map(value_kind).collect(),
        TypeDescriptor::Sequence { .. } => BTreeSet::from([JsonKind::Array]),
        TypeDescriptor::Mapping { .. } | TypeDescriptor::Record(_) => {
            BTreeSet::from([JsonKind::Object])
        }
        // Flattened before comparison.
        TypeDescriptor::Union { .. } | TypeDescriptor::Ref { .. } => BTreeSet::new(),
    }
}

fn describe(d: &TypeDescriptor) -> String {
    match d {
        TypeDescriptor::Record(Record { name: Some(n), .. }) => n.clone(),
        TypeDescriptor::Enum { values } => format!("enum {}", Value::Array(values.clone())),
        other => other.kind_name().to_owned(),
    }
}

// ── Emission ────────────────────────────────────────────────────────

struct Emitter<'a> {
    registry: &'a DescriptorRegistry,
    options: CompileOptions,
    used: BTreeSet<String>,
    strict: bool,
}

impl Emitter<'_> {
    fn emit(&mut self, d: &TypeDescriptor) -> Value {
        match d {
            TypeDescriptor::Scalar(s) => {
                let mut obj = Map::new();
                obj.insert("type".into(), json!(s.kind.as_str()));
                if let Some(min) = s.minimum {
                    obj.insert("minimum".into(), json!(min));
                }
                if let Some(max) = s.maximum {
                    obj.insert("maximum".into(), json!(max));
                }
                Value::Object(obj)
            }
            TypeDescriptor::Enum { values } => {
                let mut obj = Map::new();
                if values.iter().all(Value::is_string) {
                    obj.insert("type".into(), json!("string"));
                }
                obj.insert("enum".into(), Value::Array(values.clone()));
                Value::Object(obj)
            }
            TypeDescriptor::Sequence { element } => {
                json!({ "type": "array", "items": self.emit(element) })
            }
            TypeDescriptor::Mapping { key, value } => {
                self.strict = false;
                let mut obj = Map::new();
                obj.insert("type".into(), json!("object"));
                if let TypeDescriptor::Enum { values } = key.as_ref() {
                    obj.insert("propertyNames".into(), json!({ "enum": values }));
                }
                obj.insert("additionalProperties".into(), self.emit(value));
                Value::Object(obj)
            }
            TypeDescriptor::Record(r) => self.emit_record(r),
            TypeDescriptor::Union { variants } => {
                if self.options.native_unions {
                    let any_of: Vec<Value> = variants.iter().map(|v| self.emit(v)).collect();
                    json!({ "anyOf": any_of })
                } else {
                    self.emit_tagged_union(variants)
                }
            }
            TypeDescriptor::Ref { name } => {
                self.used.insert(name.clone());
                json!({ "$ref": format!("#/$defs/{name}") })
            }
        }
    }

    fn emit_record(&mut self, r: &Record) -> Value {
        let mut properties = Map::new();
        let mut required = Vec::new();
        for field in &r.fields {
            let mut schema = self.emit(&field.descriptor);
            if let (Some(desc), Some(obj)) = (&field.description, schema.as_object_mut()) {
                obj.insert("description".into(), json!(desc));
            }
            properties.insert(field.name.clone(), schema);
            if field.required {
                required.push(json!(field.name));
            } else {
                self.strict = false;
            }
        }

        let mut obj = Map::new();
        obj.insert("type".into(), json!("object"));
        if let Some(desc) = &r.description {
            obj.insert("description".into(), json!(desc));
        }
        obj.insert("properties".into(), Value::Object(properties));
        obj.insert("required".into(), Value::Array(required));
        obj.insert("additionalProperties".into(), json!(false));
        Value::Object(obj)
    }

    fn emit_tagged_union(&mut self, variants: &[TypeDescriptor]) -> Value {
        self.strict = false;
        let labels = variant_labels(variants);
        let mut properties = Map::new();
        properties.insert(
            VARIANT_TAG.into(),
            json!({ "type": "string", "enum": labels }),
        );
        for (label, variant) in labels.iter().zip(variants) {
            properties.insert(label.clone(), self.emit(variant));
        }
        json!({
            "type": "object",
            "properties": properties,
            "required": [VARIANT_TAG],
            "additionalProperties": false,
        })
    }

    /// Emits every definition referenced so far, including the ones the
    /// definitions themselves reference.
    fn emit_definitions(&mut self) -> Map<String, Value> {
        let mut defs = Map::new();
        loop {
            let pending: Vec<String> = self
                .used
                .iter()
                .filter(|name| !defs.contains_key(name.as_str()))
                .cloned()
                .collect();
            if pending.is_empty() {
                break;
            }
            for name in pending {
                let Some(definition) = self.registry.get(&name) else {
                    continue;
                };
                let schema = self.emit(definition);
                defs.insert(name, schema);
            }
        }
        // Stable order regardless of discovery order.
        let mut sorted: Vec<(String, Value)> = defs.into_iter().collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));
        sorted.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::descriptor::Record;
    use pretty_assertions::assert_eq;

    fn person() -> TypeDescriptor {
        Record::new("Person")
            .field("name", TypeDescriptor::string())
            .field("age", TypeDescriptor::number())
            .into()
    }

    fn compile_default(d: &TypeDescriptor) -> Result<CompiledSchema, LlmError> {
        compile(d, &DescriptorRegistry::new(), CompileOptions::default())
    }

    #[test]
    fn test_record_schema_preserves_field_order() {
        let compiled = compile_default(&person()).unwrap();
        let spec = compiled.spec();
        assert_eq!(spec.name, "return_person");
        assert!(!spec.wrapped);
        assert!(spec.strict_compatible);
        let keys: Vec<_> = spec.schema.as_value()["properties"]
            .as_object()
            .unwrap()
            .keys()
            .cloned()
            .collect();
        assert_eq!(keys, ["name", "age"]);
        assert_eq!(spec.schema.as_value()["required"], json!(["name", "age"]));
        assert_eq!(spec.schema.as_value()["additionalProperties"], json!(false));
    }

    #[test]
    fn test_compile_is_deterministic() {
        let a = compile_default(&person()).unwrap();
        let b = compile_default(&person()).unwrap();
        assert_eq!(a.spec(), b.spec());
    }

    #[test]
    fn test_non_record_root_is_wrapped() {
        let d = TypeDescriptor::sequence(TypeDescriptor::string());
        let compiled = compile_default(&d).unwrap();
        let spec = compiled.spec();
        assert!(spec.wrapped);
        assert_eq!(spec.name, "return_list");
        assert_eq!(
            spec.schema.as_value(),
            &json!({
                "type": "object",
                "properties": { "value": { "type": "array", "items": { "type": "string" } } },
                "required": ["value"],
                "additionalProperties": false
            })
        );
    }

    #[test]
    fn test_enum_schema_is_closed_set() {
        let d = TypeDescriptor::enumeration(["red", "green"]);
        let compiled = compile_default(&d).unwrap();
        assert_eq!(
            compiled.spec().schema.as_value()["properties"]["value"],
            json!({ "type": "string", "enum": ["red", "green"] })
        );
    }

    #[test]
    fn test_optional_field_breaks_strictness() {
        let d: TypeDescriptor = Record::new("Pet")
            .field("name", TypeDescriptor::string())
            .optional("age", TypeDescriptor::integer())
            .into();
        let compiled = compile_default(&d).unwrap();
        assert!(!compiled.spec().strict_compatible);
        assert_eq!(compiled.spec().schema.as_value()["required"], json!(["name"]));
    }

    #[test]
    fn test_field_description_and_bounds_emitted() {
        let d: TypeDescriptor = Record::new("Reading")
            .documented(
                "celsius",
                TypeDescriptor::number().minimum(-273.15).maximum(1000.0),
                "Temperature in degrees Celsius",
            )
            .into();
        let compiled = compile_default(&d).unwrap();
        assert_eq!(
            compiled.spec().schema.as_value()["properties"]["celsius"],
            json!({
                "type": "number",
                "minimum": -273.15,
                "maximum": 1000.0,
                "description": "Temperature in degrees Celsius"
            })
        );
    }

    #[test]
    fn test_native_union_uses_any_of() {
        let d = TypeDescriptor::union([TypeDescriptor::string(), TypeDescriptor::integer()]);
        let compiled = compile_default(&d).unwrap();
        assert_eq!(
            compiled.spec().schema.as_value()["properties"]["value"],
            json!({ "anyOf": [{ "type": "string" }, { "type": "integer" }] })
        );
    }

    #[test]
    fn test_tagged_union_fallback() {
        let cat: TypeDescriptor = Record::new("Cat").field("meows", TypeDescriptor::boolean()).into();
        let dog: TypeDescriptor = Record::new("Dog").field("barks", TypeDescriptor::boolean()).into();
        let d = TypeDescriptor::union([cat, dog]);
        let compiled = compile(
            &d,
            &DescriptorRegistry::new(),
            CompileOptions {
                native_unions: false,
            },
        )
        .unwrap();
        let union = &compiled.spec().schema.as_value()["properties"]["value"];
        assert_eq!(union["properties"]["variant"]["enum"], json!(["Cat", "Dog"]));
        assert_eq!(union["required"], json!(["variant"]));
        assert!(union["properties"]["Cat"].is_object());
        assert!(!compiled.spec().strict_compatible);
    }

    #[test]
    fn test_variant_label_clashing_with_tag_rejected() {
        let tag: TypeDescriptor = Record::new("variant").field("x", TypeDescriptor::string()).into();
        let other: TypeDescriptor = Record::new("Other").field("y", TypeDescriptor::string()).into();
        let d = TypeDescriptor::union([tag, other]);
        for native_unions in [true, false] {
            let err = compile(&d, &DescriptorRegistry::new(), CompileOptions { native_unions })
                .unwrap_err();
            assert!(
                matches!(err, LlmError::UnsupportedType { ref message } if message.contains("discriminator")),
                "{err:?}"
            );
        }
    }

    #[test]
    fn test_ambiguous_records_rejected() {
        let a: TypeDescriptor = Record::new("A").field("x", TypeDescriptor::string()).into();
        let b: TypeDescriptor = Record::new("B").field("x", TypeDescriptor::string()).into();
        let err = compile_default(&TypeDescriptor::union([a, b])).unwrap_err();
        assert!(matches!(err, LlmError::UnsupportedType { ref message } if message.contains("`A` and `B`")));
    }

    #[test]
    fn test_optional_superset_record_is_ambiguous() {
        let a: TypeDescriptor = Record::new("A")
            .field("x", TypeDescriptor::string())
            .optional("y", TypeDescriptor::string())
            .into();
        let b: TypeDescriptor = Record::new("B")
            .field("x", TypeDescriptor::string())
            .field("y", TypeDescriptor::string())
            .into();
        assert!(compile_default(&TypeDescriptor::union([a, b])).is_err());
    }

    #[test]
    fn test_records_with_distinct_required_fields_accepted() {
        let a: TypeDescriptor = Record::new("A").field("x", TypeDescriptor::string()).into();
        let b: TypeDescriptor = Record::new("B")
            .field("x", TypeDescriptor::string())
            .field("y", TypeDescriptor::string())
            .into();
        assert!(compile_default(&TypeDescriptor::union([a, b])).is_ok());
    }

    #[test]
    fn test_tagged_records_accepted() {
        let a: TypeDescriptor = Record::new("Circle")
            .field("kind", TypeDescriptor::enumeration(["circle"]))
            .field("size", TypeDescriptor::number())
            .into();
        let b: TypeDescriptor = Record::new("Square")
            .field("kind", TypeDescriptor::enumeration(["square"]))
            .field("size", TypeDescriptor::number())
            .into();
        assert!(compile_default(&TypeDescriptor::union([a, b])).is_ok());
    }

    #[test]
    fn test_same_kind_scalars_ambiguous() {
        let d = TypeDescriptor::union([TypeDescriptor::number(), TypeDescriptor::integer()]);
        assert!(compile_default(&d).is_err());
        let d = TypeDescriptor::union([
            TypeDescriptor::enumeration(["a", "b"]),
            TypeDescriptor::enumeration(["c"]),
        ]);
        assert!(compile_default(&d).is_ok());
    }

    #[test]
    fn test_nested_union_flattened_for_checks() {
        let d = TypeDescriptor::union([
            TypeDescriptor::string(),
            TypeDescriptor::union([TypeDescriptor::integer(), TypeDescriptor::string()]),
        ]);
        assert!(compile_default(&d).is_err());
    }

    #[test]
    fn test_invalid_descriptors_rejected() {
        let cases = [
            TypeDescriptor::enumeration(Vec::<Value>::new()),
            TypeDescriptor::enumeration([json!("a"), json!("a")]),
            TypeDescriptor::enumeration([json!([1])]),
            TypeDescriptor::string().minimum(1.0),
            TypeDescriptor::number().minimum(5.0).maximum(1.0),
            TypeDescriptor::mapping_with_keys(TypeDescriptor::integer(), TypeDescriptor::string()),
            TypeDescriptor::union(Vec::new()),
            TypeDescriptor::reference("Missing"),
            Record::new("Dup")
                .field("a", TypeDescriptor::string())
                .field("a", TypeDescriptor::string())
                .into(),
        ];
        for d in cases {
            let err = compile_default(&d).unwrap_err();
            assert!(matches!(err, LlmError::UnsupportedType { .. }), "{d:?}");
        }
    }

    fn tree(registry: DescriptorRegistry) -> Result<CompiledSchema, LlmError> {
        let registry = registry.define(
            "Node",
            Record::new("Node")
                .field("value", TypeDescriptor::integer())
                .field("children", TypeDescriptor::sequence(TypeDescriptor::reference("Node"))),
        );
        compile(
            &TypeDescriptor::reference("Node"),
            &registry,
            CompileOptions::default(),
        )
    }

    #[test]
    fn test_recursive_reference_requires_limit() {
        let err = tree(DescriptorRegistry::new()).unwrap_err();
        assert!(matches!(err, LlmError::UnsupportedType { ref message } if message.contains("recursion limit")));
    }

    #[test]
    fn test_recursive_reference_with_limit_emits_defs() {
        let compiled = tree(DescriptorRegistry::new().with_recursion_limit(4)).unwrap();
        let schema = compiled.spec().schema.as_value();
        assert_eq!(compiled.spec().name, "return_node");
        assert!(!compiled.spec().wrapped);
        assert_eq!(
            schema["properties"]["children"]["items"],
            json!({ "$ref": "#/$defs/Node" })
        );
        assert_eq!(schema["$defs"]["Node"]["type"], "object");
    }

    #[test]
    fn test_alias_cycle_rejected_even_with_limit() {
        let registry = DescriptorRegistry::new()
            .with_recursion_limit(4)
            .define("A", TypeDescriptor::reference("B"))
            .define("B", TypeDescriptor::reference("A"));
        let err = compile(
            &TypeDescriptor::reference("A"),
            &registry,
            CompileOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, LlmError::UnsupportedType { .. }));
    }

    #[test]
    fn test_compiled_schema_validates_wire_values() {
        let compiled = compile_default(&person()).unwrap();
        assert!(compiled.validate_wire(&json!({"name": "Al", "age": 3})).is_ok());
        let err = compiled.validate_wire(&json!({"name": "Al"})).unwrap_err();
        assert!(matches!(err, LlmError::SchemaMismatch { .. }));
    }

    #[test]
    fn test_variant_labels_deduplicate() {
        let labels = variant_labels(&[
            TypeDescriptor::string(),
            TypeDescriptor::reference("Node"),
            TypeDescriptor::string(),
        ]);
        assert_eq!(labels, ["string_0", "Node", "string_2"]);
    }

    #[test]
    fn test_snake_case() {
        assert_eq!(snake_case("WeatherReport"), "weather_report");
        assert_eq!(snake_case("list"), "list");
        assert_eq!(snake_case("HTTPStatus"), "httpstatus");
    }

    #[test]
    fn test_spec_as_tool_and_response_format() {
        let compiled = compile_default(&person()).unwrap();
        let tool = compiled.spec().tool_definition();
        assert_eq!(tool.name, "return_person");
        assert!(tool.strict);
        let rf = compiled.spec().response_format();
        assert_eq!(rf.name, "return_person");
    }
}
