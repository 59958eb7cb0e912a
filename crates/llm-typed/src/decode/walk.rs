//! Matching parsed JSON against a descriptor.
//!
//! The same walk serves partial snapshots and the final value. A type
//! error is reported as soon as the offending token is visible; a
//! missing required field only once its record has closed.

use indexmap::IndexMap;
use serde_json::{Number, Value};

use super::partial::PartialJson;
use super::value::PartialValue;
use crate::error::LlmError;
use crate::schema::{
    CompiledSchema, Record, Scalar, ScalarKind, TypeDescriptor, VARIANT_TAG, WRAPPED_FIELD,
    variant_labels,
};

pub(crate) struct Walker<'s> {
    schema: &'s CompiledSchema,
}

impl<'s> Walker<'s> {
    pub(crate) fn new(schema: &'s CompiledSchema) -> Self {
        Self { schema }
    }

    /// Walks a top-level wire value, removing the root wrapper when the
    /// schema uses one.
    pub(crate) fn root(&self, node: &PartialJson) -> Result<PartialValue, LlmError> {
        let declared = self.schema.descriptor();
        if !self.schema.spec().wrapped {
            return self.walk(node, declared, "$", 0);
        }

        let PartialJson::Object { entries, complete } = node else {
            return Err(type_error("$", "object", node));
        };
        if let Some((key, _)) = entries.iter().find(|(k, _)| k != WRAPPED_FIELD) {
            return Err(LlmError::mismatch(
                "$",
                format!("unexpected field `{key}`"),
                node.to_value(),
            ));
        }
        match entries.iter().rev().find(|(k, _)| k == WRAPPED_FIELD) {
            Some((_, inner)) => self.walk(inner, declared, "$", 0),
            None if *complete => Err(LlmError::mismatch(
                "$",
                format!("missing required field `{WRAPPED_FIELD}`"),
                node.to_value(),
            )),
            None => Ok(PartialValue::Pending),
        }
    }

    fn walk(
        &self,
        node: &PartialJson,
        descriptor: &TypeDescriptor,
        path: &str,
        depth: usize,
    ) -> Result<PartialValue, LlmError> {
        match descriptor {
            TypeDescriptor::Ref { name } => {
                let depth = depth + 1;
                if let Some(limit) = self.schema.registry().recursion_limit() {
                    if depth > limit {
                        return Err(LlmError::mismatch(
                            path,
                            format!("nesting exceeds recursion limit of {limit}"),
                            node.to_value(),
                        ));
                    }
                }
                let target = self.schema.registry().get(name).ok_or_else(|| {
                    LlmError::unsupported(format!("unknown reference `{name}`"))
                })?;
                self.walk(node, target, path, depth)
            }
            TypeDescriptor::Scalar(scalar) => scalar_value(node, scalar, path),
            TypeDescriptor::Enum { values } => enum_value(node, values, path),
            TypeDescriptor::Sequence { element } => {
                let PartialJson::Array { items, complete } = node else {
                    return Err(type_error(path, "list", node));
                };
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    let walked = self.walk(item, element, &format!("{path}[{i}]"), depth)?;
                    // The trailing element is checked but left out until
                    // it closes.
                    if item.is_complete() {
                        out.push(walked);
                    }
                }
                Ok(PartialValue::Sequence {
                    items: out,
                    complete: *complete,
                })
            }
            TypeDescriptor::Mapping { key, value } => {
                let PartialJson::Object { entries, complete } = node else {
                    return Err(type_error(path, "mapping", node));
                };
                let mut out = IndexMap::with_capacity(entries.len());
                for (k, v) in entries {
                    let entry_path = format!("{path}.{k}");
                    self.check_key(k, key, &entry_path)?;
                    out.insert(k.clone(), self.walk(v, value, &entry_path, depth)?);
                }
                Ok(PartialValue::Mapping {
                    entries: out,
                    complete: *complete,
                })
            }
            TypeDescriptor::Record(record) => self.record(node, record, path, depth),
            TypeDescriptor::Union { variants } => {
                if self.schema.options().native_unions {
                    self.native_union(node, variants, path, depth)
                } else {
                    self.tagged_union(node, variants, path, depth)
                }
            }
        }
    }

    fn check_key(&self, key: &str, descriptor: &TypeDescriptor, path: &str) -> Result<(), LlmError> {
        let mut resolved = descriptor;
        while let TypeDescriptor::Ref { name } = resolved {
            match self.schema.registry().get(name) {
                Some(d) => resolved = d,
                None => break,
            }
        }
        match resolved {
            TypeDescriptor::Enum { values } if !values.iter().any(|v| v == key) => {
                Err(LlmError::mismatch(
                    path,
                    format!("key `{key}` is not one of {}", Value::Array(values.clone())),
                    Value::String(key.to_owned()),
                ))
            }
            _ => Ok(()),
        }
    }

    fn record(
        &self,
        node: &PartialJson,
        record: &Record,
        path: &str,
        depth: usize,
    ) -> Result<PartialValue, LlmError> {
        let PartialJson::Object { entries, complete } = node else {
            return Err(type_error(path, "object", node));
        };

        let mut present: IndexMap<&str, &PartialJson> = IndexMap::with_capacity(entries.len());
        for (k, v) in entries {
            if record.get(k).is_none() {
                return Err(LlmError::mismatch(
                    &format!("{path}.{k}"),
                    format!("unexpected field `{k}`"),
                    v.to_value(),
                ));
            }
            present.insert(k.as_str(), v);
        }

        let mut fields = IndexMap::with_capacity(record.fields.len());
        for field in &record.fields {
            let field_path = format!("{path}.{}", field.name);
            match present.get(field.name.as_str()) {
                Some(v) => {
                    let walked = self.walk(v, &field.descriptor, &field_path, depth)?;
                    fields.insert(field.name.clone(), walked);
                }
                None if !complete => {
                    fields.insert(field.name.clone(), PartialValue::Pending);
                }
                None if field.required => {
                    return Err(LlmError::mismatch(
                        &field_path,
                        format!("missing required field `{}`", field.name),
                        node.to_value(),
                    ));
                }
                None => {}
            }
        }
        Ok(PartialValue::Record {
            fields,
            complete: *complete,
        })
    }

    fn native_union(
        &self,
        node: &PartialJson,
        variants: &[TypeDescriptor],
        path: &str,
        depth: usize,
    ) -> Result<PartialValue, LlmError> {
        let labels = variant_labels(variants);
        let mut matched = Vec::new();
        let mut rejected = Vec::new();
        for (label, variant) in labels.iter().zip(variants) {
            match self.walk(node, variant, path, depth) {
                Ok(value) => matched.push((label, value)),
                // Limit and reference errors are not about the variant.
                Err(e @ LlmError::UnsupportedType { .. }) => return Err(e),
                Err(e) => rejected.push(format!("{label}: {e}")),
            }
        }

        match matched.len() {
            0 => Err(LlmError::mismatch(
                path,
                format!("matches no union variant ({})", rejected.join("; ")),
                node.to_value(),
            )),
            1 => {
                let (label, value) = matched.remove(0);
                Ok(PartialValue::Variant {
                    name: label.clone(),
                    value: Box::new(value),
                })
            }
            // Compilation rules out a complete value matching two
            // variants, so more input will settle it.
            _ if node.is_complete() => {
                let (label, value) = matched.remove(0);
                Ok(PartialValue::Variant {
                    name: label.clone(),
                    value: Box::new(value),
                })
            }
            _ => Ok(PartialValue::Pending),
        }
    }

    fn tagged_union(
        &self,
        node: &PartialJson,
        variants: &[TypeDescriptor],
        path: &str,
        depth: usize,
    ) -> Result<PartialValue, LlmError> {
        let PartialJson::Object { entries, complete } = node else {
            return Err(type_error(path, "tagged union object", node));
        };
        let labels = variant_labels(variants);

        for (k, v) in entries {
            if k != VARIANT_TAG && !labels.contains(k) {
                return Err(LlmError::mismatch(
                    &format!("{path}.{k}"),
                    format!("unexpected field `{k}`"),
                    v.to_value(),
                ));
            }
        }

        let tag = entries.iter().rev().find(|(k, _)| k == VARIANT_TAG);
        let label = match tag {
            Some((
                _,
                PartialJson::String {
                    value,
                    complete: true,
                },
            )) => value,
            Some((_, PartialJson::String { .. })) => return Ok(PartialValue::Pending),
            Some((_, other)) => {
                return Err(type_error(&format!("{path}.{VARIANT_TAG}"), "string", other));
            }
            None if *complete => {
                return Err(LlmError::mismatch(
                    path,
                    format!("missing required field `{VARIANT_TAG}`"),
                    node.to_value(),
                ));
            }
            None => return Ok(PartialValue::Pending),
        };

        let Some(index) = labels.iter().position(|l| l == label) else {
            return Err(LlmError::mismatch(
                &format!("{path}.{VARIANT_TAG}"),
                format!("unknown variant `{label}`, expected one of {labels:?}"),
                Value::String(label.clone()),
            ));
        };

        let inner_path = format!("{path}.{label}");
        let value = match entries.iter().rev().find(|(k, _)| k == label) {
            Some((_, inner)) => self.walk(inner, &variants[index], &inner_path, depth)?,
            None if *complete => {
                return Err(LlmError::mismatch(
                    &inner_path,
                    format!("missing value for variant `{label}`"),
                    node.to_value(),
                ));
            }
            None => PartialValue::Pending,
        };
        Ok(PartialValue::Variant {
            name: label.clone(),
            value: Box::new(value),
        })
    }
}

fn json_kind(node: &PartialJson) -> &'static str {
    match node {
        PartialJson::Null => "null",
        PartialJson::Bool(_) => "boolean",
        PartialJson::Number { .. } => "number",
        PartialJson::String { .. } => "string",
        PartialJson::Array { .. } => "list",
        PartialJson::Object { .. } => "object",
    }
}

fn type_error(path: &str, expected: &str, node: &PartialJson) -> LlmError {
    LlmError::mismatch(
        path,
        format!("expected {expected}, found {}", json_kind(node)),
        node.to_value(),
    )
}

fn scalar_value(node: &PartialJson, scalar: &Scalar, path: &str) -> Result<PartialValue, LlmError> {
    match (scalar.kind, node) {
        (ScalarKind::Null, PartialJson::Null) => Ok(PartialValue::Null),
        (ScalarKind::Boolean, PartialJson::Bool(b)) => Ok(PartialValue::Bool(*b)),
        (ScalarKind::String, PartialJson::String { value, complete }) => Ok(if *complete {
            PartialValue::String(value.clone())
        } else {
            PartialValue::Pending
        }),
        (ScalarKind::Number | ScalarKind::Integer, PartialJson::Number { raw, complete }) => {
            if !complete {
                return Ok(PartialValue::Pending);
            }
            number_value(raw, scalar, path).map(PartialValue::Number)
        }
        (kind, _) => Err(type_error(path, kind.as_str(), node)),
    }
}

fn number_value(raw: &str, scalar: &Scalar, path: &str) -> Result<Number, LlmError> {
    let number: Number = raw
        .parse()
        .map_err(|_| LlmError::mismatch(path, format!("invalid number `{raw}`"), Value::Null))?;
    let actual = Value::Number(number.clone());
    let Some(float) = number.as_f64() else {
        return Err(LlmError::mismatch(path, "number out of range", actual));
    };

    if let Some(min) = scalar.minimum {
        if float < min {
            return Err(LlmError::mismatch(
                path,
                format!("{float} is less than the minimum of {min}"),
                actual,
            ));
        }
    }
    if let Some(max) = scalar.maximum {
        if float > max {
            return Err(LlmError::mismatch(
                path,
                format!("{float} is greater than the maximum of {max}"),
                actual,
            ));
        }
    }

    if scalar.kind != ScalarKind::Integer || number.is_i64() || number.is_u64() {
        return Ok(number);
    }
    // `30.0` is an integer; normalize it so typed deserialization works.
    #[allow(clippy::cast_possible_truncation)]
    if float.fract() == 0.0 && float.abs() < 9.007_199_254_740_992e15 {
        return Ok(Number::from(float as i64));
    }
    Err(LlmError::mismatch(path, "expected integer", actual))
}

fn enum_value(node: &PartialJson, values: &[Value], path: &str) -> Result<PartialValue, LlmError> {
    if matches!(node, PartialJson::Array { .. } | PartialJson::Object { .. }) {
        return Err(type_error(path, "enum value", node));
    }
    if !node.is_complete() {
        return Ok(PartialValue::Pending);
    }
    let actual = node.to_value();
    if !values.contains(&actual) {
        return Err(LlmError::mismatch(
            path,
            format!("{actual} is not one of {}", Value::Array(values.to_vec())),
            actual,
        ));
    }
    Ok(match actual {
        Value::Null => PartialValue::Null,
        Value::Bool(b) => PartialValue::Bool(b),
        Value::Number(n) => PartialValue::Number(n),
        Value::String(s) => PartialValue::String(s),
        // Enum values are scalars.
        Value::Array(_) | Value::Object(_) => PartialValue::Pending,
    })
}
