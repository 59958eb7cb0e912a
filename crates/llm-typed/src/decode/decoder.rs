use std::sync::Arc;

use serde_json::Value;

use super::partial::{PartialJson, parse_partial};
use super::value::{CompleteValue, PartialValue};
use super::walk::Walker;
use crate::error::LlmError;
use crate::schema::CompiledSchema;

/// Incrementally decodes one streamed JSON value against a compiled
/// schema.
///
/// Feed fragments with [`push`](Self::push) in arrival order; each call
/// returns a new [`PartialValue`] snapshot when the visible value
/// changed. Call [`finish`](Self::finish) once the stream ends to get
/// the strictly parsed and validated result.
///
/// Snapshots depend only on the concatenated text, never on where the
/// fragment boundaries fell.
///
/// ```rust
/// use std::sync::Arc;
/// use llm_typed::decode::StructuredDecoder;
/// use llm_typed::schema::{compile, CompileOptions, DescriptorRegistry, Record, TypeDescriptor};
///
/// let person: TypeDescriptor = Record::new("Person")
///     .field("name", TypeDescriptor::string())
///     .field("age", TypeDescriptor::integer())
///     .into();
/// let schema = compile(&person, &DescriptorRegistry::new(), CompileOptions::default()).unwrap();
/// let mut decoder = StructuredDecoder::new(Arc::new(schema));
///
/// decoder.push(r#"{"name":"Al"#).unwrap();
/// let snapshot = decoder.push(r#"ice","age":3"#).unwrap().unwrap();
/// assert!(snapshot.get("age").unwrap().is_pending());
///
/// decoder.push("0}").unwrap();
/// let value = decoder.finish().unwrap();
/// assert_eq!(value.as_value()["age"], 30);
/// ```
#[derive(Debug)]
pub struct StructuredDecoder {
    schema: Arc<CompiledSchema>,
    buffer: String,
    last: Option<PartialValue>,
}

impl StructuredDecoder {
    /// Creates a decoder with an empty buffer.
    pub fn new(schema: Arc<CompiledSchema>) -> Self {
        Self {
            schema,
            buffer: String::new(),
            last: None,
        }
    }

    /// Appends a fragment and re-derives the snapshot.
    ///
    /// Returns `Ok(Some(snapshot))` when the snapshot differs from the
    /// previous one and `Ok(None)` when nothing visible changed.
    ///
    /// # Errors
    ///
    /// - [`LlmError::MalformedOutput`] for a syntax error no further input
    ///   could repair
    /// - [`LlmError::SchemaMismatch`] for a value that already contradicts
    ///   the schema
    pub fn push(&mut self, fragment: &str) -> Result<Option<PartialValue>, LlmError> {
        self.buffer.push_str(fragment);
        let node = parse_partial(&self.buffer).map_err(|e| LlmError::MalformedOutput {
            message: e.to_string(),
            raw: self.buffer.clone(),
        })?;
        let Some(node) = node else {
            return Ok(None);
        };
        let snapshot = Walker::new(&self.schema).root(&node)?;
        if self.last.as_ref() == Some(&snapshot) {
            return Ok(None);
        }
        self.last = Some(snapshot.clone());
        Ok(Some(snapshot))
    }

    /// The most recent snapshot, if any value has started.
    pub fn snapshot(&self) -> Option<&PartialValue> {
        self.last.as_ref()
    }

    /// Everything pushed so far.
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    /// The schema this decoder checks against.
    pub fn schema(&self) -> &Arc<CompiledSchema> {
        &self.schema
    }

    /// Parses the whole buffer strictly and validates it.
    ///
    /// # Errors
    ///
    /// - [`LlmError::MalformedOutput`] if the buffer is empty or not a
    ///   single valid JSON document
    /// - [`LlmError::SchemaMismatch`] if it violates the schema
    pub fn finish(&mut self) -> Result<CompleteValue, LlmError> {
        let wire: Value = serde_json::from_str(&self.buffer).map_err(|e| {
            let message = if self.buffer.trim().is_empty() {
                "model returned no output for the structured value".to_owned()
            } else {
                format!("invalid JSON: {e}")
            };
            LlmError::MalformedOutput {
                message,
                raw: self.buffer.clone(),
            }
        })?;

        self.schema.validate_wire(&wire)?;

        let snapshot = Walker::new(&self.schema).root(&PartialJson::from_value(&wire))?;
        let value = snapshot.to_value();
        self.last = Some(snapshot);
        Ok(CompleteValue::new(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::{CompileOptions, DescriptorRegistry, Record, TypeDescriptor, compile};
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn decoder(d: TypeDescriptor) -> StructuredDecoder {
        let schema = compile(&d, &DescriptorRegistry::new(), CompileOptions::default()).unwrap();
        StructuredDecoder::new(Arc::new(schema))
    }

    fn person() -> TypeDescriptor {
        Record::new("Person")
            .field("name", TypeDescriptor::string())
            .field("age", TypeDescriptor::integer())
            .into()
    }

    #[test]
    fn test_person_chunk_scenario() {
        let mut d = decoder(person());

        let s1 = d.push(r#"{"na"#).unwrap().unwrap();
        assert!(s1.get("name").unwrap().is_pending());
        assert!(s1.get("age").unwrap().is_pending());

        // `"Al` is still open.
        assert_eq!(d.push(r#"me":"Al"#).unwrap(), None);

        let s3 = d.push(r#"ice","age":3"#).unwrap().unwrap();
        assert_eq!(s3.get("name"), Some(&PartialValue::String("Alice".into())));
        assert!(s3.get("age").unwrap().is_pending());

        let s4 = d.push("0}").unwrap().unwrap();
        assert!(s4.is_complete());
        assert!(s4.refines(&s3));

        let value = d.finish().unwrap();
        assert_eq!(value.as_value(), &json!({"name": "Alice", "age": 30}));
    }

    #[test]
    fn test_fragmentation_invariance() {
        let doc = r#"{"name":"Zoë é😀","age":41}"#;
        let mut whole = decoder(person());
        whole.push(doc).unwrap();
        let expected = whole.finish().unwrap();

        for size in 1..=5 {
            let mut d = decoder(person());
            let chars: Vec<char> = doc.chars().collect();
            let mut last = None;
            for piece in chars.chunks(size) {
                let piece: String = piece.iter().collect();
                if let Some(snapshot) = d.push(&piece).unwrap() {
                    if let Some(prev) = &last {
                        assert!(snapshot.refines(prev), "size {size}");
                    }
                    last = Some(snapshot);
                }
            }
            assert_eq!(d.finish().unwrap(), expected, "size {size}");
        }
    }

    fn order() -> TypeDescriptor {
        let item = Record::new("Item")
            .field("sku", TypeDescriptor::string())
            .field("qty", TypeDescriptor::integer())
            .optional("note", TypeDescriptor::string());
        Record::new("Order")
            .field("title", TypeDescriptor::string())
            .field("scores", TypeDescriptor::sequence(TypeDescriptor::number()))
            .field("ratio", TypeDescriptor::number())
            .field(
                "tags",
                TypeDescriptor::mapping(TypeDescriptor::sequence(TypeDescriptor::integer())),
            )
            .field("color", TypeDescriptor::enumeration(["red", "green", "blue"]))
            .field("items", TypeDescriptor::sequence(item.into()))
            .field(
                "grid",
                TypeDescriptor::sequence(TypeDescriptor::sequence(TypeDescriptor::number())),
            )
            .field("paid", TypeDescriptor::boolean())
            .optional("discount", TypeDescriptor::number())
            .into()
    }

    #[test]
    fn test_nested_document_round_trips_at_every_fragment_size() {
        let doc = concat!(
            r#"{"title":"Caf\u00e9 \"Ünïcødé\" 日本\n😀","#,
            r#""scores":[-12,0,7e2,1.5E-3],"ratio":-2.5e-3,"#,
            r#""tags":{"a":[1,-2],"b":[],"ключ":[30]},"color":"green","#,
            r#""items":[{"sku":"x-1","qty":3,"note":"tab\there"},{"sku":"y\\2","qty":-4}],"#,
            r#""grid":[[1.25,-0.5],[]],"paid":true}"#
        );
        let expected: Value = serde_json::from_str(doc).unwrap();
        let chars: Vec<char> = doc.chars().collect();

        for size in 1..=7 {
            let mut d = decoder(order());
            let mut last: Option<PartialValue> = None;
            for piece in chars.chunks(size) {
                let piece: String = piece.iter().collect();
                if let Some(snapshot) = d.push(&piece).unwrap() {
                    if let Some(prev) = &last {
                        assert!(snapshot.refines(prev), "size {size}: {snapshot:?} after {prev:?}");
                    }
                    last = Some(snapshot);
                }
            }
            assert!(last.as_ref().is_some_and(PartialValue::is_complete), "size {size}");
            assert_eq!(d.finish().unwrap().into_value(), expected, "size {size}");
        }
    }

    #[test]
    fn test_empty_output_is_malformed() {
        let mut d = decoder(person());
        let err = d.finish().unwrap_err();
        assert!(matches!(err, LlmError::MalformedOutput { ref message, .. } if message.contains("no output")));
    }

    #[test]
    fn test_truncated_output_is_malformed() {
        let mut d = decoder(person());
        d.push(r#"{"name":"Al"#).unwrap();
        assert!(matches!(d.finish(), Err(LlmError::MalformedOutput { .. })));
    }

    #[test]
    fn test_mid_stream_syntax_error() {
        let mut d = decoder(person());
        let err = d.push(r#"{"name" "Al"#).unwrap_err();
        assert!(matches!(err, LlmError::MalformedOutput { ref raw, .. } if raw == r#"{"name" "Al"#));
    }

    #[test]
    fn test_finish_reports_schema_mismatch() {
        let mut d = decoder(person());
        d.push(r#"{"name":"Alice"}"#).unwrap();
        assert!(matches!(d.finish(), Err(LlmError::SchemaMismatch { .. })));
    }

    #[test]
    fn test_wrapped_root_finishes_unwrapped() {
        let mut d = decoder(TypeDescriptor::sequence(TypeDescriptor::integer()));
        d.push(r#"{"value":[1,2,3]}"#).unwrap();
        assert_eq!(d.finish().unwrap().into_value(), json!([1, 2, 3]));
    }
}
