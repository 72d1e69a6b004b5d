use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tantivy::schema::{FieldType, Schema, Value as _};
use tantivy::tokenizer::TokenStream;
use tantivy::{Document, Index, TantivyDocument};

use crate::helpers::format_date;
use crate::mapping::{IndexMapping, ALL_FIELD, DYNAMIC_FIELD, ID_FIELD, TYPE_FIELD};

/// A document as it was stored in the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredDocument {
    pub id: String,

    #[serde(rename = "type")]
    pub doc_type: String,

    /// The stored fields, single values are unwrapped from their array.
    pub fields: Map<String, Value>,
}

/// A stored document alongside the terms each of its fields was indexed as.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebugDocument {
    #[serde(flatten)]
    pub document: StoredDocument,

    pub terms: BTreeMap<String, Vec<String>>,
}

/// Rebuilds the user facing form of a stored document.
///
/// Dynamic properties are merged back into the top level and the type
/// property is restored for documents that had a known type, other type
/// values come back with the dynamic properties.
pub(crate) fn render(
    mapping: &IndexMapping,
    schema: &Schema,
    doc: &TantivyDocument,
) -> Result<StoredDocument> {
    let mut named: Map<String, Value> = serde_json::from_str(&doc.to_json(schema))?;

    let id = take_first_string(&mut named, ID_FIELD).ok_or_else(|| {
        anyhow!("document has been missed labeled (missing '_id'), the dataset is invalid")
    })?;
    let doc_type = take_first_string(&mut named, TYPE_FIELD)
        .unwrap_or_else(|| mapping.default_type.clone());

    let dynamic = named.remove(DYNAMIC_FIELD);

    let mut fields = Map::with_capacity(named.len());
    for (key, value) in named {
        fields.insert(key, unwrap_single(value));
    }

    if let Some(Value::Array(objects)) = dynamic {
        for object in objects {
            if let Value::Object(entries) = object {
                for (key, value) in entries {
                    fields.entry(key).or_insert(value);
                }
            }
        }
    }

    if doc_type != mapping.default_type {
        fields.insert(mapping.type_field.clone(), Value::String(doc_type.clone()));
    }

    Ok(StoredDocument {
        id,
        doc_type,
        fields,
    })
}

/// Runs every stored value through the analyzer of its field.
pub(crate) fn analyzed_terms(
    index: &Index,
    schema: &Schema,
    doc: &TantivyDocument,
) -> Result<BTreeMap<String, Vec<String>>> {
    let mut terms = BTreeMap::new();

    for (field, entry) in schema.fields() {
        if entry.name() == ALL_FIELD || entry.name() == DYNAMIC_FIELD {
            continue;
        }

        let mut out = vec![];
        match entry.field_type() {
            FieldType::Str(opts) if opts.get_indexing_options().is_some() => {
                let mut analyzer = index.tokenizer_for_field(field)?;
                for value in doc.get_all(field) {
                    if let Some(text) = value.as_str() {
                        let mut stream = analyzer.token_stream(text);
                        while stream.advance() {
                            out.push(stream.token().text.clone());
                        }
                    }
                }
            },
            FieldType::F64(_) => {
                out.extend(doc.get_all(field).filter_map(|v| v.as_f64()).map(|v| v.to_string()));
            },
            FieldType::Date(_) => {
                out.extend(doc.get_all(field).filter_map(|v| v.as_datetime()).map(format_date));
            },
            FieldType::Bool(_) => {
                out.extend(doc.get_all(field).filter_map(|v| v.as_bool()).map(|v| v.to_string()));
            },
            _ => continue,
        }

        if !out.is_empty() {
            terms.insert(entry.name().to_string(), out);
        }
    }

    Ok(terms)
}

fn take_first_string(named: &mut Map<String, Value>, key: &str) -> Option<String> {
    match named.remove(key)? {
        Value::Array(mut values) if !values.is_empty() => match values.remove(0) {
            Value::String(s) => Some(s),
            _ => None,
        },
        Value::String(s) => Some(s),
        _ => None,
    }
}

fn unwrap_single(value: Value) -> Value {
    match value {
        Value::Array(mut values) if values.len() == 1 => values.remove(0),
        other => other,
    }
}
