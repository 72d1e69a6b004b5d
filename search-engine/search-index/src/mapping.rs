use std::collections::{BTreeMap, BTreeSet};

use anyhow::{anyhow, Error, Result};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tantivy::schema::{
    IndexRecordOption,
    JsonObjectOptions,
    Schema,
    TextFieldIndexing,
    TextOptions,
    FAST,
    INDEXED,
    STORED,
    STRING,
};
use tantivy::TantivyDocument;

use crate::analyzers;
use crate::helpers::Validate;

/// The unique document identifier.
pub static ID_FIELD: &str = "_id";

/// The name of the document mapping a document was indexed with.
pub static TYPE_FIELD: &str = "_type";

/// Every text and keyword value of a document, used as the default field.
pub static ALL_FIELD: &str = "_all";

/// Unmapped properties of dynamic document mappings.
pub static DYNAMIC_FIELD: &str = "_dynamic";

/// The kind of value a mapped field holds.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    /// Analyzed text.
    Text,

    /// A single, exact, un-analyzed token. Keywords can be faceted.
    Keyword,

    /// A f64 value. Numbers can be sorted and range queried.
    Number,

    /// A UTC timestamp with second precision.
    Date,

    /// `true` or `false`.
    Boolean,
}

/// Describes how a single document property is indexed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMapping {
    #[serde(rename = "type")]
    pub kind: FieldKind,

    /// The analyzer for text fields, the mapping's default when missing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analyzer: Option<String>,

    #[serde(default = "default_to_true")]
    pub stored: bool,

    #[serde(default = "default_to_true")]
    pub include_in_all: bool,
}

impl FieldMapping {
    pub fn new(kind: FieldKind) -> Self {
        Self {
            kind,
            analyzer: None,
            stored: true,
            include_in_all: true,
        }
    }

    pub fn text(analyzer: &str) -> Self {
        Self {
            analyzer: Some(analyzer.to_string()),
            ..Self::new(FieldKind::Text)
        }
    }
}

/// The mapping of a single document type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentMapping {
    /// Disabled mappings only index the document id and type.
    #[serde(default = "default_to_true")]
    pub enabled: bool,

    /// Index unmapped properties into the dynamic field.
    #[serde(default = "default_to_true")]
    pub dynamic: bool,

    #[serde(default)]
    pub fields: BTreeMap<String, FieldMapping>,
}

impl Default for DocumentMapping {
    fn default() -> Self {
        Self {
            enabled: true,
            dynamic: true,
            fields: BTreeMap::new(),
        }
    }
}

impl DocumentMapping {
    fn with_fields(fields: Vec<(&str, FieldMapping)>) -> Self {
        Self {
            fields: fields
                .into_iter()
                .map(|(name, field)| (name.to_string(), field))
                .collect(),
            ..Self::default()
        }
    }
}

/// Describes how documents are turned into index fields.
///
/// A document selects its mapping through the `type_field` property,
/// falling back to `default_mapping` when the property is missing or
/// names an unknown type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMapping {
    #[serde(default = "defaults::type_field")]
    pub type_field: String,

    #[serde(default = "defaults::default_type")]
    pub default_type: String,

    #[serde(default = "defaults::default_analyzer")]
    pub default_analyzer: String,

    #[serde(default)]
    pub types: BTreeMap<String, DocumentMapping>,

    #[serde(default)]
    pub default_mapping: DocumentMapping,
}

fn default_to_true() -> bool {
    true
}

mod defaults {
    pub fn type_field() -> String {
        "type".to_string()
    }

    pub fn default_type() -> String {
        "_default".to_string()
    }

    pub fn default_analyzer() -> String {
        crate::analyzers::ENGLISH.to_string()
    }
}

impl Default for IndexMapping {
    fn default() -> Self {
        Self {
            type_field: defaults::type_field(),
            default_type: defaults::default_type(),
            default_analyzer: defaults::default_analyzer(),
            types: BTreeMap::new(),
            default_mapping: DocumentMapping::default(),
        }
    }
}

impl Validate for IndexMapping {
    fn validate(&self) -> Result<()> {
        if self.type_field.is_empty()
            || self.type_field.starts_with('_')
            || self.type_field.contains('.')
        {
            return Err(anyhow!(
                "invalid type field {:?}, names must not be empty, start with '_' or contain '.'",
                &self.type_field
            ));
        }

        if !analyzers::is_known(&self.default_analyzer) {
            return Err(anyhow!(
                "unknown default analyzer {:?}",
                &self.default_analyzer
            ));
        }

        self.merged_fields().map(|_| ())
    }
}

impl IndexMapping {
    /// The mapping used for the beer and brewery sample documents.
    pub fn beer() -> Self {
        let english = || FieldMapping::text(analyzers::ENGLISH);
        let keyword = || FieldMapping::new(FieldKind::Keyword);
        let number = || FieldMapping::new(FieldKind::Number);
        let date = || FieldMapping::new(FieldKind::Date);

        let beer = DocumentMapping::with_fields(vec![
            ("name", english()),
            ("description", english()),
            ("style", keyword()),
            ("category", keyword()),
            ("brewery_id", keyword()),
            ("abv", number()),
            ("ibu", number()),
            ("srm", number()),
            ("upc", number()),
            ("updated", date()),
        ]);

        let brewery = DocumentMapping::with_fields(vec![
            ("name", english()),
            ("description", english()),
            ("city", keyword()),
            ("state", keyword()),
            ("country", keyword()),
            ("code", keyword()),
            ("phone", keyword()),
            ("website", keyword()),
            ("updated", date()),
        ]);

        let mut mapping = Self::default();
        mapping.types.insert("beer".to_string(), beer);
        mapping.types.insert("brewery".to_string(), brewery);
        mapping
    }

    /// Loads a mapping from its JSON representation and validates it.
    pub fn from_json(data: &[u8]) -> Result<Self> {
        let mapping: Self = serde_json::from_slice(data)?;
        mapping.validate()?;
        Ok(mapping)
    }

    /// Every mapped field across all document mappings.
    ///
    /// A field shared by several document mappings must agree on its kind
    /// and analyzer, it is stored and included in `_all` if any of the
    /// declarations ask for it.
    pub fn merged_fields(&self) -> Result<BTreeMap<String, FieldMapping>> {
        let mut merged: BTreeMap<String, FieldMapping> = BTreeMap::new();

        let mappings = self
            .types
            .values()
            .chain(std::iter::once(&self.default_mapping));

        for mapping in mappings {
            for (name, field) in mapping.fields.iter() {
                if name.is_empty() || name.starts_with('_') || name.contains('.') {
                    return Err(anyhow!(
                        "invalid field name {:?}, names must not be empty, start with '_' or contain '.'",
                        name
                    ));
                }

                if name == &self.type_field {
                    return Err(anyhow!(
                        "field {:?} is reserved for the document type",
                        name
                    ));
                }

                let mut field = field.clone();
                match field.kind {
                    FieldKind::Text => {
                        let analyzer = field
                            .analyzer
                            .get_or_insert_with(|| self.default_analyzer.clone());

                        if !analyzers::is_known(analyzer) {
                            return Err(anyhow!(
                                "unknown analyzer {:?} for field {:?}",
                                analyzer,
                                name
                            ));
                        }
                    },
                    _ => field.analyzer = None,
                }

                if let Some(existing) = merged.get_mut(name) {
                    if existing.kind != field.kind {
                        return Err(anyhow!(
                            "field {:?} is declared as both {:?} and {:?}",
                            name,
                            existing.kind,
                            field.kind
                        ));
                    }

                    if existing.analyzer != field.analyzer {
                        return Err(anyhow!(
                            "field {:?} is declared with two different analyzers",
                            name
                        ));
                    }

                    existing.stored |= field.stored;
                    existing.include_in_all |= field.include_in_all;
                    continue;
                }

                merged.insert(name.clone(), field);
            }
        }

        Ok(merged)
    }

    /// Builds the tantivy schema for this mapping.
    pub fn build_schema(&self) -> Result<Schema> {
        let mut builder = Schema::builder();

        builder.add_text_field(ID_FIELD, STRING | STORED | FAST);
        builder.add_text_field(TYPE_FIELD, STRING | STORED | FAST);
        builder.add_text_field(&self.type_field, STRING | FAST);

        let all_indexing = TextFieldIndexing::default()
            .set_tokenizer(&self.default_analyzer)
            .set_index_option(IndexRecordOption::WithFreqsAndPositions);
        builder.add_text_field(
            ALL_FIELD,
            TextOptions::default().set_indexing_options(all_indexing),
        );

        let dynamic_indexing = TextFieldIndexing::default()
            .set_tokenizer(analyzers::STANDARD)
            .set_index_option(IndexRecordOption::WithFreqsAndPositions);
        builder.add_json_field(
            DYNAMIC_FIELD,
            JsonObjectOptions::default()
                .set_stored()
                .set_indexing_options(dynamic_indexing),
        );

        for (name, field) in self.merged_fields()? {
            match field.kind {
                FieldKind::Text => {
                    let analyzer = field
                        .analyzer
                        .as_deref()
                        .unwrap_or(&self.default_analyzer);
                    let indexing = TextFieldIndexing::default()
                        .set_tokenizer(analyzer)
                        .set_index_option(IndexRecordOption::WithFreqsAndPositions);

                    let mut opts = TextOptions::default().set_indexing_options(indexing);
                    if field.stored {
                        opts = opts.set_stored();
                    }

                    builder.add_text_field(&name, opts);
                },
                FieldKind::Keyword => {
                    let opts = if field.stored {
                        STRING | FAST | STORED
                    } else {
                        STRING | FAST
                    };

                    builder.add_text_field(&name, opts);
                },
                FieldKind::Number => {
                    if field.stored {
                        builder.add_f64_field(&name, INDEXED | FAST | STORED);
                    } else {
                        builder.add_f64_field(&name, INDEXED | FAST);
                    }
                },
                FieldKind::Date => {
                    if field.stored {
                        builder.add_date_field(&name, INDEXED | FAST | STORED);
                    } else {
                        builder.add_date_field(&name, INDEXED | FAST);
                    }
                },
                FieldKind::Boolean => {
                    if field.stored {
                        builder.add_bool_field(&name, INDEXED | FAST | STORED);
                    } else {
                        builder.add_bool_field(&name, INDEXED | FAST);
                    }
                },
            }
        }

        Ok(builder.build())
    }

    /// The type name of the given document.
    pub fn document_type(&self, doc: &Map<String, Value>) -> String {
        match doc.get(&self.type_field) {
            Some(Value::String(name)) if self.types.contains_key(name) => {
                name.clone()
            },
            _ => self.default_type.clone(),
        }
    }

    /// The document mapping used for a given type name.
    pub fn mapping_for(&self, type_name: &str) -> &DocumentMapping {
        self.types.get(type_name).unwrap_or(&self.default_mapping)
    }

    /// Converts a JSON object into a tantivy document.
    ///
    /// Values that cannot be converted into their mapped kind are skipped,
    /// the rest of the document is still indexed.
    pub fn to_document(
        &self,
        schema: &Schema,
        id: &str,
        value: &Value,
    ) -> Result<ConvertedDocument> {
        let object = value
            .as_object()
            .ok_or_else(|| anyhow!("document {:?} is not a JSON object", id))?;

        let type_name = self.document_type(object);
        let mapping = self.mapping_for(&type_name);

        let mut out = Map::new();
        out.insert(ID_FIELD.to_string(), Value::String(id.to_string()));
        out.insert(TYPE_FIELD.to_string(), Value::String(type_name.clone()));

        if let Some(raw) = object.get(&self.type_field) {
            let values = convert_values(FieldKind::Keyword, raw);
            if !values.is_empty() {
                out.insert(self.type_field.clone(), Value::Array(values));
            }
        }

        // A known type is restored from `_type` when rendering, anything
        // else is kept as a regular property.
        let typed = type_name != self.default_type;

        let mut all = vec![];
        let mut dynamic = Map::new();

        if mapping.enabled {
            for (key, value) in object {
                if typed && key == &self.type_field {
                    continue;
                }

                if let Some(field) = mapping.fields.get(key) {
                    let converted = convert_values(field.kind, value);
                    if converted.is_empty() {
                        trace!(
                            "skipping field {:?} of document {:?}, value cannot be converted to {:?}",
                            key,
                            id,
                            field.kind,
                        );
                        continue;
                    }

                    if field.include_in_all
                        && matches!(field.kind, FieldKind::Text | FieldKind::Keyword)
                    {
                        all.extend(converted.iter().cloned());
                    }

                    out.insert(key.clone(), Value::Array(converted));
                } else if mapping.dynamic && !key.starts_with('_') {
                    collect_strings(value, &mut all);
                    dynamic.insert(key.clone(), value.clone());
                }
            }
        }

        let dynamic_fields = dynamic.keys().cloned().collect();

        if !all.is_empty() {
            out.insert(ALL_FIELD.to_string(), Value::Array(all));
        }

        if !dynamic.is_empty() {
            out.insert(DYNAMIC_FIELD.to_string(), Value::Object(dynamic));
        }

        let json = serde_json::to_string(&Value::Object(out))?;
        let document = TantivyDocument::parse_json(schema, &json)
            .map_err(|e| anyhow!("cannot build document {:?}: {}", id, e))?;

        Ok(ConvertedDocument {
            document,
            dynamic_fields,
        })
    }
}

/// A document ready for indexing alongside the names of the
/// properties that landed in the dynamic field.
pub struct ConvertedDocument {
    pub document: TantivyDocument,
    pub dynamic_fields: BTreeSet<String>,
}

fn convert_values(kind: FieldKind, value: &Value) -> Vec<Value> {
    match value {
        Value::Array(values) => values
            .iter()
            .filter(|v| !v.is_array())
            .filter_map(|v| convert_value(kind, v))
            .collect(),
        other => convert_value(kind, other).into_iter().collect(),
    }
}

fn convert_value(kind: FieldKind, value: &Value) -> Option<Value> {
    match (kind, value) {
        (FieldKind::Text | FieldKind::Keyword, Value::String(s)) => {
            Some(Value::String(s.clone()))
        },
        (FieldKind::Text | FieldKind::Keyword, Value::Number(n)) => {
            Some(Value::String(n.to_string()))
        },
        (FieldKind::Text | FieldKind::Keyword, Value::Bool(b)) => {
            Some(Value::String(b.to_string()))
        },
        (FieldKind::Number, Value::Number(n)) => finite_number(n.as_f64()?),
        (FieldKind::Number, Value::String(s)) => {
            finite_number(s.trim().parse::<f64>().ok()?)
        },
        (FieldKind::Date, Value::String(s)) => parse_date(s)
            .ok()
            .map(|dt| Value::String(dt.to_rfc3339_opts(SecondsFormat::Secs, true))),
        (FieldKind::Boolean, Value::Bool(b)) => Some(Value::Bool(*b)),
        (FieldKind::Boolean, Value::String(s)) => match s.as_str() {
            "true" => Some(Value::Bool(true)),
            "false" => Some(Value::Bool(false)),
            _ => None,
        },
        _ => None,
    }
}

fn finite_number(v: f64) -> Option<Value> {
    if v.is_finite() {
        serde_json::Number::from_f64(v).map(Value::Number)
    } else {
        None
    }
}

fn collect_strings(value: &Value, out: &mut Vec<Value>) {
    match value {
        Value::String(s) => out.push(Value::String(s.clone())),
        Value::Array(values) => values.iter().for_each(|v| collect_strings(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_strings(v, out)),
        _ => {},
    }
}

/// Parses a date in RFC 3339, `YYYY-MM-DD HH:MM:SS` or `YYYY-MM-DD` form.
///
/// Dates without an offset are taken to be UTC.
pub fn parse_date(value: &str) -> Result<DateTime<Utc>> {
    let value = value.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }

    if let Ok(dt) = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S") {
        return Ok(Utc.from_utc_datetime(&dt));
    }

    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| Utc.from_utc_datetime(&dt))
        .ok_or_else(|| Error::msg(format!("unrecognised date format {:?}", value)))
}
