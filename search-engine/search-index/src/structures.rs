use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Error, Result};
use serde::{Deserialize, Serialize};
use tantivy::schema::{Field, FieldType, Schema};
use tantivy::Index;

use crate::helpers::Validate;
use crate::mapping::{IndexMapping, ALL_FIELD, DYNAMIC_FIELD, ID_FIELD, TYPE_FIELD};

pub static MAPPING_FILE: &str = "mapping.json";
pub static DYNAMIC_FIELDS_FILE: &str = "dynamic_fields.json";
pub static DATA_DIR: &str = "data";

/// Runtime settings of an index, these are not persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSettings {
    /// The amount of threads a single search may fan out over.
    #[serde(default = "defaults::reader_threads")]
    pub reader_threads: usize,

    /// The maximum amount of searches executed at once.
    #[serde(default = "defaults::max_concurrency")]
    pub max_concurrency: usize,

    /// The amount of worker threads to dedicate to the writer.
    #[serde(default = "defaults::writer_threads")]
    pub writer_threads: usize,

    /// The amount of bytes to allocate to the writer buffer.
    ///
    /// A value bellow the minimum lets the writer size itself from the
    /// available system memory.
    #[serde(default)]
    pub writer_buffer: usize,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            reader_threads: defaults::reader_threads(),
            max_concurrency: defaults::max_concurrency(),
            writer_threads: defaults::writer_threads(),
            writer_buffer: 0,
        }
    }
}

mod defaults {
    /// The max number of writer threads to default to.
    const MAX_DEFAULT_THREAD_COUNT: usize = 8;

    pub fn reader_threads() -> usize {
        1
    }

    pub fn max_concurrency() -> usize {
        num_cpus::get()
    }

    pub fn writer_threads() -> usize {
        num_cpus::get().min(MAX_DEFAULT_THREAD_COUNT)
    }
}

impl Validate for IndexSettings {
    fn validate(&self) -> Result<()> {
        if self.max_concurrency == 0 {
            return Err(Error::msg("max concurrency must be at least 1."));
        }

        if self.writer_threads == 0 {
            return Err(Error::msg("writer threads must be at least 1."));
        }

        Ok(())
    }
}

/// The handles of the internal fields every index schema carries.
#[derive(Debug, Copy, Clone)]
pub(crate) struct InternalFields {
    pub(crate) id: Field,
    pub(crate) doc_type: Field,
    pub(crate) all: Field,
    pub(crate) dynamic: Field,
}

impl InternalFields {
    fn from_schema(schema: &Schema) -> Result<Self> {
        Ok(Self {
            id: schema.get_field(ID_FIELD)?,
            doc_type: schema.get_field(TYPE_FIELD)?,
            all: schema.get_field(ALL_FIELD)?,
            dynamic: schema.get_field(DYNAMIC_FIELD)?,
        })
    }
}

/// Everything the reader and writer of an index share.
#[derive(Clone)]
pub(crate) struct IndexContext {
    /// The name of the index, used in logs and thread names.
    pub(crate) name: String,

    /// The directory holding the mapping and index data.
    pub(crate) path: PathBuf,

    pub(crate) index: Index,

    pub(crate) mapping: Arc<IndexMapping>,

    pub(crate) fields: InternalFields,

    /// The fields searched when a query names none.
    pub(crate) default_fields: Vec<Field>,

    pub(crate) settings: IndexSettings,
}

impl IndexContext {
    pub(crate) fn new(
        path: &Path,
        index: Index,
        mapping: IndexMapping,
        settings: IndexSettings,
    ) -> Result<Self> {
        let schema = index.schema();
        let fields = InternalFields::from_schema(&schema)?;

        let mut default_fields = vec![fields.all];
        for (field, entry) in schema.fields() {
            if entry.name().starts_with('_') {
                continue;
            }

            if let FieldType::Str(opts) = entry.field_type() {
                let tokenized = opts
                    .get_indexing_options()
                    .map(|indexing| indexing.tokenizer() != "raw")
                    .unwrap_or(false);

                if tokenized {
                    default_fields.push(field);
                }
            }
        }

        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| path.to_string_lossy().to_string());

        Ok(Self {
            name,
            path: path.to_path_buf(),
            index,
            mapping: Arc::new(mapping),
            fields,
            default_fields,
            settings,
        })
    }

    #[inline]
    pub(crate) fn schema(&self) -> Schema {
        self.index.schema()
    }
}
