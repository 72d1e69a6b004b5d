use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use anyhow::{Error, Result};
use serde_json::Value;
use tantivy::schema::Schema;
use tantivy::TantivyDocument;

use crate::mapping::IndexMapping;

/// A single operation within a batch.
pub(crate) enum BatchOp {
    /// Adds a document, replacing any existing document with the same id.
    Index { id: String, document: TantivyDocument },

    /// Removes the document with the given id.
    Delete { id: String },
}

/// A group of write operations submitted to the index together.
///
/// Documents are converted with the index mapping as they are added so
/// a malformed document is reported by `index` rather than when the
/// batch is applied.
pub struct Batch {
    mapping: Arc<IndexMapping>,
    schema: Schema,
    ops: Vec<BatchOp>,
    dynamic_fields: BTreeSet<String>,
}

impl fmt::Debug for Batch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Batch")
            .field("operations", &self.ops.len())
            .finish()
    }
}

impl Batch {
    pub(crate) fn new(mapping: Arc<IndexMapping>, schema: Schema) -> Self {
        Self {
            mapping,
            schema,
            ops: vec![],
            dynamic_fields: BTreeSet::new(),
        }
    }

    /// Adds or replaces the document with the given id.
    pub fn index(&mut self, id: impl Into<String>, document: &Value) -> Result<()> {
        let id = id.into();
        if id.is_empty() {
            return Err(Error::msg("document id must not be empty"));
        }

        let converted = self.mapping.to_document(&self.schema, &id, document)?;
        self.dynamic_fields.extend(converted.dynamic_fields);
        self.ops.push(BatchOp::Index {
            id,
            document: converted.document,
        });

        Ok(())
    }

    /// Removes the document with the given id if it exists.
    pub fn delete(&mut self, id: impl Into<String>) {
        self.ops.push(BatchOp::Delete { id: id.into() });
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Dynamic property names seen by the documents of this batch.
    pub(crate) fn dynamic_fields(&self) -> &BTreeSet<String> {
        &self.dynamic_fields
    }

    pub(crate) fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}
