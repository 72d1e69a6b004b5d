use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Error, Result};
use hashbrown::HashSet;
use parking_lot::Mutex;
use tantivy::directory::MmapDirectory;
use tantivy::schema::Schema;

use crate::batch::Batch;
use crate::document::{DebugDocument, StoredDocument};
use crate::helpers::Validate;
use crate::mapping::{IndexMapping, ALL_FIELD, DYNAMIC_FIELD};
use crate::reader::{SearchRequest, SearchResult};
use crate::structures::{
    IndexContext,
    IndexSettings,
    DATA_DIR,
    DYNAMIC_FIELDS_FILE,
    MAPPING_FILE,
};
use crate::writer::WriterOp;
use crate::{analyzers, reader, writer};

/// Errors raised when opening or creating an index.
#[derive(Debug, thiserror::Error)]
pub enum OpenError {
    #[error("index path {0:?} does not exist")]
    PathDoesNotExist(PathBuf),

    #[error("index path {0:?} already exists")]
    PathAlreadyExists(PathBuf),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

#[derive(Clone)]
pub struct Index(Arc<InternalIndex>);

impl Index {
    /// Creates a brand new index at the given path.
    ///
    /// The path must not exist yet, the mapping is persisted alongside
    /// the index data so it can be re-opened later.
    pub async fn create(
        path: impl AsRef<Path>,
        mapping: IndexMapping,
        settings: IndexSettings,
    ) -> Result<Self, OpenError> {
        let path = path.as_ref();
        if tokio::fs::metadata(path).await.is_ok() {
            return Err(OpenError::PathAlreadyExists(path.to_path_buf()));
        }

        let index = InternalIndex::create(path, mapping, settings).await?;
        Ok(Self(Arc::new(index)))
    }

    /// Opens an index previously created at the given path.
    pub async fn open(
        path: impl AsRef<Path>,
        settings: IndexSettings,
    ) -> Result<Self, OpenError> {
        let path = path.as_ref();
        if tokio::fs::metadata(path).await.is_err() {
            return Err(OpenError::PathDoesNotExist(path.to_path_buf()));
        }

        let index = InternalIndex::open(path, settings).await?;
        Ok(Self(Arc::new(index)))
    }

    /// The name of the index, taken from its directory name.
    #[inline]
    pub fn name(&self) -> &str {
        &self.0.ctx.name
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.0.ctx.path
    }

    #[inline]
    pub fn mapping(&self) -> &IndexMapping {
        &self.0.ctx.mapping
    }

    /// Creates an empty batch bound to this index's mapping.
    pub fn new_batch(&self) -> Batch {
        Batch::new(self.0.ctx.mapping.clone(), self.0.ctx.schema())
    }

    /// Applies and commits every operation of the batch.
    ///
    /// This function is semi-asynchronous in the sense that there is a buffer of
    /// 20 tasks that can be submitted to the writer before the extra pending tasks
    /// must wait in order to then submit their operation to the queue.
    ///
    /// Once this returns the changes are visible to searches.
    pub async fn batch(&self, batch: Batch) -> Result<()> {
        self.0.batch(batch).await
    }

    /// Search the index for the given request.
    ///
    /// This returns a set of results ordered by their relevance or
    /// by the requested field.
    pub async fn search(&self, request: SearchRequest) -> Result<SearchResult> {
        self.0.reader.search(request).await
    }

    /// Get a single document via it's given id.
    pub async fn document(&self, id: impl Into<String>) -> Result<Option<StoredDocument>> {
        self.0.reader.get_document(id.into()).await
    }

    /// Get a single document via it's id along with its indexed terms.
    pub async fn debug_document(
        &self,
        id: impl Into<String>,
    ) -> Result<Option<DebugDocument>> {
        self.0.reader.debug_document(id.into()).await
    }

    /// The sorted names of every searchable field.
    pub fn fields(&self) -> Vec<String> {
        self.0.fields()
    }

    /// The amount of documents visible to searches.
    pub fn doc_count(&self) -> u64 {
        self.0.reader.doc_count()
    }

    /// Shuts the index down waiting for all writer threads to finish.
    pub async fn shutdown(&self) -> Result<()> {
        self.0.writer.shutdown().await
    }
}

struct InternalIndex {
    ctx: IndexContext,

    /// The index reader handler
    reader: reader::Reader,

    /// A writer actor to handle the index writer.
    writer: writer::Writer,

    /// Dynamic property names seen across every applied batch.
    dynamic_fields: Mutex<HashSet<String>>,
}

impl InternalIndex {
    #[instrument(name = "index-controller", skip_all, fields(path = %path.display()))]
    async fn create(
        path: &Path,
        mapping: IndexMapping,
        settings: IndexSettings,
    ) -> Result<Self> {
        mapping.validate()?;
        settings.validate()?;

        let schema = mapping.build_schema()?;
        let data_dir = path.join(DATA_DIR);
        tokio::fs::create_dir_all(&data_dir).await?;

        let raw_mapping = serde_json::to_vec_pretty(&mapping)?;
        tokio::fs::write(path.join(MAPPING_FILE), raw_mapping).await?;

        info!("creating index storage...");
        let dir = MmapDirectory::open(&data_dir)?;
        let index = tantivy::Index::open_or_create(dir, schema)?;

        Self::start(path, index, mapping, settings, HashSet::new())
    }

    #[instrument(name = "index-controller", skip_all, fields(path = %path.display()))]
    async fn open(path: &Path, settings: IndexSettings) -> Result<Self> {
        settings.validate()?;

        let raw_mapping = tokio::fs::read(path.join(MAPPING_FILE)).await.map_err(|e| {
            Error::msg(format!("cannot read index mapping of {:?}: {}", path, e))
        })?;
        let mapping = IndexMapping::from_json(&raw_mapping)?;

        let dynamic_fields = match tokio::fs::read(path.join(DYNAMIC_FIELDS_FILE)).await {
            Ok(raw) => serde_json::from_slice::<Vec<String>>(&raw)?.into_iter().collect(),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashSet::new(),
            Err(e) => return Err(e.into()),
        };

        info!("opening index storage...");
        let dir = MmapDirectory::open(path.join(DATA_DIR))?;
        let index = tantivy::Index::open(dir)?;

        assert_schema_matches(&index.schema(), &mapping.build_schema()?)?;

        Self::start(path, index, mapping, settings, dynamic_fields)
    }

    fn start(
        path: &Path,
        index: tantivy::Index,
        mapping: IndexMapping,
        settings: IndexSettings,
        dynamic_fields: HashSet<String>,
    ) -> Result<Self> {
        analyzers::register(&index);
        let ctx = IndexContext::new(path, index, mapping, settings)?;

        info!("creating reader...");
        let reader = reader::Reader::create(&ctx)?;

        info!("creating writer...");
        let writer = writer::Writer::create(&ctx)?;

        Ok(Self {
            ctx,
            reader,
            writer,
            dynamic_fields: Mutex::new(dynamic_fields),
        })
    }

    #[instrument(name = "index-batch", skip(self, batch), fields(index = %self.ctx.name, len = batch.len()))]
    async fn batch(&self, batch: Batch) -> Result<()> {
        let seen: Vec<String> = {
            let known = self.dynamic_fields.lock();
            batch
                .dynamic_fields()
                .iter()
                .filter(|name| !known.contains(*name))
                .cloned()
                .collect()
        };

        self.writer.send_op(WriterOp::ApplyBatch(batch)).await?;
        self.reader.reload()?;

        if !seen.is_empty() {
            let names = {
                let mut known = self.dynamic_fields.lock();
                known.extend(seen);
                let mut names: Vec<String> = known.iter().cloned().collect();
                names.sort();
                names
            };

            debug!("tracking {} dynamic fields", names.len());
            let raw = serde_json::to_vec(&names)?;
            tokio::fs::write(self.ctx.path.join(DYNAMIC_FIELDS_FILE), raw).await?;
        }

        Ok(())
    }

    fn fields(&self) -> Vec<String> {
        let schema = self.ctx.schema();
        let mut fields: Vec<String> = schema
            .fields()
            .map(|(_, entry)| entry.name().to_string())
            .filter(|name| name != ALL_FIELD && name != DYNAMIC_FIELD)
            .collect();

        fields.extend(self.dynamic_fields.lock().iter().cloned());
        fields.sort();
        fields.dedup();
        fields
    }
}

/// Checks every field of the mapping exists in the stored schema with
/// the same value type.
fn assert_schema_matches(stored: &Schema, expected: &Schema) -> Result<()> {
    for (_, entry) in expected.fields() {
        let stored_entry = stored
            .get_field(entry.name())
            .map(|field| stored.get_field_entry(field))
            .map_err(|_| {
                Error::msg(format!(
                    "field {:?} is missing from the stored index, the index must be rebuilt",
                    entry.name()
                ))
            })?;

        if stored_entry.field_type().value_type() != entry.field_type().value_type() {
            return Err(Error::msg(format!(
                "field {:?} changed type, the index must be rebuilt",
                entry.name()
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use tempfile::TempDir;

    use super::*;
    use crate::query::{QueryBuildError, QueryKind};
    use crate::reader::{FacetRequest, HighlightRequest, NumericRangeRequest, Sort};

    fn init_state() {
        let _ = tracing_subscriber::fmt::try_init();
    }

    fn test_settings() -> IndexSettings {
        IndexSettings {
            reader_threads: 1,
            max_concurrency: 2,
            writer_threads: 1,
            writer_buffer: 15_000_000,
        }
    }

    fn sample_documents() -> Vec<(&'static str, serde_json::Value)> {
        vec![
            ("21st_amendment_brewery_cafe", json!({
                "type": "brewery",
                "name": "21st Amendment Brewery Cafe",
                "city": "San Francisco",
                "state": "California",
                "country": "United States",
                "description": "The 21st Amendment Brewery offers a variety of award winning house made brews.",
                "updated": "2010-10-24 13:54:07",
                "geo": {"lat": 37.7825, "lon": -122.393},
            })),
            ("21st_amendment_brewery_cafe-21a_ipa", json!({
                "type": "beer",
                "name": "21A IPA",
                "abv": 7.2,
                "style": "American-Style India Pale Ale",
                "category": "North American Ale",
                "brewery_id": "21st_amendment_brewery_cafe",
                "description": "Deep golden color. Citrus and piney hop aromas.",
                "updated": "2010-07-22 20:00:20",
            })),
            ("21st_amendment_brewery_cafe-north_star_red", json!({
                "type": "beer",
                "name": "North Star Red",
                "abv": 5.0,
                "style": "American-Style Amber/Red Ale",
                "category": "North American Ale",
                "brewery_id": "21st_amendment_brewery_cafe",
                "description": "Deep amber color with a malty backbone and hoppy finish.",
                "updated": "2010-07-22 20:00:20",
            })),
            ("512_brewing_company-512_pecan_porter", json!({
                "type": "beer",
                "name": "512 Pecan Porter",
                "abv": 6.8,
                "style": "Porter",
                "category": "Irish Ale",
                "brewery_id": "512_brewing_company",
                "description": "Nearly black in color, our Pecan Porter is made with organic malts.",
                "updated": "2011-02-10 11:30:00",
            })),
        ]
    }

    async fn sample_index(dir: &TempDir) -> Result<Index> {
        init_state();

        let index = Index::create(
            dir.path().join("beer-search.index"),
            IndexMapping::beer(),
            test_settings(),
        )
        .await?;

        let mut batch = index.new_batch();
        for (id, doc) in sample_documents() {
            batch.index(id, &doc)?;
        }
        index.batch(batch).await?;

        Ok(index)
    }

    async fn search(index: &Index, request: serde_json::Value) -> Result<SearchResult> {
        let request: SearchRequest = serde_json::from_value(request)?;
        index.search(request).await
    }

    fn hit_ids(result: &SearchResult) -> Vec<&str> {
        result.hits.iter().map(|hit| hit.id.as_str()).collect()
    }

    #[tokio::test]
    async fn create_and_reopen_expect_ok() -> Result<()> {
        let dir = TempDir::new()?;
        let path = dir.path().join("beer-search.index");
        let index = sample_index(&dir).await?;
        assert_eq!(index.doc_count(), 4);
        assert_eq!(index.name(), "beer-search.index");
        index.shutdown().await?;
        drop(index);

        let index = Index::open(&path, test_settings()).await?;
        assert_eq!(index.doc_count(), 4);
        assert_eq!(index.mapping(), &IndexMapping::beer());
        assert!(index.fields().contains(&"geo".to_string()));
        index.shutdown().await?;
        Ok(())
    }

    #[tokio::test]
    async fn open_missing_path_expect_err() -> Result<()> {
        let dir = TempDir::new()?;
        let res = Index::open(dir.path().join("missing"), test_settings()).await;

        assert!(matches!(res, Err(OpenError::PathDoesNotExist(_))));
        Ok(())
    }

    #[tokio::test]
    async fn create_existing_path_expect_err() -> Result<()> {
        let dir = TempDir::new()?;
        let res = Index::create(dir.path(), IndexMapping::beer(), test_settings()).await;

        assert!(matches!(res, Err(OpenError::PathAlreadyExists(_))));
        Ok(())
    }

    #[tokio::test]
    async fn open_without_mapping_expect_err() -> Result<()> {
        let dir = TempDir::new()?;
        let res = Index::open(dir.path(), test_settings()).await;

        assert!(matches!(res, Err(OpenError::Other(_))));
        Ok(())
    }

    #[tokio::test]
    async fn reindex_replaces_and_delete_removes() -> Result<()> {
        let dir = TempDir::new()?;
        let index = sample_index(&dir).await?;

        let mut batch = index.new_batch();
        batch.index(
            "512_brewing_company-512_pecan_porter",
            &json!({"type": "beer", "name": "Pecan Porter Reserve", "abv": 8.0}),
        )?;
        batch.delete("21st_amendment_brewery_cafe-north_star_red");
        index.batch(batch).await?;

        assert_eq!(index.doc_count(), 3);

        let doc = index
            .document("512_brewing_company-512_pecan_porter")
            .await?
            .expect("document exists");
        assert_eq!(doc.fields["name"], json!("Pecan Porter Reserve"));
        assert_eq!(doc.fields["abv"], json!(8.0));

        assert!(index
            .document("21st_amendment_brewery_cafe-north_star_red")
            .await?
            .is_none());

        index.shutdown().await?;
        Ok(())
    }

    #[tokio::test]
    async fn query_string_search() -> Result<()> {
        let dir = TempDir::new()?;
        let index = sample_index(&dir).await?;

        let result = search(&index, json!({"query": {"query": "porter"}})).await?;
        assert_eq!(result.total_hits, 1);
        assert_eq!(hit_ids(&result), vec!["512_brewing_company-512_pecan_porter"]);
        assert!(result.max_score > 0.0);
        assert!(result.hits[0].fields.is_empty());

        let result = search(&index, json!({"query": {"query": "abv:[6 TO 8]"}})).await?;
        assert_eq!(result.total_hits, 2);

        index.shutdown().await?;
        Ok(())
    }

    #[tokio::test]
    async fn structured_queries() -> Result<()> {
        let dir = TempDir::new()?;
        let index = sample_index(&dir).await?;

        let result = search(&index, json!({"query": {"term": "beer", "field": "_type"}})).await?;
        assert_eq!(result.total_hits, 3);

        let result = search(&index, json!({
            "query": {"match": "hoppy amber", "field": "description", "operator": "and"}
        }))
        .await?;
        assert_eq!(hit_ids(&result), vec!["21st_amendment_brewery_cafe-north_star_red"]);

        let result = search(&index, json!({
            "query": {"match": "portr", "field": "name", "fuzziness": 1}
        }))
        .await?;
        assert_eq!(result.total_hits, 1);

        let result = search(&index, json!({
            "query": {"match_phrase": "pecan porter", "field": "name"}
        }))
        .await?;
        assert_eq!(result.total_hits, 1);

        let result = search(&index, json!({
            "query": {"min": 5.0, "max": 7.0, "field": "abv"}
        }))
        .await?;
        assert_eq!(result.total_hits, 2);

        let result = search(&index, json!({
            "query": {"start": "2011-01-01", "field": "updated"}
        }))
        .await?;
        assert_eq!(hit_ids(&result), vec!["512_brewing_company-512_pecan_porter"]);

        let result = search(&index, json!({
            "query": {"prefix": "North", "field": "category"}
        }))
        .await?;
        assert_eq!(result.total_hits, 2);

        let result = search(&index, json!({
            "query": {"ids": ["21st_amendment_brewery_cafe", "missing"]}
        }))
        .await?;
        assert_eq!(hit_ids(&result), vec!["21st_amendment_brewery_cafe"]);

        let result = search(&index, json!({
            "query": {"must_not": [{"term": "beer", "field": "_type"}]}
        }))
        .await?;
        assert_eq!(hit_ids(&result), vec!["21st_amendment_brewery_cafe"]);

        let result = search(&index, json!({
            "query": {"conjuncts": [
                {"term": "beer", "field": "_type"},
                {"term": "North American Ale", "field": "category"}
            ]}
        }))
        .await?;
        assert_eq!(result.total_hits, 2);

        let result = search(&index, json!({"query": {"match_none": {}}})).await?;
        assert_eq!(result.total_hits, 0);

        index.shutdown().await?;
        Ok(())
    }

    #[tokio::test]
    async fn bad_queries_expect_build_err() -> Result<()> {
        let dir = TempDir::new()?;
        let index = sample_index(&dir).await?;

        let bad = [
            json!({"query": {"term": "x", "field": "nope"}}),
            json!({"query": {"match": "x", "field": "abv"}}),
            json!({"query": {"min": 1.0, "field": "name"}}),
            json!({"query": {"start": "yesterday", "field": "updated"}}),
            json!({"query": {"match_all": {}}, "order_by": "name"}),
            json!({"query": {"match_all": {}}, "facets": {"x": {"field": "description"}}}),
        ];

        for request in bad {
            let err = search(&index, request.clone())
                .await
                .expect_err("query should be rejected");
            assert!(
                err.downcast_ref::<QueryBuildError>().is_some(),
                "unexpected error for {}: {:?}",
                request,
                err
            );
        }

        index.shutdown().await?;
        Ok(())
    }

    #[tokio::test]
    async fn ordering_and_paging() -> Result<()> {
        let dir = TempDir::new()?;
        let index = sample_index(&dir).await?;

        let mut request = SearchRequest::new(QueryKind::query_string("_type:beer"));
        request.order_by = Some("abv".to_string());
        request.sort = Sort::Asc;
        let result = index.search(request.clone()).await?;
        assert_eq!(
            hit_ids(&result),
            vec![
                "21st_amendment_brewery_cafe-north_star_red",
                "512_brewing_company-512_pecan_porter",
                "21st_amendment_brewery_cafe-21a_ipa",
            ]
        );
        assert!(result.hits[0].score.is_none());
        assert_eq!(result.hits[0].sort, vec![json!(5.0)]);

        request.sort = Sort::Desc;
        request.size = 1;
        request.from = 1;
        let result = index.search(request).await?;
        assert_eq!(result.total_hits, 3);
        assert_eq!(hit_ids(&result), vec!["512_brewing_company-512_pecan_porter"]);

        let mut request = SearchRequest::new(QueryKind::match_all());
        request.size = 0;
        let result = index.search(request).await?;
        assert_eq!(result.total_hits, 4);
        assert!(result.hits.is_empty());

        index.shutdown().await?;
        Ok(())
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_batches_all_complete() -> Result<()> {
        let dir = TempDir::new()?;
        let index = sample_index(&dir).await?;

        // More batches than the writer queue holds at once.
        let mut handles = vec![];
        for n in 0..64 {
            let index = index.clone();
            handles.push(tokio::spawn(async move {
                let mut batch = index.new_batch();
                batch.index(format!("extra_{}", n), &json!({"type": "beer", "name": "Extra"}))?;
                index.batch(batch).await
            }));
        }

        let joined = tokio::time::timeout(Duration::from_secs(60), async move {
            for handle in handles {
                handle.await??;
            }
            Ok::<_, anyhow::Error>(())
        })
        .await;
        assert!(joined.is_ok(), "writer stalled on a full queue");
        joined??;

        assert_eq!(index.doc_count(), 68);

        index.shutdown().await?;
        Ok(())
    }

    #[tokio::test]
    async fn paging_window_is_bounded() -> Result<()> {
        let dir = TempDir::new()?;
        let index = sample_index(&dir).await?;

        let result = search(&index, json!({"query": {"match_all": {}}, "size": 50_000})).await?;
        assert_eq!(result.hits.len(), 4);

        let result = search(
            &index,
            json!({"query": {"match_all": {}}, "from": 9_990, "size": 10}),
        )
        .await?;
        assert_eq!(result.total_hits, 4);
        assert!(result.hits.is_empty());

        let too_far = [
            json!({"query": {"match_all": {}}, "from": 9_995, "size": 10}),
            json!({"query": {"match_all": {}}, "from": 18_446_744_073_709_551_000u64}),
        ];
        for request in too_far {
            let err = search(&index, request.clone())
                .await
                .expect_err("paging window should be rejected");
            assert!(
                err.downcast_ref::<QueryBuildError>().is_some(),
                "unexpected error for {}: {:?}",
                request,
                err
            );
        }

        // The index keeps serving after a rejected request.
        assert_eq!(search(&index, json!({"query": {"match_all": {}}})).await?.total_hits, 4);

        index.shutdown().await?;
        Ok(())
    }

    #[tokio::test]
    async fn type_property_is_searchable() -> Result<()> {
        let dir = TempDir::new()?;
        let index = sample_index(&dir).await?;

        let result = search(&index, json!({"query": {"term": "beer", "field": "type"}})).await?;
        assert_eq!(result.total_hits, 3);

        let result = search(&index, json!({"query": {"query": "type:brewery"}})).await?;
        assert_eq!(hit_ids(&result), vec!["21st_amendment_brewery_cafe"]);

        let result = search(
            &index,
            json!({
                "query": {"match_all": {}},
                "size": 0,
                "facets": {"types": {"field": "type"}},
            }),
        )
        .await?;
        let terms: Vec<(&str, u64)> = result.facets["types"]
            .terms
            .iter()
            .map(|t| (t.term.as_str(), t.count))
            .collect();
        assert_eq!(terms, vec![("beer", 3), ("brewery", 1)]);

        index.shutdown().await?;
        Ok(())
    }

    #[tokio::test]
    async fn unknown_type_survives_round_trip() -> Result<()> {
        let dir = TempDir::new()?;
        let index = sample_index(&dir).await?;

        let mut batch = index.new_batch();
        batch.index("wine_1", &json!({"type": "wine", "name": "Merlot"}))?;
        index.batch(batch).await?;

        let doc = index.document("wine_1").await?.expect("document exists");
        assert_eq!(doc.doc_type, "_default");
        assert_eq!(doc.fields["type"], json!("wine"));
        assert_eq!(doc.fields["name"], json!("Merlot"));

        let result = search(&index, json!({"query": {"term": "wine", "field": "type"}})).await?;
        assert_eq!(hit_ids(&result), vec!["wine_1"]);

        index.shutdown().await?;
        Ok(())
    }

    #[tokio::test]
    async fn overlapping_range_facets() -> Result<()> {
        let dir = TempDir::new()?;
        let index = sample_index(&dir).await?;

        let result = search(
            &index,
            json!({
                "query": {"query": "_type:beer"},
                "facets": {
                    "strength": {
                        "field": "abv",
                        "numeric_ranges": [
                            {"name": "low", "max": 7.0},
                            {"name": "mid", "min": 6.0, "max": 8.0},
                        ],
                    },
                },
            }),
        )
        .await?;

        let counts: Vec<(&str, u64)> = result.facets["strength"]
            .numeric_ranges
            .iter()
            .map(|r| (r.name.as_str(), r.count))
            .collect();
        assert_eq!(counts, vec![("low", 2), ("mid", 2)]);
        assert_eq!(result.facets["strength"].total, 4);

        index.shutdown().await?;
        Ok(())
    }

    #[tokio::test]
    async fn fields_highlight_and_explain() -> Result<()> {
        let dir = TempDir::new()?;
        let index = sample_index(&dir).await?;

        let mut request = SearchRequest::new(QueryKind::query_string("pecan"));
        request.fields = vec!["*".to_string()];
        request.highlight = Some(HighlightRequest::default());
        request.explain = true;

        let result = index.search(request).await?;
        let hit = &result.hits[0];
        assert_eq!(hit.fields["name"], json!("512 Pecan Porter"));
        assert_eq!(hit.fields["type"], json!("beer"));
        assert!(hit.fragments["name"][0].contains("<b>Pecan</b>"));
        assert!(hit.explanation.is_some());

        index.shutdown().await?;
        Ok(())
    }

    #[tokio::test]
    async fn facets_expect_counts() -> Result<()> {
        let dir = TempDir::new()?;
        let index = sample_index(&dir).await?;

        let mut request = SearchRequest::new(QueryKind::query_string("_type:beer"));
        request.facets.insert(
            "categories".to_string(),
            FacetRequest {
                field: "category".to_string(),
                size: 1,
                numeric_ranges: vec![],
            },
        );
        request.facets.insert(
            "strength".to_string(),
            FacetRequest {
                field: "abv".to_string(),
                size: 10,
                numeric_ranges: vec![
                    NumericRangeRequest {
                        name: "session".to_string(),
                        min: None,
                        max: Some(6.0),
                    },
                    NumericRangeRequest {
                        name: "strong".to_string(),
                        min: Some(6.0),
                        max: None,
                    },
                ],
            },
        );

        let result = index.search(request).await?;

        let categories = &result.facets["categories"];
        assert_eq!(categories.field, "category");
        assert_eq!(categories.terms.len(), 1);
        assert_eq!(categories.terms[0].term, "North American Ale");
        assert_eq!(categories.terms[0].count, 2);
        assert_eq!(categories.other, 1);
        assert_eq!(categories.total, 3);

        let strength = &result.facets["strength"];
        let counts: Vec<(&str, u64)> = strength
            .numeric_ranges
            .iter()
            .map(|r| (r.name.as_str(), r.count))
            .collect();
        assert_eq!(counts, vec![("session", 1), ("strong", 2)]);

        index.shutdown().await?;
        Ok(())
    }

    #[tokio::test]
    async fn fields_and_debug_document() -> Result<()> {
        let dir = TempDir::new()?;
        let index = sample_index(&dir).await?;

        let fields = index.fields();
        for name in ["_id", "_type", "abv", "city", "geo", "name"] {
            assert!(fields.contains(&name.to_string()), "missing {}", name);
        }
        assert!(!fields.contains(&ALL_FIELD.to_string()));
        assert!(!fields.contains(&DYNAMIC_FIELD.to_string()));

        let mut sorted = fields.clone();
        sorted.sort();
        assert_eq!(fields, sorted);

        let debug = index
            .debug_document("21st_amendment_brewery_cafe-north_star_red")
            .await?
            .expect("document exists");
        assert_eq!(debug.document.doc_type, "beer");
        assert_eq!(debug.terms["name"], vec!["north", "star", "red"]);
        assert_eq!(debug.terms["abv"], vec!["5"]);

        assert!(index.debug_document("missing").await?.is_none());

        index.shutdown().await?;
        Ok(())
    }
}
