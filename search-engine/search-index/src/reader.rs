use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use aexecutor::SearcherExecutorPool;
use anyhow::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tantivy::aggregation::agg_req::Aggregations;
use tantivy::aggregation::{AggregationCollector, AggregationLimits};
use tantivy::collector::{Count, TopDocs};
use tantivy::query::{EnableScoring, Query, TermQuery};
use tantivy::schema::{Field, FieldType, IndexRecordOption};
use tantivy::snippet::SnippetGenerator;
use tantivy::{
    DateTime,
    DocAddress,
    Executor,
    IndexReader,
    Order,
    ReloadPolicy,
    Searcher,
    TantivyDocument,
    Term,
};

use crate::document::{self, DebugDocument, StoredDocument};
use crate::helpers::format_date;
use crate::mapping::ALL_FIELD;
use crate::query::{QueryBuildError, QueryBuilder, QueryKind};
use crate::structures::IndexContext;

/// The largest amount of hits a single search may return.
pub const MAX_SIZE: usize = 10_000;

/// Describes a search, its paging and what to return for each hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    /// The query itself.
    pub query: QueryKind,

    /// The amount of hits to return.
    #[serde(default = "SearchRequest::default_size")]
    pub size: usize,

    /// The amount of hits to skip before collecting results.
    #[serde(default)]
    pub from: usize,

    /// The stored fields to return per hit, `*` returns all of them.
    #[serde(default)]
    pub fields: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub highlight: Option<HighlightRequest>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub facets: BTreeMap<String, FacetRequest>,

    /// A number or date field to order results by, this defaults to the
    /// score of the matched documents (relevancy).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_by: Option<String>,

    /// How to sort the data (asc/desc) when ordering by a field.
    #[serde(default)]
    pub sort: Sort,

    /// Attach the score explanation to each hit.
    #[serde(default)]
    pub explain: bool,
}

impl SearchRequest {
    fn default_size() -> usize {
        10
    }

    pub fn new(query: QueryKind) -> Self {
        Self {
            query,
            size: Self::default_size(),
            from: 0,
            fields: vec![],
            highlight: None,
            facets: BTreeMap::new(),
            order_by: None,
            sort: Sort::default(),
            explain: false,
        }
    }
}

/// What order to sort the returned data.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sort {
    /// Sort the data in ascending order.
    Asc,

    /// Sort the data in descending order. (Default)
    Desc,
}

impl Default for Sort {
    fn default() -> Self {
        Self::Desc
    }
}

impl From<Sort> for Order {
    fn from(sort: Sort) -> Self {
        match sort {
            Sort::Asc => Order::Asc,
            Sort::Desc => Order::Desc,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HighlightRequest {
    /// The text fields to highlight, every stored text field when missing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fields: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacetRequest {
    pub field: String,

    /// The amount of terms to return.
    #[serde(default = "FacetRequest::default_size")]
    pub size: usize,

    /// Count documents into these named buckets instead of by term.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub numeric_ranges: Vec<NumericRangeRequest>,
}

impl FacetRequest {
    fn default_size() -> usize {
        10
    }
}

/// A named bucket, `min` is inclusive and `max` exclusive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NumericRangeRequest {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    /// The retrieved documents.
    pub hits: Vec<DocumentMatch>,

    /// The total amount of documents matching the search.
    pub total_hits: usize,

    pub max_score: f32,

    /// The amount of time taken to search in seconds.
    pub took: f64,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub facets: BTreeMap<String, FacetResult>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMatch {
    pub id: String,

    /// The relevancy score, missing when ordering by a field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub score: Option<f32>,

    /// The values the hit was ordered by.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<Value>,

    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub fields: Map<String, Value>,

    /// HTML fragments per highlighted field.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub fragments: BTreeMap<String, Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FacetResult {
    pub field: String,

    /// The amount of documents counted.
    pub total: u64,

    /// Documents counted under terms that didn't make the cut.
    pub other: u64,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub terms: Vec<TermFacet>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub numeric_ranges: Vec<NumericRangeFacet>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TermFacet {
    pub term: String,
    pub count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NumericRangeFacet {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    pub count: u64,
}

#[derive(Debug, Copy, Clone)]
enum OrderKind {
    Number,
    Date,
}

#[derive(Debug, Copy, Clone)]
enum FacetKind {
    Terms,
    Ranges,
}

/// The parts of a request resolved against the schema before searching.
struct SearchPlan {
    order_by: Option<(String, OrderKind)>,
    highlight: Vec<(String, Field)>,
    facets: Vec<(String, FacetRequest, FacetKind)>,
}

enum HitOrder {
    Score(f32),
    Number(f64),
    Date(DateTime),
}

/// The reader of the given index.
///
/// This manages all searches on the index which encompasses the concurrency
/// limiters and thread pool execution.
///
/// Each index should only have on `Reader` instance.
pub(crate) struct Reader {
    index_name: Arc<String>,

    /// The executor pool.
    pool: crate::ReaderExecutor,

    ctx: IndexContext,
}

impl Reader {
    /// Creates a new reader from the given index context.
    #[instrument(name = "index-reader", skip_all)]
    pub(crate) fn create(ctx: &IndexContext) -> Result<Self> {
        let reader: IndexReader = ctx
            .index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        info!("index reader created with reload policy=Manual");

        let settings = &ctx.settings;
        let pool = SearcherExecutorPool::create(
            reader,
            settings.reader_threads,
            settings.max_concurrency,
        )?;
        info!(
            "executor pool has successfully started! max_concurrency={}, total_threads={}",
            settings.max_concurrency,
            settings.max_concurrency * settings.reader_threads
        );

        Ok(Self {
            index_name: Arc::new(ctx.name.clone()),
            pool: Arc::new(pool),
            ctx: ctx.clone(),
        })
    }

    /// Makes the latest commit visible to searches.
    pub(crate) fn reload(&self) -> Result<()> {
        self.pool.reload()
    }

    pub(crate) fn doc_count(&self) -> u64 {
        self.pool.searcher().num_docs()
    }

    /// Search the index for the given request.
    #[instrument(name = "index-search", skip(self, request), fields(index = %self.index_name))]
    pub(crate) async fn search(&self, request: SearchRequest) -> Result<SearchResult> {
        let start = Instant::now();

        let query = QueryBuilder::new(&self.ctx).build(&request.query)?;
        let plan = self.plan(&request)?;

        let ctx = self.ctx.clone();
        let (hits, total_hits, facets) = self
            .pool
            .spawn(move |searcher, executor| {
                execute(&ctx, &searcher, executor, query.as_ref(), &request, &plan)
            })
            .await??;

        let max_score = hits
            .iter()
            .filter_map(|hit| hit.score)
            .fold(0f32, f32::max);

        Ok(SearchResult {
            hits,
            total_hits,
            max_score,
            took: start.elapsed().as_secs_f64(),
            facets,
        })
    }

    /// Gets a singular document from the given id.
    #[instrument(name = "document-fetcher", skip(self), fields(index = %self.index_name))]
    pub(crate) async fn get_document(&self, id: String) -> Result<Option<StoredDocument>> {
        let ctx = self.ctx.clone();
        self.pool
            .spawn(move |searcher, executor| {
                let doc = match fetch_by_id(&ctx, &searcher, executor, &id)? {
                    None => return Ok(None),
                    Some(doc) => doc,
                };

                document::render(&ctx.mapping, &ctx.schema(), &doc).map(Some)
            })
            .await?
    }

    /// Gets a stored document alongside the terms of each of its fields.
    #[instrument(name = "document-debugger", skip(self), fields(index = %self.index_name))]
    pub(crate) async fn debug_document(&self, id: String) -> Result<Option<DebugDocument>> {
        let ctx = self.ctx.clone();
        self.pool
            .spawn(move |searcher, executor| {
                let doc = match fetch_by_id(&ctx, &searcher, executor, &id)? {
                    None => return Ok(None),
                    Some(doc) => doc,
                };

                let schema = ctx.schema();
                let document = document::render(&ctx.mapping, &schema, &doc)?;
                let terms = document::analyzed_terms(&ctx.index, &schema, &doc)?;

                Ok(Some(DebugDocument { document, terms }))
            })
            .await?
    }

    /// Resolves the field names of a request against the schema.
    fn plan(&self, request: &SearchRequest) -> Result<SearchPlan, QueryBuildError> {
        let schema = self.ctx.schema();
        let lookup = |name: &str| {
            schema
                .get_field(name)
                .map_err(|_| QueryBuildError::UnknownField(name.to_string()))
        };

        let size = request.size.min(MAX_SIZE);
        if request.from.saturating_add(size) > MAX_SIZE {
            return Err(QueryBuildError::BadValue(format!(
                "from + size must not exceed {}, got from={} size={}",
                MAX_SIZE, request.from, size
            )));
        }

        let order_by = match request.order_by.as_deref() {
            None => None,
            Some(name) => {
                let entry = schema.get_field_entry(lookup(name)?);
                let kind = match entry.field_type() {
                    FieldType::F64(_) if entry.is_fast() => OrderKind::Number,
                    FieldType::Date(_) if entry.is_fast() => OrderKind::Date,
                    _ => {
                        return Err(QueryBuildError::UnsupportedField {
                            field: name.to_string(),
                            reason: "results can only be ordered by number or date fields",
                        })
                    },
                };

                Some((name.to_string(), kind))
            },
        };

        let mut highlight = vec![];
        if let Some(req) = request.highlight.as_ref() {
            let candidates: Vec<Field> = match req.fields.as_ref() {
                Some(names) => names
                    .iter()
                    .map(|name| lookup(name))
                    .collect::<Result<_, _>>()?,
                None => self.ctx.default_fields.clone(),
            };

            for field in candidates {
                let entry = schema.get_field_entry(field);
                let is_text = matches!(entry.field_type(), FieldType::Str(_));
                if is_text && entry.is_stored() && entry.name() != ALL_FIELD {
                    highlight.push((entry.name().to_string(), field));
                }
            }
        }

        let mut facets = vec![];
        for (name, req) in request.facets.iter() {
            let entry = schema.get_field_entry(lookup(&req.field)?);
            let kind = match entry.field_type() {
                FieldType::F64(_) if !req.numeric_ranges.is_empty() => FacetKind::Ranges,
                FieldType::Str(_) | FieldType::F64(_)
                    if entry.is_fast() && req.numeric_ranges.is_empty() =>
                {
                    FacetKind::Terms
                },
                _ => {
                    return Err(QueryBuildError::UnsupportedField {
                        field: req.field.clone(),
                        reason: "facets need a keyword field, or a number field for numeric ranges",
                    })
                },
            };

            if req.size == 0 && matches!(kind, FacetKind::Terms) {
                return Err(QueryBuildError::BadValue(format!(
                    "facet {:?} must have a size of at least 1",
                    name
                )));
            }

            facets.push((name.clone(), req.clone(), kind));
        }

        Ok(SearchPlan {
            order_by,
            highlight,
            facets,
        })
    }
}

fn fetch_by_id(
    ctx: &IndexContext,
    searcher: &Searcher,
    executor: &Executor,
    id: &str,
) -> Result<Option<TantivyDocument>> {
    let query = TermQuery::new(
        Term::from_field_text(ctx.fields.id, id),
        IndexRecordOption::Basic,
    );

    let results = searcher.search_with_executor(
        &query,
        &TopDocs::with_limit(1),
        executor,
        EnableScoring::enabled_from_searcher(searcher),
    )?;
    match results.first() {
        None => Ok(None),
        Some((_, addr)) => Ok(Some(searcher.doc(*addr)?)),
    }
}

type Executed = (Vec<DocumentMatch>, usize, BTreeMap<String, FacetResult>);

/// Performs the search operation and processes the returned results.
fn execute(
    ctx: &IndexContext,
    searcher: &Searcher,
    executor: &Executor,
    query: &dyn Query,
    request: &SearchRequest,
    plan: &SearchPlan,
) -> Result<Executed> {
    let size = request.size.min(MAX_SIZE);

    let (top_docs, total_hits): (Vec<(HitOrder, DocAddress)>, usize) = if size == 0 {
        let count = searcher.search_with_executor(
            query,
            &Count,
            executor,
            EnableScoring::disabled_from_searcher(searcher),
        )?;
        (vec![], count)
    } else {
        let collector = TopDocs::with_limit(size).and_offset(request.from);
        match plan.order_by.as_ref() {
            None => {
                let (docs, count) = searcher.search_with_executor(
                    query,
                    &(collector, Count),
                    executor,
                    EnableScoring::enabled_from_searcher(searcher),
                )?;
                let docs = docs
                    .into_iter()
                    .map(|(score, addr)| (HitOrder::Score(score), addr))
                    .collect();
                (docs, count)
            },
            Some((name, OrderKind::Number)) => {
                let collector = collector.order_by_fast_field(name.as_str(), request.sort.into());
                let (docs, count): (Vec<(f64, DocAddress)>, usize) = searcher
                    .search_with_executor(
                        query,
                        &(collector, Count),
                        executor,
                        EnableScoring::disabled_from_searcher(searcher),
                    )?;
                let docs = docs
                    .into_iter()
                    .map(|(value, addr)| (HitOrder::Number(value), addr))
                    .collect();
                (docs, count)
            },
            Some((name, OrderKind::Date)) => {
                let collector = collector.order_by_fast_field(name.as_str(), request.sort.into());
                let (docs, count): (Vec<(DateTime, DocAddress)>, usize) = searcher
                    .search_with_executor(
                        query,
                        &(collector, Count),
                        executor,
                        EnableScoring::disabled_from_searcher(searcher),
                    )?;
                let docs = docs
                    .into_iter()
                    .map(|(value, addr)| (HitOrder::Date(value), addr))
                    .collect();
                (docs, count)
            },
        }
    };

    let mut generators = Vec::with_capacity(plan.highlight.len());
    for (name, field) in plan.highlight.iter() {
        let generator = SnippetGenerator::create(searcher, query, *field)?;
        generators.push((name, generator));
    }

    let schema = ctx.schema();
    let mut hits = Vec::with_capacity(top_docs.len());
    for (order, addr) in top_docs {
        let doc: TantivyDocument = searcher.doc(addr)?;
        let stored = document::render(&ctx.mapping, &schema, &doc)?;

        let mut fragments = BTreeMap::new();
        for (name, generator) in generators.iter() {
            let snippet = generator.snippet_from_doc(&doc);
            if !snippet.fragment().is_empty() {
                fragments.insert(name.to_string(), vec![snippet.to_html()]);
            }
        }

        let explanation = if request.explain {
            let explanation = query.explain(searcher, addr)?;
            Some(serde_json::from_str(&explanation.to_pretty_json())?)
        } else {
            None
        };

        let (score, sort) = match order {
            HitOrder::Score(score) => (Some(score), vec![]),
            HitOrder::Number(value) => (None, vec![json!(value)]),
            HitOrder::Date(value) => (None, vec![json!(format_date(value))]),
        };

        hits.push(DocumentMatch {
            id: stored.id,
            score,
            sort,
            fields: select_fields(stored.fields, &request.fields),
            fragments,
            explanation,
        });
    }

    let facets = if plan.facets.is_empty() {
        BTreeMap::new()
    } else {
        collect_facets(searcher, executor, query, &plan.facets)?
    };

    Ok((hits, total_hits, facets))
}

fn select_fields(mut stored: Map<String, Value>, wanted: &[String]) -> Map<String, Value> {
    if wanted.iter().any(|name| name == "*") {
        return stored;
    }

    wanted
        .iter()
        .filter_map(|name| stored.remove(name).map(|value| (name.clone(), value)))
        .collect()
}

/// Counts the matching documents per facet using tantivy's aggregations.
fn collect_facets(
    searcher: &Searcher,
    executor: &Executor,
    query: &dyn Query,
    facets: &[(String, FacetRequest, FacetKind)],
) -> Result<BTreeMap<String, FacetResult>> {
    let mut request = Map::new();
    for (name, facet, kind) in facets {
        match kind {
            FacetKind::Terms => {
                let agg = json!({
                    "terms": { "field": &facet.field, "size": facet.size }
                });
                request.insert(name.clone(), agg);
            },
            // Range aggregations reject overlapping buckets, so every
            // requested range is counted by its own aggregation.
            FacetKind::Ranges => {
                for (pos, range) in facet.numeric_ranges.iter().enumerate() {
                    let mut bucket = Map::new();
                    bucket.insert("key".to_string(), json!(&range.name));
                    if let Some(min) = range.min {
                        bucket.insert("from".to_string(), json!(min));
                    }
                    if let Some(max) = range.max {
                        bucket.insert("to".to_string(), json!(max));
                    }

                    let agg = json!({
                        "range": { "field": &facet.field, "ranges": [bucket] }
                    });
                    request.insert(range_agg_name(name, pos), agg);
                }
            },
        }
    }

    let aggs: Aggregations = serde_json::from_value(Value::Object(request))?;
    let collector = AggregationCollector::from_aggs(aggs, AggregationLimits::default());
    let results = searcher.search_with_executor(
        query,
        &collector,
        executor,
        EnableScoring::disabled_from_searcher(searcher),
    )?;
    let results = serde_json::to_value(&results)?;

    let mut out = BTreeMap::new();
    for (name, facet, kind) in facets {
        let facet_result = match kind {
            FacetKind::Terms => {
                let result = aggregation_result(&results, name)?;
                let buckets = buckets_of(result);

                let terms: Vec<TermFacet> = buckets
                    .iter()
                    .map(|bucket| TermFacet {
                        term: bucket_key(bucket),
                        count: bucket_count(bucket),
                    })
                    .collect();

                let other = result
                    .get("sum_other_doc_count")
                    .and_then(|v| v.as_u64())
                    .unwrap_or(0);
                let total = terms.iter().map(|t| t.count).sum::<u64>() + other;

                FacetResult {
                    field: facet.field.clone(),
                    total,
                    other,
                    terms,
                    numeric_ranges: vec![],
                }
            },
            FacetKind::Ranges => {
                let mut numeric_ranges = Vec::with_capacity(facet.numeric_ranges.len());
                for (pos, range) in facet.numeric_ranges.iter().enumerate() {
                    let result = aggregation_result(&results, &range_agg_name(name, pos))?;

                    // Tantivy fills the space around a range with extra buckets.
                    let count = buckets_of(result)
                        .iter()
                        .find(|bucket| bucket_key(bucket) == range.name)
                        .map(bucket_count)
                        .unwrap_or(0);

                    numeric_ranges.push(NumericRangeFacet {
                        name: range.name.clone(),
                        min: range.min,
                        max: range.max,
                        count,
                    });
                }

                FacetResult {
                    field: facet.field.clone(),
                    total: numeric_ranges.iter().map(|r| r.count).sum(),
                    other: 0,
                    terms: vec![],
                    numeric_ranges,
                }
            },
        };

        out.insert(name.clone(), facet_result);
    }

    Ok(out)
}

fn range_agg_name(facet: &str, pos: usize) -> String {
    format!("{}::range::{}", facet, pos)
}

fn aggregation_result<'a>(results: &'a Value, name: &str) -> Result<&'a Value> {
    results
        .get(name)
        .ok_or_else(|| Error::msg(format!("missing aggregation result for facet {:?}", name)))
}

fn buckets_of(result: &Value) -> Vec<Value> {
    result
        .get("buckets")
        .and_then(|b| b.as_array())
        .cloned()
        .unwrap_or_default()
}

fn bucket_key(bucket: &Value) -> String {
    match bucket.get("key") {
        Some(Value::String(key)) => key.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

fn bucket_count(bucket: &Value) -> u64 {
    bucket.get("doc_count").and_then(|v| v.as_u64()).unwrap_or(0)
}
