use std::ops::Bound;

use serde::{Deserialize, Serialize};
use tantivy::query::{
    AllQuery,
    BooleanQuery,
    BoostQuery,
    EmptyQuery,
    FuzzyTermQuery,
    Occur,
    PhraseQuery,
    Query,
    QueryParser,
    QueryParserError,
    RangeQuery,
    RegexQuery,
    TermQuery,
    TermSetQuery,
};
use tantivy::schema::{Field, FieldEntry, FieldType, IndexRecordOption, Schema};
use tantivy::tokenizer::TokenStream;
use tantivy::{Index, Term};

use crate::helpers::to_tantivy_date;
use crate::mapping::{parse_date, ALL_FIELD};
use crate::structures::IndexContext;

/// The highest edit distance a fuzzy match may use.
const MAX_FUZZINESS: u8 = 2;

#[derive(Debug, thiserror::Error)]
pub enum QueryBuildError {
    #[error("Unknown field: {0:?}")]
    UnknownField(String),

    #[error("Field {field:?} cannot be used here: {reason}")]
    UnsupportedField { field: String, reason: &'static str },

    #[error("The value of the query is invalid: {0}")]
    BadValue(String),

    #[error("{0}")]
    QueryParserError(#[from] QueryParserError),

    #[error("{0}")]
    TantivyError(#[from] tantivy::TantivyError),
}

/// A query tree in its JSON form.
///
/// Variants are told apart by their keys, the first variant whose
/// shape matches the JSON object is used.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryKind {
    QueryString(QueryStringQuery),
    Match(MatchQuery),
    MatchPhrase(MatchPhraseQuery),
    Term(TermLookupQuery),
    Prefix(PrefixQuery),
    NumericRange(NumericRangeQuery),
    DateRange(DateRangeQuery),
    Conjunction(ConjunctionQuery),
    Disjunction(DisjunctionQuery),
    DocIds(DocIdQuery),
    MatchAll(MatchAllQuery),
    MatchNone(MatchNoneQuery),
    Boolean(BooleanClauses),
}

impl QueryKind {
    /// A query string query, mostly useful in tests and tools.
    pub fn query_string(query: impl Into<String>) -> Self {
        Self::QueryString(QueryStringQuery {
            query: query.into(),
            boost: None,
        })
    }

    pub fn match_all() -> Self {
        Self::MatchAll(MatchAllQuery {
            match_all: Empty {},
            boost: None,
        })
    }
}

/// An empty JSON object.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Empty {}

/// A query in tantivy's query string syntax, e.g. `+pale name:ale abv:[5 TO 7]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QueryStringQuery {
    pub query: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boost: Option<f32>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    Or,
    And,
}

impl Default for Operator {
    fn default() -> Self {
        Self::Or
    }
}

/// Analyzes the text with the field's analyzer and matches the terms.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MatchQuery {
    #[serde(rename = "match")]
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default)]
    pub fuzziness: u8,
    #[serde(default)]
    pub operator: Operator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boost: Option<f32>,
}

/// Analyzes the text and matches the terms in the same order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MatchPhraseQuery {
    #[serde(rename = "match_phrase")]
    pub phrase: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boost: Option<f32>,
}

/// Matches a single term exactly as given, without analysis.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TermLookupQuery {
    pub term: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boost: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PrefixQuery {
    pub prefix: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boost: Option<f32>,
}

/// A range over a number field, `min` is inclusive and `max` exclusive
/// unless told otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NumericRangeQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inclusive_min: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inclusive_max: Option<bool>,
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boost: Option<f32>,
}

/// A range over a date field, `start` is inclusive and `end` exclusive
/// unless told otherwise.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DateRangeQuery {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inclusive_start: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inclusive_end: Option<bool>,
    pub field: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boost: Option<f32>,
}

/// Every sub query must match.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConjunctionQuery {
    pub conjuncts: Vec<QueryKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boost: Option<f32>,
}

/// At least one sub query must match.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DisjunctionQuery {
    pub disjuncts: Vec<QueryKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boost: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DocIdQuery {
    pub ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boost: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MatchAllQuery {
    pub match_all: Empty,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boost: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MatchNoneQuery {
    pub match_none: Empty,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boost: Option<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BooleanClauses {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub must: Vec<QueryKind>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub should: Vec<QueryKind>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub must_not: Vec<QueryKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub boost: Option<f32>,
}

/// Turns a `QueryKind` tree into a tantivy query for a given index.
pub(crate) struct QueryBuilder<'a> {
    index: &'a Index,
    schema: Schema,
    id_field: Field,
    default_fields: &'a [Field],
}

impl<'a> QueryBuilder<'a> {
    pub(crate) fn new(ctx: &'a IndexContext) -> Self {
        Self {
            index: &ctx.index,
            schema: ctx.schema(),
            id_field: ctx.fields.id,
            default_fields: &ctx.default_fields,
        }
    }

    pub(crate) fn build(&self, kind: &QueryKind) -> Result<Box<dyn Query>, QueryBuildError> {
        let (query, boost) = match kind {
            QueryKind::QueryString(q) => (self.query_string(&q.query)?, q.boost),
            QueryKind::Match(q) => (self.match_query(q)?, q.boost),
            QueryKind::MatchPhrase(q) => (self.match_phrase(q)?, q.boost),
            QueryKind::Term(q) => (self.term(q)?, q.boost),
            QueryKind::Prefix(q) => (self.prefix(q)?, q.boost),
            QueryKind::NumericRange(q) => (self.numeric_range(q)?, q.boost),
            QueryKind::DateRange(q) => (self.date_range(q)?, q.boost),
            QueryKind::Conjunction(q) => {
                (self.combine(&q.conjuncts, Occur::Must)?, q.boost)
            },
            QueryKind::Disjunction(q) => {
                (self.combine(&q.disjuncts, Occur::Should)?, q.boost)
            },
            QueryKind::DocIds(q) => (self.doc_ids(&q.ids), q.boost),
            QueryKind::MatchAll(q) => (Box::new(AllQuery) as Box<dyn Query>, q.boost),
            QueryKind::MatchNone(q) => (Box::new(EmptyQuery) as Box<dyn Query>, q.boost),
            QueryKind::Boolean(q) => (self.boolean(q)?, q.boost),
        };

        Ok(match boost {
            Some(boost) => Box::new(BoostQuery::new(query, boost)),
            None => query,
        })
    }

    fn query_string(&self, query: &str) -> Result<Box<dyn Query>, QueryBuildError> {
        let parser = QueryParser::for_index(self.index, self.default_fields.to_vec());
        Ok(parser.parse_query(query)?)
    }

    fn match_query(&self, q: &MatchQuery) -> Result<Box<dyn Query>, QueryBuildError> {
        if q.fuzziness > MAX_FUZZINESS {
            return Err(QueryBuildError::BadValue(format!(
                "fuzziness must be at most {}",
                MAX_FUZZINESS
            )));
        }

        let occur = match q.operator {
            Operator::Or => Occur::Should,
            Operator::And => Occur::Must,
        };

        let fields = self.text_fields(q.field.as_deref())?;
        let mut per_field = Vec::with_capacity(fields.len());
        for field in fields {
            let clauses: Vec<(Occur, Box<dyn Query>)> = self
                .analyze(field, &q.text)?
                .into_iter()
                .map(|(_, term)| {
                    let query: Box<dyn Query> = if q.fuzziness > 0 {
                        Box::new(FuzzyTermQuery::new(term, q.fuzziness, true))
                    } else {
                        Box::new(TermQuery::new(term, IndexRecordOption::WithFreqs))
                    };
                    (occur, query)
                })
                .collect();

            if !clauses.is_empty() {
                per_field.push((Occur::Should, Box::new(BooleanQuery::new(clauses)) as Box<dyn Query>));
            }
        }

        Ok(collapse(per_field))
    }

    fn match_phrase(&self, q: &MatchPhraseQuery) -> Result<Box<dyn Query>, QueryBuildError> {
        let fields = self.text_fields(q.field.as_deref())?;
        let mut per_field = Vec::with_capacity(fields.len());
        for field in fields {
            let mut terms = self.analyze(field, &q.phrase)?;
            let query: Box<dyn Query> = match terms.len() {
                0 => continue,
                1 => {
                    let (_, term) = terms.remove(0);
                    Box::new(TermQuery::new(term, IndexRecordOption::WithFreqs))
                },
                _ => Box::new(PhraseQuery::new_with_offset(terms)),
            };

            per_field.push((Occur::Should, query));
        }

        Ok(collapse(per_field))
    }

    fn term(&self, q: &TermLookupQuery) -> Result<Box<dyn Query>, QueryBuildError> {
        let (field, entry) = self.field(q.field.as_deref())?;
        let term = match entry.field_type() {
            FieldType::Str(_) => Term::from_field_text(field, &q.term),
            FieldType::F64(_) => {
                let value = q.term.trim().parse::<f64>().map_err(|_| {
                    QueryBuildError::BadValue(format!("{:?} is not a number", &q.term))
                })?;
                Term::from_field_f64(field, value)
            },
            FieldType::Bool(_) => {
                let value = q.term.trim().parse::<bool>().map_err(|_| {
                    QueryBuildError::BadValue(format!("{:?} is not a boolean", &q.term))
                })?;
                Term::from_field_bool(field, value)
            },
            FieldType::Date(_) => {
                let value = self.date(&q.term)?;
                Term::from_field_date(field, value)
            },
            _ => {
                return Err(QueryBuildError::UnsupportedField {
                    field: entry.name().to_string(),
                    reason: "term lookups need a text, keyword, number, date or boolean field",
                })
            },
        };

        Ok(Box::new(TermQuery::new(term, IndexRecordOption::WithFreqs)))
    }

    fn prefix(&self, q: &PrefixQuery) -> Result<Box<dyn Query>, QueryBuildError> {
        let (field, entry) = self.field(q.field.as_deref())?;
        if !matches!(entry.field_type(), FieldType::Str(_)) {
            return Err(QueryBuildError::UnsupportedField {
                field: entry.name().to_string(),
                reason: "prefix lookups need a text or keyword field",
            });
        }

        let pattern = format!("{}.*", escape_regex(&q.prefix));
        Ok(Box::new(RegexQuery::from_pattern(&pattern, field)?))
    }

    fn numeric_range(&self, q: &NumericRangeQuery) -> Result<Box<dyn Query>, QueryBuildError> {
        let (_, entry) = self.field(Some(&q.field))?;
        if !matches!(entry.field_type(), FieldType::F64(_)) {
            return Err(QueryBuildError::UnsupportedField {
                field: q.field.clone(),
                reason: "numeric ranges need a number field",
            });
        }

        if q.min.is_none() && q.max.is_none() {
            return Err(QueryBuildError::BadValue(
                "a numeric range needs at least one of min or max".to_string(),
            ));
        }

        let lower = bound(q.min, q.inclusive_min.unwrap_or(true));
        let upper = bound(q.max, q.inclusive_max.unwrap_or(false));

        Ok(Box::new(RangeQuery::new_f64_bounds(q.field.clone(), lower, upper)))
    }

    fn date_range(&self, q: &DateRangeQuery) -> Result<Box<dyn Query>, QueryBuildError> {
        let (_, entry) = self.field(Some(&q.field))?;
        if !matches!(entry.field_type(), FieldType::Date(_)) {
            return Err(QueryBuildError::UnsupportedField {
                field: q.field.clone(),
                reason: "date ranges need a date field",
            });
        }

        if q.start.is_none() && q.end.is_none() {
            return Err(QueryBuildError::BadValue(
                "a date range needs at least one of start or end".to_string(),
            ));
        }

        let start = q.start.as_deref().map(|v| self.date(v)).transpose()?;
        let end = q.end.as_deref().map(|v| self.date(v)).transpose()?;

        let lower = bound(start, q.inclusive_start.unwrap_or(true));
        let upper = bound(end, q.inclusive_end.unwrap_or(false));

        Ok(Box::new(RangeQuery::new_date_bounds(q.field.clone(), lower, upper)))
    }

    fn combine(
        &self,
        queries: &[QueryKind],
        occur: Occur,
    ) -> Result<Box<dyn Query>, QueryBuildError> {
        if queries.is_empty() {
            return Err(QueryBuildError::BadValue(
                "a compound query needs at least one sub query".to_string(),
            ));
        }

        let clauses = queries
            .iter()
            .map(|q| Ok((occur, self.build(q)?)))
            .collect::<Result<Vec<_>, QueryBuildError>>()?;

        Ok(Box::new(BooleanQuery::new(clauses)))
    }

    fn boolean(&self, q: &BooleanClauses) -> Result<Box<dyn Query>, QueryBuildError> {
        let mut clauses = vec![];
        for (occur, queries) in [
            (Occur::Must, &q.must),
            (Occur::Should, &q.should),
            (Occur::MustNot, &q.must_not),
        ] {
            for query in queries {
                clauses.push((occur, self.build(query)?));
            }
        }

        if clauses.is_empty() {
            return Err(QueryBuildError::BadValue(
                "a boolean query needs at least one clause".to_string(),
            ));
        }

        // A query made only of exclusions matches nothing in tantivy.
        if q.must.is_empty() && q.should.is_empty() {
            clauses.push((Occur::Must, Box::new(AllQuery) as Box<dyn Query>));
        }

        Ok(Box::new(BooleanQuery::new(clauses)))
    }

    fn doc_ids(&self, ids: &[String]) -> Box<dyn Query> {
        if ids.is_empty() {
            return Box::new(EmptyQuery);
        }

        let terms = ids
            .iter()
            .map(|id| Term::from_field_text(self.id_field, id));
        Box::new(TermSetQuery::new(terms))
    }

    fn field(&self, name: Option<&str>) -> Result<(Field, &FieldEntry), QueryBuildError> {
        let name = name.unwrap_or(ALL_FIELD);
        let field = self
            .schema
            .get_field(name)
            .map_err(|_| QueryBuildError::UnknownField(name.to_string()))?;

        Ok((field, self.schema.get_field_entry(field)))
    }

    /// The analyzed fields a match should look at.
    fn text_fields(&self, name: Option<&str>) -> Result<Vec<Field>, QueryBuildError> {
        let name = match name {
            None => return Ok(self.default_fields.to_vec()),
            Some(name) => name,
        };

        let (field, entry) = self.field(Some(name))?;
        match entry.field_type() {
            FieldType::Str(opts) if opts.get_indexing_options().is_some() => Ok(vec![field]),
            _ => Err(QueryBuildError::UnsupportedField {
                field: name.to_string(),
                reason: "matches need a text or keyword field",
            }),
        }
    }

    fn analyze(&self, field: Field, text: &str) -> Result<Vec<(usize, Term)>, QueryBuildError> {
        let mut analyzer = self.index.tokenizer_for_field(field)?;
        let mut stream = analyzer.token_stream(text);

        let mut terms = vec![];
        while stream.advance() {
            let token = stream.token();
            terms.push((token.position, Term::from_field_text(field, &token.text)));
        }

        Ok(terms)
    }

    fn date(&self, value: &str) -> Result<tantivy::DateTime, QueryBuildError> {
        parse_date(value)
            .map(to_tantivy_date)
            .map_err(|e| QueryBuildError::BadValue(e.to_string()))
    }
}

fn bound<T>(value: Option<T>, inclusive: bool) -> Bound<T> {
    match value {
        None => Bound::Unbounded,
        Some(v) if inclusive => Bound::Included(v),
        Some(v) => Bound::Excluded(v),
    }
}

/// Joins per field queries, a single one is used as is.
fn collapse(mut queries: Vec<(Occur, Box<dyn Query>)>) -> Box<dyn Query> {
    match queries.len() {
        0 => Box::new(EmptyQuery),
        1 => queries.remove(0).1,
        _ => Box::new(BooleanQuery::new(queries)),
    }
}

fn escape_regex(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if "\\.+*?()|[]{}^$#&-~\"<>@".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}
