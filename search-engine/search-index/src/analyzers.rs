use tantivy::tokenizer::{
    Language,
    LowerCaser,
    RawTokenizer,
    RemoveLongFilter,
    SimpleTokenizer,
    Stemmer,
    StopWordFilter,
    TextAnalyzer,
};
use tantivy::Index;

/// English text: lowercased, stop words removed and stemmed.
pub static ENGLISH: &str = "en";

/// Lowercased words, no stemming.
pub static STANDARD: &str = "standard";

/// The whole value as a single token.
pub static KEYWORD: &str = "keyword";

/// Tokens longer than this are dropped rather than indexed.
const MAX_TOKEN_LENGTH: usize = 40;

pub fn is_known(name: &str) -> bool {
    name == ENGLISH || name == STANDARD || name == KEYWORD
}

/// Registers every analyzer a mapping may reference on the given index.
///
/// This must happen before any reader or writer is created as tantivy
/// resolves tokenizers lazily by name.
pub fn register(index: &Index) {
    let manager = index.tokenizers();
    manager.register(ENGLISH, english());
    manager.register(STANDARD, standard());
    manager.register(KEYWORD, TextAnalyzer::from(RawTokenizer::default()));
}

fn english() -> TextAnalyzer {
    // Only `None` when tantivy is built without its stop word lists.
    let stop_words = StopWordFilter::new(Language::English)
        .unwrap_or_else(|| StopWordFilter::remove(Vec::<String>::new()));

    TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(MAX_TOKEN_LENGTH))
        .filter(LowerCaser)
        .filter(stop_words)
        .filter(Stemmer::new(Language::English))
        .build()
}

fn standard() -> TextAnalyzer {
    TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(MAX_TOKEN_LENGTH))
        .filter(LowerCaser)
        .build()
}
