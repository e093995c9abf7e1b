//! Text processing for docent: Markdown section parsing and keyword extraction.
//!
//! Nothing in this crate performs I/O; it turns raw document text into the
//! [`Section`]s and [`KeywordScore`]s that the retriever embeds and persists.
pub mod keywords;
pub mod markdown;

pub use keywords::{KeywordConfig, KeywordExtractor, KeywordScore, extract_keywords};
pub use markdown::{DEFAULT_SECTION_TITLE, Section, count_headers, parse_sections};
