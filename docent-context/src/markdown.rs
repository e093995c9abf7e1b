//! Splits Markdown documents into an ordered list of header-delimited sections.
//!
//! Every ATX header (`#` through `######`, followed by whitespace and text) opens a
//! new [`Section`]. Lines that are not headers accumulate into the body of the
//! section currently open. Sections are emitted in document order and numbered
//! with a zero-based `seq` counter.
//!
//! Two policies shape the output:
//!
//! *   Text that appears before the first header is dropped whenever the document
//!     has at least one header.
//! *   A document without any header produces exactly one synthetic section titled
//!     [`DEFAULT_SECTION_TITLE`] at level 1 whose body is the whole, untrimmed input.
//!
//! ```
//! use docent_context::markdown::parse_sections;
//!
//! let sections = parse_sections("# A\nhello\n## B\nworld\n## C\nfoo");
//! assert_eq!(sections.len(), 3);
//! assert_eq!(sections[1].title, "B");
//! assert_eq!(sections[1].level, 2);
//! assert_eq!(sections[1].body, "world");
//! assert_eq!(sections[2].seq, 2);
//! ```
use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

/// Title given to the single section emitted for documents without headers.
pub const DEFAULT_SECTION_TITLE: &str = "Document Content";

/// Deepest header level recognised by the parser.
pub const MAX_HEADER_LEVEL: u8 = 6;

fn header_pattern() -> &'static Regex {
    static HEADER: OnceLock<Regex> = OnceLock::new();
    HEADER.get_or_init(|| {
        // A header needs at least one non-space character after the marker.
        Regex::new(r"^(#{1,6})\s+(\S.*)$").expect("header pattern is a valid regex")
    })
}

/// One header-delimited section of a Markdown document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Section {
    /// Header text with surrounding whitespace removed.
    pub title: String,
    /// Lines between this header and the next one, trimmed.
    pub body: String,
    /// Number of `#` characters in the header (1-6).
    pub level: u8,
    /// Zero-based position of the section in emission order.
    pub seq: u32,
}

/// Returns the level and title if `line` is a Markdown header.
pub fn parse_header(line: &str) -> Option<(u8, &str)> {
    let captures = header_pattern().captures(line)?;
    let level = captures.get(1)?.as_str().len() as u8;
    let title = captures.get(2)?.as_str().trim();
    Some((level, title))
}

/// Counts the lines of `content` that [`parse_sections`] treats as headers.
pub fn count_headers(content: &str) -> usize {
    content
        .split('\n')
        .filter(|line| parse_header(line).is_some())
        .count()
}

/// Parses `content` into sections.
///
/// The result is never empty: a document with no headers (including the empty
/// string) yields one [`DEFAULT_SECTION_TITLE`] section.
pub fn parse_sections(content: &str) -> Vec<Section> {
    let mut sections = Vec::new();
    let mut current: Option<(u8, String)> = None;
    let mut body: Vec<&str> = Vec::new();

    for line in content.split('\n') {
        match parse_header(line) {
            Some((level, title)) => {
                if let Some((open_level, open_title)) = current.take() {
                    sections.push(Section {
                        title: open_title,
                        body: body.join("\n").trim().to_string(),
                        level: open_level,
                        seq: sections.len() as u32,
                    });
                }
                body.clear();
                current = Some((level, title.to_string()));
            }
            None => {
                if current.is_some() {
                    body.push(line);
                }
            }
        }
    }

    if let Some((level, title)) = current {
        sections.push(Section {
            title,
            body: body.join("\n").trim().to_string(),
            level,
            seq: sections.len() as u32,
        });
    }

    if sections.is_empty() {
        sections.push(Section {
            title: DEFAULT_SECTION_TITLE.to_string(),
            body: content.to_string(),
            level: 1,
            seq: 0,
        });
    }

    sections
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_three_section_document() {
        let sections = parse_sections("# A\nhello\n## B\nworld\n## C\nfoo");
        let summary: Vec<(&str, &str, u8, u32)> = sections
            .iter()
            .map(|s| (s.title.as_str(), s.body.as_str(), s.level, s.seq))
            .collect();
        assert_eq!(
            summary,
            vec![
                ("A", "hello", 1, 0),
                ("B", "world", 2, 1),
                ("C", "foo", 2, 2),
            ]
        );
    }

    #[test]
    fn test_no_headers_yields_placeholder() {
        let sections = parse_sections("just text");
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].title, DEFAULT_SECTION_TITLE);
        assert_eq!(sections[0].body, "just text");
        assert_eq!(sections[0].level, 1);
        assert_eq!(sections[0].seq, 0);
    }

    #[test]
    fn test_placeholder_body_is_not_trimmed() {
        let content = "\n  some text\n\n";
        let sections = parse_sections(content);
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].body, content);
    }

    #[test]
    fn test_empty_input() {
        let sections = parse_sections("");
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].body, "");
    }

    #[test]
    fn test_preamble_is_dropped() {
        let sections = parse_sections("intro line\n\n# Title\nbody text");
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].title, "Title");
        assert_eq!(sections[0].body, "body text");
    }

    #[test]
    fn test_body_is_trimmed_but_keeps_inner_lines() {
        let sections = parse_sections("## Setup\n\n  first\n\nsecond  \n\n");
        assert_eq!(sections[0].body, "first\n\nsecond");
    }

    #[test]
    fn test_header_requires_whitespace_and_text() {
        assert_eq!(parse_header("#Title"), None);
        assert_eq!(parse_header("#   "), None);
        assert_eq!(parse_header("####### too deep"), None);
        assert_eq!(parse_header("###   Spaced  "), Some((3, "Spaced")));
        assert_eq!(parse_header("# Windows\r"), Some((1, "Windows")));
    }

    #[test]
    fn test_whitespace_only_header_is_body_text() {
        let sections = parse_sections("# Real\ntext\n#   \nmore");
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].body, "text\n#   \nmore");
    }

    #[test]
    fn test_node_count_matches_header_count() {
        let docs = [
            "# One\n## Two\n### Three\n## Four\n# Five",
            "###### Deep\ntext\n# Shallow",
            "preamble\n## Only\n",
        ];
        for doc in docs {
            assert_eq!(parse_sections(doc).len(), count_headers(doc), "{doc:?}");
        }
    }

    #[test]
    fn test_seq_is_contiguous() {
        let sections = parse_sections("# a\n## b\n### c\n## d\n# e\n## f");
        for (i, section) in sections.iter().enumerate() {
            assert_eq!(section.seq as usize, i);
        }
    }

    #[test]
    fn test_code_fence_lines_are_not_special() {
        // Fenced code is not tracked; a `#` comment inside a fence still opens a section.
        let sections = parse_sections("# Shell\n```\n# install deps\n```");
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[1].title, "install deps");
    }
}
