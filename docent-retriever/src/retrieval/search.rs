//! Multi-stage ranked retrieval over the section hierarchy.
//!
//! ```text
//! query ─ embed ─┬─ keyword stage  (term substring, cosine × (1 + importance))
//!                ├─ semantic stage (node cosine, top `limit`)
//!                └─ expansion      (top seeds → strongest outgoing edges)
//!                        ↓
//!          stable sort by relevance, truncate, attach document info
//! ```
//!
//! Each node appears at most once; the first stage to reach it wins. Relevance
//! is an unbounded heuristic, so ranking uses the raw value and only
//! [`SearchResult::relevance_percent`] clamps it.

use crate::error::SearchError;
use crate::storage::{
    CombinedStore, DocumentId, HierarchyNode, NodeId, ReadSnapshot, RelationshipKind,
};
use docent_embed::EmbeddingAdapter;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Title attached to results whose document no longer exists.
pub const UNKNOWN_DOCUMENT_TITLE: &str = "Unknown Document";
/// Path attached to results whose document no longer exists.
pub const UNKNOWN_DOCUMENT_PATH: &str = "N/A";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Limit used when the caller does not give one
    pub default_limit: usize,
    /// How many top results have their edges followed
    pub expansion_seeds: usize,
    /// How many edges are followed per seed
    pub expansion_edges: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            default_limit: 5,
            expansion_seeds: 3,
            expansion_edges: 3,
        }
    }
}

impl SearchConfig {
    pub fn with_default_limit(mut self, limit: usize) -> Self {
        self.default_limit = limit;
        self
    }

    pub fn with_expansion(mut self, seeds: usize, edges: usize) -> Self {
        self.expansion_seeds = seeds;
        self.expansion_edges = edges;
        self
    }
}

/// How a result was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MatchType {
    Keyword,
    Semantic,
    /// Reached by following an edge of this kind from a higher-ranked result
    Related(RelationshipKind),
}

impl fmt::Display for MatchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Keyword => f.write_str("keyword"),
            Self::Semantic => f.write_str("semantic"),
            Self::Related(kind) => write!(f, "related-{kind}"),
        }
    }
}

impl Serialize for MatchType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// Relevance of a keyword-stage match.
pub fn keyword_relevance(similarity: f32, importance: f32) -> f32 {
    similarity * (1.0 + importance)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub node_id: NodeId,
    pub title: String,
    pub content: String,
    pub document_id: DocumentId,
    pub relevance: f32,
    pub match_type: MatchType,
    /// Keyword term that matched, for keyword-stage results
    #[serde(skip_serializing_if = "Option::is_none")]
    pub matched_keyword: Option<String>,
    /// Result whose edge led here, for expansion-stage results
    #[serde(skip_serializing_if = "Option::is_none")]
    pub origin_node_id: Option<NodeId>,
    pub level: u8,
    pub parent_id: Option<NodeId>,
    pub document_title: String,
    pub document_path: String,
}

impl SearchResult {
    fn from_node(node: HierarchyNode, relevance: f32, match_type: MatchType) -> Self {
        Self {
            node_id: node.id,
            title: node.title,
            content: node.content,
            document_id: node.document_id,
            relevance,
            match_type,
            matched_keyword: None,
            origin_node_id: None,
            level: node.level,
            parent_id: node.parent_id,
            document_title: UNKNOWN_DOCUMENT_TITLE.to_string(),
            document_path: UNKNOWN_DOCUMENT_PATH.to_string(),
        }
    }

    /// Relevance clamped to [0, 1] and scaled to a percentage, for display.
    pub fn relevance_percent(&self) -> f32 {
        self.relevance.clamp(0.0, 1.0) * 100.0
    }

    /// The first `max_chars` characters of the content, with `...` if cut.
    pub fn preview(&self, max_chars: usize) -> String {
        match self.content.char_indices().nth(max_chars) {
            Some((end, _)) => format!("{}...", &self.content[..end]),
            None => self.content.clone(),
        }
    }
}

pub struct HierarchicalSearch {
    store: Arc<dyn CombinedStore>,
    adapter: Arc<EmbeddingAdapter>,
    config: SearchConfig,
}

impl HierarchicalSearch {
    pub fn new(
        store: Arc<dyn CombinedStore>,
        adapter: Arc<EmbeddingAdapter>,
        config: SearchConfig,
    ) -> Self {
        Self {
            store,
            adapter,
            config,
        }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Runs every stage and returns at most `limit` results, most relevant first.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchResult>, SearchError> {
        let query = query.trim();
        if query.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let embedding = self.adapter.embed(query).await?;
        // Every stage below reads the same committed state.
        let mut snapshot = self.store.snapshot().await?;

        let mut seen: HashSet<NodeId> = HashSet::new();
        let mut results: Vec<SearchResult> = Vec::new();

        for hit in snapshot.search_keywords(query, &embedding, limit).await? {
            if seen.insert(hit.node.id) {
                let relevance = keyword_relevance(hit.similarity, hit.keyword.importance);
                let mut result = SearchResult::from_node(hit.node, relevance, MatchType::Keyword);
                result.matched_keyword = Some(hit.keyword.term);
                results.push(result);
            }
        }
        let keyword_count = results.len();

        for (node, similarity) in snapshot.search_nodes(&embedding, limit).await? {
            if seen.insert(node.id) {
                results.push(SearchResult::from_node(node, similarity, MatchType::Semantic));
            }
        }
        let semantic_count = results.len() - keyword_count;

        results.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));

        let seeds: Vec<(NodeId, f32)> = results
            .iter()
            .take(self.config.expansion_seeds)
            .map(|r| (r.node_id, r.relevance))
            .collect();
        for (origin, origin_relevance) in seeds {
            let related = snapshot
                .related_nodes(origin, self.config.expansion_edges)
                .await?;
            for hit in related {
                if seen.insert(hit.node.id) {
                    let mut result = SearchResult::from_node(
                        hit.node,
                        origin_relevance * hit.edge.strength,
                        MatchType::Related(hit.edge.kind),
                    );
                    result.origin_node_id = Some(origin);
                    results.push(result);
                }
            }
        }
        let related_count = results.len() - keyword_count - semantic_count;

        results.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
        results.truncate(limit);

        attach_documents(snapshot.as_mut(), &mut results).await?;
        snapshot.release().await?;

        debug!(
            "Search '{}': {} keyword, {} semantic, {} related; returning {}",
            query,
            keyword_count,
            semantic_count,
            related_count,
            results.len()
        );
        Ok(results)
    }
}

/// Fills in document title and path, falling back to the unknown-document
/// placeholders when the document row is gone.
async fn attach_documents(
    snapshot: &mut dyn ReadSnapshot,
    results: &mut [SearchResult],
) -> Result<(), SearchError> {
    let mut documents: HashMap<DocumentId, Option<(String, String)>> = HashMap::new();
    for result in results.iter_mut() {
        if !documents.contains_key(&result.document_id) {
            let info = snapshot
                .get_document(result.document_id)
                .await?
                .map(|doc| (doc.title, doc.path));
            if info.is_none() {
                warn!(
                    "Search result node {} belongs to missing document {}",
                    result.node_id, result.document_id
                );
            }
            documents.insert(result.document_id, info);
        }
        if let Some(Some((title, path))) = documents.get(&result.document_id) {
            result.document_title = title.clone();
            result.document_path = path.clone();
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::RelationshipKind;

    fn result(relevance: f32, content: &str) -> SearchResult {
        SearchResult {
            node_id: 1,
            title: "t".to_string(),
            content: content.to_string(),
            document_id: 1,
            relevance,
            match_type: MatchType::Semantic,
            matched_keyword: None,
            origin_node_id: None,
            level: 1,
            parent_id: None,
            document_title: UNKNOWN_DOCUMENT_TITLE.to_string(),
            document_path: UNKNOWN_DOCUMENT_PATH.to_string(),
        }
    }

    #[test]
    fn test_keyword_relevance() {
        assert!((keyword_relevance(0.8, 0.9) - 1.52).abs() < 1e-6);
        assert_eq!(keyword_relevance(0.5, 0.0), 0.5);
    }

    #[test]
    fn test_match_type_labels() {
        assert_eq!(MatchType::Keyword.to_string(), "keyword");
        assert_eq!(
            MatchType::Related(RelationshipKind::Sibling).to_string(),
            "related-structural-sibling"
        );
        assert_eq!(
            serde_json::to_string(&MatchType::Related(RelationshipKind::Semantic)).unwrap(),
            "\"related-semantic\""
        );
    }

    #[test]
    fn test_relevance_percent_clamps() {
        assert_eq!(result(1.52, "").relevance_percent(), 100.0);
        assert_eq!(result(-0.2, "").relevance_percent(), 0.0);
        assert!((result(0.25, "").relevance_percent() - 25.0).abs() < 1e-4);
    }

    #[test]
    fn test_preview() {
        assert_eq!(result(0.0, "short").preview(10), "short");
        assert_eq!(result(0.0, "exactly").preview(7), "exactly");
        assert_eq!(result(0.0, "héllo wörld").preview(5), "héllo...");
    }
}
