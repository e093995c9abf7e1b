//! Turns Markdown content into a complete [`HierarchyDraft`].
//!
//! Everything that can fail for reasons other than storage (embedding calls,
//! mainly) happens here, before the database is touched. The store applies
//! the finished draft in a single transaction, so a failed build never leaves
//! a half-written hierarchy behind.
//!
//! ## Parent resolution
//!
//! Nodes are visited in document order while a `(level, seq)` table records
//! each one. A node's parent is the entry with the largest `(level, seq)` among
//! those with a strictly smaller level: the deepest eligible ancestor, and of
//! those the nearest preceding one. Every earlier node has a smaller seq, so the
//! parent invariant (`parent.level < level`, `parent.seq < seq`) holds by
//! construction.

use super::relationships::{NodeView, RelationshipEngine};
use crate::storage::{HierarchyDraft, HierarchyNode, KeywordDraft, NewEdge, NodeDraft};
use docent_context::{KeywordExtractor, parse_sections};
use docent_embed::{EmbeddingAdapter, Result as EmbedResult};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct HierarchyBuilder {
    adapter: Arc<EmbeddingAdapter>,
    extractor: KeywordExtractor,
    relationships: RelationshipEngine,
}

impl HierarchyBuilder {
    pub fn new(
        adapter: Arc<EmbeddingAdapter>,
        extractor: KeywordExtractor,
        relationships: RelationshipEngine,
    ) -> Self {
        Self {
            adapter,
            extractor,
            relationships,
        }
    }

    pub fn relationships(&self) -> &RelationshipEngine {
        &self.relationships
    }

    /// Parses `content` and computes nodes, keywords and edges.
    ///
    /// Makes at most two embedding requests: one for all section texts and one
    /// for all keyword terms.
    pub async fn draft(&self, content: &str) -> EmbedResult<HierarchyDraft> {
        let sections = parse_sections(content);

        let texts: Vec<String> = sections
            .iter()
            .map(|s| format!("{} {}", s.title, s.body))
            .collect();
        let embeddings = self.adapter.embed_batch(&texts).await?;

        let scores: Vec<_> = sections
            .iter()
            .map(|s| self.extractor.extract(&s.title, &s.body))
            .collect();
        let terms: Vec<String> = scores
            .iter()
            .flat_map(|node_scores| node_scores.iter().map(|k| k.term.clone()))
            .collect();
        let mut term_embeddings = self.adapter.embed_batch(&terms).await?.into_iter();

        let mut seen: BTreeMap<(u8, u32), usize> = BTreeMap::new();
        let mut nodes = Vec::with_capacity(sections.len());
        for ((index, (section, embedding)), node_scores) in sections
            .into_iter()
            .zip(embeddings)
            .enumerate()
            .zip(scores)
        {
            let parent = seen
                .range(..(section.level, 0))
                .next_back()
                .map(|(_, &parent)| parent);
            seen.insert((section.level, section.seq), index);

            let keywords = node_scores
                .into_iter()
                .zip(term_embeddings.by_ref())
                .map(|(score, embedding)| KeywordDraft {
                    term: score.term,
                    importance: score.importance,
                    embedding,
                })
                .collect();

            nodes.push(NodeDraft {
                title: section.title,
                content: section.body,
                level: section.level,
                seq: section.seq,
                parent,
                embedding,
                keywords,
            });
        }

        let views: Vec<NodeView<'_>> = nodes
            .iter()
            .map(|n| NodeView {
                level: n.level,
                embedding: &n.embedding,
            })
            .collect();
        let edges = self.relationships.compute(&views);

        let draft = HierarchyDraft { nodes, edges };
        debug!(
            "Drafted hierarchy: {} nodes, {} edges, {} keywords",
            draft.nodes.len(),
            draft.edges.len(),
            draft.keyword_count()
        );
        Ok(draft)
    }

    /// Re-derives the edge set of already stored nodes.
    pub fn edges_for(&self, nodes: &[HierarchyNode]) -> Vec<NewEdge> {
        let views: Vec<NodeView<'_>> = nodes
            .iter()
            .map(|n| NodeView {
                level: n.level,
                embedding: &n.embedding,
            })
            .collect();
        self.relationships
            .compute(&views)
            .into_iter()
            .map(|edge| NewEdge {
                source_id: nodes[edge.source].id,
                target_id: nodes[edge.target].id,
                kind: edge.kind,
                strength: edge.strength,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::RelationshipKind;
    use anyhow::Result;
    use docent_context::DEFAULT_SECTION_TITLE;
    use docent_embed::HashingProvider;

    fn builder() -> Result<HierarchyBuilder> {
        let adapter = EmbeddingAdapter::new(Arc::new(HashingProvider::new(64)), "hashing", 64, true)?;
        Ok(HierarchyBuilder::new(
            Arc::new(adapter),
            KeywordExtractor::default(),
            RelationshipEngine::default(),
        ))
    }

    fn parents(draft: &HierarchyDraft) -> Vec<Option<usize>> {
        draft.nodes.iter().map(|n| n.parent).collect()
    }

    #[tokio::test]
    async fn test_three_section_document() -> Result<()> {
        let draft = builder()?
            .draft("# A\nhello\n## B\nworld\n## C\nfoo")
            .await?;
        assert_eq!(draft.nodes.len(), 3);
        assert_eq!(parents(&draft), vec![None, Some(0), Some(0)]);

        let siblings: Vec<(usize, usize)> = draft
            .edges
            .iter()
            .filter(|e| e.kind == RelationshipKind::Sibling)
            .map(|e| (e.source, e.target))
            .collect();
        assert_eq!(siblings, vec![(1, 2), (2, 1)]);
        Ok(())
    }

    #[tokio::test]
    async fn test_deepest_eligible_ancestor() -> Result<()> {
        // D's candidates are A(1,0), C(3,1) and B(2,2); the deepest wins.
        let draft = builder()?
            .draft("# A\n### C\n## B\n#### D\n## E\n# F\n## G")
            .await?;
        assert_eq!(
            parents(&draft),
            vec![None, Some(0), Some(0), Some(1), Some(0), None, Some(5)]
        );
        for (i, node) in draft.nodes.iter().enumerate() {
            if let Some(p) = node.parent {
                assert!(draft.nodes[p].level < node.level);
                assert!(draft.nodes[p].seq < node.seq);
                assert!(p < i);
            }
        }
        Ok(())
    }

    #[tokio::test]
    async fn test_keywords_get_embeddings() -> Result<()> {
        let draft = builder()?
            .draft("# Caching\nThe cache stores results. Cache entries expire.")
            .await?;
        let keywords = &draft.nodes[0].keywords;
        assert_eq!(keywords[0].term, "cache");
        assert!((keywords[0].importance - 1.0).abs() < f32::EPSILON);
        assert!(keywords.iter().all(|k| k.embedding.len() == 64));
        assert!(keywords.len() <= 10);
        Ok(())
    }

    #[tokio::test]
    async fn test_headerless_document() -> Result<()> {
        let draft = builder()?.draft("just text").await?;
        assert_eq!(draft.nodes.len(), 1);
        assert_eq!(draft.nodes[0].title, DEFAULT_SECTION_TITLE);
        assert_eq!(draft.nodes[0].content, "just text");
        assert_eq!(draft.nodes[0].parent, None);
        assert!(draft.edges.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_identical_content_drafts_identically() -> Result<()> {
        let builder = builder()?;
        let content = "# Setup\ninstall things\n## Linux\napt install\n## macOS\nbrew install";
        assert_eq!(builder.draft(content).await?, builder.draft(content).await?);
        Ok(())
    }
}
