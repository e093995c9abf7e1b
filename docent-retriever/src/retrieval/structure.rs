//! Read-side views of a stored document: the section tree and the edge graph.

use super::relationships::{RelationshipThresholds, StrengthQuality};
use crate::storage::{
    Document, DocumentId, HierarchyNode, NodeId, RelationshipEdge, RelationshipKind,
};
use serde::Serialize;
use std::collections::HashMap;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StructureNode {
    pub id: NodeId,
    pub title: String,
    pub level: u8,
    pub seq: u32,
    pub children: Vec<StructureNode>,
}

impl StructureNode {
    fn count(&self) -> usize {
        1 + self.children.iter().map(StructureNode::count).sum::<usize>()
    }

    fn depth(&self) -> usize {
        1 + self.children.iter().map(StructureNode::depth).max().unwrap_or(0)
    }
}

/// The section tree of one document, children ordered by seq.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentStructure {
    pub document_id: DocumentId,
    pub title: String,
    pub path: String,
    pub roots: Vec<StructureNode>,
}

impl DocumentStructure {
    /// Builds the tree from a document's flat node list in a single pass.
    ///
    /// A node whose parent is not among `nodes` is logged and kept as a root.
    pub fn build(document: &Document, mut nodes: Vec<HierarchyNode>) -> Self {
        nodes.sort_by_key(|n| n.seq);
        let index: HashMap<NodeId, usize> =
            nodes.iter().enumerate().map(|(i, n)| (n.id, i)).collect();

        let mut children: Vec<Vec<usize>> = vec![Vec::new(); nodes.len()];
        let mut roots = Vec::new();
        for (i, node) in nodes.iter().enumerate() {
            match node.parent_id {
                None => roots.push(i),
                Some(parent_id) => match index.get(&parent_id) {
                    Some(&parent) => children[parent].push(i),
                    None => {
                        warn!(
                            "Parent node {} not found for node {} in document {}",
                            parent_id, node.id, document.id
                        );
                        roots.push(i);
                    }
                },
            }
        }

        fn assemble(
            i: usize,
            nodes: &[HierarchyNode],
            children: &[Vec<usize>],
        ) -> StructureNode {
            let node = &nodes[i];
            StructureNode {
                id: node.id,
                title: node.title.clone(),
                level: node.level,
                seq: node.seq,
                children: children[i]
                    .iter()
                    .map(|&c| assemble(c, nodes, children))
                    .collect(),
            }
        }

        Self {
            document_id: document.id,
            title: document.title.clone(),
            path: document.path.clone(),
            roots: roots
                .into_iter()
                .map(|i| assemble(i, &nodes, &children))
                .collect(),
        }
    }

    pub fn node_count(&self) -> usize {
        self.roots.iter().map(StructureNode::count).sum()
    }

    pub fn depth(&self) -> usize {
        self.roots.iter().map(StructureNode::depth).max().unwrap_or(0)
    }

    /// Indented outline, one line per node.
    pub fn outline(&self) -> String {
        fn walk(node: &StructureNode, depth: usize, out: &mut String) {
            out.push_str(&"  ".repeat(depth));
            out.push_str(&"#".repeat(node.level as usize));
            out.push(' ');
            out.push_str(&node.title);
            out.push('\n');
            for child in &node.children {
                walk(child, depth + 1, out);
            }
        }
        let mut out = String::new();
        for root in &self.roots {
            walk(root, 0, &mut out);
        }
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphNode {
    pub id: NodeId,
    pub title: String,
    pub level: u8,
    pub parent_id: Option<NodeId>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GraphEdge {
    pub source: NodeId,
    pub target: NodeId,
    pub kind: RelationshipKind,
    pub strength: f32,
    pub quality: StrengthQuality,
}

/// Nodes and edges of one document, for export to graph tooling.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentGraph {
    pub document_id: DocumentId,
    pub nodes: Vec<GraphNode>,
    pub edges: Vec<GraphEdge>,
}

impl DocumentGraph {
    pub fn build(
        document_id: DocumentId,
        nodes: &[HierarchyNode],
        edges: &[RelationshipEdge],
    ) -> Self {
        Self {
            document_id,
            nodes: nodes
                .iter()
                .map(|n| GraphNode {
                    id: n.id,
                    title: n.title.clone(),
                    level: n.level,
                    parent_id: n.parent_id,
                })
                .collect(),
            edges: edges
                .iter()
                .map(|e| GraphEdge {
                    source: e.source_id,
                    target: e.target_id,
                    kind: e.kind,
                    strength: e.strength,
                    quality: RelationshipThresholds::for_kind(e.kind).classify(e.strength),
                })
                .collect(),
        }
    }

    pub fn edges_of_kind(&self, kind: RelationshipKind) -> impl Iterator<Item = &GraphEdge> {
        self.edges.iter().filter(move |e| e.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tracing_test::traced_test;

    fn document() -> Document {
        Document {
            id: 7,
            title: "Guide".to_string(),
            path: "docs/guide.md".to_string(),
            content: String::new(),
            embedding: None,
            version: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn node(id: i64, parent_id: Option<i64>, level: u8, seq: u32) -> HierarchyNode {
        HierarchyNode {
            id,
            document_id: 7,
            parent_id,
            title: format!("n{id}"),
            content: String::new(),
            embedding: vec![],
            level,
            seq,
        }
    }

    #[test]
    fn test_tree_ordered_by_seq() {
        // Given out of order on purpose.
        let nodes = vec![
            node(13, Some(10), 2, 3),
            node(10, None, 1, 0),
            node(11, Some(10), 2, 1),
            node(12, Some(11), 3, 2),
            node(14, None, 1, 4),
        ];
        let structure = DocumentStructure::build(&document(), nodes);
        assert_eq!(structure.title, "Guide");
        assert_eq!(structure.roots.len(), 2);
        assert_eq!(structure.roots[0].id, 10);
        let kids: Vec<i64> = structure.roots[0].children.iter().map(|c| c.id).collect();
        assert_eq!(kids, vec![11, 13]);
        assert_eq!(structure.roots[0].children[0].children[0].id, 12);
        assert_eq!(structure.node_count(), 5);
        assert_eq!(structure.depth(), 3);
        assert_eq!(
            structure.outline(),
            "# n10\n  ## n11\n    ### n12\n  ## n13\n# n14\n"
        );
    }

    #[test]
    #[traced_test]
    fn test_orphan_becomes_root() {
        let nodes = vec![node(1, None, 1, 0), node(2, Some(99), 2, 1)];
        let structure = DocumentStructure::build(&document(), nodes);
        assert_eq!(structure.roots.len(), 2);
        assert!(logs_contain("Parent node 99 not found"));
    }

    #[test]
    fn test_empty_document() {
        let structure = DocumentStructure::build(&document(), vec![]);
        assert!(structure.roots.is_empty());
        assert_eq!(structure.depth(), 0);
    }

    #[test]
    fn test_graph_export() {
        let nodes = vec![node(1, None, 1, 0), node(2, Some(1), 2, 1)];
        let edges = vec![RelationshipEdge {
            id: 1,
            source_id: 1,
            target_id: 2,
            kind: RelationshipKind::Semantic,
            strength: 0.92,
        }];
        let graph = DocumentGraph::build(7, &nodes, &edges);
        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.edges[0].quality, StrengthQuality::VeryStrong);
        assert_eq!(graph.edges_of_kind(RelationshipKind::Sibling).count(), 0);

        let json = serde_json::to_value(&graph).unwrap();
        assert_eq!(json["edges"][0]["kind"], "semantic");
        assert_eq!(json["edges"][0]["quality"], "very-strong");
    }
}
