//! Edge derivation between the sections of one document.
//!
//! Two families of edges are produced, both only within a document:
//!
//! - **structural-sibling**: every pair of distinct nodes with the same header
//!   level, in both directions, with a fixed strength.
//! - **semantic**: every pair whose embeddings have cosine similarity above the
//!   threshold, in both directions, with strength equal to the similarity.
//!
//! Each unordered pair is compared once and both directed edges are emitted
//! from that comparison. The work is quadratic in the node count, which is
//! fine for documents with tens of sections.

use crate::storage::{EdgeDraft, RelationshipKind};
use docent_embed::vector::cosine_similarity;
use half::f16;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Strengths and thresholds used when deriving edges.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelationshipConfig {
    /// Strength of every structural-sibling edge
    pub sibling_strength: f32,
    /// Similarity a pair must exceed to be linked semantically
    pub semantic_threshold: f32,
}

impl Default for RelationshipConfig {
    fn default() -> Self {
        Self {
            sibling_strength: 0.5,
            semantic_threshold: 0.7,
        }
    }
}

impl RelationshipConfig {
    pub fn with_sibling_strength(mut self, strength: f32) -> Self {
        self.sibling_strength = strength;
        self
    }

    pub fn with_semantic_threshold(mut self, threshold: f32) -> Self {
        self.semantic_threshold = threshold;
        self
    }
}

/// What the engine needs to know about a node.
#[derive(Debug, Clone, Copy)]
pub struct NodeView<'a> {
    pub level: u8,
    pub embedding: &'a [f16],
}

#[derive(Debug, Clone, Default)]
pub struct RelationshipEngine {
    config: RelationshipConfig,
}

impl RelationshipEngine {
    pub fn new(config: RelationshipConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RelationshipConfig {
        &self.config
    }

    /// Derives all edges between `nodes`; indices in the result refer to `nodes`.
    ///
    /// For each pair (i, j) with i < j the sibling edges come first, then the
    /// semantic edges, each as i→j followed by j→i.
    pub fn compute(&self, nodes: &[NodeView<'_>]) -> Vec<EdgeDraft> {
        let mut edges = Vec::new();
        for (i, a) in nodes.iter().enumerate() {
            for (offset, b) in nodes[i + 1..].iter().enumerate() {
                let j = i + 1 + offset;

                if a.level == b.level {
                    Self::push_pair(
                        &mut edges,
                        i,
                        j,
                        RelationshipKind::Sibling,
                        self.config.sibling_strength,
                    );
                }

                let similarity = cosine_similarity(a.embedding, b.embedding);
                if similarity > self.config.semantic_threshold {
                    Self::push_pair(
                        &mut edges,
                        i,
                        j,
                        RelationshipKind::Semantic,
                        similarity,
                    );
                }
            }
        }
        edges
    }

    fn push_pair(
        edges: &mut Vec<EdgeDraft>,
        i: usize,
        j: usize,
        kind: RelationshipKind,
        strength: f32,
    ) {
        // f16 rounding can push a self-similar pair a hair over 1.0.
        let strength = strength.clamp(0.0, 1.0);
        edges.push(EdgeDraft {
            source: i,
            target: j,
            kind,
            strength,
        });
        edges.push(EdgeDraft {
            source: j,
            target: i,
            kind,
            strength,
        });
    }
}

/// Qualitative label for an edge strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum StrengthQuality {
    None,
    Weak,
    Strong,
    VeryStrong,
}

impl fmt::Display for StrengthQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "none",
            Self::Weak => "weak",
            Self::Strong => "strong",
            Self::VeryStrong => "very-strong",
        })
    }
}

/// Cut-off points between [`StrengthQuality`] labels for one edge kind.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelationshipThresholds {
    pub min_strength: f32,
    pub strong: f32,
    pub very_strong: f32,
}

impl RelationshipThresholds {
    pub fn for_kind(kind: RelationshipKind) -> Self {
        match kind {
            RelationshipKind::Sibling => Self {
                min_strength: 0.3,
                strong: 0.6,
                very_strong: 0.8,
            },
            RelationshipKind::Semantic => Self {
                min_strength: 0.7,
                strong: 0.8,
                very_strong: 0.9,
            },
        }
    }

    pub fn classify(&self, strength: f32) -> StrengthQuality {
        if strength < self.min_strength {
            StrengthQuality::None
        } else if strength < self.strong {
            StrengthQuality::Weak
        } else if strength < self.very_strong {
            StrengthQuality::Strong
        } else {
            StrengthQuality::VeryStrong
        }
    }
}
