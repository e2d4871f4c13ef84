//! Canonical syntax tree model
//!
//! Global invariants enforced:
//! - Children are kept in source order
//! - Only node kinds participate in comparison; names, literals and comments never do
//! - Structurally identical trees serialize to byte-identical strings
//!
//! Traversals are iterative so that very large translation units cannot
//! exhaust the stack.

use serde::Serialize;

/// Indentation emitted per depth level in the serialized form.
const INDENT: &str = "  ";

/// One node of a parsed program: its kind label and ordered children.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyntaxNode {
    pub kind: String,
    pub children: Vec<SyntaxNode>,
}

impl SyntaxNode {
    pub fn new(kind: impl Into<String>) -> Self {
        SyntaxNode {
            kind: kind.into(),
            children: Vec::new(),
        }
    }

    pub fn with_children(kind: impl Into<String>, children: Vec<SyntaxNode>) -> Self {
        SyntaxNode {
            kind: kind.into(),
            children,
        }
    }
}

/// A parsed submission (or function snippet) in canonical form.
///
/// Size and serialization are computed once at construction; a tree is
/// immutable afterwards and shared read-only between scorer invocations.
#[derive(Debug, Clone)]
pub struct SyntaxTree {
    root: SyntaxNode,
    size: usize,
    serialized: String,
    has_errors: bool,
}

impl SyntaxTree {
    pub fn new(root: SyntaxNode, has_errors: bool) -> Self {
        let size = size(&root);
        let serialized = serialize(&root);
        SyntaxTree {
            root,
            size,
            serialized,
            has_errors,
        }
    }

    pub fn root(&self) -> &SyntaxNode {
        &self.root
    }

    /// Total node count.
    pub fn size(&self) -> usize {
        self.size
    }

    /// Depth-ordered textual encoding of node kinds.
    pub fn serialized(&self) -> &str {
        &self.serialized
    }

    /// Whether the parser had to recover from malformed input.
    pub fn has_errors(&self) -> bool {
        self.has_errors
    }
}

/// Serialize a tree depth-first, one node per line, as
/// `indent(depth) + kind`. Children are visited in source order.
pub fn serialize(root: &SyntaxNode) -> String {
    let mut out = String::new();
    let mut stack: Vec<(&SyntaxNode, usize)> = vec![(root, 0)];
    while let Some((node, depth)) = stack.pop() {
        for _ in 0..depth {
            out.push_str(INDENT);
        }
        out.push_str(&node.kind);
        out.push('\n');
        // Reverse so the first child is popped first
        for child in node.children.iter().rev() {
            stack.push((child, depth + 1));
        }
    }
    out
}

/// Total node count: 1 + sum of the children's sizes.
pub fn size(root: &SyntaxNode) -> usize {
    let mut count = 0;
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        count += 1;
        stack.extend(node.children.iter());
    }
    count
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(kind: &str) -> SyntaxNode {
        SyntaxNode::new(kind)
    }

    fn sample() -> SyntaxNode {
        SyntaxNode::with_children(
            "translation_unit",
            vec![SyntaxNode::with_children(
                "function_definition",
                vec![
                    leaf("primitive_type"),
                    SyntaxNode::with_children(
                        "function_declarator",
                        vec![leaf("identifier"), leaf("parameter_list")],
                    ),
                    leaf("compound_statement"),
                ],
            )],
        )
    }

    #[test]
    fn test_serialize_indents_by_depth_in_source_order() {
        let expected = "translation_unit\n  function_definition\n    primitive_type\n    function_declarator\n      identifier\n      parameter_list\n    compound_statement\n";
        assert_eq!(serialize(&sample()), expected);
    }

    #[test]
    fn test_size_counts_every_node() {
        assert_eq!(size(&sample()), 7);
        assert_eq!(size(&leaf("x")), 1);
    }

    #[test]
    fn test_serialize_is_deterministic() {
        let a = serialize(&sample());
        let b = serialize(&sample().clone());
        assert_eq!(a, b);
    }

    #[test]
    fn test_tree_caches_size_and_serialization() {
        let tree = SyntaxTree::new(sample(), false);
        assert_eq!(tree.size(), 7);
        assert_eq!(tree.serialized().lines().count(), tree.size());
        assert!(!tree.has_errors());
    }

    #[test]
    fn test_deep_tree_traversal_is_iterative() {
        let mut node = leaf("number_literal");
        for _ in 0..3_000 {
            node = SyntaxNode::with_children("parenthesized_expression", vec![node]);
        }
        assert_eq!(size(&node), 3_001);
        assert_eq!(serialize(&node).lines().count(), 3_001);
    }
}
