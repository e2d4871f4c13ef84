//! C++ parser using tree-sitter
//!
//! The parser is the external front end of the detector: source text in,
//! canonical [`SyntaxTree`] out. Malformed or partial code never fails the
//! parse; tree-sitter recovers and the resulting `ERROR` nodes are kept.
//!
//! Global invariants enforced:
//! - Only named nodes are kept; punctuation and keywords are implied by kinds
//! - Comments are dropped, so formatting and comments never affect results

use crate::error::SpdtError;
use crate::tree::{SyntaxNode, SyntaxTree};
use anyhow::{Context, Result};
use std::ops::Range;
use tree_sitter::{Node, Parser};

/// Node kinds that never enter the canonical tree.
const SKIPPED_KINDS: &[&str] = &["comment"];

/// Declarator kinds that wrap the function declarator of a definition.
const WRAPPING_DECLARATORS: &[&str] = &[
    "pointer_declarator",
    "reference_declarator",
    "parenthesized_declarator",
    "attributed_declarator",
];

/// A function definition located in source text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSpan {
    pub name: String,
    pub bytes: Range<usize>,
}

/// Source text in, typed tree out.
///
/// Implementations must tolerate malformed input and be shareable across
/// threads; the AST cache calls `parse` concurrently.
pub trait SyntaxParser: Send + Sync {
    /// Parse `source` into a canonical tree.
    fn parse(&self, source: &str) -> Result<SyntaxTree>;

    /// Locate function definitions, in source order.
    ///
    /// Parsers without declaration information return an empty list.
    fn function_definitions(&self, _source: &str) -> Result<Vec<FunctionSpan>> {
        Ok(Vec::new())
    }
}

/// C++ parser backed by `tree-sitter-cpp`
pub struct CppParser;

impl CppParser {
    /// Create a new C++ parser
    pub fn new() -> Result<Self> {
        // Just validate that the grammar loads
        new_ts_parser()?;
        Ok(CppParser)
    }

    fn parse_tree(&self, source: &str) -> Result<tree_sitter::Tree> {
        // tree-sitter parsers are stateful, so each call gets its own
        let mut parser = new_ts_parser()?;
        parser
            .parse(source, None)
            .ok_or_else(|| SpdtError::Parse("tree-sitter returned no tree".to_string()).into())
    }
}

fn new_ts_parser() -> Result<Parser> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_cpp::LANGUAGE.into())
        .context("Failed to set C++ language for parser")?;
    Ok(parser)
}

impl SyntaxParser for CppParser {
    fn parse(&self, source: &str) -> Result<SyntaxTree> {
        let tree = self.parse_tree(source)?;
        let root = tree.root_node();
        Ok(SyntaxTree::new(to_syntax_node(root), root.has_error()))
    }

    fn function_definitions(&self, source: &str) -> Result<Vec<FunctionSpan>> {
        let tree = self.parse_tree(source)?;
        let mut spans = Vec::new();
        let mut stack = vec![tree.root_node()];
        while let Some(node) = stack.pop() {
            if node.kind() == "function_definition" {
                if let Some(name) = definition_name(node, source) {
                    spans.push(FunctionSpan {
                        name,
                        bytes: node.start_byte()..node.end_byte(),
                    });
                }
            }
            let mut cursor = node.walk();
            let children: Vec<Node> = node.named_children(&mut cursor).collect();
            stack.extend(children.into_iter().rev());
        }
        // Sort by source position for determinism
        spans.sort_by_key(|s| s.bytes.start);
        Ok(spans)
    }
}

/// Partially converted node: children still to visit (reversed) and
/// children already converted.
struct Frame<'t> {
    kind: &'static str,
    pending: Vec<Node<'t>>,
    built: Vec<SyntaxNode>,
}

impl<'t> Frame<'t> {
    fn new(node: Node<'t>) -> Self {
        let mut cursor = node.walk();
        let mut pending: Vec<Node<'t>> = node
            .named_children(&mut cursor)
            .filter(|child| !SKIPPED_KINDS.contains(&child.kind()))
            .collect();
        pending.reverse();
        Frame {
            kind: node.kind(),
            pending,
            built: Vec::new(),
        }
    }
}

/// Convert a tree-sitter node into the canonical model without recursion.
fn to_syntax_node(root: Node<'_>) -> SyntaxNode {
    let mut stack = vec![Frame::new(root)];
    loop {
        let next_child = stack.last_mut().and_then(|top| top.pending.pop());
        if let Some(child) = next_child {
            stack.push(Frame::new(child));
            continue;
        }
        let Some(done) = stack.pop() else {
            // Unreachable: the root frame is always returned below
            return SyntaxNode::new(root.kind());
        };
        let node = SyntaxNode::with_children(done.kind, done.built);
        match stack.last_mut() {
            Some(parent) => parent.built.push(node),
            None => return node,
        }
    }
}

/// Extract the unqualified name declared by a `function_definition`.
fn definition_name(node: Node<'_>, source: &str) -> Option<String> {
    let mut declarator = node.child_by_field_name("declarator")?;
    while WRAPPING_DECLARATORS.contains(&declarator.kind()) {
        let wrapper = declarator;
        declarator = wrapper.child_by_field_name("declarator").or_else(|| {
            let mut cursor = wrapper.walk();
            let found = wrapper
                .named_children(&mut cursor)
                .find(|c| c.kind().ends_with("declarator"));
            found
        })?;
    }
    if declarator.kind() != "function_declarator" {
        return None;
    }
    let mut name = declarator.child_by_field_name("declarator")?;
    // `ns::Type::method` -> `method`
    while name.kind() == "qualified_identifier" {
        name = name.child_by_field_name("name")?;
    }
    source.get(name.start_byte()..name.end_byte()).map(str::to_string)
}
