//! Content-addressed AST cache
//!
//! Identical normalized text is parsed once per run. The map holds one
//! `OnceLock` cell per content digest: the shard lock is only held while the
//! cell is fetched or inserted, and the parse itself runs inside
//! `OnceLock::get_or_init`, so concurrent builders of the same text wait for
//! the first parse instead of repeating it.
//!
//! A cache lives as long as the detector that owns it; nothing is persisted.

use crate::parser::SyntaxParser;
use crate::tree::SyntaxTree;
use anyhow::Result;
use dashmap::DashMap;
use regex::Regex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use tracing::debug;

/// A parse outcome. Failures are cached too so a bad input is not retried.
type CachedParse = Result<Arc<SyntaxTree>, String>;

/// Parses source text into shared trees, at most once per distinct text.
pub struct AstCache {
    parser: Arc<dyn SyntaxParser>,
    entries: DashMap<blake3::Hash, Arc<OnceLock<CachedParse>>>,
    parses: AtomicUsize,
}

impl AstCache {
    pub fn new(parser: Arc<dyn SyntaxParser>) -> Self {
        AstCache {
            parser,
            entries: DashMap::new(),
            parses: AtomicUsize::new(0),
        }
    }

    pub fn parser(&self) -> &Arc<dyn SyntaxParser> {
        &self.parser
    }

    /// Build (or fetch) the tree for `source`.
    ///
    /// Include lines still present are removed first; the key is the digest
    /// of the text that is actually parsed.
    pub fn build(&self, source: &str) -> Result<Arc<SyntaxTree>> {
        let code = strip_includes(source);
        let key = blake3::hash(code.as_bytes());

        // Clone the cell out so the shard lock is released before parsing
        let cell = self.entries.entry(key).or_default().value().clone();

        let mut parsed_here = false;
        let outcome = cell.get_or_init(|| {
            parsed_here = true;
            self.parses.fetch_add(1, Ordering::Relaxed);
            self.parser
                .parse(&code)
                .map(Arc::new)
                .map_err(|e| format!("{:#}", e))
        });
        if !parsed_here {
            debug!(key = %key.to_hex(), "ast cache hit");
        }

        outcome.clone().map_err(anyhow::Error::msg)
    }

    /// Number of times the underlying parser was invoked.
    pub fn parse_count(&self) -> usize {
        self.parses.load(Ordering::Relaxed)
    }

    /// Number of distinct texts seen.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Remove `#include` directives wherever they start on a line.
pub fn strip_includes(code: &str) -> String {
    static INCLUDE_RE: OnceLock<Regex> = OnceLock::new();
    let re = INCLUDE_RE.get_or_init(|| {
        Regex::new(r"#include[^\n]*\n?").expect("include pattern is a valid regex literal")
    });
    re.replace_all(code, "").into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::CppParser;
    use crate::tree::SyntaxNode;
    use rayon::prelude::*;

    /// Parser double that counts invocations and fabricates a tiny tree.
    struct CountingParser {
        calls: AtomicUsize,
    }

    impl SyntaxParser for CountingParser {
        fn parse(&self, source: &str) -> Result<SyntaxTree> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let children = source.lines().map(|_| SyntaxNode::new("line")).collect();
            Ok(SyntaxTree::new(
                SyntaxNode::with_children("unit", children),
                false,
            ))
        }
    }

    #[test]
    fn test_strip_includes() {
        let code = "#include <vector>\nint a;\n#include \"b.h\"\nint b;";
        assert_eq!(strip_includes(code), "int a;\nint b;");
    }

    #[test]
    fn test_identical_text_parsed_once() {
        let cache = AstCache::new(Arc::new(CppParser::new().unwrap()));
        let a = cache.build("int f() { return 1; }").unwrap();
        let b = cache.build("int f() { return 1; }").unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(cache.parse_count(), 1);
    }

    #[test]
    fn test_include_lines_do_not_change_key() {
        let cache = AstCache::new(Arc::new(CppParser::new().unwrap()));
        cache.build("#include <cstdio>\nint f() { return 1; }").unwrap();
        cache.build("int f() { return 1; }").unwrap();
        assert_eq!(cache.parse_count(), 1);
    }

    #[test]
    fn test_parser_invoked_once_per_distinct_text() {
        let parser = Arc::new(CountingParser {
            calls: AtomicUsize::new(0),
        });
        let cache = AstCache::new(parser.clone());
        let texts = ["a\n", "b\nb\n", "a\n", "a\n", "b\nb\n"];
        for text in texts {
            cache.build(text).unwrap();
        }
        assert_eq!(parser.calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_concurrent_builds_parse_once() {
        let parser = Arc::new(CountingParser {
            calls: AtomicUsize::new(0),
        });
        let cache = AstCache::new(parser.clone());
        let sizes: Vec<usize> = (0..64)
            .into_par_iter()
            .map(|i| cache.build(if i % 2 == 0 { "x\n" } else { "y\ny\n" }).unwrap().size())
            .collect();
        assert_eq!(parser.calls.load(Ordering::SeqCst), 2);
        assert!(sizes.iter().all(|&s| s == 2 || s == 3));
    }
}
