//! Ordered tree edit distance (Zhang–Shasha)
//!
//! Unit costs for insert, delete and relabel; labels are node kinds. Runs in
//! O(n1 * n2) memory and O(n1 * n2 * min(depth, leaves)^2) time, which is
//! fine for function-sized trees. Whole files use the cheaper line diff in
//! [`crate::similarity`].

use crate::tree::SyntaxNode;

/// Postorder view of a tree: labels, leftmost-leaf descendants and keyroots.
struct Postorder<'a> {
    labels: Vec<&'a str>,
    leftmost: Vec<usize>,
    keyroots: Vec<usize>,
}

impl<'a> Postorder<'a> {
    fn new(root: &'a SyntaxNode) -> Self {
        let mut labels = Vec::new();
        let mut leftmost = Vec::new();

        // (node, next child to visit, leftmost leaf reported by first child)
        let mut stack: Vec<(&'a SyntaxNode, usize, Option<usize>)> = vec![(root, 0, None)];
        while let Some(top) = stack.last_mut() {
            if top.1 < top.0.children.len() {
                let child = &top.0.children[top.1];
                top.1 += 1;
                stack.push((child, 0, None));
                continue;
            }
            let Some((node, _, first_leaf)) = stack.pop() else {
                break;
            };
            let index = labels.len();
            let leaf = first_leaf.unwrap_or(index);
            labels.push(node.kind.as_str());
            leftmost.push(leaf);
            if let Some(parent) = stack.last_mut() {
                parent.2.get_or_insert(leaf);
            }
        }

        // A keyroot is the highest node sharing its leftmost leaf
        let mut seen = vec![false; labels.len()];
        let mut keyroots = Vec::new();
        for i in (0..labels.len()).rev() {
            if !seen[leftmost[i]] {
                seen[leftmost[i]] = true;
                keyroots.push(i);
            }
        }
        keyroots.reverse();

        Postorder {
            labels,
            leftmost,
            keyroots,
        }
    }

    fn len(&self) -> usize {
        self.labels.len()
    }
}

/// Minimum number of node insertions, deletions and relabelings turning
/// `a` into `b`.
pub fn tree_edit_distance(a: &SyntaxNode, b: &SyntaxNode) -> usize {
    let t1 = Postorder::new(a);
    let t2 = Postorder::new(b);
    let (n1, n2) = (t1.len(), t2.len());

    // treedist[i * n2 + j]: distance between subtrees rooted at i and j
    let mut treedist = vec![0usize; n1 * n2];
    // Scratch forest-distance table, sized for the largest keyroot pair
    let mut forest = vec![0usize; (n1 + 1) * (n2 + 1)];

    for &i in &t1.keyroots {
        for &j in &t2.keyroots {
            forest_distance(&t1, &t2, i, j, &mut treedist, &mut forest);
        }
    }

    treedist[(n1 - 1) * n2 + (n2 - 1)]
}

fn forest_distance(
    t1: &Postorder<'_>,
    t2: &Postorder<'_>,
    i: usize,
    j: usize,
    treedist: &mut [usize],
    forest: &mut [usize],
) {
    let n2 = t2.len();
    let li = t1.leftmost[i];
    let lj = t2.leftmost[j];
    let rows = i - li + 2;
    let cols = j - lj + 2;
    let at = |x: usize, y: usize| x * cols + y;

    forest[at(0, 0)] = 0;
    for x in 1..rows {
        forest[at(x, 0)] = forest[at(x - 1, 0)] + 1;
    }
    for y in 1..cols {
        forest[at(0, y)] = forest[at(0, y - 1)] + 1;
    }

    for x in 1..rows {
        for y in 1..cols {
            let i1 = li + x - 1;
            let j1 = lj + y - 1;
            let delete = forest[at(x - 1, y)] + 1;
            let insert = forest[at(x, y - 1)] + 1;

            if t1.leftmost[i1] == li && t2.leftmost[j1] == lj {
                // Both prefixes are whole trees
                let relabel = usize::from(t1.labels[i1] != t2.labels[j1]);
                let cost = delete.min(insert).min(forest[at(x - 1, y - 1)] + relabel);
                forest[at(x, y)] = cost;
                treedist[i1 * n2 + j1] = cost;
            } else {
                let p = t1.leftmost[i1] - li;
                let q = t2.leftmost[j1] - lj;
                let subtree = forest[at(p, q)] + treedist[i1 * n2 + j1];
                forest[at(x, y)] = delete.min(insert).min(subtree);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(kind: &str, children: Vec<SyntaxNode>) -> SyntaxNode {
        SyntaxNode::with_children(kind, children)
    }

    fn leaf(kind: &str) -> SyntaxNode {
        SyntaxNode::new(kind)
    }

    #[test]
    fn test_identical_trees_have_zero_distance() {
        let t = n("f", vec![n("d", vec![leaf("a"), leaf("b")]), leaf("e")]);
        assert_eq!(tree_edit_distance(&t, &t.clone()), 0);
    }

    #[test]
    fn test_single_relabel() {
        let a = n("f", vec![leaf("a"), leaf("b")]);
        let b = n("f", vec![leaf("a"), leaf("c")]);
        assert_eq!(tree_edit_distance(&a, &b), 1);
    }

    #[test]
    fn test_single_insert_and_delete() {
        let a = n("f", vec![leaf("a")]);
        let b = n("f", vec![leaf("a"), leaf("b")]);
        assert_eq!(tree_edit_distance(&a, &b), 1);
        assert_eq!(tree_edit_distance(&b, &a), 1);
    }

    #[test]
    fn test_classic_reparenting_example() {
        // f(d(a, c(b)), e) -> f(c(d(a, b)), e)
        let a = n(
            "f",
            vec![n("d", vec![leaf("a"), n("c", vec![leaf("b")])]), leaf("e")],
        );
        let b = n(
            "f",
            vec![n("c", vec![n("d", vec![leaf("a"), leaf("b")])]), leaf("e")],
        );
        assert_eq!(tree_edit_distance(&a, &b), 2);
    }

    #[test]
    fn test_distance_bounded_by_sizes() {
        let a = n("x", vec![leaf("y"), leaf("z")]);
        let b = n("p", vec![n("q", vec![leaf("r"), leaf("s")])]);
        let d = tree_edit_distance(&a, &b);
        // Relabel every node of the smaller tree, insert the rest
        assert!(d <= 4);
        assert!(d >= 1);
    }

    #[test]
    fn test_leaf_versus_leaf() {
        assert_eq!(tree_edit_distance(&leaf("a"), &leaf("a")), 0);
        assert_eq!(tree_edit_distance(&leaf("a"), &leaf("b")), 1);
    }
}
