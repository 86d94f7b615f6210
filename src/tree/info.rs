//! Statistics over the kept part of a tree, logged between reduction phases.

use std::collections::BTreeMap;

use super::{NodeKind, NodeState, Tree};

/// Node counts by kind, considering only nodes reachable through kept
/// parents.
pub fn count(tree: &Tree) -> BTreeMap<&'static str, usize> {
    let mut stats = BTreeMap::new();
    tree.visit_kept(|_, node| {
        if node.state != NodeState::Keep {
            return;
        }
        let kind = match node.kind {
            NodeKind::Rule { .. } => "rule",
            NodeKind::Quantifier { .. } => "quantifier",
            NodeKind::Token { .. } => "token",
            NodeKind::HiddenToken { .. } => "hidden-token",
            NodeKind::ErrorToken { .. } => "error-token",
        };
        *stats.entry(kind).or_insert(0) += 1;
    });
    stats
}

/// Height of the kept tree.
pub fn height(tree: &Tree) -> usize {
    let mut max = 0;
    depth_walk(tree, |depth| max = max.max(depth + 1));
    max
}

/// Number of kept nodes on each level.
pub fn shape(tree: &Tree) -> Vec<usize> {
    let mut sizes = Vec::new();
    depth_walk(tree, |depth| {
        if sizes.len() <= depth {
            sizes.resize(depth + 1, 0);
        }
        sizes[depth] += 1;
    });
    sizes
}

fn depth_walk(tree: &Tree, mut f: impl FnMut(usize)) {
    let mut stack = vec![(tree.root(), 0usize)];
    while let Some((id, depth)) = stack.pop() {
        let node = tree.node(id);
        if node.state != NodeState::Keep {
            continue;
        }
        f(depth);
        for &child in node.children() {
            stack.push((child, depth + 1));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{NodeKind, Position};

    #[test]
    fn shape_counts_levels() {
        let mut tree = Tree::with_root(
            NodeKind::Rule {
                name: "r".into(),
                children: vec![],
            },
            String::new(),
        );
        let root = tree.root();
        for text in ["a", "b"] {
            let id = tree.push(
                NodeKind::Token {
                    name: "T".into(),
                    text: text.into(),
                },
                String::new(),
                Position::default(),
                Position::default(),
            );
            tree.add_child(root, id);
        }
        assert_eq!(shape(&tree), vec![1, 2]);
        assert_eq!(height(&tree), 2);
        assert_eq!(count(&tree).get("token"), Some(&2));
    }
}
