//! Hoisting: replace a node with one of its own same-named descendants.
//!
//! Pruning can only delete; deeply nested structures (blocks in blocks)
//! keep their scaffolding. Hoisting lifts an inner instance of the same
//! nonterminal over its enclosing one. The search is greedy: candidates
//! are tried left-to-right, shallowest descendant first, and every accepted
//! hoist restarts the scan on the updated mapping, exactly until no further
//! hoist is accepted. Only then is the winning mapping applied to the tree.

use std::collections::{HashMap, VecDeque};

use tracing::debug;

use crate::errors::WhittleError;
use crate::reduce::{ReduceOptions, Session};
use crate::tree::{NodeId, NodeKind, NodeState, Tree};
use crate::unparse::Unparser;

/// Try hoisting within every node of `config`; returns whether the tree
/// changed.
pub fn hoist(
    tree: &mut Tree,
    config: &[NodeId],
    session: &mut Session,
    opts: &ReduceOptions,
    prefix: &str,
) -> Result<bool, WhittleError> {
    let mut mapping: HashMap<NodeId, NodeId> = HashMap::new();
    let mut attempt = 0usize;

    'search: loop {
        if session.cancelled() {
            break;
        }
        for &node in config {
            let current = mapping.get(&node).copied().unwrap_or(node);
            for candidate in hoistable_descendants(tree, current) {
                let mut trial = mapping.clone();
                trial.insert(node, candidate);
                let text = Unparser::new()
                    .with_mapping(&trial)
                    .preserve_hidden(opts.preserve_hidden)
                    .unparse(tree);
                let label = format!("{}_h{}", prefix, attempt);
                attempt += 1;
                if session.evaluate(&[(label, text)]) == Some(0) {
                    debug!(from = %node, to = %candidate, "hoist accepted");
                    mapping = trial;
                    continue 'search;
                }
            }
        }
        break;
    }

    if mapping.is_empty() {
        return Ok(false);
    }
    for (&node, &stand_in) in &mapping {
        match tree.node(node).parent {
            Some(parent) => tree.replace_child(parent, node, stand_in),
            None => tree.set_root(stand_in),
        }
    }
    tree.check()?;
    Ok(true)
}

/// Kept rule descendants carrying the same nonterminal name, shallowest
/// first and left-to-right within a depth; the search does not descend
/// into a match.
fn hoistable_descendants(tree: &Tree, node: NodeId) -> Vec<NodeId> {
    let start = tree.node(node);
    if start.state != NodeState::Keep || start.name().is_empty() || !start.has_children() {
        return Vec::new();
    }
    let mut found = Vec::new();
    let mut queue: VecDeque<NodeId> = start.children().iter().copied().collect();
    while let Some(id) = queue.pop_front() {
        let candidate = tree.node(id);
        if candidate.state != NodeState::Keep {
            continue;
        }
        if matches!(candidate.kind, NodeKind::Rule { .. }) && candidate.name() == start.name() {
            found.push(id);
            continue;
        }
        queue.extend(candidate.children().iter().copied());
    }
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{FnOracle, Verdict};
    use crate::tree::Position;
    use crate::unparse;

    /// stmt -> block | ';' ; block -> '{' stmt* '}'. Builds the tree for
    /// "{ { ; } }" by hand (hidden whitespace omitted for brevity).
    fn nested_stmt_tree() -> Tree {
        let mut tree = Tree::with_root(
            NodeKind::Rule {
                name: "stmt".into(),
                children: vec![],
            },
            ";".into(),
        );
        let root = tree.root();
        let outer_block = push_rule(&mut tree, root, "block", "{}");
        push_token(&mut tree, outer_block, "{");
        let inner_stmt = push_rule(&mut tree, outer_block, "stmt", ";");
        push_token(&mut tree, outer_block, "}");
        let inner_block = push_rule(&mut tree, inner_stmt, "block", "{}");
        push_token(&mut tree, inner_block, "{");
        let innermost = push_rule(&mut tree, inner_block, "stmt", ";");
        push_token(&mut tree, inner_block, "}");
        push_token(&mut tree, innermost, ";");
        tree
    }

    fn push_rule(tree: &mut Tree, parent: NodeId, name: &str, replace: &str) -> NodeId {
        let id = tree.push(
            NodeKind::Rule {
                name: name.into(),
                children: vec![],
            },
            replace.into(),
            Position::default(),
            Position::default(),
        );
        tree.add_child(parent, id);
        id
    }

    fn push_token(tree: &mut Tree, parent: NodeId, text: &str) -> NodeId {
        let id = tree.push(
            NodeKind::Token {
                name: text.into(),
                text: text.into(),
            },
            text.into(),
            Position::default(),
            Position::default(),
        );
        tree.add_child(parent, id);
        id
    }

    #[test]
    fn hoists_nested_statement_to_the_top() {
        let mut tree = nested_stmt_tree();
        assert_eq!(unparse::unparse(&tree), "{{;}}");
        let oracle = FnOracle::new(|bytes: &[u8]| {
            if bytes.contains(&b';') {
                Verdict::Interesting
            } else {
                Verdict::NotInteresting
            }
        });
        let opts = ReduceOptions::default();
        let mut session = Session::new(&oracle, &opts);
        let root = tree.root();
        let changed = hoist(&mut tree, &[root], &mut session, &opts, "t").unwrap();
        assert!(changed);
        // The root's stand-in chain ends at the innermost stmt.
        assert_eq!(unparse::unparse(&tree), ";");
    }

    #[test]
    fn no_hoist_without_same_named_descendants() {
        let mut tree = Tree::with_root(
            NodeKind::Rule {
                name: "only".into(),
                children: vec![],
            },
            String::new(),
        );
        let root = tree.root();
        push_token(&mut tree, root, "x");
        let oracle = FnOracle::new(|_: &[u8]| Verdict::Interesting);
        let opts = ReduceOptions::default();
        let mut session = Session::new(&oracle, &opts);
        let changed = hoist(&mut tree, &[root], &mut session, &opts, "t").unwrap();
        assert!(!changed);
    }
}
