//! Pruning: reduce a set of sibling-or-level nodes with DDMIN.
//!
//! The DDMIN bridge lives here: a candidate (a subset of kept ids) is
//! rendered to text through state overrides and judged by the session.
//! Only the winning configuration is committed to the tree.

use std::collections::HashSet;

use crate::dd::{ddmin_with_empty, Candidate, CandidateTester, DdOptions};
use crate::errors::WhittleError;
use crate::reduce::{ReduceOptions, Session};
use crate::tree::{NodeId, Tree};
use crate::unparse::Unparser;

struct ConfigTester<'a, 'o> {
    tree: &'a Tree,
    ids: &'a HashSet<NodeId>,
    session: &'a mut Session<'o>,
    preserve_hidden: bool,
    prefix: &'a str,
}

impl CandidateTester for ConfigTester<'_, '_> {
    fn first_interesting(&mut self, candidates: &[Candidate]) -> Option<usize> {
        let texts: Vec<(String, String)> = candidates
            .iter()
            .map(|candidate| {
                let kept: HashSet<NodeId> = candidate.kept.iter().copied().collect();
                let text = Unparser::new()
                    .with_config(self.ids, &kept)
                    .preserve_hidden(self.preserve_hidden)
                    .unparse(self.tree);
                (format!("{}_{}", self.prefix, candidate.label), text)
            })
            .collect();
        self.session.evaluate(&texts)
    }

    fn cancelled(&self) -> bool {
        self.session.cancelled()
    }
}

/// Prune `config` to a 1-minimal kept set and commit it. Returns whether
/// the tree changed.
pub fn prune(
    tree: &mut Tree,
    config: &[NodeId],
    session: &mut Session,
    opts: &ReduceOptions,
    prefix: &str,
) -> Result<bool, WhittleError> {
    if config.is_empty() {
        return Ok(false);
    }
    let ids: HashSet<NodeId> = config.iter().copied().collect();
    let kept = {
        let mut tester = ConfigTester {
            tree,
            ids: &ids,
            session,
            preserve_hidden: opts.preserve_hidden,
            prefix,
        };
        ddmin_with_empty(
            config,
            &DdOptions {
                granularity: opts.granularity,
            },
            &mut tester,
        )
    };
    let kept: HashSet<NodeId> = kept.into_iter().collect();
    let changed = kept.len() < ids.len();
    tree.set_state(&ids, &kept);
    Ok(changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{FnOracle, Verdict};
    use crate::tree::{NodeKind, NodeState, Position};
    use crate::unparse;

    fn line_tree(lines: &[&str]) -> (Tree, Vec<NodeId>) {
        let mut tree = Tree::with_root(
            NodeKind::Rule {
                name: "file".into(),
                children: vec![],
            },
            String::new(),
        );
        let root = tree.root();
        let mut ids = Vec::new();
        for (i, line) in lines.iter().enumerate() {
            let id = tree.push(
                NodeKind::Token {
                    name: format!("L{}", i),
                    text: format!("{}\n", line),
                },
                String::new(),
                Position::default(),
                Position::default(),
            );
            tree.add_child(root, id);
            ids.push(id);
        }
        (tree, ids)
    }

    #[test]
    fn prune_commits_the_minimal_kept_set() {
        let (mut tree, ids) = line_tree(&["a", "keep", "b", "c"]);
        let oracle = FnOracle::new(|bytes: &[u8]| {
            if std::str::from_utf8(bytes).unwrap().contains("keep") {
                Verdict::Interesting
            } else {
                Verdict::NotInteresting
            }
        });
        let opts = ReduceOptions::default();
        let mut session = Session::new(&oracle, &opts);
        let changed = prune(&mut tree, &ids, &mut session, &opts, "t").unwrap();
        assert!(changed);
        assert_eq!(unparse::unparse(&tree), "keep\n");
        assert_eq!(tree.node(ids[1]).state, NodeState::Keep);
        assert_eq!(tree.node(ids[0]).state, NodeState::Remove);
    }

    #[test]
    fn prune_keeps_everything_when_nothing_is_removable() {
        let (mut tree, ids) = line_tree(&["a", "b"]);
        let original = unparse::unparse(&tree);
        let expected = original.clone();
        let oracle = FnOracle::new(move |bytes: &[u8]| {
            if bytes == expected.as_bytes() {
                Verdict::Interesting
            } else {
                Verdict::NotInteresting
            }
        });
        let opts = ReduceOptions::default();
        let mut session = Session::new(&oracle, &opts);
        let changed = prune(&mut tree, &ids, &mut session, &opts, "t").unwrap();
        assert!(!changed);
        assert_eq!(unparse::unparse(&tree), original);
    }
}
