//! Rendering a candidate test case from the tree.
//!
//! Unparsing is a pure function of the tree shape and node states; source
//! positions are never consulted, which keeps the output reproducible after
//! structural rewrites. Kept tokens contribute their text, removed subtrees
//! contribute their minimal replacement, hidden-state nodes render as if
//! kept. Hidden-channel tokens are buffered and only flushed when they turn
//! out to sit between two contributing tokens (or always, when the caller
//! preserves the hidden channel).
//!
//! Candidate texts are rendered from *overrides* instead of tree mutation:
//! the tree is only written when DDMIN commits a winning configuration, so
//! rejected candidates can never leak state into the baseline.

use std::collections::{HashMap, HashSet};

use crate::tree::{NodeId, NodeKind, NodeState, Tree};

/// How a single render run decides node states and node identity.
#[derive(Default)]
pub struct Unparser<'a> {
    /// Nodes whose state is overridden for this candidate: members of the
    /// configuration are kept only when listed in `kept`.
    config: Option<(&'a HashSet<NodeId>, &'a HashSet<NodeId>)>,
    /// Hoisting candidate: a node maps to the descendant standing in for
    /// it, applied transitively while rendering.
    mapping: Option<&'a HashMap<NodeId, NodeId>>,
    /// Emit hidden-channel tokens unconditionally.
    preserve_hidden: bool,
}

impl<'a> Unparser<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(
        mut self,
        ids: &'a HashSet<NodeId>,
        kept: &'a HashSet<NodeId>,
    ) -> Self {
        self.config = Some((ids, kept));
        self
    }

    pub fn with_mapping(mut self, mapping: &'a HashMap<NodeId, NodeId>) -> Self {
        self.mapping = Some(mapping);
        self
    }

    pub fn preserve_hidden(mut self, preserve: bool) -> Self {
        self.preserve_hidden = preserve;
        self
    }

    pub fn unparse(&self, tree: &Tree) -> String {
        let mut emitter = Emitter {
            out: String::new(),
            pending_hidden: String::new(),
            after_token: false,
            preserve_hidden: self.preserve_hidden,
        };
        self.render(tree, tree.root(), &mut emitter);
        emitter.out
    }

    fn render(&self, tree: &Tree, id: NodeId, emitter: &mut Emitter) {
        let id = self.resolve(id);
        let node = tree.node(id);

        let state = match self.config {
            Some((ids, kept)) if ids.contains(&id) => {
                if kept.contains(&id) {
                    NodeState::Keep
                } else {
                    NodeState::Remove
                }
            }
            _ => node.state,
        };

        if state == NodeState::Remove {
            emitter.replacement(&node.replace);
            return;
        }
        match &node.kind {
            NodeKind::Token { text, .. } | NodeKind::ErrorToken { text } => {
                emitter.token(text);
            }
            NodeKind::HiddenToken { text, .. } => emitter.hidden(text),
            NodeKind::Rule { children, .. } | NodeKind::Quantifier { children } => {
                for &child in children {
                    self.render(tree, child, emitter);
                }
            }
        }
    }

    fn resolve(&self, mut id: NodeId) -> NodeId {
        if let Some(mapping) = self.mapping {
            while let Some(&next) = mapping.get(&id) {
                id = next;
            }
        }
        id
    }
}

/// Render the tree under its current states with default policies.
pub fn unparse(tree: &Tree) -> String {
    Unparser::new().unparse(tree)
}

struct Emitter {
    out: String,
    pending_hidden: String,
    /// Whether the last contribution was a token; hidden text is flushed
    /// only between two of those.
    after_token: bool,
    preserve_hidden: bool,
}

impl Emitter {
    fn token(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if self.after_token {
            self.out.push_str(&self.pending_hidden);
        }
        self.pending_hidden.clear();
        self.out.push_str(text);
        self.after_token = true;
    }

    fn hidden(&mut self, text: &str) {
        if self.preserve_hidden {
            self.token(text);
        } else {
            self.pending_hidden.push_str(text);
        }
    }

    fn replacement(&mut self, text: &str) {
        // A removed neighbor breaks the kept-token adjacency, so buffered
        // hidden text is dropped rather than glued to the replacement.
        self.pending_hidden.clear();
        self.after_token = false;
        self.out.push_str(text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{NodeKind, Position, Tree};

    fn token(tree: &mut Tree, parent: NodeId, name: &str, text: &str, replace: &str) -> NodeId {
        let id = tree.push(
            NodeKind::Token {
                name: name.into(),
                text: text.into(),
            },
            replace.into(),
            Position::default(),
            Position::default(),
        );
        tree.add_child(parent, id);
        id
    }

    fn hidden(tree: &mut Tree, parent: NodeId, text: &str) -> NodeId {
        let id = tree.push(
            NodeKind::HiddenToken {
                name: "WS".into(),
                text: text.into(),
            },
            String::new(),
            Position::default(),
            Position::default(),
        );
        tree.add_child(parent, id);
        id
    }

    fn flat_tree() -> (Tree, Vec<NodeId>) {
        let mut tree = Tree::with_root(
            NodeKind::Rule {
                name: "r".into(),
                children: vec![],
            },
            String::new(),
        );
        let root = tree.root();
        let a = token(&mut tree, root, "A", "a", "");
        hidden(&mut tree, root, " ");
        let b = token(&mut tree, root, "B", "b", "0");
        hidden(&mut tree, root, " ");
        let c = token(&mut tree, root, "C", "c", "");
        (tree, vec![a, b, c])
    }

    #[test]
    fn hidden_text_sits_between_kept_tokens() {
        let (tree, _) = flat_tree();
        assert_eq!(unparse(&tree), "a b c");
    }

    #[test]
    fn removal_contributes_replacement_and_drops_neighbors_hidden_text() {
        let (tree, ids) = flat_tree();
        let config: HashSet<NodeId> = ids.iter().copied().collect();
        let kept: HashSet<NodeId> = [ids[0], ids[2]].into();
        let out = Unparser::new().with_config(&config, &kept).unparse(&tree);
        // b is replaced by "0"; the spaces around it lose a kept neighbor.
        assert_eq!(out, "a0c");
    }

    #[test]
    fn overrides_do_not_touch_the_tree() {
        let (tree, ids) = flat_tree();
        let config: HashSet<NodeId> = ids.iter().copied().collect();
        let kept: HashSet<NodeId> = HashSet::new();
        let _ = Unparser::new().with_config(&config, &kept).unparse(&tree);
        assert_eq!(unparse(&tree), "a b c");
    }

    #[test]
    fn preserve_hidden_keeps_every_channel_token() {
        let mut tree = Tree::with_root(
            NodeKind::Rule {
                name: "r".into(),
                children: vec![],
            },
            String::new(),
        );
        let root = tree.root();
        hidden(&mut tree, root, "  ");
        token(&mut tree, root, "A", "a", "");
        let out = Unparser::new().preserve_hidden(true).unparse(&tree);
        assert_eq!(out, "  a");
        assert_eq!(unparse(&tree), "a");
    }

    #[test]
    fn unparse_is_deterministic() {
        let (tree, _) = flat_tree();
        assert_eq!(unparse(&tree), unparse(&tree));
    }
}
