//! The HDD tree: the single mutable artifact the reducer operates on.
//!
//! Nodes live in an arena indexed by [`NodeId`]; ids are assigned in
//! pre-order at build time and stay stable across every transformation, so a
//! DDMIN configuration recorded before a rewrite remains valid after it.
//! Ownership flows root to leaves through child id lists; the parent link is
//! a plain back-reference into the arena.
//!
//! During reduction nodes are never freed. A committed reduction flips node
//! states to [`NodeState::Remove`]; rejected candidates never touch the tree
//! at all (candidate texts are rendered from state overrides, see
//! [`crate::unparse`]).

pub mod info;

use std::collections::HashSet;
use std::fmt::Write as _;

use crate::errors::WhittleError;

/// Stable index of a node in the tree arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A position in the input. Lines are 1-indexed; `column` at the end of a
/// node is the 0-indexed column after its last character. Positions are
/// advisory: the unparser never reads them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub line: usize,
    pub column: usize,
}

impl Position {
    pub fn new(line: usize, column: usize) -> Self {
        Self { line, column }
    }
}

/// Reduction state of a node.
///
/// `Keep` nodes render their own content; `Remove` nodes render their
/// minimal replacement; `Hidden` nodes render like `Keep` but are invisible
/// to the reducer (never offered to DDMIN).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    Keep,
    Remove,
    Hidden,
}

/// The node variants of the HDD tree.
#[derive(Debug, Clone)]
pub enum NodeKind {
    /// An instance of a grammar rule.
    Rule { name: String, children: Vec<NodeId> },
    /// Anonymous group of contiguous siblings that are jointly optional
    /// (introduced for quantified grammar blocks).
    Quantifier { children: Vec<NodeId> },
    /// A terminal carrying literal source text.
    Token { name: String, text: String },
    /// A terminal on a hidden channel (whitespace, comments).
    HiddenToken { name: String, text: String },
    /// A fragment the parser could not consume; preserved verbatim and
    /// never offered for removal.
    ErrorToken { text: String },
}

#[derive(Debug, Clone)]
pub struct Node {
    pub kind: NodeKind,
    pub parent: Option<NodeId>,
    pub state: NodeState,
    /// The minimal text that may substitute for this subtree.
    pub replace: String,
    pub start: Position,
    pub end: Position,
}

impl Node {
    pub fn children(&self) -> &[NodeId] {
        match &self.kind {
            NodeKind::Rule { children, .. } | NodeKind::Quantifier { children } => children,
            _ => &[],
        }
    }

    pub fn has_children(&self) -> bool {
        !self.children().is_empty()
    }

    /// Rule name, or the token's symbolic name. Quantifiers and error
    /// tokens are anonymous.
    pub fn name(&self) -> &str {
        match &self.kind {
            NodeKind::Rule { name, .. }
            | NodeKind::Token { name, .. }
            | NodeKind::HiddenToken { name, .. } => name,
            NodeKind::Quantifier { .. } | NodeKind::ErrorToken { .. } => "",
        }
    }

    pub fn token_text(&self) -> Option<&str> {
        match &self.kind {
            NodeKind::Token { text, .. }
            | NodeKind::HiddenToken { text, .. }
            | NodeKind::ErrorToken { text } => Some(text),
            _ => None,
        }
    }

    pub fn is_internal(&self) -> bool {
        matches!(
            self.kind,
            NodeKind::Rule { .. } | NodeKind::Quantifier { .. }
        )
    }
}

/// Arena-backed HDD tree with a designated root.
#[derive(Debug, Clone)]
pub struct Tree {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Tree {
    /// Create a tree whose root is the given node. The root must be a rule.
    pub fn with_root(kind: NodeKind, replace: String) -> Self {
        debug_assert!(matches!(kind, NodeKind::Rule { .. }));
        let root = Node {
            kind,
            parent: None,
            state: NodeState::Keep,
            replace,
            start: Position::default(),
            end: Position::default(),
        };
        Self {
            nodes: vec![root],
            root: NodeId(0),
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Re-root the tree at `id` (used when a transformation replaces the
    /// root wholesale). The new root must be a rule.
    pub fn set_root(&mut self, id: NodeId) {
        debug_assert!(matches!(self.node(id).kind, NodeKind::Rule { .. }));
        self.nodes[id.index()].parent = None;
        self.root = id;
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    /// Append a parentless node to the arena. The caller wires it up with
    /// [`Tree::add_child`] or [`Tree::replace_child`].
    pub fn push(&mut self, kind: NodeKind, replace: String, start: Position, end: Position) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node {
            kind,
            parent: None,
            state: NodeState::Keep,
            replace,
            start,
            end,
        });
        id
    }

    pub fn add_child(&mut self, parent: NodeId, child: NodeId) {
        self.children_mut(parent).push(child);
        self.nodes[child.index()].parent = Some(parent);
    }

    pub fn set_children(&mut self, parent: NodeId, children: Vec<NodeId>) {
        for &child in &children {
            self.nodes[child.index()].parent = Some(parent);
        }
        *self.children_mut(parent) = children;
    }

    /// Swap `old` for `new` in `parent`'s child list. `old` stays in the
    /// arena but is no longer reachable from the root.
    pub fn replace_child(&mut self, parent: NodeId, old: NodeId, new: NodeId) {
        let children = self.children_mut(parent);
        let slot = children
            .iter()
            .position(|&c| c == old)
            .expect("old node is not a child of parent");
        children[slot] = new;
        self.nodes[new.index()].parent = Some(parent);
    }

    fn children_mut(&mut self, id: NodeId) -> &mut Vec<NodeId> {
        match &mut self.nodes[id.index()].kind {
            NodeKind::Rule { children, .. } | NodeKind::Quantifier { children } => children,
            _ => panic!("node {} cannot have children", id),
        }
    }

    /// Pre-order traversal from the root, descending only through nodes in
    /// `Keep` state. This is the reducer's view of the tree: subtrees under
    /// removed or hidden nodes no longer participate in reduction.
    pub fn visit_kept(&self, mut visitor: impl FnMut(NodeId, &Node)) {
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            let node = self.node(id);
            visitor(id, node);
            if node.state == NodeState::Keep {
                for &child in node.children().iter().rev() {
                    stack.push(child);
                }
            }
        }
    }

    /// Pre-order traversal over every node reachable from the root,
    /// regardless of state. Used by structural transformations.
    pub fn visit_all(&self, mut visitor: impl FnMut(NodeId, &Node)) {
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            let node = self.node(id);
            visitor(id, node);
            for &child in node.children().iter().rev() {
                stack.push(child);
            }
        }
    }

    /// Kept nodes at the given depth below the root. Depth counting follows
    /// the reducer's view: children of non-`Keep` nodes are not reached.
    pub fn collect_level(&self, level: usize) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![(self.root, 0usize)];
        while let Some((id, depth)) = stack.pop() {
            let node = self.node(id);
            if node.state != NodeState::Keep {
                continue;
            }
            if depth == level {
                out.push(id);
                continue;
            }
            for &child in node.children().iter().rev() {
                stack.push((child, depth + 1));
            }
        }
        // The stack walk emits right-to-left levels in reverse; restore
        // syntactic order.
        out.sort_unstable();
        out
    }

    /// Commit a reduction decision: every node in `ids` is kept if it is in
    /// `kept` and removed otherwise.
    pub fn set_state(&mut self, ids: &HashSet<NodeId>, kept: &HashSet<NodeId>) {
        for &id in ids {
            let node = &mut self.nodes[id.index()];
            node.state = if kept.contains(&id) {
                NodeState::Keep
            } else {
                NodeState::Remove
            };
        }
    }

    /// Sanity check for invariants I1 through I4: the root is a rule
    /// without a parent, parent/child links agree, quantifiers are
    /// non-empty jointly-optional groups, and the unparsed output equals
    /// the leaf-order concatenation of token texts under the state
    /// policy.
    pub fn check(&self) -> Result<(), WhittleError> {
        let root = self.node(self.root);
        if !matches!(root.kind, NodeKind::Rule { .. }) {
            return Err(WhittleError::invariant("root node is not a rule"));
        }
        if root.parent.is_some() {
            return Err(WhittleError::invariant("root node has a parent"));
        }
        let mut seen = vec![false; self.nodes.len()];
        seen[self.root.index()] = true;
        let mut err = None;
        self.visit_all(|id, node| {
            if let NodeKind::Quantifier { children } = &node.kind {
                if children.is_empty() {
                    err.get_or_insert_with(|| format!("quantifier {} has no children", id));
                }
                if !node.replace.is_empty() {
                    err.get_or_insert_with(|| {
                        format!("quantifier {} is not jointly optional", id)
                    });
                }
            }
            for &child in node.children() {
                if child.index() >= self.nodes.len() {
                    err.get_or_insert_with(|| format!("dangling child id {} under {}", child, id));
                    continue;
                }
                if seen[child.index()] {
                    err.get_or_insert_with(|| format!("node {} reachable twice", child));
                }
                seen[child.index()] = true;
                if self.node(child).parent != Some(id) {
                    err.get_or_insert_with(|| {
                        format!("parent link of {} does not point to {}", child, id)
                    });
                }
            }
        });
        if let Some(message) = err {
            return Err(WhittleError::invariant(message));
        }
        if crate::unparse::unparse(self) != self.leaf_text() {
            return Err(WhittleError::invariant(
                "unparsed output diverges from leaf-order token texts",
            ));
        }
        Ok(())
    }

    /// Left-to-right leaf concatenation under the state policy; the
    /// reference the unparser is checked against.
    fn leaf_text(&self) -> String {
        let mut out = String::new();
        let mut pending_hidden = String::new();
        let mut after_token = false;
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            let node = self.node(id);
            if node.state == NodeState::Remove {
                out.push_str(&node.replace);
                pending_hidden.clear();
                after_token = false;
                continue;
            }
            match &node.kind {
                NodeKind::Token { text, .. } | NodeKind::ErrorToken { text } => {
                    if !text.is_empty() {
                        if after_token {
                            out.push_str(&pending_hidden);
                        }
                        pending_hidden.clear();
                        out.push_str(text);
                        after_token = true;
                    }
                }
                NodeKind::HiddenToken { text, .. } => pending_hidden.push_str(text),
                NodeKind::Rule { children, .. } | NodeKind::Quantifier { children } => {
                    for &child in children.iter().rev() {
                        stack.push(child);
                    }
                }
            }
        }
        out
    }

    /// Pretty-print the kept part of the tree; debugging aid.
    pub fn tree_str(&self) -> String {
        fn go(tree: &Tree, id: NodeId, depth: usize, out: &mut String) {
            let node = tree.node(id);
            let kind = match node.kind {
                NodeKind::Rule { .. } => "rule",
                NodeKind::Quantifier { .. } => "quant",
                NodeKind::Token { .. } => "token",
                NodeKind::HiddenToken { .. } => "hidden",
                NodeKind::ErrorToken { .. } => "error",
            };
            let _ = write!(out, "{}[{}:{}]", "    ".repeat(depth), node.name(), kind);
            if let Some(text) = node.token_text() {
                let _ = write!(out, "{:?}", text);
            }
            let _ = writeln!(out, "({:?})", node.replace);
            if node.state == NodeState::Keep {
                for &child in node.children() {
                    go(tree, child, depth + 1, out);
                }
            }
        }
        let mut out = String::new();
        go(self, self.root, 0, &mut out);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(tree: &mut Tree, parent: NodeId, name: &str, text: &str) -> NodeId {
        let id = tree.push(
            NodeKind::Token {
                name: name.into(),
                text: text.into(),
            },
            String::new(),
            Position::default(),
            Position::default(),
        );
        tree.add_child(parent, id);
        id
    }

    #[test]
    fn ids_are_stable_across_replace_child() {
        let mut tree = Tree::with_root(
            NodeKind::Rule {
                name: "r".into(),
                children: vec![],
            },
            String::new(),
        );
        let root = tree.root();
        let a = leaf(&mut tree, root, "A", "a");
        let b = tree.push(
            NodeKind::Token {
                name: "B".into(),
                text: "b".into(),
            },
            String::new(),
            Position::default(),
            Position::default(),
        );
        tree.replace_child(root, a, b);
        assert_eq!(tree.node(root).children(), &[b]);
        assert_eq!(tree.node(b).parent, Some(root));
        // The detached node is untouched in the arena.
        assert_eq!(tree.node(a).token_text(), Some("a"));
    }

    #[test]
    fn collect_level_skips_removed_subtrees() {
        let mut tree = Tree::with_root(
            NodeKind::Rule {
                name: "r".into(),
                children: vec![],
            },
            String::new(),
        );
        let root = tree.root();
        let inner = tree.push(
            NodeKind::Rule {
                name: "s".into(),
                children: vec![],
            },
            String::new(),
            Position::default(),
            Position::default(),
        );
        tree.add_child(root, inner);
        leaf(&mut tree, inner, "A", "a");
        let b = leaf(&mut tree, root, "B", "b");

        assert_eq!(tree.collect_level(1).len(), 2);
        tree.node_mut(inner).state = NodeState::Remove;
        assert_eq!(tree.collect_level(1), vec![b]);
        assert!(tree.collect_level(2).is_empty());
    }

    #[test]
    fn check_rejects_broken_parent_links() {
        let mut tree = Tree::with_root(
            NodeKind::Rule {
                name: "r".into(),
                children: vec![],
            },
            String::new(),
        );
        let root = tree.root();
        let a = leaf(&mut tree, root, "A", "a");
        tree.node_mut(a).parent = None;
        assert!(tree.check().is_err());
    }

    #[test]
    fn check_rejects_malformed_quantifiers() {
        let mut tree = Tree::with_root(
            NodeKind::Rule {
                name: "r".into(),
                children: vec![],
            },
            String::new(),
        );
        let root = tree.root();
        let empty = tree.push(
            NodeKind::Quantifier { children: vec![] },
            String::new(),
            Position::default(),
            Position::default(),
        );
        tree.add_child(root, empty);
        assert!(tree.check().is_err());

        let mut tree = Tree::with_root(
            NodeKind::Rule {
                name: "r".into(),
                children: vec![],
            },
            String::new(),
        );
        let root = tree.root();
        let mandatory = tree.push(
            NodeKind::Quantifier { children: vec![] },
            "x".into(),
            Position::default(),
            Position::default(),
        );
        tree.add_child(root, mandatory);
        leaf(&mut tree, mandatory, "X", "x");
        assert!(tree.check().is_err());
    }

    #[test]
    fn check_accepts_states_on_a_well_formed_tree() {
        let mut tree = Tree::with_root(
            NodeKind::Rule {
                name: "r".into(),
                children: vec![],
            },
            String::new(),
        );
        let root = tree.root();
        let group = tree.push(
            NodeKind::Quantifier { children: vec![] },
            String::new(),
            Position::default(),
            Position::default(),
        );
        tree.add_child(root, group);
        leaf(&mut tree, group, "A", "a");
        let b = leaf(&mut tree, root, "B", "b");
        tree.check().unwrap();
        tree.node_mut(b).state = NodeState::Remove;
        tree.check().unwrap();
    }
}
