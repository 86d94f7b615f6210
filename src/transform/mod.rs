//! Structural tree transformations that run before reduction.
//!
//! Each transformation preserves the unparsed output and node ids; they
//! only reshape the tree (or hide nodes) so the HDD loop wastes fewer
//! oracle calls. All of them are idempotent and compose in the order
//! applied by [`prepare`].

use crate::errors::WhittleError;
use crate::reduce::ReduceOptions;
use crate::tree::{NodeId, NodeKind, NodeState, Tree};

/// The standard pipeline: drop empty nodes, flatten recursion, squeeze
/// unary chains, hide unremovable nodes, and (when hidden tokens join the
/// reduction) hide pure whitespace. Ends with an invariant check.
pub fn prepare(tree: &mut Tree, opts: &ReduceOptions) -> Result<(), WhittleError> {
    remove_empty_nodes(tree);
    if opts.flatten {
        flatten_recursion(tree);
    }
    if opts.squeeze {
        squeeze_tree(tree);
    }
    if opts.hide_unremovable {
        hide_unremovable(tree);
    }
    if opts.reduce_hidden {
        skip_whitespace(tree);
    }
    tree.check()
}

/// Delete nodes that cannot contribute to the output at all: tokens with
/// empty text (the EOF kind) and internal nodes left without children.
pub fn remove_empty_nodes(tree: &mut Tree) {
    prune_empty(tree, tree.root());
}

fn prune_empty(tree: &mut Tree, id: NodeId) -> bool {
    let node = tree.node(id);
    if !node.is_internal() {
        return node.token_text().is_some_and(|t| !t.is_empty());
    }
    let children = node.children().to_vec();
    let kept: Vec<NodeId> = children
        .into_iter()
        .filter(|&child| prune_empty(tree, child))
        .collect();
    let non_empty = !kept.is_empty();
    tree.set_children(id, kept);
    non_empty || id == tree.root()
}

/// Rewrite left- or right-recursive chains `R(R(R(…, X), Y), Z)` into one
/// wide rule node, grouping each unrolled tail in an anonymous quantifier
/// so the repetition becomes individually removable.
pub fn flatten_recursion(tree: &mut Tree) {
    flatten(tree, tree.root());
}

fn flatten(tree: &mut Tree, id: NodeId) {
    for child in tree.node(id).children().to_vec() {
        flatten(tree, child);
    }
    let node = tree.node(id);
    if node.state != NodeState::Keep {
        return;
    }
    let NodeKind::Rule { name, .. } = &node.kind else {
        return;
    };
    let name = name.clone();
    let children = node.children().to_vec();

    if children.len() > 1 {
        if same_rule(tree, children[0], &name) {
            let left = children[0];
            let rest = children[1..].to_vec();
            let group = wrap_group(tree, rest);
            let mut merged = tree.node(left).children().to_vec();
            merged.push(group);
            tree.set_children(id, merged);
        } else if same_rule(tree, *children.last().expect("checked len"), &name) {
            let right = *children.last().expect("checked len");
            let rest = children[..children.len() - 1].to_vec();
            let group = wrap_group(tree, rest);
            let mut merged = vec![group];
            merged.extend(tree.node(right).children().iter().copied());
            tree.set_children(id, merged);
        }
    }

    // A one-step chain (typically the residue of a parse error) is lifted
    // directly, because flattening will not run again later.
    let children = tree.node(id).children().to_vec();
    if children.len() == 1 && same_rule(tree, children[0], &name) {
        let grandchildren = tree.node(children[0]).children().to_vec();
        tree.set_children(id, grandchildren);
    }
}

fn same_rule(tree: &Tree, id: NodeId, name: &str) -> bool {
    matches!(&tree.node(id).kind, NodeKind::Rule { name: n, .. } if n == name)
}

fn wrap_group(tree: &mut Tree, children: Vec<NodeId>) -> NodeId {
    let start = tree.node(*children.first().expect("group is never empty")).start;
    let end = tree.node(*children.last().expect("group is never empty")).end;
    let group = tree.push(
        NodeKind::Quantifier {
            children: Vec::new(),
        },
        String::new(),
        start,
        end,
    );
    tree.set_children(group, children);
    group
}

/// Collapse unary chains whose links share one minimal replacement; such
/// chains are indistinguishable to the reducer and only multiply DDMIN
/// runs. The innermost node survives.
pub fn squeeze_tree(tree: &mut Tree) {
    let root = tree.root();
    let squeezed = squeeze(tree, root);
    if squeezed != root && matches!(tree.node(squeezed).kind, NodeKind::Rule { .. }) {
        tree.set_root(squeezed);
    }
}

fn squeeze(tree: &mut Tree, id: NodeId) -> NodeId {
    for child in tree.node(id).children().to_vec() {
        let squeezed = squeeze(tree, child);
        if squeezed != child {
            tree.replace_child(id, child, squeezed);
        }
    }
    let node = tree.node(id);
    if node.is_internal() {
        let children = node.children();
        if children.len() == 1 && tree.node(children[0]).replace == node.replace {
            return children[0];
        }
    }
    id
}

/// Hide nodes whose rendered text already equals their replacement:
/// removing them cannot shrink the output, so offering them to DDMIN only
/// costs oracle runs.
pub fn hide_unremovable(tree: &mut Tree) {
    hide(tree, tree.root());
}

fn hide(tree: &mut Tree, id: NodeId) {
    for child in tree.node(id).children().to_vec() {
        hide(tree, child);
    }
    let node = tree.node(id);
    if node.state == NodeState::Keep && subtree_text(tree, id) == node.replace {
        tree.node_mut(id).state = NodeState::Hidden;
    }
}

/// Hide whitespace-only tokens; useful when hidden-channel tokens join the
/// reducible set and only the non-whitespace ones are worth testing.
pub fn skip_whitespace(tree: &mut Tree) {
    let mut whitespace = Vec::new();
    tree.visit_all(|id, node| {
        if let Some(text) = node.token_text() {
            if !text.is_empty() && text.chars().all(char::is_whitespace) {
                whitespace.push(id);
            }
        }
    });
    for id in whitespace {
        tree.node_mut(id).state = NodeState::Hidden;
    }
}

/// The text a subtree renders in place, honoring committed removals.
fn subtree_text(tree: &Tree, id: NodeId) -> String {
    let node = tree.node(id);
    if node.state == NodeState::Remove {
        return node.replace.clone();
    }
    match &node.kind {
        NodeKind::Token { text, .. }
        | NodeKind::HiddenToken { text, .. }
        | NodeKind::ErrorToken { text } => text.clone(),
        NodeKind::Rule { children, .. } | NodeKind::Quantifier { children } => children
            .iter()
            .map(|&child| subtree_text(tree, child))
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::builder::TreeBuilder;
    use crate::grammar::parser::parse_grammar;
    use crate::grammar::replacement::Replacements;
    use crate::grammar::GrammarBundle;
    use crate::unparse;
    use std::collections::HashMap;

    fn build(grammar: &str, start: &str, input: &str) -> Tree {
        let grammar = parse_grammar("g", grammar).unwrap();
        let bundle = GrammarBundle::new(vec![grammar], vec![], HashMap::new()).unwrap();
        let reps = Replacements::compute(&bundle).unwrap();
        TreeBuilder::new(&bundle, &reps)
            .build(input, &start.parse().unwrap())
            .unwrap()
            .tree
    }

    const EXPR: &str = r#"
        e : e "+" t | t ;
        t : INT ;
        INT : /[0-9]+/ ;
    "#;

    #[test]
    fn flattening_widens_a_recursive_chain() {
        let mut tree = build(EXPR, "e", "1+2+3");
        let before = unparse::unparse(&tree);
        flatten_recursion(&mut tree);
        tree.check().unwrap();
        assert_eq!(unparse::unparse(&tree), before);
        let root = tree.node(tree.root());
        // t, (+2), (+3): the spine is gone.
        assert_eq!(root.children().len(), 3);
        assert!(root
            .children()
            .iter()
            .skip(1)
            .all(|&c| matches!(tree.node(c).kind, NodeKind::Quantifier { .. })));
    }

    #[test]
    fn flattening_is_idempotent() {
        let mut tree = build(EXPR, "e", "1+2+3");
        flatten_recursion(&mut tree);
        let widened = tree.tree_str();
        flatten_recursion(&mut tree);
        assert_eq!(tree.tree_str(), widened);
    }

    #[test]
    fn squeeze_collapses_unary_chains() {
        // wrap : inner ; inner : X ; both links share the replacement of X.
        let mut tree = build(
            r#"
            wrap : inner ;
            inner : X ;
            X : "x" ;
            "#,
            "wrap",
            "x",
        );
        let depth_before = crate::tree::info::height(&tree);
        squeeze_tree(&mut tree);
        tree.check().unwrap();
        assert!(crate::tree::info::height(&tree) < depth_before);
        assert_eq!(unparse::unparse(&tree), "x");
        // The chain collapsed onto its innermost link, the token itself.
        let root = tree.node(tree.root());
        assert_eq!(root.children().len(), 1);
        assert!(tree.node(root.children()[0]).token_text().is_some());
    }

    #[test]
    fn hide_unremovable_takes_fixed_tokens_out_of_play() {
        let mut tree = build(
            r#"
            entry : NAME "=" VALUE ;
            NAME  : /[a-z]+/ ;
            VALUE : /[0-9]+/ ;
            "#,
            "entry",
            "k=42",
        );
        hide_unremovable(&mut tree);
        let mut hidden_texts = Vec::new();
        tree.visit_all(|_, node| {
            if node.state == NodeState::Hidden {
                if let Some(text) = node.token_text() {
                    hidden_texts.push(text.to_string());
                }
            }
        });
        assert_eq!(hidden_texts, vec!["=".to_string()]);
        assert_eq!(unparse::unparse(&tree), "k=42");
    }

    #[test]
    fn remove_empty_nodes_drops_vanishing_rules() {
        let mut tree = build(
            r#"
            s : blank WORD ;
            blank : WS? ;
            WORD : /[a-z]+/ ;
            WS : " " ;
            "#,
            "s",
            "abc",
        );
        remove_empty_nodes(&mut tree);
        tree.check().unwrap();
        // `blank` matched nothing and is gone entirely.
        let root = tree.node(tree.root());
        assert_eq!(root.children().len(), 1);
        assert_eq!(unparse::unparse(&tree), "abc");
    }

    #[test]
    fn skip_whitespace_hides_space_tokens() {
        let mut tree = build(
            r#"
            pair : WORD WORD ;
            WORD : /[a-z]+/ ;
            hidden WS : /[ ]+/ ;
            "#,
            "pair",
            "a b",
        );
        skip_whitespace(&mut tree);
        let mut states = Vec::new();
        tree.visit_all(|_, node| {
            if matches!(node.kind, NodeKind::HiddenToken { .. }) {
                states.push(node.state);
            }
        });
        assert_eq!(states, vec![NodeState::Hidden]);
    }
}
