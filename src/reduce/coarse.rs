//! Coarse HDD variants.
//!
//! The coarse filter narrows every configuration to nodes whose minimal
//! replacement is empty: removing anything else swaps text for a
//! replacement of similar size and cannot substantially shrink the output.
//! The filter is consulted level by level, so it naturally re-evaluates as
//! the tree shrinks across HDD* passes.

use tracing::info;

use crate::errors::WhittleError;
use crate::reduce::{hdd, hddr, ReduceOptions, Session};
use crate::tree::{NodeId, Tree};

/// Keep only nodes that vanish entirely when removed.
pub fn coarse_filter(tree: &Tree, id: NodeId) -> bool {
    tree.node(id).replace.is_empty()
}

pub fn coarse_hddmin(
    tree: &mut Tree,
    session: &mut Session,
    opts: &ReduceOptions,
) -> Result<(), WhittleError> {
    hdd::hddmin(tree, session, opts, Some(&coarse_filter))
}

pub fn coarse_hddrmin(
    tree: &mut Tree,
    session: &mut Session,
    opts: &ReduceOptions,
) -> Result<(), WhittleError> {
    hddr::hddrmin(tree, session, opts, Some(&coarse_filter))
}

/// The two-stage schedule: a cheap coarse pass strips the bulk, the full
/// algorithm finishes the job.
pub fn coarse_then_full(
    tree: &mut Tree,
    session: &mut Session,
    opts: &ReduceOptions,
) -> Result<(), WhittleError> {
    info!("coarse stage");
    coarse_hddmin(tree, session, opts)?;
    info!("full stage");
    hdd::hddmin(tree, session, opts, None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::builder::TreeBuilder;
    use crate::grammar::parser::parse_grammar;
    use crate::grammar::replacement::Replacements;
    use crate::grammar::GrammarBundle;
    use crate::oracle::{FnOracle, Verdict};
    use crate::transform;
    use crate::unparse;
    use std::collections::HashMap;

    #[test]
    fn coarse_pass_only_touches_vanishing_nodes() {
        let grammar = parse_grammar(
            "g",
            r#"
            list  : item* ;
            item  : WORD NL ;
            WORD  : /[a-z]+/ ;
            NL    : "\n" ;
            "#,
        )
        .unwrap();
        let bundle = GrammarBundle::new(vec![grammar], vec![], HashMap::new()).unwrap();
        let reps = Replacements::compute(&bundle).unwrap();
        let outcome = TreeBuilder::new(&bundle, &reps)
            .build("aaa\nkeep\nbbb\n", &"list".parse().unwrap())
            .unwrap();
        let mut tree = outcome.tree;
        let opts = ReduceOptions::default();
        transform::prepare(&mut tree, &opts).unwrap();
        let oracle = FnOracle::new(|b: &[u8]| {
            if std::str::from_utf8(b).unwrap().contains("keep") {
                Verdict::Interesting
            } else {
                Verdict::NotInteresting
            }
        });
        let mut session = Session::new(&oracle, &opts);
        coarse_hddmin(&mut tree, &mut session, &opts).unwrap();
        let out = unparse::unparse(&tree);
        // The two irrelevant items vanish; the kept word is never replaced
        // because its replacement is non-empty and thus filtered out.
        assert_eq!(out, "keep\n");
    }

    #[test]
    fn coarse_then_full_reaches_the_full_reduction() {
        let grammar = parse_grammar(
            "g",
            r#"
            pair : "(" WORD ")" tail? ;
            tail : "," WORD ;
            WORD : /[a-z]+/ ;
            "#,
        )
        .unwrap();
        let bundle = GrammarBundle::new(vec![grammar], vec![], HashMap::new()).unwrap();
        let reps = Replacements::compute(&bundle).unwrap();
        let outcome = TreeBuilder::new(&bundle, &reps)
            .build("(keep),drop", &"pair".parse().unwrap())
            .unwrap();
        let mut tree = outcome.tree;
        let opts = ReduceOptions::default();
        transform::prepare(&mut tree, &opts).unwrap();
        let oracle = FnOracle::new(|b: &[u8]| {
            if std::str::from_utf8(b).unwrap().contains("keep") {
                Verdict::Interesting
            } else {
                Verdict::NotInteresting
            }
        });
        let mut session = Session::new(&oracle, &opts);
        coarse_then_full(&mut tree, &mut session, &opts).unwrap();
        assert_eq!(unparse::unparse(&tree), "(keep)");
    }
}
