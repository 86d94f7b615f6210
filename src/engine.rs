//! The end-to-end reduction pipeline.
//!
//! Wires the phases together: grammar bundle, minimal replacements, tree
//! building, structural transformations, the selected HDD variant, and the
//! final unparse. A session that fails after reduction has started still
//! reports the best baseline reached so far, alongside the error.

use tracing::{info, warn};

use crate::errors::WhittleError;
use crate::grammar::builder::TreeBuilder;
use crate::grammar::replacement::Replacements;
use crate::grammar::{GrammarBundle, StartRule};
use crate::oracle::Oracle;
use crate::reduce::{ReduceOptions, Session, Stats};
use crate::transform;
use crate::tree::info;
use crate::unparse::Unparser;

/// The result of a reduction session.
#[derive(Debug)]
pub struct Reduction {
    /// The smallest interesting text reached.
    pub output: String,
    /// The input parsed only partially; reduction ran on the partial tree.
    pub parsed_with_errors: bool,
    pub stats: Stats,
    /// A fatal error that interrupted the session after reduction had
    /// begun; `output` holds the last committed baseline.
    pub error: Option<WhittleError>,
}

/// A reusable reduction engine for one grammar bundle.
pub struct Engine {
    bundle: GrammarBundle,
    replacements: Replacements,
}

impl Engine {
    /// Analyze the bundle: compute the minimal replacement of every rule
    /// and token up front.
    pub fn new(bundle: GrammarBundle) -> Result<Self, WhittleError> {
        let replacements = Replacements::compute(&bundle)?;
        Ok(Self {
            bundle,
            replacements,
        })
    }

    pub fn replacements(&self) -> &Replacements {
        &self.replacements
    }

    /// Build and prepare the tree without reducing; used by inspection
    /// commands.
    pub fn parse(
        &self,
        input: &str,
        start: &StartRule,
        opts: &ReduceOptions,
    ) -> Result<(crate::tree::Tree, bool), WhittleError> {
        let outcome = TreeBuilder::new(&self.bundle, &self.replacements).build(input, start)?;
        let mut tree = outcome.tree;
        transform::prepare(&mut tree, opts)?;
        Ok((tree, outcome.parsed_with_errors))
    }

    /// Reduce `input` to a 1-tree-minimal interesting text.
    pub fn reduce(
        &self,
        input: &str,
        start: &StartRule,
        oracle: &dyn Oracle,
        opts: &ReduceOptions,
    ) -> Result<Reduction, WhittleError> {
        let outcome = TreeBuilder::new(&self.bundle, &self.replacements).build(input, start)?;
        if outcome.parsed_with_errors {
            warn!("input parsed with errors; unparsable fragments are pinned");
        }
        let mut tree = outcome.tree;
        transform::prepare(&mut tree, opts)?;
        info!(
            nodes = tree.len(),
            height = info::height(&tree),
            "tree prepared"
        );

        let mut session = Session::new(oracle, opts);

        // The baseline itself has to be interesting, otherwise there is
        // nothing to preserve while shrinking.
        let baseline = Unparser::new()
            .preserve_hidden(opts.preserve_hidden)
            .unparse(&tree);
        if !session
            .evaluate(&[("initial".to_string(), baseline)])
            .is_some_and(|i| i == 0)
        {
            return Err(WhittleError::config(
                "the initial input is not interesting according to the oracle",
            ));
        }

        let error = crate::reduce::run(&mut tree, &mut session, opts).err();

        let output = Unparser::new()
            .preserve_hidden(opts.preserve_hidden)
            .unparse(&tree);
        let stats = session.stats;
        info!(
            oracle_calls = stats.oracle_calls,
            cache_hits = stats.cache_hits,
            iterations = stats.iterations,
            bytes = output.len(),
            "reduction finished"
        );
        let shape = info::shape(&tree);
        info!(?shape, counts = ?info::count(&tree), "final tree");

        Ok(Reduction {
            output,
            parsed_with_errors: outcome.parsed_with_errors,
            stats,
            error,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::parser::parse_grammar;
    use crate::oracle::{FnOracle, Verdict};
    use std::collections::HashMap;

    fn ini_engine() -> Engine {
        let grammar = parse_grammar(
            "ini",
            r#"
            ini     : line* ;
            line    : section | entry | comment ;
            section : "[" NAME "]" NL ;
            entry   : NAME "=" VALUE NL ;
            comment : COMMENT NL ;
            NAME    : /[A-Za-z_][A-Za-z0-9_]*/ ;
            VALUE   : /[^\n]+/ ;
            COMMENT : /;[^\n]*/ ;
            NL      : "\n" ;
            "#,
        )
        .unwrap();
        let bundle = GrammarBundle::new(vec![grammar], vec![], HashMap::new()).unwrap();
        Engine::new(bundle).unwrap()
    }

    #[test]
    fn uninteresting_input_is_a_configuration_error() {
        let engine = ini_engine();
        let oracle = FnOracle::new(|_: &[u8]| Verdict::NotInteresting);
        let err = engine
            .reduce(
                "k=v\n",
                &"ini".parse().unwrap(),
                &oracle,
                &ReduceOptions::default(),
            )
            .unwrap_err();
        assert!(matches!(err.kind, crate::errors::ErrorKind::Config { .. }));
    }

    #[test]
    fn reduces_and_reports_statistics() {
        let engine = ini_engine();
        let oracle = FnOracle::new(|b: &[u8]| {
            if std::str::from_utf8(b).unwrap().contains("k=v") {
                Verdict::Interesting
            } else {
                Verdict::NotInteresting
            }
        });
        let reduction = engine
            .reduce(
                "[s]\nk=v\n; bye\n",
                &"ini".parse().unwrap(),
                &oracle,
                &ReduceOptions::default(),
            )
            .unwrap();
        assert!(reduction.error.is_none());
        assert!(reduction.output.contains("k=v"));
        assert!(reduction.output.len() < "[s]\nk=v\n; bye\n".len());
        assert!(reduction.stats.oracle_calls > 0);
    }
}
