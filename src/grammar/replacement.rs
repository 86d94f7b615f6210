//! Minimal replacement computation.
//!
//! For every definition the computer derives a shortest string that any
//! production of the definition can be substituted with while still
//! matching it. Lengths start unknown and only ever shrink, so iterating
//! until nothing changes reaches the least fixed point. Ties between
//! equally short alternatives resolve to the earliest alternative in
//! grammar source order: a value is also replaced by an equal-length one
//! when a tie winner resolves in a later sweep than the value it beats.
//! A sweep cap keeps equal-length re-selection from chasing reference
//! cycles forever.

use std::collections::HashMap;

use tracing::debug;

use super::{Grammar, GrammarBundle, RuleExpr};
use crate::errors::WhittleError;

/// Computed minimal replacements, keyed by grammar and definition name.
#[derive(Debug, Default)]
pub struct Replacements {
    map: HashMap<(String, String), String>,
}

impl Replacements {
    /// Compute replacements for every grammar of the bundle. Manual
    /// overrides from the bundle are taken as given and never recomputed.
    pub fn compute(bundle: &GrammarBundle) -> Result<Self, WhittleError> {
        let mut map = HashMap::new();
        for grammar in bundle.grammars() {
            compute_grammar(grammar, &bundle.overrides, &mut map)?;
        }
        Ok(Self { map })
    }

    pub fn get(&self, grammar: &str, rule: &str) -> Option<&str> {
        self.map
            .get(&(grammar.to_string(), rule.to_string()))
            .map(String::as_str)
    }

    /// Replacement for a definition that is known to exist; a miss here is
    /// a bug, not a user error.
    pub fn require(&self, grammar: &str, rule: &str) -> Result<&str, WhittleError> {
        self.get(grammar, rule).ok_or_else(|| {
            WhittleError::invariant(format!(
                "no replacement computed for {}:{}",
                grammar, rule
            ))
        })
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str, &str)> {
        self.map
            .iter()
            .map(|((g, r), rep)| (g.as_str(), r.as_str(), rep.as_str()))
    }
}

fn compute_grammar(
    grammar: &Grammar,
    overrides: &HashMap<String, String>,
    map: &mut HashMap<(String, String), String>,
) -> Result<(), WhittleError> {
    let mut rep: HashMap<&str, Option<String>> = grammar
        .defs()
        .iter()
        .map(|def| (def.name.as_str(), overrides.get(&def.name).cloned()))
        .collect();

    let sweep_cap = grammar.defs().len() * 2 + 2;
    for sweep in 0.. {
        let mut changed = false;
        for def in grammar.defs() {
            if overrides.contains_key(&def.name) {
                continue;
            }
            let Some(next) = eval(&def.expr, &rep) else {
                continue;
            };
            let current = rep.get_mut(def.name.as_str()).expect("seeded above");
            let improves = current
                .as_ref()
                .is_none_or(|c| next.len() < c.len() || (next.len() == c.len() && next != *c));
            if improves {
                *current = Some(next);
                changed = true;
            }
        }
        if !changed {
            break;
        }
        // Mutually recursive alternatives can trade equal-length values
        // indefinitely; past the cap every value is already length-minimal.
        if sweep >= sweep_cap {
            debug!(grammar = %grammar.name, "equal-length ties kept cycling; stopping");
            break;
        }
    }

    let unresolved: Vec<String> = grammar
        .defs()
        .iter()
        .filter(|def| rep[def.name.as_str()].is_none())
        .map(|def| format!("{}:{}", grammar.name, def.name))
        .collect();
    if !unresolved.is_empty() {
        return Err(WhittleError::replacement_unresolvable(unresolved));
    }

    for def in grammar.defs() {
        let value = rep[def.name.as_str()].clone().expect("checked above");
        debug!(grammar = %grammar.name, rule = %def.name, replacement = %value, "minimal replacement");
        map.insert((grammar.name.clone(), def.name.clone()), value);
    }
    Ok(())
}

/// Evaluate the replacement of an expression under the current estimates;
/// `None` when a needed sub-replacement is still unknown.
fn eval(expr: &RuleExpr, rep: &HashMap<&str, Option<String>>) -> Option<String> {
    match expr {
        RuleExpr::Literal(text) => Some(text.clone()),
        RuleExpr::AnyChar => Some("a".to_string()),
        RuleExpr::CharClass { ranges, negated } => {
            Some(class_min_char(ranges, *negated).to_string())
        }
        RuleExpr::Optional(_) | RuleExpr::Star(_) => Some(String::new()),
        RuleExpr::Plus(inner) => eval(inner, rep),
        RuleExpr::RuleRef(name) => rep.get(name.as_str()).cloned().flatten(),
        RuleExpr::Sequence(parts) => {
            let mut out = String::new();
            for part in parts {
                out.push_str(&eval(part, rep)?);
            }
            Some(out)
        }
        RuleExpr::Choice(alts) => {
            let mut best: Option<String> = None;
            for alt in alts {
                let Some(candidate) = eval(alt, rep) else {
                    continue;
                };
                let better = best.as_ref().is_none_or(|b| candidate.len() < b.len());
                if better {
                    best = Some(candidate);
                }
            }
            best
        }
    }
}

/// A deterministic shortest member of a character class: the start of the
/// first listed range, or for negated classes the first printable ASCII
/// character outside every range.
pub(crate) fn class_min_char(ranges: &[(char, char)], negated: bool) -> char {
    if !negated {
        return ranges.first().map(|&(lo, _)| lo).unwrap_or('a');
    }
    let excluded = |c: char| ranges.iter().any(|&(lo, hi)| lo <= c && c <= hi);
    (' '..='~')
        .chain('\0'..=char::MAX)
        .find(|&c| !excluded(c))
        .unwrap_or('a')
}
