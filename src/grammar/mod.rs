//! Grammar model: rule definitions, token patterns, bundles, and islands.
//!
//! A grammar is a set of named definitions. Parser rules (lowercase names)
//! combine references, inline literals, ordered alternatives, and
//! quantifiers; token rules (uppercase names) are defined by a literal or a
//! regex-like pattern and may sit on the hidden channel. The same expression
//! tree backs both, which lets the replacement computer treat rules and
//! tokens uniformly.

pub mod builder;
pub mod parser;
pub mod replacement;

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use regex::Regex;
use serde::Deserialize;

use crate::errors::WhittleError;

/// Expression tree shared by parser rules and token patterns.
#[derive(Debug, Clone, PartialEq)]
pub enum RuleExpr {
    Sequence(Vec<RuleExpr>),
    Choice(Vec<RuleExpr>),
    Optional(Box<RuleExpr>),
    Star(Box<RuleExpr>),
    Plus(Box<RuleExpr>),
    /// Reference to another definition by name.
    RuleRef(String),
    /// Literal text; in a parser rule this is an implicit anonymous token.
    Literal(String),
    /// Character class; only valid inside token patterns.
    CharClass {
        ranges: Vec<(char, char)>,
        negated: bool,
    },
    /// `.` inside a token pattern.
    AnyChar,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefKind {
    Parser,
    Token { hidden: bool },
}

/// A single named definition.
#[derive(Debug, Clone)]
pub struct RuleDef {
    pub name: String,
    pub kind: DefKind,
    pub expr: RuleExpr,
    /// Anchored matcher compiled from the token body; `None` for parser
    /// rules.
    pub matcher: Option<Regex>,
}

impl RuleDef {
    pub fn is_token(&self) -> bool {
        matches!(self.kind, DefKind::Token { .. })
    }

    pub fn is_hidden(&self) -> bool {
        matches!(self.kind, DefKind::Token { hidden: true })
    }
}

/// A named grammar: ordered definitions plus a name index.
#[derive(Debug, Clone)]
pub struct Grammar {
    pub name: String,
    defs: Vec<RuleDef>,
    index: HashMap<String, usize>,
}

impl Grammar {
    pub(crate) fn new(name: String, defs: Vec<RuleDef>) -> Result<Self, WhittleError> {
        let mut index = HashMap::new();
        for (i, def) in defs.iter().enumerate() {
            if index.insert(def.name.clone(), i).is_some() {
                return Err(WhittleError::grammar(format!(
                    "duplicate definition of '{}' in grammar '{}'",
                    def.name, name
                )));
            }
        }
        let grammar = Self { name, defs, index };
        grammar.check_references()?;
        Ok(grammar)
    }

    pub fn get(&self, name: &str) -> Option<&RuleDef> {
        self.index.get(name).map(|&i| &self.defs[i])
    }

    pub fn defs(&self) -> &[RuleDef] {
        &self.defs
    }

    pub fn hidden_tokens(&self) -> impl Iterator<Item = &RuleDef> {
        self.defs.iter().filter(|d| d.is_hidden())
    }

    /// Every referenced name must be defined, and character classes must not
    /// leak into parser rules.
    fn check_references(&self) -> Result<(), WhittleError> {
        fn walk(
            grammar: &Grammar,
            def: &RuleDef,
            expr: &RuleExpr,
        ) -> Result<(), WhittleError> {
            match expr {
                RuleExpr::Sequence(parts) | RuleExpr::Choice(parts) => {
                    for part in parts {
                        walk(grammar, def, part)?;
                    }
                }
                RuleExpr::Optional(inner) | RuleExpr::Star(inner) | RuleExpr::Plus(inner) => {
                    walk(grammar, def, inner)?;
                }
                RuleExpr::RuleRef(name) => {
                    if def.is_token() {
                        return Err(WhittleError::grammar(format!(
                            "token '{}' in grammar '{}' may not reference other rules",
                            def.name, grammar.name
                        )));
                    }
                    if grammar.get(name).is_none() {
                        return Err(WhittleError::unknown_rule(format!(
                            "{}:{}",
                            grammar.name, name
                        )));
                    }
                }
                RuleExpr::CharClass { .. } | RuleExpr::AnyChar => {
                    if !def.is_token() {
                        return Err(WhittleError::grammar(format!(
                            "rule '{}' in grammar '{}' uses a character class; \
                             classes are only valid in token patterns",
                            def.name, grammar.name
                        )));
                    }
                }
                RuleExpr::Literal(_) => {}
            }
            Ok(())
        }
        for def in &self.defs {
            walk(self, def, &def.expr)?;
        }
        Ok(())
    }
}

/// `rule` or `grammar:rule` as given on the command line or in a bundle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartRule {
    pub grammar: Option<String>,
    pub rule: String,
}

impl FromStr for StartRule {
    type Err = WhittleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(':') {
            Some((grammar, rule)) if !grammar.is_empty() && !rule.is_empty() => Ok(Self {
                grammar: Some(grammar.to_string()),
                rule: rule.to_string(),
            }),
            None if !s.is_empty() => Ok(Self {
                grammar: None,
                rule: s.to_string(),
            }),
            _ => Err(WhittleError::config(format!(
                "invalid start rule '{}'; expected 'rule' or 'grammar:rule'",
                s
            ))),
        }
    }
}

/// Island descriptor: a token whose text is searched with `pattern`; every
/// named capture group is reparsed with the start rule it maps to.
#[derive(Debug, Clone, Deserialize)]
pub struct IslandDescriptor {
    pub token: String,
    pub pattern: String,
    /// Capture-group name to `grammar:rule`.
    pub rules: HashMap<String, String>,
}

pub(crate) struct CompiledIsland {
    pub pattern: Regex,
    pub rules: HashMap<String, StartRule>,
}

/// A set of grammars with island wiring and manual replacement overrides.
pub struct GrammarBundle {
    grammars: Vec<Grammar>,
    index: HashMap<String, usize>,
    islands: HashMap<String, CompiledIsland>,
    pub overrides: HashMap<String, String>,
}

impl GrammarBundle {
    pub fn new(
        grammars: Vec<Grammar>,
        islands: Vec<IslandDescriptor>,
        overrides: HashMap<String, String>,
    ) -> Result<Self, WhittleError> {
        if grammars.is_empty() {
            return Err(WhittleError::config("a bundle needs at least one grammar"));
        }
        let mut index = HashMap::new();
        for (i, grammar) in grammars.iter().enumerate() {
            if index.insert(grammar.name.clone(), i).is_some() {
                return Err(WhittleError::config(format!(
                    "duplicate grammar name '{}'",
                    grammar.name
                )));
            }
        }
        let mut compiled = HashMap::new();
        for island in islands {
            let pattern = Regex::new(&island.pattern).map_err(|e| {
                WhittleError::config(format!(
                    "island pattern for token '{}' is not a valid regex: {}",
                    island.token, e
                ))
            })?;
            let mut rules = HashMap::new();
            for (group, target) in &island.rules {
                rules.insert(group.clone(), target.parse::<StartRule>()?);
            }
            compiled.insert(island.token.clone(), CompiledIsland { pattern, rules });
        }
        let bundle = Self {
            grammars,
            index,
            islands: compiled,
            overrides,
        };
        for island in bundle.islands.values() {
            for start in island.rules.values() {
                bundle.resolve(start)?;
            }
        }
        Ok(bundle)
    }

    /// Load grammar files and assemble a bundle. Each file contributes its
    /// definitions to the grammar named after its stem; repeated stems merge
    /// (the conventional lexer/parser file split).
    pub fn from_files(
        paths: &[impl AsRef<Path>],
        islands: Vec<IslandDescriptor>,
        overrides: HashMap<String, String>,
    ) -> Result<Self, WhittleError> {
        let mut grammars: Vec<(String, String)> = Vec::new();
        for path in paths {
            let path = path.as_ref();
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .ok_or_else(|| {
                    WhittleError::config(format!("cannot derive a grammar name from {:?}", path))
                })?
                .to_string();
            let text = std::fs::read_to_string(path)
                .map_err(|e| WhittleError::io(path.display().to_string(), &e))?;
            match grammars.iter_mut().find(|(name, _)| *name == stem) {
                Some((_, merged)) => {
                    merged.push('\n');
                    merged.push_str(&text);
                }
                None => grammars.push((stem, text)),
            }
        }
        let grammars = grammars
            .into_iter()
            .map(|(name, text)| parser::parse_grammar(&name, &text))
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(grammars, islands, overrides)
    }

    pub fn grammars(&self) -> &[Grammar] {
        &self.grammars
    }

    pub fn grammar(&self, name: &str) -> Option<&Grammar> {
        self.index.get(name).map(|&i| &self.grammars[i])
    }

    pub(crate) fn island(&self, token: &str) -> Option<&CompiledIsland> {
        self.islands.get(token)
    }

    /// Resolve a start rule to its grammar and definition. A bare rule name
    /// is looked up in the first grammar of the bundle.
    pub fn resolve(&self, start: &StartRule) -> Result<(&Grammar, &RuleDef), WhittleError> {
        let grammar = match &start.grammar {
            Some(name) => self.grammar(name).ok_or_else(|| {
                WhittleError::config(format!("bundle has no grammar named '{}'", name))
            })?,
            None => &self.grammars[0],
        };
        let def = grammar
            .get(&start.rule)
            .ok_or_else(|| WhittleError::unknown_rule(format!("{}:{}", grammar.name, start.rule)))?;
        if def.is_token() {
            return Err(WhittleError::config(format!(
                "start rule '{}' is a token, not a parser rule",
                start.rule
            )));
        }
        Ok((grammar, def))
    }
}

/// On-disk bundle descriptor: logical grammar names mapped to their grammar
/// files, plus islands, replacement overrides, and an optional default
/// start rule.
#[derive(Debug, Deserialize)]
pub struct BundleDescriptor {
    pub grammars: HashMap<String, Vec<String>>,
    #[serde(default)]
    pub start: Option<String>,
    #[serde(default)]
    pub islands: Vec<IslandDescriptor>,
    #[serde(default)]
    pub replacements: HashMap<String, String>,
}

impl BundleDescriptor {
    pub fn load(path: &Path) -> Result<Self, WhittleError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| WhittleError::io(path.display().to_string(), &e))?;
        serde_json::from_str(&text).map_err(|e| {
            WhittleError::config(format!(
                "descriptor {} is not a valid bundle: {}",
                path.display(),
                e
            ))
        })
    }

    /// Assemble the bundle; grammar files resolve relative to `base`.
    pub fn into_bundle(self, base: &Path) -> Result<GrammarBundle, WhittleError> {
        let mut names: Vec<&String> = self.grammars.keys().collect();
        names.sort();
        let mut grammars = Vec::new();
        for name in names {
            let mut text = String::new();
            for file in &self.grammars[name] {
                let path = base.join(file);
                let chunk = std::fs::read_to_string(&path)
                    .map_err(|e| WhittleError::io(path.display().to_string(), &e))?;
                text.push_str(&chunk);
                text.push('\n');
            }
            grammars.push(parser::parse_grammar(name, &text)?);
        }
        GrammarBundle::new(grammars, self.islands, self.replacements)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_rule_forms() {
        let bare: StartRule = "ini".parse().unwrap();
        assert_eq!(bare.grammar, None);
        let scoped: StartRule = "json:value".parse().unwrap();
        assert_eq!(scoped.grammar.as_deref(), Some("json"));
        assert!(":value".parse::<StartRule>().is_err());
    }

    #[test]
    fn unknown_reference_is_rejected() {
        let err = parser::parse_grammar("g", "a : b ;").unwrap_err();
        assert!(matches!(
            err.kind,
            crate::errors::ErrorKind::UnknownRule { .. }
        ));
    }
}
