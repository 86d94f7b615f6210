//! Building the initial HDD tree from an input.
//!
//! The builder interprets parser rules PEG-style over the input text:
//! alternatives are ordered, tokens match anchored at the cursor, hidden
//! tokens are consumed before every token match and recorded as
//! hidden-channel leaves. Quantified sub-matches are wrapped in anonymous
//! quantifier nodes so a whole optional region can be removed as one unit.
//!
//! Directly left-recursive rules are parsed seed-and-grow: the base
//! alternative is matched first, then recursive tails are folded around it,
//! which reproduces the nested chain shape the grammar describes; the chain
//! is widened later by recursion flattening.
//!
//! Parsing happens into lightweight staging nodes first; the finished shape
//! is committed to the arena in one pre-order pass, which is what gives
//! nodes their stable pre-order ids.

use std::collections::HashSet;

use tracing::{debug, warn};

use super::replacement::Replacements;
use super::{CompiledIsland, Grammar, GrammarBundle, RuleExpr, StartRule};
use crate::errors::WhittleError;
use crate::tree::{NodeKind, Position, Tree};

/// The built tree plus a flag for inputs that only parsed partially (the
/// unconsumed tail is preserved in an error token).
#[derive(Debug)]
pub struct BuildOutcome {
    pub tree: Tree,
    pub parsed_with_errors: bool,
}

pub struct TreeBuilder<'a> {
    bundle: &'a GrammarBundle,
    reps: &'a Replacements,
}

impl<'a> TreeBuilder<'a> {
    pub fn new(bundle: &'a GrammarBundle, reps: &'a Replacements) -> Self {
        Self { bundle, reps }
    }

    pub fn build(&self, input: &str, start: &StartRule) -> Result<BuildOutcome, WhittleError> {
        let (grammar, def) = self.bundle.resolve(start)?;
        let mut parser = RuleParser {
            bundle: self.bundle,
            grammar,
            reps: self.reps,
            src: input,
            active: HashSet::new(),
        };
        let cursor = Cursor::origin();
        let Some((mut root, mut cursor)) = parser.parse_rule(&def.name, cursor)? else {
            return Err(WhittleError::parse_failed(format!(
                "input does not match rule '{}:{}'",
                grammar.name, def.name
            )));
        };

        // Trailing hidden-channel text still belongs to the tree.
        let BNode::Rule { children, end, .. } = &mut root else {
            unreachable!("start symbol builds a rule node");
        };
        cursor = parser.skip_hidden(cursor, children);
        let mut parsed_with_errors = false;
        if cursor.pos < input.len() {
            let tail = &input[cursor.pos..];
            warn!(
                offset = cursor.pos,
                "input only parsed partially; keeping the tail as an error token"
            );
            let tail_end = cursor.advanced(tail);
            children.push(BNode::Error {
                text: tail.to_string(),
                start: cursor.position(),
                end: tail_end.position(),
            });
            *end = tail_end.position();
            parsed_with_errors = true;
        }

        let tree = commit(root);
        tree.check()?;
        debug!(nodes = tree.len(), "built HDD tree");
        Ok(BuildOutcome {
            tree,
            parsed_with_errors,
        })
    }
}

/// Staging node; committed to the arena in pre-order once parsing is done.
enum BNode {
    Rule {
        name: String,
        replace: String,
        children: Vec<BNode>,
        start: Position,
        end: Position,
    },
    Quantifier {
        children: Vec<BNode>,
        start: Position,
        end: Position,
    },
    Token {
        name: String,
        text: String,
        replace: String,
        hidden: bool,
        start: Position,
        end: Position,
    },
    Error {
        text: String,
        start: Position,
        end: Position,
    },
}

/// Input position; cheap to save and restore for backtracking.
#[derive(Debug, Clone, Copy)]
struct Cursor {
    pos: usize,
    line: usize,
    col: usize,
}

impl Cursor {
    fn origin() -> Self {
        Self {
            pos: 0,
            line: 1,
            col: 0,
        }
    }

    fn position(self) -> Position {
        Position::new(self.line, self.col)
    }

    /// The cursor after consuming `text`.
    fn advanced(self, text: &str) -> Self {
        let mut line = self.line;
        let mut col = self.col;
        for c in text.chars() {
            if c == '\n' {
                line += 1;
                col = 0;
            } else {
                col += 1;
            }
        }
        Self {
            pos: self.pos + text.len(),
            line,
            col,
        }
    }
}

struct RuleParser<'a> {
    bundle: &'a GrammarBundle,
    grammar: &'a Grammar,
    reps: &'a Replacements,
    src: &'a str,
    /// (rule, offset) pairs currently being expanded; guards against
    /// unbounded indirect recursion that consumes no input.
    active: HashSet<(String, usize)>,
}

type ParseResult<T> = Result<Option<T>, WhittleError>;

impl<'a> RuleParser<'a> {
    fn parse_rule(&mut self, name: &str, cursor: Cursor) -> ParseResult<(BNode, Cursor)> {
        let def = self
            .grammar
            .get(name)
            .ok_or_else(|| WhittleError::unknown_rule(format!("{}:{}", self.grammar.name, name)))?;
        let alternatives: Vec<&RuleExpr> = match &def.expr {
            RuleExpr::Choice(alts) => alts.iter().collect(),
            other => vec![other],
        };

        let key = (name.to_string(), cursor.pos);
        if !self.active.insert(key.clone()) {
            return Ok(None);
        }
        let seeded = self.parse_seed(name, &alternatives, cursor);
        self.active.remove(&key);
        let Some((mut node, mut cursor)) = seeded? else {
            return Ok(None);
        };

        // Grow directly left-recursive tails around the seed, rebuilding
        // the nested chain the grammar would produce.
        'grow: loop {
            for alt in &alternatives {
                let Some(tail) = left_recursive_tail(alt, name) else {
                    continue;
                };
                let mut children = Vec::new();
                let Some(next) = self.parse_parts(tail, cursor, &mut children)? else {
                    continue;
                };
                if next.pos == cursor.pos {
                    // An empty tail would unroll forever.
                    continue;
                }
                let start = node_start(&node);
                let mut all = Vec::with_capacity(children.len() + 1);
                all.push(node);
                all.append(&mut children);
                node = BNode::Rule {
                    name: name.to_string(),
                    replace: self.reps.require(&self.grammar.name, name)?.to_string(),
                    children: all,
                    start,
                    end: next.position(),
                };
                cursor = next;
                continue 'grow;
            }
            break;
        }
        Ok(Some((node, cursor)))
    }

    /// Match the first non-left-recursive alternative, in source order.
    fn parse_seed(
        &mut self,
        name: &str,
        alternatives: &[&RuleExpr],
        cursor: Cursor,
    ) -> ParseResult<(BNode, Cursor)> {
        for alt in alternatives {
            if left_recursive_tail(alt, name).is_some() {
                continue;
            }
            let mut children = Vec::new();
            if let Some(next) = self.parse_expr(alt, cursor, &mut children)? {
                let node = BNode::Rule {
                    name: name.to_string(),
                    replace: self.reps.require(&self.grammar.name, name)?.to_string(),
                    children,
                    start: cursor.position(),
                    end: next.position(),
                };
                return Ok(Some((node, next)));
            }
        }
        Ok(None)
    }

    fn parse_parts(
        &mut self,
        parts: &[RuleExpr],
        mut cursor: Cursor,
        children: &mut Vec<BNode>,
    ) -> ParseResult<Cursor> {
        let mark = children.len();
        for part in parts {
            match self.parse_expr(part, cursor, children)? {
                Some(next) => cursor = next,
                None => {
                    children.truncate(mark);
                    return Ok(None);
                }
            }
        }
        Ok(Some(cursor))
    }

    fn parse_expr(
        &mut self,
        expr: &RuleExpr,
        cursor: Cursor,
        children: &mut Vec<BNode>,
    ) -> ParseResult<Cursor> {
        match expr {
            RuleExpr::Sequence(parts) => self.parse_parts(parts, cursor, children),
            RuleExpr::Choice(alts) => {
                for alt in alts {
                    let mark = children.len();
                    if let Some(next) = self.parse_expr(alt, cursor, children)? {
                        return Ok(Some(next));
                    }
                    children.truncate(mark);
                }
                Ok(None)
            }
            RuleExpr::Optional(inner) => {
                let mut matched = Vec::new();
                match self.parse_expr(inner, cursor, &mut matched)? {
                    Some(next) => {
                        push_quantified(children, matched, cursor, next);
                        Ok(Some(next))
                    }
                    None => Ok(Some(cursor)),
                }
            }
            RuleExpr::Star(inner) => {
                let mut cursor = cursor;
                loop {
                    let mut matched = Vec::new();
                    match self.parse_expr(inner, cursor, &mut matched)? {
                        Some(next) if next.pos > cursor.pos => {
                            push_quantified(children, matched, cursor, next);
                            cursor = next;
                        }
                        _ => break,
                    }
                }
                Ok(Some(cursor))
            }
            RuleExpr::Plus(inner) => {
                // The first iteration is mandatory and stays inline; later
                // iterations are individually optional.
                let Some(mut cursor) = self.parse_expr(inner, cursor, children)? else {
                    return Ok(None);
                };
                loop {
                    let mut matched = Vec::new();
                    match self.parse_expr(inner, cursor, &mut matched)? {
                        Some(next) if next.pos > cursor.pos => {
                            push_quantified(children, matched, cursor, next);
                            cursor = next;
                        }
                        _ => break,
                    }
                }
                Ok(Some(cursor))
            }
            RuleExpr::RuleRef(name) => {
                let def = self.grammar.get(name).ok_or_else(|| {
                    WhittleError::unknown_rule(format!("{}:{}", self.grammar.name, name))
                })?;
                if def.is_token() {
                    self.parse_token(name, cursor, children)
                } else {
                    match self.parse_rule(name, cursor)? {
                        Some((node, next)) => {
                            children.push(node);
                            Ok(Some(next))
                        }
                        None => Ok(None),
                    }
                }
            }
            RuleExpr::Literal(text) => {
                let cursor = self.skip_hidden(cursor, children);
                if self.src[cursor.pos..].starts_with(text.as_str()) {
                    let next = cursor.advanced(text);
                    children.push(BNode::Token {
                        name: text.clone(),
                        text: text.clone(),
                        replace: text.clone(),
                        hidden: false,
                        start: cursor.position(),
                        end: next.position(),
                    });
                    Ok(Some(next))
                } else {
                    Ok(None)
                }
            }
            RuleExpr::CharClass { .. } | RuleExpr::AnyChar => Err(WhittleError::invariant(
                "character class reached rule interpretation",
            )),
        }
    }

    fn parse_token(
        &mut self,
        name: &str,
        cursor: Cursor,
        children: &mut Vec<BNode>,
    ) -> ParseResult<Cursor> {
        let def = self.grammar.get(name).expect("caller checked the name");
        let matcher = def.matcher.as_ref().expect("tokens carry a matcher");
        let cursor = self.skip_hidden(cursor, children);
        let Some(found) = matcher.find(&self.src[cursor.pos..]) else {
            children.pop_hidden_tail();
            return Ok(None);
        };
        let text = found.as_str().to_string();
        let next = cursor.advanced(&text);

        if let Some(island) = self.bundle.island(name) {
            let mut spliced = self.process_island(island, name, &text, cursor)?;
            children.append(&mut spliced);
            return Ok(Some(next));
        }

        let replace = self
            .reps
            .get(&self.grammar.name, name)
            .unwrap_or(text.as_str())
            .to_string();
        children.push(BNode::Token {
            name: name.to_string(),
            text,
            replace: if def.is_hidden() { String::new() } else { replace },
            hidden: def.is_hidden(),
            start: cursor.position(),
            end: next.position(),
        });
        Ok(Some(next))
    }

    /// Consume hidden-channel tokens at the cursor, recording each one.
    fn skip_hidden(&self, mut cursor: Cursor, children: &mut Vec<BNode>) -> Cursor {
        'outer: loop {
            for def in self.grammar.hidden_tokens() {
                let matcher = def.matcher.as_ref().expect("tokens carry a matcher");
                let Some(found) = matcher.find(&self.src[cursor.pos..]) else {
                    continue;
                };
                if found.as_str().is_empty() {
                    continue;
                }
                let text = found.as_str().to_string();
                let next = cursor.advanced(&text);
                children.push(BNode::Token {
                    name: def.name.clone(),
                    text,
                    replace: String::new(),
                    hidden: true,
                    start: cursor.position(),
                    end: next.position(),
                });
                cursor = next;
                continue 'outer;
            }
            return cursor;
        }
    }

    /// Split an island token's text along its pattern: named captures are
    /// reparsed with the grammar they map to, everything else is kept as
    /// opaque fixed tokens.
    fn process_island(
        &self,
        island: &CompiledIsland,
        token: &str,
        text: &str,
        cursor: Cursor,
    ) -> Result<Vec<BNode>, WhittleError> {
        let mut out = Vec::new();
        let mut consumed = 0;
        let mut chunk_index = 0;
        for captures in island.pattern.captures_iter(text) {
            let mut groups: Vec<(&str, regex::Match)> = island
                .rules
                .keys()
                .filter_map(|g| captures.name(g).map(|m| (g.as_str(), m)))
                .collect();
            groups.sort_by_key(|(_, m)| m.start());
            for (group, m) in groups {
                if consumed < m.start() {
                    out.push(self.fixed_chunk(
                        token,
                        &mut chunk_index,
                        &text[consumed..m.start()],
                        cursor.advanced(&text[..consumed]),
                    ));
                }
                let start = island.rules.get(group).expect("group names come from rules");
                out.push(self.parse_island_chunk(start, m.as_str(), cursor.advanced(&text[..m.start()]))?);
                consumed = m.end();
            }
        }
        if consumed < text.len() {
            out.push(self.fixed_chunk(
                token,
                &mut chunk_index,
                &text[consumed..],
                cursor.advanced(&text[..consumed]),
            ));
        }
        Ok(out)
    }

    fn fixed_chunk(
        &self,
        token: &str,
        chunk_index: &mut usize,
        chunk: &str,
        cursor: Cursor,
    ) -> BNode {
        let node = BNode::Token {
            name: format!("{}_{}", token, chunk_index),
            text: chunk.to_string(),
            replace: chunk.to_string(),
            hidden: false,
            start: cursor.position(),
            end: cursor.advanced(chunk).position(),
        };
        *chunk_index += 1;
        node
    }

    fn parse_island_chunk(
        &self,
        start: &StartRule,
        chunk: &str,
        cursor: Cursor,
    ) -> Result<BNode, WhittleError> {
        let (grammar, def) = self.bundle.resolve(start)?;
        let mut parser = RuleParser {
            bundle: self.bundle,
            grammar,
            reps: self.reps,
            src: chunk,
            active: HashSet::new(),
        };
        let island_cursor = Cursor {
            pos: 0,
            line: cursor.line,
            col: cursor.col,
        };
        if let Some((mut node, end)) = parser.parse_rule(&def.name, island_cursor)? {
            let BNode::Rule { children, .. } = &mut node else {
                unreachable!("island start symbol builds a rule node");
            };
            let end = parser.skip_hidden(end, children);
            if end.pos == chunk.len() {
                return Ok(node);
            }
        }
        warn!(
            grammar = %grammar.name,
            rule = %def.name,
            "island text did not fully parse; keeping it opaque"
        );
        Ok(BNode::Token {
            name: format!("{}_opaque", grammar.name),
            text: chunk.to_string(),
            replace: chunk.to_string(),
            hidden: false,
            start: cursor.position(),
            end: cursor.advanced(chunk).position(),
        })
    }
}

/// The tail of `alt` when it is a direct left-recursive alternative of
/// `rule` (`rule : rule X Y | …`).
fn left_recursive_tail<'e>(alt: &'e RuleExpr, rule: &str) -> Option<&'e [RuleExpr]> {
    match alt {
        RuleExpr::Sequence(parts) => match parts.first() {
            Some(RuleExpr::RuleRef(name)) if name == rule => Some(&parts[1..]),
            _ => None,
        },
        _ => None,
    }
}

fn node_start(node: &BNode) -> Position {
    match node {
        BNode::Rule { start, .. }
        | BNode::Quantifier { start, .. }
        | BNode::Token { start, .. }
        | BNode::Error { start, .. } => *start,
    }
}

/// Wrap a quantified match in an anonymous group so it can be removed as a
/// unit; empty matches contribute nothing.
fn push_quantified(children: &mut Vec<BNode>, matched: Vec<BNode>, start: Cursor, end: Cursor) {
    if matched.is_empty() {
        return;
    }
    children.push(BNode::Quantifier {
        children: matched,
        start: start.position(),
        end: end.position(),
    });
}

trait PopHiddenTail {
    fn pop_hidden_tail(&mut self);
}

impl PopHiddenTail for Vec<BNode> {
    /// Drop hidden tokens recorded just before a failed token match so a
    /// failing alternative leaves no trace.
    fn pop_hidden_tail(&mut self) {
        while matches!(self.last(), Some(BNode::Token { hidden: true, .. })) {
            self.pop();
        }
    }
}

/// Commit the staged shape to the arena in pre-order.
fn commit(root: BNode) -> Tree {
    let BNode::Rule {
        name,
        replace,
        children,
        start,
        end,
    } = root
    else {
        unreachable!("the root is always a rule");
    };
    let mut tree = Tree::with_root(
        NodeKind::Rule {
            name,
            children: Vec::new(),
        },
        replace,
    );
    let root_id = tree.root();
    tree.node_mut(root_id).start = start;
    tree.node_mut(root_id).end = end;
    for child in children {
        commit_into(&mut tree, root_id, child);
    }
    tree
}

fn commit_into(tree: &mut Tree, parent: crate::tree::NodeId, node: BNode) {
    match node {
        BNode::Rule {
            name,
            replace,
            children,
            start,
            end,
        } => {
            let id = tree.push(
                NodeKind::Rule {
                    name,
                    children: Vec::new(),
                },
                replace,
                start,
                end,
            );
            tree.add_child(parent, id);
            for child in children {
                commit_into(tree, id, child);
            }
        }
        BNode::Quantifier {
            children,
            start,
            end,
        } => {
            let id = tree.push(
                NodeKind::Quantifier {
                    children: Vec::new(),
                },
                String::new(),
                start,
                end,
            );
            tree.add_child(parent, id);
            for child in children {
                commit_into(tree, id, child);
            }
        }
        BNode::Token {
            name,
            text,
            replace,
            hidden,
            start,
            end,
        } => {
            let kind = if hidden {
                NodeKind::HiddenToken { name, text }
            } else {
                NodeKind::Token { name, text }
            };
            let id = tree.push(kind, replace, start, end);
            tree.add_child(parent, id);
        }
        BNode::Error { text, start, end } => {
            let id = tree.push(NodeKind::ErrorToken { text }, String::new(), start, end);
            tree.add_child(parent, id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grammar::parser::parse_grammar;
    use crate::unparse;
    use std::collections::HashMap;

    fn build(grammar_text: &str, start: &str, input: &str) -> BuildOutcome {
        let grammar = parse_grammar("g", grammar_text).unwrap();
        let bundle = GrammarBundle::new(vec![grammar], vec![], HashMap::new()).unwrap();
        let reps = Replacements::compute(&bundle).unwrap();
        let builder = TreeBuilder::new(&bundle, &reps);
        builder.build(input, &start.parse().unwrap()).unwrap()
    }

    const INI: &str = r#"
        ini     : line* ;
        line    : section | entry | comment ;
        section : "[" NAME "]" NL ;
        entry   : NAME "=" VALUE NL ;
        comment : COMMENT NL ;
        NAME    : /[A-Za-z_][A-Za-z0-9_]*/ ;
        VALUE   : /[^\n]+/ ;
        COMMENT : /;[^\n]*/ ;
        NL      : "\n" ;
    "#;

    #[test]
    fn round_trips_grammar_conforming_input() {
        let input = "[s]\nk=v\n; bye\n";
        let outcome = build(INI, "ini", input);
        assert!(!outcome.parsed_with_errors);
        assert_eq!(unparse::unparse(&outcome.tree), input);
    }

    #[test]
    fn star_iterations_become_quantifiers() {
        let outcome = build(INI, "ini", "k=v\nx=y\n");
        let tree = &outcome.tree;
        let root = tree.node(tree.root());
        assert_eq!(root.children().len(), 2);
        for &child in root.children() {
            assert!(matches!(
                tree.node(child).kind,
                NodeKind::Quantifier { .. }
            ));
        }
    }

    #[test]
    fn left_recursion_builds_a_nested_chain() {
        let outcome = build(
            r#"
            e : e "+" t | t ;
            t : INT ;
            INT : /[0-9]+/ ;
            "#,
            "e",
            "1+2+3",
        );
        let tree = &outcome.tree;
        let root = tree.node(tree.root());
        // e(e(e(t),+,t),+,t): outermost has three children, leftmost is e.
        assert_eq!(root.name(), "e");
        assert_eq!(root.children().len(), 3);
        assert_eq!(tree.node(root.children()[0]).name(), "e");
        assert_eq!(unparse::unparse(tree), "1+2+3");
    }

    #[test]
    fn hidden_tokens_are_recorded() {
        let outcome = build(
            r#"
            pair : NAME "=" NAME ;
            NAME : /[a-z]+/ ;
            hidden WS : /[ \t]+/ ;
            "#,
            "pair",
            "a = b",
        );
        let tree = &outcome.tree;
        let mut hidden = 0;
        tree.visit_all(|_, node| {
            if matches!(node.kind, NodeKind::HiddenToken { .. }) {
                hidden += 1;
            }
        });
        assert_eq!(hidden, 2);
        assert_eq!(unparse::unparse(tree), "a = b");
    }

    #[test]
    fn unparsable_tail_becomes_an_error_token() {
        let outcome = build(INI, "ini", "k=v\n???");
        assert!(outcome.parsed_with_errors);
        assert_eq!(unparse::unparse(&outcome.tree), "k=v\n???");
    }

    #[test]
    fn unparsable_input_fails() {
        let grammar = parse_grammar("g", "s : \"x\" ;").unwrap();
        let bundle = GrammarBundle::new(vec![grammar], vec![], HashMap::new()).unwrap();
        let reps = Replacements::compute(&bundle).unwrap();
        let builder = TreeBuilder::new(&bundle, &reps);
        let err = builder.build("y", &"s".parse().unwrap()).unwrap_err();
        assert!(matches!(
            err.kind,
            crate::errors::ErrorKind::ParseFailed { .. }
        ));
    }

    #[test]
    fn ids_are_preorder() {
        let outcome = build(INI, "ini", "k=v\n");
        let tree = &outcome.tree;
        let mut last = None;
        let mut ok = true;
        tree.visit_all(|id, _| {
            if let Some(prev) = last {
                ok &= id > prev;
            }
            last = Some(id);
        });
        assert!(ok, "pre-order traversal must see ascending ids");
    }
}
