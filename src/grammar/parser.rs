//! Parser for the grammar notation.
//!
//! The notation itself is parsed with pest; token patterns are additionally
//! parsed into [`RuleExpr`] by a small recursive-descent pass so that
//! minimal replacements can be derived from them. The raw pattern text is
//! kept as the anchored matcher used during input parsing.

use pest::iterators::Pair;
use pest::Parser;
use pest_derive::Parser;
use regex::Regex;

use super::{DefKind, Grammar, RuleDef, RuleExpr};
use crate::errors::WhittleError;

#[derive(Parser)]
#[grammar = "grammar/whittle.pest"]
struct NotationParser;

/// Parse one grammar file's worth of definitions.
pub fn parse_grammar(name: &str, text: &str) -> Result<Grammar, WhittleError> {
    let pairs = NotationParser::parse(Rule::file, text).map_err(|e| {
        let span = match e.location {
            pest::error::InputLocation::Pos(p) => p..p,
            pest::error::InputLocation::Span((s, e)) => s..e,
        };
        WhittleError::grammar(format!("grammar '{}' has a syntax error", name)).with_source(
            format!("{}.wg", name),
            text,
            span,
        )
    })?;

    let file = pairs.peek().expect("pest guarantees the file rule");
    let mut defs = Vec::new();
    for pair in file.into_inner() {
        if pair.as_rule() == Rule::definition {
            defs.push(convert_definition(name, pair)?);
        }
    }
    Grammar::new(name.to_string(), defs)
}

fn convert_definition(grammar: &str, pair: Pair<Rule>) -> Result<RuleDef, WhittleError> {
    let mut inner = pair.into_inner().peekable();
    let hidden = inner
        .next_if(|p| p.as_rule() == Rule::hidden_mark)
        .is_some();
    let name = inner.next().expect("definition has a name").as_str().to_string();
    let body = inner.next().expect("definition has a body");

    let is_token = name.chars().next().is_some_and(|c| c.is_ascii_uppercase());
    if hidden && !is_token {
        return Err(WhittleError::grammar(format!(
            "'{}' in grammar '{}': only tokens can be hidden",
            name, grammar
        )));
    }

    if is_token {
        let (expr, matcher) = convert_token_body(grammar, &name, body)?;
        Ok(RuleDef {
            name,
            kind: DefKind::Token { hidden },
            expr,
            matcher: Some(matcher),
        })
    } else {
        let expr = convert_alternation(grammar, &name, body)?;
        Ok(RuleDef {
            name,
            kind: DefKind::Parser,
            expr,
            matcher: None,
        })
    }
}

/// A token body is a single literal or a single pattern.
fn convert_token_body(
    grammar: &str,
    name: &str,
    body: Pair<Rule>,
) -> Result<(RuleExpr, Regex), WhittleError> {
    let bad_shape = || {
        WhittleError::grammar(format!(
            "token '{}' in grammar '{}' must be a single literal or /pattern/",
            name, grammar
        ))
    };

    let mut sequences = body.into_inner();
    let sequence = sequences.next().ok_or_else(bad_shape)?;
    if sequences.next().is_some() {
        return Err(bad_shape());
    }
    let mut terms = sequence.into_inner();
    let term = terms.next().ok_or_else(bad_shape)?;
    if terms.next().is_some() {
        return Err(bad_shape());
    }
    let mut parts = term.into_inner();
    let primary = parts.next().ok_or_else(bad_shape)?;
    if parts.next().is_some() {
        // a quantifier on the token body
        return Err(bad_shape());
    }

    match primary.as_rule() {
        Rule::literal => {
            let text = unescape_literal(primary.as_str());
            let matcher = compile_matcher(&regex::escape(&text), grammar, name)?;
            Ok((RuleExpr::Literal(text), matcher))
        }
        Rule::pattern => {
            let raw = primary.as_str();
            let raw = &raw[1..raw.len() - 1];
            let expr = parse_pattern(raw).map_err(|message| {
                WhittleError::grammar(format!(
                    "token '{}' in grammar '{}': {}",
                    name, grammar, message
                ))
            })?;
            let matcher = compile_matcher(raw, grammar, name)?;
            Ok((expr, matcher))
        }
        _ => Err(bad_shape()),
    }
}

fn compile_matcher(source: &str, grammar: &str, name: &str) -> Result<Regex, WhittleError> {
    Regex::new(&format!(r"\A(?:{})", source)).map_err(|e| {
        WhittleError::grammar(format!(
            "token '{}' in grammar '{}' has an invalid pattern: {}",
            name, grammar, e
        ))
    })
}

fn convert_alternation(
    grammar: &str,
    rule: &str,
    pair: Pair<Rule>,
) -> Result<RuleExpr, WhittleError> {
    let mut alts = Vec::new();
    for sequence in pair.into_inner() {
        alts.push(convert_sequence(grammar, rule, sequence)?);
    }
    Ok(if alts.len() == 1 {
        alts.pop().expect("one alternative")
    } else {
        RuleExpr::Choice(alts)
    })
}

fn convert_sequence(
    grammar: &str,
    rule: &str,
    pair: Pair<Rule>,
) -> Result<RuleExpr, WhittleError> {
    let mut parts = Vec::new();
    for term in pair.into_inner() {
        parts.push(convert_term(grammar, rule, term)?);
    }
    Ok(if parts.len() == 1 {
        parts.pop().expect("one part")
    } else {
        RuleExpr::Sequence(parts)
    })
}

fn convert_term(grammar: &str, rule: &str, pair: Pair<Rule>) -> Result<RuleExpr, WhittleError> {
    let mut inner = pair.into_inner();
    let primary = inner.next().expect("term has a primary");
    let expr = match primary.as_rule() {
        Rule::name => RuleExpr::RuleRef(primary.as_str().to_string()),
        Rule::literal => RuleExpr::Literal(unescape_literal(primary.as_str())),
        Rule::group => convert_alternation(
            grammar,
            rule,
            primary.into_inner().next().expect("group body"),
        )?,
        Rule::pattern => {
            return Err(WhittleError::grammar(format!(
                "rule '{}' in grammar '{}' embeds a /pattern/; patterns are \
                 only valid as token bodies",
                rule, grammar
            )))
        }
        other => unreachable!("unexpected primary {:?}", other),
    };
    Ok(match inner.next().map(|q| q.as_str().to_string()) {
        Some(q) if q == "?" => RuleExpr::Optional(Box::new(expr)),
        Some(q) if q == "*" => RuleExpr::Star(Box::new(expr)),
        Some(q) if q == "+" => RuleExpr::Plus(Box::new(expr)),
        Some(other) => unreachable!("unexpected quantifier {:?}", other),
        None => expr,
    })
}

/// Strip quotes and process escapes of a literal.
fn unescape_literal(quoted: &str) -> String {
    let body = &quoted[1..quoted.len() - 1];
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('0') => out.push('\0'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Token patterns
// ---------------------------------------------------------------------------

/// Parse the supported regex subset into a [`RuleExpr`]: literals, escapes,
/// character classes, `(?:…)` groups, alternation, and `? * +`. Anything
/// fancier (bounded repetition, lookaround, backreferences) is rejected so
/// that shortest strings stay derivable.
pub(crate) fn parse_pattern(src: &str) -> Result<RuleExpr, String> {
    let mut parser = PatternParser {
        chars: src.chars().collect(),
        pos: 0,
    };
    let expr = parser.parse_alternation()?;
    if parser.pos != parser.chars.len() {
        return Err(format!(
            "unexpected '{}' at offset {} of pattern",
            parser.chars[parser.pos], parser.pos
        ));
    }
    Ok(expr)
}

struct PatternParser {
    chars: Vec<char>,
    pos: usize,
}

impl PatternParser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn parse_alternation(&mut self) -> Result<RuleExpr, String> {
        let mut alts = vec![self.parse_sequence()?];
        while self.peek() == Some('|') {
            self.bump();
            alts.push(self.parse_sequence()?);
        }
        Ok(if alts.len() == 1 {
            alts.pop().expect("one alternative")
        } else {
            RuleExpr::Choice(alts)
        })
    }

    fn parse_sequence(&mut self) -> Result<RuleExpr, String> {
        let mut parts: Vec<RuleExpr> = Vec::new();
        while let Some(c) = self.peek() {
            if c == '|' || c == ')' {
                break;
            }
            let item = self.parse_item()?;
            // Coalesce runs of plain characters into one literal.
            match (parts.last_mut(), &item) {
                (Some(RuleExpr::Literal(prev)), RuleExpr::Literal(next)) => {
                    prev.push_str(next);
                }
                _ => parts.push(item),
            }
        }
        Ok(match parts.len() {
            0 => RuleExpr::Literal(String::new()),
            1 => parts.pop().expect("one part"),
            _ => RuleExpr::Sequence(parts),
        })
    }

    fn parse_item(&mut self) -> Result<RuleExpr, String> {
        let atom = self.parse_atom()?;
        match self.peek() {
            Some('?') => {
                self.bump();
                self.reject_lazy()?;
                Ok(RuleExpr::Optional(Box::new(atom)))
            }
            Some('*') => {
                self.bump();
                self.reject_lazy()?;
                Ok(RuleExpr::Star(Box::new(atom)))
            }
            Some('+') => {
                self.bump();
                self.reject_lazy()?;
                Ok(RuleExpr::Plus(Box::new(atom)))
            }
            Some('{') => Err("bounded repetition '{…}' is not supported".into()),
            _ => Ok(atom),
        }
    }

    fn reject_lazy(&mut self) -> Result<(), String> {
        if self.peek() == Some('?') {
            return Err("lazy quantifiers are not supported".into());
        }
        Ok(())
    }

    fn parse_atom(&mut self) -> Result<RuleExpr, String> {
        match self.bump() {
            Some('(') => {
                if self.peek() == Some('?') {
                    self.bump();
                    if self.bump() != Some(':') {
                        return Err("only '(?:…)' groups are supported".into());
                    }
                }
                let inner = self.parse_alternation()?;
                if self.bump() != Some(')') {
                    return Err("unclosed group".into());
                }
                Ok(inner)
            }
            Some('[') => self.parse_class(),
            Some('.') => Ok(RuleExpr::AnyChar),
            Some('\\') => self.parse_escape(),
            Some(c @ ('*' | '+' | '?')) => Err(format!("dangling quantifier '{}'", c)),
            Some(c) => Ok(RuleExpr::Literal(c.to_string())),
            None => Err("unexpected end of pattern".into()),
        }
    }

    fn parse_escape(&mut self) -> Result<RuleExpr, String> {
        match self.bump() {
            Some('n') => Ok(RuleExpr::Literal("\n".into())),
            Some('t') => Ok(RuleExpr::Literal("\t".into())),
            Some('r') => Ok(RuleExpr::Literal("\r".into())),
            Some('0') => Ok(RuleExpr::Literal("\0".into())),
            Some('d') => Ok(class(vec![('0', '9')], false)),
            Some('D') => Ok(class(vec![('0', '9')], true)),
            Some('w') => Ok(class(word_ranges(), false)),
            Some('W') => Ok(class(word_ranges(), true)),
            Some('s') => Ok(class(space_ranges(), false)),
            Some('S') => Ok(class(space_ranges(), true)),
            Some(c) => Ok(RuleExpr::Literal(c.to_string())),
            None => Err("dangling escape at end of pattern".into()),
        }
    }

    fn parse_class(&mut self) -> Result<RuleExpr, String> {
        let negated = if self.peek() == Some('^') {
            self.bump();
            true
        } else {
            false
        };
        let mut ranges = Vec::new();
        loop {
            let c = match self.bump() {
                None => return Err("unclosed character class".into()),
                Some(']') => break,
                Some('\\') => match self.bump() {
                    Some('n') => '\n',
                    Some('t') => '\t',
                    Some('r') => '\r',
                    Some('0') => '\0',
                    Some('d') => {
                        ranges.push(('0', '9'));
                        continue;
                    }
                    Some('w') => {
                        ranges.extend(word_ranges());
                        continue;
                    }
                    Some('s') => {
                        ranges.extend(space_ranges());
                        continue;
                    }
                    Some(other) => other,
                    None => return Err("dangling escape in character class".into()),
                },
                Some(other) => other,
            };
            // `c-d` ranges; a trailing '-' is a plain character.
            if self.peek() == Some('-') && self.chars.get(self.pos + 1) != Some(&']') {
                self.bump();
                let end = match self.bump() {
                    Some('\\') => match self.bump() {
                        Some('n') => '\n',
                        Some('t') => '\t',
                        Some('r') => '\r',
                        Some(other) => other,
                        None => return Err("dangling escape in character class".into()),
                    },
                    Some(end) => end,
                    None => return Err("unclosed character class".into()),
                };
                if end < c {
                    return Err(format!("inverted range '{}-{}'", c, end));
                }
                ranges.push((c, end));
            } else {
                ranges.push((c, c));
            }
        }
        if ranges.is_empty() {
            return Err("empty character class".into());
        }
        Ok(RuleExpr::CharClass { ranges, negated })
    }
}

fn class(ranges: Vec<(char, char)>, negated: bool) -> RuleExpr {
    RuleExpr::CharClass { ranges, negated }
}

fn word_ranges() -> Vec<(char, char)> {
    vec![('a', 'z'), ('A', 'Z'), ('0', '9'), ('_', '_')]
}

fn space_ranges() -> Vec<(char, char)> {
    vec![(' ', ' '), ('\t', '\t'), ('\r', '\r'), ('\n', '\n')]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_token_and_rule_definitions() {
        let grammar = parse_grammar(
            "ini",
            r#"
            // a tiny configuration grammar
            ini    : line* ;
            line   : entry | COMMENT ;
            entry  : NAME "=" VALUE ;
            NAME   : /[A-Za-z_][A-Za-z0-9_]*/ ;
            VALUE  : /[^\n]*/ ;
            COMMENT : /;[^\n]*/ ;
            hidden WS : /[ \t]+/ ;
            "#,
        )
        .unwrap();
        assert_eq!(grammar.defs().len(), 7);
        assert!(grammar.get("WS").unwrap().is_hidden());
        assert!(grammar.get("ini").map(|d| !d.is_token()).unwrap());
        let entry = grammar.get("entry").unwrap();
        match &entry.expr {
            RuleExpr::Sequence(parts) => {
                assert_eq!(parts[1], RuleExpr::Literal("=".into()));
            }
            other => panic!("unexpected shape: {:?}", other),
        }
    }

    #[test]
    fn pattern_subset() {
        let expr = parse_pattern(r"a(?:bc|d)*[x-z]?").unwrap();
        match expr {
            RuleExpr::Sequence(parts) => assert_eq!(parts.len(), 3),
            other => panic!("unexpected shape: {:?}", other),
        }
        assert!(parse_pattern(r"a{2,3}").is_err());
        assert!(parse_pattern(r"(a").is_err());
        assert!(parse_pattern(r"[z-a]").is_err());
    }

    #[test]
    fn token_body_shape_is_enforced() {
        assert!(parse_grammar("g", r#"A : "x" "y" ;"#).is_err());
        assert!(parse_grammar("g", r#"A : "x"* ;"#).is_err());
        assert!(parse_grammar("g", "hidden a : /x/ ;").is_err());
    }
}
