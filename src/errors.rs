//! Whittle error handling.
//!
//! A single error type covers the whole pipeline. Oracle verdicts are *not*
//! errors: an unresolved oracle outcome only steers the search and never
//! surfaces here.

use std::fmt;
use std::sync::Arc;

use miette::{Diagnostic, LabeledSpan, NamedSource, SourceSpan};

/// The crate-wide error type: what went wrong, where (when a source is
/// available), and how to help.
#[derive(Debug)]
pub struct WhittleError {
    pub kind: ErrorKind,
    pub source_info: Option<SourceInfo>,
    pub help: Option<String>,
}

/// All failure modes of the reducer pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum ErrorKind {
    /// A grammar file cannot be read, parsed, or is inconsistent.
    Grammar { message: String },
    /// A rule or token is referenced but never defined.
    UnknownRule { rule: String },
    /// The minimal-replacement fixed point left a rule without a finite
    /// expansion (e.g. left recursion with no base case).
    ReplacementUnresolvable { rules: Vec<String> },
    /// The input cannot be parsed even partially with the given start rule.
    ParseFailed { message: String },
    /// A post-transformation self-check failed; indicates a bug.
    InvariantViolation { message: String },
    /// Bad session or bundle configuration.
    Config { message: String },
    /// File system failure in the outer layers.
    Io { path: String, message: String },
}

/// Source attachment for errors that point into a grammar file or input.
#[derive(Debug, Clone)]
pub struct SourceInfo {
    pub source: Arc<NamedSource<String>>,
    pub span: SourceSpan,
}

impl WhittleError {
    pub fn grammar(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Grammar {
            message: message.into(),
        })
    }

    pub fn unknown_rule(rule: impl Into<String>) -> Self {
        Self::new(ErrorKind::UnknownRule { rule: rule.into() })
    }

    pub fn replacement_unresolvable(rules: Vec<String>) -> Self {
        Self::new(ErrorKind::ReplacementUnresolvable { rules }).with_help(
            "the listed rules have no finite expansion; add a base alternative \
             or provide a manual replacement override",
        )
    }

    pub fn parse_failed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ParseFailed {
            message: message.into(),
        })
    }

    pub fn invariant(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvariantViolation {
            message: message.into(),
        })
        .with_help("this is an internal error; please report it as a bug")
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config {
            message: message.into(),
        })
    }

    pub fn io(path: impl Into<String>, err: &std::io::Error) -> Self {
        Self::new(ErrorKind::Io {
            path: path.into(),
            message: err.to_string(),
        })
    }

    fn new(kind: ErrorKind) -> Self {
        Self {
            kind,
            source_info: None,
            help: None,
        }
    }

    /// Attach a named source and a span so miette can render a snippet.
    pub fn with_source(
        mut self,
        name: impl Into<String> + AsRef<str>,
        content: impl Into<String>,
        span: impl Into<SourceSpan>,
    ) -> Self {
        self.source_info = Some(SourceInfo {
            source: Arc::new(NamedSource::new(name, content.into())),
            span: span.into(),
        });
        self
    }

    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }

    pub const fn code_suffix(&self) -> &'static str {
        match self.kind {
            ErrorKind::Grammar { .. } => "grammar",
            ErrorKind::UnknownRule { .. } => "unknown_rule",
            ErrorKind::ReplacementUnresolvable { .. } => "replacement_unresolvable",
            ErrorKind::ParseFailed { .. } => "parse_failed",
            ErrorKind::InvariantViolation { .. } => "invariant_violation",
            ErrorKind::Config { .. } => "config",
            ErrorKind::Io { .. } => "io",
        }
    }
}

impl std::error::Error for WhittleError {}

impl fmt::Display for WhittleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            ErrorKind::Grammar { message } => write!(f, "grammar error: {}", message),
            ErrorKind::UnknownRule { rule } => {
                write!(f, "grammar error: rule '{}' is not defined", rule)
            }
            ErrorKind::ReplacementUnresolvable { rules } => write!(
                f,
                "replacement computation did not converge for: {}",
                rules.join(", ")
            ),
            ErrorKind::ParseFailed { message } => write!(f, "parse failed: {}", message),
            ErrorKind::InvariantViolation { message } => {
                write!(f, "tree invariant violated: {}", message)
            }
            ErrorKind::Config { message } => write!(f, "configuration error: {}", message),
            ErrorKind::Io { path, message } => write!(f, "i/o error on '{}': {}", path, message),
        }
    }
}

impl Diagnostic for WhittleError {
    fn code<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        Some(Box::new(format!("whittle::{}", self.code_suffix())))
    }

    fn help<'a>(&'a self) -> Option<Box<dyn fmt::Display + 'a>> {
        self.help
            .as_ref()
            .map(|h| Box::new(h) as Box<dyn fmt::Display>)
    }

    fn labels(&self) -> Option<Box<dyn Iterator<Item = LabeledSpan> + '_>> {
        let info = self.source_info.as_ref()?;
        Some(Box::new(std::iter::once(LabeledSpan::new_with_span(
            Some("here".into()),
            info.span,
        ))))
    }

    fn source_code(&self) -> Option<&dyn miette::SourceCode> {
        self.source_info
            .as_ref()
            .map(|info| &*info.source as &dyn miette::SourceCode)
    }
}

/// Prints a WhittleError with full miette diagnostics.
pub fn print_error(error: WhittleError) {
    let report = miette::Report::new(error);
    eprintln!("{report:?}");
}
