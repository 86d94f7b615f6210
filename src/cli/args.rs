//! Command-line arguments and subcommands.
//!
//! Uses the `clap` derive API for a declarative, type-safe argument
//! structure.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::reduce::Variant;

/// The main CLI argument structure.
#[derive(Debug, Parser)]
#[command(
    name = "whittle",
    version,
    about = "Grammar-aware hierarchical delta debugging reducer."
)]
pub struct WhittleArgs {
    /// Increase log verbosity (-v: info, -vv: debug).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Reduce an interesting input while keeping it interesting.
    Reduce(ReduceArgs),
    /// Parse an input and print the prepared HDD tree.
    Tree(TreeArgs),
    /// Print the computed minimal replacement of every rule and token.
    Replacements(GrammarArgs),
}

/// Grammar selection shared by every subcommand.
#[derive(Debug, Args)]
pub struct GrammarArgs {
    /// Grammar file(s) describing the input format.
    #[arg(short, long = "grammar", num_args = 1.., required_unless_present = "bundle")]
    pub grammar: Vec<PathBuf>,

    /// JSON bundle descriptor naming grammars, islands, and replacement
    /// overrides in one file.
    #[arg(short, long, conflicts_with_all = ["grammar", "replacements", "islands"])]
    pub bundle: Option<PathBuf>,

    /// JSON file with manual replacement overrides (rule name to string).
    #[arg(short, long)]
    pub replacements: Option<PathBuf>,

    /// JSON file describing island grammars.
    #[arg(long)]
    pub islands: Option<PathBuf>,
}

#[derive(Debug, Args)]
pub struct TreeArgs {
    #[command(flatten)]
    pub grammar: GrammarArgs,

    /// Start rule, as `rule` or `grammar:rule`; defaults to the bundle's
    /// start entry.
    #[arg(short, long)]
    pub start_rule: Option<String>,

    /// The input to parse.
    pub input: PathBuf,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum VariantArg {
    Hdd,
    Hddr,
    Coarse,
    CoarseHddr,
    CoarseFull,
}

impl From<VariantArg> for Variant {
    fn from(arg: VariantArg) -> Self {
        match arg {
            VariantArg::Hdd => Variant::Hdd,
            VariantArg::Hddr => Variant::Hddr,
            VariantArg::Coarse => Variant::CoarseHdd,
            VariantArg::CoarseHddr => Variant::CoarseHddr,
            VariantArg::CoarseFull => Variant::CoarseThenFull,
        }
    }
}

#[derive(Debug, Args)]
pub struct ReduceArgs {
    #[command(flatten)]
    pub grammar: GrammarArgs,

    /// Start rule, as `rule` or `grammar:rule`; defaults to the bundle's
    /// start entry.
    #[arg(short, long)]
    pub start_rule: Option<String>,

    /// Interestingness test: a command receiving the candidate file path;
    /// exit status 0 marks the candidate interesting.
    #[arg(short, long)]
    pub test: PathBuf,

    /// Seconds before an oracle run counts as unresolved.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Output directory (default: `<input>.whittle` next to the input).
    #[arg(short, long)]
    pub out: Option<PathBuf>,

    /// Algorithm variant.
    #[arg(long, value_enum, default_value = "hdd")]
    pub variant: VariantArg,

    /// Run the chosen variant only once instead of to a fixed point.
    #[arg(long)]
    pub no_hdd_star: bool,

    /// Also try hoisting same-named subtrees at every level.
    #[arg(long)]
    pub hoist: bool,

    /// Worker threads for parallel oracle execution.
    #[arg(long)]
    pub parallel: Option<usize>,

    /// Initial DDMIN granularity.
    #[arg(long, default_value_t = 2)]
    pub granularity: usize,

    /// Verdict cache capacity (0 disables caching).
    #[arg(long, default_value_t = 50_000)]
    pub cache_size: usize,

    /// Skip recursion flattening.
    #[arg(long)]
    pub no_flatten: bool,

    /// Skip unary-chain squeezing.
    #[arg(long)]
    pub no_squeeze: bool,

    /// Offer every node to the reducer, even ones whose removal cannot
    /// shrink the output.
    #[arg(long)]
    pub no_skip_unremovable: bool,

    /// Let the reducer remove hidden-channel tokens as well.
    #[arg(long)]
    pub reduce_hidden: bool,

    /// Always emit hidden-channel tokens when rendering candidates.
    #[arg(long)]
    pub keep_hidden: bool,

    /// Keep per-candidate working directories around after the run.
    #[arg(long)]
    pub no_cleanup: bool,

    /// The interesting input to reduce.
    pub input: PathBuf,
}
