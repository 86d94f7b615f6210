//! The whittle command-line interface.
//!
//! Entry point for all subcommands; orchestrates the core library and
//! renders failures through miette.

pub mod args;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::engine::Engine;
use crate::errors::{print_error, WhittleError};
use crate::grammar::{GrammarBundle, IslandDescriptor, StartRule};
use crate::oracle::CommandOracle;
use crate::reduce::ReduceOptions;

use args::{Command, GrammarArgs, ReduceArgs, TreeArgs, WhittleArgs};

/// The main entry point for the CLI.
pub fn run() -> ExitCode {
    let args = WhittleArgs::parse();
    init_logging(args.verbose);

    let result = match args.command {
        Command::Reduce(reduce) => handle_reduce(reduce),
        Command::Tree(tree) => handle_tree(tree),
        Command::Replacements(grammar) => handle_replacements(grammar),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            print_error(e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("whittle={}", default)));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

/// Assemble the grammar bundle from either a descriptor file or the
/// individual flags; the descriptor may also supply a default start rule.
fn load_bundle(args: &GrammarArgs) -> Result<(GrammarBundle, Option<StartRule>), WhittleError> {
    if let Some(path) = &args.bundle {
        let descriptor = crate::grammar::BundleDescriptor::load(path)?;
        let start = descriptor
            .start
            .as_deref()
            .map(str::parse::<StartRule>)
            .transpose()?;
        let base = path.parent().unwrap_or(Path::new(".")).to_path_buf();
        return Ok((descriptor.into_bundle(&base)?, start));
    }
    let overrides: HashMap<String, String> = match &args.replacements {
        Some(path) => {
            let text = read_file(path)?;
            serde_json::from_str(&text).map_err(|e| {
                WhittleError::config(format!(
                    "{} is not a valid replacement map: {}",
                    path.display(),
                    e
                ))
            })?
        }
        None => HashMap::new(),
    };
    let islands: Vec<IslandDescriptor> = match &args.islands {
        Some(path) => {
            let text = read_file(path)?;
            serde_json::from_str(&text).map_err(|e| {
                WhittleError::config(format!(
                    "{} is not a valid island description: {}",
                    path.display(),
                    e
                ))
            })?
        }
        None => Vec::new(),
    };
    Ok((
        GrammarBundle::from_files(&args.grammar, islands, overrides)?,
        None,
    ))
}

fn resolve_start(
    explicit: &Option<String>,
    fallback: Option<StartRule>,
) -> Result<StartRule, WhittleError> {
    match explicit {
        Some(start) => start.parse(),
        None => fallback.ok_or_else(|| {
            WhittleError::config("no start rule given and the bundle declares none")
        }),
    }
}

fn read_file(path: &Path) -> Result<String, WhittleError> {
    std::fs::read_to_string(path).map_err(|e| WhittleError::io(path.display().to_string(), &e))
}

fn handle_reduce(args: ReduceArgs) -> Result<(), WhittleError> {
    let (bundle, default_start) = load_bundle(&args.grammar)?;
    let engine = Engine::new(bundle)?;
    let start = resolve_start(&args.start_rule, default_start)?;
    let input = read_file(&args.input)?;

    let out_dir = args.out.clone().unwrap_or_else(|| {
        let mut dir = args.input.clone().into_os_string();
        dir.push(".whittle");
        PathBuf::from(dir)
    });
    let test_name = args
        .input
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("test")
        .to_string();
    std::fs::create_dir_all(&out_dir)
        .map_err(|e| WhittleError::io(out_dir.display().to_string(), &e))?;

    let oracle = CommandOracle::new(
        std::fs::canonicalize(&args.test)
            .map_err(|e| WhittleError::io(args.test.display().to_string(), &e))?,
        out_dir.join("tests"),
        test_name.clone(),
    )
    .timeout(args.timeout.map(Duration::from_secs))
    .cleanup(!args.no_cleanup);

    let opts = ReduceOptions {
        variant: args.variant.into(),
        hdd_star: !args.no_hdd_star,
        hoist: args.hoist,
        granularity: args.granularity.max(2),
        parallel: args.parallel,
        preserve_hidden: args.keep_hidden,
        reduce_hidden: args.reduce_hidden,
        cache_capacity: args.cache_size,
        flatten: !args.no_flatten,
        squeeze: !args.no_squeeze,
        hide_unremovable: !args.no_skip_unremovable,
        ..ReduceOptions::default()
    };

    let reduction = engine.reduce(&input, &start, &oracle, &opts)?;
    let out_file = out_dir.join(&test_name);
    std::fs::write(&out_file, reduction.output.as_bytes())
        .map_err(|e| WhittleError::io(out_file.display().to_string(), &e))?;

    info!(
        oracle_calls = reduction.stats.oracle_calls,
        cache_hits = reduction.stats.cache_hits,
        "session statistics"
    );
    println!("{}", out_file.display());

    match reduction.error {
        Some(error) => Err(error),
        None => Ok(()),
    }
}

fn handle_tree(args: TreeArgs) -> Result<(), WhittleError> {
    let (bundle, default_start) = load_bundle(&args.grammar)?;
    let engine = Engine::new(bundle)?;
    let start = resolve_start(&args.start_rule, default_start)?;
    let input = read_file(&args.input)?;
    let (tree, parsed_with_errors) = engine.parse(&input, &start, &ReduceOptions::default())?;
    if parsed_with_errors {
        eprintln!("warning: input parsed with errors");
    }
    print!("{}", tree.tree_str());
    Ok(())
}

fn handle_replacements(args: GrammarArgs) -> Result<(), WhittleError> {
    let (bundle, _) = load_bundle(&args)?;
    let engine = Engine::new(bundle)?;
    let mut rows: Vec<_> = engine.replacements().iter().collect();
    rows.sort();
    for (grammar, rule, replacement) in rows {
        println!("{}:{} = {:?}", grammar, rule, replacement);
    }
    Ok(())
}
