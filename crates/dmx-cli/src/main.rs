//! DMX CLI
//!
//! Command-line surface over the resolution engine and a store snapshot:
//! - Resolving a topic payload against existing topics (`resolve`)
//! - Inspecting the snapshot (`by-type`, `classify`, `related`)

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use dmx_core::{
    parse_payload, ResolveOptions, Resolver, SubstitutionKind, TieBreak, TopicId, Warning,
};
use dmx_store::SnapshotStore;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::Level;

/// Environment fallback for `--store`.
const STORE_ENV: &str = "DMX_STORE";

#[derive(Parser)]
#[command(name = "dmx")]
#[command(
    author,
    version,
    about = "DMX: reuse existing topics when composing new ones"
)]
struct Cli {
    /// Store snapshot (JSON). Defaults to $DMX_STORE.
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// More logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Resolve a topic payload against the store.
    ///
    /// Aggregated children that already exist are replaced by `ref_id:<id>`
    /// references; composition children are left as they are.
    Resolve {
        /// Input payload (JSON)
        payload: PathBuf,
        /// Write the rewritten payload here instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
        /// Write the resolution report (JSON)
        #[arg(long)]
        report: Option<PathBuf>,
        /// first | last | reject
        #[arg(long, default_value = "first", value_parser = parse_tie_break)]
        leaf_tie_break: TieBreak,
        /// first | last | reject
        #[arg(long, default_value = "last", value_parser = parse_tie_break)]
        aggregate_tie_break: TieBreak,
        /// Skip creator/modifier/workspace lookups for candidates
        #[arg(long)]
        no_provenance: bool,
    },

    /// List existing topics of a type
    ByType {
        type_uri: String,
    },

    /// Show a type's data kind and children
    Classify {
        type_uri: String,
    },

    /// List associations touching a topic
    Related {
        topic_id: TopicId,
    },
}

fn parse_tie_break(s: &str) -> Result<TieBreak, String> {
    TieBreak::parse(s).ok_or_else(|| format!("expected first, last or reject, got `{s}`"))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    let store_path = store_path(cli.store)?;
    let store = SnapshotStore::load(&store_path)
        .with_context(|| format!("loading store snapshot {}", store_path.display()))?;

    match cli.command {
        Commands::Resolve {
            payload,
            out,
            report,
            leaf_tie_break,
            aggregate_tie_break,
            no_provenance,
        } => {
            let options = ResolveOptions {
                leaf_tie_break,
                aggregate_tie_break,
                inspect_provenance: !no_provenance,
            };
            cmd_resolve(&store, options, &payload, out.as_deref(), report.as_deref())?;
        }
        Commands::ByType { type_uri } => cmd_by_type(&store, &type_uri),
        Commands::Classify { type_uri } => cmd_classify(&store, &type_uri)?,
        Commands::Related { topic_id } => cmd_related(&store, topic_id)?,
    }

    Ok(())
}

fn init_logging(verbose: u8, quiet: bool) {
    let level = match (quiet, verbose) {
        (true, _) => Level::ERROR,
        (false, 0) => Level::WARN,
        (false, 1) => Level::INFO,
        (false, 2) => Level::DEBUG,
        (false, _) => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn store_path(flag: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = flag {
        return Ok(path);
    }
    match env::var_os(STORE_ENV) {
        Some(path) if !path.is_empty() => Ok(PathBuf::from(path)),
        _ => Err(anyhow!("no store snapshot given (use --store or set {STORE_ENV})")),
    }
}

// ============================================================================
// Commands
// ============================================================================

fn cmd_resolve(
    store: &SnapshotStore,
    options: ResolveOptions,
    input: &Path,
    out: Option<&Path>,
    report_out: Option<&Path>,
) -> Result<()> {
    let text = fs::read_to_string(input)
        .with_context(|| format!("reading payload {}", input.display()))?;
    let payload =
        parse_payload(&text).with_context(|| format!("parsing payload {}", input.display()))?;

    let resolution = Resolver::new(store, store, store)
        .with_options(options)
        .resolve_with_report(payload)?;

    let rendered = resolution.payload.to_pretty_json()?;
    match out {
        Some(path) => {
            fs::write(path, format!("{rendered}\n"))
                .with_context(|| format!("writing {}", path.display()))?;
            eprintln!("{} {}", "wrote".green().bold(), path.display().to_string().bold());
        }
        None => println!("{rendered}"),
    }

    if let Some(path) = report_out {
        let json = serde_json::to_string_pretty(&resolution.report)?;
        fs::write(path, format!("{json}\n"))
            .with_context(|| format!("writing {}", path.display()))?;
        eprintln!("{} {}", "wrote".green().bold(), path.display().to_string().bold());
    }

    let report = &resolution.report;
    let leaves = report
        .substitutions
        .iter()
        .filter(|s| s.kind == SubstitutionKind::Leaf)
        .count();
    let composites = report.substitutions.len() - leaves;
    eprintln!(
        "{} {} leaf reference(s), {} composite reference(s)",
        "ok".green().bold(),
        leaves,
        composites
    );
    for warning in &report.warnings {
        let label = match warning {
            Warning::CompositionConflict { .. } => "conflict:",
            Warning::AmbiguousMatch { .. } => "ambiguous:",
        };
        eprintln!("{} {}", label.yellow().bold(), warning);
    }
    Ok(())
}

fn cmd_by_type(store: &SnapshotStore, type_uri: &str) {
    let topics = store.topics_of_type(type_uri);
    if topics.is_empty() {
        eprintln!("{} no topics of type {}", "info:".yellow().bold(), type_uri);
        return;
    }
    for topic in topics {
        if topic.children.is_empty() {
            println!("{:>8}  {}", topic.id, topic.value);
        } else {
            println!(
                "{:>8}  {}  [{}]",
                topic.id,
                topic.value,
                topic.children.join(", ")
            );
        }
    }
}

fn cmd_classify(store: &SnapshotStore, type_uri: &str) -> Result<()> {
    let definition = store
        .type_definition(type_uri)
        .ok_or_else(|| anyhow!("unknown topic type `{type_uri}`"))?;
    println!("{} ({:?})", definition.uri.bold(), definition.data_kind);
    for child in definition.composition_children() {
        println!("  {} {}", "composition".cyan(), child);
    }
    for child in definition.aggregation_children() {
        println!("  {} {}", "aggregation".magenta(), child);
    }
    Ok(())
}

fn cmd_related(store: &SnapshotStore, topic_id: TopicId) -> Result<()> {
    let associations = store.related(topic_id)?;
    if associations.is_empty() {
        eprintln!("{} topic {} has no associations", "info:".yellow().bold(), topic_id);
    }
    for assoc in associations {
        let (direction, other) = if assoc.parent == topic_id {
            ("->", assoc.child)
        } else {
            ("<-", assoc.parent)
        };
        let label = match (store.topic(other), store.value_of(other)) {
            (Some(t), Some(value)) => format!("{} {}", t.type_uri, value),
            _ => String::new(),
        };
        println!(
            "{:>8}  {} {} {:>6}  {}",
            assoc.id, assoc.type_uri, direction, other, label
        );
    }
    Ok(())
}
