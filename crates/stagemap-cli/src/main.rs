//! CLI binary for inspecting and validating stagemap pipeline documents.

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};

use stagemap_pipeline::{
    PipelineIndex, PropagationMode, Provenance, SelectionController, Severity, StageSpec,
    StructuralNode,
};
use stagemap_types::{ExecutionStatus, StatusGateConfig};

#[derive(Parser)]
#[command(name = "stagemap", version, about = "Inspect pipeline structure documents")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run lint rules over a pipeline document
    Validate {
        /// Path to the pipeline .json file
        pipeline: PathBuf,
    },

    /// Show the flattened positions of a pipeline
    Info {
        /// Path to the pipeline .json file
        pipeline: PathBuf,
    },

    /// Print the effective variables of a stage
    Resolve {
        /// Path to the pipeline .json file
        pipeline: PathBuf,

        /// Stage (or step) id
        #[arg(long)]
        stage: String,

        /// own, propagate-default, propagate-named:<set>, or named:<set>
        #[arg(long, default_value = "own")]
        mode: PropagationMode,
    },

    /// Map value-tree ids to the metadata at the same position
    Zip {
        /// Path to the value tree .json file
        value: PathBuf,

        /// Path to the metadata tree .json file
        metadata: PathBuf,
    },

    /// Restore a selection from a deep-link address
    Select {
        /// Path to the pipeline .json file
        pipeline: PathBuf,

        /// Query string, e.g. "stage=build&step=test"
        #[arg(long)]
        address: String,

        #[command(flatten)]
        gate: GateArgs,
    },
}

#[derive(Args)]
struct GateArgs {
    /// Status treated as initial (not selectable); repeatable
    #[arg(long = "initial-status")]
    initial_statuses: Vec<ExecutionStatus>,

    /// JSON file with a status gate configuration
    #[arg(long)]
    gate_config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Setup tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .init();

    match cli.command {
        Commands::Validate { pipeline } => {
            cmd_validate(&pipeline)?;
        }
        Commands::Info { pipeline } => {
            cmd_info(&pipeline)?;
        }
        Commands::Resolve { pipeline, stage, mode } => {
            cmd_resolve(&pipeline, &stage, &mode)?;
        }
        Commands::Zip { value, metadata } => {
            cmd_zip(&value, &metadata)?;
        }
        Commands::Select { pipeline, address, gate } => {
            cmd_select(&pipeline, &address, &gate)?;
        }
    }

    Ok(())
}

fn load_tree<P>(path: &Path) -> anyhow::Result<StructuralNode<P>>
where
    P: serde::de::DeserializeOwned + Default,
{
    let source = std::fs::read_to_string(path)?;
    let tree = serde_json::from_str(&source)?;
    tracing::debug!(path = %path.display(), "Loaded tree");
    Ok(tree)
}

fn load_pipeline(path: &Path) -> anyhow::Result<StructuralNode<StageSpec>> {
    load_tree(path)
}

fn load_gate(args: &GateArgs) -> anyhow::Result<StatusGateConfig> {
    let mut config = match &args.gate_config {
        Some(path) => StatusGateConfig::load(path)?,
        None => StatusGateConfig::default(),
    };
    if !args.initial_statuses.is_empty() {
        config.initial_statuses = args.initial_statuses.clone();
    }
    Ok(config)
}

fn cmd_validate(path: &Path) -> anyhow::Result<()> {
    let pipeline = load_pipeline(path)?;
    let diagnostics = stagemap_pipeline::validate(&pipeline);

    if diagnostics.is_empty() {
        println!("Pipeline is valid");
        return Ok(());
    }

    let mut has_error = false;
    for diag in &diagnostics {
        let severity = match diag.severity {
            Severity::Error => {
                has_error = true;
                "ERROR"
            }
            Severity::Warning => "WARN",
            Severity::Info => "INFO",
        };
        println!("[{}] {}: {}", severity, diag.rule, diag.message);
        if let Some(fix) = &diag.fix {
            println!("    fix: {fix}");
        }
    }

    if has_error {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_info(path: &Path) -> anyhow::Result<()> {
    let pipeline = load_pipeline(path)?;
    let index = PipelineIndex::build(&pipeline)?;

    let stage_count = index.stages().count();
    println!("Items: {}", index.len());
    println!("Stages: {}", stage_count);
    println!("Steps: {}", index.len() - stage_count);

    println!("\nPositions:");
    for entry in index.entries() {
        let indent = "  ".repeat(entry.index.depth.max(1));
        let group = entry
            .index
            .group
            .as_deref()
            .map(|g| format!(" group={g}"))
            .unwrap_or_default();
        println!(
            "{}{} [{}] status={} path={}{}",
            indent, entry.item.id, entry.item.label, entry.item.status, entry.index.path, group
        );
    }

    Ok(())
}

fn cmd_resolve(path: &Path, stage: &str, mode: &PropagationMode) -> anyhow::Result<()> {
    let pipeline = load_pipeline(path)?;
    let variables = stagemap_pipeline::resolve_variables(&pipeline, stage, mode)?;
    tracing::info!(stage = %stage, mode = %mode, count = variables.len(), "Resolved variables");

    if variables.is_empty() {
        println!("(no variables)");
    }
    for var in &variables {
        println!("{}={}", var.name, var.value);
    }
    Ok(())
}

fn cmd_zip(value_path: &Path, metadata_path: &Path) -> anyhow::Result<()> {
    let value: StructuralNode<serde_json::Value> = load_tree(value_path)?;
    let metadata: StructuralNode<Provenance> = load_tree(metadata_path)?;
    let outcome = stagemap_pipeline::zip(&value, &metadata);

    for (id, provenance) in &outcome.entries {
        let line = provenance
            .line
            .map(|l| format!(":{l}"))
            .unwrap_or_default();
        println!("{} -> {}{} ({})", id, provenance.origin_path, line, provenance.local_name);
    }

    match &outcome.mismatch {
        Some(mismatch) => println!("\nPartial: {}", mismatch),
        None => println!("\nComplete: {} items", outcome.len()),
    }
    Ok(())
}

fn cmd_select(path: &Path, address: &str, gate: &GateArgs) -> anyhow::Result<()> {
    let pipeline = load_pipeline(path)?;
    let mut controller = SelectionController::new(load_gate(gate)?);

    let state = controller.restore_from_query(&pipeline, address);
    println!("{}", serde_json::to_string_pretty(state)?);

    match controller.address() {
        Some(canonical) => println!("Address: ?{canonical}"),
        None => println!("Address: (none)"),
    }
    Ok(())
}
