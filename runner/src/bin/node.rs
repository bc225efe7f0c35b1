use clap::Parser;
use gridrun::{
    config::TransferConfig,
    node::{NodeError, NodeRecipe, NodeSettings, RunExecutor},
    seed::{RunIndex, SubmissionIndex},
    transfer::Transfers,
};
use std::{collections::BTreeMap, path::PathBuf, process::ExitCode};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "gridrun-node", version, about = "Execute the runs of one submission on a grid node")]
struct Cli {
    #[arg(short, long = "user_name", alias = "user")]
    user: String,

    /// Index of the submission
    #[arg(short, long = "job_number", default_value_t = 1)]
    job: SubmissionIndex,

    /// Runs on this node, at most 4
    #[arg(short = 'p', long = "processes", default_value_t = 1)]
    processes: RunIndex,

    #[arg(short, long, default_value_t = 100)]
    events: u64,

    /// Directory holding the inputs and the recipe
    #[arg(short, long)]
    base_dir: Option<PathBuf>,

    /// Remote output location, with protocol
    #[arg(short, long)]
    output: String,

    /// Additional `key=value` placeholders
    #[arg(short = 'x', long = "extra", value_parser = parse_extra)]
    extra: Vec<(String, String)>,

    /// Node recipe, defaults to `<base_dir>/gridrun-node.yaml`
    #[arg(long)]
    recipe: Option<PathBuf>,

    /// Transfer client used for the upload
    #[arg(long, default_value = "gfal")]
    transfer: String,

    /// Directory the run directories are created in
    #[arg(long, default_value = ".")]
    workdir: PathBuf,
}

fn parse_extra(value: &str) -> Result<(String, String), String> {
    value
        .split_once('=')
        .filter(|(key, _)| !key.is_empty())
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .ok_or_else(|| format!("expected key=value, got '{value}'"))
}

fn run(cli: Cli) -> Result<(), NodeError> {
    let base_dir = match cli.base_dir {
        Some(dir) => dir,
        None => std::env::current_dir().map_err(|source| NodeError::Io {
            path: PathBuf::from("."),
            source,
        })?,
    };
    let recipe_path = cli
        .recipe
        .unwrap_or_else(|| base_dir.join("gridrun-node.yaml"));
    let recipe = NodeRecipe::load(&recipe_path)?;
    let transfer = Transfers::load(&TransferConfig {
        name: cli.transfer.to_lowercase(),
        timeout: None,
    })?;

    let settings = NodeSettings {
        user: cli.user,
        job: cli.job,
        runs: cli.processes,
        events: cli.events,
        base_dir,
        output_dir: cli.output,
        extra: cli.extra.into_iter().collect::<BTreeMap<_, _>>(),
        workdir: cli.workdir,
    };

    let outputs = RunExecutor::new(settings, recipe, transfer)?.execute()?;
    info!("{} runs uploaded", outputs.len());

    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}
