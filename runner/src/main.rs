use clap::{ArgGroup, Parser};
use gridrun::{
    campaign::{Action, Campaign},
    config::CampaignConfig,
};
use std::{error::Error, path::PathBuf, process::ExitCode};
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "gridrun", version, about = "Submit, monitor and collect a grid job campaign")]
#[command(group(ArgGroup::new("action").required(true).args([
    "write", "run", "status", "finalise", "merge", "clean", "kill", "clear",
])))]
struct Cli {
    /// Campaign configuration
    #[arg(short = 'C', long, default_value = "campaign.yaml")]
    config: PathBuf,

    /// Write job descriptions without submitting them
    #[arg(short, long)]
    write: bool,

    /// Write and submit every job of the campaign
    #[arg(short, long)]
    run: bool,

    /// Print the status of all submitted jobs
    #[arg(short, long)]
    status: bool,

    /// Fetch and classify the results, then clean the jobs up
    #[arg(short, long)]
    finalise: bool,

    /// Merge classified results
    #[arg(short, long)]
    merge: bool,

    /// Clean up all submitted jobs
    #[arg(short, long)]
    clean: bool,

    /// Cancel all submitted jobs
    #[arg(short, long)]
    kill: bool,

    /// Remove the staging area of this campaign
    #[arg(long)]
    clear: bool,
}

impl Cli {
    fn action(&self) -> Action {
        match self {
            Self { write: true, .. } => Action::Write,
            Self { run: true, .. } => Action::Run,
            Self { status: true, .. } => Action::Status,
            Self { finalise: true, .. } => Action::Finalise,
            Self { merge: true, .. } => Action::Merge,
            Self { clean: true, .. } => Action::Clean,
            Self { kill: true, .. } => Action::Kill,
            _ => Action::Clear,
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();

    let outcome = CampaignConfig::load(&cli.config)
        .map_err(Into::into)
        .and_then(Campaign::from_config)
        .and_then(|campaign| campaign.execute(cli.action()));

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            let mut source = e.source();
            while let Some(cause) = source {
                error!("  caused by: {cause}");
                source = cause.source();
            }
            ExitCode::FAILURE
        }
    }
}
