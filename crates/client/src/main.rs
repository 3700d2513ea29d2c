// crates/client/src/main.rs
//! `bizdiag` command-line client.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use bizdiag_client::{
    DiagnosticsClient, JobApi, JobOutcome, JobStatusView, PollOptions, Poller, Submission,
};
use bizdiag_core::{OutputMode, Tier};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "bizdiag", version, about = "Submit and track business diagnostic jobs")]
struct Cli {
    /// Server base URL.
    #[arg(long, default_value = "http://127.0.0.1:47900", env = "BIZDIAG_URL")]
    url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit intake data (JSON object) and print the job id.
    Submit {
        /// File with the wizard data. Reads stdin when omitted or `-`.
        #[arg(long)]
        file: Option<PathBuf>,
        /// Optional normalized intake bundle (JSON file).
        #[arg(long)]
        normalized: Option<PathBuf>,
        #[arg(long)]
        tier: Option<Tier>,
        #[arg(long)]
        output_mode: Option<OutputMode>,
        /// Make every LLM attempt fail with an overload.
        #[arg(long)]
        simulate_overload: bool,
        /// Poll until the job finishes and print the outcome.
        #[arg(long)]
        wait: bool,
    },
    /// Print a job's status.
    Status { job_id: String },
    /// Print a job's result (fails while the job is still working).
    Result { job_id: String },
    /// Cancel a queued or running job.
    Cancel { job_id: String },
    /// Poll a job until it finishes.
    Wait {
        job_id: String,
        #[arg(long, default_value_t = 300)]
        timeout_secs: u64,
        /// Leave the job running server-side on ctrl-c.
        #[arg(long)]
        keep_remote: bool,
    },
}

async fn read_json(path: Option<&PathBuf>) -> Result<serde_json::Value> {
    let text = match path {
        Some(p) if p.as_os_str() != "-" => tokio::fs::read_to_string(p)
            .await
            .with_context(|| format!("failed to read {}", p.display()))?,
        _ => {
            let mut buf = String::new();
            tokio::io::stdin().read_to_string(&mut buf).await?;
            buf
        }
    };
    serde_json::from_str(&text).context("input is not valid JSON")
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_progress(view: &JobStatusView) {
    eprintln!(
        "[{:>3}%] {} {}",
        view.progress_pct, view.status, view.last_event
    );
}

async fn wait_for(
    client: DiagnosticsClient,
    job_id: &str,
    timeout: Duration,
    cancel_remote: bool,
) -> Result<()> {
    let poller = Poller::new(
        client,
        PollOptions {
            timeout,
            cancel_remote_on_abort: cancel_remote,
            ..PollOptions::default()
        },
    );

    let token = CancellationToken::new();
    let ctrl_c = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            ctrl_c.cancel();
        }
    });

    match poller.wait_with_progress(job_id, &token, print_progress).await? {
        JobOutcome::Complete { report, provenance } => {
            print_json(&serde_json::json!({ "report": report, "provenance": provenance }))
        }
        JobOutcome::Failed {
            reason,
            ai_status,
            attempts,
        } => bail!(
            "job {job_id} failed after {attempts} attempt(s) ({}): {reason}",
            ai_status.as_deref().unwrap_or("unknown")
        ),
        JobOutcome::Cancelled => bail!("job {job_id} was cancelled"),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn,bizdiag_client=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let client = DiagnosticsClient::new(&cli.url)?;

    match cli.command {
        Command::Submit {
            file,
            normalized,
            tier,
            output_mode,
            simulate_overload,
            wait,
        } => {
            let mut submission = Submission::new(read_json(file.as_ref()).await?);
            if let Some(path) = normalized.as_ref() {
                submission.normalized_intake = Some(read_json(Some(path)).await?);
            }
            submission.tier = tier;
            submission.output_mode = output_mode;
            submission.simulate_overload = simulate_overload;

            let job_id = client.submit(&submission).await?;
            println!("{job_id}");
            if wait {
                wait_for(client, &job_id, PollOptions::default().timeout, true).await?;
            }
        }
        Command::Status { job_id } => print_json(&client.status(&job_id).await?)?,
        Command::Result { job_id } => print_json(&client.result(&job_id).await?)?,
        Command::Cancel { job_id } => {
            client.cancel(&job_id).await?;
            eprintln!("cancel requested for {job_id}");
        }
        Command::Wait {
            job_id,
            timeout_secs,
            keep_remote,
        } => {
            wait_for(
                client,
                &job_id,
                Duration::from_secs(timeout_secs),
                !keep_remote,
            )
            .await?
        }
    }
    Ok(())
}
