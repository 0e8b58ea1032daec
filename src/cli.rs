use crate::engine::sender::DryRunSender;
use crate::model::{CampaignEvent, Lifecycle, ProgressKind};
use crate::orchestrator::{CampaignController, StartRequest};
use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Output line routing for the stdout/stderr writer.
enum OutputLine {
    Stdout(String),
    Stderr(String),
}

/// Spawn a blocking writer for stdout/stderr to avoid blocking async tasks.
fn spawn_output_writer() -> (
    mpsc::UnboundedSender<OutputLine>,
    tokio::task::JoinHandle<()>,
) {
    let (tx, mut rx) = mpsc::unbounded_channel::<OutputLine>();
    let handle = tokio::task::spawn_blocking(move || {
        let stdout = std::io::stdout();
        let stderr = std::io::stderr();
        let mut out = std::io::LineWriter::new(stdout.lock());
        let mut err = std::io::LineWriter::new(stderr.lock());

        while let Some(line) = rx.blocking_recv() {
            match line {
                OutputLine::Stdout(msg) => {
                    let _ = writeln!(out, "{}", msg);
                }
                OutputLine::Stderr(msg) => {
                    let _ = writeln!(err, "{}", msg);
                }
            }
        }

        let _ = out.flush();
        let _ = err.flush();
    });
    (tx, handle)
}

#[derive(Debug, Parser, Clone)]
#[command(
    name = "campaign-dispatch",
    version,
    about = "Batch message-campaign dispatcher with pause/resume control"
)]
pub struct Cli {
    /// Message text to send to every recipient
    #[arg(long, conflicts_with = "message_file")]
    pub message: Option<String>,

    /// Read the message text from a file
    #[arg(long)]
    pub message_file: Option<PathBuf>,

    /// Recipient list file, one number per line ("-" for stdin)
    #[arg(long)]
    pub recipients: Option<PathBuf>,

    /// Messages dispatched concurrently per window (1..=100)
    #[arg(long, default_value_t = 1)]
    pub batch_size: usize,

    /// Wall-clock budget for the whole campaign (minimum 60s)
    #[arg(long, default_value = "60m")]
    pub duration: humantime::Duration,

    /// Settle delay between windows (throttles burst load)
    #[arg(long, default_value = "200ms")]
    pub settle_delay: humantime::Duration,

    /// Print the final run record as JSON instead of progress lines
    #[arg(long)]
    pub json: bool,

    /// Normalize and report the recipient list, then exit
    #[arg(long)]
    pub validate_only: bool,

    /// List the N most recent run logs and exit
    #[arg(long, value_name = "N")]
    pub history: Option<usize>,

    /// Simulated provider: transport failure rate (0.0..=1.0)
    #[arg(long, default_value_t = 0.0)]
    pub fail_rate: f64,

    /// Simulated provider: per-send latency (jittered)
    #[arg(long, default_value = "150ms")]
    pub send_delay: humantime::Duration,

    /// Simulated provider: RNG seed for reproducible runs
    #[arg(long)]
    pub seed: Option<u64>,

    /// Directory for per-run logs
    #[arg(long)]
    pub runs_dir: Option<PathBuf>,

    /// Export the final run record to a JSON file
    #[arg(long)]
    pub export_json: Option<PathBuf>,
}

pub async fn run(args: Cli) -> Result<()> {
    let runs_dir = args
        .runs_dir
        .clone()
        .unwrap_or_else(crate::storage::default_runs_dir);

    if let Some(limit) = args.history {
        return run_history(&runs_dir, limit);
    }

    let raw_recipients = read_recipients(&args)?;

    if args.validate_only {
        let report = crate::normalize::validate(&raw_recipients);
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let message = read_message(&args)?;
    run_campaign(args, runs_dir, message, raw_recipients).await
}

fn read_recipients(args: &Cli) -> Result<String> {
    let path = args
        .recipients
        .as_deref()
        .ok_or_else(|| anyhow!("--recipients is required (use \"-\" for stdin)"))?;
    if path == std::path::Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("read recipients from stdin")?;
        Ok(buf)
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("read recipients file {}", path.display()))
    }
}

fn read_message(args: &Cli) -> Result<String> {
    if let Some(message) = args.message.as_deref() {
        return Ok(message.to_string());
    }
    if let Some(path) = args.message_file.as_deref() {
        return std::fs::read_to_string(path)
            .with_context(|| format!("read message file {}", path.display()));
    }
    Err(anyhow!("either --message or --message-file is required"))
}

fn run_history(runs_dir: &std::path::Path, limit: usize) -> Result<()> {
    let records = crate::storage::load_recent(runs_dir, limit)?;
    if records.is_empty() {
        println!("no run logs in {}", runs_dir.display());
        return Ok(());
    }
    for record in records {
        println!(
            "{}  sent {}  failed {}  untried {}  (queue {}, batch {})",
            record.started_at_utc,
            record.sent,
            record.failed,
            record.untried(),
            record.queue_size,
            record.batch_size
        );
    }
    Ok(())
}

async fn run_campaign(
    args: Cli,
    runs_dir: PathBuf,
    message: String,
    raw_recipients: String,
) -> Result<()> {
    let (sender, mut conn_rx) = DryRunSender::new(
        args.fail_rate,
        Duration::from(args.send_delay),
        args.seed,
    );
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<CampaignEvent>();
    let controller = CampaignController::new(
        Arc::new(sender),
        event_tx.clone(),
        runs_dir.clone(),
        Duration::from(args.settle_delay),
    );

    // Forward provider connection events into the observer stream.
    let conn_event_tx = event_tx.clone();
    let conn_forwarder = tokio::spawn(async move {
        while let Some(ev) = conn_rx.recv().await {
            let _ = conn_event_tx.send(CampaignEvent::Connection(ev));
        }
    });

    let recipients: Vec<String> = raw_recipients
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string)
        .collect();
    let receipt = controller
        .start(StartRequest {
            message,
            recipients,
            batch_size: args.batch_size,
            duration_budget: Duration::from(args.duration),
        })
        .await
        .map_err(|err| anyhow!("campaign rejected: {err}"))?;

    let (out_tx, out_handle) = spawn_output_writer();
    if !args.json {
        let _ = out_tx.send(OutputLine::Stderr(format!(
            "dispatching to {} recipient(s), batch size {}",
            receipt.total, receipt.batch_size
        )));
    }

    let mut last_lifecycle = Lifecycle::Running;
    let mut saved_log: Option<String> = None;
    loop {
        tokio::select! {
            ev = event_rx.recv() => {
                match ev {
                    Some(CampaignEvent::Progress { kind, identifier, reason }) => {
                        if !args.json {
                            let line = match kind {
                                ProgressKind::Sent => format!("sent {identifier}"),
                                ProgressKind::Fail => format!(
                                    "fail {identifier}: {}",
                                    reason.as_deref().unwrap_or("unknown")
                                ),
                            };
                            let _ = out_tx.send(OutputLine::Stderr(line));
                        }
                    }
                    Some(CampaignEvent::Status(snapshot)) => {
                        if !args.json && snapshot.lifecycle != last_lifecycle {
                            let _ = out_tx.send(OutputLine::Stderr(format!(
                                "== {:?} ==",
                                snapshot.lifecycle
                            )));
                        }
                        last_lifecycle = snapshot.lifecycle;
                    }
                    Some(CampaignEvent::Connection(conn)) => {
                        if !args.json {
                            let _ = out_tx.send(OutputLine::Stderr(format!("provider: {conn:?}")));
                        }
                    }
                    Some(CampaignEvent::Done { log }) => {
                        saved_log = log;
                        break;
                    }
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => {
                let _ = controller.stop().await;
                let status = controller.status().await;
                let _ = out_tx.send(OutputLine::Stderr(format!(
                    "stop requested at {}/{} (finishing current window)",
                    status.snapshot.sent + status.snapshot.failed,
                    status.snapshot.total
                )));
            }
        }
    }

    let record = controller
        .wait()
        .await?
        .ok_or_else(|| anyhow!("campaign finished without a record"))?;

    if let Some(path) = args.export_json.as_deref() {
        crate::storage::export_json(path, &record)?;
        let _ = out_tx.send(OutputLine::Stderr(format!("Exported: {}", path.display())));
    }

    if args.json {
        let _ = out_tx.send(OutputLine::Stdout(serde_json::to_string_pretty(&record)?));
    } else {
        for line in crate::text_summary::build_text_summary(&record).lines {
            let _ = out_tx.send(OutputLine::Stdout(line));
        }
        if let Some(stem) = saved_log {
            let _ = out_tx.send(OutputLine::Stderr(format!(
                "Saved: {}",
                runs_dir.join(format!("{stem}.json")).display()
            )));
        }
    }

    conn_forwarder.abort();
    drop(out_tx);
    let _ = out_handle.await;
    Ok(())
}
