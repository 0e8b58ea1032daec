//! Campaign lifecycle controller.
//!
//! Validates control operations against the current lifecycle, spawns the
//! dispatch loop as an independent task, and persists the run record when
//! the loop finishes.

use crate::engine::sender::MessageSender;
use crate::engine::{CampaignEngine, CampaignRuntime};
use crate::model::{CampaignConfig, CampaignEvent, Lifecycle, RunRecord, StatusSnapshot};
use crate::normalize::{self, ValidationReport};
use crate::storage;
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

pub const MIN_BATCH_SIZE: usize = 1;
pub const MAX_BATCH_SIZE: usize = 100;
pub const MIN_DURATION_BUDGET: Duration = Duration::from_secs(60);

/// Stable rejection categories for control operations. The display text is
/// the free-form reason shown to operators.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ControlError {
    #[error("messaging provider is not connected")]
    SenderNotReady,
    #[error("a campaign is already running")]
    AlreadyRunning,
    #[error("message text is empty")]
    EmptyMessage,
    #[error("no valid recipients in the input")]
    NoValidRecipients,
    #[error("batch size {0} is outside {MIN_BATCH_SIZE}..={MAX_BATCH_SIZE}")]
    BatchSizeOutOfRange(usize),
    #[error("duration budget {} is below the 60s minimum", humantime::format_duration(*.0))]
    DurationTooShort(Duration),
    #[error("no campaign is running")]
    NotRunning,
    #[error("campaign is already paused")]
    AlreadyPaused,
    #[error("campaign is not paused")]
    NotPaused,
}

#[derive(Debug, Clone)]
pub struct StartRequest {
    pub message: String,
    /// Raw recipient candidates, normalized by the controller.
    pub recipients: Vec<String>,
    pub batch_size: usize,
    pub duration_budget: Duration,
}

/// Accepted-start receipt, returned before the campaign finishes.
#[derive(Debug, Clone, Serialize)]
pub struct StartReceipt {
    pub total: usize,
    pub batch_size: usize,
}

/// Status-query response: state snapshot plus the sender readiness flag.
#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub snapshot: StatusSnapshot,
    pub sender_ready: bool,
}

struct ActiveRun {
    runtime: Arc<CampaignRuntime>,
    handle: Option<JoinHandle<RunRecord>>,
}

pub struct CampaignController {
    sender: Arc<dyn MessageSender>,
    event_tx: mpsc::UnboundedSender<CampaignEvent>,
    runs_dir: PathBuf,
    settle_delay: Duration,
    /// Current or most recent campaign; at most one is ever live.
    active: Mutex<Option<ActiveRun>>,
}

impl CampaignController {
    pub fn new(
        sender: Arc<dyn MessageSender>,
        event_tx: mpsc::UnboundedSender<CampaignEvent>,
        runs_dir: PathBuf,
        settle_delay: Duration,
    ) -> Self {
        Self {
            sender,
            event_tx,
            runs_dir,
            settle_delay,
            active: Mutex::new(None),
        }
    }

    /// Start a campaign. Returns as soon as the dispatch task is spawned;
    /// completion is observable via events, [`Self::status`] and
    /// [`Self::wait`].
    pub async fn start(&self, req: StartRequest) -> Result<StartReceipt, ControlError> {
        if !self.sender.is_ready() {
            return Err(ControlError::SenderNotReady);
        }

        let mut active = self.active.lock().await;
        if let Some(run) = active.as_ref() {
            if run.runtime.snapshot().await.lifecycle.is_active() {
                return Err(ControlError::AlreadyRunning);
            }
        }

        let message = req.message.trim().to_string();
        if message.is_empty() {
            return Err(ControlError::EmptyMessage);
        }
        if !(MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&req.batch_size) {
            return Err(ControlError::BatchSizeOutOfRange(req.batch_size));
        }
        if req.duration_budget < MIN_DURATION_BUDGET {
            return Err(ControlError::DurationTooShort(req.duration_budget));
        }
        let queue = normalize::normalize_list(&req.recipients);
        if queue.is_empty() {
            return Err(ControlError::NoValidRecipients);
        }

        let config = CampaignConfig {
            message_text: message,
            batch_size: req.batch_size,
            duration_budget: req.duration_budget,
        };
        let total = queue.len();
        let runtime = CampaignRuntime::new(config, queue);
        let engine = CampaignEngine::new(
            Arc::clone(&runtime),
            Arc::clone(&self.sender),
            self.settle_delay,
        );

        let event_tx = self.event_tx.clone();
        let runs_dir = self.runs_dir.clone();
        let handle = tokio::spawn(async move {
            let record = engine.run(event_tx.clone()).await;
            // A failed log write is operational: it never reverts the
            // completed run or its counters.
            let log = match storage::save_run(&runs_dir, &record) {
                Ok(path) => path
                    .file_stem()
                    .and_then(|s| s.to_str())
                    .map(str::to_string),
                Err(err) => {
                    tracing::warn!(error = %err, "failed to persist run log");
                    None
                }
            };
            let _ = event_tx.send(CampaignEvent::Done { log });
            record
        });

        *active = Some(ActiveRun {
            runtime,
            handle: Some(handle),
        });
        Ok(StartReceipt {
            total,
            batch_size: req.batch_size,
        })
    }

    /// Suspend dispatch before the next window. The in-flight window is
    /// never cancelled.
    pub async fn pause(&self) -> Result<(), ControlError> {
        let active = self.active.lock().await;
        let Some(run) = active.as_ref() else {
            return Err(ControlError::NotRunning);
        };
        let mut st = run.runtime.state.lock().await;
        match st.lifecycle {
            Lifecycle::Running => {
                st.lifecycle = Lifecycle::Paused;
                run.runtime.set_paused(true);
                let snapshot = st.snapshot();
                drop(st);
                let _ = self.event_tx.send(CampaignEvent::Status(snapshot));
                Ok(())
            }
            Lifecycle::Paused => Err(ControlError::AlreadyPaused),
            _ => Err(ControlError::NotRunning),
        }
    }

    pub async fn resume(&self) -> Result<(), ControlError> {
        let active = self.active.lock().await;
        let Some(run) = active.as_ref() else {
            return Err(ControlError::NotRunning);
        };
        let mut st = run.runtime.state.lock().await;
        match st.lifecycle {
            Lifecycle::Paused => {
                st.lifecycle = Lifecycle::Running;
                run.runtime.set_paused(false);
                let snapshot = st.snapshot();
                drop(st);
                let _ = self.event_tx.send(CampaignEvent::Status(snapshot));
                Ok(())
            }
            _ => Err(ControlError::NotPaused),
        }
    }

    /// Request termination at the next window boundary. Clears pause, so a
    /// paused campaign stops without an intervening resume.
    pub async fn stop(&self) -> Result<(), ControlError> {
        let active = self.active.lock().await;
        let Some(run) = active.as_ref() else {
            return Err(ControlError::NotRunning);
        };
        let mut st = run.runtime.state.lock().await;
        match st.lifecycle {
            Lifecycle::Running | Lifecycle::Paused => {
                st.lifecycle = Lifecycle::Stopping;
                run.runtime.request_stop();
                let snapshot = st.snapshot();
                drop(st);
                let _ = self.event_tx.send(CampaignEvent::Status(snapshot));
                Ok(())
            }
            _ => Err(ControlError::NotRunning),
        }
    }

    /// Current snapshot plus the sender readiness flag.
    pub async fn status(&self) -> StatusResponse {
        let snapshot = {
            let active = self.active.lock().await;
            match active.as_ref() {
                Some(run) => run.runtime.snapshot().await,
                None => StatusSnapshot::idle(),
            }
        };
        StatusResponse {
            snapshot,
            sender_ready: self.sender.is_ready(),
        }
    }

    /// Normalize a raw recipient block without touching campaign state.
    pub fn validate(&self, raw: &str) -> ValidationReport {
        normalize::validate(raw)
    }

    /// Await the current campaign task, if one was started. Returns `None`
    /// when nothing was started or the record was already taken.
    pub async fn wait(&self) -> Result<Option<RunRecord>> {
        let handle = {
            let mut active = self.active.lock().await;
            active.as_mut().and_then(|run| run.handle.take())
        };
        match handle {
            Some(handle) => Ok(Some(handle.await.context("campaign task failed")?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::sender::testing::ScriptedSender;
    use crate::model::ProgressKind;
    use std::sync::atomic::Ordering;

    fn temp_runs_dir() -> PathBuf {
        std::env::temp_dir().join(format!("campaign-runs-{}", rand::random::<u64>()))
    }

    fn controller_with(
        sender: ScriptedSender,
        settle_delay: Duration,
    ) -> (CampaignController, mpsc::UnboundedReceiver<CampaignEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let controller =
            CampaignController::new(Arc::new(sender), tx, temp_runs_dir(), settle_delay);
        (controller, rx)
    }

    fn request(n: usize) -> StartRequest {
        StartRequest {
            message: "hello there".into(),
            recipients: (0..n).map(|i| format!("55119999900{i:02}")).collect(),
            batch_size: 1,
            duration_budget: Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn start_requires_ready_sender() {
        let sender = ScriptedSender::reliable();
        sender.ready.store(false, Ordering::Relaxed);
        let (controller, _rx) = controller_with(sender, Duration::from_millis(1));
        assert_eq!(
            controller.start(request(2)).await.unwrap_err(),
            ControlError::SenderNotReady
        );
    }

    #[tokio::test]
    async fn start_rejects_bad_configuration() {
        let (controller, _rx) =
            controller_with(ScriptedSender::reliable(), Duration::from_millis(1));

        let mut req = request(2);
        req.message = "   ".into();
        assert_eq!(
            controller.start(req).await.unwrap_err(),
            ControlError::EmptyMessage
        );

        let mut req = request(2);
        req.batch_size = 0;
        assert_eq!(
            controller.start(req).await.unwrap_err(),
            ControlError::BatchSizeOutOfRange(0)
        );

        let mut req = request(2);
        req.batch_size = 101;
        assert_eq!(
            controller.start(req).await.unwrap_err(),
            ControlError::BatchSizeOutOfRange(101)
        );

        let mut req = request(2);
        req.duration_budget = Duration::from_secs(59);
        assert_eq!(
            controller.start(req).await.unwrap_err(),
            ControlError::DurationTooShort(Duration::from_secs(59))
        );

        let mut req = request(0);
        req.recipients = vec!["bogus".into(), "   ".into()];
        assert_eq!(
            controller.start(req).await.unwrap_err(),
            ControlError::NoValidRecipients
        );
    }

    #[tokio::test]
    async fn start_while_running_is_rejected_without_touching_state() {
        let (controller, _rx) = controller_with(
            ScriptedSender::with_delay(Duration::from_millis(100)),
            Duration::from_millis(1),
        );
        let receipt = controller.start(request(3)).await.expect("first start");
        assert_eq!(receipt.total, 3);

        assert_eq!(
            controller.start(request(5)).await.unwrap_err(),
            ControlError::AlreadyRunning
        );
        assert_eq!(controller.status().await.snapshot.total, 3);

        controller.stop().await.expect("stop");
        controller.wait().await.expect("wait");
    }

    #[tokio::test]
    async fn control_operations_reject_wrong_lifecycle() {
        let (controller, _rx) =
            controller_with(ScriptedSender::reliable(), Duration::from_millis(1));

        // Nothing started yet.
        assert_eq!(controller.pause().await.unwrap_err(), ControlError::NotRunning);
        assert_eq!(controller.stop().await.unwrap_err(), ControlError::NotRunning);
        assert_eq!(controller.resume().await.unwrap_err(), ControlError::NotRunning);

        // Running but not paused.
        let (controller, _rx) = controller_with(
            ScriptedSender::with_delay(Duration::from_millis(100)),
            Duration::from_millis(1),
        );
        controller.start(request(3)).await.expect("start");
        assert_eq!(controller.resume().await.unwrap_err(), ControlError::NotPaused);

        controller.pause().await.expect("pause");
        assert_eq!(controller.pause().await.unwrap_err(), ControlError::AlreadyPaused);

        controller.stop().await.expect("stop");
        controller.wait().await.expect("wait");
    }

    #[tokio::test]
    async fn pause_blocks_new_windows_and_resume_continues() {
        let (controller, mut rx) = controller_with(
            ScriptedSender::with_delay(Duration::from_millis(100)),
            Duration::from_millis(50),
        );
        controller.start(request(3)).await.expect("start");

        // Pause while the first window is in flight; that window still
        // completes and emits its event, but no new window begins.
        tokio::time::sleep(Duration::from_millis(20)).await;
        controller.pause().await.expect("pause");
        tokio::time::sleep(Duration::from_millis(300)).await;

        let mut sent = 0;
        while let Ok(ev) = rx.try_recv() {
            if matches!(
                ev,
                CampaignEvent::Progress {
                    kind: ProgressKind::Sent,
                    ..
                }
            ) {
                sent += 1;
            }
        }
        assert_eq!(sent, 1, "only the in-flight window may settle while paused");
        assert_eq!(
            controller.status().await.snapshot.lifecycle,
            Lifecycle::Paused
        );

        controller.resume().await.expect("resume");
        let record = controller.wait().await.expect("wait").expect("record");
        assert_eq!(record.sent, 3);
        assert_eq!(record.lifecycle, Lifecycle::Completed);
    }

    #[tokio::test]
    async fn stop_while_paused_completes_and_leaves_remainder_untried() {
        let (controller, _rx) = controller_with(
            ScriptedSender::with_delay(Duration::from_millis(50)),
            Duration::from_millis(20),
        );
        controller.start(request(5)).await.expect("start");
        tokio::time::sleep(Duration::from_millis(10)).await;
        controller.pause().await.expect("pause");
        controller.stop().await.expect("stop");

        let record = controller.wait().await.expect("wait").expect("record");
        assert_eq!(record.lifecycle, Lifecycle::Completed);
        assert!(record.untried() > 0);
        assert_eq!(
            record.sent + record.failed,
            (record.queue_size - record.untried()) as u64
        );
    }

    #[tokio::test]
    async fn status_reflects_idle_then_completed() {
        let (controller, mut rx) =
            controller_with(ScriptedSender::reliable(), Duration::from_millis(1));
        let status = controller.status().await;
        assert_eq!(status.snapshot.lifecycle, Lifecycle::Idle);
        assert!(status.sender_ready);

        controller.start(request(2)).await.expect("start");
        let record = controller.wait().await.expect("wait").expect("record");
        assert_eq!(record.sent, 2);
        assert_eq!(
            controller.status().await.snapshot.lifecycle,
            Lifecycle::Completed
        );

        // The run log was persisted and announced.
        let mut done_log = None;
        while let Ok(ev) = rx.try_recv() {
            if let CampaignEvent::Done { log } = ev {
                done_log = log;
            }
        }
        let done_log = done_log.expect("done event carries the log reference");
        assert!(done_log.starts_with("run-"));
    }
}
