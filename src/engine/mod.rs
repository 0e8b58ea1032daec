//! Campaign dispatch engine.
//!
//! Owns the live [`CampaignState`] and runs the batched dispatch loop:
//! fixed-size windows are fanned out concurrently, cooperative pause/stop
//! flags and the wall-clock deadline are observed at window boundaries, and
//! the loop settles into an immutable [`RunRecord`].

pub mod sender;

use crate::model::{
    now_utc_rfc3339, CampaignConfig, CampaignEvent, FailureEntry, Lifecycle, ProgressKind,
    RunRecord, StatusSnapshot,
};
use anyhow::{anyhow, Context};
use sender::MessageSender;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex, Notify};

/// Fallback poll interval while paused; `wake` normally unblocks sooner.
const PAUSE_POLL: Duration = Duration::from_millis(250);

/// The single live campaign record. Mutated only through the engine and the
/// controller's guarded operations; observers get [`StatusSnapshot`] copies.
pub(crate) struct CampaignState {
    pub lifecycle: Lifecycle,
    pub config: CampaignConfig,
    /// Fixed at start; consumed by index, never mutated during the run.
    pub queue: Vec<String>,
    pub cursor: usize,
    pub started_at_utc: String,
    pub deadline: Instant,
    pub current: Vec<String>,
    pub sent: u64,
    pub failed: u64,
    pub successes: Vec<String>,
    pub failures: Vec<FailureEntry>,
}

impl CampaignState {
    pub(crate) fn new(config: CampaignConfig, queue: Vec<String>) -> Self {
        let started_at = Instant::now();
        let deadline = started_at + config.duration_budget;
        Self {
            lifecycle: Lifecycle::Running,
            config,
            queue,
            cursor: 0,
            started_at_utc: now_utc_rfc3339(),
            deadline,
            current: Vec::new(),
            sent: 0,
            failed: 0,
            successes: Vec::new(),
            failures: Vec::new(),
        }
    }

    pub(crate) fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            lifecycle: self.lifecycle,
            started_at_utc: self.started_at_utc.clone(),
            duration_budget: self.config.duration_budget,
            batch_size: self.config.batch_size,
            sent: self.sent,
            failed: self.failed,
            total: self.queue.len(),
            current: self.current.clone(),
        }
    }

    /// Freeze the final run record. The live state stays readable for
    /// status queries after completion.
    fn to_record(&self, finished_at_utc: String) -> RunRecord {
        RunRecord {
            started_at_utc: self.started_at_utc.clone(),
            finished_at_utc,
            message_text: self.config.message_text.clone(),
            batch_size: self.config.batch_size,
            duration_budget: self.config.duration_budget,
            lifecycle: self.lifecycle,
            sent: self.sent,
            failed: self.failed,
            queue_size: self.queue.len(),
            successes: self.successes.clone(),
            failures: self.failures.clone(),
        }
    }
}

/// Shared handle between the controller and the dispatch loop: the state
/// plus the cooperative pause/stop flags and their wake signal.
pub(crate) struct CampaignRuntime {
    pub(crate) state: Mutex<CampaignState>,
    paused: AtomicBool,
    stop: AtomicBool,
    wake: Notify,
}

impl CampaignRuntime {
    pub(crate) fn new(config: CampaignConfig, queue: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(CampaignState::new(config, queue)),
            paused: AtomicBool::new(false),
            stop: AtomicBool::new(false),
            wake: Notify::new(),
        })
    }

    pub(crate) async fn snapshot(&self) -> StatusSnapshot {
        self.state.lock().await.snapshot()
    }

    /// Set or clear the cooperative pause flag and wake the loop.
    pub(crate) fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
        self.wake.notify_waiters();
    }

    /// Raise the cooperative stop flag; also clears pause so a paused loop
    /// proceeds straight to termination.
    pub(crate) fn request_stop(&self) {
        self.stop.store(true, Ordering::Relaxed);
        self.paused.store(false, Ordering::Relaxed);
        self.wake.notify_waiters();
    }

    fn stop_requested(&self) -> bool {
        self.stop.load(Ordering::Relaxed)
    }

    fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }
}

/// The batched dispatch loop over one campaign's queue.
pub(crate) struct CampaignEngine {
    runtime: Arc<CampaignRuntime>,
    sender: Arc<dyn MessageSender>,
    /// Throttle between windows; load shaping, not correctness.
    settle_delay: Duration,
}

impl CampaignEngine {
    pub(crate) fn new(
        runtime: Arc<CampaignRuntime>,
        sender: Arc<dyn MessageSender>,
        settle_delay: Duration,
    ) -> Self {
        Self {
            runtime,
            sender,
            settle_delay,
        }
    }

    /// Run the campaign to completion (queue exhausted, stop requested, or
    /// deadline passed) and return the immutable run record. Never fails:
    /// per-item errors become failure entries, event emission is
    /// best-effort.
    pub(crate) async fn run(self, event_tx: mpsc::UnboundedSender<CampaignEvent>) -> RunRecord {
        let rt = &self.runtime;
        let (text, batch_size, total, deadline) = {
            let st = rt.state.lock().await;
            (
                st.config.message_text.clone(),
                st.config.batch_size,
                st.queue.len(),
                st.deadline,
            )
        };

        let _ = event_tx.send(CampaignEvent::Status(rt.snapshot().await));
        tracing::info!(total, batch_size, "campaign started");

        loop {
            if rt.stop_requested() {
                break;
            }
            if Instant::now() > deadline {
                break;
            }
            // Pause is only observed here, between windows. The wake signal
            // keeps resume and stop prompt; the timed sleep is a fallback.
            while rt.is_paused() && !rt.stop_requested() {
                tokio::select! {
                    _ = rt.wake.notified() => {}
                    _ = tokio::time::sleep(PAUSE_POLL) => {}
                }
            }
            if rt.stop_requested() {
                break;
            }

            let window: Vec<String> = {
                let mut st = rt.state.lock().await;
                let start = st.cursor;
                if start >= st.queue.len() {
                    break;
                }
                let end = (start + batch_size).min(st.queue.len());
                let window = st.queue[start..end].to_vec();
                st.current = window.clone();
                window
            };
            let _ = event_tx.send(CampaignEvent::Status(rt.snapshot().await));

            // Fan out the whole window; every item settles independently,
            // one failure never aborts its siblings.
            futures::future::join_all(
                window
                    .iter()
                    .map(|identifier| self.dispatch_one(identifier, &text, &event_tx)),
            )
            .await;

            {
                let mut st = rt.state.lock().await;
                st.cursor += window.len();
                st.current.clear();
            }
            let _ = event_tx.send(CampaignEvent::Status(rt.snapshot().await));

            tokio::time::sleep(self.settle_delay).await;
        }

        let record = {
            let mut st = rt.state.lock().await;
            st.current.clear();
            st.lifecycle = Lifecycle::Completed;
            st.to_record(now_utc_rfc3339())
        };
        let _ = event_tx.send(CampaignEvent::Status(rt.snapshot().await));
        tracing::info!(
            sent = record.sent,
            failed = record.failed,
            untried = record.untried(),
            "campaign finished"
        );
        record
    }

    /// Resolve and send one identifier, then record its terminal
    /// classification. Resolution and transport failures fold into the same
    /// failure class with a readable reason.
    async fn dispatch_one(
        &self,
        identifier: &str,
        text: &str,
        event_tx: &mpsc::UnboundedSender<CampaignEvent>,
    ) {
        let outcome = async {
            let address = self
                .sender
                .resolve_address(identifier)
                .await
                .context("resolve address")?
                .ok_or_else(|| anyhow!("identifier has no reachable address"))?;
            self.sender.send_text(&address, text).await
        }
        .await;

        match outcome {
            Ok(()) => {
                {
                    let mut st = self.runtime.state.lock().await;
                    st.sent += 1;
                    st.successes.push(identifier.to_string());
                }
                let _ = event_tx.send(CampaignEvent::Progress {
                    kind: ProgressKind::Sent,
                    identifier: identifier.to_string(),
                    reason: None,
                });
            }
            Err(err) => {
                let reason = format!("{err:#}");
                {
                    let mut st = self.runtime.state.lock().await;
                    st.failed += 1;
                    st.failures.push(FailureEntry {
                        identifier: identifier.to_string(),
                        reason: reason.clone(),
                    });
                }
                let _ = event_tx.send(CampaignEvent::Progress {
                    kind: ProgressKind::Fail,
                    identifier: identifier.to_string(),
                    reason: Some(reason),
                });
            }
        }
    }
}
