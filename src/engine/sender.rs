//! Messaging provider seam.
//!
//! The real provider client (session, pairing, transport) lives outside this
//! tool; the engine only needs to resolve an identifier to a sendable address
//! and push message text to it. `DryRunSender` is the built-in simulated
//! provider used by the CLI.

use crate::model::ConnectionEvent;
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};

/// Minimum identifier length the simulated provider considers reachable
/// (country prefix + local number).
const MIN_REACHABLE_LEN: usize = 12;

#[async_trait]
pub trait MessageSender: Send + Sync {
    /// Whether the provider session is ready to send. Checked as a
    /// precondition for starting a campaign.
    fn is_ready(&self) -> bool;

    /// Resolve a canonical identifier to a provider-specific address.
    /// `Ok(None)` means the identifier has no reachable address.
    async fn resolve_address(&self, identifier: &str) -> Result<Option<String>>;

    /// Deliver message text to a resolved address.
    async fn send_text(&self, address: &str, text: &str) -> Result<()>;
}

/// Simulated provider: immediately ready, resolves plausibly-long
/// identifiers, injects transport failures at a configurable rate.
pub struct DryRunSender {
    ready: AtomicBool,
    fail_rate: f64,
    send_delay: Duration,
    rng: Mutex<StdRng>,
}

impl DryRunSender {
    /// Build the sender plus its connection-event stream. The stream carries
    /// a single `Ready` up front, mirroring a provider that is already
    /// paired.
    pub fn new(
        fail_rate: f64,
        send_delay: Duration,
        seed: Option<u64>,
    ) -> (Self, mpsc::UnboundedReceiver<ConnectionEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(ConnectionEvent::Ready);
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let sender = Self {
            ready: AtomicBool::new(true),
            fail_rate: fail_rate.clamp(0.0, 1.0),
            send_delay,
            rng: Mutex::new(rng),
        };
        (sender, rx)
    }
}

#[async_trait]
impl MessageSender for DryRunSender {
    fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }

    async fn resolve_address(&self, identifier: &str) -> Result<Option<String>> {
        if identifier.len() >= MIN_REACHABLE_LEN {
            Ok(Some(format!("{identifier}@c.us")))
        } else {
            Ok(None)
        }
    }

    async fn send_text(&self, _address: &str, _text: &str) -> Result<()> {
        let (delay, fail) = {
            let mut rng = self.rng.lock().await;
            let jitter = rng.gen_range(0.5..1.5);
            (self.send_delay.mul_f64(jitter), rng.gen_bool(self.fail_rate))
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(anyhow!("simulated transport rejection"));
        }
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dry_run_reports_ready_on_construction() {
        let (sender, mut conn_rx) = DryRunSender::new(0.0, Duration::ZERO, Some(1));
        assert!(sender.is_ready());
        assert!(matches!(conn_rx.recv().await, Some(ConnectionEvent::Ready)));
    }

    #[tokio::test]
    async fn dry_run_resolves_prefixed_numbers_only() {
        let (sender, _rx) = DryRunSender::new(0.0, Duration::ZERO, Some(1));
        let addr = sender.resolve_address("5511999999999").await.unwrap();
        assert_eq!(addr.as_deref(), Some("5511999999999@c.us"));
        assert!(sender.resolve_address("12345").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn dry_run_fail_rate_one_always_fails() {
        let (sender, _rx) = DryRunSender::new(1.0, Duration::ZERO, Some(7));
        for _ in 0..5 {
            assert!(sender.send_text("x@c.us", "hi").await.is_err());
        }
    }

    #[tokio::test]
    async fn dry_run_fail_rate_zero_never_fails() {
        let (sender, _rx) = DryRunSender::new(0.0, Duration::ZERO, Some(7));
        for _ in 0..5 {
            assert!(sender.send_text("x@c.us", "hi").await.is_ok());
        }
    }
}
