use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, trace};

/// Owns the single quote-expiry timer.
///
/// While armed, a background task ticks once per second: inside the warning
/// window it raises the expired-soon flag, and at the expiry instant it
/// stops and signals that a forced refresh is due. Arming while a timer is
/// already live clears it instead of stacking a second one; callers clear
/// explicitly before re-arming with a new deadline.
pub(crate) struct ExpiryScheduler {
    tick: Duration,
    warning_window: Duration,
    expired_soon: watch::Sender<bool>,
    refresh_due: mpsc::Sender<()>,
    timer: Option<JoinHandle<()>>,
}

impl ExpiryScheduler {
    pub fn new(
        tick: Duration,
        warning_window: Duration,
        expired_soon: watch::Sender<bool>,
        refresh_due: mpsc::Sender<()>,
    ) -> Self {
        Self {
            tick,
            warning_window,
            expired_soon,
            refresh_due,
            timer: None,
        }
    }

    pub fn arm(&mut self, expires_at: DateTime<Utc>) {
        if self.timer.is_some() {
            self.clear();
            return;
        }

        // The wall-clock deadline is converted once; the tick loop runs on
        // the runtime clock, which paused-time tests can control.
        let remaining = (expires_at - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        let deadline = Instant::now() + remaining;
        debug!(%expires_at, ?remaining, "Expiry timer armed");

        let tick = self.tick;
        let warning_window = self.warning_window;
        let expired_soon = self.expired_soon.clone();
        let refresh_due = self.refresh_due.clone();

        self.timer = Some(tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + tick, tick);
            loop {
                let now = ticker.tick().await;

                if deadline.saturating_duration_since(now) <= warning_window {
                    expired_soon.send_if_modified(|soon| {
                        if *soon {
                            false
                        } else {
                            trace!("Quote expires soon");
                            *soon = true;
                            true
                        }
                    });
                }

                if now >= deadline {
                    let _ = refresh_due.send(()).await;
                    break;
                }
            }
        }));
    }

    pub fn clear(&mut self) {
        let _ = self.expired_soon.send(false);
        if let Some(timer) = self.timer.take() {
            timer.abort();
            debug!("Expiry timer cleared");
        }
    }
}

impl Drop for ExpiryScheduler {
    fn drop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}
