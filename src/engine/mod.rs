//! Quote synchronization engine.
//!
//! Raw keystrokes on the two amount fields flow through a per-field
//! debounce stage into a single event loop, which decides whether a quote
//! call is needed, tears down superseded in-flight calls, tracks the
//! accepted quote's expiry, and refreshes the quote when it lapses. The
//! loop is the only writer of the displayed form state; the presentation
//! layer observes it through watch channels.

mod arbiter;
mod debounce;
mod expiry;
mod reconcile;
pub mod validity;

pub use reconcile::FormSnapshot;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::engine::arbiter::InflightSlot;
use crate::engine::debounce::RawEdit;
use crate::engine::expiry::ExpiryScheduler;
use crate::quote::{FieldKey, QuotePayload, QuoteRequest};
use crate::quote_provider::QuoteProvider;

/// Timing knobs. Defaults match the production behavior: 500 ms quiet
/// period, 1 s expiry tick, 5 s expiry warning window.
#[derive(Debug, Clone)]
pub struct EngineTimings {
    pub debounce: Duration,
    pub expiry_tick: Duration,
    pub expiry_warning: Duration,
}

impl Default for EngineTimings {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(500),
            expiry_tick: Duration::from_secs(1),
            expiry_warning: Duration::from_secs(5),
        }
    }
}

enum Event {
    Edit {
        field: FieldKey,
        value: String,
        invalid: bool,
    },
    Resolved {
        seq: u64,
        request: QuoteRequest,
        result: Result<QuotePayload>,
    },
    RefreshResolved {
        request: QuoteRequest,
        result: Result<QuotePayload>,
    },
    Shutdown,
}

pub struct SyncEngine {
    provider: Arc<dyn QuoteProvider>,
    events_tx: mpsc::Sender<Event>,
    sent_edits: mpsc::Sender<RawEdit>,
    received_edits: mpsc::Sender<RawEdit>,
    sent_slot: InflightSlot,
    received_slot: InflightSlot,
    form: watch::Sender<FormSnapshot>,
    loading: watch::Sender<bool>,
    rate_expired: watch::Sender<bool>,
    scheduler: ExpiryScheduler,
    last_asked: Option<QuoteRequest>,
    expire_at: Option<DateTime<Utc>>,
    refresh_task: Option<JoinHandle<()>>,
}

impl SyncEngine {
    /// Starts the engine over a quoting provider and returns the form-side
    /// handle. `initial` seeds the displayed state; a pre-populated amount
    /// field is evaluated for quoting as if it had just been typed.
    pub fn spawn(
        provider: Arc<dyn QuoteProvider>,
        timings: EngineTimings,
        initial: FormSnapshot,
    ) -> SyncHandle {
        let (events_tx, events_rx) = mpsc::channel(64);
        let (candidates_tx, candidates_rx) = mpsc::channel(16);
        let (refresh_tx, refresh_rx) = mpsc::channel(4);

        let (form_tx, form_rx) = watch::channel(initial.clone());
        let (loading_tx, loading_rx) = watch::channel(false);
        let (expired_soon_tx, expired_soon_rx) = watch::channel(false);
        let (rate_expired_tx, rate_expired_rx) = watch::channel(false);

        let (sent_edits_tx, sent_edits_rx) = mpsc::channel(32);
        let (received_edits_tx, received_edits_rx) = mpsc::channel(32);

        tokio::spawn(debounce::run(
            FieldKey::Sent,
            RawEdit {
                value: initial.sent_amount,
                invalid: false,
            },
            timings.debounce,
            sent_edits_rx,
            candidates_tx.clone(),
        ));
        tokio::spawn(debounce::run(
            FieldKey::Received,
            RawEdit {
                value: initial.received_amount,
                invalid: false,
            },
            timings.debounce,
            received_edits_rx,
            candidates_tx,
        ));

        let scheduler = ExpiryScheduler::new(
            timings.expiry_tick,
            timings.expiry_warning,
            expired_soon_tx,
            refresh_tx,
        );

        let engine = SyncEngine {
            provider,
            events_tx: events_tx.clone(),
            sent_edits: sent_edits_tx,
            received_edits: received_edits_tx,
            sent_slot: InflightSlot::default(),
            received_slot: InflightSlot::default(),
            form: form_tx,
            loading: loading_tx,
            rate_expired: rate_expired_tx,
            scheduler,
            last_asked: None,
            expire_at: None,
            refresh_task: None,
        };

        let task = tokio::spawn(engine.run(events_rx, candidates_rx, refresh_rx));

        SyncHandle {
            events: events_tx,
            task: Some(task),
            form: form_rx,
            loading: loading_rx,
            expired_soon: expired_soon_rx,
            rate_expired: rate_expired_rx,
        }
    }

    async fn run(
        mut self,
        mut events: mpsc::Receiver<Event>,
        mut candidates: mpsc::Receiver<QuoteRequest>,
        mut refresh_due: mpsc::Receiver<()>,
    ) {
        info!("Quote sync engine started");
        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Some(Event::Edit { field, value, invalid }) => {
                        self.on_edit(field, value, invalid).await;
                    }
                    Some(Event::Resolved { seq, request, result }) => {
                        self.on_resolved(seq, request, result);
                    }
                    Some(Event::RefreshResolved { request, result }) => {
                        self.on_refresh_resolved(request, result);
                    }
                    Some(Event::Shutdown) | None => break,
                },
                Some(request) = candidates.recv() => self.on_candidate(request),
                Some(()) = refresh_due.recv() => self.on_refresh_due(),
            }
        }
        self.teardown();
    }

    async fn on_edit(&mut self, field: FieldKey, value: String, invalid: bool) {
        // The user is the writer at the raw-edit layer; mirror the keystroke
        // into the displayed state.
        self.form.send_if_modified(|form| {
            let current = match field {
                FieldKey::Sent => &mut form.sent_amount,
                FieldKey::Received => &mut form.received_amount,
            };
            if *current == value {
                false
            } else {
                *current = value.clone();
                true
            }
        });

        // A newer raw edit supersedes any in-flight call for this field,
        // before the edit has even become a candidate.
        self.slot_mut(field).supersede();
        self.refresh_loading();

        let edits = match field {
            FieldKey::Sent => &self.sent_edits,
            FieldKey::Received => &self.received_edits,
        };
        if edits.send(RawEdit { value, invalid }).await.is_err() {
            debug!(field = field.as_str(), "Debounce stage unavailable");
        }
    }

    fn on_candidate(&mut self, request: QuoteRequest) {
        // A new candidate supersedes passive expiry tracking while the
        // decision is made.
        self.scheduler.clear();

        if self.last_asked.as_ref() == Some(&request) {
            debug!(
                field = request.field().as_str(),
                "Candidate equals last asked quote, reusing it"
            );
            if let Some(expires_at) = self.expire_at {
                self.scheduler.arm(expires_at);
            }
            self.refresh_loading();
            return;
        }

        let field = request.field();
        let seq = self.slot_mut(field).begin();
        debug!(
            field = field.as_str(),
            amount = request.amount(),
            "Requesting quote"
        );

        let provider = Arc::clone(&self.provider);
        let events = self.events_tx.clone();
        let task = tokio::spawn(async move {
            let result = provider.request_quote(&request).await;
            let _ = events.send(Event::Resolved { seq, request, result }).await;
        });
        self.slot_mut(field).track(task);
        self.refresh_loading();
    }

    fn on_resolved(&mut self, seq: u64, request: QuoteRequest, result: Result<QuotePayload>) {
        let field = request.field();
        if !self.slot_mut(field).resolve(seq) {
            return;
        }

        match result {
            Ok(payload) => {
                self.last_asked = Some(request);
                self.accept(payload);
            }
            Err(error) => {
                error!(field = field.as_str(), error = %error, "Quote request failed");
                self.refresh_loading();
            }
        }
    }

    fn on_refresh_due(&mut self) {
        self.scheduler.clear();
        let Some(request) = self.last_asked.clone() else {
            return;
        };

        info!(field = request.field().as_str(), "Quote expired, refreshing rate");
        let _ = self.rate_expired.send(true);

        if let Some(task) = self.refresh_task.take() {
            task.abort();
        }
        let provider = Arc::clone(&self.provider);
        let events = self.events_tx.clone();
        let task = tokio::spawn(async move {
            let result = provider.request_quote(&request).await;
            let _ = events.send(Event::RefreshResolved { request, result }).await;
        });
        self.refresh_task = Some(task);
        self.refresh_loading();
    }

    fn on_refresh_resolved(&mut self, request: QuoteRequest, result: Result<QuotePayload>) {
        self.refresh_task = None;
        let _ = self.rate_expired.send(false);

        match result {
            Ok(payload) => {
                let field = request.field();
                let displayed = self.form.borrow().amount_for(field).to_string();
                if displayed != payload.amount_for(field) {
                    // The user typed something else while the refresh was in
                    // flight; the result no longer describes the form.
                    debug!(
                        field = field.as_str(),
                        "Refreshed quote discarded, form has diverged"
                    );
                    self.refresh_loading();
                    return;
                }
                self.last_asked = Some(request);
                self.accept(payload);
            }
            Err(error) => {
                error!(error = %error, "Quote refresh failed");
                self.refresh_loading();
            }
        }
    }

    fn accept(&mut self, payload: QuotePayload) {
        reconcile::apply(&self.form, &payload);
        self.expire_at = Some(payload.expires_at);
        self.refresh_loading();
        self.scheduler.clear();
        self.scheduler.arm(payload.expires_at);
    }

    fn refresh_loading(&mut self) {
        let loading = self.sent_slot.has_inflight()
            || self.received_slot.has_inflight()
            || self.refresh_task.is_some();
        self.loading.send_if_modified(|current| {
            if *current == loading {
                false
            } else {
                *current = loading;
                true
            }
        });
    }

    fn slot_mut(&mut self, field: FieldKey) -> &mut InflightSlot {
        match field {
            FieldKey::Sent => &mut self.sent_slot,
            FieldKey::Received => &mut self.received_slot,
        }
    }

    fn teardown(&mut self) {
        self.scheduler.clear();
        self.sent_slot.supersede();
        self.received_slot.supersede();
        if let Some(task) = self.refresh_task.take() {
            task.abort();
        }
        let _ = self.rate_expired.send(false);
        self.refresh_loading();
        info!("Quote sync engine stopped");
    }
}

/// Form-side handle to a running engine. Edits go in; the displayed state
/// and the loading / expiry signals come out as watch channels.
pub struct SyncHandle {
    events: mpsc::Sender<Event>,
    task: Option<JoinHandle<()>>,
    form: watch::Receiver<FormSnapshot>,
    loading: watch::Receiver<bool>,
    expired_soon: watch::Receiver<bool>,
    rate_expired: watch::Receiver<bool>,
}

impl SyncHandle {
    /// Reports one raw field edit together with the form's validity verdict
    /// for the new value.
    pub async fn edit(&self, field: FieldKey, value: impl Into<String>, invalid: bool) {
        let _ = self
            .events
            .send(Event::Edit {
                field,
                value: value.into(),
                invalid,
            })
            .await;
    }

    pub fn form(&self) -> watch::Receiver<FormSnapshot> {
        self.form.clone()
    }

    pub fn loading(&self) -> watch::Receiver<bool> {
        self.loading.clone()
    }

    pub fn expired_soon(&self) -> watch::Receiver<bool> {
        self.expired_soon.clone()
    }

    pub fn rate_expired(&self) -> watch::Receiver<bool> {
        self.rate_expired.clone()
    }

    /// Stops the engine: the expiry timer is cleared and in-flight calls are
    /// orphaned so their resolutions can never mutate state afterwards.
    pub async fn shutdown(mut self) {
        let _ = self.events.send(Event::Shutdown).await;
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for SyncHandle {
    fn drop(&mut self) {
        let _ = self.events.try_send(Event::Shutdown);
    }
}
