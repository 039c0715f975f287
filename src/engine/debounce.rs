use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, trace};

use crate::engine::validity::is_candidate;
use crate::quote::{FieldKey, QuoteRequest};

/// A single keystroke-level change to one field, with the form's validity
/// verdict for the new value.
#[derive(Debug, Clone)]
pub(crate) struct RawEdit {
    pub value: String,
    pub invalid: bool,
}

/// Turns the raw edit stream of one field into a stream of quote candidates.
///
/// The field's value at subscription start is evaluated like a first edit, so
/// a pre-populated form quotes without user interaction. Each accepted edit
/// restarts the quiet period; an edit that fails the validity filter also
/// withdraws whatever candidate was pending. A candidate equal to the
/// previously emitted one is dropped.
pub(crate) async fn run(
    field: FieldKey,
    initial: RawEdit,
    quiet: Duration,
    mut edits: mpsc::Receiver<RawEdit>,
    candidates: mpsc::Sender<QuoteRequest>,
) {
    let mut pending: Option<String> = None;
    let mut deadline = Instant::now();
    let mut last_emitted: Option<String> = None;

    if is_candidate(&initial.value, initial.invalid) {
        pending = Some(initial.value);
        deadline = Instant::now() + quiet;
    }

    loop {
        tokio::select! {
            edit = edits.recv() => {
                let Some(edit) = edit else { break };
                if is_candidate(&edit.value, edit.invalid) {
                    trace!(field = field.as_str(), value = %edit.value, "Edit accepted, quiet period restarted");
                    pending = Some(edit.value);
                    deadline = Instant::now() + quiet;
                } else {
                    trace!(field = field.as_str(), value = %edit.value, "Edit rejected");
                    pending = None;
                }
            }
            _ = sleep_until(deadline), if pending.is_some() => {
                let Some(value) = pending.take() else { continue };
                if last_emitted.as_deref() == Some(value.as_str()) {
                    debug!(field = field.as_str(), %value, "Duplicate candidate suppressed");
                    continue;
                }
                last_emitted = Some(value.clone());
                let request = QuoteRequest::for_field(field, value);
                if candidates.send(request).await.is_err() {
                    break;
                }
            }
        }
    }

    debug!(field = field.as_str(), "Debounce stage stopped");
}
