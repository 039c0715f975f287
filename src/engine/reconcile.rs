use tokio::sync::watch;
use tracing::debug;

use crate::quote::{FieldKey, QuotePayload};

/// The displayed conversion state: both amount fields plus the rate label.
/// Published through a single watch channel, so observers always see the
/// three values change as one unit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormSnapshot {
    pub sent_amount: String,
    pub received_amount: String,
    pub rate: String,
}

impl FormSnapshot {
    pub fn amount_for(&self, field: FieldKey) -> &str {
        match field {
            FieldKey::Sent => &self.sent_amount,
            FieldKey::Received => &self.received_amount,
        }
    }

    fn matches(&self, payload: &QuotePayload) -> bool {
        self.rate == payload.rate
            && self.sent_amount == payload.sent_amount
            && self.received_amount == payload.received_amount
    }
}

/// Writes an accepted payload into the form. When the displayed state
/// already equals the payload, nothing is sent, so observers see no
/// redundant notification and the display does not re-render.
pub(crate) fn apply(form: &watch::Sender<FormSnapshot>, payload: &QuotePayload) {
    let updated = form.send_if_modified(|current| {
        if current.matches(payload) {
            return false;
        }
        current.sent_amount = payload.sent_amount.clone();
        current.received_amount = payload.received_amount.clone();
        current.rate = payload.rate.clone();
        true
    });

    if updated {
        debug!(
            sent = %payload.sent_amount,
            received = %payload.received_amount,
            rate = %payload.rate,
            "Form updated from quote"
        );
    }
}
