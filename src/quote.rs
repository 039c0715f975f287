use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The two mutually exclusive amount fields of the conversion form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKey {
    Sent,
    Received,
}

impl FieldKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKey::Sent => "sentAmount",
            FieldKey::Received => "receivedAmount",
        }
    }
}

/// Quote request body: exactly one of the two fields is populated.
///
/// Serializes externally tagged, so the wire shape is
/// `{"sentAmount": "100"}` or `{"receivedAmount": "92"}` — never both.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum QuoteRequest {
    SentAmount(String),
    ReceivedAmount(String),
}

impl QuoteRequest {
    pub fn for_field(field: FieldKey, amount: String) -> Self {
        match field {
            FieldKey::Sent => QuoteRequest::SentAmount(amount),
            FieldKey::Received => QuoteRequest::ReceivedAmount(amount),
        }
    }

    pub fn field(&self) -> FieldKey {
        match self {
            QuoteRequest::SentAmount(_) => FieldKey::Sent,
            QuoteRequest::ReceivedAmount(_) => FieldKey::Received,
        }
    }

    pub fn amount(&self) -> &str {
        match self {
            QuoteRequest::SentAmount(v) | QuoteRequest::ReceivedAmount(v) => v,
        }
    }
}

/// Server-confirmed conversion state. Immutable once received.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotePayload {
    pub sent_amount: String,
    pub received_amount: String,
    pub rate: String,
    pub expires_at: DateTime<Utc>,
}

impl QuotePayload {
    pub fn amount_for(&self, field: FieldKey) -> &str {
        match field {
            FieldKey::Sent => &self.sent_amount,
            FieldKey::Received => &self.received_amount,
        }
    }
}
