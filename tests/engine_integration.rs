use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use chrono::Utc;

use ratesync::engine::{EngineTimings, FormSnapshot, SyncEngine, SyncHandle};
use ratesync::quote::{FieldKey, QuotePayload, QuoteRequest};
use ratesync::quote_provider::QuoteProvider;

/// Quoting stub with a fixed conversion table. Amounts are looked up in
/// either direction; the expiry is `ttl` from the moment of the call, so a
/// refreshed quote re-arms the timer with a fresh deadline.
struct StubQuoteProvider {
    rate: &'static str,
    table: &'static [(&'static str, &'static str)],
    ttl: chrono::Duration,
    delay: Option<Duration>,
    fail_requests: AtomicUsize,
    calls: Mutex<Vec<QuoteRequest>>,
}

impl StubQuoteProvider {
    fn new(
        rate: &'static str,
        table: &'static [(&'static str, &'static str)],
        ttl_secs: i64,
    ) -> Self {
        StubQuoteProvider {
            rate,
            table,
            ttl: chrono::Duration::seconds(ttl_secs),
            delay: None,
            fail_requests: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
        }
    }

    fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Makes the next `n` requests fail with a transport error.
    fn fail_next(&self, n: usize) {
        self.fail_requests.store(n, Ordering::SeqCst);
    }

    fn calls(&self) -> Vec<QuoteRequest> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl QuoteProvider for StubQuoteProvider {
    async fn request_quote(&self, request: &QuoteRequest) -> Result<QuotePayload> {
        self.calls.lock().unwrap().push(request.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        if self
            .fail_requests
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(anyhow!("quote service unavailable"));
        }

        let (sent, received) = self
            .table
            .iter()
            .find(|(sent, received)| match request {
                QuoteRequest::SentAmount(v) => v == sent,
                QuoteRequest::ReceivedAmount(v) => v == received,
            })
            .ok_or_else(|| anyhow!("no scripted quote for {request:?}"))?;

        Ok(QuotePayload {
            sent_amount: sent.to_string(),
            received_amount: received.to_string(),
            rate: self.rate.to_string(),
            expires_at: Utc::now() + self.ttl,
        })
    }
}

fn engine(provider: Arc<StubQuoteProvider>) -> SyncHandle {
    SyncEngine::spawn(provider, EngineTimings::default(), FormSnapshot::default())
}

fn sent(amount: &str) -> QuoteRequest {
    QuoteRequest::SentAmount(amount.to_string())
}

#[tokio::test(start_paused = true)]
async fn test_burst_of_edits_issues_one_call_with_last_value() {
    let provider = Arc::new(StubQuoteProvider::new("0.92", &[("100", "92")], 60));
    let handle = engine(Arc::clone(&provider));
    let form = handle.form();
    let loading = handle.loading();

    handle.edit(FieldKey::Sent, "1", false).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.edit(FieldKey::Sent, "10", false).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.edit(FieldKey::Sent, "100", false).await;
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(provider.calls(), vec![sent("100")]);
    let snapshot = form.borrow().clone();
    assert_eq!(snapshot.sent_amount, "100");
    assert_eq!(snapshot.received_amount, "92");
    assert_eq!(snapshot.rate, "0.92");
    assert!(!*loading.borrow());

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_same_value_twice_issues_no_second_call() {
    let provider = Arc::new(StubQuoteProvider::new("0.92", &[("100", "92")], 60));
    let handle = engine(Arc::clone(&provider));

    handle.edit(FieldKey::Sent, "100", false).await;
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(provider.calls().len(), 1);

    handle.edit(FieldKey::Sent, "100", false).await;
    tokio::time::sleep(Duration::from_millis(1000)).await;

    assert_eq!(provider.calls().len(), 1);
    assert!(!*handle.loading().borrow());

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_superseded_call_never_mutates_display() {
    let provider = Arc::new(
        StubQuoteProvider::new("0.92", &[("100", "92"), ("200", "184")], 60)
            .with_delay(Duration::from_secs(3)),
    );
    let handle = engine(Arc::clone(&provider));
    let form = handle.form();
    let loading = handle.loading();

    handle.edit(FieldKey::Sent, "100", false).await;
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(provider.calls().len(), 1);

    // Supersede the in-flight call before it resolves
    handle.edit(FieldKey::Sent, "200", false).await;
    tokio::time::sleep(Duration::from_millis(3100)).await;

    // Past the first call's would-be resolution: nothing applied yet
    assert_eq!(provider.calls(), vec![sent("100"), sent("200")]);
    assert_eq!(form.borrow().received_amount, "");
    assert_eq!(form.borrow().rate, "");
    assert!(*loading.borrow());

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(form.borrow().received_amount, "184");
    assert!(!*loading.borrow());

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failure_keeps_previous_display_and_clears_loading() {
    let provider = Arc::new(StubQuoteProvider::new("0.92", &[("100", "92")], 60));
    let handle = engine(Arc::clone(&provider));
    let form = handle.form();

    handle.edit(FieldKey::Sent, "100", false).await;
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(form.borrow().received_amount, "92");

    provider.fail_next(1);
    handle.edit(FieldKey::Sent, "300", false).await;
    tokio::time::sleep(Duration::from_millis(600)).await;

    assert_eq!(provider.calls().len(), 2);
    // Previously displayed quote survives the failure
    assert_eq!(form.borrow().received_amount, "92");
    assert_eq!(form.borrow().rate, "0.92");
    assert!(!*handle.loading().borrow());

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_retyped_last_asked_value_reuses_quote_and_rearms() {
    let provider = Arc::new(StubQuoteProvider::new("0.92", &[("100", "92")], 60));
    let handle = engine(Arc::clone(&provider));
    let expired_soon = handle.expired_soon();

    handle.edit(FieldKey::Sent, "100", false).await;
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(provider.calls().len(), 1);

    // A failed attempt leaves the last asked quote untouched
    provider.fail_next(1);
    handle.edit(FieldKey::Sent, "200", false).await;
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(provider.calls().len(), 2);

    // Retyping the last asked value is a no-op: no third call, but the
    // expiry timer is re-armed from the still-valid quote
    handle.edit(FieldKey::Sent, "100", false).await;
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(provider.calls().len(), 2);
    assert!(!*handle.loading().borrow());

    tokio::time::sleep(Duration::from_secs(56)).await;
    assert!(*expired_soon.borrow());

    // Expiry then triggers a forced refresh of the same request
    tokio::time::sleep(Duration::from_secs(6)).await;
    let calls = provider.calls();
    assert_eq!(calls.len(), 3);
    assert_eq!(calls[2], sent("100"));

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_expiry_warning_then_forced_refresh_without_flicker() {
    let provider = Arc::new(StubQuoteProvider::new("0.92", &[("100", "92")], 60));
    let handle = engine(Arc::clone(&provider));
    let mut form = handle.form();
    let expired_soon = handle.expired_soon();

    handle.edit(FieldKey::Sent, "100", false).await;
    tokio::time::sleep(Duration::from_millis(600)).await;
    form.borrow_and_update();

    tokio::time::sleep(Duration::from_secs(54)).await;
    assert!(!*expired_soon.borrow());

    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(*expired_soon.borrow());
    assert_eq!(provider.calls().len(), 1);

    tokio::time::sleep(Duration::from_secs(5)).await;
    let calls = provider.calls();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1], sent("100"));
    // Identical refreshed values: no republish, no flicker
    assert!(!form.has_changed().unwrap());
    assert!(!*expired_soon.borrow());

    // The timer is re-armed from the refreshed quote's expiry
    tokio::time::sleep(Duration::from_secs(56)).await;
    assert!(*expired_soon.borrow());

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_rate_expired_flag_during_forced_refresh() {
    let provider = Arc::new(
        StubQuoteProvider::new("0.92", &[("100", "92")], 10)
            .with_delay(Duration::from_secs(2)),
    );
    let handle = engine(Arc::clone(&provider));
    let rate_expired = handle.rate_expired();
    let loading = handle.loading();

    handle.edit(FieldKey::Sent, "100", false).await;
    tokio::time::sleep(Duration::from_millis(600)).await;
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert!(!*rate_expired.borrow());

    // Quote expires 10 s after acceptance; catch the refresh mid-flight
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(*rate_expired.borrow());
    assert!(*loading.borrow());

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert!(!*rate_expired.borrow());
    assert!(!*loading.borrow());

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_refresh_discarded_when_form_diverged() {
    let provider = Arc::new(StubQuoteProvider::new("0.92", &[("100", "92")], 10));
    let handle = engine(Arc::clone(&provider));
    let form = handle.form();

    handle.edit(FieldKey::Sent, "100", false).await;
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(provider.calls().len(), 1);

    // The user types on, but never produces a new candidate
    handle.edit(FieldKey::Sent, "100x", true).await;

    tokio::time::sleep(Duration::from_secs(11)).await;
    assert_eq!(provider.calls().len(), 2);

    // The refreshed quote no longer matches the form: silently dropped
    assert_eq!(form.borrow().sent_amount, "100x");
    assert_eq!(form.borrow().rate, "0.92");
    assert!(!*handle.loading().borrow());
    assert!(!*handle.rate_expired().borrow());
    assert!(!*handle.expired_soon().borrow());

    // No timer was re-armed after the discard
    tokio::time::sleep(Duration::from_secs(15)).await;
    assert_eq!(provider.calls().len(), 2);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_programmatic_writeback_is_not_an_edit() {
    let provider = Arc::new(StubQuoteProvider::new(
        "0.92",
        &[("100", "92"), ("50", "46")],
        60,
    ));
    let handle = engine(Arc::clone(&provider));
    let form = handle.form();

    handle.edit(FieldKey::Sent, "100", false).await;
    tokio::time::sleep(Duration::from_millis(600)).await;

    // Quoting the other field rewrites the sent field programmatically
    handle.edit(FieldKey::Received, "46", false).await;
    tokio::time::sleep(Duration::from_millis(600)).await;

    let snapshot = form.borrow().clone();
    assert_eq!(snapshot.sent_amount, "50");
    assert_eq!(snapshot.received_amount, "46");

    // The write-back must not re-enter the edit pipeline as a new candidate
    tokio::time::sleep(Duration::from_secs(2)).await;
    assert_eq!(provider.calls().len(), 2);

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_prepopulated_field_is_quoted_at_startup() {
    let provider = Arc::new(StubQuoteProvider::new("0.92", &[("100", "92")], 60));
    let handle = SyncEngine::spawn(
        Arc::clone(&provider) as Arc<dyn QuoteProvider>,
        EngineTimings::default(),
        FormSnapshot {
            sent_amount: "100".to_string(),
            ..FormSnapshot::default()
        },
    );

    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(provider.calls(), vec![sent("100")]);
    assert_eq!(handle.form().borrow().received_amount, "92");

    handle.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_orphans_inflight_and_clears_timer() {
    let provider = Arc::new(
        StubQuoteProvider::new("0.92", &[("100", "92")], 60)
            .with_delay(Duration::from_secs(3)),
    );
    let handle = engine(Arc::clone(&provider));
    let form = handle.form();
    let loading = handle.loading();

    handle.edit(FieldKey::Sent, "100", false).await;
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(provider.calls().len(), 1);
    assert!(*loading.borrow());

    handle.shutdown().await;

    // The orphaned call's resolution can no longer mutate anything
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(provider.calls().len(), 1);
    assert_eq!(form.borrow().received_amount, "");
    assert_eq!(form.borrow().rate, "");
    assert!(!*loading.borrow());
}

mod http_pipeline {
    use super::*;
    use ratesync::providers::http::HttpQuoteProvider;
    use wiremock::matchers::{body_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    // Real-time test: the engine drives the reqwest provider end to end
    #[test_log::test(tokio::test)]
    async fn test_engine_through_http_provider() {
        let mock_server = MockServer::start().await;
        let mock_response = r#"{
            "sentAmount": "100",
            "receivedAmount": "92",
            "rate": "0.92",
            "expiresAt": "2099-01-01T00:00:00Z"
        }"#;

        Mock::given(method("POST"))
            .and(path("/v1/rates/quote"))
            .and(body_json(serde_json::json!({"sentAmount": "100"})))
            .respond_with(ResponseTemplate::new(200).set_body_string(mock_response))
            .expect(1)
            .mount(&mock_server)
            .await;

        let provider = Arc::new(HttpQuoteProvider::new(&mock_server.uri()));
        let handle = SyncEngine::spawn(
            provider,
            EngineTimings::default(),
            FormSnapshot::default(),
        );
        let mut form = handle.form();

        handle.edit(FieldKey::Sent, "100", false).await;

        // One debounce period plus network slack
        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                form.changed().await.unwrap();
                if !form.borrow().rate.is_empty() {
                    break;
                }
            }
        })
        .await
        .expect("quote was not applied in time");

        let snapshot = form.borrow().clone();
        assert_eq!(snapshot.received_amount, "92");
        assert_eq!(snapshot.rate, "0.92");
        assert!(!*handle.loading().borrow());

        handle.shutdown().await;
    }
}
