use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use marketplace_scout::core::error::{ExtractionError, FetchError, NotifyError};
use marketplace_scout::evaluation::{evaluate, Criteria, EvaluationResult, Evaluator};
use marketplace_scout::monitoring::{ClaimOutcome, MemoryStore, NotificationStore};
use marketplace_scout::notify::{Ack, Notifier};
use marketplace_scout::pipeline::{Orchestrator, RunOutcome, RunSettings, RunState};
use marketplace_scout::scanner::{
    Availability, Currency, Extractor, Fetcher, HtmlExtractor, Listing, Money, RawListing,
    SearchPage, SearchQuery,
};

const SEARCH_URL: &str = "https://www.kleinanzeigen.de/s-musik/berlin/seite:{page}/op-1/k0c74l3331";

/// Serves canned pages; `Err(status)` simulates an HTTP failure for that page.
/// Listing pages come from `detail`; `None` answers every listing page with a 404.
struct CannedFetcher {
    pages: Vec<Result<Vec<String>, u16>>,
    detail: Option<String>,
    delay: Duration,
    calls: AtomicU32,
    detail_calls: Mutex<Vec<String>>,
}

impl CannedFetcher {
    fn new(pages: Vec<Result<Vec<String>, u16>>) -> Self {
        Self {
            pages,
            detail: None,
            delay: Duration::ZERO,
            calls: AtomicU32::new(0),
            detail_calls: Mutex::new(Vec::new()),
        }
    }

    fn with_detail(mut self, html: &str) -> Self {
        self.detail = Some(html.to_string());
        self
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }
}

#[async_trait]
impl Fetcher for CannedFetcher {
    async fn fetch_page(&self, query: &SearchQuery, page: u32) -> Result<SearchPage, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let url = query.page_url(page)?;
        match &self.pages[(page - 1) as usize] {
            Ok(entries) => Ok(SearchPage {
                number: page,
                url: url.clone(),
                entries: entries.iter().map(|html| RawListing::new(&url, html.clone())).collect(),
                has_next: (page as usize) < self.pages.len(),
            }),
            Err(status) => Err(FetchError::Status {
                url,
                status: *status,
            }),
        }
    }

    async fn fetch_detail(&self, url: &str) -> Result<String, FetchError> {
        self.detail_calls.lock().unwrap().push(url.to_string());
        self.detail.clone().ok_or_else(|| FetchError::Status {
            url: url.to_string(),
            status: 404,
        })
    }
}

/// Entries are JSON-encoded listings; anything else is unparsable.
struct JsonExtractor;

impl Extractor for JsonExtractor {
    fn extract(&self, raw: &RawListing) -> Result<Listing, ExtractionError> {
        serde_json::from_str(&raw.html).map_err(|_| ExtractionError::Empty)
    }
}

#[derive(Clone, Copy)]
enum Delivery {
    Ok,
    Transient,
    Permanent,
}

struct RecordingNotifier {
    delivery: Delivery,
    delay: Duration,
    sent: Mutex<Vec<String>>,
    attempts: AtomicU32,
}

impl RecordingNotifier {
    fn new(delivery: Delivery) -> Self {
        Self {
            delivery,
            delay: Duration::ZERO,
            sent: Mutex::new(Vec::new()),
            attempts: AtomicU32::new(0),
        }
    }

    fn sent(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    fn channel(&self) -> &'static str {
        "recording"
    }

    async fn send(&self, listing: &Listing, _evaluation: &EvaluationResult) -> Result<Ack, NotifyError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        match self.delivery {
            Delivery::Ok => {
                self.sent.lock().unwrap().push(listing.id.clone());
                Ok(Ack {
                    message_id: Some(1),
                    sent_at: Utc::now(),
                })
            }
            Delivery::Transient => Err(NotifyError::Transient {
                reason: "HTTP 502".into(),
                retry_after: None,
            }),
            Delivery::Permanent => Err(NotifyError::Permanent {
                reason: "HTTP 400: chat not found".into(),
            }),
        }
    }

    async fn send_text(&self, _text: &str) -> Result<Ack, NotifyError> {
        Ok(Ack {
            message_id: None,
            sent_at: Utc::now(),
        })
    }
}

fn criteria() -> Criteria {
    Criteria::new(
        Money::new(59999, Currency::Eur),
        ["good", "very good", "excellent", "like new", "gut"],
        ["defekt", "broken", "kaputt"],
        50.0,
    )
}

fn settings() -> RunSettings {
    RunSettings {
        fetch_details: false,
        ..RunSettings::default()
    }
}

fn listing(id: &str, price_eur: i64, description: &str) -> Listing {
    Listing {
        id: id.to_string(),
        title: format!("Teenage Engineering OP-1 #{}", id),
        price: Some(Money::new(price_eur * 100, Currency::Eur)),
        condition: Some("good".into()),
        description: description.to_string(),
        location: Some("10115 Berlin".into()),
        distance_km: Some(20.0),
        availability: Availability::Available,
        url: format!("https://www.kleinanzeigen.de/s-anzeige/op-1/{}", id),
        posted_at: None,
    }
}

fn json(listing: &Listing) -> String {
    serde_json::to_string(listing).unwrap()
}

fn orchestrator(
    fetcher: Arc<dyn Fetcher>,
    extractor: Arc<dyn Extractor>,
    store: Arc<dyn NotificationStore>,
    notifier: Arc<dyn Notifier>,
) -> Orchestrator {
    Orchestrator::new(
        fetcher,
        extractor,
        Arc::new(Evaluator::new(Arc::new(criteria()))),
        store,
        notifier,
    )
    .with_settings(settings())
}

fn query(max_pages: u32) -> SearchQuery {
    SearchQuery::new(SEARCH_URL, max_pages)
}

fn html_entry(adid: &str, price: &str, description: &str) -> String {
    format!(
        r#"<article class="aditem" data-adid="{adid}" data-href="/s-anzeige/teenage-engineering-op-1/{adid}-74-3331">
            <div class="aditem-main--top--left">10115 Mitte (20 km)</div>
            <div class="aditem-main--middle">
                <h2><a class="ellipsis" href="/s-anzeige/teenage-engineering-op-1/{adid}-74-3331">Teenage Engineering OP-1</a></h2>
                <p class="aditem-main--middle--description">{description}</p>
                <p class="aditem-main--middle--price-shipping--price">{price}</p>
            </div>
        </article>"#
    )
}

#[tokio::test]
async fn end_to_end_only_the_good_deal_is_notified() {
    let fetcher = Arc::new(CannedFetcher::new(vec![Ok(vec![
        html_entry("1000000001", "450 €", "Zustand: gut, mit Case"),
        html_entry("1000000002", "600 €", "Zustand: gut, wie neu"),
        html_entry("1000000003", "300 €", "Zustand: gut, broken display"),
    ])]));
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(RecordingNotifier::new(Delivery::Ok));

    let report = orchestrator(
        fetcher,
        Arc::new(HtmlExtractor::new(Currency::Eur)),
        store.clone(),
        notifier.clone(),
    )
    .run(&query(1))
    .await;

    assert_eq!(report.state, RunState::Done);
    assert_eq!(report.outcome, RunOutcome::Success);
    assert_eq!(report.counters.processed, 3);
    assert_eq!(report.counters.matched, 1);
    assert_eq!(report.counters.notified, 1);
    assert_eq!(notifier.sent(), vec!["1000000001".to_string()]);
    assert_eq!(store.notified_ids().await, vec!["1000000001".to_string()]);
}

#[tokio::test]
async fn end_to_end_exclusions_carry_their_reason() {
    let extractor = HtmlExtractor::new(Currency::Eur);
    let criteria = criteria();
    let decide = |html: String| {
        let listing = extractor
            .extract(&RawListing::new(SEARCH_URL, html))
            .unwrap();
        evaluate(&listing, &criteria)
    };

    let good = decide(html_entry("1000000001", "450 €", "Zustand: gut, mit Case"));
    assert!(good.matches);

    let pricey = decide(html_entry("1000000002", "600 €", "Zustand: gut, wie neu"));
    assert!(!pricey.matches);
    assert!(
        pricey.reasons[0].starts_with("price exceeds ceiling"),
        "got {:?}",
        pricey.reasons
    );

    let broken = decide(html_entry("1000000003", "300 €", "Zustand: gut, broken display"));
    assert!(!broken.matches);
    assert_eq!(broken.reasons[0], "excluded keyword (broken)");
}

const DETAIL_PAGE: &str = r#"<html><body>
    <h1 id="viewad-title">Teenage Engineering OP-1</h1>
    <h2 id="viewad-price">450 €</h2>
    <ul class="addetailslist">
        <li class="addetailslist--detail">Zustand<span class="addetailslist--detail--value">Gut</span></li>
    </ul>
    <p id="viewad-description-text">Kaum benutzt, mit Originalverpackung und Case.</p>
</body></html>"#;

#[tokio::test]
async fn listing_page_supplies_the_condition() {
    let page = vec![Ok(vec![html_entry("1000000011", "450 €", "Synthesizer mit Case")])];
    let fetcher = Arc::new(CannedFetcher::new(page.clone()).with_detail(DETAIL_PAGE));
    let notifier = Arc::new(RecordingNotifier::new(Delivery::Ok));

    let report = orchestrator(
        fetcher.clone(),
        Arc::new(HtmlExtractor::new(Currency::Eur)),
        Arc::new(MemoryStore::new()),
        notifier.clone(),
    )
    .with_settings(RunSettings {
        fetch_details: true,
        ..RunSettings::default()
    })
    .run(&query(1))
    .await;

    assert_eq!(report.outcome, RunOutcome::Success);
    assert_eq!(notifier.sent(), vec!["1000000011".to_string()]);
    let requested = fetcher.detail_calls.lock().unwrap().clone();
    assert_eq!(requested.len(), 1);
    assert!(requested[0].ends_with("/s-anzeige/teenage-engineering-op-1/1000000011-74-3331"));

    // Without the listing page the summary has no condition.
    let notifier = Arc::new(RecordingNotifier::new(Delivery::Ok));
    let report = orchestrator(
        Arc::new(CannedFetcher::new(page)),
        Arc::new(HtmlExtractor::new(Currency::Eur)),
        Arc::new(MemoryStore::new()),
        notifier.clone(),
    )
    .run(&query(1))
    .await;
    assert_eq!(report.counters.matched, 0);
    assert!(notifier.sent().is_empty());
}

#[tokio::test]
async fn unavailable_listing_page_falls_back_to_summary() {
    let fetcher = Arc::new(CannedFetcher::new(vec![Ok(vec![html_entry(
        "1000000021",
        "450 €",
        "Zustand: gut, mit Case",
    )])]));
    let notifier = Arc::new(RecordingNotifier::new(Delivery::Ok));

    let report = orchestrator(
        fetcher.clone(),
        Arc::new(HtmlExtractor::new(Currency::Eur)),
        Arc::new(MemoryStore::new()),
        notifier.clone(),
    )
    .with_settings(RunSettings {
        fetch_details: true,
        ..RunSettings::default()
    })
    .run(&query(1))
    .await;

    assert_eq!(fetcher.detail_calls.lock().unwrap().len(), 1);
    assert_eq!(report.state, RunState::Done);
    assert_eq!(report.outcome, RunOutcome::Success);
    assert_eq!(report.counters.errored, 0);
    assert_eq!(notifier.sent(), vec!["1000000021".to_string()]);
}

#[tokio::test]
async fn second_run_does_not_renotify() {
    let page = vec![Ok(vec![json(&listing("a", 450, "like new"))])];
    let store = Arc::new(MemoryStore::new());
    let notifier = Arc::new(RecordingNotifier::new(Delivery::Ok));

    for _ in 0..2 {
        let report = orchestrator(
            Arc::new(CannedFetcher::new(page.clone())),
            Arc::new(JsonExtractor),
            store.clone(),
            notifier.clone(),
        )
        .run(&query(1))
        .await;
        assert_eq!(report.outcome, RunOutcome::Success);
    }

    assert_eq!(notifier.attempts.load(Ordering::SeqCst), 1);
    assert_eq!(notifier.sent(), vec!["a".to_string()]);
    assert!(tokio_test::assert_ok!(store.has_notified("a").await));
}

#[tokio::test]
async fn one_unparsable_entry_does_not_stop_the_run() {
    let mut entries: Vec<String> = (0..9)
        .map(|i| json(&listing(&format!("ok-{}", i), 700, "too expensive")))
        .collect();
    entries.insert(4, "<div>layout changed</div>".to_string());

    let report = orchestrator(
        Arc::new(CannedFetcher::new(vec![Ok(entries)])),
        Arc::new(JsonExtractor),
        Arc::new(MemoryStore::new()),
        Arc::new(RecordingNotifier::new(Delivery::Ok)),
    )
    .run(&query(1))
    .await;

    assert_eq!(report.state, RunState::Done);
    assert_eq!(report.counters.processed, 9);
    assert_eq!(report.counters.errored, 1);
    assert_eq!(report.outcome, RunOutcome::PartialFailure);
}

#[tokio::test]
async fn first_page_failure_is_fatal() {
    let notifier = Arc::new(RecordingNotifier::new(Delivery::Ok));
    let report = orchestrator(
        Arc::new(CannedFetcher::new(vec![Err(503)])),
        Arc::new(JsonExtractor),
        Arc::new(MemoryStore::new()),
        notifier.clone(),
    )
    .run(&query(3))
    .await;

    assert_eq!(report.state, RunState::Failed);
    assert_eq!(report.outcome, RunOutcome::FatalFailure);
    assert!(report.error.unwrap().contains("503"));
    assert_eq!(notifier.attempts.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn later_page_failure_keeps_earlier_results() {
    let fetcher = Arc::new(CannedFetcher::new(vec![
        Ok(vec![json(&listing("a", 450, "mint"))]),
        Err(500),
        Ok(vec![json(&listing("c", 450, "mint"))]),
    ]));
    let notifier = Arc::new(RecordingNotifier::new(Delivery::Ok));

    let report = orchestrator(
        fetcher.clone(),
        Arc::new(JsonExtractor),
        Arc::new(MemoryStore::new()),
        notifier.clone(),
    )
    .run(&query(3))
    .await;

    assert_eq!(report.state, RunState::Done);
    assert_eq!(report.outcome, RunOutcome::PartialFailure);
    assert_eq!(report.pages_fetched, 1);
    assert_eq!(report.counters.fetch_errors, 1);
    assert_eq!(notifier.sent(), vec!["a".to_string()]);
    // Pagination stops at the failed page.
    assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn permanent_notifier_failure_fails_the_run() {
    let store = Arc::new(MemoryStore::new());
    let report = orchestrator(
        Arc::new(CannedFetcher::new(vec![Ok(vec![json(&listing("a", 450, "mint"))])])),
        Arc::new(JsonExtractor),
        store.clone(),
        Arc::new(RecordingNotifier::new(Delivery::Permanent)),
    )
    .run(&query(1))
    .await;

    assert_eq!(report.state, RunState::Failed);
    assert_eq!(report.outcome, RunOutcome::FatalFailure);
    assert!(report.error.unwrap().contains("chat not found"));
    assert!(!store.has_notified("a").await.unwrap());
    assert_eq!(
        store.try_claim("a", Duration::from_secs(60)).await.unwrap(),
        ClaimOutcome::Claimed
    );
}

#[tokio::test]
async fn transient_notifier_failure_is_retried_next_run() {
    let store = Arc::new(MemoryStore::new());
    let page = vec![Ok(vec![json(&listing("a", 450, "mint"))])];

    let report = orchestrator(
        Arc::new(CannedFetcher::new(page.clone())),
        Arc::new(JsonExtractor),
        store.clone(),
        Arc::new(RecordingNotifier::new(Delivery::Transient)),
    )
    .run(&query(1))
    .await;
    assert_eq!(report.state, RunState::Done);
    assert_eq!(report.counters.errored, 1);
    assert_eq!(report.counters.notified, 0);

    let working = Arc::new(RecordingNotifier::new(Delivery::Ok));
    let retry = orchestrator(
        Arc::new(CannedFetcher::new(page)),
        Arc::new(JsonExtractor),
        store.clone(),
        working.clone(),
    )
    .run(&query(1))
    .await;
    assert_eq!(retry.outcome, RunOutcome::Success);
    assert_eq!(working.sent(), vec!["a".to_string()]);
}

#[tokio::test]
async fn overlapping_runs_notify_once() {
    let page = vec![Ok(vec![json(&listing("a", 450, "mint"))])];
    let store: Arc<dyn NotificationStore> = Arc::new(MemoryStore::new());
    let mut slow = RecordingNotifier::new(Delivery::Ok);
    slow.delay = Duration::from_millis(50);
    let notifier = Arc::new(slow);

    let first = orchestrator(
        Arc::new(CannedFetcher::new(page.clone())),
        Arc::new(JsonExtractor),
        store.clone(),
        notifier.clone(),
    );
    let second = orchestrator(
        Arc::new(CannedFetcher::new(page)),
        Arc::new(JsonExtractor),
        store.clone(),
        notifier.clone(),
    );

    let q = query(1);
    let (a, b) = tokio::join!(first.run(&q), second.run(&q));

    assert_eq!(notifier.sent(), vec!["a".to_string()]);
    assert_eq!(a.counters.notified + b.counters.notified, 1);
    assert_eq!(a.counters.duplicates + b.counters.duplicates, 1);
}

#[tokio::test]
async fn timeout_reports_partial_failure() {
    let fetcher = Arc::new(
        CannedFetcher::new(vec![Ok(vec![json(&listing("a", 450, "mint"))])])
            .slow(Duration::from_secs(5)),
    );
    let notifier = Arc::new(RecordingNotifier::new(Delivery::Ok));

    let report = orchestrator(
        fetcher,
        Arc::new(JsonExtractor),
        Arc::new(MemoryStore::new()),
        notifier.clone(),
    )
    .with_settings(RunSettings {
        timeout: Duration::from_millis(50),
        ..settings()
    })
    .run(&query(1))
    .await;

    assert!(report.timed_out);
    assert_eq!(report.state, RunState::Done);
    assert_eq!(report.outcome, RunOutcome::PartialFailure);
    assert!(notifier.sent().is_empty());
}
