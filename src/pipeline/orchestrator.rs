use futures::stream::{self, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn, Instrument};

use super::context::{Counter, RunContext, RunReport, RunState};
use crate::core::error::RunError;
use crate::core::Config;
use crate::evaluation::Evaluator;
use crate::monitoring::{ClaimOutcome, NotificationStore};
use crate::notify::Notifier;
use crate::scanner::{Extractor, Fetcher, Paginator, RawListing, SearchQuery};

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub concurrency: usize,
    pub timeout: Duration,
    pub claim_lease: Duration,
    pub retention: chrono::Duration,
    pub fetch_details: bool,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            timeout: Duration::from_secs(240),
            claim_lease: Duration::from_secs(600),
            retention: chrono::Duration::days(90),
            fetch_details: true,
        }
    }
}

impl RunSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            concurrency: config.run.concurrency.max(1),
            timeout: config.run.timeout(),
            claim_lease: config.dedup.claim_lease(),
            retention: config.dedup.retention(),
            fetch_details: config.marketplace.fetch_details,
        }
    }
}

/// How a single entry ended.
#[derive(Debug, Clone, PartialEq, Eq)]
enum EntryOutcome {
    Errored,
    Excluded { id: String },
    Duplicate { id: String },
    Notified { id: String },
    Failed { id: String },
}

impl EntryOutcome {
    fn listing_id(&self) -> Option<&str> {
        match self {
            EntryOutcome::Errored => None,
            EntryOutcome::Excluded { id }
            | EntryOutcome::Duplicate { id }
            | EntryOutcome::Notified { id }
            | EntryOutcome::Failed { id } => Some(id),
        }
    }
}

/// Drives one run: pages in, alerts out.
pub struct Orchestrator {
    fetcher: Arc<dyn Fetcher>,
    extractor: Arc<dyn Extractor>,
    evaluator: Arc<Evaluator>,
    store: Arc<dyn NotificationStore>,
    notifier: Arc<dyn Notifier>,
    settings: RunSettings,
}

impl Orchestrator {
    pub fn new(
        fetcher: Arc<dyn Fetcher>,
        extractor: Arc<dyn Extractor>,
        evaluator: Arc<Evaluator>,
        store: Arc<dyn NotificationStore>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            fetcher,
            extractor,
            evaluator,
            store,
            notifier,
            settings: RunSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: RunSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    /// Standalone run with its own context and span.
    pub async fn run(&self, query: &SearchQuery) -> RunReport {
        let ctx = RunContext::new(query.clone(), Arc::new(self.evaluator.criteria().clone()));
        let span = tracing::info_span!("run", run_id = %ctx.run_id);
        self.execute(ctx).instrument(span).await
    }

    /// Runs FETCHING/PROCESSING on an initialized context and closes it.
    pub async fn execute(&self, mut ctx: RunContext) -> RunReport {
        info!(
            query = %ctx.query.search_url,
            max_pages = ctx.query.max_pages,
            "🚀 Scan run starting"
        );

        let outcome = tokio::time::timeout(self.settings.timeout, self.drive(&mut ctx)).await;
        let report = match outcome {
            Ok(Ok(())) => ctx.finish(),
            Ok(Err(e)) => ctx.fail(&e),
            Err(_) => {
                warn!(
                    timeout = ?self.settings.timeout,
                    "⏰ Run timed out; unfinished listings will be retried next run"
                );
                ctx.mark_timed_out();
                ctx.finish()
            }
        };

        info!(
            outcome = ?report.outcome,
            processed = report.counters.processed,
            matched = report.counters.matched,
            notified = report.counters.notified,
            errored = report.counters.errored,
            "🏁 Scan run finished"
        );
        report
    }

    async fn drive(&self, ctx: &mut RunContext) -> Result<(), RunError> {
        let query = ctx.query.clone();
        let mut pages = Paginator::new(self.fetcher.as_ref(), &query);

        ctx.transition(RunState::Fetching);
        while let Some(page) = pages.next_page().await {
            let page = match page {
                Ok(page) => page,
                Err(e) if ctx.pages_fetched() == 0 => {
                    return Err(RunError::TotalFetchFailure(e));
                }
                Err(e) => {
                    ctx.record(Counter::FetchError);
                    warn!(error = %e, "⚠️  Search page failed; stopping pagination");
                    break;
                }
            };
            ctx.page_fetched();

            ctx.transition(RunState::Processing);
            let seen = self.process_page(ctx, page.entries).await?;
            if let Err(e) = self.store.mark_seen(&seen).await {
                warn!(error = %e, "Failed to refresh last-seen timestamps");
            }
            ctx.transition(RunState::Fetching);
        }

        if let Err(e) = self.store.evict_stale(self.settings.retention).await {
            warn!(error = %e, "Failed to evict stale notification records");
        }
        Ok(())
    }

    /// Processes one page's entries with bounded parallelism. Returns the
    /// listing ids that were seen. A permanent notifier failure aborts the page.
    async fn process_page(
        &self,
        ctx: &RunContext,
        entries: Vec<RawListing>,
    ) -> Result<Vec<String>, RunError> {
        debug!(entries = entries.len(), "Processing page entries");

        let mut results = stream::iter(entries)
            .map(|raw| self.process_entry(ctx, raw))
            .buffer_unordered(self.settings.concurrency);

        let mut seen = Vec::new();
        while let Some(result) = results.next().await {
            let outcome = result?;
            if let Some(id) = outcome.listing_id() {
                seen.push(id.to_string());
            }
        }
        Ok(seen)
    }

    async fn process_entry(
        &self,
        ctx: &RunContext,
        mut raw: RawListing,
    ) -> Result<EntryOutcome, RunError> {
        if self.settings.fetch_details {
            if let Some(url) = self.extractor.detail_url(&raw) {
                match self.fetcher.fetch_detail(&url).await {
                    Ok(html) => raw.detail_html = Some(html),
                    Err(e) => warn!(url = %url, error = %e, "Listing page unavailable; using summary"),
                }
            }
        }

        let listing = match self.extractor.extract(&raw) {
            Ok(listing) => listing,
            Err(e) => {
                ctx.record(Counter::Errored);
                warn!(error = %e, source = %raw.source_url, "⚠️  Skipping unparsable entry");
                return Ok(EntryOutcome::Errored);
            }
        };
        let id = listing.id.clone();

        let evaluation = match self.evaluator.evaluate(&listing).await {
            Ok(evaluation) => evaluation,
            Err(e) => {
                ctx.record(Counter::Errored);
                warn!(listing_id = %id, error = %e, "⚠️  Evaluation failed; listing excluded");
                return Ok(EntryOutcome::Failed { id });
            }
        };

        if !evaluation.matches {
            ctx.record(Counter::Processed);
            info!(
                listing_id = %id,
                reason = %evaluation.reasons.first().map(String::as_str).unwrap_or_default(),
                "➖ Listing excluded"
            );
            return Ok(EntryOutcome::Excluded { id });
        }

        ctx.record(Counter::Matched);
        info!(listing_id = %id, title = %listing.title, "🎯 Listing matches");

        let claim = match self.store.has_notified(&id).await {
            Ok(true) => Ok(ClaimOutcome::AlreadyNotified),
            Ok(false) => self.store.try_claim(&id, self.settings.claim_lease).await,
            Err(e) => Err(e),
        };
        match claim {
            Ok(ClaimOutcome::Claimed) => {}
            Ok(other) => {
                ctx.record(Counter::Duplicate);
                ctx.record(Counter::Processed);
                debug!(listing_id = %id, claim = ?other, "Already handled; not notifying");
                return Ok(EntryOutcome::Duplicate { id });
            }
            Err(e) => {
                ctx.record(Counter::Errored);
                error!(listing_id = %id, error = %e, "❌ Dedup store failed; not notifying");
                return Ok(EntryOutcome::Failed { id });
            }
        }

        match self.notifier.send(&listing, &evaluation).await {
            Ok(_) => {
                ctx.record(Counter::Notified);
                ctx.record(Counter::Processed);
                if let Err(e) = self.store.record_notified(&id).await {
                    error!(
                        listing_id = %id,
                        error = %e,
                        "❌ Alert sent but not recorded; claim stays until its lease expires"
                    );
                }
                Ok(EntryOutcome::Notified { id })
            }
            Err(e) => {
                ctx.record(Counter::Errored);
                if let Err(release) = self.store.release_claim(&id).await {
                    warn!(listing_id = %id, error = %release, "Failed to release claim");
                }
                if e.is_permanent() {
                    return Err(RunError::NotifierUnavailable(e));
                }
                warn!(listing_id = %id, error = %e, "⚠️  Alert not delivered; will retry next run");
                Ok(EntryOutcome::Failed { id })
            }
        }
    }
}
