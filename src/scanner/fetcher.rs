use async_trait::async_trait;
use scraper::{Html, Selector};
use std::sync::Arc;
use url::Url;

use super::types::RawListing;
use crate::api::{retry_with_backoff, HttpClient, RetryPolicy};
use crate::core::error::FetchError;

/// The marketplace query a run walks through.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    /// Results URL; `{page}` is substituted, otherwise a `seite:n` segment goes
    /// before the trailing query slug.
    pub search_url: String,
    pub max_pages: u32,
}

impl SearchQuery {
    pub fn new(search_url: impl Into<String>, max_pages: u32) -> Self {
        Self {
            search_url: search_url.into(),
            max_pages: max_pages.max(1),
        }
    }

    pub fn page_url(&self, page: u32) -> Result<String, FetchError> {
        if self.search_url.contains("{page}") {
            return Ok(self.search_url.replace("{page}", &page.to_string()));
        }

        let mut url = Url::parse(&self.search_url).map_err(|e| FetchError::InvalidUrl {
            url: self.search_url.clone(),
            reason: e.to_string(),
        })?;
        if page > 1 {
            let mut segments: Vec<String> = url
                .path_segments()
                .map(|segments| {
                    segments
                        .filter(|s| !s.is_empty() && !s.starts_with("seite:"))
                        .map(str::to_string)
                        .collect()
                })
                .unwrap_or_default();
            let at = segments.len().saturating_sub(1);
            segments.insert(at, format!("seite:{}", page));
            url.set_path(&format!("/{}", segments.join("/")));
        }
        Ok(url.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct SearchPage {
    pub number: u32,
    pub url: String,
    pub entries: Vec<RawListing>,
    pub has_next: bool,
}

#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch_page(&self, query: &SearchQuery, page: u32) -> Result<SearchPage, FetchError>;

    async fn fetch_detail(&self, url: &str) -> Result<String, FetchError>;
}

/// Fetches result pages over HTTP with retries and splits them into entries.
pub struct HttpFetcher {
    http: Arc<HttpClient>,
    retry: RetryPolicy,
    entry_selectors: Vec<Selector>,
    next_selectors: Vec<Selector>,
}

impl HttpFetcher {
    pub fn new(http: Arc<HttpClient>, retry: RetryPolicy) -> Self {
        let compile = |list: &[&str]| -> Vec<Selector> {
            list.iter().filter_map(|s| Selector::parse(s).ok()).collect()
        };
        Self {
            http,
            retry,
            entry_selectors: compile(&[
                "article.aditem",
                "li.ad-listitem article",
                "[data-adid]",
                "[data-listing-id]",
                "article",
            ]),
            next_selectors: compile(&[
                "a.pagination-next",
                ".pagination-next a",
                "a[rel=next]",
                "link[rel=next]",
            ]),
        }
    }

    /// Splits a results page. The first selector that matches anything wins.
    pub fn parse_search_page(&self, number: u32, url: &str, html: &str) -> SearchPage {
        let document = Html::parse_document(html);

        let entries = self
            .entry_selectors
            .iter()
            .map(|selector| {
                document
                    .select(selector)
                    .map(|el| RawListing::new(url, el.html()))
                    .collect::<Vec<_>>()
            })
            .find(|entries| !entries.is_empty())
            .unwrap_or_default();

        let has_next = !entries.is_empty()
            && self
                .next_selectors
                .iter()
                .any(|selector| document.select(selector).next().is_some());

        SearchPage {
            number,
            url: url.to_string(),
            entries,
            has_next,
        }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch_page(&self, query: &SearchQuery, page: u32) -> Result<SearchPage, FetchError> {
        let url = query.page_url(page)?;
        tracing::debug!("🌐 Fetching search page {}: {}", page, url);

        let label = format!("search page {}", page);
        let html = retry_with_backoff(&self.retry, &label, |_| self.http.get_text(&url)).await?;

        let parsed = self.parse_search_page(page, &url, &html);
        tracing::info!(
            page = page,
            entries = parsed.entries.len(),
            has_next = parsed.has_next,
            "📄 Search page fetched"
        );
        Ok(parsed)
    }

    async fn fetch_detail(&self, url: &str) -> Result<String, FetchError> {
        retry_with_backoff(&self.retry, "listing page", |_| self.http.get_text(url)).await
    }
}

/// Lazy walk over result pages: one page per call, from page one up to the cap.
pub struct Paginator<'a> {
    fetcher: &'a dyn Fetcher,
    query: &'a SearchQuery,
    next: Option<u32>,
}

impl<'a> Paginator<'a> {
    pub fn new(fetcher: &'a dyn Fetcher, query: &'a SearchQuery) -> Self {
        Self {
            fetcher,
            query,
            next: Some(1),
        }
    }

    /// `None` once pagination is exhausted. After an error no further pages are requested.
    pub async fn next_page(&mut self) -> Option<Result<SearchPage, FetchError>> {
        let page = self.next.take()?;
        match self.fetcher.fetch_page(self.query, page).await {
            Ok(result) => {
                if result.has_next && !result.entries.is_empty() && page < self.query.max_pages {
                    self.next = Some(page + 1);
                }
                Some(Ok(result))
            }
            Err(e) => Some(Err(e)),
        }
    }
}
