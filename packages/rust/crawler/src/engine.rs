//! Bounded-concurrency fetch stage.
//!
//! A [`Crawler`] takes a batch of URLs, drops duplicates, fetches the rest
//! with at most `workers` requests in flight, and settles every URL as a
//! success or a failure. Transient failures are retried inside the stage up
//! to the configured attempt limit; nothing is retried above it.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::{Duration, Instant};

use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, instrument, warn};
use url::Url;

use portcall_shared::{CrawlConfig, PortcallError, Result};

/// User-Agent string for crawl requests.
const USER_AGENT: &str = concat!("portcall/", env!("CARGO_PKG_VERSION"));

/// Delay before the first retry; doubles per attempt.
const RETRY_BACKOFF_BASE: Duration = Duration::from_millis(200);

/// Upper bound for a single retry delay.
const RETRY_BACKOFF_MAX: Duration = Duration::from_secs(5);

/// Maximum number of redirects followed per request.
const MAX_REDIRECTS: usize = 5;

// ---------------------------------------------------------------------------
// FetchedResponse
// ---------------------------------------------------------------------------

/// A successful response, body fully read.
#[derive(Debug, Clone)]
pub struct FetchedResponse {
    url: String,
    status: u16,
    body: String,
}

impl FetchedResponse {
    pub fn new(url: impl Into<String>, status: u16, body: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            status,
            body: body.into(),
        }
    }

    /// The URL as it was requested (before redirects).
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn text(&self) -> &str {
        &self.body
    }

    /// Deserialize the body. A mismatch is a parse error naming the URL.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.body)
            .map_err(|e| PortcallError::parse(format!("{}: {e}", self.url)))
    }
}

// ---------------------------------------------------------------------------
// FetchTask
// ---------------------------------------------------------------------------

/// Settlement state of one URL.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    Pending,
    Success(FetchedResponse),
    Failure(String),
}

/// One URL's trip through a fetch stage.
#[derive(Debug, Clone)]
pub struct FetchTask {
    pub url: String,
    pub outcome: TaskOutcome,
}

impl FetchTask {
    fn new(url: String) -> Self {
        Self {
            url,
            outcome: TaskOutcome::Pending,
        }
    }

    fn settle(self, outcome: std::result::Result<FetchedResponse, String>) -> Self {
        let outcome = match outcome {
            Ok(response) => TaskOutcome::Success(response),
            Err(error) => TaskOutcome::Failure(error),
        };
        Self { outcome, ..self }
    }

    async fn resolve(self, client: Client, limit: u32) -> Self {
        let parsed = match Url::parse(&self.url) {
            Ok(url) => url,
            Err(e) => return self.settle(Err(format!("invalid URL: {e}"))),
        };
        let outcome = fetch_with_retry(&client, &parsed, &self.url, limit).await;
        self.settle(outcome)
    }
}

// ---------------------------------------------------------------------------
// CrawlOutcome
// ---------------------------------------------------------------------------

/// Everything a fetch stage knows once all of its URLs have settled.
#[derive(Debug, Default)]
pub struct CrawlOutcome {
    /// Successful responses, sorted by URL.
    pub result: Vec<FetchedResponse>,
    /// Distinct URLs submitted.
    pub seen: BTreeSet<String>,
    /// URLs that settled, success or failure.
    pub done: BTreeSet<String>,
    /// Failed URLs with their last error.
    pub failures: Vec<(String, String)>,
    /// Wall-clock time of the stage.
    pub duration: Duration,
}

// ---------------------------------------------------------------------------
// Crawler
// ---------------------------------------------------------------------------

/// Fetch-stage runner sharing one HTTP client across stages.
#[derive(Clone)]
pub struct Crawler {
    client: Client,
    config: CrawlConfig,
}

/// Build the HTTP client used by all stages of a run.
pub fn build_client(config: &CrawlConfig) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .connect_timeout(config.connect_timeout)
        .timeout(config.timeout)
        .danger_accept_invalid_certs(config.accept_invalid_certs)
        .build()
        .map_err(|e| PortcallError::Network(format!("failed to build HTTP client: {e}")))
}

impl Crawler {
    /// Create a crawler with its own client built from `config`.
    pub fn new(config: CrawlConfig) -> Result<Self> {
        let client = build_client(&config)?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(client: Client, config: CrawlConfig) -> Self {
        Self { client, config }
    }

    pub fn config(&self) -> &CrawlConfig {
        &self.config
    }

    /// Fetch every distinct URL in `urls`.
    pub async fn run<I, S>(&self, urls: I) -> CrawlOutcome
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.run_with(urls, |_, _, _| {}).await
    }

    /// Like [`run`](Self::run), calling `on_settle(url, settled, total)` as URLs finish.
    #[instrument(skip_all, fields(workers = self.config.workers, limit = self.config.limit))]
    pub async fn run_with<I, S, F>(&self, urls: I, on_settle: F) -> CrawlOutcome
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&str, usize, usize),
    {
        let start = Instant::now();
        let mut outcome = CrawlOutcome::default();

        let mut queue = Vec::new();
        let mut submitted = 0usize;
        for url in urls {
            let url = url.into();
            submitted += 1;
            if outcome.seen.insert(url.clone()) {
                queue.push(FetchTask::new(url));
            }
        }

        let total = queue.len();
        info!(
            submitted,
            distinct = total,
            sleep_ms = self.config.sleep.map(|d| d.as_millis() as u64).unwrap_or(0),
            "starting fetch stage"
        );

        let semaphore = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let mut set = JoinSet::new();
        let mut in_flight = HashMap::new();

        for task in queue {
            let url = task.url.clone();
            let client = self.client.clone();
            let sem = semaphore.clone();
            let sleep = self.config.sleep;
            let limit = self.config.limit.max(1);

            let handle = set.spawn(async move {
                let _permit = match sem.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => return task.settle(Err(e.to_string())),
                };

                if let Some(delay) = sleep {
                    tokio::time::sleep(delay).await;
                }

                task.resolve(client, limit).await
            });
            in_flight.insert(handle.id(), url);
        }

        while let Some(joined) = set.join_next_with_id().await {
            let task = match joined {
                Ok((id, task)) => {
                    in_flight.remove(&id);
                    task
                }
                Err(e) => {
                    let url = in_flight.remove(&e.id()).unwrap_or_default();
                    FetchTask::new(url).settle(Err(format!("fetch task failed: {e}")))
                }
            };

            outcome.done.insert(task.url.clone());
            match task.outcome {
                TaskOutcome::Success(response) => {
                    debug!(url = %task.url, status = response.status(), "fetched");
                    outcome.result.push(response);
                }
                TaskOutcome::Failure(error) => {
                    warn!(url = %task.url, %error, "fetch failed");
                    outcome.failures.push((task.url.clone(), error));
                }
                TaskOutcome::Pending => {
                    outcome
                        .failures
                        .push((task.url.clone(), "task ended unresolved".into()));
                }
            }
            on_settle(&task.url, outcome.done.len(), total);
        }

        outcome.result.sort_by(|a, b| a.url.cmp(&b.url));
        outcome.failures.sort();
        outcome.duration = start.elapsed();

        info!(
            fetched = outcome.result.len(),
            failed = outcome.failures.len(),
            duration_ms = outcome.duration.as_millis(),
            "fetch stage completed"
        );

        outcome
    }
}

// ---------------------------------------------------------------------------
// Fetching
// ---------------------------------------------------------------------------

/// Why a single attempt failed, and whether another attempt may help.
struct AttemptError {
    message: String,
    transient: bool,
}

impl AttemptError {
    fn from_reqwest(url: &str, e: reqwest::Error) -> Self {
        Self {
            transient: e.is_timeout() || e.is_connect() || e.is_request(),
            message: format!("{url}: {e}"),
        }
    }

    fn from_status(url: &str, status: StatusCode) -> Self {
        Self {
            transient: status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS,
            message: format!("{url}: HTTP {status}"),
        }
    }
}

async fn fetch_with_retry(
    client: &Client,
    url: &Url,
    raw: &str,
    limit: u32,
) -> std::result::Result<FetchedResponse, String> {
    let mut attempt = 1;
    loop {
        match fetch_once(client, url, raw).await {
            Ok(response) => return Ok(response),
            Err(e) if e.transient && attempt < limit => {
                let delay = retry_delay(attempt);
                debug!(url = raw, attempt, delay_ms = delay.as_millis() as u64, error = %e.message, "retrying");
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e.message),
        }
    }
}

fn retry_delay(attempt: u32) -> Duration {
    let factor = 1u32 << attempt.saturating_sub(1).min(16);
    RETRY_BACKOFF_BASE.saturating_mul(factor).min(RETRY_BACKOFF_MAX)
}

async fn fetch_once(
    client: &Client,
    url: &Url,
    raw: &str,
) -> std::result::Result<FetchedResponse, AttemptError> {
    let response = client
        .get(url.clone())
        .send()
        .await
        .map_err(|e| AttemptError::from_reqwest(raw, e))?;

    let status = response.status();
    if !status.is_success() {
        return Err(AttemptError::from_status(raw, status));
    }

    let body = response
        .text()
        .await
        .map_err(|e| AttemptError::from_reqwest(raw, e))?;

    Ok(FetchedResponse::new(raw, status.as_u16(), body))
}
