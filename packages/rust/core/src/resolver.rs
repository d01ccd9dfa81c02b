//! Three-stage hierarchy resolution: service groups → route services → call ports.
//!
//! Each stage is one [`Crawler`] run whose URL list is computed from the
//! previous stage's responses, so stages run strictly one after another.

use std::collections::BTreeSet;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use portcall_crawler::{CrawlOutcome, Crawler, FetchedResponse};
use portcall_shared::{
    CarrierConfig, CarrierTemplates, Result, RouteServiceKey, ServiceGroupKey,
};

use crate::normalize::RecordNormalizer;
use crate::pipeline::ProgressReporter;
use crate::wire::{Envelope, RouteServiceEntry, ServiceGroupEntry, key_text};

// ---------------------------------------------------------------------------
// Stage bookkeeping
// ---------------------------------------------------------------------------

/// The steps of one pipeline run, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    GroupFetch,
    RouteFetch,
    PortFetch,
    Normalize,
}

impl Stage {
    pub fn label(self) -> &'static str {
        match self {
            Self::GroupFetch => "Service groups",
            Self::RouteFetch => "Route services",
            Self::PortFetch => "Call ports",
            Self::Normalize => "Port rotations",
        }
    }

    /// The stage that consumes this one's output.
    pub fn next(self) -> Option<Self> {
        match self {
            Self::GroupFetch => Some(Self::RouteFetch),
            Self::RouteFetch => Some(Self::PortFetch),
            Self::PortFetch => Some(Self::Normalize),
            Self::Normalize => None,
        }
    }
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// What a fetch stage did, for operators. Never used for control flow.
#[derive(Debug, Clone)]
pub struct StageSummary {
    pub stage: Stage,
    /// Distinct URLs submitted, sorted.
    pub seen: Vec<String>,
    /// URLs settled (success or failure).
    pub done: usize,
    /// Successful responses.
    pub fetched: usize,
    /// Distinct entities extracted from the responses.
    pub entities: usize,
    /// Failed URLs with their error.
    pub failures: Vec<(String, String)>,
    /// Wall-clock time of the fetch stage.
    pub duration: Duration,
}

impl StageSummary {
    fn new(stage: Stage, outcome: &CrawlOutcome, entities: usize) -> Self {
        Self {
            stage,
            seen: outcome.seen.iter().cloned().collect(),
            done: outcome.done.len(),
            fetched: outcome.result.len(),
            entities,
            failures: outcome.failures.clone(),
            duration: outcome.duration,
        }
    }

    fn log(&self) {
        info!(stage = %self.stage, "{} results:", self.stage);
        for url in &self.seen {
            info!(stage = %self.stage, %url);
        }
        info!(
            stage = %self.stage,
            crawled = self.done,
            processed = self.seen.len(),
            fetched = self.fetched,
            entities = self.entities,
            failed = self.failures.len(),
            duration_ms = self.duration.as_millis(),
            "stage settled"
        );
        if let Some(next) = self.stage.next() {
            debug!(stage = %self.stage, %next, handoff = self.entities, "handing off");
        }
    }
}

/// Typed output of one fetch stage.
#[derive(Debug)]
pub struct StageOutput<T> {
    pub items: Vec<T>,
    pub summary: StageSummary,
}

/// Leaf responses plus the bookkeeping of every fetch stage.
#[derive(Debug)]
pub struct ResolvedHierarchy {
    pub call_ports: Vec<FetchedResponse>,
    pub summaries: Vec<StageSummary>,
}

// ---------------------------------------------------------------------------
// Key extraction
// ---------------------------------------------------------------------------

/// Service-group ids from every group page, in first-seen order.
///
/// Entries without an id are skipped; an unexpected body shape is an error.
pub fn extract_group_keys(responses: &[FetchedResponse]) -> Result<Vec<ServiceGroupKey>> {
    let mut keys = Vec::new();
    for response in responses {
        let page: Envelope<ServiceGroupEntry> = response.json()?;
        for entry in page.data.content {
            match key_text(entry.id.as_ref()) {
                Some(id) => keys.push(ServiceGroupKey(id)),
                None => warn!(url = response.url(), name = ?key_text(entry.name.as_ref()), "service group without id"),
            }
        }
    }
    Ok(keys)
}

/// Route-service codes from every route listing, in first-seen order.
pub fn extract_route_keys(responses: &[FetchedResponse]) -> Result<Vec<RouteServiceKey>> {
    let mut keys = Vec::new();
    for response in responses {
        let page: Envelope<RouteServiceEntry> = response.json()?;
        for entry in page.data.content {
            match key_text(entry.code.as_ref()) {
                Some(code) => keys.push(RouteServiceKey(code)),
                None => warn!(url = response.url(), name = ?key_text(entry.name.as_ref()), "route service without code"),
            }
        }
    }
    Ok(keys)
}

fn distinct<T: Ord>(items: &[T]) -> usize {
    items.iter().collect::<BTreeSet<_>>().len()
}

// ---------------------------------------------------------------------------
// HierarchyResolver
// ---------------------------------------------------------------------------

/// Runs the chained fetch stages for one carrier.
pub struct HierarchyResolver {
    carrier: CarrierConfig,
    templates: CarrierTemplates,
    crawler: Crawler,
}

impl HierarchyResolver {
    /// Validates the carrier's URL templates up front.
    pub fn new(carrier: CarrierConfig, crawler: Crawler) -> Result<Self> {
        let templates = carrier.templates()?;
        Ok(Self {
            carrier,
            templates,
            crawler,
        })
    }

    /// Normalizer matching this resolver's call-port template.
    pub fn normalizer(&self) -> RecordNormalizer {
        RecordNormalizer::new(&self.carrier, self.templates.call_port.clone())
    }

    /// Run all three fetch stages.
    #[instrument(skip_all, fields(carrier = %self.carrier.carrier_id, workers = self.crawler.config().workers))]
    pub async fn resolve(&self, progress: &dyn ProgressReporter) -> Result<ResolvedHierarchy> {
        let groups = self.fetch_groups(progress).await?;
        let routes = self.fetch_routes(&groups.items, progress).await?;
        let ports = self.fetch_call_ports(&routes.items, progress).await;

        Ok(ResolvedHierarchy {
            call_ports: ports.items,
            summaries: vec![groups.summary, routes.summary, ports.summary],
        })
    }

    /// Stage 1: one request per configured page index.
    pub async fn fetch_groups(
        &self,
        progress: &dyn ProgressReporter,
    ) -> Result<StageOutput<ServiceGroupKey>> {
        let urls = self
            .carrier
            .group_pages()
            .map(|page| self.templates.service_group.render(page));
        let outcome = self.run_stage(Stage::GroupFetch, urls, progress).await;

        let keys = extract_group_keys(&outcome.result)?;
        Ok(self.finish_stage(Stage::GroupFetch, &outcome, keys, progress))
    }

    /// Stage 2: one request per service-group id.
    pub async fn fetch_routes(
        &self,
        groups: &[ServiceGroupKey],
        progress: &dyn ProgressReporter,
    ) -> Result<StageOutput<RouteServiceKey>> {
        let urls = groups
            .iter()
            .map(|group| self.templates.route_service.render(group));
        let outcome = self.run_stage(Stage::RouteFetch, urls, progress).await;

        let keys = extract_route_keys(&outcome.result)?;
        Ok(self.finish_stage(Stage::RouteFetch, &outcome, keys, progress))
    }

    /// Stage 3: one request per route-service code. Bodies are parsed later.
    pub async fn fetch_call_ports(
        &self,
        routes: &[RouteServiceKey],
        progress: &dyn ProgressReporter,
    ) -> StageOutput<FetchedResponse> {
        let urls = routes
            .iter()
            .map(|route| self.templates.call_port.render(route));
        let outcome = self.run_stage(Stage::PortFetch, urls, progress).await;

        let summary = StageSummary::new(Stage::PortFetch, &outcome, outcome.result.len());
        let responses = outcome.result;
        summary.log();
        progress.stage_done(&summary);

        StageOutput {
            items: responses,
            summary,
        }
    }

    async fn run_stage(
        &self,
        stage: Stage,
        urls: impl Iterator<Item = String>,
        progress: &dyn ProgressReporter,
    ) -> CrawlOutcome {
        progress.phase(stage.label());
        self.crawler
            .run_with(urls, |url, done, total| {
                progress.url_settled(stage, url, done, total)
            })
            .await
    }

    fn finish_stage<T: Ord>(
        &self,
        stage: Stage,
        outcome: &CrawlOutcome,
        items: Vec<T>,
        progress: &dyn ProgressReporter,
    ) -> StageOutput<T> {
        let summary = StageSummary::new(stage, outcome, distinct(&items));
        summary.log();
        progress.stage_done(&summary);
        StageOutput { items, summary }
    }
}
