//! End-to-end run: service groups → route services → call ports → CSV.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use tracing::{debug, info, instrument};

use portcall_crawler::{Crawler, FetchedResponse};
use portcall_shared::{AppConfig, CarrierConfig, CrawlConfig, PortcallError, Result};

use crate::normalize::RecordNormalizer;
use crate::resolver::{HierarchyResolver, Stage, StageSummary};
use crate::sink::CsvSink;

/// Configuration for one pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Carrier constants and endpoint templates.
    pub carrier: CarrierConfig,
    /// Fetch stage settings.
    pub crawl: CrawlConfig,
    /// Destination CSV file.
    pub output: PathBuf,
}

impl From<&AppConfig> for PipelineConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            carrier: config.carrier.clone(),
            crawl: CrawlConfig::from(config),
            output: PathBuf::from(&config.output.path),
        }
    }
}

/// Result of a pipeline run.
#[derive(Debug)]
pub struct PipelineReport {
    /// Bookkeeping of the three fetch stages, in order.
    pub stages: Vec<StageSummary>,
    /// Call-port responses handed to the normalizer.
    pub call_ports: usize,
    /// Rows written, excluding the header.
    pub records_written: usize,
    /// Path of the written file.
    pub output: PathBuf,
    /// Total elapsed time.
    pub elapsed: Duration,
}

/// Progress callback for reporting pipeline status.
pub trait ProgressReporter: Send + Sync {
    /// Called when entering a new phase.
    fn phase(&self, name: &str);
    /// Called each time a URL of a fetch stage settles.
    fn url_settled(&self, stage: Stage, url: &str, done: usize, total: usize);
    /// Called after a fetch stage has fully settled.
    fn stage_done(&self, summary: &StageSummary);
    /// Called when the pipeline completes.
    fn done(&self, report: &PipelineReport);
}

/// No-op progress reporter for headless/test usage.
pub struct SilentProgress;

impl ProgressReporter for SilentProgress {
    fn phase(&self, _name: &str) {}
    fn url_settled(&self, _stage: Stage, _url: &str, _done: usize, _total: usize) {}
    fn stage_done(&self, _summary: &StageSummary) {}
    fn done(&self, _report: &PipelineReport) {}
}

/// Run the full pipeline.
///
/// 1. Fetch service groups
/// 2. Fetch route services per group
/// 3. Fetch call ports per route
/// 4. Normalize and write the CSV on a blocking thread
#[instrument(skip_all, fields(carrier = %config.carrier.carrier_id, output = %config.output.display()))]
pub async fn run_pipeline(
    config: &PipelineConfig,
    progress: &dyn ProgressReporter,
) -> Result<PipelineReport> {
    let start = Instant::now();
    info!(workers = config.crawl.workers, "starting port rotation pipeline");

    let crawler = Crawler::new(config.crawl.clone())?;
    let resolver = HierarchyResolver::new(config.carrier.clone(), crawler)?;

    // --- Fetch stages ---
    let resolved = resolver.resolve(progress).await?;
    let call_ports = resolved.call_ports.len();

    // --- Normalize + write ---
    progress.phase(Stage::Normalize.label());
    let normalizer = resolver.normalizer();
    let output = config.output.clone();
    let responses = resolved.call_ports;
    let records_written =
        tokio::task::spawn_blocking(move || write_rotations(&normalizer, &responses, &output))
            .await
            .map_err(|e| PortcallError::Task(format!("rotation writer: {e}")))??;

    let report = PipelineReport {
        stages: resolved.summaries,
        call_ports,
        records_written,
        output: config.output.clone(),
        elapsed: start.elapsed(),
    };

    progress.done(&report);

    info!(
        call_ports = report.call_ports,
        records = report.records_written,
        elapsed_ms = report.elapsed.as_millis(),
        "pipeline complete"
    );

    Ok(report)
}

/// Normalize every response and write the rows to `path`.
///
/// The file is only replaced if every response parses.
pub fn write_rotations(
    normalizer: &RecordNormalizer,
    responses: &[FetchedResponse],
    path: &Path,
) -> Result<usize> {
    let mut sink = CsvSink::create(path)?;
    for response in responses {
        let before = sink.rows();
        for record in normalizer.normalize(response)? {
            sink.write(&record)?;
        }
        debug!(url = response.url(), rows = sink.rows() - before, "normalized call ports");
    }
    sink.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    use portcall_shared::RECORD_HEADER;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Records every callback for assertions.
    #[derive(Default)]
    struct RecordingProgress {
        phases: Mutex<Vec<String>>,
        settled: Mutex<usize>,
        stages: Mutex<Vec<Stage>>,
    }

    impl ProgressReporter for RecordingProgress {
        fn phase(&self, name: &str) {
            self.phases.lock().unwrap().push(name.to_string());
        }
        fn url_settled(&self, _stage: Stage, _url: &str, _done: usize, _total: usize) {
            *self.settled.lock().unwrap() += 1;
        }
        fn stage_done(&self, summary: &StageSummary) {
            self.stages.lock().unwrap().push(summary.stage);
        }
        fn done(&self, _report: &PipelineReport) {}
    }

    fn config_for(server: &MockServer, output: PathBuf) -> PipelineConfig {
        let uri = server.uri();
        let mut app = AppConfig::default();
        app.carrier.service_group_url = Some(format!("{uri}/groups/{{}}"));
        app.carrier.route_service_url = Some(format!("{uri}/routes/{{}}"));
        app.carrier.call_port_url = Some(format!("{uri}/ports/{{}}.do"));
        app.carrier.group_page_start = 1;
        app.carrier.group_page_end = 2;
        app.output.path = output.to_string_lossy().into_owned();
        PipelineConfig::from(&app)
    }

    async fn mount_json(server: &MockServer, at: &str, body: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path(at))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    async fn mount_hierarchy(server: &MockServer) {
        mount_json(
            server,
            "/groups/1",
            json!({"data": {"content": [{"serLpGroupUuid": "G1", "serLpGroupNameEn": "Europe"}]}}),
        )
        .await;
        mount_json(
            server,
            "/routes/G1",
            json!({"data": {"content": [{"serLpCode": "R1", "serLpNameEn": "Asia Europe 1"}]}}),
        )
        .await;
    }

    #[tokio::test]
    async fn single_arrival_end_to_end() {
        let server = MockServer::start().await;
        mount_hierarchy(&server).await;
        mount_json(
            &server,
            "/ports/R1.do",
            json!({"data": {"content": [{
                "direction": "S",
                "ports": [{
                    "callPort": "Hamburg ",
                    "callPortEtaTime": 1200,
                    "callPortEta": "MON",
                    "callPortEtdTime": null,
                    "callPortEtd": null,
                }],
            }]}}),
        )
        .await;

        let dir = tempfile::TempDir::new().unwrap();
        let output = dir.path().join("rotation.csv");
        let progress = RecordingProgress::default();

        let report = run_pipeline(&config_for(&server, output.clone()), &progress)
            .await
            .unwrap();

        assert_eq!(report.call_ports, 1);
        assert_eq!(report.records_written, 1);
        assert_eq!(
            *progress.stages.lock().unwrap(),
            vec![Stage::GroupFetch, Stage::RouteFetch, Stage::PortFetch]
        );
        assert_eq!(*progress.settled.lock().unwrap(), 3);
        assert_eq!(progress.phases.lock().unwrap().last().unwrap(), "Port rotations");

        let mut reader = csv::Reader::from_path(&output).unwrap();
        let header: Vec<String> = reader.headers().unwrap().iter().map(String::from).collect();
        assert_eq!(header, RECORD_HEADER);

        let rows: Vec<csv::StringRecord> = reader.records().map(|r| r.unwrap()).collect();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        let field = |name: &str| {
            let idx = RECORD_HEADER.iter().position(|h| *h == name).unwrap();
            row.get(idx).unwrap().to_string()
        };
        assert_eq!(field("direction"), "SOUTHBOUND");
        assert_eq!(field("portCode"), "HAMBURG");
        assert_eq!(field("locationType"), "L");
        assert_eq!(field("startDay"), "MON");
        assert_eq!(field("tt"), "1200");
        assert_eq!(field("serviceID"), "R1 [S]");
        assert_eq!(field("changeMode"), "");
    }

    #[tokio::test]
    async fn empty_call_port_stage_writes_header_only() {
        let server = MockServer::start().await;
        mount_hierarchy(&server).await;
        Mock::given(method("GET"))
            .and(path("/ports/R1.do"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let dir = tempfile::TempDir::new().unwrap();
        let output = dir.path().join("rotation.csv");
        let mut config = config_for(&server, output.clone());
        config.crawl.limit = 1;

        let report = run_pipeline(&config, &SilentProgress).await.unwrap();

        assert_eq!(report.call_ports, 0);
        assert_eq!(report.records_written, 0);
        assert_eq!(report.stages[2].failures.len(), 1);
        let content = std::fs::read_to_string(&output).unwrap();
        assert_eq!(content, format!("{}\n", RECORD_HEADER.join(",")));
    }

    #[tokio::test]
    async fn malformed_call_port_leaves_no_file() {
        let server = MockServer::start().await;
        mount_hierarchy(&server).await;
        mount_json(&server, "/ports/R1.do", json!({"data": null})).await;

        let dir = tempfile::TempDir::new().unwrap();
        let output = dir.path().join("rotation.csv");

        let err = run_pipeline(&config_for(&server, output.clone()), &SilentProgress)
            .await
            .unwrap_err();

        assert!(matches!(err, PortcallError::Parse { .. }));
        assert!(!output.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
