//! Application configuration for portcall.
//!
//! User config lives at `~/.portcall/portcall.toml`.
//! Environment variables override the URL templates, and CLI flags override
//! config file values, which override defaults.

use std::ops::Range;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PortcallError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "portcall.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".portcall";

/// Placeholder substituted by [`UrlTemplate::render`].
const PLACEHOLDER: &str = "{}";

/// Environment variables that override the carrier URL templates.
pub const ENV_SERVICE_GROUP_URL: &str = "COSU_SERVICE_URL";
pub const ENV_ROUTE_SERVICE_URL: &str = "COSU_ROUTE_URL";
pub const ENV_CALL_PORT_URL: &str = "COSU_PORTS_URL";

// ---------------------------------------------------------------------------
// Config structs (matching portcall.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Carrier constants and endpoint templates.
    #[serde(default)]
    pub carrier: CarrierConfig,

    /// Fetch stage defaults.
    #[serde(default)]
    pub crawl: CrawlDefaults,

    /// Output file settings.
    #[serde(default)]
    pub output: OutputConfig,
}

/// `[carrier]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CarrierConfig {
    /// Carrier SCAC code written to every row.
    #[serde(default = "default_carrier_id")]
    pub carrier_id: String,

    /// Sailing frequency written to every row.
    #[serde(default = "default_frequency")]
    pub frequency: String,

    /// Service-group endpoint, `{}` is the page index.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_group_url: Option<String>,

    /// Route-service endpoint, `{}` is the service-group id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub route_service_url: Option<String>,

    /// Call-port endpoint, `{}` is the route-service code.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub call_port_url: Option<String>,

    /// First service-group page index (inclusive).
    #[serde(default = "default_group_page_start")]
    pub group_page_start: u32,

    /// Last service-group page index (exclusive).
    #[serde(default = "default_group_page_end")]
    pub group_page_end: u32,
}

impl Default for CarrierConfig {
    fn default() -> Self {
        Self {
            carrier_id: default_carrier_id(),
            frequency: default_frequency(),
            service_group_url: None,
            route_service_url: None,
            call_port_url: None,
            group_page_start: default_group_page_start(),
            group_page_end: default_group_page_end(),
        }
    }
}

fn default_carrier_id() -> String {
    "COSU".into()
}
fn default_frequency() -> String {
    "WEEKLY".into()
}
fn default_group_page_start() -> u32 {
    11
}
fn default_group_page_end() -> u32 {
    19
}

impl CarrierConfig {
    /// Page indices enumerated by the service-group stage.
    pub fn group_pages(&self) -> Range<u32> {
        self.group_page_start..self.group_page_end
    }

    /// Validate and return the three endpoint templates.
    pub fn templates(&self) -> Result<CarrierTemplates> {
        Ok(CarrierTemplates {
            service_group: UrlTemplate::required(
                "carrier.service_group_url",
                self.service_group_url.as_deref(),
            )?,
            route_service: UrlTemplate::required(
                "carrier.route_service_url",
                self.route_service_url.as_deref(),
            )?,
            call_port: UrlTemplate::required("carrier.call_port_url", self.call_port_url.as_deref())?,
        })
    }
}

/// `[crawl]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlDefaults {
    /// Concurrent requests per fetch stage.
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Attempts per URL before it is settled as a failure.
    #[serde(default = "default_limit")]
    pub limit: u32,

    /// Pause before each request, in ms (0 disables pacing).
    #[serde(default)]
    pub sleep_ms: u64,

    /// TCP connect timeout in seconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Whole-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Skip TLS certificate verification.
    #[serde(default)]
    pub accept_invalid_certs: bool,
}

impl Default for CrawlDefaults {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            limit: default_limit(),
            sleep_ms: 0,
            connect_timeout_secs: default_connect_timeout(),
            timeout_secs: default_timeout(),
            accept_invalid_certs: false,
        }
    }
}

fn default_workers() -> usize {
    5
}
fn default_limit() -> u32 {
    3
}
fn default_connect_timeout() -> u64 {
    60
}
fn default_timeout() -> u64 {
    50
}

/// `[output]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Destination CSV file.
    #[serde(default = "default_output_path")]
    pub path: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: default_output_path(),
        }
    }
}

fn default_output_path() -> String {
    "cosco_port_rotation.csv".into()
}

impl AppConfig {
    /// Apply the `COSU_*_URL` environment overrides.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides_from(|key| std::env::var(key).ok());
    }

    /// Apply template overrides from an arbitrary lookup (env, .env map, tests).
    pub fn apply_overrides_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let slots = [
            (ENV_SERVICE_GROUP_URL, &mut self.carrier.service_group_url),
            (ENV_ROUTE_SERVICE_URL, &mut self.carrier.route_service_url),
            (ENV_CALL_PORT_URL, &mut self.carrier.call_port_url),
        ];
        for (key, slot) in slots {
            if let Some(value) = lookup(key).filter(|v| !v.trim().is_empty()) {
                tracing::debug!(key, "template overridden from environment");
                *slot = Some(value);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// URL templates
// ---------------------------------------------------------------------------

/// An endpoint URL with a single `{}` placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlTemplate {
    prefix: String,
    suffix: String,
}

impl UrlTemplate {
    /// Parse a template, requiring exactly one `{}` placeholder.
    pub fn parse(template: &str) -> Result<Self> {
        let mut parts = template.split(PLACEHOLDER);
        match (parts.next(), parts.next(), parts.next()) {
            (Some(prefix), Some(suffix), None) if !prefix.is_empty() => Ok(Self {
                prefix: prefix.to_string(),
                suffix: suffix.to_string(),
            }),
            _ => Err(PortcallError::config(format!(
                "URL template must contain exactly one {PLACEHOLDER}: {template}"
            ))),
        }
    }

    fn required(name: &str, value: Option<&str>) -> Result<Self> {
        let value = value.filter(|v| !v.trim().is_empty()).ok_or_else(|| {
            PortcallError::config(format!("{name} is not set (see `portcall config show`)"))
        })?;
        Self::parse(value.trim())
    }

    /// Substitute `key` into the placeholder.
    pub fn render(&self, key: impl std::fmt::Display) -> String {
        format!("{}{key}{}", self.prefix, self.suffix)
    }

    /// Recover the key from a URL produced by [`render`](Self::render).
    ///
    /// Exact inverse of `render` for any key, including keys containing
    /// `/`, `?` or the suffix text itself.
    pub fn extract<'a>(&self, url: &'a str) -> Option<&'a str> {
        let key = url
            .strip_prefix(self.prefix.as_str())?
            .strip_suffix(self.suffix.as_str())?;
        (!key.is_empty()).then_some(key)
    }
}

impl std::fmt::Display for UrlTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{PLACEHOLDER}{}", self.prefix, self.suffix)
    }
}

/// The three validated endpoint templates of one carrier.
#[derive(Debug, Clone)]
pub struct CarrierTemplates {
    pub service_group: UrlTemplate,
    pub route_service: UrlTemplate,
    pub call_port: UrlTemplate,
}

// ---------------------------------------------------------------------------
// Crawl config (runtime, merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime fetch-stage configuration, merged from config file + CLI flags.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// Maximum concurrent HTTP requests per stage.
    pub workers: usize,
    /// Attempts per URL (at least 1).
    pub limit: u32,
    /// Optional pause before each request.
    pub sleep: Option<Duration>,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Whole-request timeout.
    pub timeout: Duration,
    /// Skip TLS certificate verification.
    pub accept_invalid_certs: bool,
}

impl From<&AppConfig> for CrawlConfig {
    fn from(config: &AppConfig) -> Self {
        let crawl = &config.crawl;
        Self {
            workers: crawl.workers.max(1),
            limit: crawl.limit.max(1),
            sleep: (crawl.sleep_ms > 0).then(|| Duration::from_millis(crawl.sleep_ms)),
            connect_timeout: Duration::from_secs(crawl.connect_timeout_secs),
            timeout: Duration::from_secs(crawl.timeout_secs),
            accept_invalid_certs: crawl.accept_invalid_certs,
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.portcall/`).
pub fn config_dir() -> Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| PortcallError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.portcall/portcall.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| PortcallError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| PortcallError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| PortcallError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| PortcallError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| PortcallError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("carrier_id"));
        assert!(toml_str.contains("WEEKLY"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.carrier.carrier_id, "COSU");
        assert_eq!(parsed.carrier.group_pages(), 11..19);
        assert_eq!(parsed.crawl.workers, 5);
    }

    #[test]
    fn config_with_templates() {
        let toml_str = r#"
[carrier]
service_group_url = "https://carrier.test/groups?page={}"
route_service_url = "https://carrier.test/groups/{}/routes"
call_port_url = "https://carrier.test/routes/{}.do"

[crawl]
workers = 8
sleep_ms = 250
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        let templates = config.carrier.templates().expect("templates");
        assert_eq!(
            templates.route_service.render("G1"),
            "https://carrier.test/groups/G1/routes"
        );

        let crawl = CrawlConfig::from(&config);
        assert_eq!(crawl.workers, 8);
        assert_eq!(crawl.sleep, Some(Duration::from_millis(250)));
    }

    #[test]
    fn missing_template_is_config_error() {
        let config = AppConfig::default();
        let err = config.carrier.templates().unwrap_err();
        assert!(err.to_string().contains("carrier.service_group_url"));
    }

    #[test]
    fn template_requires_single_placeholder() {
        assert!(UrlTemplate::parse("https://carrier.test/routes").is_err());
        assert!(UrlTemplate::parse("https://carrier.test/{}/{}").is_err());
        assert!(UrlTemplate::parse("{}").is_err());
        assert!(UrlTemplate::parse("https://carrier.test/{}").is_ok());
    }

    #[test]
    fn template_extracts_key() {
        let t = UrlTemplate::parse("https://carrier.test/api/routes/{}.do?lang=en").unwrap();
        let url = t.render("AEU1");
        assert_eq!(t.extract(&url), Some("AEU1"));
        assert_eq!(t.extract("https://other.test/api/routes/AEU1.do"), None);

        let open = UrlTemplate::parse("https://carrier.test/ports/{}").unwrap();
        assert_eq!(open.extract("https://carrier.test/ports/CEX"), Some("CEX"));
        assert_eq!(open.extract("https://carrier.test/ports/"), None);
        assert_eq!(open.to_string(), "https://carrier.test/ports/{}");
    }

    #[test]
    fn template_round_trips_awkward_keys() {
        let open = UrlTemplate::parse("https://carrier.test/ports/{}").unwrap();
        let closed = UrlTemplate::parse("https://carrier.test/routes/{}.do?lang=en").unwrap();
        for key in ["AEU/2", "CEX?x=1", "R#1", "R.do", "R.do?lang=en"] {
            assert_eq!(open.extract(&open.render(key)), Some(key));
            assert_eq!(closed.extract(&closed.render(key)), Some(key));
        }
    }

    #[test]
    fn env_overrides_replace_templates() {
        let mut config = AppConfig::default();
        config.carrier.call_port_url = Some("https://file.test/{}".into());
        config.apply_overrides_from(|key| match key {
            ENV_SERVICE_GROUP_URL => Some("https://env.test/groups/{}".into()),
            ENV_CALL_PORT_URL => Some("   ".into()),
            _ => None,
        });
        assert_eq!(
            config.carrier.service_group_url.as_deref(),
            Some("https://env.test/groups/{}")
        );
        assert_eq!(config.carrier.route_service_url, None);
        // blank values do not clobber the file setting
        assert_eq!(config.carrier.call_port_url.as_deref(), Some("https://file.test/{}"));
    }

    #[test]
    fn crawl_config_clamps_zero_values() {
        let mut app = AppConfig::default();
        app.crawl.workers = 0;
        app.crawl.limit = 0;
        let crawl = CrawlConfig::from(&app);
        assert_eq!(crawl.workers, 1);
        assert_eq!(crawl.limit, 1);
        assert_eq!(crawl.sleep, None);
        assert_eq!(crawl.connect_timeout, Duration::from_secs(60));
    }
}
