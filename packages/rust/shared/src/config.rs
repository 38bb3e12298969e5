//! Application configuration for ConceptLink.
//!
//! User config lives at `~/.conceptlink/conceptlink.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ConceptLinkError, Result};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "conceptlink.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".conceptlink";

// ---------------------------------------------------------------------------
// Config structs (matching conceptlink.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Remote services.
    #[serde(default)]
    pub endpoints: EndpointsConfig,

    /// Namespace filters for candidate links.
    #[serde(default)]
    pub namespaces: NamespacesConfig,

    /// Retry and pacing policy for every outbound request.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Batching and hierarchy crawl limits.
    #[serde(default)]
    pub crawl: CrawlSettings,

    /// Locations of every dump file.
    #[serde(default)]
    pub paths: PathsConfig,

    /// Node labels used when loading into the graph.
    #[serde(default)]
    pub graph: GraphConfig,
}

/// `[endpoints]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointsConfig {
    /// SPARQL endpoint of the source knowledge base (same-as lookups).
    #[serde(default = "default_source_sparql")]
    pub source_sparql: String,

    /// SPARQL endpoint of the target knowledge base (classes, hierarchy, labels).
    #[serde(default = "default_target_sparql")]
    pub target_sparql: String,

    /// Fallback identifier service queried with `?s=<uri>`.
    #[serde(default = "default_fallback")]
    pub fallback: String,

    /// Entity annotation service queried with `?text=...`.
    #[serde(default = "default_annotation")]
    pub annotation: String,
}

impl Default for EndpointsConfig {
    fn default() -> Self {
        Self {
            source_sparql: default_source_sparql(),
            target_sparql: default_target_sparql(),
            fallback: default_fallback(),
            annotation: default_annotation(),
        }
    }
}

fn default_source_sparql() -> String {
    "https://dbpedia.org/sparql".into()
}
fn default_target_sparql() -> String {
    "https://query.wikidata.org/sparql".into()
}
fn default_fallback() -> String {
    "https://global.dbpedia.org/".into()
}
fn default_annotation() -> String {
    "http://localhost:2222/rest/annotate".into()
}

/// `[namespaces]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NamespacesConfig {
    /// Prefix the same-as query restricts results to.
    #[serde(default = "default_same_as_filter")]
    pub same_as_filter: String,

    /// Prefix fallback results must carry to count as candidates.
    #[serde(default = "default_target_prefix")]
    pub target_prefix: String,
}

impl Default for NamespacesConfig {
    fn default() -> Self {
        Self {
            same_as_filter: default_same_as_filter(),
            target_prefix: default_target_prefix(),
        }
    }
}

fn default_same_as_filter() -> String {
    "http://www.wikidata.org/".into()
}
fn default_target_prefix() -> String {
    "http://www.wikidata.org/entity/Q".into()
}

/// `[retry]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts per request, including the first.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry; doubles on each further retry.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    /// Upper bound for any single backoff wait.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Status codes treated as transient.
    #[serde(default = "default_retryable_statuses")]
    pub retryable_statuses: Vec<u16>,

    /// Minimum ms slept before every outbound request.
    #[serde(default)]
    pub request_interval_ms: u64,

    /// Per-request timeout.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            retryable_statuses: default_retryable_statuses(),
            request_interval_ms: 0,
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_max_attempts() -> u32 {
    8
}
fn default_base_delay_ms() -> u64 {
    4_000
}
fn default_max_delay_ms() -> u64 {
    120_000
}
fn default_retryable_statuses() -> Vec<u16> {
    vec![429, 500, 502, 503, 504]
}
fn default_timeout_secs() -> u64 {
    60
}

impl RetryConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn request_interval(&self) -> Duration {
        Duration::from_millis(self.request_interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// `[crawl]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlSettings {
    /// Identifiers per `VALUES` batch.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Number of superclass levels to expand.
    #[serde(default = "default_hierarchy_depth")]
    pub hierarchy_depth: u32,

    /// Language tag requested from the label service.
    #[serde(default = "default_label_language")]
    pub label_language: String,
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            hierarchy_depth: default_hierarchy_depth(),
            label_language: default_label_language(),
        }
    }
}

fn default_batch_size() -> usize {
    100
}
fn default_hierarchy_depth() -> u32 {
    5
}
fn default_label_language() -> String {
    "en".into()
}

/// `[paths]` section. Relative paths resolve against the working directory.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    /// Unit list (`unit_id`, `source_path`).
    #[serde(default = "default_units")]
    pub units: PathBuf,
    /// Resumable extraction output.
    #[serde(default = "default_extraction")]
    pub extraction: PathBuf,
    /// Every resolved candidate link.
    #[serde(default = "default_candidates")]
    pub candidates: PathBuf,
    /// Ambiguous groups awaiting curation (and, once curated, the override file).
    #[serde(default = "default_ambiguous")]
    pub ambiguous: PathBuf,
    /// Final merged link set handed to the graph loader.
    #[serde(default = "default_final_links")]
    pub final_links: PathBuf,
    #[serde(default = "default_classes")]
    pub classes: PathBuf,
    #[serde(default = "default_hierarchy")]
    pub hierarchy: PathBuf,
    #[serde(default = "default_labels")]
    pub labels: PathBuf,
    /// Embedded graph database.
    #[serde(default = "default_graph_db")]
    pub graph_db: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            units: default_units(),
            extraction: default_extraction(),
            candidates: default_candidates(),
            ambiguous: default_ambiguous(),
            final_links: default_final_links(),
            classes: default_classes(),
            hierarchy: default_hierarchy(),
            labels: default_labels(),
            graph_db: default_graph_db(),
        }
    }
}

fn default_units() -> PathBuf {
    "data/units.tsv".into()
}
fn default_extraction() -> PathBuf {
    "data/mentions.tsv".into()
}
fn default_candidates() -> PathBuf {
    "data/db_to_wd_linking.tsv".into()
}
fn default_ambiguous() -> PathBuf {
    "needs_annotation/db_to_wd_linking.tsv".into()
}
fn default_final_links() -> PathBuf {
    "data/db_to_wd_linking_final.tsv".into()
}
fn default_classes() -> PathBuf {
    "data/classes_wd.tsv".into()
}
fn default_hierarchy() -> PathBuf {
    "data/hierarchy_wd.tsv".into()
}
fn default_labels() -> PathBuf {
    "data/labels_wd.tsv".into()
}
fn default_graph_db() -> PathBuf {
    "data/graph.db".into()
}

/// `[graph]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GraphConfig {
    #[serde(default = "default_unit_label")]
    pub unit_label: String,
    #[serde(default = "default_source_label")]
    pub source_label: String,
    #[serde(default = "default_target_label")]
    pub target_label: String,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            unit_label: default_unit_label(),
            source_label: default_source_label(),
            target_label: default_target_label(),
        }
    }
}

fn default_unit_label() -> String {
    "Unit".into()
}
fn default_source_label() -> String {
    "SourceConcept".into()
}
fn default_target_label() -> String {
    "TargetConcept".into()
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

impl AppConfig {
    /// Reject settings that would make a stage misbehave before it starts.
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("endpoints.source_sparql", &self.endpoints.source_sparql),
            ("endpoints.target_sparql", &self.endpoints.target_sparql),
            ("endpoints.fallback", &self.endpoints.fallback),
            ("endpoints.annotation", &self.endpoints.annotation),
        ] {
            let url = Url::parse(value)
                .map_err(|e| ConceptLinkError::config(format!("{name} = {value:?}: {e}")))?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(ConceptLinkError::config(format!(
                    "{name} must be an http(s) URL, got {value:?}"
                )));
            }
        }
        if self.crawl.batch_size == 0 {
            return Err(ConceptLinkError::config("crawl.batch_size must be at least 1"));
        }
        if self.crawl.hierarchy_depth == 0 {
            return Err(ConceptLinkError::config(
                "crawl.hierarchy_depth must be at least 1",
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConceptLinkError::config("retry.max_attempts must be at least 1"));
        }
        if self.retry.max_delay_ms < self.retry.base_delay_ms {
            return Err(ConceptLinkError::config(
                "retry.max_delay_ms must not be below retry.base_delay_ms",
            ));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.conceptlink/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ConceptLinkError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.conceptlink/conceptlink.toml`).
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
    let content = std::fs::read_to_string(path).map_err(|e| ConceptLinkError::io(path, e))?;

    toml::from_str(&content).map_err(|e| {
        ConceptLinkError::config(format!("failed to parse {}: {e}", path.display()))
    })
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ConceptLinkError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ConceptLinkError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ConceptLinkError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
