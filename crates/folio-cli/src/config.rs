use folio_agent::{ModelConfig, DEFAULT_MARKET_DATA_URL};
use folio_memory::CompactionConfig;
use folio_orchestrator::DEFAULT_MAX_ITERATIONS;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Environment variable that overrides `model.api_key`.
pub const API_KEY_ENV: &str = "FOLIO_API_KEY";

#[derive(Debug, Deserialize)]
pub struct FolioConfig {
    #[serde(default = "default_app_name")]
    pub app_name: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub model: ModelConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub refinement: RefinementConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub market_data: MarketDataConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_compaction_interval")]
    pub compaction_interval: u32,
    #[serde(default = "default_overlap_size")]
    pub overlap_size: usize,
    /// Summarize compacted windows with the model instead of the offline digest.
    #[serde(default)]
    pub llm_summaries: bool,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            compaction_interval: default_compaction_interval(),
            overlap_size: default_overlap_size(),
            llm_summaries: false,
        }
    }
}

impl MemoryConfig {
    pub fn compaction(&self) -> CompactionConfig {
        CompactionConfig {
            interval: self.compaction_interval,
            overlap_size: self.overlap_size,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct RefinementConfig {
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            max_iterations: default_max_iterations(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct SearchConfig {
    /// SearxNG base URL; search is disabled when unset.
    #[serde(default)]
    pub base_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MarketDataConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_market_data_url")]
    pub base_url: String,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: default_market_data_url(),
        }
    }
}

#[derive(Debug, Deserialize, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub json: bool,
}

fn default_app_name() -> String {
    "folio".to_string()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_compaction_interval() -> u32 {
    3
}
fn default_overlap_size() -> usize {
    1
}
fn default_max_iterations() -> u32 {
    DEFAULT_MAX_ITERATIONS
}
fn default_true() -> bool {
    true
}
fn default_market_data_url() -> String {
    DEFAULT_MARKET_DATA_URL.to_string()
}

impl Default for FolioConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            data_dir: default_data_dir(),
            model: ModelConfig::default(),
            memory: MemoryConfig::default(),
            refinement: RefinementConfig::default(),
            search: SearchConfig::default(),
            market_data: MarketDataConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl FolioConfig {
    /// Reads `path`, falling back to defaults when the file does not exist.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            anyhow::anyhow!("Failed to read config file '{}': {e}", path.display())
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.app_name.trim().is_empty() {
            anyhow::bail!("app_name must not be empty");
        }
        if self.memory.compaction_interval == 0 {
            anyhow::bail!("memory.compaction_interval must be at least 1");
        }
        if self.refinement.max_iterations == 0 {
            anyhow::bail!("refinement.max_iterations must be at least 1");
        }
        Ok(())
    }

    /// Applies an API key taken from the environment, if non-empty.
    pub fn with_api_key(mut self, key: Option<String>) -> Self {
        if let Some(key) = key.filter(|k| !k.trim().is_empty()) {
            self.model.api_key = key;
        }
        self
    }

    pub fn sessions_path(&self) -> PathBuf {
        self.data_dir.join("sessions.json")
    }

    pub fn memory_path(&self) -> PathBuf {
        self.data_dir.join("memory.json")
    }

    pub fn profiles_path(&self) -> PathBuf {
        self.data_dir.join("user_profiles.json")
    }
}
