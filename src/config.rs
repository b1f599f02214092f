use crate::errors::{AppError, AppResult};
use crate::models::{DateRange, WidgetId};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_FILE_NAME: &str = "dashboard.yaml";
const ENV_PREFIX: &str = "SALES_DASHBOARD_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SecretSource {
    Keyring,
    Env,
}

impl SecretSource {
    fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "keyring" => Some(Self::Keyring),
            "env" => Some(Self::Env),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WarehouseConfig {
    /// SQLite warehouse file; relative paths resolve against the data dir.
    pub path: PathBuf,
    pub account: String,
    pub user: String,
    /// Retry a connectivity failure once before surfacing it.
    pub retry_on_connectivity: bool,
    pub retry_delay_ms: u64,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("warehouse.sqlite"),
            account: "local".to_string(),
            user: "analyst".to_string(),
            retry_on_connectivity: true,
            retry_delay_ms: 250,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SecretsConfig {
    pub source: SecretSource,
    pub keyring_service: String,
}

impl Default for SecretsConfig {
    fn default() -> Self {
        Self {
            source: SecretSource::Keyring,
            keyring_service: "sales-dashboard".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PresentationConfig {
    pub currency_prefix: String,
    pub top_n: u32,
    pub raw_row_limit: u32,
    pub pareto_threshold: f64,
}

impl Default for PresentationConfig {
    fn default() -> Self {
        Self {
            currency_prefix: "R$".to_string(),
            top_n: 10,
            raw_row_limit: 1_000,
            pareto_threshold: 80.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DashboardConfig {
    pub data_dir: PathBuf,
    pub log_filter: String,
    pub exports_dir: PathBuf,
    pub default_range: Option<DateRange>,
    pub widgets: Vec<WidgetId>,
    pub warehouse: WarehouseConfig,
    pub secrets: SecretsConfig,
    pub presentation: PresentationConfig,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("."),
            log_filter: "info".to_string(),
            exports_dir: PathBuf::from("exports"),
            default_range: None,
            widgets: WidgetId::ALL.to_vec(),
            warehouse: WarehouseConfig::default(),
            secrets: SecretsConfig::default(),
            presentation: PresentationConfig::default(),
        }
    }
}

impl DashboardConfig {
    /// Loads `dashboard.yaml` from `data_dir` when present, then applies env overrides.
    pub fn load(data_dir: &Path) -> AppResult<Self> {
        let path = data_dir.join(CONFIG_FILE_NAME);
        let mut config = if path.exists() {
            Self::from_file(&path)?
        } else {
            tracing::info!(path = %path.display(), "no dashboard config found, using defaults");
            Self::default()
        };
        config.data_dir = data_dir.to_path_buf();
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> AppResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_yaml(&raw)
    }

    pub fn from_yaml(raw: &str) -> AppResult<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> AppResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(path) = var("WAREHOUSE_PATH") {
            self.warehouse.path = PathBuf::from(path);
        }
        if let Some(account) = var("ACCOUNT") {
            self.warehouse.account = account;
        }
        if let Some(user) = var("USER") {
            self.warehouse.user = user;
        }
        if let Some(filter) = var("LOG") {
            self.log_filter = filter;
        }
        if let Some(raw) = var("SECRET_SOURCE") {
            self.secrets.source = SecretSource::parse(&raw)
                .ok_or_else(|| AppError::Config(format!("Unknown secret source '{}'", raw)))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> AppResult<()> {
        if self.presentation.top_n == 0 {
            return Err(AppError::Config("presentation.topN must be at least 1".to_string()));
        }
        if self.presentation.raw_row_limit == 0 {
            return Err(AppError::Config("presentation.rawRowLimit must be at least 1".to_string()));
        }
        if !(0.0..=100.0).contains(&self.presentation.pareto_threshold) {
            return Err(AppError::Config(
                "presentation.paretoThreshold must be between 0 and 100".to_string(),
            ));
        }
        if let Some(range) = self.default_range {
            if !range.is_valid() {
                return Err(AppError::Config(format!(
                    "defaultRange start {} is after end {}",
                    range.start, range.end
                )));
            }
        }
        if self.widgets.is_empty() {
            return Err(AppError::Config("at least one widget must be visible".to_string()));
        }
        Ok(())
    }

    pub fn warehouse_path(&self) -> PathBuf {
        self.resolve(&self.warehouse.path)
    }

    pub fn exports_path(&self) -> PathBuf {
        self.resolve(&self.exports_dir)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.data_dir.join("logs")
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.data_dir.join(path)
        }
    }
}
