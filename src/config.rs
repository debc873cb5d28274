use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_BIGQUERY_API_URL: &str = "https://bigquery.googleapis.com/bigquery/v2";
pub const DEFAULT_MAXIMUM_BYTES_BILLED: i64 = 10_000_000_000;

// Environment names the service has always honored, mapped onto config keys.
const LEGACY_ENV: &[(&str, &str)] = &[
    ("GA4_BIGQUERY_DATASET", "warehouse.dataset_id"),
    ("GA4_PROJECT_ID", "warehouse.project_id"),
    ("MODEL_ID", "llm.model"),
    ("VERTEX_LOCATION", "llm.location"),
    ("SIMPLE_AUTH_USERNAME", "auth.username"),
    ("SIMPLE_AUTH_PASSWORD_HASH", "auth.password_hash"),
];

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Deserialize, Clone)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    pub backend: String, // "vertex", "remote", or "ollama"
    pub model: String,
    pub location: String,
    pub api_url: Option<String>,
    pub api_key: Option<String>,
    pub temperature: f32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct WarehouseConfig {
    pub project_id: Option<String>,
    pub dataset_id: String,
    pub api_url: String,
    pub maximum_bytes_billed: u64,
    pub location: Option<String>,
    pub access_token: Option<String>,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct AuthConfig {
    pub username: Option<String>,
    pub password_hash: Option<String>,
}

impl AuthConfig {
    pub fn enabled(&self) -> bool {
        self.username.is_some() && self.password_hash.is_some()
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct CatalogConfig {
    pub path: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub web: WebConfig,
    pub llm: LlmConfig,
    pub warehouse: WarehouseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub catalog: CatalogConfig,
}

#[derive(Parser, Debug, Default)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// BigQuery dataset holding the GA4 export
    #[arg(long)]
    pub dataset: Option<String>,

    /// Google Cloud project that owns the dataset
    #[arg(long)]
    pub project: Option<String>,

    /// Template catalog to load instead of the built-in one
    #[arg(long, value_name = "FILE")]
    pub catalog: Option<PathBuf>,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,

    /// Answer a single question and exit
    #[arg(long, value_name = "QUESTION")]
    pub ask: Option<String>,

    /// With --ask, also print the query details
    #[arg(long)]
    pub details: bool,

    /// Print the template catalog and exit
    #[arg(long)]
    pub list_templates: bool,
}

impl AppConfig {
    pub fn new(args: &CliArgs) -> Result<Self, ConfigError> {
        Self::from_sources(args, std::env::vars().collect())
    }

    /// Builds the configuration from `args` and an explicit environment.
    pub fn from_sources(args: &CliArgs, env: HashMap<String, String>) -> Result<Self, ConfigError> {
        let mut config_builder = Config::builder()
            .set_default("web.host", "127.0.0.1")?
            .set_default("web.port", 8080)?
            .set_default("llm.backend", "vertex")?
            .set_default("llm.model", "gemini-2.5-pro")?
            .set_default("llm.location", "us-central1")?
            .set_default("llm.temperature", 0.0)?
            .set_default("warehouse.dataset_id", "")?
            .set_default("warehouse.api_url", DEFAULT_BIGQUERY_API_URL)?
            .set_default("warehouse.maximum_bytes_billed", DEFAULT_MAXIMUM_BYTES_BILLED)?;

        // Add configuration from file if specified
        if let Some(config_path) = &args.config {
            config_builder = config_builder.add_source(File::from(config_path.as_path()));
        } else {
            // Check for config in default locations
            let default_locations = vec![
                "config.toml",
                "config/config.toml",
                "/etc/nl-ga4/config.toml",
            ];

            for location in default_locations {
                if Path::new(location).exists() {
                    config_builder =
                        config_builder.add_source(File::new(location, config::FileFormat::Toml));
                    break;
                }
            }
        }

        config_builder = config_builder.add_source(
            Environment::with_prefix("NL_GA4")
                .separator("__")
                .try_parsing(true)
                .source(Some(env.clone())),
        );

        for (name, key) in LEGACY_ENV {
            let value = env.get(*name).filter(|v| !v.trim().is_empty()).cloned();
            config_builder = config_builder.set_override_option(*key, value)?;
        }

        let mut config: AppConfig = config_builder.build()?.try_deserialize()?;

        // Override with command line args if provided
        if let Some(host) = &args.host {
            config.web.host = host.clone();
        }
        if let Some(port) = args.port {
            config.web.port = port;
        }
        if let Some(dataset) = &args.dataset {
            config.warehouse.dataset_id = dataset.clone();
        }
        if let Some(project) = &args.project {
            config.warehouse.project_id = Some(project.clone());
        }
        if let Some(catalog) = &args.catalog {
            config.catalog.path = Some(catalog.clone());
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.warehouse.dataset_id.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "warehouse.dataset_id is required (set GA4_BIGQUERY_DATASET)".to_string(),
            ));
        }
        // A half-configured gate is an error, not a silently open server.
        if self.auth.username.is_some() != self.auth.password_hash.is_some() {
            return Err(ConfigError::Invalid(
                "auth.username and auth.password_hash must be set together".to_string(),
            ));
        }
        if self.warehouse.maximum_bytes_billed == 0 {
            return Err(ConfigError::Invalid(
                "warehouse.maximum_bytes_billed must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
