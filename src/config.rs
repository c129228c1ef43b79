use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Deserialize;
use serde_yaml;
use std::env;
use std::fs;
use std::path::PathBuf;

pub const DEFAULT_MAX_WORKERS: usize = 5;
pub const MAX_WORKERS_CAP: usize = 20;

#[derive(Parser, Debug)]
#[command(name = "shelfsync")]
#[command(about = "Mirrors reading progress and highlights into a Notion database", long_about = None)]
pub struct Cli {
    #[arg(short = 'c', long = "config", global = true)]
    pub config_path: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Run one sync and print the summary
    Sync(SyncArgs),
    /// Serve the HTTP trigger (and the optional schedule)
    Serve {
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Validate credentials and the Notion property mapping
    Check,
}

#[derive(clap::Args, Debug, Clone, Default)]
pub struct SyncArgs {
    #[arg(long, value_enum)]
    pub source: Option<SourceKind>,
    #[arg(long)]
    pub limit: Option<usize>,
    #[arg(long)]
    pub title: Option<String>,
    #[arg(long)]
    pub workers: Option<usize>,
}

pub fn default_config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".shelfsync")
}

pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.yaml")
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    #[default]
    Weread,
    Kindle,
}

/// Column names in the Notion database. A `null` entry disables that field.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Properties {
    pub title: String,
    pub author: Option<String>,
    pub status: Option<String>,
    pub current_page: Option<String>,
    pub total_page: Option<String>,
    pub date_started: Option<String>,
    pub last_read_at: Option<String>,
    pub date_finished: Option<String>,
    pub source: Option<String>,
    pub cover: Option<String>,
    pub genre: Option<String>,
    pub year_started: Option<String>,
    pub rating: Option<String>,
}

impl Default for Properties {
    fn default() -> Self {
        Properties {
            title: "Name".to_string(),
            author: Some("Author".to_string()),
            status: Some("Status".to_string()),
            current_page: Some("Current Page".to_string()),
            total_page: Some("Total Page".to_string()),
            date_started: Some("Date Started".to_string()),
            last_read_at: Some("Last Read At".to_string()),
            date_finished: Some("Date Finished".to_string()),
            source: Some("Source".to_string()),
            cover: None,
            genre: None,
            year_started: None,
            rating: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StatusValues {
    pub not_started: String,
    pub in_progress: String,
    pub finished: String,
}

impl Default for StatusValues {
    fn default() -> Self {
        StatusValues {
            not_started: "To Be Read".to_string(),
            in_progress: "Currently Reading".to_string(),
            finished: "Read".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Notion {
    pub token: String,
    pub database_id: String,
    #[serde(default)]
    pub properties: Properties,
    #[serde(default)]
    pub status_values: StatusValues,
    #[serde(default = "default_notion_url")]
    pub base_url: String,
}

fn default_notion_url() -> String {
    "https://api.notion.com/v1".to_string()
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Source {
    #[serde(default)]
    pub kind: SourceKind,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Weread {
    pub cookies: String,
    pub label: String,
    pub styles: Vec<i32>,
    pub colors: Vec<i32>,
    pub base_url: String,
}

impl Default for Weread {
    fn default() -> Self {
        Weread {
            cookies: String::new(),
            label: "WeRead".to_string(),
            styles: vec![],
            colors: vec![],
            base_url: "https://weread.qq.com".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Kindle {
    pub cookies: String,
    pub clippings_path: Option<String>,
    pub label: String,
    pub base_url: String,
}

impl Default for Kindle {
    fn default() -> Self {
        Kindle {
            cookies: String::new(),
            clippings_path: None,
            label: "Kindle".to_string(),
            base_url: "https://read.amazon.com".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SyncOptions {
    pub limit: Option<usize>,
    pub max_workers: usize,
    pub title_filter: Option<String>,
    pub max_retries: u32,
    pub retry_base_ms: u64,
    pub request_timeout_seconds: u64,
}

impl Default for SyncOptions {
    fn default() -> Self {
        SyncOptions {
            limit: None,
            max_workers: DEFAULT_MAX_WORKERS,
            title_filter: None,
            max_retries: 3,
            retry_base_ms: 1000,
            request_timeout_seconds: 30,
        }
    }
}

impl SyncOptions {
    /// Worker count after clamping; a limit forces sequential processing.
    pub fn effective_workers(&self) -> usize {
        if self.limit.is_some() {
            return 1;
        }
        self.max_workers.clamp(1, MAX_WORKERS_CAP)
    }

    /// Filters like "none" or "off" left behind in an env file disable the filter.
    pub fn title_filter(&self) -> Option<&str> {
        let filter = non_empty(&self.title_filter)?;
        match filter.to_lowercase().as_str() {
            "none" | "null" | "false" | "off" | "disable" | "0" => None,
            _ => Some(filter),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Server {
    pub port: u16,
    pub api_key: Option<String>,
    pub schedule_interval_minutes: Option<u64>,
}

impl Default for Server {
    fn default() -> Self {
        Server {
            port: 8765,
            api_key: None,
            schedule_interval_minutes: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    pub notion: Notion,
    #[serde(default)]
    pub source: Source,
    #[serde(default)]
    pub weread: Weread,
    #[serde(default)]
    pub kindle: Kindle,
    #[serde(default)]
    pub sync: SyncOptions,
    #[serde(default)]
    pub server: Server,
}

impl Config {
    pub fn new(path: &str) -> Result<Self> {
        let cfg = Config::load_config(path)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml(yaml_str: &str) -> Result<Self> {
        let yaml_with_env = Config::substitute_env_vars(yaml_str)?;
        let mut config: Config = serde_yaml::from_str(&yaml_with_env)?;
        config.normalize();
        Ok(config)
    }

    fn load_config(path: &str) -> Result<Config> {
        let yaml_str = fs::read_to_string(path)?;
        Config::from_yaml(&yaml_str)
    }

    /// Empty strings produced by unset `${VAR}` references count as absent.
    fn normalize(&mut self) {
        let clear = |v: &mut Option<String>| {
            if v.as_deref().map(str::trim).is_some_and(str::is_empty) {
                *v = None;
            }
        };
        clear(&mut self.kindle.clippings_path);
        clear(&mut self.sync.title_filter);
        clear(&mut self.server.api_key);
        if self.sync.limit == Some(0) {
            self.sync.limit = None;
        }
        self.notion.token = self.notion.token.trim().to_string();
        self.notion.database_id = self.notion.database_id.trim().to_string();
        self.weread.cookies = strip_quotes(self.weread.cookies.trim()).to_string();
        self.kindle.cookies = strip_quotes(self.kindle.cookies.trim()).to_string();
    }

    pub fn validate(&self) -> Result<()> {
        if self.notion.token.is_empty() || self.notion.database_id.is_empty() {
            anyhow::bail!("missing notion.token or notion.database_id (NOTION_TOKEN / NOTION_DATABASE_ID)");
        }
        if self.notion.properties.title.trim().is_empty() {
            anyhow::bail!("notion.properties.title must name the title column");
        }
        Ok(())
    }

    pub fn apply_sync_args(&mut self, args: &SyncArgs) {
        if let Some(source) = args.source {
            self.source.kind = source;
        }
        if let Some(limit) = args.limit {
            self.sync.limit = if limit == 0 { None } else { Some(limit) };
        }
        if let Some(title) = &args.title {
            self.sync.title_filter = Some(title.clone());
        }
        if let Some(workers) = args.workers {
            self.sync.max_workers = workers;
        }
    }

    fn substitute_env_vars(yaml_str: &str) -> Result<String> {
        let mut result = yaml_str.to_string();
        let mut offset = 0;

        while let Some(start) = result[offset..].find("${") {
            let actual_start = offset + start;
            if let Some(end) = result[actual_start..].find("}") {
                let var_name = &result[actual_start + 2..actual_start + end];

                // ${VAR:-default}
                let env_value = if let Some(default_start) = var_name.find(":-") {
                    let actual_var = &var_name[..default_start];
                    let default_val = &var_name[default_start + 2..];
                    env::var(actual_var)
                        .ok()
                        .filter(|v| !v.trim().is_empty())
                        .unwrap_or_else(|| default_val.to_string())
                } else {
                    env::var(var_name).unwrap_or_else(|_| {
                        tracing::warn!("environment variable '{}' not found", var_name);
                        String::new()
                    })
                };

                result.replace_range(actual_start..actual_start + end + 1, &env_value);
                offset = actual_start + env_value.len();
            } else {
                break;
            }
        }

        Ok(result)
    }
}

pub fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn strip_quotes(s: &str) -> &str {
    s.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| s.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
        .unwrap_or(s)
}
