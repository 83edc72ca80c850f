use std::{
    fmt,
    fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
    str::FromStr,
    thread,
    time::Duration,
};
use serde::Deserialize;
use anyhow::Context;
use log::{info, warn};

use crate::mail::Recipient;

// the generic scraper variant ran 6 workers
pub const DEFAULT_MAX_WORKERS: usize = 6;

pub const DEFAULT_CONFIG_FILE: &str = "fanout.toml";

/// How many worker processes may run at the same time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(try_from = "CeilingRepr")]
pub enum Ceiling {
    Fixed(NonZeroUsize),

    // one worker per logical cpu of the host
    Auto,
}

impl Ceiling {
    pub fn resolve(&self) -> usize {
        match self {
            Ceiling::Fixed(n) => n.get(),

            Ceiling::Auto => thread::available_parallelism()
                .map(NonZeroUsize::get)
                .unwrap_or_else(|e| {
                    warn!("Failed to query the number of cpus, falling back to 1: `{e}`");
                    1
                }),
        }
    }
}

impl Default for Ceiling {
    fn default() -> Self {
        Ceiling::Fixed(
            NonZeroUsize::new(DEFAULT_MAX_WORKERS).unwrap_or(NonZeroUsize::MIN)
        )
    }
}

impl fmt::Display for Ceiling {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ceiling::Fixed(n) => write!(f, "{n}"),

            Ceiling::Auto => write!(f, "auto"),
        }
    }
}

impl FromStr for Ceiling {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> anyhow::Result<Self> {
        if s.eq_ignore_ascii_case("auto") {
            return Ok(Ceiling::Auto)
        }
        let n: usize = s.parse()
            .with_context(|| format!("`{s}` is neither a worker count nor `auto`"))?;
        NonZeroUsize::new(n)
            .map(Ceiling::Fixed)
            .ok_or_else(|| anyhow::anyhow!("`max_workers` must be at least 1, got `{n}`"))
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum CeilingRepr {
    Count(i64),

    Keyword(String),
}

impl TryFrom<CeilingRepr> for Ceiling {
    type Error = anyhow::Error;

    fn try_from(repr: CeilingRepr) -> anyhow::Result<Self> {
        match repr {
            CeilingRepr::Count(n) => usize::try_from(n)
                .ok()
                .and_then(NonZeroUsize::new)
                .map(Ceiling::Fixed)
                .ok_or_else(|| anyhow::anyhow!("`max_workers` must be at least 1, got `{n}`")),

            CeilingRepr::Keyword(k) if k.eq_ignore_ascii_case("auto") => Ok(Ceiling::Auto),

            CeilingRepr::Keyword(k) => Err(
                anyhow::anyhow!("`max_workers` must be a number or `auto`, got `{k}`")
            ),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    // JSON array of records carrying the job inputs
    pub input_file: PathBuf,

    pub input_field: String,

    // the worker gets `args` followed by the job input
    pub program: String,
    pub args: Vec<String>,

    pub max_workers: Ceiling,

    // in seconds, no deadline when absent
    pub timeout_secs: Option<u64>,
}

impl RunnerConfig {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            input_file: PathBuf::from("urls.json"),
            input_field: crate::job::DEFAULT_INPUT_FIELD.to_string(),
            program: "node".to_string(),
            args: vec!["./scraper.js".to_string()],
            max_workers: Ceiling::default(),
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    pub api_url: String,

    // name of the env var holding the api token
    pub api_key_env: String,

    pub from: Option<Recipient>,
    // defaults to `from`
    pub reply_to: Option<Recipient>,

    pub subject: String,

    pub recipients_file: PathBuf,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            api_url: crate::mail::MAILERSEND_API_URL.to_string(),
            api_key_env: "MAILERSEND_API_KEY".to_string(),
            from: None,
            reply_to: None,
            subject: "This is a Test Email".to_string(),
            recipients_file: PathBuf::from("emails.json"),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub runner: RunnerConfig,

    pub mail: MailConfig,
}

impl Config {
    pub fn from_toml(contents: &str) -> anyhow::Result<Config> {
        Ok(toml::from_str(contents)?)
    }

    pub fn from_file(file_path: &Path) -> anyhow::Result<Config> {
        let contents = fs::read_to_string(file_path)
            .with_context(|| format!("Failed to read config file `{}`", file_path.display()))?;
        Config::from_toml(&contents)
            .with_context(|| format!("Malformed config file `{}`", file_path.display()))
    }

    /// Load the explicit config file, or the first existing default
    /// location, or fall back to built-in defaults.
    pub fn load(explicit: Option<&Path>) -> anyhow::Result<Config> {
        if let Some(file_path) = explicit {
            return Config::from_file(file_path)
        }
        for candidate in default_locations() {
            if candidate.is_file() {
                info!("Using config file `{}`", candidate.display());
                return Config::from_file(&candidate)
            }
        }
        info!("No config file found, using defaults.");
        Ok(Config::default())
    }
}

/// Load `.env` into the environment, a missing file is fine.
pub fn load_dotenv() {
    report_dotenv(dotenvy::dotenv().map(|_| ()));
}

// true if the file existed but could not be loaded
fn report_dotenv(result: dotenvy::Result<()>) -> bool {
    match result {
        Err(e) if !e.not_found() => {
            warn!("Failed to load `.env`: `{e}`");
            true
        },

        _ => false,
    }
}

fn default_locations() -> Vec<PathBuf> {
    let mut locations = vec![PathBuf::from(DEFAULT_CONFIG_FILE)];
    if let Some(home_dir) = home::home_dir() {
        locations.push(home_dir.join(".fanout").join("config.toml"));
    }
    locations
}
