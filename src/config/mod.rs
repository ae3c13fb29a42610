//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    borrow::Cow,
    collections::BTreeMap,
    num::{NonZeroU64, NonZeroUsize},
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::{
    CacheConfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_INDEFINITE_TTL, DEFAULT_OPERATION_TIMEOUT,
    DEFAULT_SCAN_BATCH_SIZE, PolicyError, Ttl, TtlPolicy,
};

mod cli;

pub use cli::{CliArgs, Command, FlushArgs, Overrides, ParseDurationArgs};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "storefront";
const ENV_PREFIX: &str = "STOREFRONT";

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid {
        key: Cow<'static, str>,
        reason: String,
    },
}

impl LoadError {
    fn invalid(key: impl Into<Cow<'static, str>>, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.into(),
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;
    raw.apply_overrides(&cli.overrides);

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
}

impl RawSettings {
    fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.redis_url.as_ref() {
            self.cache.redis_url = Some(url.clone());
        }
        if let Some(size) = overrides.scan_batch_size {
            self.cache.scan_batch_size = Some(size);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings { logging, cache } = raw;

        let logging = build_logging_settings(logging)?;
        let cache = build_cache_settings(cache)?;

        Ok(Self { logging, cache })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheConfig, LoadError> {
    let redis_url = cache
        .redis_url
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty());

    let scan_batch_size = match cache.scan_batch_size {
        Some(value) => non_zero_usize(value, "cache.scan_batch_size")?,
        None => DEFAULT_SCAN_BATCH_SIZE,
    };
    let operation_timeout = match cache.operation_timeout_ms {
        Some(value) => non_zero_millis(value, "cache.operation_timeout_ms")?,
        None => DEFAULT_OPERATION_TIMEOUT,
    };
    let connect_timeout = match cache.connect_timeout_ms {
        Some(value) => non_zero_millis(value, "cache.connect_timeout_ms")?,
        None => DEFAULT_CONNECT_TIMEOUT,
    };

    let indefinite_ttl = match cache.default_ttl {
        Some(text) => parse_indefinite_ttl(&text)?,
        None => DEFAULT_INDEFINITE_TTL,
    };
    let policy = TtlPolicy::with_overrides(
        indefinite_ttl,
        cache
            .ttl
            .iter()
            .map(|(family, duration)| (family.as_str(), duration.as_str())),
    )
    .map_err(policy_error)?;

    Ok(CacheConfig {
        enabled: cache.enabled.unwrap_or(true),
        redis_url,
        scan_batch_size,
        operation_timeout,
        connect_timeout,
        policy,
    })
}

fn parse_indefinite_ttl(text: &str) -> Result<NonZeroU64, LoadError> {
    match Ttl::parse(text) {
        Ok(Ttl::Seconds(secs)) => Ok(secs),
        Ok(Ttl::Never) => Err(LoadError::invalid(
            "cache.default_ttl",
            "must be greater than zero",
        )),
        Err(err) => Err(LoadError::invalid("cache.default_ttl", err.to_string())),
    }
}

fn policy_error(err: PolicyError) -> LoadError {
    let family = match &err {
        PolicyError::UnknownFamily { name } => name.clone(),
        PolicyError::NeverCached { family }
        | PolicyError::ZeroTtl { family }
        | PolicyError::Duration { family, .. } => family.name().to_string(),
    };
    LoadError::invalid(format!("cache.ttl.{family}"), err.to_string())
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    redis_url: Option<String>,
    scan_batch_size: Option<u64>,
    operation_timeout_ms: Option<u64>,
    connect_timeout_ms: Option<u64>,
    default_ttl: Option<String>,
    /// Per-family TTL overrides keyed by family name.
    ttl: BTreeMap<String, String>,
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_millis(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_millis(value))
}

#[cfg(test)]
mod tests;
