//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{num::NonZeroU32, path::PathBuf, str::FromStr};

use clap::{Args, Parser, Subcommand, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::serialization::{CompressionRule, DecompressionMode, SerializerKind};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "snapcache";
const ENV_PREFIX: &str = "SNAPCACHE";
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 8;
const DEFAULT_SQL_PAGE_SIZE: usize = 1000;
const DEFAULT_COLLECT_MIN_GEN_DELTA: i64 = 8;
const DEFAULT_CONSUME_BATCH_LIMIT: usize = 100;
const DEFAULT_AUTO_CONSUME_INTERVAL_MS: u64 = 5000;

/// Command-line arguments for the snapcache binary.
#[derive(Debug, Parser)]
#[command(
    name = "snapcache",
    version,
    about = "Generation-versioned published content cache"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "SNAPCACHE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(flatten)]
    pub overrides: GlobalOverrides,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Load the content and media trees and report what was cached.
    Load(LoadArgs),
    /// Load both trees with strict payload checks; fails if any node is skipped.
    Verify,
    /// Apply pending database migrations.
    Migrate,
}

#[derive(Debug, Args, Default, Clone)]
pub struct LoadArgs {
    /// Override the payload encoding (json|msgpack).
    #[arg(long = "serializer", value_name = "KIND")]
    pub serializer: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct GlobalOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new(),
        global = true
    )]
    pub log_json: Option<bool>,

    /// Override the database connection URL.
    #[arg(long = "database-url", value_name = "URL", global = true)]
    pub database_url: Option<String>,
}

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub database: DatabaseSettings,
    pub cache: CacheSettings,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    pub url: Option<String>,
    pub max_connections: NonZeroU32,
}

#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub serializer: SerializerKind,
    pub decompression: DecompressionMode,
    /// Rows fetched per round trip when streaming nodes.
    pub sql_page_size: usize,
    pub collect_min_gen_delta: i64,
    pub auto_collect: bool,
    /// Fail a read instead of dropping the side whose payload row is empty.
    pub fail_on_missing_payload: bool,
    pub compressed_properties: Vec<CompressionRule>,
    pub consume_batch_limit: usize,
    pub auto_consume_interval_ms: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            serializer: SerializerKind::MsgPack,
            decompression: DecompressionMode::Lazy,
            sql_page_size: DEFAULT_SQL_PAGE_SIZE,
            collect_min_gen_delta: DEFAULT_COLLECT_MIN_GEN_DELTA,
            auto_collect: true,
            fail_on_missing_payload: false,
            compressed_properties: Vec::new(),
            consume_batch_limit: DEFAULT_CONSUME_BATCH_LIMIT,
            auto_consume_interval_ms: DEFAULT_AUTO_CONSUME_INTERVAL_MS,
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
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
    raw.apply_global_overrides(&cli.overrides);
    if let Some(Command::Load(args)) = cli.command.as_ref() {
        raw.apply_load_overrides(args);
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    database: RawDatabaseSettings,
    cache: RawCacheSettings,
}

impl RawSettings {
    fn apply_global_overrides(&mut self, overrides: &GlobalOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
        if let Some(url) = overrides.database_url.as_ref() {
            self.database.url = Some(url.clone());
        }
    }

    fn apply_load_overrides(&mut self, overrides: &LoadArgs) {
        if let Some(serializer) = overrides.serializer.as_ref() {
            self.cache.serializer = Some(serializer.clone());
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            database,
            cache,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            database: build_database_settings(database)?,
            cache: build_cache_settings(cache)?,
        })
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

fn build_database_settings(database: RawDatabaseSettings) -> Result<DatabaseSettings, LoadError> {
    let url = database.url.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    });

    let max_connections = non_zero_u32(
        database
            .max_connections
            .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS)
            .into(),
        "database.max_connections",
    )?;

    Ok(DatabaseSettings {
        url,
        max_connections,
    })
}

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let defaults = CacheSettings::default();

    let serializer = match cache.serializer {
        Some(value) => SerializerKind::from_str(&value)
            .map_err(|reason| LoadError::invalid("cache.serializer", reason))?,
        None => defaults.serializer,
    };
    let decompression = match cache.decompression {
        Some(value) => DecompressionMode::from_str(&value)
            .map_err(|reason| LoadError::invalid("cache.decompression", reason))?,
        None => defaults.decompression,
    };

    let sql_page_size = cache.sql_page_size.unwrap_or(defaults.sql_page_size);
    if sql_page_size == 0 {
        return Err(LoadError::invalid(
            "cache.sql_page_size",
            "must be greater than zero",
        ));
    }

    let collect_min_gen_delta = cache
        .collect_min_gen_delta
        .unwrap_or(defaults.collect_min_gen_delta);
    if collect_min_gen_delta < 0 {
        return Err(LoadError::invalid(
            "cache.collect_min_gen_delta",
            "must not be negative",
        ));
    }

    let consume_batch_limit = cache
        .consume_batch_limit
        .unwrap_or(defaults.consume_batch_limit);
    if consume_batch_limit == 0 {
        return Err(LoadError::invalid(
            "cache.consume_batch_limit",
            "must be greater than zero",
        ));
    }

    let auto_consume_interval_ms = cache
        .auto_consume_interval_ms
        .unwrap_or(defaults.auto_consume_interval_ms);
    if auto_consume_interval_ms == 0 {
        return Err(LoadError::invalid(
            "cache.auto_consume_interval_ms",
            "must be greater than zero",
        ));
    }

    let compressed_properties = cache.compressed_properties.unwrap_or_default();
    if compressed_properties
        .iter()
        .any(|rule| rule.alias.trim().is_empty())
    {
        return Err(LoadError::invalid(
            "cache.compressed_properties",
            "alias must not be empty",
        ));
    }

    Ok(CacheSettings {
        serializer,
        decompression,
        sql_page_size,
        collect_min_gen_delta,
        auto_collect: cache.auto_collect.unwrap_or(defaults.auto_collect),
        fail_on_missing_payload: cache
            .fail_on_missing_payload
            .unwrap_or(defaults.fail_on_missing_payload),
        compressed_properties,
        consume_batch_limit,
        auto_consume_interval_ms,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawDatabaseSettings {
    url: Option<String>,
    max_connections: Option<u32>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    serializer: Option<String>,
    decompression: Option<String>,
    sql_page_size: Option<usize>,
    collect_min_gen_delta: Option<i64>,
    auto_collect: Option<bool>,
    fail_on_missing_payload: Option<bool>,
    compressed_properties: Option<Vec<CompressionRule>>,
    consume_batch_limit: Option<usize>,
    auto_consume_interval_ms: Option<u64>,
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[cfg(test)]
mod tests;
