//! Application configuration loading for CLI defaults.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::cli::{Args, CliValueSources};

/// File configuration for `patent-downloader` defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileConfig {
    /// Default output directory.
    pub output_dir: Option<PathBuf>,
    /// Default records per query.
    pub max_results: Option<u16>,
    /// Default results per page.
    pub page_size: Option<u8>,
    /// Default per-host minimum delay in milliseconds.
    pub delay_ms: Option<u64>,
    /// Default concurrency.
    pub concurrency: Option<u8>,
    /// Default transient attempts.
    pub max_retries: Option<u8>,
    /// Default capture budget in seconds.
    pub capture_timeout_secs: Option<u64>,
    /// Run the browser headless by default.
    pub headless: Option<bool>,
    /// Record diagnostics by default.
    pub diagnostics: Option<bool>,
    /// Chrome/Chromium executable.
    pub chrome_path: Option<PathBuf>,
    /// HTTP connect timeout in seconds.
    pub connect_timeout_secs: Option<u64>,
    /// HTTP request timeout in seconds.
    pub request_timeout_secs: Option<u64>,
    /// Artifact download timeout in seconds.
    pub download_timeout_secs: Option<u64>,
    /// Session age that triggers a proactive re-capture, in seconds.
    pub session_max_age_secs: Option<u64>,
    /// Block signals tolerated per request before giving up.
    pub max_block_retries: Option<u32>,
}

impl FileConfig {
    /// Validates config values against the CLI ranges.
    pub fn validate(&self) -> Result<()> {
        check_range("max_results", self.max_results.map(u64::from), 1, 1000)?;
        check_range("page_size", self.page_size.map(u64::from), 1, 100)?;
        check_range("delay_ms", self.delay_ms, 0, 60_000)?;
        check_range("concurrency", self.concurrency.map(u64::from), 1, 32)?;
        check_range("max_retries", self.max_retries.map(u64::from), 1, 10)?;
        check_range("capture_timeout_secs", self.capture_timeout_secs, 1, 600)?;
        check_range("connect_timeout_secs", self.connect_timeout_secs, 1, 3600)?;
        check_range("request_timeout_secs", self.request_timeout_secs, 1, 3600)?;
        check_range("download_timeout_secs", self.download_timeout_secs, 1, 3600)?;
        check_range("session_max_age_secs", self.session_max_age_secs, 60, 86_400)?;
        check_range("max_block_retries", self.max_block_retries.map(u64::from), 0, 20)?;
        Ok(())
    }
}

fn check_range(field: &str, value: Option<u64>, min: u64, max: u64) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(min..=max).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: {min}..={max}");
    }
    Ok(())
}

/// Resolves default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/patent-downloader/config.toml`
/// 2. `$HOME/.config/patent-downloader/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("patent-downloader")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("patent-downloader")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads config from the default path if present.
pub fn load_default_file_config() -> Result<Option<FileConfig>> {
    let Some(path) = resolve_default_config_path() else {
        return Ok(None);
    };
    if !path.exists() {
        return Ok(None);
    }
    load_file_config(&path).map(Some)
}

fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw).with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line_no = line_index + 1;
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!("Invalid config syntax on line {line_no}: expected key = value");
        };

        let key = raw_key.trim();
        let value = raw_value.trim();
        let context = || format!("Invalid `{key}` value on line {line_no}");

        match key {
            "output_dir" => cfg.output_dir = Some(PathBuf::from(parse_string_literal(value).with_context(context)?)),
            "chrome_path" => cfg.chrome_path = Some(PathBuf::from(parse_string_literal(value).with_context(context)?)),
            "max_results" => cfg.max_results = Some(parse_integer(value).with_context(context)?),
            "page_size" => cfg.page_size = Some(parse_integer(value).with_context(context)?),
            "delay_ms" => cfg.delay_ms = Some(parse_integer(value).with_context(context)?),
            "concurrency" => cfg.concurrency = Some(parse_integer(value).with_context(context)?),
            "max_retries" => cfg.max_retries = Some(parse_integer(value).with_context(context)?),
            "capture_timeout_secs" => cfg.capture_timeout_secs = Some(parse_integer(value).with_context(context)?),
            "connect_timeout_secs" => cfg.connect_timeout_secs = Some(parse_integer(value).with_context(context)?),
            "request_timeout_secs" => cfg.request_timeout_secs = Some(parse_integer(value).with_context(context)?),
            "download_timeout_secs" => cfg.download_timeout_secs = Some(parse_integer(value).with_context(context)?),
            "session_max_age_secs" => cfg.session_max_age_secs = Some(parse_integer(value).with_context(context)?),
            "max_block_retries" => cfg.max_block_retries = Some(parse_integer(value).with_context(context)?),
            "headless" => cfg.headless = Some(parse_boolean(value).with_context(context)?),
            "diagnostics" => cfg.diagnostics = Some(parse_boolean(value).with_context(context)?),
            unknown => {
                bail!("Unknown configuration key: '{unknown}' on line {line_no}");
            }
        }
        cfg.validate().with_context(context)?;
    }
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_integer<T: TryFrom<u64>>(raw_value: &str) -> Result<T> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i128>()?;
    if value < 0 {
        bail!("Expected non-negative integer");
    }
    let value = u64::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u64"))?;
    T::try_from(value).map_err(|_| anyhow::anyhow!("Integer value {value} out of range"))
}

fn parse_boolean(raw_value: &str) -> Result<bool> {
    match raw_value.trim() {
        "true" => Ok(true),
        "false" => Ok(false),
        other => bail!("Expected boolean (true/false), got '{other}'"),
    }
}

/// Fills in values the user did not pass on the command line.
#[must_use]
pub fn apply_config_defaults(mut args: Args, sources: &CliValueSources, file_config: Option<&FileConfig>) -> Args {
    let Some(file_config) = file_config else {
        return args;
    };

    if !sources.output_dir
        && let Some(output_dir) = &file_config.output_dir
    {
        args.output_dir = Some(output_dir.clone());
    }
    if !sources.chrome_path
        && let Some(chrome_path) = &file_config.chrome_path
    {
        args.chrome_path = Some(chrome_path.clone());
    }
    if !sources.max_results
        && let Some(value) = file_config.max_results
    {
        args.max_results = value;
    }
    if !sources.page_size
        && let Some(value) = file_config.page_size
    {
        args.page_size = value;
    }
    if !sources.delay
        && let Some(value) = file_config.delay_ms
    {
        args.delay = value;
    }
    if !sources.concurrency
        && let Some(value) = file_config.concurrency
    {
        args.concurrency = value;
    }
    if !sources.max_retries
        && let Some(value) = file_config.max_retries
    {
        args.max_retries = value;
    }
    if !sources.timeout
        && let Some(value) = file_config.capture_timeout_secs
    {
        args.timeout = value;
    }
    if !sources.headless
        && let Some(value) = file_config.headless
    {
        args.headless = value;
    }
    if !sources.diagnostics
        && let Some(value) = file_config.diagnostics
    {
        args.diagnostics = value;
    }
    args
}
