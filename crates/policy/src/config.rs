//! The `PolicyConfig` structure and its file/environment loaders.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use common::names;
use derive_builder::Builder;
use getset::{CopyGetters, Getters};
use log::{info, warn, LevelFilter};
use strum::{AsRefStr, Display, EnumString};

use crate::error::{PolicyError, Result};

/// Severity threshold of the shim's own logging.
#[derive(AsRefStr, Display, EnumString, Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum LogLevel {
    Debug,
    Info,
    #[strum(serialize = "warn", serialize = "warning")]
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    /// The `log` crate has no FATAL; it collapses onto ERROR.
    pub fn to_level_filter(self) -> LevelFilter {
        match self {
            LogLevel::Debug => LevelFilter::Debug,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Error | LogLevel::Fatal => LevelFilter::Error,
        }
    }
}

/// Transport classes the admission policy can gate individually.
///
/// Anything that is not RC/UC/UD (XRC, raw packet, driver specific) is
/// `Other` and always admitted, matching the provider's default stance.
#[derive(AsRefStr, Display, Clone, Copy, Debug, PartialEq, Eq)]
#[strum(serialize_all = "UPPERCASE")]
pub enum QpType {
    Rc,
    Uc,
    Ud,
    Other,
}

/// Everything the shim needs to decide admissions and logging for one
/// process. Loaded once at shim init; reloading replaces the whole value.
#[derive(Builder, Clone, Debug, CopyGetters, Getters)]
#[builder(pattern = "owned", setter(into), build_fn(error = "PolicyError"))]
pub struct PolicyConfig {
    /// Master switch; off turns every wrapper into a passthrough.
    #[get_copy = "pub"]
    #[builder(default = "true")]
    enable_intercept: bool,
    /// Emit a detail record for every admitted QP creation.
    #[get_copy = "pub"]
    #[builder(default = "true")]
    log_qp_creation: bool,
    /// Log every intercepted call, not only the gated ones.
    #[get_copy = "pub"]
    #[builder(default = "false")]
    log_all_operations: bool,
    #[get_copy = "pub"]
    #[builder(default = "LogLevel::Info")]
    log_level: LogLevel,
    #[get = "pub"]
    #[builder(default = "PathBuf::from(\"/tmp/rdma_intercept.log\")")]
    log_file_path: PathBuf,

    #[get_copy = "pub"]
    #[builder(default = "false")]
    enable_qp_control: bool,
    #[get_copy = "pub"]
    #[builder(default = "100")]
    max_qp_per_process: u32,
    #[get_copy = "pub"]
    #[builder(default = "1024")]
    max_send_wr_limit: u32,
    #[get_copy = "pub"]
    #[builder(default = "1024")]
    max_recv_wr_limit: u32,
    #[get_copy = "pub"]
    #[builder(default = "true")]
    allow_rc_qp: bool,
    #[get_copy = "pub"]
    #[builder(default = "true")]
    allow_uc_qp: bool,
    #[get_copy = "pub"]
    #[builder(default = "true")]
    allow_ud_qp: bool,

    #[get_copy = "pub"]
    #[builder(default = "false")]
    enable_mr_control: bool,
    #[get_copy = "pub"]
    #[builder(default = "1000")]
    max_mr_per_process: u32,
    /// Bytes of registered memory one process may hold.
    #[get_copy = "pub"]
    #[builder(default = "10 * 1024 * 1024 * 1024")]
    max_memory_per_process: u64,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        PolicyConfigBuilder::default()
            .build()
            .expect("every field carries a default")
    }
}

impl PolicyConfig {
    /// Loads the effective policy: defaults, then the first configuration
    /// file that exists (explicit path, `RDMA_INTERCEPT_CONFIG`,
    /// `/etc/rdma_intercept.conf`), then the environment. The environment
    /// is applied last and therefore wins.
    pub fn load(explicit: Option<&Path>) -> Self {
        let mut config = Self::default();

        if let Some(path) = Self::resolve_file(explicit) {
            match fs::read_to_string(&path) {
                Ok(content) => {
                    info!("loading policy from {}", path.display());
                    config.apply_file_content(&content);
                }
                Err(err) => warn!("read policy file {}: {}", path.display(), err),
            }
        } else {
            info!("no policy file found, using defaults and environment");
        }

        config.apply_env();
        config
    }

    fn resolve_file(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_owned());
        }
        if let Ok(path) = env::var(names::env::CONFIG) {
            let path = PathBuf::from(path);
            if path.exists() {
                return Some(path);
            }
        }
        let fallback = PathBuf::from(names::DEFAULT_CONFIG_FILE);
        if fallback.exists() {
            Some(fallback)
        } else {
            None
        }
    }

    /// Applies every line of a configuration file, skipping blanks and
    /// comments. Bad lines are reported and ignored.
    pub fn apply_file_content(&mut self, content: &str) {
        for (index, line) in content.lines().enumerate() {
            if let Err(err) = self.apply_line(line) {
                warn!("invalid config line {}: {} ({})", index + 1, line.trim(), err);
            }
        }
    }

    /// Parses one `key = value` line. Keys are case-insensitive.
    pub fn apply_line(&mut self, line: &str) -> Result<()> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            return Ok(());
        }

        let (key, value) = line.split_once('=').ok_or(PolicyError::MissingDelimiter)?;
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();

        match key.as_str() {
            "enable_intercept" => self.enable_intercept = parse_bool(value)?,
            "log_qp_creation" => self.log_qp_creation = parse_bool(value)?,
            "log_all_operations" => self.log_all_operations = parse_bool(value)?,
            "log_level" => {
                self.log_level = LogLevel::from_str(value)
                    .map_err(|_| PolicyError::InvalidLogLevel(value.to_owned()))?
            }
            "log_file_path" => self.log_file_path = PathBuf::from(strip_quotes(value)),
            "enable_qp_control" => self.enable_qp_control = parse_bool(value)?,
            "max_qp_per_process" => self.max_qp_per_process = parse_u32(value)?,
            "max_send_wr_limit" => self.max_send_wr_limit = parse_u32(value)?,
            "max_recv_wr_limit" => self.max_recv_wr_limit = parse_u32(value)?,
            "allow_rc_qp" => self.allow_rc_qp = parse_bool(value)?,
            "allow_uc_qp" => self.allow_uc_qp = parse_bool(value)?,
            "allow_ud_qp" => self.allow_ud_qp = parse_bool(value)?,
            "enable_mr_control" => self.enable_mr_control = parse_bool(value)?,
            "max_mr_per_process" => self.max_mr_per_process = parse_u32(value)?,
            "max_memory_per_process" => self.max_memory_per_process = parse_u64(value)?,
            _ => return Err(PolicyError::UnknownKey(key)),
        }

        Ok(())
    }

    /// Applies the `RDMA_INTERCEPT_*` overrides. Values that fail to
    /// parse keep the previous field value.
    pub fn apply_env(&mut self) {
        apply_env_bool(names::env::ENABLE_QP_CONTROL, &mut self.enable_qp_control);
        apply_env_u32(names::env::MAX_QP_PER_PROCESS, &mut self.max_qp_per_process);
        apply_env_u32(names::env::MAX_SEND_WR_LIMIT, &mut self.max_send_wr_limit);
        apply_env_u32(names::env::MAX_RECV_WR_LIMIT, &mut self.max_recv_wr_limit);
        apply_env_bool(names::env::ALLOW_RC_QP, &mut self.allow_rc_qp);
        apply_env_bool(names::env::ALLOW_UC_QP, &mut self.allow_uc_qp);
        apply_env_bool(names::env::ALLOW_UD_QP, &mut self.allow_ud_qp);
    }

    /// Admission stance for one transport class.
    pub fn allows(&self, qp_type: QpType) -> bool {
        match qp_type {
            QpType::Rc => self.allow_rc_qp,
            QpType::Uc => self.allow_uc_qp,
            QpType::Ud => self.allow_ud_qp,
            QpType::Other => true,
        }
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "yes" | "on" | "1" => Ok(true),
        "false" | "no" | "off" | "0" => Ok(false),
        _ => Err(PolicyError::InvalidBool(value.to_owned())),
    }
}

fn parse_u32(value: &str) -> Result<u32> {
    match value.trim().parse::<u32>() {
        Ok(parsed) if parsed > 0 => Ok(parsed),
        _ => Err(PolicyError::InvalidNumber(value.to_owned())),
    }
}

fn parse_u64(value: &str) -> Result<u64> {
    match value.trim().parse::<u64>() {
        Ok(parsed) if parsed > 0 => Ok(parsed),
        _ => Err(PolicyError::InvalidNumber(value.to_owned())),
    }
}

fn strip_quotes(value: &str) -> &str {
    value.trim_matches(|c| c == '"' || c == '\'')
}

fn apply_env_bool(var: &str, field: &mut bool) {
    if let Ok(value) = env::var(var) {
        match parse_bool(&value) {
            Ok(parsed) => *field = parsed,
            Err(err) => warn!("{}: {}", var, err),
        }
    }
}

fn apply_env_u32(var: &str, field: &mut u32) {
    if let Ok(value) = env::var(var) {
        match parse_u32(&value) {
            Ok(parsed) => *field = parsed,
            Err(err) => warn!("{}: {}", var, err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, Result};
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_match_the_documented_policy() {
        let config = PolicyConfig::default();

        assert!(config.enable_intercept());
        assert!(config.log_qp_creation());
        assert!(!config.log_all_operations());
        assert_eq!(config.log_level(), LogLevel::Info);
        assert!(!config.enable_qp_control());
        assert_eq!(config.max_qp_per_process(), 100);
        assert_eq!(config.max_send_wr_limit(), 1024);
        assert_eq!(config.max_recv_wr_limit(), 1024);
        assert!(!config.enable_mr_control());
        assert_eq!(config.max_mr_per_process(), 1000);
        assert_eq!(config.max_memory_per_process(), 10 * 1024 * 1024 * 1024);
        assert!(config.allows(QpType::Rc));
        assert!(config.allows(QpType::Other));
    }

    #[test]
    fn build_config() -> Result<()> {
        let config = PolicyConfigBuilder::default()
            .enable_qp_control(true)
            .max_qp_per_process(2u32)
            .build()?;

        assert!(config.enable_qp_control());
        assert_eq!(config.max_qp_per_process(), 2);
        // Untouched fields keep their defaults.
        assert_eq!(config.max_mr_per_process(), 1000);

        Ok(())
    }

    #[test]
    fn file_lines_are_parsed_tolerantly() -> Result<()> {
        let mut config = PolicyConfig::default();
        config.apply_file_content(
            "# admission\n\
             enable_qp_control = yes\n\
             MAX_QP_PER_PROCESS = 4\n\
             ; comment style two\n\
             allow_uc_qp = off\n\
             log_level = warning\n\
             log_file_path = \"/var/log/rdma.log\"\n\
             this line is broken\n\
             max_send_wr_limit = not-a-number\n",
        );

        assert!(config.enable_qp_control());
        assert_eq!(config.max_qp_per_process(), 4);
        assert!(!config.allows(QpType::Uc));
        assert!(config.allows(QpType::Rc));
        assert_eq!(config.log_level(), LogLevel::Warn);
        assert_eq!(config.log_file_path(), &PathBuf::from("/var/log/rdma.log"));
        // The broken lines left their fields alone.
        assert_eq!(config.max_send_wr_limit(), 1024);

        Ok(())
    }

    #[test]
    fn invalid_values_are_reported() {
        let mut config = PolicyConfig::default();

        assert!(matches!(
            config.apply_line("no delimiter here"),
            Err(PolicyError::MissingDelimiter)
        ));
        assert!(matches!(
            config.apply_line("what_is_this = 1"),
            Err(PolicyError::UnknownKey(_))
        ));
        assert!(matches!(
            config.apply_line("enable_qp_control = maybe"),
            Err(PolicyError::InvalidBool(_))
        ));
        assert!(matches!(
            config.apply_line("max_qp_per_process = 0"),
            Err(PolicyError::InvalidNumber(_))
        ));
        assert!(matches!(
            config.apply_line("log_level = verbose"),
            Err(PolicyError::InvalidLogLevel(_))
        ));
    }

    #[test]
    fn boolean_spellings() -> Result<()> {
        for (value, expected) in &[
            ("true", true),
            ("Yes", true),
            ("ON", true),
            ("1", true),
            ("false", false),
            ("No", false),
            ("off", false),
            ("0", false),
        ] {
            assert_eq!(parse_bool(value).context(value.to_string())?, *expected);
        }
        Ok(())
    }

    #[test]
    fn environment_wins_over_file() -> Result<()> {
        let mut file = NamedTempFile::new().context("create scratch config")?;
        writeln!(file, "max_qp_per_process = 7")?;
        writeln!(file, "enable_qp_control = false")?;

        // The environment is applied after the file by `load`.
        env::set_var(names::env::MAX_QP_PER_PROCESS, "11");
        env::set_var(names::env::ENABLE_QP_CONTROL, "true");
        let config = PolicyConfig::load(Some(file.path()));
        env::remove_var(names::env::MAX_QP_PER_PROCESS);
        env::remove_var(names::env::ENABLE_QP_CONTROL);

        assert_eq!(config.max_qp_per_process(), 11);
        assert!(config.enable_qp_control());

        Ok(())
    }

    #[test]
    fn log_level_spellings() {
        assert_eq!(LogLevel::from_str("WARN"), Ok(LogLevel::Warn));
        assert_eq!(LogLevel::from_str("warning"), Ok(LogLevel::Warn));
        assert_eq!(LogLevel::from_str("fatal"), Ok(LogLevel::Fatal));
        assert_eq!(
            LogLevel::Fatal.to_level_filter(),
            log::LevelFilter::Error
        );
    }
}
