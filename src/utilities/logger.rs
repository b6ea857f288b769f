//! Centralized multi-sink logging.
//!
//! One process-wide logger feeds a colorized console sink and four
//! size-rotating file sinks:
//!
//! - `system.log` — every record
//! - `error.log`  — WARNING and above
//! - `agents.log` — records tagged as agent messages
//! - `webhook.log` — records tagged as webhook events
//!
//! Rotated files move into `logs/archives/`. A single record is written to
//! every enabled sink while one lock is held, so a logical record appears
//! atomically across sinks. The logger also installs itself behind the
//! `log` facade, so `log::info!` from any module lands in the same sinks.

use std::fs::{self, File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::Local;
use once_cell::sync::OnceCell;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::utilities::paths;

/// Default per-file size cap before rotation.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 150 * 1024;
/// Default number of rotated generations kept in `archives/`.
pub const DEFAULT_BACKUP_COUNT: usize = 5;

// ---------------------------------------------------------------------------
// Levels and records
// ---------------------------------------------------------------------------

/// Log severity, ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
    Critical,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
        }
    }

    /// Parse a level name, defaulting to INFO on anything unknown.
    pub fn parse(s: &str) -> Self {
        match s.to_ascii_uppercase().as_str() {
            "DEBUG" => Self::Debug,
            "WARNING" | "WARN" => Self::Warning,
            "ERROR" => Self::Error,
            "CRITICAL" => Self::Critical,
            _ => Self::Info,
        }
    }

    fn ansi_color(&self) -> &'static str {
        match self {
            Self::Debug => "\x1b[90m",
            Self::Info => "\x1b[32m",
            Self::Warning => "\x1b[33m",
            Self::Error => "\x1b[31m",
            Self::Critical => "\x1b[41m\x1b[37m",
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<log::Level> for LogLevel {
    fn from(level: log::Level) -> Self {
        match level {
            log::Level::Trace | log::Level::Debug => Self::Debug,
            log::Level::Info => Self::Info,
            log::Level::Warn => Self::Warning,
            log::Level::Error => Self::Error,
        }
    }
}

/// A single structured log record.
#[derive(Debug, Clone, Serialize)]
pub struct LogRecord {
    pub timestamp: chrono::DateTime<Local>,
    pub level: LogLevel,
    /// Agent or subsystem name.
    pub source: String,
    pub message: String,
    /// Set on agent-tagged records.
    pub sender_agent: Option<String>,
    pub target_agent: Option<String>,
    /// Set on webhook-tagged records.
    pub webhook_source: Option<String>,
    pub webhook_event: Option<String>,
}

impl LogRecord {
    fn new(level: LogLevel, source: &str, message: &str) -> Self {
        Self {
            timestamp: Local::now(),
            level,
            source: source.to_string(),
            message: message.to_string(),
            sender_agent: None,
            target_agent: None,
            webhook_source: None,
            webhook_event: None,
        }
    }

    fn is_agent_message(&self) -> bool {
        self.sender_agent.is_some()
    }

    fn is_webhook_event(&self) -> bool {
        self.webhook_source.is_some()
    }
}

// ---------------------------------------------------------------------------
// Rotating file sink
// ---------------------------------------------------------------------------

/// Append-only file sink that rotates into `archives/` past a size cap.
struct RotatingSink {
    path: PathBuf,
    archive_dir: PathBuf,
    max_size: u64,
    backup_count: usize,
    file: Option<File>,
}

impl RotatingSink {
    fn new(path: PathBuf, archive_dir: PathBuf, max_size: u64, backup_count: usize) -> Self {
        Self {
            path,
            archive_dir,
            max_size,
            backup_count,
            file: None,
        }
    }

    /// Write one line; errors are swallowed (logging never crashes the runtime).
    fn write_line(&mut self, line: &str) {
        if self.file.is_none() {
            self.file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .ok();
        }
        let Some(file) = self.file.as_mut() else {
            return;
        };
        let _ = writeln!(file, "{line}");
        if file.metadata().map(|m| m.len() > self.max_size).unwrap_or(false) {
            self.rotate();
        }
    }

    /// Shift `name.log.N` generations in `archives/` and move the live file
    /// to `archives/name.log.1`.
    fn rotate(&mut self) {
        self.file = None;
        let _ = fs::create_dir_all(&self.archive_dir);
        let name = match self.path.file_name().and_then(|n| n.to_str()) {
            Some(name) => name.to_string(),
            None => return,
        };
        let _ = fs::remove_file(self.archive_dir.join(format!("{name}.{}", self.backup_count)));
        for i in (1..self.backup_count).rev() {
            let from = self.archive_dir.join(format!("{name}.{i}"));
            if from.exists() {
                let _ = fs::rename(&from, self.archive_dir.join(format!("{name}.{}", i + 1)));
            }
        }
        let _ = fs::rename(&self.path, self.archive_dir.join(format!("{name}.1")));
    }
}

// ---------------------------------------------------------------------------
// Runtime logger
// ---------------------------------------------------------------------------

/// Logger configuration; every field has a working default.
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub logs_dir: PathBuf,
    pub console_level: LogLevel,
    pub file_level: LogLevel,
    pub max_file_size: u64,
    pub backup_count: usize,
    pub enable_colors: bool,
    /// Disable the console sink entirely (tests).
    pub console: bool,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            logs_dir: paths::logs_dir(),
            console_level: LogLevel::Info,
            file_level: LogLevel::Debug,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            backup_count: DEFAULT_BACKUP_COUNT,
            enable_colors: true,
            console: true,
        }
    }
}

struct Sinks {
    system: RotatingSink,
    error: RotatingSink,
    agents: RotatingSink,
    webhook: RotatingSink,
}

/// The multi-sink logger.
pub struct RuntimeLogger {
    config: LoggerConfig,
    sinks: Mutex<Sinks>,
}

static GLOBAL: OnceCell<RuntimeLogger> = OnceCell::new();

impl RuntimeLogger {
    /// Build a standalone logger (tests use this with a temp directory).
    pub fn new(config: LoggerConfig) -> Self {
        let _ = fs::create_dir_all(&config.logs_dir);
        let archive_dir = config.logs_dir.join("archives");
        let _ = fs::create_dir_all(&archive_dir);
        let sink = |name: &str| {
            RotatingSink::new(
                config.logs_dir.join(name),
                archive_dir.clone(),
                config.max_file_size,
                config.backup_count,
            )
        };
        Self {
            sinks: Mutex::new(Sinks {
                system: sink("system.log"),
                error: sink("error.log"),
                agents: sink("agents.log"),
                webhook: sink("webhook.log"),
            }),
            config,
        }
    }

    /// Install `config` as the process-wide logger and hook the `log` facade.
    /// Later calls are no-ops (the first configuration wins).
    pub fn init(config: LoggerConfig) -> &'static RuntimeLogger {
        let logger = GLOBAL.get_or_init(|| RuntimeLogger::new(config));
        let _ = log::set_logger(&FACADE);
        log::set_max_level(log::LevelFilter::Debug);
        logger
    }

    /// The process-wide logger, initializing with defaults if needed.
    pub fn global() -> &'static RuntimeLogger {
        GLOBAL.get_or_init(|| RuntimeLogger::new(LoggerConfig::default()))
    }

    /// Path of the webhook sink (served by `GET /webhook/logs`).
    pub fn webhook_log_path(&self) -> PathBuf {
        self.config.logs_dir.join("webhook.log")
    }

    /// Path of the system sink.
    pub fn system_log_path(&self) -> PathBuf {
        self.config.logs_dir.join("system.log")
    }

    /// Emit a plain system record.
    pub fn log(&self, level: LogLevel, source: &str, message: &str) {
        self.emit(&LogRecord::new(level, source, message));
    }

    /// Emit an agent-tagged record (also lands in `agents.log`).
    pub fn agent_message(
        &self,
        sender: &str,
        message: &str,
        target: Option<&str>,
        level: LogLevel,
    ) {
        let mut record = LogRecord::new(level, sender, message);
        record.sender_agent = Some(sender.to_string());
        record.target_agent = target.map(str::to_string);
        self.emit(&record);
    }

    /// Emit a webhook-tagged record (also lands in `webhook.log`).
    pub fn webhook_event(&self, source: &str, event_type: &str, message: &str, level: LogLevel) {
        let mut record = LogRecord::new(
            level,
            source,
            &format!("[{source}] {event_type}: {message}"),
        );
        record.webhook_source = Some(source.to_string());
        record.webhook_event = Some(event_type.to_string());
        self.emit(&record);
    }

    /// Write one record to every enabled sink under a single lock.
    pub fn emit(&self, record: &LogRecord) {
        let file_line = self.format_file_line(record);
        let console_line = if self.config.console && record.level >= self.config.console_level {
            Some(self.format_console_line(record))
        } else {
            None
        };

        let mut sinks = self.sinks.lock();
        if let Some(line) = console_line {
            println!("{line}");
        }
        if record.level >= self.config.file_level {
            sinks.system.write_line(&file_line);
        }
        if record.level >= LogLevel::Warning {
            sinks.error.write_line(&file_line);
        }
        if record.is_agent_message() {
            sinks.agents.write_line(&file_line);
        }
        if record.is_webhook_event() {
            sinks.webhook.write_line(&file_line);
        }
    }

    fn format_file_line(&self, record: &LogRecord) -> String {
        let ts = record.timestamp.format("%Y-%m-%d %H:%M:%S");
        match (&record.sender_agent, &record.target_agent) {
            (Some(sender), Some(target)) => format!(
                "[{ts}] [{}] [{}] {} -> {}: {}",
                record.level, record.source, sender, target, record.message
            ),
            (Some(sender), None) => format!(
                "[{ts}] [{}] [{}] {}: {}",
                record.level, record.source, sender, record.message
            ),
            _ => format!(
                "[{ts}] [{}] [{}] {}",
                record.level, record.source, record.message
            ),
        }
    }

    fn format_console_line(&self, record: &LogRecord) -> String {
        let ts = record.timestamp.format("%H:%M:%S");
        if !self.config.enable_colors {
            return format!("{ts} | {:8} | {}", record.level.as_str(), record.message);
        }
        const RESET: &str = "\x1b[0m";
        const CYAN: &str = "\x1b[36m";
        const MAGENTA: &str = "\x1b[35m";
        let level = format!(
            "{}{:8}{RESET}",
            record.level.ansi_color(),
            record.level.as_str()
        );
        match (&record.sender_agent, &record.target_agent) {
            (Some(sender), Some(target)) => format!(
                "{ts} | {level} | {CYAN}{sender}{RESET} -> {MAGENTA}{target}{RESET}: {}",
                record.message
            ),
            (Some(sender), None) => {
                format!("{ts} | {level} | {CYAN}{sender}{RESET}: {}", record.message)
            }
            _ => format!("{ts} | {level} | {}", record.message),
        }
    }
}

// ---------------------------------------------------------------------------
// `log` facade bridge
// ---------------------------------------------------------------------------

struct LogFacade;

static FACADE: LogFacade = LogFacade;

impl log::Log for LogFacade {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        true
    }

    fn log(&self, record: &log::Record) {
        if let Some(logger) = GLOBAL.get() {
            logger.log(
                record.level().into(),
                record.target(),
                &record.args().to_string(),
            );
        }
    }

    fn flush(&self) {}
}

/// Tail the last `lines` lines of a log file.
pub fn tail_log(path: &Path, lines: usize) -> std::io::Result<Vec<String>> {
    let content = fs::read_to_string(path)?;
    let all: Vec<&str> = content.lines().collect();
    let start = all.len().saturating_sub(lines);
    Ok(all[start..].iter().map(|s| s.to_string()).collect())
}
