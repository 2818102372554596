//! Store logging: one rolling file per process, single-line `key=value`
//! events (`query_compile`, `bulk_update`, `lock_wait`, ...).
//!
//! # Invariants
//! - The backend starts at most once; a repeated start must ask for the
//!   same level and directory.
//! - Starting never panics.
//! - Anything caller-controlled (query names, labels) goes through
//!   `one_line` before it is logged.

use flexi_logger::{Cleanup, Criterion, FileSpec, LogSpecification, Logger, LoggerHandle, Naming, WriteMode};
use log::{info, LevelFilter};
use once_cell::sync::OnceCell;
use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;

const LOG_FILE_BASENAME: &str = "rosterdb";
const ROTATE_AT_BYTES: u64 = 4 * 1024 * 1024;
const KEEP_ROTATED: usize = 3;

static ACTIVE: OnceCell<Active> = OnceCell::new();

struct Active {
    status: LoggingStatus,
    _handle: LoggerHandle,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LoggingError {
    #[error("unsupported log level `{0}`; expected off|error|warn|info|debug|trace")]
    UnsupportedLevel(String),
    #[error("log directory must be an absolute path, got `{0}`")]
    RelativeDir(String),
    #[error("cannot create log directory `{}`: {message}", .dir.display())]
    CreateDir { dir: PathBuf, message: String },
    #[error("log backend failed to start: {0}")]
    Backend(String),
    #[error("logging already active: {active}")]
    AlreadyActive { active: LoggingStatus },
}

/// Level and directory the backend was started with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggingStatus {
    pub level: LevelFilter,
    pub dir: PathBuf,
}

impl Display for LoggingStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "level={} dir={} basename={LOG_FILE_BASENAME}",
            self.level.as_str().to_ascii_lowercase(),
            self.dir.display()
        )
    }
}

/// Starts file logging for the store.
///
/// # Errors
/// - `UnsupportedLevel` / `RelativeDir` for bad input.
/// - `AlreadyActive` when logging runs with another level or directory.
/// - `CreateDir` / `Backend` when the file sink cannot be opened.
pub fn init_logging(level: &str, log_dir: &str) -> Result<LoggingStatus, LoggingError> {
    let wanted = LoggingStatus {
        level: parse_level(level)?,
        dir: absolute_dir(log_dir)?,
    };

    let active = ACTIVE.get_or_try_init(|| start(&wanted))?;
    if active.status != wanted {
        return Err(LoggingError::AlreadyActive {
            active: active.status.clone(),
        });
    }
    Ok(active.status.clone())
}

fn start(wanted: &LoggingStatus) -> Result<Active, LoggingError> {
    std::fs::create_dir_all(&wanted.dir).map_err(|err| LoggingError::CreateDir {
        dir: wanted.dir.clone(),
        message: err.to_string(),
    })?;

    let handle = Logger::with(LogSpecification::builder().default(wanted.level).build())
        .log_to_file(
            FileSpec::default()
                .directory(wanted.dir.as_path())
                .basename(LOG_FILE_BASENAME),
        )
        .rotate(
            Criterion::Size(ROTATE_AT_BYTES),
            Naming::Numbers,
            Cleanup::KeepLogFiles(KEEP_ROTATED),
        )
        .write_mode(WriteMode::BufferAndFlush)
        .append()
        // Sessions wait on each other's row locks; the thread tells them apart.
        .format_for_files(flexi_logger::with_thread)
        .start()
        .map_err(|err| LoggingError::Backend(err.to_string()))?;

    info!(
        "event=logging_start module=logging status=ok {wanted} version={} sqlite={}",
        env!("CARGO_PKG_VERSION"),
        rusqlite::version()
    );
    Ok(Active {
        status: wanted.clone(),
        _handle: handle,
    })
}

/// `None` until `init_logging` has succeeded.
pub fn logging_status() -> Option<LoggingStatus> {
    ACTIVE.get().map(|active| active.status.clone())
}

/// `debug` in debug builds, `info` otherwise.
pub fn default_log_level() -> LevelFilter {
    if cfg!(debug_assertions) {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    }
}

fn parse_level(level: &str) -> Result<LevelFilter, LoggingError> {
    let trimmed = level.trim();
    LevelFilter::from_str(trimmed).map_err(|_| LoggingError::UnsupportedLevel(trimmed.to_string()))
}

fn absolute_dir(log_dir: &str) -> Result<PathBuf, LoggingError> {
    let path = Path::new(log_dir.trim());
    if !path.is_absolute() {
        return Err(LoggingError::RelativeDir(log_dir.trim().to_string()));
    }
    Ok(path.to_path_buf())
}

/// Flattens line breaks and caps `value` at `max_chars` characters.
pub(crate) fn one_line(value: &str, max_chars: usize) -> String {
    let flat = value.replace(['\n', '\r'], " ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let mut capped: String = flat.chars().take(max_chars).collect();
    capped.push_str("...");
    capped
}
