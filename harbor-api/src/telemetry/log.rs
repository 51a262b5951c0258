//! Rolling file log.
//!
//! One directory per month and one file per day and kind:
//! `{root}/{YYYYMM}/{DD}.log`, `{DD}_error.log`, `{DD}_notice.log`.
//! Every event is a single `HH:MM:SS\t<message>` line.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Local};
use harbor_core::{HarborError, HarborResult};
use serde_json::Value;

/// Which daily file an event goes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogKind {
    Plain,
    Error,
    Notice,
}

impl LogKind {
    fn suffix(&self) -> &'static str {
        match self {
            LogKind::Plain => "",
            LogKind::Error => "_error",
            LogKind::Notice => "_notice",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RollingLog {
    root: PathBuf,
}

impl RollingLog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, kind: LogKind, at: &DateTime<Local>) -> PathBuf {
        self.root
            .join(at.format("%Y%m").to_string())
            .join(format!("{}{}.log", at.format("%d"), kind.suffix()))
    }

    /// Format one line. Line breaks inside the message are dropped.
    pub fn format_line(message: &str, at: &DateTime<Local>) -> String {
        let flat: String = message.chars().filter(|c| *c != '\n' && *c != '\r').collect();
        format!("{}\t{}\n", at.format("%H:%M:%S"), flat)
    }

    pub fn append(&self, kind: LogKind, message: &str) -> HarborResult<PathBuf> {
        self.append_at(kind, message, &Local::now())
    }

    /// Append a JSON document as a single line.
    pub fn append_json(&self, kind: LogKind, value: &Value) -> HarborResult<PathBuf> {
        let message = match value {
            Value::String(s) => s.clone(),
            other => serde_json::to_string(other)?,
        };
        self.append(kind, &message)
    }

    pub fn append_at(&self, kind: LogKind, message: &str, at: &DateTime<Local>) -> HarborResult<PathBuf> {
        let path = self.path_for(kind, at);
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| HarborError::io(dir.display(), e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| HarborError::io(path.display(), e))?;
        file.write_all(Self::format_line(message, at).as_bytes())
            .map_err(|e| HarborError::io(path.display(), e))?;
        Ok(path)
    }
}
