//! Alert throttling.
//!
//! Each failure site is identified by a signature (SHA-256 of its source
//! file). The time of the last alert per signature lives in a small JSON
//! document shared by every process on the host:
//!
//! ```json
//! { "<signature>": { "time": 1718000000 } }
//! ```
//!
//! Within the window a repeat is suppressed and only written to the rolling
//! error log. The document is replaced atomically (temp file + rename) so a
//! reader never sees a torn write; in-process callers are serialized by a
//! mutex. Two processes racing the same signature may both alert once.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use harbor_core::{HarborError, HarborResult};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};

use super::log::{LogKind, RollingLog};

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct AlertRecord {
    time: i64,
}

type AlertDocument = BTreeMap<String, AlertRecord>;

/// Signature of a failure site.
pub fn signature_for(file: &str) -> String {
    hex::encode(Sha256::digest(file.as_bytes()))
}

#[derive(Debug)]
pub struct AlertThrottle {
    check_file: PathBuf,
    log: Arc<RollingLog>,
    lock: Mutex<()>,
}

impl AlertThrottle {
    pub fn new(check_file: impl Into<PathBuf>, log: Arc<RollingLog>) -> Self {
        Self {
            check_file: check_file.into(),
            log,
            lock: Mutex::new(()),
        }
    }

    pub fn check_file(&self) -> &Path {
        &self.check_file
    }

    /// Decide whether `signature` may alert now.
    ///
    /// Returns `false` (after logging `payload` to the error log) when the
    /// last alert for the signature is at most `window_minutes` old.
    pub fn should_alert(&self, signature: &str, payload: &Value, window_minutes: u64) -> HarborResult<bool> {
        self.should_alert_at(signature, payload, window_minutes, Utc::now().timestamp())
    }

    pub fn should_alert_at(
        &self,
        signature: &str,
        payload: &Value,
        window_minutes: u64,
        now: i64,
    ) -> HarborResult<bool> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut document = self.read_document();

        let window_secs = i64::try_from(window_minutes.saturating_mul(60)).unwrap_or(i64::MAX);
        if let Some(last) = document.get(signature) {
            if now.saturating_sub(last.time) <= window_secs {
                self.log.append_json(LogKind::Error, payload)?;
                return Ok(false);
            }
        }

        document.insert(signature.to_string(), AlertRecord { time: now });
        self.write_document(&document)?;
        Ok(true)
    }

    /// Unix time of the last alert recorded for `signature`.
    pub fn last_alert(&self, signature: &str) -> Option<i64> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.read_document().get(signature).map(|r| r.time)
    }

    fn read_document(&self) -> AlertDocument {
        match std::fs::read_to_string(&self.check_file) {
            Ok(raw) if raw.trim().is_empty() => AlertDocument::new(),
            Ok(raw) => serde_json::from_str(&raw).unwrap_or_else(|e| {
                tracing::warn!(
                    path = %self.check_file.display(),
                    error = %e,
                    "alert check document is corrupt; starting empty"
                );
                AlertDocument::new()
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => AlertDocument::new(),
            Err(e) => {
                tracing::warn!(
                    path = %self.check_file.display(),
                    error = %e,
                    "alert check document unreadable; starting empty"
                );
                AlertDocument::new()
            }
        }
    }

    fn write_document(&self, document: &AlertDocument) -> HarborResult<()> {
        let dir = match self.check_file.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&dir).map_err(|e| HarborError::io(dir.display(), e))?;

        let bytes = serde_json::to_vec(document)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir).map_err(|e| HarborError::io(dir.display(), e))?;
        tmp.write_all(&bytes)
            .map_err(|e| HarborError::io(tmp.path().display(), e))?;
        tmp.persist(&self.check_file)
            .map_err(|e| HarborError::io(self.check_file.display(), e.error))?;
        Ok(())
    }
}
