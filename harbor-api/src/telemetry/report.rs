//! Error reporting.
//!
//! Failures are turned into an [`ErrorReport`], throttled per failure site by
//! the [`AlertThrottle`], and handed to an [`AlertSink`] when an alert is
//! due. Suppressed repeats only reach the rolling error log. Notices are
//! logged and never alerted.

use std::any::Any;
use std::panic::Location;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{json, Value};

use super::alert::{signature_for, AlertThrottle};
use super::log::{LogKind, RollingLog};
use super::metrics::METRICS;
use crate::config::Settings;
use crate::error::ApiError;
use crate::extractors::RequestContext;

// ============================================================================
// REPORT
// ============================================================================

/// One failure, as reported and logged.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorReport {
    pub file: String,
    pub line: u32,
    pub message: String,
    pub extend: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
}

impl ErrorReport {
    pub fn new(file: impl Into<String>, line: u32, message: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            line,
            message: message.into(),
            extend: Value::Null,
            trace: None,
        }
    }

    /// Report located at the caller.
    #[track_caller]
    pub fn here(message: impl Into<String>) -> Self {
        let location = Location::caller();
        Self::new(location.file(), location.line(), message)
    }

    pub fn with_extend(mut self, extend: Value) -> Self {
        self.extend = extend;
        self
    }

    pub fn with_trace(mut self, trace: impl Into<String>) -> Self {
        self.trace = Some(trace.into());
        self
    }

    /// Report for a server error answered at the HTTP boundary.
    ///
    /// HTTP failures carry no source location, so the route stands in for
    /// the file and the status code for the line.
    pub fn from_api_error(err: &ApiError, context: &RequestContext, route: &str) -> Self {
        Self::new(
            format!("http:{} {}", context.method, route),
            u32::from(err.status_code().as_u16()),
            err.message.clone(),
        )
        .with_extend(json!({
            "code": err.code,
            "details": err.details,
            "request_id": context.request_id.to_string(),
            "client_ip": context.client_ip.map(|ip| ip.to_string()),
            "path": context.path,
            "received_at": context.received_at.to_rfc3339(),
        }))
    }

    pub fn signature(&self) -> String {
        signature_for(&self.file)
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| json!({ "message": self.message }))
    }
}

// ============================================================================
// SINKS
// ============================================================================

/// Where alerts go once the throttle lets them through.
pub trait AlertSink: Send + Sync {
    fn dispatch(&self, report: &ErrorReport);
}

/// Default sink: an error-level trace plus a line in the rolling error log.
#[derive(Debug, Clone)]
pub struct LogAlertSink {
    log: Arc<RollingLog>,
}

impl LogAlertSink {
    pub fn new(log: Arc<RollingLog>) -> Self {
        Self { log }
    }
}

impl AlertSink for LogAlertSink {
    fn dispatch(&self, report: &ErrorReport) {
        tracing::error!(
            file = %report.file,
            line = report.line,
            extend = %report.extend,
            "{}",
            report.message
        );
        if let Err(e) = self.log.append_json(LogKind::Error, &report.to_json()) {
            tracing::warn!(error = %e, "failed to write alert to error log");
        }
    }
}

// ============================================================================
// REPORTER
// ============================================================================

pub struct ErrorReporter {
    throttle: AlertThrottle,
    sink: Arc<dyn AlertSink>,
    log: Arc<RollingLog>,
    window_minutes: u64,
}

impl std::fmt::Debug for ErrorReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorReporter")
            .field("throttle", &self.throttle)
            .field("window_minutes", &self.window_minutes)
            .finish_non_exhaustive()
    }
}

impl ErrorReporter {
    pub fn new(
        throttle: AlertThrottle,
        sink: Arc<dyn AlertSink>,
        log: Arc<RollingLog>,
        window_minutes: u64,
    ) -> Self {
        Self {
            throttle,
            sink,
            log,
            window_minutes,
        }
    }

    /// Reporter writing under `[log] path` with the logging sink.
    pub fn from_settings(settings: &Settings) -> Self {
        let log = Arc::new(RollingLog::new(settings.log.path.clone()));
        let throttle = AlertThrottle::new(settings.alert_check_file(), log.clone());
        let sink = Arc::new(LogAlertSink::new(log.clone()));
        Self::new(throttle, sink, log, settings.alert.window_minutes)
    }

    pub fn throttle(&self) -> &AlertThrottle {
        &self.throttle
    }

    pub fn log(&self) -> &RollingLog {
        &self.log
    }

    /// Throttle and dispatch. Returns whether an alert went out.
    ///
    /// A throttle that cannot persist its document still lets the alert
    /// through.
    pub fn report(&self, report: &ErrorReport) -> bool {
        let emitted = match self
            .throttle
            .should_alert(&report.signature(), &report.to_json(), self.window_minutes)
        {
            Ok(allowed) => allowed,
            Err(e) => {
                tracing::warn!(error = %e, file = %report.file, "alert throttle unavailable");
                true
            }
        };

        if emitted {
            self.sink.dispatch(report);
        } else {
            tracing::debug!(file = %report.file, line = report.line, "alert suppressed");
        }
        if let Ok(metrics) = METRICS.as_ref() {
            metrics.record_alert(emitted);
        }
        emitted
    }

    /// [`report`](Self::report) off the async worker threads.
    pub async fn report_async(self: &Arc<Self>, report: ErrorReport) -> bool {
        let reporter = Arc::clone(self);
        match tokio::task::spawn_blocking(move || reporter.report(&report)).await {
            Ok(emitted) => emitted,
            Err(e) => {
                tracing::error!(error = %e, "error report task failed");
                false
            }
        }
    }

    /// Log a low-severity event. Notices never alert.
    pub fn notice(&self, report: &ErrorReport) {
        tracing::warn!(file = %report.file, line = report.line, "{}", report.message);
        if let Err(e) = self.log.append_json(LogKind::Notice, &report.to_json()) {
            tracing::warn!(error = %e, "failed to write notice log");
        }
    }
}

// ============================================================================
// PANIC HOOK
// ============================================================================

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}

/// Route panics through `reporter`, then the previously installed hook.
pub fn install_panic_hook(reporter: Arc<ErrorReporter>) {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let (file, line) = info
            .location()
            .map(|l| (l.file().to_string(), l.line()))
            .unwrap_or_else(|| ("<unknown>".to_string(), 0));
        let report = ErrorReport::new(file, line, panic_message(info.payload()))
            .with_trace(std::backtrace::Backtrace::force_capture().to_string());
        reporter.report(&report);
        previous(info);
    }));
}
