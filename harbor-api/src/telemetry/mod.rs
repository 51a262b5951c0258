//! HARBOR Telemetry - Observability Infrastructure
//!
//! Structured logging, Prometheus metrics, the rolling file log and the
//! throttled error reporting pipeline.

pub mod alert;
pub mod log;
pub mod metrics;
pub mod middleware;
pub mod report;
pub mod tracer;

pub use alert::{signature_for, AlertThrottle};
pub use log::{LogKind, RollingLog};
pub use metrics::{metrics_handler, HarborMetrics, InstrumentedConnector, METRICS};
pub use middleware::{error_report_middleware, normalize_path, observability_middleware};
pub use report::{install_panic_hook, AlertSink, ErrorReport, ErrorReporter, LogAlertSink};
pub use tracer::init_tracing;
