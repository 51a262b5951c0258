//! The process-wide panic hook, in its own test binary so installing it
//! cannot affect other tests.

use std::sync::Arc;

use chrono::Local;
use harbor_api::telemetry::{install_panic_hook, signature_for, ErrorReporter, LogKind};

#[path = "support/app.rs"]
mod app_support;
use app_support::test_settings;

#[test]
fn test_panic_is_throttled_and_logged() -> Result<(), Box<dyn std::error::Error>> {
    let dir = tempfile::tempdir()?;
    let reporter = Arc::new(ErrorReporter::from_settings(&test_settings(dir.path())));
    install_panic_hook(Arc::clone(&reporter));

    let first = std::panic::catch_unwind(|| panic!("cache worker exploded"));
    assert!(first.is_err());

    let signature = signature_for(file!());
    assert!(reporter.throttle().check_file().exists());
    let alerted_at = reporter.throttle().last_alert(&signature);
    assert!(alerted_at.is_some());

    let error_log = reporter.log().path_for(LogKind::Error, &Local::now());
    let contents = std::fs::read_to_string(&error_log)?;
    assert!(contents.contains("cache worker exploded"));

    // Same site inside the window: suppressed, but still written down.
    let second = std::panic::catch_unwind(|| panic!("cache worker exploded twice"));
    assert!(second.is_err());
    assert_eq!(reporter.throttle().last_alert(&signature), alerted_at);
    let contents = std::fs::read_to_string(&error_log)?;
    assert!(contents.contains("cache worker exploded twice"));
    Ok(())
}
