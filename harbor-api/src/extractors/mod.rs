//! Request extractors.

pub mod context;
pub mod record_path;

pub use context::RequestContext;
pub use record_path::RecordPath;
