mod context;
mod sink;
mod types;

pub use context::{
    device_descriptor, resolve_report_context, ReportContext, SessionDirectory,
    StaticSessionDirectory,
};
pub use sink::{HttpReportSink, ReportError, ReportErrorDetail, ReportSink};
pub use types::{ReportBody, ReportKind, ReportRecord, WearableLifecycleKind};
