pub mod ports;
pub mod export_use_case;

pub use export_use_case::{ExportUseCase, RunMode, RunOutcome, RunReport, RunRequest, SkipReason};
