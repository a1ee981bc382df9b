// Export pipeline: extraction, normalization, grouping, serialization, reporting

pub mod extract;
pub mod grouping;
pub mod labels;
pub mod normalize;
pub mod report;
pub mod serialize;

pub use extract::Extractor;
pub use grouping::{group_forms, Group, Groups};
pub use labels::FieldLabelResolver;
pub use normalize::normalize;
pub use report::{compose, ReportRow, ReportSummary};
pub use serialize::{CsvSerializer, ExportArtifact};
