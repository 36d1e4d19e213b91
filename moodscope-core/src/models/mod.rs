pub mod analysis;

pub use analysis::{AnalysisRow, HistoryEntry, NewAnalysis, DATE_FORMAT};
