pub mod analyzer;
pub mod service;

pub use analyzer::PerformanceAnalyzer;
pub use service::JournalService;
