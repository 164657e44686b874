// Reporting
// Report sinks fed by the scheduler and renderers for finished runs

pub mod reporter;
pub mod sink;

pub use reporter::{ReportFormat, RunReporter};
pub use sink::{JsonFileSink, MemorySink, ReportSink};
