//! The staged item pipeline: collaborator seams, the worker pool, one
//! worker per status transition, and the coordinator that orders them.

mod coordinator;
mod fetch;
mod pool;
mod rate;
mod render;
mod select;
mod stats;
mod summarize;
mod traits;

pub use coordinator::{
    CategoryOutcome, CategoryReport, CategoryRun, Collaborators, Coordinator, Force, RunReport,
};
pub use fetch::{entries_for_date, list_entries, FetchStage};
pub use pool::{BatchReport, ItemOutcome, StageWorker, WorkerPool};
pub use rate::RateStage;
pub use render::RenderStage;
pub use select::{select_for_summary, SelectionPolicy};
pub use stats::{Counter, PipelineStats, StageKind, StageSnapshot, StageStats, StatsSnapshot};
pub use summarize::SummarizeStage;
pub use traits::{ContentExtractor, FeedSource, Rater, Summarizer, Thumbnailer};
