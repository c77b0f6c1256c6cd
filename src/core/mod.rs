pub mod comparator;
pub mod engine;
pub mod lister;
pub mod progress;
pub mod scanner;
pub mod schedule;

pub use comparator::{diff, summarize, DiffResult, DiffSummary};
pub use engine::{
    Analysis, RunState, SyncConfig, SyncEngine, SyncHandle, SyncReport, SyncRequest, SyncRun,
};
pub use lister::{FolderListing, FolderStats, RemoteLister};
pub use progress::{ProgressChannel, ProgressEvent, ProgressReader, ProgressRecord, ProgressSink};
pub use scanner::DirectoryScanner;
pub use schedule::{RefreshLoop, Tick};
