pub mod checksum;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod format;
pub mod jobs;
pub mod plugins;
pub mod progress;
pub mod registry;
pub mod scanner;
pub mod storage;

pub use config::AppConfig;
pub use dispatch::{CancelToken, DispatchOptions, DispatchResult, Dispatcher, JobOutcome};
pub use engine::{ReadResult, Reconciled, ScanResult, Storage};
pub use error::Error;
pub use plugins::Plugins;
pub use progress::{ProgressReporter, SilentReporter};
pub use storage::Database;
