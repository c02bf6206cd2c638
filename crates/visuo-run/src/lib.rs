//! Batch orchestration for paired-channel imaging series.

pub mod analysis;
pub mod config;
pub mod pipeline;
pub mod progress;
pub mod render;
pub mod run_log;
pub mod session;

pub use config::{read_config, write_config, RunConfig};
pub use pipeline::{run, RunOutcome};
pub use progress::ProgressEvent;
pub use run_log::{read_run_log, RunLog};
pub use session::{read_session, write_session, Session};
