use crossbeam_channel::Sender;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One-way notifications from the batch task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    Started { subjects: usize },
    SubjectStarted { index: usize, total: usize, subject: String },
    SubjectFinished { index: usize, total: usize, subject: String },
    Cancelled { completed: usize },
    Finished { artifacts: Vec<PathBuf> },
}

/// Send without caring whether anyone still listens.
pub(crate) fn emit(tx: &Sender<ProgressEvent>, event: ProgressEvent) {
    if tx.send(event).is_err() {
        log::debug!("progress receiver dropped");
    }
}
