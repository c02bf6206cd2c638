//! Everything needed to repeat a run: configuration plus region definitions.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use visuo_lib::roi::RegionSet;

use crate::config::RunConfig;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub config: RunConfig,
    #[serde(default)]
    pub rois: RegionSet,
}

pub fn write_session(path: &Path, session: &Session) -> Result<()> {
    let file = fs::File::create(path)
        .with_context(|| format!("creating session {}", path.display()))?;
    serde_json::to_writer_pretty(file, session)?;
    Ok(())
}

pub fn read_session(path: &Path) -> Result<Session> {
    let file =
        fs::File::open(path).with_context(|| format!("opening session {}", path.display()))?;
    let session = serde_json::from_reader::<_, Session>(file)
        .with_context(|| format!("parsing session {}", path.display()))?;
    Ok(session)
}
