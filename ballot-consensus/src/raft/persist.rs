use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::PathBuf;

use ballot_common::error::Result;

use crate::raft::ledger::HardState;

/// Defines the behavior for any hard-state storage backend.
pub trait HardStateStorage: Send {
    fn save(&mut self, state: &HardState) -> Result<()>;
    fn load(&self) -> Result<Option<HardState>>;
}

/// Keeps the hard state in memory; it survives stop/start but not the process.
#[derive(Debug, Default)]
pub struct MemoryHardStateStorage {
    state: Option<HardState>,
}

impl MemoryHardStateStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HardStateStorage for MemoryHardStateStorage {
    fn save(&mut self, state: &HardState) -> Result<()> {
        self.state = Some(state.clone());
        Ok(())
    }

    fn load(&self) -> Result<Option<HardState>> {
        Ok(self.state.clone())
    }
}

/// Saves the hard state as a binary file.
pub struct FileHardStateStorage {
    pub path: PathBuf,
}

impl FileHardStateStorage {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn staging_path(&self) -> PathBuf {
        let mut staging = self.path.clone().into_os_string();
        staging.push(".tmp");
        PathBuf::from(staging)
    }
}

impl HardStateStorage for FileHardStateStorage {
    fn save(&mut self, state: &HardState) -> Result<()> {
        let encoded = bincode::serialize(state)?;
        let staging = self.staging_path();

        // Term and vote must land together: write aside, then rename over.
        let mut file = File::create(&staging)?;
        file.write_all(&encoded)?;
        file.sync_all()?;
        fs::rename(&staging, &self.path)?;
        Ok(())
    }

    fn load(&self) -> Result<Option<HardState>> {
        if !self.path.exists() {
            return Ok(None);
        }

        let mut file = File::open(&self.path)?;
        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes)?;

        let state = bincode::deserialize(&bytes)?;
        Ok(Some(state))
    }
}
