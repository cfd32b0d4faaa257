//! Durable PID marker for the gateway process.
//!
//! Format: a single line holding the decimal PID. Writes go through a temp
//! file and a rename so a reader never sees a partial marker.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Marker file location and I/O.
#[derive(Debug, Clone)]
pub struct PidMarker {
    path: PathBuf,
}

/// What was found on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerState {
    Absent,
    Present(u32),
    /// The file exists but does not hold a PID.
    Corrupt,
}

impl PidMarker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the marker. I/O errors other than "not found" count as corrupt.
    pub fn read(&self) -> MarkerState {
        match fs::read_to_string(&self.path) {
            Ok(content) => match parse_marker(&content) {
                Some(pid) => MarkerState::Present(pid),
                None => MarkerState::Corrupt,
            },
            Err(e) if e.kind() == io::ErrorKind::NotFound => MarkerState::Absent,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "failed to read PID marker");
                MarkerState::Corrupt
            }
        }
    }

    /// Persist `pid` atomically.
    pub fn write(&self, pid: u32) -> io::Result<()> {
        if let Some(dir) = self.path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir)?;
        }
        let mut tmp = self.path.as_os_str().to_owned();
        tmp.push(".tmp");
        fs::write(&tmp, format!("{}\n", pid))?;
        fs::rename(&tmp, &self.path)?;
        tracing::debug!(path = %self.path.display(), pid, "PID marker written");
        Ok(())
    }

    /// Remove the marker. Idempotent.
    pub fn clear(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), "PID marker removed");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

fn parse_marker(content: &str) -> Option<u32> {
    content
        .lines()
        .next()
        .and_then(|line| line.trim().parse::<u32>().ok())
        .filter(|pid| *pid != 0)
}
