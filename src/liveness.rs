//! Liveness marker shared between the processor and the watchdog.

use anyhow::{Context as _, Result};
use std::fs;
use std::path::{Path, PathBuf};

/// Marker file held while the processor runs: created on startup with the
/// process id inside, removed when the guard drops, including on unwind.
/// The watchdog treats "marker present and its pid alive" as proof of life,
/// so a marker left behind by a killed process is harmless.
pub struct LivenessMarker {
    path: PathBuf,
}

impl LivenessMarker {
    pub fn create(path: &Path) -> Result<LivenessMarker> {
        fs::write(path, format!("{}\n", std::process::id()))
            .with_context(|| format!("writing liveness marker {}", path.display()))?;
        Ok(LivenessMarker {
            path: path.to_owned(),
        })
    }
}

impl Drop for LivenessMarker {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            eprintln!(
                "failed to remove liveness marker {}: {e}",
                self.path.display()
            );
        }
    }
}

/// The pid recorded in the marker, if the marker exists and parses.
pub fn recorded_pid(path: &Path) -> Option<u32> {
    let contents = fs::read_to_string(path).ok()?;
    contents.trim().parse().ok()
}
