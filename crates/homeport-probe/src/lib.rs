//! Listening port discovery
//!
//! A [`PortProber`] reports which TCP ports in a range have a listener and,
//! where it can, which process owns each one. The [`Scanner`] runs a prober
//! on an interval and reconciles the results into a
//! [`PortRegistry`](homeport_registry::PortRegistry).
//!
//! Two probers ship:
//! - [`ProcfsProber`]: reads `/proc/net/tcp{,6}` and `/proc/<pid>/fd` (Linux)
//! - [`LsofProber`]: shells out to `lsof` (macOS and other Unixes)

pub mod lsof;
pub mod procfs;
pub mod project;
pub mod scanner;

use homeport_proto::{ObservedPort, PortRange};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub use lsof::LsofProber;
pub use procfs::ProcfsProber;
pub use project::owner_project;
pub use scanner::{ScanReport, Scanner};

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse socket table: {0}")]
    Parse(String),

    #[error("Probe command failed: {0}")]
    Command(String),

    #[error("Probe task failed: {0}")]
    Task(String),
}

impl ProbeError {
    pub(crate) fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        ProbeError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }
}

/// Source of listening-port observations
///
/// Implementations block on filesystem or subprocess I/O; async callers
/// should run them on a blocking thread.
pub trait PortProber: Send + Sync {
    /// List the ports in `range` that currently have a TCP listener, one
    /// observation per port, ordered by port.
    fn probe(&self, range: PortRange) -> Result<Vec<ObservedPort>, ProbeError>;
}

/// The platform's preferred prober
pub fn default_prober(projects_root: impl Into<PathBuf>) -> Box<dyn PortProber> {
    #[cfg(target_os = "linux")]
    {
        Box::new(ProcfsProber::new("/proc", projects_root))
    }
    #[cfg(not(target_os = "linux"))]
    {
        Box::new(LsofProber::new(projects_root))
    }
}

/// Collapse IPv4/IPv6 duplicates of the same port, keeping the observation
/// with a resolved pid.
pub(crate) fn collapse(observations: impl IntoIterator<Item = ObservedPort>) -> Vec<ObservedPort> {
    let mut by_port: BTreeMap<u16, ObservedPort> = BTreeMap::new();
    for obs in observations {
        match by_port.get(&obs.port) {
            Some(existing) if existing.process_id.is_some() || obs.process_id.is_none() => {}
            _ => {
                by_port.insert(obs.port, obs);
            }
        }
    }
    by_port.into_values().collect()
}
