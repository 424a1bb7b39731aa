//! Linux prober over procfs
//!
//! Listening sockets come from `net/tcp` and `net/tcp6` (state `0A`). Each
//! socket inode is matched to a pid by scanning `<pid>/fd` for
//! `socket:[inode]` links; the pid's `comm` gives the process name and its
//! `cwd` link the working directory. Both tables are read because most dev
//! servers (Node, Vite, Python) bind `::` by default.

use homeport_proto::{ObservedPort, PortRange};
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::PathBuf;
use tracing::{debug, trace};

use crate::{collapse, owner_project, PortProber, ProbeError};

const TCP_LISTEN: u8 = 0x0A;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Listener {
    pub port: u16,
    pub inode: u64,
}

#[derive(Debug, Clone)]
pub struct ProcfsProber {
    proc_root: PathBuf,
    projects_root: PathBuf,
}

impl ProcfsProber {
    pub fn new(proc_root: impl Into<PathBuf>, projects_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
            projects_root: projects_root.into(),
        }
    }

    fn read_table(&self, name: &str) -> Result<Vec<Listener>, ProbeError> {
        let path = self.proc_root.join("net").join(name);
        match fs::read_to_string(&path) {
            Ok(content) => parse_tcp_table(&content),
            // tcp6 is absent when IPv6 is disabled
            Err(e) if e.kind() == std::io::ErrorKind::NotFound && name == "tcp6" => {
                Ok(Vec::new())
            }
            Err(e) => Err(ProbeError::io(path, e)),
        }
    }

    /// Map socket inodes to owning pids, stopping once every inode is found.
    ///
    /// Unreadable pids (other users, exited processes) are skipped.
    fn owners(&self, inodes: &HashSet<u64>) -> HashMap<u64, u32> {
        let mut owners = HashMap::new();
        let Ok(entries) = fs::read_dir(&self.proc_root) else {
            return owners;
        };

        for entry in entries.flatten() {
            if owners.len() == inodes.len() {
                break;
            }
            let Some(pid) = entry.file_name().to_str().and_then(|s| s.parse::<u32>().ok()) else {
                continue;
            };
            let Ok(fds) = fs::read_dir(entry.path().join("fd")) else {
                continue;
            };
            for fd in fds.flatten() {
                let Ok(link) = fs::read_link(fd.path()) else {
                    continue;
                };
                if let Some(inode) = link.to_str().and_then(parse_socket_inode) {
                    if inodes.contains(&inode) {
                        owners.entry(inode).or_insert(pid);
                    }
                }
            }
        }

        owners
    }

    fn describe(&self, port: u16, pid: Option<u32>) -> ObservedPort {
        let Some(pid) = pid else {
            return ObservedPort::unresolved(port);
        };
        let pid_dir = self.proc_root.join(pid.to_string());

        let process_name = fs::read_to_string(pid_dir.join("comm"))
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());
        let owner_project_id = match fs::read_link(pid_dir.join("cwd")) {
            Ok(cwd) => owner_project(&self.projects_root, &cwd),
            Err(e) => {
                trace!(pid, error = %e, "Could not read working directory");
                None
            }
        };

        ObservedPort {
            port,
            process_id: Some(pid),
            process_name,
            owner_project_id,
        }
    }
}

impl PortProber for ProcfsProber {
    fn probe(&self, range: PortRange) -> Result<Vec<ObservedPort>, ProbeError> {
        let mut listeners = self.read_table("tcp")?;
        listeners.extend(self.read_table("tcp6")?);
        listeners.retain(|l| range.contains(l.port));

        let inodes: HashSet<u64> = listeners
            .iter()
            .map(|l| l.inode)
            .filter(|inode| *inode != 0)
            .collect();
        let owners = self.owners(&inodes);
        debug!(
            listeners = listeners.len(),
            resolved = owners.len(),
            "Probed procfs"
        );

        Ok(collapse(listeners.into_iter().map(|l| {
            let pid = owners.get(&l.inode).copied();
            self.describe(l.port, pid)
        })))
    }
}

/// Parse the listening rows of a `net/tcp` or `net/tcp6` table.
///
/// ```text
///   sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
///    0: 00000000:0BB8 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 12345 ...
/// ```
pub(crate) fn parse_tcp_table(content: &str) -> Result<Vec<Listener>, ProbeError> {
    let mut listeners = Vec::new();

    for line in content.lines().skip(1) {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() < 10 {
            continue;
        }

        let state = u8::from_str_radix(fields[3], 16)
            .map_err(|_| ProbeError::Parse(format!("invalid state '{}'", fields[3])))?;
        if state != TCP_LISTEN {
            continue;
        }

        let port_hex = fields[1]
            .rsplit_once(':')
            .map(|(_, port)| port)
            .ok_or_else(|| ProbeError::Parse(format!("invalid local address '{}'", fields[1])))?;
        let port = u16::from_str_radix(port_hex, 16)
            .map_err(|_| ProbeError::Parse(format!("invalid port '{}'", port_hex)))?;
        let inode: u64 = fields[9]
            .parse()
            .map_err(|_| ProbeError::Parse(format!("invalid inode '{}'", fields[9])))?;

        listeners.push(Listener { port, inode });
    }

    Ok(listeners)
}

/// `socket:[12345]` → `12345`
fn parse_socket_inode(link: &str) -> Option<u64> {
    link.strip_prefix("socket:[")?.strip_suffix(']')?.parse().ok()
}
