//! Prober backed by `lsof`
//!
//! Used where procfs is unavailable. Listeners come from
//! `lsof -nP -iTCP -sTCP:LISTEN -F pcn`; each pid's working directory from
//! `lsof -a -p <pid> -d cwd -Fn`.

use homeport_proto::{ObservedPort, PortRange};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, trace};

use crate::{collapse, owner_project, PortProber, ProbeError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct LsofListener {
    pub pid: u32,
    pub command: Option<String>,
    pub port: u16,
}

#[derive(Debug, Clone)]
pub struct LsofProber {
    binary: PathBuf,
    projects_root: PathBuf,
}

impl LsofProber {
    pub fn new(projects_root: impl Into<PathBuf>) -> Self {
        Self::with_binary("lsof", projects_root)
    }

    pub fn with_binary(binary: impl Into<PathBuf>, projects_root: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            projects_root: projects_root.into(),
        }
    }

    fn run(&self, args: &[&str]) -> Result<String, ProbeError> {
        let output = Command::new(&self.binary)
            .args(args)
            .output()
            .map_err(|e| {
                ProbeError::Command(format!("failed to run {}: {}", self.binary.display(), e))
            })?;

        // lsof exits 1 when nothing matched
        if !output.status.success() && !(output.status.code() == Some(1) && output.stdout.is_empty())
        {
            return Err(ProbeError::Command(format!(
                "{} exited with {}: {}",
                self.binary.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    fn working_dir(&self, pid: u32) -> Option<PathBuf> {
        let pid_arg = pid.to_string();
        match self.run(&["-a", "-p", &pid_arg, "-d", "cwd", "-Fn"]) {
            Ok(out) => parse_cwd(&out),
            Err(e) => {
                trace!(pid, error = %e, "Could not resolve working directory");
                None
            }
        }
    }
}

impl PortProber for LsofProber {
    fn probe(&self, range: PortRange) -> Result<Vec<ObservedPort>, ProbeError> {
        let out = self.run(&["-nP", "-iTCP", "-sTCP:LISTEN", "-F", "pcn"])?;
        let listeners: Vec<LsofListener> = parse_listeners(&out)
            .into_iter()
            .filter(|l| range.contains(l.port))
            .collect();
        debug!(listeners = listeners.len(), "Probed lsof");

        let mut cwd_cache: HashMap<u32, Option<PathBuf>> = HashMap::new();
        let observations: Vec<ObservedPort> = listeners
            .into_iter()
            .map(|l| {
                let cwd = cwd_cache
                    .entry(l.pid)
                    .or_insert_with(|| self.working_dir(l.pid));
                ObservedPort {
                    port: l.port,
                    process_id: Some(l.pid),
                    process_name: l.command,
                    owner_project_id: cwd
                        .as_deref()
                        .and_then(|cwd| owner_project(&self.projects_root, cwd)),
                }
            })
            .collect();

        Ok(collapse(observations))
    }
}

/// Parse `-F pcn` field output.
///
/// Each process set starts with `p<pid>` and `c<command>`; each file in it
/// has `f<fd>` and `n<addr>:<port>`.
pub(crate) fn parse_listeners(output: &str) -> Vec<LsofListener> {
    let mut listeners = Vec::new();
    let mut pid: Option<u32> = None;
    let mut command: Option<String> = None;

    for line in output.lines() {
        let Some(tag) = line.chars().next() else {
            continue;
        };
        let value = &line[tag.len_utf8()..];
        match tag {
            'p' => {
                pid = value.parse().ok();
                command = None;
            }
            'c' => command = Some(value.to_string()),
            'n' => {
                let (Some(pid), Some(port)) = (pid, parse_name_port(value)) else {
                    continue;
                };
                listeners.push(LsofListener {
                    pid,
                    command: command.clone(),
                    port,
                });
            }
            _ => {}
        }
    }

    listeners
}

/// `*:3000`, `127.0.0.1:3000`, `[::1]:3000` → `3000`
fn parse_name_port(name: &str) -> Option<u16> {
    if name.contains("->") {
        return None;
    }
    name.rsplit_once(':')?.1.parse().ok()
}

fn parse_cwd(output: &str) -> Option<PathBuf> {
    output
        .lines()
        .find_map(|line| line.strip_prefix('n'))
        .map(|p| Path::new(p).to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTEN_OUTPUT: &str = "p4211\ncnode\nf23\nn*:3000\nf24\nn[::1]:3000\np5120\ncpython3.12\nf3\nn127.0.0.1:8000\np9\nclaunchd\nf7\nn*:631\n";

    #[test]
    fn test_parse_listeners() {
        let listeners = parse_listeners(LISTEN_OUTPUT);
        assert_eq!(listeners.len(), 4);
        assert_eq!(
            listeners[0],
            LsofListener {
                pid: 4211,
                command: Some("node".to_string()),
                port: 3000
            }
        );
        assert_eq!(listeners[1].port, 3000);
        assert_eq!(listeners[2].pid, 5120);
        assert_eq!(listeners[2].command.as_deref(), Some("python3.12"));
        assert_eq!(listeners[2].port, 8000);
        assert_eq!(listeners[3].port, 631);
    }

    #[test]
    fn test_parse_name_port() {
        assert_eq!(parse_name_port("*:5173"), Some(5173));
        assert_eq!(parse_name_port("[::]:5173"), Some(5173));
        assert_eq!(parse_name_port("localhost:http"), None);
        assert_eq!(parse_name_port("127.0.0.1:3000->127.0.0.1:51000"), None);
    }

    #[test]
    fn test_parse_cwd() {
        let out = "p4211\nfcwd\nn/Users/dev/projects/blog\n";
        assert_eq!(
            parse_cwd(out),
            Some(PathBuf::from("/Users/dev/projects/blog"))
        );
        assert_eq!(parse_cwd("p4211\n"), None);
    }

    #[test]
    fn test_missing_binary_is_command_error() {
        let prober = LsofProber::with_binary("/nonexistent/lsof-binary", "/tmp");
        let result = prober.probe(PortRange::default());
        assert!(matches!(result, Err(ProbeError::Command(_))));
    }
}
