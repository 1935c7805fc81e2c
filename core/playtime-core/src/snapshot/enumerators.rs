//! Concrete process enumerators.

use std::process::Command;
use std::sync::Mutex;

use sysinfo::{ProcessRefreshKind, System, UpdateKind};

use super::ProcessEnumerator;
use crate::types::ProcessInfo;

/// Rich enumeration through `sysinfo`: names, argv and executable paths.
///
/// The `System` is kept between calls so repeated refreshes only pay for
/// processes that changed.
pub struct SysinfoEnumerator {
    system: Mutex<System>,
}

impl SysinfoEnumerator {
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoEnumerator {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessEnumerator for SysinfoEnumerator {
    fn name(&self) -> &'static str {
        "sysinfo"
    }

    fn enumerate(&self) -> Result<Vec<ProcessInfo>, String> {
        let mut sys = self
            .system
            .lock()
            .map_err(|_| "sysinfo state lock poisoned".to_string())?;
        sys.refresh_processes_specifics(
            ProcessRefreshKind::new()
                .with_cmd(UpdateKind::Always)
                .with_exe(UpdateKind::Always),
        );

        let processes = sys
            .processes()
            .iter()
            .map(|(pid, process)| {
                let exe = process
                    .exe()
                    .map(|path| path.to_string_lossy().into_owned());
                ProcessInfo {
                    pid: pid.as_u32(),
                    name: process.name().to_string(),
                    command_line: compose_command_line(process.cmd(), exe.as_deref()),
                }
            })
            .collect::<Vec<_>>();

        if processes.is_empty() {
            return Err("sysinfo returned an empty process table".to_string());
        }
        Ok(processes)
    }
}

/// Joins argv and makes sure the resolved executable path is visible even
/// when argv[0] is relative or rewritten by a launcher.
fn compose_command_line(argv: &[String], exe: Option<&str>) -> Option<String> {
    let joined = argv.join(" ");
    let exe = exe.map(str::trim).filter(|value| !value.is_empty());
    let line = match exe {
        Some(exe) if joined.is_empty() => exe.to_string(),
        Some(exe) if !joined.contains(exe) => format!("{} {}", exe, joined),
        _ => joined,
    };
    if line.trim().is_empty() {
        None
    } else {
        Some(line)
    }
}

/// Basic enumeration through `ps` (names only).
#[derive(Debug, Clone, Copy, Default)]
pub struct PsEnumerator;

impl ProcessEnumerator for PsEnumerator {
    fn name(&self) -> &'static str {
        "ps"
    }

    fn enumerate(&self) -> Result<Vec<ProcessInfo>, String> {
        let output = run_command("ps", &["-A", "-o", "pid=,comm="])?;
        non_empty(parse_ps_output(&output), "ps")
    }
}

/// Basic enumeration through `tasklist` (names only).
#[derive(Debug, Clone, Copy, Default)]
pub struct TasklistEnumerator;

impl ProcessEnumerator for TasklistEnumerator {
    fn name(&self) -> &'static str {
        "tasklist"
    }

    fn enumerate(&self) -> Result<Vec<ProcessInfo>, String> {
        let output = run_command("tasklist", &["/FO", "CSV", "/NH"])?;
        non_empty(parse_tasklist_output(&output), "tasklist")
    }
}

fn run_command(program: &str, args: &[&str]) -> Result<String, String> {
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|err| format!("Failed to run {}: {}", program, err))?;
    if !output.status.success() {
        return Err(format!("{} exited with {}", program, output.status));
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

fn non_empty(processes: Vec<ProcessInfo>, source: &str) -> Result<Vec<ProcessInfo>, String> {
    if processes.is_empty() {
        Err(format!("{} produced no parsable rows", source))
    } else {
        Ok(processes)
    }
}

/// Parses `ps -A -o pid=,comm=` output. Some platforms print the full
/// executable path in `comm`; only its basename is kept as the name.
pub fn parse_ps_output(output: &str) -> Vec<ProcessInfo> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            let (pid, comm) = line.split_once(char::is_whitespace)?;
            let pid = pid.parse::<u32>().ok()?;
            let comm = comm.trim();
            let name = comm.rsplit(['/', '\\']).next().unwrap_or(comm).trim();
            if name.is_empty() {
                return None;
            }
            Some(ProcessInfo::new(pid, name, None))
        })
        .collect()
}

/// Parses `tasklist /FO CSV /NH` rows: `"image","pid","session","#","mem"`.
pub fn parse_tasklist_output(output: &str) -> Vec<ProcessInfo> {
    output
        .lines()
        .filter_map(|line| {
            let line = line.trim().strip_prefix('"')?.strip_suffix('"')?;
            let mut fields = line.split("\",\"");
            let name = fields.next()?.trim();
            let pid = fields.next()?.trim().parse::<u32>().ok()?;
            if name.is_empty() {
                return None;
            }
            Some(ProcessInfo::new(pid, name, None))
        })
        .collect()
}
