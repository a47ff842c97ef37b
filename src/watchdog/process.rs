//! Process-existence and OS-level metric probing (§4.13 "OS-level metrics").
//!
//! Shells out to platform tools rather than depending on a process-metrics
//! crate, matching §4.13's explicit description of the probing mechanism
//! (PowerShell/`tasklist` on Windows, `ps` with a `/proc` fallback on Linux).

use std::process::Command;
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessMetrics {
    pub cpu_percent: f64,
    pub rss_mb: f64,
    pub uptime: Duration,
}

/// §4.13 "`kill(pid, 0)` existence check" — a signal-0 kill only tests
/// existence and permission, it does not terminate the process.
#[cfg(unix)]
pub fn process_exists(pid: u32) -> bool {
    // SAFETY: signal 0 performs no action beyond existence/permission
    // checking; `pid` is a plain integer, no pointers involved.
    unsafe { libc_kill(pid as i32, 0) == 0 }
}

#[cfg(unix)]
extern "C" {
    #[link_name = "kill"]
    fn libc_kill(pid: i32, sig: i32) -> i32;
}

pub const SIGTERM: i32 = 15;
pub const SIGKILL: i32 = 9;

/// §4.13 "perform a restart: SIGTERM, wait `restartDelay`, then SIGKILL if
/// still alive." Returns `true` if the signal was delivered.
#[cfg(unix)]
pub fn send_signal(pid: u32, signal: i32) -> bool {
    // SAFETY: same as `process_exists` — plain integers, no aliasing.
    unsafe { libc_kill(pid as i32, signal) == 0 }
}

#[cfg(not(unix))]
pub fn send_signal(pid: u32, signal: i32) -> bool {
    if signal == SIGKILL {
        Command::new("taskkill").args(["/PID", &pid.to_string(), "/F"]).status().map(|s| s.success()).unwrap_or(false)
    } else {
        Command::new("taskkill").args(["/PID", &pid.to_string()]).status().map(|s| s.success()).unwrap_or(false)
    }
}

#[cfg(not(unix))]
pub fn process_exists(pid: u32) -> bool {
    Command::new("tasklist")
        .args(["/FI", &format!("PID eq {pid}"), "/NH"])
        .output()
        .map(|o| String::from_utf8_lossy(&o.stdout).contains(&pid.to_string()))
        .unwrap_or(false)
}

/// §4.13 "Elapsed-time parsing accepts `MM:SS`, `HH:MM:SS`, and
/// `DD-HH:MM:SS`" — the formats `ps -o etime=` and `ps -o etimes=` emit.
pub fn parse_elapsed(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    let (days, rest) = match raw.split_once('-') {
        Some((d, rest)) => (d.parse::<u64>().ok()?, rest),
        None => (0, raw),
    };
    let parts: Vec<&str> = rest.split(':').collect();
    let (hours, minutes, seconds) = match parts.as_slice() {
        [h, m, s] => (h.parse::<u64>().ok()?, m.parse::<u64>().ok()?, s.parse::<u64>().ok()?),
        [m, s] => (0, m.parse::<u64>().ok()?, s.parse::<u64>().ok()?),
        _ => return None,
    };
    Some(Duration::from_secs(days * 86_400 + hours * 3_600 + minutes * 60 + seconds))
}

#[cfg(target_os = "linux")]
fn read_proc_metrics(pid: u32) -> Option<ProcessMetrics> {
    let status = std::fs::read_to_string(format!("/proc/{pid}/status")).ok()?;
    let rss_kb = status
        .lines()
        .find(|l| l.starts_with("VmRSS:"))
        .and_then(|l| l.split_whitespace().nth(1))
        .and_then(|v| v.parse::<f64>().ok())?;
    Some(ProcessMetrics { cpu_percent: 0.0, rss_mb: rss_kb / 1024.0, uptime: Duration::ZERO })
}

#[cfg(target_os = "linux")]
fn read_ps_metrics(pid: u32) -> Option<ProcessMetrics> {
    let output = Command::new("ps")
        .args(["-p", &pid.to_string(), "-o", "%cpu=,rss=,etime="])
        .output()
        .ok()?;
    if !output.status.success() {
        return read_proc_metrics(pid);
    }
    let line = String::from_utf8_lossy(&output.stdout);
    let mut fields = line.split_whitespace();
    let cpu_percent = fields.next()?.parse::<f64>().ok()?;
    let rss_kb = fields.next()?.parse::<f64>().ok()?;
    let etime = fields.next()?;
    let uptime = parse_elapsed(etime).unwrap_or(Duration::ZERO);
    Some(ProcessMetrics { cpu_percent, rss_mb: rss_kb / 1024.0, uptime })
}

#[cfg(target_os = "macos")]
fn read_ps_metrics(pid: u32) -> Option<ProcessMetrics> {
    let output = Command::new("ps")
        .args(["-p", &pid.to_string(), "-o", "%cpu=,rss=,etime="])
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let line = String::from_utf8_lossy(&output.stdout);
    let mut fields = line.split_whitespace();
    let cpu_percent = fields.next()?.parse::<f64>().ok()?;
    let rss_kb = fields.next()?.parse::<f64>().ok()?;
    let etime = fields.next()?;
    let uptime = parse_elapsed(etime).unwrap_or(Duration::ZERO);
    Some(ProcessMetrics { cpu_percent, rss_mb: rss_kb / 1024.0, uptime })
}

#[cfg(windows)]
fn read_ps_metrics(pid: u32) -> Option<ProcessMetrics> {
    let script = format!(
        "Get-Process -Id {pid} | Select-Object CPU,WorkingSet64,StartTime | ConvertTo-Json"
    );
    let output = Command::new("powershell").args(["-NoProfile", "-Command", &script]).output();
    match output {
        Ok(o) if o.status.success() => {
            let text = String::from_utf8_lossy(&o.stdout);
            let rss_mb = text
                .lines()
                .find(|l| l.contains("WorkingSet64"))
                .and_then(|l| l.split(':').nth(1))
                .and_then(|v| v.trim().trim_matches(',').parse::<f64>().ok())
                .map(|bytes| bytes / (1024.0 * 1024.0))
                .unwrap_or(0.0);
            Some(ProcessMetrics { cpu_percent: 0.0, rss_mb, uptime: Duration::ZERO })
        }
        _ => tasklist_metrics(pid),
    }
}

#[cfg(windows)]
fn tasklist_metrics(pid: u32) -> Option<ProcessMetrics> {
    let output = Command::new("tasklist")
        .args(["/FI", &format!("PID eq {pid}"), "/FO", "CSV", "/NH"])
        .output()
        .ok()?;
    let text = String::from_utf8_lossy(&output.stdout);
    let mem_field = text.split(',').nth(4)?;
    let rss_kb: f64 =
        mem_field.trim_matches('"').replace(",", "").replace(" K", "").trim().parse().ok()?;
    Some(ProcessMetrics { cpu_percent: 0.0, rss_mb: rss_kb / 1024.0, uptime: Duration::ZERO })
}

/// OS-level metrics for `pid` via the platform's native process inspection
/// tool, per §4.13.
pub fn read_metrics(pid: u32) -> Option<ProcessMetrics> {
    #[cfg(any(target_os = "linux", target_os = "macos"))]
    {
        read_ps_metrics(pid)
    }
    #[cfg(windows)]
    {
        read_ps_metrics(pid)
    }
    #[cfg(not(any(target_os = "linux", target_os = "macos", windows)))]
    {
        let _ = pid;
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_mm_ss() {
        assert_eq!(parse_elapsed("05:30"), Some(Duration::from_secs(5 * 60 + 30)));
    }

    #[test]
    fn parses_hh_mm_ss() {
        assert_eq!(parse_elapsed("01:02:03"), Some(Duration::from_secs(3723)));
    }

    #[test]
    fn parses_dd_hh_mm_ss() {
        assert_eq!(
            parse_elapsed("2-03:04:05"),
            Some(Duration::from_secs(2 * 86_400 + 3 * 3_600 + 4 * 60 + 5))
        );
    }

    #[test]
    fn rejects_malformed_elapsed() {
        assert_eq!(parse_elapsed("not-a-time"), None);
    }

    #[cfg(unix)]
    #[test]
    fn current_process_is_reported_as_existing() {
        let pid = std::process::id();
        assert!(process_exists(pid));
    }

    #[cfg(unix)]
    #[test]
    fn implausible_high_pid_reports_absent() {
        assert!(!process_exists(u32::MAX - 1));
    }
}
