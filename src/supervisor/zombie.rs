//! Zombie browser process cleanup
//!
//! Detects and kills orphaned Chrome/Chromium processes that were launched
//! by this service (identified by the profile directory marker in their
//! command line) but no longer belong to the live engine. A crashed engine
//! can strand renderer and GPU children that hold memory for days on a
//! small VPS.

use std::process::Command;

use tracing::info;

/// Profile path component every engine launch puts in the Chrome command
/// line (`.../ecocal-server/browser_data/<profile_id>`).
const SERVICE_MARKER: &str = "ecocal-server";
const PROFILE_MARKER: &str = "browser_data";

/// Kill orphaned browser processes, sparing `live_profile` (the profile id
/// of the engine currently owned by the pool). Returns the kill count.
pub fn cleanup_zombie_engines(live_profile: Option<&str>) -> u32 {
    #[cfg(target_os = "windows")]
    {
        cleanup_zombie_engines_windows(live_profile)
    }

    #[cfg(not(target_os = "windows"))]
    {
        cleanup_zombie_engines_unix(live_profile)
    }
}

/// Extract the profile id from a Chrome command line containing
/// `--user-data-dir`. Looks for `browser_data\{id}` or `browser_data/{id}`.
fn extract_profile_id_from_cmdline(cmdline: &str) -> Option<String> {
    let pos = cmdline.find(PROFILE_MARKER)?;
    let after = &cmdline[pos + PROFILE_MARKER.len()..];
    let after = after.trim_start_matches(|c: char| c == '\\' || c == '/');
    let profile_id: String = after
        .chars()
        .take_while(|c| !c.is_whitespace() && *c != '"' && *c != '\'' && *c != '\\' && *c != '/')
        .collect();
    if profile_id.is_empty() {
        None
    } else {
        Some(profile_id)
    }
}

fn is_zombie_line(line: &str, live_profile: Option<&str>) -> Option<String> {
    if !line.contains(SERVICE_MARKER) {
        return None;
    }
    let profile_id = extract_profile_id_from_cmdline(line)?;
    if live_profile == Some(profile_id.as_str()) {
        return None;
    }
    Some(profile_id)
}

#[cfg(target_os = "windows")]
fn cleanup_zombie_engines_windows(live_profile: Option<&str>) -> u32 {
    use tracing::debug;

    // Try WMIC first (available on Windows 10)
    let output = match Command::new("wmic")
        .args(["process", "where", "Name='chrome.exe'", "get", "ProcessId,CommandLine", "/FORMAT:CSV"])
        .output()
    {
        Ok(o) => o,
        Err(e) => {
            debug!("[Zombie] WMIC not available ({}), trying PowerShell", e);
            // Fallback: PowerShell (Windows 11+)
            match Command::new("powershell")
                .args(["-NoProfile", "-Command",
                    "Get-Process chrome -ErrorAction SilentlyContinue | ForEach-Object { $id=$_.Id; $cmd=(Get-CimInstance Win32_Process -Filter \"ProcessId=$id\" -ErrorAction SilentlyContinue).CommandLine; \"$id|$cmd\" }"])
                .output()
            {
                Ok(o) => o,
                Err(e2) => {
                    debug!("[Zombie] Cannot enumerate Chrome processes: {}", e2);
                    return 0;
                }
            }
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut killed = 0u32;

    for line in stdout.lines() {
        if let Some(profile_id) = is_zombie_line(line, live_profile) {
            if let Some(pid) = extract_pid_from_line(line) {
                info!("[Zombie] Killing orphaned Chrome PID {} (profile: {})", pid, profile_id);
                let _ = Command::new("taskkill")
                    .args(["/PID", &pid.to_string(), "/T", "/F"])
                    .output();
                killed += 1;
            }
        }
    }

    if killed > 0 {
        info!("[Zombie] Cleaned up {} orphaned Chrome processes", killed);
    }

    killed
}

#[cfg(not(target_os = "windows"))]
fn cleanup_zombie_engines_unix(live_profile: Option<&str>) -> u32 {
    let output = match Command::new("ps").args(["aux"]).output() {
        Ok(o) => o,
        Err(_) => return 0,
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let mut killed = 0u32;

    for line in stdout.lines() {
        if !line.contains("chrom") {
            continue;
        }
        if let Some(profile_id) = is_zombie_line(line, live_profile) {
            // PID is the second field in ps aux output.
            if let Some(pid) = line.split_whitespace().nth(1).and_then(|s| s.parse::<u32>().ok()) {
                info!("[Zombie] Killing orphaned Chrome PID {} (profile: {})", pid, profile_id);
                let _ = Command::new("kill").args(["-9", &pid.to_string()]).output();
                killed += 1;
            }
        }
    }

    if killed > 0 {
        info!("[Zombie] Cleaned up {} orphaned Chrome processes", killed);
    }

    killed
}

/// Extract PID from WMIC CSV or PowerShell output line.
///
/// WMIC CSV format: `Node,CommandLine,ProcessId`
/// PowerShell format: `PID|CommandLine`
#[allow(dead_code)]
fn extract_pid_from_line(line: &str) -> Option<u32> {
    // Try pipe-separated format first (PowerShell)
    if line.contains('|') {
        return line.split('|').next().and_then(|s| s.trim().parse::<u32>().ok());
    }

    // WMIC CSV: last numeric field is the PID
    line.split(',')
        .filter_map(|s| s.trim().parse::<u32>().ok())
        .last()
}
