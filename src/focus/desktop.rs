//! Desktop window access through the platform's command line tools
//!
//! Linux uses `xdotool` (X11 and XWayland) and `/proc`, macOS uses
//! `osascript` and `ps`, Windows uses PowerShell and `tasklist`.

use std::process::Command;

use super::{FocusError, Window, WindowSystem};

pub struct DesktopWindows;

/// Run a helper and return its stdout. `Ok(None)` means it exited
/// unsuccessfully without printing an error, which these tools use for
/// "nothing matched".
fn run(tool: &'static str, cmd: &mut Command) -> Result<Option<String>, FocusError> {
    let output = cmd.output().map_err(|source| FocusError::Spawn { tool, source })?;
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if output.status.success() {
        return Ok(Some(stdout));
    }
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    if stderr.is_empty() {
        Ok(None)
    } else {
        Err(FocusError::Tool { tool, stderr })
    }
}

/// Split a `first<TAB>rest` line printed by the helper scripts
#[cfg(any(target_os = "macos", target_os = "windows"))]
fn split_window_line(line: &str) -> Option<Window> {
    let (id, title) = line.trim().split_once('\t')?;
    (!id.is_empty()).then(|| Window {
        id: id.to_string(),
        title: title.to_string(),
    })
}

// Linux

#[cfg(target_os = "linux")]
impl WindowSystem for DesktopWindows {
    fn running_processes(&self) -> Result<Vec<String>, FocusError> {
        let entries = std::fs::read_dir("/proc").map_err(|source| FocusError::Spawn {
            tool: "/proc",
            source,
        })?;

        let mut names = Vec::new();
        for entry in entries.flatten() {
            let dir = entry.path();
            let is_pid = dir
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.bytes().all(|b| b.is_ascii_digit()));
            if !is_pid {
                continue;
            }
            if let Ok(comm) = std::fs::read_to_string(dir.join("comm")) {
                names.push(comm.trim().to_string());
            }
            // comm is cut at 15 bytes; Wine games show their full .exe name
            // in argv[0]
            if let Some(exe) = std::fs::read_to_string(dir.join("cmdline"))
                .ok()
                .as_deref()
                .and_then(executable_name)
            {
                names.push(exe);
            }
        }
        Ok(names)
    }

    fn find_window(&self, fragment: &str) -> Result<Option<Window>, FocusError> {
        let Some(ids) = run(
            "xdotool",
            Command::new("xdotool").args(["search", "--onlyvisible", "--name", &escape_ere(fragment)]),
        )?
        else {
            return Ok(None);
        };
        let Some(id) = ids.lines().map(str::trim).find(|id| !id.is_empty()) else {
            return Ok(None);
        };

        let title = run("xdotool", Command::new("xdotool").args(["getwindowname", id]))?
            .unwrap_or_default();
        Ok(Some(Window {
            id: id.to_string(),
            title,
        }))
    }

    fn activate(&self, window: &Window) -> Result<(), FocusError> {
        run(
            "xdotool",
            Command::new("xdotool").args(["windowactivate", "--sync", &window.id]),
        )?
        .map(|_| ())
        .ok_or_else(|| FocusError::Refused(window.title.clone()))
    }
}

/// Base name of argv[0] from a NUL-separated `/proc/<pid>/cmdline`
#[cfg(target_os = "linux")]
fn executable_name(cmdline: &str) -> Option<String> {
    let argv0 = cmdline.split('\0').next()?;
    let name = argv0.rsplit(['/', '\\']).next()?;
    (!name.is_empty()).then(|| name.to_string())
}

/// Escape POSIX extended regex metacharacters for `xdotool search`
#[cfg(target_os = "linux")]
fn escape_ere(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        if "\\.[]()*+?{}|^$".contains(c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

// macOS

#[cfg(target_os = "macos")]
impl WindowSystem for DesktopWindows {
    fn running_processes(&self) -> Result<Vec<String>, FocusError> {
        let listing = run("ps", Command::new("ps").args(["-A", "-c", "-o", "comm="]))?
            .unwrap_or_default();
        Ok(listing.lines().map(|l| l.trim().to_string()).collect())
    }

    fn find_window(&self, fragment: &str) -> Result<Option<Window>, FocusError> {
        let script = format!(
            "tell application \"System Events\"\n\
               repeat with p in (every process whose background only is false)\n\
                 repeat with w in (every window of p)\n\
                   if name of w contains {} then return (name of p) & tab & (name of w)\n\
                 end repeat\n\
               end repeat\n\
             end tell\n\
             return \"\"",
            applescript_string(fragment)
        );
        let found = run("osascript", Command::new("osascript").args(["-e", &script]))?;
        Ok(found.as_deref().and_then(split_window_line))
    }

    fn activate(&self, window: &Window) -> Result<(), FocusError> {
        let script = format!(
            "tell application \"System Events\" to set frontmost of process {} to true",
            applescript_string(&window.id)
        );
        run("osascript", Command::new("osascript").args(["-e", &script]))?
            .map(|_| ())
            .ok_or_else(|| FocusError::Refused(window.title.clone()))
    }
}

#[cfg(target_os = "macos")]
fn applescript_string(text: &str) -> String {
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
}

// Windows

#[cfg(target_os = "windows")]
impl WindowSystem for DesktopWindows {
    fn running_processes(&self) -> Result<Vec<String>, FocusError> {
        let listing = run(
            "tasklist",
            Command::new("tasklist").args(["/fo", "csv", "/nh"]),
        )?
        .unwrap_or_default();
        Ok(listing.lines().filter_map(tasklist_name).collect())
    }

    fn find_window(&self, fragment: &str) -> Result<Option<Window>, FocusError> {
        let script = format!(
            "$pattern = '*' + [Management.Automation.WildcardPattern]::Escape({}) + '*'; \
             Get-Process | Where-Object {{ $_.MainWindowTitle -like $pattern }} | \
             Select-Object -First 1 | \
             ForEach-Object {{ \"$($_.Id)`t$($_.MainWindowTitle)\" }}",
            powershell_string(fragment)
        );
        let found = run("powershell", powershell(&script))?;
        Ok(found.as_deref().and_then(split_window_line))
    }

    fn activate(&self, window: &Window) -> Result<(), FocusError> {
        let pid: u32 = window
            .id
            .parse()
            .map_err(|_| FocusError::Refused(window.title.clone()))?;
        let script = format!(
            "$shell = New-Object -ComObject WScript.Shell; \
             if (-not $shell.AppActivate({})) {{ exit 1 }}",
            pid
        );
        run("powershell", powershell(&script))?
            .map(|_| ())
            .ok_or_else(|| FocusError::Refused(window.title.clone()))
    }
}

#[cfg(target_os = "windows")]
fn powershell(script: &str) -> Command {
    let mut cmd = Command::new("powershell");
    cmd.args(["-NoProfile", "-NonInteractive", "-Command", script]);
    cmd
}

#[cfg(target_os = "windows")]
fn powershell_string(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// Image name from one `tasklist /fo csv /nh` row
#[cfg(target_os = "windows")]
fn tasklist_name(row: &str) -> Option<String> {
    let name = row.trim().strip_prefix('"')?.split('"').next()?;
    (!name.is_empty()).then(|| name.to_string())
}
