//! Redemption sound playback
//!
//! Sounds are played by the platform's command line player. Starting a new
//! sound stops the one still playing.

use std::path::Path;
use std::sync::{Arc, Mutex};
use tokio::process::{Child, Command};
use tracing::{debug, error, info, warn};

/// Plays one sound at a time
#[derive(Clone, Default)]
pub struct SoundPlayer {
    current: Arc<Mutex<Option<Child>>>,
}

impl SoundPlayer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Play `sound_file`, interrupting any sound in progress.
    ///
    /// Must be called from within a tokio runtime. Failures are logged only.
    pub fn play(&self, sound_file: &Path) {
        let full_path = match std::path::absolute(sound_file) {
            Ok(path) => path,
            Err(_) => sound_file.to_path_buf(),
        };
        if !full_path.exists() {
            warn!("Sound file not found at: {:?}", full_path);
            return;
        }

        let mut current = self.current.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(mut previous) = current.take() {
            if let Err(e) = previous.start_kill() {
                debug!("Previous sound already finished: {}", e);
            }
        }

        match player_command(&full_path).kill_on_drop(true).spawn() {
            Ok(child) => {
                info!("Playing sound: {:?}", sound_file);
                *current = Some(child);
            }
            Err(e) => error!("Could not play sound {:?}: {}", sound_file, e),
        }
    }
}

#[cfg(target_os = "macos")]
fn player_command(path: &Path) -> Command {
    let mut cmd = Command::new("afplay");
    cmd.arg(path);
    cmd
}

#[cfg(target_os = "windows")]
fn player_command(path: &Path) -> Command {
    let script = format!(
        "Add-Type -AssemblyName presentationCore; \
         $p = New-Object System.Windows.Media.MediaPlayer; \
         $p.Open([uri]'{}'); $p.Play(); Start-Sleep -Seconds 5",
        path.display().to_string().replace('\'', "''")
    );
    let mut cmd = Command::new("powershell");
    cmd.args(["-NoProfile", "-NonInteractive", "-Command", &script]);
    cmd
}

#[cfg(not(any(target_os = "macos", target_os = "windows")))]
fn player_command(path: &Path) -> Command {
    // paplay handles ogg/wav through PulseAudio or PipeWire
    let mut cmd = Command::new("paplay");
    cmd.arg(path);
    cmd
}
