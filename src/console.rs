//! Line-oriented administrative console
//!
//! Stdin is read on a dedicated thread so a blocking read never stalls the
//! runtime. Lines are consumed by the setup prompt and by the console task;
//! `restart` and `exit` are forwarded to the lifecycle coordinator as
//! [`ControlSignal`]s.

use std::io::BufRead;
use std::path::PathBuf;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::config::{positive_duration, SharedConfig};
use crate::logging;

/// Requests from the console (or Ctrl+C) to the lifecycle coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlSignal {
    Restart,
    Exit,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Help,
    Status,
    RewardAdd { name: String, action: String },
    RewardRemove { name: String },
    SoundEnabled(bool),
    SoundFile(PathBuf),
    HoldDuration(f64),
    /// Empty clears the manual title
    FocusTitle(String),
    FocusAuto(bool),
    FocusAdd(String),
    Pause,
    Unpause,
    Restart,
    Exit,
}

#[derive(Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("Unknown command: '{0}'. Type 'help' for assistance.")]
    Unknown(String),

    #[error("Usage: {0}")]
    Usage(&'static str),

    #[error("Unterminated quote in: {0}")]
    UnterminatedQuote(String),
}

const REWARD_USAGE: &str = "reward add \"Reward Name\" <key> | reward remove \"Reward Name\"";
const SOUND_USAGE: &str = "sound <on|off|path>";
const HOLD_USAGE: &str = "hold <seconds>";
const FOCUS_AUTO_USAGE: &str = "focus auto <on|off>";
const FOCUS_ADD_USAGE: &str = "focus add <process>";

/// Spawn the thread that forwards stdin lines. The channel closes on EOF.
pub fn spawn_stdin_reader() -> mpsc::UnboundedReceiver<String> {
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    error!("Failed to read console input: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

/// Split a command line into words, honoring single and double quotes
pub fn split_args(line: &str) -> Result<Vec<String>, ParseError> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_word = false;
    let mut quote: Option<char> = None;

    for c in line.chars() {
        match quote {
            Some(q) if c == q => quote = None,
            Some(_) => current.push(c),
            None if c == '"' || c == '\'' => {
                quote = Some(c);
                in_word = true;
            }
            None if c.is_whitespace() => {
                if in_word {
                    words.push(std::mem::take(&mut current));
                    in_word = false;
                }
            }
            None => {
                current.push(c);
                in_word = true;
            }
        }
    }

    if quote.is_some() {
        return Err(ParseError::UnterminatedQuote(line.to_string()));
    }
    if in_word {
        words.push(current);
    }
    Ok(words)
}

/// Parse one console line. Blank lines parse to `None`.
pub fn parse(line: &str) -> Result<Option<ConsoleCommand>, ParseError> {
    let line = line.trim();
    let (command, rest) = match line.split_once(char::is_whitespace) {
        Some((command, rest)) => (command, rest.trim()),
        None => (line, ""),
    };
    if command.is_empty() {
        return Ok(None);
    }

    let parsed = match command.to_lowercase().as_str() {
        "help" => ConsoleCommand::Help,
        "status" => ConsoleCommand::Status,
        "pause" => ConsoleCommand::Pause,
        "unpause" => ConsoleCommand::Unpause,
        "restart" => ConsoleCommand::Restart,
        "exit" | "quit" => ConsoleCommand::Exit,
        "reward" => parse_reward(rest)?,
        "sound" => match rest.to_lowercase().as_str() {
            "" => return Err(ParseError::Usage(SOUND_USAGE)),
            "on" => ConsoleCommand::SoundEnabled(true),
            "off" => ConsoleCommand::SoundEnabled(false),
            _ => ConsoleCommand::SoundFile(PathBuf::from(rest)),
        },
        "focus" => parse_focus(rest)?,
        "hold" => match rest.parse::<f64>() {
            Ok(secs) if positive_duration(secs).is_some() => ConsoleCommand::HoldDuration(secs),
            _ => return Err(ParseError::Usage(HOLD_USAGE)),
        },
        other => return Err(ParseError::Unknown(other.to_string())),
    };
    Ok(Some(parsed))
}

fn parse_reward(rest: &str) -> Result<ConsoleCommand, ParseError> {
    let args = split_args(rest)?;
    match args.as_slice() {
        [sub, name, action, ..] if sub.eq_ignore_ascii_case("add") && !name.trim().is_empty() => {
            Ok(ConsoleCommand::RewardAdd {
                name: name.clone(),
                action: action.clone(),
            })
        }
        [sub, name, ..] if sub.eq_ignore_ascii_case("remove") => Ok(ConsoleCommand::RewardRemove {
            name: name.clone(),
        }),
        _ => Err(ParseError::Usage(REWARD_USAGE)),
    }
}

fn parse_focus(rest: &str) -> Result<ConsoleCommand, ParseError> {
    let (sub, arg) = match rest.split_once(char::is_whitespace) {
        Some((sub, arg)) => (sub, arg.trim()),
        None => (rest, ""),
    };
    if sub.eq_ignore_ascii_case("auto") {
        return match arg.to_lowercase().as_str() {
            "on" => Ok(ConsoleCommand::FocusAuto(true)),
            "off" => Ok(ConsoleCommand::FocusAuto(false)),
            _ => Err(ParseError::Usage(FOCUS_AUTO_USAGE)),
        };
    }
    if sub.eq_ignore_ascii_case("add") {
        if arg.is_empty() {
            return Err(ParseError::Usage(FOCUS_ADD_USAGE));
        }
        return Ok(ConsoleCommand::FocusAdd(arg.to_string()));
    }
    let title = rest.trim_matches(['"', '\'']);
    Ok(ConsoleCommand::FocusTitle(title.trim().to_string()))
}

/// Apply a command. Returns the signal for the coordinator, if any.
pub fn execute(command: ConsoleCommand, config: &SharedConfig) -> Option<ControlSignal> {
    match command {
        ConsoleCommand::Help => print_help(),
        ConsoleCommand::Status => match toml::to_string_pretty(&config.read().redacted()) {
            Ok(rendered) => println!("{}", rendered),
            Err(e) => error!("Could not render settings: {}", e),
        },
        ConsoleCommand::RewardAdd { name, action } => {
            match config.update(|c| c.bind_reward(&name, &action)) {
                Ok(()) => info!("Reward '{}' bound to '{}'.", name.trim(), action.trim()),
                Err(e) => error!("Failed to save settings: {:#}", e),
            }
        }
        ConsoleCommand::RewardRemove { name } => match config.update(|c| c.unbind_reward(&name)) {
            Ok(Some(removed)) => info!("Removed reward binding for '{}'.", removed),
            Ok(None) => warn!("Reward '{}' not found.", name),
            Err(e) => error!("Failed to save settings: {:#}", e),
        },
        ConsoleCommand::SoundEnabled(enabled) => {
            match config.update(|c| c.sound.enabled = enabled) {
                Ok(()) if enabled => info!("Sound on redemption ENABLED."),
                Ok(()) => info!("Sound on redemption DISABLED."),
                Err(e) => error!("Failed to save settings: {:#}", e),
            }
        }
        ConsoleCommand::SoundFile(path) => {
            match config.update(|c| c.sound.sound_file = path.clone()) {
                Ok(()) => info!("Sound file set to: {:?}", path),
                Err(e) => error!("Failed to save settings: {:#}", e),
            }
        }
        ConsoleCommand::HoldDuration(secs) => {
            match config.update(|c| c.key_behavior.hold_duration_seconds = secs) {
                Ok(()) => info!("Hold duration set to {}s.", secs),
                Err(e) => error!("Failed to save settings: {:#}", e),
            }
        }
        ConsoleCommand::FocusTitle(title) => {
            match config.update(|c| c.focus.manual_focus_title = title.clone()) {
                Ok(()) if title.is_empty() => info!("Manual focus title cleared."),
                Ok(()) => info!("Manual window focus title set to: '{}'", title),
                Err(e) => error!("Failed to save settings: {:#}", e),
            }
        }
        ConsoleCommand::FocusAuto(enabled) => {
            match config.update(|c| c.focus.auto_focus_enabled = enabled) {
                Ok(()) if enabled => info!("Auto-focus ENABLED."),
                Ok(()) => info!("Auto-focus DISABLED."),
                Err(e) => error!("Failed to save settings: {:#}", e),
            }
        }
        ConsoleCommand::FocusAdd(process) => {
            match config.update(|c| c.focus.add_known_process(&process)) {
                Ok(true) => info!("Process '{}' added to auto-detection.", process),
                Ok(false) => info!("Process '{}' already in list.", process),
                Err(e) => error!("Failed to save settings: {:#}", e),
            }
        }
        ConsoleCommand::Pause => {
            logging::set_console_paused(true);
            println!("Logging is paused. Type 'unpause' to resume.");
        }
        ConsoleCommand::Unpause => {
            logging::set_console_paused(false);
            info!("Logging has been resumed.");
        }
        ConsoleCommand::Restart => {
            warn!("Restarting bot...");
            return Some(ControlSignal::Restart);
        }
        ConsoleCommand::Exit => {
            info!("Exiting on command...");
            return Some(ControlSignal::Exit);
        }
    }
    None
}

/// Console task: reads lines until a control command or cancellation.
///
/// Hands the line receiver back so the next lifecycle pass can reuse it.
pub async fn run(
    mut lines: mpsc::UnboundedReceiver<String>,
    config: SharedConfig,
    control: mpsc::UnboundedSender<ControlSignal>,
    cancel: CancellationToken,
) -> mpsc::UnboundedReceiver<String> {
    info!("Control console is active. Type 'help' for a list of commands.");

    loop {
        let line = tokio::select! {
            _ = cancel.cancelled() => break,
            line = lines.recv() => line,
        };

        let Some(line) = line else {
            warn!("Console input closed; continuing without console.");
            cancel.cancelled().await;
            break;
        };

        match parse(&line) {
            Ok(None) => {}
            Ok(Some(command)) => {
                if let Some(signal) = execute(command, &config) {
                    let _ = control.send(signal);
                    break;
                }
            }
            Err(e) => warn!("{}", e),
        }
    }

    info!("Console worker stopped.");
    lines
}

fn print_help() {
    println!();
    println!("--- CONSOLE COMMANDS ---");
    println!("  status                     - Show current settings");
    println!("  reward add \"name\" <key>    - Add/edit a reward binding");
    println!("  reward remove \"name\"       - Remove a reward binding");
    println!("  sound <on|off|path>        - Manage redemption sound");
    println!("  hold <seconds>             - Set how long hold keys stay down");
    println!("  focus <title>              - Focus this window before actions (empty to clear)");
    println!("  focus auto <on|off>        - Enable/disable automatic game window detection");
    println!("  focus add <process>        - Add a game process to auto-detection");
    println!("  pause                      - Pause INFO/DEBUG logs to enter commands");
    println!("  unpause                    - Resume logging");
    println!("  restart                    - Restart the bot");
    println!("  exit                       - Exit the program");
    println!("------------------------");
    println!();
}
