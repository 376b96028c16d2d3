//! First-run setup prompt
//!
//! Collects whichever credentials are missing:
//! 1. Channel login name
//! 2. Application client id
//! 3. User access token (implicit grant URL is printed for convenience)

use anyhow::{Context, Result};
use regex::Regex;
use std::io::Write;
use std::sync::OnceLock;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::config::Config;

/// Scopes needed to read redemptions on the broadcaster's own channel
const REQUIRED_SCOPES: &str = "channel:read:redemptions+user:read:broadcast";

fn client_id_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-zA-Z0-9]{20,}$").expect("valid client id regex"))
}

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[a-z0-9]{20,}$").expect("valid token regex"))
}

pub fn parse_channel_name(input: &str) -> Option<String> {
    let name = input.trim().trim_start_matches('#').to_lowercase();
    (!name.is_empty()).then_some(name)
}

pub fn parse_client_id(input: &str) -> Option<String> {
    let id = input.trim();
    client_id_pattern().is_match(id).then(|| id.to_string())
}

/// Accepts the bare token or the `oauth:` form some generators print
pub fn parse_token(input: &str) -> Option<String> {
    let token = input.trim();
    let token = token.strip_prefix("oauth:").unwrap_or(token);
    token_pattern().is_match(token).then(|| token.to_string())
}

pub fn authorization_url(client_id: &str) -> String {
    format!(
        "https://id.twitch.tv/oauth2/authorize?client_id={}\
         &redirect_uri=http://localhost&response_type=token&scope={}",
        client_id, REQUIRED_SCOPES
    )
}

/// Run the setup prompt. Returns false if input closed before completion.
///
/// With `force`, every value is asked for again.
pub async fn run_setup(
    config: &mut Config,
    lines: &mut mpsc::UnboundedReceiver<String>,
    force: bool,
) -> Result<bool> {
    println!("\n=================================================");
    println!("  reward-keys Setup");
    println!("=================================================\n");

    if force || config.twitch.channel_name.trim().is_empty() {
        let prompt = "Enter your Twitch channel name: ";
        let Some(name) = ask(lines, prompt, parse_channel_name, "Channel name cannot be empty.").await
        else {
            return Ok(false);
        };
        config.twitch.channel_name = name;
    }

    if force || config.twitch.client_id.trim().is_empty() {
        println!("\n--- GETTING Client ID ---");
        println!("Go to your Twitch Developer Console (dev.twitch.tv/console/apps).");
        let prompt = "Paste your Client ID here: ";
        let Some(id) = ask(lines, prompt, parse_client_id, "Invalid Client ID format. Try again.").await
        else {
            return Ok(false);
        };
        config.twitch.client_id = id;
    }

    if force || config.twitch.oauth_token.trim().is_empty() {
        println!("\n--- GETTING OAuth TOKEN ---");
        println!("Open this URL, authorize, and copy access_token from the redirect address:");
        println!("\n{}\n", authorization_url(&config.twitch.client_id));
        let prompt = "Paste your freshly generated OAuth token here: ";
        let Some(token) = ask(lines, prompt, parse_token, "Invalid token format. Try again.").await
        else {
            return Ok(false);
        };
        config.twitch.oauth_token = token;
    }

    config.save().context("Failed to save settings after setup")?;
    info!("Initial setup complete. Starting the bot...");
    Ok(true)
}

async fn ask(
    lines: &mut mpsc::UnboundedReceiver<String>,
    prompt: &str,
    parse: fn(&str) -> Option<String>,
    invalid: &str,
) -> Option<String> {
    loop {
        print!("{}", prompt);
        let _ = std::io::stdout().flush();

        let line = lines.recv().await?;
        match parse(&line) {
            Some(value) => return Some(value),
            None => warn!("{}", invalid),
        }
    }
}
