//! Lifecycle coordinator
//!
//! Drives the bot through SETUP, RUNNING, RESTARTING and STOPPING. While
//! RUNNING, the EventSub supervisor and the console run as separate tasks
//! next to the game window detector. Whichever of the first two finishes
//! first ends the state; the remaining tasks are cancelled and awaited
//! before the next state begins.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Config, SharedConfig};
use crate::console::{self, ControlSignal};
use crate::dispatch::Dispatcher;
use crate::focus::{self, FocusTracker, WindowSystem};
use crate::input::{ActionExecutor, InputBackend};
use crate::setup;
use crate::sound::SoundPlayer;
use crate::twitch::api::{HelixClient, HELIX_BASE_URL};
use crate::twitch::session::EVENTSUB_URL;
use crate::twitch::{supervisor, EventSubSession, SupervisorExit};

/// Pause between leaving RUNNING and the next SETUP
pub const RESTART_COOLDOWN: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Setup,
    Running,
    Restarting,
    Stopping,
    Terminated,
}

/// How a RUNNING pass ended
#[derive(Debug)]
pub enum RunOutcome {
    Control(ControlSignal),
    Supervisor(SupervisorExit),
    /// The supervisor task panicked
    SupervisorFailed,
}

impl RunOutcome {
    pub fn next_state(&self) -> LifecycleState {
        match self {
            RunOutcome::Control(ControlSignal::Restart) => LifecycleState::Restarting,
            RunOutcome::Control(ControlSignal::Exit) => LifecycleState::Stopping,
            RunOutcome::Supervisor(SupervisorExit::AuthorizationFailed(_)) => {
                LifecycleState::Restarting
            }
            RunOutcome::Supervisor(SupervisorExit::Cancelled) => LifecycleState::Stopping,
            RunOutcome::SupervisorFailed => LifecycleState::Stopping,
        }
    }
}

/// Remote endpoints used by each session
#[derive(Debug, Clone)]
pub struct Endpoints {
    pub eventsub_url: String,
    pub helix_base_url: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            eventsub_url: EVENTSUB_URL.to_string(),
            helix_base_url: HELIX_BASE_URL.to_string(),
        }
    }
}

/// Startup options from the command line
#[derive(Debug, Clone, Default)]
pub struct Options {
    pub config_path: Option<PathBuf>,
    pub force_setup: bool,
}

pub struct Coordinator {
    options: Options,
    endpoints: Endpoints,
    lines: mpsc::UnboundedReceiver<String>,
    control_tx: mpsc::UnboundedSender<ControlSignal>,
    control_rx: mpsc::UnboundedReceiver<ControlSignal>,
    backend: Arc<dyn InputBackend>,
    windows: Arc<dyn WindowSystem>,
    sound: SoundPlayer,
    config: Option<SharedConfig>,
}

impl Coordinator {
    pub fn new(
        options: Options,
        lines: mpsc::UnboundedReceiver<String>,
        control_tx: mpsc::UnboundedSender<ControlSignal>,
        control_rx: mpsc::UnboundedReceiver<ControlSignal>,
        backend: Arc<dyn InputBackend>,
        windows: Arc<dyn WindowSystem>,
    ) -> Self {
        Self {
            options,
            endpoints: Endpoints::default(),
            lines,
            control_tx,
            control_rx,
            backend,
            windows,
            sound: SoundPlayer::new(),
            config: None,
        }
    }

    pub fn with_endpoints(mut self, endpoints: Endpoints) -> Self {
        self.endpoints = endpoints;
        self
    }

    /// Run until TERMINATED
    pub async fn run(mut self) {
        let mut state = LifecycleState::Setup;
        loop {
            debug!("Lifecycle state: {:?}", state);
            state = match state {
                LifecycleState::Setup => self.setup().await,
                LifecycleState::Running => self.running().await,
                LifecycleState::Restarting => self.cooldown().await,
                LifecycleState::Stopping => {
                    info!("Shutting down...");
                    LifecycleState::Terminated
                }
                LifecycleState::Terminated => return,
            };
        }
    }

    async fn setup(&mut self) -> LifecycleState {
        let loaded = match &self.options.config_path {
            Some(path) => Config::load_from(path.clone()),
            None => Config::load(),
        };
        let mut config = match loaded {
            Ok(config) => config,
            Err(e) => {
                error!("Could not load configuration: {:#}", e);
                return LifecycleState::Stopping;
            }
        };
        info!("Configuration loaded from {:?}", config.config_path());

        let force = std::mem::take(&mut self.options.force_setup);
        if force || config.needs_setup() {
            info!("Running setup...");
            let completed = tokio::select! {
                signal = self.control_rx.recv() => {
                    if signal == Some(ControlSignal::Restart) {
                        return LifecycleState::Restarting;
                    }
                    return LifecycleState::Stopping;
                }
                result = setup::run_setup(&mut config, &mut self.lines, force) => result,
            };
            match completed {
                Ok(true) => {}
                Ok(false) => {
                    error!("Input closed before setup finished.");
                    return LifecycleState::Stopping;
                }
                Err(e) => {
                    error!("Setup failed: {:#}", e);
                    return LifecycleState::Stopping;
                }
            }
        }

        self.config = Some(SharedConfig::new(config));
        LifecycleState::Running
    }

    async fn running(&mut self) -> LifecycleState {
        let Some(config) = self.config.take() else {
            return LifecycleState::Setup;
        };

        let credentials = config.read().twitch.clone();
        let tracker = Arc::new(FocusTracker::new(self.windows.clone()));
        let mut dispatcher = Dispatcher::new(
            config.clone(),
            ActionExecutor::new(self.backend.clone()).with_focus(tracker.clone()),
            self.sound.clone(),
        );
        let mut session = EventSubSession::with_endpoints(
            &credentials,
            &self.endpoints.eventsub_url,
            HelixClient::with_base_url(&credentials, &self.endpoints.helix_base_url),
            move |event| {
                dispatcher.handle(&event);
            },
        );

        let cancel = CancellationToken::new();
        let supervisor_cancel = cancel.child_token();
        let mut supervisor: JoinHandle<SupervisorExit> =
            tokio::spawn(async move { supervisor::run(&mut session, &supervisor_cancel).await });

        let detector = tokio::spawn(focus::run_detector(
            tracker,
            config.clone(),
            cancel.child_token(),
        ));

        let lines = std::mem::replace(&mut self.lines, closed_lines());
        let console = tokio::spawn(console::run(
            lines,
            config.clone(),
            self.control_tx.clone(),
            cancel.child_token(),
        ));

        info!("Bot is running for channel '{}'.", credentials.channel_name);

        let (outcome, supervisor_done) = tokio::select! {
            signal = self.control_rx.recv() => {
                (RunOutcome::Control(signal.unwrap_or(ControlSignal::Exit)), false)
            }
            exit = &mut supervisor => match exit {
                Ok(exit) => (RunOutcome::Supervisor(exit), true),
                Err(e) => {
                    error!("EventSub supervisor failed: {}", e);
                    (RunOutcome::SupervisorFailed, true)
                }
            },
        };

        cancel.cancel();
        if !supervisor_done {
            if let Err(e) = supervisor.await {
                warn!("EventSub supervisor ended abnormally: {}", e);
            }
        }
        self.lines = match console.await {
            Ok(lines) => lines,
            Err(e) => {
                error!("Console task failed: {}", e);
                closed_lines()
            }
        };
        if let Err(e) = detector.await {
            warn!("Game window detector ended abnormally: {}", e);
        }

        if let RunOutcome::Supervisor(SupervisorExit::AuthorizationFailed(e)) = &outcome {
            error!("Token rejected ({}). Please re-authenticate during setup.", e);
            if let Err(e) = config.update(Config::invalidate_token) {
                error!("Failed to clear the stored token: {:#}", e);
            }
        }

        outcome.next_state()
    }

    async fn cooldown(&mut self) -> LifecycleState {
        info!("Restarting in {} seconds...", RESTART_COOLDOWN.as_secs());
        tokio::select! {
            _ = tokio::time::sleep(RESTART_COOLDOWN) => LifecycleState::Setup,
            signal = self.control_rx.recv() => match signal {
                Some(ControlSignal::Restart) => LifecycleState::Setup,
                _ => LifecycleState::Stopping,
            },
        }
    }
}

fn closed_lines() -> mpsc::UnboundedReceiver<String> {
    mpsc::unbounded_channel().1
}
