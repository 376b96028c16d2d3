//! Redemption dispatch: throttle, sound, binding lookup, action
//!
//! Decisions for one event are made synchronously before the next event is
//! read; the resulting action runs on its own task.

mod binding;
mod rate_limit;

pub use binding::{normalize, resolve};
pub use rate_limit::{RateLimiter, DEFAULT_MIN_INTERVAL};

use tokio::time::Instant;
use tracing::{info, warn};

use crate::config::SharedConfig;
use crate::input::{ActionExecutor, Dispatched};
use crate::sound::SoundPlayer;
use crate::twitch::RedemptionEvent;

/// What happened to one redemption event
#[derive(Debug)]
pub enum Outcome {
    /// Same reward triggered too recently
    Throttled,
    /// No binding for this reward (the sound may still have played)
    Unbound,
    /// The bound action was handed to the executor
    Dispatched(Dispatched),
}

/// Routes redemption events to actions using the live configuration
pub struct Dispatcher {
    config: SharedConfig,
    limiter: RateLimiter,
    executor: ActionExecutor,
    sound: SoundPlayer,
}

impl Dispatcher {
    pub fn new(config: SharedConfig, executor: ActionExecutor, sound: SoundPlayer) -> Self {
        Self {
            config,
            limiter: RateLimiter::new(),
            executor,
            sound,
        }
    }

    /// Handle one redemption. Must be called from within a tokio runtime.
    pub fn handle(&mut self, event: &RedemptionEvent) -> Outcome {
        let title = &event.reward.title;
        info!("EVENT RECEIVED: Reward '{}' from {}.", title, event.user_name);

        let config = self.config.read();

        let now = Instant::now();
        let since_last = self.limiter.since_last(title, now);
        if !self.limiter.allow(title, now, config.dispatch.min_interval()) {
            info!(
                "Throttled reward '{}' (last trigger {:.2}s ago).",
                title,
                since_last.unwrap_or_default().as_secs_f64()
            );
            return Outcome::Throttled;
        }

        if config.sound.enabled {
            self.sound.play(&config.sound.sound_file);
        }

        match resolve(title, &config.rewards) {
            Some(action) => {
                info!(
                    "MATCH FOUND: Binding '{}' -> '{}'. Triggering key press.",
                    title, action
                );
                Outcome::Dispatched(self.executor.execute(
                    &action,
                    &config.key_behavior,
                    &config.focus,
                ))
            }
            None => {
                if config.rewards.is_empty() {
                    warn!("No reward bindings configured. Use 'reward add' in the console.");
                }
                info!("NO KEY MATCH: Reward '{}' has no binding configured.", title);
                Outcome::Unbound
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, KeyBehavior};
    use crate::input::executor::tests::{Op, RecordingBackend};
    use crate::input::InputAction;
    use crate::twitch::messages::Reward;
    use rdev::Key;
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::time::Duration;

    fn redemption(title: &str) -> RedemptionEvent {
        RedemptionEvent {
            id: "redemption".to_string(),
            user_name: "viewer".to_string(),
            user_input: String::new(),
            reward: Reward {
                id: "reward".to_string(),
                title: title.to_string(),
                cost: 100,
            },
        }
    }

    fn setup(
        rewards: &[(&str, &str)],
        behavior: KeyBehavior,
    ) -> (Dispatcher, Arc<RecordingBackend>, SharedConfig, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::load_from(dir.path().join("config.toml")).unwrap();
        config.rewards = rewards
            .iter()
            .map(|(name, action)| (name.to_string(), action.to_string()))
            .collect::<BTreeMap<_, _>>();
        config.key_behavior = behavior;
        config.sound.enabled = false;
        let shared = SharedConfig::new(config);

        let backend = Arc::new(RecordingBackend::default());
        let dispatcher = Dispatcher::new(
            shared.clone(),
            ActionExecutor::new(backend.clone()),
            SoundPlayer::new(),
        );
        (dispatcher, backend, shared, dir)
    }

    fn behavior(hold: &[&str], single: &[&str], secs: f64) -> KeyBehavior {
        KeyBehavior {
            hold_duration_seconds: secs,
            hold_keys: hold.iter().map(|s| s.to_string()).collect(),
            single_press_keys: single.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_normalized_title_presses_once() {
        let (mut dispatcher, backend, _config, _dir) =
            setup(&[("Pet the Dog", "e")], behavior(&[], &["e"], 1.0));

        let outcome = dispatcher.handle(&redemption("pet the dog "));
        let Outcome::Dispatched(dispatched) = outcome else {
            panic!("expected a dispatched action");
        };
        assert!(matches!(dispatched, Dispatched::Press(_)));
        dispatched.join().await;

        let ops: Vec<Op> = backend.ops().into_iter().map(|(_, op)| op).collect();
        assert_eq!(
            ops,
            vec![
                Op::Down(InputAction::Key(Key::KeyE)),
                Op::Up(InputAction::Key(Key::KeyE)),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_hold_binding_timing() {
        let (mut dispatcher, backend, _config, _dir) =
            setup(&[("Run", "w")], behavior(&["w"], &[], 2.0));
        let start = Instant::now();

        let Outcome::Dispatched(dispatched) = dispatcher.handle(&redemption("Run")) else {
            panic!("expected a dispatched action");
        };
        assert!(matches!(dispatched, Dispatched::Hold(_)));

        // The key goes down as soon as the action task runs
        tokio::task::yield_now().await;
        let ops = backend.ops();
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0], (start, Op::Down(InputAction::Key(Key::KeyW))));

        dispatched.join().await;
        let ops = backend.ops();
        assert_eq!(ops[1].1, Op::Up(InputAction::Key(Key::KeyW)));
        assert!(ops[1].0 - start >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_duplicate_burst_is_throttled() {
        let (mut dispatcher, backend, _config, _dir) =
            setup(&[("Pet the Dog", "e")], behavior(&[], &["e"], 1.0));

        let first = dispatcher.handle(&redemption("Pet the Dog"));
        let second = dispatcher.handle(&redemption("PET THE DOG"));
        assert!(matches!(second, Outcome::Throttled));
        if let Outcome::Dispatched(d) = first {
            d.join().await;
        }
        assert_eq!(backend.ops().len(), 2);

        tokio::time::advance(Duration::from_millis(1100)).await;
        assert!(matches!(
            dispatcher.handle(&redemption("Pet the Dog")),
            Outcome::Dispatched(_)
        ));
    }

    #[tokio::test]
    async fn test_unbound_reward() {
        let (mut dispatcher, backend, _config, _dir) =
            setup(&[("Run", "w")], behavior(&["w"], &[], 1.0));

        assert!(matches!(
            dispatcher.handle(&redemption("Hydrate")),
            Outcome::Unbound
        ));
        assert!(backend.ops().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_console_edit_applies_to_next_event() {
        let (mut dispatcher, backend, config, _dir) =
            setup(&[], behavior(&[], &["e", "q"], 1.0));

        assert!(matches!(
            dispatcher.handle(&redemption("Jump")),
            Outcome::Unbound
        ));

        config.update(|c| c.bind_reward("Jump", "q")).unwrap();
        tokio::time::advance(Duration::from_secs(2)).await;

        let Outcome::Dispatched(dispatched) = dispatcher.handle(&redemption("Jump")) else {
            panic!("expected a dispatched action");
        };
        dispatched.join().await;
        assert_eq!(backend.ops()[0].1, Op::Down(InputAction::Key(Key::KeyQ)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_range_hold_uses_default() {
        let (mut dispatcher, backend, config, _dir) =
            setup(&[("Run", "w")], behavior(&["w"], &[], 1.0));
        config
            .update(|c| c.key_behavior.hold_duration_seconds = 1e20)
            .unwrap();
        let start = Instant::now();

        let Outcome::Dispatched(dispatched) = dispatcher.handle(&redemption("Run")) else {
            panic!("expected a dispatched action");
        };
        dispatched.join().await;

        let ops = backend.ops();
        assert_eq!(ops[1].1, Op::Up(InputAction::Key(Key::KeyW)));
        assert_eq!(ops[1].0 - start, Duration::from_secs(1));
    }
}
