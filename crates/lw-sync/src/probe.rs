//! Activation probe.
//!
//! The host cannot observe whether the platform actually runs the content
//! blocker extension. To find out it raises a flag in the shared settings
//! store and reloads the content blocker. An extension that is live sees
//! the flag, aborts, and fails the load with the activity-test sentinel.
//! Seeing that sentinel in the reload's error slot is the proof.
//!
//! ```text
//! Idle -> ProbeRequested -> ProbeInFlight -> Confirmed -> Idle
//!                                         \-> TimedOut  -> Idle
//! ```
//!
//! A check dropped before the extension answers (cancelled task, caller
//! timeout) lowers the flag and returns to `Idle` on the way out.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use lw_core::{ActivationState, ContentBlockerHost, HostError, Settings, StoreError};
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::config::ProbeConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProbePhase {
    Idle,
    ProbeRequested,
    ProbeInFlight,
    Confirmed,
    TimedOut,
}

impl ProbePhase {
    pub fn is_idle(&self) -> bool {
        *self == Self::Idle
    }
}

/// Why a probe did not confirm activation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProbeFailure {
    /// No answer within the probe timeout.
    #[error("No answer from the extension within {0:?}")]
    Elapsed(Duration),
    /// The reload succeeded: the extension built a ruleset instead of
    /// answering, so it never saw the flag.
    #[error("Reload succeeded without the extension answering the activity test")]
    NoSentinel,
    /// The reload failed with an ordinary platform error.
    #[error("Reload failed: {0}")]
    Host(HostError),
    /// The flag could not be raised.
    #[error("Failed to raise activity test flag: {0}")]
    Store(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckOutcome {
    /// The last confirmation is recent enough; nothing was probed.
    Fresh,
    /// Another probe is outstanding; this call did nothing.
    AlreadyRunning,
    /// The extension answered. `follow_up_reload` is the result of the
    /// non-probe reload that makes its ruleset effective again.
    Confirmed { follow_up_reload: Result<(), HostError> },
    /// Activation was not proven; `activated` is unchanged.
    TimedOut(ProbeFailure),
}

struct ProbeInner {
    config: ProbeConfig,
    settings: Settings,
    host: Arc<dyn ContentBlockerHost>,
    state: Mutex<ActivationState>,
    phase: watch::Sender<ProbePhase>,
    activation: watch::Sender<ActivationState>,
}

/// Owner of the [`ActivationState`].
#[derive(Clone)]
pub struct ActivationProbe {
    inner: Arc<ProbeInner>,
}

impl ActivationProbe {
    /// Load the persisted activation state. A probe that was in flight when
    /// the process died is abandoned and its flag lowered.
    pub fn new(
        config: ProbeConfig,
        settings: Settings,
        host: Arc<dyn ContentBlockerHost>,
    ) -> Result<Self, StoreError> {
        let mut state = settings.load_activation_state()?;
        if state.performing_activity_test {
            log::info!("Abandoning activity test interrupted by restart");
            state.performing_activity_test = false;
            settings.save_activation_state(&state)?;
            settings.set_activity_test_flag(false)?;
        }

        let (phase, _) = watch::channel(ProbePhase::Idle);
        let (activation, _) = watch::channel(state.clone());
        Ok(Self {
            inner: Arc::new(ProbeInner {
                config,
                settings,
                host,
                state: Mutex::new(state),
                phase,
                activation,
            }),
        })
    }

    pub fn phase(&self) -> ProbePhase {
        *self.inner.phase.borrow()
    }

    pub fn watch_phase(&self) -> watch::Receiver<ProbePhase> {
        self.inner.phase.subscribe()
    }

    pub fn state(&self) -> ActivationState {
        self.inner.state.lock().clone()
    }

    pub fn watch_state(&self) -> watch::Receiver<ActivationState> {
        self.inner.activation.subscribe()
    }

    pub fn is_activated(&self) -> bool {
        self.inner.state.lock().activated
    }

    /// Probe the extension unless a recent confirmation exists or a probe
    /// is already outstanding. Cancel-safe.
    pub async fn check_activation(&self) -> CheckOutcome {
        let inner = &self.inner;

        {
            let mut state = inner.state.lock();
            if !inner.phase.borrow().is_idle() {
                log::debug!("Activity test already running");
                return CheckOutcome::AlreadyRunning;
            }
            if state.is_fresh(inner.config.freshness, Utc::now()) {
                return CheckOutcome::Fresh;
            }
            inner.phase.send_replace(ProbePhase::ProbeRequested);
            state.performing_activity_test = true;
            inner.store_state(&state);
        }
        let outstanding = Outstanding::new(inner);

        if let Err(e) = inner.settings.set_activity_test_flag(true) {
            log::warn!("Failed to raise activity test flag: {}", e);
            outstanding.disarm();
            return inner.finish(ProbeFailure::Store(e.to_string()));
        }

        inner.phase.send_replace(ProbePhase::ProbeInFlight);
        log::debug!("Activity test reload issued");
        let identifier = inner.config.content_blocker_identifier.as_str();
        let answer = tokio::time::timeout(inner.config.timeout, inner.host.reload(identifier)).await;
        outstanding.disarm();

        // The extension lowers the flag when it answers; lower it here too in
        // case it never ran.
        if let Err(e) = inner.settings.set_activity_test_flag(false) {
            log::warn!("Failed to clear activity test flag: {}", e);
        }

        match answer {
            Ok(Err(e)) if e.is_activity_test_sentinel() => {
                inner.confirm();
                let follow_up_reload = inner.host.reload(identifier).await;
                if let Err(e) = &follow_up_reload {
                    log::warn!("Reload after activity test failed: {}", e);
                }
                CheckOutcome::Confirmed { follow_up_reload }
            }
            Ok(Err(e)) => inner.finish(ProbeFailure::Host(e)),
            Ok(Ok(())) => inner.finish(ProbeFailure::NoSentinel),
            Err(_) => inner.finish(ProbeFailure::Elapsed(inner.config.timeout)),
        }
    }
}

/// Rolls an unanswered probe back to `Idle` if the check is dropped
/// while it awaits the extension.
struct Outstanding<'a> {
    inner: &'a ProbeInner,
    armed: bool,
}

impl<'a> Outstanding<'a> {
    fn new(inner: &'a ProbeInner) -> Self {
        Self { inner, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for Outstanding<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.abandon();
        }
    }
}

impl ProbeInner {
    fn store_state(&self, state: &ActivationState) {
        if let Err(e) = self.settings.save_activation_state(state) {
            log::warn!("Failed to persist activation state: {}", e);
        }
        self.activation.send_replace(state.clone());
    }

    fn confirm(&self) {
        let mut state = self.state.lock();
        self.phase.send_replace(ProbePhase::Confirmed);
        state.activated = true;
        state.last_activity = Some(Utc::now());
        state.performing_activity_test = false;
        self.store_state(&state);
        self.phase.send_replace(ProbePhase::Idle);
        log::info!("Content blocker extension confirmed active");
    }

    fn abandon(&self) {
        if let Err(e) = self.settings.set_activity_test_flag(false) {
            log::warn!("Failed to clear activity test flag: {}", e);
        }
        let mut state = self.state.lock();
        state.performing_activity_test = false;
        self.store_state(&state);
        self.phase.send_replace(ProbePhase::Idle);
        log::info!("Activity test abandoned before the extension answered");
    }

    /// Leave `activated` alone: one unanswered probe proves nothing.
    fn finish(&self, reason: ProbeFailure) -> CheckOutcome {
        let mut state = self.state.lock();
        self.phase.send_replace(ProbePhase::TimedOut);
        state.performing_activity_test = false;
        self.store_state(&state);
        self.phase.send_replace(ProbePhase::Idle);
        log::info!("Activity test did not confirm activation: {:?}", reason);
        CheckOutcome::TimedOut(reason)
    }
}
