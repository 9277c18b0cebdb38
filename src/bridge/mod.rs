//! Session bridge.
//!
//! The background context owns the one [`Session`]. Pages and the popup only
//! see copies, handed out through the message protocol in [`protocol`]. All
//! mutation goes through [`SessionBridge::regenerate`] and
//! [`SessionBridge::save_profile`].
//!
//! ## Ordering
//!
//! Session creation and regeneration hold an async mutex, so concurrent first
//! readers all observe the same seed. While a regeneration runs, readers back
//! off per [`RetryPolicy`](crate::config::RetryPolicy) and give up with
//! [`ChameleonError::SessionBusy`]. Once `regenerate` returns, the old seed is
//! unreachable.
//!
//! ## Degraded mode
//!
//! If storage is unusable or the primary entropy source fails, the session is
//! kept in memory only (`persisted == false`) and is lost on restart.

pub mod protocol;
pub mod readiness;
pub mod session;
pub mod store;

pub use protocol::{Request, Response, SessionInfo};
pub use readiness::ProfileReadiness;
pub use session::{Session, StoredSession};
pub use store::{ChromeSessionStore, MemoryStore, SessionStore};

use std::cell::{Cell, RefCell};
use std::time::Duration;

use futures::channel::mpsc;
use futures::lock::Mutex;
use serde::Serialize;

use crate::coherence::{CoherenceEvaluator, CoherenceReport};
use crate::config::ChameleonConfig;
use crate::error::{ChameleonError, Result};
use crate::network::{NetworkProbe, NetworkSignal};
use crate::profile::{self, Profile};
use crate::runtime;
use crate::seed::{EntropyPath, Seed, SeedManager};

/// Broadcast to subscribers when the identity changes.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SessionEvent {
    /// Open pages still run the old identity and must reload.
    Regenerated { seed: Seed },
}

/// Holds `regenerating` up until dropped, including when the regenerate
/// future is abandoned mid-await.
struct BusyFlag<'a>(&'a Cell<bool>);

impl<'a> BusyFlag<'a> {
    fn raise(flag: &'a Cell<bool>) -> Self {
        flag.set(true);
        Self(flag)
    }
}

impl Drop for BusyFlag<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

pub struct SessionBridge<S: SessionStore, P: NetworkProbe> {
    store: S,
    probe: P,
    seeds: SeedManager,
    config: ChameleonConfig,
    evaluator: CoherenceEvaluator,
    state: RefCell<Option<Session>>,
    init_lock: Mutex<()>,
    regenerating: Cell<bool>,
    last_timestamp: Cell<u64>,
    readiness: ProfileReadiness,
    subscribers: RefCell<Vec<mpsc::UnboundedSender<SessionEvent>>>,
}

impl<S: SessionStore, P: NetworkProbe> SessionBridge<S, P> {
    pub fn new(store: S, probe: P, config: ChameleonConfig) -> Self {
        Self::with_seed_manager(store, probe, config, SeedManager::new())
    }

    pub fn with_seed_manager(store: S, probe: P, config: ChameleonConfig, seeds: SeedManager) -> Self {
        Self {
            store,
            probe,
            seeds,
            config,
            evaluator: CoherenceEvaluator::new(),
            state: RefCell::new(None),
            init_lock: Mutex::new(()),
            regenerating: Cell::new(false),
            last_timestamp: Cell::new(0),
            readiness: ProfileReadiness::new(),
            subscribers: RefCell::new(Vec::new()),
        }
    }

    pub fn config(&self) -> &ChameleonConfig {
        &self.config
    }

    /// Snapshot of the live session, if one exists.
    pub fn current(&self) -> Option<Session> {
        self.state.borrow().clone()
    }

    /// Adopt the stored session, or start a new one. Called on browser
    /// startup and service-worker activation.
    pub async fn restore(&self) -> Result<Session> {
        let _guard = self.init_lock.lock().await;
        if let Some(session) = self.current() {
            return Ok(session);
        }
        match self.adopt_stored().await {
            Some(session) => Ok(session),
            None => self.initialize().await,
        }
    }

    /// The current seed, creating the session on first use.
    pub async fn get_seed(&self) -> Result<Seed> {
        self.wait_until_settled().await?;
        Ok(self.ensure_session().await?.seed)
    }

    /// Discard the session and draw a new seed. Subscribers are told to
    /// reload their pages.
    pub async fn regenerate(&self) -> Result<Seed> {
        let _guard = self.init_lock.lock().await;
        let _busy = BusyFlag::raise(&self.regenerating);
        self.regenerate_locked().await
    }

    async fn regenerate_locked(&self) -> Result<Seed> {
        let previous = self.state.borrow_mut().take();
        if let Err(e) = self.store.clear().await {
            log::warn!("⚠️ Could not clear session storage: {}", e);
        }

        let session = self.initialize().await?;
        if let Some(previous) = previous {
            log::info!("🔄 Identity regenerated: {} -> {}", previous.seed.short(), session.seed.short());
        }
        self.publish(SessionEvent::Regenerated {
            seed: session.seed.clone(),
        });
        Ok(session.seed)
    }

    /// Record the profile a page synthesized. Only a profile derived from the
    /// current seed is accepted. Returns the write timestamp, which is
    /// strictly greater than every earlier one.
    pub async fn save_profile(&self, profile: Profile) -> Result<u64> {
        self.wait_until_settled().await?;
        let session = self.ensure_session().await?;
        if profile::synthesize(&session.seed)? != profile {
            log::warn!("⚠️ Rejected profile not derived from {}", session.seed.short());
            return Err(ChameleonError::StaleProfile);
        }

        let timestamp = self.next_timestamp();
        let mut persisted = session.persisted;
        if persisted {
            if let Err(e) = self.store.save_profile(&profile, timestamp).await {
                log::warn!("⚠️ Profile kept in memory only: {}", e);
                persisted = false;
            }
        }

        {
            let mut state = self.state.borrow_mut();
            match state.as_mut() {
                Some(current) if current.seed == session.seed => {
                    current.profile = Some(profile.clone());
                    current.last_updated = timestamp;
                    current.persisted = persisted;
                }
                // Regenerated while the write was in flight.
                _ => return Err(ChameleonError::StaleProfile),
            }
        }

        log::info!("💾 Profile saved: {}", profile.summary);
        self.readiness.notify(&profile);
        Ok(timestamp)
    }

    /// Seed, profile and timestamps of the session. Waits up to
    /// `profile_wait_ms` for a page to report the profile.
    pub async fn session_info(&self) -> Result<SessionInfo> {
        self.wait_until_settled().await?;
        let mut session = self.ensure_session().await?;

        if session.persisted {
            match self.store.load().await {
                Ok(stored) => self.merge_newer(&mut session, stored),
                Err(e) => log::debug!("Session info from memory: {}", e),
            }
        }

        if session.profile.is_none() {
            self.wait_for_profile(self.config.profile_wait()).await;
            if let Some(latest) = self.current() {
                session = latest;
            }
        }

        Ok(SessionInfo {
            seed: session.seed,
            profile: session.profile,
            session_start_time: session.start_time,
            timestamp: session.last_updated,
            persisted: session.persisted,
        })
    }

    /// Next profile a page reports, or `None` after `timeout`.
    pub async fn wait_for_profile(&self, timeout: Duration) -> Option<Profile> {
        self.readiness.wait(timeout).await
    }

    /// Probe the exit connection.
    pub async fn check_vpn(&self) -> Result<NetworkSignal> {
        self.probe.probe().await
    }

    /// Score the session profile against the live network signal.
    pub async fn evaluate_coherence(&self) -> Result<CoherenceReport> {
        self.wait_until_settled().await?;
        let session = self.ensure_session().await?;
        let profile = match session.profile {
            Some(profile) => profile,
            None => profile::synthesize(&session.seed)?,
        };
        let signal = self.probe.probe().await;
        Ok(self.evaluator.evaluate(&profile, &signal))
    }

    /// Stream of [`SessionEvent`]s from now on.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded();
        self.subscribers.borrow_mut().push(tx);
        rx
    }

    /// Dispatch one protocol request. Never fails; errors become replies.
    pub async fn handle(&self, request: Request) -> Response {
        log::debug!("Handling {}", request.action());
        match request {
            Request::GetSessionSeed => match self.get_seed().await {
                Ok(seed) => Response::Seed { seed },
                Err(e) => Response::error(&e),
            },
            Request::RegenerateIdentity => match self.regenerate().await {
                Ok(_) => Response::regenerated(),
                Err(e) => Response::failed(&e),
            },
            Request::GetSessionInfo => match self.session_info().await {
                Ok(info) => Response::SessionInfo(Box::new(info)),
                Err(e) => Response::error(&e),
            },
            Request::CheckVpn => match self.check_vpn().await {
                Ok(signal) => Response::Network(signal),
                Err(e) => {
                    log::warn!("⚠️ VPN check failed: {}", e);
                    Response::error(&e)
                }
            },
            Request::SaveProfile { profile } => match self.save_profile(*profile).await {
                Ok(timestamp) => Response::Saved {
                    success: true,
                    timestamp,
                },
                Err(e) => Response::failed(&e),
            },
            Request::CheckCoherence => match self.evaluate_coherence().await {
                Ok(report) => Response::Coherence(Box::new(report)),
                Err(e) => Response::error(&e),
            },
        }
    }

    /// Decode and dispatch a raw JSON message.
    pub async fn handle_json(&self, message: serde_json::Value) -> Response {
        match Request::parse(message) {
            Ok(request) => self.handle(request).await,
            Err(e) => {
                log::warn!("⚠️ Rejected message: {}", e);
                Response::error(&e)
            }
        }
    }

    async fn wait_until_settled(&self) -> Result<()> {
        let policy = &self.config.retry;
        let mut attempt = 0;
        while self.regenerating.get() {
            attempt += 1;
            if attempt > policy.max_attempts {
                return Err(ChameleonError::SessionBusy {
                    attempts: policy.max_attempts,
                });
            }
            log::debug!("Regeneration in progress, retry {} of {}", attempt, policy.max_attempts);
            runtime::sleep(policy.delay(attempt)).await;
        }
        Ok(())
    }

    async fn ensure_session(&self) -> Result<Session> {
        if let Some(session) = self.current() {
            return Ok(session);
        }
        let _guard = self.init_lock.lock().await;
        // Another reader may have created it while we waited.
        if let Some(session) = self.current() {
            return Ok(session);
        }
        match self.adopt_stored().await {
            Some(session) => Ok(session),
            None => self.initialize().await,
        }
    }

    /// Caller holds `init_lock`.
    async fn adopt_stored(&self) -> Option<Session> {
        let stored = match self.store.load().await {
            Ok(stored) => stored,
            Err(e) => {
                log::warn!("⚠️ Could not read session storage: {}", e);
                return None;
            }
        };
        let session = Session::from_stored(stored)?;
        self.last_timestamp
            .set(self.last_timestamp.get().max(session.last_updated));
        log::info!("♻️ Session restored: {}...", session.seed.short());
        *self.state.borrow_mut() = Some(session.clone());
        Some(session)
    }

    /// Caller holds `init_lock`.
    async fn initialize(&self) -> Result<Session> {
        let (seed, path) = self.seeds.generate_with_fallback()?;
        let mut session = Session::new(seed, self.next_timestamp());

        if path == EntropyPath::Primary {
            match self.store.save(&session.to_stored()).await {
                Ok(()) => session.persisted = true,
                Err(e) => log::warn!("⚠️ Session kept in memory only: {}", e),
            }
        } else {
            log::warn!("⚠️ Secondary entropy in use, session will not be persisted");
        }

        log::info!("🎭 New session: {}...", session.seed.short());
        *self.state.borrow_mut() = Some(session.clone());
        Ok(session)
    }

    fn merge_newer(&self, session: &mut Session, stored: StoredSession) {
        if stored.session_seed.as_ref() != Some(&session.seed) || stored.profile.is_none() {
            return;
        }
        let stored_at = stored.timestamp.unwrap_or(0);
        if session.profile.is_none() || stored_at > session.last_updated {
            session.profile = stored.profile;
            session.last_updated = stored_at;
            if let Some(current) = self.state.borrow_mut().as_mut() {
                if current.seed == session.seed {
                    current.profile = session.profile.clone();
                    current.last_updated = stored_at;
                }
            }
        }
    }

    fn next_timestamp(&self) -> u64 {
        let ts = runtime::now_ms().max(self.last_timestamp.get() + 1);
        self.last_timestamp.set(ts);
        ts
    }

    fn publish(&self, event: SessionEvent) {
        self.subscribers
            .borrow_mut()
            .retain(|tx| tx.unbounded_send(event.clone()).is_ok());
    }
}
