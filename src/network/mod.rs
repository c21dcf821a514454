//! Network connection state, commissioning retries and the reachability
//! heartbeat.
//!
//! All transitions run on one actor task. Public calls, stack signals and
//! timer expiries are all messages on the same channel, so the state machine
//! has exactly one mutator. The current state is mirrored behind a mutex for
//! cheap reads from other tasks.

use std::{
    sync::{
        atomic::{AtomicU8, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use common::network::{JoinMode, NetworkState, NETWORK_NAMESPACE, NETWORK_STATE_KEY};
use log::{debug, error, info, warn};
use thiserror::Error;
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};

mod stack;
pub use stack::{NetworkSignals, NetworkStack, ProbeId, StackError};

use crate::{
    config::NetworkConfig,
    lock,
    store::{PersistentStore, StoreError},
};

pub type StateSubscriber = Box<dyn Fn(NetworkState) + Send + Sync>;
/// Called with `true` when the network asks the device to identify itself and
/// `false` when it should stop.
pub type IdentifySubscriber = Box<dyn Fn(bool) + Send + Sync>;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("network coordinator is not initialized")]
    NotInitialized,
    #[error("network coordinator is already initialized")]
    AlreadyInitialized,
    #[error("not allowed while {0}")]
    InvalidState(NetworkState),
    #[error("persistent store: {0}")]
    Store(#[from] StoreError),
    #[error("network coordinator stopped")]
    Stopped,
}

#[derive(Debug)]
pub(crate) enum Message {
    StartScan(oneshot::Sender<Result<(), NetworkError>>),
    Leave(oneshot::Sender<Result<(), NetworkError>>),
    JoinSucceeded,
    JoinFailed(String),
    ReachabilityReply(ProbeId),
    Identify(bool),
    Timer(TimerKind, u64),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TimerKind {
    Retry,
    Probe,
    ProbeTimeout,
    Leave,
}

struct Shared {
    // None until `initialize` succeeds
    state: Mutex<Option<NetworkState>>,
    attempts: AtomicU8,
    inbox: Mutex<Option<mpsc::UnboundedReceiver<Message>>>,
    identify: Mutex<Option<IdentifySubscriber>>,
}

#[derive(Clone)]
pub struct NetworkCoordinator {
    config: NetworkConfig,
    store: Arc<dyn PersistentStore>,
    stack: Arc<dyn NetworkStack>,
    shared: Arc<Shared>,
    tx: mpsc::UnboundedSender<Message>,
}

impl NetworkCoordinator {
    pub fn new(
        config: NetworkConfig,
        store: Arc<dyn PersistentStore>,
        stack: Arc<dyn NetworkStack>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            config,
            store,
            stack,
            shared: Arc::new(Shared {
                state: Mutex::new(None),
                attempts: AtomicU8::new(0),
                inbox: Mutex::new(Some(rx)),
                identify: Mutex::new(None),
            }),
            tx,
        }
    }

    /// Handle for the network stack to report join and probe results.
    pub fn signals(&self) -> NetworkSignals {
        NetworkSignals {
            tx: self.tx.clone(),
        }
    }

    /// Restore the persisted state, register `subscriber` and start the
    /// coordinator task. Must be called from within a tokio runtime.
    pub fn initialize(&self, subscriber: StateSubscriber) -> Result<NetworkState, NetworkError> {
        let mut inbox = lock(&self.shared.inbox);
        if inbox.is_none() {
            return Err(NetworkError::AlreadyInitialized);
        }

        let state = self.restore()?;
        *lock(&self.shared.state) = Some(state);
        info!("network: restored state {}", state);

        let rx = match inbox.take() {
            Some(rx) => rx,
            None => return Err(NetworkError::AlreadyInitialized),
        };

        let mut actor = Actor {
            config: self.config.clone(),
            store: self.store.clone(),
            stack: self.stack.clone(),
            shared: self.shared.clone(),
            subscriber,
            tx: self.tx.clone(),
            retry: TimerSlot::default(),
            probe: TimerSlot::default(),
            probe_timeout: TimerSlot::default(),
            leave: TimerSlot::default(),
            next_probe: 0,
            pending_probe: None,
        };

        if let Err(e) = self.stack.request_join(JoinMode::Initialization) {
            warn!("network: stack initialization request failed: {}", e);
        }
        if state == NetworkState::Connected {
            actor.probe.arm(TimerKind::Probe, self.config.probe_period(), &actor.tx);
        }

        tokio::spawn(actor.run(rx));
        Ok(state)
    }

    fn restore(&self) -> Result<NetworkState, StoreError> {
        let raw = match self.store.get_u8(NETWORK_NAMESPACE, NETWORK_STATE_KEY)? {
            Some(raw) => raw,
            None => {
                info!("network: no persisted state, initializing store");
                let raw = NetworkState::NotConnected.ordinal();
                self.store.set_u8(NETWORK_NAMESPACE, NETWORK_STATE_KEY, raw)?;
                self.store.commit()?;
                raw
            }
        };

        match NetworkState::from_ordinal(raw) {
            Some(state) if state.is_boot_state() => Ok(state),
            other => {
                warn!("network: persisted state {:?} ({}) is not a boot state", other, raw);
                let state = NetworkState::NotConnected;
                self.store
                    .set_u8(NETWORK_NAMESPACE, NETWORK_STATE_KEY, state.ordinal())?;
                self.store.commit()?;
                Ok(state)
            }
        }
    }

    /// Begin commissioning. Only allowed while `NotConnected`.
    pub async fn start_commissioning_scan(&self) -> Result<(), NetworkError> {
        self.request(Message::StartScan).await
    }

    /// Drop to `NotConnected` now and reset the radio after the leave delay.
    pub async fn leave_network(&self) -> Result<(), NetworkError> {
        self.request(Message::Leave).await
    }

    async fn request(
        &self,
        message: impl FnOnce(oneshot::Sender<Result<(), NetworkError>>) -> Message,
    ) -> Result<(), NetworkError> {
        if lock(&self.shared.state).is_none() {
            return Err(NetworkError::NotInitialized);
        }
        let (reply, response) = oneshot::channel();
        self.tx
            .send(message(reply))
            .map_err(|_| NetworkError::Stopped)?;
        response.await.map_err(|_| NetworkError::Stopped)?
    }

    /// Register the handler for identify requests coming from the network.
    /// Replaces any previous handler.
    pub fn on_identify(&self, subscriber: IdentifySubscriber) {
        *lock(&self.shared.identify) = Some(subscriber);
    }

    pub fn get_state(&self) -> NetworkState {
        lock(&self.shared.state).unwrap_or(NetworkState::Invalid)
    }

    /// Consecutive failed join attempts of the current scan.
    pub fn attempts(&self) -> u8 {
        self.shared.attempts.load(Ordering::SeqCst)
    }
}

/// A single pending one-shot timer. Re-arming replaces the previous one.
#[derive(Default)]
struct TimerSlot {
    handle: Option<JoinHandle<()>>,
    generation: u64,
}

impl TimerSlot {
    fn arm(&mut self, kind: TimerKind, delay: Duration, tx: &mpsc::UnboundedSender<Message>) {
        self.cancel();
        let generation = self.generation;
        let tx = tx.clone();
        self.handle = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = tx.send(Message::Timer(kind, generation));
        }));
    }

    fn cancel(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
        self.generation += 1;
    }

    /// Whether an expiry message belongs to the currently armed timer.
    fn fired(&mut self, generation: u64) -> bool {
        if self.handle.is_some() && generation == self.generation {
            self.handle = None;
            true
        } else {
            false
        }
    }

    fn is_armed(&self) -> bool {
        self.handle.is_some()
    }
}

struct Actor {
    config: NetworkConfig,
    store: Arc<dyn PersistentStore>,
    stack: Arc<dyn NetworkStack>,
    shared: Arc<Shared>,
    subscriber: StateSubscriber,
    tx: mpsc::UnboundedSender<Message>,
    retry: TimerSlot,
    probe: TimerSlot,
    probe_timeout: TimerSlot,
    leave: TimerSlot,
    next_probe: u32,
    pending_probe: Option<ProbeId>,
}

impl Actor {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Message>) {
        while let Some(message) = rx.recv().await {
            debug!("network: handling {:?}", message);
            match message {
                Message::StartScan(reply) => {
                    let _ = reply.send(self.start_scan());
                }
                Message::Leave(reply) => {
                    let _ = reply.send(self.leave());
                }
                Message::JoinSucceeded => self.join_succeeded(),
                Message::JoinFailed(reason) => self.join_failed(&reason),
                Message::ReachabilityReply(probe) => self.reachability_reply(probe),
                Message::Identify(on) => self.identify(on),
                Message::Timer(kind, generation) => self.timer_fired(kind, generation),
            }
        }
    }

    fn state(&self) -> NetworkState {
        lock(&self.shared.state).unwrap_or(NetworkState::Invalid)
    }

    fn attempts(&self) -> u8 {
        self.shared.attempts.load(Ordering::SeqCst)
    }

    fn set_attempts(&self, attempts: u8) {
        self.shared.attempts.store(attempts, Ordering::SeqCst);
    }

    /// Persist then publish `state`. On a store failure the previous state
    /// stays current.
    fn update_state(&mut self, state: NetworkState) -> Result<(), StoreError> {
        let current = self.state();
        if current == state {
            info!("network: state already {}", state);
            return Ok(());
        }

        let persisted = self
            .store
            .set_u8(NETWORK_NAMESPACE, NETWORK_STATE_KEY, state.ordinal())
            .and_then(|_| self.store.commit());
        if let Err(e) = persisted {
            error!("network: failed to persist {}: {}", state, e);
            return Err(e);
        }

        *lock(&self.shared.state) = Some(state);
        info!("network: state {} -> {}", current, state);

        (self.subscriber)(state);
        Ok(())
    }

    /// `update_state` with the attempt counter already set to `attempts` for
    /// the subscriber. The counter is restored if the state is not persisted.
    fn update_state_with_attempts(
        &mut self,
        state: NetworkState,
        attempts: u8,
    ) -> Result<(), StoreError> {
        let previous = self.attempts();
        self.set_attempts(attempts);
        let result = self.update_state(state);
        if result.is_err() {
            self.set_attempts(previous);
        }
        result
    }

    fn start_scan(&mut self) -> Result<(), NetworkError> {
        let state = self.state();
        if state != NetworkState::NotConnected {
            warn!("network: scan refused while {}", state);
            return Err(NetworkError::InvalidState(state));
        }

        self.update_state_with_attempts(NetworkState::Scanning, 0)?;
        self.steer();
        Ok(())
    }

    fn steer(&mut self) {
        info!("network: steering attempt {}", self.attempts());
        if let Err(e) = self.stack.request_join(JoinMode::NetworkSteering) {
            self.join_failed(&e.to_string());
        }
    }

    fn join_succeeded(&mut self) {
        if self.state() != NetworkState::Scanning {
            debug!("network: join success ignored while {}", self.state());
            return;
        }

        self.retry.cancel();
        if self
            .update_state_with_attempts(NetworkState::Connected, 0)
            .is_ok()
        {
            self.probe
                .arm(TimerKind::Probe, self.config.probe_period(), &self.tx);
        }
    }

    fn join_failed(&mut self, reason: &str) {
        if self.state() != NetworkState::Scanning {
            debug!("network: join failure ignored while {}", self.state());
            return;
        }

        let attempts = self.attempts();
        info!("network: steering failed ({})", reason);
        if attempts < self.config.steering_attempts.saturating_sub(1) {
            self.set_attempts(attempts + 1);
            self.retry
                .arm(TimerKind::Retry, self.config.retry_delay(), &self.tx);
        } else {
            warn!("network: giving up after {} attempts", attempts + 1);
            // A failed write leaves us in Scanning with no retry armed. The
            // next leave or reboot recovers.
            let _ = self.update_state_with_attempts(NetworkState::NotConnected, 0);
        }
    }

    fn probe_allowed(&self) -> bool {
        matches!(
            self.state(),
            NetworkState::Connected | NetworkState::NoParent
        )
    }

    fn send_probe(&mut self) {
        if !self.probe_allowed() {
            return;
        }

        let probe = ProbeId(self.next_probe);
        self.next_probe = self.next_probe.wrapping_add(1);
        self.pending_probe = Some(probe);
        debug!("network: sending reachability probe {}", probe);

        // A rejected request is treated like a missing reply
        if let Err(e) = self.stack.request_reachability(probe) {
            warn!("network: reachability request failed: {}", e);
        }
        self.probe_timeout
            .arm(TimerKind::ProbeTimeout, self.config.probe_timeout(), &self.tx);
    }

    fn reachability_reply(&mut self, probe: ProbeId) {
        if self.pending_probe != Some(probe) {
            debug!("network: stale reachability reply {}", probe);
            return;
        }
        self.pending_probe = None;
        self.probe_timeout.cancel();

        if self.state() == NetworkState::NoParent {
            info!("network: coordinator reachable again");
            let _ = self.update_state(NetworkState::Connected);
        }
        self.rearm_probe();
    }

    fn probe_timed_out(&mut self) {
        if let Some(probe) = self.pending_probe.take() {
            warn!("network: no reply to reachability probe {}", probe);
        }
        if self.state() == NetworkState::Connected {
            let _ = self.update_state(NetworkState::NoParent);
        }
        self.rearm_probe();
    }

    fn rearm_probe(&mut self) {
        if self.probe_allowed() {
            self.probe
                .arm(TimerKind::Probe, self.config.probe_period(), &self.tx);
        }
    }

    fn leave(&mut self) -> Result<(), NetworkError> {
        // Nothing changes unless NotConnected is persisted; the heartbeat and
        // any retry keep running for the state we are still in.
        self.update_state_with_attempts(NetworkState::NotConnected, 0)?;

        self.retry.cancel();
        self.probe.cancel();
        self.probe_timeout.cancel();
        self.pending_probe = None;

        if self.leave.is_armed() {
            info!("network: leave already pending, rescheduling");
        }
        self.leave
            .arm(TimerKind::Leave, self.config.leave_delay(), &self.tx);
        Ok(())
    }

    fn identify(&self, on: bool) {
        info!("network: identify {}", if on { "start" } else { "stop" });
        match &*lock(&self.shared.identify) {
            Some(subscriber) => subscriber(on),
            None => debug!("network: no identify handler registered"),
        }
    }

    fn timer_fired(&mut self, kind: TimerKind, generation: u64) {
        let slot = match kind {
            TimerKind::Retry => &mut self.retry,
            TimerKind::Probe => &mut self.probe,
            TimerKind::ProbeTimeout => &mut self.probe_timeout,
            TimerKind::Leave => &mut self.leave,
        };
        if !slot.fired(generation) {
            debug!("network: dropping superseded {:?} timer", kind);
            return;
        }

        match kind {
            TimerKind::Retry => {
                if self.state() == NetworkState::Scanning {
                    self.steer();
                }
            }
            TimerKind::Probe => self.send_probe(),
            TimerKind::ProbeTimeout => self.probe_timed_out(),
            TimerKind::Leave => {
                info!("network: leaving network and resetting stack");
                if let Err(e) = self.stack.request_leave_and_reset() {
                    error!("network: leave request failed: {}", e);
                }
            }
        }
    }
}
