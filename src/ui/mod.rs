use std::time::Duration;

use common::{led::LedPattern, network::NetworkState};
use log::{debug, info, warn};
use thiserror::Error;
use tokio::sync::mpsc::{
    self,
    error::{SendTimeoutError, TrySendError},
};

use crate::{config::UiConfig, led::LedController, network::NetworkCoordinator};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UiEvent {
    Boot,
    FactoryReset,
    StartIdentify,
    StopIdentify,
    NetworkStatus(NetworkState),
    ButtonShortPress,
    ButtonLongPress,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum UiError {
    #[error("ui queue is full")]
    QueueFull,
    #[error("ui queue is closed")]
    QueueClosed,
    #[error("timed out waiting for room in the ui queue")]
    Timeout,
}

/// Producer side of the UI queue. Cheap to clone.
#[derive(Clone, Debug)]
pub struct UiHandle {
    tx: mpsc::Sender<UiEvent>,
}

pub struct UiInbox {
    rx: mpsc::Receiver<UiEvent>,
}

impl UiInbox {
    pub fn try_recv(&mut self) -> Option<UiEvent> {
        self.rx.try_recv().ok()
    }
}

pub fn channel(capacity: usize) -> (UiHandle, UiInbox) {
    let (tx, rx) = mpsc::channel(capacity);
    (UiHandle { tx }, UiInbox { rx })
}

impl UiHandle {
    /// Queue `event`, waiting up to `wait` for room. A zero wait never
    /// suspends.
    pub async fn post(&self, event: UiEvent, wait: Duration) -> Result<(), UiError> {
        if wait.is_zero() {
            return self.try_post(event);
        }
        self.tx.send_timeout(event, wait).await.map_err(|e| match e {
            SendTimeoutError::Timeout(_) => UiError::Timeout,
            SendTimeoutError::Closed(_) => UiError::QueueClosed,
        })
    }

    pub fn try_post(&self, event: UiEvent) -> Result<(), UiError> {
        self.tx.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => UiError::QueueFull,
            TrySendError::Closed(_) => UiError::QueueClosed,
        })
    }
}

/// Single consumer of the UI queue.
pub struct UiRouter {
    inbox: UiInbox,
    receive_timeout: Duration,
    network: NetworkCoordinator,
    leds: LedController,
}

impl UiRouter {
    pub fn new(
        config: &UiConfig,
        inbox: UiInbox,
        network: NetworkCoordinator,
        leds: LedController,
    ) -> Self {
        Self {
            inbox,
            receive_timeout: config.receive_timeout(),
            network,
            leds,
        }
    }

    /// Drain events until every `UiHandle` is dropped.
    pub async fn run(mut self) {
        info!("ui: router started");
        self.network_status(self.network.get_state());

        loop {
            match tokio::time::timeout(self.receive_timeout, self.inbox.rx.recv()).await {
                Ok(Some(event)) => self.handle(event).await,
                Ok(None) => break,
                Err(_) => continue,
            }
        }
        info!("ui: queue closed, router stopping");
    }

    async fn handle(&mut self, event: UiEvent) {
        debug!("ui: {:?}", event);
        match event {
            UiEvent::Boot => self.start(LedPattern::Boot),
            UiEvent::FactoryReset => self.start(LedPattern::FactoryReset),
            UiEvent::StartIdentify => self.start(LedPattern::Identify),
            UiEvent::StopIdentify => self.stop(LedPattern::Identify),
            UiEvent::NetworkStatus(state) => self.network_status(state),
            UiEvent::ButtonShortPress => {
                let state = self.network.get_state();
                if state != NetworkState::NotConnected {
                    info!("ui: short press ignored while {}", state);
                    return;
                }
                if let Err(e) = self.network.start_commissioning_scan().await {
                    warn!("ui: could not start commissioning: {}", e);
                }
            }
            UiEvent::ButtonLongPress => {
                info!("ui: long press, leaving network");
                if let Err(e) = self.network.leave_network().await {
                    warn!("ui: leave failed: {}", e);
                }
                self.start(LedPattern::FactoryReset);
            }
        }
    }

    fn network_status(&self, state: NetworkState) {
        match state {
            NetworkState::Connected => {
                self.stop(LedPattern::NoCoordinator);
                self.stop(LedPattern::Scanning);
                self.start(LedPattern::Connected);
            }
            NetworkState::NoParent => {
                self.stop(LedPattern::Connected);
                self.stop(LedPattern::Scanning);
                self.start(LedPattern::NoCoordinator);
            }
            NetworkState::Scanning => {
                self.stop(LedPattern::Connected);
                self.stop(LedPattern::NoCoordinator);
                self.start(LedPattern::Scanning);
            }
            NetworkState::NotConnected | NetworkState::Leaving | NetworkState::Invalid => {
                self.start(LedPattern::NotConnected);
            }
        }
    }

    fn start(&self, pattern: LedPattern) {
        if let Err(e) = self.leds.start_pattern(pattern) {
            warn!("ui: {}", e);
        }
    }

    fn stop(&self, pattern: LedPattern) {
        if let Err(e) = self.leds.stop_pattern(pattern) {
            warn!("ui: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use common::{led::OutputId, network::JoinMode, sequence::SequenceDescriptor};

    use super::*;
    use crate::{
        config::{LedConfig, NetworkConfig},
        led::{Intent, IntentSet},
        network::{NetworkStack, ProbeId, StackError},
        sequencer::{self, LogOutput},
        store::MemoryStore,
    };

    struct NullStack;

    impl NetworkStack for NullStack {
        fn request_join(&self, _mode: JoinMode) -> Result<(), StackError> {
            Ok(())
        }

        fn request_leave_and_reset(&self) -> Result<(), StackError> {
            Ok(())
        }

        fn request_reachability(&self, _probe: ProbeId) -> Result<(), StackError> {
            Ok(())
        }
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    #[tokio::test]
    async fn test_post_to_full_queue() {
        let (handle, inbox) = channel(2);
        handle.try_post(UiEvent::Boot).unwrap();
        handle
            .post(UiEvent::StartIdentify, Duration::ZERO)
            .await
            .unwrap();

        assert_eq!(handle.try_post(UiEvent::StopIdentify), Err(UiError::QueueFull));
        assert_eq!(
            handle
                .post(UiEvent::StopIdentify, Duration::from_millis(10))
                .await,
            Err(UiError::Timeout)
        );

        drop(inbox);
        assert_eq!(handle.try_post(UiEvent::Boot), Err(UiError::QueueClosed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_router_drives_leds_and_network() {
        let network = NetworkCoordinator::new(
            NetworkConfig::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(NullStack),
        );
        let (handle, inbox) = channel(8);
        let subscriber = handle.clone();
        network
            .initialize(Box::new(move |state| {
                let _ = subscriber.try_post(UiEvent::NetworkStatus(state));
            }))
            .unwrap();

        let leds = LedController::init(
            &LedConfig::default(),
            sequencer::shared(Box::new(LogOutput::new())),
        );
        let router = UiRouter::new(&UiConfig::default(), inbox, network.clone(), leds.clone());
        let router = tokio::spawn(router.run());

        handle.try_post(UiEvent::ButtonShortPress).unwrap();
        settle().await;
        assert_eq!(network.get_state(), NetworkState::Scanning);
        assert_eq!(leds.flags(OutputId::Green), IntentSet::from(Intent::Scanning));

        // Pressing again while scanning does nothing
        handle.try_post(UiEvent::ButtonShortPress).unwrap();
        settle().await;
        assert_eq!(network.get_state(), NetworkState::Scanning);

        handle.try_post(UiEvent::NetworkStatus(NetworkState::NoParent)).unwrap();
        settle().await;
        assert_eq!(leds.flags(OutputId::Red), IntentSet::from(Intent::NoCoordinator));
        assert!(leds.flags(OutputId::Green).is_empty());

        handle.try_post(UiEvent::ButtonLongPress).unwrap();
        settle().await;
        assert_eq!(network.get_state(), NetworkState::NotConnected);
        assert_eq!(leds.exclusive_pattern(OutputId::Red), Some(LedPattern::FactoryReset));
        assert!(leds.flags(OutputId::Red).is_empty());
        assert_eq!(
            leds.active_descriptor(OutputId::Red),
            Some(SequenceDescriptor::FACTORY_RESET)
        );

        // The coordinator's subscriber still holds a handle
        router.abort();
    }
}
