use std::fmt;

use common::network::JoinMode;
use thiserror::Error;
use tokio::sync::mpsc;

use super::Message;

/// Tag tying a reachability reply to the request that caused it.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ProbeId(pub u32);

impl fmt::Display for ProbeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Error)]
pub enum StackError {
    #[error("network stack is busy")]
    Busy,
    #[error("network stack is not running")]
    NotRunning,
    #[error("network stack: {0}")]
    Other(String),
}

/// Commands the coordinator issues to the radio stack.
///
/// Every request is fire-and-forget. Outcomes come back later through
/// [`NetworkSignals`].
pub trait NetworkStack: Send + Sync {
    fn request_join(&self, mode: JoinMode) -> Result<(), StackError>;
    fn request_leave_and_reset(&self) -> Result<(), StackError>;
    fn request_reachability(&self, probe: ProbeId) -> Result<(), StackError>;
}

/// Handle the stack uses to report asynchronous results to the coordinator.
#[derive(Clone, Debug)]
pub struct NetworkSignals {
    pub(super) tx: mpsc::UnboundedSender<Message>,
}

impl NetworkSignals {
    pub fn join_succeeded(&self) {
        self.send(Message::JoinSucceeded);
    }

    pub fn join_failed(&self, reason: impl Into<String>) {
        self.send(Message::JoinFailed(reason.into()));
    }

    pub fn reachability_reply(&self, probe: ProbeId) {
        self.send(Message::ReachabilityReply(probe));
    }

    /// The network asked the device to start (`true`) or stop identifying.
    pub fn identify(&self, on: bool) {
        self.send(Message::Identify(on));
    }

    fn send(&self, message: Message) {
        if self.tx.send(message).is_err() {
            log::debug!("network: coordinator gone, dropping signal");
        }
    }
}
