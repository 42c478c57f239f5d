//! Update stream service state
//!
//! Two states, `Disabled` and `Enabled`, starting `Disabled`. Transitions
//! happen under a single writer lock and are published through a watch
//! channel that every session subscribes to.

use std::fmt;
use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::{mpsc, watch};

use super::role::{NodeRole, RoleChange};
use crate::observability::{log_event_with_fields, Event};

/// Whether streaming is permitted on this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ServiceState {
    Disabled,
    Enabled,
}

impl ServiceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceState::Disabled => "Disabled",
            ServiceState::Enabled => "Enabled",
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Published state.
///
/// `epoch` counts `Disabled -> Enabled` transitions. A session remembers
/// the epoch it started in, so it is revoked even if it never observed a
/// short `Disabled` window between two enabled periods.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateSnapshot {
    pub state: ServiceState,
    pub epoch: u64,
}

impl StateSnapshot {
    /// Whether a session started at `epoch` may keep streaming.
    pub fn permits(&self, epoch: u64) -> bool {
        self.state == ServiceState::Enabled && self.epoch == epoch
    }
}

#[derive(Debug)]
struct ControlInner {
    role: Option<NodeRole>,
}

/// Controller of the service state.
#[derive(Debug)]
pub struct UpdateStreamControl {
    inner: Mutex<ControlInner>,
    state_tx: watch::Sender<StateSnapshot>,
}

impl Default for UpdateStreamControl {
    fn default() -> Self {
        Self::new()
    }
}

impl UpdateStreamControl {
    /// Creates a controller in the `Disabled` state.
    pub fn new() -> Self {
        let (state_tx, _) = watch::channel(StateSnapshot {
            state: ServiceState::Disabled,
            epoch: 0,
        });
        Self {
            inner: Mutex::new(ControlInner { role: None }),
            state_tx,
        }
    }

    /// Creates a controller and applies an initial role.
    pub fn with_role(role: NodeRole) -> Self {
        let control = Self::new();
        control.on_role_change(role);
        control
    }

    /// Applies a role-change notification.
    pub fn on_role_change(&self, role: NodeRole) -> ServiceState {
        let mut inner = self.lock();
        let previous = inner.role.replace(role);
        log_event_with_fields(
            Event::RoleChanged,
            &[
                ("from", previous.map(|r| r.as_str()).unwrap_or("none")),
                ("to", role.as_str()),
            ],
        );

        let target = if role.is_serving() {
            ServiceState::Enabled
        } else {
            ServiceState::Disabled
        };
        self.transition(&inner, target);
        target
    }

    /// Enables the service. Returns false if it was already enabled.
    pub fn enable(&self) -> bool {
        let inner = self.lock();
        self.transition(&inner, ServiceState::Enabled)
    }

    /// Disables the service. Returns false if it was already disabled.
    pub fn disable(&self) -> bool {
        let inner = self.lock();
        self.transition(&inner, ServiceState::Disabled)
    }

    /// Current state.
    pub fn current(&self) -> ServiceState {
        self.state_tx.borrow().state
    }

    /// Current state and epoch.
    pub fn snapshot(&self) -> StateSnapshot {
        *self.state_tx.borrow()
    }

    /// Last role applied, if any.
    pub fn role(&self) -> Option<NodeRole> {
        self.lock().role
    }

    /// Subscribes to state transitions.
    pub fn subscribe(&self) -> watch::Receiver<StateSnapshot> {
        self.state_tx.subscribe()
    }

    /// Applies role changes until the sender side is dropped.
    pub async fn follow_roles(&self, mut changes: mpsc::Receiver<RoleChange>) {
        while let Some(change) = changes.recv().await {
            self.on_role_change(change.role);
        }
    }

    // The guard proves the caller holds the writer lock
    fn transition(&self, _guard: &MutexGuard<'_, ControlInner>, target: ServiceState) -> bool {
        let current = *self.state_tx.borrow();
        if current.state == target {
            return false;
        }

        let next = StateSnapshot {
            state: target,
            epoch: match target {
                ServiceState::Enabled => current.epoch + 1,
                ServiceState::Disabled => current.epoch,
            },
        };
        self.state_tx.send_replace(next);

        let epoch = next.epoch.to_string();
        let event = match target {
            ServiceState::Enabled => Event::UpdateStreamEnabled,
            ServiceState::Disabled => Event::UpdateStreamDisabled,
        };
        log_event_with_fields(event, &[("epoch", epoch.as_str())]);
        true
    }

    fn lock(&self) -> MutexGuard<'_, ControlInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
