//
// Copyright (c) The Vigil Project Contributors
//
// SPDX-License-Identifier: MIT
//

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use vigil_utils::bfd::{DiagnosticCode, SessionEvent, State};
use vigil_utils::{UnboundedReceiver, UnboundedSender};

use crate::config::SessionCfg;

// Consumer processes interested in session state transitions.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum ConsumerKind {
    Vrrp,
    Checker,
}

#[derive(Debug)]
struct Subscriber {
    kind: ConsumerKind,
    tx: UnboundedSender<SessionEvent>,
}

// Fan-out point for session state transitions.
//
// The engine is agnostic to the subscriber identities; each one is just a
// channel handle registered by the surrounding daemon.
#[derive(Debug, Default)]
pub struct Notifier {
    subscribers: Vec<Subscriber>,
}

// ===== impl Notifier =====

impl Notifier {
    // Registers a new subscriber of the given consumer kind.
    pub fn register(
        &mut self,
        kind: ConsumerKind,
    ) -> UnboundedReceiver<SessionEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.push(Subscriber { kind, tx });
        rx
    }

    // Delivers a state transition to all interested subscribers.
    //
    // Events are emitted from the main task only, so every subscriber
    // observes the transitions of any given session in the order they
    // happened.
    pub(crate) fn notify(
        &self,
        config: &SessionCfg,
        state: State,
        diag: DiagnosticCode,
    ) {
        if self.subscribers.is_empty() {
            return;
        }

        let event =
            SessionEvent::new(config.name.clone(), state, diag, Utc::now());
        for subscriber in &self.subscribers {
            let subscribed = match subscriber.kind {
                ConsumerKind::Vrrp => config.notify_vrrp,
                ConsumerKind::Checker => config.notify_checker,
            };
            if subscribed {
                let _ = subscriber.tx.send(event.clone());
            }
        }
    }
}

// ===== impl ConsumerKind =====

impl std::fmt::Display for ConsumerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConsumerKind::Vrrp => write!(f, "vrrp"),
            ConsumerKind::Checker => write!(f, "checker"),
        }
    }
}
