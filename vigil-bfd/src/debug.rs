//
// Copyright (c) The Vigil Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::path::Path;

use tracing::{debug, debug_span};
use vigil_utils::bfd::State;

// BFD debug messages.
#[derive(Debug)]
pub enum Debug<'a> {
    SessionCreate(&'a str),
    SessionDelete(&'a str),
    SessionMigrate(&'a str),
    FsmTransition(&'a str, State, State),
    DetectionTimeExpiry(&'a str),
    PollSequenceStart(&'a str),
    PollSequenceTerminate(&'a str),
    SocketReset(&'a str),
    ConfigReload,
    DiagnosticsDump(&'a Path),
}

// ===== impl Debug =====

impl Debug<'_> {
    // Log debug message using the tracing API.
    pub(crate) fn log(&self) {
        match self {
            Debug::SessionCreate(name)
            | Debug::SessionDelete(name)
            | Debug::SessionMigrate(name)
            | Debug::DetectionTimeExpiry(name)
            | Debug::PollSequenceStart(name)
            | Debug::PollSequenceTerminate(name)
            | Debug::SocketReset(name) => {
                debug_span!("session", %name).in_scope(|| {
                    debug!("{}", self);
                });
            }
            Debug::FsmTransition(name, old_state, new_state) => {
                debug_span!("session", %name).in_scope(|| {
                    debug!(?old_state, ?new_state, "{}", self);
                });
            }
            Debug::ConfigReload => {
                debug!("{}", self);
            }
            Debug::DiagnosticsDump(path) => {
                debug!(path = %path.display(), "{}", self);
            }
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Debug::SessionCreate(..) => {
                write!(f, "session created")
            }
            Debug::SessionDelete(..) => {
                write!(f, "session deleted")
            }
            Debug::SessionMigrate(..) => {
                write!(f, "session migrated across reload")
            }
            Debug::FsmTransition(..) => {
                write!(f, "state transition")
            }
            Debug::DetectionTimeExpiry(..) => {
                write!(f, "detection timer expired")
            }
            Debug::PollSequenceStart(..) => {
                write!(f, "poll sequence started")
            }
            Debug::PollSequenceTerminate(..) => {
                write!(f, "poll sequence terminated")
            }
            Debug::SocketReset(..) => {
                write!(f, "reopening egress socket after send error")
            }
            Debug::ConfigReload => {
                write!(f, "reloading configuration")
            }
            Debug::DiagnosticsDump(..) => {
                write!(f, "writing diagnostics dump")
            }
        }
    }
}
