//
// Copyright (c) The Vigil Project Contributors
//
// SPDX-License-Identifier: MIT
//

use chrono::{DateTime, Utc};
use derive_new::new;
use num_derive::FromPrimitive;
use serde::{Deserialize, Serialize};

// BFD path type.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum PathType {
    IpSingleHop,
    IpMultihop,
}

// BFD session state.
#[derive(Clone, Copy, Debug, Eq, FromPrimitive, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum State {
    AdminDown = 0,
    Down = 1,
    Init = 2,
    Up = 3,
}

// BFD Diagnostic Codes.
//
// IANA registry:
// https://www.iana.org/assignments/bfd-parameters/bfd-parameters.xhtml#bfd-parameters-1
#[derive(Clone, Copy, Debug, Eq, FromPrimitive, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum DiagnosticCode {
    Nothing = 0,
    TimeExpired = 1,
    EchoFailed = 2,
    NbrDown = 3,
    FwdPlaneReset = 4,
    PathDown = 5,
    ConcatPathDown = 6,
    AdminDown = 7,
    RevConcatPathDown = 8,
    MisConnectivity = 9,
}

// Session state-transition notification delivered to consumer processes.
//
// The rendered form is a single line: session name, new state, diagnostic
// and the transition wallclock time in microseconds.
#[derive(Clone, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct SessionEvent {
    pub session: String,
    pub state: State,
    pub diag: DiagnosticCode,
    pub timestamp: DateTime<Utc>,
}

// ===== impl State =====

impl std::fmt::Display for State {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            State::AdminDown => write!(f, "admin-down"),
            State::Down => write!(f, "down"),
            State::Init => write!(f, "init"),
            State::Up => write!(f, "up"),
        }
    }
}

// ===== impl DiagnosticCode =====

impl std::fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiagnosticCode::Nothing => write!(f, "none"),
            DiagnosticCode::TimeExpired => {
                write!(f, "detection-time-expired")
            }
            DiagnosticCode::EchoFailed => write!(f, "echo-failed"),
            DiagnosticCode::NbrDown => write!(f, "neighbor-down"),
            DiagnosticCode::FwdPlaneReset => {
                write!(f, "forwarding-plane-reset")
            }
            DiagnosticCode::PathDown => write!(f, "path-down"),
            DiagnosticCode::ConcatPathDown => {
                write!(f, "concatenated-path-down")
            }
            DiagnosticCode::AdminDown => write!(f, "admin-down"),
            DiagnosticCode::RevConcatPathDown => {
                write!(f, "reverse-concatenated-path-down")
            }
            DiagnosticCode::MisConnectivity => write!(f, "mis-connectivity"),
        }
    }
}

// ===== impl SessionEvent =====

impl std::fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.session,
            self.state,
            self.diag,
            self.timestamp.timestamp_micros()
        )
    }
}
