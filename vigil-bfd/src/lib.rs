//
// Copyright (c) The Vigil Project Contributors
//
// SPDX-License-Identifier: MIT
//

#![cfg_attr(
    feature = "testing",
    allow(dead_code, unused_variables, unused_imports)
)]

pub mod config;
pub mod debug;
pub mod dump;
pub mod error;
pub mod events;
pub mod master;
pub mod network;
pub mod notify;
pub mod packet;
pub mod session;
pub mod tasks;
