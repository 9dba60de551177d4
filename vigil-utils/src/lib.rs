//
// Copyright (c) The Vigil Project Contributors
//
// SPDX-License-Identifier: MIT
//

#![cfg_attr(
    feature = "testing",
    allow(dead_code, unused_variables, unused_imports)
)]

pub mod bfd;
pub mod bytes;
pub mod ip;
pub mod socket;
pub mod task;

// Useful type definitions.
pub type Sender<T> = tokio::sync::mpsc::Sender<T>;
pub type Receiver<T> = tokio::sync::mpsc::Receiver<T>;
pub type UnboundedSender<T> = tokio::sync::mpsc::UnboundedSender<T>;
pub type UnboundedReceiver<T> = tokio::sync::mpsc::UnboundedReceiver<T>;
