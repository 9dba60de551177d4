//
// Copyright (c) The Vigil Project Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cell::RefCell;

use bytes::BytesMut;

thread_local!(
    // Reusable buffer for packet encoding.
    pub static TLS_BUF: RefCell<BytesMut> =
        RefCell::new(BytesMut::with_capacity(65536))
);
