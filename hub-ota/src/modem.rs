// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use crate::poll::{Millis, Poll};

/// Result of an HTTP request held in the modem's buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct HttpResponse {
    pub status: u16,
    /// Number of bytes held by the modem.
    pub size: u32,
}

impl HttpResponse {
    pub fn is_ok(&self) -> bool {
        self.status == 200
    }
}

/// Cellular modem as seen by the upgrade controller.
///
/// Every method is a polled operation. The modem keeps the progress of the
/// one operation in flight; calling a different operation abandons it.
pub trait Modem {
    /// Power the radio and wait for it to answer.
    fn power_up(&mut self, now: Millis) -> Poll<()>;

    /// Wait for network registration.
    fn register(&mut self, now: Millis) -> Poll<()>;

    /// Open the packet data bearer.
    fn open_bearer(&mut self, apn: &str, now: Millis) -> Poll<()>;

    /// Issue a GET and wait for the response header.
    fn http_get(&mut self, url: &str, now: Millis) -> Poll<HttpResponse>;

    /// Copy up to `buf.len()` bytes of the last response starting at `offset`.
    fn read_response(&mut self, offset: u32, buf: &mut [u8], now: Millis) -> Poll<usize>;

    /// Abandon whatever is in flight and release the HTTP session.
    fn close(&mut self);
}
