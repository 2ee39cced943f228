// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Failure report sent upstream when an upgrade attempt fails.

use core::fmt::{self, Write};

use serde::{Deserialize, Serialize};

use crate::context::UpgradeContext;
use crate::net::Url;
use crate::state::UpgradeState;

/// Largest encoded report, a postcard varint is at most 5 bytes per `u32`.
pub const REPORT_MAX_LEN: usize = 40;

#[derive(Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ReportError {
    Encode(postcard::Error),
    UrlTooLong,
}

impl fmt::Display for ReportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportError::Encode(e) => write!(f, "encoding failed: {e}"),
            ReportError::UrlTooLong => f.write_str("report does not fit in the URL"),
        }
    }
}

impl From<postcard::Error> for ReportError {
    fn from(e: postcard::Error) -> Self {
        ReportError::Encode(e)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpgradeReport {
    pub dev_id: u32,
    pub state: UpgradeState,
    pub flags: u32,
    pub version_to_download: u32,
    pub app_version: u32,
    pub app_previous_version: u32,
    pub recovery_attempts: u32,
}

impl UpgradeReport {
    pub fn new(dev_id: u32, ctx: &UpgradeContext) -> Self {
        Self {
            dev_id,
            state: ctx.state,
            flags: ctx.flags.bits(),
            version_to_download: ctx.version_to_download,
            app_version: ctx.app_version,
            app_previous_version: ctx.app_previous_version,
            recovery_attempts: ctx.recovery_attempts,
        }
    }

    /// Append the report to `url` as lowercase hex.
    pub fn append_to(&self, url: &mut Url) -> Result<(), ReportError> {
        let mut buf = [0u8; REPORT_MAX_LEN];
        let bytes = postcard::to_slice(self, &mut buf)?;
        for b in bytes.iter() {
            write!(url, "{b:02x}").map_err(|_| ReportError::UrlTooLong)?;
        }
        Ok(())
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, ReportError> {
        Ok(postcard::from_bytes(bytes)?)
    }
}
