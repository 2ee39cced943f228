// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use core::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

/// Persisted state of the upgrade controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum UpgradeState {
    DoNothing = 0,
    Init = 1,
    DownloadBin = 2,
    CheckBin = 3,
    ProgramBin = 4,
    TestRunApp = 5,
    CheckAppOk = 6,
    Done = 7,
    Error = 8,
    RecoverPrevious = 9,
    RecoverBackup = 10,
    RecoveryFailed = 11,
    CheckCloud = 12,
}

impl UpgradeState {
    /// Decode a persisted value. Anything unknown is treated as a failure.
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => Self::DoNothing,
            1 => Self::Init,
            2 => Self::DownloadBin,
            3 => Self::CheckBin,
            4 => Self::ProgramBin,
            5 => Self::TestRunApp,
            6 => Self::CheckAppOk,
            7 => Self::Done,
            8 => Self::Error,
            9 => Self::RecoverPrevious,
            10 => Self::RecoverBackup,
            11 => Self::RecoveryFailed,
            12 => Self::CheckCloud,
            _ => Self::Error,
        }
    }

    /// States whose progress cannot be trusted after a reset: the binary in
    /// the modem is gone and the application flash may be half written.
    pub fn is_critical(self) -> bool {
        matches!(self, Self::DownloadBin | Self::CheckBin | Self::ProgramBin)
    }
}

impl fmt::Display for UpgradeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Which kind of download the controller is in. `Error` goes back to the
/// tier that failed, and tiers only ever escalate forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum RecoveryTier {
    /// The version the application asked for.
    Update = 0,
    Previous = 1,
    Backup = 2,
    /// A version offered by the cloud while recovery has failed.
    Cloud = 3,
}

impl RecoveryTier {
    /// Unknown values land on the last tier that still downloads.
    pub fn from_raw(raw: u32) -> Self {
        match raw {
            0 => Self::Update,
            1 => Self::Previous,
            2 => Self::Backup,
            3 => Self::Cloud,
            _ => Self::Backup,
        }
    }
}

bitflags! {
    /// Reasons the last upgrade attempt failed. Persisted and reported.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct UpgradeFlags: u32 {
        const DATA_ERROR = 1 << 0;
        const DOWNLOAD_ERROR = 1 << 1;
        const NO_BINARY = 1 << 2;
        const WRONG_SIZE = 1 << 3;
        const CRC_ERROR = 1 << 4;
        const PROG_ERROR = 1 << 5;
        const TEST_ERROR = 1 << 6;
        const IWDG_RESET = 1 << 7;
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for UpgradeFlags {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "UpgradeFlags({=u32:#x})", self.bits())
    }
}
