// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! In-memory copy of the upgrade bookkeeping held in `BootInfo`.

use consts::{BOOT_APP_OK_KEY, BOOT_UPGRADE_IN_PROGRESS_KEY, BOOT_UPGRADE_NEW_APP_INSTALLED_KEY};
use embedded_storage::Storage;

use crate::nvm::NvmError;
use crate::records::{BootField, Records};
use crate::state::{RecoveryTier, UpgradeFlags, UpgradeState};

/// Upgrade bookkeeping. Every change is written to `BootInfo` first and only
/// then reflected here, so the cache never runs ahead of what survives a reset.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct UpgradeContext {
    pub state: UpgradeState,
    pub flags: UpgradeFlags,
    pub in_progress: bool,
    pub new_app_installed: bool,
    pub version_to_download: u32,
    pub recovery_attempts: u32,
    pub recovery_tier: RecoveryTier,
    pub app_ok: bool,
    pub app_num_fail_runs: u32,
    pub app_num_iwdg_reset: u32,
    pub app_version: u32,
    pub app_update_version: u32,
    pub app_previous_version: u32,
}

impl UpgradeContext {
    pub fn load<S: Storage>(records: &mut Records<S>) -> Result<Self, NvmError> {
        Ok(Self {
            state: UpgradeState::from_raw(records.boot(BootField::UpgState)?),
            flags: UpgradeFlags::from_bits_truncate(records.boot(BootField::UpgFlags)?),
            in_progress: records.boot(BootField::UpgInProgress)? == BOOT_UPGRADE_IN_PROGRESS_KEY,
            new_app_installed: records.boot(BootField::UpgNewAppInstalled)? == BOOT_UPGRADE_NEW_APP_INSTALLED_KEY,
            version_to_download: records.boot(BootField::UpgVersionToDownload)?,
            recovery_attempts: records.boot(BootField::UpgNumRecoveryAttempts)?,
            recovery_tier: RecoveryTier::from_raw(records.boot(BootField::UpgRecoveryTier)?),
            app_ok: records.boot(BootField::AppOkKey)? == BOOT_APP_OK_KEY,
            app_num_fail_runs: records.boot(BootField::AppNumFailRuns)?,
            app_num_iwdg_reset: records.boot(BootField::AppNumIwdgReset)?,
            app_version: records.boot(BootField::AppVersion)?,
            app_update_version: records.boot(BootField::AppUpdateVersion)?,
            app_previous_version: records.boot(BootField::AppPreviousVersion)?,
        })
    }

    /// Persist `value` into `field`, then update the cache.
    pub fn commit<S: Storage>(&mut self, records: &mut Records<S>, field: BootField, value: u32) -> Result<(), NvmError> {
        records.set_boot(field, value)?;
        match field {
            BootField::UpgState => self.state = UpgradeState::from_raw(value),
            BootField::UpgFlags => self.flags = UpgradeFlags::from_bits_truncate(value),
            BootField::UpgInProgress => self.in_progress = value == BOOT_UPGRADE_IN_PROGRESS_KEY,
            BootField::UpgNewAppInstalled => self.new_app_installed = value == BOOT_UPGRADE_NEW_APP_INSTALLED_KEY,
            BootField::UpgVersionToDownload => self.version_to_download = value,
            BootField::UpgNumRecoveryAttempts => self.recovery_attempts = value,
            BootField::UpgRecoveryTier => self.recovery_tier = RecoveryTier::from_raw(value),
            BootField::AppOkKey => self.app_ok = value == BOOT_APP_OK_KEY,
            BootField::AppNumFailRuns => self.app_num_fail_runs = value,
            BootField::AppNumIwdgReset => self.app_num_iwdg_reset = value,
            BootField::AppVersion => self.app_version = value,
            BootField::AppUpdateVersion => self.app_update_version = value,
            BootField::AppPreviousVersion => self.app_previous_version = value,
            BootField::DevId | BootField::Vtor | BootField::InitKey | BootField::UpgDone | BootField::AppInitKey => {}
        }
        Ok(())
    }

    pub fn set_state<S: Storage>(&mut self, records: &mut Records<S>, state: UpgradeState) -> Result<(), NvmError> {
        if state != self.state {
            info!("upgrade state {} -> {}", self.state, state);
        }
        self.commit(records, BootField::UpgState, state as u32)
    }

    pub fn raise<S: Storage>(&mut self, records: &mut Records<S>, flags: UpgradeFlags) -> Result<(), NvmError> {
        warn!("upgrade flags raised {}", flags);
        let all = self.flags | flags;
        self.commit(records, BootField::UpgFlags, all.bits())
    }

    /// Raise `flags` and move to `Error`.
    pub fn fail<S: Storage>(&mut self, records: &mut Records<S>, flags: UpgradeFlags) -> Result<(), NvmError> {
        self.raise(records, flags)?;
        self.set_state(records, UpgradeState::Error)
    }

    pub fn set_in_progress<S: Storage>(&mut self, records: &mut Records<S>, open: bool) -> Result<(), NvmError> {
        let value = if open { BOOT_UPGRADE_IN_PROGRESS_KEY } else { 0 };
        self.commit(records, BootField::UpgInProgress, value)
    }

    pub fn set_app_ok<S: Storage>(&mut self, records: &mut Records<S>, ok: bool) -> Result<(), NvmError> {
        let value = if ok { BOOT_APP_OK_KEY } else { 0 };
        self.commit(records, BootField::AppOkKey, value)
    }

    pub fn set_new_app_installed<S: Storage>(&mut self, records: &mut Records<S>, installed: bool) -> Result<(), NvmError> {
        let value = if installed { BOOT_UPGRADE_NEW_APP_INSTALLED_KEY } else { 0 };
        self.commit(records, BootField::UpgNewAppInstalled, value)
    }

    /// Switch to `tier`, restarting the attempt count if it is a new one.
    pub fn enter_tier<S: Storage>(&mut self, records: &mut Records<S>, tier: RecoveryTier) -> Result<(), NvmError> {
        if self.recovery_tier == tier {
            return Ok(());
        }
        self.commit(records, BootField::UpgNumRecoveryAttempts, 0)?;
        self.commit(records, BootField::UpgRecoveryTier, tier as u32)
    }

    /// Count one more attempt at the current recovery tier.
    pub fn bump_recovery_attempts<S: Storage>(&mut self, records: &mut Records<S>) -> Result<u32, NvmError> {
        let attempts = self.recovery_attempts.saturating_add(1);
        self.commit(records, BootField::UpgNumRecoveryAttempts, attempts)?;
        Ok(attempts)
    }
}
