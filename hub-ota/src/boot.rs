// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Per-boot bookkeeping that runs before the upgrade controller, and the
//! hand-off to the application after it.

use consts::{
    BASE_APP_ADDR, BKUP_BOOT_OK, BKUP_NUM_IWDG_RESET, BKUP_RESET_FLAGS, BOOT_APP_INIT_KEY, BOOT_INIT_KEY, BOOT_OK_KEY,
    BOOT_UPGRADE_IN_PROGRESS_KEY, BOOT_VERSION, SHARED_APP_OK_KEY,
};
use embedded_storage::Storage;

use crate::nvm::NvmError;
use crate::records::{BootField, Records, SharedField};
use crate::scratch::{ResetFlags, Scratch};
use crate::state::UpgradeFlags;

/// What the controller needs to know about how we got here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BootReport {
    /// The bookkeeping was blank and has just been initialised.
    pub first_run: bool,
    pub reset: ResetFlags,
    /// Consecutive watchdog resets, wherever they happened.
    pub iwdg_resets: u32,
}

/// Account for the reset that brought us here.
///
/// A watchdog reset counts against the application only if the bootloader had
/// already handed over to it, which is what `BKUP_BOOT_OK` records.
pub fn start<S: Storage, B: Scratch>(
    records: &mut Records<S>,
    mut scratch: B,
    reset: ResetFlags,
) -> Result<BootReport, NvmError> {
    scratch.write(BKUP_RESET_FLAGS, reset.bits());
    let app_was_running = scratch.read(BKUP_BOOT_OK) == BOOT_OK_KEY;
    scratch.write(BKUP_BOOT_OK, 0);

    let first_run = records.boot(BootField::InitKey)? != BOOT_INIT_KEY;
    if first_run {
        info!("blank boot records, initialising");
        for field in BootField::VOLATILE {
            records.set_boot(field, 0)?;
        }
        records.set_boot(BootField::InitKey, BOOT_INIT_KEY)?;
    }

    let mut iwdg_resets = 0;
    if reset.contains(ResetFlags::IWDG) {
        iwdg_resets = scratch.read(BKUP_NUM_IWDG_RESET).saturating_add(1);
        scratch.write(BKUP_NUM_IWDG_RESET, iwdg_resets);

        if app_was_running {
            let in_app = records.boot(BootField::AppNumIwdgReset)?.saturating_add(1);
            warn!("application watchdog reset #{}", in_app);
            records.set_boot(BootField::AppNumIwdgReset, in_app)?;
        } else {
            error!("watchdog reset inside the bootloader #{}", iwdg_resets);
        }

        if records.boot(BootField::UpgInProgress)? == BOOT_UPGRADE_IN_PROGRESS_KEY {
            let flags = records.boot(BootField::UpgFlags)? | UpgradeFlags::IWDG_RESET.bits();
            records.set_boot(BootField::UpgFlags, flags)?;
        }
    } else {
        scratch.write(BKUP_NUM_IWDG_RESET, 0);
        records.set_boot(BootField::AppNumIwdgReset, 0)?;
    }

    Ok(BootReport {
        first_run,
        reset,
        iwdg_resets,
    })
}

/// Prepare the application for the jump and arm watchdog accounting.
///
/// A freshly installed (or never configured) application gets its `AppInfo`
/// rebuilt from the identity in `BootInfo`.
pub fn finish<S: Storage, B: Scratch>(records: &mut Records<S>, mut scratch: B) -> Result<(), NvmError> {
    let setup = setup_app(records);
    scratch.write(BKUP_BOOT_OK, BOOT_OK_KEY);
    setup
}

fn setup_app<S: Storage>(records: &mut Records<S>) -> Result<(), NvmError> {
    records.set_shared(SharedField::BootVersion, BOOT_VERSION)?;
    if records.boot(BootField::AppInitKey)? == BOOT_APP_INIT_KEY {
        return Ok(());
    }

    info!("setting up application records");
    records.reset_app_info()?;
    records.set_boot(BootField::AppNumFailRuns, 0)?;
    records.set_boot(BootField::AppNumIwdgReset, 0)?;
    // Unless the application reports in, it is not trusted to request upgrades.
    if records.shared(SharedField::AppOkKey)? != SHARED_APP_OK_KEY {
        records.set_boot(BootField::AppOkKey, 0)?;
    }
    records.set_shared(SharedField::UpgPending, 0)?;
    records.set_boot(BootField::AppInitKey, BOOT_APP_INIT_KEY)
}

/// Address of the application vector table.
pub fn app_vector_table<S: Storage>(records: &mut Records<S>) -> u32 {
    match records.boot(BootField::Vtor) {
        Ok(vtor) if vtor != 0 => vtor,
        _ => BASE_APP_ADDR,
    }
}
