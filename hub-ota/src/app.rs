// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! The application's side of the contract with the bootloader.
//!
//! The application never touches `BootInfo`. It requests upgrades and proves
//! it is alive through `SharedInfo`, then resets into the bootloader.

use consts::{BKUP_APP_STATE, SHARED_APP_OK_KEY, SHARED_UPGRADE_PENDING_KEY};
use embedded_storage::Storage;

use crate::nvm::NvmError;
use crate::records::{Records, SharedField};
use crate::scratch::Scratch;
use crate::state::UpgradeFlags;

/// Ask the bootloader to install `version` on the next reset.
pub fn request_upgrade<S: Storage>(records: &mut Records<S>, version: u32) -> Result<(), NvmError> {
    records.set_shared(SharedField::AppNextVersion, version)?;
    records.set_shared(SharedField::UpgPending, SHARED_UPGRADE_PENDING_KEY)
}

/// Tell the bootloader the running application works.
pub fn report_alive<S: Storage>(records: &mut Records<S>, version: u32) -> Result<(), NvmError> {
    records.set_shared(SharedField::AppCurrVersion, version)?;
    records.set_shared(SharedField::AppOkKey, SHARED_APP_OK_KEY)
}

/// Outcome of the last upgrade attempt, empty if it went through cleanly.
pub fn upgrade_flags<S: Storage>(records: &mut Records<S>) -> Result<UpgradeFlags, NvmError> {
    Ok(UpgradeFlags::from_bits_truncate(records.shared(SharedField::UpgFlags)?))
}

pub fn boot_version<S: Storage>(records: &mut Records<S>) -> Result<u32, NvmError> {
    records.shared(SharedField::BootVersion)
}

/// Application word in the scratch registers, kept across resets.
pub fn set_app_state<B: Scratch>(mut scratch: B, value: u32) {
    scratch.write(BKUP_APP_STATE, value);
}

pub fn app_state<B: Scratch>(scratch: B) -> u32 {
    scratch.read(BKUP_APP_STATE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FakeScratch, MemEeprom};

    #[test]
    fn request_sets_version_before_the_key() {
        let mut records = Records::new(MemEeprom::new());
        request_upgrade(&mut records, 6).unwrap();
        assert_eq!(records.shared(SharedField::AppNextVersion).unwrap(), 6);
        assert_eq!(records.shared(SharedField::UpgPending).unwrap(), SHARED_UPGRADE_PENDING_KEY);
    }

    #[test]
    fn failed_request_is_not_pending() {
        let mut eeprom = MemEeprom::new();
        eeprom.fail_writes = usize::MAX;
        let mut records = Records::new(eeprom);
        assert!(request_upgrade(&mut records, 6).is_err());

        let mut records = Records::new(MemEeprom {
            fail_writes: 0,
            ..records.release()
        });
        assert_eq!(records.shared(SharedField::UpgPending).unwrap(), 0);
    }

    #[test]
    fn alive_report() {
        let mut records = Records::new(MemEeprom::new());
        report_alive(&mut records, 4).unwrap();
        assert_eq!(records.shared(SharedField::AppCurrVersion).unwrap(), 4);
        assert_eq!(records.shared(SharedField::AppOkKey).unwrap(), SHARED_APP_OK_KEY);
        assert_eq!(upgrade_flags(&mut records).unwrap(), UpgradeFlags::empty());
    }

    #[test]
    fn app_state_survives_in_scratch() {
        let mut scratch = FakeScratch::default();
        set_app_state(&mut scratch, 0xBEEF);
        assert_eq!(app_state(&mut scratch), 0xBEEF);
    }
}
