// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Layout of the persistent records kept in the data EEPROM.
//!
//! * `BootInfo` belongs to the bootloader. It holds the device identity,
//!   written once at manufacture, and the upgrade bookkeeping.
//! * `AppInfo` belongs to the application. The bootloader only resets it
//!   after installing a new image.
//! * `SharedInfo` is the only channel between the two images.

use consts::{APP_INFO_OFFSET, BASE_APP_ADDR, BOOT_INFO_OFFSET, SHARED_INFO_OFFSET};
use embedded_storage::Storage;

use crate::nvm::{Nvm, NvmError};

pub const DEV_TYPE_LEN: usize = 8;
pub const AES_KEY_LEN: usize = 16;
/// 32 characters and a terminating zero.
pub const PWD_LEN: usize = 33;

/// Word fields of `BootInfo`, the discriminant is the byte offset in the record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum BootField {
    DevId = 0,
    Vtor = 12,
    InitKey = 68,
    UpgInProgress = 72,
    UpgNewAppInstalled = 76,
    UpgDone = 80,
    UpgState = 84,
    UpgFlags = 88,
    UpgVersionToDownload = 92,
    UpgNumRecoveryAttempts = 96,
    AppInitKey = 100,
    AppOkKey = 104,
    AppNumIwdgReset = 108,
    AppNumFailRuns = 112,
    AppVersion = 116,
    AppUpdateVersion = 120,
    AppPreviousVersion = 124,
    /// [`RecoveryTier`](crate::state::RecoveryTier) the open download belongs to.
    UpgRecoveryTier = 128,
}

const BOOT_DEV_TYPE: u32 = 4;
const BOOT_AES_KEY: u32 = 16;
const BOOT_PWD: u32 = 32;

impl BootField {
    /// Fields cleared on the very first boot of a device.
    pub const VOLATILE: [BootField; 16] = [
        BootField::UpgInProgress,
        BootField::UpgNewAppInstalled,
        BootField::UpgDone,
        BootField::UpgState,
        BootField::UpgFlags,
        BootField::UpgVersionToDownload,
        BootField::UpgNumRecoveryAttempts,
        BootField::AppInitKey,
        BootField::AppOkKey,
        BootField::AppNumIwdgReset,
        BootField::AppNumFailRuns,
        BootField::AppVersion,
        BootField::AppUpdateVersion,
        BootField::AppPreviousVersion,
        BootField::UpgRecoveryTier,
        BootField::InitKey,
    ];

    fn offset(self) -> u32 {
        BOOT_INFO_OFFSET + self as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum SharedField {
    BootVersion = 0,
    UpgPending = 4,
    UpgFlags = 8,
    AppOkKey = 12,
    AppCurrVersion = 16,
    AppNextVersion = 20,
}

impl SharedField {
    fn offset(self) -> u32 {
        SHARED_INFO_OFFSET + self as u32
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u32)]
pub enum AppField {
    InitKey = 0,
    DevId = 4,
    RegisteredKey = 8,
}

const APP_AES_KEY: u32 = 12;
const APP_PWD: u32 = 28;

impl AppField {
    fn offset(self) -> u32 {
        APP_INFO_OFFSET + self as u32
    }
}

/// Manufacture-time identity of the device.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Identity {
    pub dev_id: u32,
    pub dev_type: [u8; DEV_TYPE_LEN],
    pub aes_key: [u8; AES_KEY_LEN],
    pub pwd: [u8; PWD_LEN],
}

pub struct Records<S> {
    nvm: Nvm<S>,
}

impl<S: Storage> Records<S> {
    pub fn new(storage: S) -> Self {
        Self { nvm: Nvm::new(storage) }
    }

    pub fn boot(&mut self, field: BootField) -> Result<u32, NvmError> {
        self.nvm.read_word(field.offset())
    }

    pub fn set_boot(&mut self, field: BootField, value: u32) -> Result<(), NvmError> {
        self.nvm.write_word(field.offset(), value)
    }

    pub fn shared(&mut self, field: SharedField) -> Result<u32, NvmError> {
        self.nvm.read_word(field.offset())
    }

    pub fn set_shared(&mut self, field: SharedField, value: u32) -> Result<(), NvmError> {
        self.nvm.write_word(field.offset(), value)
    }

    pub fn app(&mut self, field: AppField) -> Result<u32, NvmError> {
        self.nvm.read_word(field.offset())
    }

    pub fn set_app(&mut self, field: AppField, value: u32) -> Result<(), NvmError> {
        self.nvm.write_word(field.offset(), value)
    }

    pub fn identity(&mut self) -> Result<Identity, NvmError> {
        let mut id = Identity {
            dev_id: self.boot(BootField::DevId)?,
            dev_type: [0; DEV_TYPE_LEN],
            aes_key: [0; AES_KEY_LEN],
            pwd: [0; PWD_LEN],
        };
        self.nvm.read_bytes(BOOT_INFO_OFFSET + BOOT_DEV_TYPE, &mut id.dev_type)?;
        self.nvm.read_bytes(BOOT_INFO_OFFSET + BOOT_AES_KEY, &mut id.aes_key)?;
        self.nvm.read_bytes(BOOT_INFO_OFFSET + BOOT_PWD, &mut id.pwd)?;
        Ok(id)
    }

    /// Write the identity into `BootInfo` and point the application vector
    /// table at the application region. Used when provisioning a device.
    pub fn provision(&mut self, id: &Identity) -> Result<(), NvmError> {
        self.set_boot(BootField::DevId, id.dev_id)?;
        self.nvm.write_bytes(BOOT_INFO_OFFSET + BOOT_DEV_TYPE, &id.dev_type)?;
        self.set_boot(BootField::Vtor, BASE_APP_ADDR)?;
        self.nvm.write_bytes(BOOT_INFO_OFFSET + BOOT_AES_KEY, &id.aes_key)?;
        self.nvm.write_bytes(BOOT_INFO_OFFSET + BOOT_PWD, &id.pwd)?;
        self.write_app_identity(id)
    }

    /// Copy the identity into `AppInfo` and mark the application as
    /// unconfigured so it runs its own first-run setup.
    pub fn reset_app_info(&mut self) -> Result<(), NvmError> {
        let id = self.identity()?;
        self.write_app_identity(&id)
    }

    fn write_app_identity(&mut self, id: &Identity) -> Result<(), NvmError> {
        self.set_app(AppField::InitKey, 0)?;
        self.set_app(AppField::DevId, id.dev_id)?;
        self.set_app(AppField::RegisteredKey, 0)?;
        self.nvm.write_bytes(APP_INFO_OFFSET + APP_AES_KEY, &id.aes_key)?;
        self.nvm.write_bytes(APP_INFO_OFFSET + APP_PWD, &id.pwd)
    }

    pub fn release(self) -> S {
        self.nvm.release()
    }

    #[cfg(test)]
    pub(crate) fn storage(&mut self) -> &mut S {
        self.nvm.storage()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MemEeprom;
    use consts::{APP_INFO_SIZE, BOOT_INFO_SIZE, SHARED_INFO_SIZE};

    fn identity() -> Identity {
        let mut pwd = [0u8; PWD_LEN];
        pwd[..6].copy_from_slice(b"hunter");
        Identity {
            dev_id: 4242,
            dev_type: *b"hub\0\0\0\0\0",
            aes_key: core::array::from_fn(|i| i as u8 + 1),
            pwd,
        }
    }

    #[test]
    fn fields_fit_their_records() {
        assert!(BootField::UpgRecoveryTier as u32 + 4 <= BOOT_INFO_SIZE);
        assert!(BOOT_PWD + PWD_LEN as u32 <= BootField::InitKey as u32);
        assert!(SharedField::AppNextVersion as u32 + 4 <= SHARED_INFO_SIZE);
        assert!(APP_PWD + PWD_LEN as u32 <= APP_INFO_SIZE);
    }

    #[test]
    fn records_do_not_overlap() {
        let mut records = Records::new(MemEeprom::new());
        records.provision(&identity()).unwrap();
        records.set_boot(BootField::AppPreviousVersion, 9).unwrap();
        records.set_shared(SharedField::AppNextVersion, 11).unwrap();
        records.set_app(AppField::RegisteredKey, 13).unwrap();

        assert_eq!(records.identity().unwrap(), identity());
        assert_eq!(records.boot(BootField::Vtor).unwrap(), BASE_APP_ADDR);
        assert_eq!(records.boot(BootField::AppPreviousVersion).unwrap(), 9);
        assert_eq!(records.shared(SharedField::AppNextVersion).unwrap(), 11);
        assert_eq!(records.app(AppField::RegisteredKey).unwrap(), 13);
    }

    #[test]
    fn app_info_reset_copies_identity() {
        let mut records = Records::new(MemEeprom::new());
        records.provision(&identity()).unwrap();
        records.set_app(AppField::InitKey, 0x55).unwrap();
        records.set_app(AppField::RegisteredKey, 1).unwrap();
        records.set_app(AppField::DevId, 1).unwrap();

        records.reset_app_info().unwrap();
        assert_eq!(records.app(AppField::InitKey).unwrap(), 0);
        assert_eq!(records.app(AppField::RegisteredKey).unwrap(), 0);
        assert_eq!(records.app(AppField::DevId).unwrap(), 4242);
    }
}
