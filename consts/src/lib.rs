// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundation.xyz>
// SPDX-License-Identifier: GPL-3.0-or-later

#![no_std]

// Flash map

/// Start of the internal code flash.
pub const FLASH_BASE: u32 = 0x0800_0000;

/// End (exclusive) of the internal code flash, 64K parts.
pub const FLASH_END: u32 = 0x0801_0000;

/// Minimum flash erase unit in bytes.
pub const FLASH_PAGE_SIZE: u32 = 128;

/// Minimum flash programming unit in bytes.
pub const FLASH_HALF_PAGE_SIZE: u32 = FLASH_PAGE_SIZE / 2;

/// Number of 32-bit words in one half-page.
pub const FLASH_HALF_PAGE_WORDS: usize = (FLASH_HALF_PAGE_SIZE / 4) as usize;

/// Value an erased flash byte reads back as on this device family.
pub const FLASH_ERASED_BYTE: u8 = 0x00;

/// The bootloader occupies the first 32K of flash.
pub const BASE_BOOTLOADER_ADDR: u32 = FLASH_BASE;

/// Start of the single application region, also its vector table.
pub const BASE_APP_ADDR: u32 = 0x0800_8000;

/// End (exclusive) of the application region.
pub const APP_END: u32 = FLASH_END;

/// Size of the application region (256 pages).
pub const APP_SIZE: u32 = APP_END - BASE_APP_ADDR;

/// RAM available to the bootloader.
pub const RAM_BASE: u32 = 0x2000_0000;
pub const RAM_SIZE: u32 = 8 * 1024;

// Data EEPROM map

pub const EEPROM_BASE: u32 = 0x0808_0000;
pub const EEPROM_SIZE: u32 = 2048;

/// Offsets of each record, relative to [`EEPROM_BASE`].
pub const BOOT_INFO_OFFSET: u32 = 0;
pub const BOOT_INFO_SIZE: u32 = 256;
pub const APP_INFO_OFFSET: u32 = BOOT_INFO_OFFSET + BOOT_INFO_SIZE;
pub const APP_INFO_SIZE: u32 = 256;
pub const LOG_OFFSET: u32 = APP_INFO_OFFSET + APP_INFO_SIZE;
pub const LOG_SIZE: u32 = 1024;
pub const SHARED_INFO_OFFSET: u32 = LOG_OFFSET + LOG_SIZE;
pub const SHARED_INFO_SIZE: u32 = 64;

const _: () = assert!(SHARED_INFO_OFFSET + SHARED_INFO_SIZE <= EEPROM_SIZE);

// RTC backup registers

pub const NUM_BACKUP_REGISTERS: usize = 5;

pub const BKUP_BOOT_MAGIC_SKIP: usize = 0;
pub const BKUP_NUM_IWDG_RESET: usize = 1;
pub const BKUP_RESET_FLAGS: usize = 2;
pub const BKUP_BOOT_OK: usize = 3;
pub const BKUP_APP_STATE: usize = 4;

/// Written to [`BKUP_BOOT_OK`] right before jumping to the application.
pub const BOOT_OK_KEY: u32 = 0x12FE_C43A;

// Sentinels stored in the persistent records

pub const SHARED_UPGRADE_PENDING_KEY: u32 = 0x1234_FEDC;
pub const SHARED_APP_OK_KEY: u32 = 0x2468_FECA;

pub const BOOT_INIT_KEY: u32 = 0x1357_25AB;
pub const BOOT_APP_INIT_KEY: u32 = 0x26FE_D390;
pub const BOOT_APP_OK_KEY: u32 = 0xFDC3_78F2;
pub const BOOT_UPGRADE_IN_PROGRESS_KEY: u32 = 0xACD1_5FE6;
pub const BOOT_UPGRADE_NEW_APP_INSTALLED_KEY: u32 = 0xFDC3_78F2;
pub const BOOT_UPGRADE_DONE_KEY: u32 = 0xACD1_5FE6;

/// Version of this bootloader, published in SharedInfo.
pub const BOOT_VERSION: u32 = 3;

// Firmware image

/// Fixed header in front of every downloaded binary.
pub const IMAGE_HEADER_SIZE: u32 = 64;

/// Known-good image kept on the server for the last recovery tier.
pub const BACKUP_VERSION: u32 = 100;

// Upgrade policy

pub const DOWNLOAD_TIMEOUT_MS: u64 = 180_000;
pub const REPORT_TIMEOUT_MS: u64 = 60_000;
pub const CLOUD_CHECK_INTERVAL_MS: u64 = 60_000;
pub const BACKUP_RETRY_INTERVAL_MS: u64 = 600_000;
pub const MAX_RECOVERY_ATTEMPTS: u32 = 3;
pub const MAX_TEST_RUN_RETRIES: u32 = 1;
pub const IWDG_STORM_THRESHOLD: u32 = 3;
pub const IWDG_CRITICAL_THRESHOLD: u32 = 10;

/// Independent watchdog period used while the bootloader runs.
pub const IWDG_TIMEOUT_US: u32 = 10_000_000;

// Cloud

pub const CLOUD_BASE_URL: &str = "http://rickceas.azurewebsites.net/CE";
pub const CLOUD_APN: &str = "data.rewicom.net";
