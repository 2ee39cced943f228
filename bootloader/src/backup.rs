// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! RTC backup registers and the reset cause latched in `RCC_CSR`.

use consts::NUM_BACKUP_REGISTERS;
use core::ptr::{read_volatile, write_volatile};
use hub_ota::scratch::{ResetFlags, Scratch};

const RCC_APB1ENR: *mut u32 = 0x4002_1038 as *mut u32;
const RCC_CSR: *mut u32 = 0x4002_1050 as *mut u32;
const PWR_CR: *mut u32 = 0x4000_7000 as *mut u32;
const RTC_BKP0R: u32 = 0x4000_2800 + 0x50;

const APB1ENR_PWREN: u32 = 1 << 28;
const PWR_CR_DBP: u32 = 1 << 8;
const CSR_RTCEN: u32 = 1 << 18;
const CSR_RTCSEL_MASK: u32 = 0b11 << 16;
const CSR_RTCSEL_LSI: u32 = 0b10 << 16;
const CSR_LSION: u32 = 1 << 0;
const CSR_LSIRDY: u32 = 1 << 1;
const CSR_RMVF: u32 = 1 << 23;

pub struct BackupRegisters {
    _private: (),
}

impl BackupRegisters {
    /// Open the backup domain for writing and make sure the RTC block is
    /// clocked. An RTC already running is left alone.
    pub fn new() -> Self {
        unsafe {
            write_volatile(RCC_APB1ENR, read_volatile(RCC_APB1ENR) | APB1ENR_PWREN);
            write_volatile(PWR_CR, read_volatile(PWR_CR) | PWR_CR_DBP);

            let csr = read_volatile(RCC_CSR);
            if csr & CSR_RTCEN == 0 {
                write_volatile(RCC_CSR, csr | CSR_LSION);
                while read_volatile(RCC_CSR) & CSR_LSIRDY == 0 {}
                let csr = read_volatile(RCC_CSR) & !CSR_RTCSEL_MASK;
                write_volatile(RCC_CSR, csr | CSR_RTCSEL_LSI | CSR_RTCEN);
            }
        }
        Self { _private: () }
    }

    fn register(index: usize) -> *mut u32 {
        debug_assert!(index < NUM_BACKUP_REGISTERS, "backup register {} out of range", index);
        (RTC_BKP0R + 4 * index.min(NUM_BACKUP_REGISTERS - 1) as u32) as *mut u32
    }
}

impl Scratch for BackupRegisters {
    fn read(&self, index: usize) -> u32 {
        unsafe { read_volatile(Self::register(index)) }
    }

    fn write(&mut self, index: usize, value: u32) {
        unsafe { write_volatile(Self::register(index), value) }
    }
}

/// Read and clear the reset cause.
pub fn take_reset_flags() -> ResetFlags {
    let csr = unsafe { read_volatile(RCC_CSR) };
    unsafe { write_volatile(RCC_CSR, csr | CSR_RMVF) };

    // LPWRRSTF..FWRSTF occupy bits 31 down to 24.
    let mut flags = ResetFlags::empty();
    for (bit, flag) in [
        (31, ResetFlags::LOW_POWER),
        (30, ResetFlags::WWDG),
        (29, ResetFlags::IWDG),
        (28, ResetFlags::SOFTWARE),
        (27, ResetFlags::POWER_ON),
        (26, ResetFlags::PIN),
        (25, ResetFlags::OPTION_BYTES),
        (24, ResetFlags::FIREWALL),
    ] {
        if csr & (1 << bit) != 0 {
            flags |= flag;
        }
    }
    flags
}
