// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Code flash driver. Erase and half-page programming run from RAM with
//! interrupts disabled, the CPU cannot fetch from the bank being modified.
//!
//! `build.rs` emits `ramfunc.x`, which fails the link unless both routines
//! below end up in RAM. The symbol names are shared with that script.

use consts::{FLASH_BASE, FLASH_END, FLASH_HALF_PAGE_SIZE, FLASH_HALF_PAGE_WORDS, FLASH_PAGE_SIZE, RAM_BASE, RAM_SIZE};
use core::ptr::{read_volatile, write_volatile};
use defmt::Format;
use embedded_storage::nor_flash::{ErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash};
use hub_ota::flash::RamResident;

const FLASH_REGS: u32 = 0x4002_2000;
pub(crate) const PECR: *mut u32 = (FLASH_REGS + 0x04) as *mut u32;
pub(crate) const PEKEYR: *mut u32 = (FLASH_REGS + 0x0C) as *mut u32;
const PRGKEYR: *mut u32 = (FLASH_REGS + 0x10) as *mut u32;
pub(crate) const SR: *mut u32 = (FLASH_REGS + 0x18) as *mut u32;

pub(crate) const PEKEY1: u32 = 0x89AB_CDEF;
pub(crate) const PEKEY2: u32 = 0x0203_0405;
const PRGKEY1: u32 = 0x8C9D_AEBF;
const PRGKEY2: u32 = 0x1314_1516;

pub(crate) const PECR_PELOCK: u32 = 1 << 0;
const PECR_PRGLOCK: u32 = 1 << 1;
const PECR_PROG: u32 = 1 << 3;
const PECR_ERASE: u32 = 1 << 9;
const PECR_FPRG: u32 = 1 << 10;

pub(crate) const SR_BSY: u32 = 1 << 0;
pub(crate) const SR_ERRORS: u32 = (1 << 8) | (1 << 9) | (1 << 10) | (1 << 11) | (1 << 13) | (1 << 16) | (1 << 17);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub enum Error {
    Unaligned,
    OutOfBounds,
    /// Routine linked at this address, outside RAM.
    NotInRam(u32),
    /// Error bits latched in `FLASH_SR`.
    Hardware(u32),
}

impl NorFlashError for Error {
    fn kind(&self) -> NorFlashErrorKind {
        match self {
            Error::Unaligned => NorFlashErrorKind::NotAligned,
            Error::OutOfBounds => NorFlashErrorKind::OutOfBounds,
            Error::NotInRam(_) | Error::Hardware(_) => NorFlashErrorKind::Other,
        }
    }
}

/// Wait for the end of the operation and collect its error bits.
#[inline(always)]
unsafe fn wait_idle() -> u32 {
    while read_volatile(SR) & SR_BSY != 0 {}
    let errors = read_volatile(SR) & SR_ERRORS;
    write_volatile(SR, errors);
    errors
}

#[no_mangle]
#[link_section = ".data.ramfunc"]
#[inline(never)]
unsafe fn erase_page_ram(address: u32) -> u32 {
    write_volatile(PECR, read_volatile(PECR) | PECR_ERASE | PECR_PROG);
    write_volatile(address as *mut u32, 0);
    let errors = wait_idle();
    write_volatile(PECR, read_volatile(PECR) & !(PECR_ERASE | PECR_PROG));
    errors
}

#[no_mangle]
#[link_section = ".data.ramfunc"]
#[inline(never)]
unsafe fn program_half_page_ram(address: u32, words: *const u32) -> u32 {
    write_volatile(PECR, read_volatile(PECR) | PECR_FPRG | PECR_PROG);
    let mut i = 0;
    while i < FLASH_HALF_PAGE_WORDS {
        write_volatile((address as *mut u32).add(i), read_volatile(words.add(i)));
        i += 1;
    }
    let errors = wait_idle();
    write_volatile(PECR, read_volatile(PECR) & !(PECR_FPRG | PECR_PROG));
    errors
}

/// Whole code flash, offsets relative to [`FLASH_BASE`].
pub struct RamFlash {
    _private: (),
}

impl RamFlash {
    /// Refuses to hand out the driver if a routine is not running from RAM.
    pub fn new() -> Result<Self, Error> {
        for routine in [erase_page_ram as usize as u32, program_half_page_ram as usize as u32] {
            if !(RAM_BASE..RAM_BASE + RAM_SIZE).contains(&routine) {
                return Err(Error::NotInRam(routine));
            }
        }
        Ok(Self { _private: () })
    }

    fn unlocked<R>(f: impl FnOnce() -> R) -> R {
        critical_section::with(|_| unsafe {
            write_volatile(PEKEYR, PEKEY1);
            write_volatile(PEKEYR, PEKEY2);
            write_volatile(PRGKEYR, PRGKEY1);
            write_volatile(PRGKEYR, PRGKEY2);
            let res = f();
            write_volatile(PECR, read_volatile(PECR) | PECR_PRGLOCK | PECR_PELOCK);
            res
        })
    }

    fn check(offset: u32, len: usize) -> Result<u32, Error> {
        let address = FLASH_BASE + offset;
        match address.checked_add(len as u32) {
            Some(end) if end <= FLASH_END => Ok(address),
            _ => Err(Error::OutOfBounds),
        }
    }
}

impl ErrorType for RamFlash {
    type Error = Error;
}

impl ReadNorFlash for RamFlash {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        let address = Self::check(offset, bytes.len())?;
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = unsafe { read_volatile((address as *const u8).add(i)) };
        }
        Ok(())
    }

    fn capacity(&self) -> usize {
        (FLASH_END - FLASH_BASE) as usize
    }
}

impl NorFlash for RamFlash {
    const WRITE_SIZE: usize = FLASH_HALF_PAGE_SIZE as usize;
    const ERASE_SIZE: usize = FLASH_PAGE_SIZE as usize;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        if from % FLASH_PAGE_SIZE != 0 || to % FLASH_PAGE_SIZE != 0 || to < from {
            return Err(Error::Unaligned);
        }
        let start = Self::check(from, (to - from) as usize)?;
        for page in (start..start + (to - from)).step_by(FLASH_PAGE_SIZE as usize) {
            let errors = Self::unlocked(|| unsafe { erase_page_ram(page) });
            if errors != 0 {
                return Err(Error::Hardware(errors));
            }
        }
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        if offset % FLASH_HALF_PAGE_SIZE != 0 || bytes.len() % FLASH_HALF_PAGE_SIZE as usize != 0 {
            return Err(Error::Unaligned);
        }
        let start = Self::check(offset, bytes.len())?;
        for (i, half) in bytes.chunks_exact(FLASH_HALF_PAGE_SIZE as usize).enumerate() {
            let mut words = [0u32; FLASH_HALF_PAGE_WORDS];
            for (word, b) in words.iter_mut().zip(half.chunks_exact(4)) {
                *word = u32::from_le_bytes([b[0], b[1], b[2], b[3]]);
            }
            let address = start + i as u32 * FLASH_HALF_PAGE_SIZE;
            let errors = Self::unlocked(|| unsafe { program_half_page_ram(address, words.as_ptr()) });
            if errors != 0 {
                return Err(Error::Hardware(errors));
            }
        }
        Ok(())
    }
}

// SAFETY: erase and program sequences are in `.data.ramfunc`, which the
// runtime copies to RAM with `.data`, and run with interrupts disabled.
// `ramfunc.x` checks the placement at link time and `new` again at run time.
unsafe impl RamResident for RamFlash {}
