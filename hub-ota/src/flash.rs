// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Verified erase and half-page programming of the application region.

use core::fmt;

use consts::{
    APP_END, BASE_APP_ADDR, FLASH_BASE, FLASH_ERASED_BYTE, FLASH_HALF_PAGE_SIZE, FLASH_HALF_PAGE_WORDS,
    FLASH_PAGE_SIZE,
};
use embedded_storage::nor_flash::{NorFlash, ReadNorFlash};

use crate::crc::{half_page_checksum, verify_half_page};

/// Hardware attempts per erase or program before giving up.
pub const FLASH_ATTEMPTS: usize = 3;

/// Marker for flash drivers whose erase and program routines execute from
/// RAM, outside the flash bank they modify.
///
/// # Safety
///
/// The implementor guarantees every instruction executed between unlocking
/// the flash controller and the end-of-operation flag is fetched from RAM,
/// and that this is checked when linking the final image.
pub unsafe trait RamResident {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum FlashError {
    /// Address is not page (erase) or half-page (program) aligned.
    InvalidAlignment,
    /// Address is outside the application region.
    OutOfBounds,
    Erase,
    Program,
    /// Read back does not match what was requested.
    Verify,
}

impl fmt::Display for FlashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FlashError::InvalidAlignment => f.write_str("address is not aligned"),
            FlashError::OutOfBounds => f.write_str("address is outside the application region"),
            FlashError::Erase => f.write_str("page erase failed"),
            FlashError::Program => f.write_str("half-page program failed"),
            FlashError::Verify => f.write_str("read back verification failed"),
        }
    }
}

/// Erases and programs the application region through a RAM-resident driver.
///
/// Addresses are absolute bus addresses. Every erase is checked to read back
/// as erased and every half-page is checked against its CRC-32, retrying up
/// to [`FLASH_ATTEMPTS`] times.
pub struct Programmer<F> {
    flash: F,
}

impl<F> Programmer<F>
where
    F: NorFlash + ReadNorFlash + RamResident,
{
    pub fn new(flash: F) -> Self {
        Self { flash }
    }

    pub fn erase_page(&mut self, address: u32) -> Result<(), FlashError> {
        if address % FLASH_PAGE_SIZE != 0 {
            return Err(FlashError::InvalidAlignment);
        }
        let offset = Self::offset(address, FLASH_PAGE_SIZE)?;

        let mut last = FlashError::Erase;
        for attempt in 0..FLASH_ATTEMPTS {
            match self.flash.erase(offset, offset + FLASH_PAGE_SIZE) {
                Ok(()) => match self.is_erased(offset) {
                    Ok(true) => return Ok(()),
                    Ok(false) | Err(_) => last = FlashError::Verify,
                },
                Err(_) => last = FlashError::Erase,
            }
            warn!("erase {=u32:x} attempt {} failed", address, attempt + 1);
        }
        error!("erase {=u32:x}: {}", address, last);
        Err(last)
    }

    /// Program one half-page. The page must have been erased beforehand.
    pub fn program_half_page(&mut self, address: u32, words: &[u32; FLASH_HALF_PAGE_WORDS]) -> Result<(), FlashError> {
        if address % FLASH_HALF_PAGE_SIZE != 0 {
            return Err(FlashError::InvalidAlignment);
        }
        let offset = Self::offset(address, FLASH_HALF_PAGE_SIZE)?;

        let mut bytes = [0u8; FLASH_HALF_PAGE_SIZE as usize];
        for (chunk, word) in bytes.chunks_exact_mut(4).zip(words) {
            chunk.copy_from_slice(&word.to_le_bytes());
        }
        let expected = half_page_checksum(words);

        let mut last = FlashError::Program;
        for attempt in 0..FLASH_ATTEMPTS {
            match self.flash.write(offset, &bytes) {
                Ok(()) => match self.read_half_page(offset) {
                    Ok(back) if verify_half_page(&back, expected) => return Ok(()),
                    _ => last = FlashError::Verify,
                },
                Err(_) => last = FlashError::Program,
            }
            warn!("program {=u32:x} attempt {} failed", address, attempt + 1);
        }
        error!("program {=u32:x}: {}", address, last);
        Err(last)
    }

    /// Raw read at an absolute address anywhere in the code flash.
    pub fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        let offset = address.checked_sub(FLASH_BASE).ok_or(FlashError::OutOfBounds)?;
        self.flash.read(offset, buf).map_err(|_| FlashError::OutOfBounds)
    }

    pub fn release(self) -> F {
        self.flash
    }

    #[cfg(test)]
    pub(crate) fn device(&mut self) -> &mut F {
        &mut self.flash
    }

    fn offset(address: u32, len: u32) -> Result<u32, FlashError> {
        match address.checked_add(len) {
            Some(end) if address >= BASE_APP_ADDR && end <= APP_END => Ok(address - FLASH_BASE),
            _ => Err(FlashError::OutOfBounds),
        }
    }

    fn is_erased(&mut self, offset: u32) -> Result<bool, F::Error> {
        let mut page = [0u8; FLASH_PAGE_SIZE as usize];
        self.flash.read(offset, &mut page)?;
        Ok(page.iter().all(|b| *b == FLASH_ERASED_BYTE))
    }

    fn read_half_page(&mut self, offset: u32) -> Result<[u32; FLASH_HALF_PAGE_WORDS], F::Error> {
        let mut bytes = [0u8; FLASH_HALF_PAGE_SIZE as usize];
        self.flash.read(offset, &mut bytes)?;
        let mut words = [0u32; FLASH_HALF_PAGE_WORDS];
        for (word, chunk) in words.iter_mut().zip(bytes.chunks_exact(4)) {
            *word = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        }
        Ok(words)
    }
}
