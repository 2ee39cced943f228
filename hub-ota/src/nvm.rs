// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Byte-addressable persistent store holding the boot records.

use core::fmt;

use embedded_storage::Storage;

/// Write attempts before a word or byte is reported as failed.
pub const NVM_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NvmError {
    OutOfBounds,
    Write,
    Read,
    Verify,
}

impl fmt::Display for NvmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NvmError::OutOfBounds => f.write_str("offset is outside the store"),
            NvmError::Write => f.write_str("write failed"),
            NvmError::Read => f.write_str("read failed"),
            NvmError::Verify => f.write_str("read back does not match"),
        }
    }
}

/// Word and byte access with write-if-changed and read-back verification.
///
/// Offsets are relative to the start of the store. Words are little endian.
pub struct Nvm<S> {
    storage: S,
}

impl<S: Storage> Nvm<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    pub fn read_word(&mut self, offset: u32) -> Result<u32, NvmError> {
        let mut buf = [0u8; 4];
        self.read_bytes(offset, &mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    pub fn write_word(&mut self, offset: u32, value: u32) -> Result<(), NvmError> {
        self.write_bytes(offset, &value.to_le_bytes())
    }

    pub fn read_byte(&mut self, offset: u32) -> Result<u8, NvmError> {
        let mut buf = [0u8; 1];
        self.read_bytes(offset, &mut buf)?;
        Ok(buf[0])
    }

    pub fn write_byte(&mut self, offset: u32, value: u8) -> Result<(), NvmError> {
        self.write_bytes(offset, &[value])
    }

    pub fn read_bytes(&mut self, offset: u32, buf: &mut [u8]) -> Result<(), NvmError> {
        self.check_bounds(offset, buf.len())?;
        self.storage.read(offset, buf).map_err(|_| NvmError::Read)
    }

    /// Write `data` word by word, skipping words that already hold the value.
    pub fn write_bytes(&mut self, offset: u32, data: &[u8]) -> Result<(), NvmError> {
        self.check_bounds(offset, data.len())?;
        for (i, chunk) in data.chunks(4).enumerate() {
            self.write_chunk(offset + (i as u32) * 4, chunk)?;
        }
        Ok(())
    }

    pub fn release(self) -> S {
        self.storage
    }

    #[cfg(test)]
    pub(crate) fn storage(&mut self) -> &mut S {
        &mut self.storage
    }

    fn write_chunk(&mut self, offset: u32, chunk: &[u8]) -> Result<(), NvmError> {
        let mut current = [0u8; 4];
        let current = &mut current[..chunk.len()];
        let mut last = NvmError::Write;

        for _ in 0..NVM_ATTEMPTS {
            self.storage.read(offset, current).map_err(|_| NvmError::Read)?;
            if current == chunk {
                return Ok(());
            }
            last = match self.storage.write(offset, chunk) {
                Ok(()) => NvmError::Verify,
                Err(_) => NvmError::Write,
            };
        }

        // The final write of the loop has not been read back yet.
        self.storage.read(offset, current).map_err(|_| NvmError::Read)?;
        if current == chunk {
            return Ok(());
        }
        error!("nvm write at {=u32} failed: {}", offset, last);
        Err(last)
    }

    fn check_bounds(&self, offset: u32, len: usize) -> Result<(), NvmError> {
        match (offset as usize).checked_add(len) {
            Some(end) if end <= self.storage.capacity() => Ok(()),
            _ => Err(NvmError::OutOfBounds),
        }
    }
}
