// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! In-memory copy of the data EEPROM, rendered as Intel HEX.

use consts::{APP_INFO_OFFSET, APP_INFO_SIZE, BOOT_INFO_OFFSET, EEPROM_BASE, EEPROM_SIZE};
use embedded_storage::{ReadStorage, Storage};

/// Bytes per data record.
const RECORD_LEN: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfBounds;

/// Erased EEPROM, every byte reads as zero.
pub struct EepromImage {
    bytes: Vec<u8>,
}

impl EepromImage {
    pub fn new() -> Self {
        Self {
            bytes: vec![0; EEPROM_SIZE as usize],
        }
    }

    /// Load an image from Intel HEX. Records outside the EEPROM are ignored.
    pub fn from_ihex(data: &str) -> Result<Self, ihex::ReaderError> {
        let mut image = Self::new();
        let mut upper_address = 0u32;
        for record in ihex::Reader::new(data) {
            match record? {
                ihex::Record::ExtendedLinearAddress(addr) => upper_address = (addr as u32) << 16,
                ihex::Record::ExtendedSegmentAddress(addr) => upper_address = (addr as u32) << 4,
                ihex::Record::Data { offset, value } => {
                    let address = upper_address + offset as u32;
                    for (i, byte) in value.into_iter().enumerate() {
                        let Some(offset) = (address + i as u32).checked_sub(EEPROM_BASE) else {
                            continue;
                        };
                        if let Some(cell) = image.bytes.get_mut(offset as usize) {
                            *cell = byte;
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(image)
    }

    /// BootInfo and AppInfo as Intel HEX. The log and SharedInfo are left
    /// for the firmware to initialise.
    pub fn to_ihex(&self) -> Result<String, ihex::WriterError> {
        let start = BOOT_INFO_OFFSET as usize;
        let end = (APP_INFO_OFFSET + APP_INFO_SIZE) as usize;
        let upper = EEPROM_BASE >> 16;

        let mut records = vec![ihex::Record::ExtendedLinearAddress(upper as u16)];
        for (i, chunk) in self.bytes[start..end].chunks(RECORD_LEN).enumerate() {
            let address = EEPROM_BASE + (start + i * RECORD_LEN) as u32;
            records.push(ihex::Record::Data {
                offset: (address & 0xffff) as u16,
                value: chunk.to_vec(),
            });
        }
        records.push(ihex::Record::EndOfFile);
        ihex::create_object_file_representation(&records)
    }

    fn range(&self, offset: u32, len: usize) -> Result<std::ops::Range<usize>, OutOfBounds> {
        let start = offset as usize;
        match start.checked_add(len) {
            Some(end) if end <= self.bytes.len() => Ok(start..end),
            _ => Err(OutOfBounds),
        }
    }
}

impl ReadStorage for EepromImage {
    type Error = OutOfBounds;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        let range = self.range(offset, bytes.len())?;
        bytes.copy_from_slice(&self.bytes[range]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.bytes.len()
    }
}

impl Storage for EepromImage {
    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        let range = self.range(offset, bytes.len())?;
        self.bytes[range].copy_from_slice(bytes);
        Ok(())
    }
}
