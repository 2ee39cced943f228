// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Data EEPROM. Byte writes, each one waits for the end of programming.

use consts::{EEPROM_BASE, EEPROM_SIZE};
use core::ptr::{read_volatile, write_volatile};
use defmt::Format;
use embedded_storage::{ReadStorage, Storage};

use crate::flash::{PECR, PECR_PELOCK, PEKEY1, PEKEY2, PEKEYR, SR, SR_BSY, SR_ERRORS};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Format)]
pub enum Error {
    OutOfBounds,
    Hardware(u32),
}

pub struct Eeprom {
    _private: (),
}

impl Eeprom {
    pub fn new() -> Self {
        Self { _private: () }
    }

    fn check(offset: u32, len: usize) -> Result<u32, Error> {
        match offset.checked_add(len as u32) {
            Some(end) if end <= EEPROM_SIZE => Ok(EEPROM_BASE + offset),
            _ => Err(Error::OutOfBounds),
        }
    }
}

impl ReadStorage for Eeprom {
    type Error = Error;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        let address = Self::check(offset, bytes.len())?;
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = unsafe { read_volatile((address as *const u8).add(i)) };
        }
        Ok(())
    }

    fn capacity(&self) -> usize {
        EEPROM_SIZE as usize
    }
}

impl Storage for Eeprom {
    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        let address = Self::check(offset, bytes.len())?;
        critical_section::with(|_| unsafe {
            write_volatile(PEKEYR, PEKEY1);
            write_volatile(PEKEYR, PEKEY2);

            let mut res = Ok(());
            for (i, byte) in bytes.iter().enumerate() {
                let cell = (address as *mut u8).add(i);
                if read_volatile(cell) == *byte {
                    continue;
                }
                write_volatile(cell, *byte);
                while read_volatile(SR) & SR_BSY != 0 {}
                let errors = read_volatile(SR) & SR_ERRORS;
                if errors != 0 {
                    write_volatile(SR, errors);
                    res = Err(Error::Hardware(errors));
                    break;
                }
            }

            write_volatile(PECR, read_volatile(PECR) | PECR_PELOCK);
            res
        })
    }
}
