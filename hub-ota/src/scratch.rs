// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Battery-backed scratch registers and the reset cause.

use bitflags::bitflags;

/// Small set of words that survive every reset, including watchdog resets
/// that clear RAM.
///
/// `index` is always below [`consts::NUM_BACKUP_REGISTERS`].
pub trait Scratch {
    fn read(&self, index: usize) -> u32;
    fn write(&mut self, index: usize, value: u32);
}

impl<T: Scratch + ?Sized> Scratch for &mut T {
    fn read(&self, index: usize) -> u32 {
        (**self).read(index)
    }

    fn write(&mut self, index: usize, value: u32) {
        (**self).write(index, value)
    }
}

bitflags! {
    /// Cause of the last reset, as latched by the reset controller.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ResetFlags: u32 {
        const LOW_POWER = 1 << 0;
        const WWDG = 1 << 1;
        const IWDG = 1 << 2;
        const SOFTWARE = 1 << 3;
        const POWER_ON = 1 << 4;
        const PIN = 1 << 5;
        const OPTION_BYTES = 1 << 6;
        const FIREWALL = 1 << 7;
    }
}

#[cfg(feature = "defmt")]
impl defmt::Format for ResetFlags {
    fn format(&self, f: defmt::Formatter) {
        defmt::write!(f, "ResetFlags({=u32:#x})", self.bits())
    }
}
