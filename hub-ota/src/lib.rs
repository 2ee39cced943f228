// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Over-the-air self-update for the hub.
//!
//! The bootloader downloads a firmware image through the cellular modem,
//! validates it, programs it into the application region and test-runs it,
//! falling back to the previous version and then to a known backup version
//! when anything goes wrong. Every step is a pollable [`poll::Operation`] so
//! the bootloader's main loop can keep the watchdog fed while it waits.
//!
//! Hardware is reached through traits only: [`embedded_storage`] for the code
//! flash and the data EEPROM, [`modem::Modem`] for HTTP, and
//! [`scratch::Scratch`] for the backup registers.

#![cfg_attr(not(test), no_std)]

#[macro_use]
mod fmt;

pub mod app;
pub mod at;
pub mod boot;
pub mod config;
pub mod context;
pub mod crc;
pub mod flash;
pub mod image;
pub mod install;
pub mod modem;
pub mod net;
pub mod nvm;
pub mod poll;
pub mod records;
pub mod report;
pub mod scratch;
pub mod state;
pub mod upgrade;

#[cfg(test)]
mod testing;
