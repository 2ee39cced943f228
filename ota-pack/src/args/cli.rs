// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Command line arguments.

use std::path::PathBuf;

#[derive(clap::Parser)]
#[command(version, about, long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(clap::Subcommand)]
pub enum Command {
    /// Prepend the update header to a raw application binary.
    Pack {
        /// The raw application binary, linked at the application base.
        #[clap(short, long)]
        input: PathBuf,
        /// Version announced in the header, must not be zero.
        #[clap(short, long)]
        version: u32,
        /// Path to write the update image.
        #[clap(short, long)]
        output: PathBuf,
    },
    /// Print the header of an update image and check its payload.
    Inspect {
        /// The update image.
        #[clap(short, long)]
        input: PathBuf,
    },
    /// Generate the data EEPROM contents of a factory fresh device as Intel HEX.
    Provision {
        /// Device identifier, decimal or 0x prefixed hex.
        #[clap(long)]
        dev_id: String,
        /// Device type tag, at most 8 characters.
        #[clap(long, default_value = "hub")]
        dev_type: String,
        /// 128-bit AES key in hex.
        #[clap(long)]
        aes_key: String,
        /// Device password, at most 32 characters.
        #[clap(long)]
        pwd: String,
        /// Path to write the Intel HEX file.
        #[clap(short, long)]
        output: PathBuf,
    },
}
