// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use {
    clap::Parser,
    hub_ota::records::{Identity, AES_KEY_LEN, DEV_TYPE_LEN, PWD_LEN},
    std::path::PathBuf,
};

mod cli;

/// Validated program arguments.
#[derive(Debug, Clone)]
pub enum Args {
    /// Build an update image.
    Pack {
        input: PathBuf,
        version: u32,
        output: PathBuf,
    },
    /// Dump and check an update image.
    Inspect { input: PathBuf },
    /// Write a provisioning EEPROM image.
    Provision { identity: Identity, output: PathBuf },
}

pub fn args<I, T>(args: I) -> Result<Args, Error>
where
    I: IntoIterator<Item = T>,
    T: Into<std::ffi::OsString> + Clone,
{
    let cli = cli::Args::try_parse_from(args).map_err(Error::Cli)?;
    match cli.command {
        cli::Command::Pack {
            input,
            version,
            output,
        } => {
            // Zero marks an empty version slot in the boot records.
            if version == 0 {
                return Err(Error::ZeroVersion);
            }
            Ok(Args::Pack {
                input,
                version,
                output,
            })
        }
        cli::Command::Inspect { input } => Ok(Args::Inspect { input }),
        cli::Command::Provision {
            dev_id,
            dev_type,
            aes_key,
            pwd,
            output,
        } => {
            let dev_id = parse_dev_id(&dev_id)?;

            let mut dev_type_buf = [0u8; DEV_TYPE_LEN];
            if dev_type.len() > DEV_TYPE_LEN {
                return Err(Error::DevTypeTooLong(dev_type));
            }
            dev_type_buf[..dev_type.len()].copy_from_slice(dev_type.as_bytes());

            let aes_key = hex::decode(aes_key.trim()).map_err(Error::AesKey)?;
            let aes_key: [u8; AES_KEY_LEN] = aes_key
                .as_slice()
                .try_into()
                .map_err(|_| Error::AesKeyLength(aes_key.len()))?;

            // The password is stored nul terminated.
            let mut pwd_buf = [0u8; PWD_LEN];
            if pwd.len() >= PWD_LEN {
                return Err(Error::PwdTooLong);
            }
            pwd_buf[..pwd.len()].copy_from_slice(pwd.as_bytes());

            Ok(Args::Provision {
                identity: Identity {
                    dev_id,
                    dev_type: dev_type_buf,
                    aes_key,
                    pwd: pwd_buf,
                },
                output,
            })
        }
    }
}

fn parse_dev_id(s: &str) -> Result<u32, Error> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|_| Error::DevId(s.to_owned()))
}

#[derive(Debug)]
pub enum Error {
    Cli(clap::Error),
    AesKey(hex::FromHexError),
    AesKeyLength(usize),
    DevId(String),
    DevTypeTooLong(String),
    PwdTooLong,
    ZeroVersion,
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Cli(e) => write!(f, "{e}"),
            Error::AesKey(e) => write!(f, "invalid --aes-key: {e}"),
            Error::AesKeyLength(len) => {
                write!(f, "--aes-key must be {AES_KEY_LEN} bytes, got {len}")
            }
            Error::DevId(s) => write!(f, "invalid --dev-id {s:?}"),
            Error::DevTypeTooLong(s) => {
                write!(f, "--dev-type {s:?} is longer than {DEV_TYPE_LEN} bytes")
            }
            Error::PwdTooLong => {
                write!(f, "--pwd must be shorter than {PWD_LEN} bytes")
            }
            Error::ZeroVersion => write!(f, "--version must not be zero"),
        }
    }
}

impl std::error::Error for Error {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dev_id_accepts_decimal_and_hex() {
        assert_eq!(parse_dev_id("1234").unwrap(), 1234);
        assert_eq!(parse_dev_id("0x00C0FFEE").unwrap(), 0x00C0_FFEE);
        assert!(matches!(parse_dev_id("0xZZ"), Err(Error::DevId(_))));
        assert!(matches!(parse_dev_id("-1"), Err(Error::DevId(_))));
    }
}
