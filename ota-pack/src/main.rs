// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

use {
    colored::Colorize,
    consts::{APP_SIZE, FLASH_ERASED_BYTE, FLASH_HALF_PAGE_SIZE},
    hub_ota::{
        crc,
        image::{self, ImageError, ImageHeader, HEADER_LEN},
        nvm::NvmError,
        records::{BootField, Records},
    },
    std::{
        ffi::OsString,
        io::{Read, Write},
        path::Path,
    },
    tracing_subscriber::{fmt, prelude::*, EnvFilter},
};

mod args;
mod eeprom;

#[cfg(test)]
mod tests;

fn main() -> std::process::ExitCode {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();

    main_args(
        std::env::args_os(),
        &mut std::io::stdout(),
        &mut std::io::stderr(),
    )
    .into()
}

fn main_args<I, T>(args: I, stdout: impl Write, mut stderr: impl Write) -> ExitCode
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    match run(args, stdout) {
        Ok(()) => ExitCode(0),
        Err(Error::Args(e @ args::Error::Cli(_))) => {
            // Clap already does the "error: {}" formatting.
            writeln!(stderr, "{e}").expect("write error to stderr");
            ExitCode(1)
        }
        Err(e) => {
            writeln!(stderr, "{} {e}", "error:".bold().red()).expect("write error to stderr");
            ExitCode(1)
        }
    }
}

fn run<I, T>(args: I, mut stdout: impl Write) -> Result<(), Error>
where
    I: IntoIterator<Item = T>,
    T: Into<OsString> + Clone,
{
    match args::args(args)? {
        args::Args::Pack {
            input,
            version,
            output,
        } => {
            let mut payload = read_file(&input)?;
            if payload.is_empty() {
                return Err(Error::EmptyPayload);
            }

            // The bootloader programs whole half-pages only.
            let padded_len = payload.len().next_multiple_of(FLASH_HALF_PAGE_SIZE as usize);
            payload.resize(padded_len, FLASH_ERASED_BYTE);
            if payload.len() > APP_SIZE as usize {
                return Err(Error::PayloadTooLarge(payload.len()));
            }

            let header = ImageHeader {
                version,
                crc: crc::checksum(&payload),
            };
            tracing::debug!("payload padded to {} bytes, crc {:08x}", payload.len(), header.crc);

            let mut file = std::fs::File::create(&output).map_err(Error::CreateOutputFile)?;
            file.write_all(&header.to_bytes())
                .and_then(|()| file.write_all(&payload))
                .map_err(Error::WriteOutputFile)?;
            tracing::info!("wrote {}", output.display());

            print_header(&mut stdout, &header, payload.len())?;
        }
        args::Args::Inspect { input } => {
            let data = read_file(&input)?;
            let header = ImageHeader::parse(&data)?;

            let checked = image::payload_len(data.len() as u32).and_then(|len| {
                let computed = crc::checksum(&data[HEADER_LEN..HEADER_LEN + len as usize]);
                if computed == header.crc {
                    Ok(computed)
                } else {
                    Err(ImageError::CrcError)
                }
            });

            print_header(&mut stdout, &header, data.len() - HEADER_LEN)?;
            match checked {
                Ok(_) => writeln!(&mut stdout, "{:10} {}", "verdict".bold(), "ok".green())
                    .map_err(Error::Stdout)?,
                Err(e) => {
                    if e == ImageError::CrcError {
                        let computed = crc::checksum(&data[HEADER_LEN..]);
                        writeln!(&mut stdout, "{:10} {computed:08x}", "computed".bold())
                            .map_err(Error::Stdout)?;
                    }
                    return Err(Error::Image(e));
                }
            }
        }
        args::Args::Provision { identity, output } => {
            let mut records = Records::new(eeprom::EepromImage::new());
            records.provision(&identity).map_err(Error::Provision)?;
            let vtor = records.boot(BootField::Vtor).map_err(Error::Provision)?;
            let hex = records.release().to_ihex().map_err(Error::Ihex)?;

            std::fs::write(&output, hex).map_err(Error::WriteOutputFile)?;
            tracing::info!("wrote {}", output.display());

            writeln!(&mut stdout, "{:10} {:08x}", "dev id".bold(), identity.dev_id)
                .map_err(Error::Stdout)?;
            writeln!(
                &mut stdout,
                "{:10} {}",
                "dev type".bold(),
                String::from_utf8_lossy(&identity.dev_type).trim_end_matches('\0'),
            )
            .map_err(Error::Stdout)?;
            writeln!(&mut stdout, "{:10} {vtor:08x}", "vtor".bold()).map_err(Error::Stdout)?;
        }
    }
    Ok(())
}

fn read_file(path: &Path) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::new();
    std::fs::File::open(path)
        .map_err(Error::OpenInputFile)?
        .read_to_end(&mut buf)
        .map_err(Error::ReadInputFile)?;
    Ok(buf)
}

fn print_header(mut stdout: impl Write, header: &ImageHeader, payload_len: usize) -> Result<(), Error> {
    writeln!(&mut stdout, "{:10} {}", "version".bold(), header.version).map_err(Error::Stdout)?;
    let human_size = humansize::format_size(payload_len, humansize::BINARY);
    writeln!(&mut stdout, "{:10} {human_size} ({payload_len})", "size".bold())
        .map_err(Error::Stdout)?;
    writeln!(&mut stdout, "{:10} {:08x}", "crc".bold(), header.crc).map_err(Error::Stdout)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ExitCode(u8);

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        code.0.into()
    }
}

#[derive(Debug)]
enum Error {
    Args(args::Error),
    CreateOutputFile(std::io::Error),
    EmptyPayload,
    Ihex(ihex::WriterError),
    Image(ImageError),
    OpenInputFile(std::io::Error),
    PayloadTooLarge(usize),
    Provision(NvmError),
    ReadInputFile(std::io::Error),
    Stdout(std::io::Error),
    WriteOutputFile(std::io::Error),
}

impl From<args::Error> for Error {
    fn from(e: args::Error) -> Self {
        Error::Args(e)
    }
}

impl From<ImageError> for Error {
    fn from(e: ImageError) -> Self {
        Error::Image(e)
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::Args(e) => write!(f, "{e}"),
            Error::CreateOutputFile(e) => write!(f, "failed to create output file: {e}"),
            Error::EmptyPayload => write!(f, "input file is empty"),
            Error::Ihex(e) => write!(f, "failed to encode Intel HEX: {e}"),
            Error::Image(e) => write!(f, "invalid image: {e}"),
            Error::OpenInputFile(e) => write!(f, "failed to open input file: {e}"),
            Error::PayloadTooLarge(len) => write!(
                f,
                "payload of {len} bytes does not fit the {APP_SIZE} byte application region"
            ),
            Error::Provision(e) => write!(f, "failed to lay out the boot records: {e}"),
            Error::ReadInputFile(e) => write!(f, "failed to read input file: {e}"),
            Error::Stdout(e) => write!(f, "failed to write to stdout: {e}"),
            Error::WriteOutputFile(e) => write!(f, "failed to write to output file: {e}"),
        }
    }
}

impl std::error::Error for Error {}
