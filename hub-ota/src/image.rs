// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Downloaded firmware image: a 64-byte header followed by the payload.
//!
//! | Offset | Size | Content                          |
//! |--------|------|----------------------------------|
//! | 0      | 4    | version, little endian           |
//! | 4      | 4    | CRC-32 of the payload            |
//! | 8      | 56   | reserved, zero                   |
//! | 64     | n*64 | payload, written at the app base |

use core::fmt;

use consts::{APP_SIZE, FLASH_HALF_PAGE_SIZE, IMAGE_HEADER_SIZE};

use crate::crc::ImageDigest;
use crate::modem::{HttpResponse, Modem};
use crate::poll::{Millis, Operation, Poll};
use crate::state::UpgradeFlags;

pub const HEADER_LEN: usize = IMAGE_HEADER_SIZE as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ImageError {
    /// The server has no binary for this version.
    NoBinary,
    /// Payload is not a whole number of half-pages or does not fit.
    WrongSize,
    CrcError,
    /// Header announces a different version than the one requested.
    VersionMismatch,
    HeaderTooShort,
}

impl fmt::Display for ImageError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageError::NoBinary => f.write_str("no binary"),
            ImageError::WrongSize => f.write_str("payload size is not a multiple of the half-page or too large"),
            ImageError::CrcError => f.write_str("payload CRC mismatch"),
            ImageError::VersionMismatch => f.write_str("header version differs from the requested one"),
            ImageError::HeaderTooShort => f.write_str("header too short"),
        }
    }
}

impl From<ImageError> for UpgradeFlags {
    fn from(err: ImageError) -> Self {
        match err {
            ImageError::NoBinary | ImageError::HeaderTooShort => UpgradeFlags::NO_BINARY,
            ImageError::WrongSize => UpgradeFlags::WRONG_SIZE,
            ImageError::CrcError => UpgradeFlags::CRC_ERROR,
            ImageError::VersionMismatch => UpgradeFlags::DATA_ERROR,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ImageHeader {
    pub version: u32,
    pub crc: u32,
}

impl ImageHeader {
    pub fn parse(bytes: &[u8]) -> Result<Self, ImageError> {
        if bytes.len() < HEADER_LEN {
            return Err(ImageError::HeaderTooShort);
        }
        Ok(Self {
            version: u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
            crc: u32::from_le_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN] {
        let mut out = [0u8; HEADER_LEN];
        out[..4].copy_from_slice(&self.version.to_le_bytes());
        out[4..8].copy_from_slice(&self.crc.to_le_bytes());
        out
    }
}

/// Payload length for a response of `size` bytes.
///
/// A single trailing byte added by the transport is dropped before the
/// length is checked.
pub fn payload_len(size: u32) -> Result<u32, ImageError> {
    let Some(mut len) = size.checked_sub(IMAGE_HEADER_SIZE) else {
        return Err(ImageError::NoBinary);
    };
    if len % FLASH_HALF_PAGE_SIZE == 1 {
        len -= 1;
    }
    if len == 0 {
        return Err(ImageError::NoBinary);
    }
    if len % FLASH_HALF_PAGE_SIZE != 0 || len > APP_SIZE {
        return Err(ImageError::WrongSize);
    }
    Ok(len)
}

/// An image that passed every check and may be programmed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ValidImage {
    pub version: u32,
    pub crc: u32,
    pub len: u32,
}

/// Reads the response held by the modem back and validates it.
///
/// Yields `Success(Err(_))` when the image is rejected and `Error` or
/// `Timeout` when the modem could not deliver the bytes.
pub struct ImageCheck {
    expected_version: Option<u32>,
    response: HttpResponse,
    header: Option<ImageHeader>,
    len: u32,
    offset: u32,
    digest: ImageDigest,
}

impl ImageCheck {
    /// Check a binary that must announce `expected_version`.
    pub fn new(response: HttpResponse, expected_version: u32) -> Self {
        Self::build(response, Some(expected_version))
    }

    /// Read only the header, whatever version it announces.
    pub fn header_only(response: HttpResponse) -> Self {
        Self::build(response, None)
    }

    fn build(response: HttpResponse, expected_version: Option<u32>) -> Self {
        Self {
            expected_version,
            response,
            header: None,
            len: 0,
            offset: 0,
            digest: ImageDigest::new(),
        }
    }

    fn poll_header<M: Modem>(&mut self, modem: &mut M, now: Millis) -> Poll<Result<(), ImageError>> {
        if !self.response.is_ok() {
            warn!("server answered {}", self.response.status);
            return Poll::Success(Err(ImageError::NoBinary));
        }
        if let Some(expected) = self.expected_version {
            match payload_len(self.response.size) {
                Ok(len) => self.len = len,
                Err(e) => return Poll::Success(Err(e)),
            }
            debug!("checking v{} with {} payload bytes", expected, self.len);
        } else if self.response.size < IMAGE_HEADER_SIZE {
            return Poll::Success(Err(ImageError::HeaderTooShort));
        }

        let mut buf = [0u8; HEADER_LEN];
        let n = match modem.read_response(0, &mut buf, now) {
            Poll::Success(n) => n,
            Poll::Busy => return Poll::Busy,
            Poll::Timeout => return Poll::Timeout,
            Poll::Error => return Poll::Error,
        };
        let header = match ImageHeader::parse(&buf[..n]) {
            Ok(header) => header,
            Err(e) => return Poll::Success(Err(e)),
        };
        if let Some(expected) = self.expected_version {
            if header.version != expected {
                warn!("asked for v{} got v{}", expected, header.version);
                return Poll::Success(Err(ImageError::VersionMismatch));
            }
        }
        self.header = Some(header);
        Poll::Success(Ok(()))
    }
}

impl<M: Modem> Operation<M> for ImageCheck {
    type Output = Result<ValidImage, ImageError>;

    fn poll(&mut self, modem: &mut M, now: Millis) -> Poll<Self::Output> {
        let Some(header) = self.header else {
            return match self.poll_header(modem, now) {
                Poll::Success(Ok(())) => Poll::Busy,
                Poll::Success(Err(e)) => Poll::Success(Err(e)),
                Poll::Busy => Poll::Busy,
                Poll::Timeout => Poll::Timeout,
                Poll::Error => Poll::Error,
            };
        };

        if self.expected_version.is_none() {
            return Poll::Success(Ok(ValidImage {
                version: header.version,
                crc: header.crc,
                len: 0,
            }));
        }

        let remaining = self.len - self.offset;
        if remaining == 0 {
            let crc = core::mem::take(&mut self.digest).finalize();
            if crc != header.crc {
                warn!("crc {=u32:x} expected {=u32:x}", crc, header.crc);
                return Poll::Success(Err(ImageError::CrcError));
            }
            return Poll::Success(Ok(ValidImage {
                version: header.version,
                crc,
                len: self.len,
            }));
        }

        let mut buf = [0u8; FLASH_HALF_PAGE_SIZE as usize];
        let want = remaining.min(FLASH_HALF_PAGE_SIZE) as usize;
        match modem.read_response(IMAGE_HEADER_SIZE + self.offset, &mut buf[..want], now) {
            Poll::Success(0) => Poll::Error,
            Poll::Success(n) => {
                let n = n.min(want);
                self.digest.update(&buf[..n]);
                self.offset += n as u32;
                Poll::Busy
            }
            Poll::Busy => Poll::Busy,
            Poll::Timeout => Poll::Timeout,
            Poll::Error => Poll::Error,
        }
    }
}
