// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Copy a validated image from the modem buffer into the application region.

use consts::{BASE_APP_ADDR, FLASH_HALF_PAGE_SIZE, FLASH_HALF_PAGE_WORDS, FLASH_PAGE_SIZE, IMAGE_HEADER_SIZE};
use embedded_storage::nor_flash::{NorFlash, ReadNorFlash};
use embedded_storage::Storage;

use crate::crc::ImageDigest;
use crate::flash::{FlashError, Programmer, RamResident};
use crate::image::ValidImage;
use crate::modem::Modem;
use crate::poll::{Millis, Operation, Poll};
use crate::state::UpgradeFlags;
use crate::upgrade::Resources;

const PAGE_LEN: usize = FLASH_PAGE_SIZE as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InstallError {
    /// The modem could not hand back the bytes.
    Read,
    /// The bytes read back differ from the ones that were checked.
    Corrupt,
    Flash(FlashError),
}

impl From<InstallError> for UpgradeFlags {
    fn from(err: InstallError) -> Self {
        match err {
            InstallError::Read => UpgradeFlags::DOWNLOAD_ERROR,
            InstallError::Corrupt => UpgradeFlags::CRC_ERROR,
            InstallError::Flash(_) => UpgradeFlags::PROG_ERROR,
        }
    }
}

/// Programs one page per poll: read the page from the modem, erase it, then
/// program each half-page present in the image.
pub struct Installer {
    image: ValidImage,
    offset: u32,
    filled: usize,
    page: [u8; PAGE_LEN],
    digest: ImageDigest,
}

impl Installer {
    pub fn new(image: ValidImage) -> Self {
        Self {
            image,
            offset: 0,
            filled: 0,
            page: [0; PAGE_LEN],
            digest: ImageDigest::new(),
        }
    }

    /// Bytes written so far.
    pub fn progress(&self) -> u32 {
        self.offset
    }

    fn write_page<F>(&mut self, programmer: &mut Programmer<F>, len: usize) -> Result<(), FlashError>
    where
        F: NorFlash + ReadNorFlash + RamResident,
    {
        let address = BASE_APP_ADDR + self.offset;
        programmer.erase_page(address)?;

        for (i, half) in self.page[..len].chunks_exact(FLASH_HALF_PAGE_SIZE as usize).enumerate() {
            let mut words = [0u32; FLASH_HALF_PAGE_WORDS];
            for (word, bytes) in words.iter_mut().zip(half.chunks_exact(4)) {
                *word = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
            }
            programmer.program_half_page(address + i as u32 * FLASH_HALF_PAGE_SIZE, &words)?;
        }
        Ok(())
    }
}

impl<F, S, M> Operation<Resources<F, S, M>> for Installer
where
    F: NorFlash + ReadNorFlash + RamResident,
    S: Storage,
    M: Modem,
{
    type Output = Result<(), InstallError>;

    fn poll(&mut self, res: &mut Resources<F, S, M>, now: Millis) -> Poll<Self::Output> {
        let remaining = self.image.len - self.offset;
        if remaining == 0 {
            let crc = core::mem::take(&mut self.digest).finalize();
            if crc != self.image.crc {
                error!("installed image crc {=u32:x} expected {=u32:x}", crc, self.image.crc);
                return Poll::Success(Err(InstallError::Corrupt));
            }
            info!("installed v{}, {} bytes", self.image.version, self.image.len);
            return Poll::Success(Ok(()));
        }

        let page_len = remaining.min(FLASH_PAGE_SIZE) as usize;
        if self.filled < page_len {
            let at = IMAGE_HEADER_SIZE + self.offset + self.filled as u32;
            match res.modem.read_response(at, &mut self.page[self.filled..page_len], now) {
                Poll::Busy => return Poll::Busy,
                Poll::Success(0) | Poll::Timeout | Poll::Error => return Poll::Success(Err(InstallError::Read)),
                Poll::Success(n) => self.filled += n.min(page_len - self.filled),
            }
            if self.filled < page_len {
                return Poll::Busy;
            }
        }

        if let Err(e) = self.write_page(&mut res.programmer, page_len) {
            return Poll::Success(Err(InstallError::Flash(e)));
        }
        self.digest.update(&self.page[..page_len]);
        trace!("page {=u32:x} written", BASE_APP_ADDR + self.offset);
        self.offset += page_len as u32;
        self.filled = 0;
        Poll::Busy
    }
}
