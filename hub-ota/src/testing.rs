// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! In-memory stand-ins for the hardware, used by the unit and scenario tests.

use std::collections::VecDeque;
use std::string::String;
use std::vec::Vec;

use consts::{APP_END, BASE_APP_ADDR, EEPROM_SIZE, FLASH_BASE, FLASH_END, FLASH_PAGE_SIZE, NUM_BACKUP_REGISTERS};
use embedded_storage::nor_flash::{ErrorType, NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash};
use embedded_storage::{ReadStorage, Storage};

use crate::crc::checksum;
use crate::flash::RamResident;
use crate::image::ImageHeader;
use crate::modem::{HttpResponse, Modem};
use crate::poll::{Millis, Poll};
use crate::scratch::Scratch;

/// Byte pattern of the application that was installed before the test.
pub const OLD_APP_BYTE: u8 = 0xA5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemFlashError;

impl NorFlashError for MemFlashError {
    fn kind(&self) -> NorFlashErrorKind {
        NorFlashErrorKind::Other
    }
}

/// Whole code flash, offsets relative to its base.
pub struct MemFlash {
    pub data: Vec<u8>,
    pub erases: usize,
    pub writes: usize,
    pub fail_erases: usize,
    pub fail_writes: usize,
    pub corrupt_writes: bool,
    /// Offsets of every successful erase, in order.
    pub erased: Vec<u32>,
    /// Offsets of every successful write, in order.
    pub written: Vec<u32>,
}

impl MemFlash {
    pub fn new() -> Self {
        let mut data = vec![0u8; (FLASH_END - FLASH_BASE) as usize];
        data[(BASE_APP_ADDR - FLASH_BASE) as usize..(APP_END - FLASH_BASE) as usize].fill(OLD_APP_BYTE);
        Self {
            data,
            erases: 0,
            writes: 0,
            fail_erases: 0,
            fail_writes: 0,
            corrupt_writes: false,
            erased: Vec::new(),
            written: Vec::new(),
        }
    }

    /// Bytes at an absolute address.
    pub fn at(&self, address: u32, len: usize) -> &[u8] {
        let start = (address - FLASH_BASE) as usize;
        &self.data[start..start + len]
    }
}

impl ErrorType for MemFlash {
    type Error = MemFlashError;
}

impl ReadNorFlash for MemFlash {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        let start = offset as usize;
        let src = self.data.get(start..start + bytes.len()).ok_or(MemFlashError)?;
        bytes.copy_from_slice(src);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }
}

impl NorFlash for MemFlash {
    const WRITE_SIZE: usize = 4;
    const ERASE_SIZE: usize = FLASH_PAGE_SIZE as usize;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        self.erases += 1;
        if self.fail_erases > 0 {
            self.fail_erases -= 1;
            return Err(MemFlashError);
        }
        self.data
            .get_mut(from as usize..to as usize)
            .ok_or(MemFlashError)?
            .fill(consts::FLASH_ERASED_BYTE);
        self.erased.push(from);
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        self.writes += 1;
        if self.fail_writes > 0 {
            self.fail_writes -= 1;
            return Err(MemFlashError);
        }
        let start = offset as usize;
        let dst = self.data.get_mut(start..start + bytes.len()).ok_or(MemFlashError)?;
        dst.copy_from_slice(bytes);
        if self.corrupt_writes {
            dst[0] ^= 0x80;
        }
        self.written.push(offset);
        Ok(())
    }
}

// SAFETY: nothing executes from this memory.
unsafe impl RamResident for MemFlash {}

/// Data EEPROM, zero filled like a blank part.
pub struct MemEeprom {
    pub data: Vec<u8>,
    pub writes: usize,
    pub fail_writes: usize,
}

impl MemEeprom {
    pub fn new() -> Self {
        Self {
            data: vec![0u8; EEPROM_SIZE as usize],
            writes: 0,
            fail_writes: 0,
        }
    }
}

impl ReadStorage for MemEeprom {
    type Error = ();

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        let start = offset as usize;
        bytes.copy_from_slice(self.data.get(start..start + bytes.len()).ok_or(())?);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }
}

impl Storage for MemEeprom {
    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        self.writes += 1;
        if self.fail_writes > 0 {
            self.fail_writes -= 1;
            return Err(());
        }
        let start = offset as usize;
        self.data.get_mut(start..start + bytes.len()).ok_or(())?.copy_from_slice(bytes);
        Ok(())
    }
}

/// Firmware image as served by the cloud.
pub fn image(version: u32, payload: &[u8]) -> Vec<u8> {
    let header = ImageHeader {
        version,
        crc: checksum(payload),
    };
    let mut out = header.to_bytes().to_vec();
    out.extend_from_slice(payload);
    out
}

struct Route {
    suffix: String,
    status: u16,
    body: Vec<u8>,
}

/// Modem answering GETs from a table of URL suffixes.
pub struct FakeModem {
    routes: Vec<Route>,
    body: Vec<u8>,
    last: HttpResponse,
    pub requested: Option<String>,
    pub requests: Vec<String>,
    pub power_ups: usize,
    pub bearers_opened: usize,
    pub fail_power_up: usize,
    pub fail_http: usize,
    pub fail_reads: usize,
    pub closed: bool,
}

impl FakeModem {
    pub fn new() -> Self {
        Self {
            routes: Vec::new(),
            body: Vec::new(),
            last: HttpResponse { status: 404, size: 0 },
            requested: None,
            requests: Vec::new(),
            power_ups: 0,
            bearers_opened: 0,
            fail_power_up: 0,
            fail_http: 0,
            fail_reads: 0,
            closed: false,
        }
    }

    /// Every URL gets this answer.
    pub fn with_response(status: u16, body: &[u8]) -> Self {
        let mut modem = Self::new();
        modem.route("", status, body);
        modem.body = body.to_vec();
        modem.last = HttpResponse {
            status,
            size: body.len() as u32,
        };
        modem
    }

    /// Answer URLs ending in `suffix`. Later routes win.
    pub fn route(&mut self, suffix: &str, status: u16, body: &[u8]) {
        self.routes.insert(
            0,
            Route {
                suffix: suffix.into(),
                status,
                body: body.to_vec(),
            },
        );
    }

    /// Response to the last request, or the default route.
    pub fn response(&self) -> HttpResponse {
        self.last
    }

    fn take_failure(counter: &mut usize) -> bool {
        if *counter > 0 {
            *counter -= 1;
            true
        } else {
            false
        }
    }
}

impl Modem for FakeModem {
    fn power_up(&mut self, _now: Millis) -> Poll<()> {
        self.power_ups += 1;
        if Self::take_failure(&mut self.fail_power_up) {
            return Poll::Error;
        }
        Poll::Success(())
    }

    fn register(&mut self, _now: Millis) -> Poll<()> {
        Poll::Success(())
    }

    fn open_bearer(&mut self, _apn: &str, _now: Millis) -> Poll<()> {
        self.bearers_opened += 1;
        Poll::Success(())
    }

    fn http_get(&mut self, url: &str, _now: Millis) -> Poll<HttpResponse> {
        self.requests.push(url.into());
        self.requested = Some(url.into());
        if Self::take_failure(&mut self.fail_http) {
            return Poll::Error;
        }
        self.last = match self.routes.iter().find(|r| url.ends_with(r.suffix.as_str())) {
            Some(route) => {
                self.body = route.body.clone();
                HttpResponse {
                    status: route.status,
                    size: route.body.len() as u32,
                }
            }
            None => {
                self.body.clear();
                HttpResponse { status: 404, size: 0 }
            }
        };
        Poll::Success(self.last)
    }

    fn read_response(&mut self, offset: u32, buf: &mut [u8], _now: Millis) -> Poll<usize> {
        if Self::take_failure(&mut self.fail_reads) {
            return Poll::Error;
        }
        let start = (offset as usize).min(self.body.len());
        let n = buf.len().min(self.body.len() - start);
        buf[..n].copy_from_slice(&self.body[start..start + n]);
        Poll::Success(n)
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

#[derive(Debug, Default)]
pub struct FakeScratch {
    pub regs: [u32; NUM_BACKUP_REGISTERS],
}

impl Scratch for FakeScratch {
    fn read(&self, index: usize) -> u32 {
        self.regs[index]
    }

    fn write(&mut self, index: usize, value: u32) {
        self.regs[index] = value;
    }
}

/// Serial port with canned replies, keyed by command prefix.
pub struct ScriptedUart {
    replies: Vec<(String, String, bool)>,
    rx: VecDeque<u8>,
    tx: Vec<u8>,
    sent: Vec<String>,
}

impl ScriptedUart {
    pub fn new(replies: &[(&str, &str)]) -> Self {
        let mut uart = Self {
            replies: Vec::new(),
            rx: VecDeque::new(),
            tx: Vec::new(),
            sent: Vec::new(),
        };
        for (prefix, reply) in replies {
            uart.then(prefix, reply);
        }
        uart
    }

    /// Queue one more reply, used once.
    pub fn then(&mut self, prefix: &str, reply: &str) {
        self.replies.push((prefix.into(), reply.into(), false));
    }

    pub fn sent(&self) -> Vec<String> {
        self.sent.clone()
    }

    fn command(&mut self, cmd: String) {
        if let Some(entry) = self
            .replies
            .iter_mut()
            .find(|(prefix, _, used)| !*used && cmd.starts_with(prefix.as_str()))
        {
            entry.2 = true;
            self.rx.extend(entry.1.bytes());
        }
        self.sent.push(cmd);
    }
}

impl embedded_io::ErrorType for ScriptedUart {
    type Error = core::convert::Infallible;
}

impl embedded_io::Read for ScriptedUart {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let mut n = 0;
        while n < buf.len() {
            match self.rx.pop_front() {
                Some(b) => {
                    buf[n] = b;
                    n += 1;
                }
                None => break,
            }
        }
        Ok(n)
    }
}

impl embedded_io::ReadReady for ScriptedUart {
    fn read_ready(&mut self) -> Result<bool, Self::Error> {
        Ok(!self.rx.is_empty())
    }
}

impl embedded_io::Write for ScriptedUart {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        for &b in buf {
            self.tx.push(b);
            if self.tx.ends_with(b"\r\n") {
                let line = String::from_utf8_lossy(&self.tx[..self.tx.len() - 2]).into_owned();
                self.tx.clear();
                self.command(line);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}
