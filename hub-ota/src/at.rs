// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! SIM800-class cellular modem driven with AT commands over a serial port.
//!
//! The port is read without blocking, one byte at a time, so a poll never
//! waits on the modem. Exactly one command is in flight.

use core::fmt::{self, Write as _};

use embedded_io::{Read, ReadReady, Write};
use heapless::{String, Vec};

use crate::modem::{HttpResponse, Modem};
use crate::poll::{Deadline, Millis, Poll};

const LINE_CAPACITY: usize = 96;
const COMMAND_CAPACITY: usize = 256;
/// Largest chunk fetched by a single `AT+HTTPREAD`.
pub const READ_CHUNK: usize = 128;

const COMMAND_TIMEOUT_MS: u64 = 10_000;
const BEARER_TIMEOUT_MS: u64 = 60_000;
const HTTP_ACTION_TIMEOUT_MS: u64 = 60_000;
const REGISTRATION_RETRY_MS: u64 = 1_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AtError {
    /// The serial port reported an error.
    Io,
    LineTooLong,
    CommandTooLong,
    /// The modem answered `ERROR`.
    Rejected,
    Timeout,
}

impl fmt::Display for AtError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AtError::Io => f.write_str("serial port error"),
            AtError::LineTooLong => f.write_str("response line too long"),
            AtError::CommandTooLong => f.write_str("command too long"),
            AtError::Rejected => f.write_str("modem answered ERROR"),
            AtError::Timeout => f.write_str("no answer from modem"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Job {
    PowerUp,
    Register,
    Bearer,
    Http,
    Read { offset: u32, len: usize },
}

/// What completes a command besides the final `OK`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Expect {
    Ok,
    /// `ERROR` is as good as `OK`.
    Any,
    /// `+CREG: <n>,<stat>`, retried until registered.
    Registration,
    /// `+SAPBR: 1,<status>,...`, a connected bearer ends the job early.
    BearerStatus,
    /// `OK`, then the `+HTTPACTION: <method>,<status>,<size>` notification.
    HttpAction,
    /// `+HTTPREAD: <n>`, `n` raw bytes, then `OK`.
    HttpRead,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Send,
    Wait(Deadline, Expect),
    Urc(Deadline),
    Pause(Millis),
}

enum Event {
    Ok,
    Error,
    HttpAction(HttpResponse),
}

/// Modem state between polls.
pub struct AtModem<U> {
    uart: U,
    line: Vec<u8, LINE_CAPACITY>,
    raw: Vec<u8, READ_CHUNK>,
    raw_remaining: usize,
    job: Option<Job>,
    step: usize,
    phase: Phase,
    registered: bool,
    bearer_up: bool,
    response: HttpResponse,
}

impl<U> AtModem<U>
where
    U: Read + ReadReady + Write,
{
    pub fn new(uart: U) -> Self {
        Self {
            uart,
            line: Vec::new(),
            raw: Vec::new(),
            raw_remaining: 0,
            job: None,
            step: 0,
            phase: Phase::Send,
            registered: false,
            bearer_up: false,
            response: HttpResponse::default(),
        }
    }

    pub fn release(self) -> U {
        self.uart
    }

    fn steps(job: Job) -> usize {
        match job {
            Job::PowerUp => 3,
            Job::Register => 1,
            Job::Bearer => 4,
            Job::Http => 5,
            Job::Read { .. } => 1,
        }
    }

    fn command(job: Job, step: usize, arg: &str) -> Result<(String<COMMAND_CAPACITY>, Expect), AtError> {
        let mut cmd = String::new();
        let (res, expect) = match (job, step) {
            (Job::PowerUp, 0) => (write!(cmd, "AT"), Expect::Ok),
            (Job::PowerUp, 1) => (write!(cmd, "ATE0"), Expect::Ok),
            (Job::PowerUp, _) => (write!(cmd, "AT+CFUN=1"), Expect::Ok),
            (Job::Register, _) => (write!(cmd, "AT+CREG?"), Expect::Registration),
            (Job::Bearer, 0) => (write!(cmd, "AT+SAPBR=3,1,\"Contype\",\"GPRS\""), Expect::Ok),
            (Job::Bearer, 1) => (write!(cmd, "AT+SAPBR=3,1,\"APN\",\"{arg}\""), Expect::Ok),
            (Job::Bearer, 2) => (write!(cmd, "AT+SAPBR=2,1"), Expect::BearerStatus),
            (Job::Bearer, _) => (write!(cmd, "AT+SAPBR=1,1"), Expect::Ok),
            (Job::Http, 0) => (write!(cmd, "AT+HTTPTERM"), Expect::Any),
            (Job::Http, 1) => (write!(cmd, "AT+HTTPINIT"), Expect::Ok),
            (Job::Http, 2) => (write!(cmd, "AT+HTTPPARA=\"CID\",1"), Expect::Ok),
            (Job::Http, 3) => (write!(cmd, "AT+HTTPPARA=\"URL\",\"{arg}\""), Expect::Ok),
            (Job::Http, _) => (write!(cmd, "AT+HTTPACTION=0"), Expect::HttpAction),
            (Job::Read { offset, len }, _) => (write!(cmd, "AT+HTTPREAD={offset},{len}"), Expect::HttpRead),
        };
        res.map_err(|_| AtError::CommandTooLong)?;
        Ok((cmd, expect))
    }

    fn timeout(job: Job, step: usize) -> u64 {
        match (job, step) {
            (Job::Bearer, 3) => BEARER_TIMEOUT_MS,
            _ => COMMAND_TIMEOUT_MS,
        }
    }

    fn send(&mut self, cmd: &str) -> Result<(), AtError> {
        debug!("> {}", cmd);
        self.uart.write_all(cmd.as_bytes()).map_err(|_| AtError::Io)?;
        self.uart.write_all(b"\r\n").map_err(|_| AtError::Io)?;
        self.uart.flush().map_err(|_| AtError::Io)
    }

    /// Consume received bytes until something the current command cares about
    /// shows up or the port runs dry.
    fn pump(&mut self) -> Result<Option<Event>, AtError> {
        let mut byte = [0u8; 1];
        while self.uart.read_ready().map_err(|_| AtError::Io)? {
            if self.uart.read(&mut byte).map_err(|_| AtError::Io)? == 0 {
                break;
            }
            if self.raw_remaining > 0 {
                self.raw_remaining -= 1;
                // Bytes beyond the requested chunk are dropped.
                let _ = self.raw.push(byte[0]);
                continue;
            }
            match byte[0] {
                b'\r' => {}
                b'\n' => {
                    let event = self.line_complete();
                    self.line.clear();
                    if event.is_some() {
                        return Ok(event);
                    }
                }
                b => self.line.push(b).map_err(|_| AtError::LineTooLong)?,
            }
        }
        Ok(None)
    }

    fn line_complete(&mut self) -> Option<Event> {
        let line = core::str::from_utf8(&self.line).ok()?.trim();
        if line.is_empty() || line.starts_with("AT") {
            return None;
        }
        trace!("< {}", line);
        if line == "OK" {
            return Some(Event::Ok);
        }
        if line == "ERROR" || line.starts_with("+CME ERROR") {
            return Some(Event::Error);
        }
        if let Some(rest) = line.strip_prefix("+CREG:") {
            let stat = fields(rest).nth(1);
            self.registered = matches!(stat, Some(1) | Some(5));
        } else if let Some(rest) = line.strip_prefix("+SAPBR:") {
            self.bearer_up = fields(rest).nth(1) == Some(1);
        } else if let Some(rest) = line.strip_prefix("+HTTPACTION:") {
            let mut f = fields(rest).skip(1);
            let status = f.next().unwrap_or(0);
            let size = f.next().unwrap_or(0);
            return Some(Event::HttpAction(HttpResponse {
                status: status as u16,
                size,
            }));
        } else if let Some(rest) = line.strip_prefix("+HTTPREAD:") {
            self.raw.clear();
            self.raw_remaining = fields(rest).next().unwrap_or(0) as usize;
        }
        None
    }

    fn reset_job(&mut self) {
        self.job = None;
        self.step = 0;
        self.phase = Phase::Send;
        self.raw_remaining = 0;
        self.line.clear();
    }

    fn fail(&mut self, err: AtError) -> Poll<()> {
        warn!("modem job failed: {}", err);
        self.reset_job();
        match err {
            AtError::Timeout => Poll::Timeout,
            _ => Poll::Error,
        }
    }

    fn step_done(&mut self, job: Job) -> Poll<()> {
        self.step += 1;
        self.phase = Phase::Send;
        if self.step >= Self::steps(job) {
            self.reset_job();
            return Poll::Success(());
        }
        Poll::Busy
    }

    fn drive(&mut self, job: Job, arg: &str, now: Millis) -> Poll<()> {
        if self.job != Some(job) {
            self.reset_job();
            self.job = Some(job);
        }

        match self.phase {
            Phase::Pause(until) => {
                if now >= until {
                    self.phase = Phase::Send;
                }
                Poll::Busy
            }
            Phase::Send => {
                let (cmd, expect) = match Self::command(job, self.step, arg) {
                    Ok(c) => c,
                    Err(e) => return self.fail(e),
                };
                self.line.clear();
                if let Err(e) = self.send(&cmd) {
                    return self.fail(e);
                }
                self.phase = Phase::Wait(Deadline::after(now, Self::timeout(job, self.step)), expect);
                Poll::Busy
            }
            Phase::Wait(deadline, expect) => {
                let event = match self.pump() {
                    Ok(event) => event,
                    Err(e) => return self.fail(e),
                };
                match event {
                    Some(Event::Ok) => match expect {
                        Expect::Registration if !self.registered => {
                            self.phase = Phase::Pause(now + REGISTRATION_RETRY_MS);
                            Poll::Busy
                        }
                        Expect::BearerStatus if self.bearer_up => {
                            self.reset_job();
                            Poll::Success(())
                        }
                        Expect::HttpAction => {
                            self.phase = Phase::Urc(Deadline::after(now, HTTP_ACTION_TIMEOUT_MS));
                            Poll::Busy
                        }
                        _ => self.step_done(job),
                    },
                    Some(Event::Error) if expect == Expect::Any => self.step_done(job),
                    Some(Event::Error) => self.fail(AtError::Rejected),
                    Some(Event::HttpAction(_)) | None => {
                        if deadline.expired(now) {
                            self.fail(AtError::Timeout)
                        } else {
                            Poll::Busy
                        }
                    }
                }
            }
            Phase::Urc(deadline) => match self.pump() {
                Ok(Some(Event::HttpAction(response))) => {
                    self.response = response;
                    self.step_done(job)
                }
                Ok(Some(Event::Error)) => self.fail(AtError::Rejected),
                Ok(_) if deadline.expired(now) => self.fail(AtError::Timeout),
                Ok(_) => Poll::Busy,
                Err(e) => self.fail(e),
            },
        }
    }
}

/// Comma separated numeric fields, quotes and blanks ignored.
fn fields(rest: &str) -> impl Iterator<Item = u32> + '_ {
    rest.split(',')
        .map(|f| f.trim().trim_matches('"').parse::<u32>().unwrap_or(0))
}

impl<U> Modem for AtModem<U>
where
    U: Read + ReadReady + Write,
{
    fn power_up(&mut self, now: Millis) -> Poll<()> {
        self.drive(Job::PowerUp, "", now)
    }

    fn register(&mut self, now: Millis) -> Poll<()> {
        self.drive(Job::Register, "", now)
    }

    fn open_bearer(&mut self, apn: &str, now: Millis) -> Poll<()> {
        self.drive(Job::Bearer, apn, now)
    }

    fn http_get(&mut self, url: &str, now: Millis) -> Poll<HttpResponse> {
        self.drive(Job::Http, url, now).map(|_| self.response)
    }

    fn read_response(&mut self, offset: u32, buf: &mut [u8], now: Millis) -> Poll<usize> {
        let len = buf.len().min(READ_CHUNK);
        match self.drive(Job::Read { offset, len }, "", now) {
            Poll::Success(()) => {
                let n = self.raw.len().min(len);
                buf[..n].copy_from_slice(&self.raw[..n]);
                Poll::Success(n)
            }
            Poll::Busy => Poll::Busy,
            Poll::Timeout => Poll::Timeout,
            Poll::Error => Poll::Error,
        }
    }

    fn close(&mut self) {
        self.reset_job();
        if self.send("AT+HTTPTERM").is_err() {
            warn!("HTTPTERM not sent");
        }
    }
}
