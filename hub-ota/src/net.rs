// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Bring the modem online and fetch one URL.

use heapless::String;

use crate::modem::{HttpResponse, Modem};
use crate::poll::{Deadline, Millis, Operation, Poll};

pub const URL_CAPACITY: usize = 192;
pub type Url = String<URL_CAPACITY>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Step {
    PowerUp,
    Register,
    OpenBearer,
    HttpGet,
}

impl Step {
    /// Where to go when this step succeeds.
    fn next(self) -> Option<Step> {
        match self {
            Step::PowerUp => Some(Step::Register),
            Step::Register => Some(Step::OpenBearer),
            Step::OpenBearer => Some(Step::HttpGet),
            Step::HttpGet => None,
        }
    }

    /// Where to go when this step fails or times out.
    fn fallback(self) -> Step {
        match self {
            Step::PowerUp | Step::Register => Step::PowerUp,
            Step::OpenBearer => Step::Register,
            Step::HttpGet => Step::OpenBearer,
        }
    }
}

/// One GET request, from modem power up to the response header.
///
/// Inner failures fall back to an earlier step, only the overall deadline
/// ends the session with [`Poll::Timeout`].
pub struct NetworkSession<'a> {
    url: Url,
    apn: &'a str,
    budget_ms: u64,
    deadline: Option<Deadline>,
    step: Step,
}

impl<'a> NetworkSession<'a> {
    pub fn new(url: Url, apn: &'a str, budget_ms: u64) -> Self {
        Self {
            url,
            apn,
            budget_ms,
            deadline: None,
            step: Step::PowerUp,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn step(&self) -> Step {
        self.step
    }
}

impl<M: Modem> Operation<M> for NetworkSession<'_> {
    type Output = HttpResponse;

    fn poll(&mut self, modem: &mut M, now: Millis) -> Poll<HttpResponse> {
        let budget_ms = self.budget_ms;
        let deadline = *self.deadline.get_or_insert_with(|| Deadline::after(now, budget_ms));
        if deadline.expired(now) {
            warn!("session for {} timed out at {}", self.url.as_str(), self.step);
            modem.close();
            return Poll::Timeout;
        }

        let res = match self.step {
            Step::PowerUp => modem.power_up(now).map(|_| None),
            Step::Register => modem.register(now).map(|_| None),
            Step::OpenBearer => modem.open_bearer(self.apn, now).map(|_| None),
            Step::HttpGet => modem.http_get(&self.url, now).map(Some),
        };

        match res {
            Poll::Busy => Poll::Busy,
            Poll::Success(Some(response)) => {
                info!("GET {} -> {} ({} bytes)", self.url.as_str(), response.status, response.size);
                Poll::Success(response)
            }
            Poll::Success(None) => {
                if let Some(next) = self.step.next() {
                    debug!("net {} -> {}", self.step, next);
                    self.step = next;
                }
                Poll::Busy
            }
            Poll::Timeout | Poll::Error => {
                let fallback = self.step.fallback();
                warn!("net {} failed, back to {}", self.step, fallback);
                self.step = fallback;
                Poll::Busy
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeModem;

    fn url(s: &str) -> Url {
        let mut u = Url::new();
        u.push_str(s).unwrap();
        u
    }

    fn run(session: &mut NetworkSession<'_>, modem: &mut FakeModem, step_ms: u64) -> (Poll<HttpResponse>, u64) {
        let mut now = 0;
        loop {
            match session.poll(modem, now) {
                Poll::Busy => now += step_ms,
                done => return (done, now),
            }
        }
    }

    #[test]
    fn walks_through_every_step() {
        let mut modem = FakeModem::with_response(200, &[1, 2, 3]);
        let mut session = NetworkSession::new(url("http://x/a"), "apn", 10_000);
        let (res, _) = run(&mut session, &mut modem, 10);
        assert_eq!(res, Poll::Success(HttpResponse { status: 200, size: 3 }));
        assert_eq!(modem.requested.as_deref(), Some("http://x/a"));
    }

    #[test]
    fn http_failure_falls_back_to_bearer() {
        let mut modem = FakeModem::with_response(200, &[1]);
        modem.fail_http = 1;
        let mut session = NetworkSession::new(url("http://x/b"), "apn", 10_000);
        let (res, _) = run(&mut session, &mut modem, 10);
        assert!(matches!(res, Poll::Success(_)));
        assert_eq!(modem.bearers_opened, 2);
        assert_eq!(modem.power_ups, 1);
    }

    #[test]
    fn dead_modem_times_out() {
        let mut modem = FakeModem::with_response(200, &[1]);
        modem.fail_power_up = usize::MAX;
        let mut session = NetworkSession::new(url("http://x/c"), "apn", 1_000);
        let (res, now) = run(&mut session, &mut modem, 100);
        assert_eq!(res, Poll::Timeout);
        assert_eq!(now, 1_000);
        assert!(modem.closed);
    }
}
