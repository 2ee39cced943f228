// SPDX-FileCopyrightText: 2024 Foundation Devices, Inc. <hello@foundationdevices.com>
// SPDX-License-Identifier: GPL-3.0-or-later

//! Non-blocking operations driven from a single polling loop.
//!
//! Each operation owns its progress as a plain value. Calling
//! [`Operation::poll`] performs at most one bounded sub-step and reports
//! whether the caller should come back later. Because the progress lives in
//! the operation value, two concurrent runs of the same operation need two
//! values, which the borrow checker makes explicit.

/// Outcome of a single poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Poll<T> {
    /// Not finished, poll again later.
    Busy,
    Success(T),
    Timeout,
    Error,
}

impl<T> Poll<T> {
    pub fn is_busy(&self) -> bool {
        matches!(self, Poll::Busy)
    }

    /// Finished, either way.
    pub fn is_done(&self) -> bool {
        !self.is_busy()
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Poll<U> {
        match self {
            Poll::Busy => Poll::Busy,
            Poll::Success(v) => Poll::Success(f(v)),
            Poll::Timeout => Poll::Timeout,
            Poll::Error => Poll::Error,
        }
    }

    /// Turn a terminal outcome into a `Result`, `None` while busy.
    pub fn into_result(self) -> Option<Result<T, Failure>> {
        match self {
            Poll::Busy => None,
            Poll::Success(v) => Some(Ok(v)),
            Poll::Timeout => Some(Err(Failure::Timeout)),
            Poll::Error => Some(Err(Failure::Error)),
        }
    }
}

impl<T, E> From<Result<T, E>> for Poll<T> {
    fn from(res: Result<T, E>) -> Self {
        match res {
            Ok(v) => Poll::Success(v),
            Err(_) => Poll::Error,
        }
    }
}

/// Non-success terminal outcome of an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Failure {
    Timeout,
    Error,
}

/// Milliseconds since boot, as provided by the platform clock.
pub type Millis = u64;

/// A resumable operation over some resource `R`.
pub trait Operation<R: ?Sized> {
    type Output;

    fn poll(&mut self, res: &mut R, now: Millis) -> Poll<Self::Output>;
}

/// Absolute deadline helper shared by the operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Deadline {
    at: Millis,
}

impl Deadline {
    pub fn after(now: Millis, budget_ms: u64) -> Self {
        Self {
            at: now.saturating_add(budget_ms),
        }
    }

    pub fn expired(&self, now: Millis) -> bool {
        now >= self.at
    }
}

/// Drive an operation to completion, for host-side callers and tests.
///
/// `tick` is invoked after every busy poll to advance time.
pub fn block_on<R, O: Operation<R>>(
    op: &mut O,
    res: &mut R,
    mut now: impl FnMut() -> Millis,
    mut tick: impl FnMut(&mut R),
) -> Poll<O::Output> {
    loop {
        match op.poll(res, now()) {
            Poll::Busy => tick(res),
            done => return done,
        }
    }
}
