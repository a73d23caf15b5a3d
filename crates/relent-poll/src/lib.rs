//! # relent-poll
//!
//! Cancellable file-descriptor readiness waits for [`relent`] tokens.
//!
//! [`poll`] waits for a descriptor to become ready *or* for the token to be
//! cancelled; [`read`] builds a cancellable read on top of it. The wake-up
//! channel is an out-of-band descriptor added to the poll set: an `eventfd`
//! on Linux, a pipe pair on other Unix systems. The cancel handler writes to
//! it; the poll returns immediately.
//!
//! Cancellation is reported through the return value ([`Events::NONE`],
//! `Ok(0)`), never as an error. System-call failures surface as
//! [`std::io::Error`] with the platform error code.
//!
//! This crate is Unix-only; the rest of `relent` is portable.
//!
//! ## Example
//!
//! ```rust
//! use relent::{CancelToken, StandaloneToken};
//! use relent_poll::{poll, Events};
//! use std::os::unix::io::AsRawFd;
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let (reader, _writer) = std::io::pipe().unwrap();
//! let token = Arc::new(StandaloneToken::new());
//! token.cancel_after(Duration::from_millis(10));
//!
//! // Nobody writes; the wait ends when the token cancels.
//! let revents = poll(reader.as_raw_fd(), Events::IN, None, &*token).unwrap();
//! assert_eq!(revents, Events::NONE);
//! assert!(token.is_cancelled());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![cfg(unix)]

use std::fmt;
use std::io;
use std::ops::{BitAnd, BitOr, BitOrAssign};
use std::os::unix::io::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::{Duration, Instant};

use relent::{CancelGuard, CancelHandler, CancelToken};

/// Readiness events for [`poll`]: a thin wrapper over the platform's
/// `poll(2)` bits.
///
/// Combine with `|`; test with [`contains`](Self::contains). `ERR`, `HUP`
/// and `NVAL` are only ever reported, never requested, but including them in
/// a request mask is harmless (the kernel ignores them).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Events(libc::c_short);

impl Events {
    /// No events: the empty mask, also the cancellation result.
    pub const NONE: Events = Events(0);
    /// Readable (`POLLIN`).
    pub const IN: Events = Events(libc::POLLIN);
    /// Writable (`POLLOUT`).
    pub const OUT: Events = Events(libc::POLLOUT);
    /// Urgent data readable (`POLLPRI`).
    pub const PRI: Events = Events(libc::POLLPRI);
    /// Error condition (`POLLERR`, reported only).
    pub const ERR: Events = Events(libc::POLLERR);
    /// Hang-up (`POLLHUP`, reported only).
    pub const HUP: Events = Events(libc::POLLHUP);
    /// Invalid descriptor (`POLLNVAL`, reported only).
    pub const NVAL: Events = Events(libc::POLLNVAL);

    /// The raw `poll(2)` bits.
    #[inline]
    pub const fn bits(self) -> libc::c_short {
        self.0
    }

    /// Wrap raw `poll(2)` bits.
    #[inline]
    pub const fn from_bits(bits: libc::c_short) -> Events {
        Events(bits)
    }

    /// Whether every bit of `other` is set in `self`.
    #[inline]
    pub const fn contains(self, other: Events) -> bool {
        self.0 & other.0 == other.0
    }

    /// Whether any bit of `other` is set in `self`.
    #[inline]
    pub const fn intersects(self, other: Events) -> bool {
        self.0 & other.0 != 0
    }

    /// Whether no bits are set.
    #[inline]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for Events {
    type Output = Events;

    #[inline]
    fn bitor(self, rhs: Events) -> Events {
        Events(self.0 | rhs.0)
    }
}

impl BitOrAssign for Events {
    #[inline]
    fn bitor_assign(&mut self, rhs: Events) {
        self.0 |= rhs.0;
    }
}

impl BitAnd for Events {
    type Output = Events;

    #[inline]
    fn bitand(self, rhs: Events) -> Events {
        Events(self.0 & rhs.0)
    }
}

impl fmt::Debug for Events {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const NAMES: [(Events, &str); 6] = [
            (Events::IN, "IN"),
            (Events::OUT, "OUT"),
            (Events::PRI, "PRI"),
            (Events::ERR, "ERR"),
            (Events::HUP, "HUP"),
            (Events::NVAL, "NVAL"),
        ];
        let mut set = f.debug_set();
        for (event, name) in NAMES {
            if self.contains(event) {
                set.entry(&name);
            }
        }
        set.finish()
    }
}

/// The out-of-band wake-up descriptor.
///
/// Linux: an `eventfd` counter — `cancel` adds one (writes coalesce;
/// the blocking write cannot realistically block on a 64-bit counter),
/// `reset` drains it back to zero.
#[cfg(target_os = "linux")]
struct WakeFd {
    fd: OwnedFd,
}

#[cfg(target_os = "linux")]
impl WakeFd {
    fn new() -> io::Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: freshly created descriptor, owned by nothing else.
        Ok(Self {
            fd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    fn poll_fd(&self) -> RawFd {
        self.fd.as_raw_fd()
    }

    fn wake(&self) {
        let value: u64 = 1;
        let written = unsafe {
            libc::write(
                self.fd.as_raw_fd(),
                std::ptr::addr_of!(value).cast(),
                std::mem::size_of::<u64>(),
            )
        };
        assert!(
            written == std::mem::size_of::<u64>() as isize,
            "eventfd wake write failed: {}",
            io::Error::last_os_error()
        );
    }

    fn drain(&self) {
        let mut value: u64 = 0;
        let read = unsafe {
            libc::read(
                self.fd.as_raw_fd(),
                std::ptr::addr_of_mut!(value).cast(),
                std::mem::size_of::<u64>(),
            )
        };
        assert!(
            read == std::mem::size_of::<u64>() as isize,
            "eventfd drain read failed: {}",
            io::Error::last_os_error()
        );
    }
}

/// The out-of-band wake-up descriptor.
///
/// Non-Linux Unix: a pipe pair — `cancel` writes one byte, `reset` reads it
/// back.
#[cfg(all(unix, not(target_os = "linux")))]
struct WakeFd {
    read: OwnedFd,
    write: OwnedFd,
}

#[cfg(all(unix, not(target_os = "linux")))]
impl WakeFd {
    fn new() -> io::Result<Self> {
        let mut fds = [0 as RawFd; 2];
        if unsafe { libc::pipe(fds.as_mut_ptr()) } != 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: freshly created descriptors, owned by nothing else.
        unsafe {
            Ok(Self {
                read: OwnedFd::from_raw_fd(fds[0]),
                write: OwnedFd::from_raw_fd(fds[1]),
            })
        }
    }

    fn poll_fd(&self) -> RawFd {
        self.read.as_raw_fd()
    }

    fn wake(&self) {
        let byte = 0u8;
        let written =
            unsafe { libc::write(self.write.as_raw_fd(), std::ptr::addr_of!(byte).cast(), 1) };
        assert!(
            written == 1,
            "pipe wake write failed: {}",
            io::Error::last_os_error()
        );
    }

    fn drain(&self) {
        let mut byte = 0u8;
        let read =
            unsafe { libc::read(self.read.as_raw_fd(), std::ptr::addr_of_mut!(byte).cast(), 1) };
        assert!(
            read == 1,
            "pipe drain read failed: {}",
            io::Error::last_os_error()
        );
    }
}

/// Handler that wakes a `poll(2)` by writing to the wake-up descriptor.
///
/// Owns the descriptor(s); dropping the handler closes them whatever the
/// outcome of the wait.
struct PollCancelHandler {
    wake: WakeFd,
}

impl PollCancelHandler {
    fn new() -> io::Result<Self> {
        Ok(Self {
            wake: WakeFd::new()?,
        })
    }

    fn poll_fd(&self) -> RawFd {
        self.wake.poll_fd()
    }
}

impl CancelHandler for PollCancelHandler {
    fn cancel(&self) {
        self.wake.wake();
    }

    fn reset(&self) {
        self.wake.drain();
    }
}

fn timeout_ms(deadline: Option<Instant>) -> libc::c_int {
    match deadline {
        None => -1,
        Some(deadline) => {
            let remaining = deadline.saturating_duration_since(Instant::now());
            // Round up so a 1ns remainder does not spin.
            let ms = remaining
                .as_millis()
                .saturating_add(u128::from(remaining.subsec_nanos() % 1_000_000 != 0));
            ms.min(libc::c_int::MAX as u128) as libc::c_int
        }
    }
}

/// Wait for `fd` to become ready for `events`, for the token to be
/// cancelled, or for `timeout` to elapse (`None` waits forever).
///
/// Returns `fd`'s reported events: a mask overlapping `events` (or `ERR`/
/// `HUP`/`NVAL`) on readiness, and [`Events::NONE`] on cancellation —
/// whether the token was already cancelled on entry or cancelled during the
/// wait — or on timeout. Interrupted waits (`EINTR`) are retried with the
/// remaining time; other `poll(2)` failures are returned as the OS error.
pub fn poll<C: CancelToken + ?Sized>(
    fd: RawFd,
    events: Events,
    timeout: Option<Duration>,
    token: &C,
) -> io::Result<Events> {
    let handler = PollCancelHandler::new()?;
    // SAFETY: the guard lives on this frame below the handler and is
    // dropped before it on every path out of this function.
    let guard = unsafe { CancelGuard::new(token, &handler) };
    if guard.is_cancelled() {
        return Ok(Events::NONE);
    }

    let mut fds = [
        libc::pollfd {
            fd,
            events: events.bits(),
            revents: 0,
        },
        libc::pollfd {
            fd: handler.poll_fd(),
            events: libc::POLLIN,
            revents: 0,
        },
    ];
    let deadline = timeout.map(|timeout| Instant::now() + timeout);

    loop {
        let rc = unsafe { libc::poll(fds.as_mut_ptr(), 2, timeout_ms(deadline)) };
        if rc >= 0 {
            return Ok(Events::from_bits(fds[0].revents));
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}

/// Cancellable read: wait for `fd` to become readable, then read once.
///
/// Returns `Ok(0)` when the token is cancelled before any data arrives
/// (indistinguishable from end-of-file, as with the plain `read(2)` idiom
/// this wraps); otherwise the result of the `read(2)`.
pub fn read<C: CancelToken + ?Sized>(fd: RawFd, buf: &mut [u8], token: &C) -> io::Result<usize> {
    if !poll(fd, Events::IN, None, token)?.contains(Events::IN) {
        return Ok(0);
    }
    loop {
        let rc = unsafe { libc::read(fd, buf.as_mut_ptr().cast(), buf.len()) };
        if rc >= 0 {
            return Ok(rc as usize);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return Err(err);
        }
    }
}
