// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Ring buffer for tracing controller firmware
//!
//! This contains an implementation for a static ring buffer designed to be used
//! to instrument arbitrary contexts, including interrupt handlers and the
//! byte callbacks of a bus driver.  The ring buffers are the only record of
//! what the messaging core did: there is no console on the control core, so
//! the buffers are read out with a debugger, or directly from host-side tests
//! via [`Ringbuf::last`] and [`Ringbuf::entries`].
//!
//! ## Constraints
//!
//! The type in the ring buffer must implement both `Copy` and `PartialEq`.
//!
//! If you use the variants of the `ringbuf!` macro that leave the name of the
//! data structure implicit, you can only have one per module. (You can lift
//! this constraint by providing a name.)
//!
//! Recording never blocks.  If an entry is being recorded from one context
//! while another context (say, an interrupt) tries to record into the same
//! buffer, the second entry is dropped and counted in [`Ringbuf::dropped`].
//!
//! ## Creating a ring buffer
//!
//! ```
//! # use ringbuf::*;
//! #[derive(Copy, Clone, PartialEq)]
//! enum Trace {
//!     None,
//!     Doorbell,
//!     Drained(u8),
//! }
//!
//! ringbuf!(Trace, 16, Trace::None);
//!
//! ringbuf_entry!(Trace::Drained(3));
//! ```
//!
//! You can also provide a name for the ring buffer, to distinguish between them
//! if you have more than one:
//!
//! ```
//! # use ringbuf::*;
//! ringbuf!(PEC_RINGBUF, (u8, u8), 8, (0, 0));
//!
//! ringbuf_entry!(PEC_RINGBUF, (0x3c, 0x3c));
//! ```

#![cfg_attr(not(test), no_std)]

use core::sync::atomic::{AtomicU32, Ordering};
use spin::Mutex;

/// Declares a ringbuffer in the current module or context.
///
/// `ringbuf!(NAME, Type, N, expr)` makes a ringbuffer named `NAME`,
/// containing entries of type `Type`, with room for `N` such entries, all of
/// which are initialized to `expr`.
///
/// The resulting ringbuffer will be static, so `NAME` should be uppercase,
/// and should end in `RINGBUF` so that it can be found by name in a symbol
/// table.
///
/// To support the common case of having one quickly-installed ringbuffer per
/// module, if you omit the name, it will default to `__RINGBUF`.
#[cfg(not(feature = "disabled"))]
#[macro_export]
macro_rules! ringbuf {
    ($name:ident, $t:ty, $n:expr, $init:expr) => {
        #[used]
        static $name: $crate::Ringbuf<$t, $n> = $crate::Ringbuf::new($init);
    };
    ($t:ty, $n:expr, $init:expr) => {
        $crate::ringbuf!(__RINGBUF, $t, $n, $init);
    };
}

#[cfg(feature = "disabled")]
#[macro_export]
macro_rules! ringbuf {
    ($name:ident, $t:ty, $n:expr, $init:expr) => {
        #[allow(dead_code)]
        const _: $t = $init;
    };
    ($t:ty, $n:expr, $init:expr) => {
        #[allow(dead_code)]
        const _: $t = $init;
    };
}

/// Inserts data into a named ringbuffer (which should have been declared with
/// the `ringbuf!` macro).
///
/// `ringbuf_entry!(NAME, expr)` will insert `expr` into the ringbuffer called
/// `NAME`.
///
/// If you declared your ringbuffer without a name, you can also use this
/// without a name, and it will default to `__RINGBUF`.
#[cfg(not(feature = "disabled"))]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        // Evaluate both buf and payload, without letting them access each
        // other, by evaluating them in a tuple where each cannot
        // accidentally use the other's binding.
        let (p, buf) = ($payload, &$buf);
        $crate::Ringbuf::entry(buf, line!() as u16, p);
    }};
    ($payload:expr) => {
        $crate::ringbuf_entry!(__RINGBUF, $payload);
    };
}

#[cfg(feature = "disabled")]
#[macro_export]
macro_rules! ringbuf_entry {
    ($buf:expr, $payload:expr) => {{
        let _ = &$payload;
    }};
    ($payload:expr) => {{
        let _ = &$payload;
    }};
}

/// Inserts data into a ringbuffer at the root of this crate.
#[cfg(not(feature = "disabled"))]
#[allow(clippy::crate_in_macro_def)]
#[macro_export]
macro_rules! ringbuf_entry_root {
    ($buf:ident, $payload:expr) => {
        $crate::ringbuf_entry!(crate::$buf, $payload);
    };
    ($payload:expr) => {
        $crate::ringbuf_entry!(crate::__RINGBUF, $payload);
    };
}

#[cfg(feature = "disabled")]
#[macro_export]
macro_rules! ringbuf_entry_root {
    ($buf:ident, $payload:expr) => {{
        let _ = &$payload;
    }};
    ($payload:expr) => {{
        let _ = &$payload;
    }};
}

///
/// The structure of a single [`Ringbuf`] entry, carrying a payload of arbitrary
/// type.  When a ring buffer entry is generated with an identical payload to
/// the most recent entry (in terms of both `line` and `payload`), `count` will
/// be incremented rather than generating a new entry.
///
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct RingbufEntry<T: Copy + PartialEq> {
    pub line: u16,
    pub generation: u16,
    pub count: u32,
    pub payload: T,
}

#[derive(Debug)]
struct Contents<T: Copy + PartialEq, const N: usize> {
    last: Option<usize>,
    buffer: [RingbufEntry<T>; N],
}

///
/// A ring buffer of parametrized type and size.  In practice, instantiating
/// this directly is strange -- see the [`ringbuf!`] macro.
///
#[derive(Debug)]
pub struct Ringbuf<T: Copy + PartialEq, const N: usize> {
    contents: Mutex<Contents<T, N>>,
    dropped: AtomicU32,
}

impl<T: Copy + PartialEq, const N: usize> Ringbuf<T, N> {
    pub const fn new(init: T) -> Self {
        Self {
            contents: Mutex::new(Contents {
                last: None,
                buffer: [RingbufEntry {
                    line: 0,
                    generation: 0,
                    count: 0,
                    payload: init,
                }; N],
            }),
            dropped: AtomicU32::new(0),
        }
    }

    /// Records `payload` as having come from `line`.
    pub fn entry(&self, line: u16, payload: T) {
        match self.contents.try_lock() {
            Some(mut contents) => contents.record(line, payload),
            None => {
                // Someone we preempted is mid-entry; waiting for them would
                // deadlock, so this entry is lost.
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Returns the most recently recorded entry, if any.
    pub fn last(&self) -> Option<RingbufEntry<T>> {
        let contents = self.contents.lock();
        contents.last.and_then(|ndx| contents.buffer.get(ndx).copied())
    }

    /// Copies out every recorded entry, oldest first, calling `f` on each.
    pub fn entries(&self, mut f: impl FnMut(&RingbufEntry<T>)) {
        let contents = self.contents.lock();
        let Some(last) = contents.last else {
            return;
        };

        // Entries that have never been written have a generation of zero;
        // starting just past the most recent entry walks the ring in order.
        let mut ndx = last;
        for _ in 0..N {
            ndx = next_index(ndx, N);
            if let Some(ent) = contents.buffer.get(ndx) {
                if ent.generation != 0 {
                    f(ent);
                }
            }
        }
    }

    /// Number of entries lost to contention.
    pub fn dropped(&self) -> u32 {
        self.dropped.load(Ordering::Relaxed)
    }
}

/// The slot after `ndx` in a ring of `len`.  No remainder operation: many of
/// our targets lack hardware divide.  This also turns usize::MAX into 0 for
/// the starting condition.
fn next_index(ndx: usize, len: usize) -> usize {
    let next = ndx.wrapping_add(1);
    if next >= len {
        0
    } else {
        next
    }
}

impl<T: Copy + PartialEq, const N: usize> Contents<T, N> {
    fn record(&mut self, line: u16, payload: T) {
        // A last index of None is treated as out of range, so the first entry
        // lands in slot 0 and doesn't bump the count of an existing entry.
        let last = self.last.unwrap_or(usize::MAX);

        if let Some(ent) = self.buffer.get_mut(last) {
            if ent.line == line && ent.payload == payload {
                // Only reuse this entry if we don't overflow the count.
                if let Some(new_count) = ent.count.checked_add(1) {
                    ent.count = new_count;
                    return;
                }
            }
        }

        let ndx = next_index(last, self.buffer.len());

        let ent = &mut self.buffer[ndx];
        *ent = RingbufEntry {
            line,
            payload,
            count: 1,
            generation: ent.generation.wrapping_add(1).max(1),
        };

        self.last = Some(ndx);
    }
}
