// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! An in-memory register file.
//!
//! Registers read as zero until written.  Every write is also appended to a
//! short history so that tests can check sequences (post codes, mostly) and
//! not just final values.

use heapless::{Deque, LinearMap};
use spin::Mutex;

use crate::RegisterIo;

const MAX_REGS: usize = 32;
const HISTORY: usize = 64;

struct Inner {
    values: LinearMap<u32, u32, MAX_REGS>,
    writes: Deque<(u32, u32), HISTORY>,
}

pub struct ShadowRegisters {
    inner: Mutex<Inner>,
}

impl Default for ShadowRegisters {
    fn default() -> Self {
        Self::new()
    }
}

impl ShadowRegisters {
    pub const fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                values: LinearMap::new(),
                writes: Deque::new(),
            }),
        }
    }

    /// Calls `f` with each value written to `addr`, oldest first, as far
    /// back as the history reaches.
    pub fn writes_to(&self, addr: u32, mut f: impl FnMut(u32)) {
        let inner = self.inner.lock();
        for &(a, v) in inner.writes.iter() {
            if a == addr {
                f(v);
            }
        }
    }

    pub fn clear_history(&self) {
        self.inner.lock().writes.clear();
    }
}

impl RegisterIo for ShadowRegisters {
    fn read(&self, addr: u32) -> u32 {
        self.inner.lock().values.get(&addr).copied().unwrap_or(0)
    }

    fn write(&self, addr: u32, value: u32) {
        let mut inner = self.inner.lock();

        // More distinct registers than we have room for is a test bug.
        if inner.values.insert(addr, value).is_err() {
            panic!("shadow register file full at {addr:#x}");
        }

        if inner.writes.is_full() {
            inner.writes.pop_front();
        }
        let _ = inner.writes.push_back((addr, value));
    }
}
