//
// Copyright 2024-2025 Jeff Bush
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//

//
// Time source for the stack.
// There are no timer callbacks here. The only time-based behavior is SYN
// retransmission, and that is checked by a linear sweep whenever the owner
// calls tcp_timer_poll(). All the stack needs is a monotonically increasing
// millisecond count, which in the kernel comes from the tick counter and on
// a host comes from Instant.
//

use lazy_static::lazy_static;
use std::cell::Cell;
use std::rc::Rc;
use std::time::Instant;

pub trait Clock {
    /// Milliseconds since an arbitrary fixed point. Must never go backwards.
    fn now_ms(&self) -> u64;
}

lazy_static! {
    static ref CLOCK_EPOCH: Instant = Instant::now();
}

/// Host monotonic clock. All instances share one epoch.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    pub fn new() -> SystemClock {
        lazy_static::initialize(&CLOCK_EPOCH);
        SystemClock
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        CLOCK_EPOCH.elapsed().as_millis() as u64
    }
}

/// A clock that only moves when told to. Clones share the same time, so a
/// test (or a simulation driver) can keep one handle and advance it while
/// the stack owns the other.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<u64>>,
}

impl ManualClock {
    pub fn new(start_ms: u64) -> ManualClock {
        ManualClock {
            now: Rc::new(Cell::new(start_ms)),
        }
    }

    pub fn advance(&self, ms: u64) {
        self.now.set(self.now.get() + ms);
    }

    pub fn set(&self, ms: u64) {
        self.now.set(ms);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.get()
    }
}

/// True when strictly more than `timeout_ms` has passed since `start_ms`.
pub fn has_expired(now_ms: u64, start_ms: u64, timeout_ms: u64) -> bool {
    now_ms.saturating_sub(start_ms) > timeout_ms
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;
    use std::time::Duration;

    #[test]
    fn test_system_clock_monotonic() {
        let clock = SystemClock::new();
        let first = clock.now_ms();
        sleep(Duration::from_millis(20));
        let second = clock.now_ms();
        assert!(second >= first + 10);
    }

    #[test]
    fn test_manual_clock_shared() {
        let clock = ManualClock::new(100);
        let handle = clock.clone();
        handle.advance(50);
        assert_eq!(clock.now_ms(), 150);
        handle.set(1000);
        assert_eq!(clock.now_ms(), 1000);
    }

    #[test]
    fn test_has_expired() {
        assert!(!has_expired(1000, 0, 1000));
        assert!(has_expired(1001, 0, 1000));
        assert!(!has_expired(5, 10, 1000));
    }
}
