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

// Helpers for callers that need to wait on the network. The stack itself
// never waits; these alternate NetworkStack::poll() with a yield to the
// scheduler until a condition holds or the time runs out.

use crate::error::NetError;
use crate::netif::NetDevice;
use crate::tcp::{ConnectionId, TcpState};
use crate::timer::{self, Clock};
use crate::NetworkStack;

pub trait Scheduler {
    fn cooperative_yield(&mut self);
}

/// Scheduler for host processes: gives up the rest of the time slice.
#[derive(Debug, Default)]
pub struct SpinYield;

impl Scheduler for SpinYield {
    fn cooperative_yield(&mut self) {
        std::thread::yield_now();
    }
}

pub fn wait_until<D, C, S, F>(
    stack: &mut NetworkStack<D, C>,
    scheduler: &mut S,
    timeout_ms: u64,
    mut predicate: F,
) -> Result<(), NetError>
where
    D: NetDevice,
    C: Clock,
    S: Scheduler,
    F: FnMut(&NetworkStack<D, C>) -> bool,
{
    let start = stack.clock().now_ms();
    loop {
        stack.poll();
        if predicate(stack) {
            return Ok(());
        }

        if timer::has_expired(stack.clock().now_ms(), start, timeout_ms) {
            return Err(NetError::TimedOut);
        }

        scheduler.cooperative_yield();
    }
}

/// Wait for the handshake on `id` to finish. A connection that ends up
/// closed (reset, or out of SYN retries) is reported as refused.
pub fn wait_connected<D, C, S>(
    stack: &mut NetworkStack<D, C>,
    scheduler: &mut S,
    id: ConnectionId,
    timeout_ms: u64,
) -> Result<(), NetError>
where
    D: NetDevice,
    C: Clock,
    S: Scheduler,
{
    wait_until(stack, scheduler, timeout_ms, |stack| {
        !matches!(stack.tcp_state(id), Ok(TcpState::SynSent))
    })?;

    match stack.tcp_state(id)? {
        TcpState::Established => Ok(()),
        _ => Err(NetError::ConnectionRefused),
    }
}
