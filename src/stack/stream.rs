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

// Byte-stream view of an established connection, so callers can use
// std::io::Read/Write (and things layered on them, like BufReader).

use crate::netif::NetDevice;
use crate::poll::{self, Scheduler};
use crate::tcp::ConnectionId;
use crate::timer::Clock;
use crate::NetworkStack;
use std::io;

const DEFAULT_READ_TIMEOUT_MS: u64 = 5000;

/// Reads wait for data by polling the stack and yielding to `scheduler`,
/// up to the read timeout. Writes never wait.
pub struct TcpStream<'a, D: NetDevice, C: Clock, S: Scheduler> {
    stack: &'a mut NetworkStack<D, C>,
    scheduler: S,
    id: ConnectionId,
    read_timeout_ms: u64,
}

impl<'a, D: NetDevice, C: Clock, S: Scheduler> TcpStream<'a, D, C, S> {
    pub fn new(stack: &'a mut NetworkStack<D, C>, id: ConnectionId, scheduler: S) -> Self {
        TcpStream {
            stack,
            scheduler,
            id,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
        }
    }

    pub fn set_read_timeout(&mut self, timeout_ms: u64) {
        self.read_timeout_ms = timeout_ms;
    }
}

impl<D: NetDevice, C: Clock, S: Scheduler> io::Read for TcpStream<'_, D, C, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }

        let id = self.id;
        poll::wait_until(
            &mut *self.stack,
            &mut self.scheduler,
            self.read_timeout_ms,
            |stack| {
                stack.tcp_has_data(id)
                    || stack.tcp_peer_closed(id)
                    || !stack.tcp_is_connected(id)
            },
        )?;

        Ok(self.stack.tcp_read(id, buf)?)
    }
}

impl<D: NetDevice, C: Clock, S: Scheduler> io::Write for TcpStream<'_, D, C, S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        Ok(self.stack.tcp_send(self.id, buf)?)
    }

    fn flush(&mut self) -> io::Result<()> {
        // Segments go out as soon as they are written.
        Ok(())
    }
}
