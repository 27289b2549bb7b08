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

// A small IPv4/TCP client stack for a single-core kernel. Everything runs on
// the caller's context: a NIC interrupt handler hands frames to
// receive_frame(), and a cooperatively scheduled task calls poll() to pull
// frames from polled drivers and drive SYN retransmission. Nothing here
// blocks or spawns, and there is no locking; callers must not enter the
// stack from two contexts at once (the interrupt controller masks the NIC
// interrupt while its handler runs).

pub mod arp;
pub mod buf;
pub mod error;
pub mod ethernet;
pub mod ip;
pub mod logger;
pub mod netif;
pub mod poll;
pub mod stream;
pub mod tcp;
pub mod timer;
pub mod util;

#[cfg(test)]
mod testutil;

pub use error::NetError;
pub use netif::{NetConfig, NetDevice};
pub use tcp::{ConnectionId, TcpState};
pub use timer::Clock;
pub use util::{IPv4Addr, MacAddr};

// Upper bound on frames handled per poll() so a flood can't starve the
// caller.
const POLL_BUDGET: usize = 32;

const RECEIVE_BUFFER_LEN: usize = 2048;

pub struct NetworkStack<D: NetDevice, C: Clock> {
    pub(crate) config: NetConfig,
    pub(crate) device: D,
    pub(crate) clock: C,
    pub(crate) arp_cache: arp::ArpCache,
    pub(crate) connections: tcp::ConnectionTable,
    pub(crate) next_packet_id: u16,
    pub(crate) stats: util::Statistics,
}

impl<D: NetDevice, C: Clock> NetworkStack<D, C> {
    pub fn new(config: NetConfig, device: D, clock: C) -> Self {
        NetworkStack {
            config,
            device,
            clock,
            arp_cache: arp::ArpCache::new(),
            connections: tcp::ConnectionTable::new(),
            next_packet_id: 0,
            stats: util::Statistics::new(),
        }
    }

    /// Reset all tables and start resolving the gateway, which nearly every
    /// connection will route through.
    pub fn init(&mut self) {
        self.arp_cache.clear();
        self.connections.clear();
        log::info!(
            "Network stack init: {} ({}) gateway {}",
            self.config.ip,
            self.config.mac,
            self.config.gateway
        );

        let gateway = self.config.gateway;
        self.arp_send_request(gateway);
    }

    /// Entry point for one received Ethernet frame. Frames that are
    /// malformed, not for us, or not understood are dropped.
    pub fn receive_frame(&mut self, frame: &[u8]) {
        self.stats.packets_received.inc();
        if let Err(err) = self.ethernet_input(frame) {
            log::debug!("Dropped frame ({} bytes): {}", frame.len(), err);
        }
    }

    /// Process frames waiting in a polled driver, then run the
    /// retransmission sweep. Returns the number of frames processed.
    pub fn poll(&mut self) -> usize {
        let mut buffer = [0u8; RECEIVE_BUFFER_LEN];
        let mut count = 0;
        while count < POLL_BUDGET {
            match self.device.receive(&mut buffer) {
                Some(length) => {
                    let length = std::cmp::min(length, buffer.len());
                    self.receive_frame(&buffer[..length]);
                    count += 1;
                }

                None => break,
            }
        }

        self.tcp_timer_poll();

        count
    }

    pub fn config(&self) -> &NetConfig {
        &self.config
    }

    pub fn device(&self) -> &D {
        &self.device
    }

    pub fn device_mut(&mut self) -> &mut D {
        &mut self.device
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn arp_cache(&self) -> &arp::ArpCache {
        &self.arp_cache
    }

    pub fn stats(&self) -> &util::Statistics {
        &self.stats
    }
}
