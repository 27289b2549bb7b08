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

// Address Resolution Protocol, as described in RFC 826

use crate::buf::FrameBuffer;
use crate::error::NetError;
use crate::ethernet::ETHERTYPE_ARP;
use crate::ethernet::ETHERTYPE_IPV4;
use crate::netif::NetDevice;
use crate::timer::Clock;
use crate::util::{self, IPv4Addr, MacAddr};
use crate::NetworkStack;

pub const ARP_TABLE_SIZE: usize = 16;

pub const ARP_REQUEST: u16 = 1;
pub const ARP_REPLY: u16 = 2;

const HTYPE_ETHERNET: u16 = 1;
const ARP_PACKET_LEN: usize = 28;

#[derive(Debug, Clone, Copy)]
struct ArpEntry {
    ip: IPv4Addr,
    mac: MacAddr,
    valid: bool,
}

impl ArpEntry {
    const EMPTY: ArpEntry = ArpEntry {
        ip: IPv4Addr::UNSPECIFIED,
        mac: MacAddr::ZERO,
        valid: false,
    };
}

/// Fixed-size IP to MAC table. There is no expiry and no eviction: once all
/// slots are taken, new bindings are refused until init() clears the table.
pub struct ArpCache {
    entries: [ArpEntry; ARP_TABLE_SIZE],
}

impl ArpCache {
    pub const fn new() -> ArpCache {
        ArpCache {
            entries: [ArpEntry::EMPTY; ARP_TABLE_SIZE],
        }
    }

    pub fn lookup(&self, ip: IPv4Addr) -> Option<MacAddr> {
        self.entries
            .iter()
            .find(|entry| entry.valid && entry.ip == ip)
            .map(|entry| entry.mac)
    }

    /// Update the binding for `ip`, or take the first free slot.
    pub fn insert(&mut self, ip: IPv4Addr, mac: MacAddr) -> Result<(), NetError> {
        if let Some(entry) = self
            .entries
            .iter_mut()
            .find(|entry| entry.valid && entry.ip == ip)
        {
            entry.mac = mac;
            return Ok(());
        }

        let entry = self
            .entries
            .iter_mut()
            .find(|entry| !entry.valid)
            .ok_or(NetError::TableFull)?;

        *entry = ArpEntry {
            ip,
            mac,
            valid: true,
        };

        Ok(())
    }

    pub fn clear(&mut self) {
        self.entries = [ArpEntry::EMPTY; ARP_TABLE_SIZE];
    }

    pub fn len(&self) -> usize {
        self.entries.iter().filter(|entry| entry.valid).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (IPv4Addr, MacAddr)> + '_ {
        self.entries
            .iter()
            .filter(|entry| entry.valid)
            .map(|entry| (entry.ip, entry.mac))
    }
}

impl Default for ArpCache {
    fn default() -> Self {
        ArpCache::new()
    }
}

//    0               1               2               3
//    +-------------------------------+-------------------------------+
//  0 |        Hardware Type          |         Protocol Type         |
//    +---------------+---------------+-------------------------------+
//  4 |  HW Addr Len  | Proto Addr Len|          Operation            |
//    +---------------+---------------+-------------------------------+
//  8 |                  Sender Hardware Address                      |
//    +                               +-------------------------------+
// 12 |                               |                               |
//    +-------------------------------+                               +
// 16 |                   Sender Protocol Address                     |
//    +-------------------------------+-------------------------------+
// 20 |                  Target Hardware Address                      |
//    +                               +-------------------------------+
// 24 |                               |   Target Protocol Address     |
//    +-------------------------------+                               +
// 28                                 |                               |
//                                    +-------------------------------+
//
// Protocol addresses are copied through in network order.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArpPacket {
    pub operation: u16,
    pub sender_mac: MacAddr,
    pub sender_ip: IPv4Addr,
    pub target_mac: MacAddr,
    pub target_ip: IPv4Addr,
}

impl ArpPacket {
    pub fn parse(packet: &[u8]) -> Result<ArpPacket, NetError> {
        if packet.len() < ARP_PACKET_LEN {
            return Err(NetError::Truncated);
        }

        if util::get_be16(&packet[0..2]) != HTYPE_ETHERNET
            || util::get_be16(&packet[2..4]) != ETHERTYPE_IPV4
            || packet[4] != 6
            || packet[5] != 4
        {
            return Err(NetError::Malformed);
        }

        Ok(ArpPacket {
            operation: util::get_be16(&packet[6..8]),
            sender_mac: MacAddr::new_from(&packet[8..14]),
            sender_ip: IPv4Addr::new_from(&packet[14..18]),
            target_mac: MacAddr::new_from(&packet[18..24]),
            target_ip: IPv4Addr::new_from(&packet[24..28]),
        })
    }

    pub fn write(&self, packet: &mut [u8]) {
        util::set_be16(&mut packet[0..2], HTYPE_ETHERNET);
        util::set_be16(&mut packet[2..4], ETHERTYPE_IPV4);
        packet[4] = 6;
        packet[5] = 4;
        util::set_be16(&mut packet[6..8], self.operation);
        self.sender_mac.copy_to(&mut packet[8..14]);
        self.sender_ip.copy_to(&mut packet[14..18]);
        self.target_mac.copy_to(&mut packet[18..24]);
        self.target_ip.copy_to(&mut packet[24..28]);
    }
}

impl<D: NetDevice, C: Clock> NetworkStack<D, C> {
    pub(crate) fn arp_input(&mut self, packet: &[u8]) -> Result<(), NetError> {
        let arp = ArpPacket::parse(packet)?;
        match arp.operation {
            ARP_REPLY => {
                log::debug!("ARP: {} is at {}", arp.sender_ip, arp.sender_mac);
                if self.arp_cache.insert(arp.sender_ip, arp.sender_mac).is_err() {
                    log::debug!("ARP: table full, not caching {}", arp.sender_ip);
                }

                Ok(())
            }

            ARP_REQUEST => {
                if arp.target_ip != self.config.ip {
                    return Ok(());
                }

                log::debug!("ARP: who-has {} from {}", arp.target_ip, arp.sender_ip);
                let reply = ArpPacket {
                    operation: ARP_REPLY,
                    sender_mac: self.config.mac,
                    sender_ip: self.config.ip,
                    target_mac: arp.sender_mac,
                    target_ip: arp.sender_ip,
                };

                self.arp_output(&reply, arp.sender_mac)
            }

            _ => Err(NetError::Malformed),
        }
    }

    /// Broadcast a request for `target_ip`. There is no retry here: whoever
    /// needed the address sends again on a later poll, which issues another
    /// request if the reply still hasn't arrived.
    pub fn arp_send_request(&mut self, target_ip: IPv4Addr) {
        let request = ArpPacket {
            operation: ARP_REQUEST,
            sender_mac: self.config.mac,
            sender_ip: self.config.ip,
            target_mac: MacAddr::ZERO,
            target_ip,
        };

        log::debug!("ARP: requesting {}", target_ip);
        self.stats.arp_requests_sent.inc();
        if let Err(err) = self.arp_output(&request, MacAddr::BROADCAST) {
            log::warn!("ARP: could not send request: {}", err);
        }
    }

    fn arp_output(&mut self, arp: &ArpPacket, dest_mac: MacAddr) -> Result<(), NetError> {
        let mut encoded = [0u8; ARP_PACKET_LEN];
        arp.write(&mut encoded);

        let mut frame = FrameBuffer::new();
        frame.append_from_slice(&encoded)?;
        self.ethernet_transmit(frame, dest_mac, ETHERTYPE_ARP)
    }
}
