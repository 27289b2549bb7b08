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

// Internet Protocol as described in RFC 791

use crate::buf::FrameBuffer;
use crate::error::NetError;
use crate::ethernet::ETHERTYPE_IPV4;
use crate::netif::{NetConfig, NetDevice};
use crate::timer::Clock;
use crate::util::{self, IPv4Addr};
use crate::NetworkStack;

pub const PROTO_TCP: u8 = 6;

pub const IPV4_BASE_HEADER_LEN: usize = 20;
const DEFAULT_TTL: u8 = 64;

//    0               1               2               3
//    +-------+-------+---------------+-------------------------------+
//  0 |Version|  IHL  |Type of Service|          Total Length         |
//    +-------+-------+---------------+-----+-------------------------+
//  4 |         Identification        |Flags|      Fragment Offset    |
//    +---------------+---------------+-----+-------------------------+
//  8 |  Time to Live |    Protocol   |         Header Checksum       |
//    +---------------+---------------+-------------------------------+
// 12 |                       Source Address                          |
//    +---------------------------------------------------------------+
// 16 |                    Destination Address                        |
//    +-----------------------------------------------+---------------+
// 20 |                    Options                    |    Padding    |
//    +-----------------------------------------------+---------------+

#[derive(Debug, Clone)]
pub struct Ipv4Header {
    pub header_len: usize,
    pub total_len: usize,
    pub ident: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub source: IPv4Addr,
    pub dest: IPv4Addr,
}

impl Ipv4Header {
    /// Validate a received packet and return its header and payload. The
    /// payload is cut at the total length, which drops any Ethernet padding.
    /// Options are skipped, not decoded.
    pub fn parse(packet: &[u8]) -> Result<(Ipv4Header, &[u8]), NetError> {
        if packet.len() < IPV4_BASE_HEADER_LEN {
            return Err(NetError::Truncated);
        }

        if packet[0] >> 4 != 4 {
            return Err(NetError::Malformed);
        }

        let header_len = ((packet[0] & 0xf) as usize) * 4;
        if header_len < IPV4_BASE_HEADER_LEN {
            return Err(NetError::Malformed);
        }

        if header_len > packet.len() {
            return Err(NetError::Truncated);
        }

        let total_len = util::get_be16(&packet[2..4]) as usize;
        if total_len < header_len {
            return Err(NetError::Malformed);
        }

        if total_len > packet.len() {
            return Err(NetError::Truncated);
        }

        if util::compute_checksum(&packet[..header_len]) != 0 {
            return Err(NetError::BadChecksum);
        }

        let header = Ipv4Header {
            header_len,
            total_len,
            ident: util::get_be16(&packet[4..6]),
            ttl: packet[8],
            protocol: packet[9],
            source: IPv4Addr::new_from(&packet[12..16]),
            dest: IPv4Addr::new_from(&packet[16..20]),
        };

        Ok((header, &packet[header_len..total_len]))
    }
}

/// Address to resolve with ARP for a packet to `dest`: the host itself when
/// it is on the local subnet, otherwise the gateway.
pub fn next_hop(config: &NetConfig, dest: IPv4Addr) -> IPv4Addr {
    if config.is_on_link(dest) {
        dest
    } else {
        config.gateway
    }
}

impl<D: NetDevice, C: Clock> NetworkStack<D, C> {
    pub(crate) fn ip_input(&mut self, packet: &[u8]) -> Result<(), NetError> {
        let (header, payload) = Ipv4Header::parse(packet)?;
        if header.dest != self.config.ip {
            return Err(NetError::NotForUs);
        }

        // Fragments are not reassembled. Each one goes up as-is and fails
        // the TCP checksum.
        match header.protocol {
            PROTO_TCP => self.tcp_input(header.source, header.dest, payload),
            _ => {
                log::debug!("IP: Unknown protocol {} from {}", header.protocol, header.source);
                Err(NetError::UnsupportedProtocol)
            }
        }
    }

    pub(crate) fn ip_output(
        &mut self,
        mut frame: FrameBuffer,
        protocol: u8,
        dest: IPv4Addr,
    ) -> Result<(), NetError> {
        frame.alloc_header(IPV4_BASE_HEADER_LEN)?;
        let packet_length = frame.len() as u16;
        let ident = self.next_packet_id;
        self.next_packet_id = self.next_packet_id.wrapping_add(1);

        let source = self.config.ip;
        let header = frame.header_mut();
        header[0] = 0x45; // Version/IHL
        util::set_be16(&mut header[2..4], packet_length); // Total Length
        util::set_be16(&mut header[4..6], ident); // ID
        header[8] = DEFAULT_TTL; // TTL
        header[9] = protocol; // Protocol
        source.copy_to(&mut header[12..16]); // Source Address
        dest.copy_to(&mut header[16..20]); // Destination Address

        let checksum = util::compute_checksum(&header[..IPV4_BASE_HEADER_LEN]);
        util::set_be16(&mut header[10..12], checksum);

        let hop = next_hop(&self.config, dest);
        self.ethernet_output(frame, hop, ETHERTYPE_IPV4)
    }
}
