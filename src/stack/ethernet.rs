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

// Ethernet II framing. No VLAN tags, and the driver handles the FCS.

use crate::buf::FrameBuffer;
use crate::error::NetError;
use crate::netif::NetDevice;
use crate::timer::Clock;
use crate::util::{self, IPv4Addr, MacAddr};
use crate::NetworkStack;

pub const ETHERTYPE_IPV4: u16 = 0x0800;
pub const ETHERTYPE_ARP: u16 = 0x0806;

pub const ETH_HEADER_LEN: usize = 14;

//    0               1               2               3
//    +-------------------------------+-------------------------------+
//  0 |                     Destination MAC Address                   |
//    +                               +-------------------------------+
//  4 |                               |                               |
//    +-------------------------------+                               +
//  8 |                       Source MAC Address                      |
//    +-------------------------------+-------------------------------+
// 12 |          Ethertype            |
//    +-------------------------------+

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthernetHeader {
    pub dest: MacAddr,
    pub source: MacAddr,
    pub ethertype: u16,
}

impl EthernetHeader {
    /// Split a frame into its header and payload. Trailing padding on short
    /// frames stays in the payload; upper layers trim by their own lengths.
    pub fn parse(frame: &[u8]) -> Result<(EthernetHeader, &[u8]), NetError> {
        if frame.len() < ETH_HEADER_LEN {
            return Err(NetError::Truncated);
        }

        let header = EthernetHeader {
            dest: MacAddr::new_from(&frame[0..6]),
            source: MacAddr::new_from(&frame[6..12]),
            ethertype: util::get_be16(&frame[12..14]),
        };

        Ok((header, &frame[ETH_HEADER_LEN..]))
    }

    pub fn write(&self, header: &mut [u8]) {
        self.dest.copy_to(&mut header[0..6]);
        self.source.copy_to(&mut header[6..12]);
        util::set_be16(&mut header[12..14], self.ethertype);
    }
}

impl<D: NetDevice, C: Clock> NetworkStack<D, C> {
    pub(crate) fn ethernet_input(&mut self, frame: &[u8]) -> Result<(), NetError> {
        let (header, payload) = EthernetHeader::parse(frame)?;
        match header.ethertype {
            ETHERTYPE_ARP => self.arp_input(payload),
            ETHERTYPE_IPV4 => self.ip_input(payload),
            _ => Err(NetError::UnsupportedProtocol),
        }
    }

    /// Send a frame to `next_hop`, which must be on the local link. If its
    /// address isn't known yet, an ARP request goes out instead and the
    /// frame is dropped.
    pub(crate) fn ethernet_output(
        &mut self,
        frame: FrameBuffer,
        next_hop: IPv4Addr,
        ethertype: u16,
    ) -> Result<(), NetError> {
        match self.arp_cache.lookup(next_hop) {
            Some(dest_mac) => self.ethernet_transmit(frame, dest_mac, ethertype),
            None => {
                log::debug!("No ARP entry for {}, frame dropped", next_hop);
                self.arp_send_request(next_hop);
                Err(NetError::HostUnresolved)
            }
        }
    }

    pub(crate) fn ethernet_transmit(
        &mut self,
        mut frame: FrameBuffer,
        dest_mac: MacAddr,
        ethertype: u16,
    ) -> Result<(), NetError> {
        frame.alloc_header(ETH_HEADER_LEN)?;
        let header = EthernetHeader {
            dest: dest_mac,
            source: self.config.mac,
            ethertype,
        };

        header.write(frame.header_mut());
        self.device.transmit(frame.as_slice());
        self.stats.packets_sent.inc();
        Ok(())
    }
}
