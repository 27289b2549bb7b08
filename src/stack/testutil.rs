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

// Helpers shared by the unit tests. Frames are assembled by hand here rather
// than with the stack's own encoders, so a bug in an encoder can't hide a
// matching bug in a decoder.

use crate::arp::ArpPacket;
use crate::ethernet::{EthernetHeader, ETHERTYPE_ARP, ETHERTYPE_IPV4};
use crate::ip::Ipv4Header;
use crate::netif::{NetConfig, NetDevice};
use crate::tcp::TcpHeader;
use crate::timer::ManualClock;
use crate::util::{self, IPv4Addr, MacAddr};
use crate::NetworkStack;
use std::collections::VecDeque;

pub const LOCAL_IP: IPv4Addr = IPv4Addr::from_octets([10, 0, 2, 15]);
pub const LOCAL_MAC: MacAddr = MacAddr::from_octets([0x52, 0x54, 0x00, 0x12, 0x34, 0x56]);
pub const GATEWAY_IP: IPv4Addr = IPv4Addr::from_octets([10, 0, 2, 2]);
pub const GATEWAY_MAC: MacAddr = MacAddr::from_octets([0x52, 0x55, 0x0a, 0x00, 0x02, 0x02]);
pub const PEER_IP: IPv4Addr = IPv4Addr::from_octets([10, 0, 2, 20]);
pub const PEER_MAC: MacAddr = MacAddr::from_octets([0x02, 0x00, 0x00, 0x00, 0x00, 0x20]);
pub const REMOTE_IP: IPv4Addr = IPv4Addr::from_octets([93, 184, 216, 34]);

pub const ARP_FRAME_LEN: usize = 14 + 28;

#[derive(Default)]
pub struct MockDevice {
    pub sent: Vec<Vec<u8>>,
    pub inbox: VecDeque<Vec<u8>>,
}

impl NetDevice for MockDevice {
    fn transmit(&mut self, frame: &[u8]) {
        self.sent.push(frame.to_vec());
    }

    fn receive(&mut self, buffer: &mut [u8]) -> Option<usize> {
        let frame = self.inbox.pop_front()?;
        let length = std::cmp::min(frame.len(), buffer.len());
        buffer[..length].copy_from_slice(&frame[..length]);
        Some(length)
    }
}

pub type TestStack = NetworkStack<MockDevice, ManualClock>;

pub fn test_stack_with_config(config: NetConfig) -> (TestStack, ManualClock) {
    let clock = ManualClock::new(10_000);
    let stack = NetworkStack::new(config, MockDevice::default(), clock.clone());
    (stack, clock)
}

pub fn test_stack() -> (TestStack, ManualClock) {
    test_stack_with_config(NetConfig::default())
}

/// A stack that already knows the gateway and the on-link peer.
pub fn test_stack_with_neighbors() -> (TestStack, ManualClock) {
    let (mut stack, clock) = test_stack();
    stack.arp_cache.insert(GATEWAY_IP, GATEWAY_MAC).unwrap();
    stack.arp_cache.insert(PEER_IP, PEER_MAC).unwrap();
    (stack, clock)
}

pub fn ethernet_frame(dest: MacAddr, source: MacAddr, ethertype: u16, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![0u8; 14];
    dest.copy_to(&mut frame[0..6]);
    source.copy_to(&mut frame[6..12]);
    util::set_be16(&mut frame[12..14], ethertype);
    frame.extend_from_slice(payload);
    frame
}

fn arp_frame(
    dest_mac: MacAddr,
    operation: u16,
    sender_ip: IPv4Addr,
    sender_mac: MacAddr,
    target_ip: IPv4Addr,
    target_mac: MacAddr,
) -> Vec<u8> {
    let mut packet = vec![0u8; 28];
    util::set_be16(&mut packet[0..2], 1);
    util::set_be16(&mut packet[2..4], 0x0800);
    packet[4] = 6;
    packet[5] = 4;
    util::set_be16(&mut packet[6..8], operation);
    sender_mac.copy_to(&mut packet[8..14]);
    sender_ip.copy_to(&mut packet[14..18]);
    target_mac.copy_to(&mut packet[18..24]);
    target_ip.copy_to(&mut packet[24..28]);
    ethernet_frame(dest_mac, sender_mac, ETHERTYPE_ARP, &packet)
}

pub fn arp_reply_frame(sender_ip: IPv4Addr, sender_mac: MacAddr) -> Vec<u8> {
    arp_frame(LOCAL_MAC, 2, sender_ip, sender_mac, LOCAL_IP, LOCAL_MAC)
}

pub fn arp_request_frame(sender_ip: IPv4Addr, sender_mac: MacAddr, target_ip: IPv4Addr) -> Vec<u8> {
    arp_frame(
        MacAddr::BROADCAST,
        1,
        sender_ip,
        sender_mac,
        target_ip,
        MacAddr::ZERO,
    )
}

pub fn ipv4_packet(source: IPv4Addr, dest: IPv4Addr, protocol: u8, payload: &[u8]) -> Vec<u8> {
    let mut packet = vec![0u8; 20];
    packet[0] = 0x45;
    util::set_be16(&mut packet[2..4], (20 + payload.len()) as u16);
    util::set_be16(&mut packet[4..6], 0x1234);
    packet[8] = 64;
    packet[9] = protocol;
    source.copy_to(&mut packet[12..16]);
    dest.copy_to(&mut packet[16..20]);
    let checksum = util::compute_checksum(&packet);
    util::set_be16(&mut packet[10..12], checksum);
    packet.extend_from_slice(payload);
    packet
}

#[allow(clippy::too_many_arguments)]
pub fn tcp_segment(
    source_ip: IPv4Addr,
    dest_ip: IPv4Addr,
    source_port: u16,
    dest_port: u16,
    seq_num: u32,
    ack_num: u32,
    flags: u8,
    payload: &[u8],
) -> Vec<u8> {
    let mut segment = vec![0u8; 20];
    util::set_be16(&mut segment[0..2], source_port);
    util::set_be16(&mut segment[2..4], dest_port);
    util::set_be32(&mut segment[4..8], seq_num);
    util::set_be32(&mut segment[8..12], ack_num);
    segment[12] = 5 << 4;
    segment[13] = flags;
    util::set_be16(&mut segment[14..16], 0xffff);
    segment.extend_from_slice(payload);

    let ph = util::compute_pseudo_header_checksum(source_ip, dest_ip, segment.len(), 6);
    let checksum = util::compute_ones_comp(ph, &segment) ^ 0xffff;
    util::set_be16(&mut segment[16..18], checksum);
    segment
}

/// A complete frame from `source_ip` to the local host.
pub fn tcp_frame(
    source_ip: IPv4Addr,
    source_port: u16,
    dest_port: u16,
    seq_num: u32,
    ack_num: u32,
    flags: u8,
    payload: &[u8],
) -> Vec<u8> {
    let segment = tcp_segment(
        source_ip,
        LOCAL_IP,
        source_port,
        dest_port,
        seq_num,
        ack_num,
        flags,
        payload,
    );
    let packet = ipv4_packet(source_ip, LOCAL_IP, 6, &segment);
    ethernet_frame(LOCAL_MAC, PEER_MAC, ETHERTYPE_IPV4, &packet)
}

pub fn decode_arp(frame: &[u8]) -> Option<(MacAddr, ArpPacket)> {
    let (eth, payload) = EthernetHeader::parse(frame).ok()?;
    if eth.ethertype != ETHERTYPE_ARP {
        return None;
    }

    Some((eth.dest, ArpPacket::parse(payload).ok()?))
}

pub struct SentSegment {
    pub dest_mac: MacAddr,
    pub ip: Ipv4Header,
    pub header: TcpHeader,
    pub payload: Vec<u8>,
    pub checksum_ok: bool,
}

pub fn decode_tcp(frame: &[u8]) -> Option<SentSegment> {
    let (eth, packet) = EthernetHeader::parse(frame).ok()?;
    if eth.ethertype != ETHERTYPE_IPV4 {
        return None;
    }

    let (ip, segment) = Ipv4Header::parse(packet).ok()?;
    let (header, payload) = TcpHeader::parse(segment).ok()?;
    let ph = util::compute_pseudo_header_checksum(ip.source, ip.dest, segment.len(), 6);
    let checksum_ok = util::compute_ones_comp(ph, segment) == 0xffff;
    Some(SentSegment {
        dest_mac: eth.dest,
        ip,
        header,
        payload: payload.to_vec(),
        checksum_ok,
    })
}

pub fn sent_tcp_segments(stack: &TestStack) -> Vec<SentSegment> {
    stack
        .device()
        .sent
        .iter()
        .filter_map(|frame| decode_tcp(frame))
        .collect()
}

pub fn sent_arp_packets(stack: &TestStack) -> Vec<(MacAddr, ArpPacket)> {
    stack
        .device()
        .sent
        .iter()
        .filter_map(|frame| decode_arp(frame))
        .collect()
}
