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

use crate::error::NetError;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU32, Ordering};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct IPv4Addr {
    addr: [u8; 4],
}

impl IPv4Addr {
    pub const UNSPECIFIED: IPv4Addr = IPv4Addr::from_octets([0; 4]);

    pub const fn from_octets(addr: [u8; 4]) -> Self {
        Self { addr }
    }

    /// Caller must ensure the slice is exactly four bytes.
    pub fn new_from(addr: &[u8]) -> Self {
        Self {
            addr: addr.try_into().unwrap_or([0; 4]),
        }
    }

    pub fn octets(&self) -> [u8; 4] {
        self.addr
    }

    pub fn copy_to(&self, buffer: &mut [u8]) {
        buffer.copy_from_slice(&self.addr);
    }

    pub fn to_u32(&self) -> u32 {
        u32::from_be_bytes(self.addr)
    }

    pub fn mask(&self, netmask: IPv4Addr) -> IPv4Addr {
        IPv4Addr::from_octets((self.to_u32() & netmask.to_u32()).to_be_bytes())
    }
}

impl fmt::Display for IPv4Addr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}.{}.{}.{}",
            self.addr[0], self.addr[1], self.addr[2], self.addr[3]
        )
    }
}

impl FromStr for IPv4Addr {
    type Err = NetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut addr = [0u8; 4];
        let mut parts = s.split('.');
        for octet in addr.iter_mut() {
            let part = parts.next().ok_or(NetError::Malformed)?;
            *octet = part.parse::<u8>().map_err(|_| NetError::Malformed)?;
        }

        if parts.next().is_some() {
            return Err(NetError::Malformed);
        }

        Ok(IPv4Addr::from_octets(addr))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MacAddr {
    addr: [u8; 6],
}

impl MacAddr {
    pub const BROADCAST: MacAddr = MacAddr::from_octets([0xff; 6]);
    pub const ZERO: MacAddr = MacAddr::from_octets([0; 6]);

    pub const fn from_octets(addr: [u8; 6]) -> Self {
        Self { addr }
    }

    /// Caller must ensure the slice is exactly six bytes.
    pub fn new_from(addr: &[u8]) -> Self {
        Self {
            addr: addr.try_into().unwrap_or([0; 6]),
        }
    }

    pub fn octets(&self) -> [u8; 6] {
        self.addr
    }

    pub fn copy_to(&self, buffer: &mut [u8]) {
        buffer.copy_from_slice(&self.addr);
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            self.addr[0], self.addr[1], self.addr[2], self.addr[3], self.addr[4], self.addr[5]
        )
    }
}

// Compute one's complement sum, per RFC 1071
// https://datatracker.ietf.org/doc/html/rfc1071
// Words are big-endian. An odd trailing byte is the high byte of a
// zero-padded word, so only the last slice in a chain may have odd length.
pub fn compute_ones_comp(in_checksum: u16, slice: &[u8]) -> u16 {
    let mut checksum: u32 = in_checksum as u32;

    let mut words = slice.chunks_exact(2);
    for word in &mut words {
        checksum += u16::from_be_bytes([word[0], word[1]]) as u32;
        if checksum > 0xffff {
            checksum = (checksum & 0xffff) + (checksum >> 16);
        }
    }

    if let [last] = words.remainder() {
        checksum += (*last as u32) << 8;
    }

    while checksum > 0xffff {
        checksum = (checksum & 0xffff) + (checksum >> 16);
    }

    checksum as u16
}

pub fn compute_checksum(slice: &[u8]) -> u16 {
    0xffff ^ compute_ones_comp(0, slice)
}

//    0               1               2               3
//    +-------------------------------+-------------------------------+
//  0 |                       Source Address                          |
//    +---------------------------------------------------------------+
//  4 |                     Destination Address                       |
//    +---------------+---------------+-------------------------------+
//  8 |      Zero     |   Protocol    |          TCP Length           |
//    +---------------+---------------+-------------------------------+
//
// This is never transmitted. The sum is used as the initial value when
// summing the segment itself.
pub fn compute_pseudo_header_checksum(
    source_ip: IPv4Addr,
    dest_ip: IPv4Addr,
    length: usize,
    protocol: u8,
) -> u16 {
    let mut header = [0u8; 12];
    source_ip.copy_to(&mut header[0..4]);
    dest_ip.copy_to(&mut header[4..8]);
    header[9] = protocol;
    set_be16(&mut header[10..12], length as u16);
    compute_ones_comp(0, &header)
}

pub fn get_be16(buffer: &[u8]) -> u16 {
    ((buffer[0] as u16) << 8) | buffer[1] as u16
}

pub fn get_be32(buffer: &[u8]) -> u32 {
    ((buffer[0] as u32) << 24)
        | ((buffer[1] as u32) << 16)
        | ((buffer[2] as u32) << 8)
        | buffer[3] as u32
}

pub fn set_be16(buffer: &mut [u8], value: u16) {
    buffer[0] = ((value >> 8) & 0xff) as u8;
    buffer[1] = (value & 0xff) as u8;
}

pub fn set_be32(buffer: &mut [u8], value: u32) {
    buffer[0] = ((value >> 24) & 0xff) as u8;
    buffer[1] = ((value >> 16) & 0xff) as u8;
    buffer[2] = ((value >> 8) & 0xff) as u8;
    buffer[3] = (value & 0xff) as u8;
}

/// Log a buffer as rows of 16 hex bytes at trace level.
pub fn hex_dump(label: &str, buffer: &[u8]) {
    if !log::log_enabled!(log::Level::Trace) {
        return;
    }

    log::trace!("{} ({} bytes)", label, buffer.len());
    for row in buffer.chunks(16) {
        let line: Vec<String> = row.iter().map(|byte| format!("{:02x}", byte)).collect();
        log::trace!("  {}", line.join(" "));
    }
}

pub fn seq_gt(val1: u32, val2: u32) -> bool {
    let diff = val1.wrapping_sub(val2);
    diff < 0x80000000 && diff != 0
}

pub fn seq_le(val1: u32, val2: u32) -> bool {
    !seq_gt(val1, val2)
}

pub struct PerfCounter(AtomicU32);

impl PerfCounter {
    pub const fn new() -> Self {
        PerfCounter(AtomicU32::new(0))
    }

    pub fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    pub fn get(&self) -> u32 {
        self.0.load(Ordering::Relaxed)
    }
}

pub struct Statistics {
    pub packets_received: PerfCounter,
    pub packets_sent: PerfCounter,
    pub packets_retransmitted: PerfCounter,
    pub arp_requests_sent: PerfCounter,
}

impl Statistics {
    pub const fn new() -> Self {
        Statistics {
            packets_received: PerfCounter::new(),
            packets_sent: PerfCounter::new(),
            packets_retransmitted: PerfCounter::new(),
            arp_requests_sent: PerfCounter::new(),
        }
    }

    pub fn log_stats(&self) {
        log::info!("Packets received: {}", self.packets_received.get());
        log::info!("Packets sent: {}", self.packets_sent.get());
        log::info!("Packets retransmitted: {}", self.packets_retransmitted.get());
        log::info!("ARP requests sent: {}", self.arp_requests_sent.get());
    }
}

impl Default for Statistics {
    fn default() -> Self {
        Statistics::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    #[test]
    fn test_compute_ones_comp() {
        assert_eq!(compute_ones_comp(0, &[]), 0);
        assert_eq!(compute_ones_comp(0, &[0x00, 0x00]), 0);
        assert_eq!(compute_ones_comp(0, &[0x00, 0x01]), 0x1);
        assert_eq!(compute_ones_comp(0, &[0x00, 0xff]), 0xff);
        assert_eq!(compute_ones_comp(0, &[0xff, 0x23, 0xef, 0x55]), 0xee79);
    }

    #[test]
    fn test_compute_checksum() {
        assert_eq!(compute_checksum(&[0x00, 0x00]), 0xffff);
        assert_eq!(compute_checksum(&[0x00, 0x01]), 0xfffe);
        assert_eq!(compute_checksum(&[0x00, 0xff]), 0xff00);
        assert_eq!(compute_checksum(&[0xff, 0x23, 0xef, 0x55]), 0x1186);
    }

    #[test]
    fn test_compute_ones_comp_odd_length() {
        // Trailing byte is padded on the right: 0x1234 + 0x5600
        assert_eq!(compute_ones_comp(0, &[0x12, 0x34, 0x56]), 0x6834);
        assert_eq!(compute_ones_comp(0, &[0xab]), 0xab00);
    }

    #[test]
    fn test_compute_ones_comp_carry() {
        // 0xffff + 0xffff + 0x0002 = 0x20000 -> wraps twice
        assert_eq!(compute_ones_comp(0, &[0xff, 0xff, 0xff, 0xff, 0x00, 0x02]), 0x0002);
        assert_eq!(compute_ones_comp(0xffff, &[0x00, 0x01]), 0x0001);
    }

    #[test]
    fn test_rfc1071_example() {
        // Example from RFC 1071 section 3.
        let data = [0x00, 0x01, 0xf2, 0x03, 0xf4, 0xf5, 0xf6, 0xf7];
        assert_eq!(compute_ones_comp(0, &data), 0xddf2);
        assert_eq!(compute_checksum(&data), 0x220d);
    }

    #[test]
    fn test_known_ipv4_header() {
        // Sample header from the Wikipedia IPv4 checksum article.
        let mut header = [
            0x45, 0x00, 0x00, 0x73, 0x00, 0x00, 0x40, 0x00, 0x40, 0x11, 0x00, 0x00, 0xc0, 0xa8,
            0x00, 0x01, 0xc0, 0xa8, 0x00, 0xc7,
        ];
        assert_eq!(compute_checksum(&header), 0xb861);
        set_be16(&mut header[10..12], 0xb861);
        assert_eq!(compute_checksum(&header), 0);
    }

    #[test]
    fn test_checksum_self_verifies() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        for length in 12..300 {
            let mut buffer = vec![0u8; length];
            rng.fill(&mut buffer[..]);
            buffer[10] = 0;
            buffer[11] = 0;
            let checksum = compute_checksum(&buffer);
            set_be16(&mut buffer[10..12], checksum);
            assert_eq!(compute_checksum(&buffer), 0, "length {}", length);
        }
    }

    #[test]
    fn test_checksum_self_verifies_degenerate() {
        for fill in [0x00u8, 0xff] {
            let mut buffer = [fill; 21];
            buffer[0] = 0;
            buffer[1] = 0;
            let checksum = compute_checksum(&buffer);
            set_be16(&mut buffer[0..2], checksum);
            assert_eq!(compute_checksum(&buffer), 0);
        }
    }

    #[test]
    fn test_pseudo_header_chaining() {
        // Summing the pseudo header separately must match summing the
        // concatenated bytes.
        let source = IPv4Addr::from_octets([10, 0, 2, 15]);
        let dest = IPv4Addr::from_octets([93, 184, 216, 34]);
        let segment = [0xc0, 0x00, 0x00, 0x50, 0x12, 0x34, 0x56, 0x78, 0x00, 0x00, 0x00, 0x00];
        let chained = compute_ones_comp(
            compute_pseudo_header_checksum(source, dest, segment.len(), 6),
            &segment,
        );

        let mut flat = Vec::new();
        flat.extend_from_slice(&[10, 0, 2, 15, 93, 184, 216, 34, 0, 6, 0, 12]);
        flat.extend_from_slice(&segment);
        assert_eq!(chained, compute_ones_comp(0, &flat));
    }

    #[test]
    fn test_get_be16() {
        assert_eq!(get_be16(&[0x00, 0x00]), 0x0000);
        assert_eq!(get_be16(&[0x35, 0xa5]), 0x35a5);
    }

    #[test]
    fn test_get_be32() {
        assert_eq!(get_be32(&[0xde, 0xad, 0xbe, 0xef]), 0xdeadbeef);
        assert_eq!(get_be32(&[0x00, 0x00, 0x00, 0xff]), 0x000000ff);
        assert_eq!(get_be32(&[0xff, 0x00, 0x00, 0x00]), 0xff000000);
    }

    #[test]
    fn test_set_be16() {
        let mut buffer = [0u8; 2];
        set_be16(&mut buffer, 0x0100);
        assert_eq!(buffer, [0x01, 0x00]);
        set_be16(&mut buffer, 0xffff);
        assert_eq!(buffer, [0xff, 0xff]);
    }

    #[test]
    fn test_set_be32() {
        let mut buffer = [0u8; 4];
        set_be32(&mut buffer, 0x00010000);
        assert_eq!(buffer, [0x00, 0x01, 0x00, 0x00]);
        set_be32(&mut buffer, 0xdeadbeef);
        assert_eq!(buffer, [0xde, 0xad, 0xbe, 0xef]);
    }

    #[test]
    fn test_ip_to_str() {
        assert_eq!(
            IPv4Addr::new_from(&[18u8, 52, 86, 120]).to_string(),
            "18.52.86.120"
        );
    }

    #[test]
    fn test_ip_from_str() {
        assert_eq!(
            "93.184.216.34".parse::<IPv4Addr>(),
            Ok(IPv4Addr::from_octets([93, 184, 216, 34]))
        );
        assert_eq!("10.0.2".parse::<IPv4Addr>(), Err(NetError::Malformed));
        assert_eq!("10.0.2.256".parse::<IPv4Addr>(), Err(NetError::Malformed));
        assert_eq!("10.0.2.1.5".parse::<IPv4Addr>(), Err(NetError::Malformed));
    }

    #[test]
    fn test_ip_mask() {
        let ip = IPv4Addr::from_octets([10, 0, 2, 15]);
        let mask = IPv4Addr::from_octets([255, 255, 255, 0]);
        assert_eq!(ip.mask(mask), IPv4Addr::from_octets([10, 0, 2, 0]));
    }

    #[test]
    fn test_mac_to_str() {
        let mac = MacAddr::from_octets([0x52, 0x54, 0x00, 0x12, 0x34, 0x56]);
        assert_eq!(mac.to_string(), "52:54:00:12:34:56");
    }

    #[test]
    fn test_copy_to() {
        let ip = IPv4Addr::new_from(&[192, 168, 1, 1]);
        let mut buffer = [0u8; 4];
        ip.copy_to(&mut buffer);
        assert_eq!(buffer, [192, 168, 1, 1]);
    }

    #[test]
    fn test_seq_gt() {
        assert!(seq_gt(0x00000001, 0x00000000));
        assert!(!seq_gt(0x00000000, 0x00000001));
        assert!(!seq_gt(0x7fffffff, 0x80000000));
        assert!(seq_gt(0x80000000, 0x7fffffff));
        assert!(seq_gt(0x00000002, 0xfffffffe));
        assert!(!seq_gt(21, 21));
        assert!(seq_le(21, 21));
    }

    #[test]
    fn test_perf_counter() {
        let stats = Statistics::new();
        stats.packets_sent.inc();
        stats.packets_sent.inc();
        assert_eq!(stats.packets_sent.get(), 2);
        assert_eq!(stats.packets_received.get(), 0);
    }
}
