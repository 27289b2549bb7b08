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

// Transmission Control Protocol, as described in RFC 9293
//
// This is a client-only subset. Connections go CLOSED -> SYN_SENT ->
// ESTABLISHED and stay there until the owner releases them. Only the SYN is
// retransmitted, there is no congestion control, and out-of-order data is
// dropped rather than reassembled. A FIN from the peer is acknowledged and
// recorded, but there are no closing states and we never send FIN or RST.

use crate::buf::{self, FrameBuffer};
use crate::error::NetError;
use crate::ip;
use crate::netif::NetDevice;
use crate::timer::{self, Clock};
use crate::util::{self, IPv4Addr};
use crate::NetworkStack;
use std::collections::VecDeque;
use std::fmt;
use std::fmt::Display;

pub const MAX_CONNECTIONS: usize = 8;

const EPHEMERAL_PORT_BASE: u16 = 49152;
const MAX_RECEIVE_WINDOW: u16 = 0xffff;
const RECEIVE_BUFFER_SIZE: usize = MAX_RECEIVE_WINDOW as usize;
pub const TCP_HEADER_LEN: usize = 20;

// Endpoint used by tcp_test_connect().
const TEST_REMOTE_IP: IPv4Addr = IPv4Addr::from_octets([93, 184, 216, 34]);
const TEST_REMOTE_PORT: u16 = 80;

pub const FLAG_FIN: u8 = 1;
pub const FLAG_SYN: u8 = 2;
pub const FLAG_RST: u8 = 4;
pub const FLAG_PSH: u8 = 8;
pub const FLAG_ACK: u8 = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpState {
    Closed,
    SynSent,
    Established,
}

/// Handle to a connection slot. The generation changes whenever the slot is
/// released, so a stale handle can't reach the slot's next owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId {
    slot: usize,
    generation: u32,
}

pub struct TcpConnection {
    used: bool,
    generation: u32,
    local_ip: IPv4Addr,
    remote_ip: IPv4Addr,
    local_port: u16,
    remote_port: u16,
    state: TcpState,

    // Variable names from RFC 9293, 3.3.1
    send_unacked: u32,     // SND.UNA
    send_next_seq: u32,    // SND.NXT
    receive_next_seq: u32, // RCV.NXT

    last_transmit_ms: u64,
    syn_retries: u32,
    peer_closed: bool,
    receive_queue: VecDeque<u8>,
}

impl TcpConnection {
    fn new() -> TcpConnection {
        TcpConnection {
            used: false,
            generation: 0,
            local_ip: IPv4Addr::UNSPECIFIED,
            remote_ip: IPv4Addr::UNSPECIFIED,
            local_port: 0,
            remote_port: 0,
            state: TcpState::Closed,
            send_unacked: 0,
            send_next_seq: 0,
            receive_next_seq: 0,
            last_transmit_ms: 0,
            syn_retries: 0,
            peer_closed: false,
            receive_queue: VecDeque::new(),
        }
    }

    fn set_state(&mut self, new_state: TcpState) {
        log::info!(
            "{}: Change state from {:?} to {:?}",
            self,
            self.state,
            new_state
        );
        self.state = new_state;
    }

    pub fn state(&self) -> TcpState {
        self.state
    }

    pub fn local_port(&self) -> u16 {
        self.local_port
    }

    pub fn remote_ip(&self) -> IPv4Addr {
        self.remote_ip
    }

    pub fn remote_port(&self) -> u16 {
        self.remote_port
    }

    pub fn send_unacked(&self) -> u32 {
        self.send_unacked
    }

    pub fn send_next_seq(&self) -> u32 {
        self.send_next_seq
    }

    pub fn receive_next_seq(&self) -> u32 {
        self.receive_next_seq
    }

    pub fn peer_closed(&self) -> bool {
        self.peer_closed
    }

    pub fn bytes_available(&self) -> usize {
        self.receive_queue.len()
    }
}

impl Display for TcpConnection {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "localhost:{} {}:{}",
            self.local_port, self.remote_ip, self.remote_port
        )
    }
}

pub struct ConnectionTable {
    slots: [TcpConnection; MAX_CONNECTIONS],
}

impl ConnectionTable {
    pub fn new() -> ConnectionTable {
        ConnectionTable {
            slots: std::array::from_fn(|_| TcpConnection::new()),
        }
    }

    /// Free every slot. Outstanding handles become invalid.
    pub fn clear(&mut self) {
        for slot in 0..MAX_CONNECTIONS {
            self.release_slot(slot);
        }
    }

    pub fn in_use(&self) -> usize {
        self.slots.iter().filter(|conn| conn.used).count()
    }

    fn alloc(
        &mut self,
        local_ip: IPv4Addr,
        remote_ip: IPv4Addr,
        remote_port: u16,
    ) -> Result<ConnectionId, NetError> {
        let slot = self
            .slots
            .iter()
            .position(|conn| !conn.used)
            .ok_or(NetError::TableFull)?;

        let local_port = self.find_ephemeral_port(remote_ip, remote_port);
        let initial_sequence = rand::random::<u32>();
        let conn = &mut self.slots[slot];
        conn.used = true;
        conn.local_ip = local_ip;
        conn.remote_ip = remote_ip;
        conn.local_port = local_port;
        conn.remote_port = remote_port;
        conn.send_unacked = initial_sequence;
        conn.send_next_seq = initial_sequence;

        Ok(ConnectionId {
            slot,
            generation: conn.generation,
        })
    }

    fn release_slot(&mut self, slot: usize) {
        let generation = self.slots[slot].generation.wrapping_add(1);
        self.slots[slot] = TcpConnection::new();
        self.slots[slot].generation = generation;
    }

    fn lookup(&self, id: ConnectionId) -> Result<&TcpConnection, NetError> {
        match self.slots.get(id.slot) {
            Some(conn) if conn.used && conn.generation == id.generation => Ok(conn),
            _ => Err(NetError::InvalidConnection),
        }
    }

    fn lookup_mut(&mut self, id: ConnectionId) -> Result<&mut TcpConnection, NetError> {
        match self.slots.get_mut(id.slot) {
            Some(conn) if conn.used && conn.generation == id.generation => Ok(conn),
            _ => Err(NetError::InvalidConnection),
        }
    }

    /// Each connection is uniquely identified by the tuple of
    /// remote_ip/remote_port/local_port
    fn find(&self, remote_ip: IPv4Addr, remote_port: u16, local_port: u16) -> Option<usize> {
        self.slots.iter().position(|conn| {
            conn.used
                && conn.remote_ip == remote_ip
                && conn.remote_port == remote_port
                && conn.local_port == local_port
        })
    }

    /// Generate a random ephemeral port that doesn't conflict with any open
    /// connection to the same remote endpoint.
    fn find_ephemeral_port(&self, remote_ip: IPv4Addr, remote_port: u16) -> u16 {
        loop {
            const RANGE: u16 = 0xffff - EPHEMERAL_PORT_BASE;
            let port = EPHEMERAL_PORT_BASE + (rand::random::<u16>() % RANGE);
            if self.find(remote_ip, remote_port, port).is_none() {
                return port;
            }
        }
    }
}

impl Default for ConnectionTable {
    fn default() -> Self {
        ConnectionTable::new()
    }
}

//    0               1               2               3
//    +-------------------------------+-------------------------------+
//  0 |          Source Port          |       Destination Port        |
//    +-------------------------------+-------------------------------+
//  4 |                        Sequence Number                        |
//    +---------------------------------------------------------------+
//  8 |                    Acknowledgment Number                      |
//    +-------+-----------+-+-+-+-+-+-+-------------------------------+
// 12 |  Data |           |U|A|P|R|S|F|                               |
//    | Offset| Reserved  |R|C|S|S|Y|I|            Window             |
//    |       |           |G|K|H|T|N|N|                               |
//    +-------+-----------+-+-+-+-+-+-+-------------------------------+
// 16 |           Checksum            |         Urgent Pointer        |
//    +-------------------------------+-------------------------------+
// 20 |                    Options                    |    Padding    |
//    +-----------------------------------------------+---------------+

#[derive(Debug, Clone)]
pub struct TcpHeader {
    pub source_port: u16,
    pub dest_port: u16,
    pub seq_num: u32,
    pub ack_num: u32,
    pub header_len: usize,
    pub flags: u8,
    pub window: u16,
}

impl TcpHeader {
    /// Split a segment into header and payload. Options are skipped.
    pub fn parse(segment: &[u8]) -> Result<(TcpHeader, &[u8]), NetError> {
        if segment.len() < TCP_HEADER_LEN {
            return Err(NetError::Truncated);
        }

        let header_len = ((segment[12] >> 4) as usize) * 4;
        if header_len < TCP_HEADER_LEN {
            return Err(NetError::Malformed);
        }

        if header_len > segment.len() {
            return Err(NetError::Truncated);
        }

        let header = TcpHeader {
            source_port: util::get_be16(&segment[0..2]),
            dest_port: util::get_be16(&segment[2..4]),
            seq_num: util::get_be32(&segment[4..8]),
            ack_num: util::get_be32(&segment[8..12]),
            header_len,
            flags: segment[13],
            window: util::get_be16(&segment[14..16]),
        };

        Ok((header, &segment[header_len..]))
    }
}

struct TCPSendParams {
    source_ip: IPv4Addr,
    source_port: u16,
    dest_ip: IPv4Addr,
    dest_port: u16,
    seq_num: u32,
    ack_num: u32,
    flags: u8,
    window: u16,
}

fn flags_to_str(flags: u8) -> String {
    let mut result = String::new();
    if flags & FLAG_FIN != 0 {
        result.push('F');
    }

    if flags & FLAG_SYN != 0 {
        result.push('S');
    }

    if flags & FLAG_RST != 0 {
        result.push('R');
    }

    if flags & FLAG_PSH != 0 {
        result.push('P');
    }

    if flags & FLAG_ACK != 0 {
        result.push('A');
    }

    result
}

fn validate_checksum(source_ip: IPv4Addr, dest_ip: IPv4Addr, segment: &[u8]) -> bool {
    let ph_checksum =
        util::compute_pseudo_header_checksum(source_ip, dest_ip, segment.len(), ip::PROTO_TCP);
    util::compute_ones_comp(ph_checksum, segment) == 0xffff
}

impl<D: NetDevice, C: Clock> NetworkStack<D, C> {
    /// Open a connection to `remote_ip:remote_port`. This only sends the SYN;
    /// the handshake completes later inside receive_frame(). If the next hop
    /// isn't resolved yet, the SYN goes out on the first retransmission.
    pub fn tcp_connect(
        &mut self,
        remote_ip: IPv4Addr,
        remote_port: u16,
    ) -> Result<ConnectionId, NetError> {
        let local_ip = self.config.ip;
        let id = self.connections.alloc(local_ip, remote_ip, remote_port)?;
        self.connections.slots[id.slot].set_state(TcpState::SynSent);
        if let Err(err) = self.send_segment(id.slot, FLAG_SYN, &[]) {
            log::debug!(
                "{}: SYN not sent ({}), will retry",
                self.connections.slots[id.slot],
                err
            );
        }

        Ok(id)
    }

    /// Connect to a fixed public web server. Used as a smoke test at boot.
    pub fn tcp_test_connect(&mut self) -> Result<ConnectionId, NetError> {
        log::info!(
            "TCP test: connecting to {}:{}",
            TEST_REMOTE_IP,
            TEST_REMOTE_PORT
        );
        self.tcp_connect(TEST_REMOTE_IP, TEST_REMOTE_PORT)
    }

    /// Queue `data` for transmission, split into full-sized segments. Returns
    /// how many bytes went out, which is less than requested only if a
    /// segment after the first could not be sent.
    pub fn tcp_send(&mut self, id: ConnectionId, data: &[u8]) -> Result<usize, NetError> {
        if self.connections.lookup(id)?.state != TcpState::Established {
            return Err(NetError::NotConnected);
        }

        let mut sent = 0;
        for chunk in data.chunks(buf::MAX_PAYLOAD_LEN) {
            match self.send_segment(id.slot, FLAG_ACK | FLAG_PSH, chunk) {
                Ok(()) => sent += chunk.len(),
                Err(err) if sent == 0 => return Err(err),
                Err(_) => break,
            }
        }

        Ok(sent)
    }

    pub fn tcp_has_data(&self, id: ConnectionId) -> bool {
        self.connections
            .lookup(id)
            .is_ok_and(|conn| !conn.receive_queue.is_empty())
    }

    /// Copy received data into `data`. Returns Ok(0) once the peer has
    /// closed and everything it sent has been read, and WouldBlock if
    /// nothing has arrived yet.
    pub fn tcp_read(&mut self, id: ConnectionId, data: &mut [u8]) -> Result<usize, NetError> {
        let conn = self.connections.lookup_mut(id)?;
        if conn.receive_queue.is_empty() {
            if conn.peer_closed || data.is_empty() {
                return Ok(0);
            }

            return match conn.state {
                TcpState::Closed => Err(NetError::NotConnected),
                _ => Err(NetError::WouldBlock),
            };
        }

        let length = std::cmp::min(data.len(), conn.receive_queue.len());
        for (dest, byte) in data.iter_mut().zip(conn.receive_queue.drain(..length)) {
            *dest = byte;
        }

        Ok(length)
    }

    pub fn tcp_state(&self, id: ConnectionId) -> Result<TcpState, NetError> {
        Ok(self.connections.lookup(id)?.state)
    }

    pub fn tcp_is_connected(&self, id: ConnectionId) -> bool {
        matches!(self.tcp_state(id), Ok(TcpState::Established))
    }

    pub fn tcp_peer_closed(&self, id: ConnectionId) -> bool {
        self.connections
            .lookup(id)
            .is_ok_and(|conn| conn.peer_closed)
    }

    /// Give the slot back. Nothing is sent to the peer.
    pub fn tcp_release(&mut self, id: ConnectionId) -> Result<(), NetError> {
        let conn = self.connections.lookup(id)?;
        log::info!("{}: Released in state {:?}", conn, conn.state);
        self.connections.release_slot(id.slot);
        Ok(())
    }

    pub fn connection(&self, id: ConnectionId) -> Option<&TcpConnection> {
        self.connections.lookup(id).ok()
    }

    /// Resend the SYN for every connection that has waited longer than the
    /// retransmit timeout. There is no backoff.
    pub fn tcp_timer_poll(&mut self) {
        let now = self.clock.now_ms();
        let timeout = self.config.retransmit_timeout_ms;
        let max_retries = self.config.max_syn_retries;
        for slot in 0..MAX_CONNECTIONS {
            let conn = &mut self.connections.slots[slot];
            if !conn.used
                || conn.state != TcpState::SynSent
                || !timer::has_expired(now, conn.last_transmit_ms, timeout)
            {
                continue;
            }

            if max_retries.is_some_and(|max| conn.syn_retries >= max) {
                log::warn!(
                    "{}: No response after {} retries, giving up",
                    conn,
                    conn.syn_retries
                );
                conn.set_state(TcpState::Closed);
                continue;
            }

            // Undo the SYN's sequence number, send_segment() takes it again.
            conn.syn_retries += 1;
            conn.send_next_seq = conn.send_next_seq.wrapping_sub(1);
            log::debug!("{}: Retransmitting SYN, seq {}", conn, conn.send_next_seq);
            self.stats.packets_retransmitted.inc();
            if let Err(err) = self.send_segment(slot, FLAG_SYN, &[]) {
                log::debug!("{}: SYN retransmit failed: {}", self.connections.slots[slot], err);
            }
        }
    }

    pub(crate) fn tcp_input(
        &mut self,
        source_ip: IPv4Addr,
        dest_ip: IPv4Addr,
        segment: &[u8],
    ) -> Result<(), NetError> {
        let (header, payload) = TcpHeader::parse(segment)?;
        if !validate_checksum(source_ip, dest_ip, segment) {
            return Err(NetError::BadChecksum);
        }

        log::trace!(
            "TCP: {}:{} -> {} seq {} ack {} flags {} len {}",
            source_ip,
            header.source_port,
            header.dest_port,
            header.seq_num,
            header.ack_num,
            flags_to_str(header.flags),
            payload.len()
        );

        let slot = match self
            .connections
            .find(source_ip, header.source_port, header.dest_port)
        {
            Some(slot) => slot,
            None => {
                log::debug!(
                    "TCP: No connection for {}:{} -> {}",
                    source_ip,
                    header.source_port,
                    header.dest_port
                );
                return Err(NetError::UnknownConnection);
            }
        };

        match self.connections.slots[slot].state {
            TcpState::SynSent => self.handle_syn_sent(slot, &header),
            TcpState::Established => self.handle_established(slot, &header, payload),
            TcpState::Closed => Err(NetError::UnknownConnection),
        }
    }

    fn handle_syn_sent(&mut self, slot: usize, header: &TcpHeader) -> Result<(), NetError> {
        let conn = &mut self.connections.slots[slot];
        if header.flags & FLAG_RST != 0 {
            // Only a reset that acknowledges our SYN is believed.
            if header.flags & FLAG_ACK != 0 && header.ack_num == conn.send_next_seq {
                log::info!("{}: Connection refused", conn);
                conn.set_state(TcpState::Closed);
            }

            return Ok(());
        }

        if header.flags & (FLAG_SYN | FLAG_ACK) != (FLAG_SYN | FLAG_ACK) {
            log::debug!(
                "{}: Ignoring {} while waiting for SYN-ACK",
                conn,
                flags_to_str(header.flags)
            );
            return Ok(());
        }

        if header.ack_num != conn.send_next_seq {
            log::warn!(
                "{}: SYN-ACK acknowledges {}, expected {}",
                conn,
                header.ack_num,
                conn.send_next_seq
            );
            return Err(NetError::UnexpectedAck);
        }

        conn.receive_next_seq = header.seq_num.wrapping_add(1);
        conn.send_unacked = header.ack_num;
        conn.set_state(TcpState::Established);

        // Send ack to complete handshake
        self.send_control(slot, FLAG_ACK);
        Ok(())
    }

    fn handle_established(
        &mut self,
        slot: usize,
        header: &TcpHeader,
        payload: &[u8],
    ) -> Result<(), NetError> {
        let conn = &mut self.connections.slots[slot];
        if header.flags & FLAG_RST != 0 {
            if header.seq_num == conn.receive_next_seq {
                log::info!("{}: Connection reset", conn);
                conn.set_state(TcpState::Closed);
            }

            return Ok(());
        }

        if header.flags & FLAG_SYN != 0 {
            // Our handshake ACK was lost and the peer resent its SYN-ACK.
            if header.seq_num.wrapping_add(1) == conn.receive_next_seq {
                self.send_control(slot, FLAG_ACK);
            }

            return Ok(());
        }

        // RFC 9293, 3.10.7.4 [SEGMENT ARRIVES] Other States
        // Fifth, check the ACK field
        if header.flags & FLAG_ACK != 0
            && util::seq_gt(header.ack_num, conn.send_unacked)
            && util::seq_le(header.ack_num, conn.send_next_seq)
        {
            conn.send_unacked = header.ack_num;
        }

        let mut need_ack = false;
        if !payload.is_empty() {
            // Anything not exactly in order, or that doesn't fit, is dropped.
            // The ACK tells the peer where to resume.
            if header.seq_num == conn.receive_next_seq
                && payload.len() <= RECEIVE_BUFFER_SIZE - conn.receive_queue.len()
            {
                conn.receive_queue.extend(payload);
                conn.receive_next_seq = conn.receive_next_seq.wrapping_add(payload.len() as u32);
            } else {
                log::debug!(
                    "{}: Dropping {} bytes at seq {}, expected {}",
                    conn,
                    payload.len(),
                    header.seq_num,
                    conn.receive_next_seq
                );
            }

            need_ack = true;
        }

        if header.flags & FLAG_FIN != 0 {
            // The FIN follows any data in the segment.
            let fin_seq = header.seq_num.wrapping_add(payload.len() as u32);
            if !conn.peer_closed && fin_seq == conn.receive_next_seq {
                log::info!("{}: Peer closed connection", conn);
                conn.peer_closed = true;
                conn.receive_next_seq = conn.receive_next_seq.wrapping_add(1);
            }

            need_ack = true;
        }

        if need_ack {
            self.send_control(slot, FLAG_ACK);
        }

        Ok(())
    }

    /// Send a segment with no payload. Failures are only logged; a lost ACK
    /// is recovered when the peer retransmits.
    fn send_control(&mut self, slot: usize, flags: u8) {
        if let Err(err) = self.send_segment(slot, flags, &[]) {
            log::debug!(
                "{}: Could not send {}: {}",
                self.connections.slots[slot],
                flags_to_str(flags),
                err
            );
        }
    }

    fn send_segment(&mut self, slot: usize, flags: u8, payload: &[u8]) -> Result<(), NetError> {
        let params = {
            let conn = &self.connections.slots[slot];
            TCPSendParams {
                source_ip: conn.local_ip,
                source_port: conn.local_port,
                dest_ip: conn.remote_ip,
                dest_port: conn.remote_port,
                seq_num: conn.send_next_seq,
                ack_num: if flags & FLAG_ACK != 0 {
                    conn.receive_next_seq
                } else {
                    0
                },
                flags,
                window: MAX_RECEIVE_WINDOW,
            }
        };

        let mut frame = FrameBuffer::new();
        frame.append_from_slice(payload)?;
        let result = self.tcp_output(frame, &params);

        let now = self.clock.now_ms();
        let conn = &mut self.connections.slots[slot];
        conn.last_transmit_ms = now;
        if flags & FLAG_SYN != 0 {
            // The SYN consumes a sequence number whether or not it made it
            // out, so a retransmission always rewinds by one.
            conn.send_next_seq = conn.send_next_seq.wrapping_add(1);
        } else if result.is_ok() {
            conn.send_next_seq = conn.send_next_seq.wrapping_add(payload.len() as u32);
        }

        result
    }

    fn tcp_output(&mut self, mut frame: FrameBuffer, params: &TCPSendParams) -> Result<(), NetError> {
        frame.alloc_header(TCP_HEADER_LEN)?;
        let segment_length = frame.len();
        {
            let header = frame.header_mut();
            util::set_be16(&mut header[0..2], params.source_port);
            util::set_be16(&mut header[2..4], params.dest_port);
            util::set_be32(&mut header[4..8], params.seq_num);
            util::set_be32(&mut header[8..12], params.ack_num);
            header[12] = ((TCP_HEADER_LEN / 4) << 4) as u8; // Data offset
            header[13] = params.flags;
            util::set_be16(&mut header[14..16], params.window);
        }

        // Compute checksum
        // First need to create a pseudo header
        let ph_checksum = util::compute_pseudo_header_checksum(
            params.source_ip,
            params.dest_ip,
            segment_length,
            ip::PROTO_TCP,
        );

        let checksum = util::compute_ones_comp(ph_checksum, frame.header()) ^ 0xffff;
        util::set_be16(&mut frame.header_mut()[16..18], checksum);

        log::trace!(
            "TCP: -> {}:{} seq {} ack {} flags {} len {}",
            params.dest_ip,
            params.dest_port,
            params.seq_num,
            params.ack_num,
            flags_to_str(params.flags),
            segment_length - TCP_HEADER_LEN
        );

        if params.flags & FLAG_SYN != 0 {
            util::hex_dump("SYN segment", frame.header());
        }

        self.ip_output(frame, ip::PROTO_TCP, params.dest_ip)
    }
}
