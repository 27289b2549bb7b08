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

use std::fmt;
use std::io;

/// Every failure the stack can report. None of these are fatal: received
/// frames that fail are dropped, and send failures are retried by the caller
/// on a later poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetError {
    /// Buffer is shorter than the header or length field claims.
    Truncated,
    /// A header field has a value we can't interpret.
    Malformed,
    BadChecksum,
    /// IP destination is not the local address.
    NotForUs,
    /// Ethertype or IP protocol that isn't handled.
    UnsupportedProtocol,
    /// Segment doesn't match any open connection.
    UnknownConnection,
    /// SYN-ACK whose acknowledgement doesn't cover our SYN.
    UnexpectedAck,
    /// Next hop is not in the ARP cache. A request has been sent.
    HostUnresolved,
    TableFull,
    /// Connection handle refers to a slot that has been released.
    InvalidConnection,
    NotConnected,
    ConnectionRefused,
    FrameTooLarge,
    WouldBlock,
    TimedOut,
}

impl fmt::Display for NetError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let message = match self {
            NetError::Truncated => "truncated packet",
            NetError::Malformed => "malformed packet",
            NetError::BadChecksum => "checksum mismatch",
            NetError::NotForUs => "packet not addressed to this host",
            NetError::UnsupportedProtocol => "unsupported protocol",
            NetError::UnknownConnection => "no matching connection",
            NetError::UnexpectedAck => "unexpected acknowledgement number",
            NetError::HostUnresolved => "next hop address not resolved",
            NetError::TableFull => "table full",
            NetError::InvalidConnection => "invalid connection handle",
            NetError::NotConnected => "connection not established",
            NetError::ConnectionRefused => "connection refused",
            NetError::FrameTooLarge => "frame too large",
            NetError::WouldBlock => "operation would block",
            NetError::TimedOut => "timed out",
        };

        f.write_str(message)
    }
}

impl std::error::Error for NetError {}

impl From<NetError> for io::Error {
    fn from(err: NetError) -> io::Error {
        let kind = match err {
            NetError::WouldBlock | NetError::HostUnresolved => io::ErrorKind::WouldBlock,
            NetError::TimedOut => io::ErrorKind::TimedOut,
            NetError::ConnectionRefused => io::ErrorKind::ConnectionRefused,
            NetError::NotConnected | NetError::InvalidConnection => io::ErrorKind::NotConnected,
            NetError::Truncated | NetError::Malformed | NetError::BadChecksum => {
                io::ErrorKind::InvalidData
            }
            NetError::FrameTooLarge => io::ErrorKind::InvalidInput,
            _ => io::ErrorKind::Other,
        };

        io::Error::new(kind, err)
    }
}
