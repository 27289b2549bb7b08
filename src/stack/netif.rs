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

// Interface to the network card driver, and the addressing configuration
// for the single interface the stack runs on.

use crate::util::{IPv4Addr, MacAddr};
use std::ffi::CString;
use std::io;

/// A driver that can put whole Ethernet frames on the wire.
pub trait NetDevice {
    fn transmit(&mut self, frame: &[u8]);

    /// Copy the next pending frame into `buffer` without blocking. Drivers
    /// that deliver frames from their interrupt handler instead (by calling
    /// NetworkStack::receive_frame directly) can leave this as the default.
    fn receive(&mut self, _buffer: &mut [u8]) -> Option<usize> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct NetConfig {
    pub mac: MacAddr,
    pub ip: IPv4Addr,
    pub gateway: IPv4Addr,
    pub netmask: IPv4Addr,
    pub retransmit_timeout_ms: u64,

    /// Give up on a connect after this many SYN retransmissions. None keeps
    /// retrying for as long as the connection is held.
    pub max_syn_retries: Option<u32>,
}

impl Default for NetConfig {
    // Addresses QEMU assigns with -netdev user.
    fn default() -> Self {
        NetConfig {
            mac: MacAddr::from_octets([0x52, 0x54, 0x00, 0x12, 0x34, 0x56]),
            ip: IPv4Addr::from_octets([10, 0, 2, 15]),
            gateway: IPv4Addr::from_octets([10, 0, 2, 2]),
            netmask: IPv4Addr::from_octets([255, 255, 255, 0]),
            retransmit_timeout_ms: 1000,
            max_syn_retries: None,
        }
    }
}

impl NetConfig {
    pub fn is_on_link(&self, addr: IPv4Addr) -> bool {
        addr.mask(self.netmask) == self.ip.mask(self.netmask)
    }
}

// Wrappers for the C functions in tap.c
extern "C" {
    fn tap_open(name: *const std::os::raw::c_char) -> i32;
    fn tap_recv(fd: i32, buffer: *mut u8, length: usize, timeout_ms: i32) -> i32;
    fn tap_send(fd: i32, buffer: *const u8, length: usize) -> i32;
    fn tap_close(fd: i32);
}

/// Linux TAP interface, for running the stack as a host process.
pub struct TapDevice {
    fd: i32,
    receive_timeout_ms: i32,
}

impl TapDevice {
    pub fn open(name: &str) -> io::Result<TapDevice> {
        let c_name =
            CString::new(name).map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
        let fd = unsafe { tap_open(c_name.as_ptr()) };
        if fd < 0 {
            return Err(io::Error::from_raw_os_error(-fd));
        }

        log::info!("Opened TAP interface {}", name);
        Ok(TapDevice {
            fd,
            receive_timeout_ms: 0,
        })
    }

    /// How long receive() may wait for a frame. Zero polls.
    pub fn set_receive_timeout(&mut self, timeout_ms: i32) {
        self.receive_timeout_ms = timeout_ms;
    }
}

impl NetDevice for TapDevice {
    fn transmit(&mut self, frame: &[u8]) {
        let result = unsafe { tap_send(self.fd, frame.as_ptr(), frame.len()) };
        if result < 0 {
            log::warn!(
                "Error writing to TAP interface: {}",
                io::Error::from_raw_os_error(-result)
            );
        }
    }

    fn receive(&mut self, buffer: &mut [u8]) -> Option<usize> {
        let result = unsafe {
            tap_recv(
                self.fd,
                buffer.as_mut_ptr(),
                buffer.len(),
                self.receive_timeout_ms,
            )
        };

        if result < 0 {
            log::warn!(
                "Error reading from TAP interface: {}",
                io::Error::from_raw_os_error(-result)
            );
            return None;
        }

        if result == 0 {
            None
        } else {
            Some(result as usize)
        }
    }
}

impl Drop for TapDevice {
    fn drop(&mut self) {
        unsafe { tap_close(self.fd) };
    }
}
