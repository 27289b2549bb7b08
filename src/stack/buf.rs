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

// Outbound frames are built back to front: the payload is appended first,
// then each layer prepends its header into the reserved space in front of
// it. The buffer lives on the stack for the duration of one send call, so
// nothing is allocated per packet.

use crate::error::NetError;

pub const MAX_FRAME_LEN: usize = 1514;

// Ethernet + IPv4 + TCP, none with options.
pub const HEADROOM: usize = 14 + 20 + 20;

pub const MAX_PAYLOAD_LEN: usize = MAX_FRAME_LEN - HEADROOM;

pub struct FrameBuffer {
    data: [u8; MAX_FRAME_LEN],
    start: usize,
    end: usize,
}

impl FrameBuffer {
    pub fn new() -> FrameBuffer {
        FrameBuffer {
            data: [0; MAX_FRAME_LEN],
            start: HEADROOM,
            end: HEADROOM,
        }
    }

    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn append_from_slice(&mut self, data: &[u8]) -> Result<(), NetError> {
        if data.len() > MAX_FRAME_LEN - self.end {
            return Err(NetError::FrameTooLarge);
        }

        self.data[self.end..self.end + data.len()].copy_from_slice(data);
        self.end += data.len();
        Ok(())
    }

    /// Reserve `size` zeroed bytes in front of the current contents. They
    /// are returned by header_mut().
    pub fn alloc_header(&mut self, size: usize) -> Result<(), NetError> {
        if size > self.start {
            return Err(NetError::FrameTooLarge);
        }

        self.start -= size;
        self.data[self.start..self.start + size].fill(0);
        Ok(())
    }

    pub fn header(&self) -> &[u8] {
        &self.data[self.start..self.end]
    }

    pub fn header_mut(&mut self) -> &mut [u8] {
        &mut self.data[self.start..self.end]
    }

    pub fn as_slice(&self) -> &[u8] {
        self.header()
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        FrameBuffer::new()
    }
}
