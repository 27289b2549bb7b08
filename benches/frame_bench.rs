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

// Frame construction and the ARP receive path, which is the cheapest full
// trip through the stack that doesn't need a peer.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use netcore::buf::{FrameBuffer, HEADROOM, MAX_PAYLOAD_LEN};
use netcore::netif::{NetConfig, NetDevice};
use netcore::timer::ManualClock;
use netcore::NetworkStack;

struct NullDevice;

impl NetDevice for NullDevice {
    fn transmit(&mut self, frame: &[u8]) {
        black_box(frame);
    }
}

pub fn build_full_frame(c: &mut Criterion) {
    let payload = [0x5au8; MAX_PAYLOAD_LEN];
    c.bench_function("build_full_frame", |b| {
        b.iter(|| {
            let mut frame = FrameBuffer::new();
            frame.append_from_slice(&payload).unwrap();
            frame.alloc_header(HEADROOM).unwrap();
            black_box(frame.len())
        })
    });
}

pub fn build_small_frame(c: &mut Criterion) {
    c.bench_function("build_small_frame", |b| {
        b.iter(|| {
            let mut frame = FrameBuffer::new();
            frame.alloc_header(20).unwrap();
            frame.alloc_header(20).unwrap();
            frame.alloc_header(14).unwrap();
            black_box(frame.len())
        })
    });
}

pub fn arp_reply_input(c: &mut Criterion) {
    let mut frame = vec![
        0x52, 0x54, 0x00, 0x12, 0x34, 0x56, // Destination
        0x52, 0x55, 0x0a, 0x00, 0x02, 0x02, // Source
        0x08, 0x06, // Ethertype
        0x00, 0x01, 0x08, 0x00, 6, 4, 0x00, 0x02,
    ];
    frame.extend_from_slice(&[0x52, 0x55, 0x0a, 0x00, 0x02, 0x02, 10, 0, 2, 2]);
    frame.extend_from_slice(&[0x52, 0x54, 0x00, 0x12, 0x34, 0x56, 10, 0, 2, 15]);

    let mut stack = NetworkStack::new(NetConfig::default(), NullDevice, ManualClock::new(0));
    c.bench_function("arp_reply_input", |b| {
        b.iter(|| stack.receive_frame(black_box(&frame)))
    });
}

criterion_group!(benches, build_full_frame, build_small_frame, arp_reply_input);

criterion_main!(benches);
