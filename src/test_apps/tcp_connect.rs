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

// Bring up the stack on a TAP interface and open one connection.
//
// Usage: tcp_connect [interface] [address port]
//
// With no address this connects to the built-in test server.

use netcore::netif::{NetConfig, TapDevice};
use netcore::poll::{self, SpinYield};
use netcore::timer::SystemClock;
use netcore::{logger, IPv4Addr, NetworkStack};
use std::process::exit;

const CONNECT_TIMEOUT_MS: u64 = 10_000;

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if let Err(err) = logger::init(log::LevelFilter::Info) {
        eprintln!("Failed to install logger: {}", err);
    }

    let interface = args.get(1).map_or("tap0", |name| name.as_str());
    let mut device = match TapDevice::open(interface) {
        Ok(device) => device,
        Err(err) => {
            eprintln!("Failed to open {}: {}", interface, err);
            exit(1);
        }
    };

    device.set_receive_timeout(10);
    let mut stack = NetworkStack::new(NetConfig::default(), device, SystemClock::new());
    stack.init();

    let result = match (args.get(2), args.get(3)) {
        (Some(addr), Some(port)) => {
            let remote_ip = addr.parse::<IPv4Addr>();
            let remote_port = port.parse::<u16>();
            match (remote_ip, remote_port) {
                (Ok(ip), Ok(port)) => stack.tcp_connect(ip, port),
                _ => {
                    eprintln!("Invalid address {} {}", addr, port);
                    exit(1);
                }
            }
        }

        _ => stack.tcp_test_connect(),
    };

    let id = match result {
        Ok(id) => id,
        Err(err) => {
            eprintln!("Failed to open connection: {}", err);
            exit(1);
        }
    };

    let mut scheduler = SpinYield;
    match poll::wait_connected(&mut stack, &mut scheduler, id, CONNECT_TIMEOUT_MS) {
        Ok(()) => {
            if let Some(conn) = stack.connection(id) {
                println!("Connected: {}", conn);
            }
        }

        Err(err) => println!("Connection failed: {}", err),
    }

    if let Err(err) = stack.tcp_release(id) {
        eprintln!("Failed to release connection: {}", err);
    }

    stack.stats().log_stats();
}
