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

// Fetch a page over HTTP/1.0 and print it.
//
// Usage: http_get <address> [path] [interface]

use netcore::netif::{NetConfig, TapDevice};
use netcore::poll::{self, SpinYield};
use netcore::stream::TcpStream;
use netcore::timer::SystemClock;
use netcore::{logger, ConnectionId, IPv4Addr, NetworkStack};
use std::io::{self, Read, Write};
use std::process::exit;

const HTTP_PORT: u16 = 80;
const CONNECT_TIMEOUT_MS: u64 = 10_000;

fn fetch(
    stack: &mut NetworkStack<TapDevice, SystemClock>,
    id: ConnectionId,
    host: IPv4Addr,
    path: &str,
) -> io::Result<Vec<u8>> {
    poll::wait_connected(stack, &mut SpinYield, id, CONNECT_TIMEOUT_MS)?;

    let mut stream = TcpStream::new(stack, id, SpinYield);
    let request = format!("GET {} HTTP/1.0\r\nHost: {}\r\n\r\n", path, host);
    stream.write_all(request.as_bytes())?;

    let mut response = Vec::new();
    stream.read_to_end(&mut response)?;
    Ok(response)
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <address> [path] [interface]", args[0]);
        exit(1);
    }

    if let Err(err) = logger::init(log::LevelFilter::Warn) {
        eprintln!("Failed to install logger: {}", err);
    }

    let host: IPv4Addr = match args[1].parse() {
        Ok(addr) => addr,
        Err(err) => {
            eprintln!("Invalid address {}: {}", args[1], err);
            exit(1);
        }
    };

    let path = args.get(2).map_or("/", |path| path.as_str());
    let interface = args.get(3).map_or("tap0", |name| name.as_str());
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

    let id = match stack.tcp_connect(host, HTTP_PORT) {
        Ok(id) => id,
        Err(err) => {
            eprintln!("Failed to open connection: {}", err);
            exit(1);
        }
    };

    match fetch(&mut stack, id, host, path) {
        Ok(response) => print!("{}", String::from_utf8_lossy(&response)),
        Err(err) => eprintln!("Request failed: {}", err),
    }

    if let Err(err) = stack.tcp_release(id) {
        eprintln!("Failed to release connection: {}", err);
    }

    stack.stats().log_stats();
}
