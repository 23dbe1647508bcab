//! Shared utilities for integration testing.

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use mux_server::config::ListenerConfig;
use mux_server::{ProcessingHook, TcpServer};

/// One hook invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Received {
    pub peer_address: String,
    pub peer_port: u16,
    pub bytes: Vec<u8>,
}

/// Hook that records every invocation.
#[derive(Debug, Default)]
pub struct RecordingHook {
    calls: Mutex<Vec<Received>>,
}

impl RecordingHook {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> Vec<Received> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Bytes received from the peer on `peer_port`, concatenated in order.
    pub fn bytes_from(&self, peer_port: u16) -> Vec<u8> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.peer_port == peer_port)
            .flat_map(|r| r.bytes.iter().copied())
            .collect()
    }
}

impl ProcessingHook for RecordingHook {
    fn handle(&self, peer_address: &str, peer_port: u16, bytes: &[u8]) {
        self.calls.lock().unwrap().push(Received {
            peer_address: peer_address.to_string(),
            peer_port,
            bytes: bytes.to_vec(),
        });
    }
}

/// Start a server on an OS-assigned loopback port.
pub fn start_loopback_server(hook: Arc<RecordingHook>) -> (TcpServer, SocketAddr) {
    let config = ListenerConfig {
        port: 0,
        host: Some("127.0.0.1".into()),
        ..ListenerConfig::default()
    };
    let server = TcpServer::new(config, hook).with_display_name("test-server");
    server.start().unwrap();
    let addr = server.local_addr().unwrap();
    (server, addr)
}

/// Poll `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    condition()
}

/// Install a test-friendly subscriber once; later calls are ignored.
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("mux_server=debug")
        .try_init();
}
