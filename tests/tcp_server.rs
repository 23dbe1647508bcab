//! Lifecycle and delivery tests for the TCP server.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::mpsc;
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::{Duration, Instant};

use mux_server::config::ListenerConfig;
use mux_server::net::BindError;
use mux_server::{ServerError, ServerState, TcpServer};

mod common;

use common::{start_loopback_server, wait_until, RecordingHook};

const SETTLE: Duration = Duration::from_secs(5);

#[test]
fn ping_scenario_on_wildcard_port_zero() {
    common::init_tracing();
    let hook = RecordingHook::new();
    let server = TcpServer::new(ListenerConfig::with_port(0), hook.clone());
    server.start().unwrap();
    assert_eq!(server.state(), ServerState::Running);

    let port = server.local_addr().unwrap().port();
    assert_ne!(port, 0);

    let mut client = TcpStream::connect(("127.0.0.1", port)).unwrap();
    assert!(wait_until(SETTLE, || server.client_count() == 1));

    client.write_all(b"ping").unwrap();
    assert!(wait_until(SETTLE, || hook.call_count() == 1));

    let calls = hook.calls();
    assert_eq!(calls[0].bytes, b"ping".to_vec());
    assert_eq!(calls[0].peer_port, client.local_addr().unwrap().port());

    drop(client);
    assert!(wait_until(SETTLE, || server.client_count() == 0));
    assert_eq!(hook.call_count(), 1, "close must not invoke the hook");

    server.stop();
    assert_eq!(server.state(), ServerState::Stopped);
    assert!(server.local_addr().is_none());
}

#[test]
fn payload_up_to_buffer_size_is_delivered_once_and_exactly() {
    let hook = RecordingHook::new();
    let (server, addr) = start_loopback_server(hook.clone());

    let payload: Vec<u8> = (0..1024u32).map(|i| (i % 251) as u8).collect();
    let mut client = TcpStream::connect(addr).unwrap();
    client.write_all(&payload).unwrap();

    assert!(wait_until(SETTLE, || hook.bytes_from(client.local_addr().unwrap().port()).len() == payload.len()));
    let calls = hook.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].bytes, payload);
    assert_eq!(calls[0].peer_address, "127.0.0.1");

    server.stop();
}

#[test]
fn binary_payload_is_not_terminated_or_interpreted() {
    let hook = RecordingHook::new();
    let (server, addr) = start_loopback_server(hook.clone());

    let payload = [0u8, 255, 0, 10, 13, 0];
    let mut client = TcpStream::connect(addr).unwrap();
    client.write_all(&payload).unwrap();

    assert!(wait_until(SETTLE, || hook.call_count() == 1));
    assert_eq!(hook.calls()[0].bytes, payload.to_vec());

    server.stop();
}

#[test]
fn large_payload_arrives_in_order_across_reads() {
    let hook = RecordingHook::new();
    let (server, addr) = start_loopback_server(hook.clone());

    let payload: Vec<u8> = (0..200_000u32).map(|i| (i * 7 % 256) as u8).collect();
    let mut client = TcpStream::connect(addr).unwrap();
    let port = client.local_addr().unwrap().port();
    client.write_all(&payload).unwrap();

    assert!(wait_until(Duration::from_secs(10), || hook.bytes_from(port).len() == payload.len()));
    assert_eq!(hook.bytes_from(port), payload);
    assert!(hook.calls().iter().all(|r| r.bytes.len() <= 1024));
    assert!(hook.call_count() >= payload.len() / 1024);

    server.stop();
}

#[test]
fn data_before_close_is_still_delivered() {
    let hook = RecordingHook::new();
    let (server, addr) = start_loopback_server(hook.clone());

    let mut client = TcpStream::connect(addr).unwrap();
    client.write_all(b"last words").unwrap();
    client.shutdown(Shutdown::Both).unwrap();
    drop(client);

    assert!(wait_until(SETTLE, || hook.call_count() == 1));
    assert!(wait_until(SETTLE, || server.client_count() == 0));
    assert_eq!(hook.calls()[0].bytes, b"last words".to_vec());

    server.stop();
}

#[test]
fn clients_are_kept_apart() {
    let hook = RecordingHook::new();
    let (server, addr) = start_loopback_server(hook.clone());

    let mut a = TcpStream::connect(addr).unwrap();
    let mut b = TcpStream::connect(addr).unwrap();
    let (port_a, port_b) = (a.local_addr().unwrap().port(), b.local_addr().unwrap().port());

    for i in 0..5 {
        a.write_all(format!("a{}", i).as_bytes()).unwrap();
        b.write_all(format!("b{}", i).as_bytes()).unwrap();
    }

    assert!(wait_until(SETTLE, || hook.bytes_from(port_a).len() == 10 && hook.bytes_from(port_b).len() == 10));
    assert_eq!(hook.bytes_from(port_a), b"a0a1a2a3a4".to_vec());
    assert_eq!(hook.bytes_from(port_b), b"b0b1b2b3b4".to_vec());

    server.stop();
}

#[test]
fn one_failed_connection_does_not_affect_others() {
    let hook = RecordingHook::new();
    let (server, addr) = start_loopback_server(hook.clone());

    let doomed = TcpStream::connect(addr).unwrap();
    let mut survivor = TcpStream::connect(addr).unwrap();
    assert!(wait_until(SETTLE, || server.client_count() == 2));

    // Abortive close: RST instead of FIN.
    socket_linger_zero(&doomed);
    drop(doomed);
    assert!(wait_until(SETTLE, || server.client_count() == 1));

    survivor.write_all(b"still here").unwrap();
    assert!(wait_until(SETTLE, || hook.call_count() == 1));
    assert_eq!(hook.calls()[0].bytes, b"still here".to_vec());

    server.stop();
}

fn socket_linger_zero(stream: &TcpStream) {
    let socket = socket2::SockRef::from(stream);
    socket.set_linger(Some(Duration::ZERO)).unwrap();
}

#[test]
fn stop_with_idle_clients_is_bounded_and_closes_them() {
    let hook = RecordingHook::new();
    let (server, addr) = start_loopback_server(hook.clone());

    let mut clients: Vec<TcpStream> = (0..5).map(|_| TcpStream::connect(addr).unwrap()).collect();
    assert!(wait_until(SETTLE, || server.client_count() == 5));

    let started = Instant::now();
    server.stop();
    assert!(started.elapsed() < Duration::from_secs(2), "stop took {:?}", started.elapsed());
    assert_eq!(server.state(), ServerState::Stopped);
    assert_eq!(server.client_count(), 0);

    for client in &mut clients {
        client.set_read_timeout(Some(SETTLE)).unwrap();
        let mut buf = [0u8; 8];
        match client.read(&mut buf) {
            Ok(n) => assert_eq!(n, 0, "server should have closed the connection"),
            Err(e) => assert_ne!(e.kind(), std::io::ErrorKind::WouldBlock),
        }
    }

    assert!(TcpStream::connect(addr).is_err());
    assert_eq!(hook.call_count(), 0);
}

#[test]
fn stop_is_idempotent() {
    let (server, _addr) = start_loopback_server(RecordingHook::new());

    server.stop();
    let started = Instant::now();
    server.stop();
    assert!(started.elapsed() < Duration::from_millis(100));
    assert_eq!(server.state(), ServerState::Stopped);
}

#[test]
fn stop_without_start_is_a_noop() {
    let server = TcpServer::on_port(0, RecordingHook::new());
    server.stop();
    assert_eq!(server.state(), ServerState::Stopped);
}

#[test]
fn start_is_idempotent() {
    let (server, addr) = start_loopback_server(RecordingHook::new());
    server.start().unwrap();
    assert_eq!(server.local_addr(), Some(addr));
    assert_eq!(server.display_name(), "test-server");
    server.stop();
}

#[test]
fn concurrent_stops_all_return() {
    let (server, _addr) = start_loopback_server(RecordingHook::new());
    let server = Arc::new(server);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let server = Arc::clone(&server);
            thread::spawn(move || server.stop())
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(server.state(), ServerState::Stopped);
}

#[test]
fn port_in_use_fails_with_bind_error() {
    let occupied = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = occupied.local_addr().unwrap().port();

    let config = ListenerConfig {
        port,
        host: Some("127.0.0.1".into()),
        ..ListenerConfig::default()
    };
    let server = TcpServer::new(config, RecordingHook::new());

    match server.start() {
        Err(ServerError::Bind(BindError::Exhausted { .. })) => {}
        other => panic!("expected bind error, got {:?}", other),
    }
    assert_eq!(server.state(), ServerState::Stopped);
    assert!(server.local_addr().is_none());
}

#[test]
fn restart_after_stop() {
    let hook = RecordingHook::new();
    let (server, _addr) = start_loopback_server(hook.clone());
    server.stop();

    server.start().unwrap();
    let addr = server.local_addr().unwrap();
    let mut client = TcpStream::connect(addr).unwrap();
    client.write_all(b"again").unwrap();
    assert!(wait_until(SETTLE, || hook.call_count() == 1));

    server.stop();
}

#[test]
fn hook_may_stop_its_own_server() {
    let slot: Arc<OnceLock<Arc<TcpServer>>> = Arc::new(OnceLock::new());
    let hook_slot = Arc::clone(&slot);
    let hook = move |_: &str, _: u16, _: &[u8]| {
        if let Some(server) = hook_slot.get() {
            server.stop();
        }
    };

    let config = ListenerConfig {
        port: 0,
        host: Some("127.0.0.1".into()),
        ..ListenerConfig::default()
    };
    let server = Arc::new(TcpServer::new(config, Arc::new(hook)));
    server.start().unwrap();
    let addr = server.local_addr().unwrap();
    slot.set(Arc::clone(&server)).ok();

    let mut client = TcpStream::connect(addr).unwrap();
    client.write_all(b"shut down").unwrap();

    assert!(wait_until(SETTLE, || server.state() == ServerState::Stopped));
    assert!(wait_until(SETTLE, || TcpStream::connect(addr).is_err()));
}

fn loopback_config() -> ListenerConfig {
    ListenerConfig {
        port: 0,
        host: Some("127.0.0.1".into()),
        ..ListenerConfig::default()
    }
}

#[test]
fn slow_hook_stop_racing_external_stop_completes() {
    let slot: Arc<OnceLock<Arc<TcpServer>>> = Arc::new(OnceLock::new());
    let hook_slot = Arc::clone(&slot);
    let hook = move |_: &str, _: u16, _: &[u8]| {
        thread::sleep(Duration::from_millis(300));
        if let Some(server) = hook_slot.get() {
            server.stop();
        }
    };

    let server = Arc::new(TcpServer::new(loopback_config(), Arc::new(hook)));
    server.start().unwrap();
    let addr = server.local_addr().unwrap();
    slot.set(Arc::clone(&server)).ok();

    let mut client = TcpStream::connect(addr).unwrap();
    client.write_all(b"x").unwrap();
    thread::sleep(Duration::from_millis(100));

    let (done_tx, done_rx) = mpsc::channel();
    let stopper = Arc::clone(&server);
    thread::spawn(move || {
        stopper.stop();
        done_tx.send(()).ok();
    });

    assert!(done_rx.recv_timeout(SETTLE).is_ok(), "external stop never returned");
    assert_eq!(server.state(), ServerState::Stopped);
    assert!(server.local_addr().is_none());
    assert!(TcpStream::connect(addr).is_err());
}

#[test]
fn server_stopped_by_its_hook_can_be_restarted() {
    let slot: Arc<OnceLock<Arc<TcpServer>>> = Arc::new(OnceLock::new());
    let hook_slot = Arc::clone(&slot);
    let recorder = RecordingHook::new();
    let sink = recorder.clone();
    let hook = move |addr: &str, port: u16, bytes: &[u8]| {
        if bytes == b"stop" {
            if let Some(server) = hook_slot.get() {
                server.stop();
            }
            return;
        }
        mux_server::ProcessingHook::handle(sink.as_ref(), addr, port, bytes);
    };

    let server = Arc::new(TcpServer::new(loopback_config(), Arc::new(hook)));
    server.start().unwrap();
    slot.set(Arc::clone(&server)).ok();

    let mut client = TcpStream::connect(server.local_addr().unwrap()).unwrap();
    client.write_all(b"stop").unwrap();
    assert!(wait_until(SETTLE, || server.state() == ServerState::Stopped));
    assert!(server.local_addr().is_none());

    server.start().unwrap();
    assert_eq!(server.state(), ServerState::Running);
    let mut client = TcpStream::connect(server.local_addr().unwrap()).unwrap();
    client.write_all(b"again").unwrap();
    assert!(wait_until(SETTLE, || recorder.call_count() == 1));
    assert_eq!(recorder.calls()[0].bytes, b"again".to_vec());

    server.stop();
}

#[test]
fn panicking_hook_does_not_kill_the_loop() {
    let hook = move |_: &str, _: u16, bytes: &[u8]| {
        if bytes == b"boom" {
            panic!("hook failure");
        }
    };
    let config = ListenerConfig {
        port: 0,
        host: Some("127.0.0.1".into()),
        ..ListenerConfig::default()
    };
    let server = TcpServer::new(config, Arc::new(hook));
    server.start().unwrap();
    let addr = server.local_addr().unwrap();

    let mut client = TcpStream::connect(addr).unwrap();
    client.write_all(b"boom").unwrap();
    thread::sleep(Duration::from_millis(100));

    let _second = TcpStream::connect(addr).unwrap();
    assert!(wait_until(SETTLE, || server.client_count() == 2));

    server.stop();
}

#[test]
fn drop_stops_the_server() {
    let (server, addr) = start_loopback_server(RecordingHook::new());
    drop(server);
    assert!(TcpStream::connect(addr).is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_connects_are_all_accepted() {
    const CLIENTS: usize = 50;

    let hook = RecordingHook::new();
    let (server, addr) = start_loopback_server(hook.clone());

    let tasks: Vec<_> = (0..CLIENTS)
        .map(|i| {
            tokio::spawn(async move {
                let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
                tokio::io::AsyncWriteExt::write_all(&mut stream, format!("client-{}", i).as_bytes())
                    .await
                    .unwrap();
                stream
            })
        })
        .collect();

    let mut streams = Vec::with_capacity(CLIENTS);
    for task in tasks {
        streams.push(task.await.unwrap());
    }

    let server = Arc::new(server);
    let watched = Arc::clone(&server);
    let watched_hook = hook.clone();
    let settled = tokio::task::spawn_blocking(move || {
        wait_until(SETTLE, || watched.client_count() == CLIENTS && watched_hook.call_count() == CLIENTS)
    })
    .await
    .unwrap();
    assert!(settled, "clients={} calls={}", server.client_count(), hook.call_count());

    drop(streams);
    let watched = Arc::clone(&server);
    let drained = tokio::task::spawn_blocking(move || wait_until(SETTLE, || watched.client_count() == 0))
        .await
        .unwrap();
    assert!(drained);

    let stopper = Arc::clone(&server);
    tokio::task::spawn_blocking(move || stopper.stop()).await.unwrap();
    assert_eq!(server.state(), ServerState::Stopped);
}
