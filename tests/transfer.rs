//! End-to-end scenarios driven over real loopback UDP sockets: a server
//! thread and a client thread each running their own `ConnectionManager`
//! event loop, the way the `rft` binary drives them.

use std::net::UdpSocket;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rft::config::Config;
use rft::manager::{ConnectionManager, Endpoint};
use rft::role::client::ClientRole;
use rft::role::server::ServerRole;

fn spawn_server(root: PathBuf, cfg: Config) -> (std::net::SocketAddr, Arc<AtomicBool>, thread::JoinHandle<()>) {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let addr = socket.local_addr().unwrap();
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_for_thread = shutdown.clone();
    let handle = thread::spawn(move || {
        let mut manager = ConnectionManager::new(socket, Endpoint::Server, cfg).unwrap();
        manager.set_role_factory(Box::new(move || Box::new(ServerRole::new(root.clone()))));
        while !shutdown_for_thread.load(Ordering::SeqCst) {
            manager.run_once().unwrap();
        }
    });
    (addr, shutdown, handle)
}

fn run_client_with_deadline(
    server_addr: std::net::SocketAddr,
    cfg: Config,
    files: Vec<PathBuf>,
    budget: Duration,
) {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let mut manager = ConnectionManager::new(socket, Endpoint::Client, cfg).unwrap();
    manager.open_client_connection(server_addr, Box::new(ClientRole::new(files)));

    let deadline = std::time::Instant::now() + budget;
    while std::time::Instant::now() < deadline {
        if !manager.run_once().unwrap() {
            return;
        }
    }
    panic!("client did not finish within the test deadline");
}

fn run_client(server_addr: std::net::SocketAddr, cfg: Config, files: Vec<PathBuf>) {
    run_client_with_deadline(server_addr, cfg, files, Duration::from_secs(10));
}

#[test]
fn simple_transfer_downloads_full_file() {
    let server_dir = tempfile::tempdir().unwrap();
    let client_dir = tempfile::tempdir().unwrap();
    let contents = vec![7u8; 50_000];
    std::fs::write(server_dir.path().join("payload.bin"), &contents).unwrap();

    let (addr, shutdown, handle) = spawn_server(server_dir.path().to_path_buf(), Config::default());
    let target = client_dir.path().join("payload.bin");
    run_client(addr, Config::default(), vec![target.clone()]);

    assert_eq!(std::fs::read(&target).unwrap(), contents);
    shutdown.store(true, Ordering::SeqCst);
    let _ = handle.join();
}

#[test]
fn missing_file_leaves_no_output() {
    let server_dir = tempfile::tempdir().unwrap();
    let client_dir = tempfile::tempdir().unwrap();

    let (addr, shutdown, handle) = spawn_server(server_dir.path().to_path_buf(), Config::default());
    let target = client_dir.path().join("missing.bin");
    run_client(addr, Config::default(), vec![target.clone()]);

    assert!(!target.exists());
    shutdown.store(true, Ordering::SeqCst);
    let _ = handle.join();
}

#[test]
fn resume_continues_from_existing_prefix() {
    let server_dir = tempfile::tempdir().unwrap();
    let client_dir = tempfile::tempdir().unwrap();
    let mut contents = vec![0u8; 20_000];
    for (i, b) in contents.iter_mut().enumerate() {
        *b = (i % 251) as u8;
    }
    std::fs::write(server_dir.path().join("movie.bin"), &contents).unwrap();

    let target = client_dir.path().join("movie.bin");
    std::fs::write(&target, &contents[..10_000]).unwrap();

    let (addr, shutdown, handle) = spawn_server(server_dir.path().to_path_buf(), Config::default());
    run_client(addr, Config::default(), vec![target.clone()]);

    assert_eq!(std::fs::read(&target).unwrap(), contents);
    shutdown.store(true, Ordering::SeqCst);
    let _ = handle.join();
}

#[test]
fn resume_with_corrupt_prefix_is_rejected_and_file_removed() {
    let server_dir = tempfile::tempdir().unwrap();
    let client_dir = tempfile::tempdir().unwrap();
    let contents = vec![9u8; 5_000];
    std::fs::write(server_dir.path().join("f.bin"), &contents).unwrap();

    let target = client_dir.path().join("f.bin");
    // A prefix that doesn't match any real prefix of the server's file.
    std::fs::write(&target, vec![1u8; 2_000]).unwrap();

    let (addr, shutdown, handle) = spawn_server(server_dir.path().to_path_buf(), Config::default());
    run_client(addr, Config::default(), vec![target.clone()]);

    assert!(!target.exists());
    shutdown.store(true, Ordering::SeqCst);
    let _ = handle.join();
}

#[test]
fn lossy_channel_still_completes() {
    let server_dir = tempfile::tempdir().unwrap();
    let client_dir = tempfile::tempdir().unwrap();
    let contents = vec![3u8; 100_000];
    std::fs::write(server_dir.path().join("big.bin"), &contents).unwrap();

    let lossy = Config {
        loss_p: 0.05,
        loss_q: 0.5,
        loss_seed: Some(7),
        retransmit_timeout: Duration::from_millis(150),
        ..Config::default()
    };
    let lossy_client = Config {
        loss_p: 0.05,
        loss_q: 0.5,
        loss_seed: Some(11),
        retransmit_timeout: Duration::from_millis(150),
        ..Config::default()
    };

    let (addr, shutdown, handle) = spawn_server(server_dir.path().to_path_buf(), lossy);
    let target = client_dir.path().join("big.bin");
    run_client_with_deadline(addr, lossy_client, vec![target.clone()], Duration::from_secs(30));

    assert_eq!(std::fs::read(&target).unwrap(), contents);
    shutdown.store(true, Ordering::SeqCst);
    let _ = handle.join();
}

#[test]
fn multiple_files_in_one_session_all_complete() {
    let server_dir = tempfile::tempdir().unwrap();
    let client_dir = tempfile::tempdir().unwrap();
    std::fs::write(server_dir.path().join("a.bin"), b"aaaaaaaaaa").unwrap();
    std::fs::write(server_dir.path().join("b.bin"), b"bbbbbbbbbbbbbbb").unwrap();

    let (addr, shutdown, handle) = spawn_server(server_dir.path().to_path_buf(), Config::default());
    let a = client_dir.path().join("a.bin");
    let b = client_dir.path().join("b.bin");
    run_client(addr, Config::default(), vec![a.clone(), b.clone()]);

    assert_eq!(std::fs::read(&a).unwrap(), b"aaaaaaaaaa");
    assert_eq!(std::fs::read(&b).unwrap(), b"bbbbbbbbbbbbbbb");
    shutdown.store(true, Ordering::SeqCst);
    let _ = handle.join();
}
