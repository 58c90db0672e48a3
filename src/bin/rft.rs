//! Binary entry point: parses CLI args, stands up a `ConnectionManager` on
//! one UDP socket, wires in the appropriate `Role`, and runs until every
//! connection finishes (client) or forever (server, until Ctrl-C).

use std::net::{SocketAddr, ToSocketAddrs, UdpSocket};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rft::cli::{Cli, Mode};
use rft::manager::{ConnectionManager, Endpoint};
use rft::role::client::ClientRole;
use rft::role::server::ServerRole;

fn main() {
    env_logger::init();
    let cli = Cli::parse_args();
    let mode = match cli.validate() {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("rft: {e}");
            std::process::exit(2);
        }
    };

    let cfg = cli.to_config();
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        if let Err(e) = ctrlc::set_handler(move || {
            log::info!("received interrupt, shutting down");
            shutdown.store(true, Ordering::SeqCst);
        }) {
            log::warn!("failed to install signal handler: {e}");
        }
    }

    let result = match mode {
        Mode::Server { bind_addr } => run_server(bind_addr, cli.port, cfg, cli.root, shutdown),
        Mode::Client { remote_host, files } => run_client(&remote_host, cli.port, cfg, files, shutdown),
    };

    if let Err(e) = result {
        eprintln!("rft: {e}");
        std::process::exit(1);
    }
}

fn run_server(
    bind_addr: std::net::IpAddr,
    port: u16,
    cfg: rft::config::Config,
    root: std::path::PathBuf,
    shutdown: Arc<AtomicBool>,
) -> std::io::Result<()> {
    let socket = UdpSocket::bind(SocketAddr::new(bind_addr, port))?;
    log::info!("listening on {}", socket.local_addr()?);
    let mut manager = ConnectionManager::new(socket, Endpoint::Server, cfg)?;
    manager.set_role_factory(Box::new(move || Box::new(ServerRole::new(root.clone()))));

    while !shutdown.load(Ordering::SeqCst) {
        manager.run_once()?;
    }
    Ok(())
}

fn run_client(
    host: &str,
    port: u16,
    cfg: rft::config::Config,
    files: Vec<std::path::PathBuf>,
    shutdown: Arc<AtomicBool>,
) -> std::io::Result<()> {
    let remote_addr = (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "could not resolve host"))?;
    let local_bind: SocketAddr = if remote_addr.is_ipv6() {
        "[::]:0".parse().unwrap()
    } else {
        "0.0.0.0:0".parse().unwrap()
    };
    let socket = UdpSocket::bind(local_bind)?;
    socket.connect(remote_addr)?;
    let mut manager = ConnectionManager::new(socket, Endpoint::Client, cfg)?;
    manager.open_client_connection(remote_addr, Box::new(ClientRole::new(files)));

    while !shutdown.load(Ordering::SeqCst) {
        if !manager.run_once()? {
            break;
        }
    }
    Ok(())
}
