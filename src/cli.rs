//! Command-line surface, following `webrtc_sctp`'s examples in leaning on
//! `clap`'s derive API rather than hand-rolled argument parsing.

use std::net::IpAddr;
use std::path::PathBuf;

use clap::Parser;

use crate::config::Config;
use crate::error::{Error, Result};

#[derive(Debug, Parser)]
#[command(name = "rft", about = "Robust File Transfer: reliable file transfer over UDP")]
pub struct Cli {
    /// Run as a server, listening for client connections.
    #[arg(long, conflicts_with = "host")]
    pub server: bool,

    /// Connect to a server at this host (client mode).
    #[arg(long)]
    pub host: Option<String>,

    /// UDP port to bind (server) or connect to (client).
    #[arg(long, default_value_t = 32323)]
    pub port: u16,

    /// Success→failure loss probability (0 disables loss injection).
    #[arg(short = 'p', long = "loss-p", default_value_t = 0.0)]
    pub loss_p: f64,

    /// Failure→success loss probability.
    #[arg(short = 'q', long = "loss-q", default_value_t = 0.0)]
    pub loss_q: f64,

    /// Bind/connect over IPv6 instead of IPv4.
    #[arg(long)]
    pub ipv6: bool,

    /// Root directory the server serves files from. Ignored in client mode.
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// Files to request from the server (client mode only).
    pub files: Vec<PathBuf>,
}

pub enum Mode {
    Server { bind_addr: IpAddr },
    Client { remote_host: String, files: Vec<PathBuf> },
}

impl Cli {
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    pub fn validate(&self) -> Result<Mode> {
        if !(0.0..=1.0).contains(&self.loss_p) || !(0.0..=1.0).contains(&self.loss_q) {
            return Err(Error::Io("loss probabilities must be between 0 and 1".to_string()));
        }

        let bind_addr = if self.ipv6 {
            IpAddr::from(std::net::Ipv6Addr::UNSPECIFIED)
        } else {
            IpAddr::from(std::net::Ipv4Addr::UNSPECIFIED)
        };

        match (self.server, &self.host) {
            (true, Some(_)) => Err(Error::Io("--server and --host are mutually exclusive".to_string())),
            (true, None) => {
                if !self.files.is_empty() {
                    return Err(Error::Io("server mode does not take file arguments".to_string()));
                }
                Ok(Mode::Server { bind_addr })
            }
            (false, Some(host)) => {
                if self.files.is_empty() {
                    return Err(Error::Io("client mode requires at least one file".to_string()));
                }
                Ok(Mode::Client {
                    remote_host: host.clone(),
                    files: self.files.clone(),
                })
            }
            (false, None) => Err(Error::Io("specify either --server or --host".to_string())),
        }
    }

    pub fn to_config(&self) -> Config {
        Config {
            loss_p: self.loss_p,
            loss_q: self.loss_q,
            ..Config::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_and_host_conflict() {
        let cli = Cli {
            server: true,
            host: Some("example.com".to_string()),
            port: 32323,
            loss_p: 0.0,
            loss_q: 0.0,
            ipv6: false,
            root: PathBuf::from("."),
            files: vec![],
        };
        assert!(cli.validate().is_err());
    }

    #[test]
    fn client_without_files_is_rejected() {
        let cli = Cli {
            server: false,
            host: Some("example.com".to_string()),
            port: 32323,
            loss_p: 0.0,
            loss_q: 0.0,
            ipv6: false,
            root: PathBuf::from("."),
            files: vec![],
        };
        assert!(cli.validate().is_err());
    }

    #[test]
    fn out_of_range_loss_probability_is_rejected() {
        let cli = Cli {
            server: true,
            host: None,
            port: 32323,
            loss_p: 1.5,
            loss_q: 0.0,
            ipv6: false,
            root: PathBuf::from("."),
            files: vec![],
        };
        assert!(cli.validate().is_err());
    }

    #[test]
    fn valid_server_mode() {
        let cli = Cli {
            server: true,
            host: None,
            port: 32323,
            loss_p: 0.1,
            loss_q: 0.2,
            ipv6: false,
            root: PathBuf::from("."),
            files: vec![],
        };
        assert!(matches!(cli.validate(), Ok(Mode::Server { .. })));
    }

    #[test]
    fn server_mode_rejects_file_arguments() {
        let cli = Cli {
            server: true,
            host: None,
            port: 32323,
            loss_p: 0.0,
            loss_q: 0.0,
            ipv6: false,
            root: PathBuf::from("."),
            files: vec![PathBuf::from("extra.txt")],
        };
        assert!(cli.validate().is_err());
    }
}
