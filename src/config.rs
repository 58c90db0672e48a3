//! Tunable protocol parameters, collected in one place the way
//! `sctp_proto::config::TransportConfig` does, so the CLI and tests can
//! override defaults without threading individual arguments everywhere.

use std::time::Duration;

use crate::connection::{DEFAULT_CONNECTION_TIMEOUT, DEFAULT_MAX_PACKET_SIZE, DEFAULT_RETRANSMIT_TIMEOUT};

#[derive(Debug, Clone)]
pub struct Config {
    pub max_packet_size: usize,
    pub retransmit_timeout: Duration,
    pub connection_timeout: Duration,
    /// Success→failure transition probability of the Markov loss model.
    pub loss_p: f64,
    /// Failure→success transition probability of the Markov loss model.
    pub loss_q: f64,
    /// Pins the loss model's RNG for reproducible tests; `None` seeds from
    /// entropy.
    pub loss_seed: Option<u64>,
    /// Gates the slow-start-style congestion window (§4.3.6 of the
    /// protocol design); tests that want a fixed one-MTU window disable it.
    pub congestion_control_enabled: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_packet_size: DEFAULT_MAX_PACKET_SIZE,
            retransmit_timeout: DEFAULT_RETRANSMIT_TIMEOUT,
            connection_timeout: DEFAULT_CONNECTION_TIMEOUT,
            loss_p: 0.0,
            loss_q: 0.0,
            loss_seed: None,
            congestion_control_enabled: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_lossless() {
        let cfg = Config::default();
        assert_eq!(cfg.loss_p, 0.0);
        assert_eq!(cfg.loss_q, 0.0);
    }
}
