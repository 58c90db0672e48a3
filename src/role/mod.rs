//! The interface the `Connection` uses to interpret inbound frames as
//! file-transfer operations, without knowing whether it is embedded in a
//! client or a server.
//!
//! Grounded in the reference prototype's own design note
//! (`original_source/common/connection_manager.py`'s docstring sketches
//! exactly this split between a server/client-agnostic `Connection` and a
//! `handle_frame` callback) and in the teacher's `Role`-shaped split between
//! `webrtc_sctp::Association` (protocol mechanics) and its stream-level
//! application data, generalized here into an explicit trait object so the
//! connection engine carries zero client/server knowledge.

use crate::codec::frame::Frame;
use crate::connection::Connection;

pub mod client;
pub mod server;

pub trait Role: std::fmt::Debug {
    /// Interprets one inbound frame, typically by queuing response frames
    /// or opening/writing/closing streams on `conn`.
    fn handle_frame(&mut self, conn: &mut Connection, frame: Frame);

    /// Called once, right after construction, to queue whatever frames
    /// this role needs to kick things off. The server role has nothing to
    /// do here; the client role queues its initial `Read` requests.
    fn start(&mut self, _conn: &mut Connection) {}

    /// Whether this role considers its work done and the connection ready
    /// to be closed. The client role flips this once every requested file
    /// has either completed or failed; the server role never does.
    fn is_finished(&self) -> bool {
        false
    }
}
