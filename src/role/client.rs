//! The client side: issues one `Read` per requested file (with resume
//! negotiation when a local partial file already exists), writes inbound
//! `Data` to disk, and tracks when every requested file has finished so the
//! CLI knows when to stop.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::codec::frame::Frame;
use crate::connection::Connection;
use crate::role::Role;
use crate::stream::Stream;

#[derive(Debug)]
pub struct ClientRole {
    pending: Vec<PathBuf>,
    next_stream_id: u16,
    /// Total bytes expected for a stream, learned from the server's
    /// `Answer` (it carries the full file size so the client can tell a
    /// fresh, open-ended download apart from one that's already done).
    expected_len: HashMap<u16, u64>,
    outstanding: usize,
    exit_sent: bool,
}

impl ClientRole {
    pub fn new(files: Vec<PathBuf>) -> Self {
        ClientRole {
            pending: files,
            next_stream_id: 0,
            expected_len: HashMap::new(),
            outstanding: 0,
            exit_sent: false,
        }
    }

    fn request_file(&mut self, conn: &mut Connection, path: PathBuf) {
        let stream_id = self.next_stream_id;
        self.next_stream_id += 1;

        // The wire request names only the file, never the client's local
        // destination path — the server resolves names against its own
        // root directory (spec.md §6).
        let Some(request_name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
            log::error!("cannot derive a request name from {}", path.display());
            return;
        };

        let existing_size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);

        let (resume, offset, checksum) = if existing_size > 0 {
            let checksum = Stream::open_for_send(stream_id, &path)
                .and_then(|mut s| s.crc32_prefix(existing_size))
                .unwrap_or(0);
            (true, existing_size, checksum)
        } else {
            (false, 0, 0)
        };

        match Stream::open_for_receive(stream_id, &path, offset) {
            Ok(stream) => {
                conn.streams.insert(stream_id, stream);
            }
            Err(e) => {
                log::error!("cannot open {} for writing: {e}", path.display());
                return;
            }
        }

        self.outstanding += 1;
        conn.queue_frame(
            Frame::Read {
                stream_id,
                resume,
                offset,
                length: 0,
                checksum,
                path: request_name,
            },
            None,
        );
    }

    fn finish_stream(&mut self, conn: &mut Connection, stream_id: u16) {
        self.expected_len.remove(&stream_id);
        if let Some(stream) = conn.streams.remove(&stream_id) {
            if let Err(e) = stream.close() {
                log::error!("error closing stream {stream_id}: {e}");
            }
        }
        self.outstanding = self.outstanding.saturating_sub(1);
        if self.outstanding == 0 && self.pending.is_empty() && !self.exit_sent {
            self.exit_sent = true;
            conn.queue_frame(Frame::Exit, Some(true));
        }
    }

    fn check_complete(&mut self, conn: &mut Connection, stream_id: u16) {
        let Some(&expected) = self.expected_len.get(&stream_id) else {
            return;
        };
        let at_target = conn
            .streams
            .get(&stream_id)
            .is_some_and(|s| s.next_offset >= expected);
        if at_target {
            self.finish_stream(conn, stream_id);
        }
    }
}

impl Role for ClientRole {
    fn start(&mut self, conn: &mut Connection) {
        let files = std::mem::take(&mut self.pending);
        for path in files {
            self.request_file(conn, path);
        }
    }

    fn handle_frame(&mut self, conn: &mut Connection, frame: Frame) {
        match frame {
            Frame::Answer { stream_id, payload } => {
                if payload.len() < 8 {
                    return;
                }
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&payload[..8]);
                let file_size = u64::from_le_bytes(buf);
                self.expected_len.insert(stream_id, file_size);
                self.check_complete(conn, stream_id);
            }
            Frame::Data {
                stream_id,
                offset,
                payload,
            } => {
                let Some(stream) = conn.streams.get_mut(&stream_id) else {
                    log::debug!("data for unknown stream {stream_id}, dropping");
                    return;
                };
                if let Err(e) = stream.write_at(offset, &payload) {
                    log::error!("write error on stream {stream_id}: {e}");
                    return;
                }
                self.check_complete(conn, stream_id);
            }
            Frame::Error { stream_id, message } => {
                log::warn!("server error on stream {stream_id}: {message}");
                if message == "checksum mismatch" {
                    if let Some(stream) = conn.streams.remove(&stream_id) {
                        let path = stream.path.clone();
                        let _ = stream.close();
                        let _ = std::fs::remove_file(&path);
                    }
                } else if let Some(stream) = conn.streams.remove(&stream_id) {
                    let _ = stream.close();
                }
                self.expected_len.remove(&stream_id);
                self.outstanding = self.outstanding.saturating_sub(1);
                if self.outstanding == 0 && self.pending.is_empty() && !self.exit_sent {
                    self.exit_sent = true;
                    conn.queue_frame(Frame::Exit, Some(true));
                }
            }
            Frame::Read { .. }
            | Frame::Write { .. }
            | Frame::Checksum { .. }
            | Frame::Stat { .. }
            | Frame::List { .. }
            | Frame::FlowControl { .. }
            | Frame::ConnIdChange { .. }
            | Frame::Ack { .. }
            | Frame::Exit => {
                log::debug!("client ignoring unexpected frame");
            }
        }
    }

    fn is_finished(&self) -> bool {
        self.exit_sent && self.outstanding == 0
    }
}
