//! The server side: answers `Read` requests by streaming a file, serves a
//! `Checksum` lookup, and rejects the not-yet-supported write-side frames.

use std::path::{Component, Path, PathBuf};

use bytes::Bytes;

use crate::codec::frame::Frame;
use crate::connection::Connection;
use crate::role::Role;
use crate::stream::Stream;

/// Data frames are packaged in chunks this big, comfortably under
/// `max_packet_size` once the 11-byte `Data` header is added.
const DATA_CHUNK_SIZE: u64 = 1400;

#[derive(Debug)]
pub struct ServerRole {
    root: PathBuf,
}

impl ServerRole {
    pub fn new(root: PathBuf) -> Self {
        ServerRole { root }
    }

    /// Resolves a wire-supplied path against `root`, rejecting anything
    /// absolute or containing a `..` component so a client can never name a
    /// file outside `root` (spec.md §6: paths are "relative to [the
    /// server's] working directory").
    fn resolve_path(&self, requested: &str) -> Option<PathBuf> {
        let requested = Path::new(requested);
        if requested.components().any(|c| {
            matches!(
                c,
                Component::ParentDir | Component::RootDir | Component::Prefix(_)
            )
        }) {
            return None;
        }
        Some(self.root.join(requested))
    }

    fn handle_read(
        &mut self,
        conn: &mut Connection,
        stream_id: u16,
        resume: bool,
        offset: u64,
        length: u64,
        checksum: u32,
        path: String,
    ) {
        if conn.streams.contains_key(&stream_id) {
            conn.queue_frame(
                Frame::Error {
                    stream_id,
                    message: "stream id already exists".to_string(),
                },
                None,
            );
            return;
        }

        let Some(full_path) = self.resolve_path(&path) else {
            conn.queue_frame(
                Frame::Error {
                    stream_id,
                    message: "invalid path".to_string(),
                },
                None,
            );
            return;
        };
        if !full_path.is_file() {
            conn.queue_frame(
                Frame::Error {
                    stream_id,
                    message: "file not found".to_string(),
                },
                None,
            );
            return;
        }

        let mut stream = match Stream::open_for_send(stream_id, &full_path) {
            Ok(s) => s,
            Err(e) => {
                log::error!("failed to open {} for reading: {e}", full_path.display());
                conn.queue_frame(
                    Frame::Error {
                        stream_id,
                        message: "file not found".to_string(),
                    },
                    None,
                );
                return;
            }
        };
        let file_size = match stream.file_size() {
            Ok(n) => n,
            Err(_) => {
                conn.queue_frame(
                    Frame::Error {
                        stream_id,
                        message: "file not found".to_string(),
                    },
                    None,
                );
                return;
            }
        };
        let length = if length == 0 {
            file_size.saturating_sub(offset)
        } else {
            length
        };
        if offset + length > file_size {
            conn.queue_frame(
                Frame::Error {
                    stream_id,
                    message: "offset+length greater than file size".to_string(),
                },
                None,
            );
            return;
        }

        if resume {
            let local_checksum = match stream.crc32_prefix(offset) {
                Ok(c) => c,
                Err(_) => 0,
            };
            if local_checksum != checksum {
                conn.queue_frame(
                    Frame::Error {
                        stream_id,
                        message: "checksum mismatch".to_string(),
                    },
                    None,
                );
                return;
            }
        }

        stream.next_offset = offset;
        conn.streams.insert(stream_id, stream);
        conn.queue_frame(
            Frame::Answer {
                stream_id,
                payload: Bytes::copy_from_slice(&file_size.to_le_bytes()),
            },
            None,
        );
        self.schedule_data(conn, stream_id, offset, length);
    }

    fn schedule_data(&mut self, conn: &mut Connection, stream_id: u16, offset: u64, length: u64) {
        let mut pos = offset;
        let mut remaining = length;
        while remaining > 0 {
            let want = remaining.min(DATA_CHUNK_SIZE) as usize;
            let Some(stream) = conn.streams.get_mut(&stream_id) else {
                return;
            };
            let data = match stream.read_at(pos, want) {
                Ok(d) => d,
                Err(e) => {
                    log::error!("read error streaming stream {stream_id}: {e}");
                    break;
                }
            };
            if data.is_empty() {
                break;
            }
            let n = data.len() as u64;
            conn.queue_frame(
                Frame::Data {
                    stream_id,
                    offset: pos,
                    payload: Bytes::from(data),
                },
                None,
            );
            pos += n;
            remaining -= n;
        }
    }

    fn handle_checksum(&mut self, conn: &mut Connection, stream_id: u16, path: String) {
        let Some(full_path) = self.resolve_path(&path) else {
            conn.queue_frame(
                Frame::Error {
                    stream_id,
                    message: "invalid path".to_string(),
                },
                None,
            );
            return;
        };
        let Ok(mut stream) = Stream::open_for_send(stream_id, &full_path) else {
            conn.queue_frame(
                Frame::Error {
                    stream_id,
                    message: "file not found".to_string(),
                },
                None,
            );
            return;
        };
        let len = stream.file_size().unwrap_or(0);
        match stream.crc32_prefix(len) {
            Ok(checksum) => conn.queue_frame(
                Frame::Answer {
                    stream_id,
                    payload: Bytes::copy_from_slice(&checksum.to_le_bytes()),
                },
                None,
            ),
            Err(_) => conn.queue_frame(
                Frame::Error {
                    stream_id,
                    message: "file not found".to_string(),
                },
                None,
            ),
        }
    }
}

impl Role for ServerRole {
    fn handle_frame(&mut self, conn: &mut Connection, frame: Frame) {
        match frame {
            Frame::Read {
                stream_id,
                resume,
                offset,
                length,
                checksum,
                path,
            } => self.handle_read(conn, stream_id, resume, offset, length, checksum, path),
            Frame::Checksum { stream_id, path } => self.handle_checksum(conn, stream_id, path),
            Frame::Write { stream_id, .. }
            | Frame::Stat { stream_id, .. }
            | Frame::List { stream_id, .. } => conn.queue_frame(
                Frame::Error {
                    stream_id,
                    message: "not implemented yet".to_string(),
                },
                None,
            ),
            Frame::Data { stream_id, .. } => {
                if !conn.streams.contains_key(&stream_id) {
                    conn.queue_frame(
                        Frame::Error {
                            stream_id,
                            message: "stream id does not exist".to_string(),
                        },
                        None,
                    );
                }
            }
            Frame::Answer { stream_id, .. } | Frame::Error { stream_id, .. } => {
                log::debug!("server ignoring unexpected frame on stream {stream_id}");
            }
            Frame::FlowControl { .. } | Frame::ConnIdChange { .. } | Frame::Ack { .. } | Frame::Exit => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Packet;
    use crate::config::Config;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::time::Instant;
    use tempfile::tempdir;

    fn addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9000)
    }

    #[test]
    fn fresh_read_answers_with_size_then_streams_data() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("f.bin"), b"hello world").unwrap();
        let now = Instant::now();
        let mut conn = Connection::new_server(
            1,
            addr(),
            now,
            &Config::default(),
            Box::new(ServerRole::new(dir.path().to_path_buf())),
        );
        let read = Packet::new(
            1,
            1,
            vec![Frame::Read {
                stream_id: 0,
                resume: false,
                offset: 0,
                length: 0,
                checksum: 0,
                path: "f.bin".to_string(),
            }],
        );
        conn.update(read, addr(), now);
        let out = conn.flush(now);
        let packet = Packet::parse(&out[0]).unwrap();
        assert!(packet
            .frames
            .iter()
            .any(|f| matches!(f, Frame::Answer { .. })));
        assert!(packet.frames.iter().any(|f| matches!(f, Frame::Data { .. })));
    }

    #[test]
    fn missing_file_yields_error() {
        let dir = tempdir().unwrap();
        let now = Instant::now();
        let mut conn = Connection::new_server(
            1,
            addr(),
            now,
            &Config::default(),
            Box::new(ServerRole::new(dir.path().to_path_buf())),
        );
        let read = Packet::new(
            1,
            1,
            vec![Frame::Read {
                stream_id: 0,
                resume: false,
                offset: 0,
                length: 0,
                checksum: 0,
                path: "missing.bin".to_string(),
            }],
        );
        conn.update(read, addr(), now);
        let out = conn.flush(now);
        let packet = Packet::parse(&out[0]).unwrap();
        assert!(packet.frames.contains(&Frame::Error {
            stream_id: 0,
            message: "file not found".to_string()
        }));
    }

    #[test]
    fn resume_checksum_mismatch_is_rejected() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("f.bin"), b"0123456789abcdef").unwrap();
        let now = Instant::now();
        let mut conn = Connection::new_server(
            1,
            addr(),
            now,
            &Config::default(),
            Box::new(ServerRole::new(dir.path().to_path_buf())),
        );
        let read = Packet::new(
            1,
            1,
            vec![Frame::Read {
                stream_id: 0,
                resume: true,
                offset: 8,
                length: 0,
                checksum: 0xdead_beef,
                path: "f.bin".to_string(),
            }],
        );
        conn.update(read, addr(), now);
        let out = conn.flush(now);
        let packet = Packet::parse(&out[0]).unwrap();
        assert!(packet.frames.contains(&Frame::Error {
            stream_id: 0,
            message: "checksum mismatch".to_string()
        }));
        assert!(!conn.streams.contains_key(&0));
    }

    #[test]
    fn path_escaping_root_is_rejected() {
        let dir = tempdir().unwrap();
        let secret_dir = tempdir().unwrap();
        std::fs::write(secret_dir.path().join("secret.bin"), b"top secret").unwrap();
        let now = Instant::now();
        let mut conn = Connection::new_server(
            1,
            addr(),
            now,
            &Config::default(),
            Box::new(ServerRole::new(dir.path().to_path_buf())),
        );
        let escaping_path = format!(
            "../{}/secret.bin",
            secret_dir.path().file_name().unwrap().to_str().unwrap()
        );
        let read = Packet::new(
            1,
            1,
            vec![Frame::Read {
                stream_id: 0,
                resume: false,
                offset: 0,
                length: 0,
                checksum: 0,
                path: escaping_path,
            }],
        );
        conn.update(read, addr(), now);
        let out = conn.flush(now);
        let packet = Packet::parse(&out[0]).unwrap();
        assert!(packet.frames.contains(&Frame::Error {
            stream_id: 0,
            message: "invalid path".to_string()
        }));
        assert!(!conn.streams.contains_key(&0));
    }

    #[test]
    fn absolute_path_is_rejected() {
        let dir = tempdir().unwrap();
        let now = Instant::now();
        let mut conn = Connection::new_server(
            1,
            addr(),
            now,
            &Config::default(),
            Box::new(ServerRole::new(dir.path().to_path_buf())),
        );
        let read = Packet::new(
            1,
            1,
            vec![Frame::Read {
                stream_id: 0,
                resume: false,
                offset: 0,
                length: 0,
                checksum: 0,
                path: "/etc/passwd".to_string(),
            }],
        );
        conn.update(read, addr(), now);
        let out = conn.flush(now);
        let packet = Packet::parse(&out[0]).unwrap();
        assert!(packet.frames.contains(&Frame::Error {
            stream_id: 0,
            message: "invalid path".to_string()
        }));
    }
}
