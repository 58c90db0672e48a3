//! Per-file transfer state within a connection.
//!
//! Simplified relative to the teacher's `webrtc_sctp::stream` (no message
//! fragmentation/reassembly — RFT streams are a single file transferred as
//! an ordered sequence of `Data` frames) but grounded in the same
//! open/close/lifecycle shape.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::error::Result;

/// Which direction of the transfer this endpoint is performing for the
/// stream: `Send` means this endpoint reads the file and emits `Data`
/// frames; `Receive` means it writes inbound `Data` frames to disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Send,
    Receive,
}

#[derive(Debug)]
pub struct Stream {
    pub stream_id: u16,
    pub path: PathBuf,
    file: File,
    pub direction: Direction,
    pub next_offset: u64,
    pub closed: bool,
}

impl Stream {
    /// Opens an existing file for reading (the sending side of a transfer).
    pub fn open_for_send(stream_id: u16, path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).append(true).open(&path)?;
        Ok(Stream {
            stream_id,
            path,
            file,
            direction: Direction::Send,
            next_offset: 0,
            closed: false,
        })
    }

    /// Opens (creating if needed) a file for writing (the receiving side).
    /// `resume_from` seeks past already-received bytes without truncating.
    pub fn open_for_receive(
        stream_id: u16,
        path: impl AsRef<Path>,
        resume_from: u64,
    ) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;
        Ok(Stream {
            stream_id,
            path,
            file,
            direction: Direction::Receive,
            next_offset: resume_from,
            closed: false,
        })
    }

    pub fn file_size(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// Appends bytes to the receiving file and advances the cursor. The
    /// caller (the role's `handle_frame`) is responsible for checking that
    /// `offset` matches `next_offset` before calling this — stream-level
    /// reordering is not handled here, it's filtered at the packet level.
    pub fn write_at(&mut self, offset: u64, data: &[u8]) -> Result<()> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.write_all(data)?;
        self.next_offset = offset + data.len() as u64;
        Ok(())
    }

    /// Reads up to `max_len` bytes starting at `offset`, for packaging into
    /// a `Data` frame on the sending side.
    pub fn read_at(&mut self, offset: u64, max_len: usize) -> Result<Vec<u8>> {
        self.file.seek(SeekFrom::Start(offset))?;
        let mut buf = vec![0u8; max_len];
        let n = self.file.read(&mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }

    /// SHA-256 over the whole file, used by the receiver to validate after
    /// a `Checksum` frame round trip.
    pub fn sha256(&mut self) -> Result<[u8; 32]> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut hasher = Sha256::new();
        std::io::copy(&mut self.file, &mut hasher)?;
        Ok(hasher.finalize().into())
    }

    /// CRC-32 over `path[0..len]`, used only for resume negotiation.
    pub fn crc32_prefix(&mut self, len: u64) -> Result<u32> {
        self.file.seek(SeekFrom::Start(0))?;
        let mut remaining = len;
        let mut buf = [0u8; 8192];
        let mut digest = crate::util::CRC32.digest();
        while remaining > 0 {
            let want = remaining.min(buf.len() as u64) as usize;
            let n = self.file.read(&mut buf[..want])?;
            if n == 0 {
                break;
            }
            digest.update(&buf[..n]);
            remaining -= n as u64;
        }
        Ok(digest.finalize())
    }

    /// Flushes, closes, and deletes the backing file if it ended up empty.
    pub fn close(mut self) -> Result<()> {
        self.file.flush()?;
        self.closed = true;
        if self.file_size()? == 0 {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn receive_then_read_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.bin");
        let mut s = Stream::open_for_receive(1, &path, 0).unwrap();
        s.write_at(0, b"hello").unwrap();
        s.write_at(5, b" world").unwrap();
        assert_eq!(s.next_offset, 11);
        assert_eq!(s.file_size().unwrap(), 11);
    }

    #[test]
    fn empty_file_deleted_on_close() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.bin");
        let s = Stream::open_for_receive(1, &path, 0).unwrap();
        s.close().unwrap();
        assert!(!path.exists());
    }

    #[test]
    fn nonempty_file_kept_on_close() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nonempty.bin");
        let mut s = Stream::open_for_receive(1, &path, 0).unwrap();
        s.write_at(0, b"x").unwrap();
        s.close().unwrap();
        assert!(path.exists());
    }

    #[test]
    fn crc32_prefix_matches_known_vector() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vec.bin");
        std::fs::write(&path, b"123456789").unwrap();
        let mut s = Stream::open_for_send(1, &path).unwrap();
        assert_eq!(s.crc32_prefix(9).unwrap(), 0xCBF4_3926);
    }
}
