//! The twelve frame variants multiplexed onto a connection's packets.
//!
//! Modeled as a closed tagged union (a Rust `enum`) rather than the
//! inheritance hierarchy of one-struct-per-chunk-type a naive port would
//! produce: parsing dispatches on the leading type byte, and each arm knows
//! its own wire length. See `Frame::decode`/`Frame::encode`.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::error::{Error, Result};

pub(crate) const TYPE_ACK: u8 = 0;
pub(crate) const TYPE_EXIT: u8 = 1;
pub(crate) const TYPE_CONN_ID_CHANGE: u8 = 2;
pub(crate) const TYPE_FLOW_CONTROL: u8 = 3;
pub(crate) const TYPE_ANSWER: u8 = 4;
pub(crate) const TYPE_ERROR: u8 = 5;
pub(crate) const TYPE_DATA: u8 = 6;
pub(crate) const TYPE_READ: u8 = 7;
pub(crate) const TYPE_WRITE: u8 = 8;
pub(crate) const TYPE_CHECKSUM: u8 = 9;
pub(crate) const TYPE_STAT: u8 = 10;
pub(crate) const TYPE_LIST: u8 = 11;

/// Bit 0 of a `Read` frame's flags byte: this is a resume request.
pub(crate) const READ_FLAG_RESUME: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Ack {
        packet_id: u32,
    },
    Exit,
    ConnIdChange {
        old: u32,
        new: u32,
    },
    FlowControl {
        window: u32,
    },
    Answer {
        stream_id: u16,
        payload: Bytes,
    },
    Error {
        stream_id: u16,
        message: String,
    },
    Data {
        stream_id: u16,
        offset: u64,
        payload: Bytes,
    },
    Read {
        stream_id: u16,
        resume: bool,
        offset: u64,
        length: u64,
        checksum: u32,
        path: String,
    },
    Write {
        stream_id: u16,
        offset: u64,
        length: u64,
        path: String,
    },
    Checksum {
        stream_id: u16,
        path: String,
    },
    Stat {
        stream_id: u16,
        path: String,
    },
    List {
        stream_id: u16,
        path: String,
    },
}

impl Frame {
    pub(crate) fn type_tag(&self) -> u8 {
        match self {
            Frame::Ack { .. } => TYPE_ACK,
            Frame::Exit => TYPE_EXIT,
            Frame::ConnIdChange { .. } => TYPE_CONN_ID_CHANGE,
            Frame::FlowControl { .. } => TYPE_FLOW_CONTROL,
            Frame::Answer { .. } => TYPE_ANSWER,
            Frame::Error { .. } => TYPE_ERROR,
            Frame::Data { .. } => TYPE_DATA,
            Frame::Read { .. } => TYPE_READ,
            Frame::Write { .. } => TYPE_WRITE,
            Frame::Checksum { .. } => TYPE_CHECKSUM,
            Frame::Stat { .. } => TYPE_STAT,
            Frame::List { .. } => TYPE_LIST,
        }
    }

    /// A packet is ack-eliciting iff it carries at least one frame for which
    /// this returns `true` — everything except `Ack` and `Exit`.
    pub(crate) fn is_ack_eliciting(&self) -> bool {
        !matches!(self, Frame::Ack { .. } | Frame::Exit)
    }

    /// Default head/tail scheduling hint used when `Connection::queue_frame`
    /// is called without an explicit `transmit_first` override.
    pub(crate) fn schedule_at_head_by_default(&self) -> bool {
        matches!(self, Frame::Data { .. } | Frame::Read { .. })
    }

    pub(crate) fn serialized_len(&self) -> usize {
        match self {
            Frame::Ack { .. } => 5,
            Frame::Exit => 1,
            Frame::ConnIdChange { .. } => 9,
            Frame::FlowControl { .. } => 5,
            Frame::Answer { payload, .. } => 5 + payload.len(),
            Frame::Error { message, .. } => 5 + message.len(),
            Frame::Data { payload, .. } => 11 + payload.len(),
            Frame::Read { path, .. } => 22 + path.len(),
            Frame::Write { path, .. } => 17 + path.len(),
            Frame::Checksum { path, .. } => 5 + path.len(),
            Frame::Stat { path, .. } => 5 + path.len(),
            Frame::List { path, .. } => 5 + path.len(),
        }
    }

    pub(crate) fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.type_tag());
        match self {
            Frame::Ack { packet_id } => {
                buf.put_u32_le(*packet_id);
            }
            Frame::Exit => {}
            Frame::ConnIdChange { old, new } => {
                buf.put_u32_le(*old);
                buf.put_u32_le(*new);
            }
            Frame::FlowControl { window } => {
                buf.put_u32_le(*window);
            }
            Frame::Answer { stream_id, payload } => {
                buf.put_u16_le(*stream_id);
                buf.put_u16_le(payload.len() as u16);
                buf.extend_from_slice(payload);
            }
            Frame::Error { stream_id, message } => {
                buf.put_u16_le(*stream_id);
                buf.put_u16_le(message.len() as u16);
                buf.extend_from_slice(message.as_bytes());
            }
            Frame::Data {
                stream_id,
                offset,
                payload,
            } => {
                buf.put_u16_le(*stream_id);
                buf.put_uint_le(*offset, 6);
                buf.put_u16_le(payload.len() as u16);
                buf.extend_from_slice(payload);
            }
            Frame::Read {
                stream_id,
                resume,
                offset,
                length,
                checksum,
                path,
            } => {
                buf.put_u16_le(*stream_id);
                buf.put_u8(if *resume { READ_FLAG_RESUME } else { 0 });
                buf.put_uint_le(*offset, 6);
                buf.put_uint_le(*length, 6);
                buf.put_u32_le(*checksum);
                buf.put_u16_le(path.len() as u16);
                buf.extend_from_slice(path.as_bytes());
            }
            Frame::Write {
                stream_id,
                offset,
                length,
                path,
            } => {
                buf.put_u16_le(*stream_id);
                buf.put_uint_le(*offset, 6);
                buf.put_uint_le(*length, 6);
                buf.put_u16_le(path.len() as u16);
                buf.extend_from_slice(path.as_bytes());
            }
            Frame::Checksum { stream_id, path }
            | Frame::Stat { stream_id, path }
            | Frame::List { stream_id, path } => {
                buf.put_u16_le(*stream_id);
                buf.put_u16_le(path.len() as u16);
                buf.extend_from_slice(path.as_bytes());
            }
        }
    }

    /// Decodes one frame from the front of `raw`. Returns the frame and the
    /// number of bytes consumed, so the caller can advance past it and keep
    /// peeking the next type tag.
    pub(crate) fn decode(raw: &[u8]) -> Result<(Frame, usize)> {
        if raw.is_empty() {
            return Err(Error::FrameHeaderTruncated);
        }
        let tag = raw[0];
        let mut r = &raw[1..];
        let frame = match tag {
            TYPE_ACK => {
                need(r.len(), 4)?;
                Frame::Ack {
                    packet_id: r.get_u32_le(),
                }
            }
            TYPE_EXIT => Frame::Exit,
            TYPE_CONN_ID_CHANGE => {
                need(r.len(), 8)?;
                let old = r.get_u32_le();
                let new = r.get_u32_le();
                Frame::ConnIdChange { old, new }
            }
            TYPE_FLOW_CONTROL => {
                need(r.len(), 4)?;
                Frame::FlowControl {
                    window: r.get_u32_le(),
                }
            }
            TYPE_ANSWER => {
                let (stream_id, payload_length) = read_sid_len(&mut r)?;
                let payload = take_bytes(r, payload_length)?;
                Frame::Answer {
                    stream_id,
                    payload: Bytes::copy_from_slice(payload),
                }
            }
            TYPE_ERROR => {
                let (stream_id, payload_length) = read_sid_len(&mut r)?;
                let payload = take_bytes(r, payload_length)?;
                Frame::Error {
                    stream_id,
                    message: to_utf8(payload)?,
                }
            }
            TYPE_DATA => {
                need(r.len(), 8)?;
                let stream_id = r.get_u16_le();
                let offset = r.get_uint_le(6);
                let payload_length = r.get_u16_le() as usize;
                let payload = take_bytes(r, payload_length)?;
                Frame::Data {
                    stream_id,
                    offset,
                    payload: Bytes::copy_from_slice(payload),
                }
            }
            TYPE_READ => {
                need(r.len(), 21)?;
                let stream_id = r.get_u16_le();
                let flags = r.get_u8();
                let offset = r.get_uint_le(6);
                let length = r.get_uint_le(6);
                let checksum = r.get_u32_le();
                let payload_length = r.get_u16_le() as usize;
                let path = take_bytes(r, payload_length)?;
                Frame::Read {
                    stream_id,
                    resume: flags & READ_FLAG_RESUME != 0,
                    offset,
                    length,
                    checksum,
                    path: to_utf8(path)?,
                }
            }
            TYPE_WRITE => {
                need(r.len(), 16)?;
                let stream_id = r.get_u16_le();
                let offset = r.get_uint_le(6);
                let length = r.get_uint_le(6);
                let payload_length = r.get_u16_le() as usize;
                let path = take_bytes(r, payload_length)?;
                Frame::Write {
                    stream_id,
                    offset,
                    length,
                    path: to_utf8(path)?,
                }
            }
            TYPE_CHECKSUM => {
                let (stream_id, payload_length) = read_sid_len(&mut r)?;
                let path = take_bytes(r, payload_length)?;
                Frame::Checksum {
                    stream_id,
                    path: to_utf8(path)?,
                }
            }
            TYPE_STAT => {
                let (stream_id, payload_length) = read_sid_len(&mut r)?;
                let path = take_bytes(r, payload_length)?;
                Frame::Stat {
                    stream_id,
                    path: to_utf8(path)?,
                }
            }
            TYPE_LIST => {
                let (stream_id, payload_length) = read_sid_len(&mut r)?;
                let path = take_bytes(r, payload_length)?;
                Frame::List {
                    stream_id,
                    path: to_utf8(path)?,
                }
            }
            other => return Err(Error::UnknownFrameType(other)),
        };
        let consumed = frame.serialized_len();
        if consumed > raw.len() {
            return Err(Error::PayloadLengthMismatch);
        }
        Ok((frame, consumed))
    }
}

fn need(have: usize, want: usize) -> Result<()> {
    if have < want {
        Err(Error::FrameHeaderTruncated)
    } else {
        Ok(())
    }
}

fn read_sid_len(r: &mut &[u8]) -> Result<(u16, usize)> {
    need(r.len(), 4)?;
    let stream_id = r.get_u16_le();
    let payload_length = r.get_u16_le() as usize;
    Ok((stream_id, payload_length))
}

fn take_bytes<'a>(r: &'a [u8], len: usize) -> Result<&'a [u8]> {
    if r.len() < len {
        return Err(Error::PayloadLengthMismatch);
    }
    Ok(&r[..len])
}

fn to_utf8(b: &[u8]) -> Result<String> {
    std::str::from_utf8(b)
        .map(|s| s.to_string())
        .map_err(|_| Error::InvalidUtf8)
}
