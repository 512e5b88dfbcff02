//! # Datagram Envelope
//!
//! Outer framing of connected-mode RakNet datagrams.
//!
//! A connected datagram starts with a flags byte carrying [`FLAG_VALID`].
//! With [`FLAG_ACK`] or [`FLAG_NAK`] set the rest is a record list of frame
//! set sequence numbers; otherwise it is a frame set:
//!
//! ```text
//! flags u8 | sequence u24le | frame*
//! frame = flags u8 | bit length u16be
//!         | reliable index u24le          (reliable modes)
//!         | sequence index u24le          (sequenced modes)
//!         | order index u24le, channel u8 (ordered and sequenced modes)
//!         | compound size u32be, compound id u16be, fragment index u32be (split)
//!         | payload
//! ```

use crate::core::cursor::{Cursor, Writer};
use crate::error::{ProtocolError, Result};
use crate::protocol::ids::{FLAG_ACK, FLAG_NAK, FLAG_SPLIT, FLAG_VALID};
use crate::protocol::reliability::Reliability;

/// Cap on ids extracted from one ACK/NAK datagram
pub const MAX_ACK_IDS: usize = 4096;

/// Cap on ids expanded from one range record
pub const MAX_ACK_RANGE: u32 = 512;

const RECORD_TYPE_RANGE: u8 = 0;

/// Largest payload a single frame header can describe
pub const MAX_FRAME_PAYLOAD: usize = (u16::MAX as usize) / 8;

/// What the leading byte of a connected-mode datagram announces
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatagramKind {
    /// No valid bit: an offline message
    Offline,
    Ack,
    Nak,
    FrameSet,
}

impl DatagramKind {
    pub fn classify(flags: u8) -> Self {
        if flags & FLAG_VALID == 0 {
            DatagramKind::Offline
        } else if flags & FLAG_ACK != 0 {
            DatagramKind::Ack
        } else if flags & FLAG_NAK != 0 {
            DatagramKind::Nak
        } else {
            DatagramKind::FrameSet
        }
    }
}

/// Read an ACK/NAK record list, cursor positioned after the flags byte.
///
/// Range records are clamped to [`MAX_ACK_RANGE`] ids and the result to
/// [`MAX_ACK_IDS`]; a reversed range contributes nothing.
pub fn read_ack_records(c: &mut Cursor<'_>) -> Result<Vec<u32>> {
    let count = c.read_u16_be()?;
    let mut ids = Vec::new();
    for _ in 0..count {
        if c.is_eof() || ids.len() >= MAX_ACK_IDS {
            break;
        }
        if c.read_u8()? == RECORD_TYPE_RANGE {
            let start = c.read_u24_le()?;
            let end = c.read_u24_le()?.min(start.saturating_add(MAX_ACK_RANGE));
            ids.extend(start..=end);
        } else {
            ids.push(c.read_u24_le()?);
        }
    }
    ids.truncate(MAX_ACK_IDS);
    Ok(ids)
}

/// Split-payload header of one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitInfo {
    pub compound_size: u32,
    pub compound_id: u16,
    pub fragment_index: u32,
}

/// Ordering channel position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrderInfo {
    pub index: u32,
    pub channel: u8,
}

/// Per-frame header. Index fields are present exactly when the
/// reliability mode calls for them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameHeader {
    pub reliability: Reliability,
    pub reliable_index: Option<u32>,
    pub sequence_index: Option<u32>,
    pub order: Option<OrderInfo>,
    pub split: Option<SplitInfo>,
}

impl FrameHeader {
    /// Header with zeroed index fields for `reliability`
    pub fn new(reliability: Reliability) -> Self {
        Self {
            reliability,
            reliable_index: reliability.is_reliable().then_some(0),
            sequence_index: reliability.is_sequenced().then_some(0),
            order: reliability
                .is_ordered()
                .then_some(OrderInfo { index: 0, channel: 0 }),
            split: None,
        }
    }

    pub fn with_split(mut self, split: SplitInfo) -> Self {
        self.split = Some(split);
        self
    }

    /// Decode a header; returns it with the payload byte length
    pub fn decode(c: &mut Cursor<'_>) -> Result<(Self, usize)> {
        let flags = c.read_u8()?;
        let reliability = Reliability::from_flags(flags);
        let bits = c.read_u16_be()?;
        let length = (usize::from(bits) + 7) >> 3;

        let reliable_index = if reliability.is_reliable() {
            Some(c.read_u24_le()?)
        } else {
            None
        };
        let sequence_index = if reliability.is_sequenced() {
            Some(c.read_u24_le()?)
        } else {
            None
        };
        let order = if reliability.is_ordered() {
            Some(OrderInfo {
                index: c.read_u24_le()?,
                channel: c.read_u8()?,
            })
        } else {
            None
        };
        let split = if flags & FLAG_SPLIT != 0 {
            Some(SplitInfo {
                compound_size: c.read_u32_be()?,
                compound_id: c.read_u16_be()?,
                fragment_index: c.read_u32_be()?,
            })
        } else {
            None
        };

        Ok((
            Self {
                reliability,
                reliable_index,
                sequence_index,
                order,
                split,
            },
            length,
        ))
    }

    /// Encode a header announcing `payload_len` bytes
    pub fn encode(&self, w: &mut Writer, payload_len: usize) -> Result<()> {
        if payload_len > MAX_FRAME_PAYLOAD {
            return Err(ProtocolError::ValueOutOfRange(format!(
                "frame payload of {payload_len} bytes exceeds {MAX_FRAME_PAYLOAD}"
            )));
        }
        let split_flag = if self.split.is_some() { FLAG_SPLIT } else { 0 };
        w.write_u8(self.reliability.to_flags() | split_flag);
        w.write_u16_be((payload_len * 8) as u16);

        if self.reliability.is_reliable() {
            w.write_u24_le(self.reliable_index.unwrap_or(0));
        }
        if self.reliability.is_sequenced() {
            w.write_u24_le(self.sequence_index.unwrap_or(0));
        }
        if self.reliability.is_ordered() {
            let order = self.order.unwrap_or(OrderInfo { index: 0, channel: 0 });
            w.write_u24_le(order.index);
            w.write_u8(order.channel);
        }
        if let Some(split) = self.split {
            w.write_u32_be(split.compound_size);
            w.write_u16_be(split.compound_id);
            w.write_u32_be(split.fragment_index);
        }
        Ok(())
    }
}

/// One encapsulated frame borrowed from a datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame<'a> {
    pub header: FrameHeader,
    pub payload: &'a [u8],
}

impl<'a> Frame<'a> {
    pub fn read(c: &mut Cursor<'a>) -> Result<Self> {
        let (header, length) = FrameHeader::decode(c)?;
        let payload = c.read_bytes(length)?;
        Ok(Self { header, payload })
    }

    pub fn write(&self, w: &mut Writer) -> Result<()> {
        self.header.encode(w, self.payload.len())?;
        w.write_bytes(self.payload);
        Ok(())
    }
}

/// Decoded frame set: its sequence number and every frame it carries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSet<'a> {
    pub sequence: u32,
    pub frames: Vec<Frame<'a>>,
}

impl<'a> FrameSet<'a> {
    /// Decode a whole frame set datagram, flags byte included
    pub fn decode(datagram: &'a [u8]) -> Result<Self> {
        let mut c = Cursor::new(datagram);
        let flags = c.read_u8()?;
        if DatagramKind::classify(flags) != DatagramKind::FrameSet {
            return Err(ProtocolError::ValueOutOfRange(format!(
                "datagram flags {flags:#04x} do not announce a frame set"
            )));
        }
        let sequence = c.read_u24_le()?;
        let mut frames = Vec::new();
        while !c.is_eof() && !is_padding(c.peek_bytes(c.remaining())?) {
            frames.push(Frame::read(&mut c)?);
        }
        Ok(Self { sequence, frames })
    }
}

/// Zero bytes left after the last frame are padding, not a frame
pub fn is_padding(rest: &[u8]) -> bool {
    rest.iter().all(|b| *b == 0)
}

/// Build a frame set datagram
pub fn encode_frame_set(sequence: u32, frames: &[Frame<'_>]) -> Result<Vec<u8>> {
    let mut w = Writer::with_capacity(4 + frames.iter().map(|f| f.payload.len() + 20).sum::<usize>());
    w.write_u8(FLAG_VALID);
    w.write_u24_le(sequence);
    for frame in frames {
        frame.write(&mut w)?;
    }
    Ok(w.into_inner())
}

/// Build an ACK (or NAK) datagram listing single ids
pub fn encode_ack(ids: &[u32], nak: bool) -> Result<Vec<u8>> {
    let count = u16::try_from(ids.len())
        .map_err(|_| ProtocolError::ValueOutOfRange(format!("{} ack records", ids.len())))?;
    let mut w = Writer::new();
    w.write_u8(FLAG_VALID | if nak { FLAG_NAK } else { FLAG_ACK });
    w.write_u16_be(count);
    for id in ids {
        w.write_u8(1);
        w.write_u24_le(*id);
    }
    Ok(w.into_inner())
}
