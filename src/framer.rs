//! TCP stream framer (spec §4.5): demultiplexes the SoftEther byte stream
//! into whole Ethernet frames, buffering partials across `feed` calls.

use bytes::{Buf, BytesMut};

const KEEP_ALIVE_MAGIC: u32 = 0xFFFF_FFFF;

/// A decoded unit from the stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A whole Ethernet-layer payload ready for classification.
    Data(Vec<u8>),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum FramerError {
    #[error("zero-length frame in data batch")]
    ZeroLengthFrame,
}

use thiserror::Error;

/// Incremental state machine over a shape-tagged byte stream.
#[derive(Debug, Default)]
pub struct StreamFramer {
    buf: BytesMut,
}

#[derive(Debug, Clone, Copy)]
enum Shape {
    Unknown,
    KeepAlive { remaining: u32 },
    DataBatch { remaining_in_batch: u32 },
}

impl StreamFramer {
    pub fn new() -> Self {
        Self { buf: BytesMut::new() }
    }

    /// Feed newly-received bytes; returns every whole frame that became
    /// available, in order. Partial data is retained internally.
    pub fn feed(&mut self, data: &[u8]) -> Result<Vec<Frame>, FramerError> {
        self.buf.extend_from_slice(data);
        let mut frames = Vec::new();

        loop {
            // Each top-level unit begins with a u32 discriminant: either the
            // keep-alive magic or a data-batch item count.
            if self.buf.len() < 4 {
                break;
            }
            let discriminant = u32::from_be_bytes(self.buf[0..4].try_into().unwrap());

            if discriminant == KEEP_ALIVE_MAGIC {
                if self.buf.len() < 8 {
                    break;
                }
                let size = u32::from_be_bytes(self.buf[4..8].try_into().unwrap());
                let total = 8 + size as usize;
                if self.buf.len() < total {
                    break;
                }
                self.buf.advance(total);
                continue;
            }

            // Data batch: discriminant is the item count.
            let count = discriminant;
            if !self.try_consume_batch(count, &mut frames)? {
                break;
            }
        }

        Ok(frames)
    }

    /// Attempt to consume one full data batch (the `u32 count` header plus
    /// `count` length-prefixed frames). Returns `Ok(false)` if the buffer
    /// doesn't yet hold the whole batch, leaving `self.buf` untouched.
    fn try_consume_batch(&mut self, count: u32, frames: &mut Vec<Frame>) -> Result<bool, FramerError> {
        let mut offset = 4usize; // past the count header
        let mut lengths = Vec::with_capacity(count as usize);

        for _ in 0..count {
            if self.buf.len() < offset + 4 {
                return Ok(false);
            }
            let len = u32::from_be_bytes(self.buf[offset..offset + 4].try_into().unwrap());
            if len == 0 {
                return Err(FramerError::ZeroLengthFrame);
            }
            offset += 4;
            if self.buf.len() < offset + len as usize {
                return Ok(false);
            }
            lengths.push((offset, len as usize));
            offset += len as usize;
        }

        for (start, len) in lengths {
            frames.push(Frame::Data(self.buf[start..start + len].to_vec()));
        }
        self.buf.advance(offset);
        Ok(true)
    }

    /// Wrap a single Ethernet frame as a one-item data batch for sending.
    pub fn encode_single(payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + payload.len());
        out.extend_from_slice(&1u32.to_be_bytes());
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(payload);
        out
    }

    /// Build a TCP keep-alive unit (spec §4.11): magic + random payload.
    pub fn encode_keep_alive(random_payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::with_capacity(8 + random_payload.len());
        out.extend_from_slice(&KEEP_ALIVE_MAGIC.to_be_bytes());
        out.extend_from_slice(&(random_payload.len() as u32).to_be_bytes());
        out.extend_from_slice(random_payload);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(frames: &[&[u8]]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&(frames.len() as u32).to_be_bytes());
        for frame in frames {
            out.extend_from_slice(&(frame.len() as u32).to_be_bytes());
            out.extend_from_slice(frame);
        }
        out
    }

    #[test]
    fn decodes_a_single_whole_batch() {
        let mut framer = StreamFramer::new();
        let wire = batch(&[b"hello", b"world"]);
        let frames = framer.feed(&wire).unwrap();
        assert_eq!(
            frames,
            vec![Frame::Data(b"hello".to_vec()), Frame::Data(b"world".to_vec())]
        );
    }

    #[test]
    fn keep_alive_is_consumed_and_dropped() {
        let mut framer = StreamFramer::new();
        let ka = StreamFramer::encode_keep_alive(&[1, 2, 3]);
        let frames = framer.feed(&ka).unwrap();
        assert!(frames.is_empty());
    }

    #[test]
    fn rejects_zero_length_frame() {
        let mut framer = StreamFramer::new();
        let mut wire = Vec::new();
        wire.extend_from_slice(&1u32.to_be_bytes());
        wire.extend_from_slice(&0u32.to_be_bytes());
        assert_eq!(framer.feed(&wire), Err(FramerError::ZeroLengthFrame));
    }

    /// S6: feeding one byte at a time must still yield the exact sequence of
    /// frames, with keep-alives dropped and nothing duplicated or merged.
    #[test]
    fn byte_at_a_time_feed_yields_exact_frame_sequence() {
        let mut wire = Vec::new();
        wire.extend_from_slice(&batch(&[b"aaa"]));
        wire.extend_from_slice(&StreamFramer::encode_keep_alive(&[9, 9]));
        wire.extend_from_slice(&batch(&[b"bb", b"c"]));

        let mut framer = StreamFramer::new();
        let mut all_frames = Vec::new();
        for byte in &wire {
            all_frames.extend(framer.feed(std::slice::from_ref(byte)).unwrap());
        }

        assert_eq!(
            all_frames,
            vec![
                Frame::Data(b"aaa".to_vec()),
                Frame::Data(b"bb".to_vec()),
                Frame::Data(b"c".to_vec()),
            ]
        );
    }

    #[test]
    fn partial_batch_header_is_buffered_across_feeds() {
        let mut framer = StreamFramer::new();
        let wire = batch(&[b"xyz"]);
        assert!(framer.feed(&wire[..2]).unwrap().is_empty());
        assert!(framer.feed(&wire[2..6]).unwrap().is_empty());
        let frames = framer.feed(&wire[6..]).unwrap();
        assert_eq!(frames, vec![Frame::Data(b"xyz".to_vec())]);
    }

    #[test]
    fn encode_single_round_trips_through_feed() {
        let mut framer = StreamFramer::new();
        let wire = StreamFramer::encode_single(b"payload");
        let frames = framer.feed(&wire).unwrap();
        assert_eq!(frames, vec![Frame::Data(b"payload".to_vec())]);
    }
}
