use bytes::{Buf, BufMut, BytesMut};
use serde::{Deserialize, Serialize};
use tokio_util::codec::{Decoder, Encoder};

use crate::core::Error;
use super::message::Envelope;
use super::MAX_FRAME_SIZE;

/// Frames exchanged between a bus client and the broker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frame {
    /// Client wants messages published on `topic`
    Subscribe { topic: String },
    /// A message, in either direction
    Publish { topic: String, payload: Vec<u8> },
}

impl From<Envelope> for Frame {
    fn from(envelope: Envelope) -> Self {
        Frame::Publish {
            topic: envelope.topic,
            payload: envelope.payload.to_vec(),
        }
    }
}

/// Length prefixed bincode codec for broker frames
#[derive(Clone, Default)]
pub struct FrameCodec;

impl FrameCodec {
    /// Creates a new frame codec
    pub fn new() -> Self {
        FrameCodec
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < 4 {
            // Need more data to read frame length
            return Ok(None);
        }

        let mut length_bytes = [0u8; 4];
        length_bytes.copy_from_slice(&src[..4]);
        let length = u32::from_be_bytes(length_bytes) as usize;

        if length > MAX_FRAME_SIZE {
            return Err(Error::protocol(format!(
                "frame of {} bytes exceeds limit of {}",
                length, MAX_FRAME_SIZE
            )));
        }

        if src.len() < 4 + length {
            src.reserve(4 + length - src.len());
            return Ok(None);
        }

        src.advance(4);
        let frame_bytes = src.split_to(length);

        match bincode::deserialize(&frame_bytes) {
            Ok(frame) => Ok(Some(frame)),
            Err(e) => Err(Error::protocol(format!("Failed to deserialize frame: {}", e))),
        }
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, item: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let bytes = bincode::serialize(&item)
            .map_err(|e| Error::serialization(format!("Failed to serialize frame: {}", e)))?;

        if bytes.len() > MAX_FRAME_SIZE {
            return Err(Error::protocol(format!(
                "frame of {} bytes exceeds limit of {}",
                bytes.len(),
                MAX_FRAME_SIZE
            )));
        }

        dst.reserve(4 + bytes.len());
        dst.put_u32(bytes.len() as u32);
        dst.extend_from_slice(&bytes);

        Ok(())
    }
}
