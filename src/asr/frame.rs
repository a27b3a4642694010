// Binary frame codec for the streaming recognition channel.
//
// Wire layout (big-endian):
//   [0] version:4 | header words:4
//   [1] message type:4 | flags:4
//   [2] serialization:4 | compression:4
//   [3] reserved
//   [4..8]  sequence (only when the sequence flag is set)
//   next 4  payload length
//   payload (gzip-compressed when compression != none)

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use std::io::{Read, Write};

use crate::error::FrameError;

pub const PROTOCOL_VERSION: u8 = 0x1;
/// Header length in 32-bit words.
pub const HEADER_WORDS: u8 = 0x1;
const HEADER_LEN: usize = 4;

/// Flag bit: an explicit sequence number follows the header.
pub const FLAG_SEQUENCE: u8 = 0b0001;
/// Flag bit: this is the last packet of the stream.
pub const FLAG_LAST: u8 = 0b0010;

/// Message type nibble
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageType {
    FullClientRequest,
    AudioOnlyRequest,
    FullServiceResponse,
    Error,
}

impl MessageType {
    pub fn nibble(self) -> u8 {
        match self {
            MessageType::FullClientRequest => 0x1,
            MessageType::AudioOnlyRequest => 0x2,
            MessageType::FullServiceResponse => 0x9,
            MessageType::Error => 0xF,
        }
    }

    pub fn from_nibble(value: u8) -> Result<Self, FrameError> {
        match value {
            0x1 => Ok(MessageType::FullClientRequest),
            0x2 => Ok(MessageType::AudioOnlyRequest),
            0x9 => Ok(MessageType::FullServiceResponse),
            0xF => Ok(MessageType::Error),
            other => Err(FrameError::UnknownMessageType(other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Serialization {
    None,
    Json,
}

impl Serialization {
    fn nibble(self) -> u8 {
        match self {
            Serialization::None => 0x0,
            Serialization::Json => 0x1,
        }
    }

    fn from_nibble(value: u8) -> Self {
        if value == 0x1 {
            Serialization::Json
        } else {
            Serialization::None
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    None,
    Gzip,
}

impl Compression {
    fn nibble(self) -> u8 {
        match self {
            Compression::None => 0x0,
            Compression::Gzip => 0x1,
        }
    }

    fn from_nibble(value: u8) -> Self {
        if value == 0x1 {
            Compression::Gzip
        } else {
            Compression::None
        }
    }
}

/// One message on the duplex recognition channel.
///
/// `sequence` is `Some` exactly when the sequence flag is set on the wire.
/// The payload is always held uncompressed; compression only applies to the
/// encoded bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub message_type: MessageType,
    pub serialization: Serialization,
    pub compression: Compression,
    pub sequence: Option<i32>,
    pub last: bool,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Configuration frame carrying a JSON document, no sequence field.
    pub fn full_client_request(json: Vec<u8>, compression: Compression) -> Self {
        Self {
            message_type: MessageType::FullClientRequest,
            serialization: Serialization::Json,
            compression,
            sequence: None,
            last: false,
            payload: json,
        }
    }

    /// Raw PCM chunk with an explicit sequence number.
    pub fn audio_only(sequence: i32, pcm: &[u8]) -> Self {
        Self {
            message_type: MessageType::AudioOnlyRequest,
            serialization: Serialization::None,
            compression: Compression::None,
            sequence: Some(sequence),
            last: false,
            payload: pcm.to_vec(),
        }
    }

    /// Mark this frame as the final one of the stream.
    pub fn into_last(mut self) -> Self {
        self.last = true;
        self
    }

    fn flags(&self) -> u8 {
        let mut flags = 0;
        if self.sequence.is_some() {
            flags |= FLAG_SEQUENCE;
        }
        if self.last {
            flags |= FLAG_LAST;
        }
        flags
    }

    /// Serialize to wire bytes, compressing the payload if requested.
    pub fn encode(&self) -> Result<Vec<u8>, FrameError> {
        let payload = match self.compression {
            Compression::None => self.payload.clone(),
            Compression::Gzip => gzip(&self.payload)?,
        };

        let mut buf = Vec::with_capacity(HEADER_LEN + 8 + payload.len());
        buf.push((PROTOCOL_VERSION << 4) | HEADER_WORDS);
        buf.push((self.message_type.nibble() << 4) | self.flags());
        buf.push((self.serialization.nibble() << 4) | self.compression.nibble());
        buf.push(0x0);

        if let Some(sequence) = self.sequence {
            buf.extend_from_slice(&sequence.to_be_bytes());
        }

        buf.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Parse wire bytes. The presence of the sequence field is taken from the
    /// header flags.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < HEADER_LEN {
            return Err(FrameError::TooShort {
                len: bytes.len(),
                needed: HEADER_LEN + 4,
            });
        }

        let header_len = usize::from(bytes[0] & 0x0F).max(1) * 4;
        let message_type = MessageType::from_nibble(bytes[1] >> 4)?;
        let flags = bytes[1] & 0x0F;
        let serialization = Serialization::from_nibble(bytes[2] >> 4);
        let compression = Compression::from_nibble(bytes[2] & 0x0F);

        let has_sequence = flags & FLAG_SEQUENCE != 0;
        let needed = header_len + if has_sequence { 8 } else { 4 };
        if bytes.len() < needed {
            return Err(FrameError::TooShort {
                len: bytes.len(),
                needed,
            });
        }

        let mut offset = header_len;
        let sequence = if has_sequence {
            let value = read_i32(bytes, offset);
            offset += 4;
            Some(value)
        } else {
            None
        };

        let declared = read_u32(bytes, offset) as usize;
        offset += 4;
        let body = &bytes[offset..];
        if body.len() != declared {
            return Err(FrameError::LengthMismatch {
                declared,
                actual: body.len(),
            });
        }

        let payload = match compression {
            Compression::None => body.to_vec(),
            Compression::Gzip => gunzip(body)?,
        };

        Ok(Self {
            message_type,
            serialization,
            compression,
            sequence,
            last: flags & FLAG_LAST != 0,
            payload,
        })
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

fn read_i32(bytes: &[u8], offset: usize) -> i32 {
    read_u32(bytes, offset) as i32
}

fn gzip(data: &[u8]) -> Result<Vec<u8>, FrameError> {
    let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder.write_all(data).map_err(FrameError::Compression)?;
    encoder.finish().map_err(FrameError::Compression)
}

fn gunzip(data: &[u8]) -> Result<Vec<u8>, FrameError> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(FrameError::Decompression)?;
    Ok(out)
}

/// Split PCM into fixed-size chunks paired with strictly increasing sequence
/// numbers starting at `first_sequence`.
pub fn audio_chunks(
    pcm: &[u8],
    chunk_size: usize,
    first_sequence: i32,
) -> impl Iterator<Item = (i32, &[u8])> {
    pcm.chunks(chunk_size.max(1))
        .enumerate()
        .map(move |(i, chunk)| (first_sequence + i as i32, chunk))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_TYPES: [MessageType; 4] = [
        MessageType::FullClientRequest,
        MessageType::AudioOnlyRequest,
        MessageType::FullServiceResponse,
        MessageType::Error,
    ];

    #[test]
    fn round_trips_every_type_flag_and_compression() {
        let payload = br#"{"result":{"text":"hello"}}"#.to_vec();
        for message_type in ALL_TYPES {
            for sequence in [None, Some(1), Some(42), Some(-7)] {
                for compression in [Compression::None, Compression::Gzip] {
                    for last in [false, true] {
                        let frame = Frame {
                            message_type,
                            serialization: Serialization::Json,
                            compression,
                            sequence,
                            last,
                            payload: payload.clone(),
                        };
                        let decoded = Frame::decode(&frame.encode().unwrap()).unwrap();
                        assert_eq!(decoded, frame);
                    }
                }
            }
        }
    }

    #[test]
    fn config_frame_layout() {
        let frame = Frame::full_client_request(b"{}".to_vec(), Compression::None);
        let bytes = frame.encode().unwrap();
        assert_eq!(bytes, vec![0x11, 0x10, 0x10, 0x00, 0, 0, 0, 2, b'{', b'}']);
    }

    #[test]
    fn audio_frame_layout_has_sequence() {
        let bytes = Frame::audio_only(3, &[0xAA, 0xBB]).encode().unwrap();
        assert_eq!(&bytes[..4], &[0x11, 0x21, 0x00, 0x00]);
        assert_eq!(&bytes[4..8], &3i32.to_be_bytes());
        assert_eq!(&bytes[8..12], &2u32.to_be_bytes());
        assert_eq!(&bytes[12..], &[0xAA, 0xBB]);
    }

    #[test]
    fn gzip_only_touches_payload() {
        let json = vec![b'a'; 512];
        let frame = Frame::full_client_request(json.clone(), Compression::Gzip);
        let bytes = frame.encode().unwrap();
        let declared = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as usize;
        assert_eq!(declared, bytes.len() - 8);
        assert!(declared < json.len());
        assert_eq!(Frame::decode(&bytes).unwrap().payload, json);
    }

    #[test]
    fn short_frames_are_rejected() {
        assert!(matches!(
            Frame::decode(&[0x11, 0x91]),
            Err(FrameError::TooShort { .. })
        ));
        // Sequence flag set but only 8 bytes present.
        assert!(matches!(
            Frame::decode(&[0x11, 0x91, 0x10, 0x00, 0, 0, 0, 1]),
            Err(FrameError::TooShort { len: 8, needed: 12 })
        ));
    }

    #[test]
    fn declared_length_must_match() {
        let mut bytes = Frame::audio_only(1, &[1, 2, 3]).encode().unwrap();
        bytes.push(4);
        assert!(matches!(
            Frame::decode(&bytes),
            Err(FrameError::LengthMismatch {
                declared: 3,
                actual: 4
            })
        ));
    }

    #[test]
    fn corrupt_gzip_fails_decompression() {
        let mut bytes = vec![0x11, 0x90, 0x11, 0x00];
        bytes.extend_from_slice(&4u32.to_be_bytes());
        bytes.extend_from_slice(&[0xde, 0xad, 0xbe, 0xef]);
        assert!(matches!(
            Frame::decode(&bytes),
            Err(FrameError::Decompression(_))
        ));
    }

    #[test]
    fn unknown_message_type_is_rejected() {
        let bytes = [0x11, 0x50, 0x00, 0x00, 0, 0, 0, 0];
        assert!(matches!(
            Frame::decode(&bytes),
            Err(FrameError::UnknownMessageType(0x5))
        ));
    }

    #[test]
    fn chunks_cover_payload_without_gaps() {
        let chunk_size = 3200;
        for len in [0usize, 1, 3199, 3200, 3201, 6400, 10_000] {
            let pcm: Vec<u8> = (0..len).map(|i| (i % 251) as u8).collect();
            let chunks: Vec<_> = audio_chunks(&pcm, chunk_size, 1).collect();

            let rebuilt: Vec<u8> = chunks.iter().flat_map(|(_, c)| c.iter().copied()).collect();
            assert_eq!(rebuilt, pcm);

            for (i, (seq, _)) in chunks.iter().enumerate() {
                assert_eq!(*seq, 1 + i as i32);
            }

            if let Some((_, last)) = chunks.last() {
                let expected = if len % chunk_size == 0 {
                    chunk_size
                } else {
                    len % chunk_size
                };
                assert_eq!(last.len(), expected);
            } else {
                assert_eq!(len, 0);
            }
        }
    }
}
