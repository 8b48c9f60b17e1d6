//! Envelope frame codec.
//!
//! Each frame on the wire is:
//! - 4 bytes: payload length (little-endian `u32`, excludes these 4 bytes)
//! - N bytes: protobuf-encoded [`Envelope`]
//!
//! There is no magic number, version byte or checksum. A declared length that
//! runs past the end of the stream is a framing error, never a partial read to
//! be retried.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use prost::Message;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::codec::{Decoder, Encoder};

use crate::envelope::Envelope;
use crate::error::FramingError;

/// Length prefix size in bytes.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default cap on a single frame's payload (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Largest buffer growth per read while a frame is incomplete. Memory follows
/// the bytes that actually arrive, not the declared length.
const MAX_RESERVE_STEP: usize = 64 * 1024;

/// Encode an envelope as a complete frame.
///
/// # Errors
///
/// Returns [`FramingError::FrameTooLarge`] if the envelope does not fit a
/// `u32` length prefix.
pub fn encode(envelope: &Envelope) -> Result<Bytes, FramingError> {
    let len = envelope.encoded_len();
    let header = frame_header(len)?;
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + len);
    buf.put_u32_le(header);
    envelope.encode(&mut buf)?;
    Ok(buf.freeze())
}

/// Prefix an already-serialized payload with its length.
///
/// # Errors
///
/// Returns [`FramingError::FrameTooLarge`] if the payload does not fit a
/// `u32` length prefix.
pub fn frame_payload(payload: &[u8]) -> Result<Bytes, FramingError> {
    let header = frame_header(payload.len())?;
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload.len());
    buf.put_u32_le(header);
    buf.extend_from_slice(payload);
    Ok(buf.freeze())
}

fn frame_header(len: usize) -> Result<u32, FramingError> {
    u32::try_from(len).map_err(|_| FramingError::FrameTooLarge {
        size: len,
        max: u32::MAX as usize,
    })
}

/// Read exactly one frame from `reader` and decode its envelope.
///
/// Uses [`DEFAULT_MAX_FRAME_SIZE`] as the length cap.
///
/// # Errors
///
/// Returns a [`FramingError`] if the stream ends early, the declared length is
/// too large, or the payload is not a valid envelope. The reader is left at an
/// unknown position and must not be reused.
pub async fn decode<R>(reader: &mut R) -> Result<Envelope, FramingError>
where
    R: AsyncRead + Unpin,
{
    decode_with_limit(reader, DEFAULT_MAX_FRAME_SIZE).await
}

/// Like [`decode`], with an explicit cap on the payload length.
///
/// # Errors
///
/// See [`decode`].
pub async fn decode_with_limit<R>(
    reader: &mut R,
    max_frame_size: usize,
) -> Result<Envelope, FramingError>
where
    R: AsyncRead + Unpin,
{
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    read_exact_or_truncated(reader, &mut prefix).await?;

    let length = u32::from_le_bytes(prefix) as usize;
    if length > max_frame_size {
        return Err(FramingError::FrameTooLarge {
            size: length,
            max: max_frame_size,
        });
    }

    let mut payload = Vec::with_capacity(length.min(MAX_RESERVE_STEP));
    (&mut *reader)
        .take(length as u64)
        .read_to_end(&mut payload)
        .await?;
    if payload.len() < length {
        return Err(FramingError::Truncated {
            expected: length,
            received: payload.len(),
        });
    }

    Ok(Envelope::decode(payload.as_slice())?)
}

async fn read_exact_or_truncated<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), FramingError>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        let n = reader.read(&mut buf[filled..]).await?;
        if n == 0 {
            return Err(FramingError::Truncated {
                expected: buf.len(),
                received: filled,
            });
        }
        filled += n;
    }
    Ok(())
}

/// A decoded frame together with its payload size.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    /// The decoded envelope.
    pub envelope: Envelope,
    /// Payload bytes on the wire (excluding the length prefix).
    pub payload_len: usize,
}

/// Codec for length-prefixed envelope frames.
#[derive(Debug, Clone)]
pub struct EnvelopeCodec {
    max_frame_size: usize,
}

impl EnvelopeCodec {
    /// Create a new codec with default max frame size.
    #[must_use]
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Create a new codec with custom max frame size.
    #[must_use]
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    /// The configured frame size cap.
    #[must_use]
    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }
}

impl Default for EnvelopeCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for EnvelopeCodec {
    type Item = DecodedFrame;
    type Error = FramingError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.len() < LENGTH_PREFIX_SIZE {
            return Ok(None);
        }

        let length = u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize;

        if length > self.max_frame_size {
            return Err(FramingError::FrameTooLarge {
                size: length,
                max: self.max_frame_size,
            });
        }

        if src.len() < LENGTH_PREFIX_SIZE + length {
            let missing = LENGTH_PREFIX_SIZE + length - src.len();
            src.reserve(missing.min(MAX_RESERVE_STEP));
            return Ok(None);
        }

        src.advance(LENGTH_PREFIX_SIZE);
        let payload = src.split_to(length);
        let envelope = Envelope::decode(payload.freeze())?;

        Ok(Some(DecodedFrame {
            envelope,
            payload_len: length,
        }))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if let Some(frame) = self.decode(src)? {
            return Ok(Some(frame));
        }
        if src.is_empty() {
            return Ok(None);
        }

        let expected = if src.len() < LENGTH_PREFIX_SIZE {
            LENGTH_PREFIX_SIZE
        } else {
            LENGTH_PREFIX_SIZE + u32::from_le_bytes([src[0], src[1], src[2], src[3]]) as usize
        };
        let received = src.len();
        src.clear();
        Err(FramingError::Truncated { expected, received })
    }
}

impl Encoder<&Envelope> for EnvelopeCodec {
    type Error = FramingError;

    fn encode(&mut self, item: &Envelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let len = item.encoded_len();
        if len > self.max_frame_size {
            return Err(FramingError::FrameTooLarge {
                size: len,
                max: self.max_frame_size,
            });
        }
        let header = frame_header(len)?;
        dst.reserve(LENGTH_PREFIX_SIZE + len);
        dst.put_u32_le(header);
        item.encode(dst)?;
        Ok(())
    }
}


#[cfg(test)]
mod proptests {
    use super::*;
    use crate::envelope::{
        ContainerMetric, CounterEvent, ErrorEvent, Event, HttpStart, HttpStartStop, HttpStop,
        LogMessage, MessageType, PeerType, Uuid, ValueMetric,
    };
    use proptest::prelude::*;

    fn arb_peer_type() -> impl Strategy<Value = i32> {
        prop_oneof![Just(PeerType::Client as i32), Just(PeerType::Server as i32)]
    }

    fn arb_event() -> impl Strategy<Value = Event> {
        prop_oneof![
            (any::<i64>(), any::<u128>(), arb_peer_type(), 1i32..45, ".*").prop_map(
                |(timestamp, request_id, peer_type, method, uri)| {
                    Event::from(HttpStart {
                        timestamp,
                        request_id: Some(Uuid::from_u128(request_id)),
                        peer_type,
                        method,
                        uri,
                        ..Default::default()
                    })
                }
            ),
            (any::<i64>(), ".*", any::<i32>(), any::<i64>()).prop_map(
                |(timestamp, uri, status_code, content_length)| {
                    Event::from(HttpStop {
                        timestamp,
                        uri,
                        status_code,
                        content_length,
                        ..Default::default()
                    })
                }
            ),
            (any::<i64>(), any::<i64>(), arb_peer_type(), any::<i32>()).prop_map(
                |(start_timestamp, stop_timestamp, peer_type, status_code)| {
                    Event::from(HttpStartStop {
                        start_timestamp,
                        stop_timestamp,
                        peer_type,
                        status_code,
                        ..Default::default()
                    })
                }
            ),
            (any::<Vec<u8>>(), any::<bool>(), ".*", ".*").prop_map(
                |(message, stderr, app_id, source_type)| {
                    let kind = if stderr { MessageType::Err } else { MessageType::Out };
                    Event::from(LogMessage::new(kind, message, app_id, source_type))
                }
            ),
            (".*", -1.0e12f64..1.0e12, ".*")
                .prop_map(|(name, value, unit)| Event::from(ValueMetric::new(name, value, unit))),
            (".*", any::<u64>(), any::<u64>()).prop_map(|(name, delta, total)| {
                Event::from(CounterEvent { name, delta, total })
            }),
            (".*", any::<i32>(), ".*").prop_map(|(source, code, message)| {
                Event::from(ErrorEvent::new(source, code, message))
            }),
            (".*", any::<i32>(), 0.0f64..100.0, any::<u64>(), any::<u64>()).prop_map(
                |(app, index, cpu, memory, disk)| {
                    Event::from(ContainerMetric::new(app, index, cpu, memory, disk))
                }
            ),
        ]
    }

    fn arb_envelope() -> impl Strategy<Value = Envelope> {
        (
            ".*",
            arb_event(),
            prop::collection::hash_map("[a-z]{1,8}", ".*", 0..4),
            ".*",
        )
            .prop_map(|(origin, event, tags, job)| {
                let mut envelope = Envelope::wrap(origin, event);
                envelope.tags = tags;
                envelope.job = job;
                envelope
            })
    }

    proptest! {
        /// Every envelope survives encode then decode unchanged.
        #[test]
        fn prop_frame_round_trip(envelope in arb_envelope()) {
            let frame = encode(&envelope).unwrap();
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let decoded = runtime.block_on(async {
                let mut reader = frame.as_ref();
                decode(&mut reader).await
            });
            prop_assert_eq!(decoded.unwrap(), envelope);
        }

        /// The stream codec agrees with the free functions.
        #[test]
        fn prop_codec_round_trip(envelope in arb_envelope()) {
            let mut codec = EnvelopeCodec::new();
            let mut buf = BytesMut::new();
            codec.encode(&envelope, &mut buf).unwrap();
            let expected = encode(&envelope).unwrap();
            prop_assert_eq!(buf.as_ref(), expected.as_ref());

            let frame = codec.decode(&mut buf).unwrap().unwrap();
            prop_assert_eq!(frame.payload_len, envelope.encoded_len());
            prop_assert_eq!(frame.envelope, envelope);
            prop_assert!(buf.is_empty());
        }
    }
}
