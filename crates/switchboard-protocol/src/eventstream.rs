use bytes::{Buf, Bytes, BytesMut};

/// Smallest possible frame: 12-byte prelude plus the trailing message CRC.
const MIN_FRAME_LEN: usize = 16;
/// Upper bound on a single frame; anything larger is a corrupt length word.
const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("prelude crc mismatch: expected {expected:08x}, got {actual:08x}")]
    PreludeCrc { expected: u32, actual: u32 },
    #[error("message crc mismatch: expected {expected:08x}, got {actual:08x}")]
    MessageCrc { expected: u32, actual: u32 },
    #[error("invalid frame length {0}")]
    BadLength(u32),
    #[error("truncated header block")]
    BadHeaders,
    #[error("payload is not utf-8 json")]
    BadPayload,
}

#[derive(Debug, Clone, PartialEq)]
pub enum HeaderValue {
    Bool(bool),
    Byte(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    ByteArray(Bytes),
    String(String),
    Timestamp(i64),
    Uuid([u8; 16]),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    pub headers: Vec<(String, HeaderValue)>,
    pub payload: Bytes,
}

impl Frame {
    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.headers.iter().find_map(|(k, v)| {
            if k != name {
                return None;
            }
            match v {
                HeaderValue::String(s) => Some(s.as_str()),
                _ => None,
            }
        })
    }

    pub fn payload_json(&self) -> Result<serde_json::Value, FrameError> {
        serde_json::from_slice(&self.payload).map_err(|_| FrameError::BadPayload)
    }
}

/// Incremental parser for the binary event-stream framing:
///
/// ```text
/// [4B total length][4B headers length][4B prelude crc]
/// [headers][payload][4B message crc]
/// ```
///
/// Bytes may arrive fragmented arbitrarily; partial frames are buffered.
/// Both CRCs are validated; a mismatch is terminal for the stream.
#[derive(Debug, Default)]
pub struct FrameParser {
    buffer: BytesMut,
}

impl FrameParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bytes buffered but not yet parsed into a complete frame.
    pub fn pending_bytes(&self) -> usize {
        self.buffer.len()
    }

    pub fn push_bytes(&mut self, chunk: &[u8]) -> Result<Vec<Frame>, FrameError> {
        self.buffer.extend_from_slice(chunk);
        let mut frames = Vec::new();

        loop {
            if self.buffer.len() < MIN_FRAME_LEN {
                break;
            }
            let total_len = u32::from_be_bytes([
                self.buffer[0],
                self.buffer[1],
                self.buffer[2],
                self.buffer[3],
            ]);
            if (total_len as usize) < MIN_FRAME_LEN || (total_len as usize) > MAX_FRAME_LEN {
                return Err(FrameError::BadLength(total_len));
            }
            if self.buffer.len() < total_len as usize {
                break;
            }
            let frame_bytes = self.buffer.split_to(total_len as usize).freeze();
            frames.push(decode_frame(frame_bytes)?);
        }

        Ok(frames)
    }
}

fn decode_frame(frame: Bytes) -> Result<Frame, FrameError> {
    let total_len = frame.len();

    let headers_len = u32::from_be_bytes([frame[4], frame[5], frame[6], frame[7]]) as usize;
    let prelude_crc = u32::from_be_bytes([frame[8], frame[9], frame[10], frame[11]]);
    let actual_prelude = crc32fast::hash(&frame[..8]);
    if actual_prelude != prelude_crc {
        return Err(FrameError::PreludeCrc {
            expected: prelude_crc,
            actual: actual_prelude,
        });
    }

    let message_crc = u32::from_be_bytes([
        frame[total_len - 4],
        frame[total_len - 3],
        frame[total_len - 2],
        frame[total_len - 1],
    ]);
    let actual_message = crc32fast::hash(&frame[..total_len - 4]);
    if actual_message != message_crc {
        return Err(FrameError::MessageCrc {
            expected: message_crc,
            actual: actual_message,
        });
    }

    if 12 + headers_len > total_len - 4 {
        return Err(FrameError::BadHeaders);
    }
    let headers = decode_headers(&frame[12..12 + headers_len])?;
    let payload = frame.slice(12 + headers_len..total_len - 4);

    Ok(Frame { headers, payload })
}

fn decode_headers(mut buf: &[u8]) -> Result<Vec<(String, HeaderValue)>, FrameError> {
    let mut headers = Vec::new();
    while !buf.is_empty() {
        let name_len = buf[0] as usize;
        buf = &buf[1..];
        if buf.len() < name_len + 1 {
            return Err(FrameError::BadHeaders);
        }
        let name = std::str::from_utf8(&buf[..name_len])
            .map_err(|_| FrameError::BadHeaders)?
            .to_string();
        buf = &buf[name_len..];
        let value_type = buf[0];
        buf = &buf[1..];

        let value = match value_type {
            0 => HeaderValue::Bool(true),
            1 => HeaderValue::Bool(false),
            2 => {
                let v = *buf.first().ok_or(FrameError::BadHeaders)? as i8;
                buf = &buf[1..];
                HeaderValue::Byte(v)
            }
            3 => {
                if buf.len() < 2 {
                    return Err(FrameError::BadHeaders);
                }
                let v = (&buf[..2]).get_i16();
                buf = &buf[2..];
                HeaderValue::Int16(v)
            }
            4 => {
                if buf.len() < 4 {
                    return Err(FrameError::BadHeaders);
                }
                let v = (&buf[..4]).get_i32();
                buf = &buf[4..];
                HeaderValue::Int32(v)
            }
            5 => {
                if buf.len() < 8 {
                    return Err(FrameError::BadHeaders);
                }
                let v = (&buf[..8]).get_i64();
                buf = &buf[8..];
                HeaderValue::Int64(v)
            }
            6 | 7 => {
                if buf.len() < 2 {
                    return Err(FrameError::BadHeaders);
                }
                let len = (&buf[..2]).get_u16() as usize;
                buf = &buf[2..];
                if buf.len() < len {
                    return Err(FrameError::BadHeaders);
                }
                let raw = &buf[..len];
                buf = &buf[len..];
                if value_type == 7 {
                    let s = std::str::from_utf8(raw).map_err(|_| FrameError::BadHeaders)?;
                    HeaderValue::String(s.to_string())
                } else {
                    HeaderValue::ByteArray(Bytes::copy_from_slice(raw))
                }
            }
            8 => {
                if buf.len() < 8 {
                    return Err(FrameError::BadHeaders);
                }
                let v = (&buf[..8]).get_i64();
                buf = &buf[8..];
                HeaderValue::Timestamp(v)
            }
            9 => {
                if buf.len() < 16 {
                    return Err(FrameError::BadHeaders);
                }
                let mut v = [0u8; 16];
                v.copy_from_slice(&buf[..16]);
                buf = &buf[16..];
                HeaderValue::Uuid(v)
            }
            _ => return Err(FrameError::BadHeaders),
        };
        headers.push((name, value));
    }
    Ok(headers)
}

/// Encode one frame. Used by tests and by mock upstreams; the proxy itself
/// only decodes.
pub fn encode_frame(headers: &[(String, HeaderValue)], payload: &[u8]) -> Bytes {
    let mut header_bytes = Vec::new();
    for (name, value) in headers {
        header_bytes.push(name.len() as u8);
        header_bytes.extend_from_slice(name.as_bytes());
        match value {
            HeaderValue::Bool(true) => header_bytes.push(0),
            HeaderValue::Bool(false) => header_bytes.push(1),
            HeaderValue::Byte(v) => {
                header_bytes.push(2);
                header_bytes.push(*v as u8);
            }
            HeaderValue::Int16(v) => {
                header_bytes.push(3);
                header_bytes.extend_from_slice(&v.to_be_bytes());
            }
            HeaderValue::Int32(v) => {
                header_bytes.push(4);
                header_bytes.extend_from_slice(&v.to_be_bytes());
            }
            HeaderValue::Int64(v) => {
                header_bytes.push(5);
                header_bytes.extend_from_slice(&v.to_be_bytes());
            }
            HeaderValue::ByteArray(v) => {
                header_bytes.push(6);
                header_bytes.extend_from_slice(&(v.len() as u16).to_be_bytes());
                header_bytes.extend_from_slice(v);
            }
            HeaderValue::String(v) => {
                header_bytes.push(7);
                header_bytes.extend_from_slice(&(v.len() as u16).to_be_bytes());
                header_bytes.extend_from_slice(v.as_bytes());
            }
            HeaderValue::Timestamp(v) => {
                header_bytes.push(8);
                header_bytes.extend_from_slice(&v.to_be_bytes());
            }
            HeaderValue::Uuid(v) => {
                header_bytes.push(9);
                header_bytes.extend_from_slice(v);
            }
        }
    }

    let total_len = (12 + header_bytes.len() + payload.len() + 4) as u32;
    let mut out = Vec::with_capacity(total_len as usize);
    out.extend_from_slice(&total_len.to_be_bytes());
    out.extend_from_slice(&(header_bytes.len() as u32).to_be_bytes());
    out.extend_from_slice(&crc32fast::hash(&out[..8]).to_be_bytes());
    out.extend_from_slice(&header_bytes);
    out.extend_from_slice(payload);
    out.extend_from_slice(&crc32fast::hash(&out).to_be_bytes());
    Bytes::from(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame(json: &str) -> Bytes {
        encode_frame(
            &[(
                ":event-type".to_string(),
                HeaderValue::String("assistantResponseEvent".to_string()),
            )],
            json.as_bytes(),
        )
    }

    #[test]
    fn decodes_whole_frame() {
        let mut parser = FrameParser::new();
        let frames = parser.push_bytes(&sample_frame("{\"content\":\"hi\"}")).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(
            frames[0].header_str(":event-type"),
            Some("assistantResponseEvent")
        );
        assert_eq!(
            frames[0].payload_json().unwrap()["content"],
            serde_json::json!("hi")
        );
    }

    #[test]
    fn same_frames_for_any_split() {
        let mut wire = Vec::new();
        for i in 0..5 {
            wire.extend_from_slice(&sample_frame(&format!("{{\"n\":{i}}}")));
        }

        let mut whole = FrameParser::new();
        let expected = whole.push_bytes(&wire).unwrap();
        assert_eq!(expected.len(), 5);

        for split in [1usize, 2, 3, 7, 16, 33] {
            let mut parser = FrameParser::new();
            let mut got = Vec::new();
            for chunk in wire.chunks(split) {
                got.extend(parser.push_bytes(chunk).unwrap());
            }
            assert_eq!(got, expected, "split size {split}");
            assert_eq!(parser.pending_bytes(), 0);
        }
    }

    #[test]
    fn corrupt_message_crc_is_terminal() {
        let mut wire = sample_frame("{\"n\":1}").to_vec();
        let last = wire.len() - 1;
        wire[last] ^= 0xff;
        let mut parser = FrameParser::new();
        assert!(matches!(
            parser.push_bytes(&wire),
            Err(FrameError::MessageCrc { .. })
        ));
    }

    #[test]
    fn corrupt_prelude_crc_is_terminal() {
        let mut wire = sample_frame("{\"n\":1}").to_vec();
        wire[9] ^= 0xff;
        let mut parser = FrameParser::new();
        assert!(matches!(
            parser.push_bytes(&wire),
            Err(FrameError::PreludeCrc { .. })
        ));
    }

    #[test]
    fn absurd_length_rejected() {
        let mut parser = FrameParser::new();
        let mut wire = vec![0xffu8; MIN_FRAME_LEN];
        wire[0] = 0xff;
        assert!(matches!(
            parser.push_bytes(&wire),
            Err(FrameError::BadLength(_))
        ));
    }
}
