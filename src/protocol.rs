//! Wire framing for the remote agent execution service.
//!
//! The service sends newline-delimited records over the persistent
//! connection. Each record is a one-letter kind prefix, a colon, and a JSON
//! string literal carrying the payload:
//!
//! ```text
//! d:"Provisioning the network layer...\n"
//! c:"ping"
//! c:"end"
//! ```
//!
//! Because the payload is a JSON string literal, embedded newlines and
//! whitespace are escaped on the wire and recovered exactly on decode, and a
//! bare `\n` can safely terminate a record. A physical read may carry a
//! partial record, one record, or several; the decoder buffers across reads
//! and never yields a partial payload.

use serde_json::Value;

/// Default cap on a single record, including prefix and literal escapes.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024;

/// A decoded protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// A text delta from the agent.
    Data(String),
    /// A control token.
    Control(Control),
}

/// Control tokens the service may send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// End of stream; no frames follow.
    End,
    /// Keep-alive, carries no text.
    Ping,
}

/// Framing error that must abort the stream.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame exceeds {max} bytes")]
    TooLarge { max: usize },
}

/// Incremental decoder for the line-framed protocol.
///
/// Feed each physical read to [`FrameDecoder::decode`]; complete frames come
/// back in order, partial trailing records are retained until the next read.
pub struct FrameDecoder {
    buffer: String,
    max_frame_bytes: usize,
}

impl FrameDecoder {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            buffer: String::new(),
            max_frame_bytes,
        }
    }

    /// Decode raw text from the connection into complete frames.
    ///
    /// Malformed records are skipped with a warning. An oversized record is a
    /// hard error: the sender is out of contract and the payload cannot be
    /// recovered by skipping.
    pub fn decode(&mut self, raw: &str) -> Result<Vec<Frame>, FrameError> {
        self.buffer.push_str(raw);

        let mut frames = Vec::new();
        while let Some(newline) = self.buffer.find('\n') {
            let record: String = self.buffer.drain(..=newline).collect();
            let record = record.trim_end_matches(['\n', '\r']);
            if record.is_empty() {
                continue;
            }
            if record.len() > self.max_frame_bytes {
                return Err(FrameError::TooLarge {
                    max: self.max_frame_bytes,
                });
            }
            match parse_record(record) {
                Some(frame) => frames.push(frame),
                None => {
                    tracing::warn!(
                        len = record.len(),
                        "skipping malformed protocol record"
                    );
                }
            }
        }

        // A trailing partial record still has to respect the frame cap.
        if self.buffer.len() > self.max_frame_bytes {
            return Err(FrameError::TooLarge {
                max: self.max_frame_bytes,
            });
        }

        Ok(frames)
    }

    /// Encode a data frame for the outbound direction.
    pub fn encode_data(text: &str) -> String {
        format!("d:{}\n", Value::String(text.to_string()))
    }

    /// Encode a control frame for the outbound direction.
    pub fn encode_control(control: Control) -> String {
        let token = match control {
            Control::End => "end",
            Control::Ping => "ping",
        };
        format!("c:{}\n", Value::String(token.to_string()))
    }
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

fn parse_record(record: &str) -> Option<Frame> {
    let (kind, literal) = record.split_once(':')?;
    let payload: String = serde_json::from_str(literal).ok()?;
    match kind {
        "d" => Some(Frame::Data(payload)),
        "c" => match payload.as_str() {
            "end" => Some(Frame::Control(Control::End)),
            "ping" => Some(Frame::Control(Control::Ping)),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_record() {
        let mut dec = FrameDecoder::default();
        let frames = dec.decode("d:\"hello\"\n").unwrap();
        assert_eq!(frames, vec![Frame::Data("hello".to_string())]);
    }

    #[test]
    fn test_record_split_across_reads() {
        let mut dec = FrameDecoder::default();
        assert!(dec.decode("d:\"hel").unwrap().is_empty());
        let frames = dec.decode("lo world\"\n").unwrap();
        assert_eq!(frames, vec![Frame::Data("hello world".to_string())]);
    }

    #[test]
    fn test_multiple_records_in_one_read() {
        let mut dec = FrameDecoder::default();
        let frames = dec.decode("d:\"a\"\nd:\"b\"\nc:\"end\"\n").unwrap();
        assert_eq!(
            frames,
            vec![
                Frame::Data("a".to_string()),
                Frame::Data("b".to_string()),
                Frame::Control(Control::End),
            ]
        );
    }

    #[test]
    fn test_embedded_newlines_recovered_exactly() {
        let original = "line one\nline two\n\ttabbed  ";
        let encoded = FrameDecoder::encode_data(original);
        let mut dec = FrameDecoder::default();
        let frames = dec.decode(&encoded).unwrap();
        assert_eq!(frames, vec![Frame::Data(original.to_string())]);
    }

    #[test]
    fn test_malformed_record_skipped() {
        let mut dec = FrameDecoder::default();
        let frames = dec.decode("garbage\nd:\"ok\"\n").unwrap();
        assert_eq!(frames, vec![Frame::Data("ok".to_string())]);
    }

    #[test]
    fn test_unknown_control_skipped() {
        let mut dec = FrameDecoder::default();
        let frames = dec.decode("c:\"shrug\"\nc:\"end\"\n").unwrap();
        assert_eq!(frames, vec![Frame::Control(Control::End)]);
    }

    #[test]
    fn test_oversized_record_rejected() {
        let mut dec = FrameDecoder::new(64);
        let big = format!("d:{}\n", Value::String("x".repeat(128)));
        assert!(matches!(
            dec.decode(&big),
            Err(FrameError::TooLarge { max: 64 })
        ));
    }

    #[test]
    fn test_oversized_partial_rejected_before_newline() {
        let mut dec = FrameDecoder::new(64);
        let partial = "d:\"".to_string() + &"y".repeat(128);
        assert!(matches!(
            dec.decode(&partial),
            Err(FrameError::TooLarge { max: 64 })
        ));
    }

    #[test]
    fn test_concatenation_reconstructs_output_across_read_boundaries() {
        let parts = ["## Progress\n", "Deploying ", "stack...\n", "\tdone.\n"];
        let wire: String = parts
            .iter()
            .map(|p| FrameDecoder::encode_data(p))
            .chain(std::iter::once(FrameDecoder::encode_control(Control::End)))
            .collect();

        // Feed the wire text in awkward 7-byte physical reads.
        let mut dec = FrameDecoder::default();
        let mut reassembled = String::new();
        let bytes = wire.as_bytes();
        for chunk in bytes.chunks(7) {
            for frame in dec.decode(std::str::from_utf8(chunk).unwrap()).unwrap() {
                if let Frame::Data(text) = frame {
                    reassembled.push_str(&text);
                }
            }
        }
        assert_eq!(reassembled, parts.concat());
    }

    #[test]
    fn test_control_roundtrip() {
        let mut dec = FrameDecoder::default();
        let frames = dec
            .decode(&FrameDecoder::encode_control(Control::Ping))
            .unwrap();
        assert_eq!(frames, vec![Frame::Control(Control::Ping)]);
    }
}
