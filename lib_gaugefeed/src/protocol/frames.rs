//! # Frames
//!
//! Typed view of the wire envelope. The engine only ever sees [`Frame`]
//! values; the [`FrameCodec`] in use decides how they become bytes.

use bytes::Bytes;
use prost::Message;

use super::proto_handler::{BatchEntry, Envelope, FrameKind};
use crate::error::{GaugeFeedError, Result};

/// One protocol frame, client or server originated.
#[derive(Debug, Clone, PartialEq)]
pub enum Frame {
    /// Handshake sent after the socket opens.
    Connect {
        login: String,
        passcode: String,
        host: String,
    },
    /// Handshake acknowledgement.
    Connected {
        /// Server assigned session label, may be empty.
        session: String,
    },
    Disconnect,
    /// Publish a payload to a destination.
    Send {
        destination: String,
        payload: Bytes,
    },
    Subscribe {
        subscription_id: u64,
        destination: String,
        receipt_id: Option<u64>,
        throttle_rate_ms: u32,
    },
    Unsubscribe {
        subscription_id: u64,
        receipt_id: Option<u64>,
    },
    Throttle {
        subscription_id: u64,
        throttle_rate_ms: u32,
        receipt_id: Option<u64>,
    },
    Heartbeat,
    SingleMessage {
        subscription_id: u64,
        payload: Bytes,
    },
    /// `(subscription id, payload)` pairs in server order.
    BatchMessages {
        messages: Vec<(u64, Bytes)>,
    },
    Receipt {
        receipt_id: u64,
    },
    SubscriptionError {
        subscription_id: u64,
        message: String,
    },
    ServerError {
        message: String,
    },
}

impl Frame {
    /// Tag of this frame.
    pub fn kind(&self) -> FrameKind {
        match self {
            Frame::Connect { .. } => FrameKind::Connect,
            Frame::Connected { .. } => FrameKind::Connected,
            Frame::Disconnect => FrameKind::Disconnect,
            Frame::Send { .. } => FrameKind::Send,
            Frame::Subscribe { .. } => FrameKind::Subscribe,
            Frame::Unsubscribe { .. } => FrameKind::Unsubscribe,
            Frame::Throttle { .. } => FrameKind::Throttle,
            Frame::Heartbeat => FrameKind::Heartbeat,
            Frame::SingleMessage { .. } => FrameKind::SingleMessage,
            Frame::BatchMessages { .. } => FrameKind::BatchMessages,
            Frame::Receipt { .. } => FrameKind::Receipt,
            Frame::SubscriptionError { .. } => FrameKind::SubscriptionError,
            Frame::ServerError { .. } => FrameKind::ServerError,
        }
    }
}

/// Converts frames to and from socket messages.
pub trait FrameCodec: Send + Sync + 'static {
    fn encode(&self, frame: &Frame) -> Vec<u8>;

    /// Fails with [`GaugeFeedError::ProtocolParse`] on unreadable input.
    fn decode(&self, bytes: &[u8]) -> Result<Frame>;
}

/// Protobuf [`Envelope`] codec.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProtoFrameCodec;

impl FrameCodec for ProtoFrameCodec {
    fn encode(&self, frame: &Frame) -> Vec<u8> {
        to_envelope(frame).encode_to_vec()
    }

    fn decode(&self, bytes: &[u8]) -> Result<Frame> {
        let envelope = Envelope::decode(bytes).map_err(|e| GaugeFeedError::ProtocolParse(e.to_string()))?;
        from_envelope(envelope)
    }
}

fn receipt(id: Option<u64>) -> u64 {
    id.unwrap_or(0)
}

fn optional_receipt(id: u64) -> Option<u64> {
    (id != 0).then_some(id)
}

fn to_envelope(frame: &Frame) -> Envelope {
    let mut env = Envelope {
        kind: frame.kind() as i32,
        ..Default::default()
    };

    match frame {
        Frame::Connect { login, passcode, host } => {
            env.login = login.clone();
            env.passcode = passcode.clone();
            env.host = host.clone();
        }
        Frame::Connected { session } => env.message = session.clone(),
        Frame::Disconnect | Frame::Heartbeat => {}
        Frame::Send { destination, payload } => {
            env.destination = destination.clone();
            env.payload = payload.clone();
        }
        Frame::Subscribe {
            subscription_id,
            destination,
            receipt_id,
            throttle_rate_ms,
        } => {
            env.subscription_id = *subscription_id;
            env.destination = destination.clone();
            env.receipt_id = receipt(*receipt_id);
            env.throttle_rate = *throttle_rate_ms;
        }
        Frame::Unsubscribe {
            subscription_id,
            receipt_id,
        } => {
            env.subscription_id = *subscription_id;
            env.receipt_id = receipt(*receipt_id);
        }
        Frame::Throttle {
            subscription_id,
            throttle_rate_ms,
            receipt_id,
        } => {
            env.subscription_id = *subscription_id;
            env.throttle_rate = *throttle_rate_ms;
            env.receipt_id = receipt(*receipt_id);
        }
        Frame::SingleMessage {
            subscription_id,
            payload,
        } => {
            env.subscription_id = *subscription_id;
            env.payload = payload.clone();
        }
        Frame::BatchMessages { messages } => {
            env.batch = messages
                .iter()
                .map(|(subscription_id, payload)| BatchEntry {
                    subscription_id: *subscription_id,
                    payload: payload.clone(),
                })
                .collect();
        }
        Frame::Receipt { receipt_id } => env.receipt_id = *receipt_id,
        Frame::SubscriptionError {
            subscription_id,
            message,
        } => {
            env.subscription_id = *subscription_id;
            env.message = message.clone();
        }
        Frame::ServerError { message } => env.message = message.clone(),
    }

    env
}

fn from_envelope(env: Envelope) -> Result<Frame> {
    let kind = FrameKind::try_from(env.kind)
        .map_err(|_| GaugeFeedError::ProtocolParse(format!("unknown frame kind {}", env.kind)))?;

    let frame = match kind {
        FrameKind::Unknown => return Err(GaugeFeedError::ProtocolParse("frame kind not set".into())),
        FrameKind::Connect => Frame::Connect {
            login: env.login,
            passcode: env.passcode,
            host: env.host,
        },
        FrameKind::Connected => Frame::Connected { session: env.message },
        FrameKind::Disconnect => Frame::Disconnect,
        FrameKind::Send => Frame::Send {
            destination: env.destination,
            payload: env.payload,
        },
        FrameKind::Subscribe => Frame::Subscribe {
            subscription_id: env.subscription_id,
            destination: env.destination,
            receipt_id: optional_receipt(env.receipt_id),
            throttle_rate_ms: env.throttle_rate,
        },
        FrameKind::Unsubscribe => Frame::Unsubscribe {
            subscription_id: env.subscription_id,
            receipt_id: optional_receipt(env.receipt_id),
        },
        FrameKind::Throttle => Frame::Throttle {
            subscription_id: env.subscription_id,
            throttle_rate_ms: env.throttle_rate,
            receipt_id: optional_receipt(env.receipt_id),
        },
        FrameKind::Heartbeat => Frame::Heartbeat,
        FrameKind::SingleMessage => Frame::SingleMessage {
            subscription_id: env.subscription_id,
            payload: env.payload,
        },
        FrameKind::BatchMessages => Frame::BatchMessages {
            messages: env.batch.into_iter().map(|e| (e.subscription_id, e.payload)).collect(),
        },
        FrameKind::Receipt => {
            if env.receipt_id == 0 {
                return Err(GaugeFeedError::ProtocolParse("receipt frame without receipt id".into()));
            }
            Frame::Receipt {
                receipt_id: env.receipt_id,
            }
        }
        FrameKind::SubscriptionError => Frame::SubscriptionError {
            subscription_id: env.subscription_id,
            message: env.message,
        },
        FrameKind::ServerError => Frame::ServerError { message: env.message },
    };

    Ok(frame)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_frame_keeps_its_fields() {
        let codec = ProtoFrameCodec;
        let frame = Frame::Subscribe {
            subscription_id: 42,
            destination: "/gauge/eq/realtime/AAPL".into(),
            receipt_id: Some(7),
            throttle_rate_ms: 250,
        };
        assert_eq!(codec.decode(&codec.encode(&frame)).unwrap(), frame);

        let no_receipt = Frame::Unsubscribe {
            subscription_id: 42,
            receipt_id: None,
        };
        assert_eq!(codec.decode(&codec.encode(&no_receipt)).unwrap(), no_receipt);
    }

    #[test]
    fn batch_preserves_server_order() {
        let codec = ProtoFrameCodec;
        let frame = Frame::BatchMessages {
            messages: vec![(3, Bytes::from_static(b"c")), (1, Bytes::from_static(b"a"))],
        };
        match codec.decode(&codec.encode(&frame)).unwrap() {
            Frame::BatchMessages { messages } => {
                assert_eq!(messages[0].0, 3);
                assert_eq!(messages[1].1, Bytes::from_static(b"a"));
            }
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn garbage_and_unknown_kinds_are_parse_errors() {
        let codec = ProtoFrameCodec;
        assert!(matches!(
            codec.decode(&[0xff, 0xff, 0xff]),
            Err(GaugeFeedError::ProtocolParse(_))
        ));

        let unknown = Envelope {
            kind: 99,
            ..Default::default()
        };
        assert!(matches!(
            codec.decode(&unknown.encode_to_vec()),
            Err(GaugeFeedError::ProtocolParse(_))
        ));

        assert!(matches!(codec.decode(&[]), Err(GaugeFeedError::ProtocolParse(_))));
    }
}
