//! Binary data channel protocol
//!
//! Every message starts with a one byte domain tag:
//!
//! ```text
//! ┌────────┬─────────┬──────────────────────────────┐
//! │ domain │ subtype │ payload (layout per subtype)  │
//! │ 1 byte │ 1 byte  │ little-endian numerics / UTF-8│
//! └────────┴─────────┴──────────────────────────────┘
//! ```
//!
//! There is no length prefix. The data channel's message framing delimits each message, so
//! decoding always receives exactly one message. Encoding and decoding are pure functions.

pub mod input;
pub mod wallet;

use thiserror::Error;

pub use input::{
    AxisChannel, ButtonId, ButtonTransition, Device, Finger, HandGesture, HandJoint, InputEvent,
    Pose, Quat, Vec3,
};
pub use wallet::{WalletFrame, WalletKind};

/// Leading byte of every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Domain {
    Input = 0,
    Wallet = 1,
}

impl TryFrom<u8> for Domain {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Domain::Input),
            1 => Ok(Domain::Wallet),
            other => Err(DecodeError::UnknownDomain(other)),
        }
    }
}

/// Reasons a buffer is rejected by [`WireMessage::decode`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("empty message")]
    Empty,
    #[error("unknown domain tag {0}")]
    UnknownDomain(u8),
    #[error("unknown {domain:?} subtype {subtype}")]
    UnknownSubtype { domain: Domain, subtype: u8 },
    #[error("{kind} message must be {expected} bytes, got {actual}")]
    Length {
        kind: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("read of {len} bytes at offset {offset} is out of bounds")]
    OutOfBounds { offset: usize, len: usize },
    #[error("unknown device index {0}")]
    UnknownDevice(u8),
    #[error("unknown button id {0}")]
    UnknownButton(u8),
    #[error("unknown hand joint index {0}")]
    UnknownJoint(u8),
    #[error("unknown hand gesture {0}")]
    UnknownGesture(u8),
    #[error("non-finite float at offset {0}")]
    NonFinite(usize),
    #[error("payload is not valid UTF-8")]
    InvalidUtf8,
    #[error("invalid wallet payload: {0}")]
    InvalidJson(String),
}

/// One message on the reliable channel.
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    Input(InputEvent),
    Wallet(WalletFrame),
}

impl WireMessage {
    pub fn domain(&self) -> Domain {
        match self {
            WireMessage::Input(_) => Domain::Input,
            WireMessage::Wallet(_) => Domain::Wallet,
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            WireMessage::Input(event) => event.encode(),
            WireMessage::Wallet(frame) => frame.encode(),
        }
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let tag = *bytes.first().ok_or(DecodeError::Empty)?;
        match Domain::try_from(tag)? {
            Domain::Input => InputEvent::decode(bytes).map(WireMessage::Input),
            Domain::Wallet => WalletFrame::decode(bytes).map(WireMessage::Wallet),
        }
    }
}

impl From<InputEvent> for WireMessage {
    fn from(event: InputEvent) -> Self {
        WireMessage::Input(event)
    }
}

impl From<WalletFrame> for WireMessage {
    fn from(frame: WalletFrame) -> Self {
        WireMessage::Wallet(frame)
    }
}

/// Fixed-size little-endian writer. Offsets are absolute within the message.
pub(crate) struct ByteWriter {
    buf: Vec<u8>,
}

impl ByteWriter {
    pub(crate) fn new(len: usize, domain: Domain, subtype: u8) -> Self {
        let mut buf = vec![0; len];
        buf[0] = domain as u8;
        if len > 1 {
            buf[1] = subtype;
        }
        Self { buf }
    }

    pub(crate) fn u8(&mut self, offset: usize, value: u8) -> &mut Self {
        self.buf[offset] = value;
        self
    }

    pub(crate) fn bool(&mut self, offset: usize, value: bool) -> &mut Self {
        self.u8(offset, u8::from(value))
    }

    pub(crate) fn u32(&mut self, offset: usize, value: u32) -> &mut Self {
        self.buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        self
    }

    pub(crate) fn f32(&mut self, offset: usize, value: f32) -> &mut Self {
        self.buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
        self
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        self.buf
    }
}

/// Bounds-checked little-endian reader.
pub(crate) struct ByteReader<'a> {
    buf: &'a [u8],
}

impl<'a> ByteReader<'a> {
    pub(crate) fn new(buf: &'a [u8]) -> Self {
        Self { buf }
    }

    fn slice<const N: usize>(&self, offset: usize) -> Result<[u8; N], DecodeError> {
        self.buf
            .get(offset..offset + N)
            .and_then(|s| s.try_into().ok())
            .ok_or(DecodeError::OutOfBounds { offset, len: N })
    }

    pub(crate) fn u8(&self, offset: usize) -> Result<u8, DecodeError> {
        self.slice::<1>(offset).map(|b| b[0])
    }

    pub(crate) fn bool(&self, offset: usize) -> Result<bool, DecodeError> {
        self.u8(offset).map(|b| b != 0)
    }

    pub(crate) fn u32(&self, offset: usize) -> Result<u32, DecodeError> {
        self.slice::<4>(offset).map(u32::from_le_bytes)
    }

    /// NaN and infinities are rejected; the renderer never accepts them.
    pub(crate) fn f32(&self, offset: usize) -> Result<f32, DecodeError> {
        let value = self.slice::<4>(offset).map(f32::from_le_bytes)?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(DecodeError::NonFinite(offset))
        }
    }
}

pub(crate) fn expect_len(kind: &'static str, bytes: &[u8], expected: usize) -> Result<(), DecodeError> {
    if bytes.len() == expected {
        Ok(())
    } else {
        Err(DecodeError::Length {
            kind,
            expected,
            actual: bytes.len(),
        })
    }
}
