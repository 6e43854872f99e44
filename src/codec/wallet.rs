//! Wallet domain framing: `[1, kind, UTF-8 body...]`.
//!
//! Requests carry a JSON body, responses carry plain text. The typed request and response
//! views live in [`crate::wallet`]; this module only deals with the frame.

use super::{ByteReader, DecodeError, Domain};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WalletKind {
    Account = 0,
    Sign = 1,
    SendTx = 2,
    SetContract = 3,
    RunContract = 4,
}

impl TryFrom<u8> for WalletKind {
    type Error = DecodeError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(WalletKind::Account),
            1 => Ok(WalletKind::Sign),
            2 => Ok(WalletKind::SendTx),
            3 => Ok(WalletKind::SetContract),
            4 => Ok(WalletKind::RunContract),
            subtype => Err(DecodeError::UnknownSubtype {
                domain: Domain::Wallet,
                subtype,
            }),
        }
    }
}

/// A wallet message with its body still in text form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletFrame {
    pub kind: WalletKind,
    pub body: String,
}

impl WalletFrame {
    pub fn new(kind: WalletKind, body: impl Into<String>) -> Self {
        Self {
            kind,
            body: body.into(),
        }
    }

    /// Header-only frame, used to acknowledge `SetContract`.
    pub fn ack(kind: WalletKind) -> Self {
        Self::new(kind, String::new())
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(2 + self.body.len());
        out.push(Domain::Wallet as u8);
        out.push(self.kind as u8);
        out.extend_from_slice(self.body.as_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        let r = ByteReader::new(bytes);
        let tag = r.u8(0)?;
        if Domain::try_from(tag)? != Domain::Wallet {
            return Err(DecodeError::UnknownDomain(tag));
        }
        let kind = WalletKind::try_from(r.u8(1)?)?;
        let body = std::str::from_utf8(&bytes[2..]).map_err(|_| DecodeError::InvalidUtf8)?;
        Ok(Self::new(kind, body))
    }
}
