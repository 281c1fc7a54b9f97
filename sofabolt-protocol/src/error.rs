//! Codec error types.

use thiserror::Error;

/// Errors produced while encoding or decoding BOLT frames.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("sofabolt: malformed proto {0:#04x}")]
    MalformedProto(u8),

    #[error("sofabolt: malformed type {0}")]
    MalformedType(u8),

    #[error("sofabolt: buffer not enough")]
    NotEnough,

    #[error("simplemap: parse key failed")]
    ParseKey,

    #[error("simplemap: parse value failed")]
    ParseValue,

    #[error("field {field} too large: {len} bytes (max {max})")]
    FieldTooLarge {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("connection blob error: {0}")]
    Connection(String),
}

impl ProtocolError {
    /// Returns true when more input would let the decode succeed.
    pub fn is_incomplete(&self) -> bool {
        matches!(self, ProtocolError::NotEnough)
    }

    /// Returns true for errors that mean the byte stream lost framing.
    pub fn is_malformed(&self) -> bool {
        matches!(
            self,
            ProtocolError::MalformedProto(_)
                | ProtocolError::MalformedType(_)
                | ProtocolError::ParseKey
                | ProtocolError::ParseValue
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_display() {
        let err = ProtocolError::MalformedProto(0x7f);
        assert!(err.to_string().contains("malformed proto"));
        assert!(err.to_string().contains("0x7f"));

        let err = ProtocolError::MalformedType(9);
        assert!(err.to_string().contains("9"));

        let err = ProtocolError::NotEnough;
        assert_eq!(err.to_string(), "sofabolt: buffer not enough");

        let err = ProtocolError::FieldTooLarge {
            field: "class",
            len: 70000,
            max: 65535,
        };
        let msg = err.to_string();
        assert!(msg.contains("class"));
        assert!(msg.contains("70000"));
    }

    #[test]
    fn test_error_classes() {
        assert!(ProtocolError::NotEnough.is_incomplete());
        assert!(!ProtocolError::NotEnough.is_malformed());
        assert!(ProtocolError::MalformedProto(0).is_malformed());
        assert!(ProtocolError::ParseValue.is_malformed());
        assert!(!ProtocolError::Connection("x".into()).is_malformed());
    }
}
