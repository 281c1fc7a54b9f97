//! Incremental decoder and one-shot encoder for BOLT frames.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};

use crate::command::Command;
use crate::error::ProtocolError;
use crate::request::{ConnectionCodec, Request};
use crate::response::Response;

/// Encodes frames into fresh buffers.
pub struct Encoder;

impl Encoder {
    pub fn encode_command(cmd: &Command) -> Result<BytesMut, ProtocolError> {
        let mut buf = BytesMut::with_capacity(cmd.size());
        cmd.write(&mut buf)?;
        Ok(buf)
    }

    pub fn encode_request(req: &mut Request) -> Result<BytesMut, ProtocolError> {
        let mut buf = BytesMut::with_capacity(req.size());
        req.write(&mut buf)?;
        Ok(buf)
    }

    pub fn encode_response(res: &mut Response) -> Result<BytesMut, ProtocolError> {
        let mut buf = BytesMut::with_capacity(res.size());
        res.write(&mut buf)?;
        Ok(buf)
    }
}

/// Accumulates stream bytes and yields whole frames.
///
/// Bytes of an incomplete frame stay buffered until more data arrives.
pub struct Decoder {
    buffer: BytesMut,
    connection_codec: Option<Arc<dyn ConnectionCodec>>,
}

impl Decoder {
    pub fn new() -> Self {
        Self {
            buffer: BytesMut::with_capacity(8192),
            connection_codec: None,
        }
    }

    /// Codec applied to TBRemoting frames decoded as requests or responses.
    pub fn with_connection_codec(mut self, codec: Arc<dyn ConnectionCodec>) -> Self {
        self.connection_codec = Some(codec);
        self
    }

    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);
    }

    pub fn extend_bytes(&mut self, data: Bytes) {
        self.buffer.extend_from_slice(&data);
    }

    /// Read target for transports that fill the buffer directly.
    pub fn buffer_mut(&mut self) -> &mut BytesMut {
        &mut self.buffer
    }

    /// Decodes the next frame into `cmd`, reusing its allocations.
    ///
    /// Returns `Ok(false)` when a whole frame is not yet buffered; `cmd` is
    /// left untouched in that case.
    pub fn decode_into(&mut self, cmd: &mut Command) -> Result<bool, ProtocolError> {
        if self.buffer.is_empty() {
            return Ok(false);
        }
        match cmd.read(&self.buffer) {
            Ok(n) => {
                let _ = self.buffer.split_to(n);
                Ok(true)
            }
            Err(ProtocolError::NotEnough) => Ok(false),
            Err(e) => Err(e),
        }
    }

    pub fn decode_command(&mut self) -> Result<Option<Command>, ProtocolError> {
        let mut cmd = Command::new();
        Ok(self.decode_into(&mut cmd)?.then_some(cmd))
    }

    pub fn decode_request(&mut self) -> Result<Option<Request>, ProtocolError> {
        Ok(self.decode_command()?.map(|cmd| {
            let mut req = Request::from_command(cmd);
            req.set_connection_codec(self.connection_codec.clone());
            req.resolve_tb_context();
            req
        }))
    }

    pub fn decode_response(&mut self) -> Result<Option<Response>, ProtocolError> {
        Ok(self.decode_command()?.map(|cmd| {
            let mut res = Response::from_command(cmd);
            res.set_connection_codec(self.connection_codec.clone());
            res.resolve_tb_context();
            res
        }))
    }

    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Hands over the bytes not yet consumed by a decoded frame.
    pub fn take_remaining(&mut self) -> BytesMut {
        self.buffer.split()
    }
}

impl Default for Decoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{CmdType, Proto, Status};
    use crate::header::HeaderMap;

    #[test]
    fn test_encoder_decoder() {
        let mut req = Request::new();
        req.set_request_id(1).set_header("service", "echo").set_content(b"ping");
        let encoded = Encoder::encode_request(&mut req).unwrap();

        let mut decoder = Decoder::new();
        decoder.extend(&encoded);
        let decoded = decoder.decode_request().unwrap().unwrap();
        assert_eq!(decoded.request_id(), 1);
        assert_eq!(decoded.headers().get("service"), Some("echo"));
        assert_eq!(decoded.content(), b"ping");
        assert!(decoder.is_empty());
    }

    #[test]
    fn test_partial_frame_decoding() {
        let mut res = Response::new();
        res.set_request_id(4).set_content(b"0123456789");
        let encoded = Encoder::encode_response(&mut res).unwrap();

        let mut decoder = Decoder::new();
        decoder.extend(&encoded[..7]);
        assert!(decoder.decode_response().unwrap().is_none());
        assert_eq!(decoder.buffered(), 7);

        decoder.extend(&encoded[7..]);
        let decoded = decoder.decode_response().unwrap().unwrap();
        assert_eq!(decoded.request_id(), 4);
        assert_eq!(decoded.status(), Status::SUCCESS);
        assert_eq!(decoder.buffered(), 0);
    }

    #[test]
    fn test_multiple_frames_in_one_chunk() {
        let mut decoder = Decoder::new();
        for id in 0..3u32 {
            let mut req = Request::new();
            req.set_request_id(id);
            decoder.extend_bytes(Encoder::encode_request(&mut req).unwrap().freeze());
        }
        let mut cmd = Command::new();
        for id in 0..3u32 {
            assert!(decoder.decode_into(&mut cmd).unwrap());
            assert_eq!(cmd.request_id(), id);
        }
        assert!(!decoder.decode_into(&mut cmd).unwrap());
    }

    #[test]
    fn test_malformed_frame() {
        let mut decoder = Decoder::new();
        decoder.extend(&[0x09, 0, 0, 0]);
        assert_eq!(
            decoder.decode_command().unwrap_err(),
            ProtocolError::MalformedProto(0x09)
        );
    }

    #[test]
    fn test_take_remaining() {
        let mut oneway = Request::new();
        oneway.set_cmd_type(CmdType::REQUEST_ONEWAY).set_proto(Proto::BoltV2);
        let encoded = Encoder::encode_request(&mut oneway).unwrap();

        let mut decoder = Decoder::new();
        decoder.extend(&encoded);
        decoder.extend(b"tail");
        assert!(decoder.decode_request().unwrap().unwrap().is_oneway());
        assert_eq!(&decoder.take_remaining()[..], b"tail");
        assert!(decoder.is_empty());
    }

    #[test]
    fn test_decoder_default() {
        let decoder = Decoder::default();
        assert_eq!(decoder.buffered(), 0);
    }
}
