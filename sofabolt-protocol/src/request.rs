//! Request view over a [`Command`].

use std::fmt;
use std::sync::Arc;

use bytes::BytesMut;

use crate::command::{CmdCode, CmdType, Codec, Command, Proto, Status, Version};
use crate::error::ProtocolError;
use crate::Headers;

/// Decoded TBRemoting connection object.
///
/// Only the request id is interpreted; the rest of the legacy object stays
/// inside the codec that produced it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TbContext {
    pub id: i64,
}

/// Decodes and encodes the opaque TBRemoting connection blob.
///
/// The blob format (a Hessian object graph) is owned by the implementor.
pub trait ConnectionCodec: Send + Sync {
    fn decode(&self, blob: &[u8]) -> Result<TbContext, ProtocolError>;

    fn encode(&self, ctx: &TbContext, dst: &mut Vec<u8>) -> Result<(), ProtocolError>;
}

/// An inbound or outbound request frame.
#[derive(Clone)]
pub struct Request {
    command: Command,
    tb_context: Option<TbContext>,
    connection_codec: Option<Arc<dyn ConnectionCodec>>,
}

impl Request {
    /// BOLTv1 two-way request.
    pub fn new() -> Self {
        let mut command = Command::new();
        command
            .set_proto(Proto::BoltV1)
            .set_cmd_type(CmdType::REQUEST)
            .set_cmdcode(CmdCode::REQUEST);
        Self {
            command,
            tb_context: None,
            connection_codec: None,
        }
    }

    /// BOLTv1 heartbeat request.
    pub fn heartbeat() -> Self {
        let mut req = Self::new();
        req.set_cmdcode(CmdCode::HEARTBEAT);
        req
    }

    pub fn from_command(command: Command) -> Self {
        Self {
            command,
            tb_context: None,
            connection_codec: None,
        }
    }

    /// Attaches the codec used to resolve TBRemoting request ids.
    pub fn with_connection_codec(mut self, codec: Arc<dyn ConnectionCodec>) -> Self {
        self.connection_codec = Some(codec);
        self
    }

    pub fn set_connection_codec(&mut self, codec: Option<Arc<dyn ConnectionCodec>>) -> &mut Self {
        self.connection_codec = codec;
        self
    }

    pub fn connection_codec(&self) -> Option<Arc<dyn ConnectionCodec>> {
        self.connection_codec.clone()
    }

    pub fn command(&self) -> &Command {
        &self.command
    }

    pub fn command_mut(&mut self) -> &mut Command {
        &mut self.command
    }

    pub fn into_command(self) -> Command {
        self.command
    }

    pub fn tb_context(&self) -> Option<&TbContext> {
        self.tb_context.as_ref()
    }

    pub fn set_tb_context(&mut self, ctx: TbContext) -> &mut Self {
        self.tb_context = Some(ctx);
        self
    }

    fn is_tb(&self) -> bool {
        self.command.proto() == Proto::TbRemoting
    }

    pub fn request_id(&self) -> u32 {
        match (&self.tb_context, self.is_tb()) {
            (Some(ctx), true) => ctx.id as u32,
            _ => self.command.request_id(),
        }
    }

    pub fn set_request_id(&mut self, id: u32) -> &mut Self {
        match (&mut self.tb_context, self.command.proto() == Proto::TbRemoting) {
            (Some(ctx), true) => ctx.id = i64::from(id),
            _ => {
                self.command.set_request_id(id);
            }
        }
        self
    }

    /// No response is expected for this request.
    pub fn is_oneway(&self) -> bool {
        if self.is_tb() {
            self.command.cmd_type() == CmdType::TB_ONEWAY
        } else {
            self.command.cmd_type() == CmdType::REQUEST_ONEWAY
        }
    }

    pub fn is_heartbeat(&self) -> bool {
        self.command.cmdcode() == CmdCode::HEARTBEAT
    }

    /// Decodes one frame; see [`Command::read`].
    ///
    /// A TBRemoting blob that fails to decode yields a default context.
    pub fn read(&mut self, src: &[u8]) -> Result<usize, ProtocolError> {
        let n = self.command.read(src)?;
        self.resolve_tb_context();
        Ok(n)
    }

    /// Re-decodes the TBRemoting context from the connection blob.
    pub fn resolve_tb_context(&mut self) {
        self.tb_context = None;
        if !self.is_tb() {
            return;
        }
        if let Some(codec) = &self.connection_codec {
            self.tb_context = Some(codec.decode(self.command.connection()).unwrap_or_default());
        }
    }

    /// Encodes the frame, re-encoding the TBRemoting blob from the context
    /// first.
    pub fn write(&mut self, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        if self.is_tb() {
            if let (Some(codec), Some(ctx)) = (&self.connection_codec, &self.tb_context) {
                let mut blob = Vec::new();
                codec.encode(ctx, &mut blob)?;
                self.command.set_connection(&blob);
            }
        }
        self.command.write(dst)
    }

    /// Resets every field except proto, type and cmdcode.
    pub fn reset(&mut self) {
        let proto = self.command.proto();
        let typ = self.command.cmd_type();
        let cmdcode = self.command.cmdcode();
        self.command.reset();
        self.command
            .set_proto(proto)
            .set_cmd_type(typ)
            .set_cmdcode(cmdcode);
        self.tb_context = None;
    }

    pub fn copy_to(&self, dst: &mut Request) {
        self.command.copy_to(&mut dst.command);
        dst.tb_context = self.tb_context;
        dst.connection_codec.clone_from(&self.connection_codec);
    }

    pub fn size(&self) -> usize {
        self.command.size()
    }

    pub fn proto(&self) -> Proto {
        self.command.proto()
    }
    pub fn ver1(&self) -> Version {
        self.command.ver1()
    }
    pub fn cmd_type(&self) -> CmdType {
        self.command.cmd_type()
    }
    pub fn cmdcode(&self) -> CmdCode {
        self.command.cmdcode()
    }
    pub fn ver2(&self) -> u8 {
        self.command.ver2()
    }
    pub fn codec(&self) -> Codec {
        self.command.codec()
    }
    pub fn switc(&self) -> u8 {
        self.command.switc()
    }
    pub fn timeout(&self) -> u32 {
        self.command.timeout()
    }
    pub fn status(&self) -> Status {
        self.command.status()
    }
    pub fn connection(&self) -> &[u8] {
        self.command.connection()
    }
    pub fn class(&self) -> &[u8] {
        self.command.class()
    }
    pub fn headers(&self) -> &Headers {
        self.command.headers()
    }
    pub fn headers_mut(&mut self) -> &mut Headers {
        self.command.headers_mut()
    }
    pub fn content(&self) -> &[u8] {
        self.command.content()
    }

    pub fn set_proto(&mut self, p: Proto) -> &mut Self {
        self.command.set_proto(p);
        self
    }
    pub fn set_ver1(&mut self, v: Version) -> &mut Self {
        self.command.set_ver1(v);
        self
    }
    pub fn set_cmd_type(&mut self, t: CmdType) -> &mut Self {
        self.command.set_cmd_type(t);
        self
    }
    pub fn set_cmdcode(&mut self, c: CmdCode) -> &mut Self {
        self.command.set_cmdcode(c);
        self
    }
    pub fn set_ver2(&mut self, v: u8) -> &mut Self {
        self.command.set_ver2(v);
        self
    }
    pub fn set_codec(&mut self, c: Codec) -> &mut Self {
        self.command.set_codec(c);
        self
    }
    pub fn set_switc(&mut self, s: u8) -> &mut Self {
        self.command.set_switc(s);
        self
    }
    pub fn set_timeout(&mut self, t: u32) -> &mut Self {
        self.command.set_timeout(t);
        self
    }
    pub fn set_connection(&mut self, b: &[u8]) -> &mut Self {
        self.command.set_connection(b);
        self
    }
    pub fn set_class(&mut self, b: &[u8]) -> &mut Self {
        self.command.set_class(b);
        self
    }
    pub fn set_content(&mut self, b: &[u8]) -> &mut Self {
        self.command.set_content(b);
        self
    }
    pub fn set_header(&mut self, key: &str, value: &str) -> &mut Self {
        self.command.set_header(key, value);
        self
    }
}

impl Default for Request {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("command", &self.command)
            .field("tb_context", &self.tb_context)
            .finish()
    }
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.command.fmt(f)
    }
}

impl From<Command> for Request {
    fn from(command: Command) -> Self {
        Request::from_command(command)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Blob holding the id as 8 big-endian bytes.
    pub(crate) struct FixedIdCodec;

    impl ConnectionCodec for FixedIdCodec {
        fn decode(&self, blob: &[u8]) -> Result<TbContext, ProtocolError> {
            let raw: [u8; 8] = blob
                .try_into()
                .map_err(|_| ProtocolError::Connection("bad blob".into()))?;
            Ok(TbContext {
                id: i64::from_be_bytes(raw),
            })
        }

        fn encode(&self, ctx: &TbContext, dst: &mut Vec<u8>) -> Result<(), ProtocolError> {
            dst.extend_from_slice(&ctx.id.to_be_bytes());
            Ok(())
        }
    }

    #[test]
    fn test_defaults() {
        let req = Request::new();
        assert_eq!(req.proto(), Proto::BoltV1);
        assert_eq!(req.cmd_type(), CmdType::REQUEST);
        assert_eq!(req.cmdcode(), CmdCode::REQUEST);
        assert!(req.command().is_request());
        assert!(!req.is_oneway());
        assert!(Request::heartbeat().is_heartbeat());
    }

    #[test]
    fn test_reset_keeps_routing_fields() {
        let mut req = Request::new();
        req.set_proto(Proto::BoltV2)
            .set_cmd_type(CmdType::REQUEST_ONEWAY)
            .set_request_id(10)
            .set_content(b"abc");
        req.reset();
        assert_eq!(req.proto(), Proto::BoltV2);
        assert_eq!(req.cmd_type(), CmdType::REQUEST_ONEWAY);
        assert_eq!(req.request_id(), 0);
        assert!(req.content().is_empty());
    }

    #[test]
    fn test_tb_remoting_request_id_through_codec() {
        let codec: Arc<dyn ConnectionCodec> = Arc::new(FixedIdCodec);
        let mut req = Request::new().with_connection_codec(codec.clone());
        req.set_proto(Proto::TbRemoting)
            .set_cmd_type(CmdType::TB_TWOWAY)
            .set_cmdcode(CmdCode::TR_REQUEST)
            .set_tb_context(TbContext::default())
            .set_request_id(77)
            .set_content(b"body");
        assert_eq!(req.request_id(), 77);
        assert_eq!(req.command().request_id(), 0);

        let mut buf = BytesMut::new();
        req.write(&mut buf).unwrap();
        assert_eq!(req.connection(), &77i64.to_be_bytes());

        let mut back = Request::new().with_connection_codec(codec);
        assert_eq!(back.read(&buf).unwrap(), buf.len());
        assert_eq!(back.request_id(), 77);
        assert_eq!(back.content(), b"body");
    }

    #[test]
    fn test_tb_remoting_bad_blob_defaults_context() {
        let mut cmd = Command::new();
        cmd.set_proto(Proto::TbRemoting)
            .set_cmd_type(CmdType::TB_ONEWAY)
            .set_connection(b"xx");
        let mut buf = BytesMut::new();
        cmd.write(&mut buf).unwrap();

        let mut req = Request::new().with_connection_codec(Arc::new(FixedIdCodec));
        req.read(&buf).unwrap();
        assert_eq!(req.tb_context(), Some(&TbContext::default()));
        assert_eq!(req.request_id(), 0);
        assert!(req.is_oneway());
    }

    #[test]
    fn test_tb_remoting_without_codec_uses_header_id() {
        let mut req = Request::new();
        req.set_proto(Proto::TbRemoting).set_request_id(5);
        assert!(req.tb_context().is_none());
        assert_eq!(req.request_id(), 5);
    }
}
