//! Response view over a [`Command`].

use std::fmt;
use std::sync::Arc;

use bytes::BytesMut;

use crate::command::{CmdCode, CmdType, Codec, Command, Proto, Status, Version};
use crate::error::ProtocolError;
use crate::request::{ConnectionCodec, Request, TbContext};
use crate::Headers;

/// An inbound or outbound response frame.
#[derive(Clone)]
pub struct Response {
    command: Command,
    tb_context: Option<TbContext>,
    connection_codec: Option<Arc<dyn ConnectionCodec>>,
}

impl Response {
    /// BOLTv1 response with success status.
    pub fn new() -> Self {
        let mut command = Command::new();
        command
            .set_proto(Proto::BoltV1)
            .set_cmd_type(CmdType::RESPONSE)
            .set_cmdcode(CmdCode::RESPONSE);
        Self {
            command,
            tb_context: None,
            connection_codec: None,
        }
    }

    pub fn from_command(command: Command) -> Self {
        Self {
            command,
            tb_context: None,
            connection_codec: None,
        }
    }

    pub fn with_connection_codec(mut self, codec: Arc<dyn ConnectionCodec>) -> Self {
        self.connection_codec = Some(codec);
        self
    }

    pub fn set_connection_codec(&mut self, codec: Option<Arc<dyn ConnectionCodec>>) -> &mut Self {
        self.connection_codec = codec;
        self
    }

    /// Copies the correlation fields of `req` and marks the frame as a
    /// response.
    pub fn derive(&mut self, req: &Request) -> &mut Self {
        let src = req.command();
        self.command
            .set_proto(src.proto())
            .set_ver1(src.ver1())
            .set_cmd_type(CmdType::RESPONSE)
            .set_cmdcode(CmdCode::RESPONSE)
            .set_ver2(src.ver2())
            .set_request_id(src.request_id())
            .set_codec(src.codec())
            .set_switc(src.switc())
            .set_timeout(src.timeout())
            .set_status(src.status());
        self.tb_context = req.tb_context().copied();
        if self.connection_codec.is_none() {
            self.connection_codec = req.connection_codec();
        }
        self.command.set_connection(req.connection());
        self
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

    /// Decodes one frame; see [`Command::read`].
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

    pub fn reset(&mut self) {
        self.command.reset();
        self.tb_context = None;
    }

    pub fn copy_to(&self, dst: &mut Response) {
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
    pub fn codec(&self) -> Codec {
        self.command.codec()
    }
    pub fn switc(&self) -> u8 {
        self.command.switc()
    }
    pub fn status(&self) -> Status {
        self.command.status()
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
    pub fn set_cmdcode(&mut self, c: CmdCode) -> &mut Self {
        self.command.set_cmdcode(c);
        self
    }
    pub fn set_codec(&mut self, c: Codec) -> &mut Self {
        self.command.set_codec(c);
        self
    }
    pub fn set_status(&mut self, s: Status) -> &mut Self {
        self.command.set_status(s);
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

impl Default for Response {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("command", &self.command)
            .field("tb_context", &self.tb_context)
            .finish()
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.command.fmt(f)
    }
}

impl From<Command> for Response {
    fn from(command: Command) -> Self {
        Response::from_command(command)
    }
}
