//! The unified BOLT frame.
//!
//! BOLTv1 request (22 byte header):
//!
//! ```text
//! 0     1     2           4     5                       9     10                      14
//! +-----+-----+-----+-----+-----+-----+-----+-----+-----+-----+-----+-----+-----+-----+
//! |proto| type| cmdcode   |ver2 |   requestId           |codec|        timeout        |
//! +-----+-----+-----+-----+-----+-----+-----+-----+-----+-----+-----+-----+-----+-----+
//! |classLen   |headerLen  | contentLen            | class + header + content ...
//! +-----------+-----------+-----------------------+
//! ```
//!
//! BOLTv1 responses replace `timeout` with a 2 byte `respstatus` (20 byte
//! header). BOLTv2 inserts `ver1` after `proto` and a `switch` byte after
//! `codec` (24 byte request header, 22 byte response header) and appends a
//! big-endian CRC32 trailer when `switch > 0`.
//!
//! TBRemoting (14 byte header):
//!
//! ```text
//! +-----+-------+-----+-----+--------+-------------+--------+-------------+
//! |proto|cmdcode|codec|type |reserved| connLen(4)  |classLen| contentLen(4)|
//! +-----+-------+-----+-----+--------+-------------+--------+-------------+
//! | connection + class + content ...
//! ```

use std::fmt;

use bytes::{BufMut, BytesMut};

use crate::buffer::Buffer;
use crate::error::ProtocolError;
use crate::header::HeaderMap;
use crate::Headers;

pub const CLASS_REQUEST: &str = "com.alipay.sofa.rpc.core.request.SofaRequest";
pub const CLASS_RESPONSE: &str = "com.alipay.sofa.rpc.core.response.SofaResponse";

pub const BOLT_V1_REQUEST_HEADER_LEN: usize = 22;
pub const BOLT_V1_RESPONSE_HEADER_LEN: usize = 20;
pub const BOLT_V2_REQUEST_HEADER_LEN: usize = 24;
pub const BOLT_V2_RESPONSE_HEADER_LEN: usize = 22;
pub const TB_REMOTING_HEADER_LEN: usize = 14;
pub const CRC32_LEN: usize = 4;

/// Wire layout selector, always the first byte of a frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Proto {
    #[default]
    BoltV1,
    BoltV2,
    TbRemoting,
}

impl Proto {
    pub fn as_u8(self) -> u8 {
        match self {
            Proto::BoltV1 => 0x01,
            Proto::BoltV2 => 0x02,
            Proto::TbRemoting => 0x0d,
        }
    }

    /// Parses a proto byte. `0` is accepted as BOLTv1.
    pub fn from_u8(v: u8) -> Result<Self, ProtocolError> {
        match v {
            0x00 | 0x01 => Ok(Proto::BoltV1),
            0x02 => Ok(Proto::BoltV2),
            0x0d => Ok(Proto::TbRemoting),
            other => Err(ProtocolError::MalformedProto(other)),
        }
    }
}

impl TryFrom<u8> for Proto {
    type Error = ProtocolError;

    fn try_from(v: u8) -> Result<Self, Self::Error> {
        Proto::from_u8(v)
    }
}

impl fmt::Display for Proto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Proto::BoltV1 => f.write_str("boltv1"),
            Proto::BoltV2 => f.write_str("boltv2"),
            Proto::TbRemoting => f.write_str("tbremoting"),
        }
    }
}

/// BOLTv2 `ver1` byte.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Version(pub u8);

impl Version {
    pub const BOLT_V1: Self = Self(1);
    pub const BOLT_V2: Self = Self(2);
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Version::BOLT_V1 => f.write_str("boltv1"),
            Version::BOLT_V2 => f.write_str("boltv2"),
            _ => f.write_str("unknown"),
        }
    }
}

/// Frame type. TBRemoting reuses the numeric values with its own meaning.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CmdType(pub u8);

impl CmdType {
    pub const RESPONSE: Self = Self(0);
    pub const REQUEST: Self = Self(1);
    pub const REQUEST_ONEWAY: Self = Self(2);
    pub const TB_ONEWAY: Self = Self(1);
    pub const TB_TWOWAY: Self = Self(2);
}

impl fmt::Display for CmdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            CmdType::RESPONSE => f.write_str("response"),
            CmdType::REQUEST => f.write_str("request"),
            CmdType::REQUEST_ONEWAY => f.write_str("oneway"),
            _ => f.write_str("unknown"),
        }
    }
}

/// Command code, namespaced by [`Proto`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct CmdCode(pub u16);

impl CmdCode {
    pub const HEARTBEAT: Self = Self(0);
    pub const REQUEST: Self = Self(1);
    pub const RESPONSE: Self = Self(2);
    pub const TR_HEARTBEAT: Self = Self(0);
    pub const TR_REQUEST: Self = Self(13);
    pub const TR_RESPONSE: Self = Self(14);
}

impl fmt::Display for CmdCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            CmdCode::HEARTBEAT => f.write_str("heartbeat"),
            CmdCode::REQUEST => f.write_str("bolt-req"),
            CmdCode::RESPONSE => f.write_str("bolt-res"),
            CmdCode::TR_REQUEST => f.write_str("tr-req"),
            CmdCode::TR_RESPONSE => f.write_str("tr-res"),
            _ => f.write_str("unknown cmdcode"),
        }
    }
}

/// Serialization tag of `content`. Not interpreted by the codec.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Codec(pub u8);

impl Codec {
    pub const HESSIAN: Self = Self(0);
    pub const HESSIAN2: Self = Self(1);
    pub const TB_HESSIAN1: Self = Self(1);
    pub const TB_HESSIAN2: Self = Self(4);
    pub const PROTOBUF: Self = Self(11);
    pub const JSON: Self = Self(12);
}

impl fmt::Display for Codec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Codec::HESSIAN => f.write_str("hessian"),
            Codec::HESSIAN2 => f.write_str("hessian2"),
            Codec::TB_HESSIAN2 => f.write_str("tbhessian2"),
            Codec::PROTOBUF => f.write_str("protobuf"),
            Codec::JSON => f.write_str("json"),
            _ => f.write_str("unknown"),
        }
    }
}

/// Response status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Status(pub u16);

impl Status {
    pub const SUCCESS: Self = Self(0x00);
    pub const ERROR: Self = Self(0x01);
    pub const SERVER_EXCEPTION: Self = Self(0x02);
    pub const UNKNOWN: Self = Self(0x03);
    pub const SERVER_THREADPOOL_BUSY: Self = Self(0x04);
    pub const ERROR_COMM: Self = Self(0x05);
    pub const NO_PROCESSOR: Self = Self(0x06);
    pub const TIMEOUT: Self = Self(0x07);
    pub const CLIENT_SEND_ERROR: Self = Self(0x08);
    pub const CODEC_EXCEPTION: Self = Self(0x09);
    pub const CONNECTION_CLOSED: Self = Self(0x10);
    pub const SERVER_SERIAL_EXCEPTION: Self = Self(0x11);
    pub const SERVER_DESERIAL_EXCEPTION: Self = Self(0x12);

    pub fn is_success(self) -> bool {
        self == Status::SUCCESS
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match *self {
            Status::SUCCESS => "success",
            Status::ERROR => "error",
            Status::SERVER_EXCEPTION => "server-exception",
            Status::UNKNOWN => "unknown",
            Status::SERVER_THREADPOOL_BUSY => "server-threadpool-busy",
            Status::ERROR_COMM => "error-comm",
            Status::NO_PROCESSOR => "no-processor",
            Status::TIMEOUT => "timeout",
            Status::CLIENT_SEND_ERROR => "client-send-error",
            Status::CODEC_EXCEPTION => "codec-exception",
            Status::CONNECTION_CLOSED => "connection-closed",
            Status::SERVER_SERIAL_EXCEPTION => "server-serial-exception",
            Status::SERVER_DESERIAL_EXCEPTION => "server-deserial-exception",
            Status(other) => return write!(f, "status({})", other),
        };
        f.write_str(name)
    }
}

/// One protocol frame, holding the fields of every layout.
///
/// Buffers are reused across [`Command::read`] calls: `reset` and `read`
/// truncate them without releasing capacity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Command {
    proto: Proto,
    ver1: Version,
    typ: CmdType,
    cmdcode: CmdCode,
    ver2: u8,
    rid: u32,
    codec: Codec,
    switc: u8,
    timeout: u32,
    status: Status,
    reserved: u8,
    connection: Vec<u8>,
    class: Vec<u8>,
    headers: Headers,
    content: Vec<u8>,
    crc32: u32,
}

enum Layout {
    Request,
    Response,
}

fn bolt_layout(typ: CmdType) -> Result<Layout, ProtocolError> {
    match typ {
        CmdType::REQUEST | CmdType::REQUEST_ONEWAY => Ok(Layout::Request),
        CmdType::RESPONSE => Ok(Layout::Response),
        CmdType(other) => Err(ProtocolError::MalformedType(other)),
    }
}

fn check_len(field: &'static str, len: usize, max: usize) -> Result<(), ProtocolError> {
    if len > max {
        return Err(ProtocolError::FieldTooLarge { field, len, max });
    }
    Ok(())
}

impl Command {
    pub fn new() -> Self {
        Self::default()
    }

    /// Restores the zero state, keeping allocated capacity.
    pub fn reset(&mut self) {
        self.proto = Proto::default();
        self.ver1 = Version::default();
        self.typ = CmdType::default();
        self.cmdcode = CmdCode::default();
        self.ver2 = 0;
        self.rid = 0;
        self.codec = Codec::default();
        self.switc = 0;
        self.timeout = 0;
        self.status = Status::default();
        self.reserved = 0;
        self.connection.clear();
        self.class.clear();
        self.headers.clear();
        self.content.clear();
        self.crc32 = 0;
    }

    pub fn is_request(&self) -> bool {
        self.typ == CmdType::REQUEST
            || self.typ == CmdType::REQUEST_ONEWAY
            || (self.proto == Proto::TbRemoting && self.typ == CmdType::TB_ONEWAY)
    }

    pub fn proto(&self) -> Proto {
        self.proto
    }
    pub fn ver1(&self) -> Version {
        self.ver1
    }
    pub fn cmd_type(&self) -> CmdType {
        self.typ
    }
    pub fn cmdcode(&self) -> CmdCode {
        self.cmdcode
    }
    pub fn ver2(&self) -> u8 {
        self.ver2
    }
    pub fn request_id(&self) -> u32 {
        self.rid
    }
    pub fn codec(&self) -> Codec {
        self.codec
    }
    pub fn switc(&self) -> u8 {
        self.switc
    }
    pub fn timeout(&self) -> u32 {
        self.timeout
    }
    pub fn status(&self) -> Status {
        self.status
    }
    pub fn reserved(&self) -> u8 {
        self.reserved
    }
    pub fn connection(&self) -> &[u8] {
        &self.connection
    }
    pub fn class(&self) -> &[u8] {
        &self.class
    }
    pub fn headers(&self) -> &Headers {
        &self.headers
    }
    pub fn headers_mut(&mut self) -> &mut Headers {
        &mut self.headers
    }
    pub fn content(&self) -> &[u8] {
        &self.content
    }
    /// CRC32 trailer read from the wire (BOLTv2 with `switc > 0`).
    pub fn crc32(&self) -> u32 {
        self.crc32
    }

    pub fn set_proto(&mut self, p: Proto) -> &mut Self {
        self.proto = p;
        self
    }
    pub fn set_ver1(&mut self, v: Version) -> &mut Self {
        self.ver1 = v;
        self
    }
    pub fn set_cmd_type(&mut self, t: CmdType) -> &mut Self {
        self.typ = t;
        self
    }
    pub fn set_cmdcode(&mut self, c: CmdCode) -> &mut Self {
        self.cmdcode = c;
        self
    }
    pub fn set_ver2(&mut self, v: u8) -> &mut Self {
        self.ver2 = v;
        self
    }
    pub fn set_request_id(&mut self, id: u32) -> &mut Self {
        self.rid = id;
        self
    }
    pub fn set_codec(&mut self, c: Codec) -> &mut Self {
        self.codec = c;
        self
    }
    pub fn set_switc(&mut self, s: u8) -> &mut Self {
        self.switc = s;
        self
    }
    pub fn set_timeout(&mut self, t: u32) -> &mut Self {
        self.timeout = t;
        self
    }
    pub fn set_status(&mut self, s: Status) -> &mut Self {
        self.status = s;
        self
    }
    pub fn set_connection(&mut self, b: &[u8]) -> &mut Self {
        self.connection.clear();
        self.connection.extend_from_slice(b);
        self
    }
    pub fn set_class(&mut self, b: &[u8]) -> &mut Self {
        self.class.clear();
        self.class.extend_from_slice(b);
        self
    }
    pub fn set_content(&mut self, b: &[u8]) -> &mut Self {
        self.content.clear();
        self.content.extend_from_slice(b);
        self
    }
    pub fn set_header(&mut self, key: &str, value: &str) -> &mut Self {
        self.headers.set(key, value);
        self
    }

    /// Deep copy into `dst`, reusing its buffers.
    pub fn copy_to(&self, dst: &mut Command) {
        dst.proto = self.proto;
        dst.ver1 = self.ver1;
        dst.typ = self.typ;
        dst.cmdcode = self.cmdcode;
        dst.ver2 = self.ver2;
        dst.rid = self.rid;
        dst.codec = self.codec;
        dst.switc = self.switc;
        dst.timeout = self.timeout;
        dst.status = self.status;
        dst.reserved = self.reserved;
        dst.connection.clone_from(&self.connection);
        dst.class.clone_from(&self.class);
        self.headers.copy_to(&mut dst.headers);
        dst.content.clone_from(&self.content);
        dst.crc32 = self.crc32;
    }

    fn has_crc(&self) -> bool {
        self.proto == Proto::BoltV2 && self.switc > 0
    }

    /// Exact number of bytes [`Command::write`] appends. Zero when the
    /// type is not valid for the proto.
    pub fn size(&self) -> usize {
        let body = self.class.len() + self.headers.encoded_len() + self.content.len();
        match self.proto {
            Proto::BoltV1 => match bolt_layout(self.typ) {
                Ok(Layout::Request) => BOLT_V1_REQUEST_HEADER_LEN + body,
                Ok(Layout::Response) => BOLT_V1_RESPONSE_HEADER_LEN + body,
                Err(_) => 0,
            },
            Proto::BoltV2 => {
                let crc = if self.has_crc() { CRC32_LEN } else { 0 };
                match bolt_layout(self.typ) {
                    Ok(Layout::Request) => BOLT_V2_REQUEST_HEADER_LEN + body + crc,
                    Ok(Layout::Response) => BOLT_V2_RESPONSE_HEADER_LEN + body + crc,
                    Err(_) => 0,
                }
            }
            Proto::TbRemoting => {
                TB_REMOTING_HEADER_LEN + self.connection.len() + self.class.len() + self.content.len()
            }
        }
    }

    /// Appends one encoded frame to `dst`.
    pub fn write(&self, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        match self.proto {
            Proto::BoltV1 | Proto::BoltV2 => self.write_bolt(dst),
            Proto::TbRemoting => self.write_tb_remoting(dst),
        }
    }

    fn write_bolt(&self, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        let layout = bolt_layout(self.typ)?;
        let header_len = self.headers.encoded_len();
        check_len("class", self.class.len(), u16::MAX as usize)?;
        check_len("headers", header_len, u16::MAX as usize)?;
        check_len("content", self.content.len(), u32::MAX as usize)?;

        let start = dst.len();
        dst.reserve(self.size());

        dst.put_u8(self.proto.as_u8());
        if self.proto == Proto::BoltV2 {
            dst.put_u8(self.ver1.0);
        }
        dst.put_u8(self.typ.0);
        dst.put_u16(self.cmdcode.0);
        dst.put_u8(self.ver2);
        dst.put_u32(self.rid);
        dst.put_u8(self.codec.0);
        if self.proto == Proto::BoltV2 {
            dst.put_u8(self.switc);
        }
        match layout {
            Layout::Request => dst.put_u32(self.timeout),
            Layout::Response => dst.put_u16(self.status.0),
        }
        dst.put_u16(self.class.len() as u16);
        dst.put_u16(header_len as u16);
        dst.put_u32(self.content.len() as u32);
        dst.put_slice(&self.class);
        self.headers.encode_into(dst);
        dst.put_slice(&self.content);

        if self.has_crc() {
            let sum = crc32fast::hash(&dst[start..]);
            dst.put_u32(sum);
        }
        Ok(())
    }

    fn write_tb_remoting(&self, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        check_len("cmdcode", self.cmdcode.0 as usize, u8::MAX as usize)?;
        check_len("connection", self.connection.len(), u32::MAX as usize)?;
        check_len("class", self.class.len(), u8::MAX as usize)?;
        check_len("content", self.content.len(), u32::MAX as usize)?;

        dst.reserve(self.size());
        dst.put_u8(Proto::TbRemoting.as_u8());
        dst.put_u8(self.cmdcode.0 as u8);
        dst.put_u8(self.codec.0);
        dst.put_u8(self.typ.0);
        dst.put_u8(0);
        dst.put_u32(self.connection.len() as u32);
        dst.put_u8(self.class.len() as u8);
        dst.put_u32(self.content.len() as u32);
        dst.put_slice(&self.connection);
        dst.put_slice(&self.class);
        dst.put_slice(&self.content);
        Ok(())
    }

    /// Decodes one frame from the front of `src`, returning the number of
    /// bytes consumed.
    ///
    /// Fails with [`ProtocolError::NotEnough`] when `src` holds less than a
    /// whole frame; the command is left untouched in that case.
    pub fn read(&mut self, src: &[u8]) -> Result<usize, ProtocolError> {
        let mut buf = Buffer::new(src);
        let proto = Proto::from_u8(buf.get_u8()?)?;
        match proto {
            Proto::BoltV1 | Proto::BoltV2 => self.read_bolt(proto, &mut buf),
            Proto::TbRemoting => self.read_tb_remoting(&mut buf),
        }
    }

    fn read_bolt(&mut self, proto: Proto, buf: &mut Buffer<&[u8]>) -> Result<usize, ProtocolError> {
        let v2 = proto == Proto::BoltV2;
        let ver1 = if v2 { Version(buf.get_u8()?) } else { Version::default() };
        let typ = CmdType(buf.get_u8()?);
        let layout = bolt_layout(typ)?;

        let cmdcode = CmdCode(buf.get_u16()?);
        let ver2 = buf.get_u8()?;
        let rid = buf.get_u32()?;
        let codec = Codec(buf.get_u8()?);
        let switc = if v2 { buf.get_u8()? } else { 0 };
        let (timeout, status) = match layout {
            Layout::Request => (buf.get_u32()?, Status::default()),
            Layout::Response => (0, Status(buf.get_u16()?)),
        };
        let class_len = buf.get_u16()? as usize;
        let header_len = buf.get_u16()? as usize;
        let content_len = buf.get_u32()? as usize;

        let crc_len = if v2 && switc > 0 { CRC32_LEN } else { 0 };
        if buf.remaining() < class_len + header_len + content_len + crc_len {
            return Err(ProtocolError::NotEnough);
        }

        let class = buf.get_slice(class_len)?;
        let header = buf.get_slice(header_len)?;
        let content = buf.get_slice(content_len)?;
        // TODO: verify crc32 against the frame bytes.
        let crc32 = if crc_len > 0 { buf.get_u32()? } else { 0 };

        let mut headers = Headers::default();
        headers.decode(header)?;

        self.headers = headers;
        self.proto = proto;
        self.ver1 = ver1;
        self.typ = typ;
        self.cmdcode = cmdcode;
        self.ver2 = ver2;
        self.rid = rid;
        self.codec = codec;
        self.switc = switc;
        self.timeout = timeout;
        self.status = status;
        self.reserved = 0;
        self.connection.clear();
        self.class.clear();
        self.class.extend_from_slice(class);
        self.content.clear();
        self.content.extend_from_slice(content);
        self.crc32 = crc32;

        Ok(buf.position())
    }

    fn read_tb_remoting(&mut self, buf: &mut Buffer<&[u8]>) -> Result<usize, ProtocolError> {
        let cmdcode = CmdCode(buf.get_u8()? as u16);
        let codec = Codec(buf.get_u8()?);
        let typ = CmdType(buf.get_u8()?);
        let reserved = buf.get_u8()?;
        let conn_len = buf.get_u32()? as usize;
        let class_len = buf.get_u8()? as usize;
        let content_len = buf.get_u32()? as usize;

        if buf.remaining() < conn_len + class_len + content_len {
            return Err(ProtocolError::NotEnough);
        }
        let connection = buf.get_slice(conn_len)?;
        let class = buf.get_slice(class_len)?;
        let content = buf.get_slice(content_len)?;

        self.reset();
        self.proto = Proto::TbRemoting;
        self.cmdcode = cmdcode;
        self.codec = codec;
        self.typ = typ;
        self.reserved = reserved;
        self.connection.extend_from_slice(connection);
        self.class.extend_from_slice(class);
        self.content.extend_from_slice(content);

        Ok(buf.position())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Proto:{},Ver1:{},Type:{},Cmdcode:{},Ver2:{},Rid:{},Codec:{},Switch:{},Timeout:{},Status:{},",
            self.proto,
            self.ver1,
            self.typ,
            self.cmdcode,
            self.ver2,
            self.rid,
            self.codec,
            self.switc,
            self.timeout,
            self.status.0,
        )?;
        write!(
            f,
            "ConnectionLen:{},ClassLen:{},HeaderLen:{},ContentLen:{},",
            self.connection.len(),
            self.class.len(),
            self.headers.encoded_len(),
            self.content.len(),
        )?;
        write!(
            f,
            "Class:{},Connection:{},Headers:{},Content:{},CRC32:{}",
            String::from_utf8_lossy(&self.class),
            hex::encode(&self.connection),
            self.headers,
            hex::encode(&self.content),
            self.crc32,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn encode(cmd: &Command) -> BytesMut {
        let mut buf = BytesMut::new();
        cmd.write(&mut buf).unwrap();
        buf
    }

    fn decode(buf: &[u8]) -> Command {
        let mut cmd = Command::new();
        let n = cmd.read(buf).unwrap();
        assert_eq!(n, buf.len());
        cmd
    }

    #[test]
    fn test_bolt_v1_request_layout() {
        let mut cmd = Command::new();
        cmd.set_proto(Proto::BoltV1)
            .set_cmd_type(CmdType::REQUEST)
            .set_cmdcode(CmdCode::REQUEST)
            .set_ver2(1)
            .set_request_id(0x01020304)
            .set_codec(Codec::HESSIAN2)
            .set_timeout(3000)
            .set_class(b"cls")
            .set_content(b"hi");

        let buf = encode(&cmd);
        let expected: Vec<u8> = vec![
            0x01, 0x01, 0x00, 0x01, 0x01, 0x01, 0x02, 0x03, 0x04, 0x01, 0x00, 0x00, 0x0b, 0xb8,
            0x00, 0x03, 0x00, 0x00, 0x00, 0x00, 0x00, 0x02, b'c', b'l', b's', b'h', b'i',
        ];
        assert_eq!(&buf[..], &expected[..]);
        assert_eq!(cmd.size(), buf.len());

        let back = decode(&buf);
        assert_eq!(back.ver2(), 1);
        assert_eq!(back.request_id(), 0x01020304);
        assert_eq!(back, cmd);
    }

    #[test]
    fn test_bolt_v1_response_layout() {
        let mut cmd = Command::new();
        cmd.set_cmd_type(CmdType::RESPONSE)
            .set_cmdcode(CmdCode::RESPONSE)
            .set_request_id(7)
            .set_status(Status::SERVER_THREADPOOL_BUSY)
            .set_content(b"x");

        let buf = encode(&cmd);
        assert_eq!(buf.len(), BOLT_V1_RESPONSE_HEADER_LEN + 1);
        assert_eq!(&buf[10..12], &[0x00, 0x04]);
        assert_eq!(decode(&buf), cmd);
    }

    #[test]
    fn test_bolt_v2_crc_trailer() {
        let mut cmd = Command::new();
        cmd.set_proto(Proto::BoltV2)
            .set_ver1(Version::BOLT_V2)
            .set_cmd_type(CmdType::REQUEST)
            .set_cmdcode(CmdCode::REQUEST)
            .set_request_id(42)
            .set_switc(1)
            .set_timeout(100)
            .set_header("service", "echo")
            .set_content(b"payload");

        let buf = encode(&cmd);
        assert_eq!(cmd.size(), buf.len());
        let body_end = buf.len() - CRC32_LEN;
        let sum = crc32fast::hash(&buf[..body_end]);
        assert_eq!(&buf[body_end..], &sum.to_be_bytes());

        let back = decode(&buf);
        assert_eq!(back.crc32(), sum);
        assert_eq!(back.headers().service(), Some("echo"));
        assert_eq!(back.content(), b"payload");
    }

    #[test]
    fn test_crc_covers_only_own_frame() {
        let mut cmd = Command::new();
        cmd.set_proto(Proto::BoltV2)
            .set_cmd_type(CmdType::RESPONSE)
            .set_switc(1);

        let mut buf = BytesMut::from(&b"previous"[..]);
        cmd.write(&mut buf).unwrap();
        let frame = &buf[8..];
        let sum = crc32fast::hash(&frame[..frame.len() - CRC32_LEN]);
        assert_eq!(&frame[frame.len() - CRC32_LEN..], &sum.to_be_bytes());
    }

    #[test]
    fn test_bolt_v2_without_switch_has_no_trailer() {
        let mut cmd = Command::new();
        cmd.set_proto(Proto::BoltV2).set_cmd_type(CmdType::RESPONSE);
        let buf = encode(&cmd);
        assert_eq!(buf.len(), BOLT_V2_RESPONSE_HEADER_LEN);
        assert_eq!(decode(&buf).crc32(), 0);
    }

    #[test]
    fn test_tb_remoting_layout() {
        let mut cmd = Command::new();
        cmd.set_proto(Proto::TbRemoting)
            .set_cmdcode(CmdCode::TR_REQUEST)
            .set_codec(Codec::TB_HESSIAN2)
            .set_cmd_type(CmdType::TB_TWOWAY)
            .set_connection(b"conn")
            .set_class(b"c")
            .set_content(b"body");

        let buf = encode(&cmd);
        assert_eq!(buf.len(), TB_REMOTING_HEADER_LEN + 4 + 1 + 4);
        assert_eq!(cmd.size(), buf.len());
        assert_eq!(&buf[..5], &[0x0d, 13, 4, 2, 0]);
        assert_eq!(&buf[14..18], b"conn");

        let back = decode(&buf);
        assert_eq!(back.connection(), b"conn");
        assert!(back.is_request());
        assert_eq!(back, cmd);
    }

    #[test]
    fn test_malformed_proto_and_type() {
        let mut cmd = Command::new();
        assert_eq!(cmd.read(&[0x7f]), Err(ProtocolError::MalformedProto(0x7f)));
        assert_eq!(cmd.read(&[0x01, 0x05]), Err(ProtocolError::MalformedType(5)));
        assert_eq!(cmd.read(&[0x02, 0x02, 0x09]), Err(ProtocolError::MalformedType(9)));

        cmd.set_cmd_type(CmdType(3));
        assert_eq!(
            cmd.write(&mut BytesMut::new()),
            Err(ProtocolError::MalformedType(3))
        );
        assert_eq!(cmd.size(), 0);
    }

    #[test]
    fn test_incomplete_frame_leaves_command_untouched() {
        let mut src = Command::new();
        src.set_cmd_type(CmdType::REQUEST)
            .set_request_id(9)
            .set_header("k", "v")
            .set_content(b"abcdef");
        let buf = encode(&src);

        let mut cmd = Command::new();
        cmd.set_request_id(1);
        for cut in 0..buf.len() {
            assert_eq!(cmd.read(&buf[..cut]), Err(ProtocolError::NotEnough));
            assert_eq!(cmd.request_id(), 1);
        }
        assert_eq!(cmd.read(&buf).unwrap(), buf.len());
        assert_eq!(cmd.request_id(), 9);
    }

    #[test]
    fn test_bad_header_leaves_command_untouched() {
        use crate::header::HeaderMap;

        let mut src = Command::new();
        src.set_cmd_type(CmdType::REQUEST)
            .set_request_id(9)
            .set_header("k", "v")
            .set_content(b"abcdef");
        let mut buf = encode(&src);
        // Key length of the only header pair now overruns the header block.
        let header_start = buf.len() - 6 - 10;
        buf[header_start + 3] = 0x7f;

        let mut cmd = Command::new();
        cmd.set_request_id(1).set_header("keep", "1");
        assert_eq!(cmd.read(&buf), Err(ProtocolError::ParseKey));
        assert_eq!(cmd.request_id(), 1);
        assert_eq!(cmd.headers().get("keep"), Some("1"));
        assert_eq!(cmd.headers().get("k"), None);
    }

    #[test]
    fn test_reuse_across_frames() {
        let mut first = Command::new();
        first
            .set_cmd_type(CmdType::REQUEST)
            .set_class(b"a-long-class-name")
            .set_header("host", "h")
            .set_content(&[1u8; 64]);
        let mut second = Command::new();
        second.set_cmd_type(CmdType::RESPONSE).set_content(b"z");

        let mut buf = encode(&first);
        second.write(&mut buf).unwrap();

        let mut cmd = Command::new();
        let n = cmd.read(&buf).unwrap();
        assert_eq!(cmd, first);
        let capacity = cmd.content.capacity();
        let m = cmd.read(&buf[n..]).unwrap();
        assert_eq!(n + m, buf.len());
        assert_eq!(cmd, second);
        assert!(cmd.headers().is_empty());
        assert_eq!(cmd.content.capacity(), capacity);
    }

    #[test]
    fn test_reset_matches_fresh() {
        let mut cmd = Command::new();
        cmd.set_proto(Proto::BoltV2)
            .set_switc(1)
            .set_status(Status::TIMEOUT)
            .set_header("a", "b")
            .set_connection(b"c")
            .set_content(b"d");
        cmd.reset();
        assert_eq!(cmd, Command::new());
    }

    #[test]
    fn test_copy_to() {
        let mut src = Command::new();
        src.set_proto(Proto::BoltV2)
            .set_request_id(5)
            .set_header("service", "s")
            .set_class(CLASS_REQUEST.as_bytes());
        let mut dst = Command::new();
        dst.set_content(b"stale");
        src.copy_to(&mut dst);
        assert_eq!(dst, src);
    }

    #[test]
    fn test_field_too_large() {
        let mut cmd = Command::new();
        cmd.set_proto(Proto::TbRemoting).set_class(&[b'c'; 300]);
        assert!(matches!(
            cmd.write(&mut BytesMut::new()),
            Err(ProtocolError::FieldTooLarge { field: "class", .. })
        ));
    }

    #[test]
    fn test_is_request() {
        let mut cmd = Command::new();
        assert!(!cmd.is_request());
        cmd.set_cmd_type(CmdType::REQUEST_ONEWAY);
        assert!(cmd.is_request());
        cmd.set_proto(Proto::TbRemoting).set_cmd_type(CmdType::TB_ONEWAY);
        assert!(cmd.is_request());
    }

    #[test]
    fn test_display_dump() {
        let mut cmd = Command::new();
        cmd.set_cmd_type(CmdType::REQUEST)
            .set_cmdcode(CmdCode::HEARTBEAT)
            .set_request_id(3)
            .set_header("host", "h")
            .set_content(b"\x01\xff");
        let s = cmd.to_string();
        assert!(s.starts_with("Proto:boltv1,Ver1:unknown,Type:request,Cmdcode:heartbeat,"));
        assert!(s.contains("Rid:3,"));
        assert!(s.contains("Headers:host=h,"));
        assert!(s.contains("Content:01ff,"));
        assert!(s.ends_with("CRC32:0"));
    }

    #[test]
    fn test_proto_zero_reads_as_v1() {
        let mut cmd = Command::new();
        cmd.set_cmd_type(CmdType::RESPONSE);
        let mut buf = encode(&cmd);
        buf[0] = 0;
        assert_eq!(decode(&buf).proto(), Proto::BoltV1);
    }

    fn arb_command() -> impl Strategy<Value = Command> {
        (
            prop_oneof![Just(Proto::BoltV1), Just(Proto::BoltV2), Just(Proto::TbRemoting)],
            0u8..3,
            any::<u8>(),
            any::<u32>(),
            any::<u8>(),
            0u8..3,
            any::<u32>(),
            any::<u16>(),
            proptest::collection::vec(any::<u8>(), 0..64),
            proptest::collection::vec(("[a-z-]{1,8}", "[a-z0-9]{0,8}"), 0..6),
            proptest::collection::vec(any::<u8>(), 0..256),
        )
            .prop_map(
                |(proto, typ, ver2, rid, codec, switc, timeout, status, class, headers, content)| {
                    let mut cmd = Command::new();
                    cmd.set_proto(proto)
                        .set_cmd_type(CmdType(typ))
                        .set_codec(Codec(codec))
                        .set_content(&content);
                    match proto {
                        Proto::TbRemoting => {
                            cmd.set_cmdcode(CmdCode::TR_REQUEST)
                                .set_class(&class)
                                .set_connection(&rid.to_be_bytes());
                        }
                        _ => {
                            cmd.set_ver2(ver2)
                                .set_request_id(rid)
                                .set_cmdcode(CmdCode(u16::from(typ)))
                                .set_class(&class);
                            if proto == Proto::BoltV2 {
                                cmd.set_ver1(Version::BOLT_V2).set_switc(switc);
                            }
                            if typ == 0 {
                                cmd.set_status(Status(status));
                            } else {
                                cmd.set_timeout(timeout);
                            }
                            for (k, v) in &headers {
                                cmd.set_header(k, v);
                            }
                        }
                    }
                    cmd
                },
            )
    }

    proptest! {
        #[test]
        fn prop_size_matches_write_and_read_back(cmd in arb_command()) {
            let buf = encode(&cmd);
            prop_assert_eq!(cmd.size(), buf.len());

            let mut back = Command::new();
            prop_assert_eq!(back.read(&buf).unwrap(), buf.len());
            let sum = back.crc32();
            let mut expected = cmd.clone();
            expected.crc32 = sum;
            prop_assert_eq!(back, expected);
        }
    }
}
