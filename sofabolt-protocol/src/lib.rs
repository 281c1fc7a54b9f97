//! # sofabolt-protocol
//!
//! Wire codec for the BOLT RPC protocol.
//!
//! This crate provides:
//! - Bit-exact encode/decode of BOLTv1, BOLTv2 and TBRemoting frames
//! - Ordered header maps with a fast path for the well-known keys
//! - Request/Response views over the unified [`Command`] frame
//! - An incremental [`Decoder`] for stream transports

pub mod buffer;
pub mod codec;
pub mod command;
pub mod error;
pub mod fast_header;
pub mod header;
pub mod request;
pub mod response;

pub use buffer::Buffer;
pub use codec::{Decoder, Encoder};
pub use command::{
    CmdCode, CmdType, Codec, Command, Proto, Status, Version, CLASS_REQUEST, CLASS_RESPONSE,
};
pub use error::ProtocolError;
pub use fast_header::FastSimpleMap;
pub use header::{HeaderMap, SimpleMap};
pub use request::{ConnectionCodec, Request, TbContext};
pub use response::Response;

/// Header map type carried by every [`Command`].
pub type Headers = FastSimpleMap;

/// Default port of a BOLT server.
pub const DEFAULT_PORT: u16 = 12200;
