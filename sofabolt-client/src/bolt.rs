//! BOLT framing and response correlation on top of [`ClientConn`].
//!
//! [`ClientConn`]: crate::conn::ClientConn

use std::collections::HashMap;
use std::sync::Arc;

use bytes::BytesMut;
use parking_lot::Mutex;
use sofabolt_conn::{derive_response, Handler, HandlerFuture, ResponseWriter, WriteHandle};
use sofabolt_protocol::{ConnectionCodec, Decoder, ProtocolError, Request, Response};
use tracing::debug;

use crate::conn::{Dispatcher, FrameCodec};
use crate::error::ClientError;
use crate::invoke::InvokeContext;

/// A decoded BOLT frame as seen by a client.
#[derive(Debug, Clone)]
pub enum BoltFrame {
    /// Sent by the peer, to be served by the local handler.
    Request(Request),
    Response(Response),
}

#[derive(Clone, Default)]
pub struct BoltCodec {
    connection_codec: Option<Arc<dyn ConnectionCodec>>,
}

impl BoltCodec {
    pub fn new(connection_codec: Option<Arc<dyn ConnectionCodec>>) -> Self {
        Self { connection_codec }
    }

    pub fn encode_request(&self, req: &mut Request, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        if req.connection_codec().is_none() && self.connection_codec.is_some() {
            req.set_connection_codec(self.connection_codec.clone());
        }
        req.write(dst)
    }
}

impl FrameCodec for BoltCodec {
    type Frame = BoltFrame;

    fn encode(&self, frame: &mut BoltFrame, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        match frame {
            BoltFrame::Request(req) => self.encode_request(req, dst),
            BoltFrame::Response(res) => res.write(dst),
        }
    }

    fn decode(&self, src: &mut Decoder) -> Result<Option<BoltFrame>, ProtocolError> {
        let Some(cmd) = src.decode_command()? else {
            return Ok(None);
        };
        let frame = if cmd.is_request() {
            let mut req = Request::from_command(cmd);
            req.set_connection_codec(self.connection_codec.clone());
            req.resolve_tb_context();
            BoltFrame::Request(req)
        } else {
            let mut res = Response::from_command(cmd);
            res.set_connection_codec(self.connection_codec.clone());
            res.resolve_tb_context();
            BoltFrame::Response(res)
        };
        Ok(Some(frame))
    }
}

/// Calls awaiting a response, keyed by request id.
#[derive(Debug, Default)]
pub struct PendingTable {
    calls: Mutex<HashMap<u32, InvokeContext>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `ctx`, handing it back if its id is already pending.
    pub fn insert(&self, ctx: InvokeContext) -> Result<(), InvokeContext> {
        let mut calls = self.calls.lock();
        if calls.contains_key(&ctx.request_id()) {
            return Err(ctx);
        }
        calls.insert(ctx.request_id(), ctx);
        Ok(())
    }

    pub fn remove(&self, id: u32) -> Option<InvokeContext> {
        self.calls.lock().remove(&id)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.calls.lock().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.lock().is_empty()
    }

    /// Removes every pending call.
    pub fn drain(&self) -> Vec<InvokeContext> {
        self.calls.lock().drain().map(|(_, ctx)| ctx).collect()
    }
}

/// Completes pending calls from responses and serves peer requests.
///
/// Peer requests get their own task by default. Without async dispatch the
/// handler runs on the read loop and the next frame waits for it.
pub struct BoltDispatcher {
    pending: Arc<PendingTable>,
    handler: Option<Arc<dyn Handler>>,
    async_dispatch: bool,
}

impl BoltDispatcher {
    pub fn new(pending: Arc<PendingTable>, handler: Option<Arc<dyn Handler>>) -> Self {
        Self {
            pending,
            handler,
            async_dispatch: true,
        }
    }

    pub fn with_async_dispatch(mut self, enabled: bool) -> Self {
        self.async_dispatch = enabled;
        self
    }

    pub fn pending(&self) -> &Arc<PendingTable> {
        &self.pending
    }
}

impl Dispatcher<BoltFrame> for BoltDispatcher {
    fn dispatch(&self, writer: &WriteHandle, frame: BoltFrame) -> Option<HandlerFuture> {
        match frame {
            BoltFrame::Response(res) => {
                match self.pending.remove(res.request_id()) {
                    Some(ctx) => ctx.complete(Ok(res)),
                    None => debug!("Dropping response {} with no pending call", res.request_id()),
                }
                None
            }
            BoltFrame::Request(req) => {
                let Some(handler) = &self.handler else {
                    debug!("Dropping request {}: no handler", req.request_id());
                    return None;
                };
                let rw = ResponseWriter::new(derive_response(&req), writer.clone(), false);
                let work = handler.serve(rw, req);
                if !self.async_dispatch {
                    return Some(work);
                }
                tokio::spawn(work);
                None
            }
        }
    }

    fn on_disconnect(&self, err: &ClientError) {
        let calls = self.pending.drain();
        if !calls.is_empty() {
            debug!("Failing {} pending calls: {}", calls.len(), err);
        }
        for ctx in calls {
            ctx.complete(Err(err.clone()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sofabolt_conn::ConnError;
    use sofabolt_protocol::{CmdCode, CmdType, HeaderMap};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_codec_splits_requests_and_responses() {
        let codec = BoltCodec::default();
        let mut buf = BytesMut::new();

        let mut req = Request::new();
        req.set_request_id(1).set_header("service", "svc");
        codec.encode(&mut BoltFrame::Request(req), &mut buf).unwrap();
        let mut res = Response::new();
        res.set_request_id(2).set_content(b"done");
        codec.encode(&mut BoltFrame::Response(res), &mut buf).unwrap();
        buf.extend_from_slice(&[0x01]);
        let mut decoder = Decoder::new();
        decoder.extend(&buf);

        match codec.decode(&mut decoder).unwrap() {
            Some(BoltFrame::Request(r)) => {
                assert_eq!(r.request_id(), 1);
                assert_eq!(r.headers().get("service"), Some("svc"));
            }
            other => panic!("unexpected frame {:?}", other),
        }
        match codec.decode(&mut decoder).unwrap() {
            Some(BoltFrame::Response(r)) => assert_eq!(r.content(), b"done"),
            other => panic!("unexpected frame {:?}", other),
        }
        assert!(codec.decode(&mut decoder).unwrap().is_none());
        assert_eq!(decoder.buffered(), 1);
    }

    #[test]
    fn test_codec_rejects_bad_type() {
        let codec = BoltCodec::default();
        let mut decoder = Decoder::new();
        decoder.extend(&[0x01, 0x07, 0, 0]);
        assert_eq!(
            codec.decode(&mut decoder).unwrap_err(),
            ProtocolError::MalformedType(0x07)
        );
    }

    #[test]
    fn test_pending_table() {
        let table = PendingTable::new();
        let (ctx, _rx) = InvokeContext::channel(5, CmdCode::REQUEST, Duration::ZERO);
        table.insert(ctx).unwrap();
        let (dup, _rx2) = InvokeContext::channel(5, CmdCode::REQUEST, Duration::ZERO);
        assert!(table.insert(dup).is_err());
        assert!(table.contains(5));
        assert_eq!(table.len(), 1);
        assert!(table.remove(5).is_some());
        assert!(table.is_empty());
    }

    #[tokio::test]
    async fn test_dispatch_completes_matching_call() {
        let pending = Arc::new(PendingTable::new());
        let dispatcher = BoltDispatcher::new(pending.clone(), None);
        let writer = WriteHandle::closed(ConnError::WriterClosed);

        let (ctx, rx) = InvokeContext::channel(9, CmdCode::REQUEST, Duration::ZERO);
        pending.insert(ctx).unwrap();

        let mut stray = Response::new();
        stray.set_request_id(10);
        assert!(dispatcher
            .dispatch(&writer, BoltFrame::Response(stray))
            .is_none());
        assert_eq!(pending.len(), 1);

        let mut res = Response::new();
        res.set_request_id(9);
        assert!(dispatcher.dispatch(&writer, BoltFrame::Response(res)).is_none());
        assert_eq!(rx.await.unwrap().unwrap().request_id(), 9);
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_fails_all_pending() {
        let pending = Arc::new(PendingTable::new());
        let dispatcher = BoltDispatcher::new(pending.clone(), None);
        let mut receivers = Vec::new();
        for id in 0..4 {
            let (ctx, rx) = InvokeContext::channel(id, CmdCode::REQUEST, Duration::ZERO);
            pending.insert(ctx).unwrap();
            receivers.push(rx);
        }

        dispatcher.on_disconnect(&ClientError::Closed);
        for rx in receivers {
            assert!(matches!(rx.await.unwrap(), Err(ClientError::Closed)));
        }
        assert!(pending.is_empty());
    }

    #[test]
    fn test_oneway_request_is_a_request_frame() {
        let codec = BoltCodec::default();
        let mut req = Request::new();
        req.set_cmd_type(CmdType::REQUEST_ONEWAY);
        let mut buf = BytesMut::new();
        codec.encode(&mut BoltFrame::Request(req), &mut buf).unwrap();
        let mut decoder = Decoder::new();
        decoder.extend(&buf);
        assert!(matches!(
            codec.decode(&mut decoder).unwrap(),
            Some(BoltFrame::Request(_))
        ));
    }

    fn counting_dispatcher(async_dispatch: bool) -> (BoltDispatcher, Arc<AtomicUsize>) {
        let served = Arc::new(AtomicUsize::new(0));
        let counter = served.clone();
        let handler = move |_rw: ResponseWriter, _req: Request| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        };
        let dispatcher = BoltDispatcher::new(Arc::new(PendingTable::new()), Some(Arc::new(handler)))
            .with_async_dispatch(async_dispatch);
        (dispatcher, served)
    }

    #[tokio::test]
    async fn test_inline_dispatch_hands_back_work() {
        let (dispatcher, served) = counting_dispatcher(false);
        let writer = WriteHandle::closed(ConnError::WriterClosed);

        let work = dispatcher
            .dispatch(&writer, BoltFrame::Request(Request::new()))
            .expect("inline work");
        assert_eq!(served.load(Ordering::SeqCst), 0);
        work.await;
        assert_eq!(served.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_async_dispatch_spawns_handler() {
        let (dispatcher, served) = counting_dispatcher(true);
        let writer = WriteHandle::closed(ConnError::WriterClosed);

        assert!(dispatcher
            .dispatch(&writer, BoltFrame::Request(Request::new()))
            .is_none());
        for _ in 0..100 {
            if served.load(Ordering::SeqCst) == 1 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("spawned handler did not run");
    }
}
