//! Multiplexed 9P client connection.
//!
//! One transport is split into a sender half and a receiver half, each
//! driven by its own tokio task. Concurrent RPCs are distinguished by tag:
//! the caller's tag is handed a `oneshot::Sender`, stashed in a pending-map,
//! and completed by the receiver task when the matching reply tag comes
//! back. This replaces the intrusive per-request list an older design would
//! use with a plain tag-keyed map, which is simpler to get right in safe
//! Rust.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures::{SinkExt, StreamExt};
use log::{debug, error, info};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use num_traits::FromPrimitive;

use crate::error::{Error, Result};
use crate::fcall::{FCall, Msg, MsgType, NOFID, NOTAG, P92000, P92000U, VERSION_UNKNOWN};
use crate::idpool::IdPool;
use crate::serialize::{decode_msg, encode_msg, set_tag};

fn frame_codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .length_field_offset(0)
        .length_field_length(4)
        .length_adjustment(-4)
        .little_endian()
        .new_codec()
}

/// The waiting caller plus the reply type its request pairs with (`Rx =
/// Tx+1` by 9P convention), so the receiver can reject a mismatched reply
/// as a protocol shape error instead of handing the caller a nonsensical
/// `FCall` variant.
struct PendingReq {
    expected: MsgType,
    tx: oneshot::Sender<Result<FCall>>,
}

struct Shared {
    pending: Arc<Mutex<HashMap<u16, PendingReq>>>,
    tags: IdPool,
    fids: IdPool,
    out_tx: mpsc::UnboundedSender<Bytes>,
    dotu: bool,
    msize: u32,
    closed: Arc<AtomicBool>,
}

/// A connection to a 9P server, negotiated and ready to issue RPCs.
///
/// Cloning a `Client` shares the same underlying connection; the connection
/// is torn down once the last clone is dropped.
#[derive(Clone)]
pub struct Client {
    shared: Arc<Shared>,
}

impl Client {
    /// Perform the Tversion handshake over `transport` and spawn the
    /// sender/receiver tasks.
    pub async fn connect<T>(transport: T, msize: u32) -> Result<Client>
    where
        T: AsyncRead + AsyncWrite + Send + Unpin + 'static,
    {
        let framed = Framed::new(transport, frame_codec());
        let (mut sink, mut stream) = framed.split();

        let handshake = Msg {
            tag: NOTAG,
            body: FCall::TVersion {
                msize,
                version: P92000U.to_owned(),
            },
        };
        let mut buf = Vec::new();
        encode_msg(&handshake, &mut buf, true)?;
        sink.send(Bytes::from(buf)).await?;

        let reply = stream
            .next()
            .await
            .ok_or_else(|| Error::Protocol("connection closed during handshake".into()))??;
        let msg = decode_msg(&mut &reply[..], true)?;
        let (negotiated_msize, dotu) = match msg.body {
            FCall::RVersion { msize: server_msize, version } => {
                let dotu = version == P92000U;
                if version == VERSION_UNKNOWN {
                    return Err(Error::Protocol("server rejected version string".into()));
                }
                if version != P92000U && version != P92000 {
                    return Err(Error::Protocol(format!(
                        "server does not understand 9P2000/9P2000.u: {}",
                        version
                    )));
                }
                (server_msize.min(msize), dotu)
            }
            _ => return Err(Error::Protocol("expected Rversion".into())),
        };
        info!("negotiated 9P version, msize={} dotu={}", negotiated_msize, dotu);

        let (out_tx, out_rx) = mpsc::unbounded_channel::<Bytes>();
        let pending: Arc<Mutex<HashMap<u16, PendingReq>>> = Arc::new(Mutex::new(HashMap::new()));
        let closed = Arc::new(AtomicBool::new(false));

        tokio::spawn(sender_task(sink, out_rx, pending.clone(), closed.clone()));
        tokio::spawn(receiver_task(stream, pending.clone(), dotu, closed.clone()));

        let shared = Arc::new(Shared {
            pending,
            tags: IdPool::new(NOTAG as u32),
            fids: IdPool::new(NOFID),
            out_tx,
            dotu,
            msize: negotiated_msize,
            closed,
        });

        Ok(Client { shared })
    }

    pub fn msize(&self) -> u32 {
        self.shared.msize
    }

    pub fn dotu(&self) -> bool {
        self.shared.dotu
    }

    /// Allocate a fresh fid.
    pub async fn new_fid(&self) -> u32 {
        self.shared.fids.get_id().await
    }

    /// Return a fid to the pool after the caller has clunked it.
    pub async fn release_fid(&self, fid: u32) {
        self.shared.fids.put_id(fid).await;
    }

    /// Issue a single RPC and wait for its reply, matching by tag.
    pub async fn rpc(&self, body: FCall) -> Result<FCall> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Err(Error::Namespace("client connection is closed".into()));
        }

        let tag = self.shared.tags.get_id().await as u16;
        let (tx, rx) = oneshot::channel();
        let expected = MsgType::from_u8(MsgType::from(&body) as u8 + 1)
            .ok_or_else(|| Error::Protocol("request type has no paired reply type".into()))?;
        self.shared.pending.lock().await.insert(tag, PendingReq { expected, tx });

        let msg = Msg { tag, body };
        let mut buf = Vec::new();
        if let Err(e) = encode_msg(&msg, &mut buf, self.shared.dotu) {
            self.shared.pending.lock().await.remove(&tag);
            self.shared.tags.put_id(tag as u32).await;
            return Err(e.into());
        }
        set_tag(&mut buf, tag);

        if self.shared.out_tx.send(Bytes::from(buf)).is_err() {
            self.shared.pending.lock().await.remove(&tag);
            self.shared.tags.put_id(tag as u32).await;
            return Err(Error::Namespace("client sender task has shut down".into()));
        }

        let result = rx
            .await
            .map_err(|_| Error::Namespace("client receiver task has shut down".into()))?;
        self.shared.tags.put_id(tag as u32).await;
        result
    }
}

/// Fail every request still waiting in `pending` with a clone of `err`,
/// draining the map, and mark the client closed so future `rpc` calls are
/// rejected immediately instead of enqueuing onto a dead transport. Called
/// by whichever of sender/receiver notices the transport is gone first;
/// idempotent (a second call finds an already-empty map).
async fn fail_all_pending(
    pending: &Mutex<HashMap<u16, PendingReq>>,
    closed: &AtomicBool,
    err: &str,
) {
    closed.store(true, Ordering::Release);
    let mut map = pending.lock().await;
    for (_, req) in map.drain() {
        let _ = req.tx.send(Err(Error::Io(std::io::Error::new(std::io::ErrorKind::BrokenPipe, err))));
    }
}

async fn sender_task<S>(
    mut sink: S,
    mut out_rx: mpsc::UnboundedReceiver<Bytes>,
    pending: Arc<Mutex<HashMap<u16, PendingReq>>>,
    closed: Arc<AtomicBool>,
)
where
    S: futures::Sink<Bytes, Error = std::io::Error> + Unpin,
{
    while let Some(bytes) = out_rx.recv().await {
        if let Err(e) = sink.send(bytes).await {
            error!("9P sender task failed: {}", e);
            fail_all_pending(&pending, &closed, "9P transport write failed").await;
            break;
        }
    }
    debug!("9P sender task exiting");
}

async fn receiver_task<S>(
    mut stream: S,
    pending: Arc<Mutex<HashMap<u16, PendingReq>>>,
    dotu: bool,
    closed: Arc<AtomicBool>,
)
where
    S: futures::Stream<Item = std::io::Result<BytesMut>> + Unpin,
{
    while let Some(frame) = stream.next().await {
        let frame = match frame {
            Ok(f) => f,
            Err(e) => {
                error!("9P receiver task I/O error: {}", e);
                fail_all_pending(&pending, &closed, "9P transport read failed").await;
                return;
            }
        };

        // dotu is fixed at connect time, from the negotiated Rversion.
        let msg = match decode_msg(&mut &frame[..], dotu) {
            Ok(m) => m,
            Err(e) => {
                error!("9P receiver task decode error: {}", e);
                continue;
            }
        };

        let Some(req) = pending.lock().await.remove(&msg.tag) else {
            continue;
        };

        let reply = match msg.body {
            FCall::RError { ename, errno } => {
                let errno = if errno != 0 { Some(nix::errno::Errno::from_raw(errno as i32)) } else { None };
                Err(Error::Remote { message: ename, errno })
            }
            other if MsgType::from(&other) == req.expected => Ok(other),
            other => Err(Error::Protocol(format!(
                "invalid response: expected {:?}, got {:?}",
                req.expected,
                MsgType::from(&other)
            ))),
        };

        let _ = req.tx.send(reply);
    }
    // Stream ended cleanly (server closed the connection): still fatal for
    // any RPC still waiting on a reply that will now never arrive.
    fail_all_pending(&pending, &closed, "9P connection closed").await;
    debug!("9P receiver task exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fcall::Qid;
    use tokio::io::duplex;

    async fn fake_server(
        mut server: tokio::io::DuplexStream,
    ) {
        let framed = Framed::new(&mut server, frame_codec());
        let (mut sink, mut stream) = framed.split();
        while let Some(Ok(frame)) = stream.next().await {
            let msg = decode_msg(&mut &frame[..], true).unwrap();
            let reply = match msg.body {
                FCall::TVersion { msize, .. } => Msg {
                    tag: NOTAG,
                    body: FCall::RVersion { msize, version: P92000U.to_owned() },
                },
                FCall::TAttach { .. } => Msg {
                    tag: msg.tag,
                    body: FCall::RAttach { qid: Qid::default() },
                },
                _ => break,
            };
            let mut buf = Vec::new();
            encode_msg(&reply, &mut buf, true).unwrap();
            sink.send(Bytes::from(buf)).await.unwrap();
        }
    }

    #[tokio::test]
    async fn handshake_and_single_rpc() {
        let (client_io, server_io) = duplex(4096);
        tokio::spawn(fake_server(server_io));

        let client = Client::connect(client_io, 8192).await.unwrap();
        assert!(client.dotu());

        let reply = client
            .rpc(FCall::TAttach {
                fid: 0,
                afid: NOFID,
                uname: "glenda".to_owned(),
                aname: "".to_owned(),
                n_uname: crate::fcall::NONUNAME,
            })
            .await
            .unwrap();
        assert!(matches!(reply, FCall::RAttach { .. }));
    }
}
