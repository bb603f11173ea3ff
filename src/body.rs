//! HTTP body utilities.
//!
//! Minimal stand-ins for http-body-util:
//! - Full: body from a single Bytes chunk (outbound requests, endpoint responses)
//! - read_with_timeout: collect a body, bounding the wait for every frame

use bytes::{Buf, Bytes, BytesMut};
use hyper::body::{Body, Frame, SizeHint};
use std::future::poll_fn;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

/// A body that contains a single chunk of data.
#[derive(Debug, Clone, Default)]
pub struct Full<D> {
    data: Option<D>,
}

impl<D: Buf> Full<D> {
    pub fn new(data: D) -> Self {
        // An empty chunk is reported as end-of-stream right away
        let data = if data.has_remaining() { Some(data) } else { None };
        Full { data }
    }
}

impl Full<Bytes> {
    pub fn empty() -> Self {
        Full { data: None }
    }
}

impl<D> Unpin for Full<D> {}

impl<D: Buf + Send + 'static> Body for Full<D> {
    type Data = D;
    type Error = std::convert::Infallible;

    fn poll_frame(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<Option<Result<Frame<Self::Data>, Self::Error>>> {
        Poll::Ready(self.get_mut().data.take().map(|d| Ok(Frame::data(d))))
    }

    fn is_end_stream(&self) -> bool {
        self.data.is_none()
    }

    fn size_hint(&self) -> SizeHint {
        match &self.data {
            Some(data) => SizeHint::with_exact(data.remaining() as u64),
            None => SizeHint::with_exact(0),
        }
    }
}

/// Why collecting a body stopped early
#[derive(Debug)]
pub enum ReadError<E> {
    /// No frame arrived within the per-frame timeout
    Timeout,
    Body(E),
}

/// Read a body to the end. Each frame must arrive within `per_frame`;
/// trailers are ignored.
pub async fn read_with_timeout<B>(mut body: B, per_frame: Duration) -> Result<Bytes, ReadError<B::Error>>
where
    B: Body + Unpin,
{
    let mut buf = BytesMut::new();
    loop {
        let next = tokio::time::timeout(per_frame, poll_fn(|cx| Pin::new(&mut body).poll_frame(cx)));
        match next.await {
            Err(_) => return Err(ReadError::Timeout),
            Ok(None) => break,
            Ok(Some(Err(e))) => return Err(ReadError::Body(e)),
            Ok(Some(Ok(frame))) => {
                if let Ok(mut data) = frame.into_data() {
                    while data.has_remaining() {
                        let chunk = data.chunk();
                        let len = chunk.len();
                        buf.extend_from_slice(chunk);
                        data.advance(len);
                    }
                }
            }
        }
    }
    Ok(buf.freeze())
}
