//! Duplex frame transports.
//!
//! The connection pump runs over anything that is both a [`Stream`] of
//! inbound [`Frame`]s and a [`Sink`] for outbound ones; see [`Transport`].
//! Two implementations ship with the crate:
//!
//! - [`WebSocketTransport`] adapts a `tokio-tungstenite` WebSocket stream;
//! - [`MemoryTransport`] is an in-process pair, handy for tests and for
//!   embedding a hub without a network.

use crate::error::{Error, Result};
use crate::frame::Frame;
use futures_util::{Sink, Stream};
use pin_project_lite::pin_project;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message as TungsteniteMessage;

/// A duplex frame transport.
///
/// Implemented for every type with the right `Stream` and `Sink` impls.
pub trait Transport:
    Stream<Item = Result<Frame>> + Sink<Frame, Error = Error> + Send + Unpin + 'static
{
}

impl<T> Transport for T where
    T: Stream<Item = Result<Frame>> + Sink<Frame, Error = Error> + Send + Unpin + 'static
{
}

pin_project! {
    /// A [`Transport`] over a WebSocket connection.
    pub struct WebSocketTransport<S> {
        #[pin]
        inner: WebSocketStream<S>,
    }
}

impl<S> WebSocketTransport<S> {
    /// Wraps an accepted WebSocket stream.
    pub fn new(inner: WebSocketStream<S>) -> Self {
        Self { inner }
    }
}

impl<S> Stream for WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    type Item = Result<Frame>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.project()
            .inner
            .poll_next(cx)
            .map(|next| next.map(|msg| msg.map(Frame::from_tungstenite).map_err(Error::from)))
    }
}

impl<S> Sink<Frame> for WebSocketTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    type Error = Error;

    fn poll_ready(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        Sink::<TungsteniteMessage>::poll_ready(self.project().inner, cx).map_err(Error::from)
    }

    fn start_send(self: Pin<&mut Self>, item: Frame) -> Result<()> {
        self.project()
            .inner
            .start_send(item.into_tungstenite())
            .map_err(Error::from)
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        Sink::<TungsteniteMessage>::poll_flush(self.project().inner, cx).map_err(Error::from)
    }

    fn poll_close(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Result<()>> {
        Sink::<TungsteniteMessage>::poll_close(self.project().inner, cx).map_err(Error::from)
    }
}

/// One end of an in-memory transport pair.
///
/// Frames sent on one end arrive on the other. Closing an end ends the
/// other end's stream.
pub struct MemoryTransport {
    incoming: mpsc::UnboundedReceiver<Frame>,
    outgoing: Option<mpsc::UnboundedSender<Frame>>,
}

impl MemoryTransport {
    /// Creates two connected ends.
    pub fn pair() -> (Self, Self) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            Self {
                incoming: a_rx,
                outgoing: Some(b_tx),
            },
            Self {
                incoming: b_rx,
                outgoing: Some(a_tx),
            },
        )
    }

    fn closed() -> Error {
        Error::ChannelClosed("memory transport".to_string())
    }
}

impl Stream for MemoryTransport {
    type Item = Result<Frame>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.incoming.poll_recv(cx).map(|frame| frame.map(Ok))
    }
}

impl Sink<Frame> for MemoryTransport {
    type Error = Error;

    fn poll_ready(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        match &self.outgoing {
            Some(tx) if !tx.is_closed() => Poll::Ready(Ok(())),
            _ => Poll::Ready(Err(Self::closed())),
        }
    }

    fn start_send(self: Pin<&mut Self>, item: Frame) -> Result<()> {
        match &self.outgoing {
            Some(tx) => tx.send(item).map_err(|_| Self::closed()),
            None => Err(Self::closed()),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_close(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<()>> {
        self.outgoing = None;
        Poll::Ready(Ok(()))
    }
}
