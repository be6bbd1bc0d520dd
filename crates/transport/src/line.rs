//! Newline-delimited JSON over a byte stream.
//!
//! Each frame is one line of text. A reader task splits the inbound stream
//! into lines and hands each one to the subscribers; a writer task drains an
//! unbounded queue onto the outbound half, so `send` never blocks.
//!
//! Lines that are not UTF-8 or that exceed the frame cap are dropped and
//! reading continues with the next line.

use std::io;
use std::sync::Arc;

use bytes::{BufMut, BytesMut};
use ire_core::{MessageEvent, MessageHandler, Transport, TransportError};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

use crate::subscribers::Subscribers;

/// Longest inbound line accepted, excluding the terminator.
pub const DEFAULT_MAX_FRAME_LEN: usize = 8 * 1024 * 1024;

/// Line-framed transport over any split Tokio I/O pair.
#[derive(Debug)]
pub struct LineTransport {
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    subscribers: Arc<Subscribers>,
    closed: watch::Receiver<bool>,
    reader: JoinHandle<()>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl LineTransport {
    /// Open a TCP connection to `addr`.
    pub async fn connect(addr: impl ToSocketAddrs) -> io::Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self::from_tcp(stream))
    }

    pub fn from_tcp(stream: TcpStream) -> Self {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "could not disable Nagle");
        }
        let (reader, writer) = stream.into_split();
        Self::new(reader, writer)
    }

    /// Spawn the reader and writer tasks. Must be called inside a Tokio
    /// runtime.
    pub fn new<R, W>(reader: R, writer: W) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        Self::with_max_frame_len(reader, writer, DEFAULT_MAX_FRAME_LEN)
    }

    /// Like [`LineTransport::new`], dropping inbound lines longer than
    /// `max_frame_len` bytes.
    pub fn with_max_frame_len<R, W>(reader: R, writer: W, max_frame_len: usize) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let subscribers = Arc::new(Subscribers::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(false);

        let reader = tokio::spawn(read_loop(
            BufReader::new(reader),
            max_frame_len,
            Arc::clone(&subscribers),
            closed_tx,
        ));
        let writer = tokio::spawn(write_loop(writer, rx));

        Self {
            outbound: Mutex::new(Some(tx)),
            subscribers,
            closed: closed_rx,
            reader,
            writer: Mutex::new(Some(writer)),
        }
    }

    /// Resolves once the inbound half has ended (EOF or read error).
    pub async fn closed(&self) {
        let mut closed = self.closed.clone();
        // A dropped sender means the reader task is gone too.
        let _ = closed.wait_for(|done| *done).await;
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Stop accepting frames, flush what is queued and close the outbound
    /// half. Later sends fail with [`TransportError::Closed`].
    pub async fn shutdown(&self) {
        self.outbound.lock().take();
        let writer = self.writer.lock().take();
        if let Some(writer) = writer {
            if let Err(e) = writer.await {
                warn!(error = %e, "line writer task failed");
            }
        }
    }
}

impl Transport for LineTransport {
    fn send(&self, payload: String) -> Result<(), TransportError> {
        if payload.contains('\n') {
            return Err(TransportError::Io("frame contains a line break".into()));
        }
        let outbound = self.outbound.lock();
        let tx = outbound.as_ref().ok_or(TransportError::Closed)?;
        tx.send(payload).map_err(|_| TransportError::Closed)
    }

    fn subscribe(&self, handler: MessageHandler) {
        self.subscribers.add(handler);
    }

    fn unsubscribe(&self, handler: &MessageHandler) {
        self.subscribers.remove(handler);
    }
}

impl Drop for LineTransport {
    fn drop(&mut self) {
        self.reader.abort();
        if let Some(writer) = self.writer.get_mut().take() {
            writer.abort();
        }
    }
}

async fn read_loop<R>(
    mut reader: R,
    max_frame_len: usize,
    subscribers: Arc<Subscribers>,
    closed: watch::Sender<bool>,
) where
    R: tokio::io::AsyncBufRead + Unpin,
{
    let mut line = BytesMut::new();
    // Set while skipping the rest of an oversized line.
    let mut discarding = false;
    loop {
        let chunk = match reader.fill_buf().await {
            Ok([]) => {
                if !discarding {
                    deliver_line(&mut line, &subscribers);
                }
                debug!("remote closed the stream");
                break;
            }
            Ok(chunk) => chunk,
            Err(e) => {
                warn!(error = %e, "line read failed");
                break;
            }
        };

        let (taken, complete) = match chunk.iter().position(|&b| b == b'\n') {
            Some(end) => (end + 1, true),
            None => (chunk.len(), false),
        };
        let body = if complete { &chunk[..taken - 1] } else { chunk };
        if !discarding {
            if line.len() + body.len() > max_frame_len {
                warn!(limit = max_frame_len, "dropping oversized line");
                line.clear();
                discarding = true;
            } else {
                line.put_slice(body);
            }
        }
        reader.consume(taken);

        if complete {
            if !discarding {
                deliver_line(&mut line, &subscribers);
            }
            discarding = false;
        }
    }
    let _ = closed.send(true);
}

/// Hand a completed line to the subscribers and reset the buffer.
fn deliver_line(line: &mut BytesMut, subscribers: &Subscribers) {
    if line.last() == Some(&b'\r') {
        line.truncate(line.len() - 1);
    }
    if line.is_empty() {
        return;
    }
    let bytes = line.split();
    match std::str::from_utf8(&bytes) {
        Ok(text) => {
            trace!(len = text.len(), "line received");
            subscribers.deliver(MessageEvent::text(text));
        }
        Err(e) => trace!(error = %e, "dropping line that is not UTF-8"),
    }
}

async fn write_loop<W>(mut writer: W, mut outbound: mpsc::UnboundedReceiver<String>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = outbound.recv().await {
        let mut buf = BytesMut::with_capacity(frame.len() + 1);
        buf.put_slice(frame.as_bytes());
        buf.put_u8(b'\n');

        if let Err(e) = write_frame(&mut writer, &buf).await {
            warn!(error = %e, "line write failed");
            return;
        }
    }
    if let Err(e) = writer.shutdown().await {
        debug!(error = %e, "line writer shutdown failed");
    }
}

async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(frame).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use ire_core::Frame;
    use tokio::io::{duplex, split, AsyncReadExt};

    #[tokio::test]
    async fn test_send_appends_newline() {
        let (local, remote) = duplex(1024);
        let (r, w) = split(local);
        let transport = LineTransport::new(r, w);

        transport.send("{\"a\":1}".into()).unwrap();
        transport.shutdown().await;

        let (mut remote_r, _remote_w) = split(remote);
        let mut out = String::new();
        remote_r.read_to_string(&mut out).await.unwrap();
        assert_eq!(out, "{\"a\":1}\n");
    }

    #[tokio::test]
    async fn test_lines_are_delivered_and_blank_lines_skipped() {
        let (local, remote) = duplex(1024);
        let (r, w) = split(local);
        let transport = LineTransport::new(r, w);

        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.subscribe(MessageHandler::new(move |event: MessageEvent| {
            if let Frame::Text(text) = event.data {
                let _ = tx.send(text);
            }
        }));

        let (_remote_r, mut remote_w) = split(remote);
        remote_w.write_all(b"first\n\nsecond\r\n").await.unwrap();
        remote_w.shutdown().await.unwrap();

        assert_eq!(rx.recv().await.as_deref(), Some("first"));
        assert_eq!(rx.recv().await.as_deref(), Some("second"));
        transport.closed().await;
        assert!(transport.is_closed());
    }

    #[tokio::test]
    async fn test_bad_lines_are_dropped_and_reading_continues() {
        let (local, remote) = duplex(1024);
        let (r, w) = split(local);
        let transport = LineTransport::with_max_frame_len(r, w, 16);

        let (tx, mut rx) = mpsc::unbounded_channel();
        transport.subscribe(MessageHandler::new(move |event: MessageEvent| {
            if let Frame::Text(text) = event.data {
                let _ = tx.send(text);
            }
        }));

        let (_remote_r, mut remote_w) = split(remote);
        remote_w.write_all(b"\xff\xfe\n").await.unwrap();
        remote_w.write_all(b"this line is far too long\n").await.unwrap();
        remote_w.write_all(b"exactly-16-bytes\nok\n").await.unwrap();
        remote_w.write_all(b"tail").await.unwrap();
        remote_w.shutdown().await.unwrap();

        assert_eq!(rx.recv().await.as_deref(), Some("exactly-16-bytes"));
        assert_eq!(rx.recv().await.as_deref(), Some("ok"));
        assert_eq!(rx.recv().await.as_deref(), Some("tail"));
        transport.closed().await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_rejects_embedded_newline_and_after_shutdown() {
        let (local, _remote) = duplex(64);
        let (r, w) = split(local);
        let transport = LineTransport::new(r, w);

        assert!(matches!(
            transport.send("a\nb".into()),
            Err(TransportError::Io(_))
        ));
        transport.shutdown().await;
        assert_eq!(transport.send("x".into()), Err(TransportError::Closed));
    }
}
