//! TCP-based transport implementation.
//!
//! Every accepted connection becomes one [`Link`]. Messages are framed as a
//! little-endian `u32` length followed by that many UTF-8 bytes. Each
//! connection gets a reader task feeding the link's inbound queue and a
//! single writer task draining its outbound queue, so events leave in the
//! order the session produced them.
//!
//! A frame larger than the configured maximum, a frame that is not UTF-8, or
//! EOF ends the reader, which the session observes as a disconnect. The
//! reader also ends when the session drops its link, so a finished session
//! does not leave an idle client's socket open.

use crate::network::transport::{
    INBOUND_CAPACITY, Link, OUTBOUND_CAPACITY, Transport, TransportError,
};
use crate::{debug, warn};
use bytes::{BufMut, BytesMut};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{self, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio::sync::mpsc::{Receiver, Sender, channel};

/// Default maximum frame size (64 KiB).
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

const LEN_PREFIX: usize = 4;

/// Reads one frame. Returns `Ok(None)` on a clean EOF before the length.
pub async fn read_frame<R>(reader: &mut R, max: usize) -> Result<Option<String>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; LEN_PREFIX];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > max {
        return Err(TransportError::FrameTooLarge { size: len, max });
    }

    let mut buf = BytesMut::zeroed(len);
    reader.read_exact(&mut buf).await?;
    String::from_utf8(buf.to_vec())
        .map(Some)
        .map_err(|_| TransportError::InvalidText)
}

/// Writes `data` as one length-prefixed frame and flushes.
pub async fn send_framed<W>(writer: &mut W, data: &[u8]) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(data.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "frame too large"))?;
    let mut frame = BytesMut::with_capacity(LEN_PREFIX + data.len());
    frame.put_u32_le(len);
    frame.put_slice(data);
    writer.write_all(&frame).await?;
    writer.flush().await
}

/// TCP transport accepting one link per connection.
pub struct TcpTransport {
    /// Address the listener is bound to.
    listen_address: SocketAddr,
    /// Taken once by `start`.
    listener: Mutex<Option<TcpListener>>,
    max_frame: usize,
}

impl TcpTransport {
    /// Binds the listener. Accepting starts with [`Transport::start`].
    ///
    /// Binding to port 0 picks a free port; [`local_addr`](Self::local_addr)
    /// reports the real one.
    pub async fn bind(address: SocketAddr, max_frame: usize) -> Result<Arc<Self>, TransportError> {
        let listener = TcpListener::bind(address).await?;
        let listen_address = listener.local_addr()?;

        Ok(Arc::new(Self {
            listen_address,
            listener: Mutex::new(Some(listener)),
            max_frame,
        }))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listen_address
    }

    async fn accept_loop(listener: TcpListener, links: Sender<Link>, max_frame: usize) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    debug!("accepted connection from {peer}");
                    let link = Self::open_link(stream, peer, max_frame);
                    if links.send(link).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    warn!("accept failed: {e}");
                    continue;
                }
            }
        }
    }

    fn open_link(stream: TcpStream, peer: SocketAddr, max_frame: usize) -> Link {
        if let Err(e) = stream.set_nodelay(true) {
            debug!("{peer}: could not disable Nagle: {e}");
        }
        let (reader, writer) = stream.into_split();
        let (in_tx, in_rx) = channel(INBOUND_CAPACITY);
        let (out_tx, out_rx) = channel(OUTBOUND_CAPACITY);

        tokio::spawn(async move {
            match Self::read_loop(reader, in_tx, max_frame).await {
                Ok(()) => debug!("{peer}: connection closed"),
                Err(e) => warn!("{peer}: dropping connection: {e}"),
            }
        });
        tokio::spawn(Self::write_loop(writer, out_rx, peer));

        Link::new(peer.to_string(), in_rx, out_tx)
    }

    /// Feeds frames into the link until EOF, an invalid frame, or the
    /// session dropping its end of the link.
    async fn read_loop<R>(mut reader: R, tx: Sender<String>, max_frame: usize) -> Result<(), TransportError>
    where
        R: AsyncRead + Unpin,
    {
        loop {
            let frame = tokio::select! {
                _ = tx.closed() => return Ok(()),
                frame = read_frame(&mut reader, max_frame) => frame?,
            };
            let Some(message) = frame else {
                return Ok(());
            };
            tx.send(message).await?;
        }
    }

    async fn write_loop(mut writer: OwnedWriteHalf, mut rx: Receiver<String>, peer: SocketAddr) {
        while let Some(message) = rx.recv().await {
            if let Err(e) = send_framed(&mut writer, message.as_bytes()).await {
                debug!("{peer}: write failed: {e}");
                return;
            }
        }
        if let Err(e) = writer.shutdown().await {
            debug!("{peer}: shutdown failed: {e}");
        }
    }
}

#[async_trait::async_trait]
impl Transport for TcpTransport {
    async fn start(self: Arc<Self>, links: Sender<Link>) -> Result<(), TransportError> {
        let listener = self
            .listener
            .lock()
            .await
            .take()
            .ok_or(TransportError::AlreadyStarted)?;
        let max_frame = self.max_frame;
        tokio::spawn(async move {
            Self::accept_loop(listener, links, max_frame).await;
        });
        Ok(())
    }

    fn addr(&self) -> String {
        self.listen_address.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn frame_roundtrip_over_duplex() {
        let (mut a, mut b) = duplex(1024);
        send_framed(&mut a, b"push 1\nwrite").await.unwrap();
        send_framed(&mut a, b"").await.unwrap();
        drop(a);

        assert_eq!(
            read_frame(&mut b, MAX_FRAME_SIZE).await.unwrap().as_deref(),
            Some("push 1\nwrite")
        );
        assert_eq!(
            read_frame(&mut b, MAX_FRAME_SIZE).await.unwrap().as_deref(),
            Some("")
        );
        assert!(read_frame(&mut b, MAX_FRAME_SIZE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn length_prefix_is_little_endian() {
        let (mut a, mut b) = duplex(64);
        send_framed(&mut a, b"@f").await.unwrap();
        let mut raw = [0u8; 6];
        b.read_exact(&mut raw).await.unwrap();
        assert_eq!(raw, [2, 0, 0, 0, b'@', b'f']);
    }

    #[tokio::test]
    async fn oversized_frame_is_rejected() {
        let (mut a, mut b) = duplex(64);
        a.write_all(&(1024u32).to_le_bytes()).await.unwrap();
        assert!(matches!(
            read_frame(&mut b, 16).await,
            Err(TransportError::FrameTooLarge { size: 1024, max: 16 })
        ));
    }

    #[tokio::test]
    async fn non_utf8_frame_is_rejected() {
        let (mut a, mut b) = duplex(64);
        send_framed(&mut a, &[0xff, 0xfe]).await.unwrap();
        assert!(matches!(
            read_frame(&mut b, MAX_FRAME_SIZE).await,
            Err(TransportError::InvalidText)
        ));
    }

    #[tokio::test]
    async fn truncated_frame_is_an_error() {
        let (mut a, mut b) = duplex(64);
        a.write_all(&(10u32).to_le_bytes()).await.unwrap();
        a.write_all(b"abc").await.unwrap();
        drop(a);
        assert!(matches!(
            read_frame(&mut b, MAX_FRAME_SIZE).await,
            Err(TransportError::Io(_))
        ));
    }

    #[tokio::test]
    async fn accepted_connection_becomes_link() {
        let tr = TcpTransport::bind("127.0.0.1:0".parse().unwrap(), MAX_FRAME_SIZE)
            .await
            .unwrap();
        let (sx, mut rx) = channel(4);
        tr.clone().start(sx).await.unwrap();

        let mut client = TcpStream::connect(tr.local_addr()).await.unwrap();
        let mut link = rx.recv().await.unwrap();

        send_framed(&mut client, b"@d 0").await.unwrap();
        assert_eq!(link.recv().await.as_deref(), Some("@d 0"));

        link.send("@f".to_string()).await.unwrap();
        assert_eq!(
            read_frame(&mut client, MAX_FRAME_SIZE).await.unwrap().as_deref(),
            Some("@f")
        );

        drop(link);
        assert!(read_frame(&mut client, MAX_FRAME_SIZE).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn client_close_ends_link() {
        let tr = TcpTransport::bind("127.0.0.1:0".parse().unwrap(), MAX_FRAME_SIZE)
            .await
            .unwrap();
        let (sx, mut rx) = channel(4);
        tr.clone().start(sx).await.unwrap();

        let client = TcpStream::connect(tr.local_addr()).await.unwrap();
        let mut link = rx.recv().await.unwrap();
        drop(client);
        assert!(link.recv().await.is_none());
    }

    #[tokio::test]
    async fn read_loop_ends_when_link_is_dropped() {
        // the client side stays open and idle
        let (_client, server) = duplex(64);
        let (tx, rx) = channel(INBOUND_CAPACITY);
        let reader = tokio::spawn(TcpTransport::read_loop(server, tx, MAX_FRAME_SIZE));

        drop(rx);
        let ended = tokio::time::timeout(std::time::Duration::from_secs(5), reader)
            .await
            .expect("reader still running after the link was dropped");
        assert!(ended.unwrap().is_ok());
    }

    #[tokio::test]
    async fn start_twice_fails() {
        let tr = TcpTransport::bind("127.0.0.1:0".parse().unwrap(), MAX_FRAME_SIZE)
            .await
            .unwrap();
        let (sx, _rx) = channel(4);
        tr.clone().start(sx.clone()).await.unwrap();
        assert!(matches!(
            tr.clone().start(sx).await,
            Err(TransportError::AlreadyStarted)
        ));
    }
}
