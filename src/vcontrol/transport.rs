//! TCP transport adapter for the vcontrold client.
//!
//! The read side runs as a background task that turns socket reads into
//! [`TransportEvent`]s, one per chunk, exactly as the kernel delivers them.
//! The write side stays with the client, which writes one command line per
//! operation.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::vcontrol::session::TransportEvent;

/// Size of the buffer used for each socket read.
const READ_CHUNK_SIZE: usize = 4096;

/// Read half of a transport.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Write half of a transport.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Open a TCP connection and split it into read and write halves.
///
/// # Errors
///
/// Returns the underlying I/O error if the host cannot be resolved or the
/// connection is refused.
pub async fn open_tcp(host: &str, port: u16) -> std::io::Result<(BoxedReader, BoxedWriter)> {
    let stream = TcpStream::connect((host, port)).await?;
    // Command lines are tiny; do not let Nagle hold them back.
    stream.set_nodelay(true)?;

    let (read_half, write_half) = stream.into_split();
    Ok((Box::new(read_half), Box::new(write_half)))
}

/// Split an already-established duplex stream into transport halves.
pub fn split_stream<S>(stream: S) -> (BoxedReader, BoxedWriter)
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    let (read_half, write_half) = tokio::io::split(stream);
    (Box::new(read_half), Box::new(write_half))
}

/// Spawn the reader task.
///
/// Every chunk read is passed to `on_event` as [`TransportEvent::Data`]. The
/// task ends after delivering [`TransportEvent::Closed`] on EOF or
/// [`TransportEvent::Error`] on a read failure.
pub fn spawn_reader<F>(mut reader: BoxedReader, mut on_event: F) -> JoinHandle<()>
where
    F: FnMut(TransportEvent) + Send + 'static,
{
    tokio::spawn(async move {
        let mut buf = vec![0u8; READ_CHUNK_SIZE];

        loop {
            match reader.read(&mut buf).await {
                Ok(0) => {
                    debug!("Transport reached EOF");
                    on_event(TransportEvent::Closed);
                    return;
                }
                Ok(n) => on_event(TransportEvent::Data(Bytes::copy_from_slice(&buf[..n]))),
                Err(e) => {
                    on_event(TransportEvent::Error(e));
                    return;
                }
            }
        }
    })
}

/// Write one command line and flush it.
///
/// # Errors
///
/// Returns an error if the write or flush fails.
pub async fn write_line(writer: &mut BoxedWriter, line: &str) -> std::io::Result<()> {
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}
