//! Async shell around [`Link`]: reads the device stream, ticks the link on
//! a fixed interval and flushes whatever the link queued.

use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace};

use crate::link::{Link, LinkEvent};

const READ_BUFFER_SIZE: usize = 512;

/// Any byte stream a link can run over.
pub trait DeviceIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> DeviceIo for T {}

/// Opens `tcp://host:port`, or a device node that is already configured
/// (baud rate and framing are set outside this crate).
pub async fn open_device(device: &str) -> Result<Box<dyn DeviceIo>> {
    if let Some(addr) = device.strip_prefix("tcp://") {
        let stream = TcpStream::connect(addr)
            .await
            .with_context(|| format!("connecting to {}", addr))?;
        stream.set_nodelay(true)?;
        info!("Connected to {}", addr);
        return Ok(Box::new(stream));
    }

    open_node(device)
}

#[cfg(unix)]
fn open_node(device: &str) -> Result<Box<dyn DeviceIo>> {
    let node = crate::device::DeviceNode::open(device)
        .with_context(|| format!("opening {}", device))?;
    info!("Opened {}", device);
    Ok(Box::new(node))
}

#[cfg(not(unix))]
fn open_node(device: &str) -> Result<Box<dyn DeviceIo>> {
    bail!("device nodes are not supported on this platform: {}", device)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Stop,
}

pub struct Driver<S> {
    stream: S,
    link: Link<Vec<u8>>,
    tick_interval: Duration,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Driver<S> {
    pub fn new(stream: S, link: Link<Vec<u8>>, tick_interval: Duration) -> Self {
        Self {
            stream,
            link,
            tick_interval,
        }
    }

    pub fn link_mut(&mut self) -> &mut Link<Vec<u8>> {
        &mut self.link
    }

    pub fn into_link(self) -> Link<Vec<u8>> {
        self.link
    }

    async fn flush(&mut self) -> Result<()> {
        let out = self.link.take_output();
        if out.is_empty() {
            return Ok(());
        }
        trace!("Writing {} bytes: {}", out.len(), hex::encode(&out));
        self.stream.write_all(&out).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// Pumps the link until `on_event` returns [`Flow::Stop`] or the stream
    /// closes. The callback may issue new requests through the link it is
    /// handed.
    pub async fn run<F>(&mut self, mut on_event: F) -> Result<()>
    where
        F: FnMut(&mut Link<Vec<u8>>, LinkEvent) -> Flow,
    {
        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut buf = [0u8; READ_BUFFER_SIZE];

        loop {
            let closed = tokio::select! {
                read = self.stream.read(&mut buf) => {
                    let n = read?;
                    if n > 0 {
                        trace!("Read {} bytes: {}", n, hex::encode(&buf[..n]));
                        self.link.bytes_available(&buf[..n], Instant::now());
                    }
                    n == 0
                }
                _ = ticker.tick() => {
                    self.link.tick(Instant::now());
                    false
                }
            };

            if closed {
                debug!("Device stream closed");
                self.link.disconnect();
            }

            self.flush().await?;
            while let Some(event) = self.link.poll_event() {
                if on_event(&mut self.link, event) == Flow::Stop {
                    self.flush().await?;
                    return Ok(());
                }
            }
            self.flush().await?;

            if closed {
                bail!("device closed the connection");
            }
        }
    }
}
