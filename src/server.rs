use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info};

use crate::simulator::DeviceSimulator;

/// Serves simulated devices over TCP, one per connection.
pub async fn run_simulator(addr: &str) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!("Simulated device listening on {}", listener.local_addr()?);
    serve(listener).await
}

pub async fn serve(listener: TcpListener) -> anyhow::Result<()> {
    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                info!("New connection from {}", peer);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(socket).await {
                        error!("Connection from {} failed: {}", peer, e);
                    }
                    info!("Connection from {} closed", peer);
                });
            }
            Err(e) => {
                error!("Failed to accept connection: {}", e);
            }
        }
    }
}

async fn handle_connection(mut socket: TcpStream) -> anyhow::Result<()> {
    let mut device = DeviceSimulator::default();
    let mut buf = [0u8; 512];

    loop {
        let n = socket.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }

        let response = device.feed(&buf[..n]);
        if !response.is_empty() {
            debug!("Simulator answering with {} bytes", response.len());
            socket.write_all(&response).await?;
        }
    }
}
