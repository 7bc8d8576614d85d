//! Offscreen frame server
//!
//! A loopback-only TCP listener. Each connection gets its own independent
//! [`RenderSession`]; a transport error or orderly close tears down only
//! that session's surface and buffer. Malformed text frames are logged and
//! skipped without dropping the connection.

use crate::session::RenderSession;
use crate::surface::{SurfaceEvent, SurfaceFactory, DEFAULT_FRAME_RATE};
use aardium_proto::{decode_command, encode_line, Event};
use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Socket server driving one render session per connection
pub struct FrameServer {
    listener: TcpListener,
    factory: Arc<dyn SurfaceFactory>,
    frame_rate: u32,
}

impl FrameServer {
    /// Bind the listener on loopback. Pass port 0 for an ephemeral port.
    pub async fn bind(port: u16, factory: Arc<dyn SurfaceFactory>) -> Result<Self> {
        let addr = aardium_proto::server_addr(port);
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind offscreen server on {addr}"))?;
        info!("Offscreen server listening on {}", listener.local_addr()?);
        Ok(Self {
            listener,
            factory,
            frame_rate: DEFAULT_FRAME_RATE,
        })
    }

    /// Paint rate new sessions start at
    pub fn with_frame_rate(mut self, fps: u32) -> Self {
        self.frame_rate = fps.max(1);
        self
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept connections until the task is dropped
    pub async fn run(self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    info!("Client connected from {}", peer);
                    let factory = self.factory.clone();
                    tokio::spawn(handle_client(stream, factory, self.frame_rate));
                }
                Err(e) => {
                    error!("Accept error: {}", e);
                }
            }
        }
    }
}

/// Handle one connection: a single cooperative loop over socket lines and
/// surface callbacks, so each session has exactly one writer and needs no
/// locking around its shared buffer.
async fn handle_client(stream: TcpStream, factory: Arc<dyn SurfaceFactory>, frame_rate: u32) {
    let peer = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "<unknown>".into());
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    let mut session = RenderSession::with_frame_rate(frame_rate);
    let mut surface_rx: Option<mpsc::Receiver<SurfaceEvent>> = None;

    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        let command = match decode_command(&line) {
                            Ok(command) => command,
                            Err(e) => {
                                // Not a teardown: log and wait for the next frame
                                warn!("Ignoring malformed frame from {}: {}", peer, e);
                                continue;
                            }
                        };

                        debug!("Received command: {:?}", command);
                        match session.handle_command(command, factory.as_ref()) {
                            Ok(outcome) => {
                                if let Some(rx) = outcome.surface_events {
                                    surface_rx = Some(rx);
                                }
                                if send_events(&mut writer, &outcome.replies).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                warn!("Command from {} failed: {:#}", peer, e);
                            }
                        }
                    }
                    Ok(None) => {
                        info!("Client {} disconnected", peer);
                        break;
                    }
                    Err(e) => {
                        warn!("Socket error on {}: {}", peer, e);
                        break;
                    }
                }
            }

            event = next_surface_event(&mut surface_rx) => {
                match event {
                    Some(event) => {
                        if let Some(out) = session.handle_surface_event(event) {
                            if send_events(&mut writer, std::slice::from_ref(&out)).await.is_err() {
                                break;
                            }
                        }
                    }
                    None => {
                        // Surface dropped its channel; stop polling it
                        surface_rx = None;
                    }
                }
            }
        }
    }

    // Uniform teardown for close and error paths; never fails
    session.close();
    debug!("Session for {} torn down", peer);
}

async fn send_events(writer: &mut OwnedWriteHalf, events: &[Event]) -> Result<()> {
    for event in events {
        let line = encode_line(event)?;
        writer.write_all(line.as_bytes()).await?;
    }
    Ok(())
}

/// Resolve the next surface event, or park forever while no surface exists
async fn next_surface_event(rx: &mut Option<mpsc::Receiver<SurfaceEvent>>) -> Option<SurfaceEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::surface::SoftwareSurfaceFactory;
    use aardium_proto::decode_event;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn unique_map(tag: &str) -> String {
        static COUNTER: AtomicU32 = AtomicU32::new(0);
        format!(
            "aardium-server-{}-{}-{}",
            tag,
            std::process::id(),
            COUNTER.fetch_add(1, Ordering::Relaxed)
        )
    }

    async fn start_server() -> SocketAddr {
        let server = FrameServer::bind(0, Arc::new(SoftwareSurfaceFactory))
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());
        addr
    }

    fn init_line(map_name: &str) -> String {
        format!(
            "{{\"command\":\"init\",\"mapName\":\"{map_name}\",\"mapSize\":1048576,\"width\":32,\"height\":16,\"url\":\"http://localhost/\",\"incremental\":true}}\n"
        )
    }

    #[tokio::test]
    async fn test_init_complete_precedes_frames() {
        let addr = start_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(init_line(&unique_map("order")).as_bytes())
            .await
            .unwrap();

        let mut lines = BufReader::new(stream).lines();
        let first = lines.next_line().await.unwrap().unwrap();
        assert!(matches!(decode_event(&first).unwrap(), Event::InitComplete));

        // the paint stream arrives only after initComplete
        let second = lines.next_line().await.unwrap().unwrap();
        match decode_event(&second).unwrap() {
            Event::FullFrame { width, height, byte_length, .. } => {
                assert_eq!((width, height), (32, 16));
                assert_eq!(byte_length, 32 * 16 * 4);
            }
            Event::ChangeCursor { .. } => {} // cursor may land between
            other => panic!("Unexpected event before first frame: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_malformed_frame_keeps_connection_open() {
        let addr = start_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        stream.write_all(b"this is not json\n").await.unwrap();
        stream.write_all(b"{\"command\":\"bogus\"}\n").await.unwrap();
        stream
            .write_all(init_line(&unique_map("garbage")).as_bytes())
            .await
            .unwrap();

        let mut lines = BufReader::new(stream).lines();
        let first = lines.next_line().await.unwrap().unwrap();
        assert!(matches!(decode_event(&first).unwrap(), Event::InitComplete));
    }

    #[tokio::test]
    async fn test_sessions_are_independent() {
        let addr = start_server().await;

        let mut a = TcpStream::connect(addr).await.unwrap();
        a.write_all(init_line(&unique_map("a")).as_bytes())
            .await
            .unwrap();
        let mut a_lines = BufReader::new(a).lines();
        assert!(matches!(
            decode_event(&a_lines.next_line().await.unwrap().unwrap()).unwrap(),
            Event::InitComplete
        ));

        // second client connects and dies; first must keep streaming
        let b = TcpStream::connect(addr).await.unwrap();
        drop(b);

        let mut saw_frame = false;
        for _ in 0..8 {
            let line = a_lines.next_line().await.unwrap().unwrap();
            if matches!(
                decode_event(&line).unwrap(),
                Event::FullFrame { .. } | Event::PartialFrame { .. }
            ) {
                saw_frame = true;
                break;
            }
        }
        assert!(saw_frame);
    }

    #[tokio::test]
    async fn test_requestfullframe_emits_fullframe() {
        let addr = start_server().await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(init_line(&unique_map("rff")).as_bytes())
            .await
            .unwrap();
        stream
            .write_all(b"{\"command\":\"requestfullframe\"}\n")
            .await
            .unwrap();

        let mut lines = BufReader::new(stream).lines();
        let first = lines.next_line().await.unwrap().unwrap();
        assert!(matches!(decode_event(&first).unwrap(), Event::InitComplete));

        let mut saw_full = false;
        for _ in 0..8 {
            let line = lines.next_line().await.unwrap().unwrap();
            if matches!(decode_event(&line).unwrap(), Event::FullFrame { .. }) {
                saw_full = true;
                break;
            }
        }
        assert!(saw_full);
    }
}
