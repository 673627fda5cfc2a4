use crate::error::{Result, SessionError};
use futures::SinkExt;
use gearman_protocol::{Packet, PacketCodec};
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedWrite;
use tracing::debug;

/// Packets that may wait for one peer before sends to it start failing.
pub const OUTBOUND_QUEUE_DEPTH: usize = 1024;

#[derive(Debug)]
pub(crate) enum Outbound {
    Packet(Packet),
    Close,
}

/// Write side of one broker connection.
///
/// All writers (the owning session, wake passes, relays from other sessions)
/// go through a single channel drained by one writer task, so frames are never
/// interleaved on the wire. The queue is bounded: a peer that stops reading
/// gets `QueueFull` errors instead of growing the broker's memory.
#[derive(Debug, Clone)]
pub struct Connection {
    id: u64,
    tx: mpsc::Sender<Outbound>,
}

impl Connection {
    /// Spawn the writer task for `writer` and return the handle feeding it.
    pub fn spawn<W>(id: u64, writer: W) -> (Self, JoinHandle<()>)
    where
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
        let sink = FramedWrite::new(writer, PacketCodec);
        let task = tokio::spawn(write_loop(id, sink, rx));
        (Connection { id, tx }, task)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    /// Queue a packet for this connection without waiting.
    pub fn send(&self, packet: Packet) -> Result<()> {
        self.tx
            .try_send(Outbound::Packet(packet))
            .map_err(|e| match e {
                TrySendError::Full(_) => SessionError::QueueFull(self.id),
                TrySendError::Closed(_) => SessionError::ConnectionClosed(self.id),
            })
    }

    /// Flush anything already queued, then shut the write side down.
    pub fn close(&self) {
        if let Err(TrySendError::Full(close)) = self.tx.try_send(Outbound::Close) {
            let tx = self.tx.clone();
            tokio::spawn(async move {
                let _ = tx.send(close).await;
            });
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

async fn write_loop<W>(
    id: u64,
    mut sink: FramedWrite<W, PacketCodec>,
    mut rx: mpsc::Receiver<Outbound>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(outbound) = rx.recv().await {
        match outbound {
            Outbound::Packet(packet) => {
                if let Err(e) = sink.send(packet).await {
                    debug!("Write to connection {} failed: {}", id, e);
                    break;
                }
            }
            Outbound::Close => break,
        }
    }

    rx.close();
    if let Err(e) = sink.close().await {
        debug!("Shutdown of connection {} failed: {}", id, e);
    }
}

#[cfg(test)]
pub(crate) fn test_pair(id: u64) -> (Connection, mpsc::Receiver<Outbound>) {
    let (tx, rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
    (Connection { id, tx }, rx)
}

/// Packets queued so far on a test connection.
#[cfg(test)]
pub(crate) fn queued_packets(rx: &mut mpsc::Receiver<Outbound>) -> Vec<Packet> {
    let mut packets = Vec::new();
    while let Ok(outbound) = rx.try_recv() {
        if let Outbound::Packet(packet) = outbound {
            packets.push(packet);
        }
    }
    packets
}
