use crate::client_session::ClientSession;
use crate::config::BrokerConfig;
use crate::connection::Connection;
use crate::error::{Result, Role, SessionError};
use crate::job_registry::JobRegistry;
use crate::metrics::BrokerMetrics;
use crate::worker_registry::WorkerRegistry;
use crate::worker_session::WorkerSession;
use gearman_protocol::{PacketCodec, PacketType};

use futures::StreamExt;
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Notify;
use tokio_util::codec::FramedRead;

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Job broker: accepts connections and hands each one to a worker or client session
pub struct Broker {
    config: Arc<BrokerConfig>,
    jobs: Arc<JobRegistry>,
    workers: Arc<WorkerRegistry>,
    metrics: Arc<BrokerMetrics>,
    shutdown: Arc<Notify>,
    next_connection_id: AtomicU64,
}

impl Broker {
    pub fn new(config: BrokerConfig) -> anyhow::Result<Self> {
        let hostname = config.resolve_hostname()?;
        info!(
            "Issuing job handles as H:{}:<n> ({:?} dispatch)",
            hostname, config.broker.dispatch_order
        );

        let jobs = JobRegistry::new(hostname, config.broker.dispatch_order);
        let workers = WorkerRegistry::new();
        let metrics = BrokerMetrics::new()?;

        Ok(Broker {
            config: Arc::new(config),
            jobs: Arc::new(jobs),
            workers: Arc::new(workers),
            metrics: Arc::new(metrics),
            shutdown: Arc::new(Notify::new()),
            next_connection_id: AtomicU64::new(1),
        })
    }

    /// Bind the configured listen address
    pub async fn bind(&self) -> anyhow::Result<TcpListener> {
        let addr = self.config.listen_addr();
        let listener = TcpListener::bind(&addr).await?;
        info!("Broker listening on {}", listener.local_addr()?);
        Ok(listener)
    }

    /// Bind and serve until shutdown
    pub async fn run(self: Arc<Self>) -> anyhow::Result<()> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Accept connections on `listener` until shutdown
    pub async fn serve(self: Arc<Self>, listener: TcpListener) -> anyhow::Result<()> {
        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            debug!("New connection from {}", addr);
                            let broker = self.clone();
                            tokio::spawn(async move {
                                if let Err(e) = broker.handle_connection(stream, addr).await {
                                    broker.metrics.inc_connection_errors(e.kind());
                                    match e.kind() {
                                        "transport" => warn!("Connection {} closed: {}", addr, e),
                                        _ => error!("Error handling connection {}: {}", addr, e),
                                    }
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = self.shutdown.notified() => {
                    info!("Shutting down broker");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Handle one accepted connection for its whole lifetime
    async fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let (read_half, write_half) = stream.into_split();
        let (connection, _writer) = Connection::spawn(id, write_half);
        let mut packets = FramedRead::new(read_half, PacketCodec);

        let result = self.dispatch(&connection, &mut packets).await;

        if let Some(packet) = result.as_ref().err().and_then(SessionError::to_error_packet) {
            let _ = connection.send(packet);
        }
        connection.close();
        debug!("Connection {} from {} finished", id, addr);

        result
    }

    /// Classify the connection by its first packet and run the matching session
    async fn dispatch(
        &self,
        connection: &Connection,
        packets: &mut FramedRead<OwnedReadHalf, PacketCodec>,
    ) -> Result<()> {
        let first = match packets.next().await {
            Some(packet) => packet?,
            None => {
                debug!("Connection {} closed before sending a packet", connection.id());
                return Ok(());
            }
        };

        match first.packet_type {
            PacketType::CanDo => {
                let session = WorkerSession::new(
                    connection.clone(),
                    self.jobs.clone(),
                    self.workers.clone(),
                    self.metrics.clone(),
                );
                session.run(first, packets).await
            }
            PacketType::SubmitJob | PacketType::SubmitJobBg => {
                let session = ClientSession::new(
                    connection.clone(),
                    self.jobs.clone(),
                    self.workers.clone(),
                    self.metrics.clone(),
                );
                session.run(first, packets).await
            }
            other => Err(SessionError::UnexpectedPacket {
                role: Role::Unclassified,
                packet_type: other,
            }),
        }
    }

    /// Get metrics registry
    pub fn metrics(&self) -> Arc<BrokerMetrics> {
        self.metrics.clone()
    }

    /// Get job registry
    pub fn jobs(&self) -> Arc<JobRegistry> {
        self.jobs.clone()
    }

    /// Get worker registry
    pub fn workers(&self) -> Arc<WorkerRegistry> {
        self.workers.clone()
    }

    /// Stop accepting connections. Sessions already running are left alone.
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }
}
