use crate::connection::Connection;
use crate::error::{Result, Role, SessionError};
use crate::job_registry::JobRegistry;
use crate::metrics::BrokerMetrics;
use crate::worker_registry::WorkerRegistry;
use futures::{Stream, StreamExt};
use gearman_protocol::{Packet, PacketType, ProtocolError};
use std::sync::Arc;
use tracing::debug;

/// Packet loop for a connection that submits jobs
pub struct ClientSession {
    connection: Connection,
    jobs: Arc<JobRegistry>,
    workers: Arc<WorkerRegistry>,
    metrics: Arc<BrokerMetrics>,
}

impl ClientSession {
    pub fn new(
        connection: Connection,
        jobs: Arc<JobRegistry>,
        workers: Arc<WorkerRegistry>,
        metrics: Arc<BrokerMetrics>,
    ) -> Self {
        ClientSession {
            connection,
            jobs,
            workers,
            metrics,
        }
    }

    /// Run the session until the connection closes or fails.
    ///
    /// `first` is the submission that classified the connection and goes
    /// through the same handler as every later packet.
    pub async fn run<S>(self, first: Packet, packets: &mut S) -> Result<()>
    where
        S: Stream<Item = std::result::Result<Packet, ProtocolError>> + Unpin,
    {
        self.metrics.clients_connected.inc();
        let result = self.serve(first, packets).await;
        self.metrics.clients_connected.dec();
        result
    }

    async fn serve<S>(&self, first: Packet, packets: &mut S) -> Result<()>
    where
        S: Stream<Item = std::result::Result<Packet, ProtocolError>> + Unpin,
    {
        self.handle_packet(first)?;

        while let Some(packet) = packets.next().await {
            self.handle_packet(packet?)?;
        }

        debug!("Client {} disconnected", self.connection.id());
        Ok(())
    }

    /// Handle a protocol packet
    pub fn handle_packet(&self, packet: Packet) -> Result<()> {
        match packet.packet_type {
            PacketType::SubmitJob => self.handle_submit(&packet, false),
            PacketType::SubmitJobBg => self.handle_submit(&packet, true),
            other => Err(SessionError::UnexpectedPacket {
                role: Role::Client,
                packet_type: other,
            }),
        }
    }

    /// Queue a job, wake a worker for it and, for foreground jobs, reply with its handle.
    ///
    /// Payload fields: function name, client job id, job payload.
    fn handle_submit(&self, packet: &Packet, background: bool) -> Result<()> {
        let args = packet.splitn_args(3);
        if args.len() < 3 {
            return Err(SessionError::MissingArguments {
                packet_type: packet.packet_type,
                expected: 3,
                actual: args.len(),
            });
        }

        let function = std::str::from_utf8(args[0])
            .map_err(|_| SessionError::InvalidArgument("function name is not UTF-8".to_string()))?;
        let unique_id = packet.payload.slice_ref(args[1]);
        let payload = packet.payload.slice_ref(args[2]);

        // Background jobs never relay status back to the submitter
        let client = (!background).then(|| self.connection.clone());
        let handle = self.jobs.enqueue(function, unique_id, payload, client);

        self.metrics.inc_jobs_submitted(function, background);
        self.metrics.jobs_pending.set(self.jobs.len() as i64);
        debug!(
            "Client {} submitted job {} for {}",
            self.connection.id(),
            handle,
            function
        );

        if self.workers.notify_one(function) {
            self.metrics.worker_wakeups_total.inc();
        }

        if background {
            return Ok(());
        }
        self.connection
            .send(Packet::response(PacketType::JobCreated, handle.into_bytes()))
    }
}
