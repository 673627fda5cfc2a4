use crate::connection::Connection;
use crate::error::{Result, Role, SessionError};
use crate::job_registry::{Job, JobRegistry};
use crate::metrics::BrokerMetrics;
use crate::worker_registry::WorkerRegistry;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use gearman_protocol::{Code, Packet, PacketType, ProtocolError};
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct WorkerState {
    asleep: bool,
    assigned: Option<Job>,
}

/// State of one worker connection shared with the worker registry
#[derive(Debug)]
pub struct WorkerHandle {
    connection: Connection,
    state: Mutex<WorkerState>,
}

impl WorkerHandle {
    pub fn new(connection: Connection) -> Self {
        WorkerHandle {
            connection,
            state: Mutex::new(WorkerState::default()),
        }
    }

    pub fn id(&self) -> u64 {
        self.connection.id()
    }

    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    pub fn sleep(&self) {
        self.state.lock().asleep = true;
    }

    pub fn is_asleep(&self) -> bool {
        self.state.lock().asleep
    }

    /// Send a NOOP if the worker is asleep.
    ///
    /// Returns whether the worker was woken. A successful wake clears the sleep
    /// flag; the worker has to send PRE_SLEEP again to be woken again.
    pub fn wake(&self) -> Result<bool> {
        let mut state = self.state.lock();
        if !state.asleep {
            return Ok(false);
        }
        self.connection
            .send(Packet::response(PacketType::Noop, Bytes::new()))?;
        state.asleep = false;
        Ok(true)
    }

    /// A worker asking for work is awake, whatever it last announced.
    fn mark_awake(&self) {
        self.state.lock().asleep = false;
    }

    /// Replace the assigned job after a grab, returning the previous one.
    fn assign(&self, job: Option<Job>) -> Option<Job> {
        let mut state = self.state.lock();
        state.asleep = false;
        std::mem::replace(&mut state.assigned, job)
    }

    /// Drop the assignment without touching the sleep flag.
    fn release(&self) -> Option<Job> {
        self.state.lock().assigned.take()
    }

    #[cfg(test)]
    pub(crate) fn assigned_handle(&self) -> Option<String> {
        self.state.lock().assigned.as_ref().map(|job| job.handle.clone())
    }

    /// Relay target for a work update. Terminal updates release the assignment.
    fn relay_target(&self, terminal: bool) -> Option<(String, Option<Connection>)> {
        let mut state = self.state.lock();
        if terminal {
            state.assigned.take().map(|job| (job.handle, job.client))
        } else {
            state
                .assigned
                .as_ref()
                .map(|job| (job.handle.clone(), job.client.clone()))
        }
    }
}

/// Packet loop for a connection that declared a capability
pub struct WorkerSession {
    worker: Arc<WorkerHandle>,
    functions: Vec<String>,
    jobs: Arc<JobRegistry>,
    workers: Arc<WorkerRegistry>,
    metrics: Arc<BrokerMetrics>,
}

impl WorkerSession {
    pub fn new(
        connection: Connection,
        jobs: Arc<JobRegistry>,
        workers: Arc<WorkerRegistry>,
        metrics: Arc<BrokerMetrics>,
    ) -> Self {
        WorkerSession {
            worker: Arc::new(WorkerHandle::new(connection)),
            functions: Vec::new(),
            jobs,
            workers,
            metrics,
        }
    }

    #[cfg(test)]
    pub(crate) fn worker(&self) -> &Arc<WorkerHandle> {
        &self.worker
    }

    #[cfg(test)]
    pub(crate) fn functions(&self) -> &[String] {
        &self.functions
    }

    /// Run the session until the connection closes or fails.
    ///
    /// `first` must be the CAN_DO packet that classified the connection.
    pub async fn run<S>(mut self, first: Packet, packets: &mut S) -> Result<()>
    where
        S: Stream<Item = std::result::Result<Packet, ProtocolError>> + Unpin,
    {
        self.metrics.workers_connected.inc();
        let result = self.serve(first, packets).await;
        self.teardown();
        self.metrics.workers_connected.dec();
        result
    }

    async fn serve<S>(&mut self, first: Packet, packets: &mut S) -> Result<()>
    where
        S: Stream<Item = std::result::Result<Packet, ProtocolError>> + Unpin,
    {
        if first.packet_type != PacketType::CanDo {
            return Err(SessionError::UnexpectedPacket {
                role: Role::Worker,
                packet_type: first.packet_type,
            });
        }
        self.handle_packet(first)?;

        while let Some(packet) = packets.next().await {
            self.handle_packet(packet?)?;
        }

        debug!("Worker {} disconnected", self.worker.id());
        Ok(())
    }

    /// Handle a protocol packet
    pub fn handle_packet(&mut self, packet: Packet) -> Result<()> {
        match packet.packet_type {
            PacketType::CanDo => self.handle_can_do(&packet),
            PacketType::PreSleep => {
                self.worker.sleep();
                debug!("Worker {} is sleeping", self.worker.id());
                Ok(())
            }
            PacketType::GrabJob => {
                self.worker.mark_awake();
                debug!("Ignoring GRAB_JOB from worker {}", self.worker.id());
                Ok(())
            }
            PacketType::GrabJobUniq => self.handle_grab_job_uniq(),
            PacketType::WorkData
            | PacketType::WorkWarning
            | PacketType::WorkComplete
            | PacketType::WorkFail => self.handle_work_update(packet),
            other => Err(SessionError::UnexpectedPacket {
                role: Role::Worker,
                packet_type: other,
            }),
        }
    }

    /// Register for a function name
    fn handle_can_do(&mut self, packet: &Packet) -> Result<()> {
        let function = std::str::from_utf8(&packet.payload)
            .map_err(|_| SessionError::InvalidArgument("function name is not UTF-8".to_string()))?
            .to_string();

        if self.functions.contains(&function) {
            return Ok(());
        }

        self.workers.register(&function, self.worker.clone());
        info!("Worker {} can do {}", self.worker.id(), function);
        self.functions.push(function);
        Ok(())
    }

    /// Hand out one pending job, trying functions in declaration order
    fn handle_grab_job_uniq(&mut self) -> Result<()> {
        let job = self
            .functions
            .iter()
            .find_map(|function| self.jobs.take_one(function));
        self.metrics.jobs_pending.set(self.jobs.len() as i64);

        let response = match &job {
            Some(job) => {
                debug!(
                    "Assigning job {} ({}) to worker {}",
                    job.handle,
                    job.function,
                    self.worker.id()
                );
                self.metrics.jobs_assigned_total.inc();
                Packet::with_args(
                    Code::Response,
                    PacketType::JobAssignUniq,
                    &[
                        job.handle.as_bytes(),
                        job.function.as_bytes(),
                        b"",
                        &job.payload[..],
                    ],
                )
            }
            None => Packet::response(PacketType::NoJob, Bytes::new()),
        };

        if let Some(previous) = self.worker.assign(job) {
            warn!(
                "Worker {} requested a new job before finishing {}, dropping it",
                self.worker.id(),
                previous.handle
            );
        }

        self.worker.connection().send(response)
    }

    /// Relay a status packet to the client that submitted the assigned job
    fn handle_work_update(&mut self, packet: Packet) -> Result<()> {
        let terminal = packet.packet_type.is_terminal();

        let Some((handle, client)) = self.worker.relay_target(terminal) else {
            warn!(
                "Worker {} sent {:?} with no job assigned, ignoring",
                self.worker.id(),
                packet.packet_type
            );
            return Ok(());
        };

        match packet.packet_type {
            PacketType::WorkComplete => self.metrics.inc_jobs_finished("complete"),
            PacketType::WorkFail => self.metrics.inc_jobs_finished("fail"),
            _ => {}
        }

        match client {
            Some(client) => {
                if let Err(e) = client.send(packet) {
                    warn!("Could not relay update for job {}: {}", handle, e);
                }
            }
            None => debug!("Job {} has no client to relay to", handle),
        }

        Ok(())
    }

    fn teardown(&self) {
        self.workers.deregister(&self.worker);
        if let Some(job) = self.worker.release() {
            warn!(
                "Worker {} went away while running job {}, dropping it",
                self.worker.id(),
                job.handle
            );
        }
    }
}
