pub mod broker;
pub mod client_session;
pub mod config;
pub mod connection;
pub mod error;
pub mod job_registry;
pub mod metrics;
pub mod worker_registry;
pub mod worker_session;

pub use broker::Broker;
pub use config::BrokerConfig;
pub use error::{Result, Role, SessionError};
pub use job_registry::{DispatchOrder, Job, JobRegistry};
