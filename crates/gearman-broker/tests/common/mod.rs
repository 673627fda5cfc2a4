//! Shared helpers for driving a live broker over TCP.

#![allow(dead_code)]

use futures::{SinkExt, StreamExt};
use gearman_broker::{Broker, BrokerConfig, DispatchOrder};
use gearman_protocol::{Packet, PacketCodec, PacketType};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;

pub const HOSTNAME: &str = "test-host";
const RECV_TIMEOUT: Duration = Duration::from_secs(5);
const SILENCE: Duration = Duration::from_millis(200);

pub type Conn = Framed<TcpStream, PacketCodec>;

pub struct TestBroker {
    pub broker: Arc<Broker>,
    pub addr: SocketAddr,
    pub task: JoinHandle<anyhow::Result<()>>,
}

pub async fn start_broker(order: DispatchOrder) -> TestBroker {
    let mut config = BrokerConfig::default();
    config.broker.host = "127.0.0.1".to_string();
    config.broker.port = 0;
    config.broker.hostname = Some(HOSTNAME.to_string());
    config.broker.dispatch_order = order;

    let broker = Arc::new(Broker::new(config).unwrap());
    let listener = broker.bind().await.unwrap();
    let addr = listener.local_addr().unwrap();
    let task = tokio::spawn(broker.clone().serve(listener));

    TestBroker { broker, addr, task }
}

pub async fn connect(addr: SocketAddr) -> Conn {
    let stream = TcpStream::connect(addr).await.unwrap();
    Framed::new(stream, PacketCodec)
}

pub async fn send(conn: &mut Conn, packet: Packet) {
    conn.send(packet).await.unwrap();
}

pub async fn send_request(conn: &mut Conn, packet_type: PacketType, payload: &'static [u8]) {
    send(conn, Packet::request(packet_type, payload)).await;
}

/// Next packet from the broker, failing the test on timeout or EOF.
pub async fn recv(conn: &mut Conn) -> Packet {
    tokio::time::timeout(RECV_TIMEOUT, conn.next())
        .await
        .expect("timed out waiting for packet")
        .expect("connection closed")
        .expect("decode error")
}

/// Assert nothing arrives for a short while.
pub async fn expect_silence(conn: &mut Conn) {
    if let Ok(item) = tokio::time::timeout(SILENCE, conn.next()).await {
        panic!("expected no packet, got {:?}", item);
    }
}

/// Assert the broker closes the connection.
pub async fn expect_closed(conn: &mut Conn) {
    let item = tokio::time::timeout(RECV_TIMEOUT, conn.next())
        .await
        .expect("timed out waiting for close");
    match item {
        None | Some(Err(_)) => {}
        Some(Ok(packet)) => panic!("expected close, got {:?}", packet),
    }
}

/// Poll `condition` until it holds.
pub async fn wait_for(mut condition: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "condition never held");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Connect a worker registered for `function`, which must have no pending jobs.
pub async fn connect_worker(test: &TestBroker, function: &'static [u8]) -> Conn {
    let mut worker = connect(test.addr).await;
    send_request(&mut worker, PacketType::CanDo, function).await;
    // NO_JOB/assignment reply confirms the capability is registered
    send_request(&mut worker, PacketType::GrabJobUniq, b"").await;
    let reply = recv(&mut worker).await;
    assert_eq!(reply.packet_type, PacketType::NoJob);
    worker
}

/// Put a worker to sleep and wait until the broker has seen it.
pub async fn sleep_worker(test: &TestBroker, worker: &mut Conn, function: &str, sleeping: usize) {
    send_request(worker, PacketType::PreSleep, b"").await;
    let workers = test.broker.workers();
    wait_for(|| workers.count_sleeping(function) == sleeping).await;
}

/// Submit a foreground job and return its handle.
pub async fn submit(client: &mut Conn, payload: &'static [u8]) -> String {
    send_request(client, PacketType::SubmitJob, payload).await;
    let reply = recv(client).await;
    assert_eq!(reply.packet_type, PacketType::JobCreated);
    String::from_utf8(reply.payload.to_vec()).unwrap()
}
