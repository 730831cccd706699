//! End-to-end check over real UDP sockets on the loopback interface.

use futures::StreamExt;
use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;
use tokio::net::UdpSocket;
use upel_icp::{
    Arbiter, ArbiterConfig, DataType, IcpError, Identity, Packet, PacketKind, RegisterKey, Value,
};

const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Minimal instrument: answers discovery and returns 3.14 for every register read.
async fn run_instrument(socket: UdpSocket) {
    let mut buf = [0u8; 1024];
    loop {
        let Ok((len, from)) = socket.recv_from(&mut buf).await else {
            return;
        };
        let Ok(request) = Packet::decode(&buf[..len]) else {
            continue;
        };

        let reply = match request.kind {
            PacketKind::Discovery => Packet::discovery_response(&Identity::new("UPEL", "Loopback")),
            PacketKind::RegisterRead => {
                let mut payload = request.payload.to_vec();
                payload.extend_from_slice(&3.14f32.to_be_bytes());
                Packet::response(request.kind, request.transaction_id, payload)
            }
            _ => continue,
        };
        let wire = reply.encode().expect("reply fits");
        let _ = socket.send_to(&wire, from).await;
    }
}

#[tokio::test]
async fn probe_then_read_over_loopback() {
    init_tracing();

    let instrument = UdpSocket::bind((LOCALHOST, 0)).await.unwrap();
    let instrument_port = instrument.local_addr().unwrap().port();
    tokio::spawn(run_instrument(instrument));

    let config = ArbiterConfig::default()
        .with_bind_address(LOCALHOST)
        .with_port(0)
        .with_remote_port(instrument_port)
        .with_default_ttl(Duration::from_secs(2));
    let arbiter = Arbiter::start(config).await.unwrap();
    assert_ne!(arbiter.local_addr().port(), 0);

    let mut events = arbiter.device_events();
    arbiter.probe(LOCALHOST).unwrap();
    let found = tokio::time::timeout(Duration::from_secs(5), events.next()).await.unwrap().unwrap();
    assert_eq!(found.address, LOCALHOST);
    assert_eq!(found.identity.model, "Loopback");

    let device = arbiter.device(LOCALHOST).unwrap();
    let value = device.read_register(RegisterKey::new(0x2122, 1), DataType::Float, None).await.unwrap();
    assert_eq!(value, Value::Float(3.14));

    let stats = arbiter.stats();
    assert_eq!(stats.sent, 2);
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.malformed, 0);

    arbiter.shutdown().await;
}

#[tokio::test]
async fn occupied_port_is_a_bind_error() {
    init_tracing();

    let holder = UdpSocket::bind((LOCALHOST, 0)).await.unwrap();
    let port = holder.local_addr().unwrap().port();

    let config = ArbiterConfig::default().with_bind_address(LOCALHOST).with_port(port);
    let err = Arbiter::start(config).await.unwrap_err();
    assert!(matches!(err, IcpError::Bind { address, .. } if address.port() == port));
    assert!(!err.is_retryable());
}
