use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use pulse::net::resolve_server_addr;
use pulse::{
    Datagram, Envelope, HandshakeRequest, HandshakeResponse, NetworkEndpoint, Payload, Transport,
};

static PORT_COUNTER: AtomicU16 = AtomicU16::new(41000);

fn next_port() -> u16 {
    PORT_COUNTER.fetch_add(10, Ordering::SeqCst)
}

fn wait_for_datagram(transport: &mut Transport, timeout_ms: u64) -> Option<Datagram> {
    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(timeout_ms) {
        if let Some(datagram) = transport.try_recv() {
            return Some(datagram);
        }
        thread::sleep(Duration::from_millis(1));
    }
    None
}

fn wait_for_packet(
    endpoint: &mut NetworkEndpoint,
    timeout_ms: u64,
) -> Option<Vec<(Envelope, SocketAddr)>> {
    let start = Instant::now();
    while start.elapsed() < Duration::from_millis(timeout_ms) {
        let received = endpoint.receive().unwrap();
        if !received.is_empty() {
            return Some(received);
        }
        thread::sleep(Duration::from_millis(1));
    }
    None
}

#[test]
fn test_transport_to_endpoint_round_trip() {
    let port = next_port();
    let server_addr = resolve_server_addr("127.0.0.1", port).unwrap();

    let mut server = NetworkEndpoint::bind(server_addr).unwrap();
    let mut client = Transport::bind("127.0.0.1:0", 16).unwrap();

    let request = Envelope::new(
        1,
        Payload::HandshakeRequest(HandshakeRequest {
            client_name: "tester".into(),
        }),
    );
    let sent = client.send_envelope(&request, server_addr).unwrap();
    assert!(sent > 0);

    let received = wait_for_packet(&mut server, 500).expect("No packet received on server");
    assert_eq!(received.len(), 1);
    let (envelope, from) = &received[0];
    assert_eq!(*from, client.local_addr());
    assert_eq!(envelope, &request);

    server
        .send_payload(
            Payload::HandshakeResponse(HandshakeResponse::pending()),
            *from,
        )
        .unwrap();

    let datagram = wait_for_datagram(&mut client, 500).expect("No datagram received on client");
    assert_eq!(datagram.from, server_addr);

    let envelope = Envelope::deserialize(&datagram.data).unwrap();
    assert_eq!(envelope.seq, 1);
    match envelope.payload {
        Some(Payload::HandshakeResponse(response)) => assert!(response.is_pending()),
        other => panic!("Expected HandshakeResponse, got {:?}", other),
    }
}

#[test]
fn test_endpoint_drops_malformed_datagrams() {
    let port = next_port();
    let server_addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();

    let mut server = NetworkEndpoint::bind(server_addr).unwrap();
    let client = Transport::bind("127.0.0.1:0", 16).unwrap();

    client.send_to(&[0x12, 0x40, 0x01], server_addr).unwrap();
    let valid = Envelope::new(
        2,
        Payload::HandshakeRequest(HandshakeRequest {
            client_name: "after".into(),
        }),
    );
    client.send_envelope(&valid, server_addr).unwrap();

    let received = wait_for_packet(&mut server, 500).expect("No packet received on server");
    assert_eq!(received.len(), 1);
    assert_eq!(received[0].0.seq, 2);
    assert_eq!(server.stats().malformed_dropped, 1);
}

#[test]
fn test_full_inbox_drops_and_counts() {
    let port = next_port();
    let server_addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();

    let mut server = NetworkEndpoint::bind(server_addr).unwrap();
    let mut client = Transport::bind("127.0.0.1:0", 2).unwrap();
    let client_addr = client.local_addr();

    for _ in 0..10 {
        server
            .send_payload(
                Payload::HandshakeResponse(HandshakeResponse::pending()),
                client_addr,
            )
            .unwrap();
    }

    let start = Instant::now();
    while client.inbox_dropped() < 8 && start.elapsed() < Duration::from_millis(500) {
        thread::sleep(Duration::from_millis(1));
    }

    let drained = client.drain(usize::MAX);
    assert_eq!(drained.len(), 2);
    assert_eq!(client.inbox_dropped(), 8);
}

#[test]
fn test_sends_immediately_after_bind_are_delivered() {
    let port = next_port();
    let server_addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();

    let mut server = NetworkEndpoint::bind(server_addr).unwrap();
    let client = Transport::bind("127.0.0.1:0", 16).unwrap();

    for seq in 1..=3 {
        let envelope = Envelope::new(
            seq,
            Payload::HandshakeRequest(HandshakeRequest {
                client_name: "eager".into(),
            }),
        );
        assert!(client.send_envelope(&envelope, server_addr).unwrap() > 0);
    }

    let mut seqs = Vec::new();
    let start = Instant::now();
    while seqs.len() < 3 && start.elapsed() < Duration::from_millis(500) {
        seqs.extend(server.receive().unwrap().into_iter().map(|(e, _)| e.seq));
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(seqs, vec![1, 2, 3]);
}
