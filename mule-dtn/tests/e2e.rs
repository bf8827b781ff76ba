//! Multi-node scenarios on loopback: several in-process nodes wired
//! together through real sockets and real storage directories.

use mule_dtn::bundle::{Bundle, Eid};
use mule_dtn::codec;
use mule_dtn::config::Config;
use mule_dtn::neighbors::Neighbor;
use mule_dtn::node::Node;
use mule_dtn::{Bytes, DeliveryRecord};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

fn eid(s: &str) -> Eid {
    s.parse().unwrap()
}

/// Fast-cadence configuration bound to an ephemeral loopback port.
fn test_config(node_id: &str, dir: &Path) -> Config {
    Config {
        node_id: eid(node_id),
        listen_address: IpAddr::V4(Ipv4Addr::LOCALHOST),
        listen_port: 0,
        storage_dir: dir.join(format!("dtn_bundles_{node_id}")),
        delivery_log: Some(dir.join(format!("dtn_delivery_{node_id}.json"))),
        sweeper_period: Duration::from_millis(500),
        resend_period: Duration::from_millis(500),
        retry_initial: Duration::from_millis(100),
        retry_cap: Duration::from_secs(1),
        connect_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

fn neighbor(eid: &str, addr: SocketAddr) -> Neighbor {
    Neighbor {
        eid: eid.parse().unwrap(),
        host: addr.ip().to_string(),
        port: addr.port(),
    }
}

/// Poll `condition` until it holds or the deadline passes.
async fn wait_for(condition: impl Fn() -> bool, deadline: Duration) -> bool {
    let start = tokio::time::Instant::now();
    while start.elapsed() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    condition()
}

fn read_delivery_log(path: &Path) -> Vec<DeliveryRecord> {
    let Ok(contents) = std::fs::read_to_string(path) else {
        return Vec::new();
    };
    contents
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

/// A loopback address that nothing is listening on, for outage and
/// partition scenarios. Reserved briefly, then released.
async fn unused_addr() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
        .await
        .unwrap();
    listener.local_addr().unwrap()
}

#[tokio::test]
async fn direct_delivery() {
    let dir = tempfile::tempdir().unwrap();

    let b = Node::start(test_config("b", dir.path()), None).await.unwrap();
    let mut config_a = test_config("a", dir.path());
    config_a.neighbors = vec![neighbor("b", b.listen_addr())];
    let a = Node::start(config_a, None).await.unwrap();

    let bundle_id = a
        .submit(eid("b"), Bytes::from_static(b"hello"), Some(Duration::from_secs(60)))
        .await;

    assert!(
        wait_for(|| b.metrics().bundles_delivered == 1, Duration::from_secs(10)).await,
        "bundle was not delivered: {:?}",
        b.metrics()
    );

    let records = read_delivery_log(&dir.path().join("dtn_delivery_b.json"));
    assert_eq!(records.len(), 1);
    let record = &records[0];
    assert_eq!(record.bundle_id, bundle_id);
    assert_eq!(record.source, eid("a"));
    assert_eq!(record.hop_count, 1);
    assert_eq!(record.path, vec![eid("a")]);
    assert!(record.e2e_delay >= 0.0);

    assert_eq!(a.metrics().bundles_sent, 1);
    assert!(wait_for(|| a.metrics().bundles_forwarded == 1, Duration::from_secs(5)).await);
    assert_eq!(b.metrics().bundles_received, 1);
}

#[tokio::test]
async fn two_hop_relay() {
    let dir = tempfile::tempdir().unwrap();

    let c = Node::start(test_config("c", dir.path()), None).await.unwrap();

    let mut config_r = test_config("r", dir.path());
    config_r.neighbors = vec![neighbor("c", c.listen_addr())];
    let r = Node::start(config_r, None).await.unwrap();

    let mut config_a = test_config("a", dir.path());
    config_a.neighbors = vec![neighbor("r", r.listen_addr())];
    let a = Node::start(config_a, None).await.unwrap();

    a.submit(eid("c"), Bytes::from_static(b"x"), Some(Duration::from_secs(60)))
        .await;

    assert!(
        wait_for(|| c.metrics().bundles_delivered == 1, Duration::from_secs(10)).await,
        "bundle did not cross the relay: {:?}",
        c.metrics()
    );

    let records = read_delivery_log(&dir.path().join("dtn_delivery_c.json"));
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].hop_count, 2);
    assert_eq!(records[0].path, vec![eid("a"), eid("r")]);

    assert!(wait_for(|| r.metrics().bundles_forwarded == 1, Duration::from_secs(5)).await);
    assert_eq!(r.metrics().bundles_received, 1);
}

#[tokio::test]
async fn duplicate_suppression() {
    let dir = tempfile::tempdir().unwrap();
    let c = Node::start(test_config("c", dir.path()), None).await.unwrap();

    // The same bundle image retransmitted on two connections
    let mut bundle = Bundle::new(eid("a"), eid("c"), Bytes::from_static(b"dup"), 60);
    bundle.record_hop(&eid("a"));
    let image = codec::encode(&bundle);

    for _ in 0..2 {
        let mut stream = tokio::net::TcpStream::connect(c.listen_addr()).await.unwrap();
        stream
            .write_all(&(image.len() as u32).to_be_bytes())
            .await
            .unwrap();
        stream.write_all(&image).await.unwrap();
        stream.shutdown().await.unwrap();
        // Clean close from the receiver acknowledges the frame
        let mut sink = Vec::new();
        stream.read_to_end(&mut sink).await.unwrap();
    }

    assert!(wait_for(|| c.metrics().bundles_duplicate == 1, Duration::from_secs(5)).await);
    let snapshot = c.metrics();
    assert_eq!(snapshot.bundles_delivered, 1);
    assert_eq!(snapshot.bundles_received, 1);
    assert_eq!(snapshot.bundles_stored, 1);

    let records = read_delivery_log(&dir.path().join("dtn_delivery_c.json"));
    assert_eq!(records.len(), 1);
}

#[tokio::test]
async fn expiration_without_contact() {
    let dir = tempfile::tempdir().unwrap();

    let mut config_a = test_config("a", dir.path());
    config_a.neighbors = vec![neighbor("r", unused_addr().await)];
    let a = Node::start(config_a, None).await.unwrap();

    a.submit(eid("c"), Bytes::from_static(b"z"), Some(Duration::from_secs(1)))
        .await;
    assert_eq!(a.metrics().bundles_stored, 1);

    assert!(
        wait_for(
            || {
                let m = a.metrics();
                m.bundles_stored == 0 && m.bundles_expired >= 1
            },
            Duration::from_secs(10)
        )
        .await,
        "bundle did not expire: {:?}",
        a.metrics()
    );
    assert_eq!(a.metrics().bundles_forwarded, 0);
}

#[tokio::test]
async fn malformed_frames_are_counted_and_survived() {
    let dir = tempfile::tempdir().unwrap();
    let c = Node::start(test_config("c", dir.path()), None).await.unwrap();

    // Valid length prefix, garbage body
    let mut stream = tokio::net::TcpStream::connect(c.listen_addr()).await.unwrap();
    stream.write_all(&7u32.to_be_bytes()).await.unwrap();
    stream.write_all(b"garbage").await.unwrap();
    stream.shutdown().await.unwrap();
    drop(stream);

    // Oversize length prefix
    let mut stream = tokio::net::TcpStream::connect(c.listen_addr()).await.unwrap();
    stream.write_all(&u32::MAX.to_be_bytes()).await.unwrap();
    stream.shutdown().await.unwrap();
    drop(stream);

    assert!(wait_for(|| c.metrics().malformed_frames == 2, Duration::from_secs(5)).await);

    // The node still accepts well-formed bundles afterwards
    let mut bundle = Bundle::new(eid("a"), eid("c"), Bytes::from_static(b"ok"), 60);
    bundle.record_hop(&eid("a"));
    let image = codec::encode(&bundle);
    let mut stream = tokio::net::TcpStream::connect(c.listen_addr()).await.unwrap();
    stream
        .write_all(&(image.len() as u32).to_be_bytes())
        .await
        .unwrap();
    stream.write_all(&image).await.unwrap();
    stream.shutdown().await.unwrap();

    assert!(wait_for(|| c.metrics().bundles_delivered == 1, Duration::from_secs(5)).await);
}

#[tokio::test]
async fn restart_recovers_and_delivers() {
    let dir = tempfile::tempdir().unwrap();
    let storage_dir = dir.path().join("dtn_bundles_a");

    // First life: no reachable neighbor, so the bundle only lands on disk
    let bundle_id = {
        let mut config = test_config("a", dir.path());
        config.storage_dir = storage_dir.clone();
        let a = Node::start(config, None).await.unwrap();
        let id = a
            .submit(eid("c"), Bytes::from_static(b"w"), Some(Duration::from_secs(300)))
            .await;

        // Durable before submit returns
        assert!(storage_dir.join(id.as_str()).is_file());
        a.shutdown().await;
        id
    };

    // Second life, same storage directory, now with a route to c
    let c = Node::start(test_config("c", dir.path()), None).await.unwrap();
    let mut config = test_config("a", dir.path());
    config.storage_dir = storage_dir;
    config.neighbors = vec![neighbor("c", c.listen_addr())];
    let a = Node::start(config, None).await.unwrap();
    assert_eq!(a.metrics().bundles_stored, 1);

    assert!(
        wait_for(|| c.metrics().bundles_delivered == 1, Duration::from_secs(10)).await,
        "recovered bundle was not delivered: {:?}",
        c.metrics()
    );

    let records = read_delivery_log(&dir.path().join("dtn_delivery_c.json"));
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].bundle_id, bundle_id);
    assert_eq!(records[0].source, eid("a"));
    assert_eq!(records[0].path, vec![eid("a")]);
}

#[tokio::test]
async fn outage_survival() {
    let dir = tempfile::tempdir().unwrap();

    // Nothing is listening at b's address yet: the link is down
    let b_addr = unused_addr().await;

    let mut config_a = test_config("a", dir.path());
    config_a.neighbors = vec![neighbor("b", b_addr)];
    let a = Node::start(config_a, None).await.unwrap();

    a.submit(eid("b"), Bytes::from_static(b"y"), Some(Duration::from_secs(600)))
        .await;

    // Transmissions fail while the link is down; the bundle stays stored
    assert!(wait_for(|| a.metrics().transport_errors >= 1, Duration::from_secs(5)).await);
    let during_outage = a.metrics();
    assert!(during_outage.bundles_stored >= 1);
    assert_eq!(during_outage.bundles_expired, 0);
    assert_eq!(during_outage.bundles_forwarded, 0);

    // Link restored: bring b up on the address a was told about
    let mut config_b = test_config("b", dir.path());
    config_b.listen_port = b_addr.port();
    let b = Node::start(config_b, None).await.unwrap();

    assert!(
        wait_for(|| b.metrics().bundles_delivered == 1, Duration::from_secs(15)).await,
        "bundle did not arrive after the outage: {:?}",
        b.metrics()
    );
    assert_eq!(a.metrics().bundles_expired, 0);
}

#[tokio::test]
async fn application_hook_observes_delivery() {
    struct Recorder(tokio::sync::mpsc::UnboundedSender<(Bytes, DeliveryRecord)>);

    #[mule_dtn::async_trait]
    impl mule_dtn::service::Application for Recorder {
        async fn on_delivery(&self, bundle: &Bundle, record: &DeliveryRecord) {
            _ = self.0.send((bundle.payload.clone(), record.clone()));
        }
    }

    let dir = tempfile::tempdir().unwrap();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

    let b = Node::start(test_config("b", dir.path()), Some(Arc::new(Recorder(tx))))
        .await
        .unwrap();
    let mut config_a = test_config("a", dir.path());
    config_a.neighbors = vec![neighbor("b", b.listen_addr())];
    let a = Node::start(config_a, None).await.unwrap();

    let bundle_id = a
        .submit(eid("b"), Bytes::from_static(b"ping"), Some(Duration::from_secs(60)))
        .await;

    let (payload, record) = tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("application hook was not invoked")
        .unwrap();
    assert_eq!(payload, Bytes::from_static(b"ping"));
    assert_eq!(record.bundle_id, bundle_id);
    assert_eq!(record.source, eid("a"));
}
