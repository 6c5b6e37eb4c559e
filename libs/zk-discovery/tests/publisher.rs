mod common;

use std::time::Duration;

use common::{
    env::DiscoveryEnv,
    utils::{addr, eventually},
};
use futures::StreamExt;
use tracing_test::traced_test;
use zk_discovery::{DiscoveryError, Publisher, PublisherState, Subscriber, options::session_timeout};

const SERVICE: &str = "/services/api";

#[tokio::test]
#[traced_test]
async fn test_publisher_end_to_end() {
    let env = DiscoveryEnv::start();
    let client = env.client(vec![]).await.unwrap();

    let publisher = Publisher::new(&client, SERVICE, "10.0.0.1:8080", addr)
        .await
        .unwrap();
    assert_eq!(publisher.state(), PublisherState::Registered);

    let entries = client.get_entries(SERVICE).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(
        entries.payloads().collect::<Vec<_>>(),
        vec![&b"10.0.0.1:8080"[..]]
    );
    let name = publisher.node_name().await.unwrap();
    assert_eq!(entries.get(&name), Some(&b"10.0.0.1:8080"[..]));

    publisher.stop().await.unwrap();
    assert!(client.get_entries(SERVICE).await.unwrap().is_empty());

    // a stopped client takes its registrations with it
    let _publisher = Publisher::new(&client, SERVICE, "10.0.0.2:8080", addr)
        .await
        .unwrap();
    assert_eq!(client.get_entries(SERVICE).await.unwrap().len(), 1);
    client.stop().await;

    let observer = env.client(vec![]).await.unwrap();
    assert!(observer.get_entries(SERVICE).await.unwrap().is_empty());
    observer.stop().await;
}

#[tokio::test]
async fn test_publishers_from_many_clients() {
    let env = DiscoveryEnv::start();
    let mut clients = Vec::new();
    let mut publishers = Vec::new();
    for port in 8080..8083 {
        let client = env.client(vec![]).await.unwrap();
        publishers.push(
            Publisher::new(&client, SERVICE, format!("10.0.0.1:{port}"), addr)
                .await
                .unwrap(),
        );
        clients.push(client);
    }

    let entries = clients[0].get_entries(SERVICE).await.unwrap();
    let mut payloads = entries
        .into_payloads()
        .into_iter()
        .map(|p| String::from_utf8(p).unwrap())
        .collect::<Vec<_>>();
    payloads.sort();
    assert_eq!(
        payloads,
        vec!["10.0.0.1:8080", "10.0.0.1:8081", "10.0.0.1:8082"]
    );

    // one client goes away, its instance with it
    clients.remove(1).stop().await;
    assert_eq!(clients[0].get_entries(SERVICE).await.unwrap().len(), 2);

    for client in clients {
        client.stop().await;
    }
}

#[tokio::test]
#[traced_test]
async fn test_watch_stream_sees_registrations() {
    let env = DiscoveryEnv::start();
    let watching = env.client(vec![]).await.unwrap();
    let publishing = env.client(vec![]).await.unwrap();
    watching.create_parent_nodes(SERVICE).await.unwrap();

    let mut stream = Box::pin(watching.watch_entries(SERVICE).into_stream());
    assert!(stream.next().await.unwrap().unwrap().is_empty());

    let publisher = Publisher::new(&publishing, SERVICE, "10.0.0.9:80", addr)
        .await
        .unwrap();
    let added = stream.next().await.unwrap().unwrap();
    assert_eq!(added.len(), 1);

    publisher.stop().await.unwrap();
    let removed = stream.next().await.unwrap().unwrap();
    assert!(removed.is_empty());

    watching.stop().await;
    assert_eq!(stream.next().await, Some(Err(DiscoveryError::ClientClosed)));
    assert_eq!(stream.next().await, None);
    publishing.stop().await;
}

#[tokio::test]
#[traced_test]
async fn test_registration_survives_session_expiry() {
    let env = DiscoveryEnv::start();
    let client = env
        .client(vec![session_timeout(Duration::from_secs(2))])
        .await
        .unwrap();
    let observer = env.client(vec![]).await.unwrap();
    let publisher = Publisher::new(&client, SERVICE, "10.0.0.1:8080", addr)
        .await
        .unwrap();
    let first = publisher.node().await.unwrap();
    let first_session = client.session_id();

    env.ensemble.expire_session(first_session);
    eventually("re-registration", || async {
        let entries = observer.get_entries(SERVICE).await.unwrap();
        entries.len() == 1 && !first.ends_with(entries.names().next().unwrap_or_default())
    })
    .await;

    assert_ne!(client.session_id(), first_session);
    assert_eq!(publisher.state(), PublisherState::Registered);
    assert!(env.ensemble.contains(&publisher.node().await.unwrap()));

    client.stop().await;
    observer.stop().await;
}

#[tokio::test]
async fn test_subscriber_follows_publishers() {
    let env = DiscoveryEnv::start();
    let client = env.client(vec![]).await.unwrap();
    let subscriber = Subscriber::new(&client, SERVICE, addr).await.unwrap();
    assert_eq!(subscriber.endpoints(), Ok(vec![]));

    let other = env.client(vec![]).await.unwrap();
    let first = Publisher::new(&other, SERVICE, "10.0.0.1:80", addr)
        .await
        .unwrap();
    let _second = Publisher::new(&other, SERVICE, "10.0.0.2:80", addr)
        .await
        .unwrap();
    // bad payloads are skipped, not fatal
    other
        .create_ephemeral_node(&format!("{SERVICE}/garbage"), &[0xff, 0xfe])
        .await
        .unwrap();

    eventually("both instances", || async {
        subscriber.endpoints().is_ok_and(|e| e.len() == 2)
    })
    .await;
    let mut endpoints = subscriber.endpoints().unwrap();
    endpoints.sort();
    assert_eq!(endpoints, vec!["10.0.0.1:80", "10.0.0.2:80"]);

    first.stop().await.unwrap();
    eventually("first instance gone", || async {
        subscriber.endpoints() == Ok(vec!["10.0.0.2:80".to_owned()])
    })
    .await;

    // the other client's session ends, so do its instances
    other.stop().await;
    eventually("all instances gone", || async {
        subscriber.endpoints() == Ok(vec![])
    })
    .await;

    subscriber.stop();
    client.stop().await;
}
