mod common;

use std::{
    sync::{Arc, atomic::AtomicUsize, atomic::Ordering},
    time::Duration,
};

use common::{
    env::DiscoveryEnv,
    utils::{addr, eventually},
};
use tokio::sync::mpsc;
use tracing_test::traced_test;
use zk_discovery::{
    Acl, Client, DiscoveryError, Event, Perms, Publisher, SessionState, ZkError,
    options::{acl, connect_timeout, credentials, event_handler, payload, session_timeout},
};

#[tokio::test]
#[traced_test]
async fn test_new_client() {
    let env = DiscoveryEnv::unreachable();

    let err = Client::new(&env.ensemble, ["FailThisInvalidHost!!!"], vec![])
        .await
        .unwrap_err();
    assert_eq!(
        err,
        ZkError::InvalidEndpoint("FailThisInvalidHost!!!".to_owned())
    );

    let read_only = Acl::world(Perms::READ);
    let (events_tx, mut events_rx) = mpsc::unbounded_channel::<Event>();
    let client = Client::new(
        &env.ensemble,
        ["localhost"],
        vec![
            acl(read_only.clone()),
            connect_timeout(Duration::from_secs(3)),
            session_timeout(Duration::from_secs(20)),
            payload("I'm a", "test!"),
            event_handler(move |event| {
                let _ = events_tx.send(event.clone());
            }),
        ],
    )
    .await
    .expect("unreachable endpoints do not fail construction");

    let config = client.config();
    assert_eq!(config.endpoints(), ["localhost:2181".to_owned()]);
    assert_eq!(config.acl(), read_only.as_slice());
    assert_eq!(config.connect_timeout(), Duration::from_secs(3));
    assert_eq!(config.session_timeout(), Duration::from_secs(20));
    assert_eq!(
        config.root_payload(),
        &[b"I'm a".to_vec(), b"test!".to_vec()]
    );

    let first = tokio::time::timeout(Duration::from_millis(100), events_rx.recv())
        .await
        .expect("event handler should be called within 100ms")
        .unwrap();
    assert!(first.is_session());
    client.stop().await;
}

#[tokio::test]
async fn test_options() {
    let env = DiscoveryEnv::unreachable();

    // valid credentials only fail because nothing is listening
    let err = env
        .client(vec![credentials("valid", "credentials")])
        .await
        .unwrap_err();
    assert_eq!(err, ZkError::NoServer);

    assert_eq!(
        env.client(vec![credentials("nopass", "")]).await.unwrap_err(),
        DiscoveryError::InvalidCredentials
    );
    assert_eq!(
        env.client(vec![connect_timeout(Duration::ZERO)])
            .await
            .unwrap_err(),
        DiscoveryError::InvalidConnectTimeout
    );
    assert_eq!(
        env.client(vec![session_timeout(Duration::ZERO)])
            .await
            .unwrap_err(),
        DiscoveryError::InvalidSessionTimeout
    );

    // empty credentials mean no authentication at all
    let client = env.client(vec![credentials("", "")]).await.unwrap();
    assert!(client.config().credentials().is_none());
    client.stop().await;
}

#[tokio::test]
#[traced_test]
async fn test_create_parent_nodes_unreachable() {
    let env = DiscoveryEnv::unreachable();
    let client = env.client(vec![]).await.unwrap();

    assert_eq!(
        client.create_parent_nodes("/validpath").await,
        Err(DiscoveryError::Zk(ZkError::NoServer))
    );
    assert_eq!(
        client.create_parent_nodes("invalidpath").await,
        Err(DiscoveryError::Zk(ZkError::InvalidPath))
    );
    assert_eq!(
        client.create_parent_nodes("/a//b").await,
        Err(DiscoveryError::Zk(ZkError::InvalidPath))
    );

    let err = Publisher::new(&client, "/validpath", "a", addr)
        .await
        .unwrap_err();
    assert_eq!(err, ZkError::NoServer);
    let err = Publisher::new(&client, "invalidpath", "a", addr)
        .await
        .unwrap_err();
    assert_eq!(err, ZkError::InvalidPath);

    assert_eq!(
        client.get_entries("/validpath").await,
        Err(DiscoveryError::Zk(ZkError::NoServer))
    );

    client.stop().await;

    assert_eq!(
        client.create_parent_nodes("/validpath").await,
        Err(DiscoveryError::ClientClosed)
    );
    let err = Publisher::new(&client, "/validpath", "a", addr)
        .await
        .unwrap_err();
    assert_eq!(err, DiscoveryError::ClientClosed);
    assert_eq!(
        client.get_entries("/validpath").await,
        Err(DiscoveryError::ClientClosed)
    );
}

#[tokio::test]
async fn test_create_parent_nodes() {
    let env = DiscoveryEnv::start();
    let client = env
        .client(vec![payload("directory", "service")])
        .await
        .unwrap();

    client.create_parent_nodes("/org/team/svc").await.unwrap();
    // existing nodes count as created
    client.create_parent_nodes("/org/team/svc").await.unwrap();
    client.create_parent_nodes("/org/team").await.unwrap();

    assert_eq!(env.ensemble.node("/org").unwrap().0, b"directory");
    assert_eq!(env.ensemble.node("/org/team").unwrap().0, b"directory");
    assert_eq!(env.ensemble.node("/org/team/svc").unwrap().0, b"service");
    assert!(client.get_entries("/org/team/svc").await.unwrap().is_empty());
    client.stop().await;
}

#[tokio::test]
async fn test_concurrent_create_parent_nodes() {
    let env = DiscoveryEnv::start();
    let mut clients = Vec::new();
    for _ in 0..4 {
        clients.push(env.client(vec![]).await.unwrap());
    }

    let results = futures::future::join_all(
        clients
            .iter()
            .map(|client| client.create_parent_nodes("/race/a/b/c")),
    )
    .await;
    assert!(results.iter().all(Result::is_ok), "{results:?}");
    assert!(env.ensemble.contains("/race/a/b/c"));

    for client in clients {
        client.stop().await;
    }
}

#[tokio::test]
async fn test_create_parent_nodes_read_only_ancestor() {
    let env = DiscoveryEnv::start();
    let mut owner_acl = Acl::world(Perms::READ);
    owner_acl.extend(Acl::creator(Perms::ALL));
    let owner = env
        .client(vec![credentials("owner", "secret"), acl(owner_acl)])
        .await
        .unwrap();
    owner.create_parent_nodes("/locked/svc").await.unwrap();

    let stranger = env.client(vec![]).await.unwrap();
    stranger.create_parent_nodes("/locked/svc").await.unwrap();
    assert_eq!(
        stranger.create_parent_nodes("/locked/other").await,
        Err(DiscoveryError::Zk(ZkError::NoAuth))
    );
    assert!(stranger.get_entries("/locked/svc").await.unwrap().is_empty());

    owner.stop().await;
    stranger.stop().await;
}

#[tokio::test]
async fn test_get_entries_missing_path() {
    let env = DiscoveryEnv::start();
    let client = env.client(vec![]).await.unwrap();
    assert_eq!(
        client.get_entries("/nothing/here").await,
        Err(DiscoveryError::Zk(ZkError::NoNode))
    );
    client.stop().await;
}

#[tokio::test]
async fn test_event_handler_sees_reconnect() {
    let env = DiscoveryEnv::start();
    let has_session = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&has_session);
    let client = env
        .client(vec![event_handler(move |event| {
            if event.is_session() && event.state == SessionState::HasSession {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        })])
        .await
        .unwrap();

    eventually("first session", || async {
        has_session.load(Ordering::SeqCst) == 1
    })
    .await;
    env.ensemble.drop_connection(client.session_id());
    eventually("reconnect", || async {
        has_session.load(Ordering::SeqCst) == 2
    })
    .await;
    client.stop().await;
    assert_eq!(client.session_state(), SessionState::Closed);
}

#[tokio::test]
async fn test_from_config() {
    let env = DiscoveryEnv::start();
    let file = config::DiscoveryConfig::parse_str(
        r#"
endpoints:
  - localhost:2181
connect_timeout: 500ms
session_timeout: 3
payload:
  description: dir
  data: leaf
"#,
    )
    .unwrap();
    let client = Client::from_config(&env.ensemble, &file).await.unwrap();
    assert_eq!(client.config().connect_timeout(), Duration::from_millis(500));
    assert_eq!(client.config().session_timeout(), Duration::from_secs(3));

    client.create_parent_nodes("/cfg/svc").await.unwrap();
    assert_eq!(env.ensemble.node("/cfg").unwrap().0, b"dir");
    assert_eq!(env.ensemble.node("/cfg/svc").unwrap().0, b"leaf");
    client.stop().await;
}
