use std::time::Duration;

use serde_json::{json, Value};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpStream,
};

use nodelist::{
    list::wire::{read_frame, write_frame},
    Address, ClientConfig, Error, Launcher, NodeClient, NodeService,
    ServiceConfig,
};

const MAX: u32 = 64 * 1024;

async fn raw_call(address: &Address, body: &[u8]) -> Value {
    let mut stream = TcpStream::connect((address.host.as_str(), address.port))
        .await
        .unwrap();
    write_frame(&mut stream, body, MAX).await.unwrap();
    let reply = read_frame(&mut stream, MAX).await.unwrap();
    serde_json::from_slice(&reply).unwrap()
}

fn client() -> NodeClient {
    NodeClient::new(
        ClientConfig::builder()
            .timeout(Duration::from_secs(2))
            .build(),
    )
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn get_node_info_uses_documented_shape() {
    let (address, handle) = Launcher::default().launch(5u8).await.unwrap();
    let reply = raw_call(&address, br#"{"type": "get_node_info"}"#).await;
    assert_eq!(
        reply,
        json!({"node_info": {"data": 5, "next_node_address": null, "version": 0}})
    );
    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn update_next_node_acknowledges() {
    let (address, handle) = Launcher::default().launch(5u8).await.unwrap();
    let reply = raw_call(
        &address,
        br#"{"type": "update_next_node", "next_node_address": ["localhost", 4242]}"#,
    )
    .await;
    assert_eq!(reply, json!({"status": "ok"}));

    let record = client().get_node_info::<u8>(&address).await.unwrap();
    assert_eq!(record.next_address(), Some(&Address::new("localhost", 4242)));
    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn update_without_next_address_leaves_link_alone() {
    let client = client();
    let chain = client.build_chain([1u8, 2, 3]).await.unwrap();
    let addresses: Vec<Address> = chain.addresses().cloned().collect();

    let reply = raw_call(&addresses[0], br#"{"type": "update_next_node"}"#).await;
    assert!(reply.get("error").is_some(), "accepted: {}", reply);

    let head = client.get_node_info::<u8>(&addresses[0]).await.unwrap();
    assert_eq!(head.next_address(), Some(&addresses[1]));
    assert_eq!(head.version(), 1);
    let walk = client.collect::<u8>(addresses[0].clone()).await;
    assert_eq!(walk.payloads, vec![1, 2, 3]);
    assert!(walk.is_complete());

    chain.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unknown_request_gets_an_error_and_service_survives() {
    let (address, handle) = Launcher::default().launch(5u8).await.unwrap();

    let reply = raw_call(&address, br#"{"type": "shutdown"}"#).await;
    assert_eq!(reply, json!({"error": "unknown request type: shutdown"}));

    let garbage: [&[u8]; 4] = [b"get_data", b"set_next:localhost:1", b"{}", b"[]"];
    for garbage in garbage {
        let reply = raw_call(&address, garbage).await;
        assert!(reply.get("error").is_some(), "no error for {:?}", garbage);
    }

    assert!(client().get_node_info::<u8>(&address).await.is_some());
    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn oversized_request_is_rejected() {
    let (address, handle) = Launcher::default().launch(5u8).await.unwrap();

    let mut stream = TcpStream::connect((address.host.as_str(), address.port))
        .await
        .unwrap();
    stream.write_all(&(MAX + 1).to_le_bytes()).await.unwrap();
    let reply = read_frame(&mut stream, MAX).await.unwrap();
    let reply: Value = serde_json::from_slice(&reply).unwrap();
    assert_eq!(
        reply,
        json!({"error": format!("frame of {} bytes exceeds limit of {}", MAX + 1, MAX)})
    );

    assert!(client().get_node_info::<u8>(&address).await.is_some());
    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn one_request_per_connection() {
    let (address, handle) = Launcher::default().launch(5u8).await.unwrap();

    let mut stream = TcpStream::connect((address.host.as_str(), address.port))
        .await
        .unwrap();
    write_frame(&mut stream, br#"{"type": "get_node_info"}"#, MAX)
        .await
        .unwrap();
    read_frame(&mut stream, MAX).await.unwrap();

    // the service closes after its single reply
    let mut rest = Vec::new();
    stream.read_to_end(&mut rest).await.unwrap();
    assert!(rest.is_empty());
    handle.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn idle_connection_is_closed() {
    let service = NodeService::bind(
        ("127.0.0.1", 0),
        5u8,
        ServiceConfig::builder()
            .read_timeout(Duration::from_millis(200))
            .build(),
    )
    .await
    .unwrap();
    let address = service.address().clone();
    let serving = tokio::spawn(service.serve());

    // connect and never send a request
    let mut stream = TcpStream::connect((address.host.as_str(), address.port))
        .await
        .unwrap();
    let mut rest = Vec::new();
    tokio::time::timeout(Duration::from_secs(2), stream.read_to_end(&mut rest))
        .await
        .expect("idle connection was never closed")
        .unwrap();
    assert!(rest.is_empty());

    assert!(client().get_node_info::<u8>(&address).await.is_some());
    serving.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unreachable_address_degrades_to_none() {
    // bind then drop to get a port nobody listens on
    let port = {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    };
    let address = Address::new("127.0.0.1", port);
    let client = client();

    assert!(client.get_node_info::<u8>(&address).await.is_none());
    let err = client.fetch_node_info::<u8>(&address).await.unwrap_err();
    assert!(err.is_connectivity(), "unexpected error: {}", err);
    let err = client.set_next(&address, None).await.unwrap_err();
    assert!(err.is_connectivity(), "unexpected error: {}", err);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn silent_peer_times_out() {
    // accepts but never answers
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = Address::from(listener.local_addr().unwrap());
    let hold = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
        drop(stream);
    });

    let client = NodeClient::new(
        ClientConfig::builder()
            .timeout(Duration::from_millis(200))
            .build(),
    );
    let err = client.fetch_node_info::<u8>(&address).await.unwrap_err();
    assert!(matches!(err, Error::TimedOut));
    hold.abort();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn remote_errors_surface_from_set_next() {
    // a service that only ever answers with an error
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = Address::from(listener.local_addr().unwrap());
    tokio::spawn(async move {
        let (mut stream, _) = listener.accept().await.unwrap();
        read_frame(&mut stream, MAX).await.unwrap();
        write_frame(&mut stream, br#"{"error": "read-only node"}"#, MAX)
            .await
            .unwrap();
    });

    let err = client()
        .set_next(&address, Some(&Address::new("localhost", 1)))
        .await
        .unwrap_err();
    match err {
        Error::Remote(msg) => assert_eq!(msg, "read-only node"),
        other => panic!("expected a remote error, got {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn in_process_service_can_be_stopped() {
    let service = NodeService::bind(
        ("127.0.0.1", 0),
        "inline".to_string(),
        ServiceConfig::default(),
    )
    .await
    .unwrap();
    let address = service.address().clone();
    let (stop_tx, stop_rx) = tokio::sync::oneshot::channel::<()>();
    let serving = tokio::spawn(service.serve_until(async {
        let _ = stop_rx.await;
    }));

    let record = client().get_node_info::<String>(&address).await.unwrap();
    assert_eq!(record.payload(), "inline");

    stop_tx.send(()).unwrap();
    serving.await.unwrap();
    assert!(client().get_node_info::<String>(&address).await.is_none());
}
