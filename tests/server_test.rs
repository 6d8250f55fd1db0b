//! Request/response layer end to end: client, server, and the connection
//! table's keep-alive bookkeeping.

mod common;

use std::time::Duration;

use common::{config, endpoint, wait_until, RawPeer};
use rudp_tokio::{
    Client, ConnectionPreference, ConnectionState, Method, Request, Response, Server,
};

#[tokio::test]
async fn get_hello_end_to_end() {
    let (server, _task) = Server::new(endpoint(config()).await).spawn();
    let client = Client::new(endpoint(config()).await, *server.local_addr());

    let response = client.get("/hello", true).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.reason, "OK");
    assert_eq!(response.body_text(), "You requested /hello");
    assert_eq!(response.connection(), ConnectionPreference::KeepAlive);

    // One request out, one response back.
    let session = client.session().await.unwrap();
    assert_eq!(session.next_send(), 2);
    assert_eq!(session.next_expected(), 2);

    let client_addr = *client.endpoint().local_addr();
    assert_eq!(
        server.table().state(&client_addr).await,
        ConnectionState::Established
    );
}

#[tokio::test]
async fn keep_alive_retains_and_refreshes_entry() {
    let (server, _task) = Server::new(endpoint(config()).await).spawn();
    let client = Client::new(endpoint(config()).await, *server.local_addr());
    let client_addr = *client.endpoint().local_addr();

    client.get("/", true).await.unwrap();
    let first = server.table().get(&client_addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    client.post("/", "more", true).await.unwrap();
    let second = server.table().get(&client_addr).await.unwrap();

    assert_eq!(second.state, ConnectionState::Established);
    assert!(second.last_seen > first.last_seen);
    assert!(client.is_connected().await);
    assert_eq!(server.metrics().handshakes_completed, 1);
}

#[tokio::test]
async fn close_removes_entry_after_response() {
    let (server, _task) = Server::new(endpoint(config()).await).spawn();
    let client = Client::new(endpoint(config()).await, *server.local_addr());
    let client_addr = *client.endpoint().local_addr();

    let response = client.get("/bye", false).await.unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(response.connection(), ConnectionPreference::Close);
    assert!(!client.is_connected().await);
    assert!(client.endpoint().table().is_empty().await);
    assert!(
        wait_until(Duration::from_secs(1), || async {
            server.table().get(&client_addr).await.is_none()
        })
        .await
    );
}

#[tokio::test]
async fn post_echoes_body() {
    let (server, _task) = Server::new(endpoint(config()).await).spawn();
    let client = Client::new(endpoint(config()).await, *server.local_addr());

    let response = client
        .post("/", "This is the data sent via POST", true)
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(
        response.body_text(),
        "Received POST data: This is the data sent via POST"
    );
}

#[tokio::test]
async fn unsupported_method_gets_405_and_client_reconnects() {
    let (server, _task) = Server::new(endpoint(config()).await).spawn();
    let client = Client::new(endpoint(config()).await, *server.local_addr());
    let client_addr = *client.endpoint().local_addr();

    client.get("/", true).await.unwrap();
    let response = client
        .send_request(Method::Delete, "/", Default::default(), true)
        .await
        .unwrap();

    assert_eq!(response.status, 405);
    assert_eq!(response.body_text(), "Method not supported.");
    assert_eq!(response.connection(), ConnectionPreference::Close);
    assert!(!client.is_connected().await);

    // A fresh handshake right away replaces the closing connection. The
    // first connection used numbers up to 2, so the new one starts at 4.
    let response = client.get("/again", true).await.unwrap();
    assert_eq!(response.body_text(), "You requested /again");
    assert_eq!(client.session().await.unwrap().next_send(), 5);
    assert_eq!(
        server.table().state(&client_addr).await,
        ConnectionState::Established
    );
}

#[tokio::test]
async fn custom_handler_is_used() {
    let handler = |request: &Request| Response::ok(format!("{} {}", request.method, request.path));
    let (server, _task) = Server::with_handler(endpoint(config()).await, handler).spawn();
    let client = Client::new(endpoint(config()).await, *server.local_addr());

    let response = client
        .send_request(Method::Put, "/item", "x".into(), false)
        .await
        .unwrap();
    assert_eq!(response.body_text(), "PUT /item");
    assert_eq!(response.connection(), ConnectionPreference::Close);
}

#[tokio::test]
async fn unparsable_request_gets_400() {
    let (server, _task) = Server::new(endpoint(config()).await).spawn();
    let client = endpoint(config()).await;

    let conn = client.connect(server.local_addr()).await.unwrap();
    conn.send_reliable("not a request").await.unwrap();
    let payload = conn.receive_timeout(Duration::from_secs(2)).await.unwrap();
    let response = Response::decode(payload).unwrap();

    assert_eq!(response.status, 400);
    assert_eq!(response.connection(), ConnectionPreference::Close);
}

#[tokio::test]
async fn serves_several_clients_at_once() {
    let (server, _task) = Server::new(endpoint(config()).await).spawn();

    let mut tasks = Vec::new();
    for i in 0..4 {
        let client = Client::new(endpoint(config()).await, *server.local_addr());
        tasks.push(tokio::spawn(async move {
            client.get(&format!("/c{i}"), true).await
        }));
    }

    for (i, task) in tasks.into_iter().enumerate() {
        let response = task.await.unwrap().unwrap();
        assert_eq!(response.body_text(), format!("You requested /c{i}"));
    }
    assert_eq!(server.table().len().await, 4);
}

#[tokio::test]
async fn silent_syns_do_not_block_other_clients() {
    let (server, _task) = Server::new(endpoint(config()).await).spawn();
    let server_addr = *server.local_addr();

    let mut silent = Vec::new();
    for _ in 0..5 {
        let peer = RawPeer::bind().await;
        peer.send("SYN:0", &server_addr).await;
        silent.push(peer);
    }

    // One handshake attempt must be enough while the silent peers are pending.
    let client = Client::new(endpoint(config().handshake_retries(1)).await, server_addr);
    let response = client.get("/hello", true).await.unwrap();
    assert_eq!(response.body_text(), "You requested /hello");

    assert!(
        wait_until(Duration::from_secs(2), || async {
            server.metrics().handshakes_failed == 5
        })
        .await
    );
    for peer in &silent {
        assert!(server.table().get(&peer.addr()).await.is_none());
    }
}
