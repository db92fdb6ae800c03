//! TCP server tests.

use javabridge_core::{BridgeServer, Registry, ServerConfig};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

fn config() -> ServerConfig {
    ServerConfig {
        pool_size: 2,
        ..ServerConfig::default()
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_server_start_and_shutdown() {
    let mut handle = BridgeServer::start(Registry::with_builtins(), &config())
        .await
        .unwrap();

    assert!(handle.port > 0);
    assert_eq!(handle.addr().ip(), std::net::Ipv4Addr::LOCALHOST);

    handle.shutdown();
    assert!(handle.pool().start(|| {}).is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_server_answers_ping() {
    let mut handle = BridgeServer::start(Registry::with_builtins(), &config())
        .await
        .unwrap();

    let mut stream = TcpStream::connect(handle.addr()).await.unwrap();
    stream.write_all(&[0]).await.unwrap();
    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).await.unwrap();
    assert_eq!(reply, vec![0]);

    handle.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_server_roundtrip() {
    let mut handle = BridgeServer::start(Registry::with_builtins(), &config())
        .await
        .unwrap();

    let mut stream = TcpStream::connect(handle.addr()).await.unwrap();
    let mut request = vec![0x81];
    request.extend_from_slice(br#"<I v="0" m="typeExists" p="I"><S v="String"/></I><F p="E"/>"#);
    stream.write_all(&request).await.unwrap();

    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).await.unwrap();
    assert_eq!(String::from_utf8(reply).unwrap(), r#"<B v="T"/><F p="E"/>"#);

    handle.shutdown();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_connections_are_served_concurrently() {
    let mut handle = BridgeServer::start(Registry::with_builtins(), &config())
        .await
        .unwrap();

    // The first connection stays open without finishing.
    let mut idle = TcpStream::connect(handle.addr()).await.unwrap();
    idle.write_all(&[0x81]).await.unwrap();

    let mut stream = TcpStream::connect(handle.addr()).await.unwrap();
    let mut request = vec![0x81];
    request.extend_from_slice(br#"<I v="0" m="typeExists" p="I"><S v="Nope"/></I><F p="E"/>"#);
    stream.write_all(&request).await.unwrap();

    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).await.unwrap();
    assert_eq!(String::from_utf8(reply).unwrap(), r#"<B v="F"/><F p="E"/>"#);

    drop(idle);
    handle.shutdown();
}

#[tokio::test]
async fn test_invalid_config_is_rejected() {
    let config = ServerConfig {
        pool_size: 0,
        ..ServerConfig::default()
    };
    assert!(BridgeServer::start(Registry::with_builtins(), &config)
        .await
        .is_err());
}
