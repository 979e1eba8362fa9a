mod common;

use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use common::{connect_request, domain_reply, request, Hosts, GREETING};
use socks5d::config::Config;
use socks5d::server::Server;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

const WAIT: Duration = Duration::from_secs(5);

/// Echo server on an ephemeral port.
async fn echo_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let (mut rd, mut wr) = stream.split();
                let _ = tokio::io::copy(&mut rd, &mut wr).await;
            });
        }
    });
    addr
}

/// A port nothing listens on.
async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

async fn proxy(config: Config) -> SocketAddr {
    let server = Server::bind(Config { port: 0, ..config })
        .await
        .unwrap()
        .with_resolver(Arc::new(Hosts::with("localhost", Ipv4Addr::LOCALHOST)));
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    addr
}

async fn handshake(proxy: SocketAddr, req: &[u8]) -> (TcpStream, Vec<u8>) {
    let mut client = TcpStream::connect(proxy).await.unwrap();
    client.write_all(GREETING).await.unwrap();
    let mut selection = [0u8; 2];
    timeout(WAIT, client.read_exact(&mut selection))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(selection, [5, 0]);

    client.write_all(req).await.unwrap();
    // every reply here echoes "localhost" and a port
    let mut reply = vec![0u8; 4 + 1 + 9 + 2];
    timeout(WAIT, client.read_exact(&mut reply))
        .await
        .unwrap()
        .unwrap();
    (client, reply)
}

async fn read_eof(client: &mut TcpStream) {
    let mut rest = Vec::new();
    timeout(WAIT, client.read_to_end(&mut rest))
        .await
        .unwrap()
        .unwrap();
    assert!(rest.is_empty(), "unexpected {rest:?}");
}

#[tokio::test]
async fn connect_and_echo() {
    let echo = echo_server().await;
    let proxy = proxy(Config::default()).await;

    let (mut client, reply) = handshake(proxy, &connect_request("localhost", echo.port())).await;
    assert_eq!(reply, domain_reply(0, "localhost", echo.port()));

    client.write_all(b"ping").await.unwrap();
    let mut pong = [0u8; 4];
    timeout(WAIT, client.read_exact(&mut pong))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(&pong, b"ping");
}

#[tokio::test]
async fn large_transfer_round_trip() {
    let echo = echo_server().await;
    let proxy = proxy(Config {
        read_chunk: 1024,
        high_water: 8 * 1024,
        ..Config::default()
    })
    .await;

    let (client, _) = handshake(proxy, &connect_request("localhost", echo.port())).await;
    let (mut rd, mut wr) = client.into_split();

    let data: Vec<u8> = (0..512 * 1024u32).map(|i| (i % 251) as u8).collect();
    let sent = data.clone();
    let writer = tokio::spawn(async move {
        wr.write_all(&sent).await.unwrap();
        wr
    });

    let mut got = vec![0u8; data.len()];
    timeout(Duration::from_secs(30), rd.read_exact(&mut got))
        .await
        .unwrap()
        .unwrap();
    assert!(got == data, "relayed bytes differ");
    writer.await.unwrap();
}

#[tokio::test]
async fn refused_connect_replies_host_unreachable() {
    let port = closed_port().await;
    let proxy = proxy(Config::default()).await;

    let (mut client, reply) = handshake(proxy, &connect_request("localhost", port)).await;
    assert_eq!(reply, domain_reply(4, "localhost", port));
    read_eof(&mut client).await;
}

#[tokio::test]
async fn unknown_host_replies_host_unreachable() {
    let proxy = proxy(Config::default()).await;

    let mut client = TcpStream::connect(proxy).await.unwrap();
    client.write_all(GREETING).await.unwrap();
    client
        .write_all(&connect_request("nowhere.invalid", 80))
        .await
        .unwrap();

    let want = domain_reply(4, "nowhere.invalid", 80);
    let mut got = vec![0u8; 2 + want.len()];
    timeout(WAIT, client.read_exact(&mut got))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(got[..2], [5u8, 0]);
    assert_eq!(got[2..], want[..]);
    read_eof(&mut client).await;
}

#[tokio::test]
async fn bind_is_not_supported() {
    let proxy = proxy(Config::default()).await;

    let (client, reply) = handshake(proxy, &request(0x02, "localhost", 21)).await;
    assert_eq!(reply, domain_reply(7, "localhost", 21));
    drop(client);
}

#[tokio::test]
async fn idle_session_is_closed() {
    let proxy = proxy(Config {
        idle_timeout: Duration::from_millis(200),
        ..Config::default()
    })
    .await;

    let mut client = TcpStream::connect(proxy).await.unwrap();
    read_eof(&mut client).await;
}
