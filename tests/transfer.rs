use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use serial_test::serial;
use tokio::net::UdpSocket;
use tokio::time::timeout;

use xtftp::config::TransferKind;
use xtftp::tftp::client::{Client, ClientConfig};
use xtftp::tftp::core::{ErrorCode, Packet, TftpError, TransferMode};
use xtftp::tftp::server::{Config, Server, ShutdownHandle};

async fn start_server(dir: &Path, configure: impl FnOnce(Config) -> Config) -> (SocketAddr, ShutdownHandle) {
    let config = configure(Config::new(
        "127.0.0.1".parse().unwrap(),
        0,
        dir.to_path_buf(),
    ));
    let mut server = Server::bind(&config).await.unwrap();
    let addr = server.local_addr().unwrap();
    let handle = server.shutdown_handle();
    tokio::spawn(async move { server.listen().await });
    (addr, handle)
}

fn client_for(addr: SocketAddr) -> ClientConfig {
    ClientConfig::new(addr.ip(), addr.port())
}

fn sample(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 7 % 251) as u8).collect()
}

fn peer_error(err: &anyhow::Error) -> Option<ErrorCode> {
    match err.downcast_ref::<TftpError>() {
        Some(TftpError::Peer { code, .. }) => Some(*code),
        _ => None,
    }
}

async fn recv_packet(socket: &UdpSocket) -> (Packet, SocketAddr) {
    let mut buf = vec![0u8; 70000];
    let (len, from) = timeout(Duration::from_secs(2), socket.recv_from(&mut buf))
        .await
        .expect("no reply within 2s")
        .unwrap();
    (Packet::deserialize(&buf[..len]).unwrap(), from)
}

async fn send_packet(socket: &UdpSocket, packet: Packet, to: SocketAddr) {
    socket
        .send_to(&packet.serialize().unwrap(), to)
        .await
        .unwrap();
}

#[tokio::test]
#[serial]
async fn get_small_file() {
    let served = tempfile::tempdir().unwrap();
    let local = tempfile::tempdir().unwrap();
    let content = sample(3000);
    std::fs::write(served.path().join("boot.img"), &content).unwrap();
    let (addr, shutdown) = start_server(served.path(), |c| c).await;

    let target = local.path().join("boot.img");
    let bytes = Client::new(client_for(addr))
        .get("boot.img", &target)
        .await
        .unwrap();

    assert_eq!(bytes, 3000);
    assert_eq!(std::fs::read(&target).unwrap(), content);
    shutdown.shutdown();
}

#[tokio::test]
#[serial]
async fn windowed_get_and_put_with_large_blocks() {
    let served = tempfile::tempdir().unwrap();
    let local = tempfile::tempdir().unwrap();
    let content = sample(100_000);
    let source = local.path().join("up.bin");
    std::fs::write(&source, &content).unwrap();
    let (addr, shutdown) = start_server(served.path(), |c| c).await;
    let client = Client::new(client_for(addr).with_block_size(1428).with_window_size(8));

    assert_eq!(client.put(&source, "up.bin").await.unwrap(), 100_000);
    assert_eq!(std::fs::read(served.path().join("up.bin")).unwrap(), content);

    let back = local.path().join("down.bin");
    assert_eq!(client.get("up.bin", &back).await.unwrap(), 100_000);
    assert_eq!(std::fs::read(&back).unwrap(), content);
    shutdown.shutdown();
}

#[tokio::test]
#[serial]
async fn exact_block_multiple() {
    let served = tempfile::tempdir().unwrap();
    let local = tempfile::tempdir().unwrap();
    let content = sample(4096);
    std::fs::write(served.path().join("even.bin"), &content).unwrap();
    let (addr, shutdown) = start_server(served.path(), |c| c).await;

    let target = local.path().join("even.bin");
    let client = Client::new(client_for(addr).with_window_size(4));
    assert_eq!(client.get("even.bin", &target).await.unwrap(), 4096);
    assert_eq!(std::fs::read(&target).unwrap(), content);
    shutdown.shutdown();
}

#[tokio::test]
#[serial]
async fn netascii_round_trip() {
    let served = tempfile::tempdir().unwrap();
    let local = tempfile::tempdir().unwrap();
    let text = b"first line\nsecond\rline\n\nlast".repeat(40);
    let source = local.path().join("notes.txt");
    std::fs::write(&source, &text).unwrap();
    let (addr, shutdown) = start_server(served.path(), |c| c).await;
    let client = Client::new(client_for(addr).with_mode(TransferMode::Netascii));

    client.put(&source, "notes.txt").await.unwrap();
    assert_eq!(std::fs::read(served.path().join("notes.txt")).unwrap(), text);

    let back = local.path().join("back.txt");
    client.get("notes.txt", &back).await.unwrap();
    assert_eq!(std::fs::read(&back).unwrap(), text);
    shutdown.shutdown();
}

#[tokio::test]
#[serial]
async fn missing_file_removes_partial_download() {
    let served = tempfile::tempdir().unwrap();
    let local = tempfile::tempdir().unwrap();
    let (addr, shutdown) = start_server(served.path(), |c| c).await;

    let target = local.path().join("nothing");
    let err = Client::new(client_for(addr))
        .get("nothing", &target)
        .await
        .unwrap_err();

    assert_eq!(peer_error(&err), Some(ErrorCode::FileNotFound));
    assert!(!target.exists());
    shutdown.shutdown();
}

#[tokio::test]
#[serial]
async fn refuses_overwrite_and_escape() {
    let served = tempfile::tempdir().unwrap();
    let local = tempfile::tempdir().unwrap();
    std::fs::write(served.path().join("taken"), b"keep").unwrap();
    let source = local.path().join("new");
    std::fs::write(&source, b"replace").unwrap();
    let (addr, shutdown) = start_server(served.path(), |c| c).await;
    let client = Client::new(client_for(addr));

    let err = client.put(&source, "taken").await.unwrap_err();
    assert_eq!(peer_error(&err), Some(ErrorCode::FileExists));
    assert_eq!(std::fs::read(served.path().join("taken")).unwrap(), b"keep");

    let err = client
        .get("../outside", &local.path().join("outside"))
        .await
        .unwrap_err();
    assert_eq!(peer_error(&err), Some(ErrorCode::FileNotFound));
    shutdown.shutdown();
}

#[tokio::test]
#[serial]
async fn restricted_modes() {
    let served = tempfile::tempdir().unwrap();
    let local = tempfile::tempdir().unwrap();
    std::fs::write(served.path().join("readme"), b"hello").unwrap();
    let source = local.path().join("upload");
    std::fs::write(&source, b"data").unwrap();
    let (addr, shutdown) = start_server(served.path(), |c| c.with_modes(&[TransferKind::Get])).await;
    let client = Client::new(client_for(addr));

    let err = client.put(&source, "upload").await.unwrap_err();
    assert_eq!(peer_error(&err), Some(ErrorCode::AccessViolation));
    assert!(!served.path().join("upload").exists());

    client
        .get("readme", &local.path().join("readme"))
        .await
        .unwrap();
    shutdown.shutdown();
}

#[tokio::test]
#[serial]
async fn foreign_transfer_id_does_not_disturb_transfer() {
    let served = tempfile::tempdir().unwrap();
    std::fs::write(served.path().join("file"), sample(700)).unwrap();
    let (addr, shutdown) = start_server(served.path(), |c| c).await;

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let intruder = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let request = Packet::Rrq {
        filename: "file".to_string(),
        mode: "octet".to_string(),
        options: Vec::new(),
    };
    send_packet(&client, request, addr).await;

    let (first, transfer) = recv_packet(&client).await;
    assert!(matches!(first, Packet::Data { block_num: 1, ref data } if data.len() == 512));
    assert_ne!(transfer, addr);

    send_packet(&intruder, Packet::Ack(1), transfer).await;
    let (reply, from) = recv_packet(&intruder).await;
    assert_eq!(from, transfer);
    assert!(matches!(
        reply,
        Packet::Error {
            code: ErrorCode::UnknownTransferId,
            ..
        }
    ));

    send_packet(&client, Packet::Ack(1), transfer).await;
    let (second, _) = recv_packet(&client).await;
    assert!(matches!(second, Packet::Data { block_num: 2, ref data } if data.len() == 188));
    send_packet(&client, Packet::Ack(2), transfer).await;
    shutdown.shutdown();
}

#[tokio::test]
#[serial]
async fn silent_client_is_abandoned() {
    let served = tempfile::tempdir().unwrap();
    std::fs::write(served.path().join("file"), sample(2000)).unwrap();
    let (addr, shutdown) = start_server(served.path(), |mut c| {
        c.opt_local.retransmit_timeout = Duration::from_millis(100);
        c.opt_local.connection_timeout = Duration::from_millis(350);
        c
    })
    .await;

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let request = Packet::Rrq {
        filename: "file".to_string(),
        mode: "octet".to_string(),
        options: Vec::new(),
    };
    send_packet(&client, request, addr).await;

    let mut buf = vec![0u8; 1024];
    let mut copies = 0;
    while let Ok(received) = timeout(Duration::from_millis(800), client.recv_from(&mut buf)).await {
        let (len, _) = received.unwrap();
        let packet = Packet::deserialize(&buf[..len]).unwrap();
        assert!(matches!(packet, Packet::Data { block_num: 1, .. }));
        copies += 1;
        assert!(copies < 10, "server kept retransmitting past its idle timeout");
    }
    assert!(copies >= 2, "expected retransmissions, got {copies}");
    shutdown.shutdown();
}

#[tokio::test]
#[serial]
async fn shutdown_stops_listening() {
    let served = tempfile::tempdir().unwrap();
    let config = Config::new("127.0.0.1".parse().unwrap(), 0, served.path().to_path_buf());
    let mut server = Server::bind(&config).await.unwrap();
    let handle = server.shutdown_handle();
    let listening = tokio::spawn(async move { server.listen().await });

    handle.shutdown();
    timeout(Duration::from_secs(2), listening)
        .await
        .expect("listen did not return")
        .unwrap()
        .unwrap();
}

#[tokio::test]
#[serial]
async fn size_limits_apply_only_to_negotiated_transfers() {
    let served = tempfile::tempdir().unwrap();
    let local = tempfile::tempdir().unwrap();
    let content = sample(3000);
    std::fs::write(served.path().join("file"), &content).unwrap();
    let (addr, shutdown) = start_server(served.path(), |mut c| {
        c.opt_override.block_size = Some(1024);
        c.opt_override.window_size = Some(4);
        c
    })
    .await;

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let request = Packet::Rrq {
        filename: "file".to_string(),
        mode: "octet".to_string(),
        options: Vec::new(),
    };
    send_packet(&client, request, addr).await;
    let (first, _) = recv_packet(&client).await;
    assert!(matches!(first, Packet::Data { block_num: 1, ref data } if data.len() == 512));

    let target = local.path().join("file");
    let capped = Client::new(client_for(addr).with_block_size(2048).with_window_size(8));
    assert_eq!(capped.get("file", &target).await.unwrap(), 3000);
    assert_eq!(std::fs::read(&target).unwrap(), content);

    let source = local.path().join("up");
    std::fs::write(&source, &content).unwrap();
    assert_eq!(Client::new(client_for(addr)).put(&source, "up").await.unwrap(), 3000);
    assert_eq!(std::fs::read(served.path().join("up")).unwrap(), content);
    shutdown.shutdown();
}

#[tokio::test]
#[serial]
async fn bind_refuses_zero_timeouts() {
    let served = tempfile::tempdir().unwrap();
    let mut config = Config::new("127.0.0.1".parse().unwrap(), 0, served.path().to_path_buf());
    config.opt_local.retransmit_timeout = Duration::ZERO;
    assert!(Server::bind(&config).await.is_err());
}
