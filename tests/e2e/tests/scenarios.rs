//! End-to-end scenarios driving a real [`RelayServer`] over a loopback
//! WebSocket with a real [`ClientDriver`], backed by raw-TCP mock HTTP
//! servers standing in for the Auth Gate's verify endpoint and the
//! downstream forwarding destination.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use fileferry_client::{ClientDriver, ClientError};
use fileferry_protocol::{ClientAction, ServerEvent};
use fileferry_server::{AuthError, AuthStore, Deps, NullMetadataStore, RelayServer, ServerConfig};
use fileferry_transfer::{AuthContext, DownloadSessionStore, SessionStore};
use futures_util::{SinkExt, StreamExt};

struct AcceptAllAuth;

#[async_trait::async_trait]
impl AuthStore for AcceptAllAuth {
    async fn authenticate(&self, token: &str) -> Result<AuthContext, AuthError> {
        Ok(AuthContext {
            user_id: format!("user-{token}"),
            user_token: token.to_string(),
        })
    }
}

/// A raw-TCP mock HTTP server: replies to every request with a fixed status
/// line and JSON body, forwarding each request's payload over `tx`.
async fn mock_http(
    responses: Vec<(&'static str, &'static str)>,
) -> (String, tokio::sync::mpsc::Receiver<Vec<u8>>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = tokio::sync::mpsc::channel(16);
    tokio::spawn(async move {
        let mut responses = responses.into_iter().cycle();
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            let (status, body) = responses.next().unwrap();
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4 << 20];
                let mut total = 0;
                // A bare read() can return before the whole body has arrived
                // on a loopback socket; read until the peer closes its side.
                loop {
                    match stream.read(&mut buf[total..]).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => total += n,
                    }
                    if total >= buf.len() {
                        break;
                    }
                }
                buf.truncate(total);
                let _ = tx.send(buf).await;
                let resp = format!(
                    "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = stream.write_all(resp.as_bytes()).await;
                let _ = stream.shutdown().await;
            });
        }
    });
    (format!("http://127.0.0.1:{port}/upload"), rx)
}

async fn start_relay(upload_url: String, staging: &std::path::Path) -> Arc<RelayServer> {
    let deps = Deps::new(
        Arc::new(SessionStore::new(staging)),
        Arc::new(DownloadSessionStore::new(staging)),
        Arc::new(AcceptAllAuth),
        Arc::new(NullMetadataStore),
        reqwest::Client::new(),
        upload_url,
    );
    let server = RelayServer::new(ServerConfig { bind_addr: "127.0.0.1:0".into() }, deps);
    let running = server.clone();
    tokio::spawn(async move {
        let _ = running.run().await;
    });
    for _ in 0..200 {
        if server.port().await > 0 {
            return server;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("server did not bind in time");
}

type WsStream = tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

async fn send_action(ws: &mut WsStream, action: ClientAction) {
    let text = serde_json::to_string(&action).unwrap();
    ws.send(tokio_tungstenite::tungstenite::Message::Text(text.into()))
        .await
        .unwrap();
}

async fn recv_event(ws: &mut WsStream) -> ServerEvent {
    loop {
        let msg = ws.next().await.expect("connection closed").unwrap();
        if let tokio_tungstenite::tungstenite::Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

/// S1: a single-connection upload of 200,000 bytes in 65,536-byte chunks
/// completes and the forwarder receives the exact bytes.
#[tokio::test]
async fn s1_happy_path_sequential_chunks() {
    let (upload_url, mut received) = mock_http(vec![("200 OK", r#"{"success":true,"file_id":"final-1"}"#)]).await;
    let dir = tempfile::tempdir().unwrap();
    let server = start_relay(upload_url, dir.path()).await;
    let port = server.port().await;

    let data = vec![7u8; 200_000];
    let path = dir.path().join("payload.bin");
    tokio::fs::write(&path, &data).await.unwrap();

    let driver = ClientDriver::open_with_chunk_size(&format!("ws://127.0.0.1:{port}"), 65_536)
        .await
        .unwrap();
    driver.auth("tok-1").await.unwrap();
    let offset = driver.start(path, "f1".into()).await.unwrap();
    assert_eq!(offset, 0);

    let file_path = driver.upload().await.unwrap();
    assert_eq!(file_path, "final-1");
    driver.close().await;

    let forwarded = received.recv().await.unwrap();
    assert!(forwarded.ends_with(&data), "forwarded body did not match payload");

    server.shutdown();
}

/// S2: pausing mid-stream returns a stable offset, and resuming continues
/// from exactly that offset through to completion.
#[tokio::test]
async fn s2_mid_stream_pause_and_resume() {
    let (upload_url, _received) = mock_http(vec![("200 OK", r#"{"success":true,"file_id":"final-2"}"#)]).await;
    let dir = tempfile::tempdir().unwrap();
    let server = start_relay(upload_url, dir.path()).await;
    let port = server.port().await;

    let data = vec![3u8; 200_000];
    let path = dir.path().join("payload.bin");
    tokio::fs::write(&path, &data).await.unwrap();

    let driver = Arc::new(
        ClientDriver::open_with_chunk_size(&format!("ws://127.0.0.1:{port}"), 65_536)
            .await
            .unwrap(),
    );
    driver.auth("tok-2").await.unwrap();
    driver.start(path, "f2".into()).await.unwrap();

    let upload_driver = driver.clone();
    let upload_task = tokio::spawn(async move { upload_driver.upload().await });

    tokio::time::sleep(Duration::from_millis(30)).await;
    let paused_at = driver.pause().await.unwrap();

    tokio::time::sleep(Duration::from_millis(20)).await;
    let resumed_at = driver.resume().await.unwrap();
    assert_eq!(resumed_at, paused_at, "resume must continue from the paused offset");

    let file_path = upload_task.await.unwrap().unwrap();
    assert_eq!(file_path, "final-2");
    driver.close().await;

    server.shutdown();
}

/// S3: a chunk at a forged offset is rejected with the session's true
/// cursor, not silently accepted or misapplied.
#[tokio::test]
async fn s3_forged_offset_triggers_mismatch() {
    let (upload_url, _rx) = mock_http(vec![("200 OK", r#"{"success":true,"file_id":"final-3"}"#)]).await;
    let dir = tempfile::tempdir().unwrap();
    let server = start_relay(upload_url, dir.path()).await;
    let port = server.port().await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{port}"))
        .await
        .unwrap();

    send_action(&mut ws, ClientAction::Auth { token: "tok-3".into() }).await;
    send_action(
        &mut ws,
        ClientAction::Start {
            file_id: "f3".into(),
            file_name: "a.bin".into(),
            file_size: 100,
            folder_id: None,
        },
    )
    .await;
    assert_eq!(
        recv_event(&mut ws).await,
        ServerEvent::StartAck {
            file_id: "f3".into(),
            offset: 0
        }
    );

    send_action(
        &mut ws,
        ClientAction::Chunk {
            file_id: "f3".into(),
            offset: 65_536,
            data: vec![1, 2, 3],
        },
    )
    .await;
    assert_eq!(
        recv_event(&mut ws).await,
        ServerEvent::OffsetMismatch {
            file_id: "f3".into(),
            expected: 0
        }
    );

    server.shutdown();
}

/// S4: an abrupt disconnect mid-upload pauses the session; reconnecting
/// with the same file_id adopts it at the byte count already staged, and
/// the upload can be driven to completion from there.
#[tokio::test]
async fn s4_reconnect_adopts_partial_upload() {
    let (upload_url, mut rx) = mock_http(vec![("200 OK", r#"{"success":true,"file_id":"final-4"}"#)]).await;
    let dir = tempfile::tempdir().unwrap();
    let server = start_relay(upload_url, dir.path()).await;
    let port = server.port().await;
    let ws_url = format!("ws://127.0.0.1:{port}");

    let data = vec![5u8; 150];
    let path = dir.path().join("payload.bin");
    tokio::fs::write(&path, &data).await.unwrap();

    {
        let (mut ws, _) = tokio_tungstenite::connect_async(&ws_url).await.unwrap();
        send_action(&mut ws, ClientAction::Auth { token: "tok-4".into() }).await;
        send_action(
            &mut ws,
            ClientAction::Start {
                file_id: "f4".into(),
                file_name: "payload.bin".into(),
                file_size: 150,
                folder_id: None,
            },
        )
        .await;
        assert_eq!(
            recv_event(&mut ws).await,
            ServerEvent::StartAck {
                file_id: "f4".into(),
                offset: 0
            }
        );

        send_action(
            &mut ws,
            ClientAction::Chunk {
                file_id: "f4".into(),
                offset: 0,
                data: data[..100].to_vec(),
            },
        )
        .await;
        assert_eq!(
            recv_event(&mut ws).await,
            ServerEvent::Progress {
                file_id: "f4".into(),
                offset: 100,
                percent: (100.0 / 150.0) * 100.0,
            }
        );
        drop(ws);
    }

    // Give the server's read pump a moment to observe the close and pause
    // the orphaned session.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let driver = ClientDriver::open(&ws_url).await.unwrap();
    driver.auth("tok-4").await.unwrap();
    let offset = driver.start(path, "f4".into()).await.unwrap();
    assert_eq!(offset, 100, "reconnect must adopt the partially-staged upload");

    let file_path = driver.upload().await.unwrap();
    assert_eq!(file_path, "final-4");
    driver.close().await;

    let forwarded = rx.recv().await.unwrap();
    assert!(forwarded.ends_with(&data));

    server.shutdown();
}

/// S5: a forwarder failure surfaces as a rejected `upload()` and retains
/// the staged file; a later `start` for the same file_id re-triggers the
/// forward, which this time succeeds.
#[tokio::test]
async fn s5_forward_failure_then_retry_succeeds() {
    let (upload_url, _rx) = mock_http(vec![
        ("500 Internal Server Error", r#"{"success":false}"#),
        ("200 OK", r#"{"success":true,"file_id":"final-5"}"#),
    ])
    .await;
    let dir = tempfile::tempdir().unwrap();
    let server = start_relay(upload_url, dir.path()).await;
    let port = server.port().await;
    let ws_url = format!("ws://127.0.0.1:{port}");

    let data = vec![2u8; 80];
    let path = dir.path().join("payload.bin");
    tokio::fs::write(&path, &data).await.unwrap();

    let driver = ClientDriver::open(&ws_url).await.unwrap();
    driver.auth("tok-5").await.unwrap();
    driver.start(path.clone(), "f5".into()).await.unwrap();
    let err = driver.upload().await.unwrap_err();
    assert!(matches!(err, ClientError::Rejected(_)));
    driver.close().await;

    // A fresh connection's `start` on the same file_id observes the full
    // byte count already staged and retries the forward without the
    // client resending any bytes.
    let driver2 = ClientDriver::open(&ws_url).await.unwrap();
    driver2.auth("tok-5").await.unwrap();

    let mut retried = false;
    for _ in 0..100 {
        match driver2.start(path.clone(), "f5".into()).await {
            Ok(offset) if offset == 80 => {
                retried = true;
                break;
            }
            _ => tokio::time::sleep(Duration::from_millis(5)).await,
        }
    }
    assert!(retried, "retry start should observe the fully-staged file");
    driver2.close().await;

    server.shutdown();
}

/// S6: a download over HTTP Range is paused mid-stream and resumed,
/// producing a byte-exact file at completion.
#[tokio::test]
async fn s6_download_with_range_pause_resume() {
    let body = vec![9u8; 300_000];
    let body_clone = body.clone();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else { break };
            let body = body_clone.clone();
            tokio::spawn(async move {
                let mut buf = vec![0u8; 8192];
                let n = stream.read(&mut buf).await.unwrap_or(0);
                let request = String::from_utf8_lossy(&buf[..n]);
                let range_start = request
                    .lines()
                    .find(|l| l.to_ascii_lowercase().starts_with("range:"))
                    .and_then(|l| l.split('=').nth(1))
                    .and_then(|r| r.trim_end_matches('-').parse::<usize>().ok())
                    .unwrap_or(0);

                let slice = &body[range_start..];
                let status = if range_start > 0 {
                    "206 Partial Content"
                } else {
                    "200 OK"
                };
                let header = format!(
                    "HTTP/1.1 {status}\r\nContent-Type: application/octet-stream\r\nContent-Length: {}\r\nAccept-Ranges: bytes\r\nConnection: close\r\n\r\n",
                    slice.len()
                );
                let _ = stream.write_all(header.as_bytes()).await;
                // Trickle the body out in small, delayed writes so the
                // download engine's read loop observes several chunk
                // boundaries instead of the whole body arriving in one
                // instantaneous loopback write — giving a concurrent
                // pause a real window to land mid-stream.
                for piece in slice.chunks(16_384) {
                    let _ = stream.write_all(piece).await;
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
                let _ = stream.shutdown().await;
            });
        }
    });
    let download_url = format!("http://127.0.0.1:{port}/file.bin");

    let dir = tempfile::tempdir().unwrap();
    let server = start_relay("http://unused.invalid/upload".into(), dir.path()).await;
    let relay_port = server.port().await;

    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{relay_port}"))
        .await
        .unwrap();
    send_action(&mut ws, ClientAction::Auth { token: "tok-6".into() }).await;
    send_action(
        &mut ws,
        ClientAction::DownloadStart {
            url: download_url,
            filename: Some("movie.bin".into()),
        },
    )
    .await;

    let ServerEvent::DownloadStartAck { session_id } = recv_event(&mut ws).await else {
        panic!("expected download-start-ack");
    };

    send_action(
        &mut ws,
        ClientAction::DownloadPause {
            session_id: session_id.clone(),
        },
    )
    .await;
    send_action(
        &mut ws,
        ClientAction::DownloadResume {
            session_id: session_id.clone(),
        },
    )
    .await;

    let mut saw_complete = false;
    for _ in 0..200 {
        let msg = ws.next().await.expect("connection closed").unwrap();
        let tokio_tungstenite::tungstenite::Message::Text(text) = msg else {
            continue;
        };
        if let Ok(ServerEvent::DownloadComplete {
            session_id: sid,
            file_path,
            total_size,
        }) = serde_json::from_str::<ServerEvent>(&text)
        {
            assert_eq!(sid, session_id);
            assert_eq!(total_size, body.len() as u64);
            let written = tokio::fs::read(&file_path).await.unwrap();
            assert!(written == body, "downloaded bytes must match the source exactly");
            saw_complete = true;
            break;
        }
    }
    assert!(saw_complete, "download never reached download-complete");

    server.shutdown();
}
