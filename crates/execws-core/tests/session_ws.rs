//! End-to-end session tests against an in-process WebSocket peer.
//!
//! Each test wires the session to a server over an in-memory duplex pipe
//! and scripts the server side: emit frames, end with a status payload and
//! a close, assert on what the client produced.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use futures::{SinkExt, StreamExt};
use tokio::io::DuplexStream;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Role};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use execws_core::protocol::Subprotocol;
use execws_core::session::{self, SessionIo};
use execws_core::TermSize;

type ServerWs = WebSocketStream<DuplexStream>;

const SUCCESS: &[u8] = br#"{"status":"Success"}"#;

fn frame(channel: u8, payload: &[u8]) -> Vec<u8> {
    let mut data = vec![channel];
    data.extend_from_slice(payload);
    data
}

async fn ws_pair() -> (WebSocketStream<DuplexStream>, ServerWs) {
    let (client_end, server_end) = tokio::io::duplex(64 * 1024);
    let client = WebSocketStream::from_raw_socket(client_end, Role::Client, None).await;
    let server = WebSocketStream::from_raw_socket(server_end, Role::Server, None).await;
    (client, server)
}

/// Drain whatever the client still sends until its side goes away.
async fn drain(ws: &mut ServerWs) {
    while let Some(msg) = ws.next().await {
        if msg.is_err() {
            break;
        }
    }
}

#[tokio::test]
async fn successful_command_without_tty() {
    let (client, mut server) = ws_pair().await;

    let server_task = tokio::spawn(async move {
        server
            .send(Message::binary(frame(1, b"hello\n")))
            .await
            .unwrap();
        server.send(Message::binary(frame(3, SUCCESS))).await.unwrap();
        server.close(None).await.unwrap();
        drain(&mut server).await;
    });

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let io = SessionIo {
        stdin: None::<tokio::io::Empty>,
        stdout: &mut stdout,
        stderr: &mut stderr,
    };

    let code = session::run(client, Subprotocol::V4Channel, io, None)
        .await
        .unwrap();

    assert_eq!(code, 0);
    assert_eq!(stdout, b"hello\n");
    assert!(stderr.is_empty());
    server_task.await.unwrap();
}

#[tokio::test]
async fn nonzero_exit_code_becomes_the_result() {
    let (client, mut server) = ws_pair().await;

    let status = br#"{"status":"Failure","reason":"NonZeroExitCode","details":{"causes":[{"message":"7"}]}}"#;
    let server_task = tokio::spawn(async move {
        server
            .send(Message::binary(frame(3, status)))
            .await
            .unwrap();
        server.close(None).await.ok();
        drain(&mut server).await;
    });

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let io = SessionIo {
        stdin: None::<tokio::io::Empty>,
        stdout: &mut stdout,
        stderr: &mut stderr,
    };

    let code = session::run(client, Subprotocol::V4Channel, io, None)
        .await
        .unwrap();

    assert_eq!(code, 7);
    assert!(stderr.is_empty());
    server_task.await.unwrap();
}

#[tokio::test]
async fn stderr_frames_reach_the_stderr_sink() {
    let (client, mut server) = ws_pair().await;

    let server_task = tokio::spawn(async move {
        server
            .send(Message::binary(frame(2, b"warning: oops\n")))
            .await
            .unwrap();
        server.send(Message::binary(frame(3, SUCCESS))).await.unwrap();
        server.close(None).await.unwrap();
        drain(&mut server).await;
    });

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let io = SessionIo {
        stdin: None::<tokio::io::Empty>,
        stdout: &mut stdout,
        stderr: &mut stderr,
    };

    let code = session::run(client, Subprotocol::V4Channel, io, None)
        .await
        .unwrap();

    assert_eq!(code, 0);
    assert!(stdout.is_empty());
    assert_eq!(stderr, b"warning: oops\n");
    server_task.await.unwrap();
}

#[tokio::test]
async fn stdin_reads_become_channel_zero_frames() {
    let (client, mut server) = ws_pair().await;

    let server_task = tokio::spawn(async move {
        let msg = server.next().await.unwrap().unwrap();
        match &msg {
            Message::Binary(data) => assert_eq!(data.as_ref(), frame(0, b"hi").as_slice()),
            other => panic!("expected binary stdin frame, got {other:?}"),
        }
        server.send(Message::binary(frame(3, SUCCESS))).await.unwrap();
        server.close(None).await.unwrap();
        drain(&mut server).await;
    });

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let io = SessionIo {
        stdin: Some(&b"hi"[..]),
        stdout: &mut stdout,
        stderr: &mut stderr,
    };

    let code = session::run(client, Subprotocol::V4Channel, io, None)
        .await
        .unwrap();

    assert_eq!(code, 0);
    server_task.await.unwrap();
}

#[tokio::test]
async fn resize_frames_are_initialised_and_deduplicated() {
    let (client, mut server) = ws_pair().await;

    let server_task = tokio::spawn(async move {
        let mut resizes = Vec::new();
        while resizes.len() < 2 {
            let msg = server.next().await.unwrap().unwrap();
            if let Message::Binary(data) = &msg {
                if data.first() == Some(&4) {
                    resizes.push(data[1..].to_vec());
                }
            }
        }
        assert_eq!(resizes[0], br#"{"Width":80,"Height":24}"#);
        assert_eq!(resizes[1], br#"{"Width":100,"Height":30}"#);

        // The duplicate size must not produce a third frame.
        let extra = tokio::time::timeout(std::time::Duration::from_millis(200), server.next());
        match extra.await {
            Err(_) => {}
            Ok(Some(Ok(Message::Binary(data)))) if data.first() == Some(&4) => {
                panic!("unexpected resize frame after duplicate size")
            }
            Ok(_) => {}
        }

        server.send(Message::binary(frame(3, SUCCESS))).await.unwrap();
        server.close(None).await.unwrap();
        drain(&mut server).await;
    });

    let (resize_tx, resize_rx) = tokio::sync::mpsc::channel(8);
    resize_tx
        .send(TermSize {
            width: 80,
            height: 24,
        })
        .await
        .unwrap();
    resize_tx
        .send(TermSize {
            width: 100,
            height: 30,
        })
        .await
        .unwrap();
    resize_tx
        .send(TermSize {
            width: 100,
            height: 30,
        })
        .await
        .unwrap();

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let io = SessionIo {
        stdin: None::<tokio::io::Empty>,
        stdout: &mut stdout,
        stderr: &mut stderr,
    };

    let code = session::run(client, Subprotocol::V4Channel, io, Some(resize_rx))
        .await
        .unwrap();

    assert_eq!(code, 0);
    server_task.await.unwrap();
}

#[tokio::test]
async fn base64_subprotocol_recovers_raw_bytes() {
    let (client, mut server) = ws_pair().await;

    let server_task = tokio::spawn(async move {
        let payload: &[u8] = &[0xff, 0x00, 0xfe];
        server
            .send(Message::text(format!("1{}", BASE64.encode(payload))))
            .await
            .unwrap();
        server
            .send(Message::text(format!("3{}", BASE64.encode(SUCCESS))))
            .await
            .unwrap();
        server.close(None).await.unwrap();
        drain(&mut server).await;
    });

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let io = SessionIo {
        stdin: None::<tokio::io::Empty>,
        stdout: &mut stdout,
        stderr: &mut stderr,
    };

    let code = session::run(client, Subprotocol::Base64Channel, io, None)
        .await
        .unwrap();

    assert_eq!(code, 0);
    assert_eq!(stdout, vec![0xff, 0x00, 0xfe]);
    server_task.await.unwrap();
}

#[tokio::test]
async fn unknown_channels_are_skipped() {
    let (client, mut server) = ws_pair().await;

    let server_task = tokio::spawn(async move {
        server.send(Message::binary(frame(7, b"noise"))).await.unwrap();
        server
            .send(Message::binary(frame(1, b"signal")))
            .await
            .unwrap();
        server.send(Message::binary(frame(3, SUCCESS))).await.unwrap();
        server.close(None).await.unwrap();
        drain(&mut server).await;
    });

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let io = SessionIo {
        stdin: None::<tokio::io::Empty>,
        stdout: &mut stdout,
        stderr: &mut stderr,
    };

    let code = session::run(client, Subprotocol::V4Channel, io, None)
        .await
        .unwrap();

    assert_eq!(code, 0);
    assert_eq!(stdout, b"signal");
    server_task.await.unwrap();
}

#[tokio::test]
async fn wrong_frame_type_ends_the_session() {
    let (client, mut server) = ws_pair().await;

    let server_task = tokio::spawn(async move {
        server.send(Message::text("1aGk=")).await.unwrap();
        drain(&mut server).await;
    });

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let io = SessionIo {
        stdin: None::<tokio::io::Empty>,
        stdout: &mut stdout,
        stderr: &mut stderr,
    };

    let err = session::run(client, Subprotocol::V4Channel, io, None)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("unexpected text frame"));
    server_task.await.unwrap();
}

#[tokio::test]
async fn remote_failure_surfaces_its_message() {
    let (client, mut server) = ws_pair().await;

    let status = br#"{"status":"Failure","reason":"InternalError","message":"container not running"}"#;
    let server_task = tokio::spawn(async move {
        server
            .send(Message::binary(frame(3, status)))
            .await
            .unwrap();
        drain(&mut server).await;
    });

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let io = SessionIo {
        stdin: None::<tokio::io::Empty>,
        stdout: &mut stdout,
        stderr: &mut stderr,
    };

    let err = session::run(client, Subprotocol::V4Channel, io, None)
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "container not running");
    server_task.await.unwrap();
}

#[tokio::test]
async fn abnormal_close_without_status_is_an_error() {
    let (client, mut server) = ws_pair().await;

    let server_task = tokio::spawn(async move {
        server
            .close(Some(CloseFrame {
                code: 1011.into(),
                reason: "backend blew up".into(),
            }))
            .await
            .unwrap();
        drain(&mut server).await;
    });

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let io = SessionIo {
        stdin: None::<tokio::io::Empty>,
        stdout: &mut stdout,
        stderr: &mut stderr,
    };

    let err = session::run(client, Subprotocol::V4Channel, io, None)
        .await
        .unwrap_err();

    assert!(err.to_string().contains("1011"));
    server_task.await.unwrap();
}

#[tokio::test]
async fn status_after_abnormal_close_still_wins() {
    let (client, mut server) = ws_pair().await;

    let status = br#"{"status":"Failure","reason":"NonZeroExitCode","details":{"causes":[{"message":"3"}]}}"#;
    let server_task = tokio::spawn(async move {
        server
            .send(Message::binary(frame(3, status)))
            .await
            .unwrap();
        server
            .close(Some(CloseFrame {
                code: 1013.into(),
                reason: "".into(),
            }))
            .await
            .ok();
        drain(&mut server).await;
    });

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    let io = SessionIo {
        stdin: None::<tokio::io::Empty>,
        stdout: &mut stdout,
        stderr: &mut stderr,
    };

    let code = session::run(client, Subprotocol::V4Channel, io, None)
        .await
        .unwrap();

    assert_eq!(code, 3);
    server_task.await.unwrap();
}
