//! The streaming exec session.
//!
//! Three cooperating activities share the connection: a stdin sender, a
//! frame receiver, and a resize emitter. They are realised as one
//! `select!` loop owning the socket plus a spawned stdin reader feeding a
//! channel, so every socket write happens in a single place and frames
//! never interleave. The loop keeps the first terminal event and stops the
//! helpers by dropping their channels.
//!
//! A remote exit code is the session's *result*, not an error: `run`
//! returns `Ok(code)`.

use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::protocol::{self, channel, FrameError, StatusOutcome, Subprotocol, TermSize};

/// Payload capacity of one stdin frame; one local read becomes one frame.
const STDIN_CHUNK: usize = 4096;

/// Local endpoints the session bridges the remote streams to.
///
/// Generic so tests can capture output in buffers and feed stdin from a
/// slice; the CLI passes the process's real handles.
pub struct SessionIo<I, O, E> {
    /// Local input forwarded on channel 0; `None` when stdin is off
    pub stdin: Option<I>,
    /// Sink for channel-1 payloads
    pub stdout: O,
    /// Sink for channel-2 payloads
    pub stderr: E,
}

/// Drive an established connection until the session ends.
///
/// Returns the remote exit code: 0 on a Success status or a normal close,
/// the reported code on NonZeroExitCode. Everything else is an error.
pub async fn run<S, I, O, E>(
    ws: WebSocketStream<S>,
    mode: Subprotocol,
    io: SessionIo<I, O, E>,
    resize_rx: Option<mpsc::Receiver<TermSize>>,
) -> Result<i32>
where
    S: AsyncRead + AsyncWrite + Unpin,
    I: AsyncRead + Unpin + Send + 'static,
    O: AsyncWrite + Unpin,
    E: AsyncWrite + Unpin,
{
    let (mut sink, mut stream) = ws.split();
    let SessionIo {
        stdin,
        mut stdout,
        mut stderr,
    } = io;

    // Stdin sender: a reader task feeding the loop, spawned only when
    // stdin was requested. EOF ends the sender alone; the receiver keeps
    // draining until the server closes.
    let (stdin_tx, mut stdin_rx) = mpsc::channel::<Vec<u8>>(16);
    let stdin_task = stdin.map(|mut input| {
        tokio::spawn(async move {
            let mut buf = vec![0u8; STDIN_CHUNK];
            loop {
                match input.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        if stdin_tx.send(buf[..n].to_vec()).await.is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        debug!(error = %err, "stdin read failed");
                        break;
                    }
                }
            }
        })
    });
    let mut stdin_open = stdin_task.is_some();

    let mut resize_rx = resize_rx;
    let mut resize_open = resize_rx.is_some();
    let mut last_size: Option<TermSize> = None;

    let mut remote_status: Option<i32> = None;
    let mut clean_close = false;
    let mut abnormal_close: Option<u16> = None;

    let result: Result<()> = loop {
        tokio::select! {
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Close(frame))) => {
                    match &frame {
                        Some(f) if f.code != CloseCode::Normal => {
                            debug!(
                                code = u16::from(f.code),
                                reason = %f.reason,
                                "connection closed with error code"
                            );
                            abnormal_close = Some(u16::from(f.code));
                        }
                        _ => clean_close = true,
                    }
                    break Ok(());
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(msg)) => match protocol::decode(&msg, mode) {
                    Ok((channel::STDOUT, payload)) => {
                        if let Err(err) = forward(&mut stdout, &payload).await {
                            break Err(Error::stream(format!("failed to write to stdout: {err}")));
                        }
                    }
                    Ok((channel::STDERR, payload)) => {
                        if let Err(err) = forward(&mut stderr, &payload).await {
                            break Err(Error::stream(format!("failed to write to stderr: {err}")));
                        }
                    }
                    Ok((channel::ERROR, payload)) => match protocol::parse_status(&payload) {
                        Ok(StatusOutcome::Success) => {
                            // The server closes right after; keep draining.
                            remote_status = Some(0);
                        }
                        Ok(StatusOutcome::ExitCode(code)) => {
                            remote_status = Some(code);
                            break Ok(());
                        }
                        Ok(StatusOutcome::Failed(message)) => break Err(Error::remote(message)),
                        Err(err) => {
                            break Err(Error::stream(format!("undecodable status payload: {err}")))
                        }
                    },
                    Ok((other, _)) => {
                        warn!(channel = other, "ignoring frame on unexpected channel");
                    }
                    Err(err @ FrameError::WrongType { .. }) => {
                        break Err(Error::stream(err.to_string()));
                    }
                    Err(err) => {
                        warn!(error = %err, "skipping undecodable frame");
                    }
                },
                Some(Err(WsError::ConnectionClosed | WsError::AlreadyClosed)) => {
                    clean_close = true;
                    break Ok(());
                }
                Some(Err(err)) => break Err(Error::stream(err.to_string())),
                None => break Ok(()),
            },

            chunk = stdin_rx.recv(), if stdin_open => match chunk {
                Some(data) => {
                    let frame = protocol::encode(channel::STDIN, &data, mode);
                    if let Err(err) = sink.send(frame).await {
                        break send_failure(err);
                    }
                }
                None => {
                    stdin_open = false;
                    debug!("local stdin closed; waiting for the server to finish");
                }
            },

            size = next_size(&mut resize_rx), if resize_open => match size {
                Some(size) => {
                    if last_size != Some(size) {
                        last_size = Some(size);
                        if let Err(err) = sink.send(protocol::encode_resize(size, mode)).await {
                            break send_failure(err);
                        }
                    }
                }
                None => resize_open = false,
            },
        }
    };

    if let Some(task) = stdin_task {
        task.abort();
    }
    let _ = sink.send(Message::Close(None)).await;

    result?;

    if let Some(code) = remote_status {
        Ok(code)
    } else if clean_close {
        Ok(0)
    } else if let Some(code) = abnormal_close {
        Err(Error::stream(format!("session ended with close code {code}")))
    } else {
        // Stream end after the close handshake completed.
        Ok(0)
    }
}

async fn next_size(rx: &mut Option<mpsc::Receiver<TermSize>>) -> Option<TermSize> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn forward<W: AsyncWrite + Unpin>(sink: &mut W, data: &[u8]) -> std::io::Result<()> {
    sink.write_all(data).await?;
    sink.flush().await
}

/// Classify a failed socket write: a completed close handshake is the
/// session ending, anything else is a stream error.
fn send_failure(err: WsError) -> Result<()> {
    match err {
        WsError::ConnectionClosed | WsError::AlreadyClosed => Ok(()),
        err => Err(Error::stream(format!("failed to send frame: {err}"))),
    }
}
