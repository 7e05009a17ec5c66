//! Local terminal handling: raw mode, window size, resize notifications.
//!
//! Raw mode is scoped: [`RawModeGuard`] restores the terminal on drop, so
//! the mode comes back on success, error, and panic unwinds alike. Resize
//! notifications are a capability with two providers — a SIGWINCH stream on
//! POSIX and a ~250 ms poll on Windows — behind one channel; the session
//! deduplicates, so the providers can be chatty.

use std::io::IsTerminal;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::Result;
use crate::protocol::TermSize;

/// Scoped raw-mode ownership of the local terminal.
pub struct RawModeGuard {
    active: bool,
}

impl RawModeGuard {
    /// Switch local input to raw mode: no echo, no line buffering.
    pub fn enter() -> Result<Self> {
        crossterm::terminal::enable_raw_mode()?;
        Ok(Self { active: true })
    }

    /// Restore the saved terminal mode. Idempotent.
    pub fn restore(&mut self) {
        if self.active {
            self.active = false;
            if let Err(err) = crossterm::terminal::disable_raw_mode() {
                debug!(error = %err, "failed to restore terminal mode");
            }
        }
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        self.restore();
    }
}

/// Current window size in character cells.
pub fn size() -> Result<TermSize> {
    let (width, height) = crossterm::terminal::size()?;
    Ok(TermSize { width, height })
}

/// Whether local stdin is attached to a terminal.
///
/// Used to downgrade a TTY request when input is redirected.
pub fn stdin_is_terminal() -> bool {
    std::io::stdin().is_terminal()
}

/// Subscribe to window-size notifications.
///
/// The receiver is seeded with the current size, then yields the size at
/// each subsequent change notification until `cancel` fires. Sizes are not
/// deduplicated here.
pub fn resize_events(cancel: CancellationToken) -> mpsc::Receiver<TermSize> {
    let (tx, rx) = mpsc::channel(8);

    tokio::spawn(async move {
        match size() {
            Ok(initial) => {
                if tx.send(initial).await.is_err() {
                    return;
                }
            }
            Err(err) => debug!(error = %err, "failed to query terminal size"),
        }
        notify_loop(tx, cancel).await;
    });

    rx
}

#[cfg(unix)]
async fn notify_loop(tx: mpsc::Sender<TermSize>, cancel: CancellationToken) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut winch = match signal(SignalKind::window_change()) {
        Ok(s) => s,
        Err(err) => {
            debug!(error = %err, "failed to subscribe to window-change signal");
            return;
        }
    };

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            changed = winch.recv() => {
                if changed.is_none() {
                    return;
                }
            }
        }
        match size() {
            Ok(current) => {
                if tx.send(current).await.is_err() {
                    return;
                }
            }
            Err(err) => debug!(error = %err, "failed to query terminal size"),
        }
    }
}

#[cfg(windows)]
async fn notify_loop(tx: mpsc::Sender<TermSize>, cancel: CancellationToken) {
    use std::time::Duration;

    // No window-change signal on Windows; poll and let the session
    // deduplicate by comparing sizes.
    let mut tick = tokio::time::interval(Duration::from_millis(250));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tick.tick() => {}
        }
        match size() {
            Ok(current) => {
                if tx.send(current).await.is_err() {
                    return;
                }
            }
            Err(err) => debug!(error = %err, "failed to query terminal size"),
        }
    }
}
