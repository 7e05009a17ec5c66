//! Wires a validated invocation into a running session.
//!
//! Order matters here: credentials and preflight first (no side effects on
//! failure), then the terminal goes raw, then the dial. The raw-mode guard
//! is restored on every path out, including Ctrl-C.

use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use execws_core::cluster::ClusterAccess;
use execws_core::session::{self, SessionIo};
use execws_core::terminal::{self, RawModeGuard};
use execws_core::{request, transport, Error, Options, Result};

/// Run one exec session to completion and return the process exit code.
pub async fn run(opts: Options) -> Result<i32> {
    let access = ClusterAccess::load(&opts).await?;

    let effective_tty = if opts.tty && !terminal::stdin_is_terminal() {
        debug!("unable to use a TTY: input is not a terminal or the right kind of file");
        false
    } else {
        opts.tty
    };

    let url = if opts.direct_exec {
        let (node_ip, container) = match &access.pod {
            Some(pod) => {
                let container = request::resolve_container(opts.container.as_deref(), pod)?;
                let node_ip = access
                    .node_internal_ip(opts.direct_exec_node_ip.as_deref(), pod)
                    .await?;
                (node_ip, container)
            }
            // Without a preflighted pod spec both values must have been
            // passed explicitly; Options::validate enforced that.
            None => {
                let node_ip = opts
                    .direct_exec_node_ip
                    .clone()
                    .ok_or_else(|| Error::validation("Unable to find Node IP"))?;
                let container = opts
                    .container
                    .clone()
                    .ok_or_else(|| Error::validation("Cannot determine container name"))?;
                (node_ip, container)
            }
        };
        request::kubelet_exec_url(
            &node_ip,
            &access.namespace,
            &opts.pod,
            &container,
            &opts.command,
            opts.stdin,
            effective_tty,
        )?
    } else {
        request::api_server_exec_url(
            &access.server,
            &access.namespace,
            &opts.pod,
            &opts.command,
            opts.container.as_deref(),
            opts.stdin,
            opts.tty.then_some(effective_tty),
        )?
    };

    trace!(uri = %url, "prepared exec request");

    let mut raw_guard = if effective_tty {
        Some(RawModeGuard::enter()?)
    } else {
        None
    };
    let cancel = CancellationToken::new();
    let resize_rx = if effective_tty {
        Some(terminal::resize_events(cancel.clone()))
    } else {
        None
    };

    let dialed = transport::dial(&url, &access.headers, access.tls.clone(), opts.prefer_base64).await;
    let (ws, mode) = match dialed {
        Ok(established) => established,
        Err(err) => {
            cancel.cancel();
            if let Some(guard) = raw_guard.as_mut() {
                guard.restore();
            }
            return Err(err);
        }
    };

    let io = SessionIo {
        stdin: opts.stdin.then(tokio::io::stdin),
        stdout: tokio::io::stdout(),
        stderr: tokio::io::stderr(),
    };

    let result = tokio::select! {
        outcome = session::run(ws, mode, io, resize_rx) => outcome,
        _ = tokio::signal::ctrl_c() => {
            debug!("interrupted; abandoning session");
            Ok(130)
        }
    };

    cancel.cancel();
    if let Some(guard) = raw_guard.as_mut() {
        guard.restore();
    }

    result
}
