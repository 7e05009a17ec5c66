//! Command-line surface for `execws`.
//!
//! A replacement for `kubectl exec` that works over WebSocket connections.
//! The same binary doubles as the tab-completion helper when invoked as
//! `kubectl_complete-execws`.

pub mod completion;
pub mod exec;

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use execws_core::{Error, Options, Result};

/// Default command when a TTY is requested without an explicit command:
/// try the friendliest shell available in the container.
const DEFAULT_TTY_COMMAND: [&str; 3] = [
    "sh",
    "-c",
    "exec $(command -v bash || command -v ash || command -v sh)",
];

/// kubectl exec over WebSockets
#[derive(Parser, Debug)]
#[command(name = "execws")]
#[command(version, about = "kubectl exec over WebSockets")]
#[command(
    long_about = "A replacement for \"kubectl exec\" that works over WebSocket connections."
)]
pub struct Cli {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(flatten)]
    pub exec: ExecArgs,

    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Flags that apply to every subcommand
#[derive(Args, Debug, Clone)]
pub struct GlobalArgs {
    /// kubeconfig file (default is $HOME/.kube/config)
    #[arg(long, global = true, value_name = "PATH")]
    pub kubeconfig: Option<PathBuf>,

    /// Set namespace
    #[arg(short = 'n', long, global = true)]
    pub namespace: Option<String>,

    /// Set loglevel
    #[arg(short = 'v', long, global = true, default_value_t = 2)]
    pub loglevel: u8,

    /// Don't perform TLS certificate verification
    #[arg(short = 'k', long = "skip-tls-verify", global = true)]
    pub skip_tls_verify: bool,

    /// Use a specific kubeconfig context
    #[arg(long, global = true)]
    pub context: Option<String>,

    /// Username to impersonate for the whole session
    #[arg(long = "as", global = true, value_name = "USER")]
    pub impersonate_user: Option<String>,
}

/// The exec invocation itself
#[derive(Args, Debug, Clone)]
pub struct ExecArgs {
    /// Target pod, either NAME or pod/NAME
    #[arg(value_name = "POD")]
    pub target: Option<String>,

    /// Command to run in the container
    #[arg(last = true, value_name = "CMD")]
    pub command: Vec<String>,

    /// Stdin is a TTY
    #[arg(short = 't', long)]
    pub tty: bool,

    /// Pass stdin to container
    #[arg(short = 'i', long)]
    pub stdin: bool,

    /// Container name
    #[arg(short = 'c', long)]
    pub container: Option<String>,

    /// Don't make preflight request to ensure pod exists
    #[arg(long = "no-sanity-check")]
    pub no_sanity_check: bool,

    /// Partially bypass the API server, by using the kubelet API
    #[arg(long = "node-direct-exec")]
    pub node_direct_exec: bool,

    /// Node IP to use with direct-exec feature
    #[arg(long = "node-direct-exec-ip", value_name = "IP")]
    pub node_direct_exec_ip: Option<String>,

    /// Use base64 subprotocol by default
    #[arg(long = "base64")]
    pub base64: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the release version
    Version,
}

impl Cli {
    /// Run the selected command, returning the process exit code.
    pub async fn run(self) -> Result<i32> {
        if let Some(Command::Version) = self.command {
            println!("execws {}", env!("CARGO_PKG_VERSION"));
            return Ok(0);
        }

        let opts = self.into_options()?;
        exec::run(opts).await
    }

    /// Turn the parsed invocation into validated session options.
    pub fn into_options(self) -> Result<Options> {
        let target = self
            .exec
            .target
            .ok_or_else(|| Error::validation("Please specify a pod"))?;

        let pod = match target.split_once('/') {
            Some(("pod", name)) => name.to_string(),
            Some((_, _)) => return Err(Error::validation("Non pod object not yet supported")),
            None => target,
        };

        let command = if self.exec.command.is_empty() {
            if self.exec.tty {
                DEFAULT_TTY_COMMAND.iter().map(|s| s.to_string()).collect()
            } else {
                return Err(Error::validation("Please specify a command"));
            }
        } else {
            self.exec.command
        };

        let opts = Options {
            pod,
            container: self.exec.container,
            command,
            namespace: self.global.namespace,
            kubeconfig: self.global.kubeconfig,
            context: self.global.context,
            impersonate_user: self.global.impersonate_user,
            stdin: self.exec.stdin,
            tty: self.exec.tty,
            skip_tls_verify: self.global.skip_tls_verify,
            skip_preflight: self.exec.no_sanity_check,
            direct_exec: self.exec.node_direct_exec,
            direct_exec_node_ip: self.exec.node_direct_exec_ip,
            prefer_base64: self.exec.base64,
        };
        opts.validate()?;
        Ok(opts)
    }
}
