//! Tab-completion callbacks, spoken in the kubectl plugin convention.
//!
//! kubectl invokes the `kubectl_complete-execws` entry point with the
//! command words typed so far plus the partial word under the cursor. The
//! reply is one candidate per line followed by a `:<directive>` line.

use k8s_openapi::api::core::v1::{Namespace, Pod};
use kube::api::{Api, ListParams};
use tracing::debug;

use execws_core::cluster::ClusterAccess;
use execws_core::{Options, Result};

/// Completions are not file names
const DIRECTIVE_NO_FILE_COMP: u8 = 4;
/// Completion failed; the shell should stay quiet
const DIRECTIVE_ERROR: u8 = 1;

/// Flags that consume the following word
const VALUE_FLAGS: [&str; 9] = [
    "--kubeconfig",
    "-n",
    "--namespace",
    "--context",
    "--as",
    "-c",
    "--container",
    "--node-direct-exec-ip",
    "-v",
];

/// What the cursor position asks us to complete
#[derive(Debug, PartialEq, Eq)]
enum Wanted {
    Pods,
    Namespaces,
    Containers { pod: String },
    Nothing,
}

/// Relevant state recovered from the words typed so far
#[derive(Debug, Default)]
struct TypedSoFar {
    kubeconfig: Option<String>,
    context: Option<String>,
    namespace: Option<String>,
    pod: Option<String>,
}

/// Run completion mode: print candidates and a directive line.
///
/// Always exits 0; failures are signalled through the directive.
pub async fn run(args: &[String]) -> i32 {
    let (to_complete, words) = match args.split_last() {
        Some((last, rest)) => (last.as_str(), rest),
        None => ("", args),
    };

    let typed = scan_words(words);
    let wanted = wanted(words, &typed);

    match candidates(&typed, wanted, to_complete).await {
        Ok(lines) => {
            for line in lines {
                println!("{line}");
            }
            println!(":{DIRECTIVE_NO_FILE_COMP}");
        }
        Err(err) => {
            debug!(error = %err, "completion lookup failed");
            println!(":{DIRECTIVE_ERROR}");
        }
    }
    0
}

/// Recover flag values and the pod positional from the typed words.
fn scan_words(words: &[String]) -> TypedSoFar {
    let mut typed = TypedSoFar::default();
    let mut iter = words.iter().peekable();

    while let Some(word) = iter.next() {
        if let Some((flag, value)) = word.split_once('=') {
            store_flag(&mut typed, flag, value);
            continue;
        }
        if VALUE_FLAGS.contains(&word.as_str()) {
            if let Some(value) = iter.next() {
                store_flag(&mut typed, word, value);
            }
            continue;
        }
        if word.starts_with('-') {
            continue;
        }
        if typed.pod.is_none() {
            let name = word.strip_prefix("pod/").unwrap_or(word);
            typed.pod = Some(name.to_string());
        }
    }

    typed
}

fn store_flag(typed: &mut TypedSoFar, flag: &str, value: &str) {
    match flag {
        "--kubeconfig" => typed.kubeconfig = Some(value.to_string()),
        "--context" => typed.context = Some(value.to_string()),
        "-n" | "--namespace" => typed.namespace = Some(value.to_string()),
        _ => {}
    }
}

/// Decide what to complete from the word before the cursor.
fn wanted(words: &[String], typed: &TypedSoFar) -> Wanted {
    match words.last().map(String::as_str) {
        Some("-n" | "--namespace") => Wanted::Namespaces,
        Some("-c" | "--container") => match &typed.pod {
            Some(pod) => Wanted::Containers { pod: pod.clone() },
            None => Wanted::Nothing,
        },
        Some(flag) if VALUE_FLAGS.contains(&flag) => Wanted::Nothing,
        _ if typed.pod.is_none() => Wanted::Pods,
        _ => Wanted::Nothing,
    }
}

async fn candidates(
    typed: &TypedSoFar,
    wanted: Wanted,
    to_complete: &str,
) -> Result<Vec<String>> {
    if wanted == Wanted::Nothing {
        return Ok(Vec::new());
    }

    let opts = Options {
        kubeconfig: typed.kubeconfig.clone().map(Into::into),
        context: typed.context.clone(),
        // Completion must not die on a context without a namespace.
        namespace: Some(typed.namespace.clone().unwrap_or_else(|| "default".into())),
        skip_preflight: true,
        ..Default::default()
    };
    let access = ClusterAccess::load(&opts).await?;

    let names = match wanted {
        Wanted::Pods => {
            let pods: Api<Pod> = Api::namespaced(access.client(), &access.namespace);
            let list = pods
                .list(&ListParams::default())
                .await
                .map_err(execws_core::Error::from_kube)?;
            list.items
                .into_iter()
                .filter_map(|pod| pod.metadata.name)
                .collect()
        }
        Wanted::Namespaces => {
            let namespaces: Api<Namespace> = Api::all(access.client());
            let list = namespaces
                .list(&ListParams::default())
                .await
                .map_err(execws_core::Error::from_kube)?;
            list.items
                .into_iter()
                .filter_map(|ns| ns.metadata.name)
                .collect()
        }
        Wanted::Containers { pod } => {
            let pods: Api<Pod> = Api::namespaced(access.client(), &access.namespace);
            let pod = pods.get(&pod).await.map_err(execws_core::Error::from_kube)?;
            container_names(&pod)
        }
        Wanted::Nothing => Vec::new(),
    };

    Ok(filter_prefix(names, to_complete))
}

/// Regular containers first, then ephemeral debug containers.
fn container_names(pod: &Pod) -> Vec<String> {
    let Some(spec) = &pod.spec else {
        return Vec::new();
    };
    let mut names: Vec<String> = spec.containers.iter().map(|c| c.name.clone()).collect();
    if let Some(ephemeral) = &spec.ephemeral_containers {
        names.extend(ephemeral.iter().map(|c| c.name.clone()));
    }
    names
}

fn filter_prefix(names: Vec<String>, prefix: &str) -> Vec<String> {
    names
        .into_iter()
        .filter(|name| name.starts_with(prefix))
        .collect()
}
