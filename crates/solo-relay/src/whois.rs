//! Identity lookups through the local `tailscale` CLI.
//!
//! Runs `tailscale whois --json <ip>` via `tokio::process::Command` and maps
//! the result onto a [`WhoisOutcome`].

use futures_util::FutureExt;
use solo_core::{parse_whois_json, IdentityResolver, WhoisOutcome};
use std::path::PathBuf;
use std::process::Output;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Upper bound on a single `tailscale whois` run.
const WHOIS_TIMEOUT: Duration = Duration::from_secs(5);

/// Subprocess-backed identity lookup.
#[derive(Debug, Clone)]
pub struct TailscaleWhois {
    bin: PathBuf,
    timeout: Duration,
}

impl TailscaleWhois {
    pub fn new(bin: PathBuf) -> Self {
        Self {
            bin,
            timeout: WHOIS_TIMEOUT,
        }
    }

    /// Look up `address`. Never errors; failures become [`WhoisOutcome::Failed`].
    pub async fn lookup(&self, address: &str) -> WhoisOutcome {
        let mut cmd = Command::new(&self.bin);
        cmd.arg("whois").arg("--json").arg(address).kill_on_drop(true);

        debug!(bin = %self.bin.display(), address, "running whois");

        let output = match tokio::time::timeout(self.timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                warn!(bin = %self.bin.display(), error = %e, "failed to run whois");
                return WhoisOutcome::Failed(format!("spawn {}: {e}", self.bin.display()));
            }
            Err(_) => return WhoisOutcome::Failed("whois timed out".to_string()),
        };

        classify(&output)
    }

    /// Wrap this lookup as the injectable [`IdentityResolver`] strategy.
    pub fn into_resolver(self) -> IdentityResolver {
        let whois = Arc::new(self);
        Arc::new(move |address: String| {
            let whois = whois.clone();
            async move { whois.lookup(&address).await }.boxed()
        })
    }
}

/// Map a finished whois process onto an outcome.
///
/// A failing exit whose stderr says the address is unknown is `NotFound`;
/// any other failing exit, or unparsable stdout, is `Failed`.
fn classify(output: &Output) -> WhoisOutcome {
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if reports_no_match(&stderr) {
            return WhoisOutcome::NotFound;
        }
        let code = output.status.code().unwrap_or(-1);
        return WhoisOutcome::Failed(format!(
            "whois exited with {code}: {}",
            stderr.trim().chars().take(200).collect::<String>()
        ));
    }

    match parse_whois_json(&output.stdout) {
        Ok(identity) => WhoisOutcome::Resolved(identity),
        Err(e) => WhoisOutcome::Failed(e.to_string()),
    }
}

fn reports_no_match(stderr: &str) -> bool {
    let stderr = stderr.to_ascii_lowercase();
    stderr.contains("no match") || stderr.contains("not found")
}
