use std::{
    collections::HashSet, net::IpAddr, path::Path, str::FromStr, sync::LazyLock, time::Duration,
};

use anyhow::Context;
use ipnet::IpNet;
use regex_lite::Regex;
use tokio::{io::AsyncWriteExt, process::Command, time::timeout};
use tracing::info;

/// External tools the service may spawn, matched on the program's file name.
pub const ALLOWED_TOOLS: &[&str] = &["nmap", "wkhtmltopdf", "sendmail"];

static DOMAIN_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?\.)+[a-zA-Z]{2,63}$")
        .expect("domain pattern is valid")
});

static EMAIL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").expect("email pattern is valid"));

pub fn is_valid_domain(domain: &str) -> bool {
    domain.len() <= 253 && DOMAIN_RE.is_match(domain)
}

pub fn is_valid_email(email: &str) -> bool {
    email.len() <= 254
        && EMAIL_RE.is_match(email)
        && email
            .rsplit_once('@')
            .is_some_and(|(_, host)| is_valid_domain(host))
}

/// An empty allowlist permits every target. Entries are exact names,
/// `*.suffix` wildcards or CIDR ranges.
pub fn in_scope(target: &str, allowlist: &[String]) -> bool {
    if allowlist.is_empty() {
        return true;
    }

    if allowlist
        .iter()
        .any(|item| item.eq_ignore_ascii_case(target))
    {
        return true;
    }

    let lowered = target.to_ascii_lowercase();
    if allowlist.iter().any(|entry| {
        entry
            .strip_prefix("*.")
            .is_some_and(|suffix| lowered.ends_with(&format!(".{}", suffix.to_ascii_lowercase())))
    }) {
        return true;
    }

    if let Ok(ip) = IpAddr::from_str(target) {
        return allowlist.iter().any(|entry| {
            IpNet::from_str(entry)
                .map(|net| net.contains(&ip))
                .unwrap_or(false)
        });
    }

    false
}

/// Spawns an allowlisted tool, optionally feeding `stdin`, and returns its
/// stdout. Without a `limit` the call waits for the process indefinitely.
pub async fn run_command_allowlisted(
    cmd: &str,
    args: &[String],
    allowed: &[&str],
    stdin: Option<Vec<u8>>,
    limit: Option<Duration>,
) -> anyhow::Result<Vec<u8>> {
    let allowed_set: HashSet<&str> = allowed.iter().copied().collect();
    let program = Path::new(cmd)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(cmd);
    if !allowed_set.contains(program) {
        anyhow::bail!("command not allowed: {cmd}");
    }

    info!(command = cmd, ?args, "audit: launching external tool");
    let mut child = Command::new(cmd)
        .args(args)
        .stdin(if stdin.is_some() {
            std::process::Stdio::piped()
        } else {
            std::process::Stdio::null()
        })
        .stdout(std::process::Stdio::piped())
        .stderr(std::process::Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .with_context(|| format!("failed to spawn {cmd}"))?;

    let writer = match (stdin, child.stdin.take()) {
        (Some(payload), Some(mut pipe)) => Some(tokio::spawn(async move {
            pipe.write_all(&payload).await?;
            pipe.shutdown().await
        })),
        _ => None,
    };

    let out = match limit {
        Some(limit) => timeout(limit, child.wait_with_output())
            .await
            .with_context(|| format!("{cmd} timed out after {}s", limit.as_secs()))??,
        None => child.wait_with_output().await?,
    };

    if !out.status.success() {
        anyhow::bail!(
            "{cmd} failed ({}): {}",
            out.status,
            String::from_utf8_lossy(&out.stderr).trim()
        );
    }

    if let Some(writer) = writer {
        writer
            .await
            .context("stdin writer panicked")?
            .with_context(|| format!("failed to write stdin of {cmd}"))?;
    }

    Ok(out.stdout)
}
