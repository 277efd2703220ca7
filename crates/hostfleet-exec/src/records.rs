//! Host records and resolver configuration

use std::net::IpAddr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use crate::elevation::shell_quote;
use crate::error::ExecError;
use crate::traits::RemoteExecutor;
use crate::transfer::write_content;

/// System hosts file
pub const HOSTS_FILE: &str = "/etc/hosts";

/// System resolver configuration
pub const RESOLV_CONF: &str = "/etc/resolv.conf";

/// A static name-to-address mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    /// IPv4 or IPv6 address
    pub ip: String,
    /// Host name the address resolves for
    pub domain: String,
}

impl Record {
    /// Build a validated record
    ///
    /// # Errors
    /// Returns `ExecError::InvalidInput` for an unparsable address or a domain
    /// with characters that are not valid in a host name
    pub fn new(ip: impl Into<String>, domain: impl Into<String>) -> Result<Self, ExecError> {
        let record = Self {
            ip: ip.into(),
            domain: domain.into(),
        };
        record.validate()?;
        Ok(record)
    }

    /// Check the address and domain
    ///
    /// # Errors
    /// Returns `ExecError::InvalidInput` describing the first problem found
    pub fn validate(&self) -> Result<(), ExecError> {
        validate_ip(&self.ip)?;

        let valid_domain = !self.domain.is_empty()
            && self.domain.len() <= 253
            && self
                .domain
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_'));
        if !valid_domain {
            return Err(ExecError::InvalidInput(format!(
                "invalid domain: {:?}",
                self.domain
            )));
        }
        Ok(())
    }

    fn line(&self) -> String {
        format!("{} {}", self.ip, self.domain)
    }
}

fn validate_ip(ip: &str) -> Result<(), ExecError> {
    ip.parse::<IpAddr>()
        .map(|_| ())
        .map_err(|_| ExecError::InvalidInput(format!("invalid IP address: {ip:?}")))
}

/// Merge records into hosts-file text
///
/// Existing mappings for a record's domain are replaced in place, other
/// aliases on the same line are kept, and records that were not present are
/// appended. When several records name the same domain the last one wins.
pub fn merge_hosts(existing: &str, records: &[Record]) -> String {
    let mut wanted: Vec<&Record> = Vec::new();
    for record in records {
        wanted.retain(|r| r.domain != record.domain);
        wanted.push(record);
    }

    let mut placed = vec![false; wanted.len()];
    let mut lines: Vec<String> = Vec::new();

    for line in existing.lines() {
        let (body, comment) = match line.find('#') {
            Some(idx) => (&line[..idx], Some(&line[idx..])),
            None => (line, None),
        };
        let mut fields = body.split_whitespace();
        let Some(ip) = fields.next() else {
            lines.push(line.to_string());
            continue;
        };
        let names: Vec<&str> = fields.collect();

        let matched: Vec<usize> = wanted
            .iter()
            .enumerate()
            .filter(|(_, r)| names.contains(&r.domain.as_str()))
            .map(|(idx, _)| idx)
            .collect();
        if matched.is_empty() {
            lines.push(line.to_string());
            continue;
        }

        for idx in matched {
            if !placed[idx] {
                lines.push(wanted[idx].line());
                placed[idx] = true;
            }
        }

        let remaining: Vec<&str> = names
            .into_iter()
            .filter(|name| !wanted.iter().any(|r| r.domain == *name))
            .collect();
        if !remaining.is_empty() {
            let mut kept = format!("{ip} {}", remaining.join(" "));
            if let Some(comment) = comment {
                kept.push(' ');
                kept.push_str(comment);
            }
            lines.push(kept);
        }
    }

    for (record, placed) in wanted.iter().zip(placed) {
        if !placed {
            lines.push(record.line());
        }
    }

    let mut merged = lines.join("\n");
    merged.push('\n');
    merged
}

/// Whether resolver text already lists `ip` as a nameserver
pub fn has_nameserver(resolv: &str, ip: &str) -> bool {
    resolv.lines().any(|line| {
        let mut fields = line.split_whitespace();
        fields.next() == Some("nameserver") && fields.next() == Some(ip)
    })
}

pub(crate) async fn mkdir_all<E>(executor: &E, path: &str) -> Result<(), ExecError>
where
    E: RemoteExecutor + ?Sized,
{
    if path.trim().is_empty() {
        return Err(ExecError::InvalidInput("empty directory path".to_string()));
    }
    executor
        .run_elevated(&format!("mkdir -p {}", shell_quote(path)))
        .await?
        .into_checked()
        .map(|_| ())
}

pub(crate) async fn add_host_records<E>(executor: &E, records: &[Record]) -> Result<(), ExecError>
where
    E: RemoteExecutor + ?Sized,
{
    update_hosts_file(executor, HOSTS_FILE, records).await
}

#[instrument(skip(executor, records), fields(host = %executor.target(), count = records.len()))]
pub(crate) async fn update_hosts_file<E>(
    executor: &E,
    path: &str,
    records: &[Record],
) -> Result<(), ExecError>
where
    E: RemoteExecutor + ?Sized,
{
    for record in records {
        record.validate()?;
    }
    if records.is_empty() {
        return Ok(());
    }

    let existing = read_text(executor, path).await?;
    let merged = merge_hosts(&existing, records);
    if merged == existing {
        debug!(path, "hosts file already up to date");
        return Ok(());
    }

    write_content(executor, &merged, path).await?;
    info!(path, "hosts file updated");
    Ok(())
}

pub(crate) async fn add_nameserver<E>(executor: &E, ip: &str) -> Result<(), ExecError>
where
    E: RemoteExecutor + ?Sized,
{
    update_resolver(executor, RESOLV_CONF, ip).await
}

#[instrument(skip(executor), fields(host = %executor.target()))]
pub(crate) async fn update_resolver<E>(executor: &E, path: &str, ip: &str) -> Result<(), ExecError>
where
    E: RemoteExecutor + ?Sized,
{
    validate_ip(ip)?;

    let existing = read_text(executor, path).await?;
    if has_nameserver(&existing, ip) {
        debug!(path, ip, "nameserver already present");
        return Ok(());
    }

    let line = shell_quote(&format!("nameserver {ip}"));
    executor
        .run_elevated(&format!("echo {line} >> {}", shell_quote(path)))
        .await?
        .into_checked()?;
    info!(path, ip, "nameserver added");
    Ok(())
}

/// Read a text file, treating a missing file as empty
async fn read_text<E>(executor: &E, path: &str) -> Result<String, ExecError>
where
    E: RemoteExecutor + ?Sized,
{
    let quoted = shell_quote(path);
    let result = executor
        .run(&format!("if [ -e {quoted} ]; then cat {quoted}; fi"))
        .await?
        .into_checked()?;
    Ok(result.stdout)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalExecutor;

    fn record(ip: &str, domain: &str) -> Record {
        Record::new(ip, domain).unwrap()
    }

    #[test]
    fn test_record_validation() {
        assert!(Record::new("10.0.0.5", "apiserver.cluster.local").is_ok());
        assert!(Record::new("fd00::1", "node-1").is_ok());
        assert!(Record::new("10.0.0.256", "node-1").is_err());
        assert!(Record::new("10.0.0.5", "bad domain").is_err());
        assert!(Record::new("10.0.0.5", "x;rm -rf /").is_err());
        assert!(Record::new("10.0.0.5", "").is_err());
    }

    #[test]
    fn test_merge_replaces_and_appends() {
        let existing = "127.0.0.1 localhost\n# cluster\n10.0.0.1 apiserver.cluster.local\n";
        let merged = merge_hosts(
            existing,
            &[
                record("10.0.0.9", "apiserver.cluster.local"),
                record("10.0.0.7", "registry.local"),
            ],
        );
        assert_eq!(
            merged,
            "127.0.0.1 localhost\n# cluster\n10.0.0.9 apiserver.cluster.local\n10.0.0.7 registry.local\n"
        );
    }

    #[test]
    fn test_merge_keeps_other_aliases() {
        let existing = "10.0.0.1 node-1 apiserver # managed\n";
        let merged = merge_hosts(existing, &[record("10.0.0.2", "apiserver")]);
        assert_eq!(merged, "10.0.0.2 apiserver\n10.0.0.1 node-1 # managed\n");
    }

    #[test]
    fn test_merge_last_duplicate_wins() {
        let merged = merge_hosts(
            "",
            &[record("10.0.0.1", "vip.local"), record("10.0.0.2", "vip.local")],
        );
        assert_eq!(merged, "10.0.0.2 vip.local\n");
    }

    #[test]
    fn test_merge_is_idempotent() {
        let records = [record("10.0.0.9", "apiserver.cluster.local")];
        let once = merge_hosts("127.0.0.1 localhost\n", &records);
        assert_eq!(merge_hosts(&once, &records), once);
    }

    #[test]
    fn test_has_nameserver() {
        let resolv = "search lan\nnameserver 1.1.1.1\nnameserver  10.0.0.53\n";
        assert!(has_nameserver(resolv, "10.0.0.53"));
        assert!(!has_nameserver(resolv, "10.0.0.5"));
    }

    #[tokio::test]
    async fn test_update_hosts_file_through_executor() {
        let dir = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();
        let hosts = dir.path().join("hosts");
        std::fs::write(&hosts, "127.0.0.1 localhost\n").unwrap();

        let exec = LocalExecutor::new().with_staging_dir(staging.path().display().to_string());
        let path = hosts.display().to_string();
        update_hosts_file(&exec, &path, &[record("10.0.0.9", "apiserver")])
            .await
            .unwrap();

        assert_eq!(
            std::fs::read_to_string(&hosts).unwrap(),
            "127.0.0.1 localhost\n10.0.0.9 apiserver\n"
        );
    }

    #[tokio::test]
    async fn test_update_hosts_file_with_apostrophe_in_header() {
        let dir = tempfile::tempdir().unwrap();
        let staging = tempfile::tempdir().unwrap();
        let hosts = dir.path().join("hosts");
        let header = "# Your system has configured 'manage_etc_hosts' as True.\n";
        std::fs::write(&hosts, format!("{header}127.0.0.1 localhost\n")).unwrap();

        let exec = LocalExecutor::new().with_staging_dir(staging.path().display().to_string());
        let path = hosts.display().to_string();
        update_hosts_file(&exec, &path, &[record("10.0.0.9", "apiserver")])
            .await
            .unwrap();

        assert_eq!(
            std::fs::read_to_string(&hosts).unwrap(),
            format!("{header}127.0.0.1 localhost\n10.0.0.9 apiserver\n")
        );
    }

    #[tokio::test]
    async fn test_update_resolver_appends_once() {
        let dir = tempfile::tempdir().unwrap();
        let resolv = dir.path().join("resolv.conf");
        std::fs::write(&resolv, "nameserver 1.1.1.1\n").unwrap();

        let exec = LocalExecutor::new();
        let path = resolv.display().to_string();
        update_resolver(&exec, &path, "10.0.0.53").await.unwrap();
        update_resolver(&exec, &path, "10.0.0.53").await.unwrap();

        assert_eq!(
            std::fs::read_to_string(&resolv).unwrap(),
            "nameserver 1.1.1.1\nnameserver 10.0.0.53\n"
        );
    }

    #[tokio::test]
    async fn test_update_resolver_rejects_bad_ip() {
        let exec = LocalExecutor::new();
        let err = update_resolver(&exec, "/nonexistent", "not-an-ip").await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::Input);
    }
}
