//! Host facts, service control and disk maintenance built on [`RemoteExecutor`]

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::disk::{self, DiskExtend, LogicalVolume};
use crate::elevation::shell_quote;
use crate::error::ExecError;
use crate::traits::RemoteExecutor;

/// Placeholder for absent os-release fields
pub const UNKNOWN: &str = "Unknown";

/// Distribution identity from `/etc/os-release`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OsRelease {
    /// `ID`, e.g. `ubuntu`
    pub id: String,
    /// `VERSION_ID`, e.g. `22.04`
    pub version_id: String,
}

impl OsRelease {
    /// Parse os-release text; missing keys become [`UNKNOWN`]
    pub fn parse(text: &str) -> Self {
        let mut id = None;
        let mut version_id = None;
        for line in text.lines() {
            let Some((key, value)) = line.trim().split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
            match key {
                "ID" => id = Some(value.to_string()),
                "VERSION_ID" => version_id = Some(value.to_string()),
                _ => {}
            }
        }
        Self {
            id: id.unwrap_or_else(|| UNKNOWN.to_string()),
            version_id: version_id.unwrap_or_else(|| UNKNOWN.to_string()),
        }
    }
}

/// Memory figures from `free -m`, in megabytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryInfo {
    pub total_mb: u64,
    /// The `available` column, or `free` on procps builds that lack it
    pub available_mb: u64,
}

impl MemoryInfo {
    /// Parse the `Mem:` row of `free -m`
    pub fn parse(text: &str) -> Option<Self> {
        let row = text.lines().find(|line| line.trim_start().starts_with("Mem:"))?;
        let fields = row
            .split_whitespace()
            .skip(1)
            .map(str::parse::<u64>)
            .collect::<Result<Vec<_>, _>>()
            .ok()?;
        let total_mb = *fields.first()?;
        let available_mb = fields.get(5).or_else(|| fields.get(2)).copied()?;
        Some(Self {
            total_mb,
            available_mb,
        })
    }
}

/// Interface names from `ip -o link show`, without `@parent` suffixes
pub fn parse_interfaces(text: &str) -> Vec<String> {
    text.lines()
        .filter_map(|line| line.split(": ").nth(1))
        .map(|name| name.split('@').next().unwrap_or(name).trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}

/// Snapshot of a host's hardware and distribution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostFacts {
    pub os: OsRelease,
    pub cpu_cores: u32,
    pub memory: MemoryInfo,
    /// Human-readable size of the root filesystem, e.g. `50G`
    pub root_disk: String,
    pub interfaces: Vec<String>,
}

impl fmt::Display for HostFacts {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}, {} cores, {} MB memory ({} MB available), root {}, interfaces {}",
            self.os.id,
            self.os.version_id,
            self.cpu_cores,
            self.memory.total_mb,
            self.memory.available_mb,
            self.root_disk,
            self.interfaces.join(",")
        )
    }
}

fn unparsable(what: &str, text: &str) -> ExecError {
    ExecError::UnexpectedOutput(format!("{what}: {:?}", text.trim()))
}

/// systemd unit operations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SystemctlAction {
    Start,
    Stop,
    Restart,
    Enable,
    Disable,
    Mask,
    Unmask,
    DaemonReload,
}

impl fmt::Display for SystemctlAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SystemctlAction::Start => "start",
            SystemctlAction::Stop => "stop",
            SystemctlAction::Restart => "restart",
            SystemctlAction::Enable => "enable",
            SystemctlAction::Disable => "disable",
            SystemctlAction::Mask => "mask",
            SystemctlAction::Unmask => "unmask",
            SystemctlAction::DaemonReload => "daemon-reload",
        };
        f.write_str(s)
    }
}

/// Build the `systemctl` command line for an action
///
/// # Errors
/// Returns `ExecError::InvalidInput` when a unit is required but missing
pub fn systemctl_command(action: SystemctlAction, unit: Option<&str>) -> Result<String, ExecError> {
    match (action, unit) {
        (SystemctlAction::DaemonReload, _) => Ok("systemctl daemon-reload".to_string()),
        (action, Some(unit)) if !unit.trim().is_empty() => {
            Ok(format!("systemctl {action} {}", shell_quote(unit)))
        }
        (action, _) => Err(ExecError::InvalidInput(format!(
            "systemctl {action} requires a unit name"
        ))),
    }
}

/// Host inspection and maintenance available on every executor
#[async_trait]
pub trait SystemOps {
    /// Distribution id and version
    async fn os_release(&self) -> Result<OsRelease, ExecError>;

    /// Whether a process with exactly this name is running
    async fn process_exists(&self, name: &str) -> Result<bool, ExecError>;

    /// Run a systemd action as root
    async fn systemctl(&self, action: SystemctlAction, unit: Option<&str>) -> Result<(), ExecError>;

    /// Whether a unit is active; any non-zero `is-active` exit means no
    async fn service_active(&self, unit: &str) -> Result<bool, ExecError>;

    /// Number of logical processors
    async fn cpu_cores(&self) -> Result<u32, ExecError>;

    async fn memory(&self) -> Result<MemoryInfo, ExecError>;

    /// Size of the filesystem mounted at `/`
    async fn root_disk_size(&self) -> Result<String, ExecError>;

    async fn network_interfaces(&self) -> Result<Vec<String>, ExecError>;

    /// All of the above in one call
    async fn facts(&self) -> Result<HostFacts, ExecError>;

    /// Change permissions as root; `mode` is passed through to `chmod`
    async fn chmod(&self, path: &str, mode: &str) -> Result<(), ExecError>;

    /// Contents of a remote file
    async fn read_file(&self, path: &str) -> Result<String, ExecError>;

    /// Grow a logical volume onto a new device, see [`DiskExtend`]
    async fn extend_disk(&self, request: &DiskExtend) -> Result<LogicalVolume, ExecError>;
}

async fn checked_stdout<T>(executor: &T, cmd: &str) -> Result<String, ExecError>
where
    T: RemoteExecutor + ?Sized,
{
    Ok(executor.run(cmd).await?.into_checked()?.stdout)
}

#[async_trait]
impl<T> SystemOps for T
where
    T: RemoteExecutor + ?Sized,
{
    async fn os_release(&self) -> Result<OsRelease, ExecError> {
        let text = self.run_buffered("cat /etc/os-release").await?;
        let release = OsRelease::parse(&text);
        debug!(host = %self.target(), id = %release.id, version = %release.version_id, "os release");
        Ok(release)
    }

    async fn process_exists(&self, name: &str) -> Result<bool, ExecError> {
        let result = self.run(&format!("pgrep -x {}", shell_quote(name))).await?;
        match result.status {
            0 => Ok(true),
            1 => Ok(false),
            _ => result.into_checked().map(|_| false),
        }
    }

    async fn systemctl(&self, action: SystemctlAction, unit: Option<&str>) -> Result<(), ExecError> {
        let cmd = systemctl_command(action, unit)?;
        self.run_elevated(&cmd).await?.into_checked().map(|_| ())
    }

    async fn service_active(&self, unit: &str) -> Result<bool, ExecError> {
        if unit.trim().is_empty() {
            return Err(ExecError::InvalidInput("empty unit name".to_string()));
        }
        let result = self
            .run(&format!("systemctl is-active {}", shell_quote(unit)))
            .await?;
        Ok(result.success())
    }

    async fn cpu_cores(&self) -> Result<u32, ExecError> {
        let text = checked_stdout(self, "grep -c ^processor /proc/cpuinfo").await?;
        text.trim().parse().map_err(|_| unparsable("cpuinfo", &text))
    }

    async fn memory(&self) -> Result<MemoryInfo, ExecError> {
        let text = checked_stdout(self, "free -m").await?;
        MemoryInfo::parse(&text).ok_or_else(|| unparsable("free", &text))
    }

    async fn root_disk_size(&self) -> Result<String, ExecError> {
        let text = checked_stdout(self, "df -h / | tail -n 1 | awk '{print $2}'").await?;
        let size = text.trim();
        if size.is_empty() {
            return Err(unparsable("df", &text));
        }
        Ok(size.to_string())
    }

    async fn network_interfaces(&self) -> Result<Vec<String>, ExecError> {
        let text = checked_stdout(self, "ip -o link show").await?;
        Ok(parse_interfaces(&text))
    }

    async fn facts(&self) -> Result<HostFacts, ExecError> {
        let facts = HostFacts {
            os: self.os_release().await?,
            cpu_cores: self.cpu_cores().await?,
            memory: self.memory().await?,
            root_disk: self.root_disk_size().await?,
            interfaces: self.network_interfaces().await?,
        };
        debug!(host = %self.target(), cores = facts.cpu_cores, "host facts");
        Ok(facts)
    }

    async fn chmod(&self, path: &str, mode: &str) -> Result<(), ExecError> {
        if mode.is_empty() || mode.contains(char::is_whitespace) {
            return Err(ExecError::InvalidInput(format!("invalid mode: {mode:?}")));
        }
        let cmd = format!("chmod {} {}", shell_quote(mode), shell_quote(path));
        self.run_elevated(&cmd).await?.into_checked().map(|_| ())
    }

    async fn read_file(&self, path: &str) -> Result<String, ExecError> {
        checked_stdout(self, &format!("cat {}", shell_quote(path))).await
    }

    async fn extend_disk(&self, request: &DiskExtend) -> Result<LogicalVolume, ExecError> {
        disk::extend_disk(self, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local::LocalExecutor;
    use crate::testing::RecordingExecutor;

    const FREE: &str = "               total        used        free      shared  buff/cache   available
Mem:           15885        4210        6020         512        5654       10873
Swap:           2047           0        2047
";

    const IP_LINK: &str = "1: lo: <LOOPBACK,UP,LOWER_UP> mtu 65536 qdisc noqueue state UNKNOWN
2: eth0: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 qdisc fq_codel state UP
3: eth0.100@eth0: <BROADCAST,MULTICAST,UP,LOWER_UP> mtu 1500 qdisc noqueue state UP
";

    #[test]
    fn test_parse_os_release() {
        let text = "NAME=\"Ubuntu\"\nID=ubuntu\nVERSION_ID=\"22.04\"\nID_LIKE=debian\n";
        let release = OsRelease::parse(text);
        assert_eq!(release.id, "ubuntu");
        assert_eq!(release.version_id, "22.04");
    }

    #[test]
    fn test_parse_os_release_missing_fields() {
        let release = OsRelease::parse("NAME=Custom\n");
        assert_eq!(release.id, UNKNOWN);
        assert_eq!(release.version_id, UNKNOWN);
    }

    #[test]
    fn test_systemctl_command() {
        assert_eq!(
            systemctl_command(SystemctlAction::Restart, Some("haproxy")).unwrap(),
            "systemctl restart 'haproxy'"
        );
        assert_eq!(
            systemctl_command(SystemctlAction::DaemonReload, None).unwrap(),
            "systemctl daemon-reload"
        );
        assert!(systemctl_command(SystemctlAction::Enable, None).is_err());
    }

    #[tokio::test]
    async fn test_process_exists_for_missing_process() {
        let exec = LocalExecutor::new();
        if !exec.run("command -v pgrep").await.unwrap().success() {
            return;
        }
        let found = exec.process_exists("hfnoproc").await.unwrap();
        assert!(!found);
    }

    #[test]
    fn test_parse_memory() {
        let memory = MemoryInfo::parse(FREE).unwrap();
        assert_eq!(memory.total_mb, 15885);
        assert_eq!(memory.available_mb, 10873);

        let old = "             total       used       free\nMem:          1024        800        224\n";
        assert_eq!(MemoryInfo::parse(old).unwrap().available_mb, 224);
        assert!(MemoryInfo::parse("Swap: 0 0 0\n").is_none());
    }

    #[test]
    fn test_parse_interfaces() {
        assert_eq!(parse_interfaces(IP_LINK), ["lo", "eth0", "eth0.100"]);
        assert!(parse_interfaces("").is_empty());
    }

    #[tokio::test]
    async fn test_facts_commands() {
        let exec = RecordingExecutor::new()
            .reply("cat /etc/os-release", 0, "ID=rocky\nVERSION_ID=\"9.3\"\n")
            .reply("grep -c", 0, "8\n")
            .reply("free", 0, FREE)
            .reply("df", 0, "50G\n")
            .reply("ip", 0, IP_LINK);

        let facts = exec.facts().await.unwrap();

        assert_eq!(facts.os.id, "rocky");
        assert_eq!(facts.cpu_cores, 8);
        assert_eq!(facts.memory.total_mb, 15885);
        assert_eq!(facts.root_disk, "50G");
        assert_eq!(facts.interfaces.len(), 3);
        assert_eq!(
            facts.to_string(),
            "rocky 9.3, 8 cores, 15885 MB memory (10873 MB available), root 50G, interfaces lo,eth0,eth0.100"
        );
        assert_eq!(
            exec.commands(),
            [
                "cat /etc/os-release",
                "grep -c ^processor /proc/cpuinfo",
                "free -m",
                "df -h / | tail -n 1 | awk '{print $2}'",
                "ip -o link show",
            ]
        );
    }

    #[tokio::test]
    async fn test_garbled_cpu_count_is_an_error() {
        let exec = RecordingExecutor::new().reply("grep", 0, "lots\n");
        let err = exec.cpu_cores().await.unwrap_err();
        assert!(matches!(err, ExecError::UnexpectedOutput(_)));
        assert_eq!(err.kind(), crate::error::ErrorKind::Command);
    }

    #[tokio::test]
    async fn test_service_active() {
        let exec = RecordingExecutor::new()
            .reply("systemctl is-active 'sshd'", 0, "active\n")
            .reply("systemctl is-active", 3, "inactive\n");

        assert!(exec.service_active("sshd").await.unwrap());
        assert!(!exec.service_active("haproxy").await.unwrap());
        assert!(exec.service_active("").await.is_err());
        assert_eq!(
            exec.commands(),
            ["systemctl is-active 'sshd'", "systemctl is-active 'haproxy'"]
        );
    }

    #[tokio::test]
    async fn test_chmod_and_read_file() {
        let exec = RecordingExecutor::new().reply("cat", 0, "secret\n");

        exec.chmod("/etc/kubernetes/admin.conf", "600").await.unwrap();
        assert_eq!(exec.read_file("/etc/hostname").await.unwrap(), "secret\n");
        assert!(exec.chmod("/tmp/x", "6 00").await.is_err());

        assert_eq!(
            exec.commands(),
            ["chmod '600' '/etc/kubernetes/admin.conf'", "cat '/etc/hostname'"]
        );
    }

    #[tokio::test]
    async fn test_read_file_missing_is_command_failure() {
        let exec = LocalExecutor::new();
        let err = exec.read_file("/nonexistent/hf-file").await.unwrap_err();
        assert!(matches!(err, ExecError::CommandFailed { .. }));
    }
}
