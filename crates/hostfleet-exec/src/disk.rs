//! LVM-backed disk extension
//!
//! Adds a blank block device to the volume group holding a logical volume,
//! grows the volume and then its filesystem. Every step runs as root.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::elevation::shell_quote;
use crate::error::ExecError;
use crate::traits::RemoteExecutor;

/// Logical volume extended unless configured otherwise
pub const DEFAULT_LV_NAME: &str = "root";

/// Filesystem on the logical volume
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Filesystem {
    /// Grown with `xfs_growfs`
    #[default]
    Xfs,
    /// Grown with `resize2fs`
    Ext4,
}

impl Filesystem {
    fn grow_command(self, device: &str) -> String {
        match self {
            Filesystem::Xfs => format!("xfs_growfs {}", shell_quote(device)),
            Filesystem::Ext4 => format!("resize2fs {}", shell_quote(device)),
        }
    }
}

impl fmt::Display for Filesystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filesystem::Xfs => f.write_str("xfs"),
            Filesystem::Ext4 => f.write_str("ext4"),
        }
    }
}

/// A logical volume and its volume group
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogicalVolume {
    pub lv_name: String,
    pub vg_name: String,
}

impl LogicalVolume {
    /// Device-mapper path; hyphens inside names are doubled by LVM
    pub fn mapper_path(&self) -> String {
        format!(
            "/dev/mapper/{}-{}",
            self.vg_name.replace('-', "--"),
            self.lv_name.replace('-', "--")
        )
    }
}

/// Find `lv_name` in `lvs --noheadings -o lv_name,vg_name` output
pub fn parse_lvs(text: &str, lv_name: &str) -> Option<LogicalVolume> {
    text.lines().find_map(|line| {
        let mut fields = line.split_whitespace();
        match (fields.next(), fields.next()) {
            (Some(lv), Some(vg)) if lv == lv_name => Some(LogicalVolume {
                lv_name: lv.to_string(),
                vg_name: vg.to_string(),
            }),
            _ => None,
        }
    })
}

/// Request to grow a logical volume onto a new device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiskExtend {
    /// Blank block device, e.g. `/dev/sdb`
    pub device: String,
    /// Logical volume to grow
    #[serde(default = "default_lv_name")]
    pub lv_name: String,
    #[serde(default)]
    pub filesystem: Filesystem,
    /// Amount to add (`10G`); all free extents when absent
    #[serde(default)]
    pub size: Option<String>,
}

fn default_lv_name() -> String {
    DEFAULT_LV_NAME.to_string()
}

impl DiskExtend {
    /// Grow the `root` volume by the whole of `device` and its xfs filesystem
    pub fn new(device: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            lv_name: default_lv_name(),
            filesystem: Filesystem::default(),
            size: None,
        }
    }

    #[must_use]
    pub fn with_lv_name(mut self, lv_name: impl Into<String>) -> Self {
        self.lv_name = lv_name.into();
        self
    }

    #[must_use]
    pub fn with_filesystem(mut self, filesystem: Filesystem) -> Self {
        self.filesystem = filesystem;
        self
    }

    #[must_use]
    pub fn with_size(mut self, size: impl Into<String>) -> Self {
        self.size = Some(size.into());
        self
    }

    /// Check the request before touching the host
    ///
    /// # Errors
    /// Returns `ExecError::InvalidInput` for a device outside `/dev`, an empty
    /// volume name or a malformed size
    pub fn validate(&self) -> Result<(), ExecError> {
        let device_ok = self.device.len() > "/dev/".len()
            && self.device.starts_with("/dev/")
            && !self.device.contains(char::is_whitespace);
        if !device_ok {
            return Err(ExecError::InvalidInput(format!(
                "invalid block device: {:?}",
                self.device
            )));
        }
        if self.lv_name.trim().is_empty() {
            return Err(ExecError::InvalidInput("empty logical volume name".to_string()));
        }
        if let Some(size) = &self.size
            && !valid_size(size)
        {
            return Err(ExecError::InvalidInput(format!("invalid size: {size:?}")));
        }
        Ok(())
    }

    fn lvextend_command(&self, volume: &LogicalVolume) -> String {
        let path = shell_quote(&volume.mapper_path());
        match &self.size {
            Some(size) => format!("lvextend -L {} {path}", shell_quote(&format!("+{size}"))),
            None => format!("lvextend -l +100%FREE {path}"),
        }
    }
}

/// `10G`, `512M`, `1.5T` or a bare number of megabytes
fn valid_size(size: &str) -> bool {
    let number = size.trim_end_matches(['K', 'M', 'G', 'T', 'P', 'k', 'm', 'g', 't', 'p']);
    if number.len() + 1 < size.len() {
        return false;
    }
    let mut parts = number.splitn(2, '.');
    let whole = parts.next().unwrap_or_default();
    let frac = parts.next();
    !whole.is_empty()
        && whole.chars().all(|c| c.is_ascii_digit())
        && frac.is_none_or(|f| !f.is_empty() && f.chars().all(|c| c.is_ascii_digit()))
}

async fn run_root<E>(executor: &E, cmd: &str) -> Result<String, ExecError>
where
    E: RemoteExecutor + ?Sized,
{
    Ok(executor.run_elevated(cmd).await?.into_checked()?.stdout)
}

/// Run the extension sequence: find the volume, `pvcreate`, `vgextend`,
/// `lvextend`, then grow the filesystem
#[instrument(skip(executor, request), fields(host = %executor.target(), device = %request.device))]
pub(crate) async fn extend_disk<E>(executor: &E, request: &DiskExtend) -> Result<LogicalVolume, ExecError>
where
    E: RemoteExecutor + ?Sized,
{
    request.validate()?;

    let listing = run_root(executor, "lvs --noheadings -o lv_name,vg_name").await?;
    let volume = parse_lvs(&listing, &request.lv_name).ok_or_else(|| {
        ExecError::InvalidInput(format!("no logical volume named {}", request.lv_name))
    })?;

    let device = shell_quote(&request.device);
    run_root(executor, &format!("pvcreate {device}")).await?;
    run_root(
        executor,
        &format!("vgextend {} {device}", shell_quote(&volume.vg_name)),
    )
    .await?;
    run_root(executor, &request.lvextend_command(&volume)).await?;
    run_root(executor, &request.filesystem.grow_command(&volume.mapper_path())).await?;

    info!(
        volume = %volume.mapper_path(),
        filesystem = %request.filesystem,
        "logical volume extended"
    );
    Ok(volume)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::RecordingExecutor;

    const LVS: &str = "  root centos -wi-ao----\n  swap centos -wi-ao----\n";

    #[test]
    fn test_parse_lvs() {
        let volume = parse_lvs(LVS, "root").unwrap();
        assert_eq!(volume.vg_name, "centos");
        assert_eq!(volume.mapper_path(), "/dev/mapper/centos-root");
        assert!(parse_lvs(LVS, "home").is_none());
        assert!(parse_lvs("", "root").is_none());
    }

    #[test]
    fn test_mapper_path_doubles_hyphens() {
        let volume = LogicalVolume {
            lv_name: "root".to_string(),
            vg_name: "ubuntu-vg".to_string(),
        };
        assert_eq!(volume.mapper_path(), "/dev/mapper/ubuntu--vg-root");
    }

    #[test]
    fn test_validate() {
        assert!(DiskExtend::new("/dev/sdb").validate().is_ok());
        assert!(DiskExtend::new("/dev/sdb").with_size("10G").validate().is_ok());
        assert!(DiskExtend::new("/dev/sdb").with_size("1.5T").validate().is_ok());
        assert!(DiskExtend::new("/dev/sdb").with_size("10GB").validate().is_err());
        assert!(DiskExtend::new("/dev/sdb").with_size("-1G").validate().is_err());
        assert!(DiskExtend::new("sdb").validate().is_err());
        assert!(DiskExtend::new("/dev/sdb; reboot").validate().is_err());
        assert!(DiskExtend::new("/dev/sdb").with_lv_name(" ").validate().is_err());
    }

    #[tokio::test]
    async fn test_extend_runs_full_sequence() {
        let exec = RecordingExecutor::new().reply("lvs", 0, LVS);

        let volume = extend_disk(&exec, &DiskExtend::new("/dev/sdb")).await.unwrap();

        assert_eq!(volume.vg_name, "centos");
        assert_eq!(
            exec.commands(),
            [
                "lvs --noheadings -o lv_name,vg_name",
                "pvcreate '/dev/sdb'",
                "vgextend 'centos' '/dev/sdb'",
                "lvextend -l +100%FREE '/dev/mapper/centos-root'",
                "xfs_growfs '/dev/mapper/centos-root'",
            ]
        );
    }

    #[tokio::test]
    async fn test_extend_fixed_size_ext4() {
        let exec = RecordingExecutor::new().reply("lvs", 0, "  data vg-data\n");
        let request = DiskExtend::new("/dev/vdc")
            .with_lv_name("data")
            .with_size("20G")
            .with_filesystem(Filesystem::Ext4);

        extend_disk(&exec, &request).await.unwrap();

        let commands = exec.commands();
        assert_eq!(commands[3], "lvextend -L '+20G' '/dev/mapper/vg--data-data'");
        assert_eq!(commands[4], "resize2fs '/dev/mapper/vg--data-data'");
    }

    #[tokio::test]
    async fn test_extend_stops_at_first_failure() {
        let exec = RecordingExecutor::new()
            .reply("lvs", 0, LVS)
            .reply("pvcreate", 5, "");

        let err = extend_disk(&exec, &DiskExtend::new("/dev/sdb")).await.unwrap_err();

        assert!(matches!(err, ExecError::CommandFailed { status: 5, .. }));
        assert_eq!(exec.commands().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_volume_runs_nothing_else() {
        let exec = RecordingExecutor::new().reply("lvs", 0, "  swap centos\n");

        let err = extend_disk(&exec, &DiskExtend::new("/dev/sdb")).await.unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Input);
        assert_eq!(exec.commands().len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_request_runs_nothing() {
        let exec = RecordingExecutor::new();
        assert!(extend_disk(&exec, &DiskExtend::new("/tmp/disk.img")).await.is_err());
        assert!(exec.commands().is_empty());
    }
}
