//! Raw devices and the collaborators that locate them.

use std::fmt;
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::io_result;
use crate::pathspec::{normalize_path, PathComponent};
use crate::{ImageError, ImageErrorKind, ImageResult};

/// A byte-addressable source beneath a parsed filesystem.
pub trait RawDevice: fmt::Debug + Send + Sync + 'static {
    fn path(&self) -> &str;

    /// Offset of the filesystem inside the device, for partitions.
    fn image_offset(&self) -> Option<u64> {
        None
    }

    fn is_directory(&self) -> bool;

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> ImageResult<usize>;
}

/// Cache key for a parsed filesystem: device path plus partition offset.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(path: &str, offset: Option<u64>) -> Self {
        match offset {
            Some(offset) => Self(format!("{path}:{offset}")),
            None => Self(path.to_string()),
        }
    }

    pub fn of(device: &dyn RawDevice) -> Self {
        Self::new(device.path(), device.image_offset())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Opens the host component of an address as a raw device.
pub trait DeviceOpener: Send + Sync + 'static {
    fn open(&self, component: &PathComponent) -> ImageResult<Arc<dyn RawDevice>>;
}

/// Maps host paths onto the raw device holding them.
pub trait LocalDeviceResolver: Send + Sync + 'static {
    /// Find the device a host path lives on. Returns the component that
    /// addresses the raw device and the path remaining below its mount point.
    fn raw_device(&self, path: &str) -> ImageResult<(PathComponent, String)>;

    /// Rewrite a host path into the `/`-separated form used inside images.
    fn canonical_path(&self, path: &str) -> String {
        normalize_path(&path.replace('\\', "/"))
    }
}

#[derive(Debug)]
enum HostDeviceKind {
    File(File),
    Directory,
}

/// A raw device backed by a host file, block device or directory.
#[derive(Debug)]
pub struct HostDevice {
    path: String,
    offset: Option<u64>,
    kind: HostDeviceKind,
}

impl HostDevice {
    pub fn open(path: impl Into<PathBuf>, offset: Option<u64>) -> ImageResult<Self> {
        let path = path.into();
        let meta = io_result("host.device.stat", std::fs::metadata(&path))?;
        let kind = if meta.is_dir() {
            HostDeviceKind::Directory
        } else {
            HostDeviceKind::File(io_result("host.device.open", File::open(&path))?)
        };
        Ok(Self {
            path: path.to_string_lossy().into_owned(),
            offset,
            kind,
        })
    }
}

impl RawDevice for HostDevice {
    fn path(&self) -> &str {
        &self.path
    }

    fn image_offset(&self) -> Option<u64> {
        self.offset
    }

    fn is_directory(&self) -> bool {
        matches!(self.kind, HostDeviceKind::Directory)
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> ImageResult<usize> {
        let HostDeviceKind::File(file) = &self.kind else {
            return Err(ImageError::new(
                ImageErrorKind::NotAFile,
                "host.device.read_at",
            ));
        };
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileExt;
            io_result("host.device.read_at", file.read_at(buf, offset))
        }
        #[cfg(windows)]
        {
            use std::os::windows::fs::FileExt;
            io_result("host.device.read_at", file.seek_read(buf, offset))
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct HostDeviceOpener;

impl DeviceOpener for HostDeviceOpener {
    fn open(&self, component: &PathComponent) -> ImageResult<Arc<dyn RawDevice>> {
        let device = HostDevice::open(&component.path, component.offset)?;
        tracing::trace!(path = %component.path, offset = ?component.offset, "Opened raw device");
        Ok(Arc::new(device))
    }
}

#[derive(Clone, Debug)]
pub struct MountPoint {
    pub mount_point: String,
    pub device: PathComponent,
}

/// Resolves host paths against an explicit mount table.
#[derive(Clone, Debug, Default)]
pub struct StaticMountResolver {
    mounts: Vec<MountPoint>,
}

impl StaticMountResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_mount(mut self, mount_point: &str, device: PathComponent) -> Self {
        self.mounts.push(MountPoint {
            mount_point: normalize_path(mount_point),
            device,
        });
        self
    }
}

impl LocalDeviceResolver for StaticMountResolver {
    fn raw_device(&self, path: &str) -> ImageResult<(PathComponent, String)> {
        let path = self.canonical_path(path);
        let best = self
            .mounts
            .iter()
            .filter(|mount| {
                mount.mount_point == "/"
                    || path == mount.mount_point
                    || path
                        .strip_prefix(mount.mount_point.as_str())
                        .is_some_and(|rest| rest.starts_with('/'))
            })
            .max_by_key(|mount| mount.mount_point.len())
            .ok_or_else(|| ImageError::new(ImageErrorKind::NotFound, "image.mounts.lookup"))?;

        let remainder = if best.mount_point == "/" {
            path.clone()
        } else {
            normalize_path(&path[best.mount_point.len()..])
        };
        Ok((best.device.clone(), remainder))
    }
}
