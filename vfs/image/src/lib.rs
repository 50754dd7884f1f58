//! Read-only access to filesystems embedded in raw disk and partition images.
//!
//! A raw device is parsed once by an [`FsParser`] and the result is shared
//! through a time-bounded [`DeviceCache`]. Files, directories and alternate
//! data streams inside it are opened by [`ImageVfs`] from a [`PathSpec`].

mod cache;
mod config;
mod device;
mod error;
mod file;
mod parser;
mod pathspec;
mod resolver;
mod session;
mod source;
mod stat;

pub use cache::DeviceCache;
pub use config::{
    ImageFsConfig, DEFAULT_CACHE_TTL, DEFAULT_HIDDEN_ENTRIES, DEFAULT_REPORTED_DEVICE_SIZE,
};
pub use device::{
    DeviceId, DeviceOpener, HostDevice, HostDeviceOpener, LocalDeviceResolver, MountPoint,
    RawDevice, StaticMountResolver,
};
pub use error::{ImageError, ImageErrorKind, ImageResult};
pub use file::{find_attribute, ImageFile, ImageFileDevice, ListFiles, ListNames};
pub use parser::{
    AttrType, EntryAttribute, EntryIter, EntryMeta, EntryName, FsEntry, FsParser, MetaType,
    NameType, ParseError, ParseResult, ParsedFs,
};
pub use pathspec::{
    join_path, normalize_path, path_segments, PathCase, PathComponent, PathSpec, PathType,
};
pub use resolver::{BaseHandle, ImageVfs, ImageVfsBuilder, RawHandle, Resolution};
pub use session::FsSession;
pub use source::{DeviceImage, ImageSource};
pub use stat::{
    make_stat, meta_type_mode, name_type_mode, StatEntry, S_IFBLK, S_IFCHR, S_IFDIR, S_IFIFO,
    S_IFLNK, S_IFMT, S_IFREG, S_IFSOCK,
};
