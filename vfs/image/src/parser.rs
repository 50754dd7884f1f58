//! Interface to the filesystem structure parser.
//!
//! The provider never decodes on-disk structures itself. A [`FsParser`] is
//! handed an [`ImageSource`] and a byte offset and returns a [`ParsedFs`]
//! from which entries are looked up by path or by inode.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::source::ImageSource;

pub type ParseResult<T> = Result<T, ParseError>;

/// Lazily produced directory children.
pub type EntryIter = Box<dyn Iterator<Item = ParseResult<Arc<dyn FsEntry>>> + Send>;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("entry not found: {0}")]
    NotFound(String),
    /// The entry lacks a structure the caller asked for (name or meta block).
    #[error("entry is missing {0}")]
    MissingField(&'static str),
    #[error("unsupported filesystem: {0}")]
    Unsupported(String),
    /// A low-level fault while decoding or reading runs of the image.
    #[error("parser fault: {0}")]
    Fault(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Builds a parsed filesystem from an image.
pub trait FsParser: Send + Sync + 'static {
    fn parse(&self, image: Arc<dyn ImageSource>, offset: u64) -> ParseResult<Arc<dyn ParsedFs>>;
}

/// A parsed filesystem. Never mutated once built.
pub trait ParsedFs: Send + Sync + 'static {
    fn open(&self, path: &str) -> ParseResult<Arc<dyn FsEntry>>;

    fn open_meta(&self, inode: u64) -> ParseResult<Arc<dyn FsEntry>>;

    /// Whether entries of this filesystem may be read from several threads
    /// at once. Sessions serialise reads when this returns `false`.
    fn supports_concurrent_reads(&self) -> bool {
        true
    }
}

/// A file or directory record of a parsed filesystem.
pub trait FsEntry: fmt::Debug + Send + Sync + 'static {
    fn name(&self) -> ParseResult<EntryName>;

    fn meta(&self) -> Option<EntryMeta>;

    fn attributes(&self) -> ParseResult<Vec<EntryAttribute>>;

    /// Read `len` bytes at `offset` from the selected attribute, or from the
    /// default data stream when no attribute is selected.
    fn read_random(
        &self,
        offset: u64,
        len: usize,
        attr_type: Option<AttrType>,
        attr_id: Option<u32>,
    ) -> ParseResult<Vec<u8>>;

    fn children(&self) -> ParseResult<EntryIter>;
}

/// Directory-entry name record.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryName {
    pub name: String,
    pub name_type: NameType,
}

/// Inode metadata block.
///
/// Scalar fields are optional: a filesystem that cannot produce one leaves it
/// unset. Values are raw and may be negative.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EntryMeta {
    pub addr: u64,
    pub meta_type: MetaType,
    pub mode: Option<i64>,
    pub nlink: Option<i64>,
    pub uid: Option<i64>,
    pub gid: Option<i64>,
    pub size: Option<i64>,
    pub atime: Option<i64>,
    pub mtime: Option<i64>,
    pub ctime: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntryAttribute {
    pub attr_type: AttrType,
    pub id: u32,
    pub name: Option<String>,
    pub size: u64,
}

impl EntryAttribute {
    /// Whether this attribute carries file content rather than filesystem
    /// bookkeeping.
    pub fn is_data_stream(&self) -> bool {
        self.attr_type == AttrType::DEFAULT || self.attr_type == AttrType::NTFS_DATA
    }

    pub fn named(&self) -> Option<&str> {
        self.name.as_deref().filter(|name| !name.is_empty())
    }
}

/// Numeric attribute type as reported by the parser.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
#[repr(transparent)]
pub struct AttrType(pub u32);

impl AttrType {
    pub const DEFAULT: AttrType = AttrType(0x01);
    pub const NTFS_STANDARD_INFORMATION: AttrType = AttrType(0x10);
    pub const NTFS_FILE_NAME: AttrType = AttrType(0x30);
    pub const NTFS_DATA: AttrType = AttrType(0x80);
    pub const NTFS_INDEX_ROOT: AttrType = AttrType(0x90);
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum NameType {
    #[default]
    Undef,
    Fifo,
    Chr,
    Dir,
    Blk,
    Reg,
    Lnk,
    Sock,
    Shad,
    Wht,
    Virt,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum MetaType {
    #[default]
    Undef,
    Reg,
    Dir,
    Fifo,
    Chr,
    Blk,
    Lnk,
    Shad,
    Sock,
    Wht,
    Virt,
}
