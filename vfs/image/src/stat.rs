//! Translation of parser metadata into normalised stat records.

use serde::{Deserialize, Serialize};

use crate::parser::{EntryAttribute, EntryMeta, FsEntry, MetaType, NameType};
use crate::pathspec::{join_path, PathCase, PathSpec};
use crate::{ImageError, ImageErrorKind, ImageResult};

pub const S_IFMT: u64 = 0o170000;
pub const S_IFIFO: u64 = 0o010000;
pub const S_IFCHR: u64 = 0o020000;
pub const S_IFDIR: u64 = 0o040000;
pub const S_IFBLK: u64 = 0o060000;
pub const S_IFREG: u64 = 0o100000;
pub const S_IFLNK: u64 = 0o120000;
pub const S_IFSOCK: u64 = 0o140000;

/// Normalised metadata for one entry or stream, plus the address that
/// re-opens it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatEntry {
    pub st_ino: u64,
    pub st_mode: u64,
    pub st_nlink: u64,
    pub st_uid: u64,
    pub st_gid: u64,
    pub st_size: u64,
    pub st_atime: u64,
    pub st_mtime: u64,
    pub st_ctime: u64,
    pub pathspec: PathSpec,
}

impl StatEntry {
    pub fn file_type_bits(&self) -> u64 {
        self.st_mode & S_IFMT
    }
}

/// Mode bits for a directory-entry name type.
pub fn name_type_mode(name_type: NameType) -> u64 {
    match name_type {
        NameType::Fifo => S_IFIFO,
        NameType::Chr => S_IFCHR,
        NameType::Dir => S_IFDIR,
        NameType::Blk => S_IFBLK,
        NameType::Reg => S_IFREG,
        NameType::Lnk => S_IFLNK,
        NameType::Sock => S_IFSOCK,
        NameType::Undef | NameType::Shad | NameType::Wht | NameType::Virt => 0,
    }
}

/// Mode bits for an inode metadata type. Block devices contribute nothing
/// here; their type comes from the name record.
pub fn meta_type_mode(meta_type: MetaType) -> u64 {
    match meta_type {
        MetaType::Chr => S_IFCHR,
        MetaType::Dir => S_IFDIR,
        MetaType::Fifo => S_IFIFO,
        MetaType::Lnk => S_IFLNK,
        MetaType::Reg => S_IFREG,
        MetaType::Sock => S_IFSOCK,
        MetaType::Blk | MetaType::Undef | MetaType::Shad | MetaType::Wht | MetaType::Virt => 0,
    }
}

/// Raw values are signed in some filesystems; negatives keep their low
/// 32 bits.
fn unsigned(value: i64) -> u64 {
    if value < 0 {
        (value as u64) & 0xFFFF_FFFF
    } else {
        value as u64
    }
}

fn copy_meta(meta: &EntryMeta, stat: &mut StatEntry) {
    stat.st_ino = meta.addr;
    let fields = [
        (meta.mode, &mut stat.st_mode),
        (meta.nlink, &mut stat.st_nlink),
        (meta.uid, &mut stat.st_uid),
        (meta.gid, &mut stat.st_gid),
        (meta.size, &mut stat.st_size),
        (meta.atime, &mut stat.st_atime),
        (meta.mtime, &mut stat.st_mtime),
        (meta.ctime, &mut stat.st_ctime),
    ];
    for (value, slot) in fields {
        if let Some(value) = value {
            *slot = unsigned(value);
        }
    }
}

/// Build the stat record of `entry` as reached through `base`.
///
/// `append_name` is joined onto the last component's path and is only used
/// for directory listings. When `attribute` is given the record describes
/// that stream: its size, and an address selecting it by type and id with a
/// `:<name>` suffix for named streams.
pub fn make_stat(
    base: &PathSpec,
    entry: &dyn FsEntry,
    attribute: Option<&EntryAttribute>,
    append_name: Option<&str>,
) -> ImageResult<StatEntry> {
    let meta = entry
        .meta()
        .ok_or_else(|| ImageError::new(ImageErrorKind::InvalidData, "image.stat.meta"))?;

    let mut stat = StatEntry::default();
    copy_meta(&meta, &mut stat);

    let mut child = base.clone();
    let last = child
        .last_mut()
        .ok_or_else(|| ImageError::new(ImageErrorKind::InvalidInput, "image.stat.pathspec"))?;
    if let Some(name) = append_name {
        last.path = join_path(&last.path, name);
        last.path_options = PathCase::Literal;
    }
    last.inode = Some(meta.addr);
    if let Some(attribute) = attribute {
        last.ntfs_type = Some(attribute.attr_type);
        last.ntfs_id = Some(attribute.id);
        if let Some(name) = attribute.named() {
            let suffix = format!(":{name}");
            if !last.path.ends_with(&suffix) {
                last.path.push_str(&suffix);
            }
        }
        stat.st_size = attribute.size;
    }

    match entry.name() {
        Ok(name) => stat.st_mode |= name_type_mode(name.name_type),
        Err(err) => tracing::trace!(error = %err, inode = meta.addr, "Entry has no name record"),
    }
    // Both type sources are merged as-is, even when they disagree.
    stat.st_mode |= meta_type_mode(meta.meta_type);

    stat.pathspec = child;
    Ok(stat)
}
