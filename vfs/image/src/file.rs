//! Open files and directories inside a parsed image.

use std::collections::VecDeque;
use std::io::{self, SeekFrom};
use std::sync::Arc;

use crate::config::ImageFsConfig;
use crate::device::RawDevice;
use crate::error::parse_result;
use crate::parser::{AttrType, EntryAttribute, EntryIter, EntryMeta, FsEntry, MetaType};
use crate::pathspec::{join_path, PathCase, PathComponent, PathSpec};
use crate::resolver::{BaseHandle, ImageVfs};
use crate::session::FsSession;
use crate::stat::{make_stat, StatEntry};
use crate::{ImageError, ImageErrorKind, ImageResult};

/// A file or directory opened inside a parsed image.
///
/// The parsed filesystem is shared with every other handle on the same
/// device; the read offset belongs to this handle alone. Every call into the
/// parsed entry is made under the session's read guard.
#[derive(Debug)]
pub struct ImageFile {
    session: Arc<FsSession>,
    device: Arc<dyn RawDevice>,
    entry: Arc<dyn FsEntry>,
    meta: Option<EntryMeta>,
    pathspec: PathSpec,
    size: u64,
    offset: u64,
    config: Arc<ImageFsConfig>,
}

impl ImageFile {
    /// Open `component` below `base`.
    ///
    /// A directory of this provider lends its raw device and the component is
    /// folded into its last address component. Any other readable source is
    /// parsed as a raw device and the component is appended.
    pub fn open(vfs: &ImageVfs, base: &BaseHandle, component: PathComponent) -> ImageResult<Self> {
        let (device, mut pathspec) = match base {
            BaseHandle::Image(parent) if parent.is_directory() => {
                let mut component = component;
                component.path = join_path(&parent.last_component().path, &component.path);
                (parent.device.clone(), parent.pathspec.with_last(component))
            }
            BaseHandle::Image(parent) => (
                Arc::new(parent.as_raw_device()) as Arc<dyn RawDevice>,
                parent.pathspec.with_appended(component),
            ),
            BaseHandle::Raw(raw) if !raw.device().is_directory() => {
                (raw.device().clone(), raw.pathspec().with_appended(component))
            }
            BaseHandle::Raw(raw) => {
                tracing::debug!(path = %raw.device().path(), "Refusing to parse a host directory");
                return Err(ImageError::new(
                    ImageErrorKind::InvalidBase,
                    "image.open.base_directory",
                ));
            }
        };

        let session = vfs.session_for(device.clone())?;
        let last = pathspec
            .last_mut()
            .ok_or_else(|| ImageError::new(ImageErrorKind::InvalidInput, "image.open.pathspec"))?;

        let (entry, meta, size) = {
            let _guard = session.read_guard();
            let entry = match last.inode {
                Some(inode) => parse_result("image.open.inode", session.fs().open_meta(inode))?,
                None => parse_result("image.open.path", session.fs().open(&last.path))?,
            };
            let meta = entry.meta();
            let stream_size = match (last.ntfs_type, last.ntfs_id) {
                (Some(attr_type), Some(attr_id)) => {
                    find_attribute(entry.as_ref(), attr_type, attr_id)?.map(|attr| attr.size)
                }
                _ => None,
            };
            let size = stream_size.unwrap_or_else(|| meta_size(meta.as_ref()));
            (entry, meta, size)
        };
        if last.inode.is_none() {
            last.inode = meta.as_ref().map(|meta| meta.addr);
        }
        // The parser found the entry, so the path casing is now exact.
        last.path_options = PathCase::Literal;

        tracing::trace!(
            device = %session.device_id(),
            path = %last.path,
            inode = ?last.inode,
            size,
            "Opened image entry"
        );

        Ok(Self {
            session,
            device,
            entry,
            meta,
            pathspec,
            size,
            offset: 0,
            config: vfs.config().clone(),
        })
    }

    pub fn pathspec(&self) -> &PathSpec {
        &self.pathspec
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn tell(&self) -> u64 {
        self.offset
    }

    pub fn session(&self) -> &Arc<FsSession> {
        &self.session
    }

    pub fn entry(&self) -> &Arc<dyn FsEntry> {
        &self.entry
    }

    pub fn is_directory(&self) -> bool {
        self.meta_type() == Some(MetaType::Dir)
    }

    pub fn is_file(&self) -> bool {
        self.meta_type() == Some(MetaType::Reg)
    }

    /// Type recorded when the handle was opened.
    fn meta_type(&self) -> Option<MetaType> {
        self.meta.as_ref().map(|meta| meta.meta_type)
    }

    fn last_component(&self) -> &PathComponent {
        // Every handle is built from a spec ending in its own component.
        &self.pathspec.components()[self.pathspec.len() - 1]
    }

    fn selected_stream(&self) -> (Option<AttrType>, Option<u32>) {
        let last = self.last_component();
        (last.ntfs_type, last.ntfs_id)
    }

    /// The stream this handle reads, when one was selected by type and id.
    pub fn attribute(&self) -> ImageResult<Option<EntryAttribute>> {
        let _guard = self.session.read_guard();
        self.selected_attribute()
    }

    // Caller holds the read guard.
    fn selected_attribute(&self) -> ImageResult<Option<EntryAttribute>> {
        match self.selected_stream() {
            (Some(attr_type), Some(attr_id)) => {
                find_attribute(self.entry.as_ref(), attr_type, attr_id)
            }
            _ => Ok(None),
        }
    }

    /// Read up to `length` bytes from the current offset.
    ///
    /// Reading at or past the end returns an empty buffer.
    pub fn read_bytes(&mut self, length: usize) -> ImageResult<Vec<u8>> {
        if !self.is_file() {
            return Err(ImageError::new(ImageErrorKind::NotAFile, "image.read"));
        }

        let available = self.size.saturating_sub(self.offset).min(length as u64);
        if available == 0 {
            return Ok(Vec::new());
        }

        let (attr_type, attr_id) = self.selected_stream();
        let mut data = {
            let _guard = self.session.read_guard();
            self.entry
                .read_random(self.offset, available as usize, attr_type, attr_id)
        }
        .map_err(|err| ImageError::with_source(ImageErrorKind::Io, "image.read", err))?;
        data.truncate(available as usize);

        self.offset += data.len() as u64;
        Ok(data)
    }

    pub fn seek(&mut self, pos: SeekFrom) -> ImageResult<u64> {
        let next = match pos {
            SeekFrom::Start(offset) => Some(offset),
            SeekFrom::Current(delta) => self.offset.checked_add_signed(delta),
            SeekFrom::End(delta) => self.size.checked_add_signed(delta),
        };
        let next =
            next.ok_or_else(|| ImageError::new(ImageErrorKind::InvalidInput, "image.seek"))?;
        self.offset = next;
        Ok(next)
    }

    /// Stat record of this entry, or of the selected stream.
    pub fn stat(&self) -> ImageResult<StatEntry> {
        let _guard = self.session.read_guard();
        let attribute = self.selected_attribute()?;
        make_stat(&self.pathspec, self.entry.as_ref(), attribute.as_ref(), None)
    }

    fn children(&self, context: &'static str) -> ImageResult<EntryIter> {
        if !self.is_directory() {
            return Err(ImageError::new(ImageErrorKind::NotADirectory, context));
        }
        let _guard = self.session.read_guard();
        parse_result(context, self.entry.children())
    }

    /// Names of every child entry, unfiltered.
    pub fn list_names(&self) -> ImageResult<ListNames> {
        Ok(ListNames {
            session: self.session.clone(),
            children: self.children("image.list_names")?,
        })
    }

    /// Stat records for the directory's children and their named data
    /// streams.
    pub fn list_files(&self) -> ImageResult<ListFiles> {
        Ok(ListFiles {
            session: self.session.clone(),
            children: self.children("image.list_files")?,
            base: self.pathspec.clone(),
            config: self.config.clone(),
            pending: VecDeque::new(),
        })
    }

    /// Expose this file as a raw device so an image stored inside an image
    /// can be parsed in turn.
    pub fn as_raw_device(&self) -> ImageFileDevice {
        let inode = self.last_component().inode.unwrap_or_default();
        let (attr_type, attr_id) = self.selected_stream();
        ImageFileDevice {
            path: format!("{}#{}", self.session.device_id(), inode),
            session: self.session.clone(),
            entry: self.entry.clone(),
            size: self.size,
            attr_type,
            attr_id,
        }
    }
}

impl io::Read for ImageFile {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let data = self.read_bytes(buf.len())?;
        let n = data.len().min(buf.len());
        buf[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }
}

impl io::Seek for ImageFile {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        Ok(ImageFile::seek(self, pos)?)
    }
}

/// First attribute of `entry` matching both type and id.
pub fn find_attribute(
    entry: &dyn FsEntry,
    attr_type: AttrType,
    attr_id: u32,
) -> ImageResult<Option<EntryAttribute>> {
    let attributes = parse_result("image.attribute", entry.attributes())?;
    Ok(attributes
        .into_iter()
        .find(|attr| attr.attr_type == attr_type && attr.id == attr_id))
}

fn meta_size(meta: Option<&EntryMeta>) -> u64 {
    meta.and_then(|meta| meta.size)
        .map(|size| size.max(0) as u64)
        .unwrap_or(0)
}

/// Lazy listing of child names, see [`ImageFile::list_names`].
pub struct ListNames {
    session: Arc<FsSession>,
    children: EntryIter,
}

impl Iterator for ListNames {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        loop {
            let named = {
                let _guard = self.session.read_guard();
                self.children.next()?.and_then(|child| child.name())
            };
            match named {
                Ok(name) => return Some(name.name),
                Err(err) => tracing::debug!(error = %err, "Skipping unnamed directory entry"),
            }
        }
    }
}

/// Lazy, one-shot directory listing, see [`ImageFile::list_files`].
pub struct ListFiles {
    session: Arc<FsSession>,
    children: EntryIter,
    base: PathSpec,
    config: Arc<ImageFsConfig>,
    pending: VecDeque<StatEntry>,
}

impl ListFiles {
    // Caller holds the read guard.
    fn stat_child(&mut self, child: &dyn FsEntry) -> ImageResult<Option<StatEntry>> {
        let name = parse_result("image.list_files.name", child.name())?.name;
        if name == "." || name == ".." || self.config.is_hidden(&name) {
            return Ok(None);
        }

        let primary = make_stat(&self.base, child, None, Some(&name))?;

        match child.attributes() {
            Ok(attributes) => {
                for attribute in attributes
                    .iter()
                    .filter(|attr| attr.is_data_stream() && attr.named().is_some())
                {
                    self.pending
                        .push_back(make_stat(&self.base, child, Some(attribute), Some(&name))?);
                }
            }
            Err(err) => {
                tracing::debug!(error = %err, name = %name, "Unable to list streams of entry")
            }
        }
        Ok(Some(primary))
    }
}

impl Iterator for ListFiles {
    type Item = StatEntry;

    fn next(&mut self) -> Option<StatEntry> {
        if let Some(stat) = self.pending.pop_front() {
            return Some(stat);
        }
        let session = self.session.clone();
        loop {
            let _guard = session.read_guard();
            let child = match self.children.next()? {
                Ok(child) => child,
                Err(err) => {
                    tracing::debug!(error = %err, "Skipping unreadable directory entry");
                    continue;
                }
            };
            match self.stat_child(child.as_ref()) {
                Ok(Some(stat)) => return Some(stat),
                Ok(None) => {}
                Err(err) => {
                    self.pending.clear();
                    tracing::debug!(error = %err, "Skipping directory entry with incomplete metadata");
                }
            }
        }
    }
}

/// A regular file inside an image, read as a raw device.
#[derive(Debug)]
pub struct ImageFileDevice {
    path: String,
    session: Arc<FsSession>,
    entry: Arc<dyn FsEntry>,
    size: u64,
    attr_type: Option<AttrType>,
    attr_id: Option<u32>,
}

impl RawDevice for ImageFileDevice {
    fn path(&self) -> &str {
        &self.path
    }

    fn is_directory(&self) -> bool {
        false
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> ImageResult<usize> {
        let available = self.size.saturating_sub(offset).min(buf.len() as u64) as usize;
        if available == 0 {
            return Ok(0);
        }
        let data = {
            let _guard = self.session.read_guard();
            self.entry
                .read_random(offset, available, self.attr_type, self.attr_id)
        }
        .map_err(|err| ImageError::with_source(ImageErrorKind::Io, "image.device.read_at", err))?;
        let n = data.len().min(available);
        buf[..n].copy_from_slice(&data[..n]);
        Ok(n)
    }
}
