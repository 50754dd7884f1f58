#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use vfs_image::{
    path_segments, AttrType, DeviceOpener, EntryAttribute, EntryIter, EntryMeta, EntryName,
    FsEntry, FsParser, ImageError, ImageErrorKind, ImageFsConfig, ImageResult, ImageSource,
    ImageVfs, MetaType, NameType, ParseError, ParseResult, ParsedFs, PathComponent, PathSpec,
    RawDevice,
};

/// Boot-sector signature the fixture parser looks for.
pub const MAGIC: &[u8; 4] = b"MEMF";
pub const PRIMARY_STREAM_ID: u32 = 1;

pub const ROOT_INODE: u64 = 5;
pub const NOTE_INODE: u64 = 55;
pub const DOCS_INODE: u64 = 20;
pub const PHOTOS_INODE: u64 = 21;
pub const REPORT_INODE: u64 = 1234;
pub const BEACH_INODE: u64 = 300;
pub const BROKEN_INODE: u64 = 66;
pub const DISK_INODE: u64 = 70;

pub const NOTE_DATA: &[u8] = b"hello world";
pub const SECRET_DATA: &[u8] = b"top-secret";
pub const REPORT_LEN: usize = 1000;

pub fn report_data() -> Vec<u8> {
    (0..REPORT_LEN).map(|i| (i % 251) as u8).collect()
}

/// Bytes of a device holding the sample filesystem at `offset`.
pub fn image_bytes(offset: usize) -> Vec<u8> {
    let mut data = vec![0u8; offset];
    data.extend_from_slice(MAGIC);
    data.extend_from_slice(&[0u8; 60]);
    data
}

/// Counts overlapping calls into fixture entries.
#[derive(Debug, Default)]
pub struct CallTracker {
    active: AtomicUsize,
    peak: AtomicUsize,
    dwell: Duration,
}

impl CallTracker {
    pub fn new(dwell: Duration) -> Self {
        Self {
            dwell,
            ..Default::default()
        }
    }

    fn enter(&self) -> TrackedCall<'_> {
        let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(active, Ordering::SeqCst);
        if !self.dwell.is_zero() {
            std::thread::sleep(self.dwell);
        }
        TrackedCall(self)
    }

    /// Most calls seen in flight at once.
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

struct TrackedCall<'a>(&'a CallTracker);

impl Drop for TrackedCall<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
pub struct MemEntry {
    pub name: Option<EntryName>,
    pub meta: Option<EntryMeta>,
    pub data: Vec<u8>,
    pub streams: Vec<(EntryAttribute, Vec<u8>)>,
    pub children: Vec<Arc<MemEntry>>,
    pub broken_children: usize,
    pub fail_reads: bool,
    /// Extra bytes appended to every read, past what was asked for.
    pub pad_reads: usize,
    pub tracker: Option<Arc<CallTracker>>,
}

fn meta(addr: u64, meta_type: MetaType, size: usize, mode: i64) -> EntryMeta {
    EntryMeta {
        addr,
        meta_type,
        mode: Some(mode),
        nlink: Some(1),
        uid: Some(1000),
        gid: Some(1000),
        size: Some(size as i64),
        atime: Some(1_500_000_000),
        mtime: Some(1_500_000_100),
        ctime: Some(1_500_000_200),
    }
}

impl MemEntry {
    pub fn file(name: &str, inode: u64, data: &[u8]) -> Self {
        Self {
            name: Some(EntryName {
                name: name.to_string(),
                name_type: NameType::Reg,
            }),
            meta: Some(meta(inode, MetaType::Reg, data.len(), 0o644)),
            data: data.to_vec(),
            ..Default::default()
        }
    }

    pub fn dir(name: &str, inode: u64, children: Vec<MemEntry>) -> Self {
        Self {
            name: Some(EntryName {
                name: name.to_string(),
                name_type: NameType::Dir,
            }),
            meta: Some(meta(inode, MetaType::Dir, 4096, 0o755)),
            children: children.into_iter().map(Arc::new).collect(),
            ..Default::default()
        }
    }

    pub fn with_stream(mut self, attr_type: AttrType, id: u32, name: &str, data: &[u8]) -> Self {
        self.streams.push((
            EntryAttribute {
                attr_type,
                id,
                name: Some(name.to_string()),
                size: data.len() as u64,
            },
            data.to_vec(),
        ));
        self
    }

    fn track(&self) -> Option<TrackedCall<'_>> {
        self.tracker.as_deref().map(CallTracker::enter)
    }

    fn is_dir(&self) -> bool {
        self.meta
            .as_ref()
            .is_some_and(|meta| meta.meta_type == MetaType::Dir)
    }
}

impl FsEntry for MemEntry {
    fn name(&self) -> ParseResult<EntryName> {
        let _call = self.track();
        self.name.clone().ok_or(ParseError::MissingField("name"))
    }

    fn meta(&self) -> Option<EntryMeta> {
        let _call = self.track();
        self.meta.clone()
    }

    fn attributes(&self) -> ParseResult<Vec<EntryAttribute>> {
        let _call = self.track();
        let mut attributes = Vec::new();
        if !self.is_dir() {
            attributes.push(EntryAttribute {
                attr_type: AttrType::NTFS_DATA,
                id: PRIMARY_STREAM_ID,
                name: None,
                size: self.data.len() as u64,
            });
        }
        attributes.extend(self.streams.iter().map(|(attr, _)| attr.clone()));
        Ok(attributes)
    }

    fn read_random(
        &self,
        offset: u64,
        len: usize,
        attr_type: Option<AttrType>,
        attr_id: Option<u32>,
    ) -> ParseResult<Vec<u8>> {
        let _call = self.track();
        if self.fail_reads {
            return Err(ParseError::Fault("corrupt run list".to_string()));
        }
        let data = match (attr_type, attr_id) {
            (Some(AttrType::NTFS_DATA), Some(PRIMARY_STREAM_ID)) | (None, _) | (_, None) => {
                self.data.as_slice()
            }
            (Some(attr_type), Some(id)) => self
                .streams
                .iter()
                .find(|(attr, _)| attr.attr_type == attr_type && attr.id == id)
                .map(|(_, data)| data.as_slice())
                .ok_or_else(|| ParseError::NotFound(format!("attribute {attr_type:?}-{id}")))?,
        };
        let start = (offset as usize).min(data.len());
        let end = start.saturating_add(len).min(data.len());
        let mut out = data[start..end].to_vec();
        out.resize(out.len() + self.pad_reads, 0xEE);
        Ok(out)
    }

    fn children(&self) -> ParseResult<EntryIter> {
        let _call = self.track();
        if !self.is_dir() {
            return Err(ParseError::MissingField("directory"));
        }
        let mut items: Vec<ParseResult<Arc<dyn FsEntry>>> = self
            .children
            .iter()
            .map(|child| Ok(child.clone() as Arc<dyn FsEntry>))
            .collect();
        for _ in 0..self.broken_children {
            items.push(Err(ParseError::Fault("corrupt directory entry".to_string())));
        }
        Ok(Box::new(items.into_iter()))
    }
}

/// The filesystem every fixture image parses to.
///
/// ```text
/// /                 5
/// ├── .  ..
/// ├── $OrphanFiles  9999
/// ├── note.txt      55   (stream "secret", 0x80-2)
/// ├── docs/         20
/// │   ├── report.txt   1234
/// │   └── Photos/      21
/// │       └── Beach.JPG   300
/// ├── ghost         (no metadata)
/// ├── broken.bin    66   (reads fail)
/// ├── disk.img      70   (holds another image)
/// └── <unreadable entry>
/// ```
pub fn sample_tree() -> MemEntry {
    let mut ghost = MemEntry::file("ghost", 0, b"");
    ghost.meta = None;
    let mut broken = MemEntry::file("broken.bin", BROKEN_INODE, &[0xAA; 64]);
    broken.fail_reads = true;

    let mut root = MemEntry::dir(
        "",
        ROOT_INODE,
        vec![
            MemEntry::dir(".", ROOT_INODE, vec![]),
            MemEntry::dir("..", ROOT_INODE, vec![]),
            MemEntry::dir("$OrphanFiles", 9999, vec![]),
            MemEntry::file("note.txt", NOTE_INODE, NOTE_DATA)
                .with_stream(AttrType::NTFS_DATA, 2, "secret", SECRET_DATA)
                .with_stream(AttrType::NTFS_FILE_NAME, 3, "$FN", b""),
            MemEntry::dir(
                "docs",
                DOCS_INODE,
                vec![
                    MemEntry::file("report.txt", REPORT_INODE, &report_data()),
                    MemEntry::dir(
                        "Photos",
                        PHOTOS_INODE,
                        vec![MemEntry::file("Beach.JPG", BEACH_INODE, b"jpeg")],
                    ),
                ],
            ),
            ghost,
            broken,
            MemEntry::file("disk.img", DISK_INODE, &image_bytes(0)),
        ],
    );
    root.broken_children = 1;
    root
}

fn attach_tracker(entry: &mut MemEntry, tracker: &Arc<CallTracker>) {
    entry.tracker = Some(tracker.clone());
    for child in &mut entry.children {
        if let Some(child) = Arc::get_mut(child) {
            attach_tracker(child, tracker);
        }
    }
}

pub struct MemFs {
    root: Arc<MemEntry>,
    by_inode: HashMap<u64, Arc<MemEntry>>,
    concurrent: bool,
}

impl MemFs {
    pub fn new(root: MemEntry, concurrent: bool) -> Self {
        let root = Arc::new(root);
        let mut by_inode = HashMap::new();
        index(&root, &mut by_inode);
        Self {
            root,
            by_inode,
            concurrent,
        }
    }
}

fn index(entry: &Arc<MemEntry>, by_inode: &mut HashMap<u64, Arc<MemEntry>>) {
    if let Some(meta) = &entry.meta {
        by_inode.entry(meta.addr).or_insert_with(|| entry.clone());
    }
    for child in &entry.children {
        index(child, by_inode);
    }
}

impl ParsedFs for MemFs {
    fn open(&self, path: &str) -> ParseResult<Arc<dyn FsEntry>> {
        let mut current = self.root.clone();
        for segment in path_segments(path) {
            let next = current
                .children
                .iter()
                .find(|child| child.name.as_ref().is_some_and(|name| name.name == segment))
                .cloned()
                .ok_or_else(|| ParseError::NotFound(path.to_string()))?;
            current = next;
        }
        Ok(current as Arc<dyn FsEntry>)
    }

    fn open_meta(&self, inode: u64) -> ParseResult<Arc<dyn FsEntry>> {
        self.by_inode
            .get(&inode)
            .map(|entry| entry.clone() as Arc<dyn FsEntry>)
            .ok_or_else(|| ParseError::NotFound(format!("inode {inode}")))
    }

    fn supports_concurrent_reads(&self) -> bool {
        self.concurrent
    }
}

/// Parses any image carrying [`MAGIC`] into the sample tree and records how
/// it was called.
pub struct MemParser {
    fs: Arc<MemFs>,
    parses: AtomicUsize,
    calls: Mutex<Vec<(u64, u64)>>,
    delay: Duration,
    tracker: Arc<CallTracker>,
}

impl MemParser {
    pub fn new() -> Arc<Self> {
        Self::with_tree(sample_tree())
    }

    pub fn with_tree(root: MemEntry) -> Arc<Self> {
        Self::build(root, true, Duration::ZERO, Arc::default())
    }

    pub fn serialized() -> Arc<Self> {
        Self::build(sample_tree(), false, Duration::ZERO, Arc::default())
    }

    /// A serialized parser whose entries record overlapping calls, each
    /// call lasting at least `dwell`.
    pub fn tracked(dwell: Duration) -> Arc<Self> {
        let tracker = Arc::new(CallTracker::new(dwell));
        let mut root = sample_tree();
        attach_tracker(&mut root, &tracker);
        Self::build(root, false, Duration::ZERO, tracker)
    }

    pub fn slow(delay: Duration) -> Arc<Self> {
        Self::build(sample_tree(), true, delay, Arc::default())
    }

    fn build(
        root: MemEntry,
        concurrent: bool,
        delay: Duration,
        tracker: Arc<CallTracker>,
    ) -> Arc<Self> {
        Arc::new(Self {
            fs: Arc::new(MemFs::new(root, concurrent)),
            parses: AtomicUsize::new(0),
            calls: Mutex::new(Vec::new()),
            delay,
            tracker,
        })
    }

    /// Most entry calls that overlapped, for parsers built by
    /// [`MemParser::tracked`].
    pub fn peak_entry_calls(&self) -> usize {
        self.tracker.peak()
    }

    pub fn parses(&self) -> usize {
        self.parses.load(Ordering::SeqCst)
    }

    /// `(offset, reported image size)` of every parse.
    pub fn calls(&self) -> Vec<(u64, u64)> {
        self.calls.lock().clone()
    }
}

impl FsParser for MemParser {
    fn parse(&self, image: Arc<dyn ImageSource>, offset: u64) -> ParseResult<Arc<dyn ParsedFs>> {
        self.parses.fetch_add(1, Ordering::SeqCst);
        self.calls.lock().push((offset, image.size()));
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let magic = image
            .read(offset, MAGIC.len())
            .map_err(|err| ParseError::Io(err.into()))?;
        if magic != MAGIC {
            return Err(ParseError::Unsupported("no filesystem signature".to_string()));
        }
        Ok(self.fs.clone())
    }
}

#[derive(Debug)]
pub struct MemDevice {
    path: String,
    offset: Option<u64>,
    data: Option<Vec<u8>>,
}

impl RawDevice for MemDevice {
    fn path(&self) -> &str {
        &self.path
    }

    fn image_offset(&self) -> Option<u64> {
        self.offset
    }

    fn is_directory(&self) -> bool {
        self.data.is_none()
    }

    fn read_at(&self, offset: u64, buf: &mut [u8]) -> ImageResult<usize> {
        let data = self
            .data
            .as_ref()
            .ok_or_else(|| ImageError::new(ImageErrorKind::NotAFile, "mem.read_at"))?;
        let start = (offset as usize).min(data.len());
        let end = (start + buf.len()).min(data.len());
        buf[..end - start].copy_from_slice(&data[start..end]);
        Ok(end - start)
    }
}

/// Serves in-memory devices by host path.
#[derive(Default)]
pub struct MemOpener {
    devices: HashMap<String, Option<Vec<u8>>>,
}

impl MemOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_device(mut self, path: &str, data: Vec<u8>) -> Self {
        self.devices.insert(path.to_string(), Some(data));
        self
    }

    pub fn with_directory(mut self, path: &str) -> Self {
        self.devices.insert(path.to_string(), None);
        self
    }
}

impl DeviceOpener for MemOpener {
    fn open(&self, component: &PathComponent) -> ImageResult<Arc<dyn RawDevice>> {
        let data = self
            .devices
            .get(&component.path)
            .ok_or_else(|| ImageError::new(ImageErrorKind::NotFound, "mem.open"))?;
        Ok(Arc::new(MemDevice {
            path: component.path.clone(),
            offset: component.offset,
            data: data.clone(),
        }))
    }
}

pub const DEVICE: &str = "/dev/mem0";
pub const PARTITIONED: &str = "/dev/mem1";
pub const BLANK: &str = "/dev/blank";
pub const HOST_DIR: &str = "/mnt/share";
pub const PARTITION_OFFSET: u64 = 512;

pub fn opener() -> Arc<MemOpener> {
    Arc::new(
        MemOpener::new()
            .with_device(DEVICE, image_bytes(0))
            .with_device(PARTITIONED, image_bytes(PARTITION_OFFSET as usize))
            .with_device(BLANK, vec![0u8; 64])
            .with_directory(HOST_DIR),
    )
}

pub fn vfs_with_config(parser: Arc<MemParser>, config: ImageFsConfig) -> ImageVfs {
    ImageVfs::builder(parser)
        .config(config)
        .device_opener(opener())
        .build()
}

pub fn vfs(parser: Arc<MemParser>) -> ImageVfs {
    vfs_with_config(parser, ImageFsConfig::default())
}

/// `[device, image(path)]`
pub fn spec(path: &str) -> PathSpec {
    PathSpec::from_components(vec![
        PathComponent::os(DEVICE),
        PathComponent::image(path),
    ])
}

pub fn inode_spec(inode: u64) -> PathSpec {
    PathSpec::from_components(vec![
        PathComponent::os(DEVICE),
        PathComponent::image("").with_inode(inode),
    ])
}
