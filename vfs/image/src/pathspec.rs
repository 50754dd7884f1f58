//! Chained resource addresses.
//!
//! A [`PathSpec`] is an ordered list of [`PathComponent`]s. Earlier components
//! describe how to reach a raw byte source (a disk, then a partition offset);
//! the last component names the resource a handle represents.

use serde::{Deserialize, Serialize};

use crate::parser::AttrType;

/// Backend a component is resolved by.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathType {
    /// A host path: file, raw device or directory.
    Os,
    /// A path inside a filesystem parsed out of a raw image.
    Image,
    Registry,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PathCase {
    /// The path is known to match the on-disk casing.
    Literal,
    /// The path may need case correction against the directory listing.
    #[default]
    Fold,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathComponent {
    pub path_type: PathType,
    pub path: String,
    #[serde(default)]
    pub path_options: PathCase,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inode: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ntfs_type: Option<AttrType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ntfs_id: Option<u32>,
    /// Byte offset of the filesystem inside a raw device component.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
}

impl PathComponent {
    pub fn new(path_type: PathType, path: impl Into<String>) -> Self {
        Self {
            path_type,
            path: path.into(),
            path_options: PathCase::default(),
            inode: None,
            ntfs_type: None,
            ntfs_id: None,
            offset: None,
        }
    }

    pub fn os(path: impl Into<String>) -> Self {
        Self::new(PathType::Os, path)
    }

    pub fn image(path: impl Into<String>) -> Self {
        Self::new(PathType::Image, path)
    }

    pub fn with_inode(mut self, inode: u64) -> Self {
        self.inode = Some(inode);
        self
    }

    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_stream(mut self, ntfs_type: AttrType, ntfs_id: u32) -> Self {
        self.ntfs_type = Some(ntfs_type);
        self.ntfs_id = Some(ntfs_id);
        self
    }

    pub fn with_case(mut self, case: PathCase) -> Self {
        self.path_options = case;
        self
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PathSpec {
    components: Vec<PathComponent>,
}

impl PathSpec {
    pub fn new(component: PathComponent) -> Self {
        Self {
            components: vec![component],
        }
    }

    pub fn from_components(components: Vec<PathComponent>) -> Self {
        Self { components }
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_empty(&self) -> bool {
        self.components.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&PathComponent> {
        self.components.get(index)
    }

    pub fn first(&self) -> Option<&PathComponent> {
        self.components.first()
    }

    pub fn last(&self) -> Option<&PathComponent> {
        self.components.last()
    }

    pub fn last_mut(&mut self) -> Option<&mut PathComponent> {
        self.components.last_mut()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PathComponent> {
        self.components.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, PathComponent> {
        self.components.iter_mut()
    }

    pub fn components(&self) -> &[PathComponent] {
        &self.components
    }

    pub fn append(&mut self, component: PathComponent) {
        self.components.push(component);
    }

    pub fn insert(&mut self, index: usize, component: PathComponent) {
        let index = index.min(self.components.len());
        self.components.insert(index, component);
    }

    pub fn pop(&mut self) -> Option<PathComponent> {
        self.components.pop()
    }

    /// The first `len` components.
    pub fn prefix(&self, len: usize) -> PathSpec {
        let len = len.min(self.components.len());
        Self {
            components: self.components[..len].to_vec(),
        }
    }

    /// A copy of this spec whose last component is replaced.
    pub fn with_last(&self, component: PathComponent) -> PathSpec {
        let mut next = self.clone();
        next.pop();
        next.append(component);
        next
    }

    /// A copy of this spec with `component` appended.
    pub fn with_appended(&self, component: PathComponent) -> PathSpec {
        let mut next = self.clone();
        next.append(component);
        next
    }
}

impl<'a> IntoIterator for &'a PathSpec {
    type Item = &'a PathComponent;
    type IntoIter = std::slice::Iter<'a, PathComponent>;

    fn into_iter(self) -> Self::IntoIter {
        self.components.iter()
    }
}

/// Normalise a `/`-separated path: collapse repeated separators, resolve `.`
/// and `..`, and root the result.
pub fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    let mut out = String::with_capacity(path.len() + 1);
    for part in &parts {
        out.push('/');
        out.push_str(part);
    }
    if out.is_empty() {
        out.push('/');
    }
    out
}

/// Join `rel` below `base` and normalise the result.
pub fn join_path(base: &str, rel: &str) -> String {
    normalize_path(&format!("{base}/{rel}"))
}

/// The non-empty segments of a normalised path.
pub fn path_segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty() && *s != ".")
}
