//! Turning addresses into open handles.

use std::fmt;
use std::sync::Arc;

use crate::cache::DeviceCache;
use crate::config::ImageFsConfig;
use crate::device::{DeviceId, DeviceOpener, HostDeviceOpener, LocalDeviceResolver, RawDevice};
use crate::file::ImageFile;
use crate::parser::FsParser;
use crate::pathspec::{
    join_path, normalize_path, path_segments, PathCase, PathComponent, PathSpec, PathType,
};
use crate::session::FsSession;
use crate::{ImageError, ImageErrorKind, ImageResult};

/// Number of address rewrites tolerated while opening a single address.
const MAX_REWRITES: usize = 4;

/// A raw device opened for the host component of an address.
#[derive(Debug, Clone)]
pub struct RawHandle {
    device: Arc<dyn RawDevice>,
    pathspec: PathSpec,
}

impl RawHandle {
    pub fn new(device: Arc<dyn RawDevice>, pathspec: PathSpec) -> Self {
        Self { device, pathspec }
    }

    pub fn device(&self) -> &Arc<dyn RawDevice> {
        &self.device
    }

    pub fn pathspec(&self) -> &PathSpec {
        &self.pathspec
    }
}

/// The handle a component is opened against.
#[derive(Debug)]
pub enum BaseHandle {
    Image(ImageFile),
    Raw(RawHandle),
}

/// Outcome of resolving one image component.
#[derive(Debug)]
pub enum Resolution {
    /// The address was rewritten and must be opened again from the start.
    Rewritten(PathSpec),
    Opened(ImageFile),
}

/// Entry point of the provider: owns the parser, the session cache and the
/// collaborators that locate raw devices.
pub struct ImageVfs {
    config: Arc<ImageFsConfig>,
    parser: Arc<dyn FsParser>,
    cache: Arc<DeviceCache>,
    opener: Arc<dyn DeviceOpener>,
    local: Option<Arc<dyn LocalDeviceResolver>>,
}

impl ImageVfs {
    pub fn new(parser: Arc<dyn FsParser>) -> Self {
        Self::builder(parser).build()
    }

    pub fn builder(parser: Arc<dyn FsParser>) -> ImageVfsBuilder {
        ImageVfsBuilder {
            config: ImageFsConfig::default(),
            parser,
            cache: None,
            opener: None,
            local: None,
        }
    }

    pub fn config(&self) -> &Arc<ImageFsConfig> {
        &self.config
    }

    pub fn cache(&self) -> &Arc<DeviceCache> {
        &self.cache
    }

    /// The parsed filesystem for `device`, parsing it on first use or once
    /// the cached one has expired.
    pub fn session_for(&self, device: Arc<dyn RawDevice>) -> ImageResult<Arc<FsSession>> {
        let id = DeviceId::of(device.as_ref());
        self.cache.get_or_try_insert_with(&id, || {
            FsSession::parse(
                self.parser.as_ref(),
                device,
                self.config.reported_device_size,
            )
        })
    }

    /// Resolve one image component against `base`.
    ///
    /// `remaining` holds the components that follow `component` in the
    /// address being opened.
    pub fn resolve(
        &self,
        base: Option<&BaseHandle>,
        component: &PathComponent,
        remaining: &PathSpec,
    ) -> ImageResult<Resolution> {
        let Some(base) = base else {
            if component.path_type == PathType::Image {
                return self.rewrite_local(component, remaining).map(Resolution::Rewritten);
            }
            return Err(ImageError::new(
                ImageErrorKind::InvalidBase,
                "image.resolve.base",
            ));
        };

        if component.inode.is_some() {
            return ImageFile::open(self, base, component.clone()).map(Resolution::Opened);
        }
        self.open_by_name(base, component).map(Resolution::Opened)
    }

    /// Open a full address, re-running resolution whenever it is rewritten.
    pub fn open(&self, pathspec: &PathSpec) -> ImageResult<ImageFile> {
        let mut spec = pathspec.clone();

        'restart: for _ in 0..=MAX_REWRITES {
            let mut base: Option<BaseHandle> = None;
            for index in 0..spec.len() {
                let component = spec.components()[index].clone();
                match component.path_type {
                    PathType::Os => {
                        let device = self.opener.open(&component)?;
                        base = Some(BaseHandle::Raw(RawHandle::new(
                            device,
                            spec.prefix(index + 1),
                        )));
                    }
                    PathType::Image => {
                        let remaining =
                            PathSpec::from_components(spec.components()[index + 1..].to_vec());
                        match self.resolve(base.as_ref(), &component, &remaining)? {
                            Resolution::Rewritten(next) => {
                                tracing::debug!(?next, "Address rewritten");
                                spec = next;
                                continue 'restart;
                            }
                            Resolution::Opened(file) => base = Some(BaseHandle::Image(file)),
                        }
                    }
                    PathType::Registry => {
                        return Err(ImageError::new(
                            ImageErrorKind::InvalidInput,
                            "image.open.path_type",
                        ));
                    }
                }
            }

            return match base {
                Some(BaseHandle::Image(file)) => Ok(file),
                _ => Err(ImageError::new(
                    ImageErrorKind::InvalidInput,
                    "image.open.no_image_component",
                )),
            };
        }

        Err(ImageError::new(
            ImageErrorKind::Internal,
            "image.open.rewrite_limit",
        ))
    }

    /// Build the address that reaches `component` through the raw device
    /// holding its host path.
    fn rewrite_local(&self, component: &PathComponent, remaining: &PathSpec) -> ImageResult<PathSpec> {
        let local = self.local.as_ref().ok_or_else(|| {
            ImageError::new(ImageErrorKind::InvalidBase, "image.resolve.local_device")
        })?;
        let (raw, corrected) = local.raw_device(&component.path)?;

        let mut image = component.clone();
        image.path = corrected;

        let mut next = PathSpec::new(raw);
        next.append(image);
        for follower in remaining {
            next.append(follower.clone());
        }
        for part in next.iter_mut().skip(1) {
            part.path = local.canonical_path(&part.path);
        }

        tracing::trace!(path = %component.path, ?next, "Resolved host path to raw device");
        Ok(next)
    }

    /// Open by path, falling back to a case-insensitive walk when the exact
    /// path is missing and the component allows it.
    fn open_by_name(&self, base: &BaseHandle, component: &PathComponent) -> ImageResult<ImageFile> {
        match ImageFile::open(self, base, component.clone()) {
            Err(err)
                if err.kind() == ImageErrorKind::NotFound
                    && component.path_options == PathCase::Fold =>
            {
                let corrected = self.fold_case(base, component)?;
                tracing::debug!(
                    requested = %component.path,
                    corrected = %corrected.path,
                    "Matched path case-insensitively"
                );
                ImageFile::open(self, base, corrected)
            }
            other => other,
        }
    }

    /// Walk `component`'s path one segment at a time, matching each against
    /// the directory's names: exact match first, then ignoring case.
    fn fold_case(&self, base: &BaseHandle, component: &PathComponent) -> ImageResult<PathComponent> {
        let mut relative = String::from("/");
        for wanted in path_segments(&normalize_path(&component.path)) {
            let step = PathComponent::new(component.path_type, relative.clone());
            let dir = ImageFile::open(self, base, step)?;

            // A file part-way down the path means the path does not exist.
            let names: Vec<String> = match dir.list_names() {
                Ok(names) => names.collect(),
                Err(err) if err.kind() == ImageErrorKind::NotADirectory => {
                    return Err(ImageError::with_source(
                        ImageErrorKind::NotFound,
                        "image.fold_case",
                        err,
                    ));
                }
                Err(err) => return Err(err),
            };
            let lowered = wanted.to_lowercase();
            let matched = names
                .iter()
                .find(|name| name.as_str() == wanted)
                .or_else(|| names.iter().find(|name| name.to_lowercase() == lowered))
                .ok_or_else(|| ImageError::new(ImageErrorKind::NotFound, "image.fold_case"))?;

            relative = join_path(&relative, matched);
        }

        let mut corrected = component.clone();
        corrected.path = relative;
        Ok(corrected)
    }
}

impl fmt::Debug for ImageVfs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageVfs")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .field("local_resolver", &self.local.is_some())
            .finish()
    }
}

pub struct ImageVfsBuilder {
    config: ImageFsConfig,
    parser: Arc<dyn FsParser>,
    cache: Option<Arc<DeviceCache>>,
    opener: Option<Arc<dyn DeviceOpener>>,
    local: Option<Arc<dyn LocalDeviceResolver>>,
}

impl ImageVfsBuilder {
    pub fn config(mut self, config: ImageFsConfig) -> Self {
        self.config = config;
        self
    }

    /// Share a session cache between several providers.
    pub fn cache(mut self, cache: Arc<DeviceCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn device_opener(mut self, opener: Arc<dyn DeviceOpener>) -> Self {
        self.opener = Some(opener);
        self
    }

    pub fn local_resolver(mut self, local: Arc<dyn LocalDeviceResolver>) -> Self {
        self.local = Some(local);
        self
    }

    pub fn build(self) -> ImageVfs {
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(DeviceCache::new(self.config.cache_ttl)));
        ImageVfs {
            config: Arc::new(self.config),
            parser: self.parser,
            cache,
            opener: self.opener.unwrap_or_else(|| Arc::new(HostDeviceOpener)),
            local: self.local,
        }
    }
}
