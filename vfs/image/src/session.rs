use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};

use crate::device::{DeviceId, RawDevice};
use crate::error::parse_result;
use crate::parser::{FsParser, ParsedFs};
use crate::source::{DeviceImage, ImageSource};
use crate::ImageResult;

/// One parsed filesystem together with the image it was parsed from.
///
/// Shared read-only by every handle opened against the same [`DeviceId`].
pub struct FsSession {
    device_id: DeviceId,
    fs: Arc<dyn ParsedFs>,
    image: Arc<DeviceImage>,
    read_lock: Option<Mutex<()>>,
}

impl FsSession {
    pub fn parse(
        parser: &dyn FsParser,
        device: Arc<dyn RawDevice>,
        reported_size: u64,
    ) -> ImageResult<Self> {
        let device_id = DeviceId::of(device.as_ref());
        let offset = device.image_offset().unwrap_or(0);
        let image = Arc::new(DeviceImage::new(device, reported_size));

        tracing::debug!(device = %device_id, offset, "Parsing filesystem");
        let fs = parse_result(
            "image.session.parse",
            parser.parse(image.clone() as Arc<dyn ImageSource>, offset),
        )?;
        let read_lock = (!fs.supports_concurrent_reads()).then(|| Mutex::new(()));

        Ok(Self {
            device_id,
            fs,
            image,
            read_lock,
        })
    }

    pub fn device_id(&self) -> &DeviceId {
        &self.device_id
    }

    pub fn fs(&self) -> &Arc<dyn ParsedFs> {
        &self.fs
    }

    pub fn image(&self) -> &Arc<DeviceImage> {
        &self.image
    }

    /// Serialises parser access for filesystems that cannot be read
    /// concurrently. `None` when no serialisation is needed.
    pub fn read_guard(&self) -> Option<MutexGuard<'_, ()>> {
        self.read_lock.as_ref().map(|lock| lock.lock())
    }
}

impl fmt::Debug for FsSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FsSession")
            .field("device_id", &self.device_id)
            .field("image", &self.image)
            .field("serialized", &self.read_lock.is_some())
            .finish()
    }
}
