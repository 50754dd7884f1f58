//! Byte source handed to the parser.

use std::fmt;
use std::sync::Arc;

use crate::device::RawDevice;
use crate::ImageResult;

/// Random-access, length-reporting view of an image.
pub trait ImageSource: fmt::Debug + Send + Sync + 'static {
    /// Read up to `len` bytes at `offset`. Short reads happen only at the end
    /// of the underlying device.
    fn read(&self, offset: u64, len: usize) -> ImageResult<Vec<u8>>;

    fn size(&self) -> u64;
}

/// Adapts a [`RawDevice`] into an [`ImageSource`].
///
/// `size()` does not report the device size: raw devices routinely
/// under-report it, so the configured size (normally
/// [`DEFAULT_REPORTED_DEVICE_SIZE`](crate::config::DEFAULT_REPORTED_DEVICE_SIZE))
/// is returned and the parser is free to read past the OS boundary.
#[derive(Debug)]
pub struct DeviceImage {
    device: Arc<dyn RawDevice>,
    reported_size: u64,
}

impl DeviceImage {
    pub fn new(device: Arc<dyn RawDevice>, reported_size: u64) -> Self {
        Self {
            device,
            reported_size,
        }
    }

    pub fn device(&self) -> &Arc<dyn RawDevice> {
        &self.device
    }
}

impl ImageSource for DeviceImage {
    fn read(&self, offset: u64, len: usize) -> ImageResult<Vec<u8>> {
        let mut buf = vec![0u8; len];
        let mut filled = 0;
        while filled < len {
            let read = self
                .device
                .read_at(offset + filled as u64, &mut buf[filled..])?;
            if read == 0 {
                break;
            }
            filled += read;
        }
        buf.truncate(filled);
        Ok(buf)
    }

    fn size(&self) -> u64 {
        self.reported_size
    }
}
