//! Error types for the image provider.

use std::fmt;

use crate::parser::ParseError;

pub type ImageResult<T> = Result<T, ImageError>;

/// Classification of an [`ImageError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ImageErrorKind {
    /// No base was supplied, or the base cannot carry a parsed filesystem.
    InvalidBase,
    /// The path or inode does not exist in the parsed filesystem.
    NotFound,
    /// A file operation was attempted against a non-regular entry.
    NotAFile,
    /// A directory operation was attempted against a non-directory entry.
    NotADirectory,
    /// Reading from the image or the raw device failed.
    Io,
    /// The caller supplied an address or configuration that makes no sense.
    InvalidInput,
    /// The parser produced an entry missing structural metadata.
    InvalidData,
    Internal,
}

impl ImageErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ImageErrorKind::InvalidBase => "invalid base",
            ImageErrorKind::NotFound => "not found",
            ImageErrorKind::NotAFile => "not a file",
            ImageErrorKind::NotADirectory => "not a directory",
            ImageErrorKind::Io => "i/o error",
            ImageErrorKind::InvalidInput => "invalid input",
            ImageErrorKind::InvalidData => "invalid data",
            ImageErrorKind::Internal => "internal error",
        }
    }
}

impl fmt::Display for ImageErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{kind} ({context})")]
pub struct ImageError {
    kind: ImageErrorKind,
    context: &'static str,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl ImageError {
    pub fn new(kind: ImageErrorKind, context: &'static str) -> Self {
        Self {
            kind,
            context,
            source: None,
        }
    }

    pub fn with_source(
        kind: ImageErrorKind,
        context: &'static str,
        source: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    ) -> Self {
        Self {
            kind,
            context,
            source: Some(source.into()),
        }
    }

    pub fn kind(&self) -> ImageErrorKind {
        self.kind
    }

    pub fn context(&self) -> &'static str {
        self.context
    }

    pub(crate) fn from_parse(context: &'static str, err: ParseError) -> Self {
        let kind = match &err {
            ParseError::NotFound(_) => ImageErrorKind::NotFound,
            ParseError::MissingField(_) => ImageErrorKind::InvalidData,
            ParseError::Unsupported(_) => ImageErrorKind::InvalidBase,
            ParseError::Fault(_) | ParseError::Io(_) => ImageErrorKind::Io,
        };
        Self::with_source(kind, context, err)
    }
}

pub(crate) fn io_result<T>(context: &'static str, result: std::io::Result<T>) -> ImageResult<T> {
    result.map_err(|err| {
        let kind = match err.kind() {
            std::io::ErrorKind::NotFound => ImageErrorKind::NotFound,
            std::io::ErrorKind::InvalidInput => ImageErrorKind::InvalidInput,
            _ => ImageErrorKind::Io,
        };
        ImageError::with_source(kind, context, err)
    })
}

pub(crate) fn parse_result<T>(
    context: &'static str,
    result: Result<T, ParseError>,
) -> ImageResult<T> {
    result.map_err(|err| ImageError::from_parse(context, err))
}

impl From<ImageError> for std::io::Error {
    fn from(err: ImageError) -> Self {
        let kind = match err.kind() {
            ImageErrorKind::NotFound => std::io::ErrorKind::NotFound,
            ImageErrorKind::InvalidInput | ImageErrorKind::InvalidBase => {
                std::io::ErrorKind::InvalidInput
            }
            ImageErrorKind::InvalidData => std::io::ErrorKind::InvalidData,
            _ => std::io::ErrorKind::Other,
        };
        std::io::Error::new(kind, err)
    }
}
