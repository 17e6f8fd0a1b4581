#![deny(unsafe_code)]
//! Reader and writer for the AVIF image container.
//!
//! AVIF is a constrained profile of the ISO Base Media File Format (HEIF) that
//! carries AV1-coded still images. This crate handles the container layer:
//!
//! * [`AvifParser`] walks the box tree of a seekable stream with strict bounds
//!   checking, resolves the relationships between items (primary image, alpha
//!   auxiliary image, Exif/XMP metadata, grid tiles, item properties), and
//!   reads item payloads through overflow-checked extent arithmetic.
//! * [`grid`] plans tile grids so large images can be encoded with bounded
//!   memory, and [`homogeneous`] finds flat tiles whose compressed payload can
//!   be shared.
//! * [`AvifWriter`] lays out `ftyp`/`meta`/`mdat` for single-image and grid
//!   output, and [`AvifEncoder`]/[`decode`] drive a pluggable [`Av1Codec`].
//!
//! The AV1 codec itself is not part of this crate; it is reached through the
//! narrow [`Av1Codec`] trait.

// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use fallible_collections::TryReserveError;
use std::convert::TryInto as _;

mod boxes;
pub mod codec;
pub mod color;
mod decoder;
mod encoder;
mod extents;
pub mod grid;
pub mod homogeneous;
mod meta;
mod parser;
mod properties;
mod reader;
mod serialize;
mod writer;

pub use crate::boxes::FourCC;
pub use crate::codec::{
    Av1Codec, ChromaSubsampling, CodecError, ColorConversionInfo, CompressedAv1Image, CompressedTile, CompressionSpeed,
    EncodedTile, EncoderOptions,
};
pub use crate::color::CicpColorData;
pub use crate::decoder::{DecodedImage, decode, decode_with_config};
pub use crate::encoder::{AvifEncoder, EncodedAvif};
pub use crate::extents::AvifItemData;
pub use crate::grid::{ImageGridDescriptor, ImageGridInfo, ImageGridMetadata, TileRect};
pub use crate::meta::{ConstructionMethod, Extent, ItemInfo, ItemLocationEntry, ItemReference, PropertyAssociation};
pub use crate::parser::{AvifParser, ImageTransforms};
pub use crate::properties::{
    AV1Config, AuxiliaryType, CleanAperture, ColorInformation, ImageMirror, ImageRotation, ImageSpatialExtents,
    ItemProperty, PixelAspectRatio, PixelInformation,
};
pub use crate::serialize::{AvifWriter, ImageLayer};

pub use enough::{Stop, StopReason, Unstoppable};

/// A trait to indicate a type can be infallibly converted to `u64`.
/// This should only be implemented for infallible conversions, so only unsigned types are valid.
pub(crate) trait ToU64 {
    fn to_u64(self) -> u64;
}

/// Statically verify that the platform `usize` can fit within a `u64`.
/// If the size won't fit on the given platform, this will fail at compile time, but if a type
/// which can fail `TryInto<usize>` is used, it may panic.
impl ToU64 for usize {
    fn to_u64(self) -> u64 {
        const _: () = assert!(std::mem::size_of::<usize>() <= std::mem::size_of::<u64>());
        self.try_into().ok().unwrap()
    }
}

/// A trait to indicate a type can be infallibly converted to `usize`.
/// This should only be implemented for infallible conversions, so only unsigned types are valid.
pub(crate) trait ToUsize {
    fn to_usize(self) -> usize;
}

/// Statically verify that the given type can fit within a `usize`.
/// If the size won't fit on the given platform, this will fail at compile time, but if a type
/// which can fail `TryInto<usize>` is used, it may panic.
macro_rules! impl_to_usize_from {
    ( $from_type:ty ) => {
        impl ToUsize for $from_type {
            fn to_usize(self) -> usize {
                const _: () = assert!(std::mem::size_of::<$from_type>() <= std::mem::size_of::<usize>());
                self.try_into().ok().unwrap()
            }
        }
    };
}

impl_to_usize_from!(u8);
impl_to_usize_from!(u16);
impl_to_usize_from!(u32);

#[doc(hidden)]
pub type TryVec<T> = fallible_collections::TryVec<T>;

// To ensure we don't use stdlib allocating types by accident
#[allow(dead_code)]
struct Vec;
#[allow(dead_code)]
struct Box;
#[allow(dead_code)]
struct HashMap;
#[allow(dead_code)]
struct String;

/// Describes parser, writer and codec-boundary failures.
///
/// This enum wraps the standard `io::Error` type, unified with
/// our own format error states and those of crates we use.
#[derive(Debug)]
pub enum Error {
    /// Malformed container: a structural invariant of the file does not hold.
    InvalidData(&'static str),
    /// Well-formed data using a feature this crate does not implement.
    Unsupported(&'static str),
    /// Reflect `std::io::ErrorKind::UnexpectedEof` for short data.
    UnexpectedEOF,
    /// Propagate underlying errors from `std::io`.
    Io(std::io::Error),
    /// A stream position was set outside of the segment it belongs to.
    OutOfRange(&'static str),
    /// Out of memory
    OutOfMemory,
    /// Resource limit exceeded during parsing
    ResourceLimitExceeded(&'static str),
    /// Operation was stopped/cancelled
    Stopped(enough::StopReason),
    /// The AV1 codec reported a failure.
    Codec(CodecError),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let msg = match self {
            Self::InvalidData(s) | Self::Unsupported(s) | Self::ResourceLimitExceeded(s) | Self::OutOfRange(s) => *s,
            Self::UnexpectedEOF => "EOF",
            Self::Io(err) => return err.fmt(f),
            Self::OutOfMemory => "OOM",
            Self::Stopped(reason) => return write!(f, "Stopped: {}", reason),
            Self::Codec(err) => return write!(f, "codec: {err}"),
        };
        f.write_str(msg)
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Codec(err) => Some(err),
            _ => None,
        }
    }
}

impl From<bitreader::BitReaderError> for Error {
    #[cold]
    #[cfg_attr(debug_assertions, track_caller)]
    fn from(err: bitreader::BitReaderError) -> Self {
        log::warn!("bitreader: {err}");
        debug_assert!(!matches!(err, bitreader::BitReaderError::TooManyBitsForType { .. })); // bug
        Self::InvalidData("truncated bits")
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::UnexpectedEof => Self::UnexpectedEOF,
            std::io::ErrorKind::OutOfMemory => Self::OutOfMemory,
            _ => Self::Io(err),
        }
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(_: std::string::FromUtf8Error) -> Self {
        Self::InvalidData("invalid utf8")
    }
}

impl From<std::num::TryFromIntError> for Error {
    fn from(_: std::num::TryFromIntError) -> Self {
        Self::Unsupported("integer conversion failed")
    }
}

impl From<Error> for std::io::Error {
    fn from(err: Error) -> Self {
        let kind = match err {
            Error::InvalidData(_) => std::io::ErrorKind::InvalidData,
            Error::UnexpectedEOF => std::io::ErrorKind::UnexpectedEof,
            Error::OutOfMemory => std::io::ErrorKind::OutOfMemory,
            Error::Io(io_err) => return io_err,
            _ => std::io::ErrorKind::Other,
        };
        Self::new(kind, err)
    }
}

impl From<TryReserveError> for Error {
    fn from(_: TryReserveError) -> Self {
        Self::OutOfMemory
    }
}

impl From<enough::StopReason> for Error {
    fn from(reason: enough::StopReason) -> Self {
        Self::Stopped(reason)
    }
}

impl From<CodecError> for Error {
    fn from(err: CodecError) -> Self {
        Self::Codec(err)
    }
}

/// Result shorthand using our Error enum.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Configuration for reading AVIF files with resource limits and validation options
///
/// Resource limits are checked **before** allocations occur, preventing out-of-memory
/// conditions from malicious files that claim unrealistic dimensions or counts.
///
/// # Examples
///
/// ```rust
/// use avif_container::DecodeConfig;
///
/// // Default limits (suitable for most apps)
/// let config = DecodeConfig::default();
///
/// // Strict limits for untrusted input
/// let config = DecodeConfig::default()
///     .with_peak_memory_limit(100_000_000)  // 100MB
///     .with_total_megapixels_limit(64)       // 64MP max
///     .with_max_grid_tiles(64);
///
/// // No limits
/// let config = DecodeConfig::unlimited();
/// ```
#[derive(Debug, Clone)]
pub struct DecodeConfig {
    /// Maximum size in bytes of a single buffer allocated from file data
    /// (one item payload, or one decoded pixel surface).
    /// Default: 1GB (1,000,000,000 bytes)
    pub peak_memory_limit: Option<u64>,

    /// Maximum total megapixels of a decoded image.
    /// Default: 512 megapixels
    pub total_megapixels_limit: Option<u32>,

    /// Maximum number of grid tiles.
    /// Default: 1,000 tiles
    pub max_grid_tiles: Option<u32>,

    /// Enable lenient parsing mode.
    ///
    /// When true, non-critical validation errors (like non-zero flags in boxes
    /// that expect zero flags) will be ignored instead of returning errors.
    /// Default: false (strict validation)
    pub lenient: bool,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            peak_memory_limit: Some(1_000_000_000),
            total_megapixels_limit: Some(512),
            max_grid_tiles: Some(1_000),
            lenient: false,
        }
    }
}

impl DecodeConfig {
    /// Create a configuration with no resource limits.
    pub fn unlimited() -> Self {
        Self {
            peak_memory_limit: None,
            total_megapixels_limit: None,
            max_grid_tiles: None,
            lenient: false,
        }
    }

    /// Set the peak memory limit in bytes
    pub fn with_peak_memory_limit(mut self, bytes: u64) -> Self {
        self.peak_memory_limit = Some(bytes);
        self
    }

    /// Set the total megapixels limit for decoded images
    pub fn with_total_megapixels_limit(mut self, megapixels: u32) -> Self {
        self.total_megapixels_limit = Some(megapixels);
        self
    }

    /// Set the maximum grid tile count
    pub fn with_max_grid_tiles(mut self, tiles: u32) -> Self {
        self.max_grid_tiles = Some(tiles);
        self
    }

    /// Enable lenient parsing mode
    pub fn lenient(mut self, lenient: bool) -> Self {
        self.lenient = lenient;
        self
    }
}

pub(crate) struct ResourceTracker<'a> {
    config: &'a DecodeConfig,
}

impl<'a> ResourceTracker<'a> {
    pub(crate) fn new(config: &'a DecodeConfig) -> Self {
        Self { config }
    }

    pub(crate) fn validate_allocation(&self, bytes: u64) -> Result<()> {
        if let Some(limit) = self.config.peak_memory_limit {
            if bytes > limit {
                return Err(Error::ResourceLimitExceeded("peak memory limit exceeded"));
            }
        }

        Ok(())
    }

    pub(crate) fn validate_total_megapixels(&self, width: u32, height: u32) -> Result<()> {
        if let Some(limit) = self.config.total_megapixels_limit {
            let megapixels = u64::from(width)
                .checked_mul(u64::from(height))
                .ok_or(Error::InvalidData("dimension overflow"))?
                / 1_000_000;

            if megapixels > u64::from(limit) {
                return Err(Error::ResourceLimitExceeded("total megapixels limit exceeded"));
            }
        }

        Ok(())
    }

    pub(crate) fn validate_grid_tiles(&self, count: u32) -> Result<()> {
        if let Some(limit) = self.config.max_grid_tiles {
            if count > limit {
                return Err(Error::ResourceLimitExceeded("grid tile count limit exceeded"));
            }
        }

        Ok(())
    }
}

#[test]
fn error_converts_to_io_error_kind() {
    let err: std::io::Error = Error::InvalidData("bad").into();
    assert_eq!(err.kind(), std::io::ErrorKind::InvalidData);
    let err: std::io::Error = Error::UnexpectedEOF.into();
    assert_eq!(err.kind(), std::io::ErrorKind::UnexpectedEof);
}

#[test]
fn resource_tracker_limits() {
    let config = DecodeConfig::default()
        .with_peak_memory_limit(1000)
        .with_total_megapixels_limit(1)
        .with_max_grid_tiles(4);
    let tracker = ResourceTracker::new(&config);
    assert!(tracker.validate_allocation(1000).is_ok());
    assert!(matches!(tracker.validate_allocation(1001), Err(Error::ResourceLimitExceeded(_))));
    assert!(tracker.validate_total_megapixels(1000, 1999).is_ok());
    assert!(tracker.validate_total_megapixels(2000, 1000).is_err());
    assert!(tracker.validate_grid_tiles(4).is_ok());
    assert!(tracker.validate_grid_tiles(5).is_err());

    let unlimited = DecodeConfig::unlimited();
    let tracker = ResourceTracker::new(&unlimited);
    assert!(tracker.validate_allocation(u64::MAX).is_ok());
    assert!(tracker.validate_grid_tiles(u32::MAX).is_ok());
}
