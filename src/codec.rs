// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! The boundary to an external AV1 encoder/decoder.
//!
//! The container code never looks inside AV1 bitstreams. It hands RGBA tiles
//! to an [`Av1Codec`] and gets back compressed color (and optionally alpha)
//! payloads with their `av1C` configuration, and the reverse for decoding.

use crate::color::CicpColorData;
use crate::properties::AV1Config;
use crate::TryVec;
use enough::Stop;
use imgref::{ImgRef, ImgRefMut};
use rgb::RGBA8;
use std::fmt;

/// Encoder effort. Slower presets allow larger tiles; `VerySlow` encodes the
/// image as a single tile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompressionSpeed {
    Fast,
    #[default]
    Medium,
    Slow,
    VerySlow,
}

impl CompressionSpeed {
    /// Largest tile edge the grid planner aims for, or `None` for no tiling.
    #[must_use]
    pub const fn max_tile_size(self) -> Option<u32> {
        match self {
            Self::Fast => Some(512),
            Self::Medium => Some(1024),
            Self::Slow => Some(2048),
            Self::VerySlow => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ChromaSubsampling {
    #[default]
    Yuv420,
    Yuv422,
    Yuv444,
    /// Monochrome.
    Yuv400,
}

impl ChromaSubsampling {
    /// Horizontal and vertical subsampling flags, as in `av1C`.
    #[must_use]
    pub const fn subsampling_xy(self) -> (bool, bool) {
        match self {
            Self::Yuv420 | Self::Yuv400 => (true, true),
            Self::Yuv422 => (true, false),
            Self::Yuv444 => (false, false),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderOptions {
    /// 0 (smallest) to 100 (best).
    pub quality: u8,
    pub speed: CompressionSpeed,
    pub chroma: ChromaSubsampling,
    /// Reuse a previously persisted grid when it still fits the image.
    pub preserve_existing_tile_size: bool,
}

impl Default for EncoderOptions {
    fn default() -> Self {
        Self {
            quality: 85,
            speed: CompressionSpeed::default(),
            chroma: ChromaSubsampling::default(),
            preserve_existing_tile_size: false,
        }
    }
}

impl EncoderOptions {
    #[must_use]
    pub fn with_quality(mut self, quality: u8) -> Self {
        self.quality = quality.min(100);
        self
    }

    #[must_use]
    pub fn with_speed(mut self, speed: CompressionSpeed) -> Self {
        self.speed = speed;
        self
    }

    #[must_use]
    pub fn with_chroma(mut self, chroma: ChromaSubsampling) -> Self {
        self.chroma = chroma;
        self
    }

    #[must_use]
    pub fn with_preserve_existing_tile_size(mut self, preserve: bool) -> Self {
        self.preserve_existing_tile_size = preserve;
        self
    }
}

/// Errors reported by an [`Av1Codec`] implementation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    InitFailed,
    EncodeFailed,
    DecodeFailed,
    UserCancelled,
    UnsupportedBitDepth,
    UnsupportedChromaFormat,
    /// Tiles of one grid disagree on bit depth or chroma format.
    TileFormatMismatch,
    /// The decoded color image does not have the expected dimensions.
    ColorSizeMismatch,
    /// The decoded alpha image does not match the color image.
    AlphaSizeMismatch,
    OutOfMemory,
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::InitFailed => "codec initialization failed",
            Self::EncodeFailed => "encoding failed",
            Self::DecodeFailed => "decoding failed",
            Self::UserCancelled => "cancelled",
            Self::UnsupportedBitDepth => "unsupported bit depth",
            Self::UnsupportedChromaFormat => "unsupported chroma format",
            Self::TileFormatMismatch => "grid tiles use different formats",
            Self::ColorSizeMismatch => "color image size does not match",
            Self::AlphaSizeMismatch => "alpha image size does not match",
            Self::OutOfMemory => "out of memory",
        })
    }
}

impl std::error::Error for CodecError {}

/// How the codec should map between RGB and YUV.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorConversionInfo<'a> {
    /// Convert using these CICP code points.
    Nclx(CicpColorData),
    /// The image carries an ICC profile; the codec uses its default matrix.
    IccProfile(&'a [u8]),
}

impl ColorConversionInfo<'_> {
    /// The CICP values to signal in the bitstream.
    #[must_use]
    pub fn cicp(&self) -> CicpColorData {
        match self {
            Self::Nclx(cicp) => *cicp,
            Self::IccProfile(_) => CicpColorData {
                color_primaries: CicpColorData::PRIMARIES_UNSPECIFIED,
                transfer_characteristics: CicpColorData::TRANSFER_UNSPECIFIED,
                ..CicpColorData::SRGB
            },
        }
    }
}

/// One compressed AV1 image (a whole image or one tile, color or alpha).
#[derive(Debug)]
pub struct CompressedAv1Image {
    pub data: TryVec<u8>,
    pub config: AV1Config,
}

#[derive(Debug)]
pub struct CompressedTile {
    pub color: CompressedAv1Image,
    /// Present when alpha was requested.
    pub alpha: Option<CompressedAv1Image>,
}

/// The compressed payloads of one tile handed to [`Av1Codec::decompress`].
#[derive(Debug, Clone, Copy)]
pub struct EncodedTile<'a> {
    pub color: &'a [u8],
    pub color_config: Option<&'a AV1Config>,
    pub alpha: Option<&'a [u8]>,
    pub alpha_config: Option<&'a AV1Config>,
}

pub trait Av1Codec {
    /// Compresses one tile. The alpha plane is only encoded when
    /// `encode_alpha` is set.
    fn compress(
        &self,
        tile: ImgRef<'_, RGBA8>,
        options: &EncoderOptions,
        color: &ColorConversionInfo<'_>,
        encode_alpha: bool,
        stop: &dyn Stop,
    ) -> Result<CompressedTile, CodecError>;

    /// Decodes one tile into `output`, which has the tile's expected size.
    /// Without an alpha payload the output alpha is opaque.
    fn decompress(
        &self,
        tile: &EncodedTile<'_>,
        color: &ColorConversionInfo<'_>,
        output: ImgRefMut<'_, RGBA8>,
    ) -> Result<(), CodecError>;
}
