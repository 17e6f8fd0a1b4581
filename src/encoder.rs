// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::codec::{Av1Codec, CodecError, ColorConversionInfo, CompressedAv1Image, EncoderOptions};
use crate::color::CicpColorData;
use crate::grid::{ImageGridMetadata, TileRect, choose_grid};
use crate::homogeneous::detect_homogeneous_tiles;
use crate::parser::ImageTransforms;
use crate::properties::ColorInformation;
use crate::serialize::{AvifWriter, ImageLayer};
use crate::{Error, Result};
use enough::Stop;
use imgref::ImgRef;
use log::debug;
use rgb::RGBA8;

/// An encoded file and the grid it was laid out with.
#[derive(Debug)]
pub struct EncodedAvif {
    pub data: std::vec::Vec<u8>,
    /// Persist this (see its `Display` form) to keep tile boundaries stable
    /// across re-encodes with `preserve_existing_tile_size`.
    pub grid: Option<ImageGridMetadata>,
}

/// Drives an [`Av1Codec`] over the tiles of an image and writes the result.
///
/// ```no_run
/// # fn demo(codec: &dyn avif_container::Av1Codec, image: imgref::ImgRef<'_, rgb::RGBA8>) -> avif_container::Result<()> {
/// use avif_container::{AvifEncoder, CompressionSpeed, EncoderOptions, Unstoppable};
///
/// let options = EncoderOptions::default().with_speed(CompressionSpeed::Fast);
/// let encoded = AvifEncoder::new(codec, options).encode(image, &Unstoppable)?;
/// std::fs::write("out.avif", &encoded.data)?;
/// # Ok(()) }
/// ```
pub struct AvifEncoder<'a, C: Av1Codec + ?Sized> {
    codec: &'a C,
    options: EncoderOptions,
    color_information: Option<&'a ColorInformation>,
    existing_grid: Option<ImageGridMetadata>,
    transforms: ImageTransforms,
    premultiplied_alpha: bool,
    exif: Option<&'a [u8]>,
    xmp: Option<&'a [u8]>,
}

impl<'a, C: Av1Codec + ?Sized> AvifEncoder<'a, C> {
    #[must_use]
    pub fn new(codec: &'a C, options: EncoderOptions) -> Self {
        Self {
            codec,
            options,
            color_information: None,
            existing_grid: None,
            transforms: ImageTransforms::default(),
            premultiplied_alpha: false,
            exif: None,
            xmp: None,
        }
    }

    /// Defaults to sRGB `nclx`.
    #[must_use]
    pub fn with_color_information(mut self, color: &'a ColorInformation) -> Self {
        self.color_information = Some(color);
        self
    }

    /// A grid persisted from an earlier encode of this image. Only used with
    /// `preserve_existing_tile_size`, and only while it still fits.
    #[must_use]
    pub fn with_existing_grid(mut self, grid: ImageGridMetadata) -> Self {
        self.existing_grid = Some(grid);
        self
    }

    #[must_use]
    pub fn with_transforms(mut self, transforms: ImageTransforms) -> Self {
        self.transforms = transforms;
        self
    }

    /// Marks the color channels as premultiplied by alpha.
    #[must_use]
    pub fn with_premultiplied_alpha(mut self, premultiplied: bool) -> Self {
        self.premultiplied_alpha = premultiplied;
        self
    }

    #[must_use]
    pub fn with_exif(mut self, exif: &'a [u8]) -> Self {
        self.exif = Some(exif);
        self
    }

    #[must_use]
    pub fn with_xmp(mut self, xmp: &'a [u8]) -> Self {
        self.xmp = Some(xmp);
        self
    }

    /// Compresses `image` and writes a complete file. `stop` is checked
    /// before each tile.
    pub fn encode(&self, image: ImgRef<'_, RGBA8>, stop: &dyn Stop) -> Result<EncodedAvif> {
        let width = u32::try_from(image.width())?;
        let height = u32::try_from(image.height())?;
        if width == 0 || height == 0 {
            return Err(Error::InvalidData("image dimensions cannot be zero"));
        }

        let grid = choose_grid(width, height, &self.options, self.existing_grid.as_ref());
        let tiles: std::vec::Vec<TileRect> = match &grid {
            Some(grid) => grid.tile_rects().collect(),
            None => vec![TileRect { x: 0, y: 0, width, height }],
        };

        let has_alpha = image.rows().any(|row| row.iter().any(|px| px.a != 255));
        let homogeneous = detect_homogeneous_tiles(image, &tiles, has_alpha);
        debug!(
            "encoding {width}x{height} as {} tiles, {} flat color duplicates, alpha: {has_alpha}",
            tiles.len(),
            homogeneous.duplicate_color_tile_map.len()
        );

        let srgb = ColorInformation::Nclx(CicpColorData::SRGB);
        let color_information = self.color_information.unwrap_or(&srgb);
        let conversion = match color_information {
            ColorInformation::Nclx(cicp) => ColorConversionInfo::Nclx(*cicp),
            ColorInformation::Icc(profile) => ColorConversionInfo::IccProfile(&profile[..]),
        };

        let mut color_payloads: std::vec::Vec<CompressedAv1Image> = std::vec::Vec::new();
        let mut alpha_payloads: std::vec::Vec<CompressedAv1Image> = std::vec::Vec::new();
        let mut color_tiles = std::vec::Vec::with_capacity(tiles.len());
        let mut alpha_tiles = std::vec::Vec::with_capacity(tiles.len());

        for (index, rect) in tiles.iter().enumerate() {
            stop.check()?;

            let color_source = homogeneous.color_source(index);
            let alpha_source = has_alpha.then(|| homogeneous.alpha_source(index)).flatten();
            let need_color = color_source.is_none();
            let need_alpha = has_alpha && alpha_source.is_none();

            if need_color || need_alpha {
                let tile = image.sub_image(rect.x as usize, rect.y as usize, rect.width as usize, rect.height as usize);
                let compressed = self.codec.compress(tile, &self.options, &conversion, need_alpha, stop)?;
                if need_color {
                    color_payloads.try_reserve(1)?;
                    color_payloads.push(compressed.color);
                }
                if need_alpha {
                    let alpha = compressed.alpha.ok_or(CodecError::EncodeFailed)?;
                    alpha_payloads.try_reserve(1)?;
                    alpha_payloads.push(alpha);
                }
            }

            // a duplicate always refers to an earlier tile
            color_tiles.push(match color_source {
                Some(source) => color_tiles[source],
                None => color_payloads.len() - 1,
            });
            if has_alpha {
                alpha_tiles.push(match alpha_source {
                    Some(source) => alpha_tiles[source],
                    None => alpha_payloads.len() - 1,
                });
            }
        }
        debug!(
            "compressed {} color and {} alpha payloads",
            color_payloads.len(),
            alpha_payloads.len()
        );

        let color_layer = ImageLayer::new(color_payloads.iter().collect(), color_tiles);
        let mut writer = AvifWriter::new(width, height, color_layer)
            .with_color_information(color_information)
            .with_transforms(self.transforms);
        if has_alpha {
            writer = writer
                .with_alpha(ImageLayer::new(alpha_payloads.iter().collect(), alpha_tiles))
                .with_premultiplied_alpha(self.premultiplied_alpha);
        }
        if let Some(grid) = grid {
            writer = writer.with_grid(grid);
        }
        if let Some(exif) = self.exif {
            writer = writer.with_exif(exif);
        }
        if let Some(xmp) = self.xmp {
            writer = writer.with_xmp(xmp);
        }

        Ok(EncodedAvif {
            data: writer.write()?,
            grid,
        })
    }
}
