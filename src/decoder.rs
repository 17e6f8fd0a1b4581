// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::boxes::{AV01_ITEM, GRID_ITEM};
use crate::codec::{Av1Codec, CodecError, ColorConversionInfo, EncodedTile};
use crate::color::CicpColorData;
use crate::extents::AvifItemData;
use crate::grid::{ImageGridInfo, ImageGridMetadata};
use crate::parser::{AvifParser, ImageTransforms};
use crate::properties::{AV1Config, ColorInformation};
use crate::reader::{byte_count, count_to_usize};
use crate::{DecodeConfig, Error, ResourceTracker, Result};
use enough::{Stop, Unstoppable};
use fallible_collections::TryClone;
use imgref::{ImgRefMut, ImgVec};
use log::{debug, warn};
use rgb::RGBA8;
use std::io::{Cursor, Read, Seek};

/// The primary image of a file, decoded to RGBA.
///
/// Transforms are reported, not applied.
#[derive(Debug)]
pub struct DecodedImage {
    pub pixels: ImgVec<RGBA8>,
    /// The file had an alpha item. Without one, alpha is 255.
    pub has_alpha: bool,
    pub premultiplied_alpha: bool,
    /// The tile layout, for re-encoding with the same tile boundaries.
    pub grid: Option<ImageGridMetadata>,
    pub color: Option<ColorInformation>,
    pub transforms: ImageTransforms,
    pub exif: Option<AvifItemData>,
    pub xmp: Option<AvifItemData>,
}

/// Decodes the primary image with the default [`DecodeConfig`].
pub fn decode<C: Av1Codec + ?Sized>(data: &[u8], codec: &C) -> Result<DecodedImage> {
    decode_with_config(Cursor::new(data), codec, &DecodeConfig::default(), &Unstoppable)
}

/// Decodes the primary image. `stop` is checked while parsing and before
/// each tile.
pub fn decode_with_config<R: Read + Seek, C: Av1Codec + ?Sized>(
    reader: R,
    codec: &C,
    config: &DecodeConfig,
    stop: &dyn Stop,
) -> Result<DecodedImage> {
    let mut parser = AvifParser::from_reader_with_config(reader, config, stop)?;
    decode_parsed(&mut parser, codec, stop)
}

fn check_item<R: Read + Seek>(parser: &AvifParser<R>, item_id: u32) -> Result<()> {
    if parser.has_unsupported_essential_properties(item_id) {
        return Err(Error::InvalidData("item has an essential property that is not supported"));
    }
    for (property, _) in parser.item_properties(item_id).filter(|(p, essential)| !essential && !p.is_supported()) {
        warn!("item {item_id}: ignoring non-essential {} property", property.box_type());
    }
    Ok(())
}

fn allocate_pixels(width: u32, height: u32, tracker: &ResourceTracker<'_>) -> Result<ImgVec<RGBA8>> {
    tracker.validate_total_megapixels(width, height)?;
    let count = u64::from(width) * u64::from(height);
    tracker.validate_allocation(byte_count::<RGBA8>(count))?;
    let count = usize::try_from(count)?;
    let mut pixels = std::vec::Vec::new();
    pixels.try_reserve_exact(count)?;
    pixels.resize(count, RGBA8::new(0, 0, 0, 255));
    Ok(ImgVec::new(pixels, count_to_usize(width), count_to_usize(height)))
}

/// One tile's compressed bytes, read ahead of decoding.
struct TileData {
    color: AvifItemData,
    alpha: Option<AvifItemData>,
}

fn read_tile<R: Read + Seek>(parser: &mut AvifParser<R>, color_id: u32, alpha_id: Option<u32>) -> Result<TileData> {
    let color = parser.read_item(color_id)?;
    let alpha = alpha_id.map(|id| parser.read_item(id)).transpose()?;
    Ok(TileData { color, alpha })
}

fn decompress_tile<R: Read + Seek, C: Av1Codec + ?Sized>(
    parser: &AvifParser<R>,
    codec: &C,
    data: &TileData,
    ids: (u32, Option<u32>),
    conversion: &ColorConversionInfo<'_>,
    output: ImgRefMut<'_, RGBA8>,
) -> Result<()> {
    let (color_id, alpha_id) = ids;
    let tile = EncodedTile {
        color: data.color.as_slice(),
        color_config: parser.av1_config(color_id),
        alpha: data.alpha.as_ref().map(AvifItemData::as_slice),
        alpha_config: alpha_id.and_then(|id| parser.av1_config(id)),
    };
    codec.decompress(&tile, conversion, output)?;
    Ok(())
}

/// Tiles of one grid must share size and format.
fn grid_tile_size<R: Read + Seek>(parser: &AvifParser<R>, grid: &ImageGridInfo) -> Result<(u32, u32)> {
    let mut tile_size = None;
    let mut format: Option<&AV1Config> = None;
    for &tile in grid.tile_item_ids.iter() {
        check_item(parser, tile)?;
        let ispe = parser
            .image_spatial_extents(tile)
            .ok_or(Error::InvalidData("grid tile has no ispe property"))?;
        match tile_size {
            None => tile_size = Some((ispe.width, ispe.height)),
            Some(size) if size != (ispe.width, ispe.height) => {
                return Err(Error::InvalidData("grid tiles have different sizes"));
            },
            Some(_) => {},
        }
        if let Some(config) = parser.av1_config(tile) {
            match format {
                None => format = Some(config),
                Some(first) if !first.same_format(config) => return Err(CodecError::TileFormatMismatch.into()),
                Some(_) => {},
            }
        }
    }
    tile_size.ok_or(Error::InvalidData("grid has no tiles"))
}

pub(crate) fn decode_parsed<R: Read + Seek, C: Av1Codec + ?Sized>(
    parser: &mut AvifParser<R>,
    codec: &C,
    stop: &dyn Stop,
) -> Result<DecodedImage> {
    let config = parser.config().clone();
    let tracker = ResourceTracker::new(&config);

    let primary = parser.primary_item_id();
    let primary_type = parser
        .item_info(primary)
        .map(|info| info.item_type)
        .ok_or(Error::InvalidData("primary item is not in iinf"))?;
    check_item(parser, primary)?;

    let alpha = parser.alpha_item_id(primary);
    if let Some(alpha) = alpha {
        check_item(parser, alpha)?;
    }
    let alpha_type = alpha.and_then(|id| parser.item_info(id)).map(|info| info.item_type);

    let color = parser.color_information(primary).map(TryClone::try_clone).transpose()?;
    let conversion = match &color {
        Some(ColorInformation::Nclx(cicp)) => ColorConversionInfo::Nclx(*cicp),
        Some(ColorInformation::Icc(profile)) => ColorConversionInfo::IccProfile(&profile[..]),
        None => ColorConversionInfo::Nclx(CicpColorData::SRGB),
    };

    let (pixels, grid) = if primary_type == AV01_ITEM {
        let ispe = parser
            .image_spatial_extents(primary)
            .ok_or(Error::InvalidData("image item has no ispe property"))?;
        if alpha_type.is_some_and(|t| t != AV01_ITEM) {
            return Err(Error::Unsupported("alpha item type does not match the color item"));
        }
        let mut pixels = allocate_pixels(ispe.width, ispe.height, &tracker)?;
        stop.check()?;
        let data = read_tile(parser, primary, alpha)?;
        decompress_tile(parser, codec, &data, (primary, alpha), &conversion, pixels.as_mut())?;
        (pixels, None)
    } else if primary_type == GRID_ITEM {
        let color_grid = parser.grid_info(primary)?;
        let alpha_grid = match (alpha, alpha_type) {
            (Some(alpha), Some(t)) if t == GRID_ITEM => {
                let alpha_grid = parser.grid_info(alpha)?;
                if alpha_grid.descriptor != color_grid.descriptor {
                    return Err(Error::InvalidData("alpha grid layout differs from the color grid"));
                }
                Some(alpha_grid)
            },
            (Some(_), _) => return Err(Error::Unsupported("a single alpha item for a grid image")),
            (None, _) => None,
        };

        let (tile_width, tile_height) = grid_tile_size(parser, &color_grid)?;
        if let Some(alpha_grid) = &alpha_grid {
            if grid_tile_size(parser, alpha_grid)? != (tile_width, tile_height) {
                return Err(Error::InvalidData("alpha tiles differ in size from color tiles"));
            }
        }
        let descriptor = color_grid.descriptor;
        let metadata = ImageGridMetadata::from_file_layout(
            descriptor.columns,
            descriptor.rows,
            descriptor.output_width,
            descriptor.output_height,
            tile_width,
            tile_height,
        )?;
        debug!("decoding {}x{} grid of {tile_width}x{tile_height} tiles", descriptor.columns, descriptor.rows);

        let mut pixels = allocate_pixels(descriptor.output_width, descriptor.output_height, &tracker)?;
        let mut scratch = allocate_pixels(tile_width, tile_height, &tracker)?;
        for (index, rect) in metadata.tile_rects().enumerate() {
            stop.check()?;
            let color_id = color_grid.tile_item_ids[index];
            let alpha_id = alpha_grid.as_ref().map(|g| g.tile_item_ids[index]);
            let data = read_tile(parser, color_id, alpha_id)?;
            decompress_tile(parser, codec, &data, (color_id, alpha_id), &conversion, scratch.as_mut())?;

            let mut dest = pixels.sub_image_mut(rect.x as usize, rect.y as usize, rect.width as usize, rect.height as usize);
            let width = dest.width();
            for (dest_row, tile_row) in dest.rows_mut().zip(scratch.as_ref().rows()) {
                dest_row.copy_from_slice(&tile_row[..width]);
            }
        }
        (pixels, Some(metadata))
    } else {
        return Err(Error::Unsupported("primary item is neither av01 nor grid"));
    };

    let premultiplied_alpha = alpha.is_some_and(|alpha| parser.premultiplied_alpha(primary, alpha));
    let transforms = parser.transforms(primary);
    let exif = parser.exif_item_id().map(|id| parser.read_item(id)).transpose()?;
    let xmp = parser.xmp_item_id().map(|id| parser.read_item(id)).transpose()?;

    Ok(DecodedImage {
        pixels,
        has_alpha: alpha.is_some(),
        premultiplied_alpha,
        grid,
        color,
        transforms,
        exif,
        xmp,
    })
}
