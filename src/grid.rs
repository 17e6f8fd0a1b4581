// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Image grids: the `grid` item payload, the decode-side grid view, and the
//! encode-side tile planner.
//!
//! Tiles are always laid out row-major (top-to-bottom, then left-to-right),
//! which is also the order of the `dimg` references from the grid item.

use crate::codec::{ChromaSubsampling, CompressionSpeed, EncoderOptions};
use crate::writer::BoxWriter;
use crate::{Error, Result, TryVec};
use byteorder::{BigEndian, ReadBytesExt};
use log::debug;
use std::fmt;
use std::io::Cursor;
use std::str::FromStr;

/// An item reference box holds at most this many references.
pub const MAX_GRID_REFERENCES: u32 = 65535;

/// Rows and columns are stored minus one in a byte.
pub const MAX_GRID_AXIS: u32 = 256;

/// Upper bound on tiles the planner will produce.
pub const MAX_PLANNED_TILES: u32 = 250;

/// Smallest tile edge the planner will produce.
pub const MIN_TILE_SIZE: u32 = 64;

/// The payload of a `grid` item.
/// See ISO/IEC 23008-12:2017 § 6.6.2.3
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageGridDescriptor {
    pub rows: u32,
    pub columns: u32,
    pub output_width: u32,
    pub output_height: u32,
}

impl ImageGridDescriptor {
    #[must_use]
    pub fn tile_count(&self) -> u32 {
        self.rows.saturating_mul(self.columns)
    }

    fn validate(&self) -> Result<()> {
        if self.rows == 0 || self.columns == 0 || self.rows > MAX_GRID_AXIS || self.columns > MAX_GRID_AXIS {
            return Err(Error::InvalidData("grid rows and columns must be between 1 and 256"));
        }
        if self.tile_count() > MAX_GRID_REFERENCES {
            return Err(Error::InvalidData("grid needs more than 65535 item references"));
        }
        if self.output_width == 0 || self.output_height == 0 {
            return Err(Error::InvalidData("grid output dimensions cannot be zero"));
        }
        Ok(())
    }

    pub(crate) fn parse(data: &[u8]) -> Result<Self> {
        let mut src = Cursor::new(data);
        let version = src.read_u8()?;
        if version != 0 {
            return Err(Error::Unsupported("grid version > 0"));
        }

        // flags & 1 selects 32-bit output dimensions
        let flags = src.read_u8()?;
        let rows = u32::from(src.read_u8()?) + 1;
        let columns = u32::from(src.read_u8()?) + 1;
        let (output_width, output_height) = if flags & 1 == 0 {
            (
                u32::from(src.read_u16::<BigEndian>()?),
                u32::from(src.read_u16::<BigEndian>()?),
            )
        } else {
            (src.read_u32::<BigEndian>()?, src.read_u32::<BigEndian>()?)
        };

        if src.position() != data.len() as u64 {
            return Err(Error::InvalidData("trailing bytes after grid descriptor"));
        }

        let descriptor = Self {
            rows,
            columns,
            output_width,
            output_height,
        };
        descriptor.validate()?;
        Ok(descriptor)
    }

    pub(crate) fn write(&self, w: &mut BoxWriter) -> Result<()> {
        self.validate()?;
        let large = self.output_width > u32::from(u16::MAX) || self.output_height > u32::from(u16::MAX);
        w.write_u8(0)?; // version
        w.write_u8(u8::from(large))?;
        w.write_u8(u8::try_from(self.rows - 1)?)?;
        w.write_u8(u8::try_from(self.columns - 1)?)?;
        if large {
            w.write_u32(self.output_width)?;
            w.write_u32(self.output_height)?;
        } else {
            w.write_u16(u16::try_from(self.output_width)?)?;
            w.write_u16(u16::try_from(self.output_height)?)?;
        }
        Ok(())
    }
}

/// A grid item as found in a file: its descriptor plus the tile items from
/// its `dimg` references, in reference order.
#[derive(Debug)]
pub struct ImageGridInfo {
    pub descriptor: ImageGridDescriptor,
    pub tile_item_ids: TryVec<u32>,
}

impl ImageGridInfo {
    pub(crate) fn new(descriptor: ImageGridDescriptor, tile_item_ids: TryVec<u32>) -> Result<Self> {
        if tile_item_ids.len() as u64 > u64::from(MAX_GRID_REFERENCES) {
            return Err(Error::InvalidData("grid has more than 65535 dimg references"));
        }
        if tile_item_ids.len() as u64 != u64::from(descriptor.tile_count()) {
            return Err(Error::InvalidData("grid tile count does not match rows * columns"));
        }
        Ok(Self {
            descriptor,
            tile_item_ids,
        })
    }

    /// Tile item id at `row`, `column`.
    #[must_use]
    pub fn tile_at(&self, row: u32, column: u32) -> Option<u32> {
        if row >= self.descriptor.rows || column >= self.descriptor.columns {
            return None;
        }
        let index = usize::try_from(row * self.descriptor.columns + column).ok()?;
        self.tile_item_ids.get(index).copied()
    }
}

/// A tile window in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TileRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// The tile layout of an image, kept alongside a document so that later
/// saves can reuse the same tile boundaries.
///
/// Persisted as `"columns,rows,width,height,tileWidth,tileHeight"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageGridMetadata {
    tile_column_count: u32,
    tile_row_count: u32,
    image_width: u32,
    image_height: u32,
    tile_width: u32,
    tile_height: u32,
}

impl ImageGridMetadata {
    /// A layout the encoder can use: tiles divide the image exactly, edges are
    /// even and at least [`MIN_TILE_SIZE`], and there are at most
    /// [`MAX_PLANNED_TILES`] tiles.
    pub fn new(
        tile_column_count: u32,
        tile_row_count: u32,
        image_width: u32,
        image_height: u32,
        tile_width: u32,
        tile_height: u32,
    ) -> Result<Self> {
        let grid = Self::from_file_layout(
            tile_column_count,
            tile_row_count,
            image_width,
            image_height,
            tile_width,
            tile_height,
        )?;
        if u64::from(tile_column_count) * u64::from(tile_width) != u64::from(image_width)
            || u64::from(tile_row_count) * u64::from(tile_height) != u64::from(image_height)
        {
            return Err(Error::InvalidData("grid tiles must divide the image exactly"));
        }
        if tile_width % 2 != 0 || tile_height % 2 != 0 {
            return Err(Error::InvalidData("grid tile dimensions must be even"));
        }
        if tile_width < MIN_TILE_SIZE || tile_height < MIN_TILE_SIZE {
            return Err(Error::InvalidData("grid tiles must be at least 64 pixels on each side"));
        }
        if grid.tile_count() > MAX_PLANNED_TILES {
            return Err(Error::InvalidData("grid has more than 250 tiles"));
        }
        Ok(grid)
    }

    /// The layout of a grid read from a file. Tiles must cover the image,
    /// with only the last row and column allowed to overhang it.
    pub(crate) fn from_file_layout(
        tile_column_count: u32,
        tile_row_count: u32,
        image_width: u32,
        image_height: u32,
        tile_width: u32,
        tile_height: u32,
    ) -> Result<Self> {
        if tile_column_count == 0 || tile_row_count == 0 || tile_width == 0 || tile_height == 0 {
            return Err(Error::InvalidData("grid counts and tile sizes must be non-zero"));
        }
        if tile_column_count > MAX_GRID_AXIS || tile_row_count > MAX_GRID_AXIS {
            return Err(Error::InvalidData("grid rows and columns must be between 1 and 256"));
        }
        if !covers(tile_column_count, tile_width, image_width) || !covers(tile_row_count, tile_height, image_height) {
            return Err(Error::InvalidData("grid tiles do not cover the image"));
        }
        Ok(Self {
            tile_column_count,
            tile_row_count,
            image_width,
            image_height,
            tile_width,
            tile_height,
        })
    }

    #[must_use]
    pub fn tile_column_count(&self) -> u32 {
        self.tile_column_count
    }

    #[must_use]
    pub fn tile_row_count(&self) -> u32 {
        self.tile_row_count
    }

    #[must_use]
    pub fn image_width(&self) -> u32 {
        self.image_width
    }

    #[must_use]
    pub fn image_height(&self) -> u32 {
        self.image_height
    }

    #[must_use]
    pub fn tile_width(&self) -> u32 {
        self.tile_width
    }

    #[must_use]
    pub fn tile_height(&self) -> u32 {
        self.tile_height
    }

    #[must_use]
    pub fn tile_count(&self) -> u32 {
        self.tile_column_count * self.tile_row_count
    }

    #[must_use]
    pub fn descriptor(&self) -> ImageGridDescriptor {
        ImageGridDescriptor {
            rows: self.tile_row_count,
            columns: self.tile_column_count,
            output_width: self.image_width,
            output_height: self.image_height,
        }
    }

    /// Tile windows, row-major, clipped to the image.
    pub fn tile_rects(&self) -> impl Iterator<Item = TileRect> + '_ {
        (0..self.tile_row_count).flat_map(move |row| {
            (0..self.tile_column_count).map(move |column| {
                let x = column * self.tile_width;
                let y = row * self.tile_height;
                TileRect {
                    x,
                    y,
                    width: self.tile_width.min(self.image_width - x),
                    height: self.tile_height.min(self.image_height - y),
                }
            })
        })
    }

    /// Whether this layout can be reused for an image of this size with this
    /// chroma subsampling: tiles must divide the image exactly, keep the
    /// minimum tile size, and have even edges where chroma is subsampled.
    #[must_use]
    pub fn is_valid_for(&self, width: u32, height: u32, chroma: ChromaSubsampling) -> bool {
        let (subsampled_x, subsampled_y) = chroma.subsampling_xy();
        self.image_width == width
            && self.image_height == height
            && self.tile_count() > 1
            && self.tile_count() <= MAX_PLANNED_TILES
            && self.tile_column_count * self.tile_width == width
            && self.tile_row_count * self.tile_height == height
            && self.tile_width >= MIN_TILE_SIZE
            && self.tile_height >= MIN_TILE_SIZE
            && (!subsampled_x || self.tile_width % 2 == 0)
            && (!subsampled_y || self.tile_height % 2 == 0)
    }
}

fn covers(count: u32, tile: u32, length: u32) -> bool {
    let total = u64::from(count) * u64::from(tile);
    total >= u64::from(length) && total - u64::from(tile) < u64::from(length)
}

impl fmt::Display for ImageGridMetadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{},{},{}",
            self.tile_column_count,
            self.tile_row_count,
            self.image_width,
            self.image_height,
            self.tile_width,
            self.tile_height
        )
    }
}

impl FromStr for ImageGridMetadata {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut values = [0u32; 6];
        let mut parts = s.split(',');
        for value in &mut values {
            *value = parts
                .next()
                .and_then(|p| p.trim().parse().ok())
                .ok_or(Error::InvalidData("invalid grid metadata string"))?;
        }
        if parts.next().is_some() {
            return Err(Error::InvalidData("trailing fields in grid metadata string"));
        }
        let [columns, rows, width, height, tile_width, tile_height] = values;
        Self::new(columns, rows, width, height, tile_width, tile_height)
    }
}

/// Plans a tile grid for a `width` x `height` image, or returns `None` when
/// the image should be encoded as a single tile.
#[must_use]
pub fn plan_grid(width: u32, height: u32, speed: CompressionSpeed) -> Option<ImageGridMetadata> {
    let max_tile_size = speed.max_tile_size()?;

    let (mut columns, mut tile_width) = search_tile_count(width, max_tile_size);
    let square = width == height;
    let (mut rows, mut tile_height) = if square {
        (columns, tile_width)
    } else {
        search_tile_count(height, max_tile_size)
    };

    while columns * rows > MAX_PLANNED_TILES {
        if square {
            (columns, tile_width) = previous_tile_count(width, columns);
            (rows, tile_height) = (columns, tile_width);
        } else if columns >= rows {
            (columns, tile_width) = previous_tile_count(width, columns);
        } else {
            (rows, tile_height) = previous_tile_count(height, rows);
        }
    }

    if columns == 1 && rows == 1 {
        return None;
    }
    // an axis left whole must still make a usable tile edge
    match ImageGridMetadata::new(columns, rows, width, height, tile_width, tile_height) {
        Ok(grid) => {
            debug!("planned {columns}x{rows} grid of {tile_width}x{tile_height} tiles for {width}x{height}");
            Some(grid)
        }
        Err(e) => {
            debug!("no {columns}x{rows} grid for {width}x{height} ({e}), encoding a single tile");
            None
        }
    }
}

/// Picks the grid for an encode: a persisted grid when the options ask to
/// keep it and it still fits, otherwise a fresh plan.
#[must_use]
pub fn choose_grid(
    width: u32,
    height: u32,
    options: &EncoderOptions,
    existing: Option<&ImageGridMetadata>,
) -> Option<ImageGridMetadata> {
    if options.preserve_existing_tile_size {
        if let Some(existing) = existing {
            if existing.is_valid_for(width, height, options.chroma) {
                return Some(*existing);
            }
            debug!("persisted grid {existing} does not fit {width}x{height}, replanning");
        }
    }
    plan_grid(width, height, options.speed)
}

fn is_valid_split(length: u32, count: u32) -> bool {
    length % count == 0 && {
        let tile = length / count;
        tile % 2 == 0 && tile >= MIN_TILE_SIZE
    }
}

/// Smallest tile count whose tiles fit `max_tile_size`, or failing that the
/// largest valid count, along with the resulting tile size.
fn search_tile_count(length: u32, max_tile_size: u32) -> (u32, u32) {
    let mut best = (1, length);
    if length <= max_tile_size {
        return best;
    }
    for count in 2..=MAX_PLANNED_TILES {
        if is_valid_split(length, count) {
            best = (count, length / count);
            if best.1 <= max_tile_size {
                break;
            }
        }
    }
    best
}

/// The next valid tile count below `count`.
fn previous_tile_count(length: u32, count: u32) -> (u32, u32) {
    (2..count)
        .rev()
        .find(|&c| is_valid_split(length, c))
        .map_or((1, length), |c| (c, length / c))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fast_preset_splits_4032_into_8_columns() {
        let grid = plan_grid(4032, 3024, CompressionSpeed::Fast).unwrap();
        assert_eq!(grid.tile_column_count(), 8);
        assert_eq!(grid.tile_width(), 504);
        // 3024 = 6 * 504
        assert_eq!(grid.tile_row_count(), 6);
        assert_eq!(grid.tile_height(), 504);
    }

    #[test]
    fn square_images_get_square_grids() {
        let grid = plan_grid(2048, 2048, CompressionSpeed::Fast).unwrap();
        assert_eq!(grid.tile_column_count(), grid.tile_row_count());
        assert_eq!(grid.tile_width(), grid.tile_height());
        assert_eq!(grid.tile_column_count(), 4);
        assert_eq!(grid.tile_width(), 512);
    }

    #[test]
    fn small_or_very_slow_images_are_not_tiled() {
        assert!(plan_grid(500, 400, CompressionSpeed::Fast).is_none());
        assert!(plan_grid(8000, 8000, CompressionSpeed::VerySlow).is_none());
        // odd width has no valid split
        assert!(plan_grid(1001, 300, CompressionSpeed::Fast).is_none());
    }

    #[test]
    fn tile_cap_is_enforced() {
        // 16x16 tiles of 512 would be 256 tiles
        let grid = plan_grid(8192, 8192, CompressionSpeed::Fast).unwrap();
        assert!(grid.tile_count() <= MAX_PLANNED_TILES);
        assert_eq!(grid.tile_column_count(), grid.tile_row_count());
        assert_eq!(grid.tile_column_count() * grid.tile_width(), 8192);
    }

    #[test]
    fn no_candidate_below_max_keeps_best() {
        // 1031 is prime, so 2 is the only split with even tiles
        let (count, tile) = search_tile_count(4 * 1031, 512);
        assert_eq!((count, tile), (2, 2062));
    }

    #[test]
    fn tile_rects_are_row_major() {
        let grid = ImageGridMetadata::new(3, 2, 300, 200, 100, 100).unwrap();
        let rects: std::vec::Vec<_> = grid.tile_rects().collect();
        assert_eq!(rects.len(), 6);
        assert_eq!(rects[0], TileRect { x: 0, y: 0, width: 100, height: 100 });
        assert_eq!(rects[1], TileRect { x: 100, y: 0, width: 100, height: 100 });
        assert_eq!(rects[3], TileRect { x: 0, y: 100, width: 100, height: 100 });
        assert_eq!(rects[5], TileRect { x: 200, y: 100, width: 100, height: 100 });
    }

    #[test]
    fn file_layouts_may_overhang() {
        let grid = ImageGridMetadata::from_file_layout(2, 1, 150, 64, 100, 64).unwrap();
        let rects: std::vec::Vec<_> = grid.tile_rects().collect();
        assert_eq!(rects[1], TileRect { x: 100, y: 0, width: 50, height: 64 });
        assert!(ImageGridMetadata::from_file_layout(3, 1, 150, 64, 100, 64).is_err());
        assert!(ImageGridMetadata::from_file_layout(1, 1, 150, 64, 100, 64).is_err());
        // not usable for encoding
        assert!(ImageGridMetadata::new(2, 1, 150, 64, 100, 64).is_err());
    }

    #[test]
    fn encoder_layouts_divide_exactly() {
        assert!(ImageGridMetadata::new(2, 2, 256, 256, 128, 128).is_ok());
        assert!(ImageGridMetadata::new(2, 2, 258, 256, 128, 128).is_err());
        assert!(ImageGridMetadata::new(2, 2, 254, 256, 128, 128).is_err());
    }

    #[test]
    fn encoder_layouts_have_even_tiles() {
        assert!(ImageGridMetadata::new(2, 1, 258, 128, 129, 128).is_err());
        assert!(ImageGridMetadata::new(1, 2, 128, 258, 128, 129).is_err());
        assert!(ImageGridMetadata::new(2, 1, 260, 128, 130, 128).is_ok());
    }

    #[test]
    fn encoder_layouts_have_minimum_tile_size() {
        assert!(ImageGridMetadata::new(2, 1, 124, 64, 62, 64).is_err());
        assert!(ImageGridMetadata::new(2, 1, 128, 62, 64, 62).is_err());
        assert!(ImageGridMetadata::new(2, 1, 128, 64, 64, 64).is_ok());
    }

    #[test]
    fn encoder_layouts_have_at_most_250_tiles() {
        assert!(ImageGridMetadata::new(25, 10, 1600, 640, 64, 64).is_ok());
        assert!(ImageGridMetadata::new(21, 12, 1344, 768, 64, 64).is_err());
    }

    #[test]
    fn persisted_strings_must_be_encodable() {
        assert!("2,1,150,64,100,64".parse::<ImageGridMetadata>().is_err());
        assert!("1,1,33,33,33,33".parse::<ImageGridMetadata>().is_err());
        assert!("2,1,258,128,129,128".parse::<ImageGridMetadata>().is_err());
        assert!("2,1,124,64,62,64".parse::<ImageGridMetadata>().is_err());
        assert!("2,1,256,128,128,128".parse::<ImageGridMetadata>().is_ok());
    }

    #[test]
    fn unsplit_axis_must_be_a_valid_tile_edge() {
        // height splits into 8 rows of 504, width cannot be split
        assert!(plan_grid(501, 4032, CompressionSpeed::Fast).is_none());
        assert!(plan_grid(30, 4032, CompressionSpeed::Fast).is_none());
        assert!(plan_grid(4032, 31, CompressionSpeed::Fast).is_none());

        let grid = plan_grid(500, 4032, CompressionSpeed::Fast).unwrap();
        assert_eq!((grid.tile_column_count(), grid.tile_width()), (1, 500));
        assert_eq!((grid.tile_row_count(), grid.tile_height()), (8, 504));
    }

    #[test]
    fn planned_grids_keep_tile_invariants() {
        let sizes = [(4032, 3024), (2048, 2048), (8192, 8192), (500, 4032), (6000, 4000), (1920, 1080), (4096, 130)];
        for speed in [CompressionSpeed::Fast, CompressionSpeed::Medium, CompressionSpeed::Slow] {
            for (width, height) in sizes {
                let Some(grid) = plan_grid(width, height, speed) else {
                    continue;
                };
                assert_eq!(grid.tile_column_count() * grid.tile_width(), width);
                assert_eq!(grid.tile_row_count() * grid.tile_height(), height);
                assert_eq!(grid.tile_width() % 2, 0);
                assert_eq!(grid.tile_height() % 2, 0);
                assert!(grid.tile_width() >= MIN_TILE_SIZE && grid.tile_height() >= MIN_TILE_SIZE);
                assert!(grid.tile_count() > 1 && grid.tile_count() <= MAX_PLANNED_TILES);
            }
        }
    }

    #[test]
    fn persisted_string_form() {
        let grid = plan_grid(4032, 3024, CompressionSpeed::Fast).unwrap();
        let s = grid.to_string();
        assert_eq!(s, "8,6,4032,3024,504,504");
        assert_eq!(s.parse::<ImageGridMetadata>().unwrap(), grid);
        assert!("8,6,4032,3024,504".parse::<ImageGridMetadata>().is_err());
        assert!("8,6,4032,3024,504,504,1".parse::<ImageGridMetadata>().is_err());
        assert!("8,6,4032,3024,x,504".parse::<ImageGridMetadata>().is_err());
    }

    #[test]
    fn reuse_requires_matching_dimensions_and_chroma() {
        let grid = ImageGridMetadata::new(2, 2, 260, 200, 130, 100).unwrap();
        assert!(grid.is_valid_for(260, 200, ChromaSubsampling::Yuv420));
        assert!(!grid.is_valid_for(262, 200, ChromaSubsampling::Yuv420));

        let odd = ImageGridMetadata::from_file_layout(2, 2, 258, 200, 129, 100).unwrap();
        assert!(!odd.is_valid_for(258, 200, ChromaSubsampling::Yuv420));
        assert!(!odd.is_valid_for(258, 200, ChromaSubsampling::Yuv422));
        assert!(odd.is_valid_for(258, 200, ChromaSubsampling::Yuv444));

        let options = EncoderOptions::default()
            .with_speed(CompressionSpeed::Fast)
            .with_preserve_existing_tile_size(true);
        assert_eq!(choose_grid(260, 200, &options, Some(&grid)), Some(grid));
        // does not fit: replanned, and 262x200 is a single tile at this speed
        assert_eq!(choose_grid(262, 200, &options, Some(&grid)), None);
        let fresh = options.clone().with_preserve_existing_tile_size(false);
        assert_eq!(choose_grid(260, 200, &fresh, Some(&grid)), None);
    }

    #[test]
    fn descriptor_field_widths() {
        let small = ImageGridDescriptor {
            rows: 2,
            columns: 3,
            output_width: 300,
            output_height: 200,
        };
        let mut w = BoxWriter::new();
        small.write(&mut w).unwrap();
        let bytes = w.into_inner().unwrap();
        assert_eq!(bytes, [0, 0, 1, 2, 1, 44, 0, 200]);
        assert_eq!(ImageGridDescriptor::parse(&bytes).unwrap(), small);

        let large = ImageGridDescriptor {
            output_width: 70_000,
            ..small
        };
        let mut w = BoxWriter::new();
        large.write(&mut w).unwrap();
        let bytes = w.into_inner().unwrap();
        assert_eq!(bytes.len(), 12);
        assert_eq!(bytes[1], 1);
        assert_eq!(ImageGridDescriptor::parse(&bytes).unwrap(), large);
    }

    #[test]
    fn descriptor_reference_cap() {
        // 256 x 256 = 65536 tiles cannot be referenced from one iref entry
        let bytes = [0, 0, 255, 255, 0x10, 0, 0x10, 0];
        assert!(matches!(ImageGridDescriptor::parse(&bytes), Err(Error::InvalidData(_))));
        let too_many = ImageGridDescriptor {
            rows: 256,
            columns: 256,
            output_width: 4096,
            output_height: 4096,
        };
        assert!(too_many.write(&mut BoxWriter::new()).is_err());
        let ok = [0, 0, 255, 254, 0x10, 0, 0x10, 0];
        assert_eq!(ImageGridDescriptor::parse(&ok).unwrap().tile_count(), 65280);
    }

    #[test]
    fn grid_info_checks_tile_count() {
        let descriptor = ImageGridDescriptor {
            rows: 2,
            columns: 2,
            output_width: 128,
            output_height: 128,
        };
        let ids: TryVec<u32> = std::vec![2, 3, 4].into();
        assert!(ImageGridInfo::new(descriptor, ids).is_err());
        let ids: TryVec<u32> = std::vec![2, 3, 4, 5].into();
        let info = ImageGridInfo::new(descriptor, ids).unwrap();
        assert_eq!(info.tile_at(1, 0), Some(4));
        assert_eq!(info.tile_at(2, 0), None);
    }
}
