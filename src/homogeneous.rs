// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Finding flat tiles so that identical ones are compressed once.

use crate::grid::TileRect;
use imgref::ImgRef;
use rgb::RGBA8;
use std::collections::{BTreeMap, HashMap};

/// Pixels are compared as packed BGRA words under one of these masks.
const COLOR_MASK: u32 = 0x00FF_FFFF;
const ALPHA_MASK: u32 = 0xFF00_0000;

/// Tiles whose compressed payload can be taken from an earlier tile.
///
/// Each map goes from a tile index to the index of the first tile with the
/// same flat value. The color map ignores alpha; the alpha map ignores color.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct HomogeneousTileInfo {
    pub duplicate_color_tile_map: BTreeMap<usize, usize>,
    pub duplicate_alpha_tile_map: BTreeMap<usize, usize>,
}

impl HomogeneousTileInfo {
    /// Index of the tile whose color payload `tile` reuses.
    #[must_use]
    pub fn color_source(&self, tile: usize) -> Option<usize> {
        self.duplicate_color_tile_map.get(&tile).copied()
    }

    #[must_use]
    pub fn alpha_source(&self, tile: usize) -> Option<usize> {
        self.duplicate_alpha_tile_map.get(&tile).copied()
    }
}

#[inline]
fn pack_bgra(px: RGBA8) -> u32 {
    u32::from_le_bytes([px.b, px.g, px.r, px.a])
}

/// The masked value shared by every pixel of `tile`, if there is one.
fn homogeneous_value(tile: ImgRef<'_, RGBA8>, mask: u32) -> Option<u32> {
    let first = pack_bgra(*tile.rows().next()?.first()?) & mask;
    tile.rows()
        .all(|row| row.iter().all(|&px| pack_bgra(px) & mask == first))
        .then_some(first)
}

/// Scans every tile of `image`. Only meaningful with more than one tile;
/// a single tile yields empty maps. `has_alpha` enables the alpha map.
#[must_use]
pub fn detect_homogeneous_tiles(image: ImgRef<'_, RGBA8>, tiles: &[TileRect], has_alpha: bool) -> HomogeneousTileInfo {
    let mut info = HomogeneousTileInfo::default();
    if tiles.len() <= 1 {
        return info;
    }

    let mut first_color_tile = HashMap::new();
    let mut first_alpha_tile = HashMap::new();
    for (index, rect) in tiles.iter().enumerate() {
        let tile = image.sub_image(rect.x as usize, rect.y as usize, rect.width as usize, rect.height as usize);
        if let Some(value) = homogeneous_value(tile, COLOR_MASK) {
            let first = *first_color_tile.entry(value).or_insert(index);
            if first != index {
                info.duplicate_color_tile_map.insert(index, first);
            }
        }
        if has_alpha {
            if let Some(value) = homogeneous_value(tile, ALPHA_MASK) {
                let first = *first_alpha_tile.entry(value).or_insert(index);
                if first != index {
                    info.duplicate_alpha_tile_map.insert(index, first);
                }
            }
        }
    }
    info
}

#[cfg(test)]
mod tests {
    use super::*;
    use imgref::{Img, ImgVec};

    fn two_tiles(left: RGBA8, right: RGBA8) -> (ImgVec<RGBA8>, [TileRect; 2]) {
        let mut pixels = std::vec::Vec::new();
        for _ in 0..4 {
            pixels.extend([left; 4]);
            pixels.extend([right; 4]);
        }
        let tiles = [
            TileRect { x: 0, y: 0, width: 4, height: 4 },
            TileRect { x: 4, y: 0, width: 4, height: 4 },
        ];
        (Img::new(pixels, 8, 4), tiles)
    }

    #[test]
    fn same_color_different_alpha_is_a_color_duplicate() {
        let (image, tiles) = two_tiles(RGBA8::new(10, 20, 30, 255), RGBA8::new(10, 20, 30, 7));
        let info = detect_homogeneous_tiles(image.as_ref(), &tiles, true);
        assert_eq!(info.color_source(1), Some(0));
        assert_eq!(info.alpha_source(1), None);
    }

    #[test]
    fn one_differing_pixel_prevents_dedup() {
        let (mut image, tiles) = two_tiles(RGBA8::new(10, 20, 30, 255), RGBA8::new(10, 20, 30, 255));
        let info = detect_homogeneous_tiles(image.as_ref(), &tiles, true);
        assert_eq!(info.color_source(1), Some(0));
        assert_eq!(info.alpha_source(1), Some(0));

        image[(7u32, 3u32)] = RGBA8::new(10, 20, 31, 255);
        let info = detect_homogeneous_tiles(image.as_ref(), &tiles, true);
        assert_eq!(info.color_source(1), None);
        assert_eq!(info.alpha_source(1), Some(0));
    }

    #[test]
    fn alpha_map_only_with_alpha() {
        let (image, tiles) = two_tiles(RGBA8::new(1, 2, 3, 255), RGBA8::new(9, 9, 9, 255));
        let info = detect_homogeneous_tiles(image.as_ref(), &tiles, false);
        assert!(info.duplicate_alpha_tile_map.is_empty());
        assert!(info.duplicate_color_tile_map.is_empty());
    }

    #[test]
    fn single_tile_has_no_duplicates() {
        let (image, tiles) = two_tiles(RGBA8::new(1, 2, 3, 255), RGBA8::new(1, 2, 3, 255));
        let whole = [TileRect { x: 0, y: 0, width: 8, height: 4 }];
        assert_eq!(detect_homogeneous_tiles(image.as_ref(), &whole, true), HomogeneousTileInfo::default());
        assert_eq!(detect_homogeneous_tiles(image.as_ref(), &tiles, true).color_source(1), Some(0));
    }
}
