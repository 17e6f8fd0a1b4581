// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Container layout for encoded images: `ftyp`, then `meta` with the item
//! tables, then one `mdat` holding every stored payload.
//!
//! Grid descriptors go into `idat`. In `mdat` the alpha payloads come first,
//! then color, then Exif and XMP. Tiles sharing a payload share its extent.

use crate::boxes::{
    AUXL_REFERENCE, AV01_ITEM, BoxType, CDSC_REFERENCE, DIMG_REFERENCE, EXIF_ITEM, FourCC, GRID_ITEM, MIME_ITEM,
    PREM_REFERENCE,
};
use crate::codec::{CodecError, CompressedAv1Image};
use crate::grid::ImageGridMetadata;
use crate::meta::{ItemInfo, PropertyAssociation, write_infe};
use crate::parser::ImageTransforms;
use crate::properties::{
    ALPHA_URN, AV1Config, AuxiliaryType, ColorInformation, ImageSpatialExtents, ItemProperty, PixelInformation,
};
use crate::writer::BoxWriter;
use crate::{Error, Result, ToU64, TryVec};
use arrayvec::ArrayVec;
use fallible_collections::TryClone;
use log::debug;

const XMP_CONTENT_TYPE: &str = "application/rdf+xml";

/// ipma stores 7-bit property indices unless flags & 1 selects 15 bits.
const MAX_SHORT_PROPERTY_INDEX: usize = 127;
const MAX_PROPERTY_INDEX: usize = 0x7FFF;

/// The compressed tiles of one plane (color or alpha).
///
/// `payloads` holds each distinct compressed image once; `tiles` maps every
/// tile, in row-major order, to the payload it uses.
#[derive(Debug, Clone)]
pub struct ImageLayer<'a> {
    payloads: std::vec::Vec<&'a CompressedAv1Image>,
    tiles: std::vec::Vec<usize>,
}

impl<'a> ImageLayer<'a> {
    /// A layer of one image, without a grid.
    #[must_use]
    pub fn single(image: &'a CompressedAv1Image) -> Self {
        Self {
            payloads: vec![image],
            tiles: vec![0],
        }
    }

    /// A tiled layer. Every entry of `tiles` indexes `payloads`.
    #[must_use]
    pub fn new(payloads: std::vec::Vec<&'a CompressedAv1Image>, tiles: std::vec::Vec<usize>) -> Self {
        Self { payloads, tiles }
    }

    #[must_use]
    pub fn tile_count(&self) -> usize {
        self.tiles.len()
    }

    /// The shared configuration of all payloads. Tiles of a grid must agree
    /// on bit depth and chroma format.
    fn config(&self) -> Result<&'a AV1Config> {
        let first = self
            .payloads
            .first()
            .copied()
            .ok_or(Error::InvalidData("image layer has no payloads"))?;
        if self.payloads.iter().any(|p| !p.config.same_format(&first.config)) {
            return Err(CodecError::TileFormatMismatch.into());
        }
        if self.tiles.iter().any(|&i| i >= self.payloads.len()) {
            return Err(Error::InvalidData("tile refers to a missing payload"));
        }
        Ok(&first.config)
    }
}

/// Assembles an AVIF file from compressed payloads.
///
/// The primary item is always item 1: the `grid` item for tiled output, the
/// `av01` item otherwise.
pub struct AvifWriter<'a> {
    width: u32,
    height: u32,
    color: ImageLayer<'a>,
    alpha: Option<ImageLayer<'a>>,
    grid: Option<ImageGridMetadata>,
    color_information: Option<&'a ColorInformation>,
    transforms: ImageTransforms,
    premultiplied_alpha: bool,
    exif: Option<&'a [u8]>,
    xmp: Option<&'a [u8]>,
}

/// Where an item's single extent lives.
#[derive(Clone, Copy)]
enum Location {
    /// Byte range within the `idat` payload.
    Idat { offset: u64, length: u64 },
    /// Index into the `mdat` chunk list.
    Mdat(usize),
}

struct PropertyTable {
    properties: TryVec<ItemProperty>,
    associations: std::vec::Vec<(u32, std::vec::Vec<PropertyAssociation>)>,
}

impl PropertyTable {
    fn new() -> Self {
        Self {
            properties: TryVec::new(),
            associations: std::vec::Vec::new(),
        }
    }

    /// Adds a property and returns its 1-based index.
    fn add(&mut self, property: ItemProperty) -> Result<u16> {
        self.properties.push(property)?;
        if self.properties.len() > MAX_PROPERTY_INDEX {
            return Err(Error::Unsupported("too many item properties"));
        }
        Ok(u16::try_from(self.properties.len())?)
    }

    fn associate(&mut self, item_id: u32, property_index: u16, essential: bool) -> Result<()> {
        let association = PropertyAssociation {
            property_index,
            essential,
        };
        if let Some((_, list)) = self.associations.iter_mut().find(|(id, _)| *id == item_id) {
            list.try_reserve(1)?;
            list.push(association);
        } else {
            self.associations.try_reserve(1)?;
            self.associations.push((item_id, vec![association]));
        }
        Ok(())
    }
}

struct ItemEntry {
    info: ItemInfo,
    location: Location,
}

fn item_info(item_id: u32, item_type: FourCC, name: &str, hidden: bool) -> ItemInfo {
    ItemInfo {
        item_id,
        item_type,
        hidden,
        name: name.into(),
        content_type: None,
        content_encoding: None,
    }
}

fn pixi_for(config: &AV1Config) -> ItemProperty {
    let channels = if config.monochrome { 1 } else { 3 };
    let mut bits_per_channel: ArrayVec<u8, 16> = ArrayVec::new();
    bits_per_channel.extend(std::iter::repeat_n(config.bit_depth, channels));
    ItemProperty::PixelInformation(PixelInformation { bits_per_channel })
}

impl<'a> AvifWriter<'a> {
    #[must_use]
    pub fn new(width: u32, height: u32, color: ImageLayer<'a>) -> Self {
        Self {
            width,
            height,
            color,
            alpha: None,
            grid: None,
            color_information: None,
            transforms: ImageTransforms::default(),
            premultiplied_alpha: false,
            exif: None,
            xmp: None,
        }
    }

    /// Lays the layers out as this grid; both layers then need one tile per
    /// grid cell.
    #[must_use]
    pub fn with_grid(mut self, grid: ImageGridMetadata) -> Self {
        self.grid = Some(grid);
        self
    }

    #[must_use]
    pub fn with_alpha(mut self, alpha: ImageLayer<'a>) -> Self {
        self.alpha = Some(alpha);
        self
    }

    #[must_use]
    pub fn with_color_information(mut self, color: &'a ColorInformation) -> Self {
        self.color_information = Some(color);
        self
    }

    #[must_use]
    pub fn with_transforms(mut self, transforms: ImageTransforms) -> Self {
        self.transforms = transforms;
        self
    }

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

    fn check_layer(&self, layer: &ImageLayer<'_>) -> Result<()> {
        let expected = match &self.grid {
            Some(grid) => usize::try_from(grid.tile_count())?,
            None => 1,
        };
        if layer.tile_count() != expected {
            return Err(Error::InvalidData("tile count does not match the grid"));
        }
        Ok(())
    }

    /// Serializes the whole file.
    pub fn write(&self) -> Result<std::vec::Vec<u8>> {
        if self.width == 0 || self.height == 0 {
            return Err(Error::InvalidData("image dimensions cannot be zero"));
        }
        if let Some(grid) = &self.grid {
            if grid.image_width() != self.width || grid.image_height() != self.height {
                return Err(Error::InvalidData("grid does not match the image size"));
            }
        }
        self.check_layer(&self.color)?;
        if let Some(alpha) = &self.alpha {
            self.check_layer(alpha)?;
        }

        match self.write_with_offset_size(4)? {
            Some(data) => Ok(data),
            None => {
                debug!("mdat extends past 4 GiB, using 64-bit iloc offsets");
                self.write_with_offset_size(8)?
                    .ok_or(Error::Unsupported("file too large"))
            },
        }
    }

    /// `None` when an `mdat` offset does not fit `offset_size` bytes.
    fn write_with_offset_size(&self, offset_size: u8) -> Result<Option<std::vec::Vec<u8>>> {
        let mut items = std::vec::Vec::new();
        let mut references: std::vec::Vec<(FourCC, u32, std::vec::Vec<u32>)> = std::vec::Vec::new();
        let mut properties = PropertyTable::new();
        let mut chunks: std::vec::Vec<&[u8]> = std::vec::Vec::new();

        let mut idat = BoxWriter::new();
        let primary_item_id = 1;
        let mut next_item_id = primary_item_id;
        let mut allocate_id = || {
            let id = next_item_id;
            next_item_id += 1;
            id
        };

        let color_config = self.color.config()?;
        let full_ispe = properties.add(ItemProperty::ImageSpatialExtents(ImageSpatialExtents {
            width: self.width,
            height: self.height,
        }))?;
        let color_pixi = properties.add(pixi_for(color_config))?;
        let color_av1c = properties.add(ItemProperty::AV1Config(color_config.try_clone()?))?;
        let colr = match self.color_information {
            Some(colr) => Some(properties.add(ItemProperty::ColorInformation(colr.try_clone()?))?),
            None => None,
        };
        let mut transform_properties = ArrayVec::<u16, 3>::new();
        if let Some(clap) = self.transforms.clean_aperture {
            transform_properties.push(properties.add(ItemProperty::CleanAperture(clap))?);
        }
        if let Some(irot) = self.transforms.rotation {
            transform_properties.push(properties.add(ItemProperty::Rotation(irot))?);
        }
        if let Some(imir) = self.transforms.mirror {
            transform_properties.push(properties.add(ItemProperty::Mirror(imir))?);
        }
        let tile_ispe = match &self.grid {
            Some(grid) => Some(properties.add(ItemProperty::ImageSpatialExtents(ImageSpatialExtents {
                width: grid.tile_width(),
                height: grid.tile_height(),
            }))?),
            None => None,
        };

        // alpha payloads are stored first
        let alpha_chunks = match &self.alpha {
            Some(alpha) => {
                let first = chunks.len();
                chunks.extend(alpha.payloads.iter().map(|p| &p.data[..]));
                first
            },
            None => 0,
        };
        let color_chunks = chunks.len();
        chunks.extend(self.color.payloads.iter().map(|p| &p.data[..]));

        // color
        let primary = allocate_id();
        debug_assert_eq!(primary, primary_item_id);
        match &self.grid {
            Some(grid) => {
                let descriptor_start = idat.len();
                grid.descriptor().write(&mut idat)?;
                items.push(ItemEntry {
                    info: item_info(primary, GRID_ITEM, "Color", false),
                    location: Location::Idat {
                        offset: descriptor_start,
                        length: idat.len() - descriptor_start,
                    },
                });
                let mut tile_ids = std::vec::Vec::with_capacity(self.color.tiles.len());
                for &payload in &self.color.tiles {
                    let tile_id = allocate_id();
                    items.push(ItemEntry {
                        info: item_info(tile_id, AV01_ITEM, "Color", true),
                        location: Location::Mdat(color_chunks + payload),
                    });
                    if let Some(tile_ispe) = tile_ispe {
                        properties.associate(tile_id, tile_ispe, false)?;
                    }
                    properties.associate(tile_id, color_pixi, false)?;
                    properties.associate(tile_id, color_av1c, true)?;
                    tile_ids.push(tile_id);
                }
                references.push((DIMG_REFERENCE, primary, tile_ids));
            },
            None => {
                items.push(ItemEntry {
                    info: item_info(primary, AV01_ITEM, "Color", false),
                    location: Location::Mdat(color_chunks),
                });
                properties.associate(primary, color_av1c, true)?;
            },
        }
        properties.associate(primary, full_ispe, false)?;
        properties.associate(primary, color_pixi, false)?;
        if let Some(colr) = colr {
            properties.associate(primary, colr, false)?;
        }
        for &transform in &transform_properties {
            properties.associate(primary, transform, true)?;
        }

        // alpha
        if let Some(alpha) = &self.alpha {
            let alpha_config = alpha.config()?;
            let alpha_av1c = properties.add(ItemProperty::AV1Config(alpha_config.try_clone()?))?;
            let alpha_pixi = properties.add(pixi_for(alpha_config))?;
            let auxc = properties.add(ItemProperty::AuxiliaryType(AuxiliaryType {
                aux_type: ALPHA_URN.into(),
                subtype: TryVec::new(),
            }))?;

            let alpha_id = allocate_id();
            match &self.grid {
                Some(grid) => {
                    let descriptor_start = idat.len();
                    grid.descriptor().write(&mut idat)?;
                    items.push(ItemEntry {
                        info: item_info(alpha_id, GRID_ITEM, "Alpha", false),
                        location: Location::Idat {
                            offset: descriptor_start,
                            length: idat.len() - descriptor_start,
                        },
                    });
                    let mut tile_ids = std::vec::Vec::with_capacity(alpha.tiles.len());
                    for &payload in &alpha.tiles {
                        let tile_id = allocate_id();
                        items.push(ItemEntry {
                            info: item_info(tile_id, AV01_ITEM, "Alpha", true),
                            location: Location::Mdat(alpha_chunks + payload),
                        });
                        if let Some(tile_ispe) = tile_ispe {
                            properties.associate(tile_id, tile_ispe, false)?;
                        }
                        properties.associate(tile_id, alpha_pixi, false)?;
                        properties.associate(tile_id, alpha_av1c, true)?;
                        properties.associate(tile_id, auxc, true)?;
                        tile_ids.push(tile_id);
                    }
                    references.push((DIMG_REFERENCE, alpha_id, tile_ids));
                },
                None => {
                    items.push(ItemEntry {
                        info: item_info(alpha_id, AV01_ITEM, "Alpha", false),
                        location: Location::Mdat(alpha_chunks),
                    });
                    properties.associate(alpha_id, alpha_av1c, true)?;
                },
            }
            properties.associate(alpha_id, full_ispe, false)?;
            properties.associate(alpha_id, alpha_pixi, false)?;
            properties.associate(alpha_id, auxc, true)?;
            references.push((AUXL_REFERENCE, alpha_id, vec![primary]));
            if self.premultiplied_alpha {
                references.push((PREM_REFERENCE, primary, vec![alpha_id]));
            }
        }

        // metadata
        if let Some(exif) = self.exif {
            let exif_id = allocate_id();
            chunks.push(exif);
            items.push(ItemEntry {
                info: item_info(exif_id, EXIF_ITEM, "Exif", false),
                location: Location::Mdat(chunks.len() - 1),
            });
            references.push((CDSC_REFERENCE, exif_id, vec![primary]));
        }
        if let Some(xmp) = self.xmp {
            let xmp_id = allocate_id();
            chunks.push(xmp);
            let mut info = item_info(xmp_id, MIME_ITEM, "XMP", false);
            info.content_type = Some(XMP_CONTENT_TYPE.into());
            items.push(ItemEntry {
                info,
                location: Location::Mdat(chunks.len() - 1),
            });
            references.push((CDSC_REFERENCE, xmp_id, vec![primary]));
        }

        let last_item_id = next_item_id - 1;
        let large_ids = last_item_id > u32::from(u16::MAX);
        let idat = idat.into_inner()?;

        let mut w = BoxWriter::new();
        write_ftyp(&mut w)?;

        w.start_full_box(BoxType::MetadataBox, 0, 0)?;
        write_hdlr(&mut w)?;

        w.start_full_box(BoxType::PrimaryItemBox, 0, 0)?;
        w.write_u16(u16::try_from(primary)?)?;
        w.finish_box()?;

        let chunk_lengths: std::vec::Vec<u64> = chunks.iter().map(|c| c.len().to_u64()).collect();
        let patches = write_iloc(&mut w, &items, &chunk_lengths, offset_size, large_ids)?;

        if large_ids {
            w.start_full_box(BoxType::ItemInfoBox, 1, 0)?;
            w.write_u32(u32::try_from(items.len())?)?;
        } else {
            w.start_full_box(BoxType::ItemInfoBox, 0, 0)?;
            w.write_u16(u16::try_from(items.len())?)?;
        }
        for item in &items {
            write_infe(&mut w, &item.info)?;
        }
        w.finish_box()?;

        write_iref(&mut w, &references, large_ids)?;
        write_iprp(&mut w, &mut properties, large_ids)?;

        if !idat.is_empty() {
            w.start_box(BoxType::ItemDataBox)?;
            w.write_bytes(&idat)?;
            w.finish_box()?;
        }
        w.finish_box()?;

        let mdat_payload_len = chunk_lengths
            .iter()
            .try_fold(0u64, |sum, &len| sum.checked_add(len))
            .ok_or(Error::Unsupported("mdat size overflow"))?;
        let header_len = if mdat_payload_len.checked_add(8).is_some_and(|s| s <= u64::from(u32::MAX)) { 8 } else { 16 };
        let mdat_payload_start = w.len() + header_len;

        let mut chunk_offsets = std::vec::Vec::with_capacity(chunks.len());
        let mut offset = mdat_payload_start;
        for len in &chunk_lengths {
            chunk_offsets.push(offset);
            offset = offset.checked_add(*len).ok_or(Error::Unsupported("mdat size overflow"))?;
        }
        if offset_size == 4 && offset > u64::from(u32::MAX) {
            return Ok(None);
        }
        for (field, chunk) in patches {
            w.patch_sized_at(field, offset_size, chunk_offsets[chunk])?;
        }

        w.try_reserve(usize::try_from(mdat_payload_len.saturating_add(header_len))?)?;
        w.write_box_header(BoxType::MediaDataBox, mdat_payload_len)?;
        for chunk in &chunks {
            w.write_bytes(chunk)?;
        }
        debug!(
            "wrote {} items, {} properties, {mdat_payload_len} bytes of mdat",
            items.len(),
            properties.properties.len()
        );
        w.into_inner().map(Some)
    }
}

fn write_ftyp(w: &mut BoxWriter) -> Result<()> {
    w.start_box(BoxType::FileTypeBox)?;
    w.write_fourcc(FourCC(*b"avif"))?;
    w.write_u32(0)?; // minor version
    for brand in [b"avif", b"mif1", b"miaf"] {
        w.write_fourcc(FourCC(*brand))?;
    }
    w.finish_box()
}

fn write_hdlr(w: &mut BoxWriter) -> Result<()> {
    w.start_full_box(BoxType::HandlerBox, 0, 0)?;
    w.write_u32(0)?; // pre_defined
    w.write_fourcc(FourCC(*b"pict"))?;
    for _ in 0..3 {
        w.write_u32(0)?; // reserved
    }
    w.write_str_with_nul("")?;
    w.finish_box()
}

fn write_item_id(w: &mut BoxWriter, item_id: u32, large_ids: bool) -> Result<()> {
    if large_ids {
        w.write_u32(item_id)
    } else {
        w.write_u16(u16::try_from(item_id)?)
    }
}

/// Writes `iloc` with one extent per item. Returns the positions of the
/// `mdat` offset fields still to be filled in, with their chunk index.
fn write_iloc(
    w: &mut BoxWriter,
    items: &[ItemEntry],
    chunk_lengths: &[u64],
    offset_size: u8,
    large_ids: bool,
) -> Result<std::vec::Vec<(usize, usize)>> {
    let length_size: u8 = if chunk_lengths.iter().any(|&l| l > u64::from(u32::MAX)) { 8 } else { 4 };

    // version 2 only widens item ids and the item count
    w.start_full_box(BoxType::ItemLocationBox, if large_ids { 2 } else { 1 }, 0)?;
    w.write_u8(offset_size << 4 | length_size)?;
    w.write_u8(0)?; // base_offset_size, index_size
    if large_ids {
        w.write_u32(u32::try_from(items.len())?)?;
    } else {
        w.write_u16(u16::try_from(items.len())?)?;
    }

    let mut patches = std::vec::Vec::new();
    for item in items {
        write_item_id(w, item.info.item_id, large_ids)?;
        let method = match item.location {
            Location::Idat { .. } => 1,
            Location::Mdat(_) => 0,
        };
        w.write_u16(method)?;
        w.write_u16(0)?; // data_reference_index
        w.write_u16(1)?; // extent_count
        match item.location {
            Location::Idat { offset, length } => {
                w.write_sized(offset_size, offset)?;
                w.write_sized(length_size, length)?;
            },
            Location::Mdat(chunk) => {
                patches.try_reserve(1)?;
                patches.push((w.offset(), chunk));
                w.write_sized(offset_size, 0)?;
                w.write_sized(length_size, chunk_lengths[chunk])?;
            },
        }
    }
    w.finish_box()?;
    Ok(patches)
}

fn write_iref(w: &mut BoxWriter, references: &[(FourCC, u32, std::vec::Vec<u32>)], large_ids: bool) -> Result<()> {
    if references.is_empty() {
        return Ok(());
    }
    w.start_full_box(BoxType::ItemReferenceBox, u8::from(large_ids), 0)?;
    for (reference_type, from_item_id, to_item_ids) in references {
        w.start_box(BoxType::from(reference_type.to_u32()))?;
        write_item_id(w, *from_item_id, large_ids)?;
        w.write_u16(u16::try_from(to_item_ids.len()).map_err(|_| Error::InvalidData("more than 65535 references"))?)?;
        for &to_item_id in to_item_ids {
            write_item_id(w, to_item_id, large_ids)?;
        }
        w.finish_box()?;
    }
    w.finish_box()
}

fn write_iprp(w: &mut BoxWriter, properties: &mut PropertyTable, large_ids: bool) -> Result<()> {
    w.start_box(BoxType::ItemPropertiesBox)?;

    w.start_box(BoxType::ItemPropertyContainerBox)?;
    for property in properties.properties.iter() {
        property.write(w)?;
    }
    w.finish_box()?;

    let wide_indices = properties.properties.len() > MAX_SHORT_PROPERTY_INDEX;
    properties.associations.sort_by_key(|(item_id, _)| *item_id);
    w.start_full_box(BoxType::ItemPropertyAssociationBox, u8::from(large_ids), u32::from(wide_indices))?;
    w.write_u32(u32::try_from(properties.associations.len())?)?;
    for (item_id, associations) in &properties.associations {
        write_item_id(w, *item_id, large_ids)?;
        w.write_u8(u8::try_from(associations.len())?)?;
        for association in associations {
            if wide_indices {
                w.write_u16(u16::from(association.essential) << 15 | association.property_index)?;
            } else {
                w.write_u8(u8::from(association.essential) << 7 | u8::try_from(association.property_index)?)?;
            }
        }
    }
    w.finish_box()?;

    w.finish_box()
}
