// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::boxes::{
    AUXL_REFERENCE, AV01_ITEM, BoxType, CDSC_REFERENCE, DIMG_REFERENCE, EXIF_ITEM, FourCC, GRID_ITEM, MIME_ITEM,
    PREM_REFERENCE,
};
use crate::extents::{self, AvifItemData};
use crate::grid::{ImageGridDescriptor, ImageGridInfo};
use crate::meta::{
    Extent, FileTypeBox, ItemDataBox, ItemInfo, ItemLocationEntry, ItemPropertiesBox, ItemReference, MetaBox,
    PropertyAssociation, read_ftyp, read_meta,
};
use crate::properties::{
    AV1Config, AuxiliaryType, CleanAperture, ColorInformation, ImageMirror, ImageRotation, ImageSpatialExtents,
    ItemProperty, PixelAspectRatio, PixelInformation,
};
use crate::reader::{AvifReader, check_parser_state, skip_box_content};
use crate::{DecodeConfig, Error, ResourceTracker, Result, TryVec};
use enough::{Stop, Unstoppable};
use log::{debug, warn};
use std::io::{Cursor, Read, Seek};

const XMP_CONTENT_TYPE: &str = "application/rdf+xml";

/// The transformative properties of one item, to be applied by the host
/// after decoding in the order clean aperture, rotation, mirror.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImageTransforms {
    pub clean_aperture: Option<CleanAperture>,
    pub rotation: Option<ImageRotation>,
    pub mirror: Option<ImageMirror>,
}

impl ImageTransforms {
    #[must_use]
    pub fn is_identity(&self) -> bool {
        self.clean_aperture.is_none() && self.rotation.is_none() && self.mirror.is_none()
    }
}

/// Parsed AVIF container over a seekable stream.
///
/// Construction walks the whole box tree and validates the item tables;
/// item payloads stay in the stream until [`read_item`](Self::read_item)
/// or [`grid_info`](Self::grid_info) asks for them.
///
/// ```no_run
/// use avif_container::AvifParser;
///
/// let file = std::fs::File::open("image.avif")?;
/// let mut parser = AvifParser::from_reader(file)?;
/// let primary = parser.primary_item_id();
/// let bytes = parser.read_item(primary)?;
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub struct AvifParser<R> {
    reader: AvifReader<R>,
    config: DecodeConfig,
    file_type: FileTypeBox,
    primary_item_id: u32,
    item_infos: TryVec<ItemInfo>,
    item_locations: TryVec<ItemLocationEntry>,
    item_references: TryVec<ItemReference>,
    properties: ItemPropertiesBox,
    idat: Option<ItemDataBox>,
}

impl<'data> AvifParser<Cursor<&'data [u8]>> {
    /// Parse AVIF from a borrowed byte slice.
    pub fn from_bytes(data: &'data [u8]) -> Result<Self> {
        Self::from_reader(Cursor::new(data))
    }
}

impl AvifParser<Cursor<std::vec::Vec<u8>>> {
    /// Parse AVIF from an owned buffer.
    pub fn from_owned(data: std::vec::Vec<u8>) -> Result<Self> {
        Self::from_reader(Cursor::new(data))
    }
}

impl<R: Read + Seek> AvifParser<R> {
    // ========================================
    // Constructors
    // ========================================

    /// Parse AVIF from a seekable reader, without resource limits.
    pub fn from_reader(reader: R) -> Result<Self> {
        Self::from_reader_with_config(reader, &DecodeConfig::unlimited(), &Unstoppable)
    }

    /// Parse AVIF from a seekable reader with resource limits.
    ///
    /// `stop` is checked between boxes of the top level and of `meta`.
    pub fn from_reader_with_config(reader: R, config: &DecodeConfig, stop: &dyn Stop) -> Result<Self> {
        let mut reader = AvifReader::new(reader)?;
        let (file_type, meta) = Self::parse_boxes(&mut reader, config, stop)?;

        if !file_type.is_avif_compatible() {
            return Err(Error::InvalidData("ftyp has no AVIF brand"));
        }

        let MetaBox {
            handler_type,
            primary_item_id,
            item_infos,
            item_locations,
            item_references,
            properties,
            idat,
        } = meta;

        if handler_type.is_none() {
            debug!("meta has no hdlr box");
        }
        let item_infos = item_infos.ok_or(Error::InvalidData("meta box has no iinf box"))?;
        let item_locations = item_locations.ok_or(Error::InvalidData("meta box has no iloc box"))?;
        let properties = properties.ok_or(Error::InvalidData("meta box has no iprp box"))?;

        // ISO 23008-12:2017 § 9.3.1: without pitm, item 1 is primary
        let primary_item_id = primary_item_id.unwrap_or(1);

        let parser = Self {
            reader,
            config: config.clone(),
            file_type,
            primary_item_id,
            item_infos,
            item_locations,
            item_references,
            properties,
            idat,
        };
        parser.validate_items()?;
        Ok(parser)
    }

    /// The top-level walk: exactly one `ftyp` and one `meta`, anything else
    /// skipped.
    fn parse_boxes(
        reader: &mut AvifReader<R>,
        config: &DecodeConfig,
        stop: &dyn Stop,
    ) -> Result<(FileTypeBox, MetaBox)> {
        let mut file_type = None;
        let mut meta = None;

        let mut file = reader.segment();
        while let Some(mut b) = file.next_box()? {
            stop.check()?;

            match b.head.name {
                BoxType::FileTypeBox => {
                    if file_type.is_some() {
                        return Err(Error::InvalidData("there should be exactly one ftyp box"));
                    }
                    file_type = Some(read_ftyp(&mut b.content)?);
                },
                BoxType::MetadataBox => {
                    if meta.is_some() {
                        return Err(Error::InvalidData(
                            "There should be zero or one meta boxes per ISO 14496-12:2015 § 8.11.1.1",
                        ));
                    }
                    meta = Some(read_meta(&mut b.content, config, stop)?);
                },
                _ => {
                    debug!("skipping top-level {} box", b.head.name);
                    skip_box_content(&mut b)?;
                },
            }

            check_parser_state(&b)?;
        }

        let file_type = file_type.ok_or(Error::InvalidData("missing ftyp box"))?;
        let meta = meta.ok_or(Error::InvalidData("missing meta box"))?;
        Ok((file_type, meta))
    }

    /// Cross-table checks that need all of `meta` at once.
    fn validate_items(&self) -> Result<()> {
        if self.item_info(self.primary_item_id).is_none() {
            return Err(Error::InvalidData("primary item is not in iinf"));
        }

        for reference in self.item_references.iter() {
            let known = std::iter::once(&reference.from_item_id)
                .chain(reference.to_item_ids.iter())
                .all(|&id| self.item_info(id).is_some());
            if !known {
                debug!("{} reference from item {} to unknown item", reference.reference_type, reference.from_item_id);
                return Err(Error::InvalidData("item reference to a nonexistent item"));
            }
        }

        for location in self.item_locations.iter() {
            if self.item_locations.iter().filter(|l| l.item_id == location.item_id).count() > 1 {
                return Err(Error::InvalidData("item has more than one iloc entry"));
            }
        }
        Ok(())
    }

    // ========================================
    // Items and references
    // ========================================

    /// From `pitm`, or 1 when the file has no `pitm` box.
    #[must_use]
    pub fn primary_item_id(&self) -> u32 {
        self.primary_item_id
    }

    #[must_use]
    pub fn major_brand(&self) -> FourCC {
        self.file_type.major_brand
    }

    #[must_use]
    pub fn compatible_brands(&self) -> &[FourCC] {
        &self.file_type.compatible_brands
    }

    /// All `infe` entries in file order.
    #[must_use]
    pub fn items(&self) -> &[ItemInfo] {
        &self.item_infos
    }

    #[must_use]
    pub fn item_info(&self, item_id: u32) -> Option<&ItemInfo> {
        self.item_infos.iter().find(|info| info.item_id == item_id)
    }

    #[must_use]
    pub fn item_location(&self, item_id: u32) -> Option<&ItemLocationEntry> {
        self.item_locations.iter().find(|loc| loc.item_id == item_id)
    }

    #[must_use]
    pub fn item_references(&self) -> &[ItemReference] {
        &self.item_references
    }

    /// Targets of all `reference_type` references from `from_item_id`, in
    /// declared order.
    pub fn references(&self, from_item_id: u32, reference_type: FourCC) -> impl Iterator<Item = u32> + '_ {
        self.item_references
            .iter()
            .filter(move |r| r.from_item_id == from_item_id && r.reference_type == reference_type)
            .flat_map(|r| r.to_item_ids.iter().copied())
    }

    /// Items with a `reference_type` reference pointing at `to_item_id`.
    fn referring_items(&self, to_item_id: u32, reference_type: FourCC) -> impl Iterator<Item = u32> + '_ {
        self.item_references
            .iter()
            .filter(move |r| {
                r.reference_type == reference_type && r.from_item_id != to_item_id && r.to_item_ids.contains(&to_item_id)
            })
            .map(|r| r.from_item_id)
    }

    /// The alpha plane of `primary_item_id`: an item with an `auxl` reference
    /// to it whose `auxC` names one of the alpha URNs.
    #[must_use]
    pub fn alpha_item_id(&self, primary_item_id: u32) -> Option<u32> {
        self.referring_items(primary_item_id, AUXL_REFERENCE)
            .find(|&id| self.auxiliary_type(id).is_some_and(AuxiliaryType::is_alpha))
    }

    /// Whether the color of `primary_item_id` is premultiplied by `alpha_item_id`.
    #[must_use]
    pub fn premultiplied_alpha(&self, primary_item_id: u32, alpha_item_id: u32) -> bool {
        self.references(primary_item_id, PREM_REFERENCE).any(|id| id == alpha_item_id)
    }

    /// The Exif item describing the primary item, if any.
    #[must_use]
    pub fn exif_item_id(&self) -> Option<u32> {
        self.referring_items(self.primary_item_id, CDSC_REFERENCE)
            .find(|&id| self.item_info(id).is_some_and(|info| info.item_type == EXIF_ITEM))
    }

    /// The XMP item (a `mime` item of type `application/rdf+xml`)
    /// describing the primary item, if any.
    #[must_use]
    pub fn xmp_item_id(&self) -> Option<u32> {
        self.referring_items(self.primary_item_id, CDSC_REFERENCE).find(|&id| {
            self.item_info(id)
                .is_some_and(|info| info.item_type == MIME_ITEM && info.content_type.as_deref() == Some(XMP_CONTENT_TYPE))
        })
    }

    #[must_use]
    pub fn exif_location(&self) -> Option<&ItemLocationEntry> {
        self.exif_item_id().and_then(|id| self.item_location(id))
    }

    #[must_use]
    pub fn xmp_location(&self) -> Option<&ItemLocationEntry> {
        self.xmp_item_id().and_then(|id| self.item_location(id))
    }

    // ========================================
    // Properties
    // ========================================

    /// The `ipma` associations of `item_id`, in declared order.
    pub fn property_associations(&self, item_id: u32) -> impl Iterator<Item = PropertyAssociation> + '_ {
        self.properties
            .associations
            .iter()
            .filter(move |a| a.item_id == item_id)
            .flat_map(|a| a.associations.iter().copied())
    }

    /// Looks up a property by its 1-based `ipco` index.
    #[must_use]
    pub fn property(&self, property_index: u16) -> Option<&ItemProperty> {
        let index = usize::from(property_index).checked_sub(1)?;
        self.properties.properties.get(index)
    }

    /// The properties associated with `item_id` with their essential flag.
    /// Associations with an index of 0 or past the end of `ipco` are left out.
    pub fn item_properties(&self, item_id: u32) -> impl Iterator<Item = (&ItemProperty, bool)> + '_ {
        self.property_associations(item_id)
            .filter_map(|a| self.property(a.property_index).map(|p| (p, a.essential)))
    }

    /// An essential association this crate cannot honor: an uninterpreted
    /// property, or an index that names no property.
    #[must_use]
    pub fn has_unsupported_essential_properties(&self, item_id: u32) -> bool {
        self.property_associations(item_id)
            .filter(|a| a.essential && a.property_index != 0)
            .any(|a| self.property(a.property_index).is_none_or(|p| !p.is_supported()))
    }

    fn find_property<'a, T: 'a>(&'a self, item_id: u32, select: impl Fn(&'a ItemProperty) -> Option<T>) -> Option<T> {
        self.item_properties(item_id).find_map(|(p, _)| select(p))
    }

    #[must_use]
    pub fn image_spatial_extents(&self, item_id: u32) -> Option<ImageSpatialExtents> {
        self.find_property(item_id, |p| match p {
            ItemProperty::ImageSpatialExtents(ispe) => Some(*ispe),
            _ => None,
        })
    }

    #[must_use]
    pub fn pixel_aspect_ratio(&self, item_id: u32) -> Option<PixelAspectRatio> {
        self.find_property(item_id, |p| match p {
            ItemProperty::PixelAspectRatio(pasp) => Some(*pasp),
            _ => None,
        })
    }

    #[must_use]
    pub fn av1_config(&self, item_id: u32) -> Option<&AV1Config> {
        self.find_property(item_id, |p| match p {
            ItemProperty::AV1Config(av1c) => Some(av1c),
            _ => None,
        })
    }

    #[must_use]
    pub fn pixel_information(&self, item_id: u32) -> Option<&PixelInformation> {
        self.find_property(item_id, |p| match p {
            ItemProperty::PixelInformation(pixi) => Some(pixi),
            _ => None,
        })
    }

    /// The `nclx` color description if there is one, else the first ICC profile.
    #[must_use]
    pub fn color_information(&self, item_id: u32) -> Option<&ColorInformation> {
        let colors = || {
            self.item_properties(item_id).filter_map(|(p, _)| match p {
                ItemProperty::ColorInformation(colr) => Some(colr),
                _ => None,
            })
        };
        colors()
            .find(|c| matches!(c, ColorInformation::Nclx(_)))
            .or_else(|| colors().next())
    }

    #[must_use]
    pub fn auxiliary_type(&self, item_id: u32) -> Option<&AuxiliaryType> {
        self.find_property(item_id, |p| match p {
            ItemProperty::AuxiliaryType(auxc) => Some(auxc),
            _ => None,
        })
    }

    /// `clap`, `irot` and `imir` of `item_id`. A repeated property replaces
    /// the earlier one.
    #[must_use]
    pub fn transforms(&self, item_id: u32) -> ImageTransforms {
        let mut transforms = ImageTransforms::default();
        for (property, _) in self.item_properties(item_id).filter(|(p, _)| p.is_transform()) {
            let replaced = match property {
                ItemProperty::CleanAperture(clap) => transforms.clean_aperture.replace(*clap).is_some(),
                ItemProperty::Rotation(irot) => transforms.rotation.replace(*irot).is_some(),
                ItemProperty::Mirror(imir) => transforms.mirror.replace(*imir).is_some(),
                _ => false,
            };
            if replaced {
                warn!("item {item_id} has more than one {} property; using the last", property.box_type());
            }
        }
        transforms
    }

    // ========================================
    // Item data
    // ========================================

    /// Absolute file offset of one extent of `entry`; see
    /// [`ItemLocationEntry`]. Fails rather than return an offset whose
    /// extent would end past the file or the `idat` box.
    pub fn calculate_extent_offset(&self, entry: &ItemLocationEntry, extent: &Extent) -> Result<u64> {
        extents::calculate_extent_offset(
            entry.base_offset,
            entry.construction_method,
            extent,
            self.reader.length(),
            self.idat.as_ref(),
        )
    }

    /// Reads all extents of `item_id` into one buffer.
    pub fn read_item(&mut self, item_id: u32) -> Result<AvifItemData> {
        let entry = self
            .item_locations
            .iter()
            .find(|loc| loc.item_id == item_id)
            .ok_or(Error::InvalidData("item has no iloc entry"))?;
        let tracker = ResourceTracker::new(&self.config);
        extents::read_item_data(&mut self.reader, entry, self.idat.as_ref(), &tracker)
    }

    /// Reads the grid descriptor of `item_id` and resolves its tiles from
    /// the `dimg` references, in reference order.
    pub fn grid_info(&mut self, item_id: u32) -> Result<ImageGridInfo> {
        let info = self.item_info(item_id).ok_or(Error::InvalidData("grid item is not in iinf"))?;
        if info.item_type != GRID_ITEM {
            return Err(Error::InvalidData("item is not a grid"));
        }

        let data = self.read_item(item_id)?;
        let descriptor = data.with_bytes(ImageGridDescriptor::parse)?;

        let tracker = ResourceTracker::new(&self.config);
        tracker.validate_grid_tiles(descriptor.tile_count())?;
        tracker.validate_total_megapixels(descriptor.output_width, descriptor.output_height)?;

        let mut tile_item_ids = TryVec::new();
        for tile in self.references(item_id, DIMG_REFERENCE) {
            if !self.item_info(tile).is_some_and(|info| info.item_type == AV01_ITEM) {
                return Err(Error::InvalidData("grid tile is not an av01 item"));
            }
            tile_item_ids.push(tile)?;
        }
        debug!(
            "grid item {item_id}: {}x{} tiles, {}x{} output",
            descriptor.columns, descriptor.rows, descriptor.output_width, descriptor.output_height
        );
        ImageGridInfo::new(descriptor, tile_item_ids)
    }

    pub(crate) fn config(&self) -> &DecodeConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::CicpColorData;
    use crate::meta::write_infe;
    use crate::properties::ALPHA_URN_HEVC;
    use crate::writer::BoxWriter;

    // File layout: ftyp (24 bytes), mdat, then meta; mdat payload starts at 32.
    const MDAT_PAYLOAD_START: u64 = 32;

    struct Item {
        id: u32,
        item_type: &'static [u8; 4],
        content_type: Option<&'static str>,
        data: &'static [u8],
    }

    fn item(id: u32, item_type: &'static [u8; 4], data: &'static [u8]) -> Item {
        Item {
            id,
            item_type,
            content_type: None,
            data,
        }
    }

    #[derive(Default)]
    struct TestFile {
        items: std::vec::Vec<Item>,
        properties: std::vec::Vec<ItemProperty>,
        associations: std::vec::Vec<(u32, std::vec::Vec<(u16, bool)>)>,
        references: std::vec::Vec<(&'static [u8; 4], u32, std::vec::Vec<u32>)>,
        primary: Option<u32>,
        skip_iinf: bool,
        extra_top_level: Option<BoxType>,
    }

    impl TestFile {
        fn build(&self) -> std::vec::Vec<u8> {
            let mut w = BoxWriter::new();
            w.start_box(BoxType::FileTypeBox).unwrap();
            w.write_fourcc(FourCC(*b"avif")).unwrap();
            w.write_u32(0).unwrap();
            w.write_fourcc(FourCC(*b"mif1")).unwrap();
            w.write_fourcc(FourCC(*b"avif")).unwrap();
            w.finish_box().unwrap();

            w.start_box(BoxType::MediaDataBox).unwrap();
            let mut offsets = std::vec::Vec::new();
            for item in &self.items {
                offsets.push(w.len());
                w.write_bytes(item.data).unwrap();
            }
            w.finish_box().unwrap();
            assert_eq!(offsets.first().copied().unwrap_or(MDAT_PAYLOAD_START), MDAT_PAYLOAD_START);

            if let Some(extra) = self.extra_top_level {
                w.start_box(extra).unwrap();
                w.write_u32(0).unwrap();
                w.finish_box().unwrap();
            }

            w.start_full_box(BoxType::MetadataBox, 0, 0).unwrap();
            w.start_full_box(BoxType::HandlerBox, 0, 0).unwrap();
            w.write_u32(0).unwrap();
            w.write_fourcc(FourCC(*b"pict")).unwrap();
            w.write_bytes(&[0; 13]).unwrap();
            w.finish_box().unwrap();

            if let Some(primary) = self.primary {
                w.start_full_box(BoxType::PrimaryItemBox, 0, 0).unwrap();
                w.write_u16(primary as u16).unwrap();
                w.finish_box().unwrap();
            }

            w.start_full_box(BoxType::ItemLocationBox, 0, 0).unwrap();
            w.write_u8(0x44).unwrap();
            w.write_u8(0x00).unwrap();
            w.write_u16(self.items.len() as u16).unwrap();
            for (item, offset) in self.items.iter().zip(&offsets) {
                w.write_u16(item.id as u16).unwrap();
                w.write_u16(0).unwrap();
                w.write_u16(1).unwrap();
                w.write_u32(*offset as u32).unwrap();
                w.write_u32(item.data.len() as u32).unwrap();
            }
            w.finish_box().unwrap();

            if !self.skip_iinf {
                w.start_full_box(BoxType::ItemInfoBox, 0, 0).unwrap();
                w.write_u16(self.items.len() as u16).unwrap();
                for item in &self.items {
                    let info = ItemInfo {
                        item_id: item.id,
                        item_type: FourCC(*item.item_type),
                        hidden: false,
                        name: std::string::String::new(),
                        content_type: item.content_type.map(Into::into),
                        content_encoding: None,
                    };
                    write_infe(&mut w, &info).unwrap();
                }
                w.finish_box().unwrap();
            }

            if !self.references.is_empty() {
                w.start_full_box(BoxType::ItemReferenceBox, 0, 0).unwrap();
                for (reference_type, from, to) in &self.references {
                    w.start_box(BoxType::from(FourCC(**reference_type).to_u32())).unwrap();
                    w.write_u16(*from as u16).unwrap();
                    w.write_u16(to.len() as u16).unwrap();
                    for id in to {
                        w.write_u16(*id as u16).unwrap();
                    }
                    w.finish_box().unwrap();
                }
                w.finish_box().unwrap();
            }

            w.start_box(BoxType::ItemPropertiesBox).unwrap();
            w.start_box(BoxType::ItemPropertyContainerBox).unwrap();
            for property in &self.properties {
                property.write(&mut w).unwrap();
            }
            w.finish_box().unwrap();
            w.start_full_box(BoxType::ItemPropertyAssociationBox, 0, 0).unwrap();
            w.write_u32(self.associations.len() as u32).unwrap();
            for (id, list) in &self.associations {
                w.write_u16(*id as u16).unwrap();
                w.write_u8(list.len() as u8).unwrap();
                for (index, essential) in list {
                    w.write_u8((u8::from(*essential) << 7) | *index as u8).unwrap();
                }
            }
            w.finish_box().unwrap();
            w.finish_box().unwrap();

            w.finish_box().unwrap();
            w.into_inner().unwrap()
        }
    }

    fn ispe(width: u32, height: u32) -> ItemProperty {
        ItemProperty::ImageSpatialExtents(ImageSpatialExtents { width, height })
    }

    fn auxc(urn: &str) -> ItemProperty {
        ItemProperty::AuxiliaryType(AuxiliaryType {
            aux_type: urn.into(),
            subtype: TryVec::new(),
        })
    }

    fn single_image() -> TestFile {
        TestFile {
            items: vec![item(1, b"av01", b"color payload")],
            properties: vec![ispe(64, 48)],
            associations: vec![(1, vec![(1, false)])],
            ..TestFile::default()
        }
    }

    #[test]
    fn primary_defaults_to_item_1() {
        let data = single_image().build();
        let mut parser = AvifParser::from_bytes(&data).unwrap();
        assert_eq!(parser.primary_item_id(), 1);
        assert_eq!(parser.major_brand(), b"avif");
        assert_eq!(parser.image_spatial_extents(1), Some(ImageSpatialExtents { width: 64, height: 48 }));
        assert_eq!(parser.read_item(1).unwrap().as_slice(), b"color payload");

        let entry = parser.item_location(1).unwrap();
        assert_eq!(parser.calculate_extent_offset(entry, &entry.extents[0]).unwrap(), MDAT_PAYLOAD_START);
    }

    #[test]
    fn unknown_top_level_boxes_are_skipped() {
        let file = TestFile {
            extra_top_level: Some(BoxType::FreeBox),
            ..single_image()
        };
        let data = file.build();
        assert!(AvifParser::from_bytes(&data).is_ok());
    }

    #[test]
    fn missing_iinf_is_a_format_error() {
        let file = TestFile {
            skip_iinf: true,
            ..single_image()
        };
        let data = file.build();
        let err = AvifParser::from_bytes(&data).err().unwrap();
        assert!(matches!(err, Error::InvalidData("meta box has no iinf box")), "{err}");
    }

    #[test]
    fn duplicate_top_level_boxes_are_rejected() {
        let file = TestFile {
            extra_top_level: Some(BoxType::FileTypeBox),
            ..single_image()
        };
        let data = file.build();
        assert!(matches!(AvifParser::from_bytes(&data), Err(Error::InvalidData(_))));
    }

    #[test]
    fn reference_to_unknown_item_is_rejected() {
        let file = TestFile {
            references: vec![(b"cdsc", 1, vec![9])],
            ..single_image()
        };
        let data = file.build();
        assert!(matches!(
            AvifParser::from_bytes(&data),
            Err(Error::InvalidData("item reference to a nonexistent item"))
        ));
    }

    #[test]
    fn alpha_is_found_from_auxiliary_to_primary() {
        let file = TestFile {
            items: vec![item(1, b"av01", b"c"), item(2, b"av01", b"a"), item(3, b"av01", b"x")],
            properties: vec![ispe(8, 8), auxc(ALPHA_URN_HEVC), auxc("urn:example:depth")],
            associations: vec![(1, vec![(1, false)]), (2, vec![(1, false), (2, true)]), (3, vec![(3, true)])],
            references: vec![(b"auxl", 3, vec![1]), (b"auxl", 2, vec![1]), (b"prem", 1, vec![2])],
            ..TestFile::default()
        };
        let data = file.build();
        let parser = AvifParser::from_bytes(&data).unwrap();
        assert_eq!(parser.alpha_item_id(1), Some(2));
        assert!(parser.premultiplied_alpha(1, 2));
        assert_eq!(parser.alpha_item_id(2), None);
    }

    #[test]
    fn exif_and_xmp_via_content_description() {
        let mut xmp = item(3, b"mime", b"<x:xmpmeta/>");
        xmp.content_type = Some("application/rdf+xml");
        let mut other_mime = item(4, b"mime", b"{}");
        other_mime.content_type = Some("application/json");
        let file = TestFile {
            items: vec![item(1, b"av01", b"c"), item(2, b"Exif", b"\0\0\0\0II*\0"), xmp, other_mime],
            properties: vec![ispe(8, 8)],
            associations: vec![(1, vec![(1, false)])],
            references: vec![(b"cdsc", 4, vec![1]), (b"cdsc", 3, vec![1]), (b"cdsc", 2, vec![1])],
            ..TestFile::default()
        };
        let data = file.build();
        let mut parser = AvifParser::from_bytes(&data).unwrap();
        assert_eq!(parser.exif_item_id(), Some(2));
        assert_eq!(parser.xmp_item_id(), Some(3));
        assert_eq!(parser.xmp_location().unwrap().item_id, 3);
        assert_eq!(parser.read_item(3).unwrap().as_slice(), b"<x:xmpmeta/>");
    }

    #[test]
    fn unknown_essential_property_is_unsupported() {
        let opaque = ItemProperty::Opaque {
            box_type: FourCC(*b"zzzz"),
            data: TryVec::new(),
        };
        let file = TestFile {
            items: vec![item(1, b"av01", b"c"), item(2, b"av01", b"d")],
            properties: vec![ispe(8, 8), opaque],
            associations: vec![(1, vec![(1, true), (2, true)]), (2, vec![(1, true), (2, false)])],
            ..TestFile::default()
        };
        let data = file.build();
        let parser = AvifParser::from_bytes(&data).unwrap();
        assert!(parser.has_unsupported_essential_properties(1));
        assert!(!parser.has_unsupported_essential_properties(2));
    }

    #[test]
    fn essential_index_past_ipco_is_unsupported() {
        let file = TestFile {
            associations: vec![(1, vec![(1, false), (5, true)])],
            ..single_image()
        };
        let data = file.build();
        let parser = AvifParser::from_bytes(&data).unwrap();
        assert!(parser.has_unsupported_essential_properties(1));
        assert_eq!(parser.item_properties(1).count(), 1);
    }

    #[test]
    fn later_transform_wins() {
        let file = TestFile {
            properties: vec![
                ispe(8, 8),
                ItemProperty::Rotation(ImageRotation { angle: 90 }),
                ItemProperty::Rotation(ImageRotation { angle: 270 }),
                ItemProperty::Mirror(ImageMirror { axis: 1 }),
            ],
            associations: vec![(1, vec![(1, false), (2, true), (4, true), (3, true)])],
            ..single_image()
        };
        let data = file.build();
        let parser = AvifParser::from_bytes(&data).unwrap();
        let transforms = parser.transforms(1);
        assert_eq!(transforms.rotation, Some(ImageRotation { angle: 270 }));
        assert_eq!(transforms.mirror, Some(ImageMirror { axis: 1 }));
        assert_eq!(transforms.clean_aperture, None);
        assert!(parser.transforms(7).is_identity());
    }

    #[test]
    fn nclx_preferred_over_icc() {
        let icc = ItemProperty::ColorInformation(ColorInformation::Icc(vec![1, 2, 3].into()));
        let nclx = ItemProperty::ColorInformation(ColorInformation::Nclx(CicpColorData::SRGB));
        let file = TestFile {
            properties: vec![ispe(8, 8), icc, nclx],
            associations: vec![(1, vec![(1, false), (2, false), (3, false)])],
            ..single_image()
        };
        let data = file.build();
        let parser = AvifParser::from_bytes(&data).unwrap();
        assert_eq!(parser.color_information(1), Some(&ColorInformation::Nclx(CicpColorData::SRGB)));
    }

    #[test]
    fn grid_tiles_follow_reference_order() {
        static GRID: [u8; 8] = [0, 0, 0, 1, 0, 128, 0, 64];
        let file = TestFile {
            items: vec![item(1, b"grid", &GRID), item(2, b"av01", b"t"), item(3, b"av01", b"u")],
            properties: vec![ispe(128, 64), ispe(64, 64)],
            associations: vec![(1, vec![(1, false)]), (2, vec![(2, false)]), (3, vec![(2, false)])],
            references: vec![(b"dimg", 1, vec![3, 2])],
            ..TestFile::default()
        };
        let data = file.build();
        let mut parser = AvifParser::from_bytes(&data).unwrap();
        let grid = parser.grid_info(1).unwrap();
        assert_eq!((grid.descriptor.rows, grid.descriptor.columns), (1, 2));
        assert_eq!(&grid.tile_item_ids[..], &[3, 2]);
        assert!(matches!(parser.grid_info(2), Err(Error::InvalidData(_))));
    }

    #[test]
    fn grid_tile_limit_applies() {
        static GRID: [u8; 8] = [0, 0, 0, 1, 0, 128, 0, 64];
        let file = TestFile {
            items: vec![item(1, b"grid", &GRID), item(2, b"av01", b"t"), item(3, b"av01", b"u")],
            properties: vec![ispe(128, 64)],
            associations: vec![(1, vec![(1, false)])],
            references: vec![(b"dimg", 1, vec![2, 3])],
            ..TestFile::default()
        };
        let data = file.build();
        let config = DecodeConfig::default().with_max_grid_tiles(1);
        let mut parser = AvifParser::from_reader_with_config(Cursor::new(&data[..]), &config, &Unstoppable).unwrap();
        assert!(matches!(parser.grid_info(1), Err(Error::ResourceLimitExceeded(_))));
    }

    #[test]
    fn not_avif_brand_is_rejected() {
        let mut data = single_image().build();
        // major brand and both compatible brands
        data[8..12].copy_from_slice(b"heic");
        data[16..20].copy_from_slice(b"heic");
        data[20..24].copy_from_slice(b"mif1");
        assert!(matches!(AvifParser::from_bytes(&data), Err(Error::InvalidData("ftyp has no AVIF brand"))));
    }
}
