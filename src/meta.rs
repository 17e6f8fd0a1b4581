// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `ftyp` and the `meta` box with its item tables.

use crate::boxes::{BoxType, FourCC, MIME_ITEM};
use crate::properties::{ItemProperty, read_property};
use crate::reader::{BmffBox, Segment, check_parser_state, skip_box_content};
use crate::writer::BoxWriter;
use crate::{DecodeConfig, Error, Result, TryVec};
use bitreader::BitReader;
use enough::Stop;
use log::debug;
use std::io::{Read, Seek};

#[derive(Debug)]
pub(crate) struct FileTypeBox {
    pub(crate) major_brand: FourCC,
    #[allow(unused)]
    pub(crate) minor_version: u32,
    pub(crate) compatible_brands: TryVec<FourCC>,
}

impl FileTypeBox {
    /// `avif` (still image) or `avis` (sequence) among the brands.
    pub(crate) fn is_avif_compatible(&self) -> bool {
        let avif_brand = |b: &FourCC| *b == b"avif" || *b == b"avis";
        avif_brand(&self.major_brand) || self.compatible_brands.iter().any(avif_brand)
    }
}

/// One `infe` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemInfo {
    pub item_id: u32,
    pub item_type: FourCC,
    /// `flags & 1`: the item is not intended to be displayed.
    pub hidden: bool,
    pub name: std::string::String,
    /// MIME type, for `mime` items.
    pub content_type: Option<std::string::String>,
    pub content_encoding: Option<std::string::String>,
}

/// Where an item's extent offsets are measured from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstructionMethod {
    /// Offsets are absolute file offsets.
    File,
    /// Offsets are relative to the payload of the `idat` box.
    Idat,
}

/// A contiguous byte range of an item. A `length` of 0 means "to the end of
/// the source", and is only accepted for single-extent items.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extent {
    pub offset: u64,
    pub length: u64,
}

#[derive(Debug, PartialEq)]
pub struct ItemLocationEntry {
    pub item_id: u32,
    pub construction_method: ConstructionMethod,
    /// Added to every extent offset.
    pub base_offset: u64,
    pub extents: TryVec<Extent>,
    /// Sum of the declared extent lengths.
    pub total_item_size: u64,
}

/// A typed reference box from `iref`: `from_item_id` refers to each of
/// `to_item_ids`, in declared order.
#[derive(Debug, PartialEq)]
pub struct ItemReference {
    pub reference_type: FourCC,
    pub from_item_id: u32,
    pub to_item_ids: TryVec<u32>,
}

/// An entry of `ipma`. Index 0 means "no property"; others are 1-based
/// into `ipco`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PropertyAssociation {
    pub property_index: u16,
    pub essential: bool,
}

#[derive(Debug, PartialEq)]
pub(crate) struct ItemPropertyAssociation {
    pub(crate) item_id: u32,
    pub(crate) associations: TryVec<PropertyAssociation>,
}

#[derive(Debug, Default)]
pub(crate) struct ItemPropertiesBox {
    pub(crate) properties: TryVec<ItemProperty>,
    pub(crate) associations: TryVec<ItemPropertyAssociation>,
}

/// Position of the `idat` payload. The bytes stay in the file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ItemDataBox {
    pub(crate) offset: u64,
    pub(crate) length: u64,
}

#[derive(Debug, Default)]
pub(crate) struct MetaBox {
    pub(crate) handler_type: Option<FourCC>,
    pub(crate) primary_item_id: Option<u32>,
    pub(crate) item_infos: Option<TryVec<ItemInfo>>,
    pub(crate) item_locations: Option<TryVec<ItemLocationEntry>>,
    pub(crate) item_references: TryVec<ItemReference>,
    pub(crate) properties: Option<ItemPropertiesBox>,
    pub(crate) idat: Option<ItemDataBox>,
}

/// Parse an ftyp box.
/// See ISO 14496-12:2015 § 4.3
pub(crate) fn read_ftyp<R: Read + Seek>(src: &mut Segment<'_, R>) -> Result<FileTypeBox> {
    let major_brand = src.read_fourcc()?;
    let minor_version = src.read_u32()?;
    let bytes_left = src.bytes_left();
    if bytes_left % 4 != 0 {
        return Err(Error::InvalidData("invalid ftyp size"));
    }
    let brand_count = bytes_left / 4;
    let mut compatible_brands = TryVec::with_capacity(brand_count.try_into()?)?;
    for _ in 0..brand_count {
        compatible_brands.push(src.read_fourcc()?)?;
    }
    Ok(FileTypeBox {
        major_brand,
        minor_version,
        compatible_brands,
    })
}

/// Parse a metadata box and its item tables.
/// See ISO 14496-12:2015 § 8.11.1
pub(crate) fn read_meta<R: Read + Seek>(src: &mut Segment<'_, R>, config: &DecodeConfig, stop: &dyn Stop) -> Result<MetaBox> {
    let version = src.read_fullbox_version_no_flags(config)?;
    if version != 0 {
        return Err(Error::Unsupported("unsupported meta version"));
    }

    let mut meta = MetaBox::default();
    let mut seen_iref = false;
    while let Some(mut b) = src.next_box()? {
        stop.check()?;
        match b.head.name {
            BoxType::HandlerBox => {
                if meta.handler_type.is_some() {
                    return Err(Error::InvalidData("there should be zero or one hdlr boxes"));
                }
                meta.handler_type = Some(read_hdlr(&mut b, config)?);
            },
            BoxType::PrimaryItemBox => {
                if meta.primary_item_id.is_some() {
                    return Err(Error::InvalidData("there should be zero or one pitm boxes"));
                }
                meta.primary_item_id = Some(read_pitm(&mut b.content, config)?);
            },
            BoxType::ItemLocationBox => {
                if meta.item_locations.is_some() {
                    return Err(Error::InvalidData("there should be zero or one iloc boxes"));
                }
                meta.item_locations = Some(read_iloc(&mut b.content, config)?);
            },
            BoxType::ItemInfoBox => {
                if meta.item_infos.is_some() {
                    return Err(Error::InvalidData("there should be zero or one iinf boxes"));
                }
                meta.item_infos = Some(read_iinf(&mut b.content, config)?);
            },
            BoxType::ItemReferenceBox => {
                if seen_iref {
                    return Err(Error::InvalidData("there should be zero or one iref boxes"));
                }
                seen_iref = true;
                meta.item_references = read_iref(&mut b.content, config)?;
            },
            BoxType::ItemPropertiesBox => {
                if meta.properties.is_some() {
                    return Err(Error::InvalidData("there should be zero or one iprp boxes"));
                }
                meta.properties = Some(read_iprp(&mut b.content, config)?);
            },
            BoxType::ItemDataBox => {
                if meta.idat.is_some() {
                    return Err(Error::InvalidData("there should be zero or one idat boxes"));
                }
                meta.idat = Some(ItemDataBox {
                    offset: b.content.start(),
                    length: b.content.len(),
                });
                b.content.skip_to_end()?;
            },
            _ => skip_box_content(&mut b)?,
        }

        check_parser_state(&b)?;
    }

    Ok(meta)
}

/// Returns the handler type; the name and reserved fields are skipped.
fn read_hdlr<R: Read + Seek>(src: &mut BmffBox<'_, R>, config: &DecodeConfig) -> Result<FourCC> {
    let _version = src.content.read_fullbox_version_no_flags(config)?;
    let _pre_defined = src.content.read_u32()?;
    let handler_type = src.content.read_fourcc()?;
    if handler_type != b"pict" {
        debug!("hdlr handler type {handler_type} is not pict");
    }
    src.content.skip_to_end()?;
    Ok(handler_type)
}

fn read_pitm<R: Read + Seek>(src: &mut Segment<'_, R>, config: &DecodeConfig) -> Result<u32> {
    let version = src.read_fullbox_version_no_flags(config)?;

    let item_id = match version {
        0 => src.read_u16()?.into(),
        1 => src.read_u32()?,
        _ => return Err(Error::Unsupported("unsupported pitm version")),
    };

    Ok(item_id)
}

/// Parse an Item Information Box
/// See ISO 14496-12:2015 § 8.11.6
fn read_iinf<R: Read + Seek>(src: &mut Segment<'_, R>, config: &DecodeConfig) -> Result<TryVec<ItemInfo>> {
    let version = src.read_fullbox_version_no_flags(config)?;

    let entry_count = match version {
        0 => src.read_u16()?.into(),
        1 => src.read_u32()?,
        _ => return Err(Error::Unsupported("unsupported iinf version")),
    };

    let mut item_infos = TryVec::new();
    while let Some(mut b) = src.next_box()? {
        if b.head.name != BoxType::ItemInfoEntry {
            return Err(Error::InvalidData("iinf box should contain only infe boxes"));
        }

        item_infos.push(read_infe(&mut b.content)?)?;

        check_parser_state(&b)?;
    }

    if item_infos.len() as u64 != u64::from(entry_count) {
        debug!("iinf declares {entry_count} entries, found {}", item_infos.len());
    }

    Ok(item_infos)
}

/// Parse an Item Info Entry
/// See ISO 14496-12:2015 § 8.11.6.2
fn read_infe<R: Read + Seek>(src: &mut Segment<'_, R>) -> Result<ItemInfo> {
    // According to the standard, it seems the flags field should be 0, but
    // at least one sample AVIF image has a nonzero value.
    let (version, flags) = src.read_fullbox_extra()?;

    // mif1 brand (see ISO 23008-12:2017 § 10.2.1) only requires v2 and 3
    let item_id = match version {
        2 => src.read_u16()?.into(),
        3 => src.read_u32()?,
        _ => return Err(Error::Unsupported("unsupported version in 'infe' box")),
    };

    let item_protection_index = src.read_u16()?;

    if item_protection_index != 0 {
        return Err(Error::Unsupported("protected items (infe.item_protection_index != 0) are not supported"));
    }

    let item_type = src.read_fourcc()?;
    let name = src.read_null_terminated_string()?;
    debug!("infe item_id {item_id} item_type: {item_type}");

    let mut content_type = None;
    let mut content_encoding = None;
    if item_type == MIME_ITEM {
        content_type = Some(src.read_null_terminated_string()?);
        if src.bytes_left() > 0 {
            content_encoding = Some(src.read_null_terminated_string()?).filter(|e| !e.is_empty());
        }
    }

    // item_uri_type and anything newer
    src.skip_to_end()?;

    Ok(ItemInfo {
        item_id,
        item_type,
        hidden: flags & 1 != 0,
        name,
        content_type,
        content_encoding,
    })
}

fn read_iref<R: Read + Seek>(src: &mut Segment<'_, R>, config: &DecodeConfig) -> Result<TryVec<ItemReference>> {
    let mut item_references = TryVec::new();
    let version = src.read_fullbox_version_no_flags(config)?;
    if version > 1 {
        return Err(Error::Unsupported("iref version"));
    }

    while let Some(mut b) = src.next_box()? {
        let from_item_id = if version == 0 {
            b.content.read_u16()?.into()
        } else {
            b.content.read_u32()?
        };
        let reference_count = b.content.read_u16()?;
        let mut to_item_ids = TryVec::with_capacity(reference_count.into())?;
        for _ in 0..reference_count {
            let to_item_id = if version == 0 {
                b.content.read_u16()?.into()
            } else {
                b.content.read_u32()?
            };
            if from_item_id == to_item_id {
                return Err(Error::InvalidData("from_item_id and to_item_id must be different"));
            }
            to_item_ids.push(to_item_id)?;
        }
        item_references.push(ItemReference {
            reference_type: b.head.name.into(),
            from_item_id,
            to_item_ids,
        })?;
        check_parser_state(&b)?;
    }
    Ok(item_references)
}

fn read_iprp<R: Read + Seek>(src: &mut Segment<'_, R>, config: &DecodeConfig) -> Result<ItemPropertiesBox> {
    let mut iprp = ItemPropertiesBox::default();
    let mut seen_ipco = false;

    while let Some(mut b) = src.next_box()? {
        match b.head.name {
            BoxType::ItemPropertyContainerBox => {
                if seen_ipco {
                    return Err(Error::InvalidData("there should be exactly one ipco box"));
                }
                seen_ipco = true;
                iprp.properties = read_ipco(&mut b.content, config)?;
            },
            BoxType::ItemPropertyAssociationBox => {
                read_ipma(&mut b.content, &mut iprp.associations)?;
            },
            _ => return Err(Error::InvalidData("unexpected iprp child")),
        }
        check_parser_state(&b)?;
    }

    Ok(iprp)
}

fn read_ipco<R: Read + Seek>(src: &mut Segment<'_, R>, config: &DecodeConfig) -> Result<TryVec<ItemProperty>> {
    let mut properties = TryVec::new();

    while let Some(mut b) = src.next_box()? {
        // Must push for every property to have correct index for them
        properties.push(read_property(&mut b, config)?)?;
    }
    Ok(properties)
}

fn read_ipma<R: Read + Seek>(src: &mut Segment<'_, R>, out: &mut TryVec<ItemPropertyAssociation>) -> Result<()> {
    let (version, flags) = src.read_fullbox_extra()?;

    let entry_count = src.read_u32()?;
    for _ in 0..entry_count {
        let item_id = if version == 0 {
            src.read_u16()?.into()
        } else {
            src.read_u32()?
        };
        let association_count = src.read_u8()?;
        let mut associations = TryVec::with_capacity(association_count.into())?;
        for _ in 0..association_count {
            let num_association_bytes = if flags & 1 == 1 { 2 } else { 1 };
            let association = &mut [0; 2][..num_association_bytes];
            src.read_into(association)?;
            let mut association = BitReader::new(association);
            let essential = association.read_bool()?;
            let property_index = association.read_u16(association.remaining().try_into()?)?;
            associations.push(PropertyAssociation {
                property_index,
                essential,
            })?;
        }
        out.push(ItemPropertyAssociation { item_id, associations })?;
    }
    Ok(())
}

/// Parse an item location box inside a meta box
/// See ISO 14496-12:2015 § 8.11.3
fn read_iloc<R: Read + Seek>(src: &mut Segment<'_, R>, config: &DecodeConfig) -> Result<TryVec<ItemLocationEntry>> {
    let version = src.read_fullbox_version_no_flags(config)?;
    if version > 2 {
        return Err(Error::Unsupported("unsupported iloc version"));
    }

    let iloc = src.read_remaining()?;
    let mut iloc = BitReader::new(&iloc);

    let offset_size = iloc_field_bits(iloc.read_u8(4)?)?;
    let length_size = iloc_field_bits(iloc.read_u8(4)?)?;
    let base_offset_size = iloc_field_bits(iloc.read_u8(4)?)?;

    let index_size = match version {
        1 | 2 => iloc_field_bits(iloc.read_u8(4)?)?,
        _ => {
            let _reserved = iloc.read_u8(4)?;
            0
        },
    };

    let item_count = match version {
        0 | 1 => iloc.read_u32(16)?,
        _ => iloc.read_u32(32)?,
    };

    let mut items = TryVec::new();

    for _ in 0..item_count {
        let item_id = match version {
            0 | 1 => iloc.read_u32(16)?,
            _ => iloc.read_u32(32)?,
        };

        // Version 0 has no construction_method field; it can only use file offsets.
        let construction_method = match version {
            0 => ConstructionMethod::File,
            _ => {
                let _reserved = iloc.read_u16(12)?;
                match iloc.read_u16(4)? {
                    0 => ConstructionMethod::File,
                    1 => ConstructionMethod::Idat,
                    2 => return Err(Error::Unsupported("construction_method 'item_offset' is not supported")),
                    _ => return Err(Error::InvalidData("construction_method is taken from the set 0, 1 or 2 per ISO 14496-12:2015 § 8.11.3.3")),
                }
            },
        };

        let data_reference_index = iloc.read_u16(16)?;

        if data_reference_index != 0 {
            return Err(Error::Unsupported("external file references (iloc.data_reference_index != 0) are not supported"));
        }

        let base_offset = iloc.read_u64(base_offset_size)?;
        let extent_count = iloc.read_u16(16)?;

        if extent_count < 1 {
            return Err(Error::InvalidData("extent_count must have a value 1 or greater per ISO 14496-12:2015 § 8.11.3.3"));
        }

        let mut extents = TryVec::with_capacity(extent_count.into())?;
        let mut total_item_size = 0u64;

        for _ in 0..extent_count {
            // Only meaningful for construction_method 2
            let _extent_index = iloc.read_u64(index_size)?;

            // A zero-width offset field means offset 0; read_u64(0) yields that.
            let offset = iloc.read_u64(offset_size)?;
            let length = iloc.read_u64(length_size)?;

            if length == 0 && extent_count > 1 {
                return Err(Error::InvalidData("zero-length extent in a multi-extent item"));
            }

            total_item_size = total_item_size
                .checked_add(length)
                .ok_or(Error::InvalidData("item size overflow"))?;
            extents.push(Extent { offset, length })?;
        }

        items.push(ItemLocationEntry {
            item_id,
            construction_method,
            base_offset,
            extents,
            total_item_size,
        })?;
    }

    if iloc.remaining() == 0 {
        Ok(items)
    } else {
        Err(Error::InvalidData("invalid iloc size"))
    }
}

/// iloc size fields are in bytes and may be 0, 4 or 8.
fn iloc_field_bits(size: u8) -> Result<u8> {
    match size {
        0 | 4 | 8 => Ok(size * 8),
        _ => Err(Error::InvalidData("value must be in the set {0, 4, 8}")),
    }
}

/// Writes an `infe` box, version 2 (16-bit ids) or 3.
pub(crate) fn write_infe(w: &mut BoxWriter, info: &ItemInfo) -> Result<()> {
    let flags = u32::from(info.hidden);
    match u16::try_from(info.item_id) {
        Ok(id) => {
            w.start_full_box(BoxType::ItemInfoEntry, 2, flags)?;
            w.write_u16(id)?;
        },
        Err(_) => {
            w.start_full_box(BoxType::ItemInfoEntry, 3, flags)?;
            w.write_u32(info.item_id)?;
        },
    }
    w.write_u16(0)?; // item_protection_index
    w.write_fourcc(info.item_type)?;
    w.write_str_with_nul(&info.name)?;
    if info.item_type == MIME_ITEM {
        w.write_str_with_nul(info.content_type.as_deref().unwrap_or_default())?;
        if let Some(encoding) = &info.content_encoding {
            w.write_str_with_nul(encoding)?;
        }
    }
    w.finish_box()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::AvifReader;
    use enough::Unstoppable;
    use std::io::Cursor;

    fn parse_iloc(payload: &[u8]) -> Result<TryVec<ItemLocationEntry>> {
        let mut w = BoxWriter::new();
        w.start_box(BoxType::ItemLocationBox).unwrap();
        w.write_bytes(payload).unwrap();
        w.finish_box().unwrap();
        let data = w.into_inner().unwrap();
        let mut reader = AvifReader::new(Cursor::new(data)).unwrap();
        let mut file = reader.segment();
        let mut b = file.next_box().unwrap().unwrap();
        read_iloc(&mut b.content, &DecodeConfig::default())
    }

    #[test]
    fn iloc_version_1_with_idat() {
        let payload = [
            1, 0, 0, 0, // version 1
            0x44, 0x40, // offset 4, length 4, base 4, index 0
            0, 1, // item count
            0, 7, // item id
            0, 1, // construction method idat
            0, 0, // data reference index
            0, 0, 0, 10, // base offset
            0, 2, // extent count
            0, 0, 0, 0, 0, 0, 0, 3, //
            0, 0, 0, 5, 0, 0, 0, 4, //
        ];
        let items = parse_iloc(&payload).unwrap();
        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(item.item_id, 7);
        assert_eq!(item.construction_method, ConstructionMethod::Idat);
        assert_eq!(item.base_offset, 10);
        assert_eq!(&item.extents[..], &[Extent { offset: 0, length: 3 }, Extent { offset: 5, length: 4 }]);
        assert_eq!(item.total_item_size, 7);
    }

    #[test]
    fn iloc_rejects_bad_field_size_and_trailing_bytes() {
        let bad_size = [0, 0, 0, 0, 0x34, 0x00, 0, 0];
        assert!(matches!(parse_iloc(&bad_size), Err(Error::InvalidData(_))));
        let trailing = [0, 0, 0, 0, 0x44, 0x00, 0, 0, 0xff];
        assert!(matches!(parse_iloc(&trailing), Err(Error::InvalidData(_))));
        let item_offset_method = [1, 0, 0, 0, 0x44, 0x00, 0, 1, 0, 1, 0, 2, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0];
        assert!(matches!(parse_iloc(&item_offset_method), Err(Error::Unsupported(_))));
    }

    #[test]
    fn infe_mime_fields_round_trip() {
        let xmp = ItemInfo {
            item_id: 70_000,
            item_type: MIME_ITEM,
            hidden: true,
            name: "XMP".into(),
            content_type: Some("application/rdf+xml".into()),
            content_encoding: None,
        };
        let mut w = BoxWriter::new();
        write_infe(&mut w, &xmp).unwrap();
        let data = w.into_inner().unwrap();
        let mut reader = AvifReader::new(Cursor::new(data)).unwrap();
        let mut file = reader.segment();
        let mut b = file.next_box().unwrap().unwrap();
        assert_eq!(read_infe(&mut b.content).unwrap(), xmp);
    }

    #[test]
    fn duplicate_iinf_is_rejected() {
        let mut w = BoxWriter::new();
        w.start_full_box(BoxType::MetadataBox, 0, 0).unwrap();
        for _ in 0..2 {
            w.start_full_box(BoxType::ItemInfoBox, 0, 0).unwrap();
            w.write_u16(0).unwrap();
            w.finish_box().unwrap();
        }
        w.finish_box().unwrap();
        let data = w.into_inner().unwrap();
        let mut reader = AvifReader::new(Cursor::new(data)).unwrap();
        let mut file = reader.segment();
        let mut b = file.next_box().unwrap().unwrap();
        let err = read_meta(&mut b.content, &DecodeConfig::default(), &Unstoppable).unwrap_err();
        assert!(matches!(err, Error::InvalidData(_)));
    }
}
