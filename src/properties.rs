// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Item properties stored in `ipco`, decoded and encoded through one registry.
//!
//! Property types without a decoder are kept as [`ItemProperty::Opaque`] with
//! their raw payload, so they keep their place in the 1-based property index
//! and can still be written back unchanged.

use crate::boxes::{BoxType, FourCC};
use crate::color::CicpColorData;
use crate::reader::{BmffBox, Segment, check_parser_state};
use crate::writer::BoxWriter;
use crate::{DecodeConfig, Error, Result, TryVec};
use arrayvec::ArrayVec;
use bitreader::BitReader;
use fallible_collections::{TryClone, TryReserveError};
use log::debug;
use std::io::{Read, Seek};

/// URN identifying an alpha auxiliary image (MPEG-B CICP form).
pub(crate) const ALPHA_URN: &str = "urn:mpeg:mpegB:cicp:systems:auxiliary:alpha";
/// URN identifying an alpha auxiliary image (older HEVC form).
pub(crate) const ALPHA_URN_HEVC: &str = "urn:mpeg:hevc:2015:auxid:1";

/// Image spatial extents (dimensions)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSpatialExtents {
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelAspectRatio {
    pub h_spacing: u32,
    pub v_spacing: u32,
}

/// AV1 codec configuration record (`av1C`).
#[derive(Debug, PartialEq)]
pub struct AV1Config {
    pub profile: u8,
    pub level: u8,
    pub tier: u8,
    /// 8, 10 or 12.
    pub bit_depth: u8,
    pub monochrome: bool,
    pub chroma_subsampling_x: u8,
    pub chroma_subsampling_y: u8,
    pub chroma_sample_position: u8,
    pub initial_presentation_delay: Option<u8>,
    pub config_obus: TryVec<u8>,
}

impl AV1Config {
    /// Whether two tiles with these configurations can be placed in one grid.
    #[must_use]
    pub fn same_format(&self, other: &Self) -> bool {
        self.profile == other.profile
            && self.bit_depth == other.bit_depth
            && self.monochrome == other.monochrome
            && self.chroma_subsampling_x == other.chroma_subsampling_x
            && self.chroma_subsampling_y == other.chroma_subsampling_y
    }
}

impl TryClone for AV1Config {
    fn try_clone(&self) -> Result<Self, TryReserveError> {
        Ok(Self {
            config_obus: self.config_obus.try_clone()?,
            ..*self
        })
    }
}

/// Bits per channel, one entry per channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PixelInformation {
    pub bits_per_channel: ArrayVec<u8, 16>,
}

#[derive(Debug, PartialEq)]
pub enum ColorInformation {
    Nclx(CicpColorData),
    /// An ICC profile (`prof` or `rICC`).
    Icc(TryVec<u8>),
}

impl TryClone for ColorInformation {
    fn try_clone(&self) -> Result<Self, TryReserveError> {
        Ok(match self {
            Self::Nclx(nclx) => Self::Nclx(*nclx),
            Self::Icc(profile) => Self::Icc(profile.try_clone()?),
        })
    }
}

/// Clean aperture (`clap`): a centered crop window, as fractions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CleanAperture {
    pub width_n: u32,
    pub width_d: u32,
    pub height_n: u32,
    pub height_d: u32,
    pub horiz_off_n: i32,
    pub horiz_off_d: u32,
    pub vert_off_n: i32,
    pub vert_off_d: u32,
}

/// Counter-clockwise rotation in degrees: 0, 90, 180 or 270.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageRotation {
    pub angle: u16,
}

/// Mirror axis: 0 flips left-right (vertical axis), 1 flips top-bottom.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageMirror {
    pub axis: u8,
}

#[derive(Debug, PartialEq)]
pub struct AuxiliaryType {
    pub aux_type: std::string::String,
    pub subtype: TryVec<u8>,
}

impl AuxiliaryType {
    #[must_use]
    pub fn is_alpha(&self) -> bool {
        self.aux_type == ALPHA_URN || self.aux_type == ALPHA_URN_HEVC
    }
}

#[derive(Debug, PartialEq)]
pub enum ItemProperty {
    ImageSpatialExtents(ImageSpatialExtents),
    PixelAspectRatio(PixelAspectRatio),
    AV1Config(AV1Config),
    PixelInformation(PixelInformation),
    ColorInformation(ColorInformation),
    CleanAperture(CleanAperture),
    Rotation(ImageRotation),
    Mirror(ImageMirror),
    AuxiliaryType(AuxiliaryType),
    /// A property this crate does not interpret.
    Opaque { box_type: FourCC, data: TryVec<u8> },
}

impl ItemProperty {
    #[must_use]
    pub fn box_type(&self) -> FourCC {
        match self {
            Self::ImageSpatialExtents(_) => BoxType::ImageSpatialExtentsBox.into(),
            Self::PixelAspectRatio(_) => BoxType::PixelAspectRatioBox.into(),
            Self::AV1Config(_) => BoxType::AV1CodecConfigurationBox.into(),
            Self::PixelInformation(_) => BoxType::PixelInformationBox.into(),
            Self::ColorInformation(_) => BoxType::ColorInformationBox.into(),
            Self::CleanAperture(_) => BoxType::CleanApertureBox.into(),
            Self::Rotation(_) => BoxType::ImageRotationBox.into(),
            Self::Mirror(_) => BoxType::ImageMirrorBox.into(),
            Self::AuxiliaryType(_) => BoxType::AuxiliaryTypeProperty.into(),
            Self::Opaque { box_type, .. } => *box_type,
        }
    }

    /// Whether this crate understands the property, which is what an
    /// `essential` association demands.
    #[must_use]
    pub fn is_supported(&self) -> bool {
        !matches!(self, Self::Opaque { .. })
    }

    /// Transformative properties change how the decoded pixels are presented.
    #[must_use]
    pub fn is_transform(&self) -> bool {
        matches!(self, Self::CleanAperture(_) | Self::Rotation(_) | Self::Mirror(_))
    }

    pub(crate) fn write(&self, w: &mut BoxWriter) -> Result<()> {
        match self {
            Self::ImageSpatialExtents(ispe) => {
                w.start_full_box(BoxType::ImageSpatialExtentsBox, 0, 0)?;
                w.write_u32(ispe.width)?;
                w.write_u32(ispe.height)?;
            },
            Self::PixelAspectRatio(pasp) => {
                w.start_box(BoxType::PixelAspectRatioBox)?;
                w.write_u32(pasp.h_spacing)?;
                w.write_u32(pasp.v_spacing)?;
            },
            Self::AV1Config(av1c) => {
                w.start_box(BoxType::AV1CodecConfigurationBox)?;
                write_av1c(w, av1c)?;
            },
            Self::PixelInformation(pixi) => {
                w.start_full_box(BoxType::PixelInformationBox, 0, 0)?;
                w.write_u8(u8::try_from(pixi.bits_per_channel.len())?)?;
                w.write_bytes(&pixi.bits_per_channel)?;
            },
            Self::ColorInformation(ColorInformation::Nclx(nclx)) => {
                w.start_box(BoxType::ColorInformationBox)?;
                w.write_fourcc(FourCC(*b"nclx"))?;
                w.write_u16(nclx.color_primaries)?;
                w.write_u16(nclx.transfer_characteristics)?;
                w.write_u16(nclx.matrix_coefficients)?;
                w.write_u8(if nclx.full_range { 0x80 } else { 0 })?;
            },
            Self::ColorInformation(ColorInformation::Icc(profile)) => {
                w.start_box(BoxType::ColorInformationBox)?;
                w.write_fourcc(FourCC(*b"prof"))?;
                w.write_bytes(profile)?;
            },
            Self::CleanAperture(clap) => {
                w.start_box(BoxType::CleanApertureBox)?;
                w.write_u32(clap.width_n)?;
                w.write_u32(clap.width_d)?;
                w.write_u32(clap.height_n)?;
                w.write_u32(clap.height_d)?;
                w.write_i32(clap.horiz_off_n)?;
                w.write_u32(clap.horiz_off_d)?;
                w.write_i32(clap.vert_off_n)?;
                w.write_u32(clap.vert_off_d)?;
            },
            Self::Rotation(irot) => {
                if irot.angle % 90 != 0 || irot.angle >= 360 {
                    return Err(Error::InvalidData("rotation must be a multiple of 90 below 360"));
                }
                w.start_box(BoxType::ImageRotationBox)?;
                w.write_u8(u8::try_from(irot.angle / 90)?)?;
            },
            Self::Mirror(imir) => {
                w.start_box(BoxType::ImageMirrorBox)?;
                w.write_u8(imir.axis & 1)?;
            },
            Self::AuxiliaryType(auxc) => {
                w.start_full_box(BoxType::AuxiliaryTypeProperty, 0, 0)?;
                w.write_str_with_nul(&auxc.aux_type)?;
                w.write_bytes(&auxc.subtype)?;
            },
            Self::Opaque { box_type, data } => {
                w.start_box(BoxType::from(box_type.to_u32()))?;
                w.write_bytes(data)?;
            },
        }
        w.finish_box()
    }
}

impl TryClone for ItemProperty {
    fn try_clone(&self) -> Result<Self, TryReserveError> {
        Ok(match self {
            Self::ImageSpatialExtents(val) => Self::ImageSpatialExtents(*val),
            Self::PixelAspectRatio(val) => Self::PixelAspectRatio(*val),
            Self::AV1Config(val) => Self::AV1Config(val.try_clone()?),
            Self::PixelInformation(val) => Self::PixelInformation(val.clone()),
            Self::ColorInformation(val) => Self::ColorInformation(val.try_clone()?),
            Self::CleanAperture(val) => Self::CleanAperture(*val),
            Self::Rotation(val) => Self::Rotation(*val),
            Self::Mirror(val) => Self::Mirror(*val),
            Self::AuxiliaryType(val) => Self::AuxiliaryType(AuxiliaryType {
                aux_type: val.aux_type.clone(),
                subtype: val.subtype.try_clone()?,
            }),
            Self::Opaque { box_type, data } => Self::Opaque {
                box_type: *box_type,
                data: data.try_clone()?,
            },
        })
    }
}

/// Decodes one child of `ipco`. Every child yields exactly one entry so
/// that association indices stay aligned.
pub(crate) fn read_property<R: Read + Seek>(b: &mut BmffBox<'_, R>, config: &DecodeConfig) -> Result<ItemProperty> {
    let src = &mut b.content;
    let property = match b.head.name {
        BoxType::ImageSpatialExtentsBox => ItemProperty::ImageSpatialExtents(read_ispe(src, config)?),
        BoxType::PixelAspectRatioBox => ItemProperty::PixelAspectRatio(PixelAspectRatio {
            h_spacing: src.read_u32()?,
            v_spacing: src.read_u32()?,
        }),
        BoxType::AV1CodecConfigurationBox => ItemProperty::AV1Config(read_av1c(src)?),
        BoxType::PixelInformationBox => ItemProperty::PixelInformation(read_pixi(src, config)?),
        BoxType::ColorInformationBox => match read_colr(src)? {
            Some(colr) => ItemProperty::ColorInformation(colr),
            None => ItemProperty::Opaque {
                box_type: b.head.name.into(),
                data: src.read_remaining()?,
            },
        },
        BoxType::CleanApertureBox => ItemProperty::CleanAperture(read_clap(src)?),
        BoxType::ImageRotationBox => ItemProperty::Rotation(read_irot(src)?),
        BoxType::ImageMirrorBox => ItemProperty::Mirror(read_imir(src)?),
        BoxType::AuxiliaryTypeProperty => ItemProperty::AuxiliaryType(read_auxc(src, config)?),
        _ => {
            debug!("{:?} kept as opaque property", b.head);
            ItemProperty::Opaque {
                box_type: b.head.name.into(),
                data: src.read_remaining()?,
            }
        },
    };
    check_parser_state(b)?;
    Ok(property)
}

/// Parse an Image Spatial Extents property box
/// See ISO/IEC 23008-12:2017 § 6.5.3
fn read_ispe<R: Read + Seek>(src: &mut Segment<'_, R>, config: &DecodeConfig) -> Result<ImageSpatialExtents> {
    let _version = src.read_fullbox_version_no_flags(config)?;

    let width = src.read_u32()?;
    let height = src.read_u32()?;

    // 0×0 images are invalid
    if width == 0 || height == 0 {
        return Err(Error::InvalidData("ispe dimensions cannot be zero"));
    }

    Ok(ImageSpatialExtents { width, height })
}

/// See AV1 Codec ISO Media File Format Binding § 2.3.3
fn read_av1c<R: Read + Seek>(src: &mut Segment<'_, R>) -> Result<AV1Config> {
    let mut header = [0u8; 4];
    src.read_into(&mut header)?;
    let mut bits = BitReader::new(&header);
    let marker = bits.read_bool()?;
    let version = bits.read_u8(7)?;
    if !marker || version != 1 {
        return Err(Error::InvalidData("invalid av1C marker or version"));
    }
    let profile = bits.read_u8(3)?;
    let level = bits.read_u8(5)?;
    let tier = bits.read_u8(1)?;
    let high_bitdepth = bits.read_bool()?;
    let twelve_bit = bits.read_bool()?;
    let monochrome = bits.read_bool()?;
    let chroma_subsampling_x = bits.read_u8(1)?;
    let chroma_subsampling_y = bits.read_u8(1)?;
    let chroma_sample_position = bits.read_u8(2)?;
    let _reserved = bits.read_u8(3)?;
    let delay_present = bits.read_bool()?;
    let delay_minus_one = bits.read_u8(4)?;

    let bit_depth = match (high_bitdepth, twelve_bit) {
        (false, _) => 8,
        (true, false) => 10,
        (true, true) => 12,
    };

    Ok(AV1Config {
        profile,
        level,
        tier,
        bit_depth,
        monochrome,
        chroma_subsampling_x,
        chroma_subsampling_y,
        chroma_sample_position,
        initial_presentation_delay: delay_present.then_some(delay_minus_one + 1),
        config_obus: src.read_remaining()?,
    })
}

fn write_av1c(w: &mut BoxWriter, av1c: &AV1Config) -> Result<()> {
    let (high_bitdepth, twelve_bit): (u8, u8) = match av1c.bit_depth {
        8 => (0, 0),
        10 => (1, 0),
        12 => (1, 1),
        _ => return Err(Error::InvalidData("av1C bit depth must be 8, 10 or 12")),
    };
    w.write_u8(0x81)?; // marker, version 1
    w.write_u8((av1c.profile & 0x7) << 5 | (av1c.level & 0x1f))?;
    w.write_u8(
        (av1c.tier & 1) << 7
            | high_bitdepth << 6
            | twelve_bit << 5
            | u8::from(av1c.monochrome) << 4
            | (av1c.chroma_subsampling_x & 1) << 3
            | (av1c.chroma_subsampling_y & 1) << 2
            | (av1c.chroma_sample_position & 3),
    )?;
    match av1c.initial_presentation_delay {
        Some(delay @ 1..=16) => w.write_u8(0x10 | (delay - 1))?,
        Some(_) => return Err(Error::InvalidData("initial presentation delay out of range")),
        None => w.write_u8(0)?,
    }
    w.write_bytes(&av1c.config_obus)
}

fn read_pixi<R: Read + Seek>(src: &mut Segment<'_, R>, config: &DecodeConfig) -> Result<PixelInformation> {
    let version = src.read_fullbox_version_no_flags(config)?;
    if version != 0 {
        return Err(Error::Unsupported("pixi version"));
    }

    let num_channels = usize::from(src.read_u8()?);
    let mut bits_per_channel: ArrayVec<u8, 16> = ArrayVec::new();
    if num_channels > bits_per_channel.capacity() {
        return Err(Error::InvalidData("invalid num_channels"));
    }
    bits_per_channel.extend((0..num_channels).map(|_| 0));
    src.read_into(&mut bits_per_channel)?;

    // Some writers append extended pixi fields
    if config.lenient && src.bytes_left() > 0 {
        src.skip_to_end()?;
    }

    Ok(PixelInformation { bits_per_channel })
}

/// `None` for colour types other than `nclx`, `prof` and `rICC`.
fn read_colr<R: Read + Seek>(src: &mut Segment<'_, R>) -> Result<Option<ColorInformation>> {
    let color_type = src.read_fourcc()?;
    match color_type.as_bytes() {
        b"nclx" => {
            let color_primaries = src.read_u16()?;
            let transfer_characteristics = src.read_u16()?;
            let matrix_coefficients = src.read_u16()?;
            let full_range = src.read_u8()? & 0x80 != 0;
            Ok(Some(ColorInformation::Nclx(CicpColorData {
                color_primaries,
                transfer_characteristics,
                matrix_coefficients,
                full_range,
            })))
        },
        b"prof" | b"rICC" => Ok(Some(ColorInformation::Icc(src.read_remaining()?))),
        _ => {
            debug!("colr type {color_type} not interpreted");
            src.set_position(src.start())?;
            Ok(None)
        },
    }
}

fn read_clap<R: Read + Seek>(src: &mut Segment<'_, R>) -> Result<CleanAperture> {
    let clap = CleanAperture {
        width_n: src.read_u32()?,
        width_d: src.read_u32()?,
        height_n: src.read_u32()?,
        height_d: src.read_u32()?,
        horiz_off_n: src.read_i32()?,
        horiz_off_d: src.read_u32()?,
        vert_off_n: src.read_i32()?,
        vert_off_d: src.read_u32()?,
    };
    if clap.width_d == 0 || clap.height_d == 0 || clap.horiz_off_d == 0 || clap.vert_off_d == 0 {
        return Err(Error::InvalidData("clap denominator is zero"));
    }
    Ok(clap)
}

fn read_irot<R: Read + Seek>(src: &mut Segment<'_, R>) -> Result<ImageRotation> {
    let byte = src.read_u8()?;
    Ok(ImageRotation {
        angle: u16::from(byte & 0x3) * 90,
    })
}

fn read_imir<R: Read + Seek>(src: &mut Segment<'_, R>) -> Result<ImageMirror> {
    let byte = src.read_u8()?;
    Ok(ImageMirror { axis: byte & 0x1 })
}

fn read_auxc<R: Read + Seek>(src: &mut Segment<'_, R>, config: &DecodeConfig) -> Result<AuxiliaryType> {
    let version = src.read_fullbox_version_no_flags(config)?;
    if version != 0 {
        return Err(Error::Unsupported("auxC version"));
    }
    let aux_type = src.read_null_terminated_string()?;
    let subtype = src.read_remaining()?;
    Ok(AuxiliaryType { aux_type, subtype })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::AvifReader;
    use std::io::Cursor;

    fn round_trip(property: &ItemProperty) -> ItemProperty {
        let mut w = BoxWriter::new();
        property.write(&mut w).unwrap();
        let data = w.into_inner().unwrap();
        let mut reader = AvifReader::new(Cursor::new(data)).unwrap();
        let mut file = reader.segment();
        let mut b = file.next_box().unwrap().unwrap();
        read_property(&mut b, &DecodeConfig::default()).unwrap()
    }

    #[test]
    fn av1c_bit_fields() {
        let av1c = AV1Config {
            profile: 1,
            level: 13,
            tier: 1,
            bit_depth: 10,
            monochrome: false,
            chroma_subsampling_x: 0,
            chroma_subsampling_y: 0,
            chroma_sample_position: 0,
            initial_presentation_delay: None,
            config_obus: TryVec::new(),
        };
        let mut w = BoxWriter::new();
        ItemProperty::AV1Config(av1c.try_clone().unwrap()).write(&mut w).unwrap();
        let data = w.into_inner().unwrap();
        assert_eq!(&data[8..], &[0x81, 0x2d, 0xc0, 0x00]);
        assert_eq!(round_trip(&ItemProperty::AV1Config(av1c.try_clone().unwrap())), ItemProperty::AV1Config(av1c));
    }

    #[test]
    fn unknown_property_stays_opaque() {
        let opaque = ItemProperty::Opaque {
            box_type: FourCC(*b"a1lx"),
            data: std::vec![1u8, 2, 3].into(),
        };
        let decoded = round_trip(&opaque);
        assert!(!decoded.is_supported());
        assert_eq!(decoded, opaque);
    }

    #[test]
    fn unknown_colour_type_is_opaque() {
        let mut w = BoxWriter::new();
        w.start_box(BoxType::ColorInformationBox).unwrap();
        w.write_fourcc(FourCC(*b"nclc")).unwrap();
        w.write_bytes(&[0, 1, 0, 1, 0, 1]).unwrap();
        w.finish_box().unwrap();
        let data = w.into_inner().unwrap();
        let mut reader = AvifReader::new(Cursor::new(data)).unwrap();
        let mut file = reader.segment();
        let mut b = file.next_box().unwrap().unwrap();
        match read_property(&mut b, &DecodeConfig::default()).unwrap() {
            ItemProperty::Opaque { box_type, data } => {
                assert_eq!(box_type, FourCC(*b"colr"));
                assert_eq!(data.len(), 10);
            },
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn transforms_and_color() {
        let rotation = ItemProperty::Rotation(ImageRotation { angle: 270 });
        assert_eq!(round_trip(&rotation), rotation);
        let mirror = ItemProperty::Mirror(ImageMirror { axis: 1 });
        assert_eq!(round_trip(&mirror), mirror);
        let clap = ItemProperty::CleanAperture(CleanAperture {
            width_n: 100,
            width_d: 1,
            height_n: 50,
            height_d: 1,
            horiz_off_n: -3,
            horiz_off_d: 2,
            vert_off_n: 0,
            vert_off_d: 1,
        });
        assert_eq!(round_trip(&clap), clap);
        let nclx = ItemProperty::ColorInformation(ColorInformation::Nclx(CicpColorData::SRGB));
        assert_eq!(round_trip(&nclx), nclx);
        assert!(ItemProperty::Rotation(ImageRotation { angle: 45 }).write(&mut BoxWriter::new()).is_err());
    }

    #[test]
    fn alpha_urns() {
        for urn in [ALPHA_URN, ALPHA_URN_HEVC] {
            let auxc = ItemProperty::AuxiliaryType(AuxiliaryType {
                aux_type: urn.into(),
                subtype: TryVec::new(),
            });
            match round_trip(&auxc) {
                ItemProperty::AuxiliaryType(a) => assert!(a.is_alpha()),
                other => panic!("unexpected {other:?}"),
            }
        }
        let depth = AuxiliaryType {
            aux_type: "urn:mpeg:hevc:2015:auxid:2".into(),
            subtype: TryVec::new(),
        };
        assert!(!depth.is_alpha());
    }

    #[test]
    fn zero_ispe_rejected() {
        let mut w = BoxWriter::new();
        ItemProperty::ImageSpatialExtents(ImageSpatialExtents { width: 0, height: 4 })
            .write(&mut w)
            .unwrap();
        let data = w.into_inner().unwrap();
        let mut reader = AvifReader::new(Cursor::new(data)).unwrap();
        let mut file = reader.segment();
        let mut b = file.next_box().unwrap().unwrap();
        assert!(matches!(read_property(&mut b, &DecodeConfig::default()), Err(Error::InvalidData(_))));
    }
}
