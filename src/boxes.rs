// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use std::fmt;

/// A four-character code, as used for box types, brands, item types and
/// reference types.
#[derive(Default, PartialEq, Eq, Clone, Copy, Hash, PartialOrd, Ord)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    #[must_use]
    pub const fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }

    #[must_use]
    pub const fn to_u32(self) -> u32 {
        u32::from_be_bytes(self.0)
    }
}

impl From<u32> for FourCC {
    fn from(number: u32) -> Self {
        Self(number.to_be_bytes())
    }
}

impl From<BoxType> for FourCC {
    fn from(t: BoxType) -> Self {
        let t: u32 = t.into();
        Self::from(t)
    }
}

impl From<[u8; 4]> for FourCC {
    fn from(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }
}

impl PartialEq<&[u8; 4]> for FourCC {
    fn eq(&self, other: &&[u8; 4]) -> bool {
        self.0 == **other
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) if s.bytes().all(|b| b.is_ascii_graphic() || b == b' ') => f.write_str(s),
            _ => write!(f, "0x{:08x}", self.to_u32()),
        }
    }
}

macro_rules! box_database {
    ($($(#[$attr:meta])* $boxenum:ident $boxtype:expr),*,) => {
        /// Box types this crate knows how to decode or write.
        ///
        /// Anything else decodes as `UnknownBox` and is skipped (or kept
        /// opaque, for item properties).
        #[derive(Clone, Copy, PartialEq, Eq)]
        pub enum BoxType {
            $($(#[$attr])* $boxenum),*,
            UnknownBox(u32),
        }

        impl From<u32> for BoxType {
            fn from(t: u32) -> Self {
                match t {
                    $($boxtype => Self::$boxenum),*,
                    _ => Self::UnknownBox(t),
                }
            }
        }

        impl From<BoxType> for u32 {
            fn from(b: BoxType) -> Self {
                match b {
                    $(BoxType::$boxenum => $boxtype),*,
                    BoxType::UnknownBox(t) => t,
                }
            }
        }

        impl fmt::Debug for BoxType {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Debug::fmt(&FourCC::from(*self), f)
            }
        }

        impl fmt::Display for BoxType {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                fmt::Display::fmt(&FourCC::from(*self), f)
            }
        }
    }
}

box_database!(
    FileTypeBox                       0x6674_7970, // "ftyp"
    MetadataBox                       0x6d65_7461, // "meta"
    MediaDataBox                      0x6d64_6174, // "mdat"
    FreeBox                           0x6672_6565, // "free"
    HandlerBox                        0x6864_6c72, // "hdlr"
    PrimaryItemBox                    0x7069_746d, // "pitm"
    ItemLocationBox                   0x696c_6f63, // "iloc"
    ItemInfoBox                       0x6969_6e66, // "iinf"
    ItemInfoEntry                     0x696e_6665, // "infe"
    ItemReferenceBox                  0x6972_6566, // "iref"
    ItemPropertiesBox                 0x6970_7270, // "iprp"
    ItemPropertyContainerBox          0x6970_636f, // "ipco"
    ItemPropertyAssociationBox        0x6970_6d61, // "ipma"
    ItemDataBox                       0x6964_6174, // "idat"
    ImageSpatialExtentsBox            0x6973_7065, // "ispe"
    PixelAspectRatioBox               0x7061_7370, // "pasp"
    AV1CodecConfigurationBox          0x6176_3143, // "av1C"
    PixelInformationBox               0x7069_7869, // "pixi"
    ColorInformationBox               0x636f_6c72, // "colr"
    CleanApertureBox                  0x636c_6170, // "clap"
    ImageRotationBox                  0x6972_6f74, // "irot"
    ImageMirrorBox                    0x696d_6972, // "imir"
    AuxiliaryTypeProperty             0x6175_7843, // "auxC"
    UuidBox                           0x7575_6964, // "uuid"
);

/// Item types
pub(crate) const AV01_ITEM: FourCC = FourCC(*b"av01");
pub(crate) const GRID_ITEM: FourCC = FourCC(*b"grid");
pub(crate) const EXIF_ITEM: FourCC = FourCC(*b"Exif");
pub(crate) const MIME_ITEM: FourCC = FourCC(*b"mime");

/// Item reference types
pub(crate) const DIMG_REFERENCE: FourCC = FourCC(*b"dimg");
pub(crate) const AUXL_REFERENCE: FourCC = FourCC(*b"auxl");
pub(crate) const CDSC_REFERENCE: FourCC = FourCC(*b"cdsc");
pub(crate) const PREM_REFERENCE: FourCC = FourCC(*b"prem");

#[test]
fn box_type_round_trips_through_u32() {
    let t = BoxType::from(0x6970_6d61);
    assert!(t == BoxType::ItemPropertyAssociationBox);
    assert_eq!(u32::from(t), 0x6970_6d61);
    assert_eq!(FourCC::from(t), FourCC(*b"ipma"));

    let unknown = BoxType::from(u32::from_be_bytes(*b"zzzz"));
    assert!(unknown == BoxType::UnknownBox(u32::from_be_bytes(*b"zzzz")));
    assert_eq!(format!("{unknown:?}"), "zzzz");
}

#[test]
fn fourcc_display_escapes_binary() {
    assert_eq!(FourCC(*b"avif").to_string(), "avif");
    assert_eq!(FourCC([0, 1, 2, 3]).to_string(), "0x00010203");
}
