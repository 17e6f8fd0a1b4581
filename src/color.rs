// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! CICP (ITU-T H.273) color description, as carried by `colr` boxes of type `nclx`.

use crate::Error;
use std::fmt;
use std::str::FromStr;

/// Color primaries, transfer characteristics and matrix coefficients, as
/// code points from ITU-T H.273.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CicpColorData {
    pub color_primaries: u16,
    pub transfer_characteristics: u16,
    pub matrix_coefficients: u16,
    pub full_range: bool,
}

impl CicpColorData {
    pub const PRIMARIES_BT709: u16 = 1;
    pub const PRIMARIES_UNSPECIFIED: u16 = 2;
    pub const PRIMARIES_BT601: u16 = 6;
    pub const PRIMARIES_BT2020: u16 = 9;
    pub const PRIMARIES_SMPTE432: u16 = 12;

    pub const TRANSFER_BT709: u16 = 1;
    pub const TRANSFER_UNSPECIFIED: u16 = 2;
    pub const TRANSFER_LINEAR: u16 = 8;
    pub const TRANSFER_SRGB: u16 = 13;
    pub const TRANSFER_SMPTE2084: u16 = 16;
    pub const TRANSFER_HLG: u16 = 18;

    pub const MATRIX_IDENTITY: u16 = 0;
    pub const MATRIX_BT709: u16 = 1;
    pub const MATRIX_UNSPECIFIED: u16 = 2;
    pub const MATRIX_BT601: u16 = 6;
    pub const MATRIX_BT2020_NCL: u16 = 9;

    /// sRGB: BT.709 primaries, sRGB transfer, BT.601 matrix, full range.
    pub const SRGB: Self = Self {
        color_primaries: Self::PRIMARIES_BT709,
        transfer_characteristics: Self::TRANSFER_SRGB,
        matrix_coefficients: Self::MATRIX_BT601,
        full_range: true,
    };

    /// Parses the older `nclx:primaries:transfer:matrix:full|limited` form.
    pub fn from_legacy_nclx(value: &str) -> Result<Self, Error> {
        let mut parts = value.split(':');
        if parts.next() != Some("nclx") {
            return Err(Error::InvalidData("legacy nclx string has no nclx prefix"));
        }
        let color_primaries = parse_code_point(parts.next())?;
        let transfer_characteristics = parse_code_point(parts.next())?;
        let matrix_coefficients = parse_code_point(parts.next())?;
        let full_range = match parts.next() {
            Some("full") => true,
            Some("limited") => false,
            _ => return Err(Error::InvalidData("legacy nclx range must be full or limited")),
        };
        if parts.next().is_some() {
            return Err(Error::InvalidData("trailing fields in legacy nclx string"));
        }
        Ok(Self {
            color_primaries,
            transfer_characteristics,
            matrix_coefficients,
            full_range,
        })
    }

    /// Accepts either the current comma-separated form or the legacy `nclx:` form.
    pub fn parse_any(value: &str) -> Result<Self, Error> {
        if value.starts_with("nclx:") {
            Self::from_legacy_nclx(value)
        } else {
            value.parse()
        }
    }
}

impl Default for CicpColorData {
    fn default() -> Self {
        Self::SRGB
    }
}

fn parse_code_point(part: Option<&str>) -> Result<u16, Error> {
    part.and_then(|p| p.trim().parse().ok())
        .ok_or(Error::InvalidData("invalid CICP code point"))
}

/// `primaries,transfer,matrix,fullRange` with `fullRange` as `0` or `1`.
impl fmt::Display for CicpColorData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{},{},{},{}",
            self.color_primaries,
            self.transfer_characteristics,
            self.matrix_coefficients,
            u8::from(self.full_range)
        )
    }
}

impl FromStr for CicpColorData {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split(',');
        let color_primaries = parse_code_point(parts.next())?;
        let transfer_characteristics = parse_code_point(parts.next())?;
        let matrix_coefficients = parse_code_point(parts.next())?;
        let full_range = match parts.next().map(str::trim) {
            Some("1") => true,
            Some("0") => false,
            _ => return Err(Error::InvalidData("CICP full range flag must be 0 or 1")),
        };
        if parts.next().is_some() {
            return Err(Error::InvalidData("trailing fields in CICP string"));
        }
        Ok(Self {
            color_primaries,
            transfer_characteristics,
            matrix_coefficients,
            full_range,
        })
    }
}

#[test]
fn cicp_string_forms() {
    let bt2020 = CicpColorData {
        color_primaries: 9,
        transfer_characteristics: 16,
        matrix_coefficients: 9,
        full_range: false,
    };
    assert_eq!(bt2020.to_string(), "9,16,9,0");
    assert_eq!("9,16,9,0".parse::<CicpColorData>().unwrap(), bt2020);
    assert_eq!(CicpColorData::from_legacy_nclx("nclx:9:16:9:limited").unwrap(), bt2020);
    assert_eq!(CicpColorData::parse_any("1,13,6,1").unwrap(), CicpColorData::SRGB);
    assert_eq!(CicpColorData::parse_any("nclx:1:13:6:full").unwrap(), CicpColorData::SRGB);

    assert!("1,13,6".parse::<CicpColorData>().is_err());
    assert!("1,13,6,2".parse::<CicpColorData>().is_err());
    assert!("1,13,6,1,0".parse::<CicpColorData>().is_err());
    assert!(CicpColorData::from_legacy_nclx("nclx:1:13:6:partial").is_err());
    assert!(CicpColorData::from_legacy_nclx("prof:1:13:6:full").is_err());
}
