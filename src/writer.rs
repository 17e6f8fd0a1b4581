// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use crate::boxes::{BoxType, FourCC};
use crate::{Error, Result, ToU64};
use byteorder::{BigEndian, WriteBytesExt};

/// In-memory big-endian box writer, the mirror of `reader::Segment`.
///
/// Box sizes are written as placeholders by `start_box` and patched by the
/// matching `finish_box`, so boxes can nest freely.
#[derive(Default)]
pub(crate) struct BoxWriter {
    data: std::vec::Vec<u8>,
    // Positions of the 4-byte size fields of boxes not yet finished.
    box_marker_offsets: std::vec::Vec<usize>,
}

impl BoxWriter {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn offset(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn try_reserve(&mut self, size: usize) -> Result<()> {
        self.data.try_reserve(size).map_err(|_| Error::OutOfMemory)
    }

    pub(crate) fn write_u8(&mut self, value: u8) -> Result<()> {
        self.try_reserve(1)?;
        self.data.write_u8(value)?;
        Ok(())
    }

    pub(crate) fn write_u16(&mut self, value: u16) -> Result<()> {
        self.try_reserve(2)?;
        self.data.write_u16::<BigEndian>(value)?;
        Ok(())
    }

    pub(crate) fn write_u32(&mut self, value: u32) -> Result<()> {
        self.try_reserve(4)?;
        self.data.write_u32::<BigEndian>(value)?;
        Ok(())
    }

    pub(crate) fn write_i32(&mut self, value: i32) -> Result<()> {
        self.try_reserve(4)?;
        self.data.write_i32::<BigEndian>(value)?;
        Ok(())
    }

    pub(crate) fn write_u64(&mut self, value: u64) -> Result<()> {
        self.try_reserve(8)?;
        self.data.write_u64::<BigEndian>(value)?;
        Ok(())
    }

    /// Writes `value` in `size` bytes (4 or 8), as `iloc` offset fields are sized.
    pub(crate) fn write_sized(&mut self, size: u8, value: u64) -> Result<()> {
        match size {
            4 => self.write_u32(u32::try_from(value)?),
            8 => self.write_u64(value),
            _ => Err(Error::InvalidData("unsupported field size")),
        }
    }

    pub(crate) fn write_fourcc(&mut self, value: FourCC) -> Result<()> {
        self.write_bytes(value.as_bytes())
    }

    pub(crate) fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.try_reserve(bytes.len())?;
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    pub(crate) fn write_str_with_nul(&mut self, value: &str) -> Result<()> {
        if value.as_bytes().contains(&0) {
            return Err(Error::InvalidData("string contains NUL"));
        }
        self.write_bytes(value.as_bytes())?;
        self.write_u8(0)
    }

    pub(crate) fn patch_sized_at(&mut self, offset: usize, size: u8, value: u64) -> Result<()> {
        let bytes = value.to_be_bytes();
        let field = match size {
            4 => {
                if value > u64::from(u32::MAX) {
                    return Err(Error::InvalidData("offset does not fit a 32-bit field"));
                }
                &bytes[4..]
            },
            8 => &bytes[..],
            _ => return Err(Error::InvalidData("unsupported field size")),
        };
        let dest = offset
            .checked_add(field.len())
            .and_then(|end| self.data.get_mut(offset..end))
            .ok_or(Error::OutOfRange("patch outside of written data"))?;
        dest.copy_from_slice(field);
        Ok(())
    }

    pub(crate) fn start_box(&mut self, name: BoxType) -> Result<()> {
        self.box_marker_offsets.try_reserve(1)?;
        self.box_marker_offsets.push(self.offset());
        // 4 bytes for size to be filled out later.
        self.write_u32(0)?;
        self.write_fourcc(FourCC::from(name))
    }

    pub(crate) fn start_full_box(&mut self, name: BoxType, version: u8, flags: u32) -> Result<()> {
        if flags > 0x00FF_FFFF {
            return Err(Error::InvalidData("full box flags exceed 24 bits"));
        }
        self.start_box(name)?;
        self.write_u32(u32::from(version) << 24 | flags)
    }

    pub(crate) fn finish_box(&mut self) -> Result<()> {
        let offset = self
            .box_marker_offsets
            .pop()
            .ok_or(Error::InvalidData("finish_box without start_box"))?;
        let box_size = u32::try_from(self.offset() - offset)
            .map_err(|_| Error::Unsupported("box larger than 4GiB"))?;
        self.patch_sized_at(offset, 4, u64::from(box_size))
    }

    /// Header of a box whose payload is appended outside of this writer.
    /// Uses the 64-bit size form when the box would not fit 32 bits.
    pub(crate) fn write_box_header(&mut self, name: BoxType, payload_len: u64) -> Result<()> {
        let small = payload_len.checked_add(8).filter(|&s| s <= u64::from(u32::MAX));
        match small {
            Some(size) => self.write_u32(u32::try_from(size)?)?,
            None => {
                let size = payload_len
                    .checked_add(16)
                    .ok_or(Error::Unsupported("box size overflow"))?;
                self.write_u32(1)?;
                self.write_fourcc(FourCC::from(name))?;
                return self.write_u64(size);
            },
        }
        self.write_fourcc(FourCC::from(name))
    }

    pub(crate) fn len(&self) -> u64 {
        self.data.len().to_u64()
    }

    pub(crate) fn into_inner(self) -> Result<std::vec::Vec<u8>> {
        if !self.box_marker_offsets.is_empty() {
            return Err(Error::InvalidData("unfinished box"));
        }
        Ok(self.data)
    }
}

#[test]
fn nested_boxes_get_sizes() {
    let mut w = BoxWriter::new();
    w.start_box(BoxType::MetadataBox).unwrap();
    w.start_full_box(BoxType::PrimaryItemBox, 0, 0).unwrap();
    w.write_u16(1).unwrap();
    w.finish_box().unwrap();
    w.finish_box().unwrap();
    let data = w.into_inner().unwrap();
    assert_eq!(data.len(), 8 + 14);
    assert_eq!(&data[..8], &[0, 0, 0, 22, b'm', b'e', b't', b'a']);
    assert_eq!(&data[8..16], &[0, 0, 0, 14, b'p', b'i', b't', b'm']);
    assert_eq!(&data[16..], &[0, 0, 0, 0, 0, 1]);
}

#[test]
fn box_header_switches_to_largesize() {
    let mut w = BoxWriter::new();
    w.write_box_header(BoxType::MediaDataBox, 100).unwrap();
    assert_eq!(w.len(), 8);
    let mut w = BoxWriter::new();
    w.write_box_header(BoxType::MediaDataBox, 1 << 32).unwrap();
    let data = w.into_inner().unwrap();
    assert_eq!(&data[..8], &[0, 0, 0, 1, b'm', b'd', b'a', b't']);
    assert_eq!(u64::from_be_bytes(data[8..16].try_into().unwrap()), (1 << 32) + 16);
}

#[test]
fn patch_rejects_oversized_32bit_value() {
    let mut w = BoxWriter::new();
    w.write_u32(0).unwrap();
    assert!(w.patch_sized_at(0, 4, 0x1234).is_ok());
    assert!(w.patch_sized_at(0, 4, 1 << 32).is_err());
    assert!(w.patch_sized_at(2, 4, 1).is_err());
    assert_eq!(w.into_inner().unwrap(), [0, 0, 0x12, 0x34]);
}
