// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Bounds-checked big-endian reading over a seekable stream.
//!
//! [`AvifReader`] owns the stream and remembers the absolute position, so a
//! [`Segment`] (a `[start, end)` window on it) can validate every read and
//! every seek without asking the underlying stream. Box iteration hands out
//! child segments that borrow their parent, so only one window is ever live.

use crate::boxes::{BoxType, FourCC};
use crate::{DecodeConfig, Error, Result, ToU64, ToUsize, TryVec};
use byteorder::{BigEndian, ReadBytesExt};
use log::debug;
use std::io::{BufReader, Read, Seek, SeekFrom};

const READ_AHEAD_SIZE: usize = 4096;

/// Upper bound for null-terminated strings in `infe` and `auxC`.
pub(crate) const MAX_STRING_LENGTH: u64 = 4096;

pub(crate) struct AvifReader<R> {
    inner: BufReader<R>,
    position: u64,
    length: u64,
}

impl<R: Read + Seek> AvifReader<R> {
    pub(crate) fn new(mut source: R) -> Result<Self> {
        let length = source.seek(SeekFrom::End(0))?;
        source.seek(SeekFrom::Start(0))?;
        Ok(Self {
            inner: BufReader::with_capacity(READ_AHEAD_SIZE, source),
            position: 0,
            length,
        })
    }

    pub(crate) fn length(&self) -> u64 {
        self.length
    }

    /// A segment covering the whole stream.
    pub(crate) fn segment(&mut self) -> Segment<'_, R> {
        let end = self.length;
        Segment { reader: self, start: 0, end }
    }

    /// A segment over `[start, end)`, positioned at `start`.
    pub(crate) fn segment_at(&mut self, start: u64, end: u64) -> Result<Segment<'_, R>> {
        if start > end || end > self.length {
            return Err(Error::InvalidData("requested range exceeds stream length"));
        }
        self.seek_to(start)?;
        Ok(Segment { reader: self, start, end })
    }

    fn seek_to(&mut self, position: u64) -> Result<()> {
        if position == self.position {
            return Ok(());
        }
        let delta = if position > self.position {
            i64::try_from(position - self.position)?
        } else {
            -i64::try_from(self.position - position)?
        };
        // stays inside the read-ahead buffer when it can
        self.inner.seek_relative(delta)?;
        self.position = position;
        Ok(())
    }

    fn advance(&mut self, count: u64) {
        self.position += count;
    }
}

/// A `[start, end)` window of the stream. Reads past `end` fail before
/// touching the stream.
pub(crate) struct Segment<'a, R> {
    reader: &'a mut AvifReader<R>,
    start: u64,
    end: u64,
}

impl<R: Read + Seek> Segment<'_, R> {
    pub(crate) fn start(&self) -> u64 {
        self.start
    }

    pub(crate) fn end(&self) -> u64 {
        self.end
    }

    pub(crate) fn len(&self) -> u64 {
        self.end - self.start
    }

    pub(crate) fn position(&self) -> u64 {
        self.reader.position
    }

    pub(crate) fn bytes_left(&self) -> u64 {
        self.end.saturating_sub(self.reader.position)
    }

    pub(crate) fn set_position(&mut self, position: u64) -> Result<()> {
        if position < self.start || position > self.end {
            return Err(Error::OutOfRange("position is outside of the segment"));
        }
        self.reader.seek_to(position)
    }

    pub(crate) fn skip_to_end(&mut self) -> Result<()> {
        self.set_position(self.end)
    }

    fn ensure(&self, count: u64) -> Result<()> {
        match self.reader.position.checked_add(count) {
            Some(end) if end <= self.end => Ok(()),
            _ => Err(Error::InvalidData("requested bytes exceeds segment length")),
        }
    }

    pub(crate) fn read_u8(&mut self) -> Result<u8> {
        self.ensure(1)?;
        let v = self.reader.inner.read_u8()?;
        self.reader.advance(1);
        Ok(v)
    }

    pub(crate) fn read_u16(&mut self) -> Result<u16> {
        self.ensure(2)?;
        let v = self.reader.inner.read_u16::<BigEndian>()?;
        self.reader.advance(2);
        Ok(v)
    }

    pub(crate) fn read_u32(&mut self) -> Result<u32> {
        self.ensure(4)?;
        let v = self.reader.inner.read_u32::<BigEndian>()?;
        self.reader.advance(4);
        Ok(v)
    }

    pub(crate) fn read_i32(&mut self) -> Result<i32> {
        self.ensure(4)?;
        let v = self.reader.inner.read_i32::<BigEndian>()?;
        self.reader.advance(4);
        Ok(v)
    }

    pub(crate) fn read_u64(&mut self) -> Result<u64> {
        self.ensure(8)?;
        let v = self.reader.inner.read_u64::<BigEndian>()?;
        self.reader.advance(8);
        Ok(v)
    }

    pub(crate) fn read_fourcc(&mut self) -> Result<FourCC> {
        let mut bytes = [0u8; 4];
        self.read_into(&mut bytes)?;
        Ok(FourCC(bytes))
    }

    pub(crate) fn read_into(&mut self, buf: &mut [u8]) -> Result<()> {
        self.ensure(buf.len().to_u64())?;
        self.reader.inner.read_exact(buf)?;
        self.reader.advance(buf.len().to_u64());
        Ok(())
    }

    pub(crate) fn read_bytes(&mut self, count: u64) -> Result<TryVec<u8>> {
        self.ensure(count)?;
        let len = usize::try_from(count)?;
        let mut buf = std::vec::Vec::new();
        buf.try_reserve_exact(len)?;
        buf.resize(len, 0);
        self.read_into(&mut buf)?;
        Ok(buf.into())
    }

    pub(crate) fn read_remaining(&mut self) -> Result<TryVec<u8>> {
        self.read_bytes(self.bytes_left())
    }

    /// Reads a null-terminated UTF-8 string. The end of the segment also
    /// terminates the string, since some writers drop the final NUL.
    pub(crate) fn read_null_terminated_string(&mut self) -> Result<std::string::String> {
        let mut bytes = std::vec::Vec::new();
        while self.bytes_left() > 0 {
            let byte = self.read_u8()?;
            if byte == 0 {
                break;
            }
            if bytes.len().to_u64() >= MAX_STRING_LENGTH {
                return Err(Error::InvalidData("string exceeds the maximum supported length"));
            }
            bytes.try_reserve(1)?;
            bytes.push(byte);
        }
        Ok(std::string::String::from_utf8(bytes)?)
    }

    /// Parse the extra header fields for a full box.
    pub(crate) fn read_fullbox_extra(&mut self) -> Result<(u8, u32)> {
        let version = self.read_u8()?;
        let flags_a = self.read_u8()?;
        let flags_b = self.read_u8()?;
        let flags_c = self.read_u8()?;
        Ok((
            version,
            u32::from(flags_a) << 16 | u32::from(flags_b) << 8 | u32::from(flags_c),
        ))
    }

    // Parse the extra fields for a full box whose flag fields must be zero.
    pub(crate) fn read_fullbox_version_no_flags(&mut self, config: &DecodeConfig) -> Result<u8> {
        let (version, flags) = self.read_fullbox_extra()?;

        if flags != 0 && !config.lenient {
            return Err(Error::Unsupported("expected flags to be 0"));
        }

        Ok(version)
    }

    /// Reads the next box header and returns the box with its content
    /// segment, or `None` once this segment is exhausted.
    pub(crate) fn next_box(&mut self) -> Result<Option<BmffBox<'_, R>>> {
        if self.bytes_left() == 0 {
            return Ok(None);
        }
        let head = read_box_header(self)?;
        let content = self.child(&head)?;
        Ok(Some(BmffBox { head, content }))
    }

    /// A child segment for the payload of `head`. The box must lie entirely
    /// within this segment.
    pub(crate) fn child(&mut self, head: &BoxHeader) -> Result<Segment<'_, R>> {
        if head.start < self.start || head.end > self.end || head.payload_start > head.end {
            return Err(Error::InvalidData("box extends beyond its parent"));
        }
        self.set_position(head.payload_start)?;
        Ok(Segment {
            reader: &mut *self.reader,
            start: head.payload_start,
            end: head.end,
        })
    }
}

/// Basic ISO box structure.
///
/// mp4 files are a sequence of possibly-nested 'box' structures.  Each box
/// begins with a header describing the length of the box's data and a
/// four-byte box type which identifies the type of the box.
#[derive(Debug, Clone, Copy)]
pub(crate) struct BoxHeader {
    /// Box type.
    pub(crate) name: BoxType,
    /// Absolute offset of the first header byte.
    pub(crate) start: u64,
    /// Absolute offset of the first payload byte.
    pub(crate) payload_start: u64,
    /// Absolute offset one past the last byte of the box.
    pub(crate) end: u64,
    /// Uuid for extended type.
    #[allow(unused)]
    pub(crate) uuid: Option<[u8; 16]>,
}

impl BoxHeader {
    const MIN_SIZE: u64 = 8; // 4-byte size + 4-byte type
    const MIN_LARGE_SIZE: u64 = 16; // 4-byte size + 4-byte type + 16-byte size

    /// Declared size including the header.
    pub(crate) fn size(&self) -> u64 {
        self.end - self.start
    }
}

pub(crate) struct BmffBox<'a, R> {
    pub(crate) head: BoxHeader,
    pub(crate) content: Segment<'a, R>,
}

/// Read and parse a box header.
///
/// Call this first to determine the type of a particular mp4 box
/// and its length. Used internally for dispatching to specific
/// parsers for the internal content, or to get the length to
/// skip unknown or uninteresting boxes.
///
/// A size of 0 means the box runs to the end of the enclosing segment.
fn read_box_header<R: Read + Seek>(src: &mut Segment<'_, R>) -> Result<BoxHeader> {
    let start = src.position();
    let size32 = src.read_u32()?;
    let name = BoxType::from(src.read_u32()?);
    let size = match size32 {
        0 => src.end() - start,
        1 => {
            let size64 = src.read_u64()?;
            if size64 < BoxHeader::MIN_LARGE_SIZE {
                return Err(Error::InvalidData("malformed wide size"));
            }
            size64
        },
        _ => {
            if u64::from(size32) < BoxHeader::MIN_SIZE {
                return Err(Error::InvalidData("malformed size"));
            }
            u64::from(size32)
        },
    };
    let end = start.checked_add(size).ok_or(Error::InvalidData("box size overflow"))?;
    if end > src.end() {
        return Err(Error::InvalidData("box extends beyond its parent"));
    }
    let uuid = if name == BoxType::UuidBox {
        let mut buffer = [0u8; 16];
        if src.position() + 16 > end {
            return Err(Error::InvalidData("malformed uuid box"));
        }
        src.read_into(&mut buffer)?;
        Some(buffer)
    } else {
        None
    };
    let payload_start = src.position();
    if payload_start > end {
        return Err(Error::InvalidData("box header larger than box"));
    }
    Ok(BoxHeader { name, start, payload_start, end, uuid })
}

/// Skip over the entire contents of a box.
pub(crate) fn skip_box_content<R: Read + Seek>(src: &mut BmffBox<'_, R>) -> Result<()> {
    debug!("{:?} (skipped)", src.head);
    src.content.skip_to_end()
}

/// Boxes this crate decodes must be consumed exactly.
pub(crate) fn check_parser_state<R: Read + Seek>(src: &BmffBox<'_, R>) -> Result<()> {
    if src.content.bytes_left() == 0 {
        Ok(())
    } else {
        debug!("{:?}: {} bytes left", src.head, src.content.bytes_left());
        Err(Error::InvalidData("unread box content or bad parser sync"))
    }
}

/// Bytes needed to hold `len` items of `T`, for limit checks before allocating.
pub(crate) fn byte_count<T>(len: u64) -> u64 {
    len.saturating_mul(std::mem::size_of::<T>().to_u64())
}

/// A `usize` length for a buffer described by a 32-bit count.
pub(crate) fn count_to_usize(count: u32) -> usize {
    count.to_usize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn boxed(name: &[u8; 4], payload: &[u8]) -> std::vec::Vec<u8> {
        let mut out = std::vec::Vec::new();
        out.extend_from_slice(&(8 + payload.len() as u32).to_be_bytes());
        out.extend_from_slice(name);
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn reads_are_confined_to_segment() {
        let data = [0u8, 1, 2, 3, 4, 5, 6, 7];
        let mut reader = AvifReader::new(Cursor::new(&data[..])).unwrap();
        let mut seg = reader.segment_at(2, 6).unwrap();
        assert_eq!(seg.read_u16().unwrap(), 0x0203);
        assert_eq!(seg.bytes_left(), 2);
        assert!(matches!(seg.read_u32(), Err(Error::InvalidData(_))));
        assert_eq!(seg.read_u16().unwrap(), 0x0405);
        assert!(seg.read_u8().is_err());
    }

    #[test]
    fn set_position_outside_segment_is_out_of_range() {
        let data = [0u8; 16];
        let mut reader = AvifReader::new(Cursor::new(&data[..])).unwrap();
        let mut seg = reader.segment_at(4, 12).unwrap();
        assert!(seg.set_position(12).is_ok());
        assert!(seg.set_position(4).is_ok());
        assert!(matches!(seg.set_position(3), Err(Error::OutOfRange(_))));
        assert!(matches!(seg.set_position(13), Err(Error::OutOfRange(_))));
    }

    #[test]
    fn child_box_must_fit_parent() {
        // parent claims 16 bytes, child inside claims 100
        let mut data = std::vec::Vec::new();
        data.extend_from_slice(&16u32.to_be_bytes());
        data.extend_from_slice(b"meta");
        data.extend_from_slice(&100u32.to_be_bytes());
        data.extend_from_slice(b"hdlr");
        data.extend_from_slice(&[0u8; 64]);
        let mut reader = AvifReader::new(Cursor::new(data)).unwrap();
        let mut file = reader.segment();
        let mut parent = file.next_box().unwrap().unwrap();
        assert!(parent.head.name == BoxType::MetadataBox);
        assert_eq!(parent.content.len(), 8);
        assert!(matches!(parent.content.next_box(), Err(Error::InvalidData(_))));
    }

    #[test]
    fn iterates_sibling_boxes() {
        let mut data = boxed(b"ftyp", b"avif\0\0\0\0");
        data.extend(boxed(b"zzzz", &[1, 2, 3]));
        data.extend(boxed(b"free", &[]));
        let mut reader = AvifReader::new(Cursor::new(data)).unwrap();
        let mut file = reader.segment();
        let mut names = std::vec::Vec::new();
        while let Some(mut b) = file.next_box().unwrap() {
            names.push(FourCC::from(b.head.name));
            skip_box_content(&mut b).unwrap();
            check_parser_state(&b).unwrap();
        }
        assert_eq!(names, [FourCC(*b"ftyp"), FourCC(*b"zzzz"), FourCC(*b"free")]);
    }

    #[test]
    fn size_zero_runs_to_parent_end() {
        let mut data = std::vec::Vec::new();
        data.extend_from_slice(&0u32.to_be_bytes());
        data.extend_from_slice(b"mdat");
        data.extend_from_slice(&[9u8; 10]);
        let mut reader = AvifReader::new(Cursor::new(data)).unwrap();
        let mut file = reader.segment();
        let b = file.next_box().unwrap().unwrap();
        assert_eq!(b.head.size(), 18);
        assert_eq!(b.content.len(), 10);
    }

    #[test]
    fn large_size_header() {
        let mut data = std::vec::Vec::new();
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(b"free");
        data.extend_from_slice(&20u64.to_be_bytes());
        data.extend_from_slice(&[0u8; 4]);
        let mut reader = AvifReader::new(Cursor::new(data)).unwrap();
        let mut file = reader.segment();
        let b = file.next_box().unwrap().unwrap();
        assert_eq!(b.head.payload_start, 16);
        assert_eq!(b.content.len(), 4);
    }

    #[test]
    fn strings_stop_at_nul_or_segment_end() {
        let data = b"pict\0rest";
        let mut reader = AvifReader::new(Cursor::new(&data[..])).unwrap();
        let mut seg = reader.segment();
        assert_eq!(seg.read_null_terminated_string().unwrap(), "pict");
        assert_eq!(seg.read_null_terminated_string().unwrap(), "rest");
        assert_eq!(seg.bytes_left(), 0);
    }
}
