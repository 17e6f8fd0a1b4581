// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Resolving item extents to absolute offsets, and reading them into one buffer.

use crate::meta::{ConstructionMethod, Extent, ItemDataBox, ItemLocationEntry};
use crate::reader::AvifReader;
use crate::{Error, ResourceTracker, Result, ToU64, TryVec};
use log::debug;
use std::io::{Cursor, Read, Seek};

/// The bytes of one item, gathered from all of its extents.
#[derive(Debug)]
pub struct AvifItemData {
    data: TryVec<u8>,
}

impl AvifItemData {
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    /// A seekable read-only view of the bytes.
    #[must_use]
    pub fn reader(&self) -> Cursor<&[u8]> {
        Cursor::new(&self.data[..])
    }

    /// Lends the bytes to `f` for the duration of the call, e.g. to pass
    /// them to a codec.
    pub fn with_bytes<T>(&self, f: impl FnOnce(&[u8]) -> T) -> T {
        f(&self.data)
    }

    #[must_use]
    pub fn into_inner(self) -> TryVec<u8> {
        self.data
    }
}

impl AsRef<[u8]> for AvifItemData {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

/// Absolute file offset of `extent`. When this returns `Ok(o)`,
/// `o + extent.length <= file_length` holds.
///
/// Idat-relative extents are checked against the `idat` payload first and
/// the file second.
pub(crate) fn calculate_extent_offset(
    base_offset: u64,
    method: ConstructionMethod,
    extent: &Extent,
    file_length: u64,
    idat: Option<&ItemDataBox>,
) -> Result<u64> {
    let relative = base_offset
        .checked_add(extent.offset)
        .ok_or(Error::InvalidData("extent offset overflow"))?;

    let absolute = match method {
        ConstructionMethod::File => relative,
        ConstructionMethod::Idat => {
            let idat = idat.ok_or(Error::InvalidData("idat construction method without an idat box"))?;
            let relative_end = relative
                .checked_add(extent.length)
                .ok_or(Error::InvalidData("extent length overflow"))?;
            if relative_end > idat.length {
                return Err(Error::InvalidData("extent exceeds the idat box"));
            }
            idat.offset
                .checked_add(relative)
                .ok_or(Error::InvalidData("extent offset overflow"))?
        },
    };

    let end = absolute
        .checked_add(extent.length)
        .ok_or(Error::InvalidData("extent length overflow"))?;
    if end > file_length {
        return Err(Error::InvalidData("extent exceeds the file length"));
    }
    Ok(absolute)
}

/// Length of an extent whose declared length is 0 ("to the end of the source").
fn implied_length(method: ConstructionMethod, absolute: u64, file_length: u64, idat: Option<&ItemDataBox>) -> u64 {
    let source_end = match (method, idat) {
        (ConstructionMethod::Idat, Some(idat)) => idat.offset.saturating_add(idat.length),
        _ => file_length,
    };
    source_end.saturating_sub(absolute)
}

/// Reads all extents of `entry`, in declared order, into one buffer of
/// `entry.total_item_size` bytes.
pub(crate) fn read_item_data<R: Read + Seek>(
    reader: &mut AvifReader<R>,
    entry: &ItemLocationEntry,
    idat: Option<&ItemDataBox>,
    tracker: &ResourceTracker<'_>,
) -> Result<AvifItemData> {
    let file_length = reader.length();
    let first = entry.extents.first().ok_or(Error::InvalidData("item has no extents"))?;

    if entry.extents.len() == 1 {
        let absolute = calculate_extent_offset(entry.base_offset, entry.construction_method, first, file_length, idat)?;
        let length = if first.length == 0 {
            implied_length(entry.construction_method, absolute, file_length, idat)
        } else {
            first.length
        };
        if first.length != 0 && length != entry.total_item_size {
            return Err(Error::InvalidData("extent length does not match the item size"));
        }
        let mut data = allocate(length, tracker)?;
        let mut segment = reader.segment_at(absolute, absolute + length)?;
        segment.read_into(&mut data)?;
        return Ok(AvifItemData { data: data.into() });
    }

    let mut data = allocate(entry.total_item_size, tracker)?;
    let mut remaining = entry.total_item_size;
    let mut written = 0usize;
    for extent in entry.extents.iter() {
        if extent.length > remaining {
            return Err(Error::InvalidData("extent length exceeds the remaining item size"));
        }
        let absolute = calculate_extent_offset(entry.base_offset, entry.construction_method, extent, file_length, idat)?;
        let length = usize::try_from(extent.length)?;
        let dest = data
            .get_mut(written..written + length)
            .ok_or(Error::InvalidData("extent length exceeds the remaining item size"))?;
        let mut segment = reader.segment_at(absolute, absolute + extent.length)?;
        segment.read_into(dest)?;
        written += length;
        remaining -= extent.length;
    }

    if remaining != 0 {
        debug!("item {}: {remaining} bytes not covered by extents", entry.item_id);
        return Err(Error::InvalidData("item size is larger than its extents"));
    }
    debug_assert_eq!(written.to_u64(), entry.total_item_size);

    Ok(AvifItemData { data: data.into() })
}

fn allocate(len: u64, tracker: &ResourceTracker<'_>) -> Result<std::vec::Vec<u8>> {
    tracker.validate_allocation(len)?;
    let len = usize::try_from(len)?;
    let mut data = std::vec::Vec::new();
    data.try_reserve_exact(len)?;
    data.resize(len, 0);
    Ok(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::DecodeConfig;

    fn entry(method: ConstructionMethod, base_offset: u64, extents: &[Extent], total_item_size: u64) -> ItemLocationEntry {
        let mut list = TryVec::new();
        for e in extents {
            list.push(*e).unwrap();
        }
        ItemLocationEntry {
            item_id: 1,
            construction_method: method,
            base_offset,
            extents: list,
            total_item_size,
        }
    }

    fn file() -> std::vec::Vec<u8> {
        (0..1000u32).map(|i| (i % 251) as u8).collect()
    }

    #[test]
    fn three_extents_concatenate_in_order() {
        let data = file();
        let extents = [
            Extent { offset: 500, length: 100 },
            Extent { offset: 0, length: 200 },
            Extent { offset: 900, length: 50 },
        ];
        let item = entry(ConstructionMethod::File, 0, &extents, 350);
        let config = DecodeConfig::default();
        let mut reader = AvifReader::new(Cursor::new(&data[..])).unwrap();
        let out = read_item_data(&mut reader, &item, None, &ResourceTracker::new(&config)).unwrap();
        assert_eq!(out.len(), 350);
        let mut expected = data[500..600].to_vec();
        expected.extend_from_slice(&data[0..200]);
        expected.extend_from_slice(&data[900..950]);
        assert_eq!(out.as_slice(), &expected[..]);

        let mut streamed = std::vec::Vec::new();
        out.reader().read_to_end(&mut streamed).unwrap();
        assert_eq!(streamed, expected);
        assert_eq!(out.with_bytes(|bytes| bytes[100]), data[0]);
        assert_eq!(&out.into_inner()[..], &expected[..]);
    }

    #[test]
    fn extents_longer_than_item_size_are_rejected() {
        let data = file();
        let extents = [
            Extent { offset: 500, length: 100 },
            Extent { offset: 0, length: 200 },
            Extent { offset: 900, length: 50 },
        ];
        let item = entry(ConstructionMethod::File, 0, &extents, 320);
        let config = DecodeConfig::default();
        let mut reader = AvifReader::new(Cursor::new(&data[..])).unwrap();
        let err = read_item_data(&mut reader, &item, None, &ResourceTracker::new(&config)).unwrap_err();
        assert!(matches!(err, Error::InvalidData(_)));

        // and the reverse: the table claims more than the extents deliver
        let item = entry(ConstructionMethod::File, 0, &extents, 400);
        let err = read_item_data(&mut reader, &item, None, &ResourceTracker::new(&config)).unwrap_err();
        assert!(matches!(err, Error::InvalidData(_)));
    }

    #[test]
    fn offsets_never_point_out_of_bounds() {
        let file_length = 1000;
        let cases = [
            (0, Extent { offset: 0, length: 1000 }, true),
            (10, Extent { offset: 990, length: 0 }, true),
            (10, Extent { offset: 990, length: 1 }, false),
            (u64::MAX, Extent { offset: 1, length: 0 }, false),
            (1, Extent { offset: u64::MAX - 1, length: 1 }, false),
        ];
        for (base, extent, ok) in cases {
            let result = calculate_extent_offset(base, ConstructionMethod::File, &extent, file_length, None);
            assert_eq!(result.is_ok(), ok, "{base} {extent:?}");
            if let Ok(o) = result {
                assert!(o + extent.length <= file_length);
            }
        }
    }

    #[test]
    fn idat_offsets_checked_against_idat_then_file() {
        let idat = ItemDataBox { offset: 100, length: 20 };
        let inside = Extent { offset: 4, length: 16 };
        assert_eq!(calculate_extent_offset(0, ConstructionMethod::Idat, &inside, 1000, Some(&idat)).unwrap(), 104);
        let past_idat = Extent { offset: 4, length: 17 };
        assert!(calculate_extent_offset(0, ConstructionMethod::Idat, &past_idat, 1000, Some(&idat)).is_err());
        assert!(calculate_extent_offset(0, ConstructionMethod::Idat, &inside, 110, Some(&idat)).is_err());
        assert!(calculate_extent_offset(0, ConstructionMethod::Idat, &inside, 1000, None).is_err());
    }

    #[test]
    fn single_extent_to_end_of_idat() {
        let data = file();
        let idat = ItemDataBox { offset: 100, length: 20 };
        let item = entry(ConstructionMethod::Idat, 0, &[Extent { offset: 12, length: 0 }], 0);
        let config = DecodeConfig::default();
        let mut reader = AvifReader::new(Cursor::new(&data[..])).unwrap();
        let out = read_item_data(&mut reader, &item, Some(&idat), &ResourceTracker::new(&config)).unwrap();
        assert_eq!(out.as_slice(), &data[112..120]);
    }

    #[test]
    fn allocation_respects_memory_limit() {
        let data = file();
        let item = entry(ConstructionMethod::File, 0, &[Extent { offset: 0, length: 600 }], 600);
        let config = DecodeConfig::default().with_peak_memory_limit(500);
        let mut reader = AvifReader::new(Cursor::new(&data[..])).unwrap();
        let err = read_item_data(&mut reader, &item, None, &ResourceTracker::new(&config)).unwrap_err();
        assert!(matches!(err, Error::ResourceLimitExceeded(_)));
    }
}
