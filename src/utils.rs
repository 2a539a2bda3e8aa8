// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Container framing helpers: Annex B start code scanning and conversion
//! between Annex B and length prefixed (AVCC) streams.
//!
//! None of these look inside the NAL units.

use std::io::Cursor;

use anyhow::anyhow;
use anyhow::bail;
use anyhow::Context;
use anyhow::Result;
use byteorder::BigEndian;
use byteorder::ByteOrder;
use bytes::Buf;

const START_CODE: [u8; 4] = [0x00, 0x00, 0x00, 0x01];

/// Location of a NAL unit in an Annex B byte stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NaluSpan {
    /// Offset of the start code.
    pub sc_offset: usize,
    /// Offset of the first byte of the NAL unit.
    pub start: usize,
    /// Offset past the last byte of the NAL unit.
    pub end: usize,
    /// Whether the next start code was found. When it was not, the NAL unit
    /// runs to the end of the buffer and may be incomplete.
    pub complete: bool,
}

impl NaluSpan {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Finds the first `00 00 01` or `00 00 00 01` start code, returning the
/// offsets of its first byte and of the byte following it.
fn find_start_code(buf: &[u8]) -> Option<(usize, usize)> {
    let pos = buf
        .windows(3)
        .position(|window| window == [0x00, 0x00, 0x01])?;

    // A zero byte right before makes it a four byte start code.
    if pos > 0 && buf[pos - 1] == 0x00 {
        Some((pos - 1, pos + 3))
    } else {
        Some((pos, pos + 3))
    }
}

/// Finds the end of a NAL unit: the first `00 00 00` or `00 00 01` sequence.
fn find_end_code(buf: &[u8]) -> Option<usize> {
    buf.windows(3)
        .position(|window| window[0] == 0x00 && window[1] == 0x00 && window[2] <= 0x01)
}

/// Finds the next NAL unit of an Annex B byte stream, B.1.
pub fn find_nalu(buf: &[u8]) -> Result<NaluSpan> {
    let (sc_offset, start) = find_start_code(buf).ok_or_else(|| anyhow!("no start code found"))?;

    let (end, complete) = match find_end_code(&buf[start..]) {
        Some(len) => (start + len, true),
        None => (buf.len(), false),
    };

    Ok(NaluSpan {
        sc_offset,
        start,
        end,
        complete,
    })
}

/// Iterator over the NAL units of an Annex B byte stream, start codes
/// excluded.
pub struct NaluIterator<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> NaluIterator<'a> {
    pub fn new(stream: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(stream),
        }
    }
}

impl<'a> Iterator for NaluIterator<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let data = *self.cursor.get_ref();
        let pos = self.cursor.position() as usize;
        let span = find_nalu(data.get(pos..)?).ok()?;

        self.cursor.set_position((pos + span.end) as u64);
        Some(&data[pos + span.start..pos + span.end])
    }
}

/// Replaces in place the 4-byte start codes of an Annex B stream with the
/// big-endian size of the NAL unit that follows them.
///
/// Every start code must be 4 bytes long; trailing zero bytes between NAL
/// units are counted in the preceding one.
pub fn byte_stream_to_avcc(buf: &mut [u8]) -> Result<()> {
    let mut starts = Vec::new();
    let mut off = 0;

    while off < buf.len() {
        let span = match find_nalu(&buf[off..]) {
            Ok(span) => span,
            Err(_) if !starts.is_empty() => break,
            Err(e) => return Err(e.context("byte stream has no NAL unit")),
        };

        if span.start - span.sc_offset != START_CODE.len() {
            bail!("3-byte start code at offset {}", off + span.sc_offset);
        }
        if starts.is_empty() && span.sc_offset != 0 {
            bail!("{} bytes before the first start code", span.sc_offset);
        }

        starts.push(off + span.sc_offset);
        off += span.end;
    }

    for (i, &sc) in starts.iter().enumerate() {
        let next = starts.get(i + 1).copied().unwrap_or(buf.len());
        let len = u32::try_from(next - sc - START_CODE.len())
            .with_context(|| format!("NAL unit at offset {} is too large", sc))?;
        BigEndian::write_u32(&mut buf[sc..sc + START_CODE.len()], len);
    }

    Ok(())
}

/// Replaces in place the 4-byte big-endian size prefixes of an AVCC stream
/// with Annex B start codes.
pub fn avcc_to_byte_stream(buf: &mut [u8]) -> Result<()> {
    let mut off = 0;

    while off < buf.len() {
        let mut prefix = buf
            .get(off..off + START_CODE.len())
            .with_context(|| format!("truncated size prefix at offset {}", off))?;
        let len = prefix.get_u32() as usize;

        let next = off + START_CODE.len() + len;
        if next > buf.len() {
            bail!(
                "NAL unit of {} bytes at offset {} overflows the {} bytes buffer",
                len,
                off,
                buf.len()
            );
        }

        buf[off..off + START_CODE.len()].copy_from_slice(&START_CODE);
        off = next;
    }

    Ok(())
}
