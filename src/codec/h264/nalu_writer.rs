// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use crate::codec::h264::error::H264Error;
use crate::codec::h264::error::Result;

/// Dynamic buffers grow by blocks of this size.
const GROWTH_BLOCK: usize = 256;

#[derive(Debug)]
enum Buffer<'a> {
    /// Caller provided storage, writing past its end is an error.
    Fixed(&'a mut [u8]),
    /// Owned storage, the vector length is the current capacity.
    Dynamic(Vec<u8>),
}

impl Buffer<'_> {
    fn as_slice(&self) -> &[u8] {
        match self {
            Buffer::Fixed(buf) => buf,
            Buffer::Dynamic(buf) => buf.as_slice(),
        }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
        match self {
            Buffer::Fixed(buf) => buf,
            Buffer::Dynamic(buf) => buf.as_mut_slice(),
        }
    }

    fn ensure_capacity(&mut self, capacity: usize) -> Result<()> {
        match self {
            Buffer::Fixed(buf) if capacity > buf.len() => {
                Err(H264Error::io("fixed output buffer is full"))
            }
            Buffer::Fixed(_) => Ok(()),
            Buffer::Dynamic(buf) => {
                if capacity > buf.len() {
                    let rounded = (capacity + GROWTH_BLOCK - 1) / GROWTH_BLOCK * GROWTH_BLOCK;
                    buf.resize(rounded, 0);
                }
                Ok(())
            }
        }
    }
}

/// A writer for H.264 bitstream. It is capable of outputing bitstream with
/// emulation-prevention.
#[derive(Debug)]
pub struct NaluWriter<'a> {
    buf: Buffer<'a>,
    /// Number of complete bytes in `buf`.
    off: usize,
    /// Byte being assembled, filled from the most significant bit.
    cache: u8,
    /// Number of bits already written in `cache`.
    cachebits: u8,
    /// Emulation prevention enabled.
    ep_enabled: bool,
    /// Number of bits written so far, escape bytes excluded.
    position: u64,
}

impl NaluWriter<'static> {
    /// Creates a writer over a growable buffer.
    pub fn new(ep_enabled: bool) -> Self {
        Self::with_buffer(Buffer::Dynamic(Vec::new()), ep_enabled)
    }
}

impl<'a> NaluWriter<'a> {
    /// Creates a writer over a fixed size buffer.
    pub fn with_fixed(buf: &'a mut [u8], ep_enabled: bool) -> Self {
        Self::with_buffer(Buffer::Fixed(buf), ep_enabled)
    }

    fn with_buffer(buf: Buffer<'a>, ep_enabled: bool) -> Self {
        Self {
            buf,
            off: 0,
            cache: 0,
            cachebits: 0,
            ep_enabled,
            position: 0,
        }
    }

    fn flush_cache(&mut self) -> Result<()> {
        let off = self.off;
        let escape = {
            let data = self.buf.as_slice();
            self.ep_enabled
                && off >= 2
                && data[off - 2] == 0x00
                && data[off - 1] == 0x00
                && self.cache <= 0x03
        };

        if escape {
            self.buf.ensure_capacity(off + 2)?;
            let data = self.buf.as_mut_slice();
            data[off] = 0x03;
            data[off + 1] = self.cache;
            self.off += 2;
        } else {
            self.buf.ensure_capacity(off + 1)?;
            self.buf.as_mut_slice()[off] = self.cache;
            self.off += 1;
        }
        self.cache = 0;
        self.cachebits = 0;

        Ok(())
    }

    /// Writes the `num_bits` low bits of `value` (up to 32 bits). Corresponds
    /// to `u(n)` and `f(n)`, 7.2.
    pub fn write_bits(&mut self, value: u32, num_bits: u32) -> Result<()> {
        if num_bits > 32 {
            return Err(H264Error::invalid(format!(
                "more than 32 ({}) bits were requested",
                num_bits
            )));
        }

        let value = value as u64;
        let mut left = num_bits;
        while left > 0 {
            let bits = left.min(8 - self.cachebits as u32);
            let mask = (1u64 << bits) - 1;
            let part = (value >> (left - bits)) & mask;
            self.cache |= (part << (8 - self.cachebits as u32 - bits)) as u8;
            left -= bits;
            self.cachebits += bits as u8;

            if self.cachebits == 8 {
                self.flush_cache()?;
            }
        }
        self.position += num_bits as u64;

        Ok(())
    }

    pub fn write_bit(&mut self, bit: bool) -> Result<()> {
        self.write_bits(bit as u32, 1)
    }

    /// Writes `value` as a two's complement integer of length `num_bits`.
    pub fn write_bits_signed(&mut self, value: i32, num_bits: u32) -> Result<()> {
        let mask = if num_bits >= 32 {
            u32::MAX
        } else {
            (1u32 << num_bits) - 1
        };
        self.write_bits(value as u32 & mask, num_bits)
    }

    /// Writes a unsigned integer in exponential golumb format.
    /// Corresponds to `ue(v)`, 9.1.
    pub fn write_ue(&mut self, value: u32) -> Result<()> {
        let value = value
            .checked_add(1)
            .ok_or_else(|| H264Error::invalid("value too large for exp-golomb coding"))?;
        let bits = 32 - value.leading_zeros();

        self.write_bits(0, bits - 1)?;
        self.write_bits(value, bits)
    }

    /// Writes a signed integer in exponential golumb format.
    /// Corresponds to `se(v)`, 9.1.1.
    pub fn write_se(&mut self, value: i32) -> Result<()> {
        let abs_value = value.unsigned_abs();

        if value <= 0 {
            self.write_ue(
                abs_value
                    .checked_mul(2)
                    .ok_or_else(|| H264Error::invalid("value too large for exp-golomb coding"))?,
            )
        } else {
            self.write_ue(2 * abs_value - 1)
        }
    }

    /// Writes a truncated exponential golomb number with range `0..=max`.
    pub fn write_te(&mut self, value: u32, max: u32) -> Result<()> {
        if max == 1 {
            self.write_bit(value == 0)
        } else {
            self.write_ue(value)
        }
    }

    /// Writes `value` as a run of `0xff` bytes followed by a last byte.
    pub fn write_ff_coded(&mut self, mut value: u32) -> Result<()> {
        loop {
            let byte = value.min(0xff);
            self.write_bits(byte, 8)?;
            value -= byte;
            if byte != 0xff {
                return Ok(());
            }
        }
    }

    /// Writes rbsp_trailing_bits( ), 7.3.2.11.
    pub fn write_rbsp_trailing_bits(&mut self) -> Result<()> {
        self.write_bit(true)?;
        while !self.byte_aligned() {
            self.write_bit(false)?;
        }

        Ok(())
    }

    /// Copies already escaped bytes to the output. The stream must be byte
    /// aligned.
    pub fn write_raw_bytes(&mut self, data: &[u8]) -> Result<()> {
        if !self.byte_aligned() {
            return Err(H264Error::io("unaligned raw byte write"));
        }

        self.buf.ensure_capacity(self.off + data.len())?;
        self.buf.as_mut_slice()[self.off..self.off + data.len()].copy_from_slice(data);
        self.off += data.len();
        self.position += 8 * data.len() as u64;

        Ok(())
    }

    /// Returns `true` if next bits will be aligned to 8
    pub fn byte_aligned(&self) -> bool {
        self.cachebits % 8 == 0
    }

    /// Number of bits written so far, escape bytes excluded.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Number of complete bytes in the output.
    pub fn byte_offset(&self) -> usize {
        self.off
    }

    /// The byte being assembled and its number of written bits.
    pub fn cache(&self) -> (u8, u8) {
        (self.cache, self.cachebits)
    }

    /// The complete bytes written so far.
    pub fn data(&self) -> &[u8] {
        &self.buf.as_slice()[..self.off]
    }

    /// Returns the written bytes. Only valid for a byte aligned writer over a
    /// growable buffer.
    pub fn into_vec(self) -> Result<Vec<u8>> {
        if !self.byte_aligned() {
            return Err(H264Error::io("output is not byte aligned"));
        }

        match self.buf {
            Buffer::Dynamic(mut buf) => {
                buf.truncate(self.off);
                Ok(buf)
            }
            Buffer::Fixed(_) => Err(H264Error::invalid("writer does not own its buffer")),
        }
    }
}
