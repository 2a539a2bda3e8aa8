// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use crate::codec::h264::error::H264Error;
use crate::codec::h264::error::Result;

/// A bit reader for h264 bitstreams. It properly handles emulation-prevention
/// bytes and stop bits.
///
/// Bits are consumed from a one-byte cache that is refilled from `data`; when
/// emulation prevention is enabled, a `0x03` byte following two zero bytes is
/// skipped during the refill.
#[derive(Clone, Debug)]
pub struct NaluReader<'a> {
    /// The whole input, escape bytes included.
    data: &'a [u8],
    /// Offset of the next byte to fetch in `data`.
    off: usize,
    /// Partially consumed byte. The unread bits are the `cachebits` low bits.
    cache: u8,
    /// Number of unread bits in `cache`.
    cachebits: u8,
    /// Whether or not we need emulation prevention logic.
    needs_epb: bool,
    /// Number of epbs (i.e. 0x000003) we found.
    num_epb: usize,
    /// How many bits have been read so far.
    position: u64,
}

impl<'a> NaluReader<'a> {
    pub fn new(data: &'a [u8], needs_epb: bool) -> Self {
        Self {
            data,
            off: 0,
            cache: 0,
            cachebits: 0,
            needs_epb,
            num_epb: 0,
            position: 0,
        }
    }

    /// Creates a reader positioned at byte `off` of `data`, with `cachebits`
    /// low bits of `cache` still pending. Used to resume a retained slice data
    /// range in the middle of a NAL unit.
    pub fn resume(data: &'a [u8], off: usize, cache: u8, cachebits: u8, needs_epb: bool) -> Self {
        Self {
            data,
            off: off.min(data.len()),
            cache,
            cachebits: cachebits.min(8),
            needs_epb,
            num_epb: 0,
            position: 0,
        }
    }

    fn fetch(&mut self) -> Result<()> {
        if self.off >= self.data.len() {
            return Err(H264Error::io("reader ran out of bits"));
        }

        if self.needs_epb
            && self.off >= 2
            && self.data[self.off - 2] == 0x00
            && self.data[self.off - 1] == 0x00
            && self.data[self.off] == 0x03
        {
            if self.off + 1 >= self.data.len() {
                return Err(H264Error::io("reader ran out of bits after escape byte"));
            }
            self.num_epb += 1;
            self.cache = self.data[self.off + 1];
            self.off += 2;
        } else {
            self.cache = self.data[self.off];
            self.off += 1;
        }
        self.cachebits = 8;

        Ok(())
    }

    /// Reads up to 32 bits from the stream.
    pub fn read_bits(&mut self, num_bits: u32) -> Result<u32> {
        if num_bits > 32 {
            return Err(H264Error::invalid(format!(
                "more than 32 ({}) bits were requested",
                num_bits
            )));
        }

        let mut left = num_bits;
        let mut out = 0u64;
        while left > 0 {
            if self.cachebits == 0 {
                self.fetch()?;
            }

            let bits = left.min(self.cachebits as u32);
            let mask = (1u32 << bits) - 1;
            let part = (self.cache as u32 >> (self.cachebits as u32 - bits)) & mask;
            out = (out << bits) | part as u64;
            left -= bits;
            self.cachebits -= bits as u8;
        }
        self.position += num_bits as u64;

        Ok(out as u32)
    }

    /// Read a single bit from the stream.
    pub fn read_bit(&mut self) -> Result<bool> {
        Ok(self.read_bits(1)? == 1)
    }

    /// Reads a two's complement signed integer of length `num_bits`.
    pub fn read_bits_signed(&mut self, num_bits: u32) -> Result<i32> {
        let value = self.read_bits(num_bits)?;
        if num_bits == 0 || num_bits == 32 {
            return Ok(value as i32);
        }

        if value & (1 << (num_bits - 1)) != 0 {
            Ok((value | (u32::MAX << num_bits)) as i32)
        } else {
            Ok(value as i32)
        }
    }

    /// Reads an Unsigned Exponential golomb coding number from the next bytes in the
    /// bitstream, 9.1.
    pub fn read_ue(&mut self) -> Result<u32> {
        let mut leading_zeros = 0;
        while !self.read_bit()? {
            leading_zeros += 1;
            if leading_zeros > 31 {
                return Err(H264Error::protocol("exp-golomb code longer than 32 bits"));
            }
        }

        let suffix = self.read_bits(leading_zeros)?;
        Ok(((1u64 << leading_zeros) - 1 + suffix as u64) as u32)
    }

    pub fn read_ue_max(&mut self, max: u32) -> Result<u32> {
        let value = self.read_ue()?;
        if value > max {
            return Err(H264Error::protocol(format!(
                "value out of bounds: expected 0 - {}, got {}",
                max, value
            )));
        }
        Ok(value)
    }

    /// Reads a signed exponential golomb coding number. The least significant
    /// bit of the unsigned code selects the sign, 9.1.1.
    pub fn read_se(&mut self) -> Result<i32> {
        let ue = self.read_ue()? as i64;
        let value = if ue & 1 == 1 { (ue + 1) / 2 } else { -(ue / 2) };
        Ok(value as i32)
    }

    /// Reads a truncated exponential golomb coding number with range `0..=max`.
    pub fn read_te(&mut self, max: u32) -> Result<u32> {
        if max == 1 {
            Ok(!self.read_bit()? as u32)
        } else {
            self.read_ue()
        }
    }

    /// Reads a value coded as a run of `0xff` bytes followed by a last byte.
    pub fn read_ff_coded(&mut self) -> Result<u32> {
        let mut value = 0u32;
        loop {
            let byte = self.read_bits(8)?;
            value = value
                .checked_add(byte)
                .ok_or_else(|| H264Error::protocol("ff coded value overflow"))?;
            if byte != 0xff {
                return Ok(value);
            }
        }
    }

    /// Peeks at the next `num_bits` bits without consuming them.
    pub fn next_bits(&self, num_bits: u32) -> Result<u32> {
        self.clone().read_bits(num_bits)
    }

    /// Whether the stream still has RBSP data. Implements more_rbsp_data(),
    /// 7.2.
    pub fn has_more_rbsp_data(&self) -> bool {
        let mut r = self.clone();

        // rbsp_stop_one_bit
        match r.read_bit() {
            Ok(true) => (),
            Ok(false) => return true,
            Err(_) => return false,
        }

        // rbsp_alignment_zero_bit
        while !r.byte_aligned() {
            match r.read_bit() {
                Ok(false) => (),
                Ok(true) => return true,
                Err(_) => return false,
            }
        }

        if r.eos() {
            return false;
        }

        // Anything but a single trailing_zero_8bits is more data.
        r.off + 1 < r.data.len() || r.data[r.off] != 0x00
    }

    /// Reads rbsp_trailing_bits( ), 7.3.2.11.
    pub fn read_rbsp_trailing_bits(&mut self) -> Result<()> {
        if !self.read_bit()? {
            return Err(H264Error::io("rbsp_stop_one_bit is not set"));
        }

        while !self.byte_aligned() {
            if self.read_bit()? {
                return Err(H264Error::io("rbsp_alignment_zero_bit is set"));
            }
        }

        Ok(())
    }

    /// Consumes all the remaining bytes, which must start on a byte boundary.
    pub fn read_remaining_bytes(&mut self) -> Result<Vec<u8>> {
        if !self.byte_aligned() {
            return Err(H264Error::io("unaligned raw byte read"));
        }

        let mut out = Vec::with_capacity(self.data.len() - self.off);
        while !self.eos() {
            out.push(self.read_bits(8)? as u8);
        }
        Ok(out)
    }

    pub fn byte_aligned(&self) -> bool {
        self.cachebits % 8 == 0
    }

    /// Whether the end of the stream is reached.
    pub fn eos(&self) -> bool {
        self.off >= self.data.len() && self.cachebits == 0
    }

    /// Returns the amount of bits left in the stream, escape bytes included.
    pub fn num_bits_left(&self) -> usize {
        (self.data.len() - self.off) * 8 + self.cachebits as usize
    }

    /// Returns the number of emulation-prevention bytes read so far.
    pub fn num_epb(&self) -> usize {
        self.num_epb
    }

    /// Return the position of this bitstream in bits.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Offset of the next byte to be fetched in the input.
    pub fn byte_offset(&self) -> usize {
        self.off
    }

    /// The partially consumed byte and its number of unread bits.
    pub fn cache(&self) -> (u8, u8) {
        (self.cache, self.cachebits)
    }

    pub fn needs_epb(&self) -> bool {
        self.needs_epb
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_fixed_bits() {
        let data = [0b1010_1100, 0b0101_0011];
        let mut r = NaluReader::new(&data, false);

        assert_eq!(r.read_bits(1).unwrap(), 1);
        assert_eq!(r.read_bits(3).unwrap(), 0b010);
        assert_eq!(r.read_bits(6).unwrap(), 0b1100_01);
        assert_eq!(r.read_bits(6).unwrap(), 0b01_0011);
        assert!(r.eos());
        assert!(r.read_bits(1).is_err());
    }

    #[test]
    fn read_signed_bits() {
        let data = [0b1110_0011];
        let mut r = NaluReader::new(&data, false);

        assert_eq!(r.read_bits_signed(4).unwrap(), -2);
        assert_eq!(r.read_bits_signed(4).unwrap(), 3);
    }

    #[test]
    fn read_exp_golomb() {
        // 1 | 010 | 011 | 00100 | 00101 | 0001000 -> 0, 1, 2, 3, 4, 7
        let data = [0b1010_0110, 0b0100_0010, 0b1000_1000];
        let mut r = NaluReader::new(&data, false);

        assert_eq!(r.read_ue().unwrap(), 0);
        assert_eq!(r.read_ue().unwrap(), 1);
        assert_eq!(r.read_ue().unwrap(), 2);
        assert_eq!(r.read_ue().unwrap(), 3);
        assert_eq!(r.read_ue().unwrap(), 4);
        assert_eq!(r.read_ue().unwrap(), 7);
    }

    #[test]
    fn read_signed_exp_golomb() {
        // 1 | 010 | 011 | 00100 | 00101 -> 0, 1, -1, 2, -2
        let data = [0b1010_0110, 0b0100_0010, 0b1000_0000];
        let mut r = NaluReader::new(&data, false);

        assert_eq!(r.read_se().unwrap(), 0);
        assert_eq!(r.read_se().unwrap(), 1);
        assert_eq!(r.read_se().unwrap(), -1);
        assert_eq!(r.read_se().unwrap(), 2);
        assert_eq!(r.read_se().unwrap(), -2);
    }

    #[test]
    fn read_truncated_exp_golomb() {
        // 0 | 00100
        let data = [0b0001_0000];
        let mut r = NaluReader::new(&data, false);

        assert_eq!(r.read_te(1).unwrap(), 1);
        assert_eq!(r.read_te(4).unwrap(), 3);
    }

    #[test]
    fn skip_emulation_prevention() {
        let data = [0x00, 0x00, 0x03, 0x01, 0xff];
        let mut r = NaluReader::new(&data, true);

        assert_eq!(r.read_bits(24).unwrap(), 0x000001);
        assert_eq!(r.num_epb(), 1);
        assert_eq!(r.read_bits(8).unwrap(), 0xff);

        let mut r = NaluReader::new(&data, false);
        assert_eq!(r.read_bits(32).unwrap(), 0x00000301);
    }

    #[test]
    fn ff_coded() {
        let data = [0xff, 0xff, 0x05, 0x07];
        let mut r = NaluReader::new(&data, false);

        assert_eq!(r.read_ff_coded().unwrap(), 515);
        assert_eq!(r.read_ff_coded().unwrap(), 7);
    }

    #[test]
    fn more_rbsp_data() {
        // One data bit then the trailing bits.
        let data = [0b1100_0000];
        let mut r = NaluReader::new(&data, false);
        assert!(r.has_more_rbsp_data());
        r.read_bit().unwrap();
        assert!(!r.has_more_rbsp_data());
        r.read_rbsp_trailing_bits().unwrap();
        assert!(r.eos());

        // A single trailing_zero_8bits does not count as data.
        let data = [0b1000_0000, 0x00];
        let r = NaluReader::new(&data, false);
        assert!(!r.has_more_rbsp_data());

        let data = [0b1000_0000, 0x01];
        let r = NaluReader::new(&data, false);
        assert!(r.has_more_rbsp_data());
    }

    #[test]
    fn resume_mid_byte() {
        let data = [0xaa, 0b0000_0110, 0xf0];
        let mut r = NaluReader::resume(&data, 2, 0b0000_0110, 3, false);

        assert_eq!(r.read_bits(3).unwrap(), 0b110);
        assert!(r.byte_aligned());
        assert_eq!(r.read_bits(8).unwrap(), 0xf0);
    }
}
