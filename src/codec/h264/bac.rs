// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Binary arithmetic coding engines, 9.3.1.2, 9.3.3.2 and 9.3.4.

use log::trace;

use crate::codec::h264::error::H264Error;
use crate::codec::h264::error::Result;
use crate::codec::h264::nalu_reader::NaluReader;
use crate::codec::h264::nalu_writer::NaluWriter;

/// rangeTabLPS, table 9-44, indexed by pStateIdx and qCodIRangeIdx.
const RANGE_TAB_LPS: [[u8; 4]; 64] = [
    [128, 176, 208, 240],
    [128, 167, 197, 227],
    [128, 158, 187, 216],
    [123, 150, 178, 205],
    [116, 142, 169, 195],
    [111, 135, 160, 185],
    [105, 128, 152, 175],
    [100, 122, 144, 166],
    [95, 116, 137, 158],
    [90, 110, 130, 150],
    [85, 104, 123, 142],
    [81, 99, 117, 135],
    [77, 94, 111, 128],
    [73, 89, 105, 122],
    [69, 85, 100, 116],
    [66, 80, 95, 110],
    [62, 76, 90, 104],
    [59, 72, 86, 99],
    [56, 69, 81, 94],
    [53, 65, 77, 89],
    [51, 62, 73, 85],
    [48, 59, 69, 80],
    [46, 56, 66, 76],
    [43, 53, 63, 72],
    [41, 50, 59, 69],
    [39, 48, 56, 65],
    [37, 45, 54, 62],
    [35, 43, 51, 59],
    [33, 41, 48, 56],
    [32, 39, 46, 53],
    [30, 37, 43, 50],
    [29, 35, 41, 48],
    [27, 33, 39, 45],
    [26, 31, 37, 43],
    [24, 30, 35, 41],
    [23, 28, 33, 39],
    [22, 27, 32, 37],
    [21, 26, 30, 35],
    [20, 24, 29, 33],
    [19, 23, 27, 31],
    [18, 22, 26, 30],
    [17, 21, 25, 28],
    [16, 20, 23, 27],
    [15, 19, 22, 25],
    [14, 18, 21, 24],
    [14, 17, 20, 23],
    [13, 16, 19, 22],
    [12, 15, 18, 21],
    [12, 14, 17, 20],
    [11, 14, 16, 19],
    [11, 13, 15, 18],
    [10, 12, 15, 17],
    [10, 12, 14, 16],
    [9, 11, 13, 15],
    [9, 11, 12, 14],
    [8, 10, 12, 14],
    [8, 9, 11, 13],
    [7, 9, 11, 12],
    [7, 9, 10, 12],
    [7, 8, 10, 11],
    [6, 8, 9, 11],
    [6, 7, 9, 10],
    [6, 7, 8, 9],
    [2, 2, 2, 2],
];

/// transIdxLPS, table 9-45.
const TRANS_IDX_LPS: [u8; 64] = [
    0, 0, 1, 2, 2, 4, 4, 5, 6, 7, 8, 9, 9, 11, 11, 12,
    13, 13, 15, 15, 16, 16, 18, 18, 19, 19, 21, 21, 22, 22, 23, 24,
    24, 25, 26, 26, 27, 27, 28, 29, 29, 30, 30, 30, 31, 32, 32, 33,
    33, 33, 34, 34, 35, 35, 35, 36, 36, 36, 37, 37, 37, 38, 38, 63,
];

/// transIdxMPS, table 9-45.
const TRANS_IDX_MPS: [u8; 64] = [
    1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16,
    17, 18, 19, 20, 21, 22, 23, 24, 25, 26, 27, 28, 29, 30, 31, 32,
    33, 34, 35, 36, 37, 38, 39, 40, 41, 42, 43, 44, 45, 46, 47, 48,
    49, 50, 51, 52, 53, 54, 55, 56, 57, 58, 59, 60, 61, 62, 62, 63,
];

/// Probability state of one context variable.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct BacState {
    /// pStateIdx
    pub idx: u8,
    /// valMPS
    pub mps: bool,
}

impl BacState {
    /// Initializes a context variable from its `(m, n)` pair, 9.3.1.1.
    pub fn new(slice_qp_luma: i32, m: i8, n: i8) -> Self {
        let qp = slice_qp_luma.clamp(0, 51);
        let pre_ctx_state = (((m as i32 * qp) >> 4) + n as i32).clamp(1, 126);

        if pre_ctx_state <= 63 {
            Self {
                idx: (63 - pre_ctx_state) as u8,
                mps: false,
            }
        } else {
            Self {
                idx: (pre_ctx_state - 64) as u8,
                mps: true,
            }
        }
    }
}

/// The arithmetic encoding engine. Bits go to the writer passed to each
/// call, which must be the same for the whole slice.
#[derive(Debug)]
pub struct BacEncoder {
    low: u32,
    range: u32,
    first_bit_flag: bool,
    bits_outstanding: u32,
    bin_count: u32,
}

impl Default for BacEncoder {
    fn default() -> Self {
        Self::new()
    }
}

impl BacEncoder {
    /// 9.3.4.1
    pub fn new() -> Self {
        Self {
            low: 0,
            range: 510,
            first_bit_flag: true,
            bits_outstanding: 0,
            bin_count: 0,
        }
    }

    /// Number of bins encoded so far, `BinCountsInNALunits` of the slice.
    pub fn bin_count(&self) -> u32 {
        self.bin_count
    }

    fn put_bit(&mut self, w: &mut NaluWriter, b: bool) -> Result<()> {
        if self.first_bit_flag {
            self.first_bit_flag = false;
        } else {
            w.write_bit(b)?;
        }

        while self.bits_outstanding > 0 {
            w.write_bit(!b)?;
            self.bits_outstanding -= 1;
        }

        Ok(())
    }

    fn renorm(&mut self, w: &mut NaluWriter) -> Result<()> {
        while self.range < 256 {
            if self.low < 256 {
                self.put_bit(w, false)?;
            } else if self.low >= 512 {
                self.low -= 512;
                self.put_bit(w, true)?;
            } else {
                self.low -= 256;
                self.bits_outstanding += 1;
            }

            self.range <<= 1;
            self.low <<= 1;
        }

        Ok(())
    }

    /// 9.3.4.2
    pub fn encode_decision(
        &mut self,
        w: &mut NaluWriter,
        state: &mut BacState,
        bin: bool,
    ) -> Result<()> {
        let q = ((self.range >> 6) & 3) as usize;
        let lps = RANGE_TAB_LPS[state.idx as usize][q] as u32;

        trace!("decision {} idx {} mps {}", bin as u8, state.idx, state.mps);

        self.range -= lps;
        if bin != state.mps {
            self.low += self.range;
            self.range = lps;
            if state.idx == 0 {
                state.mps = !state.mps;
            }
            state.idx = TRANS_IDX_LPS[state.idx as usize];
        } else {
            state.idx = TRANS_IDX_MPS[state.idx as usize];
        }

        self.bin_count += 1;
        self.renorm(w)
    }

    /// 9.3.4.4
    pub fn encode_bypass(&mut self, w: &mut NaluWriter, bin: bool) -> Result<()> {
        trace!("bypass {}", bin as u8);

        self.low <<= 1;
        if bin {
            self.low += self.range;
        }

        if self.low >= 1024 {
            self.put_bit(w, true)?;
            self.low -= 1024;
        } else if self.low < 512 {
            self.put_bit(w, false)?;
        } else {
            self.low -= 512;
            self.bits_outstanding += 1;
        }

        self.bin_count += 1;
        Ok(())
    }

    /// 9.3.4.5. Encoding a 1 flushes the engine, which writes the
    /// `rbsp_stop_one_bit` as its last bit.
    pub fn encode_terminate(&mut self, w: &mut NaluWriter, bin: bool) -> Result<()> {
        trace!("terminate {}", bin as u8);

        self.range -= 2;
        self.bin_count += 1;

        if bin {
            self.low += self.range;
            self.flush(w)
        } else {
            self.renorm(w)
        }
    }

    fn flush(&mut self, w: &mut NaluWriter) -> Result<()> {
        self.range = 2;
        self.renorm(w)?;
        self.put_bit(w, (self.low >> 9) & 1 != 0)?;
        w.write_bits(((self.low >> 7) & 3) | 1, 2)
    }
}

/// The arithmetic decoding engine.
#[derive(Debug)]
pub struct BacDecoder {
    range: u32,
    offset: u32,
}

impl BacDecoder {
    /// 9.3.1.2
    pub fn new(r: &mut NaluReader) -> Result<Self> {
        let offset = r.read_bits(9)?;
        if offset >= 510 {
            return Err(H264Error::io(format!("invalid codIOffset {}", offset)));
        }

        Ok(Self { range: 510, offset })
    }

    fn renorm(&mut self, r: &mut NaluReader) -> Result<()> {
        while self.range < 256 {
            self.range <<= 1;
            self.offset = (self.offset << 1) | r.read_bits(1)?;
        }

        Ok(())
    }

    /// 9.3.3.2.1
    pub fn decode_decision(&mut self, r: &mut NaluReader, state: &mut BacState) -> Result<bool> {
        let q = ((self.range >> 6) & 3) as usize;
        let lps = RANGE_TAB_LPS[state.idx as usize][q] as u32;

        self.range -= lps;
        let bin = if self.offset >= self.range {
            let bin = !state.mps;
            self.offset -= self.range;
            self.range = lps;
            if state.idx == 0 {
                state.mps = !state.mps;
            }
            state.idx = TRANS_IDX_LPS[state.idx as usize];
            bin
        } else {
            state.idx = TRANS_IDX_MPS[state.idx as usize];
            state.mps
        };

        self.renorm(r)?;
        Ok(bin)
    }

    /// 9.3.3.2.3
    pub fn decode_bypass(&mut self, r: &mut NaluReader) -> Result<bool> {
        self.offset = (self.offset << 1) | r.read_bits(1)?;

        if self.offset >= self.range {
            self.offset -= self.range;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// 9.3.3.2.2
    pub fn decode_terminate(&mut self, r: &mut NaluReader) -> Result<bool> {
        self.range -= 2;

        if self.offset >= self.range {
            Ok(true)
        } else {
            self.renorm(r)?;
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_init() {
        // (m, n) = (0, 41) at any QP.
        assert_eq!(BacState::new(26, 0, 41), BacState { idx: 22, mps: false });
        // (20, -15) at QP 26: ((20 * 26) >> 4) - 15 = 17.
        assert_eq!(BacState::new(26, 20, -15), BacState { idx: 46, mps: false });
        // (-28, 127) at QP 26: -46 + 127 = 81.
        assert_eq!(BacState::new(26, -28, 127), BacState { idx: 17, mps: true });
        // Clipped to 126, and QP clipped to 51.
        assert_eq!(BacState::new(80, 20, 127), BacState { idx: 62, mps: true });
        // Clipped to 1.
        assert_eq!(BacState::new(51, -40, 0), BacState { idx: 62, mps: false });
    }

    enum Bin {
        Decision(usize, bool),
        Bypass(bool),
        Terminate(bool),
    }

    #[test]
    fn decoder_follows_encoder() {
        let mut bins = vec![];
        let mut seed = 0x1234_5678u32;
        for i in 0..2000 {
            seed = seed.wrapping_mul(1_103_515_245).wrapping_add(12345);
            let bit = (seed >> 16) % 5 == 0;
            bins.push(match i % 7 {
                5 => Bin::Bypass(bit),
                6 => Bin::Terminate(false),
                n => Bin::Decision(n % 3, bit),
            });
        }
        bins.push(Bin::Terminate(true));

        let init = [
            BacState::new(30, 20, -15),
            BacState::new(30, -28, 127),
            BacState::new(30, 0, 64),
        ];

        let mut w = NaluWriter::new(false);
        let mut enc = BacEncoder::new();
        let mut states = init;
        // State of the context after each decision.
        let mut transitions = vec![];
        for bin in &bins {
            match *bin {
                Bin::Decision(ctx, b) => {
                    enc.encode_decision(&mut w, &mut states[ctx], b).unwrap();
                    transitions.push(states[ctx]);
                }
                Bin::Bypass(b) => enc.encode_bypass(&mut w, b).unwrap(),
                Bin::Terminate(b) => enc.encode_terminate(&mut w, b).unwrap(),
            }
        }
        assert_eq!(enc.bin_count(), bins.len() as u32);
        while !w.byte_aligned() {
            w.write_bit(false).unwrap();
        }
        let data = w.into_vec().unwrap();

        let mut r = NaluReader::new(&data, false);
        let mut dec = BacDecoder::new(&mut r).unwrap();
        let encoded_states = states;
        let mut states = init;
        let mut transitions = transitions.into_iter();
        for bin in &bins {
            match *bin {
                Bin::Decision(ctx, b) => {
                    assert_eq!(dec.decode_decision(&mut r, &mut states[ctx]).unwrap(), b);
                    assert_eq!(Some(states[ctx]), transitions.next());
                }
                Bin::Bypass(b) => assert_eq!(dec.decode_bypass(&mut r).unwrap(), b),
                Bin::Terminate(b) => assert_eq!(dec.decode_terminate(&mut r).unwrap(), b),
            }
        }
        assert_eq!(transitions.next(), None);
        assert_eq!(states, encoded_states);
        // The contexts moved away from their initial states.
        assert!(states.iter().zip(init.iter()).any(|(s, i)| s != i));
    }

    #[test]
    fn lps_at_state_0_switches_mps() {
        let mut w = NaluWriter::new(false);
        let mut enc = BacEncoder::new();
        let mut state = BacState { idx: 0, mps: false };
        enc.encode_decision(&mut w, &mut state, true).unwrap();
        assert_eq!(state, BacState { idx: 0, mps: true });
        enc.encode_decision(&mut w, &mut state, true).unwrap();
        assert_eq!(state, BacState { idx: 1, mps: true });
        enc.encode_terminate(&mut w, true).unwrap();
        while !w.byte_aligned() {
            w.write_bit(false).unwrap();
        }
        let data = w.into_vec().unwrap();

        let mut r = NaluReader::new(&data, false);
        let mut dec = BacDecoder::new(&mut r).unwrap();
        let mut state = BacState { idx: 0, mps: false };
        assert!(dec.decode_decision(&mut r, &mut state).unwrap());
        assert_eq!(state, BacState { idx: 0, mps: true });
        assert!(dec.decode_decision(&mut r, &mut state).unwrap());
        assert_eq!(state, BacState { idx: 1, mps: true });
        assert!(dec.decode_terminate(&mut r).unwrap());
    }

    #[test]
    fn invalid_offset() {
        let data = [0xff, 0x80];
        let mut r = NaluReader::new(&data, false);
        assert!(BacDecoder::new(&mut r).is_err());
    }
}
