// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! CABAC encoding of the macroblock syntax elements needed to write
//! synthetic slices, 9.3.
//!
//! Each syntax element is binarized into a [`BinString`], whose bins are
//! then encoded MSB first with the context variable selected by 9.3.3.1.

use log::trace;

use crate::codec::h264::bac::BacEncoder;
use crate::codec::h264::bac::BacState;
use crate::codec::h264::ctx::Ctx;
use crate::codec::h264::error::H264Error;
use crate::codec::h264::error::Result;
use crate::codec::h264::macroblock::neighbour_chroma4x4;
use crate::codec::h264::macroblock::neighbour_luma4x4;
use crate::codec::h264::macroblock::BlockKind;
use crate::codec::h264::macroblock::Component;
use crate::codec::h264::macroblock::MacroblockInfo;
use crate::codec::h264::macroblock::Neighbour;
use crate::codec::h264::nalu_writer::NaluWriter;
use crate::codec::h264::types::MbType;
use crate::codec::h264::types::NaluType;
use crate::codec::h264::types::SliceType;

/// Number of context variables handled, ctxIdx 0 to 104.
pub const NUM_CTX: usize = 105;

/// ctxIdx of `end_of_slice_flag` and of the terminating `mb_type` bins.
const CTX_TERMINATE: u32 = 276;

/// ctxIdxOffset of `coded_block_flag` for ctxBlockCat below 5.
const CODED_BLOCK_FLAG_OFFSET: u32 = 85;

/// ctxIdxBlockCatOffset of `coded_block_flag`, table 9-40.
const CODED_BLOCK_FLAG_CAT_OFFSET: [u32; 5] = [0, 4, 8, 12, 16];

/// Context variables 0 to 10, all slice types, table 9-12.
const INIT_0_10: [(i8, i8); 11] = [
    (20, -15), (2, 54), (3, 74), (20, -15), (2, 54), (3, 74),
    (-28, 127), (-23, 104), (-6, 53), (-1, 54), (7, 51),
];

/// Context variables 11 to 59 of P, SP and B slices by `cabac_init_idc`,
/// tables 9-13 to 9-16.
const INIT_11_59: [[(i8, i8); 49]; 3] = [
    [
        (23, 33), (23, 2), (21, 0), (1, 9), (0, 49), (-37, 118),
        (5, 57), (-13, 78), (-11, 65), (1, 62), (12, 49), (-4, 73),
        (17, 50), (18, 64), (9, 43), (29, 0), (26, 67), (16, 90),
        (9, 104), (-46, 127), (-20, 104), (1, 67), (-13, 78), (-11, 65),
        (1, 62), (-6, 86), (-17, 95), (-6, 61), (9, 45), (-3, 69),
        (-6, 81), (-11, 96), (6, 55), (7, 67), (-5, 86), (2, 88),
        (0, 58), (-3, 76), (-10, 94), (5, 54), (4, 69), (-3, 81),
        (0, 88), (-7, 67), (-5, 74), (-4, 74), (-5, 80), (-7, 72),
        (1, 58),
    ],
    [
        (22, 25), (34, 0), (16, 0), (-2, 9), (4, 41), (-29, 118),
        (2, 65), (-6, 71), (-13, 79), (5, 52), (9, 50), (-3, 70),
        (10, 54), (26, 34), (19, 22), (40, 0), (57, 2), (41, 36),
        (26, 69), (-45, 127), (-15, 101), (-4, 76), (-6, 71), (-13, 79),
        (5, 52), (6, 69), (-13, 90), (0, 52), (8, 43), (-2, 69),
        (-5, 82), (-10, 96), (2, 59), (2, 75), (-3, 87), (-3, 100),
        (1, 56), (-3, 74), (-6, 85), (0, 59), (-3, 81), (-7, 86),
        (-5, 95), (-1, 66), (-1, 77), (1, 70), (-2, 86), (-5, 72),
        (0, 61),
    ],
    [
        (29, 16), (25, 0), (14, 0), (-10, 51), (-3, 62), (-27, 99),
        (26, 16), (-4, 85), (-24, 102), (5, 57), (6, 57), (-17, 73),
        (14, 57), (20, 40), (20, 10), (29, 0), (54, 0), (37, 42),
        (12, 97), (-32, 127), (-22, 117), (-2, 74), (-4, 85), (-24, 102),
        (5, 57), (-6, 93), (-14, 88), (-6, 44), (4, 55), (-11, 89),
        (-15, 103), (-21, 116), (19, 57), (20, 58), (4, 84), (6, 96),
        (1, 63), (-5, 85), (-13, 106), (5, 63), (6, 75), (-3, 90),
        (-1, 101), (3, 55), (-4, 79), (-2, 75), (-12, 97), (-7, 50),
        (1, 60),
    ],
];

/// Context variables 60 to 69, all slice types, table 9-17.
const INIT_60_69: [(i8, i8); 10] = [
    (0, 41), (0, 63), (0, 63), (0, 63), (-9, 83), (4, 86),
    (0, 97), (-7, 72), (13, 41), (3, 62),
];

/// Context variables 70 to 104 of I and SI slices, table 9-18.
const INIT_70_104_I: [(i8, i8); 35] = [
    (0, 11), (1, 55), (0, 69), (-17, 127), (-13, 102), (0, 82),
    (-7, 74), (-21, 107), (-27, 127), (-31, 127), (-24, 127), (-18, 95),
    (-27, 127), (-21, 114), (-30, 127), (-17, 123), (-12, 115), (-16, 122),
    (-11, 115), (-12, 63), (-2, 68), (-15, 84), (-13, 104), (-3, 70),
    (-8, 93), (-10, 90), (-30, 127), (-1, 74), (-6, 97), (-7, 91),
    (-20, 127), (-4, 56), (-5, 82), (-7, 76), (-22, 125),
];

/// Context variables 70 to 104 of P, SP and B slices by `cabac_init_idc`,
/// table 9-18.
const INIT_70_104: [[(i8, i8); 35]; 3] = [
    [
        (0, 45), (-4, 78), (-3, 96), (-27, 126), (-28, 98), (-25, 101),
        (-23, 67), (-28, 82), (-20, 94), (-16, 83), (-22, 110), (-21, 91),
        (-18, 102), (-13, 93), (-29, 127), (-7, 92), (-5, 89), (-7, 96),
        (-13, 108), (-3, 46), (-1, 65), (-1, 57), (-9, 93), (-3, 74),
        (-9, 92), (-8, 87), (-23, 126), (5, 54), (6, 60), (6, 59),
        (6, 69), (-1, 48), (0, 68), (-4, 69), (-8, 88),
    ],
    [
        (13, 15), (7, 51), (2, 80), (-39, 127), (-18, 91), (-17, 96),
        (-26, 81), (-35, 98), (-24, 102), (-23, 97), (-27, 119), (-24, 99),
        (-21, 110), (-18, 102), (-36, 127), (0, 80), (-5, 89), (-7, 94),
        (-4, 92), (0, 39), (0, 65), (-15, 84), (-35, 127), (-2, 73),
        (-12, 104), (-9, 91), (-31, 127), (3, 55), (7, 56), (7, 55),
        (8, 61), (-3, 53), (0, 68), (-7, 74), (-9, 88),
    ],
    [
        (7, 34), (-9, 88), (-20, 127), (-36, 127), (-17, 91), (-14, 95),
        (-25, 84), (-25, 86), (-12, 89), (-17, 91), (-31, 127), (-14, 76),
        (-18, 103), (-13, 90), (-37, 127), (11, 80), (5, 76), (2, 84),
        (5, 78), (-6, 55), (4, 61), (-14, 83), (-37, 127), (-5, 79),
        (-11, 104), (-11, 91), (-30, 127), (0, 65), (-2, 79), (0, 72),
        (-4, 92), (-6, 56), (3, 68), (-8, 71), (-13, 98),
    ],
];

/// Table 9-36, as (value, number of bins).
const MB_TYPE_I_BINS: [(u32, u32); 26] = [
    (0b0, 1),
    (0b100000, 6),
    (0b100001, 6),
    (0b100010, 6),
    (0b100011, 6),
    (0b1001000, 7),
    (0b1001001, 7),
    (0b1001010, 7),
    (0b1001011, 7),
    (0b1001100, 7),
    (0b1001101, 7),
    (0b1001110, 7),
    (0b1001111, 7),
    (0b101000, 6),
    (0b101001, 6),
    (0b101010, 6),
    (0b101011, 6),
    (0b1011000, 7),
    (0b1011001, 7),
    (0b1011010, 7),
    (0b1011011, 7),
    (0b1011100, 7),
    (0b1011101, 7),
    (0b1011110, 7),
    (0b1011111, 7),
    (0b11, 2),
];

/// Table 9-37, P and SP slices. `P_8x8ref0` has no binarization.
const MB_TYPE_P_BINS: [(u32, u32); 4] = [(0b000, 3), (0b011, 3), (0b010, 3), (0b001, 3)];

/// Table 9-37, B slices.
const MB_TYPE_B_BINS: [(u32, u32); 23] = [
    (0b0, 1),
    (0b100, 3),
    (0b101, 3),
    (0b110000, 6),
    (0b110001, 6),
    (0b110010, 6),
    (0b110011, 6),
    (0b110100, 6),
    (0b110101, 6),
    (0b110110, 6),
    (0b110111, 6),
    (0b111110, 6),
    (0b1110000, 7),
    (0b1110001, 7),
    (0b1110010, 7),
    (0b1110011, 7),
    (0b1110100, 7),
    (0b1110101, 7),
    (0b1110110, 7),
    (0b1110111, 7),
    (0b1111000, 7),
    (0b1111001, 7),
    (0b111111, 6),
];

/// Prefix of the intra macroblock types of B slices.
const MB_TYPE_B_INTRA_PREFIX: (u32, u32) = (0b111101, 6);

/// Table 9-38, P and SP slices.
const SUB_MB_TYPE_P_BINS: [(u32, u32); 4] = [(0b1, 1), (0b00, 2), (0b011, 3), (0b010, 3)];

/// Table 9-38, B slices.
const SUB_MB_TYPE_B_BINS: [(u32, u32); 13] = [
    (0b0, 1),
    (0b100, 3),
    (0b101, 3),
    (0b11000, 5),
    (0b11001, 5),
    (0b11010, 5),
    (0b11011, 5),
    (0b111000, 6),
    (0b111001, 6),
    (0b111010, 6),
    (0b111011, 6),
    (0b11110, 5),
    (0b11111, 5),
];

/// Initializes the context variables of a slice, 9.3.1.1.
pub fn init_context_states(
    slice_type: SliceType,
    cabac_init_idc: u8,
    slice_qp_luma: i32,
) -> Result<[BacState; NUM_CTX]> {
    let idc = cabac_init_idc as usize;
    if !slice_type.is_intra() && idc > 2 {
        return Err(H264Error::protocol(format!("invalid cabac_init_idc {}", idc)));
    }

    let mut states = [BacState::default(); NUM_CTX];
    for (ctx_idx, state) in states.iter_mut().enumerate() {
        let (m, n) = match ctx_idx {
            0..=10 => INIT_0_10[ctx_idx],
            // Not used by I and SI slices.
            11..=59 if slice_type.is_intra() => (0, 0),
            11..=59 => INIT_11_59[idc][ctx_idx - 11],
            60..=69 => INIT_60_69[ctx_idx - 60],
            _ if slice_type.is_intra() => INIT_70_104_I[ctx_idx - 70],
            _ => INIT_70_104[idc][ctx_idx - 70],
        };
        *state = BacState::new(slice_qp_luma, m, n);
    }

    Ok(states)
}

/// A binarized syntax element.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct BinString {
    value: u32,
    len: u32,
    ctx_idx_offset: u32,
}

impl BinString {
    fn new((value, len): (u32, u32), ctx_idx_offset: u32) -> Self {
        Self {
            value,
            len,
            ctx_idx_offset,
        }
    }

    /// Bin `idx`, counted from the first one coded.
    fn bin(&self, idx: u32) -> bool {
        (self.value >> (self.len - 1 - idx)) & 1 != 0
    }
}

/// CABAC encoder of one slice.
#[derive(Debug)]
pub struct Cabac {
    enc: BacEncoder,
    states: [BacState; NUM_CTX],
    /// Previous macroblock of the slice, in coding order.
    prev_mb_addr: Option<u32>,
}

impl Cabac {
    /// Creates the encoder for the current slice of `ctx`. The writer must be
    /// byte aligned with `cabac_alignment_one_bit` before the first bin.
    pub fn new(ctx: &Ctx) -> Result<Self> {
        let sh = ctx.slice_header();
        let states = init_context_states(
            sh.kind(),
            sh.cabac_init_idc,
            ctx.slice_derived().slice_qp_luma,
        )?;

        Ok(Self {
            enc: BacEncoder::new(),
            states,
            prev_mb_addr: None,
        })
    }

    pub fn bin_count(&self) -> u32 {
        self.enc.bin_count()
    }

    fn encode_decision(&mut self, w: &mut NaluWriter, ctx_idx: u32, bin: bool) -> Result<()> {
        if ctx_idx == CTX_TERMINATE {
            return self.enc.encode_terminate(w, bin);
        }

        let state = self.states.get_mut(ctx_idx as usize).ok_or_else(|| {
            H264Error::unsupported(format!("context variable {} is not handled", ctx_idx))
        })?;
        self.enc.encode_decision(w, state, bin)
    }

    fn encode_bins(&mut self, w: &mut NaluWriter, ctx: &Ctx, bins: BinString) -> Result<()> {
        trace!(
            "bins {:0width$b} offset {}",
            bins.value,
            bins.ctx_idx_offset,
            width = bins.len as usize
        );

        for bin_idx in 0..bins.len {
            let ctx_idx = ctx_idx(ctx, &bins, bin_idx)?;
            self.encode_decision(w, ctx_idx, bins.bin(bin_idx))?;
        }

        Ok(())
    }

    /// Writes `mb_type` of the current macroblock, 9.3.2.5.
    pub fn write_mb_type(&mut self, w: &mut NaluWriter, ctx: &Ctx) -> Result<()> {
        let raw = ctx.macroblock().raw_mb_type;
        let invalid = || H264Error::io(format!("invalid mb_type {}", raw));
        let intra = |t: u32| MB_TYPE_I_BINS.get(t as usize).copied().ok_or_else(invalid);

        let (prefix, suffix) = match ctx.slice_header().kind() {
            SliceType::I => (BinString::new(intra(raw)?, 3), None),
            SliceType::Si if raw == 0 => (BinString::new((0, 1), 0), None),
            SliceType::Si => (
                BinString::new((1, 1), 0),
                Some(BinString::new(intra(raw - 1)?, 3)),
            ),
            SliceType::P | SliceType::Sp if raw < 4 => {
                (BinString::new(MB_TYPE_P_BINS[raw as usize], 14), None)
            }
            SliceType::P | SliceType::Sp if raw == 4 => return Err(invalid()),
            SliceType::P | SliceType::Sp => (
                BinString::new((1, 1), 14),
                Some(BinString::new(intra(raw - 5)?, 17)),
            ),
            SliceType::B if raw < 23 => (BinString::new(MB_TYPE_B_BINS[raw as usize], 27), None),
            SliceType::B => (
                BinString::new(MB_TYPE_B_INTRA_PREFIX, 27),
                Some(BinString::new(intra(raw - 23)?, 32)),
            ),
        };

        self.encode_bins(w, ctx, prefix)?;
        if let Some(suffix) = suffix {
            self.encode_bins(w, ctx, suffix)?;
        }

        Ok(())
    }

    /// Writes the `sub_mb_type` coded as `raw`.
    pub fn write_sub_mb_type(&mut self, w: &mut NaluWriter, ctx: &Ctx, raw: u32) -> Result<()> {
        let bins = if ctx.slice_header().kind().is_b() {
            SUB_MB_TYPE_B_BINS
                .get(raw as usize)
                .map(|&b| BinString::new(b, 36))
        } else {
            SUB_MB_TYPE_P_BINS
                .get(raw as usize)
                .map(|&b| BinString::new(b, 21))
        };

        let bins = bins.ok_or_else(|| H264Error::io(format!("invalid sub_mb_type {}", raw)))?;
        self.encode_bins(w, ctx, bins)
    }

    /// Writes `mb_skip_flag` of the current macroblock.
    pub fn write_mb_skip_flag(&mut self, w: &mut NaluWriter, ctx: &Ctx, flag: bool) -> Result<()> {
        let offset = match ctx.slice_header().kind() {
            SliceType::P | SliceType::Sp => 11,
            SliceType::B => 24,
            _ => return Err(H264Error::io("mb_skip_flag in an intra slice")),
        };

        self.encode_bins(w, ctx, BinString::new((flag as u32, 1), offset))
    }

    /// Writes `intra_chroma_pred_mode` of the current macroblock, truncated
    /// unary with cMax 3.
    pub fn write_intra_chroma_pred_mode(&mut self, w: &mut NaluWriter, ctx: &Ctx) -> Result<()> {
        let mode = ctx.macroblock().intra_chroma_pred_mode as u32;
        let bins = match mode {
            0..=2 => (((1 << mode) - 1) << 1, mode + 1),
            3 => (0b111, 3),
            _ => return Err(H264Error::io(format!("invalid intra_chroma_pred_mode {}", mode))),
        };

        self.encode_bins(w, ctx, BinString::new(bins, 64))
    }

    /// Writes `mb_qp_delta` of the current macroblock and records it for the
    /// following one.
    pub fn write_mb_qp_delta(&mut self, w: &mut NaluWriter, ctx: &mut Ctx) -> Result<()> {
        let mb_addr = ctx.macroblock().mb_addr;
        let delta = ctx.macroblock().mb_qp_delta;
        let k = if delta <= 0 {
            (-2 * delta as i64) as u64
        } else {
            (2 * delta as i64 - 1) as u64
        };

        let inc = self.prev_mb_addr.and_then(|addr| ctx.mb_info(addr)).map_or(0, |prev| {
            let coded = !(prev.skipped
                || prev.mb_type == MbType::I_PCM
                || (prev.mb_type != MbType::I_16x16 && prev.cbp_luma == 0 && prev.cbp_chroma == 0)
                || prev.mb_qp_delta == 0);
            coded as u32
        });

        // Unary, with the terminating zero.
        for i in 0..=k {
            let ctx_idx = match i {
                0 => 60 + inc,
                1 => 62,
                _ => 63,
            };
            self.encode_decision(w, ctx_idx, i < k)?;
        }

        if let Some(info) = ctx.mb_info_mut(mb_addr) {
            info.mb_qp_delta = delta;
        }

        Ok(())
    }

    /// Writes `coded_block_flag` of a block of the current macroblock and
    /// records it for the neighbouring blocks.
    pub fn write_coded_block_flag(
        &mut self,
        w: &mut NaluWriter,
        ctx: &mut Ctx,
        kind: BlockKind,
        comp: Component,
        blk: usize,
        flag: bool,
    ) -> Result<()> {
        let cat = kind.ctx_block_cat(comp) as usize;
        let cat_offset = CODED_BLOCK_FLAG_CAT_OFFSET.get(cat).ok_or_else(|| {
            H264Error::unsupported(format!("coded_block_flag of ctxBlockCat {}", cat))
        })?;

        let cond_a = coded_block_flag_cond(ctx, kind, comp, blk, Neighbour::A);
        let cond_b = coded_block_flag_cond(ctx, kind, comp, blk, Neighbour::B);
        let ctx_idx = CODED_BLOCK_FLAG_OFFSET + cat_offset + cond_a + 2 * cond_b;
        self.encode_decision(w, ctx_idx, flag)?;

        let mb_addr = ctx.macroblock().mb_addr;
        if let Some(info) = ctx.mb_info_mut(mb_addr) {
            if kind.is_dc() {
                info.coded_dc[comp as usize] = flag;
            } else if !flag {
                info.nz[comp as usize][blk] = 0;
            }
        }

        Ok(())
    }

    /// Writes `end_of_slice_flag` after the current macroblock. Writing 1
    /// flushes the engine.
    pub fn write_end_of_slice_flag(
        &mut self,
        w: &mut NaluWriter,
        ctx: &Ctx,
        flag: bool,
    ) -> Result<()> {
        self.prev_mb_addr = Some(ctx.macroblock().mb_addr);
        self.encode_decision(w, CTX_TERMINATE, flag)
    }
}

/// ctxIdx of bin `bin_idx` of `bins`, table 9-39.
fn ctx_idx(ctx: &Ctx, bins: &BinString, bin_idx: u32) -> Result<u32> {
    let b = |idx: u32| bins.bin(idx);
    let offset = bins.ctx_idx_offset;

    let ctx_idx = match (offset, bin_idx) {
        (0 | 3 | 27, 0) => offset + mb_type_inc(ctx, offset),
        (3, 1) => CTX_TERMINATE,
        (3, 2) => 3 + 3,
        (3, 3) => 3 + 4,
        (3, 4) => 3 + if b(3) { 5 } else { 6 },
        (3, 5) => 3 + if b(3) { 6 } else { 7 },
        (3, _) => 3 + 7,
        (11 | 24, 0) => offset + mb_skip_flag_inc(ctx),
        (14, 0) => 14,
        (14, 1) => 14 + 1,
        (14, 2) => 14 + if b(1) { 3 } else { 2 },
        (17 | 32, 0) => offset,
        (17 | 32, 1) => CTX_TERMINATE,
        (17 | 32, 2) => offset + 1,
        (17 | 32, 3) => offset + 2,
        (17 | 32, 4) => offset + if b(3) { 2 } else { 3 },
        (17 | 32, _) => offset + 3,
        (21, 0..=2) => 21 + bin_idx,
        (27, 1) => 27 + 3,
        (27, 2) => 27 + if b(1) { 4 } else { 5 },
        (27, _) => 27 + 5,
        (36, 0) => 36,
        (36, 1) => 36 + 1,
        (36, 2) => 36 + if b(1) { 2 } else { 3 },
        (36, _) => 36 + 3,
        (64, 0) => 64 + intra_chroma_pred_mode_inc(ctx),
        (64, _) => 64 + 3,
        _ => {
            return Err(H264Error::unsupported(format!(
                "bin {} of ctxIdxOffset {}",
                bin_idx, offset
            )))
        }
    };

    Ok(ctx_idx)
}

/// Available neighbours A and B of the current macroblock.
fn neighbours(ctx: &Ctx) -> [Option<&MacroblockInfo>; 2] {
    let mb = ctx.macroblock();
    [
        mb.mb_addr_a.and_then(|addr| ctx.mb_info(addr)),
        mb.mb_addr_b.and_then(|addr| ctx.mb_info(addr)),
    ]
}

/// ctxIdxInc of the first `mb_type` bin, 9.3.3.1.1.3.
fn mb_type_inc(ctx: &Ctx, offset: u32) -> u32 {
    neighbours(ctx)
        .iter()
        .map(|n| match n {
            None => 0,
            Some(info) => {
                let zero = match offset {
                    0 => info.mb_type == MbType::SI,
                    3 => matches!(info.mb_type, MbType::I_NxN | MbType::SI),
                    _ => matches!(info.mb_type, MbType::B_Skip | MbType::B_Direct_16x16),
                };
                (!zero) as u32
            }
        })
        .sum()
}

/// ctxIdxInc of `mb_skip_flag`, 9.3.3.1.1.1.
fn mb_skip_flag_inc(ctx: &Ctx) -> u32 {
    neighbours(ctx)
        .iter()
        .map(|n| n.map_or(0, |info| (!info.skipped) as u32))
        .sum()
}

/// ctxIdxInc of the first `intra_chroma_pred_mode` bin, 9.3.3.1.1.8.
fn intra_chroma_pred_mode_inc(ctx: &Ctx) -> u32 {
    neighbours(ctx)
        .iter()
        .map(|n| {
            n.map_or(0, |info| {
                let zero = info.mb_type.is_inter()
                    || info.skipped
                    || info.mb_type == MbType::I_PCM
                    || info.intra_chroma_pred_mode == 0;
                (!zero) as u32
            })
        })
        .sum()
}

/// condTermFlagN of `coded_block_flag`, 9.3.3.1.1.9.
fn coded_block_flag_cond(
    ctx: &Ctx,
    kind: BlockKind,
    comp: Component,
    blk: usize,
    dir: Neighbour,
) -> u32 {
    let mb = ctx.macroblock();
    let curr_intra = mb.mb_type.is_intra();
    let plane = comp as usize;

    let neighbour = match kind {
        BlockKind::Intra16x16Dc | BlockKind::ChromaDc => {
            let addr = match dir {
                Neighbour::A => mb.mb_addr_a,
                Neighbour::B => mb.mb_addr_b,
            };
            addr.map(|addr| (addr, 0))
        }
        BlockKind::Intra16x16Ac | BlockKind::Level4x4 => {
            neighbour_luma4x4(ctx, mb.mb_addr, mb.mb_field_decoding_flag, blk, dir)
        }
        BlockKind::ChromaAc => {
            neighbour_chroma4x4(ctx, mb.mb_addr, mb.mb_field_decoding_flag, blk, dir)
        }
    };

    let Some((addr, idx)) = neighbour else {
        return curr_intra as u32;
    };
    let Some(info) = ctx.mb_info(addr) else {
        return curr_intra as u32;
    };

    if info.mb_type == MbType::I_PCM {
        return 1;
    }

    let partitioned = matches!(
        ctx.nalu_header().type_(),
        NaluType::SliceDpa | NaluType::SliceDpb | NaluType::SliceDpc
    );
    let constrained_intra = ctx.pps().map_or(false, |pps| pps.constrained_intra_pred_flag);
    if curr_intra && constrained_intra && info.mb_type.is_inter() && partitioned {
        return 0;
    }

    let coded = if info.skipped {
        None
    } else {
        match kind {
            BlockKind::Intra16x16Dc => {
                (info.mb_type == MbType::I_16x16).then(|| info.coded_dc[plane])
            }
            BlockKind::ChromaDc => (info.cbp_chroma != 0).then(|| info.coded_dc[plane]),
            BlockKind::Intra16x16Ac | BlockKind::Level4x4 => {
                if (info.cbp_luma >> (idx / 4)) & 1 == 0 {
                    None
                } else if info.transform_size_8x8_flag {
                    // The 8x8 block has its flag inferred to 1.
                    Some(true)
                } else {
                    Some(info.nz[plane][idx] != 0)
                }
            }
            BlockKind::ChromaAc => (info.cbp_chroma == 2).then(|| info.nz[plane][idx] != 0),
        }
    };

    coded.map_or(0, |c| c as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_tables() {
        let states = init_context_states(SliceType::I, 0, 26).unwrap();
        // ctxIdx 60, (0, 41).
        assert_eq!(states[60], BacState { idx: 22, mps: false });
        // ctxIdx 276 is not a context variable, 70 is (0, 11) in I slices.
        assert_eq!(states[70], BacState::new(26, 0, 11));

        let states = init_context_states(SliceType::P, 2, 26).unwrap();
        assert_eq!(states[11], BacState::new(26, 29, 16));
        assert_eq!(states[59], BacState::new(26, 1, 60));
        assert_eq!(states[104], BacState::new(26, -13, 98));

        assert!(init_context_states(SliceType::B, 3, 26).is_err());
        // cabac_init_idc is not coded in I slices.
        assert!(init_context_states(SliceType::I, 3, 26).is_ok());
    }

    #[test]
    fn bin_order() {
        let bins = BinString::new((0b100010, 6), 3);
        let collected: Vec<bool> = (0..6).map(|i| bins.bin(i)).collect();
        assert_eq!(collected, [true, false, false, false, true, false]);
    }

    #[test]
    fn intra_mb_type_contexts() {
        let ctx = Ctx::new();
        // I_16x16_1_0_0: 1 0 0 0 0 1... with bin 1 terminating.
        let bins = BinString::new(MB_TYPE_I_BINS[2], 3);
        let idx: Vec<u32> = (0..6).map(|i| ctx_idx(&ctx, &bins, i).unwrap()).collect();
        assert_eq!(idx, [3, CTX_TERMINATE, 6, 7, 9, 10]);

        // Chroma coded: bins 4 and 5 move to 8 and 9, bin 6 to 10.
        let bins = BinString::new(MB_TYPE_I_BINS[5], 3);
        let idx: Vec<u32> = (0..7).map(|i| ctx_idx(&ctx, &bins, i).unwrap()).collect();
        assert_eq!(idx, [3, CTX_TERMINATE, 6, 7, 8, 9, 10]);
    }

    #[test]
    fn inter_mb_type_contexts() {
        let ctx = Ctx::new();

        // P_8x8: 0 0 1.
        let bins = BinString::new(MB_TYPE_P_BINS[3], 14);
        let idx: Vec<u32> = (0..3).map(|i| ctx_idx(&ctx, &bins, i).unwrap()).collect();
        assert_eq!(idx, [14, 15, 16]);

        // P_L0_L0_16x8: 0 1 1.
        let bins = BinString::new(MB_TYPE_P_BINS[1], 14);
        assert_eq!(ctx_idx(&ctx, &bins, 2).unwrap(), 17);

        // B_L1_16x16: 1 0 1.
        let bins = BinString::new(MB_TYPE_B_BINS[2], 27);
        let idx: Vec<u32> = (0..3).map(|i| ctx_idx(&ctx, &bins, i).unwrap()).collect();
        assert_eq!(idx, [27, 30, 32]);

        // B_L0_Bi_16x8: 1 1 1 0 0 0 0.
        let bins = BinString::new(MB_TYPE_B_BINS[12], 27);
        let idx: Vec<u32> = (0..7).map(|i| ctx_idx(&ctx, &bins, i).unwrap()).collect();
        assert_eq!(idx, [27, 30, 31, 32, 32, 32, 32]);

        let bins = BinString::new((0b1, 1), 60);
        assert!(matches!(
            ctx_idx(&ctx, &bins, 0),
            Err(H264Error::Unsupported(_))
        ));
    }
}
