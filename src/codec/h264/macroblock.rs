// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Macroblock records, the `mb_type` tables and the neighbour derivation
//! processes of clause 6.4.

use crate::codec::h264::ctx::Ctx;
use crate::codec::h264::error::H264Error;
use crate::codec::h264::error::Result;
use crate::codec::h264::types::MbType;
use crate::codec::h264::types::PredMode;
use crate::codec::h264::types::SliceType;
use crate::codec::h264::types::SubMbType;

/// The macroblock table grows by this many entries at a time.
pub const MB_TABLE_GROWTH: usize = 128;

/// Colour component of a residual block.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Component {
    Y = 0,
    Cb = 1,
    Cr = 2,
}

/// Residual block kinds, table 9-42 without the 8x8 categories.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BlockKind {
    Intra16x16Dc,
    Intra16x16Ac,
    Level4x4,
    ChromaDc,
    ChromaAc,
}

impl BlockKind {
    /// `ctxBlockCat` of a block of this kind coded in `comp`.
    pub fn ctx_block_cat(&self, comp: Component) -> u32 {
        match (self, comp) {
            (BlockKind::ChromaDc, _) => 3,
            (BlockKind::ChromaAc, _) => 4,
            (BlockKind::Intra16x16Dc, Component::Y) => 0,
            (BlockKind::Intra16x16Ac, Component::Y) => 1,
            (BlockKind::Level4x4, Component::Y) => 2,
            (BlockKind::Intra16x16Dc, Component::Cb) => 6,
            (BlockKind::Intra16x16Ac, Component::Cb) => 7,
            (BlockKind::Level4x4, Component::Cb) => 8,
            (BlockKind::Intra16x16Dc, Component::Cr) => 10,
            (BlockKind::Intra16x16Ac, Component::Cr) => 11,
            (BlockKind::Level4x4, Component::Cr) => 12,
        }
    }

    /// Whether the block carries the DC coefficients of its macroblock.
    pub fn is_dc(&self) -> bool {
        matches!(self, BlockKind::Intra16x16Dc | BlockKind::ChromaDc)
    }

    /// Prefix of the dumped coefficient names.
    pub fn name(&self, comp: Component) -> &'static str {
        match (self, comp) {
            (BlockKind::Intra16x16Dc, Component::Y) => "Luma16DC",
            (BlockKind::Intra16x16Ac, Component::Y) => "Luma16AC",
            (BlockKind::Level4x4, Component::Y) => "Luma",
            (BlockKind::Intra16x16Dc, Component::Cb) => "Cb16DC",
            (BlockKind::Intra16x16Ac, Component::Cb) => "Cb16AC",
            (BlockKind::Level4x4, Component::Cb) => "Cb",
            (BlockKind::Intra16x16Dc, Component::Cr) => "Cr16DC",
            (BlockKind::Intra16x16Ac, Component::Cr) => "Cr16AC",
            (BlockKind::Level4x4, Component::Cr) => "Cr",
            (BlockKind::ChromaDc, Component::Cr) => "CrDC",
            (BlockKind::ChromaDc, _) => "CbDC",
            (BlockKind::ChromaAc, Component::Cr) => "CrAC",
            (BlockKind::ChromaAc, _) => "CbAC",
        }
    }
}

/// What the rest of the slice needs to know about an already parsed
/// macroblock.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MacroblockInfo {
    /// Set once the macroblock has been parsed in the current slice.
    pub available: bool,
    pub skipped: bool,
    pub field_flag: bool,
    pub mb_type: MbType,
    pub intra_chroma_pred_mode: u8,
    pub cbp_luma: u8,
    pub cbp_chroma: u8,
    pub transform_size_8x8_flag: bool,
    pub mb_qp_delta: i32,
    /// Whether the DC block of Y, Cb and Cr had coefficients.
    pub coded_dc: [bool; 3],
    /// `TotalCoeff( coeff_token )` of every 4x4 block of Y, Cb and Cr.
    pub nz: [[u8; 16]; 3],
}

/// Per slice table of [`MacroblockInfo`], indexed by the offset of the
/// macroblock address from the first macroblock of the slice.
#[derive(Clone, Debug, Default)]
pub struct MbTable {
    entries: Vec<MacroblockInfo>,
}

impl MbTable {
    /// Marks every entry unavailable. The storage is kept.
    pub fn clear(&mut self) {
        self.entries.fill(MacroblockInfo::default());
    }

    pub fn get(&self, off: usize) -> Option<&MacroblockInfo> {
        self.entries.get(off)
    }

    pub fn get_mut(&mut self, off: usize) -> Option<&mut MacroblockInfo> {
        self.entries.get_mut(off)
    }

    /// The entry at `off`, growing the table as needed.
    pub fn entry(&mut self, off: usize) -> &mut MacroblockInfo {
        if off >= self.entries.len() {
            let len = (off / MB_TABLE_GROWTH + 1) * MB_TABLE_GROWTH;
            self.entries.resize(len, MacroblockInfo::default());
        }

        &mut self.entries[off]
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }
}

/// The macroblock being parsed or written.
#[derive(Clone, Debug)]
pub struct Macroblock {
    pub mb_addr: u32,
    /// Neighbouring macroblocks A and B, or the top macroblocks of the
    /// neighbouring pairs in MBAFF frames, when available.
    pub mb_addr_a: Option<u32>,
    pub mb_addr_b: Option<u32>,
    pub mb_field_decoding_flag: bool,

    /// `mb_type` as coded in the slice, before any offset.
    pub raw_mb_type: u32,
    pub mb_type: MbType,
    pub num_mb_part: u8,
    pub mb_part_pred_mode: [PredMode; 2],
    pub intra16x16_pred_mode: u8,
    pub transform_size_8x8_flag: bool,

    /// `rem_intra4x4_pred_mode`, or -1 when `prev_intra4x4_pred_mode_flag` is
    /// set. Same for the 8x8 modes.
    pub intra4x4_pred_mode: [i8; 16],
    pub intra8x8_pred_mode: [i8; 4],
    pub intra_chroma_pred_mode: u8,

    pub ref_idx_l0: [u8; 4],
    pub ref_idx_l1: [u8; 4],
    pub mvd_l0: [[[i32; 2]; 4]; 4],
    pub mvd_l1: [[[i32; 2]; 4]; 4],

    pub sub_mb_type: [SubMbType; 4],
    pub num_sub_mb_part: [u8; 4],
    pub sub_mb_pred_mode: [PredMode; 4],

    pub coded_block_pattern: u8,
    pub cbp_luma: u8,
    pub cbp_chroma: u8,
    pub mb_qp_delta: i32,

    pub pcm_sample_luma: [u16; 256],
    /// Cb samples followed by Cr samples.
    pub pcm_sample_chroma: [u16; 512],

    /// Residual levels of Y, Cb and Cr.
    pub i16x16_dc_level: [[i32; 16]; 3],
    pub i16x16_ac_level: [[[i32; 15]; 16]; 3],
    pub level4x4: [[[i32; 16]; 16]; 3],
    pub level8x8: [[[i32; 64]; 4]; 3],
    /// Chroma residual levels of Cb and Cr for chroma array types 1 and 2.
    pub chroma_dc_level: [[i32; 8]; 2],
    pub chroma_ac_level: [[[i32; 15]; 8]; 2],
}

impl Default for Macroblock {
    fn default() -> Self {
        Self {
            mb_addr: 0,
            mb_addr_a: None,
            mb_addr_b: None,
            mb_field_decoding_flag: false,
            raw_mb_type: 0,
            mb_type: MbType::Unknown,
            num_mb_part: 0,
            mb_part_pred_mode: [PredMode::default(); 2],
            intra16x16_pred_mode: 0,
            transform_size_8x8_flag: false,
            intra4x4_pred_mode: [0; 16],
            intra8x8_pred_mode: [0; 4],
            intra_chroma_pred_mode: 0,
            ref_idx_l0: [0; 4],
            ref_idx_l1: [0; 4],
            mvd_l0: [[[0; 2]; 4]; 4],
            mvd_l1: [[[0; 2]; 4]; 4],
            sub_mb_type: [SubMbType::default(); 4],
            num_sub_mb_part: [0; 4],
            sub_mb_pred_mode: [PredMode::default(); 4],
            coded_block_pattern: 0,
            cbp_luma: 0,
            cbp_chroma: 0,
            mb_qp_delta: 0,
            pcm_sample_luma: [0; 256],
            pcm_sample_chroma: [0; 512],
            i16x16_dc_level: [[0; 16]; 3],
            i16x16_ac_level: [[[0; 15]; 16]; 3],
            level4x4: [[[0; 16]; 16]; 3],
            level8x8: [[[0; 64]; 4]; 3],
            chroma_dc_level: [[0; 8]; 2],
            chroma_ac_level: [[[0; 15]; 8]; 2],
        }
    }
}

impl Macroblock {
    fn set_intra(&mut self, raw: u32) -> Result<()> {
        match raw {
            0 => {
                self.mb_type = MbType::I_NxN;
                self.num_mb_part = 1;
                self.mb_part_pred_mode[0] = PredMode::Intra_4x4;
            }
            1..=24 => {
                let t = raw - 1;
                self.mb_type = MbType::I_16x16;
                self.num_mb_part = 1;
                self.mb_part_pred_mode[0] = PredMode::Intra_16x16;
                self.intra16x16_pred_mode = (t % 4) as u8;
                self.cbp_chroma = ((t / 4) % 3) as u8;
                self.cbp_luma = if t < 12 { 0 } else { 15 };
            }
            25 => {
                self.mb_type = MbType::I_PCM;
                self.num_mb_part = 0;
            }
            _ => return Err(H264Error::io(format!("invalid intra mb_type {}", raw))),
        }

        Ok(())
    }

    fn set_p(&mut self, raw: u32) -> Result<()> {
        use PredMode::Pred_L0;

        let (mb_type, num_mb_part) = match raw {
            0 => (MbType::P_16x16, 1),
            1 => (MbType::P_16x8, 2),
            2 => (MbType::P_8x16, 2),
            3 => (MbType::P_8x8, 4),
            4 => (MbType::P_8x8ref0, 4),
            _ => return self.set_intra(raw - 5),
        };

        self.mb_type = mb_type;
        self.num_mb_part = num_mb_part;
        self.mb_part_pred_mode = [Pred_L0, Pred_L0];
        Ok(())
    }

    fn set_b(&mut self, raw: u32) -> Result<()> {
        use PredMode::BiPred as Bi;
        use PredMode::Direct;
        use PredMode::Pred_L0 as L0;
        use PredMode::Pred_L1 as L1;

        // Table 7-14.
        const B_TYPES: [(MbType, u8, [PredMode; 2]); 23] = [
            (MbType::B_Direct_16x16, 0, [Direct, Direct]),
            (MbType::B_16x16, 1, [L0, L0]),
            (MbType::B_16x16, 1, [L1, L1]),
            (MbType::B_16x16, 1, [Bi, Bi]),
            (MbType::B_16x8, 2, [L0, L0]),
            (MbType::B_8x16, 2, [L0, L0]),
            (MbType::B_16x8, 2, [L1, L1]),
            (MbType::B_8x16, 2, [L1, L1]),
            (MbType::B_16x8, 2, [L0, L1]),
            (MbType::B_8x16, 2, [L0, L1]),
            (MbType::B_16x8, 2, [L1, L0]),
            (MbType::B_8x16, 2, [L1, L0]),
            (MbType::B_16x8, 2, [L0, Bi]),
            (MbType::B_8x16, 2, [L0, Bi]),
            (MbType::B_16x8, 2, [L1, Bi]),
            (MbType::B_8x16, 2, [L1, Bi]),
            (MbType::B_16x8, 2, [Bi, L0]),
            (MbType::B_8x16, 2, [Bi, L0]),
            (MbType::B_16x8, 2, [Bi, L1]),
            (MbType::B_8x16, 2, [Bi, L1]),
            (MbType::B_16x8, 2, [Bi, Bi]),
            (MbType::B_8x16, 2, [Bi, Bi]),
            (MbType::B_8x8, 4, [Direct, Direct]),
        ];

        match B_TYPES.get(raw as usize) {
            Some(&(mb_type, num_mb_part, modes)) => {
                self.mb_type = mb_type;
                self.num_mb_part = num_mb_part;
                self.mb_part_pred_mode = modes;
                Ok(())
            }
            None => self.set_intra(raw - 23),
        }
    }

    /// Sets the macroblock type from its coded value in a slice of type
    /// `slice_type`, tables 7-11 to 7-14.
    pub fn set_mb_type(&mut self, slice_type: SliceType, raw: u32) -> Result<()> {
        self.raw_mb_type = raw;
        self.cbp_luma = 0;
        self.cbp_chroma = 0;

        match slice_type {
            SliceType::I => self.set_intra(raw),
            SliceType::Si => match raw {
                0 => {
                    self.mb_type = MbType::SI;
                    self.num_mb_part = 1;
                    self.mb_part_pred_mode[0] = PredMode::Intra_4x4;
                    Ok(())
                }
                _ => self.set_intra(raw - 1),
            },
            SliceType::P | SliceType::Sp => self.set_p(raw),
            SliceType::B => self.set_b(raw),
        }
    }

    /// Sets sub-macroblock `idx` from its coded value, tables 7-17 and 7-18.
    pub fn set_sub_mb_type(&mut self, slice_type: SliceType, idx: usize, raw: u32) -> Result<()> {
        use PredMode::BiPred as Bi;
        use PredMode::Direct;
        use PredMode::Pred_L0 as L0;
        use PredMode::Pred_L1 as L1;

        const P_SUB: [(SubMbType, u8); 4] = [
            (SubMbType::P_8x8, 1),
            (SubMbType::P_8x4, 2),
            (SubMbType::P_4x8, 2),
            (SubMbType::P_4x4, 4),
        ];
        const B_SUB: [(SubMbType, u8, PredMode); 13] = [
            (SubMbType::B_Direct_8x8, 4, Direct),
            (SubMbType::B_8x8, 1, L0),
            (SubMbType::B_8x8, 1, L1),
            (SubMbType::B_8x8, 1, Bi),
            (SubMbType::B_8x4, 2, L0),
            (SubMbType::B_4x8, 2, L0),
            (SubMbType::B_8x4, 2, L1),
            (SubMbType::B_4x8, 2, L1),
            (SubMbType::B_8x4, 2, Bi),
            (SubMbType::B_4x8, 2, Bi),
            (SubMbType::B_4x4, 4, L0),
            (SubMbType::B_4x4, 4, L1),
            (SubMbType::B_4x4, 4, Bi),
        ];

        let entry = if slice_type.is_b() {
            B_SUB.get(raw as usize).copied()
        } else {
            P_SUB.get(raw as usize).map(|&(t, n)| (t, n, L0))
        };

        let (sub_mb_type, num_sub_mb_part, mode) =
            entry.ok_or_else(|| H264Error::io(format!("invalid sub_mb_type {}", raw)))?;
        self.sub_mb_type[idx] = sub_mb_type;
        self.num_sub_mb_part[idx] = num_sub_mb_part;
        self.sub_mb_pred_mode[idx] = mode;
        Ok(())
    }

    /// The macroblock is coded as an intra 16x16 block with its DC levels
    /// in a separate residual block.
    pub fn is_intra_16x16(&self) -> bool {
        self.mb_part_pred_mode[0] == PredMode::Intra_16x16
    }
}

/// Upper-left luma sample of each 4x4 block, 6.4.3.
pub(crate) const LUMA4X4_XY: [(i32, i32); 16] = [
    (0, 0),
    (4, 0),
    (0, 4),
    (4, 4),
    (8, 0),
    (12, 0),
    (8, 4),
    (12, 4),
    (0, 8),
    (4, 8),
    (0, 12),
    (4, 12),
    (8, 8),
    (12, 8),
    (8, 12),
    (12, 12),
];

/// Index of the luma 4x4 block covering sample `(x, y)`, 6.4.13.1.
pub(crate) fn luma4x4_blk_idx(x: i32, y: i32) -> usize {
    (8 * (y / 8) + 4 * (x / 8) + 2 * ((y % 8) / 4) + ((x % 8) / 4)) as usize
}

/// Index of the chroma 4x4 block covering sample `(x, y)`, 6.4.13.2.
pub(crate) fn chroma4x4_blk_idx(x: i32, y: i32) -> usize {
    (2 * (y / 4) + (x / 4)) as usize
}

/// Neighbour direction: A is to the left, B is above.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Neighbour {
    A,
    B,
}

/// A neighbouring location: the macroblock covering it, and the position
/// relative to that macroblock.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Location {
    pub mb_addr: u32,
    pub xw: i32,
    pub yw: i32,
}

/// Neighbouring macroblock addresses A and B of `curr`, 6.4.9 in frames and
/// fields, 6.4.10 for the macroblock pairs of MBAFF frames.
pub(crate) fn neighbour_mb_addrs(ctx: &Ctx, curr: u32) -> (Option<u32>, Option<u32>) {
    let w = ctx.sps_derived().pic_width_in_mbs;
    if w == 0 {
        return (None, None);
    }

    let avail = |addr: u32| ctx.mb_info(addr).map(|_| addr);

    if ctx.slice_derived().mbaff_frame_flag {
        let pair = curr / 2;
        let a = if pair % w != 0 { avail(2 * (pair - 1)) } else { None };
        let b = if pair >= w { avail(2 * (pair - w)) } else { None };
        (a, b)
    } else {
        let a = if curr % w != 0 { avail(curr - 1) } else { None };
        let b = if curr >= w { avail(curr - w) } else { None };
        (a, b)
    }
}

/// Derives the location of `(xn, yn)`, relative to the upper-left sample of
/// macroblock `curr`, 6.4.12. Only the rows of tables 6-3 and 6-4 used for
/// neighbours A and B, and for locations inside the current macroblock, are
/// derived.
pub(crate) fn neighbour_location(
    ctx: &Ctx,
    curr: u32,
    mb_field: bool,
    xn: i32,
    yn: i32,
    max_w: i32,
    max_h: i32,
) -> Option<Location> {
    let inside_x = (0..max_w).contains(&xn);
    let inside_y = (0..max_h).contains(&yn);

    if inside_x && inside_y {
        return Some(Location {
            mb_addr: curr,
            xw: xn,
            yw: yn,
        });
    }

    let (mb_addr, ym) = if !ctx.slice_derived().mbaff_frame_flag {
        let (a, b) = neighbour_mb_addrs(ctx, curr);
        match (xn < 0, inside_x, inside_y, yn < 0) {
            (true, _, true, _) => (a?, yn),
            (_, true, _, true) => (b?, yn),
            _ => return None,
        }
    } else {
        mbaff_location(ctx, curr, mb_field, xn, yn, max_h, inside_x, inside_y)?
    };

    Some(Location {
        mb_addr,
        xw: (xn + max_w) % max_w,
        yw: (ym + max_h) % max_h,
    })
}

/// Table 6-4, for neighbours A and B.
#[allow(clippy::too_many_arguments)]
fn mbaff_location(
    ctx: &Ctx,
    curr: u32,
    curr_field: bool,
    xn: i32,
    yn: i32,
    max_h: i32,
    inside_x: bool,
    inside_y: bool,
) -> Option<(u32, i32)> {
    let (a, b) = neighbour_mb_addrs(ctx, curr);
    let is_top = curr % 2 == 0;
    let pair_field = |addr: u32| ctx.mb_info(addr).map_or(false, |info| info.field_flag);

    if xn < 0 && inside_y {
        let a = a?;
        let a_frame = !pair_field(a);
        let loc = match (curr_field, is_top, a_frame) {
            (false, true, true) => (a, yn),
            (false, true, false) => (a + (yn % 2) as u32, yn >> 1),
            (false, false, true) => (a + 1, yn),
            (false, false, false) => (a + (yn % 2) as u32, (yn + max_h) >> 1),
            (true, true, true) if yn < max_h / 2 => (a, yn << 1),
            (true, true, true) => (a + 1, (yn << 1) - max_h),
            (true, true, false) => (a, yn),
            (true, false, true) if yn < max_h / 2 => (a, (yn << 1) + 1),
            (true, false, true) => (a + 1, (yn << 1) + 1 - max_h),
            (true, false, false) => (a + 1, yn),
        };
        return Some(loc);
    }

    if inside_x && yn < 0 {
        return match (curr_field, is_top) {
            (false, true) => Some((b? + 1, yn)),
            (false, false) => Some((curr - 1, yn)),
            (true, true) => {
                let b = b?;
                if pair_field(b) {
                    Some((b, yn))
                } else {
                    Some((b + 1, 2 * yn))
                }
            }
            (true, false) => Some((b? + 1, yn)),
        };
    }

    None
}

/// Neighbouring luma 4x4 block of block `blk` of macroblock `curr`, 6.4.11.4.
pub(crate) fn neighbour_luma4x4(
    ctx: &Ctx,
    curr: u32,
    mb_field: bool,
    blk: usize,
    dir: Neighbour,
) -> Option<(u32, usize)> {
    let (x, y) = LUMA4X4_XY[blk % 16];
    let (xn, yn) = match dir {
        Neighbour::A => (x - 1, y),
        Neighbour::B => (x, y - 1),
    };

    neighbour_location(ctx, curr, mb_field, xn, yn, 16, 16)
        .map(|loc| (loc.mb_addr, luma4x4_blk_idx(loc.xw, loc.yw)))
}

/// Neighbouring chroma 4x4 block of block `blk` of macroblock `curr`,
/// 6.4.11.5, for chroma array types 1 and 2.
pub(crate) fn neighbour_chroma4x4(
    ctx: &Ctx,
    curr: u32,
    mb_field: bool,
    blk: usize,
    dir: Neighbour,
) -> Option<(u32, usize)> {
    let sd = ctx.sps_derived();
    let (max_w, max_h) = (sd.mb_width_c as i32, sd.mb_height_c as i32);
    if max_w == 0 || max_h == 0 {
        return None;
    }

    let x = (blk as i32 % 2) * 4;
    let y = (blk as i32 / 2) * 4;
    let (xn, yn) = match dir {
        Neighbour::A => (x - 1, y),
        Neighbour::B => (x, y - 1),
    };

    neighbour_location(ctx, curr, mb_field, xn, yn, max_w, max_h)
        .map(|loc| (loc.mb_addr, chroma4x4_blk_idx(loc.xw, loc.yw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::h264::headers::Pps;
    use crate::codec::h264::headers::SliceHeader;
    use crate::codec::h264::headers::Sps;

    fn ctx_with(sps: Sps) -> Ctx {
        let mut ctx = Ctx::new();
        ctx.set_sps(Sps {
            pic_width_in_mbs_minus1: 19,
            pic_height_in_map_units_minus1: 10,
            ..sps
        })
        .unwrap();
        ctx.set_pps(Pps::default()).unwrap();
        ctx.set_slice_header(SliceHeader::default()).unwrap();
        ctx
    }

    /// MBAFF frame 20 pairs wide, with the pairs above (1) and to the left
    /// (20) of pair 21 decoded.
    fn mbaff_ctx(left_field: bool, above_field: bool) -> Ctx {
        let mut ctx = ctx_with(Sps {
            profile_idc: 77,
            frame_mbs_only_flag: false,
            mb_adaptive_frame_field_flag: true,
            ..Default::default()
        });
        assert!(ctx.slice_derived().mbaff_frame_flag);

        for (top, field) in [(2, above_field), (40, left_field), (42, false)] {
            ctx.new_macroblock(top, false, Some(field)).unwrap();
            ctx.commit_macroblock();
            ctx.new_macroblock(top + 1, false, None).unwrap();
            ctx.commit_macroblock();
        }
        ctx
    }

    #[test]
    fn mbaff_pair_addresses() {
        let ctx = mbaff_ctx(false, false);
        assert_eq!(neighbour_mb_addrs(&ctx, 42), (Some(40), Some(2)));
        assert_eq!(neighbour_mb_addrs(&ctx, 43), (Some(40), Some(2)));
        // Pair 20 starts a row, pair 2 was not decoded.
        assert_eq!(neighbour_mb_addrs(&ctx, 40), (None, None));
    }

    #[test]
    fn mbaff_left_neighbours() {
        let a = |left_field, curr, curr_field, blk| {
            let ctx = mbaff_ctx(left_field, false);
            neighbour_luma4x4(&ctx, curr, curr_field, blk, Neighbour::A)
        };

        // Frame macroblocks, left pair in frame mode.
        assert_eq!(a(false, 42, false, 0), Some((40, 5)));
        assert_eq!(a(false, 42, false, 10), Some((40, 15)));
        assert_eq!(a(false, 43, false, 2), Some((41, 7)));

        // Frame macroblocks, left pair in field mode: rows alternate
        // between the two fields.
        assert_eq!(a(true, 42, false, 8), Some((40, 7)));
        assert_eq!(a(true, 42, false, 10), Some((40, 7)));
        assert_eq!(a(true, 43, false, 0), Some((40, 13)));
        assert_eq!(a(true, 43, false, 10), Some((40, 15)));

        // Field macroblocks, left pair in frame mode: each field row covers
        // two frame rows of the pair.
        assert_eq!(a(false, 42, true, 2), Some((40, 13)));
        assert_eq!(a(false, 42, true, 8), Some((41, 5)));
        assert_eq!(a(false, 43, true, 0), Some((40, 5)));
        assert_eq!(a(false, 43, true, 2), Some((40, 13)));
        assert_eq!(a(false, 43, true, 10), Some((41, 13)));

        // Field macroblocks, left pair in field mode.
        assert_eq!(a(true, 42, true, 2), Some((40, 7)));
        assert_eq!(a(true, 43, true, 0), Some((41, 5)));

        // Inside the macroblock.
        assert_eq!(a(true, 43, true, 3), Some((43, 2)));
    }

    #[test]
    fn mbaff_top_neighbours() {
        let b = |above_field, curr, curr_field| {
            let ctx = mbaff_ctx(false, above_field);
            neighbour_luma4x4(&ctx, curr, curr_field, 0, Neighbour::B)
        };

        assert_eq!(b(false, 42, false), Some((3, 10)));
        assert_eq!(b(true, 42, false), Some((3, 10)));
        // The bottom frame macroblock sits under the top one of its pair.
        assert_eq!(b(false, 43, false), Some((42, 10)));
        assert_eq!(b(false, 42, true), Some((3, 10)));
        assert_eq!(b(true, 42, true), Some((2, 10)));
        assert_eq!(b(false, 43, true), Some((3, 10)));
        assert_eq!(b(true, 43, true), Some((3, 10)));
    }

    #[test]
    fn chroma_422_neighbours() {
        let mut ctx = ctx_with(Sps {
            profile_idc: 122,
            chroma_format_idc: 2,
            frame_mbs_only_flag: true,
            ..Default::default()
        });
        assert_eq!(ctx.sps_derived().mb_height_c, 16);

        for addr in [1, 20, 21] {
            ctx.new_macroblock(addr, false, None).unwrap();
            ctx.commit_macroblock();
        }

        let n = |blk, dir| neighbour_chroma4x4(&ctx, 21, false, blk, dir);
        assert_eq!(n(0, Neighbour::A), Some((20, 1)));
        assert_eq!(n(6, Neighbour::A), Some((20, 7)));
        assert_eq!(n(7, Neighbour::A), Some((21, 6)));
        assert_eq!(n(0, Neighbour::B), Some((1, 6)));
        assert_eq!(n(2, Neighbour::B), Some((21, 0)));
        assert_eq!(n(1, Neighbour::B), Some((1, 7)));

        // Macroblock 20 starts a row, and macroblock 0 was not decoded.
        assert_eq!(neighbour_chroma4x4(&ctx, 20, false, 0, Neighbour::A), None);
        assert_eq!(neighbour_chroma4x4(&ctx, 20, false, 0, Neighbour::B), None);
    }

    #[test]
    fn luma_block_scan() {
        for (blk, &(x, y)) in LUMA4X4_XY.iter().enumerate() {
            assert_eq!(luma4x4_blk_idx(x, y), blk);
            assert_eq!(luma4x4_blk_idx(x + 3, y + 3), blk);
        }
    }

    #[test]
    fn chroma_block_scan() {
        assert_eq!(chroma4x4_blk_idx(0, 0), 0);
        assert_eq!(chroma4x4_blk_idx(4, 0), 1);
        assert_eq!(chroma4x4_blk_idx(0, 4), 2);
        assert_eq!(chroma4x4_blk_idx(7, 15), 7);
    }

    #[test]
    fn intra_mb_types() {
        let mut mb = Macroblock::default();

        mb.set_mb_type(SliceType::I, 0).unwrap();
        assert_eq!(mb.mb_type, MbType::I_NxN);

        // I_16x16_2_1_1
        mb.set_mb_type(SliceType::I, 19).unwrap();
        assert_eq!(mb.mb_type, MbType::I_16x16);
        assert_eq!(mb.intra16x16_pred_mode, 2);
        assert_eq!(mb.cbp_chroma, 1);
        assert_eq!(mb.cbp_luma, 15);
        assert!(mb.is_intra_16x16());

        mb.set_mb_type(SliceType::I, 25).unwrap();
        assert_eq!(mb.mb_type, MbType::I_PCM);

        assert!(mb.set_mb_type(SliceType::I, 26).is_err());
    }

    #[test]
    fn inter_mb_types() {
        let mut mb = Macroblock::default();

        mb.set_mb_type(SliceType::P, 4).unwrap();
        assert_eq!(mb.mb_type, MbType::P_8x8ref0);
        assert_eq!(mb.num_mb_part, 4);

        // Intra macroblock in a P slice.
        mb.set_mb_type(SliceType::P, 5 + 3).unwrap();
        assert_eq!(mb.mb_type, MbType::I_16x16);
        assert_eq!(mb.intra16x16_pred_mode, 2);
        assert!(mb.set_mb_type(SliceType::P, 31).is_err());

        mb.set_mb_type(SliceType::B, 12).unwrap();
        assert_eq!(mb.mb_type, MbType::B_16x8);
        assert_eq!(mb.mb_part_pred_mode, [PredMode::Pred_L0, PredMode::BiPred]);

        mb.set_mb_type(SliceType::B, 22).unwrap();
        assert_eq!(mb.mb_type, MbType::B_8x8);

        mb.set_mb_type(SliceType::B, 23 + 25).unwrap();
        assert_eq!(mb.mb_type, MbType::I_PCM);
        assert!(mb.set_mb_type(SliceType::B, 49).is_err());

        mb.set_mb_type(SliceType::Si, 0).unwrap();
        assert_eq!(mb.mb_type, MbType::SI);
        mb.set_mb_type(SliceType::Si, 1).unwrap();
        assert_eq!(mb.mb_type, MbType::I_NxN);
    }

    #[test]
    fn sub_mb_types() {
        let mut mb = Macroblock::default();

        mb.set_sub_mb_type(SliceType::P, 0, 3).unwrap();
        assert_eq!(mb.sub_mb_type[0], SubMbType::P_4x4);
        assert_eq!(mb.num_sub_mb_part[0], 4);
        assert!(mb.set_sub_mb_type(SliceType::P, 0, 4).is_err());

        mb.set_sub_mb_type(SliceType::B, 2, 9).unwrap();
        assert_eq!(mb.sub_mb_type[2], SubMbType::B_4x8);
        assert_eq!(mb.sub_mb_pred_mode[2], PredMode::BiPred);
        assert!(mb.set_sub_mb_type(SliceType::B, 2, 13).is_err());
    }

    #[test]
    fn table_growth() {
        let mut table = MbTable::default();
        assert_eq!(table.capacity(), 0);

        table.entry(0).available = true;
        assert_eq!(table.capacity(), MB_TABLE_GROWTH);

        table.entry(MB_TABLE_GROWTH).skipped = true;
        assert_eq!(table.capacity(), 2 * MB_TABLE_GROWTH);

        table.clear();
        assert_eq!(table.capacity(), 2 * MB_TABLE_GROWTH);
        assert!(!table.get(0).unwrap().available);
    }
}
