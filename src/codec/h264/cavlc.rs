// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! CAVLC variable length codes, 9.2, and the `coded_block_pattern` mapping of
//! 9.1.2.

use crate::codec::h264::ctx::Ctx;
use crate::codec::h264::error::H264Error;
use crate::codec::h264::error::Result;
use crate::codec::h264::macroblock::neighbour_chroma4x4;
use crate::codec::h264::macroblock::neighbour_luma4x4;
use crate::codec::h264::macroblock::BlockKind;
use crate::codec::h264::macroblock::Component;
use crate::codec::h264::macroblock::MacroblockInfo;
use crate::codec::h264::macroblock::Neighbour;
use crate::codec::h264::syntax::SyntaxOps;
use crate::codec::h264::types::MbType;

/// Longest code of the tables below.
const MAX_VLC_BITS: u32 = 16;

/// Longest `level_prefix` accepted. Conforming streams stay at or below 15,
/// or a few more in the high profiles.
const MAX_LEVEL_PREFIX: u32 = 25;

/// One code of a VLC table. `a` and `value` are `TrailingOnes` and
/// `TotalCoeff` for the `coeff_token` tables; the other tables only use
/// `value`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct VlcEntry {
    len: u8,
    code: u16,
    a: u8,
    value: u8,
}

impl VlcEntry {
    const fn new(len: u8, code: u16, a: u8, value: u8) -> Self {
        Self {
            len,
            code,
            a,
            value,
        }
    }
}

/// Reads bits one at a time until they match a code of `table`.
fn read_vlc<O: SyntaxOps>(ops: &mut O, table: &'static [VlcEntry]) -> Result<&'static VlcEntry> {
    let mut code = 0u32;

    for len in 1..=MAX_VLC_BITS {
        code = (code << 1) | ops.read_raw_bits(1)?;
        if let Some(entry) = table
            .iter()
            .find(|e| e.len as u32 == len && e.code as u32 == code)
        {
            return Ok(entry);
        }
    }

    Err(H264Error::io(format!("no VLC code matches {:#b}", code)))
}

/// `TotalCoeff( coeff_token )` of the block of `info` at `plane`/`blk`, as
/// used for nA and nB in 9.2.1.
fn total_coeff(info: &MacroblockInfo, plane: usize, blk: usize) -> i32 {
    if info.skipped || info.mb_type.is_skip() {
        0
    } else if info.mb_type == MbType::I_PCM {
        16
    } else {
        info.nz[plane][blk] as i32
    }
}

/// nC of a block, 9.2.1.
pub(crate) fn coeff_token_nc(
    ctx: &Ctx,
    mb_addr: u32,
    mb_field: bool,
    kind: BlockKind,
    comp: Component,
    blk: usize,
) -> i32 {
    if kind == BlockKind::ChromaDc {
        return match ctx.sps_derived().chroma_array_type {
            1 => -1,
            _ => -2,
        };
    }

    // The DC blocks of intra 16x16 macroblocks use the neighbours of their
    // first 4x4 block.
    let blk = if kind.is_dc() { 0 } else { blk };
    let neighbour = |dir| match kind {
        BlockKind::ChromaAc => neighbour_chroma4x4(ctx, mb_addr, mb_field, blk, dir),
        _ => neighbour_luma4x4(ctx, mb_addr, mb_field, blk, dir),
    };

    let plane = comp as usize;
    let n = |dir| {
        neighbour(dir).and_then(|(addr, idx)| {
            ctx.mb_info(addr)
                .map(|info| total_coeff(info, plane, idx))
        })
    };

    match (n(Neighbour::A), n(Neighbour::B)) {
        (Some(a), Some(b)) => (a + b + 1) >> 1,
        (Some(a), None) => a,
        (None, Some(b)) => b,
        (None, None) => 0,
    }
}

/// Reads `coeff_token` with the table selected by `nc`, returning
/// `(TrailingOnes, TotalCoeff)`.
pub(crate) fn read_coeff_token<O: SyntaxOps>(ops: &mut O, nc: i32) -> Result<(u8, u8)> {
    let table = match nc {
        -1 => COEFF_TOKEN_CHROMA_DC_420,
        -2 => COEFF_TOKEN_CHROMA_DC_422,
        0..=1 => COEFF_TOKEN_NC0,
        2..=3 => COEFF_TOKEN_NC2,
        4..=7 => COEFF_TOKEN_NC4,
        8.. => {
            let code = ops.read_raw_bits(6)?;
            return COEFF_TOKEN_FLC[code as usize]
                .ok_or_else(|| H264Error::io(format!("invalid coeff_token {:#08b}", code)));
        }
        _ => return Err(H264Error::invalid(format!("invalid nC {}", nc))),
    };

    let entry = read_vlc(ops, table)?;
    Ok((entry.a, entry.value))
}

/// Reads `level_prefix`, 9.2.2.1.
pub(crate) fn read_level_prefix<O: SyntaxOps>(ops: &mut O) -> Result<u32> {
    let mut leading_zero_bits = 0;

    while ops.read_raw_bits(1)? == 0 {
        leading_zero_bits += 1;
        if leading_zero_bits > MAX_LEVEL_PREFIX {
            return Err(H264Error::io("level_prefix is too long"));
        }
    }

    Ok(leading_zero_bits)
}

/// Reads `total_zeros` of a block with `total_coeff` coefficients out of
/// `max_num_coeff`, 9.2.3.
pub(crate) fn read_total_zeros<O: SyntaxOps>(
    ops: &mut O,
    total_coeff: u8,
    max_num_coeff: usize,
) -> Result<u32> {
    let tables = match max_num_coeff {
        4 => TOTAL_ZEROS_CHROMA_DC_2X2,
        8 => TOTAL_ZEROS_CHROMA_DC_2X4,
        _ => TOTAL_ZEROS_4X4,
    };

    let table = tables
        .get(total_coeff as usize)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| H264Error::io(format!("no total_zeros table for {}", total_coeff)))?;

    Ok(read_vlc(ops, table)?.value as u32)
}

/// Reads `run_before` with `zeros_left` zeros still to place, 9.2.3.
pub(crate) fn read_run_before<O: SyntaxOps>(ops: &mut O, zeros_left: u32) -> Result<u32> {
    if zeros_left == 0 {
        return Ok(0);
    }

    let table = RUN_BEFORE[zeros_left.min(7) as usize];
    Ok(read_vlc(ops, table)?.value as u32)
}

/// Maps the codeNum of `coded_block_pattern`, table 9-4. `intra` selects the
/// column of the Intra_4x4 and Intra_8x8 prediction modes.
pub(crate) fn map_coded_block_pattern(
    code_num: u32,
    chroma_array_type: u8,
    intra: bool,
) -> Result<u8> {
    let col = if intra { 0 } else { 1 };
    let row = match chroma_array_type {
        1 | 2 => CBP_CHROMA.get(code_num as usize),
        _ => CBP_MONO.get(code_num as usize),
    };

    row.map(|r| r[col])
        .ok_or_else(|| H264Error::io(format!("invalid coded_block_pattern {}", code_num)))
}

/// 0 <= nC < 2
const COEFF_TOKEN_NC0: &[VlcEntry] = &[
    VlcEntry::new(1, 0b1, 0, 0),
    VlcEntry::new(6, 0b000101, 0, 1),
    VlcEntry::new(2, 0b01, 1, 1),
    VlcEntry::new(8, 0b00000111, 0, 2),
    VlcEntry::new(6, 0b000100, 1, 2),
    VlcEntry::new(3, 0b001, 2, 2),
    VlcEntry::new(9, 0b000000111, 0, 3),
    VlcEntry::new(8, 0b00000110, 1, 3),
    VlcEntry::new(7, 0b0000101, 2, 3),
    VlcEntry::new(5, 0b00011, 3, 3),
    VlcEntry::new(10, 0b0000000111, 0, 4),
    VlcEntry::new(9, 0b000000110, 1, 4),
    VlcEntry::new(8, 0b00000101, 2, 4),
    VlcEntry::new(6, 0b000011, 3, 4),
    VlcEntry::new(11, 0b00000000111, 0, 5),
    VlcEntry::new(10, 0b0000000110, 1, 5),
    VlcEntry::new(9, 0b000000101, 2, 5),
    VlcEntry::new(7, 0b0000100, 3, 5),
    VlcEntry::new(13, 0b0000000001111, 0, 6),
    VlcEntry::new(11, 0b00000000110, 1, 6),
    VlcEntry::new(10, 0b0000000101, 2, 6),
    VlcEntry::new(8, 0b00000100, 3, 6),
    VlcEntry::new(13, 0b0000000001011, 0, 7),
    VlcEntry::new(13, 0b0000000001110, 1, 7),
    VlcEntry::new(11, 0b00000000101, 2, 7),
    VlcEntry::new(9, 0b000000100, 3, 7),
    VlcEntry::new(13, 0b0000000001000, 0, 8),
    VlcEntry::new(13, 0b0000000001010, 1, 8),
    VlcEntry::new(13, 0b0000000001101, 2, 8),
    VlcEntry::new(10, 0b0000000100, 3, 8),
    VlcEntry::new(14, 0b00000000001111, 0, 9),
    VlcEntry::new(14, 0b00000000001110, 1, 9),
    VlcEntry::new(13, 0b0000000001001, 2, 9),
    VlcEntry::new(11, 0b00000000100, 3, 9),
    VlcEntry::new(14, 0b00000000001011, 0, 10),
    VlcEntry::new(14, 0b00000000001010, 1, 10),
    VlcEntry::new(14, 0b00000000001101, 2, 10),
    VlcEntry::new(13, 0b0000000001100, 3, 10),
    VlcEntry::new(15, 0b000000000001111, 0, 11),
    VlcEntry::new(15, 0b000000000001110, 1, 11),
    VlcEntry::new(14, 0b00000000001001, 2, 11),
    VlcEntry::new(14, 0b00000000001100, 3, 11),
    VlcEntry::new(15, 0b000000000001011, 0, 12),
    VlcEntry::new(15, 0b000000000001010, 1, 12),
    VlcEntry::new(15, 0b000000000001101, 2, 12),
    VlcEntry::new(14, 0b00000000001000, 3, 12),
    VlcEntry::new(16, 0b0000000000001111, 0, 13),
    VlcEntry::new(15, 0b000000000000001, 1, 13),
    VlcEntry::new(15, 0b000000000001001, 2, 13),
    VlcEntry::new(15, 0b000000000001100, 3, 13),
    VlcEntry::new(16, 0b0000000000001011, 0, 14),
    VlcEntry::new(16, 0b0000000000001110, 1, 14),
    VlcEntry::new(16, 0b0000000000001101, 2, 14),
    VlcEntry::new(15, 0b000000000001000, 3, 14),
    VlcEntry::new(16, 0b0000000000000111, 0, 15),
    VlcEntry::new(16, 0b0000000000001010, 1, 15),
    VlcEntry::new(16, 0b0000000000001001, 2, 15),
    VlcEntry::new(16, 0b0000000000001100, 3, 15),
    VlcEntry::new(16, 0b0000000000000100, 0, 16),
    VlcEntry::new(16, 0b0000000000000110, 1, 16),
    VlcEntry::new(16, 0b0000000000000101, 2, 16),
    VlcEntry::new(16, 0b0000000000001000, 3, 16),
];

/// 2 <= nC < 4
const COEFF_TOKEN_NC2: &[VlcEntry] = &[
    VlcEntry::new(2, 0b11, 0, 0),
    VlcEntry::new(6, 0b001011, 0, 1),
    VlcEntry::new(2, 0b10, 1, 1),
    VlcEntry::new(6, 0b000111, 0, 2),
    VlcEntry::new(5, 0b00111, 1, 2),
    VlcEntry::new(3, 0b011, 2, 2),
    VlcEntry::new(7, 0b0000111, 0, 3),
    VlcEntry::new(6, 0b001010, 1, 3),
    VlcEntry::new(6, 0b001001, 2, 3),
    VlcEntry::new(4, 0b0101, 3, 3),
    VlcEntry::new(8, 0b00000111, 0, 4),
    VlcEntry::new(6, 0b000110, 1, 4),
    VlcEntry::new(6, 0b000101, 2, 4),
    VlcEntry::new(4, 0b0100, 3, 4),
    VlcEntry::new(8, 0b00000100, 0, 5),
    VlcEntry::new(7, 0b0000110, 1, 5),
    VlcEntry::new(7, 0b0000101, 2, 5),
    VlcEntry::new(5, 0b00110, 3, 5),
    VlcEntry::new(9, 0b000000111, 0, 6),
    VlcEntry::new(8, 0b00000110, 1, 6),
    VlcEntry::new(8, 0b00000101, 2, 6),
    VlcEntry::new(6, 0b001000, 3, 6),
    VlcEntry::new(11, 0b00000001111, 0, 7),
    VlcEntry::new(9, 0b000000110, 1, 7),
    VlcEntry::new(9, 0b000000101, 2, 7),
    VlcEntry::new(6, 0b000100, 3, 7),
    VlcEntry::new(11, 0b00000001011, 0, 8),
    VlcEntry::new(11, 0b00000001110, 1, 8),
    VlcEntry::new(11, 0b00000001101, 2, 8),
    VlcEntry::new(7, 0b0000100, 3, 8),
    VlcEntry::new(12, 0b000000001111, 0, 9),
    VlcEntry::new(11, 0b00000001010, 1, 9),
    VlcEntry::new(11, 0b00000001001, 2, 9),
    VlcEntry::new(9, 0b000000100, 3, 9),
    VlcEntry::new(12, 0b000000001011, 0, 10),
    VlcEntry::new(12, 0b000000001110, 1, 10),
    VlcEntry::new(12, 0b000000001101, 2, 10),
    VlcEntry::new(11, 0b00000001100, 3, 10),
    VlcEntry::new(12, 0b000000001000, 0, 11),
    VlcEntry::new(12, 0b000000001010, 1, 11),
    VlcEntry::new(12, 0b000000001001, 2, 11),
    VlcEntry::new(11, 0b00000001000, 3, 11),
    VlcEntry::new(13, 0b0000000001111, 0, 12),
    VlcEntry::new(13, 0b0000000001110, 1, 12),
    VlcEntry::new(13, 0b0000000001101, 2, 12),
    VlcEntry::new(12, 0b000000001100, 3, 12),
    VlcEntry::new(13, 0b0000000001011, 0, 13),
    VlcEntry::new(13, 0b0000000001010, 1, 13),
    VlcEntry::new(13, 0b0000000001001, 2, 13),
    VlcEntry::new(13, 0b0000000001100, 3, 13),
    VlcEntry::new(13, 0b0000000000111, 0, 14),
    VlcEntry::new(14, 0b00000000001011, 1, 14),
    VlcEntry::new(13, 0b0000000000110, 2, 14),
    VlcEntry::new(13, 0b0000000001000, 3, 14),
    VlcEntry::new(14, 0b00000000001001, 0, 15),
    VlcEntry::new(14, 0b00000000001000, 1, 15),
    VlcEntry::new(14, 0b00000000001010, 2, 15),
    VlcEntry::new(13, 0b0000000000001, 3, 15),
    VlcEntry::new(14, 0b00000000000111, 0, 16),
    VlcEntry::new(14, 0b00000000000110, 1, 16),
    VlcEntry::new(14, 0b00000000000101, 2, 16),
    VlcEntry::new(14, 0b00000000000100, 3, 16),
];

/// 4 <= nC < 8
const COEFF_TOKEN_NC4: &[VlcEntry] = &[
    VlcEntry::new(4, 0b1111, 0, 0),
    VlcEntry::new(6, 0b001111, 0, 1),
    VlcEntry::new(4, 0b1110, 1, 1),
    VlcEntry::new(6, 0b001011, 0, 2),
    VlcEntry::new(5, 0b01111, 1, 2),
    VlcEntry::new(4, 0b1101, 2, 2),
    VlcEntry::new(6, 0b001000, 0, 3),
    VlcEntry::new(5, 0b01100, 1, 3),
    VlcEntry::new(5, 0b01110, 2, 3),
    VlcEntry::new(4, 0b1100, 3, 3),
    VlcEntry::new(7, 0b0001111, 0, 4),
    VlcEntry::new(5, 0b01010, 1, 4),
    VlcEntry::new(5, 0b01011, 2, 4),
    VlcEntry::new(4, 0b1011, 3, 4),
    VlcEntry::new(7, 0b0001011, 0, 5),
    VlcEntry::new(5, 0b01000, 1, 5),
    VlcEntry::new(5, 0b01001, 2, 5),
    VlcEntry::new(4, 0b1010, 3, 5),
    VlcEntry::new(7, 0b0001001, 0, 6),
    VlcEntry::new(6, 0b001110, 1, 6),
    VlcEntry::new(6, 0b001101, 2, 6),
    VlcEntry::new(4, 0b1001, 3, 6),
    VlcEntry::new(7, 0b0001000, 0, 7),
    VlcEntry::new(6, 0b001010, 1, 7),
    VlcEntry::new(6, 0b001001, 2, 7),
    VlcEntry::new(4, 0b1000, 3, 7),
    VlcEntry::new(8, 0b00001111, 0, 8),
    VlcEntry::new(7, 0b0001110, 1, 8),
    VlcEntry::new(7, 0b0001101, 2, 8),
    VlcEntry::new(5, 0b01101, 3, 8),
    VlcEntry::new(8, 0b00001011, 0, 9),
    VlcEntry::new(8, 0b00001110, 1, 9),
    VlcEntry::new(7, 0b0001010, 2, 9),
    VlcEntry::new(6, 0b001100, 3, 9),
    VlcEntry::new(9, 0b000001111, 0, 10),
    VlcEntry::new(8, 0b00001010, 1, 10),
    VlcEntry::new(8, 0b00001101, 2, 10),
    VlcEntry::new(7, 0b0001100, 3, 10),
    VlcEntry::new(9, 0b000001011, 0, 11),
    VlcEntry::new(9, 0b000001110, 1, 11),
    VlcEntry::new(8, 0b00001001, 2, 11),
    VlcEntry::new(8, 0b00001100, 3, 11),
    VlcEntry::new(9, 0b000001000, 0, 12),
    VlcEntry::new(9, 0b000001010, 1, 12),
    VlcEntry::new(9, 0b000001101, 2, 12),
    VlcEntry::new(8, 0b00001000, 3, 12),
    VlcEntry::new(10, 0b0000001101, 0, 13),
    VlcEntry::new(9, 0b000000111, 1, 13),
    VlcEntry::new(9, 0b000001001, 2, 13),
    VlcEntry::new(9, 0b000001100, 3, 13),
    VlcEntry::new(10, 0b0000001001, 0, 14),
    VlcEntry::new(10, 0b0000001100, 1, 14),
    VlcEntry::new(10, 0b0000001011, 2, 14),
    VlcEntry::new(10, 0b0000001010, 3, 14),
    VlcEntry::new(10, 0b0000000101, 0, 15),
    VlcEntry::new(10, 0b0000001000, 1, 15),
    VlcEntry::new(10, 0b0000000111, 2, 15),
    VlcEntry::new(10, 0b0000000110, 3, 15),
    VlcEntry::new(10, 0b0000000001, 0, 16),
    VlcEntry::new(10, 0b0000000100, 1, 16),
    VlcEntry::new(10, 0b0000000011, 2, 16),
    VlcEntry::new(10, 0b0000000010, 3, 16),
];

/// nC == -1
const COEFF_TOKEN_CHROMA_DC_420: &[VlcEntry] = &[
    VlcEntry::new(2, 0b01, 0, 0),
    VlcEntry::new(6, 0b000111, 0, 1),
    VlcEntry::new(1, 0b1, 1, 1),
    VlcEntry::new(6, 0b000100, 0, 2),
    VlcEntry::new(6, 0b000110, 1, 2),
    VlcEntry::new(3, 0b001, 2, 2),
    VlcEntry::new(6, 0b000011, 0, 3),
    VlcEntry::new(7, 0b0000011, 1, 3),
    VlcEntry::new(7, 0b0000010, 2, 3),
    VlcEntry::new(6, 0b000101, 3, 3),
    VlcEntry::new(6, 0b000010, 0, 4),
    VlcEntry::new(8, 0b00000011, 1, 4),
    VlcEntry::new(8, 0b00000010, 2, 4),
    VlcEntry::new(7, 0b0000000, 3, 4),
];

/// nC == -2
const COEFF_TOKEN_CHROMA_DC_422: &[VlcEntry] = &[
    VlcEntry::new(1, 0b1, 0, 0),
    VlcEntry::new(7, 0b0001111, 0, 1),
    VlcEntry::new(2, 0b01, 1, 1),
    VlcEntry::new(7, 0b0001110, 0, 2),
    VlcEntry::new(7, 0b0001101, 1, 2),
    VlcEntry::new(3, 0b001, 2, 2),
    VlcEntry::new(9, 0b000000111, 0, 3),
    VlcEntry::new(7, 0b0001100, 1, 3),
    VlcEntry::new(7, 0b0001011, 2, 3),
    VlcEntry::new(5, 0b00001, 3, 3),
    VlcEntry::new(9, 0b000000110, 0, 4),
    VlcEntry::new(9, 0b000000101, 1, 4),
    VlcEntry::new(7, 0b0001010, 2, 4),
    VlcEntry::new(6, 0b000001, 3, 4),
    VlcEntry::new(10, 0b0000000111, 0, 5),
    VlcEntry::new(10, 0b0000000110, 1, 5),
    VlcEntry::new(9, 0b000000100, 2, 5),
    VlcEntry::new(7, 0b0001001, 3, 5),
    VlcEntry::new(11, 0b00000000111, 0, 6),
    VlcEntry::new(11, 0b00000000110, 1, 6),
    VlcEntry::new(10, 0b0000000101, 2, 6),
    VlcEntry::new(7, 0b0001000, 3, 6),
    VlcEntry::new(12, 0b000000000111, 0, 7),
    VlcEntry::new(12, 0b000000000110, 1, 7),
    VlcEntry::new(11, 0b00000000101, 2, 7),
    VlcEntry::new(10, 0b0000000100, 3, 7),
    VlcEntry::new(13, 0b0000000000111, 0, 8),
    VlcEntry::new(12, 0b000000000101, 1, 8),
    VlcEntry::new(12, 0b000000000100, 2, 8),
    VlcEntry::new(11, 0b00000000100, 3, 8),
];

/// total_zeros for 4x4 blocks, indexed by tzVlcIndex
const TOTAL_ZEROS_4X4: &[&[VlcEntry]] = &[
    &[],
    &[
        VlcEntry::new(1, 0b1, 0, 0),
        VlcEntry::new(3, 0b011, 0, 1),
        VlcEntry::new(3, 0b010, 0, 2),
        VlcEntry::new(4, 0b0011, 0, 3),
        VlcEntry::new(4, 0b0010, 0, 4),
        VlcEntry::new(5, 0b00011, 0, 5),
        VlcEntry::new(5, 0b00010, 0, 6),
        VlcEntry::new(6, 0b000011, 0, 7),
        VlcEntry::new(6, 0b000010, 0, 8),
        VlcEntry::new(7, 0b0000011, 0, 9),
        VlcEntry::new(7, 0b0000010, 0, 10),
        VlcEntry::new(8, 0b00000011, 0, 11),
        VlcEntry::new(8, 0b00000010, 0, 12),
        VlcEntry::new(9, 0b000000011, 0, 13),
        VlcEntry::new(9, 0b000000010, 0, 14),
        VlcEntry::new(9, 0b000000001, 0, 15),
    ],
    &[
        VlcEntry::new(3, 0b111, 0, 0),
        VlcEntry::new(3, 0b110, 0, 1),
        VlcEntry::new(3, 0b101, 0, 2),
        VlcEntry::new(3, 0b100, 0, 3),
        VlcEntry::new(3, 0b011, 0, 4),
        VlcEntry::new(4, 0b0101, 0, 5),
        VlcEntry::new(4, 0b0100, 0, 6),
        VlcEntry::new(4, 0b0011, 0, 7),
        VlcEntry::new(4, 0b0010, 0, 8),
        VlcEntry::new(5, 0b00011, 0, 9),
        VlcEntry::new(5, 0b00010, 0, 10),
        VlcEntry::new(6, 0b000011, 0, 11),
        VlcEntry::new(6, 0b000010, 0, 12),
        VlcEntry::new(6, 0b000001, 0, 13),
        VlcEntry::new(6, 0b000000, 0, 14),
    ],
    &[
        VlcEntry::new(4, 0b0101, 0, 0),
        VlcEntry::new(3, 0b111, 0, 1),
        VlcEntry::new(3, 0b110, 0, 2),
        VlcEntry::new(3, 0b101, 0, 3),
        VlcEntry::new(4, 0b0100, 0, 4),
        VlcEntry::new(4, 0b0011, 0, 5),
        VlcEntry::new(3, 0b100, 0, 6),
        VlcEntry::new(3, 0b011, 0, 7),
        VlcEntry::new(4, 0b0010, 0, 8),
        VlcEntry::new(5, 0b00011, 0, 9),
        VlcEntry::new(5, 0b00010, 0, 10),
        VlcEntry::new(6, 0b000001, 0, 11),
        VlcEntry::new(5, 0b00001, 0, 12),
        VlcEntry::new(6, 0b000000, 0, 13),
    ],
    &[
        VlcEntry::new(5, 0b00011, 0, 0),
        VlcEntry::new(3, 0b111, 0, 1),
        VlcEntry::new(4, 0b0101, 0, 2),
        VlcEntry::new(4, 0b0100, 0, 3),
        VlcEntry::new(3, 0b110, 0, 4),
        VlcEntry::new(3, 0b101, 0, 5),
        VlcEntry::new(3, 0b100, 0, 6),
        VlcEntry::new(4, 0b0011, 0, 7),
        VlcEntry::new(3, 0b011, 0, 8),
        VlcEntry::new(4, 0b0010, 0, 9),
        VlcEntry::new(5, 0b00010, 0, 10),
        VlcEntry::new(5, 0b00001, 0, 11),
        VlcEntry::new(5, 0b00000, 0, 12),
    ],
    &[
        VlcEntry::new(4, 0b0101, 0, 0),
        VlcEntry::new(4, 0b0100, 0, 1),
        VlcEntry::new(4, 0b0011, 0, 2),
        VlcEntry::new(3, 0b111, 0, 3),
        VlcEntry::new(3, 0b110, 0, 4),
        VlcEntry::new(3, 0b101, 0, 5),
        VlcEntry::new(3, 0b100, 0, 6),
        VlcEntry::new(3, 0b011, 0, 7),
        VlcEntry::new(4, 0b0010, 0, 8),
        VlcEntry::new(5, 0b00001, 0, 9),
        VlcEntry::new(4, 0b0001, 0, 10),
        VlcEntry::new(5, 0b00000, 0, 11),
    ],
    &[
        VlcEntry::new(6, 0b000001, 0, 0),
        VlcEntry::new(5, 0b00001, 0, 1),
        VlcEntry::new(3, 0b111, 0, 2),
        VlcEntry::new(3, 0b110, 0, 3),
        VlcEntry::new(3, 0b101, 0, 4),
        VlcEntry::new(3, 0b100, 0, 5),
        VlcEntry::new(3, 0b011, 0, 6),
        VlcEntry::new(3, 0b010, 0, 7),
        VlcEntry::new(4, 0b0001, 0, 8),
        VlcEntry::new(3, 0b001, 0, 9),
        VlcEntry::new(6, 0b000000, 0, 10),
    ],
    &[
        VlcEntry::new(6, 0b000001, 0, 0),
        VlcEntry::new(5, 0b00001, 0, 1),
        VlcEntry::new(3, 0b101, 0, 2),
        VlcEntry::new(3, 0b100, 0, 3),
        VlcEntry::new(3, 0b011, 0, 4),
        VlcEntry::new(2, 0b11, 0, 5),
        VlcEntry::new(3, 0b010, 0, 6),
        VlcEntry::new(4, 0b0001, 0, 7),
        VlcEntry::new(3, 0b001, 0, 8),
        VlcEntry::new(6, 0b000000, 0, 9),
    ],
    &[
        VlcEntry::new(6, 0b000001, 0, 0),
        VlcEntry::new(4, 0b0001, 0, 1),
        VlcEntry::new(5, 0b00001, 0, 2),
        VlcEntry::new(3, 0b011, 0, 3),
        VlcEntry::new(2, 0b11, 0, 4),
        VlcEntry::new(2, 0b10, 0, 5),
        VlcEntry::new(3, 0b010, 0, 6),
        VlcEntry::new(3, 0b001, 0, 7),
        VlcEntry::new(6, 0b000000, 0, 8),
    ],
    &[
        VlcEntry::new(6, 0b000001, 0, 0),
        VlcEntry::new(6, 0b000000, 0, 1),
        VlcEntry::new(4, 0b0001, 0, 2),
        VlcEntry::new(2, 0b11, 0, 3),
        VlcEntry::new(2, 0b10, 0, 4),
        VlcEntry::new(3, 0b001, 0, 5),
        VlcEntry::new(2, 0b01, 0, 6),
        VlcEntry::new(5, 0b00001, 0, 7),
    ],
    &[
        VlcEntry::new(5, 0b00001, 0, 0),
        VlcEntry::new(5, 0b00000, 0, 1),
        VlcEntry::new(3, 0b001, 0, 2),
        VlcEntry::new(2, 0b11, 0, 3),
        VlcEntry::new(2, 0b10, 0, 4),
        VlcEntry::new(2, 0b01, 0, 5),
        VlcEntry::new(4, 0b0001, 0, 6),
    ],
    &[
        VlcEntry::new(4, 0b0000, 0, 0),
        VlcEntry::new(4, 0b0001, 0, 1),
        VlcEntry::new(3, 0b001, 0, 2),
        VlcEntry::new(3, 0b010, 0, 3),
        VlcEntry::new(1, 0b1, 0, 4),
        VlcEntry::new(3, 0b011, 0, 5),
    ],
    &[
        VlcEntry::new(4, 0b0000, 0, 0),
        VlcEntry::new(4, 0b0001, 0, 1),
        VlcEntry::new(2, 0b01, 0, 2),
        VlcEntry::new(1, 0b1, 0, 3),
        VlcEntry::new(3, 0b001, 0, 4),
    ],
    &[
        VlcEntry::new(3, 0b000, 0, 0),
        VlcEntry::new(3, 0b001, 0, 1),
        VlcEntry::new(1, 0b1, 0, 2),
        VlcEntry::new(2, 0b01, 0, 3),
    ],
    &[
        VlcEntry::new(2, 0b00, 0, 0),
        VlcEntry::new(2, 0b01, 0, 1),
        VlcEntry::new(1, 0b1, 0, 2),
    ],
    &[
        VlcEntry::new(1, 0b0, 0, 0),
        VlcEntry::new(1, 0b1, 0, 1),
    ],
];

/// total_zeros for 4:2:0 chroma DC, indexed by tzVlcIndex
const TOTAL_ZEROS_CHROMA_DC_2X2: &[&[VlcEntry]] = &[
    &[],
    &[
        VlcEntry::new(1, 0b1, 0, 0),
        VlcEntry::new(2, 0b01, 0, 1),
        VlcEntry::new(3, 0b001, 0, 2),
        VlcEntry::new(3, 0b000, 0, 3),
    ],
    &[
        VlcEntry::new(1, 0b1, 0, 0),
        VlcEntry::new(2, 0b01, 0, 1),
        VlcEntry::new(2, 0b00, 0, 2),
    ],
    &[
        VlcEntry::new(1, 0b1, 0, 0),
        VlcEntry::new(1, 0b0, 0, 1),
    ],
];

/// total_zeros for 4:2:2 chroma DC, indexed by tzVlcIndex
const TOTAL_ZEROS_CHROMA_DC_2X4: &[&[VlcEntry]] = &[
    &[],
    &[
        VlcEntry::new(1, 0b1, 0, 0),
        VlcEntry::new(3, 0b010, 0, 1),
        VlcEntry::new(3, 0b011, 0, 2),
        VlcEntry::new(4, 0b0010, 0, 3),
        VlcEntry::new(4, 0b0011, 0, 4),
        VlcEntry::new(4, 0b0001, 0, 5),
        VlcEntry::new(5, 0b00001, 0, 6),
        VlcEntry::new(5, 0b00000, 0, 7),
    ],
    &[
        VlcEntry::new(3, 0b000, 0, 0),
        VlcEntry::new(2, 0b01, 0, 1),
        VlcEntry::new(3, 0b001, 0, 2),
        VlcEntry::new(3, 0b100, 0, 3),
        VlcEntry::new(3, 0b101, 0, 4),
        VlcEntry::new(3, 0b110, 0, 5),
        VlcEntry::new(3, 0b111, 0, 6),
    ],
    &[
        VlcEntry::new(3, 0b000, 0, 0),
        VlcEntry::new(3, 0b001, 0, 1),
        VlcEntry::new(2, 0b01, 0, 2),
        VlcEntry::new(2, 0b10, 0, 3),
        VlcEntry::new(3, 0b110, 0, 4),
        VlcEntry::new(3, 0b111, 0, 5),
    ],
    &[
        VlcEntry::new(3, 0b110, 0, 0),
        VlcEntry::new(2, 0b00, 0, 1),
        VlcEntry::new(2, 0b01, 0, 2),
        VlcEntry::new(2, 0b10, 0, 3),
        VlcEntry::new(3, 0b111, 0, 4),
    ],
    &[
        VlcEntry::new(2, 0b00, 0, 0),
        VlcEntry::new(2, 0b01, 0, 1),
        VlcEntry::new(2, 0b10, 0, 2),
        VlcEntry::new(2, 0b11, 0, 3),
    ],
    &[
        VlcEntry::new(2, 0b00, 0, 0),
        VlcEntry::new(2, 0b01, 0, 1),
        VlcEntry::new(1, 0b1, 0, 2),
    ],
    &[
        VlcEntry::new(1, 0b0, 0, 0),
        VlcEntry::new(1, 0b1, 0, 1),
    ],
];

/// run_before, indexed by min(zerosLeft, 7)
const RUN_BEFORE: &[&[VlcEntry]] = &[
    &[],
    &[
        VlcEntry::new(1, 0b1, 0, 0),
        VlcEntry::new(1, 0b0, 0, 1),
    ],
    &[
        VlcEntry::new(1, 0b1, 0, 0),
        VlcEntry::new(2, 0b01, 0, 1),
        VlcEntry::new(2, 0b00, 0, 2),
    ],
    &[
        VlcEntry::new(2, 0b11, 0, 0),
        VlcEntry::new(2, 0b10, 0, 1),
        VlcEntry::new(2, 0b01, 0, 2),
        VlcEntry::new(2, 0b00, 0, 3),
    ],
    &[
        VlcEntry::new(2, 0b11, 0, 0),
        VlcEntry::new(2, 0b10, 0, 1),
        VlcEntry::new(2, 0b01, 0, 2),
        VlcEntry::new(3, 0b001, 0, 3),
        VlcEntry::new(3, 0b000, 0, 4),
    ],
    &[
        VlcEntry::new(2, 0b11, 0, 0),
        VlcEntry::new(2, 0b10, 0, 1),
        VlcEntry::new(3, 0b011, 0, 2),
        VlcEntry::new(3, 0b010, 0, 3),
        VlcEntry::new(3, 0b001, 0, 4),
        VlcEntry::new(3, 0b000, 0, 5),
    ],
    &[
        VlcEntry::new(2, 0b11, 0, 0),
        VlcEntry::new(3, 0b000, 0, 1),
        VlcEntry::new(3, 0b001, 0, 2),
        VlcEntry::new(3, 0b011, 0, 3),
        VlcEntry::new(3, 0b010, 0, 4),
        VlcEntry::new(3, 0b101, 0, 5),
        VlcEntry::new(3, 0b100, 0, 6),
    ],
    &[
        VlcEntry::new(3, 0b111, 0, 0),
        VlcEntry::new(3, 0b110, 0, 1),
        VlcEntry::new(3, 0b101, 0, 2),
        VlcEntry::new(3, 0b100, 0, 3),
        VlcEntry::new(3, 0b011, 0, 4),
        VlcEntry::new(3, 0b010, 0, 5),
        VlcEntry::new(3, 0b001, 0, 6),
        VlcEntry::new(4, 0b0001, 0, 7),
        VlcEntry::new(5, 0b00001, 0, 8),
        VlcEntry::new(6, 0b000001, 0, 9),
        VlcEntry::new(7, 0b0000001, 0, 10),
        VlcEntry::new(8, 0b00000001, 0, 11),
        VlcEntry::new(9, 0b000000001, 0, 12),
        VlcEntry::new(10, 0b0000000001, 0, 13),
        VlcEntry::new(11, 0b00000000001, 0, 14),
    ],
];

/// nC >= 8, 6-bit fixed length code. `None` marks invalid codes.
const COEFF_TOKEN_FLC: [Option<(u8, u8)>; 64] = [
    Some((0, 1)),
    Some((1, 1)),
    None,
    Some((0, 0)),
    Some((0, 2)),
    Some((1, 2)),
    Some((2, 2)),
    None,
    Some((0, 3)),
    Some((1, 3)),
    Some((2, 3)),
    Some((3, 3)),
    Some((0, 4)),
    Some((1, 4)),
    Some((2, 4)),
    Some((3, 4)),
    Some((0, 5)),
    Some((1, 5)),
    Some((2, 5)),
    Some((3, 5)),
    Some((0, 6)),
    Some((1, 6)),
    Some((2, 6)),
    Some((3, 6)),
    Some((0, 7)),
    Some((1, 7)),
    Some((2, 7)),
    Some((3, 7)),
    Some((0, 8)),
    Some((1, 8)),
    Some((2, 8)),
    Some((3, 8)),
    Some((0, 9)),
    Some((1, 9)),
    Some((2, 9)),
    Some((3, 9)),
    Some((0, 10)),
    Some((1, 10)),
    Some((2, 10)),
    Some((3, 10)),
    Some((0, 11)),
    Some((1, 11)),
    Some((2, 11)),
    Some((3, 11)),
    Some((0, 12)),
    Some((1, 12)),
    Some((2, 12)),
    Some((3, 12)),
    Some((0, 13)),
    Some((1, 13)),
    Some((2, 13)),
    Some((3, 13)),
    Some((0, 14)),
    Some((1, 14)),
    Some((2, 14)),
    Some((3, 14)),
    Some((0, 15)),
    Some((1, 15)),
    Some((2, 15)),
    Some((3, 15)),
    Some((0, 16)),
    Some((1, 16)),
    Some((2, 16)),
    Some((3, 16)),
];

/// codeNum to coded_block_pattern for ChromaArrayType 1 and 2, as (intra, inter)
const CBP_CHROMA: [[u8; 2]; 48] = [
    [47, 0], [31, 16], [15, 1], [0, 2], [23, 4], [27, 8],
    [29, 32], [30, 3], [7, 5], [11, 10], [13, 12], [14, 15],
    [39, 47], [43, 7], [45, 11], [46, 13], [16, 14], [3, 6],
    [5, 9], [10, 31], [12, 35], [19, 37], [21, 42], [26, 44],
    [28, 33], [35, 34], [37, 36], [42, 40], [44, 39], [1, 43],
    [2, 45], [4, 46], [8, 17], [17, 18], [18, 20], [20, 24],
    [24, 19], [6, 21], [9, 26], [22, 28], [25, 23], [32, 27],
    [33, 29], [34, 30], [36, 22], [40, 25], [38, 38], [41, 41],
];

/// codeNum to coded_block_pattern for ChromaArrayType 0 and 3, as (intra, inter)
const CBP_MONO: [[u8; 2]; 16] = [
    [15, 0], [0, 1], [7, 2], [11, 4], [13, 8], [14, 3],
    [3, 5], [5, 10], [10, 12], [12, 15], [1, 7], [2, 11],
    [4, 13], [8, 14], [6, 6], [9, 9],
];

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::h264::nalu_reader::NaluReader;
    use crate::codec::h264::nalu_writer::NaluWriter;
    use crate::codec::h264::syntax::ReadOps;

    fn pack(bits: &[(u32, u32)]) -> Vec<u8> {
        let mut w = NaluWriter::new(false);
        for &(value, len) in bits {
            w.write_bits(value, len).unwrap();
        }
        w.write_rbsp_trailing_bits().unwrap();
        w.into_vec().unwrap()
    }

    /// No two codes of a table may be prefixes of each other.
    fn assert_prefix_free(table: &[VlcEntry]) {
        for (i, a) in table.iter().enumerate() {
            for b in &table[i + 1..] {
                let len = a.len.min(b.len);
                assert_ne!(
                    a.code >> (a.len - len),
                    b.code >> (b.len - len),
                    "{:?} and {:?}",
                    a,
                    b
                );
            }
        }
    }

    #[test]
    fn tables_are_prefix_free() {
        for table in [
            COEFF_TOKEN_NC0,
            COEFF_TOKEN_NC2,
            COEFF_TOKEN_NC4,
            COEFF_TOKEN_CHROMA_DC_420,
            COEFF_TOKEN_CHROMA_DC_422,
        ] {
            assert_prefix_free(table);
        }

        for tables in [
            TOTAL_ZEROS_4X4,
            TOTAL_ZEROS_CHROMA_DC_2X2,
            TOTAL_ZEROS_CHROMA_DC_2X4,
            RUN_BEFORE,
        ] {
            for table in tables {
                assert_prefix_free(table);
            }
        }
    }

    #[test]
    fn coeff_token() {
        // nC 0: "1" is TotalCoeff 0, "01" is 1 trailing one.
        let data = pack(&[(0b1, 1), (0b01, 2), (0b000101, 6)]);
        let mut ops = ReadOps::new(NaluReader::new(&data, false));
        assert_eq!(read_coeff_token(&mut ops, 0).unwrap(), (0, 0));
        assert_eq!(read_coeff_token(&mut ops, 1).unwrap(), (1, 1));
        assert_eq!(read_coeff_token(&mut ops, 0).unwrap(), (0, 1));

        // Fixed length: TotalCoeff 2 with 2 trailing ones, then TotalCoeff 0.
        let data = pack(&[(0b000110, 6), (0b000011, 6), (0b000010, 6)]);
        let mut ops = ReadOps::new(NaluReader::new(&data, false));
        assert_eq!(read_coeff_token(&mut ops, 8).unwrap(), (2, 2));
        assert_eq!(read_coeff_token(&mut ops, 16).unwrap(), (0, 0));
        assert!(read_coeff_token(&mut ops, 8).is_err());
    }

    #[test]
    fn chroma_dc_coeff_token() {
        // 4:2:0 DC: "01" is TotalCoeff 0, "1" is one trailing one.
        let data = pack(&[(0b01, 2), (0b1, 1)]);
        let mut ops = ReadOps::new(NaluReader::new(&data, false));
        assert_eq!(read_coeff_token(&mut ops, -1).unwrap(), (0, 0));
        assert_eq!(read_coeff_token(&mut ops, -1).unwrap(), (1, 1));
    }

    #[test]
    fn zeros_and_runs() {
        // total_zeros with TotalCoeff 1: "1" is 0, "011" is 1.
        let data = pack(&[(0b1, 1), (0b011, 3), (0b1, 1), (0b01, 2)]);
        let mut ops = ReadOps::new(NaluReader::new(&data, false));
        assert_eq!(read_total_zeros(&mut ops, 1, 16).unwrap(), 0);
        assert_eq!(read_total_zeros(&mut ops, 1, 16).unwrap(), 1);
        // run_before with one zero left: "1" is 0, "0" is 1.
        assert_eq!(read_run_before(&mut ops, 1).unwrap(), 0);
        assert_eq!(read_run_before(&mut ops, 1).unwrap(), 1);
        assert_eq!(read_run_before(&mut ops, 0).unwrap(), 0);
        assert!(read_total_zeros(&mut ops, 16, 16).is_err());
    }

    #[test]
    fn level_prefix() {
        let data = pack(&[(0b0001, 4), (0b1, 1)]);
        let mut ops = ReadOps::new(NaluReader::new(&data, false));
        assert_eq!(read_level_prefix(&mut ops).unwrap(), 3);
        assert_eq!(read_level_prefix(&mut ops).unwrap(), 0);

        let data = [0u8; 8];
        let mut ops = ReadOps::new(NaluReader::new(&data, false));
        assert!(read_level_prefix(&mut ops).is_err());
    }

    #[test]
    fn coded_block_pattern() {
        assert_eq!(map_coded_block_pattern(0, 1, true).unwrap(), 47);
        assert_eq!(map_coded_block_pattern(0, 1, false).unwrap(), 0);
        assert_eq!(map_coded_block_pattern(47, 2, false).unwrap(), 41);
        assert_eq!(map_coded_block_pattern(0, 0, true).unwrap(), 15);
        assert_eq!(map_coded_block_pattern(15, 3, false).unwrap(), 9);
        assert!(map_coded_block_pattern(16, 0, false).is_err());
        assert!(map_coded_block_pattern(48, 1, false).is_err());
    }
}
