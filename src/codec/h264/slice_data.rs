// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! `slice_data( )` of CAVLC slices: the macroblock layer, 7.3.4 and 7.3.5,
//! and the residual blocks of 7.3.5.3.
//!
//! The traversal only takes elements out of a bitstream, either to fill the
//! working macroblock of the [`Ctx`] or to dump them. Slices coded with CABAC
//! are left unparsed.

use log::debug;

use crate::codec::h264::cavlc::coeff_token_nc;
use crate::codec::h264::cavlc::map_coded_block_pattern;
use crate::codec::h264::cavlc::read_coeff_token;
use crate::codec::h264::cavlc::read_level_prefix;
use crate::codec::h264::cavlc::read_run_before;
use crate::codec::h264::cavlc::read_total_zeros;
use crate::codec::h264::ctx::Ctx;
use crate::codec::h264::error::H264Error;
use crate::codec::h264::error::Result;
use crate::codec::h264::macroblock::BlockKind;
use crate::codec::h264::macroblock::Component;
use crate::codec::h264::macroblock::Macroblock;
use crate::codec::h264::syntax::OpKind;
use crate::codec::h264::syntax::SyntaxOps;
use crate::codec::h264::types::MbType;
use crate::codec::h264::types::PredMode;
use crate::codec::h264::types::SubMbType;

/// Gets notified of the progress of a slice data traversal.
pub trait MacroblockObserver {
    fn slice_data_begin(&mut self, _ctx: &Ctx) {}
    /// Called once per macroblock, skipped ones included, after it has been
    /// parsed. The macroblock is [`Ctx::macroblock`].
    fn macroblock(&mut self, _ctx: &Ctx) {}
    fn slice_data_end(&mut self, _ctx: &Ctx, _mb_count: u32) {}
}

impl MacroblockObserver for () {}

fn check_mb_addr(mb_addr: u32, pic_size_in_mbs: u32) -> Result<()> {
    if mb_addr >= pic_size_in_mbs {
        return Err(H264Error::protocol(format!(
            "macroblock {} past the end of a {} macroblocks picture",
            mb_addr, pic_size_in_mbs
        )));
    }
    Ok(())
}

/// Parses the macroblocks of the current slice, whose header must have been
/// set in `ctx`. Returns the number of macroblocks, or 0 for a CABAC slice.
pub fn slice_data<O, M>(ops: &mut O, ctx: &mut Ctx, observer: &mut M) -> Result<u32>
where
    O: SyntaxOps,
    M: MacroblockObserver + ?Sized,
{
    let pps = ctx
        .pps()
        .cloned()
        .ok_or_else(|| H264Error::protocol("no active PPS"))?;
    if pps.entropy_coding_mode_flag {
        debug!("leaving CABAC slice data unparsed");
        return Ok(0);
    }
    if !ops.is_reading() {
        return Err(H264Error::unsupported("slice data can only be parsed"));
    }

    observer.slice_data_begin(ctx);
    ctx.clear_macroblocks();

    let slice_type = ctx.slice_header().kind();
    let mbaff = ctx.slice_derived().mbaff_frame_flag;
    let pic_size_in_mbs = ctx.slice_derived().pic_size_in_mbs;
    let mut mb_addr = ctx.slice_header().first_mb_in_slice * (1 + mbaff as u32);
    let mut mb_count = 0;

    ops.begin_array("mb");
    loop {
        let mut prev_mb_skipped = false;

        if !slice_type.is_intra() {
            let mut mb_skip_run = 0u32;
            ops.begin_item();
            ops.ue("mb_skip_run", &mut mb_skip_run)?;
            ops.end_item();

            prev_mb_skipped = mb_skip_run > 0;
            for _ in 0..mb_skip_run {
                check_mb_addr(mb_addr, pic_size_in_mbs)?;
                ctx.new_macroblock(mb_addr, true, None)?;
                ctx.commit_macroblock();
                observer.macroblock(ctx);
                mb_addr = ctx.next_mb_addr(mb_addr);
                mb_count += 1;
            }

            if prev_mb_skipped && !ops.more_rbsp_data(false) {
                break;
            }
        }

        check_mb_addr(mb_addr, pic_size_in_mbs)?;
        ops.begin_item();
        ops.field("mbAddr", mb_addr as i64);
        ops.field("MbaffFrameFlag", mbaff as i64);

        let mut field_flag = None;
        if mbaff && (mb_addr % 2 == 0 || prev_mb_skipped) {
            let mut flag = false;
            ops.flag("mb_field_decoding_flag", &mut flag)?;
            field_flag = Some(flag);
        }

        ctx.new_macroblock(mb_addr, false, field_flag)?;
        macroblock_layer(ops, ctx)?;
        ctx.commit_macroblock();
        ops.end_item();

        observer.macroblock(ctx);
        mb_count += 1;

        if !ops.more_rbsp_data(false) {
            break;
        }
        mb_addr = ctx.next_mb_addr(mb_addr);
    }
    ops.end_array();

    observer.slice_data_end(ctx, mb_count);
    Ok(mb_count)
}

/// 7.3.5 Macroblock layer.
fn macroblock_layer<O: SyntaxOps>(ops: &mut O, ctx: &mut Ctx) -> Result<()> {
    let slice_type = ctx.slice_header().kind();
    let sps = ctx
        .sps()
        .cloned()
        .ok_or_else(|| H264Error::protocol("no active SPS"))?;
    let pps = ctx
        .pps()
        .cloned()
        .ok_or_else(|| H264Error::protocol("no active PPS"))?;

    let mut raw_mb_type = 0u32;
    ops.ue("mb_type", &mut raw_mb_type)?;
    ctx.mb.set_mb_type(slice_type, raw_mb_type)?;

    let mb_type = ctx.mb.mb_type;
    if mb_type == MbType::I_PCM {
        return pcm_samples(ops, ctx);
    }

    let mut no_sub_mb_part_size_less_than_8x8 = true;
    if mb_type != MbType::I_NxN && !ctx.mb.is_intra_16x16() && ctx.mb.num_mb_part == 4 {
        no_sub_mb_part_size_less_than_8x8 =
            sub_mb_pred(ops, ctx, sps.direct_8x8_inference_flag)?;
    } else {
        if pps.transform_8x8_mode_flag && mb_type == MbType::I_NxN {
            ops.flag(
                "transform_size_8x8_flag",
                &mut ctx.mb.transform_size_8x8_flag,
            )?;
            if ctx.mb.transform_size_8x8_flag {
                ctx.mb.mb_part_pred_mode[0] = PredMode::Intra_8x8;
            }
        }
        mb_pred(ops, ctx)?;
    }

    if !ctx.mb.is_intra_16x16() {
        let mut code_num = 0u32;
        ops.ue("coded_block_pattern", &mut code_num)?;

        let intra = matches!(
            ctx.mb.mb_part_pred_mode[0],
            PredMode::Intra_4x4 | PredMode::Intra_8x8
        );
        let cbp = map_coded_block_pattern(
            code_num,
            ctx.sps_derived().chroma_array_type as u8,
            intra,
        )?;
        ctx.mb.coded_block_pattern = cbp;
        ctx.mb.cbp_luma = cbp % 16;
        ctx.mb.cbp_chroma = cbp / 16;

        if ctx.mb.cbp_luma > 0
            && pps.transform_8x8_mode_flag
            && mb_type != MbType::I_NxN
            && no_sub_mb_part_size_less_than_8x8
            && (mb_type != MbType::B_Direct_16x16 || sps.direct_8x8_inference_flag)
        {
            ops.flag(
                "transform_size_8x8_flag",
                &mut ctx.mb.transform_size_8x8_flag,
            )?;
        }
    }

    if ctx.mb.cbp_luma > 0 || ctx.mb.cbp_chroma > 0 || ctx.mb.is_intra_16x16() {
        ops.se("mb_qp_delta", &mut ctx.mb.mb_qp_delta)?;
        ops.begin_struct("residual");
        residual(ops, ctx, 0, 15)?;
        ops.end_struct();
    }

    Ok(())
}

fn pcm_samples<O: SyntaxOps>(ops: &mut O, ctx: &mut Ctx) -> Result<()> {
    while !ops.byte_aligned() {
        let mut bit = 0u8;
        ops.u("pcm_alignment_zero_bit", &mut bit, 1)?;
        if bit != 0 {
            return Err(H264Error::io("pcm_alignment_zero_bit is not 0"));
        }
    }

    let sd = ctx.sps_derived();
    let (bit_depth_luma, bit_depth_chroma) = (sd.bit_depth_luma, sd.bit_depth_chroma);
    let num_chroma = (2 * sd.mb_width_c * sd.mb_height_c) as usize;

    ops.begin_array("pcm_sample_luma");
    for sample in ctx.mb.pcm_sample_luma.iter_mut() {
        ops.u("pcm_sample_luma", sample, bit_depth_luma)?;
    }
    ops.end_array();

    ops.begin_array("pcm_sample_chroma");
    for sample in ctx.mb.pcm_sample_chroma.iter_mut().take(num_chroma) {
        ops.u("pcm_sample_chroma", sample, bit_depth_chroma)?;
    }
    ops.end_array();

    let mb_addr = ctx.mb.mb_addr;
    if let Some(info) = ctx.mb_info_mut(mb_addr) {
        info.nz = [[16; 16]; 3];
    }

    Ok(())
}

/// Largest `ref_idx_lX` of the current macroblock, 7.4.5.1.
fn max_ref_idx(ctx: &Ctx) -> (u32, u32) {
    let sh = ctx.slice_header();
    let (l0, l1) = (
        sh.num_ref_idx_l0_active_minus1 as u32,
        sh.num_ref_idx_l1_active_minus1 as u32,
    );

    if ctx.slice_derived().mbaff_frame_flag && ctx.mb.mb_field_decoding_flag {
        (2 * l0 + 1, 2 * l1 + 1)
    } else {
        (l0, l1)
    }
}

/// Whether `ref_idx_l0` and `ref_idx_l1` are coded, when the partition
/// modes allow it.
fn ref_idx_present(ctx: &Ctx) -> (bool, bool) {
    let sh = ctx.slice_header();
    let field_mismatch = ctx.mb.mb_field_decoding_flag != sh.field_pic_flag;

    (
        sh.num_ref_idx_l0_active_minus1 > 0 || field_mismatch,
        sh.num_ref_idx_l1_active_minus1 > 0 || field_mismatch,
    )
}

fn mvd<O: SyntaxOps>(ops: &mut O, list: usize, mvd: &mut [i32; 2]) -> Result<()> {
    let (x, y) = match list {
        0 => ("mvd_l0_x", "mvd_l0_y"),
        _ => ("mvd_l1_x", "mvd_l1_y"),
    };

    ops.begin_item();
    ops.se(x, &mut mvd[0])?;
    ops.se(y, &mut mvd[1])?;
    ops.end_item();
    Ok(())
}

fn intra_pred_modes<O: SyntaxOps>(
    ops: &mut O,
    names: [&str; 3],
    modes: &mut [i8],
) -> Result<()> {
    let [array, flag, rem] = names;

    ops.begin_array(array);
    for mode in modes.iter_mut() {
        let mut prev = false;
        ops.begin_item();
        ops.flag(flag, &mut prev)?;
        *mode = if prev {
            -1
        } else {
            let mut rem_mode = 0i8;
            ops.u(rem, &mut rem_mode, 3)?;
            rem_mode
        };
        ops.end_item();
    }
    ops.end_array();

    Ok(())
}

/// 7.3.5.1 Macroblock prediction syntax.
fn mb_pred<O: SyntaxOps>(ops: &mut O, ctx: &mut Ctx) -> Result<()> {
    let mode = ctx.mb.mb_part_pred_mode[0];

    match mode {
        PredMode::Intra_4x4 | PredMode::Intra_8x8 | PredMode::Intra_16x16 => {
            if mode == PredMode::Intra_4x4 {
                intra_pred_modes(
                    ops,
                    [
                        "intra4x4_pred_mode",
                        "prev_intra4x4_pred_mode_flag",
                        "rem_intra4x4_pred_mode",
                    ],
                    &mut ctx.mb.intra4x4_pred_mode,
                )?;
            } else if mode == PredMode::Intra_8x8 {
                intra_pred_modes(
                    ops,
                    [
                        "intra8x8_pred_mode",
                        "prev_intra8x8_pred_mode_flag",
                        "rem_intra8x8_pred_mode",
                    ],
                    &mut ctx.mb.intra8x8_pred_mode,
                )?;
            }

            let chroma_array_type = ctx.sps_derived().chroma_array_type;
            if chroma_array_type == 1 || chroma_array_type == 2 {
                ops.ue("intra_chroma_pred_mode", &mut ctx.mb.intra_chroma_pred_mode)?;
                if ctx.mb.intra_chroma_pred_mode > 3 {
                    return Err(H264Error::protocol(format!(
                        "intra_chroma_pred_mode out of range: {}",
                        ctx.mb.intra_chroma_pred_mode
                    )));
                }
            }
        }
        PredMode::Direct => (),
        _ => {
            let num_mb_part = ctx.mb.num_mb_part as usize;
            let modes = ctx.mb.mb_part_pred_mode;
            let (max_l0, max_l1) = max_ref_idx(ctx);
            let (l0_present, l1_present) = ref_idx_present(ctx);

            ops.begin_array("ref_idx_l0");
            for (i, mode) in modes.iter().enumerate().take(num_mb_part) {
                if l0_present && *mode != PredMode::Pred_L1 {
                    ops.te("ref_idx_l0", &mut ctx.mb.ref_idx_l0[i], max_l0)?;
                }
            }
            ops.end_array();

            ops.begin_array("ref_idx_l1");
            for (i, mode) in modes.iter().enumerate().take(num_mb_part) {
                if l1_present && *mode != PredMode::Pred_L0 {
                    ops.te("ref_idx_l1", &mut ctx.mb.ref_idx_l1[i], max_l1)?;
                }
            }
            ops.end_array();

            ops.begin_array("mvd_l0");
            for (i, mode) in modes.iter().enumerate().take(num_mb_part) {
                if *mode != PredMode::Pred_L1 {
                    mvd(ops, 0, &mut ctx.mb.mvd_l0[i][0])?;
                }
            }
            ops.end_array();

            ops.begin_array("mvd_l1");
            for (i, mode) in modes.iter().enumerate().take(num_mb_part) {
                if *mode != PredMode::Pred_L0 {
                    mvd(ops, 1, &mut ctx.mb.mvd_l1[i][0])?;
                }
            }
            ops.end_array();
        }
    }

    Ok(())
}

/// Whether the sub-macroblock `idx` carries a list other than `skip`.
fn sub_mb_coded(mb: &Macroblock, idx: usize, skip: PredMode) -> bool {
    mb.sub_mb_type[idx] != SubMbType::B_Direct_8x8 && mb.sub_mb_pred_mode[idx] != skip
}

/// 7.3.5.2 Sub-macroblock prediction syntax. Returns
/// `noSubMbPartSizeLessThan8x8Flag`.
fn sub_mb_pred<O: SyntaxOps>(
    ops: &mut O,
    ctx: &mut Ctx,
    direct_8x8_inference: bool,
) -> Result<bool> {
    let slice_type = ctx.slice_header().kind();

    ops.begin_array("sub_mb_type");
    for i in 0..4 {
        let mut raw = 0u32;
        ops.ue("sub_mb_type", &mut raw)?;
        ctx.mb.set_sub_mb_type(slice_type, i, raw)?;
    }
    ops.end_array();

    let mut no_sub_mb_part_size_less_than_8x8 = true;
    for i in 0..4 {
        if ctx.mb.sub_mb_type[i] != SubMbType::B_Direct_8x8 {
            if ctx.mb.num_sub_mb_part[i] > 1 {
                no_sub_mb_part_size_less_than_8x8 = false;
            }
        } else if !direct_8x8_inference {
            no_sub_mb_part_size_less_than_8x8 = false;
        }
    }

    let (max_l0, max_l1) = max_ref_idx(ctx);
    let (l0_present, l1_present) = ref_idx_present(ctx);
    let l0_present = l0_present && ctx.mb.mb_type != MbType::P_8x8ref0;

    ops.begin_array("ref_idx_l0");
    for i in 0..4 {
        if l0_present && sub_mb_coded(&ctx.mb, i, PredMode::Pred_L1) {
            ops.te("ref_idx_l0", &mut ctx.mb.ref_idx_l0[i], max_l0)?;
        }
    }
    ops.end_array();

    ops.begin_array("ref_idx_l1");
    for i in 0..4 {
        if l1_present && sub_mb_coded(&ctx.mb, i, PredMode::Pred_L0) {
            ops.te("ref_idx_l1", &mut ctx.mb.ref_idx_l1[i], max_l1)?;
        }
    }
    ops.end_array();

    ops.begin_array("mvd_l0");
    for i in 0..4 {
        if sub_mb_coded(&ctx.mb, i, PredMode::Pred_L1) {
            for j in 0..ctx.mb.num_sub_mb_part[i] as usize {
                mvd(ops, 0, &mut ctx.mb.mvd_l0[i][j])?;
            }
        }
    }
    ops.end_array();

    ops.begin_array("mvd_l1");
    for i in 0..4 {
        if sub_mb_coded(&ctx.mb, i, PredMode::Pred_L0) {
            for j in 0..ctx.mb.num_sub_mb_part[i] as usize {
                mvd(ops, 1, &mut ctx.mb.mvd_l1[i][j])?;
            }
        }
    }
    ops.end_array();

    Ok(no_sub_mb_part_size_less_than_8x8)
}

/// 7.3.5.3 Residual data syntax, for the coefficients `start..=end`.
fn residual<O: SyntaxOps>(ops: &mut O, ctx: &mut Ctx, start: usize, end: usize) -> Result<()> {
    residual_luma(ops, ctx, Component::Y, start, end)?;

    let sd = ctx.sps_derived();
    let (chroma_array_type, sub_width_c, sub_height_c) =
        (sd.chroma_array_type, sd.sub_width_c, sd.sub_height_c);

    match chroma_array_type {
        1 | 2 => {
            let num_c8x8 = (4 / (sub_width_c * sub_height_c)) as usize;
            let num_dc = 4 * num_c8x8;
            let cbp_chroma = ctx.mb.cbp_chroma;
            let planes = [Component::Cb, Component::Cr];

            for (i, &comp) in planes.iter().enumerate() {
                if cbp_chroma & 3 != 0 && start == 0 {
                    let levels = residual_block(
                        ops,
                        ctx,
                        BlockKind::ChromaDc,
                        comp,
                        0,
                        (0, num_dc - 1),
                        num_dc,
                    )?;
                    ctx.mb.chroma_dc_level[i][..num_dc].copy_from_slice(&levels[..num_dc]);
                }
            }

            if cbp_chroma & 2 == 0 {
                return Ok(());
            }

            for (i, &comp) in planes.iter().enumerate() {
                for blk in 0..num_dc {
                    let levels = residual_block(
                        ops,
                        ctx,
                        BlockKind::ChromaAc,
                        comp,
                        blk,
                        (start.saturating_sub(1), end - 1),
                        15,
                    )?;
                    ctx.mb.chroma_ac_level[i][blk].copy_from_slice(&levels[..15]);
                }
            }
        }
        3 => {
            residual_luma(ops, ctx, Component::Cb, start, end)?;
            residual_luma(ops, ctx, Component::Cr, start, end)?;
        }
        _ => (),
    }

    Ok(())
}

/// 7.3.5.3.1 Residual luma syntax, also used for the Cb and Cr planes of
/// 4:4:4 streams.
fn residual_luma<O: SyntaxOps>(
    ops: &mut O,
    ctx: &mut Ctx,
    comp: Component,
    start: usize,
    end: usize,
) -> Result<()> {
    let plane = comp as usize;
    let intra_16x16 = ctx.mb.is_intra_16x16();

    if start == 0 && intra_16x16 {
        ctx.mb.i16x16_dc_level[plane] =
            residual_block(ops, ctx, BlockKind::Intra16x16Dc, comp, 0, (0, 15), 16)?;
    }

    for i8x8 in 0..4 {
        if ctx.mb.cbp_luma & (1 << i8x8) == 0 {
            continue;
        }

        for i4x4 in 0..4 {
            let blk = i8x8 * 4 + i4x4;

            if intra_16x16 {
                let levels = residual_block(
                    ops,
                    ctx,
                    BlockKind::Intra16x16Ac,
                    comp,
                    blk,
                    (start.saturating_sub(1), end - 1),
                    15,
                )?;
                ctx.mb.i16x16_ac_level[plane][blk].copy_from_slice(&levels[..15]);
                continue;
            }

            let levels = residual_block(
                ops,
                ctx,
                BlockKind::Level4x4,
                comp,
                blk,
                (start, end),
                16,
            )?;
            ctx.mb.level4x4[plane][blk] = levels;

            if ctx.mb.transform_size_8x8_flag {
                for (i, &level) in levels.iter().enumerate() {
                    ctx.mb.level8x8[plane][i8x8][4 * i + i4x4] = level;
                }
            }
        }
    }

    Ok(())
}

/// 7.3.5.3.2 Residual block CAVLC syntax. Returns the levels of the block,
/// with the coefficients `range.0..=range.1` filled.
fn residual_block<O: SyntaxOps>(
    ops: &mut O,
    ctx: &mut Ctx,
    kind: BlockKind,
    comp: Component,
    blk: usize,
    range: (usize, usize),
    max_num_coeff: usize,
) -> Result<[i32; 16]> {
    let (start, end) = range;
    let num_coeff = end + 1 - start;
    let mb_addr = ctx.mb.mb_addr;
    let mb_field = ctx.mb.mb_field_decoding_flag;

    let nc = coeff_token_nc(ctx, mb_addr, mb_field, kind, comp, blk);
    let (trailing_ones, total_coeff) = read_coeff_token(ops, nc)?;
    let (t1, tc) = (trailing_ones as usize, total_coeff as usize);
    if tc > num_coeff {
        return Err(H264Error::io(format!(
            "{} coefficients in a block of {}",
            tc, num_coeff
        )));
    }

    if let Some(info) = ctx.mb_info_mut(mb_addr) {
        if kind.is_dc() {
            info.coded_dc[comp as usize] = tc > 0;
        } else {
            info.nz[comp as usize][blk] = total_coeff;
        }
    }

    let mut coeff_level = [0i32; 16];
    if tc == 0 {
        return Ok(coeff_level);
    }

    let mut level_val = [0i32; 16];
    let mut suffix_length: u32 = if tc > 10 && t1 < 3 { 1 } else { 0 };

    for i in 0..tc {
        if i < t1 {
            level_val[i] = if ops.read_raw_bits(1)? == 1 { -1 } else { 1 };
            continue;
        }

        let level_prefix = read_level_prefix(ops)?;
        let mut level_code = (level_prefix.min(15) << suffix_length) as i32;

        let level_suffix_size = match level_prefix {
            14 if suffix_length == 0 => 4,
            15.. => level_prefix - 3,
            _ => suffix_length,
        };
        if level_suffix_size > 0 {
            level_code += ops.read_raw_bits(level_suffix_size)? as i32;
        }
        if level_prefix >= 15 && suffix_length == 0 {
            level_code += 15;
        }
        if level_prefix >= 16 {
            level_code += (1 << (level_prefix - 3)) - 4096;
        }
        if i == t1 && t1 < 3 {
            level_code += 2;
        }

        level_val[i] = if level_code % 2 == 0 {
            (level_code + 2) >> 1
        } else {
            (-level_code - 1) >> 1
        };

        if suffix_length == 0 {
            suffix_length = 1;
        }
        if level_val[i].abs() > (3 << (suffix_length - 1)) && suffix_length < 6 {
            suffix_length += 1;
        }
    }

    let mut zeros_left = if tc < num_coeff {
        read_total_zeros(ops, total_coeff, max_num_coeff)?
    } else {
        0
    };
    if tc + zeros_left as usize > num_coeff {
        return Err(H264Error::io(format!(
            "total_zeros {} with {} coefficients in a block of {}",
            zeros_left, tc, num_coeff
        )));
    }

    let mut run_val = [0u32; 16];
    for run in run_val.iter_mut().take(tc - 1) {
        let run_before = read_run_before(ops, zeros_left)?;
        if run_before > zeros_left {
            return Err(H264Error::io(format!(
                "run_before {} with {} zeros left",
                run_before, zeros_left
            )));
        }
        *run = run_before;
        zeros_left -= run_before;
    }
    run_val[tc - 1] = zeros_left;

    let dump = ops.kind() == OpKind::Dump;
    let mut coeff_num = 0;
    for i in (0..tc).rev() {
        coeff_num += run_val[i] as usize;
        let idx = start + coeff_num;
        coeff_level[idx] = level_val[i];
        coeff_num += 1;

        if dump {
            ops.field(
                &format!("{}({},{})", kind.name(comp), blk, idx),
                level_val[i] as i64,
            );
        }
    }

    Ok(coeff_level)
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::codec::h264::headers::Pps;
    use crate::codec::h264::headers::SliceHeader;
    use crate::codec::h264::headers::Sps;
    use crate::codec::h264::nalu_reader::NaluReader;
    use crate::codec::h264::nalu_writer::NaluWriter;
    use crate::codec::h264::syntax;
    use crate::codec::h264::syntax::ReadOps;

    /// 320x240 baseline SPS and its CAVLC PPS.
    const SPS_BASELINE: [u8; 7] = [0x42, 0x00, 0x1e, 0xda, 0x05, 0x07, 0xe4];
    const PPS_BASELINE: [u8; 3] = [0xce, 0x3c, 0x80];

    /// I_16x16 macroblock with DC prediction, no coded coefficients.
    const GREY_MB: u8 = 0b0010_0111;

    #[derive(Default)]
    struct Counter {
        begin: u32,
        skipped: u32,
        coded: u32,
        end: Option<u32>,
    }

    impl MacroblockObserver for Counter {
        fn slice_data_begin(&mut self, _ctx: &Ctx) {
            self.begin += 1;
        }

        fn macroblock(&mut self, ctx: &Ctx) {
            if ctx.macroblock().mb_type.is_skip() {
                self.skipped += 1;
            } else {
                self.coded += 1;
            }
        }

        fn slice_data_end(&mut self, _ctx: &Ctx, mb_count: u32) {
            self.end = Some(mb_count);
        }
    }

    fn baseline_ctx() -> Ctx {
        let mut ctx = Ctx::new();

        let mut ops = ReadOps::new(NaluReader::new(&SPS_BASELINE, false));
        let mut sps = Sps::default();
        syntax::sps(&mut ops, &mut sps).unwrap();
        ctx.set_sps(sps).unwrap();

        let mut ops = ReadOps::new(NaluReader::new(&PPS_BASELINE, false));
        let mut pps = Pps::default();
        syntax::pps(&mut ops, &mut ctx, &mut pps).unwrap();
        ctx.set_pps(pps).unwrap();
        ctx
    }

    fn start_slice(ctx: &mut Ctx, slice_type: u8, first_mb_in_slice: u32) {
        ctx.set_slice_header(SliceHeader {
            first_mb_in_slice,
            slice_type,
            ..Default::default()
        })
        .unwrap();
    }

    fn parse(ctx: &mut Ctx, data: &[u8], counter: &mut Counter) -> Result<u32> {
        let mut ops = ReadOps::new(NaluReader::new(data, false));
        slice_data(&mut ops, ctx, counter)
    }

    fn bits<F>(f: F) -> Vec<u8>
    where
        F: FnOnce(&mut NaluWriter) -> Result<()>,
    {
        let mut w = NaluWriter::new(false);
        f(&mut w).unwrap();
        w.write_rbsp_trailing_bits().unwrap();
        w.into_vec().unwrap()
    }

    #[test]
    fn intra_16x16_macroblocks() {
        let mut ctx = baseline_ctx();
        start_slice(&mut ctx, 7, 298);

        let mut counter = Counter::default();
        let n = parse(&mut ctx, &[GREY_MB, GREY_MB, 0x80], &mut counter).unwrap();

        assert_eq!(n, 2);
        assert_eq!(counter.begin, 1);
        assert_eq!(counter.coded, 2);
        assert_eq!(counter.end, Some(2));

        let mb = ctx.macroblock();
        assert_eq!(mb.mb_addr, 299);
        assert_eq!(mb.mb_type, MbType::I_16x16);
        assert_eq!(mb.intra16x16_pred_mode, 2);
        assert_eq!(mb.cbp_luma, 0);
        assert_eq!(mb.cbp_chroma, 0);
        assert_eq!(ctx.mb_info(298).unwrap().mb_type, MbType::I_16x16);
        assert!(ctx.mb_info(297).is_none());
    }

    #[test]
    fn skip_run_to_end_of_picture() {
        let mut ctx = baseline_ctx();
        start_slice(&mut ctx, 5, 0);

        let data = bits(|w| w.write_ue(300));
        let mut counter = Counter::default();
        let n = parse(&mut ctx, &data, &mut counter).unwrap();

        assert_eq!(n, 300);
        assert_eq!(counter.skipped, 300);
        assert_eq!(counter.coded, 0);
        assert!(ctx.mb_info(150).unwrap().skipped);
    }

    #[test]
    fn skip_run_past_end_of_picture() {
        let mut ctx = baseline_ctx();
        start_slice(&mut ctx, 5, 0);

        let data = bits(|w| w.write_ue(301));
        let err = parse(&mut ctx, &data, &mut Counter::default()).unwrap_err();
        assert!(matches!(err, H264Error::Protocol(_)));
    }

    #[test]
    fn inter_16x16_macroblock() {
        let mut ctx = baseline_ctx();
        start_slice(&mut ctx, 5, 0);

        let data = bits(|w| {
            w.write_ue(0)?; // mb_skip_run
            w.write_ue(0)?; // P_L0_16x16
            w.write_se(1)?;
            w.write_se(-1)?;
            w.write_ue(0) // coded_block_pattern
        });
        let mut counter = Counter::default();
        assert_eq!(parse(&mut ctx, &data, &mut counter).unwrap(), 1);

        let mb = ctx.macroblock();
        assert_eq!(mb.mb_type, MbType::P_16x16);
        assert_eq!(mb.mvd_l0[0][0], [1, -1]);
        assert_eq!(mb.ref_idx_l0[0], 0);
        assert_eq!(mb.coded_block_pattern, 0);
        assert_eq!(mb.mb_qp_delta, 0);
    }

    #[test]
    fn p_8x8_sub_partitions() {
        let mut ctx = baseline_ctx();
        start_slice(&mut ctx, 5, 0);

        let data = bits(|w| {
            w.write_ue(0)?;
            w.write_ue(3)?; // P_8x8
            for sub in [0, 1, 2, 3] {
                w.write_ue(sub)?;
            }
            // 1 + 2 + 2 + 4 motion vector differences.
            for i in 0..9 {
                w.write_se(i)?;
                w.write_se(-i)?;
            }
            w.write_ue(0)
        });
        assert_eq!(parse(&mut ctx, &data, &mut Counter::default()).unwrap(), 1);

        let mb = ctx.macroblock();
        assert_eq!(mb.mb_type, MbType::P_8x8);
        assert_eq!(mb.sub_mb_type[3], SubMbType::P_4x4);
        assert_eq!(mb.num_sub_mb_part, [1, 2, 2, 4]);
        assert_eq!(mb.mvd_l0[1][1], [2, -2]);
        assert_eq!(mb.mvd_l0[3][3], [8, -8]);
    }

    #[test]
    fn intra_16x16_dc_coefficient() {
        let mut ctx = baseline_ctx();
        start_slice(&mut ctx, 7, 299);

        let data = bits(|w| {
            w.write_ue(3)?;
            w.write_ue(0)?;
            w.write_se(0)?;
            // coeff_token TrailingOnes 1 TotalCoeff 1, positive sign,
            // total_zeros 0.
            w.write_bits(0b01, 2)?;
            w.write_bit(false)?;
            w.write_bit(true)
        });
        assert_eq!(parse(&mut ctx, &data, &mut Counter::default()).unwrap(), 1);

        let mb = ctx.macroblock();
        assert_eq!(mb.i16x16_dc_level[0][0], 1);
        assert!(mb.i16x16_dc_level[0][1..].iter().all(|&l| l == 0));
        assert!(ctx.mb_info(299).unwrap().coded_dc[0]);
    }

    #[test]
    fn intra_4x4_with_luma_levels() {
        let mut ctx = baseline_ctx();
        start_slice(&mut ctx, 7, 299);

        let data = bits(|w| {
            w.write_ue(0)?; // I_NxN
            // prev_intra4x4_pred_mode_flag for the first block, then a
            // remaining mode of 5 for the others.
            w.write_bit(true)?;
            for _ in 1..16 {
                w.write_bit(false)?;
                w.write_bits(5, 3)?;
            }
            w.write_ue(0)?; // intra_chroma_pred_mode
            w.write_ue(29)?; // coded_block_pattern 1: first 8x8 luma block
            w.write_se(-2)?;
            // Block 0: TrailingOnes 0 TotalCoeff 1, level_prefix 1 for a
            // level of -2, then total_zeros 2.
            w.write_bits(0b000101, 6)?;
            w.write_bits(0b01, 2)?;
            w.write_bits(0b010, 3)?;
            // Blocks 1 to 3 have no coefficients.
            for _ in 1..4 {
                w.write_bit(true)?;
            }
            Ok(())
        });
        assert_eq!(parse(&mut ctx, &data, &mut Counter::default()).unwrap(), 1);

        let mb = ctx.macroblock();
        assert_eq!(mb.mb_type, MbType::I_NxN);
        assert_eq!(mb.intra4x4_pred_mode[0], -1);
        assert_eq!(mb.intra4x4_pred_mode[15], 5);
        assert_eq!(mb.cbp_luma, 1);
        assert_eq!(mb.mb_qp_delta, -2);
        assert_eq!(mb.level4x4[0][0][2], -2);
        assert_eq!(ctx.mb_info(299).unwrap().nz[0][..4], [1, 0, 0, 0]);
    }

    /// Writes an I_NxN macroblock of a P slice up to its mb_qp_delta, with
    /// every 4x4 block using its predicted mode.
    fn intra_4x4_in_p(w: &mut NaluWriter, cbp_code_num: u32) -> Result<()> {
        w.write_ue(5)?;
        for _ in 0..16 {
            w.write_bit(true)?;
        }
        w.write_ue(0)?;
        w.write_ue(cbp_code_num)?;
        w.write_se(0)
    }

    #[test]
    fn coeff_token_table_from_neighbouring_macroblocks() {
        let mut ctx = baseline_ctx();
        start_slice(&mut ctx, 5, 0);

        let data = bits(|w| {
            w.write_ue(1)?;

            // Macroblock 1, coded_block_pattern 4. Block 10 has three
            // trailing ones, which makes nC of block 11 (3 + 0 + 1) >> 1.
            intra_4x4_in_p(w, 31)?;
            w.write_bit(true)?;
            w.write_bit(true)?;
            w.write_bits(0b00011, 5)?;
            w.write_bits(0b001, 3)?;
            w.write_bits(0b0101, 4)?;
            w.write_bits(0b11, 2)?;

            w.write_ue(18)?;

            // Macroblock 20, coded_block_pattern 2. Block 5 has a single
            // trailing one.
            intra_4x4_in_p(w, 30)?;
            w.write_bit(true)?;
            w.write_bits(0b01, 2)?;
            w.write_bit(false)?;
            w.write_bit(true)?;
            w.write_bit(true)?;
            w.write_bit(true)?;

            w.write_ue(0)?;

            // Macroblock 21, coded_block_pattern 1. Block 0 sees nA = 1 in
            // macroblock 20 and nB = 3 in macroblock 1, so its coeff_token
            // comes from the 2 <= nC < 4 table.
            intra_4x4_in_p(w, 29)?;
            w.write_bits(0b10, 2)?;
            w.write_bit(true)?;
            w.write_bit(true)?;
            for _ in 1..4 {
                w.write_bit(true)?;
            }
            Ok(())
        });

        let mut counter = Counter::default();
        assert_eq!(parse(&mut ctx, &data, &mut counter).unwrap(), 22);
        assert_eq!(counter.skipped, 19);
        assert_eq!(counter.coded, 3);

        assert_eq!(ctx.mb_info(1).unwrap().nz[0][8..12], [0, 0, 3, 0]);
        assert_eq!(ctx.mb_info(20).unwrap().nz[0][4..8], [0, 1, 0, 0]);
        assert_eq!(ctx.mb_info(21).unwrap().nz[0][..4], [1, 0, 0, 0]);

        let nc = |addr, blk| {
            coeff_token_nc(&ctx, addr, false, BlockKind::Level4x4, Component::Y, blk)
        };
        assert_eq!(nc(1, 11), 2);
        assert_eq!(nc(20, 7), 1);
        assert_eq!(nc(21, 0), 2);
        // Left edge of the picture: only nB counts.
        assert_eq!(nc(20, 0), 0);

        let mb = ctx.macroblock();
        assert_eq!(mb.mb_addr, 21);
        assert_eq!(mb.mb_type, MbType::I_NxN);
        assert_eq!(mb.level4x4[0][0][0], -1);
        assert!(mb.level4x4[0][0][1..].iter().all(|&l| l == 0));
    }

    #[test]
    fn pcm_macroblock() {
        let mut ctx = baseline_ctx();
        start_slice(&mut ctx, 7, 299);

        let data = bits(|w| {
            w.write_ue(25)?;
            while !w.byte_aligned() {
                w.write_bit(false)?;
            }
            for i in 0..256 {
                w.write_bits(i, 8)?;
            }
            for _ in 0..128 {
                w.write_bits(0x80, 8)?;
            }
            Ok(())
        });
        assert_eq!(parse(&mut ctx, &data, &mut Counter::default()).unwrap(), 1);

        let mb = ctx.macroblock();
        assert_eq!(mb.mb_type, MbType::I_PCM);
        assert_eq!(mb.pcm_sample_luma[255], 255);
        assert_eq!(mb.pcm_sample_chroma[127], 0x80);
        assert_eq!(mb.pcm_sample_chroma[128], 0);
        assert_eq!(ctx.mb_info(299).unwrap().nz[2][15], 16);
    }

    #[test]
    fn pcm_alignment_must_be_zero() {
        let mut ctx = baseline_ctx();
        start_slice(&mut ctx, 7, 299);

        let data = bits(|w| {
            w.write_ue(25)?;
            w.write_bit(true)?;
            w.write_bits(0, 32)
        });
        let err = parse(&mut ctx, &data, &mut Counter::default()).unwrap_err();
        assert!(matches!(err, H264Error::Io(_)));
    }

    #[test]
    fn invalid_mb_type() {
        let mut ctx = baseline_ctx();
        start_slice(&mut ctx, 7, 299);

        let data = bits(|w| w.write_ue(26));
        assert!(parse(&mut ctx, &data, &mut Counter::default()).is_err());
    }

    #[test]
    fn cabac_slices_are_not_parsed() {
        let mut ctx = baseline_ctx();
        let pps = Pps {
            entropy_coding_mode_flag: true,
            ..(**ctx.pps().unwrap()).clone()
        };
        ctx.set_pps(pps).unwrap();
        start_slice(&mut ctx, 7, 0);

        let mut counter = Counter::default();
        assert_eq!(parse(&mut ctx, &[0xff, 0x80], &mut counter).unwrap(), 0);
        assert_eq!(counter.begin, 0);
        assert_eq!(counter.end, None);
    }
}
