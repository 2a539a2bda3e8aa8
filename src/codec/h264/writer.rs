// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! NAL unit writer: serializes the state of a [`Ctx`] back to NAL units, and
//! synthesizes slice data for grey and skipped pictures.

use log::debug;

use crate::codec::h264::cabac::Cabac;
use crate::codec::h264::ctx::Ctx;
use crate::codec::h264::error::H264Error;
use crate::codec::h264::error::Result;
use crate::codec::h264::headers::SliceHeader;
use crate::codec::h264::macroblock::BlockKind;
use crate::codec::h264::macroblock::Component;
use crate::codec::h264::nalu_writer::NaluWriter;
use crate::codec::h264::sei::Sei;
use crate::codec::h264::syntax;
use crate::codec::h264::syntax::WriteOps;
use crate::codec::h264::types::NaluType;
use crate::codec::h264::types::SliceType;

/// `mb_type` of an I_16x16 macroblock with DC prediction and no coded
/// coefficients, within the intra types.
const GREY_MB_TYPE: u32 = 3;

/// Writes the current NAL unit of `ctx`: its header, then the structure its
/// type calls for.
///
/// Slices are written from their header and their retained slice data. SEI
/// NAL units are written from the raw payloads of the context messages.
pub fn write_nalu(w: &mut NaluWriter, ctx: &mut Ctx) -> Result<()> {
    let type_ = ctx.nalu_type();

    match type_ {
        NaluType::Slice | NaluType::SliceIdr => {
            write_slice_header(w, ctx)?;

            let raw = ctx.slice_data();
            w.write_bits(raw.partial as u32, raw.partial_bits as u32)?;
            if !w.byte_aligned() {
                return Err(H264Error::io("slice data does not complete the slice header byte"));
            }
            w.write_raw_bytes(&raw.data)
        }
        NaluType::Sei => {
            if ctx.sei_list().is_empty() {
                return Err(H264Error::invalid("SEI NAL unit without messages"));
            }

            write_nalu_header(w, ctx)?;
            for sei in ctx.sei_list() {
                write_one_sei(w, sei)?;
            }
            w.write_rbsp_trailing_bits()
        }
        NaluType::Sps => {
            let mut sps = ctx
                .sps()
                .map(|sps| (**sps).clone())
                .ok_or_else(|| H264Error::protocol("no active SPS"))?;

            write_nalu_header(w, ctx)?;
            syntax::sps(&mut WriteOps::new(w), &mut sps)
        }
        NaluType::Pps => {
            let mut pps = ctx
                .pps()
                .map(|pps| (**pps).clone())
                .ok_or_else(|| H264Error::protocol("no active PPS"))?;

            write_nalu_header(w, ctx)?;
            syntax::pps(&mut WriteOps::new(w), ctx, &mut pps)
        }
        NaluType::Aud => {
            let mut aud = *ctx.aud();

            write_nalu_header(w, ctx)?;
            syntax::aud(&mut WriteOps::new(w), &mut aud)
        }
        NaluType::EndOfSeq | NaluType::EndOfStream => write_nalu_header(w, ctx),
        _ => Err(H264Error::unsupported(format!(
            "cannot write NAL units of type {}",
            type_.as_str()
        ))),
    }
}

fn write_nalu_header(w: &mut NaluWriter, ctx: &Ctx) -> Result<()> {
    let mut hdr = *ctx.nalu_header();
    syntax::nalu_header(&mut WriteOps::new(w), &mut hdr)
}

/// Writes the NAL unit header and the slice header of the current slice.
/// The slice data is left to the caller.
pub fn write_slice_header(w: &mut NaluWriter, ctx: &mut Ctx) -> Result<()> {
    let mut hdr = *ctx.nalu_header();
    let mut sh = ctx.slice_header().clone();

    let mut ops = WriteOps::new(w);
    syntax::nalu_header(&mut ops, &mut hdr)?;
    syntax::slice_header(&mut ops, ctx, &mut sh)
}

/// Writes one `sei_message( )` from its raw payload.
pub fn write_one_sei(w: &mut NaluWriter, sei: &Sei) -> Result<()> {
    let size = u32::try_from(sei.raw.len())
        .map_err(|_| H264Error::invalid(format!("SEI payload of {} bytes", sei.raw.len())))?;

    w.write_ff_coded(sei.payload_type())?;
    w.write_ff_coded(size)?;
    for &byte in sei.raw.iter() {
        w.write_bits(byte as u32, 8)?;
    }

    Ok(())
}

/// Checks that synthetic slice data can be written for the current slice
/// and returns its first macroblock address.
fn synthetic_slice_start(ctx: &Ctx, mb_count: u32) -> Result<u32> {
    if mb_count == 0 {
        return Err(H264Error::invalid("a slice needs at least one macroblock"));
    }
    if ctx.slice_derived().mbaff_frame_flag {
        return Err(H264Error::unsupported("synthetic slices in MBAFF frames"));
    }

    let first_mb = ctx.slice_header().first_mb_in_slice;
    let pic_size_in_mbs = ctx.slice_derived().pic_size_in_mbs;
    if first_mb.saturating_add(mb_count) > pic_size_in_mbs {
        return Err(H264Error::invalid(format!(
            "{} macroblocks from {} overflow a {} macroblocks picture",
            mb_count, first_mb, pic_size_in_mbs
        )));
    }

    Ok(first_mb)
}

fn is_cabac(ctx: &Ctx) -> Result<bool> {
    ctx.pps()
        .map(|pps| pps.entropy_coding_mode_flag)
        .ok_or_else(|| H264Error::protocol("no active PPS"))
}

/// Pads CABAC slice data to a byte boundary with `cabac_alignment_one_bit`.
fn cabac_alignment(w: &mut NaluWriter) -> Result<()> {
    while !w.byte_aligned() {
        w.write_bit(true)?;
    }
    Ok(())
}

/// Ends CABAC slice data: the engine flush wrote the stop bit.
fn cabac_trailing_bits(w: &mut NaluWriter) -> Result<()> {
    while !w.byte_aligned() {
        w.write_bit(false)?;
    }
    Ok(())
}

/// Writes the slice data of the current slice as `mb_count` grey
/// macroblocks, followed by the RBSP trailing bits. The slice header must
/// already be in `w`.
///
/// Each macroblock is an intra 16x16 macroblock with DC prediction and no
/// residual, whatever the slice type.
pub fn write_grey_i_slice(w: &mut NaluWriter, ctx: &mut Ctx, mb_count: u32) -> Result<()> {
    let mut mb_addr = synthetic_slice_start(ctx, mb_count)?;
    let slice_type = ctx.slice_header().kind();
    let chroma_array_type = ctx.sps_derived().chroma_array_type;
    let raw_mb_type = GREY_MB_TYPE
        + match slice_type {
            SliceType::I => 0,
            SliceType::Si => 1,
            SliceType::P | SliceType::Sp => 5,
            SliceType::B => 23,
        };

    debug!("writing {} grey macroblocks from {}", mb_count, mb_addr);

    let mut cabac = if is_cabac(ctx)? {
        cabac_alignment(w)?;
        Some(Cabac::new(ctx)?)
    } else {
        None
    };

    ctx.clear_macroblocks();
    for i in 0..mb_count {
        ctx.new_macroblock(mb_addr, false, None)?;
        ctx.macroblock_mut().set_mb_type(slice_type, raw_mb_type)?;
        ctx.commit_macroblock();

        let last = i + 1 == mb_count;
        match cabac.as_mut() {
            Some(cabac) => {
                if !slice_type.is_intra() {
                    cabac.write_mb_skip_flag(w, ctx, false)?;
                }
                cabac.write_mb_type(w, ctx)?;
                if chroma_array_type == 1 || chroma_array_type == 2 {
                    cabac.write_intra_chroma_pred_mode(w, ctx)?;
                }
                cabac.write_mb_qp_delta(w, ctx)?;
                cabac.write_coded_block_flag(
                    w,
                    ctx,
                    BlockKind::Intra16x16Dc,
                    Component::Y,
                    0,
                    false,
                )?;
                if chroma_array_type == 3 {
                    for comp in [Component::Cb, Component::Cr] {
                        cabac.write_coded_block_flag(
                            w,
                            ctx,
                            BlockKind::Intra16x16Dc,
                            comp,
                            0,
                            false,
                        )?;
                    }
                }
                cabac.write_end_of_slice_flag(w, ctx, last)?;
            }
            None => {
                if !slice_type.is_intra() {
                    // mb_skip_run
                    w.write_ue(0)?;
                }
                w.write_ue(raw_mb_type)?;
                if chroma_array_type == 1 || chroma_array_type == 2 {
                    // intra_chroma_pred_mode
                    w.write_ue(0)?;
                }
                // mb_qp_delta
                w.write_se(0)?;
                // coeff_token of the empty DC blocks, nC is 0.
                let dc_blocks = if chroma_array_type == 3 { 3 } else { 1 };
                for _ in 0..dc_blocks {
                    w.write_bit(true)?;
                }
            }
        }

        if !last {
            mb_addr = ctx.next_mb_addr(mb_addr);
        }
    }

    match cabac {
        Some(_) => cabac_trailing_bits(w),
        None => w.write_rbsp_trailing_bits(),
    }
}

/// Writes the slice data of the current slice as `mb_count` skipped
/// macroblocks, followed by the RBSP trailing bits. The slice header must
/// already be in `w`.
pub fn write_skipped_p_slice(w: &mut NaluWriter, ctx: &mut Ctx, mb_count: u32) -> Result<()> {
    let mut mb_addr = synthetic_slice_start(ctx, mb_count)?;
    if ctx.slice_header().kind().is_intra() {
        return Err(H264Error::invalid("intra slices cannot skip macroblocks"));
    }

    debug!("writing {} skipped macroblocks from {}", mb_count, mb_addr);

    if !is_cabac(ctx)? {
        w.write_ue(mb_count)?;
        return w.write_rbsp_trailing_bits();
    }

    cabac_alignment(w)?;
    let mut cabac = Cabac::new(ctx)?;

    ctx.clear_macroblocks();
    for i in 0..mb_count {
        ctx.new_macroblock(mb_addr, true, None)?;
        ctx.commit_macroblock();

        let last = i + 1 == mb_count;
        cabac.write_mb_skip_flag(w, ctx, true)?;
        cabac.write_end_of_slice_flag(w, ctx, last)?;

        if !last {
            mb_addr = ctx.next_mb_addr(mb_addr);
        }
    }

    cabac_trailing_bits(w)
}

/// Rewrites in place the slice header of `buf`, the slice NAL unit last
/// parsed into `ctx`, with `sh`.
///
/// The new header must have the same size in bits as the old one, and the
/// same emulation prevention layout: otherwise the slice data would move,
/// the context is left untouched and a `Protocol` error is returned. The
/// bits of the last header byte that belong to the slice data are kept.
pub fn rewrite_slice_header(buf: &mut [u8], ctx: &mut Ctx, sh: SliceHeader) -> Result<()> {
    let old = ctx.slice_header().clone();
    let old_len = ctx.slice_header_bit_len();

    ctx.replace_slice_header(sh)?;
    match encode_same_size_header(buf, ctx, old_len) {
        Ok(()) => Ok(()),
        Err(e) => {
            ctx.replace_slice_header(old)?;
            Err(e)
        }
    }
}

fn encode_same_size_header(buf: &mut [u8], ctx: &mut Ctx, old_len: u64) -> Result<()> {
    let mut w = NaluWriter::new(true);
    write_slice_header(&mut w, ctx)?;

    let new_len = w.position() - 8;
    if new_len != old_len {
        return Err(H264Error::protocol(format!(
            "slice header size changed from {} to {} bits",
            old_len, new_len
        )));
    }

    let raw = ctx.slice_data();
    let data_off = buf
        .len()
        .checked_sub(raw.data.len())
        .ok_or_else(|| H264Error::invalid("buffer is shorter than the slice data"))?;

    let (cache, cachebits) = w.cache();
    let header = w.data();
    let header_bytes = header.len() + (cachebits > 0) as usize;
    if header_bytes != data_off || (8 - cachebits) % 8 != raw.partial_bits {
        return Err(H264Error::protocol(format!(
            "slice header takes {} bytes instead of {}",
            header_bytes, data_off
        )));
    }

    buf[..header.len()].copy_from_slice(header);
    if cachebits > 0 {
        let mask = (1u8 << (8 - cachebits)) - 1;
        let last = &mut buf[header.len()];
        *last = (cache & !mask) | (*last & mask);
    }

    Ok(())
}
