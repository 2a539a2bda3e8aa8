// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! NAL unit reader: parses NAL units into a [`Ctx`] and reports each parsed
//! structure to a [`ReaderCallbacks`] implementation.

use std::cell::Cell;
use std::rc::Rc;

use log::debug;
use log::error;
use log::warn;

use crate::codec::h264::ctx::Ctx;
use crate::codec::h264::ctx::RawSliceData;
use crate::codec::h264::error::H264Error;
use crate::codec::h264::error::Result;
use crate::codec::h264::headers::Aud;
use crate::codec::h264::headers::NaluHeader;
use crate::codec::h264::headers::Pps;
use crate::codec::h264::headers::SliceHeader;
use crate::codec::h264::headers::Sps;
use crate::codec::h264::macroblock::Macroblock;
use crate::codec::h264::nalu_reader::NaluReader;
use crate::codec::h264::sei::Sei;
use crate::codec::h264::sei::SeiBufferingPeriod;
use crate::codec::h264::sei::SeiDeblockingFilterDisplayPreference;
use crate::codec::h264::sei::SeiDisplayOrientation;
use crate::codec::h264::sei::SeiFillerPayload;
use crate::codec::h264::sei::SeiFramePackingArrangement;
use crate::codec::h264::sei::SeiFullFrameFreeze;
use crate::codec::h264::sei::SeiPanScanRect;
use crate::codec::h264::sei::SeiPayload;
use crate::codec::h264::sei::SeiPicTiming;
use crate::codec::h264::sei::SeiRecoveryPoint;
use crate::codec::h264::sei::SeiUserDataRegistered;
use crate::codec::h264::sei::SeiUserDataUnregistered;
use crate::codec::h264::slice_data;
use crate::codec::h264::slice_data::MacroblockObserver;
use crate::codec::h264::syntax;
use crate::codec::h264::syntax::ReadOps;
use crate::codec::h264::syntax::SyntaxOps;
use crate::codec::h264::types::sei_type_str;
use crate::codec::h264::types::NaluType;
use crate::utils::find_nalu;

/// Reader options.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ReaderFlags {
    /// Parse the macroblock layer of CAVLC slices. Without it, and for CABAC
    /// slices, the slice data is only retained raw.
    pub slice_data: bool,
}

/// Notifications sent by a [`Reader`]. Every method does nothing by default.
///
/// The context passed along is the state of the reader at the time of the
/// call: the current NAL unit header, the active parameter sets and, for
/// slices, the slice header and the macroblock being parsed.
#[allow(unused_variables)]
pub trait ReaderCallbacks {
    /// The NAL unit about to be processed ends the current access unit.
    fn au_end(&mut self, ctx: &Ctx) {}

    fn nalu_begin(&mut self, ctx: &Ctx, type_: NaluType, buf: &[u8]) {}
    fn nalu_end(&mut self, ctx: &Ctx, type_: NaluType, buf: &[u8]) {}

    /// A slice has been parsed. Its data is in [`Ctx::slice_data`].
    fn slice(&mut self, ctx: &Ctx, sh: &SliceHeader) {}
    fn slice_data_begin(&mut self, ctx: &Ctx) {}
    fn slice_data_mb(&mut self, ctx: &Ctx, mb: &Macroblock) {}
    fn slice_data_end(&mut self, ctx: &Ctx, mb_count: u32) {}

    fn sps(&mut self, ctx: &Ctx, sps: &Sps) {}
    fn pps(&mut self, ctx: &Ctx, pps: &Pps) {}
    fn aud(&mut self, ctx: &Ctx, aud: &Aud) {}

    /// A SEI message, before its payload is parsed.
    fn sei(&mut self, ctx: &Ctx, payload_type: u32, raw: &[u8]) {}
    fn sei_buffering_period(&mut self, ctx: &Ctx, sei: &SeiBufferingPeriod) {}
    fn sei_pic_timing(&mut self, ctx: &Ctx, sei: &SeiPicTiming) {}
    fn sei_pan_scan_rect(&mut self, ctx: &Ctx, sei: &SeiPanScanRect) {}
    fn sei_filler_payload(&mut self, ctx: &Ctx, sei: &SeiFillerPayload) {}
    fn sei_user_data_registered(&mut self, ctx: &Ctx, sei: &SeiUserDataRegistered) {}
    fn sei_user_data_unregistered(&mut self, ctx: &Ctx, sei: &SeiUserDataUnregistered) {}
    fn sei_recovery_point(&mut self, ctx: &Ctx, sei: &SeiRecoveryPoint) {}
    fn sei_full_frame_freeze(&mut self, ctx: &Ctx, sei: &SeiFullFrameFreeze) {}
    fn sei_deblocking_filter_display_preference(
        &mut self,
        ctx: &Ctx,
        sei: &SeiDeblockingFilterDisplayPreference,
    ) {
    }
    fn sei_frame_packing_arrangement(&mut self, ctx: &Ctx, sei: &SeiFramePackingArrangement) {}
    fn sei_display_orientation(&mut self, ctx: &Ctx, sei: &SeiDisplayOrientation) {}
}

impl ReaderCallbacks for () {}

/// Requests a [`Reader`] to stop scanning a byte stream. Can be cloned into
/// the callbacks.
#[derive(Clone, Debug, Default)]
pub struct StopHandle(Rc<Cell<bool>>);

impl StopHandle {
    pub fn stop(&self) {
        self.0.set(true);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.get()
    }

    fn reset(&self) {
        self.0.set(false);
    }
}

/// Forwards the progress of a slice data traversal to the reader callbacks.
struct SliceDataEvents<'a, C: ?Sized> {
    callbacks: &'a mut C,
}

impl<C: ReaderCallbacks + ?Sized> MacroblockObserver for SliceDataEvents<'_, C> {
    fn slice_data_begin(&mut self, ctx: &Ctx) {
        self.callbacks.slice_data_begin(ctx);
    }

    fn macroblock(&mut self, ctx: &Ctx) {
        self.callbacks.slice_data_mb(ctx, ctx.macroblock());
    }

    fn slice_data_end(&mut self, ctx: &Ctx, mb_count: u32) {
        self.callbacks.slice_data_end(ctx, mb_count);
    }
}

fn notify_sei<C: ReaderCallbacks + ?Sized>(callbacks: &mut C, ctx: &Ctx, payload: &SeiPayload) {
    match payload {
        SeiPayload::BufferingPeriod(sei) => callbacks.sei_buffering_period(ctx, sei),
        SeiPayload::PicTiming(sei) => callbacks.sei_pic_timing(ctx, sei),
        SeiPayload::PanScanRect(sei) => callbacks.sei_pan_scan_rect(ctx, sei),
        SeiPayload::FillerPayload(sei) => callbacks.sei_filler_payload(ctx, sei),
        SeiPayload::UserDataRegistered(sei) => callbacks.sei_user_data_registered(ctx, sei),
        SeiPayload::UserDataUnregistered(sei) => callbacks.sei_user_data_unregistered(ctx, sei),
        SeiPayload::RecoveryPoint(sei) => callbacks.sei_recovery_point(ctx, sei),
        SeiPayload::FullFrameFreeze(sei) => callbacks.sei_full_frame_freeze(ctx, sei),
        SeiPayload::DeblockingFilterDisplayPreference(sei) => {
            callbacks.sei_deblocking_filter_display_preference(ctx, sei)
        }
        SeiPayload::FramePackingArrangement(sei) => {
            callbacks.sei_frame_packing_arrangement(ctx, sei)
        }
        SeiPayload::DisplayOrientation(sei) => callbacks.sei_display_orientation(ctx, sei),
        SeiPayload::Unknown(_) => (),
    }
}

/// Whether a NAL unit following a VCL NAL unit starts a new access unit,
/// 7.4.1.2.3. VCL NAL units are checked against the previous slice instead.
fn starts_access_unit(nal_unit_type: u8) -> bool {
    matches!(nal_unit_type, 6..=9 | 14..=18)
}

fn check_nal_ref_idc(hdr: &NaluHeader, non_zero: bool) -> Result<()> {
    if (hdr.nal_ref_idc != 0) != non_zero {
        return Err(H264Error::io(format!(
            "invalid nal_ref_idc {} for a {} NAL unit",
            hdr.nal_ref_idc,
            hdr.type_().as_str()
        )));
    }
    Ok(())
}

fn low_bits(value: u8, num_bits: u8) -> u8 {
    (value as u32 & ((1u32 << num_bits) - 1)) as u8
}

/// Parses NAL units and keeps track of the decoding state across them.
pub struct Reader<C: ReaderCallbacks> {
    ctx: Ctx,
    callbacks: C,
    flags: ReaderFlags,
    stop: StopHandle,
}

impl<C: ReaderCallbacks> Reader<C> {
    pub fn new(callbacks: C, flags: ReaderFlags) -> Self {
        Self {
            ctx: Ctx::new(),
            callbacks,
            flags,
            stop: StopHandle::default(),
        }
    }

    pub fn ctx(&self) -> &Ctx {
        &self.ctx
    }

    pub fn ctx_mut(&mut self) -> &mut Ctx {
        &mut self.ctx
    }

    pub fn callbacks(&self) -> &C {
        &self.callbacks
    }

    pub fn callbacks_mut(&mut self) -> &mut C {
        &mut self.callbacks
    }

    pub fn flags(&self) -> ReaderFlags {
        self.flags
    }

    pub fn set_flags(&mut self, flags: ReaderFlags) {
        self.flags = flags;
    }

    /// A handle the callbacks can use to stop [`Reader::parse`].
    pub fn stop_handle(&self) -> StopHandle {
        self.stop.clone()
    }

    /// Stops [`Reader::parse`] before the next NAL unit.
    pub fn stop(&self) {
        self.stop.stop();
    }

    /// Parses an Annex B byte stream, one NAL unit after the other, until
    /// the end of `buf` or until a stop is requested. Errors are logged and
    /// the NAL unit that caused them skipped.
    ///
    /// Returns the offset of the first byte that was not consumed.
    pub fn parse(&mut self, buf: &[u8]) -> usize {
        self.stop.reset();

        let mut off = 0;
        while off < buf.len() && !self.stop.is_stopped() {
            let span = match find_nalu(&buf[off..]) {
                Ok(span) => span,
                Err(_) => break,
            };

            if !span.complete {
                debug!("NAL unit at offset {} runs to the end of the buffer", off + span.start);
            }

            let nalu = &buf[off + span.start..off + span.end];
            if nalu.is_empty() {
                warn!("empty NAL unit at offset {}", off + span.start);
            } else if let Err(e) = self.parse_nalu(nalu) {
                error!("skipping NAL unit at offset {}: {}", off + span.start, e);
            }

            off += span.end;
        }

        off
    }

    /// Parses one NAL unit, start code excluded.
    pub fn parse_nalu(&mut self, buf: &[u8]) -> Result<()> {
        if buf.is_empty() {
            return Err(H264Error::invalid("empty NAL unit"));
        }

        self.ctx.clear_nalu();

        let mut ops = ReadOps::new(NaluReader::new(buf, true));
        let mut hdr = NaluHeader::default();
        syntax::nalu_header(&mut ops, &mut hdr)?;
        self.ctx.set_nalu_header(hdr);

        let type_ = hdr.type_();
        self.callbacks.nalu_begin(&self.ctx, type_, buf);

        if !type_.is_vcl() && self.ctx.is_prev_vcl() && starts_access_unit(hdr.nal_unit_type) {
            self.au_end();
        }

        let res = match type_ {
            NaluType::Slice | NaluType::SliceIdr => self.slice_layer(ops),
            NaluType::Sei => self.sei_rbsp(ops),
            NaluType::Sps => self.sps_rbsp(&hdr, ops),
            NaluType::Pps => self.pps_rbsp(&hdr, ops),
            NaluType::Aud => self.aud_rbsp(&hdr, ops),
            _ => {
                debug!(
                    "skipping NAL unit of type {} ({})",
                    hdr.nal_unit_type,
                    type_.as_str()
                );
                self.ctx.set_nalu_unknown();
                Ok(())
            }
        };

        self.ctx.end_nalu();
        res?;

        self.callbacks.nalu_end(&self.ctx, type_, buf);
        Ok(())
    }

    fn au_end(&mut self) {
        debug!("end of access unit");
        self.callbacks.au_end(&self.ctx);
    }

    fn slice_layer(&mut self, mut ops: ReadOps<'_>) -> Result<()> {
        let mut sh = SliceHeader::default();
        syntax::slice_header(&mut ops, &mut self.ctx, &mut sh)?;
        self.ctx.set_slice_header(sh)?;

        let reader = ops.into_reader();
        // The NAL unit header is not part of the slice header.
        self.ctx.set_slice_header_bit_len(reader.position() - 8);

        let (cache, cachebits) = reader.cache();
        self.ctx.set_slice_data(RawSliceData {
            partial: low_bits(cache, cachebits),
            partial_bits: cachebits,
            data: reader.data()[reader.byte_offset()..].to_vec(),
        });

        if self.ctx.is_prev_vcl() && self.ctx.is_first_vcl() {
            self.au_end();
        }

        if self.flags.slice_data {
            let mut ops = ReadOps::new(reader);
            let mut events = SliceDataEvents {
                callbacks: &mut self.callbacks,
            };
            slice_data::slice_data(&mut ops, &mut self.ctx, &mut events)?;
        }

        self.callbacks.slice(&self.ctx, self.ctx.slice_header());
        Ok(())
    }

    /// 7.3.2.3 Supplemental enhancement information RBSP. Each payload is
    /// kept raw and parsed on its own when its type has a known syntax.
    fn sei_rbsp(&mut self, mut ops: ReadOps<'_>) -> Result<()> {
        loop {
            let mut payload_type = 0;
            ops.ff_coded("last_payload_type_byte", &mut payload_type)?;
            let mut payload_size = 0;
            ops.ff_coded("last_payload_size_byte", &mut payload_size)?;

            let capacity = (payload_size as usize).min(ops.reader.num_bits_left() / 8);
            let mut raw = Vec::with_capacity(capacity);
            for _ in 0..payload_size {
                raw.push(ops.reader.read_bits(8)? as u8);
            }

            self.callbacks.sei(&self.ctx, payload_type, &raw);

            let mut payload = SeiPayload::new(payload_type);
            if let SeiPayload::Unknown(_) = payload {
                debug!(
                    "keeping SEI payload type {} ({}) raw",
                    payload_type,
                    sei_type_str(payload_type)
                );
            } else {
                let mut payload_ops = ReadOps::new(NaluReader::new(&raw, false));
                syntax::sei_payload(&mut payload_ops, &mut self.ctx, &mut payload)?;
            }

            notify_sei(&mut self.callbacks, &self.ctx, &payload);
            self.ctx.push_sei(Sei { payload, raw });

            if !ops.more_rbsp_data(false) {
                break;
            }
        }

        ops.rbsp_trailing_bits()
    }

    fn sps_rbsp(&mut self, hdr: &NaluHeader, mut ops: ReadOps<'_>) -> Result<()> {
        check_nal_ref_idc(hdr, true)?;

        let mut sps = Sps::default();
        syntax::sps(&mut ops, &mut sps)?;
        self.ctx.set_sps(sps)?;

        if let Some(sps) = self.ctx.sps() {
            self.callbacks.sps(&self.ctx, sps);
        }
        Ok(())
    }

    fn pps_rbsp(&mut self, hdr: &NaluHeader, mut ops: ReadOps<'_>) -> Result<()> {
        check_nal_ref_idc(hdr, true)?;

        let mut pps = Pps::default();
        syntax::pps(&mut ops, &mut self.ctx, &mut pps)?;
        self.ctx.set_pps(pps)?;

        if let Some(pps) = self.ctx.pps() {
            self.callbacks.pps(&self.ctx, pps);
        }
        Ok(())
    }

    fn aud_rbsp(&mut self, hdr: &NaluHeader, mut ops: ReadOps<'_>) -> Result<()> {
        check_nal_ref_idc(hdr, false)?;

        let mut aud = Aud::default();
        syntax::aud(&mut ops, &mut aud)?;
        self.ctx.set_aud(aud);

        self.callbacks.aud(&self.ctx, self.ctx.aud());
        Ok(())
    }
}

/// Parses the header of a NAL unit.
pub fn parse_nalu_header(buf: &[u8]) -> Result<NaluHeader> {
    let mut ops = ReadOps::new(NaluReader::new(buf, true));
    let mut hdr = NaluHeader::default();
    syntax::nalu_header(&mut ops, &mut hdr)?;
    Ok(hdr)
}

fn expect_nalu<'a>(buf: &'a [u8], type_: NaluType) -> Result<ReadOps<'a>> {
    let mut ops = ReadOps::new(NaluReader::new(buf, true));
    let mut hdr = NaluHeader::default();
    syntax::nalu_header(&mut ops, &mut hdr)?;

    if hdr.type_() != type_ {
        return Err(H264Error::io(format!(
            "expected a {} NAL unit, got type {}",
            type_.as_str(),
            hdr.nal_unit_type
        )));
    }
    Ok(ops)
}

/// Parses a SPS NAL unit without a context.
pub fn parse_sps(buf: &[u8]) -> Result<Sps> {
    let mut ops = expect_nalu(buf, NaluType::Sps)?;
    let mut sps = Sps::default();
    syntax::sps(&mut ops, &mut sps)?;
    Ok(sps)
}

/// Parses a PPS NAL unit referring to `sps`, without a context.
pub fn parse_pps(buf: &[u8], sps: &Sps) -> Result<Pps> {
    let mut ops = expect_nalu(buf, NaluType::Pps)?;
    let mut pps = Pps::default();
    syntax::pps(&mut ops, &mut &*sps, &mut pps)?;
    Ok(pps)
}
