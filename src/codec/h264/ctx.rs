// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! The decoding context shared by the readers, writers and dumpers.
//!
//! A [`Ctx`] owns the parameter set tables, the active SPS and PPS, the
//! current NAL unit and slice header, and the per-slice macroblock state that
//! the entropy coders derive their contexts from. It is mutated as NAL units
//! are parsed and read back when they are written.

use std::rc::Rc;

use log::debug;

use crate::codec::h264::error::H264Error;
use crate::codec::h264::error::Result;
use crate::codec::h264::fmo::SliceGroupMap;
use crate::codec::h264::headers::Aud;
use crate::codec::h264::headers::NaluHeader;
use crate::codec::h264::headers::Pps;
use crate::codec::h264::headers::SliceHeader;
use crate::codec::h264::headers::Sps;
use crate::codec::h264::headers::MAX_PPS_COUNT;
use crate::codec::h264::headers::MAX_SPS_COUNT;
use crate::codec::h264::macroblock::neighbour_mb_addrs;
use crate::codec::h264::macroblock::Macroblock;
use crate::codec::h264::macroblock::MacroblockInfo;
use crate::codec::h264::macroblock::MbTable;
use crate::codec::h264::nalu_writer::NaluWriter;
use crate::codec::h264::sei::Sei;
use crate::codec::h264::sei::SeiPayload;
use crate::codec::h264::sei::SeiPicTiming;
use crate::codec::h264::syntax;
use crate::codec::h264::syntax::SyntaxOps;
use crate::codec::h264::syntax::WriteOps;
use crate::codec::h264::types::MbType;
use crate::codec::h264::types::NaluType;
use crate::codec::h264::types::SliceType;

/// Variables derived from a SPS, 6.2 and 7.4.2.1.1.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SpsDerived {
    pub chroma_array_type: u32,
    pub sub_width_c: u32,
    pub sub_height_c: u32,
    pub mb_width_c: u32,
    pub mb_height_c: u32,

    pub bit_depth_luma: u32,
    pub bit_depth_chroma: u32,
    pub qp_bd_offset_luma: u32,
    pub qp_bd_offset_chroma: u32,
    pub raw_mb_bits: u32,

    pub max_frame_num: u32,
    pub max_pic_order_cnt_lsb: u32,

    pub pic_width_in_mbs: u32,
    pub pic_width_in_samples_luma: u32,
    pub pic_width_in_samples_chroma: u32,
    pub pic_height_in_map_units: u32,
    pub pic_size_in_map_units: u32,
    pub frame_height_in_mbs: u32,

    pub crop_unit_x: u32,
    pub crop_unit_y: u32,
    /// Cropped picture size in luma samples.
    pub width: u32,
    pub height: u32,
}

impl SpsDerived {
    pub fn new(sps: &Sps) -> Self {
        let chroma_array_type = sps.chroma_array_type() as u32;
        let (sub_width_c, sub_height_c): (u32, u32) = match chroma_array_type {
            1 => (2, 2),
            2 => (2, 1),
            3 => (1, 1),
            _ => (0, 0),
        };
        let (mb_width_c, mb_height_c) = match chroma_array_type {
            1 => (8, 8),
            2 => (8, 16),
            3 => (16, 16),
            _ => (0, 0),
        };

        let bit_depth_luma = sps.bit_depth_luma_minus8 as u32 + 8;
        let bit_depth_chroma = sps.bit_depth_chroma_minus8 as u32 + 8;

        let frame_mbs_only = sps.frame_mbs_only_flag as u32;
        let pic_width_in_mbs = sps.pic_width_in_mbs_minus1.saturating_add(1);
        let pic_height_in_map_units = sps.pic_height_in_map_units_minus1.saturating_add(1);
        let frame_height_in_mbs = (2 - frame_mbs_only).saturating_mul(pic_height_in_map_units);

        let (crop_unit_x, crop_unit_y) = if chroma_array_type == 0 {
            (1u32, 2 - frame_mbs_only)
        } else {
            (sub_width_c, sub_height_c * (2 - frame_mbs_only))
        };

        let pic_width_in_samples_luma = pic_width_in_mbs.saturating_mul(16);
        let crop_x = crop_unit_x.saturating_mul(
            sps.frame_crop_left_offset
                .saturating_add(sps.frame_crop_right_offset),
        );
        let crop_y = crop_unit_y.saturating_mul(
            sps.frame_crop_top_offset
                .saturating_add(sps.frame_crop_bottom_offset),
        );

        Self {
            chroma_array_type,
            sub_width_c,
            sub_height_c,
            mb_width_c,
            mb_height_c,
            bit_depth_luma,
            bit_depth_chroma,
            qp_bd_offset_luma: 6 * sps.bit_depth_luma_minus8 as u32,
            qp_bd_offset_chroma: 6 * sps.bit_depth_chroma_minus8 as u32,
            raw_mb_bits: 256 * bit_depth_luma + 2 * mb_width_c * mb_height_c * bit_depth_chroma,
            max_frame_num: 1 << (sps.log2_max_frame_num_minus4 as u32 + 4).min(31),
            max_pic_order_cnt_lsb: 1 << (sps.log2_max_pic_order_cnt_lsb_minus4 as u32 + 4).min(31),
            pic_width_in_mbs,
            pic_width_in_samples_luma,
            pic_width_in_samples_chroma: pic_width_in_mbs.saturating_mul(mb_width_c),
            pic_height_in_map_units,
            pic_size_in_map_units: pic_width_in_mbs.saturating_mul(pic_height_in_map_units),
            frame_height_in_mbs,
            crop_unit_x,
            crop_unit_y,
            width: pic_width_in_samples_luma.saturating_sub(crop_x),
            height: frame_height_in_mbs.saturating_mul(16).saturating_sub(crop_y),
        }
    }
}

/// Variables derived from the active SPS, PPS and the slice header, 7.4.3.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SliceDerived {
    pub mbaff_frame_flag: bool,
    pub pic_height_in_mbs: u32,
    pub pic_height_in_samples_luma: u32,
    pub pic_height_in_samples_chroma: u32,
    pub pic_size_in_mbs: u32,
    pub max_pic_num: u32,
    pub curr_pic_num: u32,
    pub slice_qp_luma: i32,
    pub qs_luma: i32,
    pub filter_offset_a: i32,
    pub filter_offset_b: i32,
    pub slice_group_change_rate: u32,
    pub map_units_in_slice_group0: u32,
}

/// Slice data kept undecoded. `partial` holds the `partial_bits` low bits of
/// the byte in which the slice header ended, `data` the following bytes with
/// emulation prevention still applied.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RawSliceData {
    pub partial: u8,
    pub partial_bits: u8,
    pub data: Vec<u8>,
}

#[derive(Clone, Debug, Default)]
struct NaluState {
    hdr: NaluHeader,
    /// The NAL unit type has no syntax support and was skipped.
    unknown: bool,
    is_first_vcl: bool,
    is_prev_vcl: bool,
    is_prev_filler: bool,
}

#[derive(Clone, Debug, Default)]
struct SliceState {
    hdr: SliceHeader,
    /// Size of the slice header in bits, NAL unit header excluded.
    hdr_len: u64,
    raw: RawSliceData,
    mb_table: MbTable,
    group_map: SliceGroupMap,
    prev_nalu_hdr: NaluHeader,
    prev_hdr: SliceHeader,
}

/// Whether a slice starts a new primary coded picture compared to the
/// previous one, 7.4.1.2.4.
pub fn first_vcl_of_new_picture(
    sps: &Sps,
    prev_nalu: &NaluHeader,
    prev: &SliceHeader,
    nalu: &NaluHeader,
    sh: &SliceHeader,
) -> bool {
    if sh.frame_num != prev.frame_num || sh.pic_parameter_set_id != prev.pic_parameter_set_id {
        return true;
    }

    if !sps.frame_mbs_only_flag {
        if sh.field_pic_flag != prev.field_pic_flag {
            return true;
        }

        if sh.field_pic_flag && prev.field_pic_flag && sh.bottom_field_flag != prev.bottom_field_flag
        {
            return true;
        }
    }

    if (nalu.nal_ref_idc == 0) != (prev_nalu.nal_ref_idc == 0) {
        return true;
    }

    match sps.pic_order_cnt_type {
        0 if sh.pic_order_cnt_lsb != prev.pic_order_cnt_lsb
            || sh.delta_pic_order_cnt_bottom != prev.delta_pic_order_cnt_bottom =>
        {
            return true
        }
        1 if sh.delta_pic_order_cnt != prev.delta_pic_order_cnt => return true,
        _ => (),
    }

    if nalu.idr_pic_flag() != prev_nalu.idr_pic_flag() {
        return true;
    }

    nalu.idr_pic_flag() && sh.idr_pic_id != prev.idr_pic_id
}

/// The decoding context.
#[derive(Debug, Default)]
pub struct Ctx {
    sps_table: Vec<Option<Rc<Sps>>>,
    pps_table: Vec<Option<Rc<Pps>>>,

    sps: Option<Rc<Sps>>,
    pps: Option<Rc<Pps>>,
    sps_derived: SpsDerived,
    slice_derived: SliceDerived,

    nalu: NaluState,
    aud: Aud,
    sei_table: Vec<Sei>,
    slice: SliceState,

    /// The macroblock being parsed or written.
    pub(crate) mb: Box<Macroblock>,
}

impl Ctx {
    pub fn new() -> Self {
        Self {
            sps_table: vec![None; MAX_SPS_COUNT],
            pps_table: vec![None; MAX_PPS_COUNT],
            ..Default::default()
        }
    }

    /// Drops every parameter set and all the NAL unit state.
    pub fn clear(&mut self) {
        *self = Self::new();
    }

    /// Resets the state of the current NAL unit. The parameter sets are
    /// kept, and so is what the access unit detection needs of the previous
    /// NAL unit.
    pub fn clear_nalu(&mut self) {
        self.nalu = NaluState {
            is_prev_vcl: self.nalu.is_prev_vcl,
            is_prev_filler: self.nalu.is_prev_filler,
            ..Default::default()
        };
        self.aud = Aud::default();
        self.clear_sei();
        self.clear_slice();
    }

    pub fn set_nalu_header(&mut self, hdr: NaluHeader) {
        self.nalu.hdr = hdr;
    }

    pub fn nalu_header(&self) -> &NaluHeader {
        &self.nalu.hdr
    }

    pub fn nalu_type(&self) -> NaluType {
        self.nalu.hdr.type_()
    }

    pub fn is_nalu_unknown(&self) -> bool {
        self.nalu.unknown
    }

    pub(crate) fn set_nalu_unknown(&mut self) {
        self.nalu.unknown = true;
    }

    /// Whether the current slice is the first VCL NAL unit of a new primary
    /// coded picture.
    pub fn is_first_vcl(&self) -> bool {
        self.nalu.is_first_vcl
    }

    pub fn is_prev_vcl(&self) -> bool {
        self.nalu.is_prev_vcl
    }

    /// Records the type of the NAL unit that was just processed, for the
    /// access unit detection of the next one.
    pub(crate) fn end_nalu(&mut self) {
        let type_ = self.nalu.hdr.type_();
        self.nalu.is_prev_vcl = matches!(type_, NaluType::Slice | NaluType::SliceIdr);
        self.nalu.is_prev_filler = type_ == NaluType::Filler;
    }

    pub fn sps(&self) -> Option<&Rc<Sps>> {
        self.sps.as_ref()
    }

    pub fn pps(&self) -> Option<&Rc<Pps>> {
        self.pps.as_ref()
    }

    pub fn sps_by_id(&self, id: u8) -> Option<&Rc<Sps>> {
        self.sps_table.get(id as usize).and_then(Option::as_ref)
    }

    pub fn pps_by_id(&self, id: u8) -> Option<&Rc<Pps>> {
        self.pps_table.get(id as usize).and_then(Option::as_ref)
    }

    pub fn sps_derived(&self) -> &SpsDerived {
        &self.sps_derived
    }

    pub fn slice_derived(&self) -> &SliceDerived {
        &self.slice_derived
    }

    /// Stores `sps` in its table slot and makes it the active SPS.
    pub fn set_sps(&mut self, sps: Sps) -> Result<()> {
        let id = sps.seq_parameter_set_id as usize;
        let slot = self
            .sps_table
            .get_mut(id)
            .ok_or_else(|| H264Error::invalid(format!("invalid seq_parameter_set_id {}", id)))?;

        let sps = Rc::new(sps);
        *slot = Some(Rc::clone(&sps));
        self.activate_sps(sps);
        Ok(())
    }

    /// Stores `pps` in its table slot and makes it the active PPS. The active
    /// SPS is left untouched.
    pub fn set_pps(&mut self, pps: Pps) -> Result<()> {
        let id = pps.pic_parameter_set_id as usize;
        let slot = self
            .pps_table
            .get_mut(id)
            .ok_or_else(|| H264Error::invalid(format!("invalid pic_parameter_set_id {}", id)))?;

        let pps = Rc::new(pps);
        *slot = Some(Rc::clone(&pps));
        self.pps = Some(pps);
        self.update_slice_derived();
        Ok(())
    }

    pub fn set_active_sps(&mut self, id: u32) -> Result<()> {
        if id as usize >= MAX_SPS_COUNT {
            return Err(H264Error::invalid(format!("invalid seq_parameter_set_id {}", id)));
        }

        let sps = self
            .sps_by_id(id as u8)
            .cloned()
            .ok_or_else(|| H264Error::protocol(format!("unknown SPS {}", id)))?;
        self.activate_sps(sps);
        Ok(())
    }

    /// Activates a PPS and the SPS it refers to.
    pub fn set_active_pps(&mut self, id: u32) -> Result<()> {
        if id as usize >= MAX_PPS_COUNT {
            return Err(H264Error::invalid(format!("invalid pic_parameter_set_id {}", id)));
        }

        let pps = self
            .pps_by_id(id as u8)
            .cloned()
            .ok_or_else(|| H264Error::protocol(format!("unknown PPS {}", id)))?;
        let sps_id = pps.seq_parameter_set_id as u32;
        self.pps = Some(pps);
        self.set_active_sps(sps_id)
    }

    fn activate_sps(&mut self, sps: Rc<Sps>) {
        self.sps_derived = SpsDerived::new(&sps);
        self.sps = Some(sps);
        self.update_slice_derived();
    }

    fn update_slice_derived(&mut self) {
        let (Some(sps), Some(pps)) = (&self.sps, &self.pps) else {
            return;
        };

        let sh = &self.slice.hdr;
        let sd = &self.sps_derived;
        let field = sh.field_pic_flag as u32;
        let pic_height_in_mbs = sd.frame_height_in_mbs / (1 + field);
        let slice_group_change_rate = pps.slice_group_change_rate_minus1.saturating_add(1);

        self.slice_derived = SliceDerived {
            mbaff_frame_flag: sps.mb_adaptive_frame_field_flag && !sh.field_pic_flag,
            pic_height_in_mbs,
            pic_height_in_samples_luma: pic_height_in_mbs * 16,
            pic_height_in_samples_chroma: pic_height_in_mbs * sd.mb_height_c,
            pic_size_in_mbs: sd.pic_width_in_mbs.saturating_mul(pic_height_in_mbs),
            max_pic_num: sd.max_frame_num << field,
            curr_pic_num: if sh.field_pic_flag {
                2 * sh.frame_num as u32 + 1
            } else {
                sh.frame_num as u32
            },
            slice_qp_luma: 26 + pps.pic_init_qp_minus26 as i32 + sh.slice_qp_delta as i32,
            qs_luma: 26 + pps.pic_init_qs_minus26 as i32 + sh.slice_qs_delta as i32,
            filter_offset_a: (sh.slice_alpha_c0_offset_div2 as i32) << 1,
            filter_offset_b: (sh.slice_beta_offset_div2 as i32) << 1,
            slice_group_change_rate,
            map_units_in_slice_group0: sh
                .slice_group_change_cycle
                .saturating_mul(slice_group_change_rate)
                .min(sd.pic_size_in_map_units),
        };
    }

    pub fn aud(&self) -> &Aud {
        &self.aud
    }

    pub fn set_aud(&mut self, aud: Aud) {
        self.aud = aud;
    }

    pub fn sei_list(&self) -> &[Sei] {
        &self.sei_table
    }

    /// Appends a SEI message built by the caller. Its payload is encoded
    /// right away so that the message is written back from its raw bytes
    /// like a parsed one.
    pub fn add_sei(&mut self, payload: SeiPayload) -> Result<()> {
        if let SeiPayload::Unknown(payload_type) = payload {
            return Err(H264Error::invalid(format!(
                "SEI payload type {} has no structured syntax",
                payload_type
            )));
        }

        let mut payload = payload;
        let mut w = NaluWriter::new(false);
        {
            let mut ops = WriteOps::new(&mut w);
            syntax::sei_payload(&mut ops, self, &mut payload)?;
            ops.payload_alignment()?;
        }

        let raw = w.into_vec()?;
        self.sei_table.push(Sei { payload, raw });
        Ok(())
    }

    /// Appends a SEI message from its encoded payload. Nothing is parsed.
    pub fn add_sei_raw(&mut self, payload_type: u32, raw: Vec<u8>) {
        self.sei_table.push(Sei {
            payload: SeiPayload::Unknown(payload_type),
            raw,
        });
    }

    pub(crate) fn push_sei(&mut self, sei: Sei) {
        self.sei_table.push(sei);
    }

    pub fn clear_sei(&mut self) {
        self.sei_table.clear();
    }

    /// Converts the first clock timestamp of a picture timing message to
    /// units of the active SPS `time_scale`, D.2.3.
    pub fn pic_timing_to_ts(&self, sei: &SeiPicTiming) -> Result<u64> {
        let sps = self.sps.as_ref().ok_or_else(|| H264Error::protocol("no active SPS"))?;
        let vui = &sps.vui_parameters;
        if vui.time_scale == 0 || vui.num_units_in_tick == 0 {
            return Err(H264Error::protocol("no timing information in the active SPS"));
        }

        let ts = sei
            .clock_timestamps
            .first()
            .ok_or_else(|| H264Error::invalid("no clock timestamp"))?;

        let seconds =
            (ts.hours_value as u64 * 60 + ts.minutes_value as u64) * 60 + ts.seconds_value as u64;
        let ticks = ts.n_frames as u64
            * (vui.num_units_in_tick as u64 * (1 + ts.nuit_field_based_flag as u64));
        let clock = seconds * vui.time_scale as u64 + ticks;

        Ok(if ts.time_offset < 0 {
            clock.saturating_sub(ts.time_offset.unsigned_abs() as u64)
        } else {
            clock + ts.time_offset as u64
        })
    }

    /// Same as [`Ctx::pic_timing_to_ts`], in microseconds.
    pub fn pic_timing_to_us(&self, sei: &SeiPicTiming) -> Result<u64> {
        let ts = self.pic_timing_to_ts(sei)?;
        // pic_timing_to_ts() checked it.
        let time_scale = self.sps.as_ref().map_or(1, |sps| sps.vui_parameters.time_scale) as u128;
        let us = (ts as u128 * 1_000_000 + time_scale / 2) / time_scale;
        u64::try_from(us).map_err(|_| {
            H264Error::protocol(format!("timestamp of {} ticks overflows in microseconds", ts))
        })
    }

    pub fn slice_header(&self) -> &SliceHeader {
        &self.slice.hdr
    }

    /// Sets the header of the current slice, activating its PPS. The slice
    /// state is reset, the derived variables and slice group map are
    /// recomputed and the slice is compared to the previous one to detect
    /// the start of a new picture.
    pub fn set_slice_header(&mut self, sh: SliceHeader) -> Result<()> {
        self.clear_slice();
        self.set_active_pps(sh.pic_parameter_set_id as u32)?;
        self.slice.hdr = sh;
        self.update_slice_derived();

        let prev_nalu = std::mem::replace(&mut self.slice.prev_nalu_hdr, self.nalu.hdr);
        let prev = std::mem::replace(&mut self.slice.prev_hdr, self.slice.hdr.clone());
        self.nalu.is_first_vcl = if !self.nalu.is_prev_vcl && !self.nalu.is_prev_filler {
            true
        } else {
            match &self.sps {
                Some(sps) => {
                    first_vcl_of_new_picture(sps, &prev_nalu, &prev, &self.nalu.hdr, &self.slice.hdr)
                }
                None => true,
            }
        };

        if self.pps.as_ref().map_or(false, |pps| pps.num_slice_groups_minus1 > 0) {
            self.gen_slice_group_map()?;
        }

        Ok(())
    }

    /// Swaps the header of the current slice for `sh`, keeping the slice
    /// data and the macroblocks. The PPS it names is activated.
    pub(crate) fn replace_slice_header(&mut self, sh: SliceHeader) -> Result<()> {
        self.set_active_pps(sh.pic_parameter_set_id as u32)?;
        self.slice.prev_hdr = sh.clone();
        self.slice.hdr = sh;
        self.update_slice_derived();
        Ok(())
    }

    /// Resets the slice header and every per-slice state.
    pub fn clear_slice(&mut self) {
        self.slice.hdr = SliceHeader::default();
        self.slice.hdr_len = 0;
        self.slice.raw = RawSliceData::default();
        self.slice.mb_table.clear();
        self.slice.group_map.clear();
        *self.mb = Macroblock::default();
        self.update_slice_derived();
    }

    /// Forgets the macroblocks parsed so far in the current slice.
    pub(crate) fn clear_macroblocks(&mut self) {
        self.slice.mb_table.clear();
        *self.mb = Macroblock::default();
    }

    pub fn slice_header_bit_len(&self) -> u64 {
        self.slice.hdr_len
    }

    pub(crate) fn set_slice_header_bit_len(&mut self, len: u64) {
        self.slice.hdr_len = len;
    }

    pub fn slice_data(&self) -> &RawSliceData {
        &self.slice.raw
    }

    pub fn set_slice_data(&mut self, raw: RawSliceData) {
        self.slice.raw = raw;
    }

    pub fn slice_group_map(&self) -> &SliceGroupMap {
        &self.slice.group_map
    }

    /// Regenerates the slice group map of the active PPS.
    pub fn gen_slice_group_map(&mut self) -> Result<()> {
        let pps = self.pps.as_ref().ok_or_else(|| H264Error::protocol("no active PPS"))?;
        self.slice.group_map.generate(
            pps,
            &self.sps_derived,
            self.slice_derived.map_units_in_slice_group0,
        )
    }

    /// Offset of `mb_addr` in the macroblock table, 7.4.4.
    fn mb_addr_off(&self, mb_addr: u32) -> Option<usize> {
        let first =
            self.slice.hdr.first_mb_in_slice * (1 + self.slice_derived.mbaff_frame_flag as u32);
        mb_addr.checked_sub(first).map(|off| off as usize)
    }

    /// Information about macroblock `mb_addr`, if it is available in the
    /// current slice.
    pub fn mb_info(&self, mb_addr: u32) -> Option<&MacroblockInfo> {
        self.mb_addr_off(mb_addr)
            .and_then(|off| self.slice.mb_table.get(off))
            .filter(|info| info.available)
    }

    pub(crate) fn mb_info_mut(&mut self, mb_addr: u32) -> Option<&mut MacroblockInfo> {
        let off = self.mb_addr_off(mb_addr)?;
        self.slice.mb_table.get_mut(off).filter(|info| info.available)
    }

    pub fn macroblock(&self) -> &Macroblock {
        &self.mb
    }

    pub fn macroblock_mut(&mut self) -> &mut Macroblock {
        &mut self.mb
    }

    /// Starts macroblock `mb_addr`: marks it available, resets the working
    /// macroblock and derives its neighbours and `mb_field_decoding_flag`.
    ///
    /// `field_flag` is the coded `mb_field_decoding_flag`, only allowed in
    /// MBAFF frames. When it is not coded it is inferred from the other
    /// macroblock of the pair or from the neighbouring pairs, 7.4.4.
    pub fn new_macroblock(
        &mut self,
        mb_addr: u32,
        skipped: bool,
        field_flag: Option<bool>,
    ) -> Result<()> {
        let off = self.mb_addr_off(mb_addr).ok_or_else(|| {
            H264Error::invalid(format!("macroblock {} is before the first of the slice", mb_addr))
        })?;

        *self.slice.mb_table.entry(off) = MacroblockInfo {
            available: true,
            skipped,
            ..Default::default()
        };

        *self.mb = Macroblock::default();
        self.mb.mb_addr = mb_addr;
        self.mb.mb_type = match (skipped, self.slice.hdr.kind()) {
            (false, _) => MbType::Unknown,
            (true, SliceType::B) => MbType::B_Skip,
            (true, _) => MbType::P_Skip,
        };
        let (a, b) = neighbour_mb_addrs(self, mb_addr);
        self.mb.mb_addr_a = a;
        self.mb.mb_addr_b = b;

        let top = off.checked_sub(1).and_then(|off| self.slice.mb_table.get(off).copied());
        let field = if !self.slice_derived.mbaff_frame_flag {
            if field_flag.is_some() {
                return Err(H264Error::invalid("mb_field_decoding_flag outside of an MBAFF frame"));
            }
            self.slice.hdr.field_pic_flag
        } else if skipped {
            match top {
                // The top macroblock waits for the bottom one.
                _ if mb_addr % 2 == 0 => false,
                Some(top) if !top.skipped => top.field_flag,
                _ => {
                    let neighbour = |addr: Option<u32>| addr.and_then(|a| self.mb_info(a));
                    let field = neighbour(a)
                        .or_else(|| neighbour(b))
                        .map_or(false, |info| info.field_flag);
                    self.set_top_field_flag(off, field);
                    field
                }
            }
        } else if mb_addr % 2 == 0 {
            field_flag.ok_or_else(|| {
                H264Error::invalid("missing mb_field_decoding_flag of a top macroblock")
            })?
        } else if let Some(field) = field_flag {
            if !top.map_or(false, |top| top.skipped) {
                return Err(H264Error::invalid(
                    "mb_field_decoding_flag coded twice in a macroblock pair",
                ));
            }
            self.set_top_field_flag(off, field);
            field
        } else {
            match top {
                Some(top) if !top.skipped => top.field_flag,
                _ => {
                    return Err(H264Error::invalid(
                        "missing mb_field_decoding_flag of a macroblock pair",
                    ))
                }
            }
        };

        self.mb.mb_field_decoding_flag = field;
        self.slice.mb_table.entry(off).field_flag = field;
        Ok(())
    }

    fn set_top_field_flag(&mut self, off: usize, field: bool) {
        if let Some(top) = off.checked_sub(1).and_then(|off| self.slice.mb_table.get_mut(off)) {
            top.field_flag = field;
        }
    }

    /// Copies what neighbouring macroblocks need to know of the working
    /// macroblock to its table entry.
    pub(crate) fn commit_macroblock(&mut self) {
        let mb = &self.mb;
        let Some(off) = self.mb_addr_off(mb.mb_addr) else {
            return;
        };

        if let Some(info) = self.slice.mb_table.get_mut(off) {
            info.mb_type = mb.mb_type;
            info.intra_chroma_pred_mode = mb.intra_chroma_pred_mode;
            info.cbp_luma = mb.cbp_luma;
            info.cbp_chroma = mb.cbp_chroma;
            info.transform_size_8x8_flag = mb.transform_size_8x8_flag;
            info.mb_qp_delta = mb.mb_qp_delta;
        }
    }

    /// The next macroblock address in the slice group of `mb_addr`, 8.2.2.
    /// Returns `PicSizeInMbs` past the last macroblock of the picture.
    pub fn next_mb_addr(&self, mb_addr: u32) -> u32 {
        let single_group = self.pps.as_ref().map_or(true, |pps| pps.num_slice_groups_minus1 == 0);
        if single_group || self.slice.group_map.is_empty() {
            return mb_addr + 1;
        }

        let (frame_mbs_only, mbaff) = (
            self.sps.as_ref().map_or(true, |sps| sps.frame_mbs_only_flag),
            self.slice_derived.mbaff_frame_flag,
        );
        let field_pic = self.slice.hdr.field_pic_flag;
        let group_of = |addr: u32| {
            self.slice.group_map.mb_to_slice_group(
                addr,
                &self.sps_derived,
                frame_mbs_only,
                field_pic,
                mbaff,
            )
        };

        let group = group_of(mb_addr);
        let mut next = mb_addr + 1;
        while next < self.slice_derived.pic_size_in_mbs && group_of(next) != group {
            next += 1;
        }

        if next >= self.slice_derived.pic_size_in_mbs {
            debug!("end of slice group {} after macroblock {}", group, mb_addr);
        }
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::h264::sei::ClockTimestamp;
    use crate::codec::h264::sei::SeiRecoveryPoint;

    fn sps(id: u8) -> Sps {
        Sps {
            profile_idc: 66,
            seq_parameter_set_id: id,
            pic_width_in_mbs_minus1: 19,
            pic_height_in_map_units_minus1: 10,
            frame_mbs_only_flag: true,
            ..Default::default()
        }
    }

    fn pps(id: u8, sps_id: u8) -> Pps {
        Pps {
            pic_parameter_set_id: id,
            seq_parameter_set_id: sps_id,
            ..Default::default()
        }
    }

    fn ctx_with_sets() -> Ctx {
        let mut ctx = Ctx::new();
        ctx.set_sps(sps(0)).unwrap();
        ctx.set_pps(pps(0, 0)).unwrap();
        ctx
    }

    #[test]
    fn sps_derived_variables() {
        let sd = SpsDerived::new(&sps(0));
        assert_eq!(sd.pic_width_in_samples_luma, 320);
        assert_eq!(sd.frame_height_in_mbs, 11);
        assert_eq!(sd.height, 176);
        assert_eq!(sd.width, 320);
        assert_eq!(sd.pic_size_in_map_units, 220);
        assert_eq!(sd.raw_mb_bits, 256 * 8 + 2 * 64 * 8);

        let cropped = SpsDerived::new(&Sps {
            frame_mbs_only_flag: false,
            frame_cropping_flag: true,
            frame_crop_left_offset: 2,
            frame_crop_right_offset: 3,
            frame_crop_bottom_offset: 1,
            ..sps(0)
        });
        assert_eq!(cropped.crop_unit_y, 4);
        assert_eq!(cropped.frame_height_in_mbs, 22);
        assert_eq!(cropped.width, 320 - 2 * 5);
        assert_eq!(cropped.height, 22 * 16 - 4);

        let mono = SpsDerived::new(&Sps {
            profile_idc: 100,
            chroma_format_idc: 0,
            frame_cropping_flag: true,
            frame_crop_left_offset: 3,
            frame_crop_top_offset: 2,
            ..sps(0)
        });
        assert_eq!(mono.chroma_array_type, 0);
        assert_eq!((mono.crop_unit_x, mono.crop_unit_y), (1, 1));
        assert_eq!(mono.width, 320 - 3);
        assert_eq!(mono.height, 176 - 2);
    }

    #[test]
    fn parameter_set_tables() {
        let mut ctx = Ctx::new();
        assert!(matches!(ctx.set_sps(sps(32)), Err(H264Error::InvalidArgument(_))));
        assert!(matches!(ctx.set_active_pps(3), Err(H264Error::Protocol(_))));

        ctx.set_sps(sps(1)).unwrap();
        ctx.set_sps(Sps {
            pic_width_in_mbs_minus1: 39,
            ..sps(2)
        })
        .unwrap();
        assert_eq!(ctx.sps_derived().pic_width_in_mbs, 40);

        ctx.set_pps(pps(7, 1)).unwrap();
        ctx.set_active_pps(7).unwrap();
        assert_eq!(ctx.sps().unwrap().seq_parameter_set_id, 1);
        assert_eq!(ctx.sps_derived().pic_width_in_mbs, 20);

        ctx.set_pps(pps(8, 5)).unwrap();
        assert!(ctx.set_active_pps(8).is_err());
    }

    #[test]
    fn slice_derived_variables() {
        let mut ctx = Ctx::new();
        ctx.set_sps(Sps {
            frame_mbs_only_flag: false,
            mb_adaptive_frame_field_flag: true,
            ..sps(0)
        })
        .unwrap();
        ctx.set_pps(Pps {
            pic_init_qp_minus26: -4,
            ..pps(0, 0)
        })
        .unwrap();

        ctx.set_slice_header(SliceHeader {
            slice_qp_delta: 2,
            frame_num: 3,
            ..Default::default()
        })
        .unwrap();
        let d = ctx.slice_derived();
        assert!(d.mbaff_frame_flag);
        assert_eq!(d.pic_height_in_mbs, 22);
        assert_eq!(d.pic_size_in_mbs, 440);
        assert_eq!(d.slice_qp_luma, 24);
        assert_eq!(d.curr_pic_num, 3);

        ctx.set_slice_header(SliceHeader {
            field_pic_flag: true,
            frame_num: 3,
            ..Default::default()
        })
        .unwrap();
        let d = ctx.slice_derived();
        assert!(!d.mbaff_frame_flag);
        assert_eq!(d.pic_height_in_mbs, 11);
        assert_eq!(d.curr_pic_num, 7);
        assert_eq!(d.max_pic_num, 32);
    }

    #[test]
    fn access_unit_boundaries() {
        let sps = sps(0);
        let nalu = NaluHeader {
            forbidden_zero_bit: false,
            nal_ref_idc: 3,
            nal_unit_type: 1,
        };
        let prev = SliceHeader {
            frame_num: 1,
            ..Default::default()
        };

        assert!(!first_vcl_of_new_picture(&sps, &nalu, &prev, &nalu, &prev.clone()));

        let next = SliceHeader {
            frame_num: 2,
            ..Default::default()
        };
        assert!(first_vcl_of_new_picture(&sps, &nalu, &prev, &nalu, &next));

        let non_ref = NaluHeader {
            nal_ref_idc: 0,
            ..nalu
        };
        assert!(first_vcl_of_new_picture(&sps, &nalu, &prev, &non_ref, &prev));
        let lower_ref = NaluHeader {
            nal_ref_idc: 1,
            ..nalu
        };
        assert!(!first_vcl_of_new_picture(&sps, &nalu, &prev, &lower_ref, &prev));

        let poc = SliceHeader {
            pic_order_cnt_lsb: 4,
            ..prev.clone()
        };
        assert!(first_vcl_of_new_picture(&sps, &nalu, &prev, &nalu, &poc));

        let idr = NaluHeader {
            nal_unit_type: 5,
            ..nalu
        };
        assert!(first_vcl_of_new_picture(&sps, &nalu, &prev, &idr, &prev));
        let other_idr = SliceHeader {
            idr_pic_id: 1,
            ..prev.clone()
        };
        assert!(first_vcl_of_new_picture(&sps, &idr, &prev, &idr, &other_idr));
    }

    #[test]
    fn first_vcl_tracking() {
        let mut ctx = ctx_with_sets();
        let slice = NaluHeader {
            forbidden_zero_bit: false,
            nal_ref_idc: 3,
            nal_unit_type: 1,
        };

        ctx.clear_nalu();
        ctx.set_nalu_header(slice);
        ctx.set_slice_header(SliceHeader::default()).unwrap();
        assert!(ctx.is_first_vcl());
        ctx.end_nalu();

        ctx.clear_nalu();
        ctx.set_nalu_header(slice);
        ctx.set_slice_header(SliceHeader {
            first_mb_in_slice: 100,
            ..Default::default()
        })
        .unwrap();
        assert!(!ctx.is_first_vcl());
        ctx.end_nalu();

        ctx.clear_nalu();
        ctx.set_nalu_header(slice);
        ctx.set_slice_header(SliceHeader {
            frame_num: 1,
            ..Default::default()
        })
        .unwrap();
        assert!(ctx.is_first_vcl());
    }

    #[test]
    fn macroblock_table() {
        let mut ctx = ctx_with_sets();
        ctx.set_slice_header(SliceHeader {
            first_mb_in_slice: 21,
            slice_type: 0,
            ..Default::default()
        })
        .unwrap();

        assert!(ctx.new_macroblock(20, false, None).is_err());
        assert!(ctx.new_macroblock(21, false, Some(true)).is_err());

        ctx.new_macroblock(21, false, None).unwrap();
        assert_eq!(ctx.macroblock().mb_addr_a, None);
        assert_eq!(ctx.macroblock().mb_addr_b, None);
        ctx.new_macroblock(22, true, None).unwrap();
        assert_eq!(ctx.macroblock().mb_addr_a, Some(21));
        assert_eq!(ctx.macroblock().mb_type, MbType::P_Skip);

        ctx.new_macroblock(41, false, None).unwrap();
        assert_eq!(ctx.macroblock().mb_addr_a, None);
        assert_eq!(ctx.macroblock().mb_addr_b, Some(21));
        ctx.new_macroblock(42, false, None).unwrap();
        assert_eq!(ctx.macroblock().mb_addr_a, Some(41));
        assert_eq!(ctx.macroblock().mb_addr_b, Some(22));

        assert!(ctx.mb_info(22).unwrap().skipped);
        assert!(ctx.mb_info(23).is_none());
        assert!(ctx.mb_info(0).is_none());
        assert_eq!(ctx.next_mb_addr(42), 43);

        ctx.clear_slice();
        assert!(ctx.mb_info(0).is_none());
    }

    #[test]
    fn mbaff_field_inference() {
        let mut ctx = Ctx::new();
        ctx.set_sps(Sps {
            frame_mbs_only_flag: false,
            mb_adaptive_frame_field_flag: true,
            ..sps(0)
        })
        .unwrap();
        ctx.set_pps(pps(0, 0)).unwrap();
        ctx.set_slice_header(SliceHeader::default()).unwrap();

        // Top coded, bottom inferred.
        assert!(ctx.new_macroblock(0, false, None).is_err());
        ctx.new_macroblock(0, false, Some(true)).unwrap();
        ctx.new_macroblock(1, false, None).unwrap();
        assert!(ctx.macroblock().mb_field_decoding_flag);

        // Top skipped, flag coded with the bottom one.
        ctx.new_macroblock(2, true, None).unwrap();
        ctx.new_macroblock(3, false, Some(true)).unwrap();
        assert!(ctx.mb_info(2).unwrap().field_flag);

        // Both skipped, inferred from the left pair.
        ctx.new_macroblock(4, true, None).unwrap();
        ctx.new_macroblock(5, true, None).unwrap();
        assert!(ctx.macroblock().mb_field_decoding_flag);
        assert!(ctx.mb_info(4).unwrap().field_flag);

        // Coded twice.
        ctx.new_macroblock(6, false, Some(false)).unwrap();
        assert!(ctx.new_macroblock(7, false, Some(false)).is_err());
    }

    #[test]
    fn sei_table() {
        let mut ctx = Ctx::new();
        ctx.add_sei(SeiPayload::RecoveryPoint(SeiRecoveryPoint {
            recovery_frame_cnt: 0,
            exact_match_flag: true,
            broken_link_flag: false,
            changing_slice_group_idc: 0,
        }))
        .unwrap();
        ctx.add_sei_raw(100, vec![1, 2, 3]);
        assert!(ctx.add_sei(SeiPayload::Unknown(5)).is_err());

        let list = ctx.sei_list();
        assert_eq!(list.len(), 2);
        // ue(0) '1' '0' u(2) 0, then the stop bit: 1100 0100.
        assert_eq!(list[0].raw, [0xc4]);
        assert_eq!(list[1].payload_type(), 100);

        ctx.clear_nalu();
        assert!(ctx.sei_list().is_empty());
    }

    #[test]
    fn pic_timing_timestamps() {
        let mut ctx = Ctx::new();
        let mut sps = sps(0);
        sps.vui_parameters.time_scale = 60000;
        sps.vui_parameters.num_units_in_tick = 1001;

        let sei = SeiPicTiming {
            clock_timestamps: vec![ClockTimestamp {
                clock_timestamp_flag: true,
                seconds_value: 2,
                n_frames: 3,
                time_offset: -5,
                ..Default::default()
            }],
            ..Default::default()
        };
        assert!(ctx.pic_timing_to_ts(&sei).is_err());

        ctx.set_sps(sps).unwrap();
        let ts = 2 * 60000 + 3 * 1001 - 5;
        assert_eq!(ctx.pic_timing_to_ts(&sei).unwrap(), ts);
        assert_eq!(
            ctx.pic_timing_to_us(&sei).unwrap(),
            (ts * 1_000_000 + 30000) / 60000
        );
    }

    #[test]
    fn pic_timing_with_a_large_time_scale() {
        let mut ctx = Ctx::new();
        let mut sps = sps(0);
        sps.vui_parameters.time_scale = 4_000_000_000;
        sps.vui_parameters.num_units_in_tick = 1;
        ctx.set_sps(sps).unwrap();

        let sei = SeiPicTiming {
            clock_timestamps: vec![ClockTimestamp {
                clock_timestamp_flag: true,
                hours_value: 23,
                minutes_value: 59,
                seconds_value: 59,
                ..Default::default()
            }],
            ..Default::default()
        };
        assert_eq!(ctx.pic_timing_to_ts(&sei).unwrap(), 86399 * 4_000_000_000);
        assert_eq!(ctx.pic_timing_to_us(&sei).unwrap(), 86399 * 1_000_000);
    }
}
