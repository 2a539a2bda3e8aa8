// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Syntax structure traversals shared by the reader, the writer and the dump.
//!
//! Every syntax structure of the NAL unit layer is described once, as a
//! function generic over a [`SyntaxOps`] implementation. Reading fills the
//! record from a [`NaluReader`], writing emits the record to a [`NaluWriter`]
//! and dumping reports every field to a structured sink. Because the three
//! share a single description of the syntax, a record that was read is
//! written back to the same bits.

use std::rc::Rc;

use crate::codec::h264::ctx::Ctx;
use crate::codec::h264::error::H264Error;
use crate::codec::h264::error::Result;
use crate::codec::h264::headers::Aud;
use crate::codec::h264::headers::HrdParams;
use crate::codec::h264::headers::NaluHeader;
use crate::codec::h264::headers::Pps;
use crate::codec::h264::headers::PredWeight;
use crate::codec::h264::headers::PredWeightTable;
use crate::codec::h264::headers::RefPicListModification;
use crate::codec::h264::headers::RefPicListModifications;
use crate::codec::h264::headers::RefPicMarking;
use crate::codec::h264::headers::ScalingMatrix;
use crate::codec::h264::headers::SliceHeader;
use crate::codec::h264::headers::Sps;
use crate::codec::h264::headers::VuiParams;
use crate::codec::h264::headers::DEFAULT_4X4_INTER;
use crate::codec::h264::headers::DEFAULT_4X4_INTRA;
use crate::codec::h264::headers::DEFAULT_8X8_INTER;
use crate::codec::h264::headers::DEFAULT_8X8_INTRA;
use crate::codec::h264::headers::MAX_CPB_COUNT;
use crate::codec::h264::headers::MAX_DRPM_COUNT;
use crate::codec::h264::headers::MAX_REF_IDX_ACTIVE;
use crate::codec::h264::headers::MAX_RPLM_COUNT;
use crate::codec::h264::headers::MAX_SLICE_GROUPS;
use crate::codec::h264::headers::MAX_SPS_COUNT;
use crate::codec::h264::nalu_reader::NaluReader;
use crate::codec::h264::nalu_writer::NaluWriter;
use crate::codec::h264::sei::ClockTimestamp;
use crate::codec::h264::sei::InitialCpbRemoval;
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
use crate::codec::h264::sei::MAX_PAN_SCAN_RECTS;
use crate::codec::h264::sei::NUM_CLOCK_TS;
use crate::codec::h264::types::SliceType;

/// Largest picture of any level, in macroblocks. Bounds the map unit count
/// of explicit slice group maps.
const MAX_PIC_SIZE_IN_MBS: u32 = 139264;

/// Ceil(Log2(value)).
pub(crate) fn ceil_log2(value: u32) -> u32 {
    if value <= 1 {
        0
    } else {
        32 - (value - 1).leading_zeros()
    }
}

/// A value that a syntax element can be stored in.
pub trait SyntaxValue: Copy {
    fn from_bits(bits: u32) -> Option<Self>;
    fn from_signed(value: i32) -> Option<Self>;
    fn to_bits(self) -> Option<u32>;
    fn to_signed(self) -> Option<i32>;
    fn to_i64(self) -> i64;
}

macro_rules! impl_syntax_value {
    ($($t:ty),*) => {
        $(
            impl SyntaxValue for $t {
                fn from_bits(bits: u32) -> Option<Self> {
                    Self::try_from(bits).ok()
                }

                fn from_signed(value: i32) -> Option<Self> {
                    Self::try_from(value).ok()
                }

                fn to_bits(self) -> Option<u32> {
                    u32::try_from(self).ok()
                }

                fn to_signed(self) -> Option<i32> {
                    i32::try_from(self).ok()
                }

                fn to_i64(self) -> i64 {
                    self as i64
                }
            }
        )*
    };
}

impl_syntax_value!(u8, u16, u32, i8, i16, i32);

impl SyntaxValue for bool {
    fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            0 => Some(false),
            1 => Some(true),
            _ => None,
        }
    }

    fn from_signed(value: i32) -> Option<Self> {
        u32::try_from(value).ok().and_then(Self::from_bits)
    }

    fn to_bits(self) -> Option<u32> {
        Some(self as u32)
    }

    fn to_signed(self) -> Option<i32> {
        Some(self as i32)
    }

    fn to_i64(self) -> i64 {
        self as i64
    }
}

fn out_of_range(name: &str, value: i64) -> H264Error {
    H264Error::protocol(format!("{} out of range: {}", name, value))
}

/// What a [`SyntaxOps`] does with the syntax elements it visits.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpKind {
    Read,
    Write,
    Dump,
}

/// The operations a syntax traversal performs on each element.
///
/// The element accessors take the element name, used by the dump and in
/// error messages, and a mutable reference to its storage: reading fills it
/// and writing or dumping consumes it.
pub trait SyntaxOps {
    fn kind(&self) -> OpKind;

    /// Whether the elements are taken from a bitstream. Records are filled
    /// and their lists resized as the traversal goes.
    fn is_reading(&self) -> bool {
        self.kind() == OpKind::Read
    }

    /// `u(n)`, or `f(n)` for fixed patterns.
    fn u<T: SyntaxValue>(&mut self, name: &str, value: &mut T, num_bits: u32) -> Result<()>;
    /// `i(n)`.
    fn i<T: SyntaxValue>(&mut self, name: &str, value: &mut T, num_bits: u32) -> Result<()>;
    fn ue<T: SyntaxValue>(&mut self, name: &str, value: &mut T) -> Result<()>;
    fn se<T: SyntaxValue>(&mut self, name: &str, value: &mut T) -> Result<()>;
    /// `te(v)` with the given range maximum.
    fn te<T: SyntaxValue>(&mut self, name: &str, value: &mut T, max: u32) -> Result<()>;
    /// A SEI payload type or size, coded as a run of `0xff` bytes.
    fn ff_coded(&mut self, name: &str, value: &mut u32) -> Result<()>;

    fn flag(&mut self, name: &str, value: &mut bool) -> Result<()> {
        self.u(name, value, 1)
    }

    /// Reads bits that are not a syntax element by themselves, such as the
    /// VLC codes of residual blocks.
    fn read_raw_bits(&mut self, _num_bits: u32) -> Result<u32> {
        Err(H264Error::unsupported("raw bit access on a non reading traversal"))
    }

    fn begin_struct(&mut self, _name: &str) {}
    fn end_struct(&mut self) {}
    fn begin_array(&mut self, _name: &str) {}
    fn end_array(&mut self) {}
    fn begin_item(&mut self) {}
    fn end_item(&mut self) {}
    /// Reports a value derived during the traversal, not coded as such.
    fn field(&mut self, _name: &str, _value: i64) {}

    /// more_rbsp_data( ). Traversals that do not read return `present`, the
    /// value recorded when the structure was read.
    fn more_rbsp_data(&mut self, present: bool) -> bool;
    fn rbsp_trailing_bits(&mut self) -> Result<()>;
    fn byte_aligned(&self) -> bool;

    /// The remaining bytes of a SEI payload.
    fn bytes(&mut self, name: &str, data: &mut Vec<u8>) -> Result<()>;

    /// Brings a SEI payload to a byte boundary: the reader skips the
    /// alignment bits and the writer emits them.
    fn payload_alignment(&mut self) -> Result<()>;
}

/// Reads syntax elements from a bitstream.
pub struct ReadOps<'a> {
    pub(crate) reader: NaluReader<'a>,
}

impl<'a> ReadOps<'a> {
    pub fn new(reader: NaluReader<'a>) -> Self {
        Self { reader }
    }

    pub fn reader(&self) -> &NaluReader<'a> {
        &self.reader
    }

    pub fn into_reader(self) -> NaluReader<'a> {
        self.reader
    }
}

impl<'a> SyntaxOps for ReadOps<'a> {
    fn kind(&self) -> OpKind {
        OpKind::Read
    }

    fn u<T: SyntaxValue>(&mut self, name: &str, value: &mut T, num_bits: u32) -> Result<()> {
        let bits = self.reader.read_bits(num_bits)?;
        *value = T::from_bits(bits).ok_or_else(|| out_of_range(name, bits as i64))?;
        Ok(())
    }

    fn i<T: SyntaxValue>(&mut self, name: &str, value: &mut T, num_bits: u32) -> Result<()> {
        let v = self.reader.read_bits_signed(num_bits)?;
        *value = T::from_signed(v).ok_or_else(|| out_of_range(name, v as i64))?;
        Ok(())
    }

    fn ue<T: SyntaxValue>(&mut self, name: &str, value: &mut T) -> Result<()> {
        let v = self.reader.read_ue()?;
        *value = T::from_bits(v).ok_or_else(|| out_of_range(name, v as i64))?;
        Ok(())
    }

    fn se<T: SyntaxValue>(&mut self, name: &str, value: &mut T) -> Result<()> {
        let v = self.reader.read_se()?;
        *value = T::from_signed(v).ok_or_else(|| out_of_range(name, v as i64))?;
        Ok(())
    }

    fn te<T: SyntaxValue>(&mut self, name: &str, value: &mut T, max: u32) -> Result<()> {
        let v = self.reader.read_te(max)?;
        *value = T::from_bits(v).ok_or_else(|| out_of_range(name, v as i64))?;
        Ok(())
    }

    fn ff_coded(&mut self, _name: &str, value: &mut u32) -> Result<()> {
        *value = self.reader.read_ff_coded()?;
        Ok(())
    }

    fn read_raw_bits(&mut self, num_bits: u32) -> Result<u32> {
        self.reader.read_bits(num_bits)
    }

    fn more_rbsp_data(&mut self, _present: bool) -> bool {
        self.reader.has_more_rbsp_data()
    }

    fn rbsp_trailing_bits(&mut self) -> Result<()> {
        self.reader.read_rbsp_trailing_bits()
    }

    fn byte_aligned(&self) -> bool {
        self.reader.byte_aligned()
    }

    fn bytes(&mut self, _name: &str, data: &mut Vec<u8>) -> Result<()> {
        *data = self.reader.read_remaining_bytes()?;
        Ok(())
    }

    fn payload_alignment(&mut self) -> Result<()> {
        while !self.reader.byte_aligned() {
            self.reader.read_bit()?;
        }
        Ok(())
    }
}

/// Writes syntax elements to a bitstream.
pub struct WriteOps<'a, 'w> {
    writer: &'a mut NaluWriter<'w>,
}

impl<'a, 'w> WriteOps<'a, 'w> {
    pub fn new(writer: &'a mut NaluWriter<'w>) -> Self {
        Self { writer }
    }

    pub fn writer(&self) -> &NaluWriter<'w> {
        self.writer
    }
}

impl<'a, 'w> SyntaxOps for WriteOps<'a, 'w> {
    fn kind(&self) -> OpKind {
        OpKind::Write
    }

    fn u<T: SyntaxValue>(&mut self, name: &str, value: &mut T, num_bits: u32) -> Result<()> {
        let bits = value.to_bits().ok_or_else(|| out_of_range(name, value.to_i64()))?;
        if num_bits < 32 && bits >> num_bits != 0 {
            return Err(out_of_range(name, bits as i64));
        }
        self.writer.write_bits(bits, num_bits)
    }

    fn i<T: SyntaxValue>(&mut self, name: &str, value: &mut T, num_bits: u32) -> Result<()> {
        let v = value.to_signed().ok_or_else(|| out_of_range(name, value.to_i64()))?;
        if num_bits == 0 || num_bits > 32 {
            return Err(H264Error::invalid(format!("{}: invalid bit count {}", name, num_bits)));
        }
        let half = 1i64 << (num_bits - 1);
        if (v as i64) < -half || (v as i64) >= half {
            return Err(out_of_range(name, v as i64));
        }
        self.writer.write_bits_signed(v, num_bits)
    }

    fn ue<T: SyntaxValue>(&mut self, name: &str, value: &mut T) -> Result<()> {
        let v = value.to_bits().ok_or_else(|| out_of_range(name, value.to_i64()))?;
        self.writer.write_ue(v)
    }

    fn se<T: SyntaxValue>(&mut self, name: &str, value: &mut T) -> Result<()> {
        let v = value.to_signed().ok_or_else(|| out_of_range(name, value.to_i64()))?;
        self.writer.write_se(v)
    }

    fn te<T: SyntaxValue>(&mut self, name: &str, value: &mut T, max: u32) -> Result<()> {
        let v = value.to_bits().ok_or_else(|| out_of_range(name, value.to_i64()))?;
        if v > max {
            return Err(out_of_range(name, v as i64));
        }
        self.writer.write_te(v, max)
    }

    fn ff_coded(&mut self, _name: &str, value: &mut u32) -> Result<()> {
        self.writer.write_ff_coded(*value)
    }

    fn more_rbsp_data(&mut self, present: bool) -> bool {
        present
    }

    fn rbsp_trailing_bits(&mut self) -> Result<()> {
        self.writer.write_rbsp_trailing_bits()
    }

    fn byte_aligned(&self) -> bool {
        self.writer.byte_aligned()
    }

    fn bytes(&mut self, _name: &str, data: &mut Vec<u8>) -> Result<()> {
        for &byte in data.iter() {
            self.writer.write_bits(byte as u32, 8)?;
        }
        Ok(())
    }

    fn payload_alignment(&mut self) -> Result<()> {
        if !self.writer.byte_aligned() {
            self.writer.write_rbsp_trailing_bits()?;
        }
        Ok(())
    }
}

/// Gives a list the `n` entries the syntax calls for. Reading resizes it,
/// the other traversals need at least `n` entries to be present.
fn sized<O: SyntaxOps, T: Default + Clone>(
    ops: &O,
    name: &str,
    list: &mut Vec<T>,
    n: usize,
) -> Result<()> {
    if ops.is_reading() {
        list.clear();
        list.resize(n, T::default());
        Ok(())
    } else if list.len() < n {
        Err(H264Error::protocol(format!(
            "{} has {} entries, {} expected",
            name,
            list.len(),
            n
        )))
    } else {
        Ok(())
    }
}

fn check_max(name: &str, value: u32, max: u32) -> Result<()> {
    if value > max {
        Err(out_of_range(name, value as i64))
    } else {
        Ok(())
    }
}

/// 7.3.1 NAL unit header, without the extensions of types 14, 20 and 21.
pub fn nalu_header<O: SyntaxOps>(ops: &mut O, hdr: &mut NaluHeader) -> Result<()> {
    ops.flag("forbidden_zero_bit", &mut hdr.forbidden_zero_bit)?;
    if hdr.forbidden_zero_bit {
        return Err(H264Error::protocol("forbidden_zero_bit is set"));
    }
    ops.u("nal_ref_idc", &mut hdr.nal_ref_idc, 2)?;
    ops.u("nal_unit_type", &mut hdr.nal_unit_type, 5)
}

fn hrd<O: SyntaxOps>(ops: &mut O, hrd: &mut HrdParams) -> Result<()> {
    ops.ue("cpb_cnt_minus1", &mut hrd.cpb_cnt_minus1)?;
    check_max("cpb_cnt_minus1", hrd.cpb_cnt_minus1 as u32, MAX_CPB_COUNT as u32 - 1)?;
    ops.u("bit_rate_scale", &mut hrd.bit_rate_scale, 4)?;
    ops.u("cpb_size_scale", &mut hrd.cpb_size_scale, 4)?;

    let n = hrd.cpb_cnt_minus1 as usize + 1;
    sized(ops, "cpb", &mut hrd.cpb, n)?;
    ops.begin_array("cpb");
    for cpb in hrd.cpb[..n].iter_mut() {
        ops.begin_item();
        ops.ue("bit_rate_value_minus1", &mut cpb.bit_rate_value_minus1)?;
        ops.ue("cpb_size_value_minus1", &mut cpb.cpb_size_value_minus1)?;
        ops.flag("cbr_flag", &mut cpb.cbr_flag)?;
        ops.end_item();
    }
    ops.end_array();

    ops.u(
        "initial_cpb_removal_delay_length_minus1",
        &mut hrd.initial_cpb_removal_delay_length_minus1,
        5,
    )?;
    ops.u("cpb_removal_delay_length_minus1", &mut hrd.cpb_removal_delay_length_minus1, 5)?;
    ops.u("dpb_output_delay_length_minus1", &mut hrd.dpb_output_delay_length_minus1, 5)?;
    ops.u("time_offset_length", &mut hrd.time_offset_length, 5)
}

fn vui<O: SyntaxOps>(ops: &mut O, vui: &mut VuiParams) -> Result<()> {
    ops.flag("aspect_ratio_info_present_flag", &mut vui.aspect_ratio_info_present_flag)?;
    if vui.aspect_ratio_info_present_flag {
        ops.u("aspect_ratio_idc", &mut vui.aspect_ratio_idc, 8)?;
        // Extended_SAR
        if vui.aspect_ratio_idc == 255 {
            ops.u("sar_width", &mut vui.sar_width, 16)?;
            ops.u("sar_height", &mut vui.sar_height, 16)?;
        }
    }

    ops.flag("overscan_info_present_flag", &mut vui.overscan_info_present_flag)?;
    if vui.overscan_info_present_flag {
        ops.flag("overscan_appropriate_flag", &mut vui.overscan_appropriate_flag)?;
    }

    ops.flag("video_signal_type_present_flag", &mut vui.video_signal_type_present_flag)?;
    if vui.video_signal_type_present_flag {
        ops.u("video_format", &mut vui.video_format, 3)?;
        ops.flag("video_full_range_flag", &mut vui.video_full_range_flag)?;
        ops.flag("colour_description_present_flag", &mut vui.colour_description_present_flag)?;
        if vui.colour_description_present_flag {
            ops.u("colour_primaries", &mut vui.colour_primaries, 8)?;
            ops.u("transfer_characteristics", &mut vui.transfer_characteristics, 8)?;
            ops.u("matrix_coefficients", &mut vui.matrix_coefficients, 8)?;
        }
    }

    ops.flag("chroma_loc_info_present_flag", &mut vui.chroma_loc_info_present_flag)?;
    if vui.chroma_loc_info_present_flag {
        ops.ue("chroma_sample_loc_type_top_field", &mut vui.chroma_sample_loc_type_top_field)?;
        ops.ue(
            "chroma_sample_loc_type_bottom_field",
            &mut vui.chroma_sample_loc_type_bottom_field,
        )?;
        check_max(
            "chroma_sample_loc_type_top_field",
            vui.chroma_sample_loc_type_top_field as u32,
            5,
        )?;
        check_max(
            "chroma_sample_loc_type_bottom_field",
            vui.chroma_sample_loc_type_bottom_field as u32,
            5,
        )?;
    }

    ops.flag("timing_info_present_flag", &mut vui.timing_info_present_flag)?;
    if vui.timing_info_present_flag {
        ops.u("num_units_in_tick", &mut vui.num_units_in_tick, 32)?;
        ops.u("time_scale", &mut vui.time_scale, 32)?;
        ops.flag("fixed_frame_rate_flag", &mut vui.fixed_frame_rate_flag)?;
    }

    ops.flag("nal_hrd_parameters_present_flag", &mut vui.nal_hrd_parameters_present_flag)?;
    if vui.nal_hrd_parameters_present_flag {
        ops.begin_struct("nal_hrd");
        hrd(ops, &mut vui.nal_hrd_parameters)?;
        ops.end_struct();
    }

    ops.flag("vcl_hrd_parameters_present_flag", &mut vui.vcl_hrd_parameters_present_flag)?;
    if vui.vcl_hrd_parameters_present_flag {
        ops.begin_struct("vcl_hrd");
        hrd(ops, &mut vui.vcl_hrd_parameters)?;
        ops.end_struct();
    }

    if vui.nal_hrd_parameters_present_flag || vui.vcl_hrd_parameters_present_flag {
        ops.flag("low_delay_hrd_flag", &mut vui.low_delay_hrd_flag)?;
    }

    ops.flag("pic_struct_present_flag", &mut vui.pic_struct_present_flag)?;

    ops.flag("bitstream_restriction_flag", &mut vui.bitstream_restriction_flag)?;
    if vui.bitstream_restriction_flag {
        ops.flag(
            "motion_vectors_over_pic_boundaries_flag",
            &mut vui.motion_vectors_over_pic_boundaries_flag,
        )?;
        ops.ue("max_bytes_per_pic_denom", &mut vui.max_bytes_per_pic_denom)?;
        ops.ue("max_bits_per_mb_denom", &mut vui.max_bits_per_mb_denom)?;
        ops.ue("log2_max_mv_length_horizontal", &mut vui.log2_max_mv_length_horizontal)?;
        ops.ue("log2_max_mv_length_vertical", &mut vui.log2_max_mv_length_vertical)?;
        ops.ue("max_num_reorder_frames", &mut vui.max_num_reorder_frames)?;
        ops.ue("max_dec_frame_buffering", &mut vui.max_dec_frame_buffering)?;
    }

    Ok(())
}

/// 7.3.2.1.1.1 Scaling list syntax.
///
/// A list whose first delta gives a zero `nextScale` is read as the default
/// list `default` and flagged `use_default`. A list that ends with a zero
/// `nextScale` repeats its last coded value and is flagged `optimized`, in
/// which case the writer codes it again with its trailing run omitted.
fn scaling_list<O: SyntaxOps>(
    ops: &mut O,
    name: &str,
    list: &mut [u8],
    default: &[u8],
    use_default: &mut bool,
    optimized: &mut bool,
) -> Result<()> {
    let size = list.len();
    ops.begin_array(name);

    if ops.is_reading() {
        let mut last = 8i32;
        let mut next = 8i32;
        *use_default = false;
        *optimized = false;
        for j in 0..size {
            if next != 0 {
                let mut delta_scale = 0i32;
                ops.se("delta_scale", &mut delta_scale)?;
                if !(-128..=127).contains(&delta_scale) {
                    return Err(out_of_range("delta_scale", delta_scale as i64));
                }
                next = (last + delta_scale + 256) % 256;
                *use_default = j == 0 && next == 0;
                *optimized = j != 0 && next == 0;
            }
            list[j] = (if next == 0 { last } else { next }) as u8;
            last = list[j] as i32;
        }

        if *use_default {
            list.copy_from_slice(default);
        }
    } else if ops.kind() == OpKind::Write {
        let n = if *use_default {
            size
        } else if *optimized {
            list.windows(2).rev().take_while(|w| w[0] == w[1]).count()
        } else {
            0
        };

        let mut last = 8i32;
        let mut next = 8i32;
        for j in 0..size {
            if next == 0 {
                break;
            }
            next = if j < size - n { list[j] as i32 } else { 0 };
            let mut delta_scale = (next - last) as i8 as i32;
            ops.se("delta_scale", &mut delta_scale)?;
            last = list[j] as i32;
        }
    } else {
        for value in list.iter_mut() {
            ops.u(name, value, 8)?;
        }
    }

    ops.end_array();
    Ok(())
}

fn scaling_matrix<O: SyntaxOps>(ops: &mut O, m: &mut ScalingMatrix, count: usize) -> Result<()> {
    ops.begin_array("scaling_lists");
    for i in 0..count {
        ops.begin_item();
        ops.flag("scaling_list_present_flag", &mut m.scaling_list_present_flag[i])?;
        if m.scaling_list_present_flag[i] {
            if i < 6 {
                let default = if i < 3 {
                    &DEFAULT_4X4_INTRA
                } else {
                    &DEFAULT_4X4_INTER
                };
                scaling_list(
                    ops,
                    "scaling_list_4x4",
                    &mut m.scaling_list_4x4[i],
                    default,
                    &mut m.use_default_4x4[i],
                    &mut m.optimized_4x4[i],
                )?;
            } else {
                let default = if (i - 6) % 2 == 0 {
                    &DEFAULT_8X8_INTRA
                } else {
                    &DEFAULT_8X8_INTER
                };
                scaling_list(
                    ops,
                    "scaling_list_8x8",
                    &mut m.scaling_list_8x8[i - 6],
                    default,
                    &mut m.use_default_8x8[i - 6],
                    &mut m.optimized_8x8[i - 6],
                )?;
            }
        }
        ops.end_item();
    }
    ops.end_array();
    Ok(())
}

/// 7.3.2.1.1 Sequence parameter set RBSP.
pub fn sps<O: SyntaxOps>(ops: &mut O, sps: &mut Sps) -> Result<()> {
    ops.u("profile_idc", &mut sps.profile_idc, 8)?;
    ops.flag("constraint_set0_flag", &mut sps.constraint_set0_flag)?;
    ops.flag("constraint_set1_flag", &mut sps.constraint_set1_flag)?;
    ops.flag("constraint_set2_flag", &mut sps.constraint_set2_flag)?;
    ops.flag("constraint_set3_flag", &mut sps.constraint_set3_flag)?;
    ops.flag("constraint_set4_flag", &mut sps.constraint_set4_flag)?;
    ops.flag("constraint_set5_flag", &mut sps.constraint_set5_flag)?;
    ops.u("reserved_zero_2bits", &mut sps.reserved_zero_2bits, 2)?;
    ops.u("level_idc", &mut sps.level_idc, 8)?;
    ops.ue("seq_parameter_set_id", &mut sps.seq_parameter_set_id)?;
    check_max("seq_parameter_set_id", sps.seq_parameter_set_id as u32, MAX_SPS_COUNT as u32 - 1)?;

    if sps.has_chroma_info() {
        ops.ue("chroma_format_idc", &mut sps.chroma_format_idc)?;
        check_max("chroma_format_idc", sps.chroma_format_idc as u32, 3)?;
        if sps.chroma_format_idc == 3 {
            ops.flag("separate_colour_plane_flag", &mut sps.separate_colour_plane_flag)?;
        }
        ops.ue("bit_depth_luma_minus8", &mut sps.bit_depth_luma_minus8)?;
        check_max("bit_depth_luma_minus8", sps.bit_depth_luma_minus8 as u32, 6)?;
        ops.ue("bit_depth_chroma_minus8", &mut sps.bit_depth_chroma_minus8)?;
        check_max("bit_depth_chroma_minus8", sps.bit_depth_chroma_minus8 as u32, 6)?;
        ops.flag(
            "qpprime_y_zero_transform_bypass_flag",
            &mut sps.qpprime_y_zero_transform_bypass_flag,
        )?;
        ops.flag("seq_scaling_matrix_present_flag", &mut sps.seq_scaling_matrix_present_flag)?;
        if sps.seq_scaling_matrix_present_flag {
            let count = if sps.chroma_format_idc != 3 { 8 } else { 12 };
            ops.begin_struct("seq_scaling_matrix");
            scaling_matrix(ops, &mut sps.seq_scaling_matrix, count)?;
            ops.end_struct();
        }
    }

    ops.ue("log2_max_frame_num_minus4", &mut sps.log2_max_frame_num_minus4)?;
    check_max("log2_max_frame_num_minus4", sps.log2_max_frame_num_minus4 as u32, 12)?;
    ops.ue("pic_order_cnt_type", &mut sps.pic_order_cnt_type)?;
    check_max("pic_order_cnt_type", sps.pic_order_cnt_type as u32, 2)?;

    if sps.pic_order_cnt_type == 0 {
        ops.ue(
            "log2_max_pic_order_cnt_lsb_minus4",
            &mut sps.log2_max_pic_order_cnt_lsb_minus4,
        )?;
        check_max(
            "log2_max_pic_order_cnt_lsb_minus4",
            sps.log2_max_pic_order_cnt_lsb_minus4 as u32,
            12,
        )?;
    } else if sps.pic_order_cnt_type == 1 {
        ops.flag("delta_pic_order_always_zero_flag", &mut sps.delta_pic_order_always_zero_flag)?;
        ops.se("offset_for_non_ref_pic", &mut sps.offset_for_non_ref_pic)?;
        ops.se("offset_for_top_to_bottom_field", &mut sps.offset_for_top_to_bottom_field)?;
        ops.ue(
            "num_ref_frames_in_pic_order_cnt_cycle",
            &mut sps.num_ref_frames_in_pic_order_cnt_cycle,
        )?;

        let n = sps.num_ref_frames_in_pic_order_cnt_cycle as usize;
        sized(ops, "offset_for_ref_frame", &mut sps.offset_for_ref_frame, n)?;
        ops.begin_array("offset_for_ref_frame");
        for offset in sps.offset_for_ref_frame[..n].iter_mut() {
            ops.se("offset_for_ref_frame", offset)?;
        }
        ops.end_array();
    }

    ops.ue("max_num_ref_frames", &mut sps.max_num_ref_frames)?;
    ops.flag(
        "gaps_in_frame_num_value_allowed_flag",
        &mut sps.gaps_in_frame_num_value_allowed_flag,
    )?;
    ops.ue("pic_width_in_mbs_minus1", &mut sps.pic_width_in_mbs_minus1)?;
    ops.ue("pic_height_in_map_units_minus1", &mut sps.pic_height_in_map_units_minus1)?;
    ops.flag("frame_mbs_only_flag", &mut sps.frame_mbs_only_flag)?;
    if !sps.frame_mbs_only_flag {
        ops.flag("mb_adaptive_frame_field_flag", &mut sps.mb_adaptive_frame_field_flag)?;
    }
    ops.flag("direct_8x8_inference_flag", &mut sps.direct_8x8_inference_flag)?;

    ops.flag("frame_cropping_flag", &mut sps.frame_cropping_flag)?;
    if sps.frame_cropping_flag {
        ops.ue("frame_crop_left_offset", &mut sps.frame_crop_left_offset)?;
        ops.ue("frame_crop_right_offset", &mut sps.frame_crop_right_offset)?;
        ops.ue("frame_crop_top_offset", &mut sps.frame_crop_top_offset)?;
        ops.ue("frame_crop_bottom_offset", &mut sps.frame_crop_bottom_offset)?;
    }

    ops.flag("vui_parameters_present_flag", &mut sps.vui_parameters_present_flag)?;
    if sps.vui_parameters_present_flag {
        ops.begin_struct("vui");
        vui(ops, &mut sps.vui_parameters)?;
        ops.end_struct();
    }

    ops.rbsp_trailing_bits()
}

/// Resolves the SPS a PPS refers to.
pub trait SpsSource {
    /// Returns the `chroma_format_idc` of SPS `id`.
    fn resolve_sps(&mut self, id: u8) -> Result<u8>;
}

/// The context activates the SPS, as parsing a PPS does.
impl SpsSource for Ctx {
    fn resolve_sps(&mut self, id: u8) -> Result<u8> {
        self.set_active_sps(id as u32)?;
        self.sps()
            .map(|sps| sps.chroma_format_idc)
            .ok_or_else(|| H264Error::protocol(format!("unknown SPS {}", id)))
    }
}

/// A PPS parsed against a given SPS must refer to it.
impl SpsSource for &Sps {
    fn resolve_sps(&mut self, id: u8) -> Result<u8> {
        if self.seq_parameter_set_id != id {
            return Err(H264Error::invalid(format!(
                "PPS refers to SPS {}, got SPS {}",
                id, self.seq_parameter_set_id
            )));
        }
        Ok(self.chroma_format_idc)
    }
}

/// 7.3.2.2 Picture parameter set RBSP.
pub fn pps<O: SyntaxOps, S: SpsSource>(ops: &mut O, source: &mut S, pps: &mut Pps) -> Result<()> {
    ops.ue("pic_parameter_set_id", &mut pps.pic_parameter_set_id)?;
    ops.ue("seq_parameter_set_id", &mut pps.seq_parameter_set_id)?;
    check_max("seq_parameter_set_id", pps.seq_parameter_set_id as u32, MAX_SPS_COUNT as u32 - 1)?;
    let chroma_format_idc = source.resolve_sps(pps.seq_parameter_set_id)?;

    ops.flag("entropy_coding_mode_flag", &mut pps.entropy_coding_mode_flag)?;
    ops.flag(
        "bottom_field_pic_order_in_frame_present_flag",
        &mut pps.bottom_field_pic_order_in_frame_present_flag,
    )?;
    ops.ue("num_slice_groups_minus1", &mut pps.num_slice_groups_minus1)?;
    check_max(
        "num_slice_groups_minus1",
        pps.num_slice_groups_minus1 as u32,
        MAX_SLICE_GROUPS as u32 - 1,
    )?;

    if pps.num_slice_groups_minus1 > 0 {
        let num_groups = pps.num_slice_groups_minus1 as usize + 1;
        ops.ue("slice_group_map_type", &mut pps.slice_group_map_type)?;
        match pps.slice_group_map_type {
            0 => {
                sized(ops, "run_length_minus1", &mut pps.run_length_minus1, num_groups)?;
                ops.begin_array("run_length_minus1");
                for run in pps.run_length_minus1[..num_groups].iter_mut() {
                    ops.ue("run_length_minus1", run)?;
                }
                ops.end_array();
            }
            1 => (),
            2 => {
                sized(ops, "top_left", &mut pps.top_left, num_groups - 1)?;
                sized(ops, "bottom_right", &mut pps.bottom_right, num_groups - 1)?;
                ops.begin_array("slice_group_rects");
                for i in 0..num_groups - 1 {
                    ops.begin_item();
                    ops.ue("top_left", &mut pps.top_left[i])?;
                    ops.ue("bottom_right", &mut pps.bottom_right[i])?;
                    ops.end_item();
                }
                ops.end_array();
            }
            3..=5 => {
                ops.flag(
                    "slice_group_change_direction_flag",
                    &mut pps.slice_group_change_direction_flag,
                )?;
                ops.ue("slice_group_change_rate_minus1", &mut pps.slice_group_change_rate_minus1)?;
            }
            6 => {
                ops.ue("pic_size_in_map_units_minus1", &mut pps.pic_size_in_map_units_minus1)?;
                check_max(
                    "pic_size_in_map_units_minus1",
                    pps.pic_size_in_map_units_minus1,
                    MAX_PIC_SIZE_IN_MBS - 1,
                )?;
                let n = pps.pic_size_in_map_units_minus1 as usize + 1;
                let bits = ceil_log2(num_groups as u32);
                sized(ops, "slice_group_id", &mut pps.slice_group_id, n)?;
                ops.begin_array("slice_group_id");
                for id in pps.slice_group_id[..n].iter_mut() {
                    ops.u("slice_group_id", id, bits)?;
                }
                ops.end_array();
            }
            other => {
                return Err(H264Error::io(format!("unknown slice_group_map_type {}", other)))
            }
        }
    }

    ops.ue(
        "num_ref_idx_l0_default_active_minus1",
        &mut pps.num_ref_idx_l0_default_active_minus1,
    )?;
    check_max(
        "num_ref_idx_l0_default_active_minus1",
        pps.num_ref_idx_l0_default_active_minus1 as u32,
        MAX_REF_IDX_ACTIVE as u32 - 1,
    )?;
    ops.ue(
        "num_ref_idx_l1_default_active_minus1",
        &mut pps.num_ref_idx_l1_default_active_minus1,
    )?;
    check_max(
        "num_ref_idx_l1_default_active_minus1",
        pps.num_ref_idx_l1_default_active_minus1 as u32,
        MAX_REF_IDX_ACTIVE as u32 - 1,
    )?;
    ops.flag("weighted_pred_flag", &mut pps.weighted_pred_flag)?;
    ops.u("weighted_bipred_idc", &mut pps.weighted_bipred_idc, 2)?;
    ops.se("pic_init_qp_minus26", &mut pps.pic_init_qp_minus26)?;
    ops.se("pic_init_qs_minus26", &mut pps.pic_init_qs_minus26)?;
    ops.se("chroma_qp_index_offset", &mut pps.chroma_qp_index_offset)?;
    ops.flag(
        "deblocking_filter_control_present_flag",
        &mut pps.deblocking_filter_control_present_flag,
    )?;
    ops.flag("constrained_intra_pred_flag", &mut pps.constrained_intra_pred_flag)?;
    ops.flag("redundant_pic_cnt_present_flag", &mut pps.redundant_pic_cnt_present_flag)?;

    pps.more_rbsp_data_present = ops.more_rbsp_data(pps.more_rbsp_data_present);
    if pps.more_rbsp_data_present {
        ops.flag("transform_8x8_mode_flag", &mut pps.transform_8x8_mode_flag)?;
        ops.flag("pic_scaling_matrix_present_flag", &mut pps.pic_scaling_matrix_present_flag)?;
        if pps.pic_scaling_matrix_present_flag {
            let count = 6 + match (pps.transform_8x8_mode_flag, chroma_format_idc) {
                (false, _) => 0,
                (true, 3) => 6,
                (true, _) => 2,
            };
            ops.begin_struct("pic_scaling_matrix");
            scaling_matrix(ops, &mut pps.pic_scaling_matrix, count)?;
            ops.end_struct();
        }
        ops.se("second_chroma_qp_index_offset", &mut pps.second_chroma_qp_index_offset)?;
    } else if ops.is_reading() {
        pps.second_chroma_qp_index_offset = pps.chroma_qp_index_offset;
    }

    ops.rbsp_trailing_bits()
}

/// 7.3.2.4 Access unit delimiter RBSP.
pub fn aud<O: SyntaxOps>(ops: &mut O, aud: &mut Aud) -> Result<()> {
    ops.u("primary_pic_type", &mut aud.primary_pic_type, 3)?;
    ops.rbsp_trailing_bits()
}

/// D.1.2 Buffering period. Activates the SPS it refers to, so that the
/// picture timing messages following it are parsed against that SPS.
fn sei_buffering_period<O: SyntaxOps>(
    ops: &mut O,
    ctx: &mut Ctx,
    sei: &mut SeiBufferingPeriod,
) -> Result<()> {
    ops.ue("seq_parameter_set_id", &mut sei.seq_parameter_set_id)?;
    ctx.set_active_sps(sei.seq_parameter_set_id as u32)?;
    let sps: Rc<Sps> = ctx
        .sps()
        .cloned()
        .ok_or_else(|| H264Error::protocol("buffering period without an active SPS"))?;
    let vui = &sps.vui_parameters;

    for (present, hrd, name, cpbs) in [
        (
            vui.nal_hrd_parameters_present_flag,
            &vui.nal_hrd_parameters,
            "nal_hrd_cpb",
            &mut sei.nal_hrd_cpb,
        ),
        (
            vui.vcl_hrd_parameters_present_flag,
            &vui.vcl_hrd_parameters,
            "vcl_hrd_cpb",
            &mut sei.vcl_hrd_cpb,
        ),
    ] {
        if !present {
            continue;
        }

        let n = hrd.cpb_cnt_minus1 as usize + 1;
        let bits = hrd.initial_cpb_removal_delay_length_minus1 as u32 + 1;
        sized(ops, name, cpbs, n)?;
        ops.begin_array(name);
        for cpb in cpbs[..n].iter_mut() {
            initial_cpb_removal(ops, cpb, bits)?;
        }
        ops.end_array();
    }

    Ok(())
}

fn initial_cpb_removal<O: SyntaxOps>(
    ops: &mut O,
    cpb: &mut InitialCpbRemoval,
    bits: u32,
) -> Result<()> {
    ops.begin_item();
    ops.u("initial_cpb_removal_delay", &mut cpb.initial_cpb_removal_delay, bits)?;
    ops.u("initial_cpb_removal_delay_offset", &mut cpb.initial_cpb_removal_delay_offset, bits)?;
    ops.end_item();
    Ok(())
}

fn clock_timestamp<O: SyntaxOps>(
    ops: &mut O,
    ts: &mut ClockTimestamp,
    time_offset_length: u32,
) -> Result<()> {
    ops.flag("clock_timestamp_flag", &mut ts.clock_timestamp_flag)?;
    if !ts.clock_timestamp_flag {
        return Ok(());
    }

    ops.u("ct_type", &mut ts.ct_type, 2)?;
    ops.flag("nuit_field_based_flag", &mut ts.nuit_field_based_flag)?;
    ops.u("counting_type", &mut ts.counting_type, 5)?;
    ops.flag("full_timestamp_flag", &mut ts.full_timestamp_flag)?;
    ops.flag("discontinuity_flag", &mut ts.discontinuity_flag)?;
    ops.flag("cnt_dropped_flag", &mut ts.cnt_dropped_flag)?;
    ops.u("n_frames", &mut ts.n_frames, 8)?;

    if ts.full_timestamp_flag {
        ops.u("seconds_value", &mut ts.seconds_value, 6)?;
        ops.u("minutes_value", &mut ts.minutes_value, 6)?;
        ops.u("hours_value", &mut ts.hours_value, 5)?;
    } else {
        ops.flag("seconds_flag", &mut ts.seconds_flag)?;
        if ts.seconds_flag {
            ops.u("seconds_value", &mut ts.seconds_value, 6)?;
            ops.flag("minutes_flag", &mut ts.minutes_flag)?;
            if ts.minutes_flag {
                ops.u("minutes_value", &mut ts.minutes_value, 6)?;
                ops.flag("hours_flag", &mut ts.hours_flag)?;
                if ts.hours_flag {
                    ops.u("hours_value", &mut ts.hours_value, 5)?;
                }
            }
        }
    }

    if time_offset_length > 0 {
        ops.i("time_offset", &mut ts.time_offset, time_offset_length)?;
    }

    Ok(())
}

fn sei_pic_timing<O: SyntaxOps>(ops: &mut O, ctx: &Ctx, sei: &mut SeiPicTiming) -> Result<()> {
    let sps: Rc<Sps> = ctx
        .sps()
        .cloned()
        .ok_or_else(|| H264Error::protocol("picture timing without an active SPS"))?;
    let vui = &sps.vui_parameters;

    let hrd = if vui.nal_hrd_parameters_present_flag {
        Some(&vui.nal_hrd_parameters)
    } else if vui.vcl_hrd_parameters_present_flag {
        Some(&vui.vcl_hrd_parameters)
    } else {
        None
    };

    if let Some(hrd) = hrd {
        ops.u(
            "cpb_removal_delay",
            &mut sei.cpb_removal_delay,
            hrd.cpb_removal_delay_length_minus1 as u32 + 1,
        )?;
        ops.u(
            "dpb_output_delay",
            &mut sei.dpb_output_delay,
            hrd.dpb_output_delay_length_minus1 as u32 + 1,
        )?;
    }

    if vui.pic_struct_present_flag {
        ops.u("pic_struct", &mut sei.pic_struct, 4)?;
        let num_clock_ts = NUM_CLOCK_TS.get(sei.pic_struct as usize).copied().unwrap_or(0);
        let time_offset_length = hrd.map_or(24, |hrd| hrd.time_offset_length as u32);

        sized(ops, "clock_timestamps", &mut sei.clock_timestamps, num_clock_ts)?;
        ops.begin_array("clock_timestamps");
        for ts in sei.clock_timestamps[..num_clock_ts].iter_mut() {
            ops.begin_item();
            clock_timestamp(ops, ts, time_offset_length)?;
            ops.end_item();
        }
        ops.end_array();
    }

    Ok(())
}

fn sei_pan_scan_rect<O: SyntaxOps>(ops: &mut O, sei: &mut SeiPanScanRect) -> Result<()> {
    ops.ue("pan_scan_rect_id", &mut sei.pan_scan_rect_id)?;
    ops.flag("pan_scan_rect_cancel_flag", &mut sei.pan_scan_rect_cancel_flag)?;
    if sei.pan_scan_rect_cancel_flag {
        return Ok(());
    }

    ops.ue("pan_scan_cnt_minus1", &mut sei.pan_scan_cnt_minus1)?;
    check_max(
        "pan_scan_cnt_minus1",
        sei.pan_scan_cnt_minus1 as u32,
        MAX_PAN_SCAN_RECTS as u32 - 1,
    )?;

    let n = sei.pan_scan_cnt_minus1 as usize + 1;
    sized(ops, "rects", &mut sei.rects, n)?;
    ops.begin_array("rects");
    for rect in sei.rects[..n].iter_mut() {
        ops.begin_item();
        ops.se("pan_scan_rect_left_offset", &mut rect.left_offset)?;
        ops.se("pan_scan_rect_right_offset", &mut rect.right_offset)?;
        ops.se("pan_scan_rect_top_offset", &mut rect.top_offset)?;
        ops.se("pan_scan_rect_bottom_offset", &mut rect.bottom_offset)?;
        ops.end_item();
    }
    ops.end_array();

    ops.ue("pan_scan_rect_repetition_period", &mut sei.pan_scan_rect_repetition_period)
}

fn sei_filler_payload<O: SyntaxOps>(ops: &mut O, sei: &mut SeiFillerPayload) -> Result<()> {
    ops.bytes("ff_byte", &mut sei.data)
}

fn sei_user_data_registered<O: SyntaxOps>(
    ops: &mut O,
    sei: &mut SeiUserDataRegistered,
) -> Result<()> {
    ops.u("itu_t_t35_country_code", &mut sei.itu_t_t35_country_code, 8)?;
    if sei.itu_t_t35_country_code == 0xff {
        ops.u(
            "itu_t_t35_country_code_extension_byte",
            &mut sei.itu_t_t35_country_code_extension_byte,
            8,
        )?;
    }
    ops.bytes("itu_t_t35_payload_byte", &mut sei.data)
}

fn sei_user_data_unregistered<O: SyntaxOps>(
    ops: &mut O,
    sei: &mut SeiUserDataUnregistered,
) -> Result<()> {
    ops.begin_array("uuid_iso_iec_11578");
    for byte in sei.uuid_iso_iec_11578.iter_mut() {
        ops.u("uuid_iso_iec_11578", byte, 8)?;
    }
    ops.end_array();
    ops.bytes("user_data_payload_byte", &mut sei.data)
}

fn sei_recovery_point<O: SyntaxOps>(ops: &mut O, sei: &mut SeiRecoveryPoint) -> Result<()> {
    ops.ue("recovery_frame_cnt", &mut sei.recovery_frame_cnt)?;
    ops.flag("exact_match_flag", &mut sei.exact_match_flag)?;
    ops.flag("broken_link_flag", &mut sei.broken_link_flag)?;
    ops.u("changing_slice_group_idc", &mut sei.changing_slice_group_idc, 2)
}

fn sei_full_frame_freeze<O: SyntaxOps>(ops: &mut O, sei: &mut SeiFullFrameFreeze) -> Result<()> {
    ops.ue(
        "full_frame_freeze_repetition_period",
        &mut sei.full_frame_freeze_repetition_period,
    )
}

fn sei_deblocking_filter_display_preference<O: SyntaxOps>(
    ops: &mut O,
    sei: &mut SeiDeblockingFilterDisplayPreference,
) -> Result<()> {
    ops.flag(
        "deblocking_display_preference_cancel_flag",
        &mut sei.deblocking_display_preference_cancel_flag,
    )?;
    if !sei.deblocking_display_preference_cancel_flag {
        ops.flag(
            "display_prior_to_deblocking_preferred_flag",
            &mut sei.display_prior_to_deblocking_preferred_flag,
        )?;
        ops.flag(
            "dec_frame_buffering_constraint_flag",
            &mut sei.dec_frame_buffering_constraint_flag,
        )?;
        ops.ue(
            "deblocking_display_preference_repetition_period",
            &mut sei.deblocking_display_preference_repetition_period,
        )?;
    }
    Ok(())
}

fn sei_frame_packing_arrangement<O: SyntaxOps>(
    ops: &mut O,
    sei: &mut SeiFramePackingArrangement,
) -> Result<()> {
    ops.ue("frame_packing_arrangement_id", &mut sei.frame_packing_arrangement_id)?;
    ops.flag(
        "frame_packing_arrangement_cancel_flag",
        &mut sei.frame_packing_arrangement_cancel_flag,
    )?;
    if !sei.frame_packing_arrangement_cancel_flag {
        ops.u("frame_packing_arrangement_type", &mut sei.frame_packing_arrangement_type, 7)?;
        ops.flag("quincunx_sampling_flag", &mut sei.quincunx_sampling_flag)?;
        ops.u("content_interpretation_type", &mut sei.content_interpretation_type, 6)?;
        ops.flag("spatial_flipping_flag", &mut sei.spatial_flipping_flag)?;
        ops.flag("frame0_flipped_flag", &mut sei.frame0_flipped_flag)?;
        ops.flag("field_views_flag", &mut sei.field_views_flag)?;
        ops.flag("current_frame_is_frame0_flag", &mut sei.current_frame_is_frame0_flag)?;
        ops.flag("frame0_self_contained_flag", &mut sei.frame0_self_contained_flag)?;
        ops.flag("frame1_self_contained_flag", &mut sei.frame1_self_contained_flag)?;
        if sei.has_grid_positions() {
            ops.u("frame0_grid_position_x", &mut sei.frame0_grid_position_x, 4)?;
            ops.u("frame0_grid_position_y", &mut sei.frame0_grid_position_y, 4)?;
            ops.u("frame1_grid_position_x", &mut sei.frame1_grid_position_x, 4)?;
            ops.u("frame1_grid_position_y", &mut sei.frame1_grid_position_y, 4)?;
        }
        ops.u(
            "frame_packing_arrangement_reserved_byte",
            &mut sei.frame_packing_arrangement_reserved_byte,
            8,
        )?;
        ops.ue(
            "frame_packing_arrangement_repetition_period",
            &mut sei.frame_packing_arrangement_repetition_period,
        )?;
    }
    ops.flag(
        "frame_packing_arrangement_extension_flag",
        &mut sei.frame_packing_arrangement_extension_flag,
    )
}

fn sei_display_orientation<O: SyntaxOps>(
    ops: &mut O,
    sei: &mut SeiDisplayOrientation,
) -> Result<()> {
    ops.flag("display_orientation_cancel_flag", &mut sei.display_orientation_cancel_flag)?;
    if !sei.display_orientation_cancel_flag {
        ops.flag("hor_flip", &mut sei.hor_flip)?;
        ops.flag("ver_flip", &mut sei.ver_flip)?;
        ops.u("anticlockwise_rotation", &mut sei.anticlockwise_rotation, 16)?;
        ops.ue(
            "display_orientation_repetition_period",
            &mut sei.display_orientation_repetition_period,
        )?;
        ops.flag(
            "display_orientation_extension_flag",
            &mut sei.display_orientation_extension_flag,
        )?;
    }
    Ok(())
}

/// The name of the structure a SEI payload is reported under.
pub fn sei_payload_name(payload: &SeiPayload) -> &'static str {
    match payload {
        SeiPayload::BufferingPeriod(_) => "buffering_period",
        SeiPayload::PicTiming(_) => "pic_timing",
        SeiPayload::PanScanRect(_) => "pan_scan_rect",
        SeiPayload::FillerPayload(_) => "filler_payload",
        SeiPayload::UserDataRegistered(_) => "user_data_registered",
        SeiPayload::UserDataUnregistered(_) => "user_data_unregistered",
        SeiPayload::RecoveryPoint(_) => "recovery_point",
        SeiPayload::FullFrameFreeze(_) => "full_frame_freeze",
        SeiPayload::DeblockingFilterDisplayPreference(_) => {
            "deblocking_filter_display_preference"
        }
        SeiPayload::FramePackingArrangement(_) => "frame_packing_arrangement",
        SeiPayload::DisplayOrientation(_) => "display_orientation",
        SeiPayload::Unknown(_) => "unknown",
    }
}

/// D.1 SEI payload syntax, for the payload types with a structured record.
/// Unknown payloads have no syntax and are left untouched.
pub fn sei_payload<O: SyntaxOps>(
    ops: &mut O,
    ctx: &mut Ctx,
    payload: &mut SeiPayload,
) -> Result<()> {
    if let SeiPayload::Unknown(_) = payload {
        return Ok(());
    }

    ops.begin_struct(sei_payload_name(payload));
    match payload {
        SeiPayload::BufferingPeriod(sei) => sei_buffering_period(ops, ctx, sei)?,
        SeiPayload::PicTiming(sei) => sei_pic_timing(ops, ctx, sei)?,
        SeiPayload::PanScanRect(sei) => sei_pan_scan_rect(ops, sei)?,
        SeiPayload::FillerPayload(sei) => sei_filler_payload(ops, sei)?,
        SeiPayload::UserDataRegistered(sei) => sei_user_data_registered(ops, sei)?,
        SeiPayload::UserDataUnregistered(sei) => sei_user_data_unregistered(ops, sei)?,
        SeiPayload::RecoveryPoint(sei) => sei_recovery_point(ops, sei)?,
        SeiPayload::FullFrameFreeze(sei) => sei_full_frame_freeze(ops, sei)?,
        SeiPayload::DeblockingFilterDisplayPreference(sei) => {
            sei_deblocking_filter_display_preference(ops, sei)?
        }
        SeiPayload::FramePackingArrangement(sei) => sei_frame_packing_arrangement(ops, sei)?,
        SeiPayload::DisplayOrientation(sei) => sei_display_orientation(ops, sei)?,
        SeiPayload::Unknown(_) => (),
    }
    ops.end_struct();

    Ok(())
}

fn ref_pic_list_modification_list<O: SyntaxOps>(
    ops: &mut O,
    name: &str,
    items: &mut Vec<RefPicListModification>,
) -> Result<()> {
    if ops.is_reading() {
        items.clear();
    }

    ops.begin_array(name);
    let mut i = 0;
    loop {
        if ops.is_reading() {
            // One more for the terminating item.
            if items.len() > MAX_RPLM_COUNT {
                return Err(H264Error::protocol(format!("too many items in {}", name)));
            }
            items.push(Default::default());
        }

        let item = items
            .get_mut(i)
            .ok_or_else(|| H264Error::protocol(format!("{} is not terminated", name)))?;
        ops.begin_item();
        ops.ue("modification_of_pic_nums_idc", &mut item.modification_of_pic_nums_idc)?;
        match item.modification_of_pic_nums_idc {
            0 | 1 => ops.ue("abs_diff_pic_num_minus1", &mut item.abs_diff_pic_num_minus1)?,
            2 => ops.ue("long_term_pic_num", &mut item.long_term_pic_num)?,
            3 => (),
            4 | 5 => ops.ue("abs_diff_view_idx_minus1", &mut item.abs_diff_view_idx_minus1)?,
            other => {
                return Err(H264Error::protocol(format!(
                    "invalid modification_of_pic_nums_idc {}",
                    other
                )))
            }
        }
        ops.end_item();

        let done = item.modification_of_pic_nums_idc == 3;
        i += 1;
        if done {
            break;
        }
    }
    ops.end_array();

    Ok(())
}

/// 7.3.3.1 Reference picture list modification syntax.
fn ref_pic_list_modification<O: SyntaxOps>(
    ops: &mut O,
    slice_type: SliceType,
    rplm: &mut RefPicListModifications,
) -> Result<()> {
    if !slice_type.is_i() && !slice_type.is_si() {
        ops.flag(
            "ref_pic_list_modification_flag_l0",
            &mut rplm.ref_pic_list_modification_flag_l0,
        )?;
        if rplm.ref_pic_list_modification_flag_l0 {
            ref_pic_list_modification_list(ops, "pic_num_l0", &mut rplm.pic_num_l0)?;
        }
    }

    if slice_type.is_b() {
        ops.flag(
            "ref_pic_list_modification_flag_l1",
            &mut rplm.ref_pic_list_modification_flag_l1,
        )?;
        if rplm.ref_pic_list_modification_flag_l1 {
            ref_pic_list_modification_list(ops, "pic_num_l1", &mut rplm.pic_num_l1)?;
        }
    }

    Ok(())
}

fn pred_weight<O: SyntaxOps>(ops: &mut O, pw: &mut PredWeight, chroma: bool) -> Result<()> {
    ops.begin_item();
    ops.flag("luma_weight_flag", &mut pw.luma_weight_flag)?;
    if pw.luma_weight_flag {
        ops.se("luma_weight", &mut pw.luma_weight)?;
        ops.se("luma_offset", &mut pw.luma_offset)?;
    }

    if chroma {
        ops.flag("chroma_weight_flag", &mut pw.chroma_weight_flag)?;
        if pw.chroma_weight_flag {
            for j in 0..2 {
                ops.se("chroma_weight", &mut pw.chroma_weight[j])?;
                ops.se("chroma_offset", &mut pw.chroma_offset[j])?;
            }
        }
    }
    ops.end_item();

    Ok(())
}

/// 7.3.3.2 Prediction weight table syntax.
fn pred_weight_table<O: SyntaxOps>(
    ops: &mut O,
    sps: &Sps,
    sh_num_refs: (u8, u8),
    slice_type: SliceType,
    pwt: &mut PredWeightTable,
) -> Result<()> {
    let chroma = sps.chroma_array_type() != 0;

    ops.ue("luma_log2_weight_denom", &mut pwt.luma_log2_weight_denom)?;
    check_max("luma_log2_weight_denom", pwt.luma_log2_weight_denom as u32, 7)?;
    if chroma {
        ops.ue("chroma_log2_weight_denom", &mut pwt.chroma_log2_weight_denom)?;
        check_max("chroma_log2_weight_denom", pwt.chroma_log2_weight_denom as u32, 7)?;
    }

    let n = sh_num_refs.0 as usize + 1;
    sized(ops, "l0", &mut pwt.l0, n)?;
    ops.begin_array("l0");
    for pw in pwt.l0[..n].iter_mut() {
        pred_weight(ops, pw, chroma)?;
    }
    ops.end_array();

    if slice_type.is_b() {
        let n = sh_num_refs.1 as usize + 1;
        sized(ops, "l1", &mut pwt.l1, n)?;
        ops.begin_array("l1");
        for pw in pwt.l1[..n].iter_mut() {
            pred_weight(ops, pw, chroma)?;
        }
        ops.end_array();
    }

    Ok(())
}

/// 7.3.3.3 Decoded reference picture marking syntax.
fn dec_ref_pic_marking<O: SyntaxOps>(
    ops: &mut O,
    idr_pic_flag: bool,
    drpm: &mut RefPicMarking,
) -> Result<()> {
    if idr_pic_flag {
        ops.flag("no_output_of_prior_pics_flag", &mut drpm.no_output_of_prior_pics_flag)?;
        return ops.flag("long_term_reference_flag", &mut drpm.long_term_reference_flag);
    }

    ops.flag(
        "adaptive_ref_pic_marking_mode_flag",
        &mut drpm.adaptive_ref_pic_marking_mode_flag,
    )?;
    if !drpm.adaptive_ref_pic_marking_mode_flag {
        return Ok(());
    }

    if ops.is_reading() {
        drpm.inner.clear();
    }

    ops.begin_array("mmco");
    let mut i = 0;
    loop {
        if ops.is_reading() {
            if drpm.inner.len() > MAX_DRPM_COUNT {
                return Err(H264Error::protocol("too many memory management operations"));
            }
            drpm.inner.push(Default::default());
        }

        let item = drpm
            .inner
            .get_mut(i)
            .ok_or_else(|| H264Error::protocol("memory management operations are not terminated"))?;
        ops.begin_item();
        ops.ue(
            "memory_management_control_operation",
            &mut item.memory_management_control_operation,
        )?;
        let mmco = item.memory_management_control_operation;
        if mmco > 6 {
            return Err(H264Error::protocol(format!(
                "invalid memory_management_control_operation {}",
                mmco
            )));
        }
        if mmco == 1 || mmco == 3 {
            ops.ue("difference_of_pic_nums_minus1", &mut item.difference_of_pic_nums_minus1)?;
        }
        if mmco == 2 {
            ops.ue("long_term_pic_num", &mut item.long_term_pic_num)?;
        }
        if mmco == 3 || mmco == 6 {
            ops.ue("long_term_frame_idx", &mut item.long_term_frame_idx)?;
        }
        if mmco == 4 {
            ops.ue("max_long_term_frame_idx_plus1", &mut item.max_long_term_frame_idx_plus1)?;
        }
        ops.end_item();

        i += 1;
        if mmco == 0 {
            break;
        }
    }
    ops.end_array();

    Ok(())
}

/// 7.3.3 Slice header syntax.
///
/// The PPS named by the header is activated as soon as its id is known.
/// When reading, the active reference counts start from the PPS defaults.
pub fn slice_header<O: SyntaxOps>(ops: &mut O, ctx: &mut Ctx, sh: &mut SliceHeader) -> Result<()> {
    ops.ue("first_mb_in_slice", &mut sh.first_mb_in_slice)?;
    ops.ue("slice_type", &mut sh.slice_type)?;
    let slice_type = sh
        .type_()
        .ok_or_else(|| out_of_range("slice_type", sh.slice_type as i64))?;
    ops.ue("pic_parameter_set_id", &mut sh.pic_parameter_set_id)?;
    ctx.set_active_pps(sh.pic_parameter_set_id as u32)?;

    let sps = ctx.sps().cloned().ok_or_else(|| H264Error::protocol("no active SPS"))?;
    let pps = ctx.pps().cloned().ok_or_else(|| H264Error::protocol("no active PPS"))?;
    let nalu_hdr = *ctx.nalu_header();

    if ops.is_reading() {
        sh.num_ref_idx_l0_active_minus1 = pps.num_ref_idx_l0_default_active_minus1;
        sh.num_ref_idx_l1_active_minus1 = pps.num_ref_idx_l1_default_active_minus1;
    }

    if sps.separate_colour_plane_flag {
        ops.u("colour_plane_id", &mut sh.colour_plane_id, 2)?;
    }

    ops.u("frame_num", &mut sh.frame_num, sps.log2_max_frame_num_minus4 as u32 + 4)?;

    if !sps.frame_mbs_only_flag {
        ops.flag("field_pic_flag", &mut sh.field_pic_flag)?;
        if sh.field_pic_flag {
            ops.flag("bottom_field_flag", &mut sh.bottom_field_flag)?;
        }
    }

    if nalu_hdr.idr_pic_flag() {
        ops.ue("idr_pic_id", &mut sh.idr_pic_id)?;
    }

    let bottom_field_pic_order =
        pps.bottom_field_pic_order_in_frame_present_flag && !sh.field_pic_flag;
    if sps.pic_order_cnt_type == 0 {
        ops.u(
            "pic_order_cnt_lsb",
            &mut sh.pic_order_cnt_lsb,
            sps.log2_max_pic_order_cnt_lsb_minus4 as u32 + 4,
        )?;
        if bottom_field_pic_order {
            ops.se("delta_pic_order_cnt_bottom", &mut sh.delta_pic_order_cnt_bottom)?;
        }
    }

    if sps.pic_order_cnt_type == 1 && !sps.delta_pic_order_always_zero_flag {
        ops.se("delta_pic_order_cnt[0]", &mut sh.delta_pic_order_cnt[0])?;
        if bottom_field_pic_order {
            ops.se("delta_pic_order_cnt[1]", &mut sh.delta_pic_order_cnt[1])?;
        }
    }

    if pps.redundant_pic_cnt_present_flag {
        ops.ue("redundant_pic_cnt", &mut sh.redundant_pic_cnt)?;
        check_max("redundant_pic_cnt", sh.redundant_pic_cnt as u32, 127)?;
    }

    if slice_type.is_b() {
        ops.flag("direct_spatial_mv_pred_flag", &mut sh.direct_spatial_mv_pred_flag)?;
    }

    if slice_type.is_p() || slice_type.is_sp() || slice_type.is_b() {
        ops.flag(
            "num_ref_idx_active_override_flag",
            &mut sh.num_ref_idx_active_override_flag,
        )?;
        if sh.num_ref_idx_active_override_flag {
            ops.ue("num_ref_idx_l0_active_minus1", &mut sh.num_ref_idx_l0_active_minus1)?;
            check_max(
                "num_ref_idx_l0_active_minus1",
                sh.num_ref_idx_l0_active_minus1 as u32,
                MAX_REF_IDX_ACTIVE as u32 - 1,
            )?;
            if slice_type.is_b() {
                ops.ue("num_ref_idx_l1_active_minus1", &mut sh.num_ref_idx_l1_active_minus1)?;
                check_max(
                    "num_ref_idx_l1_active_minus1",
                    sh.num_ref_idx_l1_active_minus1 as u32,
                    MAX_REF_IDX_ACTIVE as u32 - 1,
                )?;
            }
        }
    }

    ops.begin_struct("ref_pic_list_modification");
    ref_pic_list_modification(ops, slice_type, &mut sh.ref_pic_list_modification)?;
    ops.end_struct();

    if (pps.weighted_pred_flag && (slice_type.is_p() || slice_type.is_sp()))
        || (pps.weighted_bipred_idc == 1 && slice_type.is_b())
    {
        ops.begin_struct("pred_weight_table");
        pred_weight_table(
            ops,
            &sps,
            (sh.num_ref_idx_l0_active_minus1, sh.num_ref_idx_l1_active_minus1),
            slice_type,
            &mut sh.pred_weight_table,
        )?;
        ops.end_struct();
    }

    if nalu_hdr.nal_ref_idc != 0 {
        ops.begin_struct("dec_ref_pic_marking");
        dec_ref_pic_marking(ops, nalu_hdr.idr_pic_flag(), &mut sh.dec_ref_pic_marking)?;
        ops.end_struct();
    }

    if pps.entropy_coding_mode_flag && !slice_type.is_i() && !slice_type.is_si() {
        ops.ue("cabac_init_idc", &mut sh.cabac_init_idc)?;
        check_max("cabac_init_idc", sh.cabac_init_idc as u32, 2)?;
    }

    ops.se("slice_qp_delta", &mut sh.slice_qp_delta)?;

    if slice_type.is_sp() || slice_type.is_si() {
        if slice_type.is_sp() {
            ops.flag("sp_for_switch_flag", &mut sh.sp_for_switch_flag)?;
        }
        ops.se("slice_qs_delta", &mut sh.slice_qs_delta)?;
    }

    if pps.deblocking_filter_control_present_flag {
        ops.ue("disable_deblocking_filter_idc", &mut sh.disable_deblocking_filter_idc)?;
        check_max("disable_deblocking_filter_idc", sh.disable_deblocking_filter_idc as u32, 2)?;
        if sh.disable_deblocking_filter_idc != 1 {
            ops.se("slice_alpha_c0_offset_div2", &mut sh.slice_alpha_c0_offset_div2)?;
            ops.se("slice_beta_offset_div2", &mut sh.slice_beta_offset_div2)?;
        }
    }

    if pps.num_slice_groups_minus1 > 0 && (3..=5).contains(&pps.slice_group_map_type) {
        let pic_size_in_map_units = sps
            .pic_width_in_mbs_minus1
            .saturating_add(1)
            .saturating_mul(sps.pic_height_in_map_units_minus1.saturating_add(1));
        let rate = pps.slice_group_change_rate_minus1.saturating_add(1);
        let bits = ceil_log2(pic_size_in_map_units.div_ceil(rate).saturating_add(1));
        ops.u("slice_group_change_cycle", &mut sh.slice_group_change_cycle, bits)?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::codec::h264::sei::PanScanRect;

    /// Baseline SPS RBSP, 320x240, pic_order_cnt_type 2.
    const SPS_BASELINE: [u8; 7] = [0x42, 0x00, 0x1e, 0xda, 0x05, 0x07, 0xe4];
    /// PPS RBSP referring to [`SPS_BASELINE`], CAVLC, deblocking control present.
    const PPS_BASELINE: [u8; 3] = [0xce, 0x3c, 0x80];
    /// Header of an IDR I slice using [`PPS_BASELINE`], 20 bits.
    const SLICE_HEADER_IDR: [u8; 3] = [0x88, 0x84, 0xf0];

    fn read_sps(data: &[u8]) -> Result<Sps> {
        let mut ops = ReadOps::new(NaluReader::new(data, false));
        let mut out = Sps::default();
        sps(&mut ops, &mut out)?;
        Ok(out)
    }

    fn write_with<F>(f: F) -> Vec<u8>
    where
        F: FnOnce(&mut WriteOps) -> Result<()>,
    {
        let mut w = NaluWriter::new(false);
        {
            let mut ops = WriteOps::new(&mut w);
            f(&mut ops).unwrap();
        }
        w.into_vec().unwrap()
    }

    fn baseline_ctx() -> Ctx {
        let mut ctx = Ctx::new();
        ctx.set_sps(read_sps(&SPS_BASELINE).unwrap()).unwrap();

        let mut ops = ReadOps::new(NaluReader::new(&PPS_BASELINE, false));
        let mut p = Pps::default();
        pps(&mut ops, &mut ctx, &mut p).unwrap();
        ctx.set_pps(p).unwrap();
        ctx
    }

    #[test]
    fn ceil_log2_values() {
        assert_eq!(ceil_log2(0), 0);
        assert_eq!(ceil_log2(1), 0);
        assert_eq!(ceil_log2(2), 1);
        assert_eq!(ceil_log2(3), 2);
        assert_eq!(ceil_log2(8), 3);
        assert_eq!(ceil_log2(9), 4);
    }

    #[test]
    fn parse_baseline_sps() {
        let sps = read_sps(&SPS_BASELINE).unwrap();

        assert_eq!(sps.profile_idc, 66);
        assert_eq!(sps.level_idc, 30);
        assert_eq!(sps.seq_parameter_set_id, 0);
        assert_eq!(sps.chroma_format_idc, 1);
        assert_eq!(sps.pic_order_cnt_type, 2);
        assert_eq!(sps.max_num_ref_frames, 1);
        assert_eq!(sps.pic_width_in_mbs_minus1, 19);
        assert_eq!(sps.pic_height_in_map_units_minus1, 14);
        assert!(sps.frame_mbs_only_flag);
        assert!(sps.direct_8x8_inference_flag);
        assert!(!sps.frame_cropping_flag);
        assert!(!sps.vui_parameters_present_flag);

        let data = write_with(|ops| super::sps(ops, &mut sps.clone()));
        assert_eq!(data, SPS_BASELINE);
    }

    #[test]
    fn sps_with_vui_and_scaling_lists() {
        let mut sps = Sps {
            profile_idc: 100,
            level_idc: 40,
            seq_parameter_set_id: 3,
            seq_scaling_matrix_present_flag: true,
            pic_order_cnt_type: 1,
            num_ref_frames_in_pic_order_cnt_cycle: 2,
            offset_for_ref_frame: vec![-4, 7],
            pic_width_in_mbs_minus1: 119,
            pic_height_in_map_units_minus1: 67,
            frame_cropping_flag: true,
            frame_crop_bottom_offset: 4,
            vui_parameters_present_flag: true,
            ..Default::default()
        };
        sps.seq_scaling_matrix.scaling_list_present_flag[0] = true;
        sps.seq_scaling_matrix.use_default_4x4[0] = true;
        sps.seq_scaling_matrix.scaling_list_4x4[0] = DEFAULT_4X4_INTRA;
        sps.seq_scaling_matrix.scaling_list_present_flag[3] = true;
        sps.seq_scaling_matrix.scaling_list_4x4[3] = [
            10, 12, 14, 16, 18, 20, 22, 24, 26, 28, 30, 30, 30, 30, 30, 30,
        ];
        sps.seq_scaling_matrix.optimized_4x4[3] = true;

        let vui = &mut sps.vui_parameters;
        vui.aspect_ratio_info_present_flag = true;
        vui.aspect_ratio_idc = 255;
        vui.sar_width = 4;
        vui.sar_height = 3;
        vui.timing_info_present_flag = true;
        vui.num_units_in_tick = 1001;
        vui.time_scale = 60000;
        vui.nal_hrd_parameters_present_flag = true;
        vui.nal_hrd_parameters.cpb_cnt_minus1 = 1;
        vui.nal_hrd_parameters.cpb = vec![Default::default(); 2];
        vui.nal_hrd_parameters.cpb[1].bit_rate_value_minus1 = 3124;
        vui.nal_hrd_parameters.cpb[1].cbr_flag = true;
        vui.nal_hrd_parameters.initial_cpb_removal_delay_length_minus1 = 23;
        vui.nal_hrd_parameters.time_offset_length = 24;
        vui.pic_struct_present_flag = true;

        let data = write_with(|ops| super::sps(ops, &mut sps.clone()));
        let parsed = read_sps(&data).unwrap();
        assert_eq!(parsed, sps);
    }

    #[test]
    fn scaling_list_optimized_run() {
        // Coded as 8, 9, then a zero nextScale: the remaining entries repeat 9.
        let data = write_with(|ops| {
            for delta in [0i32, 1, -9] {
                ops.se("delta_scale", &mut delta.clone())?;
            }
            ops.rbsp_trailing_bits()
        });

        let mut ops = ReadOps::new(NaluReader::new(&data, false));
        let mut list = [0u8; 16];
        let (mut use_default, mut optimized) = (false, false);
        scaling_list(&mut ops, "l", &mut list, &DEFAULT_4X4_INTRA, &mut use_default, &mut optimized)
            .unwrap();
        ops.rbsp_trailing_bits().unwrap();

        assert!(!use_default);
        assert!(optimized);
        let mut expected = [9u8; 16];
        expected[0] = 8;
        assert_eq!(list, expected);

        // The writer finds the same run and stops after the same three deltas.
        let rewritten = write_with(|ops| {
            scaling_list(ops, "l", &mut list, &DEFAULT_4X4_INTRA, &mut false, &mut true)?;
            ops.rbsp_trailing_bits()
        });
        assert_eq!(rewritten, data);
    }

    #[test]
    fn scaling_list_default() {
        let data = write_with(|ops| {
            ops.se("delta_scale", &mut -8i32)?;
            ops.rbsp_trailing_bits()
        });

        let mut ops = ReadOps::new(NaluReader::new(&data, false));
        let mut list = [0u8; 64];
        let (mut use_default, mut optimized) = (false, false);
        scaling_list(&mut ops, "l", &mut list, &DEFAULT_8X8_INTER, &mut use_default, &mut optimized)
            .unwrap();

        assert!(use_default);
        assert_eq!(list, DEFAULT_8X8_INTER);
    }

    #[test]
    fn sps_out_of_range() {
        // seq_parameter_set_id 32.
        let data = write_with(|ops| {
            ops.u("profile_idc", &mut 66u8, 8)?;
            ops.u("flags", &mut 0u8, 8)?;
            ops.u("level_idc", &mut 30u8, 8)?;
            ops.ue("seq_parameter_set_id", &mut 32u32)?;
            ops.rbsp_trailing_bits()
        });
        assert!(matches!(read_sps(&data), Err(H264Error::Protocol(_))));

        // Truncated.
        assert!(matches!(read_sps(&SPS_BASELINE[..4]), Err(H264Error::Io(_))));
    }

    #[test]
    fn parse_baseline_pps() {
        let ctx = baseline_ctx();
        let pps = ctx.pps().unwrap();

        assert_eq!(pps.pic_parameter_set_id, 0);
        assert_eq!(pps.seq_parameter_set_id, 0);
        assert!(!pps.entropy_coding_mode_flag);
        assert_eq!(pps.num_slice_groups_minus1, 0);
        assert!(pps.deblocking_filter_control_present_flag);
        assert!(!pps.more_rbsp_data_present);
        assert_eq!(ctx.sps().unwrap().seq_parameter_set_id, 0);

        let mut sps = ctx.sps().unwrap().as_ref().clone();
        let data = write_with(|ops| super::pps(ops, &mut &sps, &mut pps.as_ref().clone()));
        assert_eq!(data, PPS_BASELINE);

        // A PPS checked against another SPS is refused.
        sps.seq_parameter_set_id = 1;
        let mut ops = ReadOps::new(NaluReader::new(&PPS_BASELINE, false));
        let err = super::pps(&mut ops, &mut &sps, &mut Pps::default()).unwrap_err();
        assert!(matches!(err, H264Error::InvalidArgument(_)));
    }

    #[test]
    fn pps_with_slice_groups_and_extension() {
        let sps = Sps {
            profile_idc: 100,
            ..Default::default()
        };
        let mut pps = Pps {
            pic_parameter_set_id: 7,
            num_slice_groups_minus1: 2,
            slice_group_map_type: 6,
            pic_size_in_map_units_minus1: 5,
            slice_group_id: vec![0, 1, 2, 2, 1, 0],
            pic_init_qp_minus26: -3,
            more_rbsp_data_present: true,
            transform_8x8_mode_flag: true,
            pic_scaling_matrix_present_flag: true,
            second_chroma_qp_index_offset: -2,
            ..Default::default()
        };
        pps.pic_scaling_matrix.scaling_list_present_flag[6] = true;
        pps.pic_scaling_matrix.scaling_list_8x8[0] = [20; 64];
        pps.pic_scaling_matrix.optimized_8x8[0] = true;

        let data = write_with(|ops| super::pps(ops, &mut &sps, &mut pps.clone()));

        let mut ops = ReadOps::new(NaluReader::new(&data, false));
        let mut parsed = Pps::default();
        super::pps(&mut ops, &mut &sps, &mut parsed).unwrap();
        assert_eq!(parsed, pps);
    }

    #[test]
    fn pps_unknown_sps() {
        let mut ctx = Ctx::new();
        let mut ops = ReadOps::new(NaluReader::new(&PPS_BASELINE, false));
        let err = pps(&mut ops, &mut ctx, &mut Pps::default()).unwrap_err();
        assert!(matches!(err, H264Error::Protocol(_)));
    }

    #[test]
    fn parse_idr_slice_header() {
        let mut ctx = baseline_ctx();
        ctx.set_nalu_header(NaluHeader {
            forbidden_zero_bit: false,
            nal_ref_idc: 3,
            nal_unit_type: 5,
        });

        let mut ops = ReadOps::new(NaluReader::new(&SLICE_HEADER_IDR, false));
        let mut sh = SliceHeader::default();
        slice_header(&mut ops, &mut ctx, &mut sh).unwrap();

        assert_eq!(ops.reader().position(), 20);
        assert_eq!(sh.first_mb_in_slice, 0);
        assert_eq!(sh.type_(), Some(SliceType::I));
        assert_eq!(sh.slice_type, 7);
        assert_eq!(sh.frame_num, 0);
        assert_eq!(sh.idr_pic_id, 0);
        assert!(!sh.dec_ref_pic_marking.no_output_of_prior_pics_flag);
        assert_eq!(sh.slice_qp_delta, 0);
        assert_eq!(sh.disable_deblocking_filter_idc, 0);

        let mut w = NaluWriter::new(false);
        slice_header(&mut WriteOps::new(&mut w), &mut ctx, &mut sh.clone()).unwrap();
        assert_eq!(w.position(), 20);
        assert_eq!(&w.data()[..2], &SLICE_HEADER_IDR[..2]);
    }

    #[test]
    fn p_slice_header_lists() {
        let mut ctx = baseline_ctx();
        ctx.set_nalu_header(NaluHeader {
            forbidden_zero_bit: false,
            nal_ref_idc: 2,
            nal_unit_type: 1,
        });

        let mut sh = SliceHeader {
            first_mb_in_slice: 40,
            slice_type: 5,
            frame_num: 3,
            num_ref_idx_active_override_flag: true,
            num_ref_idx_l0_active_minus1: 1,
            ref_pic_list_modification: RefPicListModifications {
                ref_pic_list_modification_flag_l0: true,
                pic_num_l0: vec![
                    RefPicListModification {
                        modification_of_pic_nums_idc: 0,
                        abs_diff_pic_num_minus1: 1,
                        ..Default::default()
                    },
                    RefPicListModification {
                        modification_of_pic_nums_idc: 3,
                        ..Default::default()
                    },
                ],
                ..Default::default()
            },
            dec_ref_pic_marking: RefPicMarking {
                adaptive_ref_pic_marking_mode_flag: true,
                inner: vec![
                    crate::codec::h264::headers::RefPicMarkingInner {
                        memory_management_control_operation: 1,
                        difference_of_pic_nums_minus1: 2,
                        ..Default::default()
                    },
                    Default::default(),
                ],
                ..Default::default()
            },
            slice_qp_delta: -4,
            disable_deblocking_filter_idc: 1,
            ..Default::default()
        };

        let data = write_with(|ops| {
            slice_header(ops, &mut ctx, &mut sh.clone())?;
            ops.rbsp_trailing_bits()
        });

        let mut ops = ReadOps::new(NaluReader::new(&data, false));
        let mut parsed = SliceHeader::default();
        slice_header(&mut ops, &mut ctx, &mut parsed).unwrap();
        assert_eq!(parsed, sh);

        // An unterminated modification list cannot be written.
        sh.ref_pic_list_modification.pic_num_l0.pop();
        let mut w = NaluWriter::new(false);
        let err = slice_header(&mut WriteOps::new(&mut w), &mut ctx, &mut sh).unwrap_err();
        assert!(matches!(err, H264Error::Protocol(_)));
    }

    #[test]
    fn write_range_checks() {
        let mut w = NaluWriter::new(false);
        let mut ops = WriteOps::new(&mut w);

        assert!(ops.u("v", &mut 4u8, 2).is_err());
        assert!(ops.u("v", &mut 3u8, 2).is_ok());
        assert!(ops.i("v", &mut -3i32, 2).is_err());
        assert!(ops.i("v", &mut -2i32, 2).is_ok());
        assert!(ops.te("v", &mut 3u8, 2).is_err());
    }

    #[test]
    fn sei_payloads() {
        let mut ctx = Ctx::new();

        let mut payload = SeiPayload::PanScanRect(SeiPanScanRect {
            pan_scan_rect_id: 2,
            pan_scan_cnt_minus1: 1,
            rects: vec![
                PanScanRect {
                    left_offset: -16,
                    right_offset: 16,
                    top_offset: 0,
                    bottom_offset: 8,
                },
                Default::default(),
            ],
            pan_scan_rect_repetition_period: 1,
            ..Default::default()
        });
        let data = write_with(|ops| {
            sei_payload(ops, &mut ctx, &mut payload.clone())?;
            ops.payload_alignment()
        });
        let mut ops = ReadOps::new(NaluReader::new(&data, false));
        let mut parsed = SeiPayload::new(2);
        sei_payload(&mut ops, &mut ctx, &mut parsed).unwrap();
        assert_eq!(parsed, payload);

        // Four rectangles do not fit.
        if let SeiPayload::PanScanRect(sei) = &mut payload {
            sei.pan_scan_cnt_minus1 = 3;
            sei.rects.resize(4, Default::default());
        }
        let mut w = NaluWriter::new(false);
        assert!(sei_payload(&mut WriteOps::new(&mut w), &mut ctx, &mut payload).is_err());

        let mut payload = SeiPayload::UserDataUnregistered(SeiUserDataUnregistered {
            uuid_iso_iec_11578: [0xab; 16],
            data: b"x264".to_vec(),
        });
        let data = write_with(|ops| sei_payload(ops, &mut ctx, &mut payload.clone()));
        assert_eq!(data.len(), 20);
        let mut ops = ReadOps::new(NaluReader::new(&data, false));
        let mut parsed = SeiPayload::new(5);
        sei_payload(&mut ops, &mut ctx, &mut parsed).unwrap();
        assert_eq!(parsed, payload);
    }

    #[test]
    fn sei_timing_payloads_need_sps() {
        let mut ctx = Ctx::new();
        let mut payload = SeiPayload::new(1);
        let mut ops = ReadOps::new(NaluReader::new(&[0x80], false));
        assert!(matches!(
            sei_payload(&mut ops, &mut ctx, &mut payload),
            Err(H264Error::Protocol(_))
        ));

        let mut sps = read_sps(&SPS_BASELINE).unwrap();
        sps.vui_parameters_present_flag = true;
        sps.vui_parameters.pic_struct_present_flag = true;
        sps.vui_parameters.vcl_hrd_parameters_present_flag = true;
        sps.vui_parameters.vcl_hrd_parameters.cpb = vec![Default::default()];
        sps.vui_parameters.vcl_hrd_parameters.cpb_removal_delay_length_minus1 = 7;
        sps.vui_parameters.vcl_hrd_parameters.dpb_output_delay_length_minus1 = 3;
        sps.vui_parameters.vcl_hrd_parameters.time_offset_length = 0;
        ctx.set_sps(sps).unwrap();

        let mut payload = SeiPayload::PicTiming(SeiPicTiming {
            cpb_removal_delay: 200,
            dpb_output_delay: 9,
            pic_struct: 3,
            clock_timestamps: vec![
                ClockTimestamp {
                    clock_timestamp_flag: true,
                    full_timestamp_flag: true,
                    n_frames: 12,
                    seconds_value: 59,
                    minutes_value: 1,
                    hours_value: 2,
                    ..Default::default()
                },
                Default::default(),
            ],
        });
        let data = write_with(|ops| {
            sei_payload(ops, &mut ctx, &mut payload.clone())?;
            ops.payload_alignment()
        });
        let mut ops = ReadOps::new(NaluReader::new(&data, false));
        let mut parsed = SeiPayload::new(1);
        sei_payload(&mut ops, &mut ctx, &mut parsed).unwrap();
        assert_eq!(parsed, payload);
    }
}
