// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Parameter set, slice header and access unit delimiter records.
//!
//! Field names follow the syntax element names of Rec. ITU-T H.264 so that
//! the traversals in [`crate::codec::h264::syntax`] read like the syntax
//! tables. Variable length lists are `Vec`s whose length is checked against
//! the standard's maxima when parsing.

use crate::codec::h264::types::NaluType;
use crate::codec::h264::types::SliceType;

pub const MAX_SPS_COUNT: usize = 32;
pub const MAX_PPS_COUNT: usize = 256;

/// Maximum number of `cpb` entries in the HRD parameters.
pub const MAX_CPB_COUNT: usize = 32;
/// Maximum number of `offset_for_ref_frame` values.
pub const MAX_REF_FRAMES_IN_POC_CYCLE: usize = 255;
/// Maximum number of slice groups.
pub const MAX_SLICE_GROUPS: usize = 8;
/// Maximum number of reference list modification operations per list.
pub const MAX_RPLM_COUNT: usize = 32;
/// Maximum number of memory management control operations.
pub const MAX_DRPM_COUNT: usize = 64;
/// Maximum number of active references per list.
pub const MAX_REF_IDX_ACTIVE: usize = 32;

pub(crate) const DEFAULT_4X4_INTRA: [u8; 16] = [
    6, 13, 13, 20, 20, 20, 28, 28, 28, 28, 32, 32, 32, 37, 37, 42,
];

pub(crate) const DEFAULT_4X4_INTER: [u8; 16] = [
    10, 14, 14, 20, 20, 20, 24, 24, 24, 24, 27, 27, 27, 30, 30, 34,
];

pub(crate) const DEFAULT_8X8_INTRA: [u8; 64] = [
    6, 10, 10, 13, 11, 13, 16, 16, 16, 16, 18, 18, 18, 18, 18, 23, 23, 23, 23, 23, 23, 25, 25, 25,
    25, 25, 25, 25, 27, 27, 27, 27, 27, 27, 27, 27, 29, 29, 29, 29, 29, 29, 29, 31, 31, 31, 31, 31,
    31, 33, 33, 33, 33, 33, 36, 36, 36, 36, 38, 38, 38, 40, 40, 42,
];

pub(crate) const DEFAULT_8X8_INTER: [u8; 64] = [
    9, 13, 13, 15, 13, 15, 17, 17, 17, 17, 19, 19, 19, 19, 19, 21, 21, 21, 21, 21, 21, 22, 22, 22,
    22, 22, 22, 22, 24, 24, 24, 24, 24, 24, 24, 24, 25, 25, 25, 25, 25, 25, 25, 27, 27, 27, 27, 27,
    27, 28, 28, 28, 28, 28, 30, 30, 30, 30, 32, 32, 32, 33, 33, 35,
];

/// 7.3.1 NAL unit header.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NaluHeader {
    pub forbidden_zero_bit: bool,
    pub nal_ref_idc: u8,
    pub nal_unit_type: u8,
}

impl NaluHeader {
    pub fn type_(&self) -> NaluType {
        NaluType::from_raw(self.nal_unit_type)
    }

    pub fn idr_pic_flag(&self) -> bool {
        self.type_() == NaluType::SliceIdr
    }
}

/// Scaling lists of an SPS or PPS, see 7.3.2.1.1.1.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScalingMatrix {
    pub scaling_list_present_flag: [bool; 12],
    pub scaling_list_4x4: [[u8; 16]; 6],
    pub scaling_list_8x8: [[u8; 64]; 6],
    pub use_default_4x4: [bool; 6],
    pub use_default_8x8: [bool; 6],

    /// The list was coded with its trailing repeated values omitted, and is
    /// re-encoded the same way.
    pub optimized_4x4: [bool; 6],
    pub optimized_8x8: [bool; 6],
}

impl Default for ScalingMatrix {
    fn default() -> Self {
        Self {
            scaling_list_present_flag: [false; 12],
            scaling_list_4x4: [[16; 16]; 6],
            scaling_list_8x8: [[16; 64]; 6],
            use_default_4x4: [false; 6],
            use_default_8x8: [false; 6],
            optimized_4x4: [false; 6],
            optimized_8x8: [false; 6],
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HrdCpb {
    pub bit_rate_value_minus1: u32,
    pub cpb_size_value_minus1: u32,
    pub cbr_flag: bool,
}

/// E.1.2 HRD parameters.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HrdParams {
    /// Plus 1 specifies the number of alternative CPB specifications in the
    /// bitstream. The value of `cpb_cnt_minus1` shall be in the range of 0 to 31,
    /// inclusive
    pub cpb_cnt_minus1: u8,
    pub bit_rate_scale: u8,
    pub cpb_size_scale: u8,

    /// One entry per `cpb_cnt_minus1 + 1`.
    pub cpb: Vec<HrdCpb>,

    pub initial_cpb_removal_delay_length_minus1: u8,
    pub cpb_removal_delay_length_minus1: u8,
    pub dpb_output_delay_length_minus1: u8,
    pub time_offset_length: u8,
}

impl HrdParams {
    /// Bit rate in bits per second of the first CPB specification, E.2.2.
    pub fn bit_rate(&self) -> u32 {
        self.cpb.first().map_or(0, |cpb| {
            ((cpb.bit_rate_value_minus1 as u64 + 1) << (6 + self.bit_rate_scale as u32)) as u32
        })
    }

    /// CPB size in bits of the first CPB specification, E.2.2.
    pub fn cpb_size(&self) -> u32 {
        self.cpb.first().map_or(0, |cpb| {
            ((cpb.cpb_size_value_minus1 as u64 + 1) << (4 + self.cpb_size_scale as u32)) as u32
        })
    }
}

/// E.1.1 VUI parameters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VuiParams {
    pub aspect_ratio_info_present_flag: bool,
    pub aspect_ratio_idc: u8,
    pub sar_width: u16,
    pub sar_height: u16,

    pub overscan_info_present_flag: bool,
    pub overscan_appropriate_flag: bool,

    pub video_signal_type_present_flag: bool,
    pub video_format: u8,
    pub video_full_range_flag: bool,
    pub colour_description_present_flag: bool,
    pub colour_primaries: u8,
    pub transfer_characteristics: u8,
    pub matrix_coefficients: u8,

    pub chroma_loc_info_present_flag: bool,
    pub chroma_sample_loc_type_top_field: u8,
    pub chroma_sample_loc_type_bottom_field: u8,

    pub timing_info_present_flag: bool,
    pub num_units_in_tick: u32,
    pub time_scale: u32,
    pub fixed_frame_rate_flag: bool,

    pub nal_hrd_parameters_present_flag: bool,
    pub nal_hrd_parameters: HrdParams,
    pub vcl_hrd_parameters_present_flag: bool,
    pub vcl_hrd_parameters: HrdParams,
    pub low_delay_hrd_flag: bool,

    pub pic_struct_present_flag: bool,

    pub bitstream_restriction_flag: bool,
    pub motion_vectors_over_pic_boundaries_flag: bool,
    pub max_bytes_per_pic_denom: u32,
    pub max_bits_per_mb_denom: u32,
    pub log2_max_mv_length_horizontal: u32,
    pub log2_max_mv_length_vertical: u32,
    pub max_num_reorder_frames: u32,
    pub max_dec_frame_buffering: u32,
}

impl Default for VuiParams {
    fn default() -> Self {
        Self {
            aspect_ratio_info_present_flag: false,
            aspect_ratio_idc: 0,
            sar_width: 0,
            sar_height: 0,
            overscan_info_present_flag: false,
            overscan_appropriate_flag: false,
            video_signal_type_present_flag: false,
            // Unspecified video format, E.2.1.
            video_format: 5,
            video_full_range_flag: false,
            colour_description_present_flag: false,
            colour_primaries: 2,
            transfer_characteristics: 2,
            matrix_coefficients: 2,
            chroma_loc_info_present_flag: false,
            chroma_sample_loc_type_top_field: 0,
            chroma_sample_loc_type_bottom_field: 0,
            timing_info_present_flag: false,
            num_units_in_tick: 0,
            time_scale: 0,
            fixed_frame_rate_flag: false,
            nal_hrd_parameters_present_flag: false,
            nal_hrd_parameters: Default::default(),
            vcl_hrd_parameters_present_flag: false,
            vcl_hrd_parameters: Default::default(),
            low_delay_hrd_flag: false,
            pic_struct_present_flag: false,
            bitstream_restriction_flag: false,
            motion_vectors_over_pic_boundaries_flag: false,
            max_bytes_per_pic_denom: 0,
            max_bits_per_mb_denom: 0,
            log2_max_mv_length_horizontal: 0,
            log2_max_mv_length_vertical: 0,
            max_num_reorder_frames: 0,
            max_dec_frame_buffering: 0,
        }
    }
}

/// A H264 Sequence Parameter Set, 7.3.2.1.1.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sps {
    /// Profile to which the coded video sequence conforms
    pub profile_idc: u8,

    pub constraint_set0_flag: bool,
    pub constraint_set1_flag: bool,
    pub constraint_set2_flag: bool,
    pub constraint_set3_flag: bool,
    pub constraint_set4_flag: bool,
    pub constraint_set5_flag: bool,
    pub reserved_zero_2bits: u8,

    pub level_idc: u8,

    /// Identifies the sequence parameter set that is referred to by the picture
    /// parameter set
    pub seq_parameter_set_id: u8,

    /// Only present for the high profiles; 1 (4:2:0) otherwise.
    pub chroma_format_idc: u8,
    pub separate_colour_plane_flag: bool,
    pub bit_depth_luma_minus8: u8,
    pub bit_depth_chroma_minus8: u8,
    pub qpprime_y_zero_transform_bypass_flag: bool,
    pub seq_scaling_matrix_present_flag: bool,
    pub seq_scaling_matrix: ScalingMatrix,

    pub log2_max_frame_num_minus4: u8,
    pub pic_order_cnt_type: u8,
    pub log2_max_pic_order_cnt_lsb_minus4: u8,
    pub delta_pic_order_always_zero_flag: bool,
    pub offset_for_non_ref_pic: i32,
    pub offset_for_top_to_bottom_field: i32,
    pub num_ref_frames_in_pic_order_cnt_cycle: u8,
    pub offset_for_ref_frame: Vec<i32>,

    pub max_num_ref_frames: u32,
    pub gaps_in_frame_num_value_allowed_flag: bool,
    pub pic_width_in_mbs_minus1: u32,
    pub pic_height_in_map_units_minus1: u32,
    pub frame_mbs_only_flag: bool,
    pub mb_adaptive_frame_field_flag: bool,
    pub direct_8x8_inference_flag: bool,

    pub frame_cropping_flag: bool,
    pub frame_crop_left_offset: u32,
    pub frame_crop_right_offset: u32,
    pub frame_crop_top_offset: u32,
    pub frame_crop_bottom_offset: u32,

    pub vui_parameters_present_flag: bool,
    pub vui_parameters: VuiParams,
}

impl Default for Sps {
    fn default() -> Self {
        Self {
            profile_idc: 0,
            constraint_set0_flag: false,
            constraint_set1_flag: false,
            constraint_set2_flag: false,
            constraint_set3_flag: false,
            constraint_set4_flag: false,
            constraint_set5_flag: false,
            reserved_zero_2bits: 0,
            level_idc: 0,
            seq_parameter_set_id: 0,
            chroma_format_idc: 1,
            separate_colour_plane_flag: false,
            bit_depth_luma_minus8: 0,
            bit_depth_chroma_minus8: 0,
            qpprime_y_zero_transform_bypass_flag: false,
            seq_scaling_matrix_present_flag: false,
            seq_scaling_matrix: Default::default(),
            log2_max_frame_num_minus4: 0,
            pic_order_cnt_type: 0,
            log2_max_pic_order_cnt_lsb_minus4: 0,
            delta_pic_order_always_zero_flag: false,
            offset_for_non_ref_pic: 0,
            offset_for_top_to_bottom_field: 0,
            num_ref_frames_in_pic_order_cnt_cycle: 0,
            offset_for_ref_frame: Vec::new(),
            max_num_ref_frames: 0,
            gaps_in_frame_num_value_allowed_flag: false,
            pic_width_in_mbs_minus1: 0,
            pic_height_in_map_units_minus1: 0,
            frame_mbs_only_flag: true,
            mb_adaptive_frame_field_flag: false,
            direct_8x8_inference_flag: false,
            frame_cropping_flag: false,
            frame_crop_left_offset: 0,
            frame_crop_right_offset: 0,
            frame_crop_top_offset: 0,
            frame_crop_bottom_offset: 0,
            vui_parameters_present_flag: false,
            vui_parameters: Default::default(),
        }
    }
}

impl Sps {
    /// Whether `profile_idc` is one of the profiles carrying the chroma format
    /// and bit depth fields, see 7.3.2.1.1.
    pub fn has_chroma_info(&self) -> bool {
        matches!(
            self.profile_idc,
            100 | 110 | 122 | 244 | 44 | 83 | 86 | 118 | 128 | 138 | 139 | 134 | 135
        )
    }

    /// ChromaArrayType, see the semantics of `separate_colour_plane_flag`.
    pub const fn chroma_array_type(&self) -> u8 {
        match self.separate_colour_plane_flag {
            false => self.chroma_format_idc,
            true => 0,
        }
    }
}

/// A H264 Picture Parameter Set, 7.3.2.2.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Pps {
    pub pic_parameter_set_id: u8,
    pub seq_parameter_set_id: u8,
    pub entropy_coding_mode_flag: bool,
    pub bottom_field_pic_order_in_frame_present_flag: bool,

    pub num_slice_groups_minus1: u8,
    pub slice_group_map_type: u8,
    /// Map type 0, one per slice group.
    pub run_length_minus1: Vec<u32>,
    /// Map type 2, one per slice group but the last.
    pub top_left: Vec<u32>,
    pub bottom_right: Vec<u32>,
    /// Map types 3 to 5.
    pub slice_group_change_direction_flag: bool,
    pub slice_group_change_rate_minus1: u32,
    /// Map type 6.
    pub pic_size_in_map_units_minus1: u32,
    pub slice_group_id: Vec<u32>,

    pub num_ref_idx_l0_default_active_minus1: u8,
    pub num_ref_idx_l1_default_active_minus1: u8,
    pub weighted_pred_flag: bool,
    pub weighted_bipred_idc: u8,
    pub pic_init_qp_minus26: i8,
    pub pic_init_qs_minus26: i8,
    pub chroma_qp_index_offset: i8,
    pub deblocking_filter_control_present_flag: bool,
    pub constrained_intra_pred_flag: bool,
    pub redundant_pic_cnt_present_flag: bool,

    /// The optional trailing fields below are present in the bitstream.
    pub more_rbsp_data_present: bool,
    pub transform_8x8_mode_flag: bool,
    pub pic_scaling_matrix_present_flag: bool,
    pub pic_scaling_matrix: ScalingMatrix,
    pub second_chroma_qp_index_offset: i8,
}

/// 7.3.2.4 Access unit delimiter.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Aud {
    pub primary_pic_type: u8,
}

/// One `modification_of_pic_nums_idc` operation. The list is terminated by an
/// item with `modification_of_pic_nums_idc == 3`, which is kept.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RefPicListModification {
    pub modification_of_pic_nums_idc: u8,
    /* if modification_of_pic_nums_idc == 0 || 1 */
    pub abs_diff_pic_num_minus1: u32,
    /* if modification_of_pic_nums_idc == 2 */
    pub long_term_pic_num: u32,
    /* if modification_of_pic_nums_idc == 4 || 5 */
    pub abs_diff_view_idx_minus1: u32,
}

/// 7.3.3.1 Reference picture list modification.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RefPicListModifications {
    pub ref_pic_list_modification_flag_l0: bool,
    pub pic_num_l0: Vec<RefPicListModification>,
    pub ref_pic_list_modification_flag_l1: bool,
    pub pic_num_l1: Vec<RefPicListModification>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PredWeight {
    pub luma_weight_flag: bool,
    pub luma_weight: i32,
    pub luma_offset: i32,
    pub chroma_weight_flag: bool,
    pub chroma_weight: [i32; 2],
    pub chroma_offset: [i32; 2],
}

/// 7.3.3.2 Prediction weight table.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PredWeightTable {
    pub luma_log2_weight_denom: u8,
    pub chroma_log2_weight_denom: u8,
    /// One entry per active reference of list 0.
    pub l0: Vec<PredWeight>,
    /// One entry per active reference of list 1, B slices only.
    pub l1: Vec<PredWeight>,
}

/// One memory management control operation. The list is terminated by an
/// item with `memory_management_control_operation == 0`, which is kept.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RefPicMarkingInner {
    pub memory_management_control_operation: u8,
    pub difference_of_pic_nums_minus1: u32,
    pub long_term_pic_num: u32,
    pub long_term_frame_idx: u32,
    pub max_long_term_frame_idx_plus1: u32,
}

/// 7.3.3.3 Decoded reference picture marking.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RefPicMarking {
    pub no_output_of_prior_pics_flag: bool,
    pub long_term_reference_flag: bool,
    pub adaptive_ref_pic_marking_mode_flag: bool,
    pub inner: Vec<RefPicMarkingInner>,
}

/// 7.3.3 Slice header.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SliceHeader {
    pub first_mb_in_slice: u32,
    /// Raw value, 0 to 9. See [`SliceHeader::type_`].
    pub slice_type: u8,
    pub pic_parameter_set_id: u8,
    pub colour_plane_id: u8,
    pub frame_num: u16,
    pub field_pic_flag: bool,
    pub bottom_field_flag: bool,
    pub idr_pic_id: u16,
    pub pic_order_cnt_lsb: u16,
    pub delta_pic_order_cnt_bottom: i32,
    pub delta_pic_order_cnt: [i32; 2],
    pub redundant_pic_cnt: u8,
    pub direct_spatial_mv_pred_flag: bool,
    pub num_ref_idx_active_override_flag: bool,
    pub num_ref_idx_l0_active_minus1: u8,
    pub num_ref_idx_l1_active_minus1: u8,
    pub ref_pic_list_modification: RefPicListModifications,
    pub pred_weight_table: PredWeightTable,
    pub dec_ref_pic_marking: RefPicMarking,
    pub cabac_init_idc: u8,
    pub slice_qp_delta: i8,
    pub sp_for_switch_flag: bool,
    pub slice_qs_delta: i8,
    pub disable_deblocking_filter_idc: u8,
    pub slice_alpha_c0_offset_div2: i8,
    pub slice_beta_offset_div2: i8,
    pub slice_group_change_cycle: u32,
}

impl SliceHeader {
    /// The slice type, or `None` for an out of range raw value.
    pub fn type_(&self) -> Option<SliceType> {
        SliceType::from_raw(self.slice_type as u32)
    }

    /// The slice type, defaulting to P for an out of range raw value.
    pub(crate) fn kind(&self) -> SliceType {
        self.type_().unwrap_or_default()
    }
}
