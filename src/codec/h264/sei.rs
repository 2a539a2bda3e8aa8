// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Supplemental enhancement information records, Annex D.

use crate::codec::h264::types::SeiType;

/// Number of clock timestamps for each `pic_struct` value, table D-1.
pub const NUM_CLOCK_TS: [usize; 9] = [1, 1, 1, 2, 2, 3, 3, 2, 3];

/// Maximum number of pan-scan rectangles.
pub const MAX_PAN_SCAN_RECTS: usize = 3;

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InitialCpbRemoval {
    pub initial_cpb_removal_delay: u32,
    pub initial_cpb_removal_delay_offset: u32,
}

/// D.1.2 Buffering period.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SeiBufferingPeriod {
    pub seq_parameter_set_id: u8,
    /// One entry per NAL HRD CPB specification, if present.
    pub nal_hrd_cpb: Vec<InitialCpbRemoval>,
    /// One entry per VCL HRD CPB specification, if present.
    pub vcl_hrd_cpb: Vec<InitialCpbRemoval>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ClockTimestamp {
    pub clock_timestamp_flag: bool,
    pub ct_type: u8,
    pub nuit_field_based_flag: bool,
    pub counting_type: u8,
    pub full_timestamp_flag: bool,
    pub discontinuity_flag: bool,
    pub cnt_dropped_flag: bool,
    pub n_frames: u8,
    pub seconds_value: u8,
    pub minutes_value: u8,
    pub hours_value: u8,
    pub seconds_flag: bool,
    pub minutes_flag: bool,
    pub hours_flag: bool,
    pub time_offset: i32,
}

/// D.1.3 Picture timing.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SeiPicTiming {
    pub cpb_removal_delay: u32,
    pub dpb_output_delay: u32,
    pub pic_struct: u8,
    /// `NUM_CLOCK_TS[pic_struct]` entries when `pic_struct_present_flag` is set.
    pub clock_timestamps: Vec<ClockTimestamp>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PanScanRect {
    pub left_offset: i32,
    pub right_offset: i32,
    pub top_offset: i32,
    pub bottom_offset: i32,
}

/// D.1.4 Pan-scan rectangle.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SeiPanScanRect {
    pub pan_scan_rect_id: u32,
    pub pan_scan_rect_cancel_flag: bool,
    pub pan_scan_cnt_minus1: u8,
    pub rects: Vec<PanScanRect>,
    pub pan_scan_rect_repetition_period: u32,
}

/// D.1.5 Filler payload.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SeiFillerPayload {
    pub data: Vec<u8>,
}

/// D.1.6 User data registered by Rec. ITU-T T.35.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SeiUserDataRegistered {
    pub itu_t_t35_country_code: u8,
    /// Only present when the country code is 0xff.
    pub itu_t_t35_country_code_extension_byte: u8,
    pub data: Vec<u8>,
}

/// D.1.7 User data unregistered.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SeiUserDataUnregistered {
    pub uuid_iso_iec_11578: [u8; 16],
    pub data: Vec<u8>,
}

/// D.1.8 Recovery point.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SeiRecoveryPoint {
    pub recovery_frame_cnt: u32,
    pub exact_match_flag: bool,
    pub broken_link_flag: bool,
    pub changing_slice_group_idc: u8,
}

/// Full-frame freeze.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SeiFullFrameFreeze {
    pub full_frame_freeze_repetition_period: u32,
}

/// Deblocking filter display preference.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SeiDeblockingFilterDisplayPreference {
    pub deblocking_display_preference_cancel_flag: bool,
    pub display_prior_to_deblocking_preferred_flag: bool,
    pub dec_frame_buffering_constraint_flag: bool,
    pub deblocking_display_preference_repetition_period: u32,
}

/// Frame packing arrangement.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SeiFramePackingArrangement {
    pub frame_packing_arrangement_id: u32,
    pub frame_packing_arrangement_cancel_flag: bool,
    pub frame_packing_arrangement_type: u8,
    pub quincunx_sampling_flag: bool,
    pub content_interpretation_type: u8,
    pub spatial_flipping_flag: bool,
    pub frame0_flipped_flag: bool,
    pub field_views_flag: bool,
    pub current_frame_is_frame0_flag: bool,
    pub frame0_self_contained_flag: bool,
    pub frame1_self_contained_flag: bool,
    pub frame0_grid_position_x: u8,
    pub frame0_grid_position_y: u8,
    pub frame1_grid_position_x: u8,
    pub frame1_grid_position_y: u8,
    pub frame_packing_arrangement_reserved_byte: u8,
    pub frame_packing_arrangement_repetition_period: u32,
    pub frame_packing_arrangement_extension_flag: bool,
}

impl SeiFramePackingArrangement {
    /// Whether the grid positions are coded.
    pub fn has_grid_positions(&self) -> bool {
        !self.quincunx_sampling_flag && self.frame_packing_arrangement_type != 5
    }
}

/// Display orientation.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SeiDisplayOrientation {
    pub display_orientation_cancel_flag: bool,
    pub hor_flip: bool,
    pub ver_flip: bool,
    pub anticlockwise_rotation: u16,
    pub display_orientation_repetition_period: u32,
    pub display_orientation_extension_flag: bool,
}

/// Payload of a SEI message.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SeiPayload {
    BufferingPeriod(SeiBufferingPeriod),
    PicTiming(SeiPicTiming),
    PanScanRect(SeiPanScanRect),
    FillerPayload(SeiFillerPayload),
    UserDataRegistered(SeiUserDataRegistered),
    UserDataUnregistered(SeiUserDataUnregistered),
    RecoveryPoint(SeiRecoveryPoint),
    FullFrameFreeze(SeiFullFrameFreeze),
    DeblockingFilterDisplayPreference(SeiDeblockingFilterDisplayPreference),
    FramePackingArrangement(SeiFramePackingArrangement),
    DisplayOrientation(SeiDisplayOrientation),
    /// Any other payload type. Only the raw bytes are kept.
    Unknown(u32),
}

impl SeiPayload {
    /// An empty payload of the given type.
    pub fn new(payload_type: u32) -> Self {
        match SeiType::n(payload_type) {
            Some(SeiType::BufferingPeriod) => Self::BufferingPeriod(Default::default()),
            Some(SeiType::PicTiming) => Self::PicTiming(Default::default()),
            Some(SeiType::PanScanRect) => Self::PanScanRect(Default::default()),
            Some(SeiType::FillerPayload) => Self::FillerPayload(Default::default()),
            Some(SeiType::UserDataRegistered) => Self::UserDataRegistered(Default::default()),
            Some(SeiType::UserDataUnregistered) => Self::UserDataUnregistered(Default::default()),
            Some(SeiType::RecoveryPoint) => Self::RecoveryPoint(Default::default()),
            Some(SeiType::FullFrameFreeze) => Self::FullFrameFreeze(Default::default()),
            Some(SeiType::DeblockingFilterDisplayPreference) => {
                Self::DeblockingFilterDisplayPreference(Default::default())
            }
            Some(SeiType::FramePackingArrangement) => {
                Self::FramePackingArrangement(Default::default())
            }
            Some(SeiType::DisplayOrientation) => Self::DisplayOrientation(Default::default()),
            _ => Self::Unknown(payload_type),
        }
    }

    pub fn payload_type(&self) -> u32 {
        let type_ = match self {
            SeiPayload::BufferingPeriod(_) => SeiType::BufferingPeriod,
            SeiPayload::PicTiming(_) => SeiType::PicTiming,
            SeiPayload::PanScanRect(_) => SeiType::PanScanRect,
            SeiPayload::FillerPayload(_) => SeiType::FillerPayload,
            SeiPayload::UserDataRegistered(_) => SeiType::UserDataRegistered,
            SeiPayload::UserDataUnregistered(_) => SeiType::UserDataUnregistered,
            SeiPayload::RecoveryPoint(_) => SeiType::RecoveryPoint,
            SeiPayload::FullFrameFreeze(_) => SeiType::FullFrameFreeze,
            SeiPayload::DeblockingFilterDisplayPreference(_) => {
                SeiType::DeblockingFilterDisplayPreference
            }
            SeiPayload::FramePackingArrangement(_) => SeiType::FramePackingArrangement,
            SeiPayload::DisplayOrientation(_) => SeiType::DisplayOrientation,
            SeiPayload::Unknown(payload_type) => return *payload_type,
        };
        type_ as u32
    }
}

/// A SEI message and its encoded payload.
///
/// `raw` always holds the payload bytes as they appear between `payloadSize`
/// and the next message, without emulation prevention. It is what gets
/// written back, so a message that was parsed and not modified is reproduced
/// exactly.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sei {
    pub payload: SeiPayload,
    pub raw: Vec<u8>,
}

impl Sei {
    pub fn payload_type(&self) -> u32 {
        self.payload.payload_type()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_types() {
        assert_eq!(SeiPayload::new(5).payload_type(), 5);
        assert!(matches!(SeiPayload::new(6), SeiPayload::RecoveryPoint(_)));
        assert!(matches!(SeiPayload::new(45), SeiPayload::FramePackingArrangement(_)));
        // Known type without a structured payload.
        assert_eq!(SeiPayload::new(19), SeiPayload::Unknown(19));
        assert_eq!(SeiPayload::new(1000).payload_type(), 1000);
    }

    #[test]
    fn frame_packing_grid() {
        let mut fpa = SeiFramePackingArrangement {
            frame_packing_arrangement_type: 3,
            ..Default::default()
        };
        assert!(fpa.has_grid_positions());
        fpa.frame_packing_arrangement_type = 5;
        assert!(!fpa.has_grid_positions());
        fpa.frame_packing_arrangement_type = 4;
        fpa.quincunx_sampling_flag = true;
        assert!(!fpa.has_grid_positions());
    }
}
