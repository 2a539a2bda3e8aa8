// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Enumerations shared by the H.264 syntax structures, and their string forms.

use enumn::N;

/// NAL unit types, see table 7-1.
#[derive(N, Debug, Default, PartialEq, Eq, Clone, Copy)]
#[repr(u8)]
pub enum NaluType {
    #[default]
    Unknown = 0,
    Slice = 1,
    SliceDpa = 2,
    SliceDpb = 3,
    SliceDpc = 4,
    SliceIdr = 5,
    Sei = 6,
    Sps = 7,
    Pps = 8,
    Aud = 9,
    EndOfSeq = 10,
    EndOfStream = 11,
    Filler = 12,
    SpsExt = 13,
    PrefixNalu = 14,
    SubsetSps = 15,
    DepthSps = 16,
    SliceAux = 19,
    SliceExt = 20,
    SliceDepthExt = 21,
}

impl NaluType {
    /// Maps a raw `nal_unit_type`, reserved values becoming `Unknown`.
    pub fn from_raw(nal_unit_type: u8) -> Self {
        Self::n(nal_unit_type).unwrap_or(Self::Unknown)
    }

    /// Whether this NAL unit carries a slice of the primary coded picture
    /// that this crate knows how to parse.
    pub fn is_vcl(&self) -> bool {
        matches!(self, NaluType::Slice | NaluType::SliceIdr)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NaluType::Unknown => "UNKNOWN",
            NaluType::Slice => "SLICE",
            NaluType::SliceDpa => "SLICE_DPA",
            NaluType::SliceDpb => "SLICE_DPB",
            NaluType::SliceDpc => "SLICE_DPC",
            NaluType::SliceIdr => "SLICE_IDR",
            NaluType::Sei => "SEI",
            NaluType::Sps => "SPS",
            NaluType::Pps => "PPS",
            NaluType::Aud => "AUD",
            NaluType::EndOfSeq => "END_OF_SEQ",
            NaluType::EndOfStream => "END_OF_STREAM",
            NaluType::Filler => "FILLER",
            NaluType::SpsExt => "SPS_EXT",
            NaluType::PrefixNalu => "PREFIX_NALU",
            NaluType::SubsetSps => "SUBSET_SPS",
            NaluType::DepthSps => "DEPTH_SPS",
            NaluType::SliceAux => "SLICE_AUX",
            NaluType::SliceExt => "SLICE_EXT",
            NaluType::SliceDepthExt => "SLICE_DEPTH_EXT",
        }
    }
}

#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
/// See table 7-6.
pub enum SliceType {
    #[default]
    P = 0,
    B = 1,
    I = 2,
    Sp = 3,
    Si = 4,
}

impl SliceType {
    /// Maps a raw `slice_type`. Values 5 to 9 mean that all the slices of the
    /// picture share the same type.
    pub fn from_raw(slice_type: u32) -> Option<Self> {
        if slice_type > 9 {
            return None;
        }
        Self::n((slice_type % 5) as u8)
    }

    /// Whether this is a P slice, table 7-6.
    pub fn is_p(&self) -> bool {
        matches!(self, SliceType::P)
    }

    /// Whether this is a B slice, table 7-6.
    pub fn is_b(&self) -> bool {
        matches!(self, SliceType::B)
    }

    /// Whether this is an I slice, table 7-6.
    pub fn is_i(&self) -> bool {
        matches!(self, SliceType::I)
    }

    /// Whether this is a SP slice, table 7-6.
    pub fn is_sp(&self) -> bool {
        matches!(self, SliceType::Sp)
    }

    /// Whether this is a SI slice, table 7-6.
    pub fn is_si(&self) -> bool {
        matches!(self, SliceType::Si)
    }

    /// I and SI slices carry no inter prediction.
    pub fn is_intra(&self) -> bool {
        self.is_i() || self.is_si()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SliceType::P => "P",
            SliceType::B => "B",
            SliceType::I => "I",
            SliceType::Sp => "SP",
            SliceType::Si => "SI",
        }
    }
}

/// Macroblock types of tables 7-11 to 7-14, folded into one enumeration.
/// The discriminants are not part of the bitstream.
#[allow(non_camel_case_types)]
#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum MbType {
    #[default]
    Unknown = 0,
    I_NxN,
    I_16x16,
    I_PCM,
    SI,
    P_16x16,
    P_16x8,
    P_8x16,
    P_8x8,
    P_8x8ref0,
    P_Skip,
    B_Direct_16x16,
    B_16x16,
    B_16x8,
    B_8x16,
    B_8x8,
    B_Skip,
}

impl MbType {
    pub fn is_intra(&self) -> bool {
        matches!(
            self,
            MbType::I_NxN | MbType::I_16x16 | MbType::I_PCM | MbType::SI
        )
    }

    pub fn is_inter(&self) -> bool {
        !matches!(self, MbType::Unknown) && !self.is_intra()
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, MbType::P_Skip | MbType::B_Skip)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MbType::Unknown => "UNKNOWN",
            MbType::I_NxN => "I_NxN",
            MbType::I_16x16 => "I_16x16",
            MbType::I_PCM => "I_PCM",
            MbType::SI => "SI",
            MbType::P_16x16 => "P_16x16",
            MbType::P_16x8 => "P_16x8",
            MbType::P_8x16 => "P_8x16",
            MbType::P_8x8 => "P_8x8",
            MbType::P_8x8ref0 => "P_8x8ref0",
            MbType::P_Skip => "P_SKIP",
            MbType::B_Direct_16x16 => "B_Direct_16x16",
            MbType::B_16x16 => "B_16x16",
            MbType::B_16x8 => "B_16x8",
            MbType::B_8x16 => "B_8x16",
            MbType::B_8x8 => "B_8x8",
            MbType::B_Skip => "B_SKIP",
        }
    }
}

/// Sub-macroblock types, tables 7-17 and 7-18.
#[allow(non_camel_case_types)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SubMbType {
    #[default]
    P_8x8,
    P_8x4,
    P_4x8,
    P_4x4,
    B_Direct_8x8,
    B_8x8,
    B_8x4,
    B_4x8,
    B_4x4,
}

/// Macroblock and sub-macroblock prediction modes.
#[allow(non_camel_case_types)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PredMode {
    #[default]
    Intra_4x4,
    Intra_8x8,
    Intra_16x16,
    Pred_L0,
    Pred_L1,
    BiPred,
    Direct,
}

impl PredMode {
    /// Whether a partition in this mode uses list 0.
    pub fn uses_l0(&self) -> bool {
        matches!(self, PredMode::Pred_L0 | PredMode::BiPred)
    }

    /// Whether a partition in this mode uses list 1.
    pub fn uses_l1(&self) -> bool {
        matches!(self, PredMode::Pred_L1 | PredMode::BiPred)
    }
}

/// Profiles, see Annex A.2.
#[derive(N, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Profile {
    Cavlc444 = 44,
    Baseline = 66,
    Main = 77,
    Extended = 88,
    High = 100,
    High10 = 110,
    High422P = 122,
    High444P = 244,
}

impl Profile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Profile::Cavlc444 => "CAVLC_444",
            Profile::Baseline => "BASELINE",
            Profile::Main => "MAIN",
            Profile::Extended => "EXTENDED",
            Profile::High => "HIGH",
            Profile::High10 => "HIGH_10",
            Profile::High422P => "HIGH_422",
            Profile::High444P => "HIGH_444",
        }
    }
}

/// String form of a raw `profile_idc`.
pub fn profile_str(profile_idc: u8) -> &'static str {
    Profile::n(profile_idc).map_or("UNKNOWN", |p| p.as_str())
}

/// Chroma sampling, see 6.2.
#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum ColorFormat {
    Mono = 0,
    #[default]
    Yuv420 = 1,
    Yuv422 = 2,
    Yuv444 = 3,
}

impl ColorFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColorFormat::Mono => "MONO",
            ColorFormat::Yuv420 => "YUV420",
            ColorFormat::Yuv422 => "YUV422",
            ColorFormat::Yuv444 => "YUV444",
        }
    }
}

/// Sample aspect ratio indicator, table E-1.
#[allow(non_camel_case_types)]
#[derive(N, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[repr(u8)]
pub enum AspectRatio {
    #[default]
    Unspecified = 0,
    Ratio1_1 = 1,
    Ratio12_11 = 2,
    Ratio10_11 = 3,
    Ratio16_11 = 4,
    Ratio40_33 = 5,
    Ratio24_11 = 6,
    Ratio20_11 = 7,
    Ratio32_11 = 8,
    Ratio80_33 = 9,
    Ratio18_11 = 10,
    Ratio15_11 = 11,
    Ratio64_33 = 12,
    Ratio160_99 = 13,
    Ratio4_3 = 14,
    Ratio3_2 = 15,
    Ratio2_1 = 16,
    ExtendedSar = 255,
}

/// Table E-1, indexed by `aspect_ratio_idc`. Entry 0 is unspecified.
pub const SAR_TABLE: [(u16, u16); 17] = [
    (0, 0),
    (1, 1),
    (12, 11),
    (10, 11),
    (16, 11),
    (40, 33),
    (24, 11),
    (20, 11),
    (32, 11),
    (80, 33),
    (18, 11),
    (15, 11),
    (64, 33),
    (160, 99),
    (4, 3),
    (3, 2),
    (2, 1),
];

impl AspectRatio {
    /// The sample aspect ratio for a table entry. `None` for `Unspecified`
    /// and `ExtendedSar`, whose ratio lives in the VUI.
    pub fn sar(&self) -> Option<(u16, u16)> {
        match self {
            AspectRatio::Unspecified | AspectRatio::ExtendedSar => None,
            other => Some(SAR_TABLE[*other as usize]),
        }
    }
}

/// Finds the table entry matching a sample aspect ratio, or `ExtendedSar`.
pub fn sar_to_aspect_ratio_idc(sar_width: u32, sar_height: u32) -> AspectRatio {
    SAR_TABLE
        .iter()
        .enumerate()
        .skip(1)
        .find(|(_, (w, h))| *w as u32 == sar_width && *h as u32 == sar_height)
        .and_then(|(idx, _)| AspectRatio::n(idx as u8))
        .unwrap_or(AspectRatio::ExtendedSar)
}

/// Renders an aspect ratio, using the explicit ratio for `ExtendedSar`.
pub fn aspect_ratio_str(val: AspectRatio, sar_width: u32, sar_height: u32) -> String {
    match val {
        AspectRatio::Unspecified => "UNSPECIFIED".into(),
        AspectRatio::ExtendedSar => format!("EXTENDED_SAR_{}:{}", sar_width, sar_height),
        other => {
            let (w, h) = SAR_TABLE[other as usize];
            format!("{}:{}", w, h)
        }
    }
}

/// SEI payload types, see D.1.
#[derive(N, Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u32)]
pub enum SeiType {
    BufferingPeriod = 0,
    PicTiming = 1,
    PanScanRect = 2,
    FillerPayload = 3,
    UserDataRegistered = 4,
    UserDataUnregistered = 5,
    RecoveryPoint = 6,
    DecRefPicMarkingRepetition = 7,
    SparePic = 8,
    SceneInfo = 9,
    SubSeqInfo = 10,
    SubSeqLayerCharacteristics = 11,
    SubSeqCharacteristics = 12,
    FullFrameFreeze = 13,
    FullFrameFreezeRelease = 14,
    FullFrameSnapshot = 15,
    ProgressiveRefinementSegmentStart = 16,
    ProgressiveRefinementSegmentEnd = 17,
    MotionConstrainedSliceGroupSet = 18,
    FilmGrainCharacteristics = 19,
    DeblockingFilterDisplayPreference = 20,
    StereoVideoInfo = 21,
    PostFilterHint = 22,
    ToneMappingInfo = 23,
    ScalabilityInfo = 24,
    SubPicScalableLayer = 25,
    NonRequiredLayerRep = 26,
    PriorityLayerInfo = 27,
    LayersNotPresent = 28,
    LayerDependencyChange = 29,
    ScalableNesting = 30,
    BaseLayerTemporalHrd = 31,
    QualityLayerIntegrityCheck = 32,
    RedundantPicProperty = 33,
    Tl0DepRepIndex = 34,
    TlSwitchingPoint = 35,
    ParallelDecodingInfo = 36,
    MvcScalableNesting = 37,
    ViewScalabilityInfo = 38,
    MultiviewSceneInfo = 39,
    MultiviewAcquisitionInfo = 40,
    NonRequiredViewComponent = 41,
    ViewDependencyChange = 42,
    OperationPointsNotPresent = 43,
    BaseViewTemporalHrd = 44,
    FramePackingArrangement = 45,
    MultiviewViewPosition = 46,
    DisplayOrientation = 47,
    MvcdScalableNesting = 48,
    MvcdViewScalabilityInfo = 49,
    DepthRepresentationInfo = 50,
    ThreeDimensionalReferenceDisplaysInfo = 51,
    DepthTiming = 52,
    DepthSamplingInfo = 53,
    ConstrainedDepthParameterSetIdentifier = 54,
}

impl SeiType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SeiType::BufferingPeriod => "BUFFERING_PERIOD",
            SeiType::PicTiming => "PIC_TIMING",
            SeiType::PanScanRect => "PAN_SCAN_RECT",
            SeiType::FillerPayload => "FILLER_PAYLOAD",
            SeiType::UserDataRegistered => "USER_DATA_REGISTERED",
            SeiType::UserDataUnregistered => "USER_DATA_UNREGISTERED",
            SeiType::RecoveryPoint => "RECOVERY_POINT",
            SeiType::DecRefPicMarkingRepetition => "DEC_REF_PIC_MARKING_REPETITION",
            SeiType::SparePic => "SPARE_PIC",
            SeiType::SceneInfo => "SCENE_INFO",
            SeiType::SubSeqInfo => "SUB_SEQ_INFO",
            SeiType::SubSeqLayerCharacteristics => "SUB_SEQ_LAYER_CHARACTERISTICS",
            SeiType::SubSeqCharacteristics => "SUB_SEQ_CHARACTERISTICS",
            SeiType::FullFrameFreeze => "FULL_FRAME_FREEZE",
            SeiType::FullFrameFreezeRelease => "FULL_FRAME_FREEZE_RELEASE",
            SeiType::FullFrameSnapshot => "FULL_FRAME_SNAPSHOT",
            SeiType::ProgressiveRefinementSegmentStart => "PROGRESSIVE_REFINEMENT_SEGMENT_START",
            SeiType::ProgressiveRefinementSegmentEnd => "PROGRESSIVE_REFINEMENT_SEGMENT_END",
            SeiType::MotionConstrainedSliceGroupSet => "MOTION_CONSTRAINED_SLICE_GROUP_SET",
            SeiType::FilmGrainCharacteristics => "FILM_GRAIN_CHARACTERISTICS",
            SeiType::DeblockingFilterDisplayPreference => "DEBLOCKING_FILTER_DISPLAY_PREFERENCE",
            SeiType::StereoVideoInfo => "STEREO_VIDEO_INFO",
            SeiType::PostFilterHint => "POST_FILTER_HINT",
            SeiType::ToneMappingInfo => "TONE_MAPPING_INFO",
            SeiType::ScalabilityInfo => "SCALABILITY_INFO",
            SeiType::SubPicScalableLayer => "SUB_PIC_SCALABLE_LAYER",
            SeiType::NonRequiredLayerRep => "NON_REQUIRED_LAYER_REP",
            SeiType::PriorityLayerInfo => "PRIORITY_LAYER_INFO",
            SeiType::LayersNotPresent => "LAYERS_NOT_PRESENT",
            SeiType::LayerDependencyChange => "LAYER_DEPENDENCY_CHANGE",
            SeiType::ScalableNesting => "SCALABLE_NESTING",
            SeiType::BaseLayerTemporalHrd => "BASE_LAYER_TEMPORAL_HRD",
            SeiType::QualityLayerIntegrityCheck => "QUALITY_LAYER_INTEGRITY_CHECK",
            SeiType::RedundantPicProperty => "REDUNDANT_PIC_PROPERTY",
            SeiType::Tl0DepRepIndex => "TL0_DEP_REP_INDEX",
            SeiType::TlSwitchingPoint => "TL_SWITCHING_POINT",
            SeiType::ParallelDecodingInfo => "PARALLEL_DECODING_INFO",
            SeiType::MvcScalableNesting => "MVC_SCALABLE_NESTING",
            SeiType::ViewScalabilityInfo => "VIEW_SCALABILITY_INFO",
            SeiType::MultiviewSceneInfo => "MULTIVIEW_SCENE_INFO",
            SeiType::MultiviewAcquisitionInfo => "MULTIVIEW_ACQUISITION_INFO",
            SeiType::NonRequiredViewComponent => "NON_REQUIRED_VIEW_COMPONENT",
            SeiType::ViewDependencyChange => "VIEW_DEPENDENCY_CHANGE",
            SeiType::OperationPointsNotPresent => "OPERATION_POINTS_NOT_PRESENT",
            SeiType::BaseViewTemporalHrd => "BASE_VIEW_TEMPORAL_HRD",
            SeiType::FramePackingArrangement => "FRAME_PACKING_ARRANGEMENT",
            SeiType::MultiviewViewPosition => "MULTIVIEW_VIEW_POSITION",
            SeiType::DisplayOrientation => "DISPLAY_ORIENTATION",
            SeiType::MvcdScalableNesting => "MVCD_SCALABLE_NESTING",
            SeiType::MvcdViewScalabilityInfo => "MVCD_VIEW_SCALABILITY_INFO",
            SeiType::DepthRepresentationInfo => "DEPTH_REPRESENTATION_INFO",
            SeiType::ThreeDimensionalReferenceDisplaysInfo => {
                "THREE_DIMENSIONAL_REFERENCE_DISPLAYS_INFO"
            }
            SeiType::DepthTiming => "DEPTH_TIMING",
            SeiType::DepthSamplingInfo => "DEPTH_SAMPLING_INFO",
            SeiType::ConstrainedDepthParameterSetIdentifier => {
                "CONSTRAINED_DEPTH_PARAMETER_SET_IDENTIFIER"
            }
        }
    }
}

/// String form of a raw `payloadType`.
pub fn sei_type_str(payload_type: u32) -> &'static str {
    SeiType::n(payload_type).map_or("UNKNOWN", |t| t.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nalu_type_from_raw() {
        assert_eq!(NaluType::from_raw(5), NaluType::SliceIdr);
        assert_eq!(NaluType::from_raw(7), NaluType::Sps);
        assert_eq!(NaluType::from_raw(17), NaluType::Unknown);
        assert_eq!(NaluType::from_raw(31), NaluType::Unknown);
        assert!(NaluType::Slice.is_vcl());
        assert!(!NaluType::SliceDpa.is_vcl());
        assert_eq!(NaluType::Aud.as_str(), "AUD");
    }

    #[test]
    fn slice_type_modulo() {
        assert_eq!(SliceType::from_raw(7), Some(SliceType::I));
        assert_eq!(SliceType::from_raw(5), Some(SliceType::P));
        assert_eq!(SliceType::from_raw(9), Some(SliceType::Si));
        assert!(SliceType::Si.is_intra());
        assert!(!SliceType::Sp.is_intra());
    }

    #[test]
    fn mb_type_predicates() {
        assert!(MbType::I_PCM.is_intra());
        assert!(MbType::SI.is_intra());
        assert!(!MbType::I_16x16.is_inter());
        assert!(MbType::B_Skip.is_inter());
        assert!(MbType::P_Skip.is_skip());
        assert!(!MbType::Unknown.is_intra());
        assert!(!MbType::Unknown.is_inter());
    }

    #[test]
    fn aspect_ratio_lookup() {
        assert_eq!(sar_to_aspect_ratio_idc(4, 3), AspectRatio::Ratio4_3);
        assert_eq!(sar_to_aspect_ratio_idc(1, 1), AspectRatio::Ratio1_1);
        assert_eq!(sar_to_aspect_ratio_idc(160, 99), AspectRatio::Ratio160_99);
        assert_eq!(sar_to_aspect_ratio_idc(7, 3), AspectRatio::ExtendedSar);
        // The unspecified entry never matches.
        assert_eq!(sar_to_aspect_ratio_idc(0, 0), AspectRatio::ExtendedSar);

        assert_eq!(
            aspect_ratio_str(AspectRatio::ExtendedSar, 7, 3),
            "EXTENDED_SAR_7:3"
        );
        assert_eq!(aspect_ratio_str(AspectRatio::Ratio16_11, 0, 0), "16:11");
        assert_eq!(aspect_ratio_str(AspectRatio::Unspecified, 0, 0), "UNSPECIFIED");
        assert_eq!(AspectRatio::Ratio64_33.sar(), Some((64, 33)));
        assert_eq!(AspectRatio::ExtendedSar.sar(), None);
    }

    #[test]
    fn type_strings() {
        assert_eq!(profile_str(100), "HIGH");
        assert_eq!(profile_str(1), "UNKNOWN");
        assert_eq!(sei_type_str(5), "USER_DATA_UNREGISTERED");
        assert_eq!(sei_type_str(47), "DISPLAY_ORIENTATION");
        assert_eq!(sei_type_str(200), "UNKNOWN");
        assert_eq!(ColorFormat::Yuv422.as_str(), "YUV422");
    }
}
