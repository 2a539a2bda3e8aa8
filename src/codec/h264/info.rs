// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Picture information derived from the parameter sets, for users that do
//! not need to parse slices.

use anyhow::Context;

use crate::codec::h264::ctx::Ctx;
use crate::codec::h264::ctx::SpsDerived;
use crate::codec::h264::headers::Sps;
use crate::codec::h264::reader::parse_pps;
use crate::codec::h264::reader::parse_sps;
use crate::codec::h264::types::AspectRatio;

/// Colour description value meaning unspecified, Table E-3 to E-5.
const COLOUR_UNSPECIFIED: u8 = 2;

/// Summary of a coded video sequence. Sizes are in luma samples; the
/// timing and HRD values are 0 when the VUI does not carry them.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct H264Info {
    pub width: u32,
    pub height: u32,
    pub crop_left: u32,
    pub crop_top: u32,
    /// Equal to `width` when there is no cropping.
    pub crop_width: u32,
    /// Equal to `height` when there is no cropping.
    pub crop_height: u32,
    pub bit_depth_luma: u32,

    /// 1:1 when unknown.
    pub sar_width: u32,
    pub sar_height: u32,
    pub full_range: bool,
    pub colour_description_present: bool,
    pub colour_primaries: u8,
    pub transfer_characteristics: u8,
    pub matrix_coefficients: u8,

    pub num_units_in_tick: u32,
    pub time_scale: u32,
    pub framerate: f32,
    pub framerate_num: u32,
    pub framerate_den: u32,

    pub nal_hrd_bitrate: u32,
    pub nal_hrd_cpb_size: u32,
    pub vcl_hrd_bitrate: u32,
    pub vcl_hrd_cpb_size: u32,
}

impl H264Info {
    pub fn new(sps: &Sps) -> Self {
        let derived = SpsDerived::new(sps);
        let width = derived.pic_width_in_samples_luma;
        let height = derived.frame_height_in_mbs.saturating_mul(16);

        let mut info = Self {
            width,
            height,
            crop_width: width,
            crop_height: height,
            bit_depth_luma: derived.bit_depth_luma,
            sar_width: 1,
            sar_height: 1,
            colour_primaries: COLOUR_UNSPECIFIED,
            transfer_characteristics: COLOUR_UNSPECIFIED,
            matrix_coefficients: COLOUR_UNSPECIFIED,
            ..Default::default()
        };

        if sps.frame_cropping_flag {
            info.crop_left = sps.frame_crop_left_offset.saturating_mul(derived.crop_unit_x);
            info.crop_top = sps.frame_crop_top_offset.saturating_mul(derived.crop_unit_y);
            info.crop_width = derived.width;
            info.crop_height = derived.height;
        }

        if sps.vui_parameters_present_flag {
            info.set_vui(sps);
        }

        info
    }

    fn set_vui(&mut self, sps: &Sps) {
        let vui = &sps.vui_parameters;

        if vui.aspect_ratio_info_present_flag {
            match AspectRatio::n(vui.aspect_ratio_idc) {
                Some(AspectRatio::ExtendedSar) => {
                    self.sar_width = vui.sar_width as u32;
                    self.sar_height = vui.sar_height as u32;
                }
                Some(aspect_ratio) => {
                    if let Some((w, h)) = aspect_ratio.sar() {
                        self.sar_width = w as u32;
                        self.sar_height = h as u32;
                    }
                }
                None => (),
            }
        }

        self.full_range = vui.video_full_range_flag;
        if vui.colour_description_present_flag {
            self.colour_description_present = true;
            self.colour_primaries = vui.colour_primaries;
            self.transfer_characteristics = vui.transfer_characteristics;
            self.matrix_coefficients = vui.matrix_coefficients;
        }

        if vui.timing_info_present_flag {
            self.num_units_in_tick = vui.num_units_in_tick;
            self.time_scale = vui.time_scale;
            // A frame lasts two ticks.
            if vui.num_units_in_tick != 0 {
                self.framerate = vui.time_scale as f32 / 2.0 / vui.num_units_in_tick as f32;
            }
            if vui.time_scale % 2 == 0 {
                self.framerate_num = vui.time_scale / 2;
                self.framerate_den = vui.num_units_in_tick;
            } else {
                self.framerate_num = vui.time_scale;
                self.framerate_den = vui.num_units_in_tick.saturating_mul(2);
            }
        }

        if vui.nal_hrd_parameters_present_flag {
            self.nal_hrd_bitrate = vui.nal_hrd_parameters.bit_rate();
            self.nal_hrd_cpb_size = vui.nal_hrd_parameters.cpb_size();
        }
        if vui.vcl_hrd_parameters_present_flag {
            self.vcl_hrd_bitrate = vui.vcl_hrd_parameters.bit_rate();
            self.vcl_hrd_cpb_size = vui.vcl_hrd_parameters.cpb_size();
        }
    }
}

/// Parses a SPS and a PPS NAL unit, headers included, and summarizes them.
pub fn get_info(sps: &[u8], pps: &[u8]) -> anyhow::Result<H264Info> {
    let sps = parse_sps(sps).context("while parsing the SPS")?;
    parse_pps(pps, &sps).context("while parsing the PPS")?;
    Ok(H264Info::new(&sps))
}

impl Ctx {
    /// Summarizes the active parameter sets.
    pub fn get_info(&self) -> anyhow::Result<H264Info> {
        let sps = self.sps().context("no active SPS")?;
        self.pps().context("no active PPS")?;
        Ok(H264Info::new(sps))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::codec::h264::headers::HrdCpb;
    use crate::codec::h264::headers::HrdParams;
    use crate::codec::h264::headers::Pps;
    use crate::codec::h264::headers::VuiParams;

    const SPS_NALU: [u8; 8] = [0x67, 0x42, 0x00, 0x1e, 0xda, 0x05, 0x07, 0xe4];
    const PPS_NALU: [u8; 4] = [0x68, 0xce, 0x3c, 0x80];

    #[test]
    fn baseline_info() {
        let info = get_info(&SPS_NALU, &PPS_NALU).unwrap();
        assert_eq!((info.width, info.height), (320, 240));
        assert_eq!((info.crop_width, info.crop_height), (320, 240));
        assert_eq!(info.bit_depth_luma, 8);
        assert_eq!((info.sar_width, info.sar_height), (1, 1));
        assert!(!info.colour_description_present);
        assert_eq!(info.colour_primaries, 2);
        assert_eq!(info.matrix_coefficients, 2);
        assert_eq!(info.framerate, 0.0);
        assert_eq!(info.nal_hrd_bitrate, 0);

        assert!(get_info(&PPS_NALU, &SPS_NALU).is_err());
        assert!(get_info(&SPS_NALU, &[0x68]).is_err());
    }

    #[test]
    fn crop_left_and_top() {
        let sps = Sps {
            pic_width_in_mbs_minus1: 19,
            pic_height_in_map_units_minus1: 14,
            frame_mbs_only_flag: true,
            frame_cropping_flag: true,
            frame_crop_left_offset: 3,
            frame_crop_top_offset: 2,
            ..Default::default()
        };

        // 4:2:0 frames crop in units of two samples.
        let info = H264Info::new(&sps);
        assert_eq!((info.crop_left, info.crop_top), (6, 4));
        assert_eq!((info.crop_width, info.crop_height), (320 - 6, 240 - 4));

        let info = H264Info::new(&Sps {
            frame_crop_right_offset: 1,
            frame_crop_bottom_offset: 1,
            ..sps
        });
        assert_eq!((info.crop_left, info.crop_top), (6, 4));
        assert_eq!((info.crop_width, info.crop_height), (320 - 8, 240 - 6));
    }

    #[test]
    fn vui_info() {
        let sps = Sps {
            profile_idc: 100,
            pic_width_in_mbs_minus1: 119,
            pic_height_in_map_units_minus1: 67,
            frame_mbs_only_flag: true,
            frame_cropping_flag: true,
            frame_crop_left_offset: 2,
            frame_crop_right_offset: 2,
            frame_crop_bottom_offset: 4,
            vui_parameters_present_flag: true,
            vui_parameters: VuiParams {
                aspect_ratio_info_present_flag: true,
                aspect_ratio_idc: 14,
                video_signal_type_present_flag: true,
                video_full_range_flag: true,
                colour_description_present_flag: true,
                colour_primaries: 1,
                transfer_characteristics: 1,
                matrix_coefficients: 1,
                timing_info_present_flag: true,
                num_units_in_tick: 1001,
                time_scale: 60000,
                nal_hrd_parameters_present_flag: true,
                nal_hrd_parameters: HrdParams {
                    bit_rate_scale: 4,
                    cpb_size_scale: 3,
                    cpb: vec![HrdCpb {
                        bit_rate_value_minus1: 999,
                        cpb_size_value_minus1: 1999,
                        cbr_flag: false,
                    }],
                    ..Default::default()
                },
                ..Default::default()
            },
            ..Default::default()
        };

        let mut ctx = Ctx::new();
        ctx.set_sps(sps).unwrap();
        assert!(ctx.get_info().is_err());
        ctx.set_pps(Pps::default()).unwrap();

        let info = ctx.get_info().unwrap();
        assert_eq!((info.width, info.height), (1920, 1088));
        assert_eq!((info.crop_left, info.crop_top), (4, 0));
        assert_eq!((info.crop_width, info.crop_height), (1912, 1080));
        assert_eq!((info.sar_width, info.sar_height), (4, 3));
        assert!(info.full_range);
        assert!(info.colour_description_present);
        assert_eq!(info.colour_primaries, 1);
        assert_eq!((info.framerate_num, info.framerate_den), (30000, 1001));
        assert!((info.framerate - 29.97).abs() < 0.01);
        assert_eq!(info.nal_hrd_bitrate, 1000 << 10);
        assert_eq!(info.nal_hrd_cpb_size, 2000 << 7);
        assert_eq!(info.vcl_hrd_bitrate, 0);
    }
}
