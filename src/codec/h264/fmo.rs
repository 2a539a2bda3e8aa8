// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Slice group maps for flexible macroblock ordering, 8.2.2.

use crate::codec::h264::ctx::SpsDerived;
use crate::codec::h264::error::H264Error;
use crate::codec::h264::error::Result;
use crate::codec::h264::headers::Pps;

/// `mapUnitToSliceGroupMap`, one slice group per map unit.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SliceGroupMap {
    map: Vec<u8>,
}

impl SliceGroupMap {
    pub fn as_slice(&self) -> &[u8] {
        &self.map
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&mut self) {
        self.map.clear();
    }

    /// Generates the map for `pps`, 8.2.2.1 to 8.2.2.7.
    /// `map_units_in_slice_group0` is only used by map types 3 to 5.
    pub fn generate(
        &mut self,
        pps: &Pps,
        sd: &SpsDerived,
        map_units_in_slice_group0: u32,
    ) -> Result<()> {
        let size = sd.pic_size_in_map_units as usize;
        let width = sd.pic_width_in_mbs as usize;
        let num_groups = pps.num_slice_groups_minus1 as usize + 1;
        let map_units_in_slice_group0 = map_units_in_slice_group0.min(size as u32);

        self.map.clear();
        self.map.resize(size, 0);

        if size == 0 || width == 0 {
            return Err(H264Error::invalid("empty picture"));
        }

        match pps.slice_group_map_type {
            0 => self.interleaved(pps, num_groups)?,
            1 => self.dispersed(width, num_groups),
            2 => self.foreground(pps, width, num_groups)?,
            3 => self.box_out(pps, sd, map_units_in_slice_group0),
            4 => {
                let size_of_upper_left_group =
                    upper_left_group_size(pps, sd, map_units_in_slice_group0);
                let dir = pps.slice_group_change_direction_flag as u8;
                for (i, group) in self.map.iter_mut().enumerate() {
                    *group = if i < size_of_upper_left_group { dir } else { 1 - dir };
                }
            }
            5 => {
                let size_of_upper_left_group =
                    upper_left_group_size(pps, sd, map_units_in_slice_group0);
                let dir = pps.slice_group_change_direction_flag as u8;
                let height = size / width;
                let mut k = 0;
                for j in 0..width {
                    for i in 0..height {
                        self.map[i * width + j] =
                            if k < size_of_upper_left_group { dir } else { 1 - dir };
                        k += 1;
                    }
                }
            }
            6 => {
                if pps.slice_group_id.len() < size {
                    return Err(H264Error::protocol(format!(
                        "{} slice_group_id entries for {} map units",
                        pps.slice_group_id.len(),
                        size
                    )));
                }

                for (group, &id) in self.map.iter_mut().zip(&pps.slice_group_id) {
                    if id as usize >= num_groups {
                        return Err(H264Error::protocol(format!("invalid slice_group_id {}", id)));
                    }
                    *group = id as u8;
                }
            }
            t => return Err(H264Error::io(format!("invalid slice_group_map_type {}", t))),
        }

        Ok(())
    }

    /// 8.2.2.1
    fn interleaved(&mut self, pps: &Pps, num_groups: usize) -> Result<()> {
        if pps.run_length_minus1.len() < num_groups {
            return Err(H264Error::protocol("missing run_length_minus1 entries"));
        }

        let size = self.map.len();
        let mut i = 0;
        loop {
            let runs = pps.run_length_minus1[..num_groups].iter();
            for (group, &run_length_minus1) in runs.enumerate() {
                if i >= size {
                    break;
                }

                let run = run_length_minus1 as usize + 1;
                let end = (i + run).min(size);
                self.map[i..end].fill(group as u8);
                i += run;
            }

            if i >= size {
                break;
            }
        }

        Ok(())
    }

    /// 8.2.2.2
    fn dispersed(&mut self, width: usize, num_groups: usize) {
        for (i, group) in self.map.iter_mut().enumerate() {
            *group = (((i % width) + (((i / width) * num_groups) / 2)) % num_groups) as u8;
        }
    }

    /// 8.2.2.3
    fn foreground(&mut self, pps: &Pps, width: usize, num_groups: usize) -> Result<()> {
        let last = num_groups - 1;
        if pps.top_left.len() < last || pps.bottom_right.len() < last {
            return Err(H264Error::protocol("missing slice group rectangles"));
        }

        self.map.fill(last as u8);

        for group in (0..last).rev() {
            let top_left = pps.top_left[group] as usize;
            let bottom_right = pps.bottom_right[group] as usize;
            if top_left > bottom_right || bottom_right >= self.map.len() {
                return Err(H264Error::protocol(format!(
                    "invalid rectangle {}..{} for slice group {}",
                    top_left, bottom_right, group
                )));
            }

            let (y_top_left, x_top_left) = (top_left / width, top_left % width);
            let (y_bottom_right, x_bottom_right) = (bottom_right / width, bottom_right % width);
            if x_top_left > x_bottom_right {
                return Err(H264Error::protocol(format!(
                    "inverted rectangle for slice group {}",
                    group
                )));
            }

            for y in y_top_left..=y_bottom_right {
                for x in x_top_left..=x_bottom_right {
                    self.map[y * width + x] = group as u8;
                }
            }
        }

        Ok(())
    }

    /// 8.2.2.4
    fn box_out(&mut self, pps: &Pps, sd: &SpsDerived, map_units_in_slice_group0: u32) {
        let width = sd.pic_width_in_mbs as i64;
        let height = sd.pic_height_in_map_units as i64;
        let dir = pps.slice_group_change_direction_flag as i64;

        self.map.fill(1);

        let mut x = (width - dir) / 2;
        let mut y = (height - dir) / 2;
        let (mut left_bound, mut top_bound) = (x, y);
        let (mut right_bound, mut bottom_bound) = (x, y);
        let (mut x_dir, mut y_dir) = (dir - 1, dir);

        let mut k = 0i64;
        while k < map_units_in_slice_group0 as i64 {
            let idx = (y * width + x) as usize;
            let map_unit_vacant = self.map[idx] == 1;
            if map_unit_vacant {
                self.map[idx] = 0;
            }

            if x_dir == -1 && x == left_bound {
                left_bound = (left_bound - 1).max(0);
                x = left_bound;
                x_dir = 0;
                y_dir = 2 * dir - 1;
            } else if x_dir == 1 && x == right_bound {
                right_bound = (right_bound + 1).min(width - 1);
                x = right_bound;
                x_dir = 0;
                y_dir = 1 - 2 * dir;
            } else if y_dir == -1 && y == top_bound {
                top_bound = (top_bound - 1).max(0);
                y = top_bound;
                x_dir = 1 - 2 * dir;
                y_dir = 0;
            } else if y_dir == 1 && y == bottom_bound {
                bottom_bound = (bottom_bound + 1).min(height - 1);
                y = bottom_bound;
                x_dir = 2 * dir - 1;
                y_dir = 0;
            } else {
                x += x_dir;
                y += y_dir;
            }

            if map_unit_vacant {
                k += 1;
            }
        }
    }

    /// Slice group of macroblock `mb_addr`, 8.2.2.8.
    pub fn mb_to_slice_group(
        &self,
        mb_addr: u32,
        sd: &SpsDerived,
        frame_mbs_only_flag: bool,
        field_pic_flag: bool,
        mbaff_frame_flag: bool,
    ) -> u8 {
        let width = sd.pic_width_in_mbs.max(1);
        let idx = if frame_mbs_only_flag || field_pic_flag {
            mb_addr
        } else if mbaff_frame_flag {
            mb_addr / 2
        } else {
            (mb_addr / (2 * width)) * width + (mb_addr % width)
        };

        self.map.get(idx as usize).copied().unwrap_or(0)
    }
}

/// `sizeOfUpperLeftGroup` of map types 4 and 5.
fn upper_left_group_size(pps: &Pps, sd: &SpsDerived, map_units_in_slice_group0: u32) -> usize {
    let size = if pps.slice_group_change_direction_flag {
        sd.pic_size_in_map_units.saturating_sub(map_units_in_slice_group0)
    } else {
        map_units_in_slice_group0
    };

    size as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::h264::headers::Sps;

    fn derived(width_mbs: u32, height_map_units: u32) -> SpsDerived {
        SpsDerived::new(&Sps {
            pic_width_in_mbs_minus1: width_mbs - 1,
            pic_height_in_map_units_minus1: height_map_units - 1,
            ..Default::default()
        })
    }

    fn pps(map_type: u8, num_groups: u8) -> Pps {
        let n = num_groups as usize;
        Pps {
            num_slice_groups_minus1: num_groups - 1,
            slice_group_map_type: map_type,
            run_length_minus1: (0..n as u32).collect(),
            top_left: (0..n as u32 - 1).map(|g| g * 12).collect(),
            bottom_right: (0..n as u32 - 1).map(|g| g * 12 + 12).collect(),
            slice_group_id: (0..99).map(|i| i % num_groups as u32).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn every_type_stays_in_bounds() {
        let sd = derived(11, 9);

        for map_type in 0..=6 {
            for num_groups in 1..=8u8 {
                // Box-out, raster and wipe only have two groups.
                if (3..=5).contains(&map_type) && num_groups != 2 {
                    continue;
                }

                for change_dir in [false, true] {
                    for mu0 in [0, 1, 40, 99] {
                        let mut pps = pps(map_type, num_groups);
                        pps.slice_group_change_direction_flag = change_dir;

                        let mut map = SliceGroupMap::default();
                        map.generate(&pps, &sd, mu0).unwrap();

                        assert_eq!(map.as_slice().len(), 99);
                        assert!(map.as_slice().iter().all(|&g| g < num_groups));
                    }
                }
            }
        }
    }

    #[test]
    fn interleaved() {
        let sd = derived(4, 2);
        let mut map = SliceGroupMap::default();
        map.generate(&pps(0, 2), &sd, 0).unwrap();
        // Runs of 1 and 2.
        assert_eq!(map.as_slice(), &[0, 1, 1, 0, 1, 1, 0, 1]);
    }

    #[test]
    fn raster_scan_and_wipe() {
        let sd = derived(4, 2);
        let mut pps = pps(4, 2);
        let mut map = SliceGroupMap::default();

        map.generate(&pps, &sd, 3).unwrap();
        assert_eq!(map.as_slice(), &[0, 0, 0, 1, 1, 1, 1, 1]);

        pps.slice_group_change_direction_flag = true;
        map.generate(&pps, &sd, 3).unwrap();
        assert_eq!(map.as_slice(), &[1, 1, 1, 1, 1, 0, 0, 0]);

        pps.slice_group_map_type = 5;
        pps.slice_group_change_direction_flag = false;
        map.generate(&pps, &sd, 3).unwrap();
        assert_eq!(map.as_slice(), &[0, 0, 1, 1, 0, 1, 1, 1]);
    }

    #[test]
    fn box_out_grows_from_the_centre() {
        let sd = derived(3, 3);
        let mut map = SliceGroupMap::default();
        map.generate(&pps(3, 2), &sd, 1).unwrap();
        assert_eq!(map.as_slice(), &[1, 1, 1, 1, 0, 1, 1, 1, 1]);

        map.generate(&pps(3, 2), &sd, 9).unwrap();
        assert!(map.as_slice().iter().all(|&g| g == 0));
    }

    #[test]
    fn foreground_rectangles() {
        let sd = derived(4, 4);
        let pps = Pps {
            num_slice_groups_minus1: 1,
            slice_group_map_type: 2,
            top_left: vec![5],
            bottom_right: vec![10],
            ..Default::default()
        };

        let mut map = SliceGroupMap::default();
        map.generate(&pps, &sd, 0).unwrap();
        assert_eq!(
            map.as_slice(),
            &[1, 1, 1, 1, 1, 0, 0, 1, 1, 0, 0, 1, 1, 1, 1, 1]
        );

        let bad = Pps {
            bottom_right: vec![16],
            ..pps.clone()
        };
        assert!(matches!(
            map.generate(&bad, &sd, 0),
            Err(H264Error::Protocol(_))
        ));

        let inverted = Pps {
            top_left: vec![7],
            bottom_right: vec![9],
            ..pps
        };
        assert!(map.generate(&inverted, &sd, 0).is_err());
    }

    #[test]
    fn explicit_needs_every_map_unit() {
        let sd = derived(4, 4);
        let mut pps = pps(6, 2);
        pps.slice_group_id.truncate(15);
        assert!(SliceGroupMap::default().generate(&pps, &sd, 0).is_err());

        pps.slice_group_map_type = 7;
        assert!(matches!(
            SliceGroupMap::default().generate(&pps, &sd, 0),
            Err(H264Error::Io(_))
        ));
    }

    #[test]
    fn field_pair_mapping() {
        let sd = SpsDerived::new(&Sps {
            pic_width_in_mbs_minus1: 1,
            pic_height_in_map_units_minus1: 1,
            frame_mbs_only_flag: false,
            ..Default::default()
        });
        let mut map = SliceGroupMap::default();
        map.generate(&pps(4, 2), &sd, 2).unwrap();
        assert_eq!(map.as_slice(), &[0, 0, 1, 1]);

        // Frame macroblocks of a field coded sequence: two rows per map unit.
        assert_eq!(map.mb_to_slice_group(3, &sd, false, false, false), 0);
        assert_eq!(map.mb_to_slice_group(4, &sd, false, false, false), 1);
        // MBAFF pairs.
        assert_eq!(map.mb_to_slice_group(5, &sd, false, false, true), 1);
        // Fields.
        assert_eq!(map.mb_to_slice_group(1, &sd, false, true, false), 0);
    }
}
