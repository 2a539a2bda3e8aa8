// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Bit-exact reading, writing and dumping of H.264 bitstream syntax.
//!
//! [`codec::h264::reader::Reader`] parses Annex B streams into a
//! [`codec::h264::ctx::Ctx`] and reports every structure through callbacks,
//! [`codec::h264::writer`] serializes the records of a context back into NAL
//! units and [`codec::h264::dump`] turns them into structured dumps.
//! [`utils`] has the container level helpers.

pub mod codec;
pub mod utils;
