// Copyright 2023 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

pub mod bac;
pub mod cabac;
pub mod cavlc;
pub mod ctx;
pub mod dump;
pub mod error;
pub mod fmo;
pub mod headers;
pub mod info;
pub mod macroblock;
pub mod nalu_reader;
pub mod nalu_writer;
pub mod reader;
pub mod sei;
pub mod slice_data;
pub mod syntax;
pub mod types;
pub mod writer;
