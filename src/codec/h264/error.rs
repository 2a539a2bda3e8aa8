// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

use thiserror::Error;

/// Failure kinds surfaced by every syntax operation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum H264Error {
    /// Bad input from the caller: empty buffer, out of range parameter set id...
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// Read past the end of the input, or a fixed-size output buffer is full.
    #[error("bitstream I/O error: {0}")]
    Io(String),
    /// A field value is illegal or inconsistent with the active parameter sets.
    #[error("protocol violation: {0}")]
    Protocol(String),
    /// The requested syntax path is not implemented by the entropy coders.
    #[error("unsupported: {0}")]
    Unsupported(String),
}

pub type Result<T> = std::result::Result<T, H264Error>;

impl H264Error {
    pub(crate) fn invalid<S: Into<String>>(msg: S) -> Self {
        H264Error::InvalidArgument(msg.into())
    }

    pub(crate) fn io<S: Into<String>>(msg: S) -> Self {
        H264Error::Io(msg.into())
    }

    pub(crate) fn protocol<S: Into<String>>(msg: S) -> Self {
        H264Error::Protocol(msg.into())
    }

    pub(crate) fn unsupported<S: Into<String>>(msg: S) -> Self {
        H264Error::Unsupported(msg.into())
    }
}
