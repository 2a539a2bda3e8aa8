// Copyright 2022 The ChromiumOS Authors
// Use of this source code is governed by a BSD-style license that can be
// found in the LICENSE file.

//! Structured dump of the NAL units held by a [`Ctx`].
//!
//! The dump replays the same syntax traversals as the reader and the writer,
//! reporting every element to a [`DumpSink`]. [`JsonDump`] is a sink that
//! builds a JSON document out of them.

use log::debug;
use serde_json::Map;
use serde_json::Value;

use crate::codec::h264::ctx::Ctx;
use crate::codec::h264::error::H264Error;
use crate::codec::h264::error::Result;
use crate::codec::h264::nalu_reader::NaluReader;
use crate::codec::h264::sei::SeiPayload;
use crate::codec::h264::slice_data;
use crate::codec::h264::syntax;
use crate::codec::h264::syntax::OpKind;
use crate::codec::h264::syntax::ReadOps;
use crate::codec::h264::syntax::SyntaxOps;
use crate::codec::h264::syntax::SyntaxValue;
use crate::codec::h264::types::NaluType;

/// Receives the structure and the values of a dumped NAL unit.
pub trait DumpSink {
    fn begin_struct(&mut self, name: &str);
    fn end_struct(&mut self, name: &str);
    fn begin_array(&mut self, name: &str);
    fn end_array(&mut self, name: &str);
    fn begin_item(&mut self);
    fn end_item(&mut self);
    fn field(&mut self, name: &str, value: i64);
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DumpFlags {
    /// Also dump the macroblocks of CAVLC slices, parsed again from the
    /// retained slice data.
    pub slice_data: bool,
}

/// [`SyntaxOps`] reporting every element to a [`DumpSink`].
///
/// Without a reader the values come from the records being traversed. With
/// one they are read from it first, which is how slice data, of which no
/// record is kept, gets dumped.
pub struct DumpOps<'s, 'r, S: DumpSink + ?Sized> {
    sink: &'s mut S,
    read: Option<ReadOps<'r>>,
    names: Vec<String>,
}

impl<'s, 'r, S: DumpSink + ?Sized> DumpOps<'s, 'r, S> {
    pub fn new(sink: &'s mut S) -> Self {
        Self {
            sink,
            read: None,
            names: Vec::new(),
        }
    }

    pub fn with_reader(sink: &'s mut S, reader: NaluReader<'r>) -> Self {
        Self {
            sink,
            read: Some(ReadOps::new(reader)),
            names: Vec::new(),
        }
    }
}

impl<'s, 'r, S: DumpSink + ?Sized> SyntaxOps for DumpOps<'s, 'r, S> {
    fn kind(&self) -> OpKind {
        OpKind::Dump
    }

    fn is_reading(&self) -> bool {
        self.read.is_some()
    }

    fn u<T: SyntaxValue>(&mut self, name: &str, value: &mut T, num_bits: u32) -> Result<()> {
        if let Some(read) = &mut self.read {
            read.u(name, value, num_bits)?;
        }
        self.sink.field(name, value.to_i64());
        Ok(())
    }

    fn i<T: SyntaxValue>(&mut self, name: &str, value: &mut T, num_bits: u32) -> Result<()> {
        if let Some(read) = &mut self.read {
            read.i(name, value, num_bits)?;
        }
        self.sink.field(name, value.to_i64());
        Ok(())
    }

    fn ue<T: SyntaxValue>(&mut self, name: &str, value: &mut T) -> Result<()> {
        if let Some(read) = &mut self.read {
            read.ue(name, value)?;
        }
        self.sink.field(name, value.to_i64());
        Ok(())
    }

    fn se<T: SyntaxValue>(&mut self, name: &str, value: &mut T) -> Result<()> {
        if let Some(read) = &mut self.read {
            read.se(name, value)?;
        }
        self.sink.field(name, value.to_i64());
        Ok(())
    }

    fn te<T: SyntaxValue>(&mut self, name: &str, value: &mut T, max: u32) -> Result<()> {
        if let Some(read) = &mut self.read {
            read.te(name, value, max)?;
        }
        self.sink.field(name, value.to_i64());
        Ok(())
    }

    fn ff_coded(&mut self, name: &str, value: &mut u32) -> Result<()> {
        if let Some(read) = &mut self.read {
            read.ff_coded(name, value)?;
        }
        self.sink.field(name, *value as i64);
        Ok(())
    }

    fn read_raw_bits(&mut self, num_bits: u32) -> Result<u32> {
        match &mut self.read {
            Some(read) => read.read_raw_bits(num_bits),
            None => Err(H264Error::unsupported("raw bit access without a reader")),
        }
    }

    fn begin_struct(&mut self, name: &str) {
        self.names.push(name.to_owned());
        self.sink.begin_struct(name);
    }

    fn end_struct(&mut self) {
        let name = self.names.pop().unwrap_or_default();
        self.sink.end_struct(&name);
    }

    fn begin_array(&mut self, name: &str) {
        self.names.push(name.to_owned());
        self.sink.begin_array(name);
    }

    fn end_array(&mut self) {
        let name = self.names.pop().unwrap_or_default();
        self.sink.end_array(&name);
    }

    fn begin_item(&mut self) {
        self.sink.begin_item();
    }

    fn end_item(&mut self) {
        self.sink.end_item();
    }

    fn field(&mut self, name: &str, value: i64) {
        self.sink.field(name, value);
    }

    fn more_rbsp_data(&mut self, present: bool) -> bool {
        match &mut self.read {
            Some(read) => read.more_rbsp_data(present),
            None => present,
        }
    }

    fn rbsp_trailing_bits(&mut self) -> Result<()> {
        match &mut self.read {
            Some(read) => read.rbsp_trailing_bits(),
            None => Ok(()),
        }
    }

    fn byte_aligned(&self) -> bool {
        self.read.as_ref().map_or(true, |read| read.byte_aligned())
    }

    fn bytes(&mut self, name: &str, data: &mut Vec<u8>) -> Result<()> {
        if let Some(read) = &mut self.read {
            read.bytes(name, data)?;
        }

        self.begin_array(name);
        for &byte in data.iter() {
            self.sink.field(name, byte as i64);
        }
        self.end_array();
        Ok(())
    }

    fn payload_alignment(&mut self) -> Result<()> {
        match &mut self.read {
            Some(read) => read.payload_alignment(),
            None => Ok(()),
        }
    }
}

/// Dumps the NAL unit last parsed into `ctx`, or set up in it for writing.
pub fn dump_nalu<S: DumpSink + ?Sized>(sink: &mut S, ctx: &mut Ctx, flags: DumpFlags) -> Result<()> {
    let type_ = ctx.nalu_type();
    let mut ops = DumpOps::new(sink);

    let mut hdr = *ctx.nalu_header();
    ops.begin_struct("nal_unit_header");
    syntax::nalu_header(&mut ops, &mut hdr)?;
    ops.end_struct();

    if ctx.is_nalu_unknown() {
        debug!("no syntax to dump for NAL unit type {}", hdr.nal_unit_type);
        return Ok(());
    }

    match type_ {
        NaluType::Sps => {
            let mut sps = (**ctx.sps().ok_or_else(|| H264Error::protocol("no SPS"))?).clone();
            ops.begin_struct("seq_parameter_set");
            syntax::sps(&mut ops, &mut sps)?;
            ops.end_struct();
        }
        NaluType::Pps => {
            let mut pps = (**ctx.pps().ok_or_else(|| H264Error::protocol("no PPS"))?).clone();
            let sps = ctx
                .sps_by_id(pps.seq_parameter_set_id)
                .cloned()
                .ok_or_else(|| {
                    H264Error::protocol(format!("no SPS with id {}", pps.seq_parameter_set_id))
                })?;
            ops.begin_struct("pic_parameter_set");
            syntax::pps(&mut ops, &mut &*sps, &mut pps)?;
            ops.end_struct();
        }
        NaluType::Aud => {
            let mut aud = *ctx.aud();
            ops.begin_struct("access_unit_delimiter");
            syntax::aud(&mut ops, &mut aud)?;
            ops.end_struct();
        }
        NaluType::Sei => {
            let list = ctx.sei_list().to_vec();
            ops.begin_array("sei_message");
            for mut sei in list {
                ops.begin_item();
                ops.field("payloadType", sei.payload_type() as i64);
                ops.field("payloadSize", sei.raw.len() as i64);
                if let SeiPayload::Unknown(_) = sei.payload {
                    ops.bytes("payload", &mut sei.raw)?;
                } else {
                    syntax::sei_payload(&mut ops, ctx, &mut sei.payload)?;
                }
                ops.end_item();
            }
            ops.end_array();
        }
        NaluType::Slice | NaluType::SliceIdr => {
            let mut sh = ctx.slice_header().clone();
            ops.begin_struct("slice_header");
            syntax::slice_header(&mut ops, ctx, &mut sh)?;
            ops.end_struct();

            if flags.slice_data {
                dump_slice_data(sink, ctx)?;
            }
        }
        _ => (),
    }

    Ok(())
}

/// Parses the retained slice data again to report its macroblocks.
fn dump_slice_data<S: DumpSink + ?Sized>(sink: &mut S, ctx: &mut Ctx) -> Result<()> {
    if ctx.pps().map_or(false, |pps| pps.entropy_coding_mode_flag) {
        debug!("not dumping CABAC slice data");
        return Ok(());
    }

    let raw = ctx.slice_data().clone();
    let reader = NaluReader::resume(&raw.data, 0, raw.partial, raw.partial_bits, true);
    let mut ops = DumpOps::with_reader(sink, reader);

    ops.begin_struct("slice_data");
    let mb_count = slice_data::slice_data(&mut ops, ctx, &mut ())?;
    ops.field("mb_count", mb_count as i64);
    ops.end_struct();
    Ok(())
}

/// Strips the subscripts of an element name, `"x[i]"` becoming `"x"`.
fn json_key(name: &str) -> &str {
    match name.find('[') {
        Some(pos) => &name[..pos],
        None => name,
    }
}

/// A JSON object or array being filled, and the key it goes under in its
/// parent.
struct Frame {
    key: String,
    value: Value,
}

/// Builds a JSON document from a dump.
///
/// Structures and array items become objects, arrays become arrays and
/// fields become numbers. Subscripts are dropped from the keys since the
/// position in the arrays already carries them.
pub struct JsonDump {
    stack: Vec<Frame>,
}

impl Default for JsonDump {
    fn default() -> Self {
        Self::new()
    }
}

impl JsonDump {
    pub fn new() -> Self {
        Self {
            stack: vec![Frame {
                key: String::new(),
                value: Value::Object(Map::new()),
            }],
        }
    }

    fn push(&mut self, key: &str, value: Value) {
        self.stack.push(Frame {
            key: json_key(key).to_owned(),
            value,
        });
    }

    fn insert(&mut self, key: String, value: Value) {
        if let Some(top) = self.stack.last_mut() {
            match &mut top.value {
                Value::Object(map) => {
                    map.insert(key, value);
                }
                Value::Array(list) => list.push(value),
                _ => (),
            }
        }
    }

    fn pop(&mut self) {
        // The root stays.
        if self.stack.len() < 2 {
            return;
        }
        if let Some(frame) = self.stack.pop() {
            self.insert(frame.key, frame.value);
        }
    }

    /// Closes whatever was left open and returns the document.
    pub fn into_value(mut self) -> Value {
        while self.stack.len() > 1 {
            self.pop();
        }
        self.stack
            .pop()
            .map_or(Value::Null, |frame| frame.value)
    }

    pub fn to_string_pretty(self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.into_value())
    }
}

impl DumpSink for JsonDump {
    fn begin_struct(&mut self, name: &str) {
        self.push(name, Value::Object(Map::new()));
    }

    fn end_struct(&mut self, _name: &str) {
        self.pop();
    }

    fn begin_array(&mut self, name: &str) {
        self.push(name, Value::Array(Vec::new()));
    }

    fn end_array(&mut self, _name: &str) {
        self.pop();
    }

    fn begin_item(&mut self) {
        self.push("", Value::Object(Map::new()));
    }

    fn end_item(&mut self) {
        self.pop();
    }

    fn field(&mut self, name: &str, value: i64) {
        self.insert(json_key(name).to_owned(), Value::from(value));
    }
}
