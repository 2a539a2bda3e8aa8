#![no_main]

use cros_h264_syntax::codec::h264::dump::dump_nalu;
use cros_h264_syntax::codec::h264::dump::DumpFlags;
use cros_h264_syntax::codec::h264::dump::JsonDump;
use cros_h264_syntax::codec::h264::nalu_writer::NaluWriter;
use cros_h264_syntax::codec::h264::reader::Reader;
use cros_h264_syntax::codec::h264::reader::ReaderFlags;
use cros_h264_syntax::codec::h264::writer::write_nalu;
use cros_h264_syntax::utils::NaluIterator;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut reader = Reader::new((), ReaderFlags::default());

    for nalu in NaluIterator::new(data) {
        if reader.parse_nalu(nalu).is_err() {
            continue;
        }

        let mut json = JsonDump::new();
        let _ = dump_nalu(&mut json, reader.ctx_mut(), DumpFlags { slice_data: true });

        let mut w = NaluWriter::new(true);
        if write_nalu(&mut w, reader.ctx_mut()).is_ok() {
            let _ = w.into_vec();
        }
    }
});
