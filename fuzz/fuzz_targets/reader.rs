#![no_main]

use cros_h264_syntax::codec::h264::reader::Reader;
use cros_h264_syntax::codec::h264::reader::ReaderFlags;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let mut reader = Reader::new((), ReaderFlags { slice_data: true });
    let _ = reader.parse(data);
});
