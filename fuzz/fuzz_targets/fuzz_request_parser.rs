#![no_main]

use libfuzzer_sys::fuzz_target;
use reactord::parser::Request;

fuzz_target!(|data: &[u8]| {
    let mut buf = data.to_vec();
    let read_idx = buf.len();
    let mut checked = 0;
    let mut start_of_line = 0;
    let mut request = Request::default();
    let _ = request.advance(&mut buf, read_idx, &mut checked, &mut start_of_line);
});
