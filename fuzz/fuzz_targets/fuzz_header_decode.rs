#![no_main]
use libfuzzer_sys::fuzz_target;
use specstore::{Header, HEADER_SIZE};

// Arbitrary header bytes must decode or fail cleanly, never panic
fuzz_target!(|input: &[u8]| {
    let Ok(header) = Header::from_bytes(input) else {
        return;
    };

    // anything that decodes must decode again after re-encoding
    let bytes = header.to_bytes();
    assert_eq!(bytes.len(), HEADER_SIZE);
    let again = Header::from_bytes(&bytes).expect("re-encoded header must decode");
    assert_eq!(again.dims.len(), header.dims.len());
    assert_eq!(again.layout_kind, header.layout_kind);
});
