//! Identifier generation (§10.6): trace ids, span ids, and request ids are
//! all rendered the same way — 16 random bytes, lowercase hex, no
//! separators.

use rand::RngCore;

fn random_hex(byte_len: usize) -> String {
    let mut bytes = vec![0u8; byte_len];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

pub fn generate_trace_id() -> String {
    random_hex(16)
}

pub fn generate_span_id() -> String {
    random_hex(8)
}

pub fn generate_request_id() -> String {
    random_hex(8)
}
