//! Content identifiers for 32-byte digests.
//!
//! A CID here is always version 1, raw codec, sha2-256 multihash, rendered in
//! lowercase unpadded base-32 with the multibase tag `b`.

const BASE32_ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz234567";

const MULTIBASE_BASE32: char = 'b';
const CID_VERSION_1: u8 = 0x01;
const CODEC_RAW: u8 = 0x55;
const MULTIHASH_SHA2_256: u8 = 0x12;
const DIGEST_LENGTH: u8 = 0x20;

const MULTIHASH_LEN: usize = 2 + 32;
const CID_BYTES_LEN: usize = 2 + MULTIHASH_LEN;

/// Length of every derived CID: the multibase tag plus ceil(36 * 8 / 5) symbols.
pub const CID_LENGTH: usize = 1 + (CID_BYTES_LEN * 8).div_ceil(5);

/// Derives the CID string addressing raw content with the given sha2-256 digest.
#[must_use]
pub fn derive_content_id(hash: &[u8; 32]) -> String {
    let mut multihash = [0_u8; MULTIHASH_LEN];
    multihash[0] = MULTIHASH_SHA2_256;
    multihash[1] = DIGEST_LENGTH;
    multihash[2..].copy_from_slice(hash);

    let mut cid = [0_u8; CID_BYTES_LEN];
    cid[0] = CID_VERSION_1;
    cid[1] = CODEC_RAW;
    cid[2..].copy_from_slice(&multihash);

    let mut out = String::with_capacity(CID_LENGTH);
    out.push(MULTIBASE_BASE32);
    out.push_str(&encode_base32(&cid));
    out
}

/// RFC 4648 base-32, lowercase, no padding.
#[must_use]
pub fn encode_base32(data: &[u8]) -> String {
    let mut out = String::with_capacity((data.len() * 8).div_ceil(5));
    let mut buffer: u32 = 0;
    let mut bits: u32 = 0;

    for byte in data {
        buffer = (buffer << 8) | u32::from(*byte);
        bits += 8;
        while bits >= 5 {
            out.push(symbol(buffer >> (bits - 5)));
            bits -= 5;
        }
        // Only the low `bits` bits are still pending.
        buffer &= (1 << bits) - 1;
    }

    if bits > 0 {
        out.push(symbol(buffer << (5 - bits)));
    }

    out
}

fn symbol(value: u32) -> char {
    // Masked to five bits, so the index is always in range.
    char::from(BASE32_ALPHABET[(value & 0x1f) as usize])
}
