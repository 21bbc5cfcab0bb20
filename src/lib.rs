#![no_std]
//! Lazy-matching LZ77 compressor for game assets
//!
//! Input is scanned once with hash chains over 4-byte prefixes. Each match is
//! held back for one position in case the next one is longer, then the
//! resulting literals and backreferences are packed eight at a time behind a
//! control byte. Every stream ends in three zero bytes.

mod compress;
mod decompress;
mod matcher;
mod util;

#[cfg(feature = "alloc")]
pub use compress::compress;
pub use compress::{
    max_compressed_len, CompressError, CompressOptions, CompressState, MAX_MATCH_LEN,
};
#[cfg(feature = "alloc")]
pub use decompress::decompress_to_vec;
pub use decompress::{decompress_to_buf, DecompressError};
pub use matcher::{MAX_WINDOW, MIN_MATCH_LEN};
pub use util::{Token, TokenSink};
