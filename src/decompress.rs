use crate::matcher::MIN_MATCH_LEN;
use crate::util::*;

#[cfg(feature = "alloc")]
extern crate alloc;

#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum DecompressError {
    #[error("input was truncated")]
    InputTruncated,
    #[error("invalid backreference")]
    InvalidBackreference,
    #[error("end of stream marker is not zero")]
    InvalidTerminator,
    #[error("output buffer was insufficient")]
    OutputTooSmall,
}

const TERMINATOR_LEN: usize = 3;
const BACKREF_LEN: usize = 3;

// Note for both outputs: we guarantee writing all the way up to the limit
impl<'a> TokenSink<DecompressError> for BufOutput<'a> {
    fn put_literal(&mut self, lit: u8) -> Result<(), DecompressError> {
        if self.pos < self.buf.len() {
            self.buf[self.pos] = lit;
            self.pos += 1;
            Ok(())
        } else {
            Err(DecompressError::OutputTooSmall)
        }
    }

    fn put_backref(&mut self, dist: usize, mut len: usize) -> Result<(), DecompressError> {
        if dist == 0 || dist > self.pos {
            return Err(DecompressError::InvalidBackreference);
        }

        let mut did_overflow = false;
        if self.pos + len > self.buf.len() {
            did_overflow = true;
            len = self.buf.len() - self.pos;
        }

        for i in 0..len {
            self.buf[self.pos + i] = self.buf[self.pos - dist + i];
        }
        self.pos += len;

        if did_overflow {
            Err(DecompressError::OutputTooSmall)
        } else {
            Ok(())
        }
    }
}

#[cfg(feature = "alloc")]
impl TokenSink<DecompressError> for VecOutput {
    fn put_literal(&mut self, lit: u8) -> Result<(), DecompressError> {
        self.vec.push(lit);
        Ok(())
    }

    fn put_backref(&mut self, dist: usize, len: usize) -> Result<(), DecompressError> {
        let pos = self.vec.len();
        if dist == 0 || dist > pos {
            return Err(DecompressError::InvalidBackreference);
        }

        self.vec.resize(pos + len, 0);
        for i in 0..len {
            self.vec[pos + i] = self.vec[pos - dist + i];
        }

        Ok(())
    }
}

/// The last three bytes are always the terminator, so the stream is over as
/// soon as exactly that many are left.
fn at_end(inp: &[u8]) -> Result<bool, DecompressError> {
    match inp.len() {
        0..TERMINATOR_LEN => Err(DecompressError::InputTruncated),
        TERMINATOR_LEN if inp.iter().all(|&b| b == 0) => Ok(true),
        TERMINATOR_LEN => Err(DecompressError::InvalidTerminator),
        _ => Ok(false),
    }
}

fn decompress_impl<S: TokenSink<DecompressError>>(
    mut inp: &[u8],
    outp: &mut S,
) -> Result<(), DecompressError> {
    loop {
        if at_end(inp)? {
            return Ok(());
        }
        let ctrl = inp[0];
        inp = &inp[1..];

        for bit in 0..8 {
            if at_end(inp)? {
                return Ok(());
            }

            if ctrl & (1 << bit) == 0 {
                outp.put_literal(inp[0])?;
                inp = &inp[1..];
            } else {
                // a record must never eat into the terminator
                if inp.len() < BACKREF_LEN + TERMINATOR_LEN {
                    return Err(DecompressError::InputTruncated);
                }
                let dist = u16::from_be_bytes([inp[0], inp[1]]) as usize + 1;
                let len = inp[2] as usize + 1;
                if len < MIN_MATCH_LEN {
                    return Err(DecompressError::InvalidBackreference);
                }
                outp.put_backref(dist, len)?;
                inp = &inp[BACKREF_LEN..];
            }
        }
    }
}

/// Decompress the input into a preallocated buffer
///
/// Returns the decompressed size on success, or an error otherwise
pub fn decompress_to_buf(inp: &[u8], outp: &mut [u8]) -> Result<usize, DecompressError> {
    let mut outp: BufOutput = outp.into();
    decompress_impl(inp, &mut outp)?;
    tracing::debug!(input_len = inp.len(), output_len = outp.pos, "decoded");
    Ok(outp.pos)
}

#[cfg(feature = "alloc")]
/// Decompress the input into a [Vec](alloc::vec::Vec)
///
/// Returns the result on success, or an error otherwise
pub fn decompress_to_vec(
    inp: &[u8],
    capacity_hint: Option<usize>,
) -> Result<alloc::vec::Vec<u8>, DecompressError> {
    let mut ret: VecOutput = if let Some(capacity_hint) = capacity_hint {
        alloc::vec::Vec::with_capacity(capacity_hint)
    } else {
        alloc::vec::Vec::new()
    }
    .into();
    decompress_impl(inp, &mut ret)?;
    tracing::debug!(input_len = inp.len(), output_len = ret.vec.len(), "decoded");
    Ok(ret.vec)
}
