use crate::matcher::*;
use crate::util::*;

#[cfg(feature = "alloc")]
extern crate alloc;

/// Longest backreference the packed format can describe
pub const MAX_MATCH_LEN: usize = 256;

/// Largest distance the packed format can describe
const MAX_FORMAT_DIST: usize = 1 << 16;

const TERMINATOR: [u8; 3] = [0, 0, 0];

/// Compression errors
#[derive(Debug, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum CompressError {
    /// The output buffer was too small to hold all the output.
    ///
    /// The output that has been written is truncated and cannot be decoded.
    #[error("output buffer was insufficient")]
    OutputTooSmall,
    /// Reserving space for the worst-case output failed
    #[error("could not allocate {requested} bytes of output")]
    AllocationFailed { requested: usize },
    /// A backreference reached further back than the format allows
    #[error("backreference distance {dist} cannot be encoded")]
    DistanceOutOfRange { dist: usize },
    /// A backreference was shorter or longer than the format allows
    #[error("backreference length {len} cannot be encoded")]
    LengthOutOfRange { len: usize },
    #[error("invalid options: {0}")]
    InvalidOptions(&'static str),
}

/// Tuning knobs for the match search
///
/// The defaults are what the packed format was designed around; the knobs
/// exist mostly so that the bounds can be exercised.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompressOptions {
    max_distance: usize,
    max_match_len: usize,
    allow_overlap: bool,
}
impl Default for CompressOptions {
    fn default() -> Self {
        Self {
            max_distance: MAX_WINDOW,
            max_match_len: MAX_MATCH_LEN,
            allow_overlap: true,
        }
    }
}
impl CompressOptions {
    /// Limit how far back a match may start (1 to 32768)
    pub fn with_max_distance(mut self, max_distance: usize) -> Result<Self, CompressError> {
        if !(1..=MAX_WINDOW).contains(&max_distance) {
            return Err(CompressError::InvalidOptions(
                "max_distance must be between 1 and 32768",
            ));
        }
        self.max_distance = max_distance;
        Ok(self)
    }

    /// Limit how long a match may be (4 to 256)
    pub fn with_max_match_len(mut self, max_match_len: usize) -> Result<Self, CompressError> {
        if !(MIN_MATCH_LEN..=MAX_MATCH_LEN).contains(&max_match_len) {
            return Err(CompressError::InvalidOptions(
                "max_match_len must be between 4 and 256",
            ));
        }
        self.max_match_len = max_match_len;
        Ok(self)
    }

    /// Whether a match may read bytes that it is itself producing
    pub fn with_allow_overlap(mut self, allow_overlap: bool) -> Self {
        self.allow_overlap = allow_overlap;
        self
    }

    pub fn max_distance(&self) -> usize {
        self.max_distance
    }
    pub fn max_match_len(&self) -> usize {
        self.max_match_len
    }
    pub fn allow_overlap(&self) -> bool {
        self.allow_overlap
    }
}

/// Upper bound on the packed size of `src_len` input bytes
///
/// All literals is the worst case: one byte each plus a control byte per
/// eight, then one possibly empty trailing group and the terminator.
pub const fn max_compressed_len(src_len: usize) -> usize {
    src_len + src_len / 8 + 1 + TERMINATOR.len()
}

trait OutputHelper {
    fn putc(&mut self, c: u8) -> Result<(), CompressError>;
    fn put_buf(&mut self, buf: &[u8]) -> Result<(), CompressError>;
    fn pos(&self) -> usize;
    /// Overwrite an already written byte
    fn poke(&mut self, pos: usize, c: u8);
}
impl<'a> OutputHelper for BufOutput<'a> {
    fn putc(&mut self, c: u8) -> Result<(), CompressError> {
        if self.pos < self.buf.len() {
            self.buf[self.pos] = c;
            self.pos += 1;
            Ok(())
        } else {
            Err(CompressError::OutputTooSmall)
        }
    }
    fn put_buf(&mut self, buf: &[u8]) -> Result<(), CompressError> {
        let mut len = buf.len();
        let mut did_overflow = false;
        if self.pos + len > self.buf.len() {
            did_overflow = true;
            len = self.buf.len() - self.pos;
        }

        self.buf[self.pos..self.pos + len].copy_from_slice(&buf[..len]);
        self.pos += len;

        if did_overflow {
            Err(CompressError::OutputTooSmall)
        } else {
            Ok(())
        }
    }
    fn pos(&self) -> usize {
        self.pos
    }
    fn poke(&mut self, pos: usize, c: u8) {
        self.buf[pos] = c;
    }
}

#[cfg(feature = "alloc")]
impl OutputHelper for VecOutput {
    fn putc(&mut self, c: u8) -> Result<(), CompressError> {
        self.vec.push(c);
        Ok(())
    }
    fn put_buf(&mut self, buf: &[u8]) -> Result<(), CompressError> {
        self.vec.extend_from_slice(buf);
        Ok(())
    }
    fn pos(&self) -> usize {
        self.vec.len()
    }
    fn poke(&mut self, pos: usize, c: u8) {
        self.vec[pos] = c;
    }
}

/// Packs tokens eight at a time behind a control byte
///
/// Control bits are shifted in from the top, so once a group is full its
/// first token sits in bit 0. A set bit is a backreference.
struct GroupPacker<O> {
    out: O,
    /// Where the open group's control byte goes
    ctrl_pos: usize,
    ctrl: u8,
    count: u8,
}

impl<O: OutputHelper> GroupPacker<O> {
    fn new(mut out: O) -> Result<Self, CompressError> {
        let ctrl_pos = out.pos();
        out.putc(0)?;
        Ok(Self {
            out,
            ctrl_pos,
            ctrl: 0,
            count: 0,
        })
    }

    fn push_bit(&mut self, bit: u8) -> Result<(), CompressError> {
        self.ctrl = (self.ctrl >> 1) | (bit << 7);
        self.count += 1;

        if self.count == 8 {
            self.out.poke(self.ctrl_pos, self.ctrl);
            self.ctrl_pos = self.out.pos();
            self.ctrl = 0;
            self.count = 0;
            self.out.putc(0)?;
        }

        Ok(())
    }

    /// Close the open group and append the terminator
    fn finish(mut self) -> Result<O, CompressError> {
        if self.count > 0 {
            // line up with a full group, unused high bits stay clear
            self.ctrl >>= 8 - self.count;
        }
        self.out.poke(self.ctrl_pos, self.ctrl);
        self.out.put_buf(&TERMINATOR)?;
        Ok(self.out)
    }
}

impl<O: OutputHelper> TokenSink<CompressError> for GroupPacker<O> {
    fn put_literal(&mut self, lit: u8) -> Result<(), CompressError> {
        self.out.putc(lit)?;
        self.push_bit(0)
    }

    fn put_backref(&mut self, dist: usize, len: usize) -> Result<(), CompressError> {
        if !(1..=MAX_FORMAT_DIST).contains(&dist) {
            return Err(CompressError::DistanceOutOfRange { dist });
        }
        if !(MIN_MATCH_LEN..=MAX_MATCH_LEN).contains(&len) {
            return Err(CompressError::LengthOutOfRange { len });
        }

        let disp = ((dist - 1) as u16).to_be_bytes();
        self.out.put_buf(&[disp[0], disp[1], (len - 1) as u8])?;
        self.push_bit(1)
    }
}

/// Holds state for performing compression operations
///
/// The hash chains are fairly big, so [CompressState::new_boxed] is the
/// better choice whenever an allocator is around.
pub struct CompressState {
    pub(crate) chains: HashChains,
}
impl CompressState {
    /// Allocate a new compression state
    pub fn new() -> Self {
        Self {
            chains: HashChains::new(),
        }
    }
    #[cfg(feature = "alloc")]
    /// Allocate a new compression state specifically on the heap
    ///
    /// This is a workaround for non-guaranteed copy elision / RVO.
    pub fn new_boxed() -> alloc::boxed::Box<Self> {
        use core::ptr::addr_of_mut;
        let layout = core::alloc::Layout::new::<Self>();
        // SAFETY: every field is written before the box is created
        unsafe {
            let self_ = alloc::alloc::alloc(layout) as *mut Self;
            if self_.is_null() {
                alloc::alloc::handle_alloc_error(layout);
            }
            for i in 0..HTAB_SZ {
                addr_of_mut!((*self_).chains.head[i]).write(NO_POS);
            }
            for i in 0..MAX_WINDOW {
                addr_of_mut!((*self_).chains.prev[i]).write(NO_POS);
            }
            alloc::boxed::Box::from_raw(self_)
        }
    }

    /// Run the match search over `inp`, reporting every decision to `sink`
    ///
    /// Stops at the first error from the sink and returns it.
    pub fn compress_tokens<E, S: TokenSink<E>>(
        &mut self,
        inp: &[u8],
        opts: &CompressOptions,
        sink: &mut S,
    ) -> Result<(), E> {
        let res = self.compress_impl(inp, opts, sink);
        if res.is_err() {
            tracing::debug!(input_len = inp.len(), "token sink aborted compression");
        }
        res
    }

    fn compress_impl<E, S: TokenSink<E>>(
        &mut self,
        inp: &[u8],
        opts: &CompressOptions,
        sink: &mut S,
    ) -> Result<(), E> {
        self.chains.reset();

        let inp_len = inp.len();
        let mut n_lits = 0usize;
        let mut n_backrefs = 0usize;

        // match found at the previous position, not emitted yet
        let mut deferred: Option<Match> = None;

        let mut i = 0;
        while let Some(head) = peek4(inp, i) {
            let hash = hash4(head);
            let floor = deferred.map_or(0, |m| m.len);
            let found = self.chains.find_match(
                inp,
                i,
                hash,
                opts.max_distance,
                floor,
                usize::min(opts.max_match_len, inp_len - i),
                opts.allow_overlap,
            );

            // only now, so that a position never matches itself
            self.chains.insert(hash, i);

            match (deferred, found) {
                (Some(prev), None) => {
                    // ties also end up here, the earlier match wins
                    sink.put_backref(i - 1 - prev.pos, prev.len)?;
                    n_backrefs += 1;

                    // move past the match, only keeping the chains up to date
                    let end = usize::min(i - 1 + prev.len, inp_len - (MIN_MATCH_LEN - 1));
                    for j in i + 1..end {
                        if let Some(v) = peek4(inp, j) {
                            self.chains.insert(hash4(v), j);
                        }
                    }
                    i = i - 1 + prev.len;
                    deferred = None;
                }
                (None, None) => {
                    sink.put_literal(inp[i])?;
                    n_lits += 1;
                    i += 1;
                }
                (prev, Some(cur)) => {
                    if prev.is_some() {
                        // the new match is strictly longer, so the old one
                        // degrades into a literal
                        sink.put_literal(inp[i - 1])?;
                        n_lits += 1;
                    }
                    deferred = Some(cur);
                    i += 1;
                }
            }
        }

        if let Some(prev) = deferred {
            sink.put_backref(i - 1 - prev.pos, prev.len)?;
            n_backrefs += 1;
            i = i - 1 + prev.len;
        }

        for &lit in &inp[i..] {
            sink.put_literal(lit)?;
            n_lits += 1;
        }

        tracing::debug!(
            input_len = inp_len,
            literals = n_lits,
            backrefs = n_backrefs,
            "match search done"
        );

        Ok(())
    }

    /// Compress the input into a preallocated buffer
    ///
    /// Returns the compressed size on success, or an error otherwise.
    /// A buffer of [max_compressed_len] bytes is always big enough.
    pub fn compress_to_buf(
        &mut self,
        inp: &[u8],
        outp: &mut [u8],
        opts: &CompressOptions,
    ) -> Result<usize, CompressError> {
        let mut packer = GroupPacker::new(BufOutput::from(outp))?;
        self.compress_tokens(inp, opts, &mut packer)?;
        let outp = packer.finish()?;
        Ok(outp.pos)
    }

    #[cfg(feature = "alloc")]
    /// Compress the input into a [Vec](alloc::vec::Vec)
    ///
    /// Returns the result on success, or an error otherwise
    pub fn compress_to_vec(
        &mut self,
        inp: &[u8],
        opts: &CompressOptions,
    ) -> Result<alloc::vec::Vec<u8>, CompressError> {
        let requested = max_compressed_len(inp.len());
        let mut ret = alloc::vec::Vec::new();
        ret.try_reserve_exact(requested)
            .map_err(|_| CompressError::AllocationFailed { requested })?;

        let mut packer = GroupPacker::new(VecOutput::from(ret))?;
        self.compress_tokens(inp, opts, &mut packer)?;
        let ret = packer.finish()?;
        debug_assert!(ret.vec.len() <= requested);
        Ok(ret.vec)
    }
}
impl Default for CompressState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "alloc")]
/// Compress `inp` with the default options
pub fn compress(inp: &[u8]) -> Result<alloc::vec::Vec<u8>, CompressError> {
    CompressState::new_boxed().compress_to_vec(inp, &CompressOptions::default())
}

#[cfg(all(test, feature = "alloc"))]
mod tests {
    extern crate std;

    use super::*;
    use std::vec;
    use std::vec::Vec;

    fn tokens(inp: &[u8], opts: &CompressOptions) -> Vec<Token> {
        let mut toks = Vec::new();
        let mut state = CompressState::new_boxed();
        state.compress_tokens(inp, opts, &mut toks).unwrap();
        toks
    }

    fn lit(b: u8) -> Token {
        Token::Literal(b)
    }

    fn br(dist: usize, len: usize) -> Token {
        Token::Backref { dist, len }
    }

    #[test]
    fn test_packer_lits() {
        let mut out = [0u8; 6];
        let mut packer = GroupPacker::new(BufOutput::from(&mut out[..])).unwrap();
        packer.put_literal(1).unwrap();
        packer.put_literal(2).unwrap();
        let len = packer.finish().unwrap().pos;
        assert_eq!(len, 6);
        assert_eq!(out, [0x00, 1, 2, 0, 0, 0]);
    }

    #[test]
    fn test_packer_backref() {
        let mut out = [0u8; 8];
        let mut packer = GroupPacker::new(BufOutput::from(&mut out[..])).unwrap();
        packer.put_literal(0xaa).unwrap();
        packer.put_backref(0x1234, 0x20).unwrap();
        packer.finish().unwrap();
        assert_eq!(out, [0x02, 0xaa, 0x12, 0x33, 0x1f, 0, 0, 0]);
    }

    #[test]
    fn test_packer_full_group() {
        let mut out = [0u8; 32];
        let mut packer = GroupPacker::new(BufOutput::from(&mut out[..])).unwrap();
        // first token is a backref, then literals, then backref at the end
        packer.put_backref(1, 4).unwrap();
        for b in 1..7 {
            packer.put_literal(b).unwrap();
        }
        packer.put_backref(2, 256).unwrap();
        // second group
        packer.put_backref(3, 5).unwrap();
        let len = packer.finish().unwrap().pos;
        assert_eq!(
            out[..len],
            [
                0x81, 0x00, 0x00, 0x03, 1, 2, 3, 4, 5, 6, 0x00, 0x01, 0xff, //
                0x01, 0x00, 0x02, 0x04, //
                0, 0, 0
            ]
        );
    }

    #[test]
    fn test_packer_exactly_eight() {
        let mut out = [0u8; 13];
        let mut packer = GroupPacker::new(BufOutput::from(&mut out[..])).unwrap();
        for b in 0..8 {
            packer.put_literal(b).unwrap();
        }
        let len = packer.finish().unwrap().pos;
        assert_eq!(len, max_compressed_len(8));
        // trailing group is empty but still present
        assert_eq!(out, [0x00, 0, 1, 2, 3, 4, 5, 6, 7, 0x00, 0, 0, 0]);
    }

    #[test]
    fn test_packer_rejects_unencodable() {
        let mut out = [0u8; 16];
        let mut packer = GroupPacker::new(BufOutput::from(&mut out[..])).unwrap();
        assert_eq!(
            packer.put_backref(0, 4),
            Err(CompressError::DistanceOutOfRange { dist: 0 })
        );
        assert_eq!(
            packer.put_backref(65537, 4),
            Err(CompressError::DistanceOutOfRange { dist: 65537 })
        );
        assert_eq!(
            packer.put_backref(1, 3),
            Err(CompressError::LengthOutOfRange { len: 3 })
        );
        assert_eq!(
            packer.put_backref(1, 257),
            Err(CompressError::LengthOutOfRange { len: 257 })
        );
        packer.put_backref(65536, 256).unwrap();
        packer.finish().unwrap();
        assert_eq!(out[..8], [0x01, 0xff, 0xff, 0xff, 0, 0, 0, 0]);
    }

    #[test]
    fn test_packer_output_too_small() {
        {
            let mut out = [0u8; 0];
            assert!(GroupPacker::new(BufOutput::from(&mut out[..])).is_err());
        }
        {
            let mut out = [0u8; 3];
            let mut packer = GroupPacker::new(BufOutput::from(&mut out[..])).unwrap();
            packer.put_literal(1).unwrap();
            assert_eq!(
                packer.put_backref(1, 4),
                Err(CompressError::OutputTooSmall)
            );
        }
    }

    #[test]
    fn test_empty() {
        let mut state = CompressState::new_boxed();
        let mut out = [0xffu8; 4];
        let len = state
            .compress_to_buf(&[], &mut out, &CompressOptions::default())
            .unwrap();
        assert_eq!(len, 4);
        assert_eq!(out, [0, 0, 0, 0]);
        assert!(tokens(&[], &CompressOptions::default()).is_empty());
    }

    #[test]
    fn test_short_and_uncompressible() {
        let opts = CompressOptions::default();
        assert_eq!(
            tokens(&[0xaa, 0xbb, 0xcc], &opts),
            [lit(0xaa), lit(0xbb), lit(0xcc)]
        );
        assert_eq!(
            compress(&[0xaa, 0xbb, 0xcc]).unwrap(),
            [0x00, 0xaa, 0xbb, 0xcc, 0, 0, 0]
        );
        assert_eq!(
            tokens(&[1, 2, 3, 4, 5], &opts),
            [lit(1), lit(2), lit(3), lit(4), lit(5)]
        );
    }

    #[test]
    fn test_simple_backref() {
        let opts = CompressOptions::default();
        assert_eq!(tokens(&[1, 1, 1, 1, 1], &opts), [lit(1), br(1, 4)]);
        assert_eq!(
            compress(&[1, 1, 1, 1, 1]).unwrap(),
            [0x02, 1, 0x00, 0x00, 0x03, 0, 0, 0]
        );
        // trailing nonmatch
        assert_eq!(
            tokens(&[1, 1, 1, 1, 1, 2], &opts),
            [lit(1), br(1, 4), lit(2)]
        );
    }

    #[test]
    fn test_long_run() {
        let inp = [0x41u8; 1000];
        let toks = tokens(&inp, &CompressOptions::default());
        assert_eq!(
            toks,
            [lit(0x41), br(1, 256), br(1, 256), br(1, 256), br(1, 231)]
        );

        let out = compress(&inp).unwrap();
        let mut expected = vec![0x1e, 0x41];
        for _ in 0..3 {
            expected.extend_from_slice(&[0x00, 0x00, 0xff]);
        }
        expected.extend_from_slice(&[0x00, 0x00, 0xe6, 0, 0, 0]);
        assert_eq!(out, expected);
    }

    #[test]
    fn test_lazy_prefers_longer_next() {
        // at "abcd" a 4 byte match exists, one byte later a 5 byte one
        let inp = b"abcdbcdef-abcdef";
        let toks = tokens(inp, &CompressOptions::default());
        let mut expected: Vec<Token> = inp[..11].iter().map(|&b| lit(b)).collect();
        expected.push(br(7, 5));
        assert_eq!(toks, expected);
    }

    #[test]
    fn test_far_repeat_stays_literal() {
        let mut inp = vec![1, 2, 3, 4];
        inp.extend(10..20);
        inp.extend_from_slice(&[1, 2, 3, 4]);

        let opts = CompressOptions::default().with_max_distance(8).unwrap();
        let toks = tokens(&inp, &opts);
        assert_eq!(toks.len(), inp.len());
        assert!(toks.iter().all(|t| matches!(t, Token::Literal(_))));

        let toks = tokens(&inp, &CompressOptions::default());
        assert_eq!(toks.last(), Some(&br(14, 4)));
    }

    #[test]
    fn test_no_overlap() {
        let opts = CompressOptions::default().with_allow_overlap(false);
        assert_eq!(
            tokens(&[1; 8], &opts),
            [lit(1), lit(1), lit(1), lit(1), br(4, 4)]
        );

        let toks = tokens(&[7; 300], &opts);
        let mut covered = 0;
        for t in &toks {
            if let Token::Backref { dist, len } = *t {
                assert!(len <= dist);
            }
            covered += t.covered_len();
        }
        assert_eq!(covered, 300);
    }

    #[test]
    fn test_max_match_len_option() {
        let opts = CompressOptions::default().with_max_match_len(4).unwrap();
        let toks = tokens(&[5; 13], &opts);
        assert_eq!(toks, [lit(5), br(1, 4), br(1, 4), br(1, 4)]);
    }

    #[test]
    fn test_invalid_options() {
        let opts = CompressOptions::default();
        assert!(matches!(
            opts.with_max_distance(0),
            Err(CompressError::InvalidOptions(_))
        ));
        assert!(opts.with_max_distance(MAX_WINDOW + 1).is_err());
        assert!(opts.with_max_match_len(3).is_err());
        assert!(opts.with_max_match_len(257).is_err());
        assert_eq!(opts.with_max_distance(MAX_WINDOW).unwrap(), opts);
    }

    #[test]
    fn test_sink_abort() {
        struct FailAfter {
            left: usize,
            calls: usize,
        }
        impl TokenSink<&'static str> for FailAfter {
            fn put_literal(&mut self, _: u8) -> Result<(), &'static str> {
                self.calls += 1;
                if self.left == 0 {
                    return Err("full");
                }
                self.left -= 1;
                Ok(())
            }
            fn put_backref(&mut self, _: usize, _: usize) -> Result<(), &'static str> {
                self.put_literal(0)
            }
        }

        let mut sink = FailAfter { left: 2, calls: 0 };
        let mut state = CompressState::new_boxed();
        let res = state.compress_tokens(b"abcdefgh", &CompressOptions::default(), &mut sink);
        assert_eq!(res, Err("full"));
        assert_eq!(sink.calls, 3);
    }

    #[test]
    fn test_buf_too_small() {
        let mut state = CompressState::new_boxed();
        let mut out = [0u8; 6];
        assert_eq!(
            state.compress_to_buf(&[1, 2, 3], &mut out, &CompressOptions::default()),
            Err(CompressError::OutputTooSmall)
        );
    }

    #[test]
    fn test_state_reuse() {
        let mut state = CompressState::new_boxed();
        let opts = CompressOptions::default();
        let inp = b"the quick brown fox jumps over the quick brown dog";
        let a = state.compress_to_vec(inp, &opts).unwrap();
        state.compress_to_vec(b"something else entirely", &opts).unwrap();
        let b = state.compress_to_vec(inp, &opts).unwrap();
        assert_eq!(a, b);
    }
}
