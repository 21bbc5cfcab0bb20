//! Hash chains over 4-byte prefixes, and the longest-match search on top of them

/// Shortest backreference worth encoding
pub const MIN_MATCH_LEN: usize = 4;
/// Largest distance the chains can remember
pub const MAX_WINDOW: usize = 32768;

pub(crate) const HTAB_LOG2: usize = 15;
pub(crate) const HTAB_SZ: usize = 1 << HTAB_LOG2;

/// Marks an empty chain slot
pub(crate) const NO_POS: usize = usize::MAX;

const MAX_MATCH_STEPS: usize = 4096;
/// Once a match this long is in hand, walk less of the chain
const GOOD_MATCH_LEN: usize = 32;

/// Knuth multiplicative hash of the 4 bytes starting at some position
pub(crate) fn hash4(v: u32) -> usize {
    let h = v.wrapping_mul(2654435761);
    let h = h >> (32 - HTAB_LOG2);
    h as usize
}

/// Read the 4 bytes at `pos` as little-endian, if there are that many left
pub(crate) fn peek4(src: &[u8], pos: usize) -> Option<u32> {
    let ret = u32::from_le_bytes(*src.get(pos..)?.first_chunk::<4>()?);
    Some(ret)
}

/// A usable match candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Match {
    /// Where the earlier copy starts
    pub pos: usize,
    pub len: usize,
}

/// `head` holds the newest position for each bucket, `prev` links each
/// position (modulo the window) to the next older one with the same hash.
///
/// Chains only ever point backwards. Entries older than the window are never
/// cleared; the search stops before it reaches them.
pub(crate) struct HashChains {
    pub(crate) head: [usize; HTAB_SZ],
    pub(crate) prev: [usize; MAX_WINDOW],
}

impl HashChains {
    pub(crate) fn new() -> Self {
        Self {
            head: [NO_POS; HTAB_SZ],
            prev: [NO_POS; MAX_WINDOW],
        }
    }

    pub(crate) fn reset(&mut self) {
        self.head.fill(NO_POS);
    }

    /// Must be called once per position, in increasing order
    pub(crate) fn insert(&mut self, hash: usize, pos: usize) {
        debug_assert!(pos != NO_POS);
        self.prev[pos % MAX_WINDOW] = self.head[hash];
        self.head[hash] = pos;
    }

    /// Find the longest, most recent match for `src[pos..]`
    ///
    /// The result is strictly longer than `prev_match_len` and no longer than
    /// `max_match_len`, which the caller must keep within `src.len() - pos`.
    /// `pos` itself must not have been inserted yet.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn find_match(
        &self,
        src: &[u8],
        pos: usize,
        hash: usize,
        max_dist: usize,
        mut prev_match_len: usize,
        max_match_len: usize,
        allow_overlap: bool,
    ) -> Option<Match> {
        debug_assert!(max_match_len <= src.len() - pos);

        if prev_match_len == 0 {
            prev_match_len = MIN_MATCH_LEN - 1;
        }
        if prev_match_len >= max_match_len {
            // nothing longer would fit
            return None;
        }

        let mut steps = MAX_MATCH_STEPS;
        if prev_match_len >= GOOD_MATCH_LEN {
            steps /= 4;
        }

        let mut best = None;
        let mut i = self.head[hash];
        while i != NO_POS && steps > 0 {
            steps -= 1;

            debug_assert!(i < pos);
            if pos - i > max_dist {
                // everything further down the chain is older still
                break;
            }

            let max_cmp = if allow_overlap {
                max_match_len
            } else {
                usize::min(max_match_len, pos - i)
            };

            if max_cmp > prev_match_len {
                let len = match_len(src, i, pos, prev_match_len, max_cmp);
                if len != 0 {
                    debug_assert!(len > prev_match_len && len <= max_cmp);
                    best = Some(Match { pos: i, len });
                    prev_match_len = len;

                    if len == max_match_len {
                        return best;
                    }
                }
            }

            i = self.prev[i % MAX_WINDOW];
        }

        best
    }
}

/// Length of the common prefix of `src[i..]` and `src[j..]`, or zero unless it
/// is longer than `floor`. Never exceeds `max_len`.
fn match_len(src: &[u8], i: usize, j: usize, floor: usize, max_len: usize) -> usize {
    debug_assert!(floor < max_len);

    // the tail of the known-good prefix is the most likely place to differ
    if (0..=floor).rev().any(|l| src[i + l] != src[j + l]) {
        return 0;
    }

    let ext = src[i + floor + 1..i + max_len]
        .iter()
        .zip(src[j + floor + 1..j + max_len].iter())
        .take_while(|(a, b)| a == b)
        .count();

    floor + 1 + ext
}
