#[cfg(feature = "alloc")]
extern crate alloc;

/// Receiver for the decisions made by the match loop
///
/// Both functions are called in strict input order, and together they cover
/// every input byte exactly once. Returning `Err` aborts compression and the
/// error is handed back to the caller unchanged.
pub trait TokenSink<ErrTy> {
    /// Emit one input byte as-is
    fn put_literal(&mut self, lit: u8) -> Result<(), ErrTy>;
    /// Add a backreference to the output
    ///
    /// A `dist` of 1 means the byte immediately before the current position.
    /// Increasing `dist` means further backwards
    ///
    /// Copy `len` bytes, which as usual for LZ77 may exceed `dist`.
    fn put_backref(&mut self, dist: usize, len: usize) -> Result<(), ErrTy>;
}

/// A single decision of the match loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Token {
    Literal(u8),
    Backref { dist: usize, len: usize },
}

impl Token {
    /// Number of input bytes this token stands for
    pub fn covered_len(&self) -> usize {
        match *self {
            Token::Literal(_) => 1,
            Token::Backref { len, .. } => len,
        }
    }
}

/// Collects tokens verbatim, mostly useful for inspecting what the match loop decided
#[cfg(feature = "alloc")]
impl TokenSink<core::convert::Infallible> for alloc::vec::Vec<Token> {
    fn put_literal(&mut self, lit: u8) -> Result<(), core::convert::Infallible> {
        self.push(Token::Literal(lit));
        Ok(())
    }
    fn put_backref(&mut self, dist: usize, len: usize) -> Result<(), core::convert::Infallible> {
        self.push(Token::Backref { dist, len });
        Ok(())
    }
}

/// Fixed-size output, filled front to back
pub(crate) struct BufOutput<'a> {
    pub pos: usize,
    pub buf: &'a mut [u8],
}
impl<'a> From<&'a mut [u8]> for BufOutput<'a> {
    fn from(buf: &'a mut [u8]) -> Self {
        Self { pos: 0, buf }
    }
}

#[cfg(feature = "alloc")]
pub(crate) struct VecOutput {
    pub vec: alloc::vec::Vec<u8>,
}
#[cfg(feature = "alloc")]
impl From<alloc::vec::Vec<u8>> for VecOutput {
    fn from(vec: alloc::vec::Vec<u8>) -> Self {
        Self { vec }
    }
}
