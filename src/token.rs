use std::fmt;

/// Associates a readiness [`Event`](crate::event::Event) with whatever the
/// caller registered with the reactor.
///
/// Mirrors mio's `Token`: an opaque `usize` newtype, round-tripped through
/// the kernel as the epoll event's `u64` user-data field.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(pub usize);

impl From<usize> for Token {
    fn from(val: usize) -> Token {
        Token(val)
    }
}

impl From<Token> for usize {
    fn from(val: Token) -> usize {
        val.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
