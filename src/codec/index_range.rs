//! Byte-range expressions for HEX payload fields
//!
//! A range expression is a list of tokens separated by spaces, semicolons or
//! commas. Each token is one of:
//!
//! - `n` - a single index
//! - `a-b` or `a..b` - an inclusive ascending range
//! - `-b` or `..b` - shorthand for `0..b`
//! - `a-` or `a..` - from `a` up to the last index of the received payload
//!
//! Tokens that do not match this grammar are skipped without any error, so
//! `"1,x,3"` selects indexes 1 and 3.

use once_cell::sync::Lazy;
use regex::Regex;
use tracing::trace;

static RANGE_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^\s*(?:(?P<single>\d+)|(?P<from>\d+)(?:-|\.\.)(?P<to>\d+)|(?:-|\.\.)(?P<upto>\d+)|(?P<open>\d+)(?:-|\.\.))\s*$",
    )
    .expect("range token pattern is valid")
});

/// One parsed token of a byte-range expression
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RangeToken {
    /// `n`
    Single(usize),
    /// `a-b` / `a..b`
    Bounded { from: usize, to: usize },
    /// `-b` / `..b`
    UpTo(usize),
    /// `a-` / `a..`
    From(usize),
}

impl RangeToken {
    fn parse(token: &str) -> Option<Self> {
        let captures = RANGE_TOKEN.captures(token)?;
        let number = |name: &str| captures.name(name).and_then(|m| m.as_str().parse::<usize>().ok());

        if captures.name("single").is_some() {
            number("single").map(RangeToken::Single)
        } else if captures.name("from").is_some() {
            Some(RangeToken::Bounded {
                from: number("from")?,
                to: number("to")?,
            })
        } else if captures.name("upto").is_some() {
            number("upto").map(RangeToken::UpTo)
        } else {
            number("open").map(RangeToken::From)
        }
    }

    /// Inclusive bounds once the payload's last index is known.
    /// An empty payload (`last_index == None`) leaves open ranges empty.
    fn bounds(&self, last_index: Option<usize>) -> Option<(usize, usize)> {
        match *self {
            RangeToken::Single(index) => Some((index, index)),
            RangeToken::Bounded { from, to } => (from <= to).then_some((from, to)),
            RangeToken::UpTo(to) => Some((0, to)),
            RangeToken::From(from) => last_index.filter(|last| from <= *last).map(|last| (from, last)),
        }
    }
}

/// A parsed byte-range expression, resolved against the payload length at decode time
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ByteRangeExpr {
    tokens: Vec<RangeToken>,
}

impl ByteRangeExpr {
    /// Parse an expression, keeping only the tokens that match the grammar
    pub fn parse(expr: &str) -> Self {
        let tokens = expr
            .split([' ', ';', ','])
            .filter_map(|part| {
                let token = RangeToken::parse(part);
                if token.is_none() && !part.is_empty() {
                    trace!(token = part, "Skipping unrecognised byte range token");
                }
                token
            })
            .collect();

        Self { tokens }
    }

    pub fn tokens(&self) -> &[RangeToken] {
        &self.tokens
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Lazily expand the expression in token order.
    ///
    /// Indexes are not clamped to `last_index`; callers decide what an
    /// out-of-bounds index means.
    pub fn indexes(&self, last_index: Option<usize>) -> impl Iterator<Item = usize> + '_ {
        self.tokens
            .iter()
            .filter_map(move |token| token.bounds(last_index))
            .flat_map(|(from, to)| from..=to)
    }
}

/// Parse `expr` and expand it against `last_index` in one step
pub fn parse_indexes(expr: &str, last_index: usize) -> Vec<usize> {
    ByteRangeExpr::parse(expr).indexes(Some(last_index)).collect()
}
