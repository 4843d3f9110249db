use std::fmt::{Debug, Display, Formatter};

/// Signed circular distance from `from` to `to`, i.e. positive if `to` comes after `from`.
///
/// Sequence ids wrap around at 2^32, so they must never be compared with plain `<`. The
///  result is antisymmetric (`diff(a,b) == -diff(b,a)`) and always in
///  `[-(2^31-1), 2^31-1]`.
///
/// NB: At (or one step short of) the antipodal distance of 2^31, there is no meaningful
///      circular answer. In that band the result is clamped to `±(2^31-1)`, taking the sign
///      from the plain numeric comparison of the two ids. This keeps `i32::MIN` out of the
///      result range and keeps the function antisymmetric.
pub fn diff(from: u32, to: u32) -> i32 {
    let circular = to.wrapping_sub(from) as i32;

    if circular == i32::MIN || circular.unsigned_abs() >= i32::MAX as u32 {
        if to > from {
            i32::MAX
        }
        else {
            -i32::MAX
        }
    }
    else {
        circular
    }
}

/// Per-origin packet sequence number. It wraps modulo 2^32, and ordering decisions go through
///  [diff] exclusively - hence no `Ord` implementation.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Default)]
pub struct SequenceId(u32);

impl Display for SequenceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl Debug for SequenceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl SequenceId {
    pub const ZERO: SequenceId = SequenceId(0);

    pub const fn from_raw(value: u32) -> Self {
        Self(value)
    }

    pub const fn to_raw(&self) -> u32 {
        self.0
    }

    pub fn next(&self) -> SequenceId {
        SequenceId(self.0.wrapping_add(1))
    }

    pub fn prev(&self) -> SequenceId {
        SequenceId(self.0.wrapping_sub(1))
    }

    pub fn plus(&self, n: u32) -> SequenceId {
        SequenceId(self.0.wrapping_add(n))
    }

    /// circular distance from `self` to `other` - see [diff]
    pub fn diff_to(&self, other: SequenceId) -> i32 {
        diff(self.0, other.0)
    }

    /// true if `self` comes strictly before `other` in circular order
    pub fn is_before(&self, other: SequenceId) -> bool {
        self.diff_to(other) > 0
    }

    /// Iterates from `self` (inclusive) to `to` (exclusive). The iterator is empty if `to` is
    ///  not after `self`.
    pub fn to(&self, to: SequenceId) -> impl Iterator<Item = SequenceId> {
        let len = self.diff_to(to).max(0) as u32;
        let start = *self;
        (0..len).map(move |i| start.plus(i))
    }
}

/// Identifies the origin of packets, i.e. one peer in a multicast session.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct SenderId(u32);

impl Display for SenderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}
impl Debug for SenderId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{:08x}]", self.0)
    }
}

impl SenderId {
    pub const fn from_raw(value: u32) -> Self {
        Self(value)
    }

    pub const fn to_raw(&self) -> u32 {
        self.0
    }
}
