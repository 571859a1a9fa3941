use std::cmp::Ordering;
use std::fmt;

use smallvec::{smallvec, SmallVec};

use crate::bigint::LogootInt;
use crate::branch::BranchId;
use crate::Error;

/// One level of a position: an atom and the branch that allocated it. Branch
/// rank breaks atom ties, so concurrent same-atom allocations stay distinct
/// and deterministically ordered.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Level {
    pub atom: LogootInt,
    pub branch: BranchId,
}

impl Level {
    pub fn new(atom: LogootInt, branch: BranchId) -> Self {
        Level { atom, branch }
    }
}

impl fmt::Debug for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:?}", self.atom, self.branch)
    }
}

/// A variable-length lexicographic position key.
///
/// Between any two distinct positions another position exists: either an
/// unused atom at a shared level, or a fresh level appended beneath the left
/// neighbour. Comparison is level-wise; when one position is a prefix of the
/// other, the shorter sorts first, which puts an enclosing run ahead of
/// anything nested inside its span.
#[derive(Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct LogootPosition {
    levels: SmallVec<[Level; 2]>,
}

impl LogootPosition {
    pub fn single(atom: LogootInt, branch: BranchId) -> Self {
        LogootPosition {
            levels: smallvec![Level::new(atom, branch)],
        }
    }

    /// Number of levels. Always at least 1.
    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn level(&self, i: usize) -> Option<&Level> {
        self.levels.get(i)
    }

    /// The atom at level `i`. Panics when out of range.
    pub fn l(&self, i: usize) -> &LogootInt {
        &self.levels[i].atom
    }

    pub fn lowest(&self) -> &Level {
        self.levels.last().unwrap()
    }

    /// Copy with the lowest-level atom incremented by `k`.
    pub fn offset_lowest(&self, k: usize) -> Self {
        let mut out = self.clone();
        let last = out.levels.last_mut().unwrap();
        last.atom = last.atom.offset(k);
        out
    }

    /// Copy with the lowest-level atom decremented by `k`.
    pub fn inverse_offset_lowest(&self, k: usize) -> Self {
        let mut out = self.clone();
        let last = out.levels.last_mut().unwrap();
        last.atom = last.atom.inverse_offset(k);
        out
    }

    fn descend(&self, branch: BranchId) -> Self {
        let mut out = self.clone();
        out.levels.push(Level::new(LogootInt::zero(), branch));
        out
    }

    /// True when `self` and `other` address the same atom lattice: equal
    /// depth, equal prefix, and the same branch on the lowest level. Only
    /// then do their lowest-level atoms live on one number line.
    pub fn same_run_level(&self, other: &Self) -> bool {
        self.len() == other.len()
            && self.lowest().branch == other.lowest().branch
            && self.levels[..self.len() - 1] == other.levels[..other.len() - 1]
    }

    /// Generate a position for a run of `length` atoms strictly between
    /// `left` and `right` (absent bounds are the document edges).
    ///
    /// Walks shared levels looking for atom room; without room it descends
    /// beneath the left neighbour with one fresh level on `branch`. Equal
    /// bounds (a point insertion) descend beneath the bound's immediate
    /// lowest-level predecessor so the run sorts ahead of everything keyed
    /// at the bound itself.
    pub fn new_between(
        branch: BranchId,
        length: usize,
        left: Option<&Self>,
        right: Option<&Self>,
    ) -> Result<Self, Error> {
        if length == 0 {
            return Err(Error::InvalidArgument("cannot allocate an empty run"));
        }
        match (left, right) {
            (None, None) => Ok(Self::single(LogootInt::zero(), branch)),
            (Some(l), None) => {
                // Appending past the end of the document flattens to the
                // top level; nesting depth never grows from plain appends.
                Ok(Self::single(l.l(0).offset(1), branch))
            }
            (None, Some(r)) => Ok(Self::single(r.l(0).inverse_offset(length), branch)),
            (Some(l), Some(r)) => match l.cmp(r) {
                Ordering::Greater => Err(Error::InvalidArgument("left bound beyond right bound")),
                Ordering::Equal => Ok(l.inverse_offset_lowest(1).descend(branch)),
                Ordering::Less => Ok(Self::between(branch, length, l, r)),
            },
        }
    }

    fn between(branch: BranchId, length: usize, l: &Self, r: &Self) -> Self {
        let mut prefix: SmallVec<[Level; 2]> = SmallVec::new();
        for d in 0.. {
            match (l.level(d), r.level(d)) {
                (Some(a), Some(b)) if a == b => prefix.push(a.clone()),
                (Some(a), Some(b)) => {
                    debug_assert!(a < b);
                    // Strictly-inside window at this level: atoms
                    // (a.atom, b.atom) exclusive on both sides.
                    let gap = a.atom.gap_to(&b.atom);
                    if gap.cmp_usize(length) == Ordering::Greater {
                        prefix.push(Level::new(a.atom.offset(1), branch));
                        return LogootPosition { levels: prefix };
                    }
                    // No room; descend beneath the left neighbour. Anything
                    // prefixed by `l` sorts inside (l, r) once the bounds
                    // have diverged.
                    return l.descend(branch);
                }
                (None, Some(b)) => {
                    // `l` is exactly the shared prefix; anything one level
                    // deeper sorts after it. Sit flush against `r`.
                    prefix.push(Level::new(b.atom.inverse_offset(length), branch));
                    return LogootPosition { levels: prefix };
                }
                (Some(_), None) => {
                    // Would mean r is a strict prefix of l, i.e. r < l.
                    unreachable!("ordered bounds cannot exhaust right first")
                }
                (None, None) => unreachable!("equal bounds handled by caller"),
            }
        }
        unreachable!()
    }
}

impl Ord for LogootPosition {
    fn cmp(&self, other: &Self) -> Ordering {
        for (a, b) in self.levels.iter().zip(other.levels.iter()) {
            match a.cmp(b) {
                Ordering::Equal => continue,
                ord => return ord,
            }
        }
        self.len().cmp(&other.len())
    }
}

impl PartialOrd for LogootPosition {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Debug for LogootPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, lvl) in self.levels.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{:?}", lvl)?;
        }
        f.write_str("]")
    }
}

/// A position or one of the two document edges. This is the type anchors
/// and insertion envelopes range over; the edges bound every real position.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Anchor {
    Start,
    Pos(LogootPosition),
    End,
}

impl Anchor {
    pub fn pos(&self) -> Option<&LogootPosition> {
        match self {
            Anchor::Pos(p) => Some(p),
            _ => None,
        }
    }

    pub fn is_edge(&self) -> bool {
        !matches!(self, Anchor::Pos(_))
    }
}

impl From<LogootPosition> for Anchor {
    fn from(p: LogootPosition) -> Self {
        Anchor::Pos(p)
    }
}

impl From<Option<LogootPosition>> for Anchor {
    fn from(p: Option<LogootPosition>) -> Self {
        match p {
            Some(p) => Anchor::Pos(p),
            None => Anchor::End,
        }
    }
}

impl PartialEq<LogootPosition> for Anchor {
    fn eq(&self, other: &LogootPosition) -> bool {
        self.pos() == Some(other)
    }
}

impl PartialOrd<LogootPosition> for Anchor {
    fn partial_cmp(&self, other: &LogootPosition) -> Option<Ordering> {
        Some(match self {
            Anchor::Start => Ordering::Less,
            Anchor::End => Ordering::Greater,
            Anchor::Pos(p) => p.cmp(other),
        })
    }
}

impl fmt::Debug for Anchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Anchor::Start => f.write_str("DocStart"),
            Anchor::End => f.write_str("DocEnd"),
            Anchor::Pos(p) => p.fmt(f),
        }
    }
}
