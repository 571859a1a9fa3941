use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, AddAssign, Sub, SubAssign};

use smallvec::SmallVec;

/// An arbitrary-precision signed integer.
///
/// Position atoms need unbounded range in both directions (prepending walks
/// atoms negative), but in practice almost every atom fits in one word. The
/// magnitude lives in a `SmallVec` so the single-word case stays inline.
///
/// Representation: little-endian `u64` words with no trailing zero word.
/// Zero is the empty magnitude and is never negative.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct BigInt {
    words: SmallVec<[u64; 1]>,
    negative: bool,
}

impl BigInt {
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn is_zero(&self) -> bool {
        self.words.is_empty()
    }

    pub fn is_negative(&self) -> bool {
        self.negative
    }

    fn from_magnitude(words: SmallVec<[u64; 1]>, negative: bool) -> Self {
        let mut b = BigInt { words, negative };
        b.normalize();
        b
    }

    fn normalize(&mut self) {
        while self.words.last() == Some(&0) {
            self.words.pop();
        }
        if self.words.is_empty() {
            self.negative = false;
        }
    }

    fn mag_cmp(a: &[u64], b: &[u64]) -> Ordering {
        a.len().cmp(&b.len()).then_with(|| {
            for (x, y) in a.iter().rev().zip(b.iter().rev()) {
                match x.cmp(y) {
                    Ordering::Equal => continue,
                    other => return other,
                }
            }
            Ordering::Equal
        })
    }

    fn mag_add(a: &[u64], b: &[u64]) -> SmallVec<[u64; 1]> {
        let mut out = SmallVec::with_capacity(a.len().max(b.len()) + 1);
        let mut carry = false;
        for i in 0..a.len().max(b.len()) {
            let x = a.get(i).copied().unwrap_or(0);
            let y = b.get(i).copied().unwrap_or(0);
            let (sum, c1) = x.overflowing_add(y);
            let (sum, c2) = sum.overflowing_add(carry as u64);
            out.push(sum);
            carry = c1 || c2;
        }
        if carry {
            out.push(1);
        }
        out
    }

    /// Magnitude subtraction. Requires `a >= b`.
    fn mag_sub(a: &[u64], b: &[u64]) -> SmallVec<[u64; 1]> {
        debug_assert!(Self::mag_cmp(a, b) != Ordering::Less);
        let mut out = SmallVec::with_capacity(a.len());
        let mut borrow = false;
        for i in 0..a.len() {
            let x = a[i];
            let y = b.get(i).copied().unwrap_or(0);
            let (diff, b1) = x.overflowing_sub(y);
            let (diff, b2) = diff.overflowing_sub(borrow as u64);
            out.push(diff);
            borrow = b1 || b2;
        }
        debug_assert!(!borrow);
        out
    }

    fn add_signed(&self, other: &BigInt, flip_other: bool) -> BigInt {
        let other_neg = other.negative != flip_other && !other.is_zero();
        if self.negative == other_neg {
            BigInt::from_magnitude(Self::mag_add(&self.words, &other.words), self.negative)
        } else {
            match Self::mag_cmp(&self.words, &other.words) {
                Ordering::Equal => BigInt::zero(),
                Ordering::Greater => BigInt::from_magnitude(
                    Self::mag_sub(&self.words, &other.words),
                    self.negative,
                ),
                Ordering::Less => BigInt::from_magnitude(
                    Self::mag_sub(&other.words, &self.words),
                    other_neg,
                ),
            }
        }
    }

    fn mul_small(&mut self, m: u64) {
        let mut carry: u128 = 0;
        for w in self.words.iter_mut() {
            let prod = *w as u128 * m as u128 + carry;
            *w = prod as u64;
            carry = prod >> 64;
        }
        if carry != 0 {
            self.words.push(carry as u64);
        }
        self.normalize();
    }

    fn add_small_mag(&mut self, v: u64) {
        let mut carry = v;
        for w in self.words.iter_mut() {
            let (sum, c) = w.overflowing_add(carry);
            *w = sum;
            carry = c as u64;
            if carry == 0 {
                break;
            }
        }
        if carry != 0 {
            self.words.push(carry);
        }
    }

    /// Division of the magnitude by a small divisor, returning the remainder.
    fn divmod_small(&mut self, d: u64) -> u64 {
        let mut rem: u128 = 0;
        for w in self.words.iter_mut().rev() {
            let cur = (rem << 64) | *w as u128;
            *w = (cur / d as u128) as u64;
            rem = cur % d as u128;
        }
        self.normalize();
        rem as u64
    }

    /// Compare against an unsigned machine integer without allocating.
    pub fn cmp_usize(&self, v: usize) -> Ordering {
        if self.negative {
            return Ordering::Less;
        }
        match self.words.len() {
            0 => 0u64.cmp(&(v as u64)),
            1 => self.words[0].cmp(&(v as u64)),
            _ => Ordering::Greater,
        }
    }

    /// Narrow to a machine integer. `None` for negatives and overflow.
    pub fn to_usize(&self) -> Option<usize> {
        if self.negative {
            return None;
        }
        match self.words.len() {
            0 => Some(0),
            1 => usize::try_from(self.words[0]).ok(),
            _ => None,
        }
    }

    /// Parse a signed decimal string (the wire form).
    pub fn from_decimal(s: &str) -> Option<Self> {
        let (neg, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s),
        };
        if digits.is_empty() {
            return None;
        }
        let mut out = BigInt::zero();
        for c in digits.bytes() {
            if !c.is_ascii_digit() {
                return None;
            }
            out.mul_small(10);
            out.add_small_mag((c - b'0') as u64);
        }
        out.negative = neg && !out.words.is_empty();
        out.normalize();
        Some(out)
    }
}

impl From<i64> for BigInt {
    fn from(v: i64) -> Self {
        let mut words = SmallVec::new();
        if v != 0 {
            words.push(v.unsigned_abs());
        }
        BigInt {
            words,
            negative: v < 0,
        }
    }
}

impl From<usize> for BigInt {
    fn from(v: usize) -> Self {
        let mut words = SmallVec::new();
        if v != 0 {
            words.push(v as u64);
        }
        BigInt {
            words,
            negative: false,
        }
    }
}

impl Ord for BigInt {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.negative, other.negative) {
            (false, true) => Ordering::Greater,
            (true, false) => Ordering::Less,
            (false, false) => Self::mag_cmp(&self.words, &other.words),
            (true, true) => Self::mag_cmp(&other.words, &self.words),
        }
    }
}

impl PartialOrd for BigInt {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Add<&BigInt> for &BigInt {
    type Output = BigInt;
    fn add(self, rhs: &BigInt) -> BigInt {
        self.add_signed(rhs, false)
    }
}

impl Sub<&BigInt> for &BigInt {
    type Output = BigInt;
    fn sub(self, rhs: &BigInt) -> BigInt {
        self.add_signed(rhs, true)
    }
}

impl AddAssign<usize> for BigInt {
    fn add_assign(&mut self, rhs: usize) {
        *self = self.add_signed(&BigInt::from(rhs), false);
    }
}

impl SubAssign<usize> for BigInt {
    fn sub_assign(&mut self, rhs: usize) {
        *self = self.add_signed(&BigInt::from(rhs), true);
    }
}

impl fmt::Display for BigInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_zero() {
            return f.write_str("0");
        }
        let mut mag = self.clone();
        let mut digits = Vec::new();
        while !mag.is_zero() {
            digits.push(b'0' + mag.divmod_small(10) as u8);
        }
        if self.negative {
            f.write_str("-")?;
        }
        digits.reverse();
        f.write_str(std::str::from_utf8(&digits).unwrap())
    }
}

// Debug as Display; word-vector dumps are unreadable in position output.
impl fmt::Debug for BigInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// A position atom / removal clock.
///
/// Thin wrapper giving the integers their own identity in signatures. All
/// arithmetic the model needs goes through here.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct LogootInt(BigInt);

impl LogootInt {
    pub fn zero() -> Self {
        Self(BigInt::zero())
    }

    pub fn new(v: i64) -> Self {
        Self(BigInt::from(v))
    }

    pub fn big(&self) -> &BigInt {
        &self.0
    }

    /// self + 1, for clock derivation.
    pub fn incremented(&self) -> Self {
        let mut out = self.clone();
        out.0 += 1;
        out
    }

    pub fn offset(&self, k: usize) -> Self {
        let mut out = self.clone();
        out.0 += k;
        out
    }

    pub fn inverse_offset(&self, k: usize) -> Self {
        let mut out = self.clone();
        out.0 -= k;
        out
    }

    /// Distance to `other` (`other - self`).
    pub fn gap_to(&self, other: &LogootInt) -> BigInt {
        &other.0 - &self.0
    }
}

impl From<i64> for LogootInt {
    fn from(v: i64) -> Self {
        Self::new(v)
    }
}

impl From<BigInt> for LogootInt {
    fn from(v: BigInt) -> Self {
        Self(v)
    }
}

impl fmt::Display for LogootInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

impl fmt::Debug for LogootInt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

#[cfg(feature = "serde")]
mod serde_impls {
    use super::*;
    use serde::de::Error as DeError;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    // The wire form is a signed big-endian decimal digit string.
    impl Serialize for BigInt {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.collect_str(self)
        }
    }

    impl<'de> Deserialize<'de> for BigInt {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            let s = String::deserialize(deserializer)?;
            BigInt::from_decimal(&s).ok_or_else(|| D::Error::custom("malformed digit string"))
        }
    }

    impl Serialize for LogootInt {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            self.0.serialize(serializer)
        }
    }

    impl<'de> Deserialize<'de> for LogootInt {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            Ok(LogootInt(BigInt::deserialize(deserializer)?))
        }
    }
}
