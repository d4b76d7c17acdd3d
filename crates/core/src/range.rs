//! Range lists
//!
//! A [`RangeList`] is an ordered sequence of disjoint, non-adjacent
//! `[min..max]` intervals over [`Sval`]s of one type. Every operation
//! returns a canonical list: intervals sorted, non-overlapping, and with
//! abutting neighbors merged. The `Display`/`parse` pair is the text form
//! the fact database stores.
//!
//! Casting is the delicate operation: narrowing (or a signedness flip)
//! can wrap an interval around the new type's number line, in which case
//! the result is the smallest range list containing every possible
//! post-cast value; one interval splits into at most two.

use crate::sval::{IntType, Sval};
use std::fmt;

/// One inclusive interval. `min <= max` in the mathematical order of the
/// common type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Range {
    pub min: Sval,
    pub max: Sval,
}

impl Range {
    fn contains(&self, v: Sval) -> bool {
        self.min.cmp_val(v) != std::cmp::Ordering::Greater
            && self.max.cmp_val(v) != std::cmp::Ordering::Less
    }
}

/// A canonical list of disjoint intervals over one integer type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeList {
    ty: IntType,
    ranges: Vec<Range>,
}

impl RangeList {
    /// The empty set over `ty`.
    pub fn empty(ty: IntType) -> Self {
        RangeList { ty, ranges: Vec::new() }
    }

    /// Every value of `ty`.
    pub fn whole(ty: IntType) -> Self {
        RangeList::new(ty, Sval::type_min(ty), Sval::type_max(ty))
    }

    /// The interval `[min..max]`. Endpoints are cast to `ty`; a reversed
    /// pair is reordered.
    pub fn new(ty: IntType, min: Sval, max: Sval) -> Self {
        let mut a = min.cast(ty);
        let mut b = max.cast(ty);
        if a.cmp_val(b) == std::cmp::Ordering::Greater {
            std::mem::swap(&mut a, &mut b);
        }
        RangeList { ty, ranges: vec![Range { min: a, max: b }] }
    }

    /// A single value.
    pub fn single(v: Sval) -> Self {
        RangeList::new(v.ty(), v, v)
    }

    /// `[v..type_max]`.
    pub fn above(ty: IntType, v: Sval) -> Self {
        RangeList::new(ty, v.cast(ty), Sval::type_max(ty))
    }

    /// `[type_min..v]`.
    pub fn below(ty: IntType, v: Sval) -> Self {
        RangeList::new(ty, Sval::type_min(ty), v.cast(ty))
    }

    /// Build from already-collected intervals, canonicalizing.
    pub fn from_ranges(ty: IntType, ranges: Vec<Range>) -> Self {
        let mut rl = RangeList { ty, ranges };
        rl.canonicalize();
        rl
    }

    pub fn ty(&self) -> IntType {
        self.ty
    }

    pub fn ranges(&self) -> &[Range] {
        &self.ranges
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    pub fn is_whole(&self) -> bool {
        self.ranges.len() == 1
            && self.ranges[0].min.is_type_min()
            && self.ranges[0].max.is_type_max()
    }

    /// The single value, if the list is exactly one.
    pub fn as_single(&self) -> Option<Sval> {
        if self.ranges.len() == 1 && self.ranges[0].min == self.ranges[0].max {
            Some(self.ranges[0].min)
        } else {
            None
        }
    }

    pub fn min(&self) -> Option<Sval> {
        self.ranges.first().map(|r| r.min)
    }

    pub fn max(&self) -> Option<Sval> {
        self.ranges.last().map(|r| r.max)
    }

    pub fn contains(&self, v: Sval) -> bool {
        let v = v.cast(self.ty);
        self.ranges.iter().any(|r| r.contains(v))
    }

    pub fn contains_zero(&self) -> bool {
        self.contains(Sval::new(self.ty, 0))
    }

    /// Set union. `other` is cast to `self`'s type first.
    pub fn union(&self, other: &RangeList) -> RangeList {
        let other = other.cast(self.ty);
        let mut ranges = self.ranges.clone();
        ranges.extend(other.ranges);
        RangeList::from_ranges(self.ty, ranges)
    }

    /// Set intersection. `other` is cast to `self`'s type first.
    pub fn intersect(&self, other: &RangeList) -> RangeList {
        let other = other.cast(self.ty);
        let mut out = Vec::new();
        for a in &self.ranges {
            for b in &other.ranges {
                let min = if a.min.cmp_val(b.min) == std::cmp::Ordering::Greater {
                    a.min
                } else {
                    b.min
                };
                let max = if a.max.cmp_val(b.max) == std::cmp::Ordering::Less {
                    a.max
                } else {
                    b.max
                };
                if min.cmp_val(max) != std::cmp::Ordering::Greater {
                    out.push(Range { min, max });
                }
            }
        }
        RangeList::from_ranges(self.ty, out)
    }

    /// Set difference: everything in `self` not in `other`.
    pub fn remove(&self, other: &RangeList) -> RangeList {
        let other = other.cast(self.ty);
        let mut current = self.ranges.clone();
        for cut in &other.ranges {
            let mut next = Vec::new();
            for r in current {
                if cut.max.cmp_val(r.min) == std::cmp::Ordering::Less
                    || cut.min.cmp_val(r.max) == std::cmp::Ordering::Greater
                {
                    next.push(r);
                    continue;
                }
                if cut.min.cmp_val(r.min) == std::cmp::Ordering::Greater {
                    next.push(Range { min: r.min, max: cut.min.pred() });
                }
                if cut.max.cmp_val(r.max) == std::cmp::Ordering::Less {
                    next.push(Range { min: cut.max.succ(), max: r.max });
                }
            }
            current = next;
        }
        RangeList::from_ranges(self.ty, current)
    }

    /// Everything of the type that is not in `self`.
    pub fn invert(&self) -> RangeList {
        RangeList::whole(self.ty).remove(self)
    }

    /// Convert to another type. An interval whose values all survive the
    /// conversion maps to one interval; an interval that wraps splits at
    /// the seam; an interval spanning at least `2^bits` target values
    /// covers the whole target type.
    pub fn cast(&self, ty: IntType) -> RangeList {
        if ty == self.ty {
            return self.clone();
        }
        let span_limit = if ty.bits >= 128 { i128::MAX } else { 1i128 << ty.bits };
        let mut out = Vec::new();
        for r in &self.ranges {
            let lo = r.min.value();
            let hi = r.max.value();
            if hi - lo + 1 >= span_limit {
                return RangeList::whole(ty);
            }
            let a = r.min.cast(ty);
            let b = r.max.cast(ty);
            if a.cmp_val(b) != std::cmp::Ordering::Greater {
                out.push(Range { min: a, max: b });
            } else {
                // Wrapped around the seam of the target type.
                out.push(Range { min: Sval::type_min(ty), max: b });
                out.push(Range { min: a, max: Sval::type_max(ty) });
            }
        }
        RangeList::from_ranges(ty, out)
    }

    /// Sort, drop inverted intervals, merge overlapping and abutting ones.
    fn canonicalize(&mut self) {
        self.ranges
            .retain(|r| r.min.cmp_val(r.max) != std::cmp::Ordering::Greater);
        self.ranges.sort_by(|a, b| a.min.cmp_val(b.min));
        let mut merged: Vec<Range> = Vec::with_capacity(self.ranges.len());
        for r in self.ranges.drain(..) {
            match merged.last_mut() {
                Some(last)
                    if last.max.is_type_max()
                        || last.max.succ().cmp_val(r.min) != std::cmp::Ordering::Less =>
                {
                    if r.max.cmp_val(last.max) == std::cmp::Ordering::Greater {
                        last.max = r.max;
                    }
                }
                _ => merged.push(r),
            }
        }
        self.ranges = merged;
    }

    /// Parse the `Display` form back into a list. The type must be
    /// supplied; it is not part of the text form.
    pub fn parse(ty: IntType, s: &str) -> Result<RangeList, String> {
        let s = s.trim();
        if s == "empty" {
            return Ok(RangeList::empty(ty));
        }
        if s == "min-max" {
            return Ok(RangeList::whole(ty));
        }
        let mut ranges = Vec::new();
        for part in s.split(',') {
            let (min, max) = parse_interval(ty, part.trim())?;
            ranges.push(Range { min, max });
        }
        Ok(RangeList::from_ranges(ty, ranges))
    }
}

fn parse_interval(ty: IntType, s: &str) -> Result<(Sval, Sval), String> {
    let endpoints = split_endpoints(s)?;
    match endpoints {
        (a, None) => {
            let v = parse_endpoint(ty, a)?;
            Ok((v, v))
        }
        (a, Some(b)) => Ok((parse_endpoint(ty, a)?, parse_endpoint(ty, b)?)),
    }
}

/// Split `a-b` on the separating dash, honoring `(-n)` parenthesized
/// negatives and the `min`/`max` aliases.
fn split_endpoints(s: &str) -> Result<(&str, Option<&str>), String> {
    let bytes = s.as_bytes();
    let mut depth = 0usize;
    for (i, &c) in bytes.iter().enumerate() {
        match c {
            b'(' => depth += 1,
            b')' => depth = depth.saturating_sub(1),
            b'-' if depth == 0 && i > 0 => {
                return Ok((&s[..i], Some(&s[i + 1..])));
            }
            _ => {}
        }
    }
    if s.is_empty() {
        return Err("empty interval".to_string());
    }
    Ok((s, None))
}

fn parse_endpoint(ty: IntType, s: &str) -> Result<Sval, String> {
    let s = s.trim();
    let s = s.strip_prefix('(').and_then(|t| t.strip_suffix(')')).unwrap_or(s);
    match s {
        "min" => return Ok(Sval::type_min(ty)),
        "max" => return Ok(Sval::type_max(ty)),
        _ => {}
    }
    let v: i128 = s
        .parse()
        .map_err(|_| format!("bad range endpoint '{}'", s))?;
    Ok(Sval::from_i128(ty, v))
}

impl fmt::Display for RangeList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return write!(f, "empty");
        }
        if self.is_whole() {
            return write!(f, "min-max");
        }
        for (i, r) in self.ranges.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write_endpoint(f, r.min)?;
            if r.min != r.max {
                write!(f, "-")?;
                write_endpoint(f, r.max)?;
            }
        }
        Ok(())
    }
}

fn write_endpoint(f: &mut fmt::Formatter<'_>, v: Sval) -> fmt::Result {
    if v.is_type_min() && v.is_negative() {
        write!(f, "min")
    } else if v.is_type_max() {
        write!(f, "max")
    } else if v.is_negative() {
        write!(f, "({})", v.value())
    } else {
        write!(f, "{}", v.value())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rl(min: i64, max: i64) -> RangeList {
        RangeList::new(
            IntType::INT,
            Sval::from_i64(IntType::INT, min),
            Sval::from_i64(IntType::INT, max),
        )
    }

    fn assert_canonical(l: &RangeList) {
        let rs = l.ranges();
        for w in rs.windows(2) {
            assert!(
                w[0].max.value() < w[1].min.value() - 1,
                "not canonical: {} then {}",
                w[0].max,
                w[1].min
            );
        }
        for r in rs {
            assert!(r.min.value() <= r.max.value());
        }
    }

    #[test]
    fn test_union_merges_abutting() {
        let u = rl(0, 4).union(&rl(5, 9));
        assert_eq!(u, rl(0, 9));
        assert_canonical(&u);
    }

    #[test]
    fn test_union_keeps_gap() {
        let u = rl(0, 4).union(&rl(6, 9));
        assert_eq!(u.ranges().len(), 2);
        assert_canonical(&u);
        assert_eq!(u.to_string(), "0-4,6-9");
    }

    #[test]
    fn test_intersect() {
        let i = rl(0, 10).intersect(&rl(5, 20));
        assert_eq!(i, rl(5, 10));
        assert!(rl(0, 3).intersect(&rl(5, 9)).is_empty());
    }

    #[test]
    fn test_remove_middle_splits() {
        let r = rl(0, 10).remove(&rl(4, 6));
        assert_eq!(r.to_string(), "0-3,7-10");
        assert_canonical(&r);
    }

    #[test]
    fn test_remove_edges() {
        assert_eq!(rl(0, 10).remove(&rl(0, 5)), rl(6, 10));
        assert_eq!(rl(0, 10).remove(&rl(8, 20)), rl(0, 7));
        assert!(rl(3, 5).remove(&rl(0, 9)).is_empty());
    }

    #[test]
    fn test_invert_round_trip() {
        let l = rl(0, 4).union(&rl(10, 12));
        assert_eq!(l.invert().invert(), l);
    }

    #[test]
    fn test_whole_and_empty() {
        let whole = RangeList::whole(IntType::INT);
        assert!(whole.is_whole());
        assert!(!whole.is_empty());
        assert!(RangeList::empty(IntType::INT).is_empty());
        assert_eq!(whole.to_string(), "min-max");
    }

    #[test]
    fn test_contains() {
        let l = rl(0, 4).union(&rl(10, 12));
        assert!(l.contains(Sval::from_i64(IntType::INT, 4)));
        assert!(!l.contains(Sval::from_i64(IntType::INT, 7)));
        assert!(l.contains_zero());
        assert!(!rl(1, 9).contains_zero());
    }

    #[test]
    fn test_cast_signed_negative_to_unsigned_splits() {
        // [-5..3] as u32 becomes [0..3] plus the high wrapped block.
        let l = rl(-5, 3).cast(IntType::UINT);
        assert_eq!(l.ranges().len(), 2);
        assert_canonical(&l);
        assert!(l.contains(Sval::from_i64(IntType::UINT, 0)));
        assert!(l.contains(Sval::from_i64(IntType::UINT, 3)));
        assert!(l.contains(Sval::from_i128(IntType::UINT, u32::MAX as i128)));
        assert!(!l.contains(Sval::from_i64(IntType::UINT, 4)));
    }

    #[test]
    fn test_cast_narrowing_wide_interval_is_whole() {
        let l = rl(0, 100_000).cast(IntType::UCHAR);
        assert!(l.is_whole());
    }

    #[test]
    fn test_cast_narrowing_small_interval() {
        let l = rl(250, 260).cast(IntType::UCHAR);
        // wraps: [250..255] and [0..4]
        assert_eq!(l.to_string(), "0-4,250-max");
        assert_canonical(&l);
    }

    #[test]
    fn test_cast_round_trip_property() {
        // For T wider than U: cast(T, cast(U, cast(T, rl))) == cast(T, cast(U, rl))
        let cases = [rl(-5, 3), rl(0, 300), rl(-1000, -900), RangeList::whole(IntType::INT)];
        for l in &cases {
            let once = l.cast(IntType::UCHAR).cast(IntType::INT);
            let twice = once.cast(IntType::UCHAR).cast(IntType::INT);
            assert_eq!(once, twice, "case {}", l);
        }
    }

    #[test]
    fn test_widening_is_exact() {
        let l = rl(-5, 3).cast(IntType::LONG);
        assert_eq!(l.min().unwrap().value(), -5);
        assert_eq!(l.max().unwrap().value(), 3);
        assert_eq!(l.ranges().len(), 1);
    }

    #[test]
    fn test_display_negative_parenthesized() {
        assert_eq!(rl(-4, -2).to_string(), "(-4)-(-2)");
        assert_eq!(rl(7, 7).to_string(), "7");
    }

    #[test]
    fn test_parse_round_trip() {
        let cases = [
            rl(0, 4).union(&rl(6, 9)),
            rl(-4, -2),
            rl(7, 7),
            RangeList::whole(IntType::INT),
            RangeList::empty(IntType::INT),
            RangeList::below(IntType::INT, Sval::from_i64(IntType::INT, -1)),
        ];
        for l in &cases {
            let text = l.to_string();
            let back = RangeList::parse(IntType::INT, &text).unwrap();
            assert_eq!(&back, l, "text was '{}'", text);
        }
    }

    #[test]
    fn test_as_single() {
        assert_eq!(rl(3, 3).as_single().unwrap().value(), 3);
        assert!(rl(3, 4).as_single().is_none());
    }

    #[test]
    fn test_reversed_endpoints_reorder() {
        let l = RangeList::new(
            IntType::INT,
            Sval::from_i64(IntType::INT, 9),
            Sval::from_i64(IntType::INT, 2),
        );
        assert_eq!(l, rl(2, 9));
    }
}
