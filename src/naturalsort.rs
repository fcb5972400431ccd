//! Natural ordering for machine identifiers.
//!
//! Machine ids such as `"0"`, `"2"`, `"10"` and container ids such as
//! `"2/lxd/0"` must sort numerically per digit run, not lexicographically.

use std::cmp::Ordering;

/// Compares two strings in natural order: maximal digit runs compare as
/// numbers, everything else compares byte-wise.
#[must_use]
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.as_bytes();
    let mut right = b.as_bytes();

    loop {
        match (left.first(), right.first()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(&l), Some(&r)) => {
                if l.is_ascii_digit() && r.is_ascii_digit() {
                    let (ln, lrest) = split_digits(left);
                    let (rn, rrest) = split_digits(right);
                    // Compare digit runs as numbers: longer run of
                    // significant digits wins, equal lengths compare
                    // byte-wise.
                    let ltrim = ln.trim_start_matches('0');
                    let rtrim = rn.trim_start_matches('0');
                    let ord = ltrim
                        .len()
                        .cmp(&rtrim.len())
                        .then_with(|| ltrim.cmp(rtrim))
                        .then_with(|| ln.len().cmp(&rn.len()));
                    if ord != Ordering::Equal {
                        return ord;
                    }
                    left = lrest;
                    right = rrest;
                } else {
                    if l != r {
                        return l.cmp(&r);
                    }
                    left = &left[1..];
                    right = &right[1..];
                }
            }
        }
    }
}

/// Sorts a vector of strings in natural order.
pub fn sort_naturally(values: &mut [String]) {
    values.sort_by(|a, b| natural_cmp(a, b));
}

fn split_digits(bytes: &[u8]) -> (&str, &[u8]) {
    let end = bytes
        .iter()
        .position(|b| !b.is_ascii_digit())
        .unwrap_or(bytes.len());
    // Digit runs are ASCII by construction.
    let run = std::str::from_utf8(&bytes[..end]).unwrap_or("");
    (run, &bytes[end..])
}
