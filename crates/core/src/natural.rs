//! Natural ordering of entry names: digit runs compare numerically, everything else
//! compares case-insensitively, so `page2.jpg` sorts before `page10.jpg`.

use std::cmp::Ordering;
use std::iter::Peekable;
use std::str::Chars;

/// Compare two names in natural order.
///
/// Ties that survive the case-insensitive comparison are broken by plain byte order so the
/// result is a total order (stable across runs and platforms).
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut left = a.chars().peekable();
    let mut right = b.chars().peekable();

    loop {
        match (left.peek().copied(), right.peek().copied()) {
            (None, None) => return a.cmp(b),
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(l), Some(r)) if l.is_ascii_digit() && r.is_ascii_digit() => {
                let l_run = take_digits(&mut left);
                let r_run = take_digits(&mut right);
                match compare_digit_runs(&l_run, &r_run) {
                    Ordering::Equal => continue,
                    other => return other,
                }
            }
            (Some(l), Some(r)) => {
                left.next();
                right.next();
                match fold_case(l).cmp(&fold_case(r)) {
                    Ordering::Equal => continue,
                    other => return other,
                }
            }
        }
    }
}

/// Sort `items` in natural order of the name returned by `key`.
pub fn sort_naturally<T, F>(items: &mut [T], key: F)
where
    F: Fn(&T) -> &str,
{
    items.sort_by(|a, b| natural_cmp(key(a), key(b)));
}

fn take_digits(chars: &mut Peekable<Chars<'_>>) -> String {
    let mut run = String::new();
    while let Some(c) = chars.peek().copied() {
        if !c.is_ascii_digit() {
            break;
        }
        run.push(c);
        chars.next();
    }
    run
}

/// Numeric comparison of two ASCII digit runs of any length (no overflow).
fn compare_digit_runs(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

fn fold_case(c: char) -> char {
    c.to_lowercase().next().unwrap_or(c)
}
