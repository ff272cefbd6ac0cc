//! Problem solvers.
//!
//! Each problem is a pure function from an input array to a rendered answer.
//! The dispatcher only sees the [`Solver`] trait.

use crate::model::Scalar;
use std::collections::HashMap;
use thiserror::Error;

/// Errors returned by problem solvers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SolveError {
    #[error("cannot handle request {0}")]
    UnsupportedProblem(String),

    #[error("not all array elements are {0}")]
    TypeMismatch(&'static str),

    #[error("strings must have equal length")]
    UnequalLengths,

    #[error("cannot use negative numbers")]
    NegativeNumber,
}

/// Something that can answer numbered problems.
pub trait Solver: Send + Sync {
    fn solve(&self, problem: &str, array: &[Scalar]) -> Result<String, SolveError>;
}

type ProblemFn = fn(&[Scalar]) -> Result<String, SolveError>;

/// The built-in problem table.
pub struct ProblemSet {
    problems: HashMap<&'static str, ProblemFn>,
}

impl Default for ProblemSet {
    fn default() -> Self {
        let mut problems: HashMap<&'static str, ProblemFn> = HashMap::new();
        problems.insert("1", transpose_words);
        problems.insert("2", count_perfect_squares);
        problems.insert("3", sum_reversed);
        problems.insert("8", prime_digit_count);
        Self { problems }
    }
}

impl ProblemSet {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Solver for ProblemSet {
    fn solve(&self, problem: &str, array: &[Scalar]) -> Result<String, SolveError> {
        match self.problems.get(problem) {
            Some(solve) => solve(array),
            None => Err(SolveError::UnsupportedProblem(problem.to_string())),
        }
    }
}

fn all_text(array: &[Scalar]) -> Result<Vec<&str>, SolveError> {
    array
        .iter()
        .map(|e| e.as_text().ok_or(SolveError::TypeMismatch("string")))
        .collect()
}

fn all_integers(array: &[Scalar]) -> Result<Vec<i64>, SolveError> {
    array
        .iter()
        .map(|e| e.as_integer().ok_or(SolveError::TypeMismatch("int")))
        .collect()
}

/// Problem 1: word `i` of the output is built from character `i` of every
/// input word, in input order.
///
/// `casa, masa, trei, tanc, 4321` gives `cmtt4, aara3, ssen2, aaic1`.
fn transpose_words(array: &[Scalar]) -> Result<String, SolveError> {
    let words: Vec<Vec<char>> = all_text(array)?
        .into_iter()
        .map(|w| w.chars().collect())
        .collect();

    let Some(width) = words.first().map(Vec::len) else {
        return Ok(String::new());
    };
    if words.iter().any(|w| w.len() != width) {
        return Err(SolveError::UnequalLengths);
    }

    let columns: Vec<String> = (0..width)
        .map(|i| words.iter().map(|w| w[i]).collect::<String>())
        .collect();
    Ok(columns.join(", "))
}

/// Problem 2: count strings whose digits, read in order, form a perfect square.
fn count_perfect_squares(array: &[Scalar]) -> Result<String, SolveError> {
    let words = all_text(array)?;

    let matches: Vec<String> = words
        .iter()
        .filter_map(|w| extract_number(w).map(|n| (n, w)))
        .filter(|(n, _)| is_perfect_square(*n))
        .map(|(n, w)| format!("{} from {}", n, w))
        .collect();

    if matches.is_empty() {
        return Ok("no perfect squares".to_string());
    }
    Ok(format!(
        "{} perfect square(s): {}",
        matches.len(),
        matches.join(", ")
    ))
}

/// Concatenate the decimal digits of `s`. `None` when there are none, or
/// when they do not fit in a `u64`.
fn extract_number(s: &str) -> Option<u64> {
    let mut found = false;
    let mut num: u64 = 0;
    for d in s.chars().filter_map(|c| c.to_digit(10)) {
        found = true;
        num = num.checked_mul(10)?.checked_add(u64::from(d))?;
    }
    found.then_some(num)
}

fn is_perfect_square(n: u64) -> bool {
    let root = (n as f64).sqrt() as u64;
    // Float rounding can land one off either side.
    (root.saturating_sub(1)..=root + 1).any(|r| r.checked_mul(r) == Some(n))
}

/// Problem 3: sum of the digit-reversed elements. `12, 13, 14` gives `93`.
fn sum_reversed(array: &[Scalar]) -> Result<String, SolveError> {
    let sum: i64 = all_integers(array)?
        .into_iter()
        .map(reverse_digits)
        .fold(0i64, |acc, n| acc.wrapping_add(n));
    Ok(sum.to_string())
}

fn reverse_digits(mut num: i64) -> i64 {
    let mut rev: i64 = 0;
    while num != 0 {
        rev = rev.wrapping_mul(10).wrapping_add(num % 10);
        num /= 10;
    }
    rev
}

/// Problem 8: total digit count of the primes in a list of naturals.
/// `23, 17, 15, 3, 18` gives `5`.
fn prime_digit_count(array: &[Scalar]) -> Result<String, SolveError> {
    if array.is_empty() {
        return Ok("0 digits ()".to_string());
    }

    let numbers = all_integers(array)?;
    if numbers.iter().any(|n| *n < 0) {
        return Err(SolveError::NegativeNumber);
    }

    let total: u32 = numbers
        .into_iter()
        .filter(|n| is_prime(*n))
        .map(count_digits)
        .sum();
    Ok(total.to_string())
}

fn is_prime(n: i64) -> bool {
    if n < 2 {
        return false;
    }
    let mut i = 2i64;
    while i <= n / i {
        if n % i == 0 {
            return false;
        }
        i += 1;
    }
    true
}

fn count_digits(mut n: i64) -> u32 {
    let mut total = 0;
    while n != 0 {
        total += 1;
        n /= 10;
    }
    total
}
