//! The pluggable, pure match predicate the engine composes but never
//! interprets.

/// `match(pattern, datum) -> matched/unmatched/error`, per `spec.md` §4.4.
///
/// Implementations must be deterministic for fixed inputs; the engine calls
/// this synchronously from within an async context and never retries a call
/// that returned `Err`.
pub trait Matcher<P, A, R, E>: Send + Sync {
    /// Test `pattern` against `datum`, yielding the extracted result on a
    /// match, `None` on no match, or a matcher-defined error.
    fn try_match(&self, pattern: &P, datum: &A) -> Result<Option<R>, E>;
}

/// Reference matcher used by the literal-integer demo scenarios in
/// `spec.md` §8: `match(p, a) = Some(a) if p == a else None`.
#[derive(Debug, Default, Clone, Copy)]
pub struct EqMatcher;

impl<A> Matcher<A, A, A, std::convert::Infallible> for EqMatcher
where
    A: PartialEq + Clone + Send + Sync,
{
    fn try_match(&self, pattern: &A, datum: &A) -> Result<Option<A>, std::convert::Infallible> {
        Ok(if pattern == datum { Some(datum.clone()) } else { None })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eq_matcher_matches_equal_values() {
        let m = EqMatcher;
        assert_eq!(Matcher::<i64, i64, i64, _>::try_match(&m, &10, &10), Ok(Some(10)));
        assert_eq!(Matcher::<i64, i64, i64, _>::try_match(&m, &10, &11), Ok(None));
    }
}
