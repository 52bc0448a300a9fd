//! The counter source consumed by [`crate::Accumulator`]
//!
//! A source answers "what was counted in `[start, end)` for this template".
//! Sources are injected: anything implementing [`Source`] will do, including
//! a closure wrapped by [`source_fn`].

use crate::{counters::CounterSet, template::Template};

/// A queryable store of network counters.
///
/// Implementations return the best available aggregation for `[start, end)`
/// in milliseconds. A range reaching into a bucket still in progress returns
/// whatever partial data exists. Splitting a range into two sub-queries may
/// return slightly less in total than the single query, never more.
pub trait Source {
    /// Error produced when the source cannot honor a query.
    type Error: std::error::Error;

    /// Aggregate counters selected by `template` over `[start, end)`.
    ///
    /// # Errors
    ///
    /// Implementation defined; see [`Source::Error`].
    fn query(
        &mut self,
        template: &Template,
        include_tags: bool,
        start: i64,
        end: i64,
    ) -> Result<CounterSet, Self::Error>;
}

impl<S> Source for &mut S
where
    S: Source + ?Sized,
{
    type Error = S::Error;

    fn query(
        &mut self,
        template: &Template,
        include_tags: bool,
        start: i64,
        end: i64,
    ) -> Result<CounterSet, Self::Error> {
        (**self).query(template, include_tags, start, end)
    }
}

/// A [`Source`] backed by a closure. See [`source_fn`].
#[derive(Debug, Clone, Copy)]
pub struct FnSource<F> {
    f: F,
}

/// Adapt a closure into a [`Source`].
#[must_use]
pub fn source_fn<F, E>(f: F) -> FnSource<F>
where
    F: FnMut(&Template, bool, i64, i64) -> Result<CounterSet, E>,
    E: std::error::Error,
{
    FnSource { f }
}

impl<F, E> Source for FnSource<F>
where
    F: FnMut(&Template, bool, i64, i64) -> Result<CounterSet, E>,
    E: std::error::Error,
{
    type Error = E;

    fn query(
        &mut self,
        template: &Template,
        include_tags: bool,
        start: i64,
        end: i64,
    ) -> Result<CounterSet, E> {
        (self.f)(template, include_tags, start, end)
    }
}
