//! Speculative multi-channel pattern matching over read-time shadows of
//! store state, per `spec.md` §4.5.

use std::collections::HashMap;
use std::hash::Hash;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use rspace_store_core::{Store, StoreError};
use rspace_types::{DataCandidate, Datum, ProduceCandidate, WaitingContinuation};

use crate::matcher::Matcher;

/// Either a store failure surfaced while building a shadow, or a matcher
/// error surfaced while scanning it. Engine-level code converts this into
/// its own typed error.
#[derive(Debug)]
pub enum ExtractError<E> {
    /// The underlying store failed to serve a read.
    Store(StoreError),
    /// The matcher returned an error for some (pattern, datum) pair.
    Matcher(E),
}

impl<E> From<StoreError> for ExtractError<E> {
    fn from(e: StoreError) -> Self {
        ExtractError::Store(e)
    }
}

fn shuffle_in_place<T>(rng: &mut StdRng, items: &mut [T]) {
    items.shuffle(rng);
}

/// Build `{ channel -> shuffled (Datum, index) pairs }` for every channel in
/// `channels`, reading each channel's current data list from `rtxn`.
pub async fn build_indexed_data<S, C, P, A, K>(
    store: &S,
    rtxn: &S::ReadTxn,
    rng: &mut StdRng,
    channels: &[C],
) -> Result<HashMap<C, Vec<(Datum<C, A>, i64)>>, StoreError>
where
    S: Store<C, P, A, K>,
    C: rspace_types::Opaque,
    P: rspace_types::Opaque,
    A: rspace_types::Opaque,
    K: rspace_types::Opaque,
{
    let mut map = HashMap::with_capacity(channels.len());
    for c in channels {
        let mut entries: Vec<(Datum<C, A>, i64)> =
            store.get_data(rtxn, c).await?.into_iter().enumerate().map(|(i, d)| (d, i as i64)).collect();
        shuffle_in_place(rng, &mut entries);
        map.insert(c.clone(), entries);
    }
    Ok(map)
}

/// `extractDataCandidates` from `spec.md` §4.5: walk `pairs` in order,
/// finding the first matching datum on each channel's shadow list and
/// removing it from the shadow before moving to the next pair, so one
/// datum never satisfies two patterns in the same extraction.
pub fn extract_data_candidates<C, P, A, R, E>(
    pairs: &[(C, P)],
    indexed_data: &mut HashMap<C, Vec<(Datum<C, A>, i64)>>,
    matcher: &dyn Matcher<P, A, R, E>,
) -> Result<Option<Vec<DataCandidate<C, A, R>>>, E>
where
    C: Eq + Hash + Clone,
    A: Clone,
{
    let mut acc = Vec::with_capacity(pairs.len());
    for (channel, pattern) in pairs {
        let Some(entries) = indexed_data.get_mut(channel) else {
            return Ok(None);
        };

        let mut found: Option<(usize, R)> = None;
        for (pos, (datum, _idx)) in entries.iter().enumerate() {
            match matcher.try_match(pattern, &datum.value) {
                Ok(Some(result)) => {
                    found = Some((pos, result));
                    break;
                }
                Ok(None) => continue,
                Err(e) => return Err(e),
            }
        }

        match found {
            None => return Ok(None),
            Some((pos, result)) => {
                let (datum, index) = entries.remove(pos);
                acc.push(DataCandidate { channel: channel.clone(), datum, index, result });
            }
        }
    }
    Ok(Some(acc))
}

/// `extractProduceCandidate` from `spec.md` §4.5: try each channel-group in
/// order, first trying its waiting continuations in shuffled order, until
/// one yields a full match or every group is exhausted.
#[allow(clippy::too_many_arguments)]
pub async fn extract_produce_candidate<S, C, P, A, K, R, E>(
    store: &S,
    rtxn: &S::ReadTxn,
    rng: &mut StdRng,
    matcher: &dyn Matcher<P, A, R, E>,
    grouped_channels: &[Vec<C>],
    produced_on: &C,
    new_datum: &Datum<C, A>,
) -> Result<Option<ProduceCandidate<C, P, A, K, R>>, ExtractError<E>>
where
    S: Store<C, P, A, K>,
    C: rspace_types::Opaque,
    P: rspace_types::Opaque,
    A: rspace_types::Opaque,
    K: rspace_types::Opaque,
{
    for group in grouped_channels {
        let mut waiting: Vec<(WaitingContinuation<C, P, K>, usize)> = store
            .get_waiting_continuations(rtxn, group)
            .await?
            .into_iter()
            .enumerate()
            .map(|(i, wc)| (wc, i))
            .collect();
        shuffle_in_place(rng, &mut waiting);

        let mut base_shadow: HashMap<C, Vec<(Datum<C, A>, i64)>> = HashMap::with_capacity(group.len());
        for c in group {
            let mut entries: Vec<(Datum<C, A>, i64)> =
                store.get_data(rtxn, c).await?.into_iter().enumerate().map(|(i, d)| (d, i as i64)).collect();
            shuffle_in_place(rng, &mut entries);
            if c == produced_on {
                entries.insert(0, (new_datum.clone(), -1));
            }
            base_shadow.insert(c.clone(), entries);
        }

        for (wc, cont_index) in waiting {
            // Every attempt gets its own copy of the shadow: a failed
            // attempt may have already removed entries for the pairs it
            // did match before hitting one it couldn't, and those removals
            // must not leak into the next continuation's attempt.
            let mut shadow = base_shadow.clone();
            let pairs: Vec<(C, P)> = group.iter().cloned().zip(wc.patterns.iter().cloned()).collect();
            match extract_data_candidates(&pairs, &mut shadow, matcher).map_err(ExtractError::Matcher)? {
                Some(data_candidates) => {
                    return Ok(Some(ProduceCandidate {
                        channels: group.clone(),
                        waiting: wc,
                        cont_index,
                        data_candidates,
                    }));
                }
                None => continue,
            }
        }
    }
    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matcher::EqMatcher;
    use rspace_types::ProduceEventRef;

    fn datum(value: i64, idx: i64) -> (Datum<i64, i64>, i64) {
        (Datum { value, persist: false, source: ProduceEventRef::new(1, [0u8; 32], [0u8; 32], false, 0) }, idx)
    }

    #[test]
    fn matches_in_pair_order_and_removes_from_shadow() {
        let mut indexed: HashMap<i64, Vec<(Datum<i64, i64>, i64)>> = HashMap::new();
        indexed.insert(1, vec![datum(10, 0)]);
        indexed.insert(2, vec![datum(20, 0)]);

        let pairs = vec![(1i64, 10i64), (2i64, 20i64)];
        let result = extract_data_candidates(&pairs, &mut indexed, &EqMatcher).unwrap();
        let candidates = result.unwrap();
        assert_eq!(candidates.len(), 2);
        assert!(indexed.get(&1).unwrap().is_empty());
        assert!(indexed.get(&2).unwrap().is_empty());
    }

    #[test]
    fn no_match_returns_none_without_full_consumption() {
        let mut indexed: HashMap<i64, Vec<(Datum<i64, i64>, i64)>> = HashMap::new();
        indexed.insert(1, vec![datum(10, 0)]);
        indexed.insert(2, vec![datum(99, 0)]);

        let pairs = vec![(1i64, 10i64), (2i64, 20i64)];
        let result = extract_data_candidates(&pairs, &mut indexed, &EqMatcher).unwrap();
        assert!(result.is_none());
    }

    #[test]
    fn one_datum_never_satisfies_two_patterns_on_the_same_channel() {
        let mut indexed: HashMap<i64, Vec<(Datum<i64, i64>, i64)>> = HashMap::new();
        indexed.insert(1, vec![datum(10, 0)]);

        // Both pairs target channel 1 with the same pattern; only one datum
        // is available, so the second pair must fail.
        let pairs = vec![(1i64, 10i64), (1i64, 10i64)];
        let result = extract_data_candidates(&pairs, &mut indexed, &EqMatcher).unwrap();
        assert!(result.is_none());
    }
}
