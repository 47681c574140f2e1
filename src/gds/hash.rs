use std::collections::HashMap;
use tracing::debug;

use crate::error::{PmixError, Result};
use crate::types::Rank;
use crate::value::Kval;

/// A table of key/value records bucketed by rank.
///
/// Concrete ranks and the `Wildcard` (job-wide) bucket are kept apart: a lookup for a concrete
/// rank never sees job-wide records. `Undef` is not a bucket; callers that want "any rank"
/// iterate the ranks themselves.
#[derive(Debug, Default, Clone)]
pub struct HashTable {
    buckets: HashMap<Rank, Vec<Kval>>,
}

impl HashTable {
    pub fn new() -> Self {
        HashTable::default()
    }

    /// inserts `kval` into the bucket for `rank`, replacing any record with the same key
    pub fn store(&mut self, rank: Rank, kval: Kval) -> Result<()> {
        if rank == Rank::Undef {
            return Err(PmixError::BadParam("cannot store data for an undefined rank".into()));
        }
        let bucket = self.buckets.entry(rank).or_default();
        match bucket.iter_mut().find(|kv| kv.key == kval.key) {
            Some(existing) => {
                debug!(%rank, key = %kval.key, "overwriting record");
                *existing = kval;
            }
            None => bucket.push(kval),
        }
        Ok(())
    }

    /// Appends copies of the matching records of `rank` to `out`: the record for `key`, or
    /// every record in the bucket when `key` is `None`.
    ///
    /// # Errors
    /// `NotFound` if the bucket is missing, empty, or lacks `key`; `BadParam` for `Rank::Undef`;
    /// `NoMem` if `out` cannot grow
    pub fn fetch(&self, rank: Rank, key: Option<&str>, out: &mut Vec<Kval>) -> Result<()> {
        if rank == Rank::Undef {
            return Err(PmixError::BadParam("hash fetch needs a single rank".into()));
        }
        let bucket = self.buckets.get(&rank).ok_or(PmixError::NotFound)?;
        match key {
            Some(key) => {
                let kv = bucket
                    .iter()
                    .find(|kv| kv.check_key(key))
                    .ok_or(PmixError::NotFound)?;
                out.try_reserve(1).map_err(|_| PmixError::NoMem)?;
                out.push(kv.clone());
            }
            None => {
                if bucket.is_empty() {
                    return Err(PmixError::NotFound);
                }
                out.try_reserve(bucket.len()).map_err(|_| PmixError::NoMem)?;
                out.extend(bucket.iter().cloned());
            }
        }
        Ok(())
    }

    /// removes the record for `key`, or the whole bucket when `key` is `None`
    pub fn remove(&mut self, rank: Rank, key: Option<&str>) -> Result<()> {
        match key {
            None => {
                self.buckets.remove(&rank).ok_or(PmixError::NotFound)?;
            }
            Some(key) => {
                let bucket = self.buckets.get_mut(&rank).ok_or(PmixError::NotFound)?;
                let before = bucket.len();
                bucket.retain(|kv| kv.key != key);
                if bucket.len() == before {
                    return Err(PmixError::NotFound);
                }
            }
        }
        Ok(())
    }

    /// total number of records across all buckets
    pub fn len(&self) -> usize {
        self.buckets.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
