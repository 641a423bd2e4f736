// src/aggregate.rs

use crate::model::*;
use chrono::{Local, NaiveDate, TimeZone};
use std::collections::{BTreeMap, HashMap};

/// Buckets commit records by local calendar day, folding every observation
/// of the same commit into a single record.
///
/// Merging is strictly sequential: each record is looked up by [`HashKey`]
/// across all buckets before it is placed, so a commit seen locally and on
/// the hosting account is counted once no matter which source arrives first.
pub struct CommitAggregator<Tz: TimeZone = Local> {
    tz: Tz,
    buckets: BTreeMap<NaiveDate, DayBucket>,
    /// Which bucket currently holds each key
    placement: HashMap<HashKey, NaiveDate>,
}

impl<Tz: TimeZone> CommitAggregator<Tz> {
    pub fn new(tz: Tz) -> Self {
        CommitAggregator { tz, buckets: BTreeMap::new(), placement: HashMap::new() }
    }

    fn bucket_date(&self, record: &CommitRecord) -> NaiveDate {
        record.timestamp.with_timezone(&self.tz).date_naive()
    }

    pub fn add(&mut self, record: CommitRecord) {
        let merged = match self.take_matching(&record.key()) {
            Some(existing) => existing.merge(record),
            None => record,
        };

        // The merged record keeps the longest hash, and a local record may
        // carry a different timestamp than the remote one it replaces, so
        // both key and date are taken from the merged result.
        let key = merged.key();
        let date = self.bucket_date(&merged);
        self.buckets
            .entry(date)
            .or_insert_with(|| DayBucket::new(date))
            .commits
            .insert(key.clone(), merged);
        self.placement.insert(key, date);
    }

    /// Removes the stored observation of the same commit, whichever
    /// spelling of the hash it was stored under.
    fn take_matching(&mut self, key: &HashKey) -> Option<CommitRecord> {
        let stored = self.stored_key(key)?;
        let date = self.placement.remove(&stored)?;
        self.buckets.get_mut(&date)?.commits.remove(&stored)
    }

    fn stored_key(&self, key: &HashKey) -> Option<HashKey> {
        if self.placement.contains_key(key) {
            return Some(key.clone());
        }
        if let Some(shorter) = key.abbreviations().find(|k| self.placement.contains_key(k)) {
            return Some(shorter);
        }
        if key.is_abbreviated() {
            return self.placement.keys().find(|stored| key.matches(stored)).cloned();
        }
        None
    }

    pub fn extend<I: IntoIterator<Item = CommitRecord>>(&mut self, records: I) {
        for record in records {
            self.add(record);
        }
    }

    /// Drops emptied buckets and recomputes statistics
    pub fn finish(self) -> BTreeMap<NaiveDate, DayBucket> {
        self.buckets
            .into_iter()
            .filter(|(_, bucket)| !bucket.commits.is_empty())
            .map(|(date, mut bucket)| {
                bucket.recompute();
                (date, bucket)
            })
            .collect()
    }
}
