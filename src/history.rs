//! Bounded, time-decaying history of rendered geometries.
//!
//! Records are bucketed by (kind, topic).  Each bucket is trimmed to the
//! topic's `history_limit` on every insert; records with a non-zero
//! `life_time` are also registered in an expiry queue and evicted
//! individually when their deadline passes.
//!
//! Every entry owns its render handle and, when aging, the expiry-queue key
//! for that exact record.  Any eviction path removes the key, so an expiry
//! can never fire for a record that is already gone.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::{pending, poll_fn};
use std::time::Duration;

use log::{debug, trace};
use serde_json::{Map, Value};
use tokio_util::time::{delay_queue, DelayQueue};

use crate::geometry::{GeometryKind, GeometryRecord, RecordId, Topic, Transform};
use crate::render::RenderSink;

/// Upper bound on a record's lifetime; the expiry queue cannot hold more.
const MAX_LIFE_TIME: Duration = Duration::from_secs(365 * 24 * 3600);

/// How many records of a (kind, topic) stay visible, and for how long.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    pub history_limit: usize,
    /// `Duration::ZERO` means records never age out.
    pub life_time: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        RetentionPolicy { history_limit: 1, life_time: Duration::ZERO }
    }
}

/// Retention fields as they appear in a payload.  Zero or missing
/// `history_limit` resolves to 1.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PolicyOverride {
    pub history_limit: Option<usize>,
    /// Seconds.
    pub life_time: Option<f64>,
}

impl PolicyOverride {
    /// Read `history_limit` / `life_time` from a JSON object.  Values of the
    /// wrong type or sign are ignored.
    pub fn from_fields(obj: &Map<String, Value>) -> Self {
        let history_limit = obj.get("history_limit").and_then(|v| {
            v.as_u64()
                .or_else(|| v.as_f64().filter(|f| f.is_finite() && *f >= 0.0).map(|f| f as u64))
                .map(|n| n as usize)
        });
        let life_time = obj
            .get("life_time")
            .and_then(Value::as_f64)
            .filter(|f| f.is_finite() && *f >= 0.0);
        PolicyOverride { history_limit, life_time }
    }

    fn or(self, other: PolicyOverride) -> PolicyOverride {
        PolicyOverride {
            history_limit: self.history_limit.or(other.history_limit),
            life_time: self.life_time.or(other.life_time),
        }
    }
}

/// Per-kind default retention, passed in at construction.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RetentionConfig {
    pub defaults: HashMap<GeometryKind, RetentionPolicy>,
}

impl RetentionConfig {
    pub fn default_for(&self, kind: GeometryKind) -> RetentionPolicy {
        self.defaults.get(&kind).copied().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BucketKey {
    pub kind: GeometryKind,
    pub topic: Topic,
}

/// An expiry that has fired: identifies exactly one record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expired {
    key: BucketKey,
    id: RecordId,
}

struct Entry<H> {
    id: RecordId,
    record: GeometryRecord,
    handle: H,
    expiry: Option<delay_queue::Key>,
}

pub struct HistoryStore<S: RenderSink> {
    sink: S,
    cfg: RetentionConfig,
    policies: HashMap<Topic, RetentionPolicy>,
    buckets: BTreeMap<BucketKey, VecDeque<Entry<S::Handle>>>,
    expiry: DelayQueue<Expired>,
    next_id: u64,
    transform: Transform,
}

impl<S: RenderSink> HistoryStore<S> {
    pub fn new(sink: S, cfg: RetentionConfig) -> Self {
        HistoryStore {
            sink,
            cfg,
            policies: HashMap::new(),
            buckets: BTreeMap::new(),
            expiry: DelayQueue::new(),
            next_id: 0,
            transform: Transform::IDENTITY,
        }
    }

    /// Retain `record`, draw it, and evict whatever the topic's policy no
    /// longer allows.  Must be called from within a tokio runtime.
    pub fn record(&mut self, record: GeometryRecord, explicit: &PolicyOverride) -> RecordId {
        let kind = record.kind();
        let embedded = PolicyOverride::from_fields(&record.properties);
        let policy = self.resolve_policy(&record.topic, kind, explicit.or(embedded));

        let id = RecordId(self.next_id);
        self.next_id += 1;

        let handle = self.sink.add(kind, &record);
        if self.transform != Transform::IDENTITY {
            self.sink.redraw(&handle, &record, &self.transform);
        }
        let key = BucketKey { kind, topic: record.topic.clone() };
        let expiry = if policy.life_time.is_zero() {
            None
        } else {
            Some(self.expiry.insert(Expired { key: key.clone(), id }, policy.life_time))
        };

        let bucket = self.buckets.entry(key).or_default();
        bucket.push_back(Entry { id, record, handle, expiry });
        while bucket.len() > policy.history_limit {
            let Some(old) = bucket.pop_front() else { break };
            trace!("history: {} evicted by capacity", old.id);
            if let Some(k) = old.expiry {
                self.expiry.remove(&k);
            }
            self.sink.remove(old.handle);
        }
        id
    }

    /// Precedence per field: explicit → embedded (already merged into
    /// `given`) → cached for the topic → kind default.
    fn resolve_policy(&mut self, topic: &str, kind: GeometryKind, given: PolicyOverride) -> RetentionPolicy {
        let base = self
            .policies
            .get(topic)
            .copied()
            .unwrap_or_else(|| self.cfg.default_for(kind));
        let policy = RetentionPolicy {
            history_limit: given.history_limit.map(|n| n.max(1)).unwrap_or(base.history_limit.max(1)),
            life_time: given
                .life_time
                .map(|s| Duration::try_from_secs_f64(s).map_or(MAX_LIFE_TIME, |d| d.min(MAX_LIFE_TIME)))
                .unwrap_or(base.life_time),
        };
        if self.policies.insert(topic.to_string(), policy) != Some(policy) {
            debug!("history: policy for {topic}: limit={} life={:?}", policy.history_limit, policy.life_time);
        }
        policy
    }

    /// Wait for the next record whose lifetime ran out.  Never resolves while
    /// nothing is aging.
    pub async fn next_expired(&mut self) -> Expired {
        if self.expiry.is_empty() {
            return pending().await;
        }
        match poll_fn(|cx| self.expiry.poll_expired(cx)).await {
            Some(expired) => expired.into_inner(),
            None => pending().await,
        }
    }

    /// Remove the record an expiry fired for.  Returns false when it has
    /// already left its bucket.
    pub fn evict_expired(&mut self, expired: Expired) -> bool {
        let Some(bucket) = self.buckets.get_mut(&expired.key) else {
            return false;
        };
        let Some(pos) = bucket.iter().position(|e| e.id == expired.id) else {
            return false;
        };
        let Some(entry) = bucket.remove(pos) else {
            return false;
        };
        if bucket.is_empty() {
            self.buckets.remove(&expired.key);
        }
        trace!("history: {} aged out of {}/{}", entry.id, expired.key.kind, expired.key.topic);
        self.sink.remove(entry.handle);
        true
    }

    /// Drop every record of `topic`, across all kinds.  Returns how many
    /// records were removed; a second call returns 0.
    pub fn purge_topic(&mut self, topic: &str) -> usize {
        let mut removed = 0;
        for kind in GeometryKind::ALL {
            let key = BucketKey { kind, topic: topic.to_string() };
            if let Some(bucket) = self.buckets.remove(&key) {
                for entry in bucket {
                    self.drop_entry(entry);
                    removed += 1;
                }
            }
        }
        if removed > 0 {
            debug!("history: purged {removed} records of {topic}");
        }
        removed
    }

    /// Remove everything and cancel every pending expiry.
    pub fn clear(&mut self) {
        let buckets = std::mem::take(&mut self.buckets);
        for entry in buckets.into_values().flatten() {
            self.drop_entry(entry);
        }
        self.expiry.clear();
    }

    fn drop_entry(&mut self, entry: Entry<S::Handle>) {
        if let Some(k) = entry.expiry {
            self.expiry.remove(&k);
        }
        self.sink.remove(entry.handle);
    }

    /// Redraw every retained record through `transform`, oldest first across
    /// all buckets.  Retention is untouched.
    pub fn rebuild_all(&mut self, transform: Transform) {
        self.transform = transform;
        let mut entries: Vec<&Entry<S::Handle>> = self.buckets.values().flatten().collect();
        entries.sort_by_key(|e| e.id);
        for e in entries {
            self.sink.redraw(&e.handle, &e.record, &transform);
        }
    }

    pub fn transform(&self) -> Transform {
        self.transform
    }

    pub fn len(&self, kind: GeometryKind, topic: &str) -> usize {
        self.buckets
            .get(&BucketKey { kind, topic: topic.to_string() })
            .map_or(0, VecDeque::len)
    }

    /// Retained records of one bucket, oldest first.
    pub fn records(&self, kind: GeometryKind, topic: &str) -> impl Iterator<Item = &GeometryRecord> {
        self.buckets
            .get(&BucketKey { kind, topic: topic.to_string() })
            .into_iter()
            .flatten()
            .map(|e| &e.record)
    }

    pub fn total(&self) -> usize {
        self.buckets.values().map(VecDeque::len).sum()
    }

    pub fn pending_expiries(&self) -> usize {
        self.expiry.len()
    }

    pub fn policy(&self, topic: &str) -> Option<RetentionPolicy> {
        self.policies.get(topic).copied()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::{Geometry, Position, Properties};
    use crate::render::recording::{Call, RecordingSink};
    use crate::render::scene::{Primitive, SceneSink};
    use crate::style::StyleResolver;
    use chrono::Utc;
    use futures_util::FutureExt;
    use serde_json::json;

    fn line(topic: &str, x: f64) -> GeometryRecord {
        record(topic, Geometry::LineString(vec![Position::new(x, 0.0), Position::new(x, 1.0)]), Properties::new())
    }

    fn record(topic: &str, geometry: Geometry, properties: Properties) -> GeometryRecord {
        GeometryRecord {
            topic: topic.into(),
            style: StyleResolver::default().resolve(topic, geometry.kind()),
            geometry,
            properties,
            received_at: Utc::now(),
        }
    }

    fn limit(n: usize) -> PolicyOverride {
        PolicyOverride { history_limit: Some(n), life_time: None }
    }

    fn store() -> HistoryStore<RecordingSink> {
        HistoryStore::new(RecordingSink::default(), RetentionConfig::default())
    }

    /// Evict everything whose deadline has passed, without waiting.
    fn evict_due(store: &mut HistoryStore<RecordingSink>) -> usize {
        let mut n = 0;
        loop {
            let next = store.next_expired().now_or_never();
            match next {
                Some(e) => n += usize::from(store.evict_expired(e)),
                None => return n,
            }
        }
    }

    #[tokio::test]
    async fn line_string_default_keeps_one() {
        let mut s = store();
        s.record(line("lane_boundary", 0.0), &PolicyOverride::default());
        assert_eq!(s.sink().adds(), 1);
        assert_eq!(s.sink().removes(), 0);

        s.record(line("lane_boundary", 1.0), &PolicyOverride::default());
        assert_eq!(s.sink().adds(), 2);
        assert_eq!(s.sink().removes(), 1);
        assert_eq!(s.sink().calls[2], Call::Remove(1));
        assert_eq!(s.len(GeometryKind::LineString, "lane_boundary"), 1);
        assert_eq!(s.records(GeometryKind::LineString, "lane_boundary").next().unwrap().geometry,
                   line("x", 1.0).geometry);
    }

    #[tokio::test]
    async fn bucket_never_exceeds_limit() {
        let mut s = store();
        for i in 0..20 {
            s.record(line("t", i as f64), &limit(5));
            assert!(s.len(GeometryKind::LineString, "t") <= 5);
        }
        assert_eq!(s.len(GeometryKind::LineString, "t"), 5);
        assert_eq!(s.sink().live.len(), 5);
        let xs: Vec<f64> = s
            .records(GeometryKind::LineString, "t")
            .map(|r| match &r.geometry { Geometry::LineString(p) => p[0].x, _ => unreachable!() })
            .collect();
        assert_eq!(xs, vec![15.0, 16.0, 17.0, 18.0, 19.0]);
    }

    #[tokio::test]
    async fn policy_precedence_and_caching() {
        let mut cfg = RetentionConfig::default();
        cfg.defaults.insert(GeometryKind::Point, RetentionPolicy { history_limit: 10, life_time: Duration::ZERO });
        let mut s = HistoryStore::new(RecordingSink::default(), cfg);
        let pt = |props: Properties| record("p", Geometry::Point(Position::new(0.0, 0.0)), props);

        s.record(pt(Properties::new()), &PolicyOverride::default());
        assert_eq!(s.policy("p").unwrap().history_limit, 10, "kind default");

        let embedded = json!({ "history_limit": 4 }).as_object().unwrap().clone();
        s.record(pt(embedded.clone()), &PolicyOverride::default());
        assert_eq!(s.policy("p").unwrap().history_limit, 4, "embedded beats default");

        s.record(pt(embedded), &limit(3));
        assert_eq!(s.policy("p").unwrap().history_limit, 3, "explicit beats embedded");

        s.record(pt(Properties::new()), &PolicyOverride::default());
        assert_eq!(s.policy("p").unwrap().history_limit, 3, "cached value sticks");
        assert_eq!(s.len(GeometryKind::Point, "p"), 3);
    }

    #[tokio::test]
    async fn zero_history_limit_means_one() {
        let mut s = store();
        s.record(line("t", 0.0), &limit(0));
        s.record(line("t", 1.0), &limit(0));
        assert_eq!(s.policy("t").unwrap().history_limit, 1);
        assert_eq!(s.len(GeometryKind::LineString, "t"), 1);
    }

    #[tokio::test]
    async fn lowering_the_limit_applies_on_next_insert() {
        let mut s = store();
        for i in 0..4 {
            s.record(line("t", i as f64), &limit(4));
        }
        assert_eq!(s.len(GeometryKind::LineString, "t"), 4);
        s.record(line("t", 9.0), &limit(2));
        assert_eq!(s.len(GeometryKind::LineString, "t"), 2);
        assert_eq!(s.sink().removes(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn records_age_out_individually() {
        let mut s = store();
        let aging = PolicyOverride { history_limit: Some(10), life_time: Some(2.0) };
        s.record(line("t", 0.0), &aging);
        tokio::time::advance(Duration::from_secs(1)).await;
        s.record(line("t", 1.0), &aging);
        assert_eq!(s.pending_expiries(), 2);

        tokio::time::advance(Duration::from_millis(1500)).await;
        assert_eq!(evict_due(&mut s), 1);
        let left: Vec<_> = s.records(GeometryKind::LineString, "t").cloned().collect();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].geometry, line("t", 1.0).geometry);

        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(evict_due(&mut s), 1);
        assert_eq!(s.total(), 0);
        assert!(s.sink().live.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn capacity_eviction_cancels_expiry() {
        let mut s = store();
        let aging = PolicyOverride { history_limit: Some(1), life_time: Some(5.0) };
        s.record(line("t", 0.0), &aging);
        s.record(line("t", 1.0), &aging);
        assert_eq!(s.pending_expiries(), 1, "evicted record's expiry is gone");

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(evict_due(&mut s), 1);
        assert_eq!(s.sink().removes(), 2);
        assert_eq!(s.total(), 0);
    }

    #[tokio::test]
    async fn purge_is_idempotent_and_spans_kinds() {
        let mut s = store();
        s.record(line("t", 0.0), &limit(3));
        s.record(line("t", 1.0), &limit(3));
        s.record(record("t", Geometry::Point(Position::new(0.0, 0.0)), Properties::new()), &limit(3));
        s.record(line("other", 0.0), &PolicyOverride::default());

        assert_eq!(s.purge_topic("t"), 3);
        assert_eq!(s.sink().removes(), 3);
        assert_eq!(s.purge_topic("t"), 0);
        assert_eq!(s.sink().removes(), 3, "no duplicate removes");
        assert_eq!(s.len(GeometryKind::LineString, "other"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn purge_cancels_expiries() {
        let mut s = store();
        s.record(line("t", 0.0), &PolicyOverride { history_limit: None, life_time: Some(1.0) });
        s.purge_topic("t");
        assert_eq!(s.pending_expiries(), 0);
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(evict_due(&mut s), 0);
    }

    #[tokio::test]
    async fn rebuild_redraws_in_insertion_order() {
        let mut s = store();
        s.record(line("b", 0.0), &limit(2));
        s.record(line("a", 0.0), &limit(2));
        s.record(line("b", 1.0), &limit(2));
        let t = Transform { scale: 2.0, offset_x: 1.0, offset_y: 1.0 };
        s.rebuild_all(t);

        let redrawn: Vec<u64> = s
            .sink()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Redraw { handle, transform } => {
                    assert_eq!(*transform, t);
                    Some(*handle)
                }
                _ => None,
            })
            .collect();
        assert_eq!(redrawn, vec![1, 2, 3]);
        assert_eq!(s.total(), 3);
        assert_eq!(s.transform(), t);
    }

    #[tokio::test]
    async fn transform_set_while_empty_applies_to_later_records() {
        let mut s = HistoryStore::new(SceneSink::default(), RetentionConfig::default());
        let t = Transform { scale: 10.0, offset_x: 5.0, offset_y: 0.0 };
        s.rebuild_all(t);
        s.record(record("t", Geometry::Point(Position::new(1.0, 1.0)), Properties::new()), &PolicyOverride::default());

        let (_, node) = s.sink().nodes().next().unwrap();
        assert_eq!(node.primitives, vec![Primitive::Dot(Position::new(15.0, 10.0))]);
    }

    #[tokio::test]
    async fn new_records_are_drawn_through_current_transform() {
        let mut s = store();
        let t = Transform { scale: 2.0, offset_x: 0.0, offset_y: 0.0 };
        s.rebuild_all(t);
        s.record(line("t", 0.0), &PolicyOverride::default());
        assert_eq!(
            s.sink().calls,
            vec![
                Call::Add { handle: 1, kind: GeometryKind::LineString, topic: "t".into() },
                Call::Redraw { handle: 1, transform: t },
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn oversized_life_time_is_clamped() {
        let mut s = store();
        s.record(line("t", 0.0), &PolicyOverride { history_limit: None, life_time: Some(1e300) });
        assert_eq!(s.policy("t").unwrap().life_time, MAX_LIFE_TIME);
        assert_eq!(s.pending_expiries(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn clear_removes_everything() {
        let mut s = store();
        s.record(line("t", 0.0), &PolicyOverride { history_limit: Some(3), life_time: Some(1.0) });
        s.record(line("u", 0.0), &PolicyOverride::default());
        s.clear();
        assert_eq!(s.total(), 0);
        assert_eq!(s.pending_expiries(), 0);
        assert!(s.sink().live.is_empty());
    }

    #[test]
    fn override_parsing_ignores_bad_values() {
        let o = PolicyOverride::from_fields(json!({ "history_limit": "3", "life_time": -1 }).as_object().unwrap());
        assert_eq!(o, PolicyOverride::default());
        let o = PolicyOverride::from_fields(json!({ "history_limit": 2.0, "life_time": 0 }).as_object().unwrap());
        assert_eq!(o, PolicyOverride { history_limit: Some(2), life_time: Some(0.0) });
    }
}
