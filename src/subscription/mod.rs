//! Desired-topic set: initialization, persistence and the commands that
//! keep the stream source in sync with it.

pub mod persist;

use std::collections::BTreeSet;

use log::{debug, info, warn};
use url::Url;

use crate::transport::Command;
use persist::{PersistError, TopicPersistence};

/// Where the initial desired set came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    /// `topics` query parameter of the stream URL.
    Url,
    /// `topics` from configuration or the command line.
    Explicit,
    Persisted,
    /// Nothing yet; the first advertised catalog is adopted.
    Unseeded,
}

/// Result of a desired-set mutation.  The caller purges `purged` from the
/// history store and hands `command` to the transport.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Change {
    pub purged: Vec<String>,
    pub command: Option<Command>,
}

pub struct SubscriptionManager<P> {
    persistence: P,
    persist_enabled: bool,
    desired: BTreeSet<String>,
    catalog: Option<Vec<String>>,
    seeded: bool,
    deferred: bool,
}

impl<P: TopicPersistence> SubscriptionManager<P> {
    /// Seeds the desired set: URL parameter, then explicit option, then
    /// persisted value.  Unreadable storage disables persistence.
    pub fn new(persistence: P, explicit: Option<Vec<String>>, from_url: Option<Vec<String>>) -> (Self, Source) {
        let mut persist_enabled = true;
        let (initial, source) = if let Some(t) = from_url {
            (Some(t), Source::Url)
        } else if let Some(t) = explicit {
            (Some(t), Source::Explicit)
        } else {
            match persistence.load() {
                Ok(Some(t)) => (Some(t), Source::Persisted),
                Ok(None) => (None, Source::Unseeded),
                Err(PersistError::Corrupt(e)) => {
                    warn!("subscriptions: ignoring corrupt stored topics: {e}");
                    (None, Source::Unseeded)
                }
                Err(e) => {
                    warn!("subscriptions: {e}; persistence disabled");
                    persist_enabled = false;
                    (None, Source::Unseeded)
                }
            }
        };
        let desired: BTreeSet<String> = initial.unwrap_or_default().into_iter().collect();
        info!("subscriptions: {} topic(s) from {source:?}", desired.len());
        let mgr = SubscriptionManager {
            persistence,
            persist_enabled,
            desired,
            catalog: None,
            seeded: source != Source::Unseeded,
            deferred: false,
        };
        (mgr, source)
    }

    /// Current desired set, sorted.
    pub fn topics(&self) -> Vec<String> {
        self.desired.iter().cloned().collect()
    }

    pub fn contains(&self, topic: &str) -> bool {
        self.desired.contains(topic)
    }

    pub fn is_deferred(&self) -> bool {
        self.deferred
    }

    pub fn catalog(&self) -> Option<&[String]> {
        self.catalog.as_deref()
    }

    pub fn persistence(&self) -> &P {
        &self.persistence
    }

    pub fn set_topics<I, T>(&mut self, topics: I) -> Change
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let next = topics.into_iter().map(Into::into).collect();
        self.apply(next)
    }

    pub fn subscribe<I, T>(&mut self, topics: I) -> Change
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let mut next = self.desired.clone();
        next.extend(topics.into_iter().map(Into::into));
        self.apply(next)
    }

    pub fn unsubscribe<I, T>(&mut self, topics: I) -> Change
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let mut next = self.desired.clone();
        for t in topics {
            let t: String = t.into();
            next.remove(&t);
        }
        self.apply(next)
    }

    /// Deferral timer fired.  Returns the full current set to send.
    pub fn release_deferred(&mut self) -> Option<Command> {
        if !self.deferred {
            return None;
        }
        self.deferred = false;
        debug!("subscriptions: releasing deferred set_topics");
        Some(Command::set_topics(self.topics()))
    }

    /// A topic catalog arrived.  An unseeded, empty set adopts it; a
    /// deferred send is released.
    pub fn on_catalog(&mut self, topics: Vec<String>) -> Change {
        info!("subscriptions: catalog advertises {} topic(s)", topics.len());
        self.catalog = Some(topics.clone());
        if !self.seeded && self.desired.is_empty() {
            self.seeded = true;
            return self.apply(topics.into_iter().collect());
        }
        Change { purged: Vec::new(), command: self.release_deferred() }
    }

    fn apply(&mut self, next: BTreeSet<String>) -> Change {
        let purged: Vec<String> = self.desired.difference(&next).cloned().collect();
        let was_empty = self.desired.is_empty();
        self.desired = next;
        self.seeded = true;
        self.persist();

        if was_empty && !self.desired.is_empty() && self.catalog.is_none() {
            debug!("subscriptions: no catalog yet, deferring set_topics");
            self.deferred = true;
        }
        let command = if self.deferred { None } else { Some(Command::set_topics(self.topics())) };
        Change { purged, command }
    }

    fn persist(&mut self) {
        if !self.persist_enabled {
            return;
        }
        if let Err(e) = self.persistence.save(&self.topics()) {
            warn!("subscriptions: {e}; persistence disabled");
            self.persist_enabled = false;
        }
    }
}

/// `topics` query parameter(s), comma separated.  `None` when absent.
pub fn topics_from_url(url: &Url) -> Option<Vec<String>> {
    let mut found = false;
    let mut topics = Vec::new();
    for (k, v) in url.query_pairs() {
        if k == "topics" {
            found = true;
            topics.extend(v.split(',').map(str::trim).filter(|t| !t.is_empty()).map(String::from));
        }
    }
    found.then_some(topics)
}
