use std::collections::BTreeSet;

use crate::protocol::{ClientMessage, Topic};

/// The entities a client wants push updates for, independent of whether a
/// connection is currently open.
///
/// Both sets iterate in sorted order so re-announcements are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubscriptionSet {
    services: BTreeSet<String>,
    environments: BTreeSet<String>,
}

impl SubscriptionSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn set_mut(&mut self, topic: Topic) -> &mut BTreeSet<String> {
        match topic {
            Topic::Service => &mut self.services,
            Topic::Environment => &mut self.environments,
        }
    }

    /// Returns true if `id` was not already present.
    pub fn insert(&mut self, topic: Topic, id: &str) -> bool {
        self.set_mut(topic).insert(id.to_string())
    }

    /// Returns true if `id` was present.
    pub fn remove(&mut self, topic: Topic, id: &str) -> bool {
        self.set_mut(topic).remove(id)
    }

    pub fn contains(&self, topic: Topic, id: &str) -> bool {
        match topic {
            Topic::Service => self.services.contains(id),
            Topic::Environment => self.environments.contains(id),
        }
    }

    pub fn services(&self) -> impl Iterator<Item = &str> {
        self.services.iter().map(String::as_str)
    }

    pub fn environments(&self) -> impl Iterator<Item = &str> {
        self.environments.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.services.len() + self.environments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty() && self.environments.is_empty()
    }

    /// Subscribe messages for every member: services first, then
    /// environments.
    pub fn announcements(&self) -> Vec<ClientMessage> {
        self.services()
            .map(|id| ClientMessage::subscribe(Topic::Service, id))
            .chain(
                self.environments()
                    .map(|id| ClientMessage::subscribe(Topic::Environment, id)),
            )
            .collect()
    }
}
