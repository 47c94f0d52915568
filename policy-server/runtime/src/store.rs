use crate::core::Policy;
use ahash::{AHashMap as HashMap, AHashSet as HashSet};
use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;

/// Stores policies and the tags allocated to the apps they reference.
pub trait Store: Send + Sync {
    /// Adds policies, allocating a tag for every newly referenced app.
    /// Policies that already exist are left unchanged.
    fn create(&self, policies: &[Policy]) -> Result<(), StoreError>;

    /// Removes policies. Tags are kept.
    fn delete(&self, policies: &[Policy]);

    fn all(&self) -> Vec<Policy>;

    /// Returns the policies whose source or destination is one of `guids`.
    fn by_guids(&self, guids: &[String]) -> Vec<Policy>;

    fn tags(&self) -> Vec<Tag>;
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Tag {
    pub id: String,
    pub tag: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("all {0} tags are allocated")]
    TagsExhausted(u64),
}

/// An in-memory [`Store`].
#[derive(Debug)]
pub struct MemoryStore {
    tag_length: usize,
    state: RwLock<State>,
}

#[derive(Debug, Default)]
struct State {
    policies: Vec<Policy>,
    index: HashSet<Policy>,
    tags: Vec<Tag>,
    tags_by_id: HashMap<String, usize>,
}

// === impl MemoryStore ===

impl MemoryStore {
    /// Tags are `tag_length` bytes wide, hex encoded.
    pub fn new(tag_length: usize) -> Self {
        assert!(
            (1..=4).contains(&tag_length),
            "tag length must be between 1 and 4 bytes"
        );
        Self {
            tag_length,
            state: RwLock::default(),
        }
    }

    /// The number of distinct tags that can be allocated. Zero is never used.
    fn capacity(&self) -> u64 {
        (1u64 << (8 * self.tag_length)) - 1
    }

    fn format_tag(&self, n: u64) -> String {
        format!("{:0width$x}", n, width = 2 * self.tag_length)
    }
}

impl Store for MemoryStore {
    fn create(&self, policies: &[Policy]) -> Result<(), StoreError> {
        let mut state = self.state.write();

        let mut new_ids = Vec::new();
        for id in policies.iter().flat_map(|p| p.app_ids()) {
            if !state.tags_by_id.contains_key(id) && !new_ids.contains(&id) {
                new_ids.push(id);
            }
        }
        let capacity = self.capacity();
        if state.tags.len() as u64 + new_ids.len() as u64 > capacity {
            return Err(StoreError::TagsExhausted(capacity));
        }

        for id in new_ids {
            let tag = self.format_tag(state.tags.len() as u64 + 1);
            tracing::debug!(%id, %tag, "Allocated tag");
            let idx = state.tags.len();
            state.tags.push(Tag {
                id: id.to_string(),
                tag,
            });
            state.tags_by_id.insert(id.to_string(), idx);
        }

        for policy in policies {
            if state.index.insert(policy.clone()) {
                state.policies.push(policy.clone());
            }
        }
        Ok(())
    }

    fn delete(&self, policies: &[Policy]) {
        let mut state = self.state.write();
        for policy in policies {
            if state.index.remove(policy) {
                state.policies.retain(|p| p != policy);
            }
        }
    }

    fn all(&self) -> Vec<Policy> {
        self.state.read().policies.clone()
    }

    fn by_guids(&self, guids: &[String]) -> Vec<Policy> {
        self.state
            .read()
            .policies
            .iter()
            .filter(|p| p.app_ids().iter().any(|id| guids.iter().any(|g| g == id)))
            .cloned()
            .collect()
    }

    fn tags(&self) -> Vec<Tag> {
        self.state.read().tags.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Destination, Protocol};

    fn policy(src: &str, dst: &str, port: u16) -> Policy {
        Policy::new(src, Destination::with_port(dst, Protocol::Tcp, port).unwrap())
    }

    fn tag(id: &str, tag: &str) -> Tag {
        Tag {
            id: id.to_string(),
            tag: tag.to_string(),
        }
    }

    #[test]
    fn allocates_sequential_tags() {
        let store = MemoryStore::new(2);
        store
            .create(&[
                policy("app1", "app2", 8080),
                policy("app3", "app1", 9999),
                policy("app3", "app4", 3333),
            ])
            .unwrap();
        assert_eq!(
            store.tags(),
            [
                tag("app1", "0001"),
                tag("app2", "0002"),
                tag("app3", "0003"),
                tag("app4", "0004"),
            ]
        );
    }

    #[test]
    fn create_is_idempotent() {
        let store = MemoryStore::new(1);
        let self_policy = policy("app", "app", 8080);
        store.create(&[self_policy.clone()]).unwrap();
        store.create(&[self_policy.clone()]).unwrap();
        assert_eq!(store.all(), [self_policy]);
        assert_eq!(store.tags(), [tag("app", "01")]);
    }

    #[test]
    fn filters_by_source_or_destination() {
        let store = MemoryStore::new(2);
        let policies = [
            policy("app1", "app2", 8080),
            policy("app3", "app1", 9999),
            policy("app3", "app4", 3333),
        ];
        store.create(&policies).unwrap();
        assert_eq!(
            store.by_guids(&["app1".to_string(), "app2".to_string()]),
            policies[..2]
        );
        assert!(store.by_guids(&["app5".to_string()]).is_empty());
    }

    #[test]
    fn delete_keeps_tags() {
        let store = MemoryStore::new(2);
        let kept = policy("app1", "app2", 8080);
        let deleted = policy("app1", "app2", 9090);
        store.create(&[kept.clone(), deleted.clone()]).unwrap();
        store.delete(&[deleted, policy("app9", "app9", 1)]);
        assert_eq!(store.all(), [kept]);
        assert_eq!(store.tags().len(), 2);
    }

    #[test]
    fn tag_exhaustion_leaves_store_unchanged() {
        let store = MemoryStore::new(1);
        let policies = (0..127)
            .map(|i| policy(&format!("src-{i}"), &format!("dst-{i}"), 80))
            .collect::<Vec<_>>();
        store.create(&policies).unwrap();
        assert_eq!(store.tags().len(), 254);

        let overflow = policy("one-more", "and-another", 80);
        assert_eq!(
            store.create(&[overflow.clone()]),
            Err(StoreError::TagsExhausted(255))
        );
        assert!(!store.all().contains(&overflow));
        assert_eq!(store.tags().len(), 254);

        store.create(&[policy("last", "last", 80)]).unwrap();
        assert_eq!(store.tags().last(), Some(&tag("last", "ff")));
    }
}
