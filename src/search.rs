/// Search index — a derived, rebuildable projection over group names and
/// message bodies.
///
/// Never a source of truth: every document here can be reconstructed by
/// replaying live groups and messages through the upsert calls, which is
/// exactly what `rebuild` does. Index failures are non-fatal to the
/// mutations that trigger them; the engine logs and retries.
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::RwLock;
use thiserror::Error;

use crate::ids::{GroupId, MessageId, Seq};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Indexing failure. The in-memory index never produces one, but external
/// implementations (disk, network) do, and the engine's retry path is
/// written against this.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SearchError {
    #[error("search index unavailable: {0}")]
    Unavailable(String),
}

// ---------------------------------------------------------------------------
// Documents
// ---------------------------------------------------------------------------

/// Identity of one derived search document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocId {
    Group(GroupId),
    Message(MessageId),
}

/// Lowercase alphanumeric tokens of `text`, deduplicated.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .filter(|t| seen.insert(t.to_string()))
        .map(str::to_string)
        .collect()
}

// ---------------------------------------------------------------------------
// SearchIndex trait
// ---------------------------------------------------------------------------

/// Contract for the derived text index. The engine treats implementations
/// as best-effort: upsert/remove failures are retried, search failures
/// surface as `Unavailable`.
pub trait SearchIndex: Send + Sync {
    fn upsert_group(&self, id: GroupId, name: &str) -> Result<(), SearchError>;
    fn upsert_message(&self, id: MessageId, body: &str) -> Result<(), SearchError>;
    fn remove(&self, doc: DocId) -> Result<(), SearchError>;

    /// Group ids whose name matches the query, best match first.
    fn search_groups(&self, query: &str) -> Result<Vec<GroupId>, SearchError>;

    /// Message ids in one group whose body contains every query token,
    /// sequence ascending.
    fn search_messages(&self, group: GroupId, query: &str)
        -> Result<Vec<MessageId>, SearchError>;

    /// Atomically replace the whole index from a replay of live documents.
    fn rebuild(
        &self,
        groups: Vec<(GroupId, String)>,
        messages: Vec<(MessageId, String)>,
    ) -> Result<(), SearchError>;
}

// ---------------------------------------------------------------------------
// InMemorySearchIndex
// ---------------------------------------------------------------------------

#[derive(Default)]
struct IndexInner {
    /// Group id -> lowercased name (substring and token matching).
    group_names: HashMap<GroupId, String>,
    /// Token -> group -> message seqs containing it.
    message_tokens: HashMap<String, HashMap<GroupId, BTreeSet<Seq>>>,
    /// Message -> its tokens, for removal and re-index.
    message_docs: HashMap<MessageId, Vec<String>>,
}

impl IndexInner {
    fn remove_message(&mut self, id: MessageId) {
        if let Some(tokens) = self.message_docs.remove(&id) {
            for token in tokens {
                if let Some(by_group) = self.message_tokens.get_mut(&token) {
                    if let Some(seqs) = by_group.get_mut(&id.group) {
                        seqs.remove(&id.seq);
                        if seqs.is_empty() {
                            by_group.remove(&id.group);
                        }
                    }
                    if by_group.is_empty() {
                        self.message_tokens.remove(&token);
                    }
                }
            }
        }
    }

    fn upsert_message(&mut self, id: MessageId, body: &str) {
        self.remove_message(id);
        let tokens = tokenize(body);
        for token in &tokens {
            self.message_tokens
                .entry(token.clone())
                .or_default()
                .entry(id.group)
                .or_default()
                .insert(id.seq);
        }
        self.message_docs.insert(id, tokens);
    }
}

/// Inverted token index over message bodies plus a name table for groups,
/// all behind one RwLock.
pub struct InMemorySearchIndex {
    inner: RwLock<IndexInner>,
}

impl InMemorySearchIndex {
    pub fn new() -> Self {
        InMemorySearchIndex {
            inner: RwLock::new(IndexInner::default()),
        }
    }
}

impl Default for InMemorySearchIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchIndex for InMemorySearchIndex {
    fn upsert_group(&self, id: GroupId, name: &str) -> Result<(), SearchError> {
        let mut inner = self.inner.write().unwrap();
        inner.group_names.insert(id, name.to_lowercase());
        Ok(())
    }

    fn upsert_message(&self, id: MessageId, body: &str) -> Result<(), SearchError> {
        let mut inner = self.inner.write().unwrap();
        inner.upsert_message(id, body);
        Ok(())
    }

    fn remove(&self, doc: DocId) -> Result<(), SearchError> {
        let mut inner = self.inner.write().unwrap();
        match doc {
            DocId::Group(id) => {
                inner.group_names.remove(&id);
            }
            DocId::Message(id) => inner.remove_message(id),
        }
        Ok(())
    }

    /// Rank: number of query tokens appearing in the name (case-insensitive
    /// substring match per token), full-query substring as tie-break, then
    /// group id for determinism.
    fn search_groups(&self, query: &str) -> Result<Vec<GroupId>, SearchError> {
        let tokens = tokenize(query);
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        let needle = query.trim().to_lowercase();
        let inner = self.inner.read().unwrap();
        let mut scored: Vec<(usize, bool, GroupId)> = inner
            .group_names
            .iter()
            .filter_map(|(id, name)| {
                let hits = tokens.iter().filter(|t| name.contains(t.as_str())).count();
                if hits == 0 {
                    None
                } else {
                    Some((hits, name.contains(&needle), *id))
                }
            })
            .collect();
        scored.sort_by(|a, b| {
            b.0.cmp(&a.0)
                .then(b.1.cmp(&a.1))
                .then(a.2.cmp(&b.2))
        });
        Ok(scored.into_iter().map(|(_, _, id)| id).collect())
    }

    fn search_messages(
        &self,
        group: GroupId,
        query: &str,
    ) -> Result<Vec<MessageId>, SearchError> {
        let tokens = tokenize(query);
        if tokens.is_empty() {
            return Ok(Vec::new());
        }
        let inner = self.inner.read().unwrap();
        // Intersect the per-token posting sets; every token must match.
        let mut result: Option<BTreeSet<Seq>> = None;
        for token in &tokens {
            let seqs = inner
                .message_tokens
                .get(token)
                .and_then(|by_group| by_group.get(&group))
                .cloned()
                .unwrap_or_default();
            result = Some(match result {
                None => seqs,
                Some(acc) => acc.intersection(&seqs).copied().collect(),
            });
            if result.as_ref().is_some_and(|r| r.is_empty()) {
                break;
            }
        }
        Ok(result
            .unwrap_or_default()
            .into_iter()
            .map(|seq| MessageId::new(group, seq))
            .collect())
    }

    fn rebuild(
        &self,
        groups: Vec<(GroupId, String)>,
        messages: Vec<(MessageId, String)>,
    ) -> Result<(), SearchError> {
        let mut fresh = IndexInner::default();
        for (id, name) in groups {
            fresh.group_names.insert(id, name.to_lowercase());
        }
        for (id, body) in messages {
            fresh.upsert_message(id, &body);
        }
        let mut inner = self.inner.write().unwrap();
        *inner = fresh;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenize_lowercases_splits_and_dedupes() {
        assert_eq!(tokenize("Hello, hello WORLD-42!"), vec!["hello", "world", "42"]);
        assert!(tokenize("  ...  ").is_empty());
    }

    #[test]
    fn group_search_is_case_insensitive_substring() {
        let index = InMemorySearchIndex::new();
        let eng = GroupId::new();
        let design = GroupId::new();
        index.upsert_group(eng, "Engineering").unwrap();
        index.upsert_group(design, "Design").unwrap();
        assert_eq!(index.search_groups("engineer").unwrap(), vec![eng]);
        assert_eq!(index.search_groups("DESIGN").unwrap(), vec![design]);
        assert!(index.search_groups("sales").unwrap().is_empty());
        assert!(index.search_groups("").unwrap().is_empty());
    }

    #[test]
    fn group_search_ranks_more_matched_tokens_first() {
        let index = InMemorySearchIndex::new();
        let both = GroupId::new();
        let one = GroupId::new();
        index.upsert_group(both, "rust engineering").unwrap();
        index.upsert_group(one, "engineering").unwrap();
        assert_eq!(
            index.search_groups("rust engineering").unwrap(),
            vec![both, one]
        );
    }

    #[test]
    fn message_search_requires_all_tokens_and_scopes_to_group() {
        let index = InMemorySearchIndex::new();
        let g1 = GroupId::new();
        let g2 = GroupId::new();
        let a = MessageId::new(g1, 1);
        let b = MessageId::new(g1, 2);
        let c = MessageId::new(g2, 1);
        index.upsert_message(a, "deploy the rust service").unwrap();
        index.upsert_message(b, "deploy tomorrow").unwrap();
        index.upsert_message(c, "deploy the rust service").unwrap();
        assert_eq!(index.search_messages(g1, "deploy").unwrap(), vec![a, b]);
        assert_eq!(index.search_messages(g1, "deploy rust").unwrap(), vec![a]);
        assert!(index.search_messages(g1, "python").unwrap().is_empty());
    }

    #[test]
    fn remove_unindexes_the_document() {
        let index = InMemorySearchIndex::new();
        let g = GroupId::new();
        let m = MessageId::new(g, 1);
        index.upsert_message(m, "hello world").unwrap();
        index.remove(DocId::Message(m)).unwrap();
        assert!(index.search_messages(g, "hello").unwrap().is_empty());
        index.upsert_group(g, "eng").unwrap();
        index.remove(DocId::Group(g)).unwrap();
        assert!(index.search_groups("eng").unwrap().is_empty());
    }

    #[test]
    fn upsert_replaces_previous_tokens() {
        let index = InMemorySearchIndex::new();
        let g = GroupId::new();
        let m = MessageId::new(g, 1);
        index.upsert_message(m, "old words").unwrap();
        index.upsert_message(m, "new words").unwrap();
        assert!(index.search_messages(g, "old").unwrap().is_empty());
        assert_eq!(index.search_messages(g, "new").unwrap(), vec![m]);
    }

    #[test]
    fn rebuild_replays_to_identical_results() {
        let index = InMemorySearchIndex::new();
        let g = GroupId::new();
        let groups = vec![(g, "Engineering".to_string())];
        let messages = vec![
            (MessageId::new(g, 1), "alpha beta".to_string()),
            (MessageId::new(g, 2), "beta gamma".to_string()),
        ];
        for (id, name) in &groups {
            index.upsert_group(*id, name).unwrap();
        }
        for (id, body) in &messages {
            index.upsert_message(*id, body).unwrap();
        }
        let before = index.search_messages(g, "beta").unwrap();

        let fresh = InMemorySearchIndex::new();
        fresh.rebuild(groups, messages).unwrap();
        assert_eq!(fresh.search_messages(g, "beta").unwrap(), before);
        assert_eq!(fresh.search_groups("engineering").unwrap(), vec![g]);
    }
}
