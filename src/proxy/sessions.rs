// Conversation memory for a stateless backend
//
// The backend runs with store=false and forgets every turn. This module keeps
// the little we need between requests of one conversation: which turns we
// have already answered, the last usage counters, and the compaction
// baseline once a history has been summarized.
//
// Architecture:
// - Keyed by cache key (prompt_cache_key, metadata ids, or a derived hash)
// - One Mutex around the whole map; never held across an await
// - Bounded: idle entries expire after a TTL, and at capacity the least
//   recently touched entry is evicted (monotonic access sequence, no ties)
// - Disabled manager: every operation passes through, nothing is stored

use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::proxy::transformation::content::{InputItem, Role};
use crate::util::short_hash;

/// Turn records kept per conversation
const MAX_TURN_ENTRIES: usize = 64;

/// Prefix of keys derived from the first user message
const DERIVED_KEY_PREFIX: &str = "derived_";

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub enabled: bool,
    /// Idle time after which a conversation is forgotten
    pub ttl: Duration,
    /// Maximum number of conversations kept at once
    pub max_entries: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: Duration::from_secs(3600),
            max_entries: 256,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Memory Types
// ─────────────────────────────────────────────────────────────────────────────

/// Token counters from the last completed response
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Usage {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cached_tokens: u64,
    pub reasoning_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    /// Read `usage` from a response payload
    pub fn from_response(payload: &Value) -> Option<Self> {
        let usage = payload.get("usage").filter(|u| u.is_object())?;
        let count = |v: Option<&Value>| v.and_then(Value::as_u64).unwrap_or(0);

        let input_tokens = count(usage.get("input_tokens"));
        let output_tokens = count(usage.get("output_tokens"));
        Some(Self {
            input_tokens,
            output_tokens,
            cached_tokens: count(usage.pointer("/input_tokens_details/cached_tokens")),
            reasoning_tokens: count(usage.pointer("/output_tokens_details/reasoning_tokens")),
            total_tokens: usage
                .get("total_tokens")
                .and_then(Value::as_u64)
                .unwrap_or(input_tokens + output_tokens),
        })
    }
}

/// Record of one answered turn
#[derive(Debug, Clone, PartialEq)]
pub enum TurnEntry {
    Response {
        content_hash: String,
        response_id: Option<String>,
    },
    Summary {
        text: String,
    },
}

/// History that replaced a compacted conversation
#[derive(Debug, Clone, PartialEq)]
pub struct CompactionBaseline {
    /// System/developer items kept verbatim
    pub preserved: Vec<InputItem>,
    /// The single summary turn
    pub summary: InputItem,
    /// Conversational items the summary stands for
    pub turn_count: usize,
}

impl CompactionBaseline {
    /// Rewrite a client history that still carries the summarized turns
    ///
    /// Returns `None` when the history is not longer than the baseline,
    /// which means the client already dropped or rewrote it.
    pub fn rewrite_history(&self, client_items: &[InputItem]) -> Option<Vec<InputItem>> {
        let (system, conversation): (Vec<&InputItem>, Vec<&InputItem>) =
            client_items.iter().partition(|item| item.is_instruction());
        if conversation.len() <= self.turn_count {
            return None;
        }

        // The compaction reply itself follows the summarized turns
        let tail = conversation[self.turn_count..]
            .iter()
            .skip_while(|item| item.role() == Some(Role::Assistant) || item.kind() == Some("reasoning"));

        let mut history: Vec<InputItem> = if system.is_empty() {
            self.preserved.clone()
        } else {
            system.into_iter().cloned().collect()
        };
        history.push(self.summary.clone());
        history.extend(tail.map(|item| (*item).clone()));
        Some(history)
    }
}

/// Everything remembered about one conversation
#[derive(Debug, Clone, Default)]
pub struct ConversationMemory {
    pub entries: Vec<TurnEntry>,
    /// Last response payload, keyed by the content hash it answered
    pub payloads: HashMap<String, Value>,
    pub usage: Option<Usage>,
    pub compaction: Option<CompactionBaseline>,
}

impl ConversationMemory {
    /// Has a response for this content hash been recorded?
    pub fn has_seen(&self, content_hash: &str) -> bool {
        self.entries.iter().any(|entry| {
            matches!(entry, TurnEntry::Response { content_hash: h, .. } if h == content_hash)
        })
    }
}

/// Per-request view handed through the pipeline
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub key: String,
    /// Snapshot of the memory taken when the request arrived
    pub memory: ConversationMemory,
    pub content_hash: String,
    pub seen_before: bool,
    /// History was rewritten from a stored compaction summary
    pub compaction_continuation: bool,
    /// This request is itself a summarization request
    pub is_compaction_request: bool,
}

// ─────────────────────────────────────────────────────────────────────────────
// Cache Key Resolution
// ─────────────────────────────────────────────────────────────────────────────

/// Pick the conversation key for a request body
///
/// Preference: `prompt_cache_key`, `metadata.conversation_id`,
/// `metadata.session_id`, then a key derived from the first user message.
/// Two conversations opening with the same message share a derived key.
pub fn resolve_cache_key(body: &Map<String, Value>, client_items: &[InputItem]) -> Option<String> {
    let non_empty = |v: Option<&Value>| {
        v.and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
    };

    let metadata = body.get("metadata");
    non_empty(body.get("prompt_cache_key"))
        .or_else(|| non_empty(metadata.and_then(|m| m.get("conversation_id"))))
        .or_else(|| non_empty(metadata.and_then(|m| m.get("session_id"))))
        .or_else(|| {
            let first_user = client_items
                .iter()
                .find(|item| item.role() == Some(Role::User))?;
            let bytes = serde_json::to_vec(first_user).ok()?;
            Some(format!("{}{}", DERIVED_KEY_PREFIX, short_hash(&bytes)))
        })
}

// ─────────────────────────────────────────────────────────────────────────────
// Session Manager
// ─────────────────────────────────────────────────────────────────────────────

struct SessionSlot {
    memory: ConversationMemory,
    last_access: Instant,
    access_seq: u64,
}

#[derive(Default)]
struct SessionMap {
    slots: HashMap<String, SessionSlot>,
    next_seq: u64,
}

impl SessionMap {
    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn evict_expired(&mut self, ttl: Duration, now: Instant) -> usize {
        let before = self.slots.len();
        self.slots
            .retain(|_, slot| now.saturating_duration_since(slot.last_access) <= ttl);
        before - self.slots.len()
    }

    /// Get a slot, creating it (and evicting the LRU entry at capacity)
    fn slot_mut(&mut self, key: &str, max_entries: usize, now: Instant) -> &mut SessionSlot {
        if !self.slots.contains_key(key) {
            while self.slots.len() >= max_entries {
                let oldest = self
                    .slots
                    .iter()
                    .min_by_key(|(_, slot)| slot.access_seq)
                    .map(|(k, _)| k.clone());
                match oldest {
                    Some(k) => {
                        tracing::debug!(cache_key = %k, "Evicting least recently used session");
                        self.slots.remove(&k);
                    }
                    None => break,
                }
            }
        }

        let seq = self.next_seq();
        let slot = self
            .slots
            .entry(key.to_string())
            .or_insert_with(|| SessionSlot {
                memory: ConversationMemory::default(),
                last_access: now,
                access_seq: seq,
            });
        slot.last_access = now;
        slot.access_seq = seq;
        slot
    }
}

/// Bounded, TTL-evicting map of conversation memories
pub struct SessionManager {
    config: SessionConfig,
    inner: Mutex<SessionMap>,
}

impl SessionManager {
    pub fn new(mut config: SessionConfig) -> Self {
        config.max_entries = config.max_entries.max(1);
        Self {
            config,
            inner: Mutex::new(SessionMap::default()),
        }
    }

    /// Create wrapped in Arc for sharing across handlers
    pub fn new_shared(config: SessionConfig) -> Arc<Self> {
        Arc::new(Self::new(config))
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Snapshot of the memory for `key`, created on first use
    pub fn get(&self, key: &str) -> ConversationMemory {
        if !self.config.enabled {
            return ConversationMemory::default();
        }
        let mut map = match self.inner.lock() {
            Ok(guard) => guard,
            Err(_) => return ConversationMemory::default(), // Poisoned mutex - pass through
        };
        let now = Instant::now();
        map.evict_expired(self.config.ttl, now);
        map.slot_mut(key, self.config.max_entries, now)
            .memory
            .clone()
    }

    /// Refresh last access for an existing entry
    pub fn touch(&self, key: &str) {
        if !self.config.enabled {
            return;
        }
        let Ok(mut map) = self.inner.lock() else {
            return;
        };
        let seq = map.next_seq();
        if let Some(slot) = map.slots.get_mut(key) {
            slot.last_access = Instant::now();
            slot.access_seq = seq;
        }
    }

    /// Record a completed response for the context's conversation
    pub fn record_response(&self, context: &SessionContext, payload: &Value) {
        if !self.config.enabled {
            return;
        }
        let Ok(mut map) = self.inner.lock() else {
            return;
        };
        let now = Instant::now();
        map.evict_expired(self.config.ttl, now);
        let memory = &mut map.slot_mut(&context.key, self.config.max_entries, now).memory;

        if let Some(usage) = Usage::from_response(payload) {
            memory.usage = Some(usage);
        }
        memory.entries.push(TurnEntry::Response {
            content_hash: context.content_hash.clone(),
            response_id: payload.get("id").and_then(Value::as_str).map(String::from),
        });
        if memory.entries.len() > MAX_TURN_ENTRIES {
            let excess = memory.entries.len() - MAX_TURN_ENTRIES;
            memory.entries.drain(..excess);
        }
        memory.payloads.clear();
        memory
            .payloads
            .insert(context.content_hash.clone(), payload.clone());

        tracing::debug!(
            cache_key = %context.key,
            entries = memory.entries.len(),
            "Recorded response"
        );
    }

    /// Replace the conversation's history with a compaction summary
    pub fn apply_compaction_summary(&self, context: &SessionContext, baseline: CompactionBaseline) {
        if !self.config.enabled {
            return;
        }
        let Ok(mut map) = self.inner.lock() else {
            return;
        };
        let now = Instant::now();
        let memory = &mut map.slot_mut(&context.key, self.config.max_entries, now).memory;

        let text = baseline.summary.text().unwrap_or_default();
        memory.entries = vec![TurnEntry::Summary { text }];
        memory.payloads.clear();
        tracing::info!(
            cache_key = %context.key,
            turn_count = baseline.turn_count,
            "Conversation compacted"
        );
        memory.compaction = Some(baseline);
    }

    /// Drop conversations idle past the TTL, returning how many were removed
    pub fn evict_expired(&self) -> usize {
        self.evict_expired_at(Instant::now())
    }

    fn evict_expired_at(&self, now: Instant) -> usize {
        match self.inner.lock() {
            Ok(mut map) => map.evict_expired(self.config.ttl, now),
            Err(_) => 0,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|map| map.slots.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner
            .lock()
            .map(|map| map.slots.contains_key(key))
            .unwrap_or(false)
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}
