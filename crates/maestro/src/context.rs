//! The shared scratchpad passed through an ensemble run: a key/value
//! store, a bounded global message log, and per-agent message logs.
//!
//! `SharedContext` is a handle. Cloning the handle aliases the same
//! underlying store (that is how conductors share it across concurrent
//! agent steps); [`SharedContext::fork`] produces an independent copy.
//! All mutations take the single internal lock, so individual appends are
//! atomic and snapshots are never torn.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::models::Message;

pub const DEFAULT_MAX_HISTORY_LENGTH: usize = 1000;

/// A point-in-time copy of a context's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub data: HashMap<String, Value>,
    pub history: Vec<Message>,
    pub agent_messages: HashMap<String, Vec<Message>>,
    pub timestamp: DateTime<Utc>,
}

impl ContextSnapshot {
    /// Whether two snapshots capture the same state, ignoring when they
    /// were taken.
    pub fn same_state(&self, other: &ContextSnapshot) -> bool {
        self.data == other.data
            && self.history == other.history
            && self.agent_messages == other.agent_messages
    }
}

#[derive(Debug)]
struct ContextInner {
    data: HashMap<String, Value>,
    history: VecDeque<Message>,
    agent_messages: HashMap<String, Vec<Message>>,
    max_history_length: usize,
}

/// Inter-agent scratchpad and message log handle.
#[derive(Debug, Clone)]
pub struct SharedContext {
    inner: Arc<Mutex<ContextInner>>,
}

impl Default for SharedContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SharedContext {
    pub fn new() -> Self {
        Self::with_max_history(DEFAULT_MAX_HISTORY_LENGTH)
    }

    pub fn with_max_history(max_history_length: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(ContextInner {
                data: HashMap::new(),
                history: VecDeque::new(),
                agent_messages: HashMap::new(),
                max_history_length,
            })),
        }
    }

    pub fn set<K: Into<String>>(&self, key: K, value: Value) {
        self.inner.lock().unwrap().data.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.lock().unwrap().data.get(key).cloned()
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.inner.lock().unwrap().data.remove(key)
    }

    /// Append to the global history, trimming the oldest entries beyond
    /// the history bound.
    pub fn append_history(&self, message: Message) {
        let mut inner = self.inner.lock().unwrap();
        inner.history.push_back(message);
        while inner.history.len() > inner.max_history_length {
            inner.history.pop_front();
        }
    }

    pub fn history(&self) -> Vec<Message> {
        self.inner.lock().unwrap().history.iter().cloned().collect()
    }

    pub fn append_agent_message<I: Into<String>>(&self, agent_id: I, message: Message) {
        self.inner
            .lock()
            .unwrap()
            .agent_messages
            .entry(agent_id.into())
            .or_default()
            .push(message);
    }

    pub fn agent_messages(&self, agent_id: &str) -> Vec<Message> {
        self.inner
            .lock()
            .unwrap()
            .agent_messages
            .get(agent_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> ContextSnapshot {
        let inner = self.inner.lock().unwrap();
        ContextSnapshot {
            data: inner.data.clone(),
            history: inner.history.iter().cloned().collect(),
            agent_messages: inner.agent_messages.clone(),
            timestamp: Utc::now(),
        }
    }

    /// Replace this context's state with a previously taken snapshot.
    /// The history bound is kept as configured on this context.
    pub fn restore(&self, snapshot: ContextSnapshot) {
        let mut inner = self.inner.lock().unwrap();
        inner.data = snapshot.data;
        inner.history = snapshot.history.into();
        inner.agent_messages = snapshot.agent_messages;
        while inner.history.len() > inner.max_history_length {
            inner.history.pop_front();
        }
    }

    /// An independent copy: mutations to the fork never appear in the
    /// original and vice versa.
    pub fn fork(&self) -> SharedContext {
        let inner = self.inner.lock().unwrap();
        SharedContext {
            inner: Arc::new(Mutex::new(ContextInner {
                data: inner.data.clone(),
                history: inner.history.clone(),
                agent_messages: inner.agent_messages.clone(),
                max_history_length: inner.max_history_length,
            })),
        }
    }
}
