//! The uniform observability record produced by every conductor.
//!
//! `ExecutionTrace` is a cheaply cloneable handle so the conductor, the
//! tool closures it synthesizes, and the caller can all observe the same
//! record. Every started step is eventually terminated with an output or
//! an error; partial data survives cancellation and failures.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// One agent invocation within an ensemble run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceStep {
    pub index: usize,
    pub agent_id: String,
    pub input: String,
    pub output: Option<String>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: Option<u64>,
    pub metadata: Option<Value>,
}

impl TraceStep {
    pub fn is_terminated(&self) -> bool {
        self.output.is_some() || self.error.is_some()
    }
}

#[derive(Debug)]
struct TraceInner {
    id: Uuid,
    start_time: DateTime<Utc>,
    end_time: Option<DateTime<Utc>>,
    steps: Vec<TraceStep>,
}

/// Ordered record of all steps in an ensemble run.
#[derive(Debug, Clone)]
pub struct ExecutionTrace {
    inner: Arc<Mutex<TraceInner>>,
}

impl Default for ExecutionTrace {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionTrace {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(TraceInner {
                id: Uuid::new_v4(),
                start_time: Utc::now(),
                end_time: None,
                steps: Vec::new(),
            })),
        }
    }

    pub fn id(&self) -> Uuid {
        self.inner.lock().unwrap().id
    }

    pub fn start_time(&self) -> DateTime<Utc> {
        self.inner.lock().unwrap().start_time
    }

    pub fn end_time(&self) -> Option<DateTime<Utc>> {
        self.inner.lock().unwrap().end_time
    }

    /// Record the start of an agent step, returning its index.
    pub fn start_step<A, I>(&self, agent_id: A, input: I) -> usize
    where
        A: Into<String>,
        I: Into<String>,
    {
        let mut inner = self.inner.lock().unwrap();
        let index = inner.steps.len();
        inner.steps.push(TraceStep {
            index,
            agent_id: agent_id.into(),
            input: input.into(),
            output: None,
            error: None,
            timestamp: Utc::now(),
            duration_ms: None,
            metadata: None,
        });
        index
    }

    /// Terminate a step with its output.
    pub fn complete_step<S: Into<String>>(&self, index: usize, output: S) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(step) = inner.steps.get_mut(index) {
            step.duration_ms = Some(elapsed_ms(step.timestamp));
            step.output = Some(output.into());
        }
    }

    /// Terminate a step with an error.
    pub fn fail_step<S: Into<String>>(&self, index: usize, error: S) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(step) = inner.steps.get_mut(index) {
            step.duration_ms = Some(elapsed_ms(step.timestamp));
            step.error = Some(error.into());
        }
    }

    /// Attach a metadata entry to a step without changing its outcome.
    /// Used for non-fatal observations such as failing hooks.
    pub fn annotate_step<K: Into<String>>(&self, index: usize, key: K, value: Value) {
        let mut inner = self.inner.lock().unwrap();
        if let Some(step) = inner.steps.get_mut(index) {
            let metadata = step
                .metadata
                .get_or_insert_with(|| Value::Object(Default::default()));
            if let Some(map) = metadata.as_object_mut() {
                map.insert(key.into(), value);
            }
        }
    }

    /// Close the trace. Idempotent.
    pub fn finish(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.end_time.is_none() {
            inner.end_time = Some(Utc::now());
        }
    }

    pub fn steps(&self) -> Vec<TraceStep> {
        self.inner.lock().unwrap().steps.clone()
    }

    pub fn step_count(&self) -> usize {
        self.inner.lock().unwrap().steps.len()
    }
}

fn elapsed_ms(since: DateTime<Utc>) -> u64 {
    (Utc::now() - since).num_milliseconds().max(0) as u64
}
