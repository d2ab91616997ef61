//! Shared run state: values, artifacts, messages, and metadata.
//!
//! A [`State`] is the mutable container threaded through every agent run.
//! It holds four independent sections:
//!
//! - **values** — dynamic key/value data (`String` → [`serde_json::Value`])
//! - **artifacts** — binary or textual blobs with a MIME type, addressed by id
//! - **messages** — the ordered conversation history ([`Message`])
//! - **metadata** — bookkeeping entries orthogonal to values (e.g.
//!   `"sources_analyzed"`, workflow status reports)
//!
//! All mutations are serialized under a single lock, and every read returns a
//! snapshot — callers never alias internal storage. `Clone` produces a fully
//! independent deep copy (artifact blobs are immutable and shared by
//! reference, so cloning stays cheap even with large attachments).
//!
//! Tools never receive a `State`; they get the read-only [`StateReader`]
//! projection. Sub-agent runs receive a derived state assembled by a
//! [`SharedStateContext`] according to its [`StateInheritance`] policy.
//!
//! # Example
//!
//! ```rust
//! use agentflow::state::State;
//! use serde_json::json;
//!
//! let state = State::new();
//! state.set("user_input", json!("Analyze AI safety"));
//! state.set("attempt", json!(1));
//!
//! let copy = state.clone();
//! copy.set("attempt", json!(2));
//!
//! // The clone is independent of the original.
//! assert_eq!(state.get("attempt"), Some(json!(1)));
//! assert_eq!(copy.get("attempt"), Some(json!(2)));
//! ```

use crate::agentflow::message::Message;
use serde_json::Value;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use uuid::Uuid;

/// Default cap on the estimated serialized payload of a state (10 MiB).
pub const DEFAULT_MAX_PAYLOAD_BYTES: usize = 10 * 1024 * 1024;

/// Well-known state keys consumed by the agent loop and workflows.
///
/// These names are part of the public contract: external callers seed
/// [`USER_INPUT`](keys::USER_INPUT) (or [`PROMPT`](keys::PROMPT)) and read
/// [`RESPONSE`](keys::RESPONSE) / [`OUTPUT`](keys::OUTPUT) back.
pub mod keys {
    /// Seeds the first user message of an LLM agent run.
    pub const USER_INPUT: &str = "user_input";
    /// Alternate seed key, checked when `user_input` is absent.
    pub const PROMPT: &str = "prompt";
    /// Final answer, written by the LLM agent loop.
    pub const RESPONSE: &str = "response";
    /// Final answer (duplicate of `response`, kept for pipeline consumers).
    pub const OUTPUT: &str = "output";
    /// Optional externally-persisted message list.
    pub const CONVERSATION_HISTORY: &str = "conversation_history";
    /// Per-branch result map written by `MergeAll` parallel workflows.
    pub const PARALLEL_RESULTS: &str = "parallel_results";
}

/// Errors surfaced by state validation.
#[derive(Debug, Clone)]
pub enum StateError {
    /// Estimated payload exceeds the configured cap.
    PayloadTooLarge { size: usize, limit: usize },
    /// A section could not be serialized while estimating size.
    Serialization(String),
}

impl fmt::Display for StateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StateError::PayloadTooLarge { size, limit } => {
                write!(f, "state payload too large: {} bytes (limit {})", size, limit)
            }
            StateError::Serialization(msg) => write!(f, "state serialization failed: {}", msg),
        }
    }
}

impl Error for StateError {}

/// Binary or textual payload of an [`Artifact`].
#[derive(Debug, Clone, PartialEq)]
pub enum ArtifactData {
    Bytes(Vec<u8>),
    Text(String),
}

impl ArtifactData {
    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        match self {
            ArtifactData::Bytes(b) => b.len(),
            ArtifactData::Text(t) => t.len(),
        }
    }

    /// `true` when the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// An addressable blob carried by a state.
///
/// Artifacts are immutable once created: clones of a state share the same
/// underlying blob by reference, which keeps deep-cloning cheap.
#[derive(Debug, Clone, PartialEq)]
pub struct Artifact {
    /// Unique identifier (auto-generated when not supplied).
    pub id: String,
    /// MIME type of the payload (e.g. `"application/pdf"`).
    pub mime_type: String,
    /// The payload itself.
    pub data: ArtifactData,
    /// Free-form metadata about the artifact.
    pub metadata: HashMap<String, Value>,
}

impl Artifact {
    /// Create a text artifact with a generated id.
    pub fn text(mime_type: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            mime_type: mime_type.into(),
            data: ArtifactData::Text(text.into()),
            metadata: HashMap::new(),
        }
    }

    /// Create a binary artifact with a generated id.
    pub fn bytes(mime_type: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            mime_type: mime_type.into(),
            data: ArtifactData::Bytes(bytes),
            metadata: HashMap::new(),
        }
    }

    /// Override the generated id (builder pattern).
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Attach a metadata entry (builder pattern).
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

#[derive(Debug, Default)]
struct StateInner {
    values: HashMap<String, Value>,
    artifacts: HashMap<String, Arc<Artifact>>,
    messages: Vec<Message>,
    metadata: HashMap<String, Value>,
}

/// The thread-safe state container threaded through agent runs.
///
/// See the [module docs](self) for the full contract. All accessors are
/// synchronous; the single internal lock is never held across `.await`.
#[derive(Default)]
pub struct State {
    inner: Arc<RwLock<StateInner>>,
}

fn read_lock(lock: &RwLock<StateInner>) -> RwLockReadGuard<'_, StateInner> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_lock(lock: &RwLock<StateInner>) -> RwLockWriteGuard<'_, StateInner> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

impl State {
    /// Create an empty state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience constructor seeding `user_input`.
    pub fn with_user_input(input: impl Into<String>) -> Self {
        let state = Self::new();
        state.set(keys::USER_INPUT, Value::String(input.into()));
        state
    }

    // ---- values ----

    /// Set a value, replacing any previous entry under `key`.
    pub fn set(&self, key: impl Into<String>, value: Value) {
        write_lock(&self.inner).values.insert(key.into(), value);
    }

    /// Get a copy of the value under `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        read_lock(&self.inner).values.get(key).cloned()
    }

    /// Get the value under `key` as a string, if it is one.
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.get(key) {
            Some(Value::String(s)) => Some(s),
            _ => None,
        }
    }

    /// Remove and return the value under `key`.
    pub fn delete(&self, key: &str) -> Option<Value> {
        write_lock(&self.inner).values.remove(key)
    }

    /// `true` when a value exists under `key`.
    pub fn has(&self, key: &str) -> bool {
        read_lock(&self.inner).values.contains_key(key)
    }

    /// Snapshot of all value keys (iteration order is unspecified).
    pub fn keys(&self) -> Vec<String> {
        read_lock(&self.inner).values.keys().cloned().collect()
    }

    /// Snapshot of the full value map.
    pub fn values(&self) -> HashMap<String, Value> {
        read_lock(&self.inner).values.clone()
    }

    /// Snapshot of the value map as a JSON object.
    pub fn values_as_object(&self) -> Value {
        let map: serde_json::Map<String, Value> =
            read_lock(&self.inner).values.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        Value::Object(map)
    }

    // ---- artifacts ----

    /// Attach an artifact, addressable by its id.
    pub fn add_artifact(&self, artifact: Artifact) -> String {
        let id = artifact.id.clone();
        write_lock(&self.inner).artifacts.insert(id.clone(), Arc::new(artifact));
        id
    }

    /// Look up an artifact by id.
    pub fn get_artifact(&self, id: &str) -> Option<Arc<Artifact>> {
        read_lock(&self.inner).artifacts.get(id).cloned()
    }

    /// Snapshot of all artifacts keyed by id.
    pub fn artifacts(&self) -> HashMap<String, Arc<Artifact>> {
        read_lock(&self.inner).artifacts.clone()
    }

    // ---- messages ----

    /// Append a message to the conversation history.
    pub fn add_message(&self, message: Message) {
        write_lock(&self.inner).messages.push(message);
    }

    /// Snapshot of the conversation history, in insertion order.
    pub fn messages(&self) -> Vec<Message> {
        read_lock(&self.inner).messages.clone()
    }

    /// Number of messages currently held.
    pub fn message_count(&self) -> usize {
        read_lock(&self.inner).messages.len()
    }

    // ---- metadata ----

    /// Set a metadata entry.
    pub fn set_metadata(&self, key: impl Into<String>, value: Value) {
        write_lock(&self.inner).metadata.insert(key.into(), value);
    }

    /// Get a copy of a metadata entry.
    pub fn get_metadata(&self, key: &str) -> Option<Value> {
        read_lock(&self.inner).metadata.get(key).cloned()
    }

    /// Snapshot of all metadata.
    pub fn all_metadata(&self) -> HashMap<String, Value> {
        read_lock(&self.inner).metadata.clone()
    }

    // ---- projection, merging, validation ----

    /// Read-only projection of this state for tool execution.
    ///
    /// The reader observes live state (it shares storage with `self`) but
    /// exposes no mutators.
    pub fn reader(&self) -> StateReader {
        StateReader {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Merge another state's sections into this one according to `policy`.
    ///
    /// Values, artifacts, and metadata from `other` overwrite entries with
    /// the same key; messages are never merged (conversation history belongs
    /// to the run that produced it).
    pub fn merge_from(&self, other: &State, policy: &StateInheritance) {
        let src = read_lock(&other.inner);
        let mut dst = write_lock(&self.inner);
        if policy.inherit_values {
            for (k, v) in &src.values {
                dst.values.insert(k.clone(), v.clone());
            }
        }
        if policy.inherit_artifacts {
            for (k, a) in &src.artifacts {
                dst.artifacts.insert(k.clone(), Arc::clone(a));
            }
        }
        if policy.inherit_metadata {
            for (k, v) in &src.metadata {
                dst.metadata.insert(k.clone(), v.clone());
            }
        }
    }

    /// Estimate the serialized payload size of this state in bytes.
    pub fn estimated_size(&self) -> Result<usize, StateError> {
        let inner = read_lock(&self.inner);
        let mut size = 0usize;
        for (k, v) in &inner.values {
            size += k.len();
            size += serde_json::to_vec(v)
                .map_err(|e| StateError::Serialization(e.to_string()))?
                .len();
        }
        for (k, v) in &inner.metadata {
            size += k.len();
            size += serde_json::to_vec(v)
                .map_err(|e| StateError::Serialization(e.to_string()))?
                .len();
        }
        for a in inner.artifacts.values() {
            size += a.id.len() + a.mime_type.len() + a.data.len();
        }
        for m in &inner.messages {
            size += serde_json::to_vec(m)
                .map_err(|e| StateError::Serialization(e.to_string()))?
                .len();
        }
        Ok(size)
    }

    /// Validate the state against [`DEFAULT_MAX_PAYLOAD_BYTES`].
    ///
    /// Values are JSON trees, so reference cycles are impossible by
    /// construction; the check that remains is the payload cap, which keeps
    /// states transportable.
    pub fn validate(&self) -> Result<(), StateError> {
        self.validate_with_limit(DEFAULT_MAX_PAYLOAD_BYTES)
    }

    /// Validate the state against a caller-supplied payload cap.
    pub fn validate_with_limit(&self, limit: usize) -> Result<(), StateError> {
        let size = self.estimated_size()?;
        if size > limit {
            return Err(StateError::PayloadTooLarge { size, limit });
        }
        Ok(())
    }
}

/// `Clone` is a deep copy: the new state is fully independent of the
/// original. Artifact blobs are immutable and shared by `Arc`.
impl Clone for State {
    fn clone(&self) -> Self {
        let src = read_lock(&self.inner);
        let copy = StateInner {
            values: src.values.clone(),
            artifacts: src.artifacts.clone(),
            messages: src.messages.clone(),
            metadata: src.metadata.clone(),
        };
        Self {
            inner: Arc::new(RwLock::new(copy)),
        }
    }
}

/// Content equality across all four sections.
impl PartialEq for State {
    fn eq(&self, other: &Self) -> bool {
        if Arc::ptr_eq(&self.inner, &other.inner) {
            return true;
        }
        let a = read_lock(&self.inner);
        let b = read_lock(&other.inner);
        a.values == b.values
            && a.messages == b.messages
            && a.metadata == b.metadata
            && a.artifacts.len() == b.artifacts.len()
            && a.artifacts
                .iter()
                .all(|(k, v)| b.artifacts.get(k).is_some_and(|o| **o == **v))
    }
}

impl fmt::Debug for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = read_lock(&self.inner);
        f.debug_struct("State")
            .field("values", &inner.values.len())
            .field("artifacts", &inner.artifacts.len())
            .field("messages", &inner.messages.len())
            .field("metadata", &inner.metadata.len())
            .finish()
    }
}

/// Read-only projection of a [`State`], handed to tools via
/// [`ToolContext`](crate::tool::ToolContext).
///
/// Exposes the read half of the state contract and nothing else — tools
/// return values that the caller integrates, they never mutate state.
#[derive(Clone)]
pub struct StateReader {
    inner: Arc<RwLock<StateInner>>,
}

impl StateReader {
    /// Get a copy of the value under `key`.
    pub fn get(&self, key: &str) -> Option<Value> {
        read_lock(&self.inner).values.get(key).cloned()
    }

    /// `true` when a value exists under `key`.
    pub fn has(&self, key: &str) -> bool {
        read_lock(&self.inner).values.contains_key(key)
    }

    /// Snapshot of all value keys.
    pub fn keys(&self) -> Vec<String> {
        read_lock(&self.inner).values.keys().cloned().collect()
    }

    /// Snapshot of the full value map.
    pub fn values(&self) -> HashMap<String, Value> {
        read_lock(&self.inner).values.clone()
    }

    /// Snapshot of the conversation history.
    pub fn messages(&self) -> Vec<Message> {
        read_lock(&self.inner).messages.clone()
    }

    /// Snapshot of all artifacts keyed by id.
    pub fn artifacts(&self) -> HashMap<String, Arc<Artifact>> {
        read_lock(&self.inner).artifacts.clone()
    }

    /// Snapshot of all metadata.
    pub fn metadata(&self) -> HashMap<String, Value> {
        read_lock(&self.inner).metadata.clone()
    }
}

impl fmt::Debug for StateReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = read_lock(&self.inner);
        f.debug_struct("StateReader")
            .field("values", &inner.values.len())
            .field("messages", &inner.messages.len())
            .finish()
    }
}

/// Which sections a derived child state inherits from its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateInheritance {
    pub inherit_values: bool,
    pub inherit_artifacts: bool,
    pub inherit_metadata: bool,
}

impl Default for StateInheritance {
    fn default() -> Self {
        Self {
            inherit_values: true,
            inherit_artifacts: true,
            inherit_metadata: true,
        }
    }
}

impl StateInheritance {
    /// Policy inheriting nothing — the child starts empty.
    pub fn none() -> Self {
        Self {
            inherit_values: false,
            inherit_artifacts: false,
            inherit_metadata: false,
        }
    }
}

/// Wraps a parent state and assembles derived child states for sub-agent
/// runs according to a [`StateInheritance`] policy.
///
/// # Example
///
/// ```rust
/// use agentflow::state::{SharedStateContext, State, StateInheritance};
/// use serde_json::json;
///
/// let parent = State::new();
/// parent.set("customer_id", json!("X"));
/// parent.set_metadata("region", json!("eu"));
///
/// let ctx = SharedStateContext::new(parent, StateInheritance {
///     inherit_values: true,
///     inherit_artifacts: false,
///     inherit_metadata: true,
/// });
///
/// let child = ctx.derive_child();
/// assert_eq!(child.get("customer_id"), Some(json!("X")));
/// assert_eq!(child.get_metadata("region"), Some(json!("eu")));
/// assert_eq!(child.message_count(), 0); // messages are never inherited
/// ```
pub struct SharedStateContext {
    parent: State,
    policy: StateInheritance,
}

impl SharedStateContext {
    /// Wrap `parent` with the given inheritance policy.
    pub fn new(parent: State, policy: StateInheritance) -> Self {
        Self { parent, policy }
    }

    /// The active inheritance policy.
    pub fn policy(&self) -> StateInheritance {
        self.policy
    }

    /// Borrow the wrapped parent state.
    pub fn parent(&self) -> &State {
        &self.parent
    }

    /// Assemble a fresh child state from the parent per the policy.
    ///
    /// The child is always a new, independent state: later mutations of the
    /// child never leak back into the parent.
    pub fn derive_child(&self) -> State {
        let child = State::new();
        child.merge_from(&self.parent, &self.policy);
        child
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agentflow::message::{Message, Role};
    use serde_json::json;

    #[test]
    fn clone_is_deep_and_equal() {
        let state = State::new();
        state.set("a", json!(1));
        state.add_message(Message::text(Role::User, "hi"));
        state.set_metadata("m", json!("x"));
        state.add_artifact(Artifact::text("text/plain", "blob").with_id("art-1"));

        let copy = state.clone();
        assert_eq!(state, copy);

        copy.set("a", json!(2));
        copy.add_message(Message::text(Role::Assistant, "yo"));
        assert_eq!(state.get("a"), Some(json!(1)));
        assert_eq!(state.message_count(), 1);
        assert_ne!(state, copy);
    }

    #[test]
    fn reader_sees_live_state_but_cannot_write() {
        let state = State::new();
        let reader = state.reader();
        assert!(!reader.has("k"));
        state.set("k", json!(true));
        assert!(reader.has("k"));
        assert_eq!(reader.values().len(), 1);
    }

    #[test]
    fn derive_child_respects_policy() {
        let parent = State::new();
        parent.set("v", json!(1));
        parent.add_artifact(Artifact::text("text/plain", "a").with_id("a1"));
        parent.set_metadata("m", json!(2));

        let ctx = SharedStateContext::new(parent, StateInheritance::none());
        let child = ctx.derive_child();
        assert!(child.keys().is_empty());
        assert!(child.artifacts().is_empty());
        assert!(child.all_metadata().is_empty());
    }

    #[test]
    fn payload_cap_is_enforced() {
        let state = State::new();
        state.add_artifact(Artifact::bytes("application/octet-stream", vec![0u8; 64]));
        assert!(state.validate().is_ok());
        assert!(matches!(
            state.validate_with_limit(16),
            Err(StateError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn concurrent_writers_never_tear() {
        let state = State::new();
        let mut handles = Vec::new();
        for t in 0..8 {
            // Share the same storage across threads (a plain `clone()` would
            // deep-copy and defeat the test).
            let s = State {
                inner: Arc::clone(&state.inner),
            };
            handles.push(std::thread::spawn(move || {
                for i in 0..100 {
                    s.set(format!("k{}", t), json!(i));
                    let _ = s.values();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(state.keys().len(), 8);
    }
}
