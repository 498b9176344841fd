//! Conversational memory: an append-only ordered log of items.
//!
//! Behavior patterns re-materialize the conversation from memory on every
//! provider turn, so the contract is deliberately small: [`Memory::add`]
//! appends, [`Memory::retrieve`] returns a defensive copy of the first N
//! items in insertion order, [`Memory::reset`] clears.
//!
//! Items are typed. A [`MemoryRecord::ChatMessage`] wraps a full
//! [`Message`]; a [`MemoryRecord::ToolCallResult`] wraps a bare result and
//! materializes as a synthesized tool-role message; a generic record wraps
//! arbitrary JSON and declines to materialize. On the wire every item is
//! `{id, type, created_at, content}`; unknown type tags round-trip verbatim
//! as generic records.
//!
//! Two stores are provided: [`InMemoryMemory`] and the whole-file-rewrite
//! [`FileMemory`]. The file store is not crash-safe by design; it trades
//! durability guarantees for a format that is trivial to inspect and edit.

use crate::message::{Message, ToolCallResultPart};
use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use uuid::Uuid;

const TAG_CHAT_MESSAGE: &str = "chat_message";
const TAG_TOOL_CALL_RESULT: &str = "tool_call_result";
const TAG_GENERIC: &str = "generic";

/// Typed content of a memory item.
#[derive(Debug, Clone, PartialEq)]
pub enum MemoryRecord {
    /// A full conversation message.
    ChatMessage(Message),
    /// A bare tool-call result; materializes as a tool-role message.
    ToolCallResult(ToolCallResultPart),
    /// Arbitrary JSON under an arbitrary tag. Unknown tags land here and are
    /// written back unchanged.
    Generic { tag: String, content: Value },
}

/// One entry in the memory log.
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryItem {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub record: MemoryRecord,
}

impl MemoryItem {
    fn new(record: MemoryRecord) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            created_at: Utc::now(),
            record,
        }
    }

    /// Wrap a conversation message.
    pub fn chat_message(message: Message) -> Self {
        Self::new(MemoryRecord::ChatMessage(message))
    }

    /// Wrap a tool-call result.
    pub fn tool_call_result(result: ToolCallResultPart) -> Self {
        Self::new(MemoryRecord::ToolCallResult(result))
    }

    /// Wrap arbitrary JSON under the default generic tag.
    pub fn generic(content: Value) -> Self {
        Self::new(MemoryRecord::Generic {
            tag: TAG_GENERIC.to_string(),
            content,
        })
    }

    /// Materialize the item as a conversation message, if it has one.
    ///
    /// Tool-call results come back as a synthesized tool-role message dated
    /// at the item's creation time. Generic items return `None`.
    pub fn as_message(&self) -> Option<Message> {
        match &self.record {
            MemoryRecord::ChatMessage(message) => Some(message.clone()),
            MemoryRecord::ToolCallResult(result) => {
                Some(Message::tool_result(result.clone(), self.created_at))
            }
            MemoryRecord::Generic { .. } => None,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct MemoryItemWire {
    id: String,
    #[serde(rename = "type")]
    tag: String,
    created_at: DateTime<Utc>,
    content: Value,
}

impl Serialize for MemoryItem {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::Error as _;
        let (tag, content) = match &self.record {
            MemoryRecord::ChatMessage(message) => (
                TAG_CHAT_MESSAGE.to_string(),
                serde_json::to_value(message).map_err(S::Error::custom)?,
            ),
            MemoryRecord::ToolCallResult(result) => (
                TAG_TOOL_CALL_RESULT.to_string(),
                serde_json::to_value(result).map_err(S::Error::custom)?,
            ),
            MemoryRecord::Generic { tag, content } => (tag.clone(), content.clone()),
        };
        MemoryItemWire {
            id: self.id.clone(),
            tag,
            created_at: self.created_at,
            content,
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for MemoryItem {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        use serde::de::Error as _;
        let wire = MemoryItemWire::deserialize(deserializer)?;
        let record = match wire.tag.as_str() {
            TAG_CHAT_MESSAGE => MemoryRecord::ChatMessage(
                serde_json::from_value(wire.content).map_err(D::Error::custom)?,
            ),
            TAG_TOOL_CALL_RESULT => MemoryRecord::ToolCallResult(
                serde_json::from_value(wire.content).map_err(D::Error::custom)?,
            ),
            _ => MemoryRecord::Generic {
                tag: wire.tag,
                content: wire.content,
            },
        };
        Ok(Self {
            id: wire.id,
            created_at: wire.created_at,
            record,
        })
    }
}

/// Retrieval options.
///
/// `limit` follows sign semantics: negative returns everything, zero returns
/// nothing, positive returns the first N items in insertion order.
#[derive(Debug, Clone, Copy)]
pub struct Retrieval {
    pub limit: i64,
}

impl Default for Retrieval {
    fn default() -> Self {
        Self { limit: -1 }
    }
}

impl Retrieval {
    /// Everything, in insertion order.
    pub fn all() -> Self {
        Self::default()
    }

    /// First `limit` items (sign semantics apply).
    pub fn with_limit(limit: i64) -> Self {
        Self { limit }
    }

    fn apply(&self, items: &[MemoryItem]) -> Vec<MemoryItem> {
        if self.limit < 0 {
            items.to_vec()
        } else {
            items.iter().take(self.limit as usize).cloned().collect()
        }
    }
}

/// Append-only ordered log of memory items.
#[async_trait]
pub trait Memory: Send + Sync {
    /// Append one item.
    async fn add(&self, item: MemoryItem) -> Result<()>;

    /// Return a copy of the stored items under the given options.
    async fn retrieve(&self, options: Retrieval) -> Result<Vec<MemoryItem>>;

    /// Remove everything.
    async fn reset(&self) -> Result<()>;
}

/// Project a memory slice onto the conversation, skipping items that decline
/// to materialize.
pub fn as_messages(items: &[MemoryItem]) -> Vec<Message> {
    items.iter().filter_map(MemoryItem::as_message).collect()
}

/// Mutex-guarded in-process store.
#[derive(Default)]
pub struct InMemoryMemory {
    items: Mutex<Vec<MemoryItem>>,
}

impl InMemoryMemory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Memory for InMemoryMemory {
    async fn add(&self, item: MemoryItem) -> Result<()> {
        self.items.lock().expect("memory poisoned").push(item);
        Ok(())
    }

    async fn retrieve(&self, options: Retrieval) -> Result<Vec<MemoryItem>> {
        let items = self.items.lock().expect("memory poisoned");
        Ok(options.apply(&items))
    }

    async fn reset(&self) -> Result<()> {
        self.items.lock().expect("memory poisoned").clear();
        Ok(())
    }
}

/// File-backed store with the same semantics as [`InMemoryMemory`].
///
/// Every `add`/`reset` rewrites the whole file as a JSON array of encoded
/// items; loads take a read lock. Not crash-safe: a torn write loses the
/// log.
pub struct FileMemory {
    path: PathBuf,
    lock: RwLock<()>,
}

impl FileMemory {
    /// Open a store at the given path. The file is created on first `add`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: RwLock::new(()),
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<Vec<MemoryItem>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&self.path)?;
        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&raw).map_err(Error::from)
    }

    fn store(&self, items: &[MemoryItem]) -> Result<()> {
        let encoded = serde_json::to_string_pretty(items)?;
        std::fs::write(&self.path, encoded)?;
        Ok(())
    }
}

#[async_trait]
impl Memory for FileMemory {
    async fn add(&self, item: MemoryItem) -> Result<()> {
        let _guard = self.lock.write().expect("file memory poisoned");
        let mut items = self.load()?;
        items.push(item);
        self.store(&items)
    }

    async fn retrieve(&self, options: Retrieval) -> Result<Vec<MemoryItem>> {
        let _guard = self.lock.read().expect("file memory poisoned");
        Ok(options.apply(&self.load()?))
    }

    async fn reset(&self) -> Result<()> {
        let _guard = self.lock.write().expect("file memory poisoned");
        self.store(&[])
    }
}
