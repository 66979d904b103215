use std::collections::HashMap;

use anyhow::Result;

use crate::models::{Message, Role, Theme};
use crate::telemetry;

/** \brief Key holding the serialized conversation log. */
pub const MESSAGES_KEY: &str = "messages";
/** \brief Key holding the theme preference. */
pub const THEME_KEY: &str = "theme";

/**
 * \brief Durable key-value store, injected into the conversation store.
 */
pub trait KeyValueStore {
    fn get(&self, key: &str) -> Result<Option<String>>;
    fn set(&mut self, key: &str, value: &str) -> Result<()>;
}

/**
 * \brief Volatile store for tests and ephemeral sessions.
 */
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: HashMap<String, String>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_entry(mut self, key: &str, value: &str) -> Self {
        self.entries.insert(key.to_string(), value.to_string());
        self
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &str) -> Result<()> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

/**
 * \brief Ordered, append-only conversation log persisted after every mutation.
 * \details Write failures are logged and otherwise ignored; the in-memory log stays authoritative for the session.
 */
pub struct ConversationStore<S> {
    kv: S,
    messages: Vec<Message>,
}

impl<S: KeyValueStore> ConversationStore<S> {
    /**
     * \brief Rehydrate the log from `kv`. Missing or malformed data yields an empty log.
     */
    pub fn load(kv: S) -> Self {
        let messages = match kv.get(MESSAGES_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<Vec<Message>>(&raw) {
                Ok(messages) => messages,
                Err(err) => {
                    telemetry::log_error(
                        "store.load",
                        &format!("discarding malformed conversation log: {}", err),
                    );
                    Vec::new()
                }
            },
            Ok(None) => Vec::new(),
            Err(err) => {
                telemetry::log_error("store.load", &format!("read failed: {}", err));
                Vec::new()
            }
        };
        Self { kv, messages }
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /**
     * \brief Create a message at the end of the log and persist the whole log.
     */
    pub fn append(&mut self, role: Role, content: impl Into<String>) -> Message {
        let message = Message::new(role, content);
        self.messages.push(message.clone());
        self.persist();
        message
    }

    /**
     * \brief Drop every message and persist the empty log.
     */
    pub fn clear(&mut self) {
        self.messages.clear();
        self.persist();
    }

    pub fn kv(&self) -> &S {
        &self.kv
    }

    pub fn kv_mut(&mut self) -> &mut S {
        &mut self.kv
    }

    pub fn into_inner(self) -> S {
        self.kv
    }

    fn persist(&mut self) {
        let result = serde_json::to_string(&self.messages)
            .map_err(anyhow::Error::from)
            .and_then(|raw| self.kv.set(MESSAGES_KEY, &raw));
        if let Err(err) = result {
            telemetry::log_error("store.persist", &format!("write failed: {}", err));
        }
    }
}

/**
 * \brief Stored theme, or the system preference when none (or garbage) is stored.
 */
pub fn load_theme<S: KeyValueStore>(kv: &S, prefers_dark: bool) -> Theme {
    let fallback = if prefers_dark { Theme::Dark } else { Theme::Light };
    match kv.get(THEME_KEY) {
        Ok(Some(raw)) => Theme::parse(raw.trim()).unwrap_or(fallback),
        Ok(None) => fallback,
        Err(err) => {
            telemetry::log_error("store.theme", &format!("read failed: {}", err));
            fallback
        }
    }
}

pub fn save_theme<S: KeyValueStore>(kv: &mut S, theme: Theme) -> Result<()> {
    kv.set(THEME_KEY, theme.as_str())
}
