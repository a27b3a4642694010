use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::error::SessionError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
}

/// One persisted conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    #[serde(default)]
    pub messages: Vec<ConversationMessage>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    fn new(id: &str, now: DateTime<Utc>) -> Self {
        Self {
            id: id.to_string(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Session ids name files, so only `[A-Za-z0-9_-]{1,128}` is accepted.
pub fn validate_session_id(id: &str) -> Result<(), SessionError> {
    let valid = !id.is_empty()
        && id.len() <= 128
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if valid {
        Ok(())
    } else {
        Err(SessionError::InvalidId(id.to_string()))
    }
}

/// Conversation history, cached in memory and persisted one JSON file per
/// session.
pub struct ConversationStore {
    root: PathBuf,
    max_history: usize,
    expiry: Duration,
    cache: RwLock<HashMap<String, Conversation>>,
    /// Held across every file write and removal
    disk: Mutex<()>,
}

impl ConversationStore {
    pub async fn open(
        root: impl Into<PathBuf>,
        max_history: usize,
        expiry: Duration,
    ) -> Result<Self, SessionError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        info!("Conversation store at {}", root.display());
        Ok(Self {
            root,
            max_history: max_history.max(1),
            expiry,
            cache: RwLock::new(HashMap::new()),
            disk: Mutex::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, id: &str) -> Result<PathBuf, SessionError> {
        validate_session_id(id)?;
        Ok(self.root.join(format!("{}.json", id)))
    }

    async fn read_file(&self, id: &str) -> Result<Option<Conversation>, SessionError> {
        let path = self.path_for(id)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn write_file(&self, conversation: &Conversation) -> Result<(), SessionError> {
        let path = self.path_for(&conversation.id)?;
        let json = serde_json::to_vec_pretty(conversation)?;
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    /// Load a conversation from cache or disk.
    pub async fn load(&self, id: &str) -> Result<Option<Conversation>, SessionError> {
        if let Some(conv) = self.cache.read().await.get(id) {
            return Ok(Some(conv.clone()));
        }
        let loaded = self.read_file(id).await?;
        if let Some(conv) = &loaded {
            self.cache
                .write()
                .await
                .insert(id.to_string(), conv.clone());
        }
        Ok(loaded)
    }

    /// Append one message, trimming to the most recent `max_history`.
    pub async fn append(
        &self,
        id: &str,
        role: Role,
        content: &str,
        intent: Option<&str>,
    ) -> Result<(), SessionError> {
        self.append_many(id, &[(role, content, intent)]).await
    }

    /// Record a full user/assistant exchange in one write.
    pub async fn record_interaction(
        &self,
        id: &str,
        user_text: &str,
        intent: Option<&str>,
        assistant_text: &str,
    ) -> Result<(), SessionError> {
        self.append_many(
            id,
            &[
                (Role::User, user_text, intent),
                (Role::Assistant, assistant_text, None),
            ],
        )
        .await
    }

    async fn append_many(
        &self,
        id: &str,
        entries: &[(Role, &str, Option<&str>)],
    ) -> Result<(), SessionError> {
        self.path_for(id)?;
        let existing = if self.cache.read().await.contains_key(id) {
            None
        } else {
            self.read_file(id).await?
        };

        let mut cache = self.cache.write().await;
        let now = Utc::now();
        let conv = cache
            .entry(id.to_string())
            .or_insert_with(|| existing.unwrap_or_else(|| Conversation::new(id, now)));

        for (role, content, intent) in entries {
            conv.messages.push(ConversationMessage {
                role: *role,
                content: content.to_string(),
                timestamp: now,
                intent: intent.map(str::to_string),
            });
        }
        conv.updated_at = now;

        if conv.messages.len() > self.max_history {
            let excess = conv.messages.len() - self.max_history;
            conv.messages.drain(..excess);
        }

        drop(cache);

        // Whoever gets the disk lock writes the newest state, so an older
        // snapshot never lands after a newer one.
        let _disk = self.disk.lock().await;
        let latest = self.cache.read().await.get(id).cloned();
        match latest {
            Some(conv) => self.write_file(&conv).await,
            None => Ok(()),
        }
    }

    /// The last `limit` messages, or all of them when `limit` is zero.
    pub async fn history(
        &self,
        id: &str,
        limit: usize,
    ) -> Result<Vec<ConversationMessage>, SessionError> {
        let messages = self
            .load(id)
            .await?
            .map(|c| c.messages)
            .unwrap_or_default();
        if limit > 0 && messages.len() > limit {
            Ok(messages[messages.len() - limit..].to_vec())
        } else {
            Ok(messages)
        }
    }

    pub async fn clear(&self, id: &str) -> Result<(), SessionError> {
        let path = self.path_for(id)?;
        let _disk = self.disk.lock().await;
        self.cache.write().await.remove(id);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove every conversation idle for longer than the expiry window.
    /// Returns how many were removed.
    pub async fn expire_idle(&self, now: DateTime<Utc>) -> Result<usize, SessionError> {
        let expiry = chrono::Duration::from_std(self.expiry)
            .unwrap_or_else(|_| chrono::Duration::weeks(52 * 100));
        let is_expired = |updated: DateTime<Utc>| now.signed_duration_since(updated) > expiry;

        let mut expired: Vec<String> = {
            let cache = self.cache.read().await;
            cache
                .values()
                .filter(|c| is_expired(c.updated_at))
                .map(|c| c.id.clone())
                .collect()
        };

        // Sessions persisted by an earlier process are only on disk.
        let mut dir = tokio::fs::read_dir(&self.root).await?;
        while let Some(entry) = dir.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Some(id) = path.file_stem().and_then(|s| s.to_str()).map(str::to_string) else {
                continue;
            };
            if expired.contains(&id) || self.cache.read().await.contains_key(&id) {
                continue;
            }
            match self.read_file(&id).await {
                Ok(Some(conv)) if is_expired(conv.updated_at) => expired.push(id),
                Ok(_) => {}
                Err(e) => warn!("Skipping unreadable session file {}: {}", path.display(), e),
            }
        }

        for id in &expired {
            if let Err(e) = self.clear(id).await {
                warn!("Failed to remove expired session {}: {}", id, e);
            }
        }

        if expired.is_empty() {
            debug!("No expired sessions");
        } else {
            info!("Cleaned up {} expired sessions", expired.len());
        }
        Ok(expired.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    async fn store(dir: &TempDir, max_history: usize) -> ConversationStore {
        ConversationStore::open(dir.path(), max_history, Duration::from_secs(3600))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn appends_persist_across_instances() {
        let dir = TempDir::new().unwrap();
        {
            let s = store(&dir, 10).await;
            s.record_interaction("abc", "打开音乐", Some("open_app"), "好的")
                .await
                .unwrap();
        }
        let s = store(&dir, 10).await;
        let history = s.history("abc", 0).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, Role::User);
        assert_eq!(history[0].intent.as_deref(), Some("open_app"));
        assert_eq!(history[1].content, "好的");
    }

    #[tokio::test]
    async fn history_is_trimmed_to_most_recent() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir, 3).await;
        for i in 0..5 {
            s.append("t", Role::User, &format!("m{i}"), None).await.unwrap();
        }
        let all = s.history("t", 0).await.unwrap();
        let contents: Vec<_> = all.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["m2", "m3", "m4"]);

        let last = s.history("t", 1).await.unwrap();
        assert_eq!(last[0].content, "m4");
    }

    #[tokio::test]
    async fn unknown_session_has_empty_history() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir, 3).await;
        assert!(s.history("nobody", 0).await.unwrap().is_empty());
        assert!(s.load("nobody").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn path_like_ids_are_rejected() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir, 3).await;
        for bad in ["../etc", "a/b", ""] {
            assert!(matches!(
                s.append(bad, Role::User, "x", None).await,
                Err(SessionError::InvalidId(_))
            ));
        }
    }

    #[tokio::test]
    async fn expire_idle_removes_old_sessions_only() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir, 10).await;
        s.append("old", Role::User, "hi", None).await.unwrap();
        s.append("new", Role::User, "hi", None).await.unwrap();

        {
            let mut cache = s.cache.write().await;
            let conv = cache.get_mut("old").unwrap();
            conv.updated_at = Utc::now() - chrono::Duration::hours(2);
        }

        let removed = s.expire_idle(Utc::now()).await.unwrap();
        assert_eq!(removed, 1);
        assert!(s.load("old").await.unwrap().is_none());
        assert!(!dir.path().join("old.json").exists());
        assert!(s.load("new").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn expire_idle_sees_sessions_only_on_disk() {
        let dir = TempDir::new().unwrap();
        {
            let s = store(&dir, 10).await;
            s.append("stale", Role::User, "hi", None).await.unwrap();
        }
        let s = store(&dir, 10).await;
        let later = Utc::now() + chrono::Duration::hours(3);
        assert_eq!(s.expire_idle(later).await.unwrap(), 1);
        assert!(!dir.path().join("stale.json").exists());
    }

    #[tokio::test]
    async fn concurrent_appends_all_succeed_and_persist() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir, 100).await;

        let writes = (0..40).map(|i| {
            let s = &s;
            async move { s.append("same", Role::User, &format!("m{i}"), None).await }
        });
        for result in futures::future::join_all(writes).await {
            result.unwrap();
        }

        let reopened = store(&dir, 100).await;
        assert_eq!(reopened.history("same", 0).await.unwrap().len(), 40);
        assert!(!dir.path().join("same.json.tmp").exists());
    }

    #[test]
    fn session_id_rules() {
        assert!(validate_session_id("session-1b2c_X").is_ok());
        assert!(validate_session_id(&"a".repeat(129)).is_err());
        assert!(validate_session_id("a.b").is_err());
    }

    #[tokio::test]
    async fn clear_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let s = store(&dir, 10).await;
        s.append("c", Role::Assistant, "x", None).await.unwrap();
        s.clear("c").await.unwrap();
        s.clear("c").await.unwrap();
        assert!(s.history("c", 0).await.unwrap().is_empty());
    }
}
