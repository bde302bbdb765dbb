//! Per-thread conversation memory.
//!
//! Each thread id maps to the full message history the agent has seen, including tool
//! requests and tool responses, so a follow-up question continues where the last turn ended.
//! Only the most recently used threads are kept.

use lru::LruCache;
use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::models::message::{Message, MessageContent};

pub const DEFAULT_MAX_THREADS: usize = 1000;

#[derive(Clone)]
pub struct ThreadStore {
    threads: Arc<RwLock<LruCache<String, Vec<Message>>>>,
}

impl Default for ThreadStore {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_MAX_THREADS)
    }
}

impl ThreadStore {
    /// Keep at most `max_threads` threads, dropping the least recently used first
    pub fn with_capacity(max_threads: usize) -> Self {
        let capacity = NonZeroUsize::new(max_threads).unwrap_or(NonZeroUsize::MIN);
        Self {
            threads: Arc::new(RwLock::new(LruCache::new(capacity))),
        }
    }

    /// Number of known threads
    pub async fn len(&self) -> usize {
        self.threads.read().await.len()
    }

    /// Start a turn and return it with the conversation to send to the agent.
    ///
    /// A thread seen for the first time starts from `transcript` (the client's view of the
    /// conversation so far); a known thread continues with the new `user` message. Nothing is
    /// stored until the turn is committed.
    pub async fn begin_turn(
        &self,
        thread_id: &str,
        transcript: Vec<Message>,
        user: Message,
    ) -> Turn {
        let history = self
            .threads
            .write()
            .await
            .get(thread_id)
            .filter(|history| !history.is_empty())
            .cloned();

        let (opening, conversation) = match history {
            Some(mut history) => {
                history.push(user.clone());
                (vec![user], history)
            }
            None => (transcript.clone(), transcript),
        };

        Turn {
            thread_id: thread_id.to_string(),
            opening,
            conversation,
            replies: Vec::new(),
        }
    }

    /// Store what a turn added to its thread.
    ///
    /// Agent replies are kept up to the last point where every tool request has its response;
    /// a turn that is dropped instead of committed leaves the thread as it was.
    pub async fn commit(&self, turn: Turn) {
        let Turn {
            thread_id,
            opening,
            mut replies,
            ..
        } = turn;
        replies.truncate(answered_len(&replies));

        let mut threads = self.threads.write().await;
        if let Some(history) = threads.get_mut(&thread_id) {
            history.extend(opening);
            history.extend(replies);
            return;
        }

        let mut history = opening;
        history.extend(replies);
        if let Some((evicted, _)) = threads.push(thread_id, history) {
            tracing::debug!(thread_id = %evicted, "dropped least recently used thread");
        }
    }
}

/// One chat turn in progress
#[derive(Debug)]
pub struct Turn {
    thread_id: String,
    opening: Vec<Message>,
    conversation: Vec<Message>,
    replies: Vec<Message>,
}

impl Turn {
    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    /// Stored history plus the new question
    pub fn conversation(&self) -> &[Message] {
        &self.conversation
    }

    /// Note a message the agent produced during this turn
    pub fn record(&mut self, message: Message) {
        self.replies.push(message);
    }
}

/// Length of the longest prefix in which every tool request has been answered
fn answered_len(messages: &[Message]) -> usize {
    let mut pending = HashSet::new();
    let mut len = 0;
    for (i, message) in messages.iter().enumerate() {
        for content in &message.content {
            match content {
                MessageContent::ToolRequest(request) => {
                    pending.insert(request.id.as_str());
                }
                MessageContent::ToolResponse(response) => {
                    pending.remove(response.id.as_str());
                }
                MessageContent::Text(_) => {}
            }
        }
        if pending.is_empty() {
            len = i + 1;
        }
    }
    len
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::content::Content;
    use crate::models::tool::ToolCall;
    use serde_json::json;

    async fn history(store: &ThreadStore, thread_id: &str) -> Vec<Message> {
        store
            .threads
            .read()
            .await
            .peek(thread_id)
            .cloned()
            .unwrap_or_default()
    }

    fn tool_request(id: &str) -> Message {
        Message::assistant()
            .with_tool_request(id, Ok(ToolCall::new("kubernetes__list_pods", json!({}))))
    }

    fn tool_response(id: &str) -> Message {
        Message::user().with_tool_response(id, Ok(vec![Content::text("{\"pods\": []}")]))
    }

    #[tokio::test]
    async fn test_begin_turn_seeds_then_appends() {
        let store = ThreadStore::default();
        let transcript = vec![
            Message::user().with_text("earlier question"),
            Message::assistant().with_text("earlier answer"),
            Message::user().with_text("any alerts?"),
        ];

        let mut first = store
            .begin_turn("t1", transcript, Message::user().with_text("any alerts?"))
            .await;
        assert_eq!(first.conversation().len(), 3);
        assert_eq!(first.thread_id(), "t1");
        // nothing is stored before the commit
        assert_eq!(store.len().await, 0);

        first.record(Message::assistant().with_text("none"));
        store.commit(first).await;
        assert_eq!(history(&store, "t1").await.len(), 4);

        // the client resends its whole transcript, only the new question is kept
        let second = store
            .begin_turn(
                "t1",
                vec![Message::user().with_text("ignored")],
                Message::user().with_text("and incidents?"),
            )
            .await;
        assert_eq!(second.conversation().len(), 5);
        assert_eq!(second.conversation()[4].text(), "and incidents?");
        store.commit(second).await;

        let stored = history(&store, "t1").await;
        assert_eq!(stored.len(), 5);
        assert_eq!(stored[3].text(), "none");
        assert!(history(&store, "t2").await.is_empty());
    }

    #[tokio::test]
    async fn test_dropped_turn_leaves_thread_untouched() {
        let store = ThreadStore::default();
        let mut turn = store
            .begin_turn(
                "t1",
                vec![Message::user().with_text("a")],
                Message::user().with_text("a"),
            )
            .await;
        turn.record(Message::assistant().with_text("b"));
        store.commit(turn).await;

        let mut turn = store
            .begin_turn("t1", vec![], Message::user().with_text("pods?"))
            .await;
        turn.record(tool_request("c1"));
        drop(turn);

        let stored = history(&store, "t1").await;
        assert_eq!(stored.len(), 2);
        assert_eq!(stored[1].text(), "b");
    }

    #[tokio::test]
    async fn test_unanswered_tool_requests_are_not_stored() {
        let store = ThreadStore::default();
        let mut turn = store
            .begin_turn(
                "t1",
                vec![Message::user().with_text("pods?")],
                Message::user().with_text("pods?"),
            )
            .await;
        turn.record(tool_request("c1"));
        turn.record(tool_response("c1"));
        turn.record(tool_request("c2"));
        store.commit(turn).await;

        let stored = history(&store, "t1").await;
        assert_eq!(stored.len(), 3);
        assert!(stored[2].content[0].as_tool_response_text().is_some());
    }

    #[tokio::test]
    async fn test_least_recently_used_thread_is_dropped() {
        let store = ThreadStore::with_capacity(2);
        for id in ["t1", "t2"] {
            let turn = store
                .begin_turn(
                    id,
                    vec![Message::user().with_text(id)],
                    Message::user().with_text(id),
                )
                .await;
            store.commit(turn).await;
        }

        // continuing t1 makes t2 the oldest
        let turn = store
            .begin_turn("t1", vec![], Message::user().with_text("again"))
            .await;
        store.commit(turn).await;
        let turn = store
            .begin_turn(
                "t3",
                vec![Message::user().with_text("t3")],
                Message::user().with_text("t3"),
            )
            .await;
        store.commit(turn).await;

        assert_eq!(store.len().await, 2);
        assert_eq!(history(&store, "t1").await.len(), 2);
        assert!(history(&store, "t2").await.is_empty());
        assert_eq!(history(&store, "t3").await.len(), 1);
    }
}
