use crate::models::Turn;
use tokio::sync::RwLock;

/// Ordered question/answer log for one session.
///
/// A question and its answer are appended together under one write lock, so a
/// reader never sees a human turn without the assistant turn that answers it.
#[derive(Debug, Default)]
pub struct ConversationMemory {
    turns: RwLock<Vec<Turn>>,
}

impl ConversationMemory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn recall(&self) -> Vec<Turn> {
        self.turns.read().await.clone()
    }

    pub async fn record(&self, question: impl Into<String>, answer: impl Into<String>) {
        let mut turns = self.turns.write().await;
        turns.push(Turn::human(question));
        turns.push(Turn::assistant(answer));
    }

    pub async fn reset(&self) {
        self.turns.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.turns.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.turns.read().await.is_empty()
    }
}
