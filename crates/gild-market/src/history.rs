use async_trait::async_trait;
use gild_disputes::ProjectHistory;
use gild_types::EscrowId;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-memory conversation log serving as the evidence source for
/// adjudication. Entries are kept in arrival order per escrow.
#[derive(Default)]
pub struct ConversationLog {
    messages: RwLock<HashMap<EscrowId, Vec<String>>>,
    proposals: RwLock<HashMap<EscrowId, Vec<String>>>,
}

impl ConversationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_message(&self, escrow: EscrowId, text: String) {
        self.messages
            .write()
            .await
            .entry(escrow)
            .or_default()
            .push(text);
    }

    pub async fn add_proposal(&self, escrow: EscrowId, text: String) {
        self.proposals
            .write()
            .await
            .entry(escrow)
            .or_default()
            .push(text);
    }

    pub async fn message_count(&self, escrow: EscrowId) -> usize {
        self.messages
            .read()
            .await
            .get(&escrow)
            .map(Vec::len)
            .unwrap_or(0)
    }

    fn tail(entries: Option<&Vec<String>>, cap: usize) -> Vec<String> {
        match entries {
            Some(list) => {
                let start = list.len().saturating_sub(cap);
                list[start..].to_vec()
            }
            None => Vec::new(),
        }
    }
}

#[async_trait]
impl ProjectHistory for ConversationLog {
    async fn recent_messages(
        &self,
        escrow: EscrowId,
        cap: usize,
    ) -> gild_disputes::Result<Vec<String>> {
        let messages = self.messages.read().await;
        Ok(Self::tail(messages.get(&escrow), cap))
    }

    async fn recent_proposals(
        &self,
        escrow: EscrowId,
        cap: usize,
    ) -> gild_disputes::Result<Vec<String>> {
        let proposals = self.proposals.read().await;
        Ok(Self::tail(proposals.get(&escrow), cap))
    }
}
