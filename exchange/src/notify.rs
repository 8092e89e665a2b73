//! Outbound messages to the messaging front-end

use crate::Result;
use async_trait::async_trait;
use ledger_core::AccountId;
use parking_lot::Mutex;
use tracing::info;

/// Push channel back to participants
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Send a text message to an account
    async fn notify(&self, account: AccountId, text: &str) -> Result<()>;

    /// Withdraw the offer currently shown to an account
    async fn dismiss(&self, account: AccountId) -> Result<()>;
}

/// Notifier that only writes to the log
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, account: AccountId, text: &str) -> Result<()> {
        info!(account_id = %account, text, "Notify");
        Ok(())
    }

    async fn dismiss(&self, account: AccountId) -> Result<()> {
        info!(account_id = %account, "Offer dismissed");
        Ok(())
    }
}

/// Something a [`RecordingNotifier`] saw
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// Text message
    Message(AccountId, String),
    /// Offer dismissal
    Dismissed(AccountId),
}

/// Notifier that keeps every delivery in memory
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    deliveries: Mutex<Vec<Delivery>>,
}

impl RecordingNotifier {
    /// Empty recorder
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything delivered so far
    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().clone()
    }

    /// Messages delivered to one account
    pub fn messages_for(&self, account: AccountId) -> Vec<String> {
        self.deliveries
            .lock()
            .iter()
            .filter_map(|delivery| match delivery {
                Delivery::Message(to, text) if *to == account => Some(text.clone()),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, account: AccountId, text: &str) -> Result<()> {
        self.deliveries
            .lock()
            .push(Delivery::Message(account, text.to_string()));
        Ok(())
    }

    async fn dismiss(&self, account: AccountId) -> Result<()> {
        self.deliveries.lock().push(Delivery::Dismissed(account));
        Ok(())
    }
}
