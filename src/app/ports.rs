use async_trait::async_trait;
use serde::Serialize;
use std::path::PathBuf;

/// A composed report ready to hand to a delivery channel
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ReportMessage {
    pub run_id: String,
    pub to: Vec<String>,
    pub subject: String,
    pub html_body: String,
    pub attachments: Vec<PathBuf>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct DeliveryReceipt {
    /// Where the message ended up, as the channel describes it
    pub location: String,
    pub recipients: usize,
    pub attachments: usize,
}

// Delivery-side port
#[async_trait]
pub trait DeliveryPort: Send + Sync {
    async fn deliver(&self, message: &ReportMessage) -> anyhow::Result<DeliveryReceipt>;
}
