use crate::app::ports::{DeliveryPort, DeliveryReceipt, ReportMessage};
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::info;

pub const MESSAGE_FILE: &str = "message.html";
pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttachmentEntry {
    pub file_name: String,
    pub bytes: u64,
    pub sha256: String,
}

/// Sidecar describing one queued message for the mail transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxManifest {
    pub run_id: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<AttachmentEntry>,
}

/// File-based implementation of DeliveryPort.
/// Each message becomes a directory `<outbox>/<run_id>/` holding the HTML
/// body, copies of the attachments and a JSON manifest.
pub struct OutboxDelivery {
    outbox_dir: PathBuf,
}

impl OutboxDelivery {
    pub fn new(outbox_dir: impl Into<PathBuf>) -> Self {
        Self {
            outbox_dir: outbox_dir.into(),
        }
    }

    pub fn outbox_dir(&self) -> &Path {
        &self.outbox_dir
    }

    async fn queue_attachment(&self, message_dir: &Path, source: &Path) -> Result<AttachmentEntry> {
        let file_name = source
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("Attachment path has no file name: {}", source.display()))?
            .to_string();

        let bytes = tokio::fs::read(source)
            .await
            .with_context(|| format!("Failed to read attachment {}", source.display()))?;
        tokio::fs::write(message_dir.join(&file_name), &bytes).await?;

        Ok(AttachmentEntry {
            file_name,
            bytes: bytes.len() as u64,
            sha256: hex::encode(Sha256::digest(&bytes)),
        })
    }
}

#[async_trait]
impl DeliveryPort for OutboxDelivery {
    async fn deliver(&self, message: &ReportMessage) -> Result<DeliveryReceipt> {
        let message_dir = self.outbox_dir.join(&message.run_id);
        tokio::fs::create_dir_all(&message_dir)
            .await
            .with_context(|| format!("Failed to create outbox {}", message_dir.display()))?;

        let mut attachments = Vec::with_capacity(message.attachments.len());
        for path in &message.attachments {
            attachments.push(self.queue_attachment(&message_dir, path).await?);
        }

        tokio::fs::write(message_dir.join(MESSAGE_FILE), &message.html_body).await?;

        let manifest = OutboxManifest {
            run_id: message.run_id.clone(),
            to: message.to.clone(),
            subject: message.subject.clone(),
            body: MESSAGE_FILE.to_string(),
            attachments,
        };
        let manifest_json = serde_json::to_vec_pretty(&manifest)?;
        tokio::fs::write(message_dir.join(MANIFEST_FILE), manifest_json).await?;

        info!(
            outbox = %message_dir.display(),
            recipients = manifest.to.len(),
            attachments = manifest.attachments.len(),
            "Report queued for delivery"
        );

        Ok(DeliveryReceipt {
            location: message_dir.display().to_string(),
            recipients: manifest.to.len(),
            attachments: manifest.attachments.len(),
        })
    }
}
