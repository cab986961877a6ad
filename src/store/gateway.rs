//! Persistence gateway: fire-and-forget saves applied by one writer task.
//!
//! Callers never wait on the database. Writes are applied in the order they
//! were issued, so a later transcript snapshot is never overwritten by an
//! earlier one. Failures are logged and dropped.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::traits::{ChatTranscript, Database};

enum WriteOp {
    Transcript(ChatTranscript),
    Group { user_email: String, group: String },
    Flush(oneshot::Sender<()>),
}

/// Cloneable handle to the background writer.
#[derive(Clone)]
pub struct PersistenceGateway {
    tx: mpsc::UnboundedSender<WriteOp>,
}

impl PersistenceGateway {
    /// Spawn the writer task. It exits once every handle is dropped.
    pub fn spawn(db: Arc<dyn Database>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(writer_loop(db, rx));
        (Self { tx }, handle)
    }

    /// Queue a transcript upsert.
    pub fn save_transcript(&self, transcript: ChatTranscript) {
        self.send(WriteOp::Transcript(transcript));
    }

    /// Queue a group assignment upsert.
    pub fn save_group(&self, user_email: impl Into<String>, group: impl Into<String>) {
        self.send(WriteOp::Group {
            user_email: user_email.into(),
            group: group.into(),
        });
    }

    /// Wait until every write queued before this call has been attempted.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        self.send(WriteOp::Flush(ack_tx));
        let _ = ack_rx.await;
    }

    fn send(&self, op: WriteOp) {
        if self.tx.send(op).is_err() {
            warn!("Persistence writer is gone, dropping write");
        }
    }
}

async fn writer_loop(db: Arc<dyn Database>, mut rx: mpsc::UnboundedReceiver<WriteOp>) {
    while let Some(op) = rx.recv().await {
        match op {
            WriteOp::Transcript(transcript) => {
                if let Err(e) = db.upsert_chat_session(&transcript).await {
                    warn!(
                        session_id = %transcript.session_id,
                        error = %e,
                        "Failed to save chat session"
                    );
                }
            }
            WriteOp::Group { user_email, group } => {
                if let Err(e) = db.upsert_user_group(&user_email, &group).await {
                    warn!(user_email = %user_email, error = %e, "Failed to save user group");
                }
            }
            WriteOp::Flush(ack) => {
                let _ = ack.send(());
            }
        }
    }
    debug!("Persistence writer stopped");
}
