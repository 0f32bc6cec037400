//! Async WebSocket client for the live poll server.
//!
//! Requests carry an id and resolve when the matching acknowledgement
//! arrives; pushed events are delivered on a separate bounded channel. A
//! consumer that falls behind loses events, never acknowledgements.

mod error;
mod state;

pub use error::ClientError;
pub use state::{ClientState, StudentIdentity};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use livepoll_core::ids::{PollId, StudentId};
use livepoll_core::poll::PollDraft;
use livepoll_core::protocol::{AckFrame, InboundEvent, ServerEvent, ServerMessage};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(10);
const EVENT_BUFFER: usize = 256;

type Pending = Arc<DashMap<u64, oneshot::Sender<AckFrame>>>;

/// Acknowledgement of `student:join`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct JoinAck {
    pub has_answered: bool,
    pub rejoined: bool,
}

pub struct PollClient {
    outbound: mpsc::Sender<Message>,
    pending: Pending,
    next_id: AtomicU64,
    ack_timeout: Duration,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl PollClient {
    /// Connect and return the client plus the stream of pushed events.
    pub async fn connect(url: &str) -> Result<(Self, mpsc::Receiver<ServerEvent>), ClientError> {
        let (ws, _) = connect_async(url).await?;
        let (mut sink, mut stream) = ws.split();
        let (outbound, mut outbound_rx) = mpsc::channel::<Message>(EVENT_BUFFER);
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let pending: Pending = Arc::new(DashMap::new());

        let writer = tokio::spawn(async move {
            while let Some(msg) = outbound_rx.recv().await {
                if sink.send(msg).await.is_err() {
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let reader_pending = Arc::clone(&pending);
        let reader = tokio::spawn(async move {
            while let Some(Ok(msg)) = stream.next().await {
                let Message::Text(text) = msg else { continue };
                match serde_json::from_str::<ServerMessage>(&text) {
                    Ok(ServerMessage::Ack(ack)) => {
                        if let Some((_, waiter)) = reader_pending.remove(&ack.ack) {
                            let _ = waiter.send(ack);
                        }
                    }
                    // Acks share this task, so a slow event consumer must
                    // never stall it.
                    Ok(ServerMessage::Event(event)) => match events_tx.try_send(event) {
                        Ok(()) => {}
                        Err(mpsc::error::TrySendError::Full(event)) => {
                            tracing::warn!(event = event.name(), "event queue full, dropped");
                        }
                        Err(mpsc::error::TrySendError::Closed(_)) => {
                            tracing::debug!("event receiver dropped");
                        }
                    },
                    Err(e) => tracing::warn!(error = %e, "undecodable server frame"),
                }
            }
            // Fail every outstanding request.
            reader_pending.clear();
        });

        let client = Self {
            outbound,
            pending,
            next_id: AtomicU64::new(1),
            ack_timeout: DEFAULT_ACK_TIMEOUT,
            reader,
            writer,
        };
        Ok((client, events_rx))
    }

    pub fn with_ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Send an event and wait for its acknowledgement. Returns the ack body
    /// on success.
    pub async fn request(&self, event: InboundEvent) -> Result<Value, ClientError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        let _ = self.pending.insert(id, tx);

        if let Err(e) = self.push(event, Some(id)).await {
            let _ = self.pending.remove(&id);
            return Err(e);
        }

        let ack = match tokio::time::timeout(self.ack_timeout, rx).await {
            Ok(Ok(ack)) => ack,
            Ok(Err(_)) => return Err(ClientError::Closed),
            Err(_) => {
                let _ = self.pending.remove(&id);
                return Err(ClientError::Timeout(self.ack_timeout));
            }
        };

        if ack.is_success() {
            Ok(ack.data)
        } else {
            Err(ClientError::Rejected {
                code: ack.error_code().unwrap_or_default().to_string(),
                message: ack.error_message().unwrap_or_default().to_string(),
            })
        }
    }

    /// Send an event without asking for an acknowledgement. Failures come
    /// back as `poll:error` events.
    pub async fn notify(&self, event: InboundEvent) -> Result<(), ClientError> {
        self.push(event, None).await
    }

    pub async fn join_teacher(&self) -> Result<(), ClientError> {
        self.request(InboundEvent::TeacherJoin).await.map(|_| ())
    }

    pub async fn join_student(
        &self,
        student_id: StudentId,
        student_name: impl Into<String>,
    ) -> Result<JoinAck, ClientError> {
        let ack = self
            .request(InboundEvent::StudentJoin {
                student_id,
                student_name: student_name.into(),
            })
            .await?;
        Ok(JoinAck {
            has_answered: flag(&ack, "hasAnswered"),
            rejoined: flag(&ack, "rejoined"),
        })
    }

    pub async fn create_poll(&self, draft: PollDraft) -> Result<PollId, ClientError> {
        let ack = self.request(InboundEvent::CreatePoll(draft)).await?;
        Ok(poll_id(&ack))
    }

    pub async fn close_poll(&self) -> Result<PollId, ClientError> {
        let ack = self.request(InboundEvent::ClosePoll).await?;
        Ok(poll_id(&ack))
    }

    /// Returns whether a roster row was removed.
    pub async fn kick(&self, student_id: StudentId) -> Result<bool, ClientError> {
        let ack = self.request(InboundEvent::Kick { student_id }).await?;
        Ok(flag(&ack, "removed"))
    }

    /// Returns whether the answer was correct.
    pub async fn answer(&self, answer: impl Into<String>) -> Result<bool, ClientError> {
        let ack = self
            .request(InboundEvent::Answer {
                answer: answer.into(),
            })
            .await?;
        Ok(flag(&ack, "isCorrect"))
    }

    pub async fn close(self) {
        let _ = self.outbound.send(Message::Close(None)).await;
        drop(self.outbound);
        let _ = self.writer.await;
        self.reader.abort();
    }

    async fn push(&self, event: InboundEvent, id: Option<u64>) -> Result<(), ClientError> {
        let text = serde_json::to_string(&event.into_frame(id))?;
        self.outbound
            .send(Message::text(text))
            .await
            .map_err(|_| ClientError::Closed)
    }
}

fn flag(ack: &Value, key: &str) -> bool {
    ack.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn poll_id(ack: &Value) -> PollId {
    PollId::from_raw(ack.get("pollId").and_then(Value::as_str).unwrap_or_default())
}
