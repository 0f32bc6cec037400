//! The poll session actor.
//!
//! One task owns the current poll, the roster, the answer ledger and the
//! auto-close timer. Transports and timers talk to it through [`Command`]s,
//! and every command runs to completion before the next is taken, so the
//! observable state never has two active polls or a half-applied answer.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use livepoll_core::errors::PollError;
use livepoll_core::ids::{ConnectionId, PollId, StudentId};
use livepoll_core::ledger::{Answer, AnswerLedger};
use livepoll_core::poll::{Poll, PollDraft};
use livepoll_core::protocol::{
    AckFrame, AnswerNotice, ErrorNotice, InboundEvent, InboundFrame, KickNotice, ServerEvent,
    StudentNotice, POLL_ANSWER,
};
use livepoll_core::results::{aggregate, PollResults};
use livepoll_core::roster::{ConnectionRegistry, Role};
use livepoll_telemetry::MetricsRecorder;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::fanout::{Audience, Fanout};

pub const KICK_MESSAGE: &str = "You have been removed from the poll by the teacher";

#[derive(Debug)]
pub enum Command {
    /// Raw text frame from a connection.
    Frame { conn: ConnectionId, text: String },
    Disconnect { conn: ConnectionId },
    /// Sent by the timer armed for `poll_id`.
    PollExpired { poll_id: PollId },
}

/// Read-only view published after every command.
#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PollSnapshot {
    pub poll: Option<Poll>,
    pub results: Option<PollResults>,
    pub students: usize,
}

#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<Command>,
    snapshot: watch::Receiver<PollSnapshot>,
}

impl SessionHandle {
    /// Returns false once the session has stopped.
    pub async fn frame(&self, conn: ConnectionId, text: String) -> bool {
        self.tx.send(Command::Frame { conn, text }).await.is_ok()
    }

    pub async fn disconnect(&self, conn: ConnectionId) {
        if self.tx.send(Command::Disconnect { conn }).await.is_err() {
            debug!("session stopped before disconnect was delivered");
        }
    }

    pub fn snapshot(&self) -> PollSnapshot {
        self.snapshot.borrow().clone()
    }

}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CloseReason {
    Timer,
    Manual,
    Replaced,
}

impl CloseReason {
    fn as_str(self) -> &'static str {
        match self {
            Self::Timer => "timer",
            Self::Manual => "manual",
            Self::Replaced => "replaced",
        }
    }
}

/// Single-shot auto-close timer for one poll generation.
struct PollTimer {
    poll_id: PollId,
    cancel: CancellationToken,
}

impl PollTimer {
    fn arm(poll_id: PollId, after: Duration, tx: mpsc::WeakSender<Command>) -> Self {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let expired = poll_id.clone();
        let _ = tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {}
                () = tokio::time::sleep(after) => {
                    // The session may already be gone.
                    if let Some(tx) = tx.upgrade() {
                        let _ = tx.send(Command::PollExpired { poll_id: expired }).await;
                    }
                }
            }
        });
        Self { poll_id, cancel }
    }

    fn disarm(self) {
        debug!(poll_id = %self.poll_id, "timer disarmed");
        self.cancel.cancel();
    }
}

/// What a handled event produces: the ack payload for the caller and the
/// events to publish afterwards, in order.
struct Outcome {
    ack: Value,
    deliveries: Vec<(Audience, ServerEvent)>,
}

impl Outcome {
    fn new(ack: Value) -> Self {
        Self {
            ack,
            deliveries: Vec::new(),
        }
    }

    fn push(&mut self, audience: Audience, event: ServerEvent) {
        self.deliveries.push((audience, event));
    }
}

pub struct PollSession {
    rx: mpsc::Receiver<Command>,
    self_tx: mpsc::WeakSender<Command>,
    fanout: Fanout,
    metrics: Arc<MetricsRecorder>,
    snapshot_tx: watch::Sender<PollSnapshot>,
    registry: ConnectionRegistry,
    ledger: AnswerLedger,
    current: Option<Poll>,
    timer: Option<PollTimer>,
}

/// Spawn the session actor. It stops once every [`SessionHandle`] is dropped.
pub fn spawn(
    fanout: Fanout,
    metrics: Arc<MetricsRecorder>,
    buffer: usize,
) -> (SessionHandle, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(buffer.max(1));
    let (snapshot_tx, snapshot) = watch::channel(PollSnapshot::default());
    let session = PollSession {
        rx,
        self_tx: tx.downgrade(),
        fanout,
        metrics,
        snapshot_tx,
        registry: ConnectionRegistry::new(),
        ledger: AnswerLedger::new(),
        current: None,
        timer: None,
    };
    let task = tokio::spawn(session.run());
    (SessionHandle { tx, snapshot }, task)
}

impl PollSession {
    async fn run(mut self) {
        info!("poll session started");
        while let Some(cmd) = self.rx.recv().await {
            self.handle(cmd);
            self.publish_snapshot();
        }
        if let Some(timer) = self.timer.take() {
            timer.disarm();
        }
        info!("poll session stopped");
    }

    fn handle(&mut self, cmd: Command) {
        match cmd {
            Command::Frame { conn, text } => self.on_frame(conn, &text),
            Command::Disconnect { conn } => self.on_disconnect(&conn),
            Command::PollExpired { poll_id } => self.on_expired(&poll_id),
        }
    }

    fn on_frame(&mut self, conn: ConnectionId, text: &str) {
        let frame: InboundFrame = match serde_json::from_str(text) {
            Ok(frame) => frame,
            Err(e) => {
                let err = PollError::validation(format!("Malformed frame: {e}"));
                warn!(conn = %conn, error = %err, "rejected frame");
                let _ = self.fanout.publish(
                    &Audience::Connection(conn),
                    &ServerEvent::Error(ErrorNotice::from(&err)),
                );
                return;
            }
        };

        let result = InboundEvent::from_frame(&frame).and_then(|event| self.dispatch(&conn, event));
        match result {
            Ok(outcome) => {
                if let Some(id) = frame.id {
                    let _ = self.fanout.reply(&conn, &AckFrame::success(id, outcome.ack));
                }
                for (audience, event) in &outcome.deliveries {
                    let _ = self.fanout.publish(audience, event);
                }
            }
            Err(err) => {
                warn!(
                    conn = %conn,
                    event = %frame.event,
                    code = err.code(),
                    kind = err.kind().as_str(),
                    error = %err,
                    "rejected event"
                );
                if frame.event == POLL_ANSWER {
                    self.metrics
                        .counter_inc("answers.rejected", &[("code", err.code())], 1);
                }
                match frame.id {
                    Some(id) => {
                        let _ = self.fanout.reply(&conn, &AckFrame::error(id, &err));
                    }
                    None => {
                        let _ = self.fanout.publish(
                            &Audience::Connection(conn),
                            &ServerEvent::Error(ErrorNotice::from(&err)),
                        );
                    }
                }
            }
        }
    }

    fn dispatch(&mut self, conn: &ConnectionId, event: InboundEvent) -> Result<Outcome, PollError> {
        match event {
            InboundEvent::TeacherJoin => Ok(self.teacher_join(conn)),
            InboundEvent::StudentJoin {
                student_id,
                student_name,
            } => Ok(self.student_join(conn, student_id, student_name)),
            InboundEvent::CreatePoll(draft) => {
                self.require_teacher(conn, "create polls")?;
                self.create_poll(draft)
            }
            InboundEvent::ClosePoll => {
                self.require_teacher(conn, "close polls")?;
                self.close_poll()
            }
            InboundEvent::Kick { student_id } => {
                self.require_teacher(conn, "kick students")?;
                Ok(self.kick(&student_id))
            }
            InboundEvent::Answer { answer } => self.submit_answer(conn, answer),
        }
    }

    fn require_teacher(&self, conn: &ConnectionId, action: &'static str) -> Result<(), PollError> {
        if self.registry.is_teacher(conn) {
            Ok(())
        } else {
            Err(PollError::TeacherOnly(action))
        }
    }

    fn teacher_join(&mut self, conn: &ConnectionId) -> Outcome {
        self.registry.register_teacher(conn.clone());
        self.fanout.set_role(conn, Role::Teacher);
        info!(conn = %conn, "teacher joined");

        let mut out = Outcome::new(json!({ "role": Role::Teacher }));
        let to_caller = Audience::Connection(conn.clone());
        out.push(to_caller.clone(), ServerEvent::CurrentPoll(self.current.clone()));
        if let Some(results) = self.results() {
            out.push(to_caller.clone(), ServerEvent::Results(results));
        }
        out.push(to_caller, ServerEvent::StudentList(self.registry.roster()));
        out
    }

    fn student_join(
        &mut self,
        conn: &ConnectionId,
        student_id: StudentId,
        name: String,
    ) -> Outcome {
        let has_answered = self.current.is_some() && self.ledger.has_answered(&student_id);
        let joined = self
            .registry
            .join_student(conn.clone(), student_id, name, has_answered);
        self.fanout.set_role(conn, Role::Student);
        info!(
            conn = %conn,
            student_id = %joined.entry.id,
            rejoined = joined.rejoined,
            has_answered,
            "student joined"
        );
        if let Some(ref old) = joined.superseded {
            debug!(
                student_id = %joined.entry.id,
                superseded = %old,
                "student rebound to new connection"
            );
        }

        let mut out = Outcome::new(json!({
            "role": Role::Student,
            "hasAnswered": has_answered,
            "rejoined": joined.rejoined,
        }));
        let to_caller = Audience::Connection(conn.clone());
        if let Some(ref poll) = self.current {
            out.push(to_caller.clone(), ServerEvent::CurrentPoll(Some(poll.clone())));
        }
        if let Some(results) = self.results() {
            out.push(to_caller, ServerEvent::Results(results));
        }
        out.push(
            Audience::Teachers,
            ServerEvent::StudentJoined(StudentNotice {
                id: joined.entry.id.clone(),
                name: joined.entry.name.clone(),
            }),
        );
        out.push(Audience::Teachers, ServerEvent::StudentList(self.registry.roster()));
        out
    }

    fn create_poll(&mut self, draft: PollDraft) -> Result<Outcome, PollError> {
        // Validate before touching the poll that is currently running.
        let poll = Poll::open(draft, Utc::now())?;

        let mut out = Outcome::new(json!({ "pollId": poll.id }));
        if let Some(results) = self.close_current(CloseReason::Replaced) {
            out.push(Audience::All, ServerEvent::Closed(results));
        }
        self.disarm_timer();

        self.ledger.reset(poll.id.clone());
        self.registry.reset_answered();
        self.timer = Some(PollTimer::arm(
            poll.id.clone(),
            poll.time_limit(),
            self.self_tx.clone(),
        ));
        info!(
            poll_id = %poll.id,
            options = poll.options.len(),
            time_limit_secs = poll.time_limit,
            "poll created"
        );
        self.metrics.counter_inc("polls.created", &[], 1);

        out.push(Audience::All, ServerEvent::NewPoll(poll.clone()));
        self.current = Some(poll);
        if let Some(results) = self.results() {
            out.push(Audience::All, ServerEvent::Results(results));
        }
        out.push(Audience::Teachers, ServerEvent::StudentList(self.registry.roster()));
        Ok(out)
    }

    fn close_poll(&mut self) -> Result<Outcome, PollError> {
        let results = self
            .close_current(CloseReason::Manual)
            .ok_or(PollError::NoActivePoll)?;
        let mut out = Outcome::new(json!({ "pollId": results.poll_id }));
        out.push(Audience::All, ServerEvent::Closed(results));
        Ok(out)
    }

    fn kick(&mut self, student_id: &StudentId) -> Outcome {
        let Some(student) = self.registry.remove_student(student_id) else {
            debug!(student_id = %student_id, "kick target not on roster");
            return Outcome::new(json!({ "removed": false }));
        };
        let dropped_answer = self.ledger.remove(student_id).is_some();
        info!(
            student_id = %student_id,
            conn = %student.connection_id,
            dropped_answer,
            "student kicked"
        );
        self.metrics.counter_inc("students.kicked", &[], 1);

        let mut out = Outcome::new(json!({ "removed": true }));
        out.push(
            Audience::Connection(student.connection_id),
            ServerEvent::StudentKicked(KickNotice {
                message: KICK_MESSAGE.into(),
            }),
        );
        out.push(Audience::Teachers, ServerEvent::StudentList(self.registry.roster()));
        if let Some(results) = self.results() {
            out.push(Audience::All, ServerEvent::Results(results));
        }
        out
    }

    fn submit_answer(&mut self, conn: &ConnectionId, answer: String) -> Result<Outcome, PollError> {
        let poll = self
            .current
            .as_ref()
            .filter(|p| p.is_active())
            .ok_or(PollError::NoActivePoll)?;
        let student = self
            .registry
            .student_for(conn)
            .ok_or(PollError::UnknownStudent)?;

        let now = Utc::now();
        let is_correct = poll.is_correct(&answer);
        let recorded = self.ledger.record(Answer {
            student_id: student.id.clone(),
            student_name: student.name.clone(),
            answer,
            is_correct,
            timestamp: now,
        })?;
        let notice = AnswerNotice {
            poll_id: poll.id.clone(),
            student_id: recorded.student_id.clone(),
            student_name: recorded.student_name.clone(),
            answer: recorded.answer.clone(),
            is_correct,
            timestamp: recorded.timestamp,
        };
        let latency_ms = (now - poll.created_at).num_milliseconds().max(0) as f64;

        self.registry.mark_answered(&notice.student_id);
        self.metrics.counter_inc("answers.recorded", &[], 1);
        self.metrics
            .histogram_observe("answers.latency_ms", &[], latency_ms);
        info!(
            poll_id = %notice.poll_id,
            student_id = %notice.student_id,
            is_correct,
            "answer recorded"
        );

        let mut out = Outcome::new(json!({ "isCorrect": is_correct }));
        out.push(Audience::Teachers, ServerEvent::AnswerNew(notice));
        if let Some(results) = self.results() {
            out.push(Audience::All, ServerEvent::Results(results));
        }
        out.push(Audience::Teachers, ServerEvent::StudentList(self.registry.roster()));
        Ok(out)
    }

    fn on_disconnect(&mut self, conn: &ConnectionId) {
        let Some(student) = self.registry.disconnect(conn) else {
            debug!(conn = %conn, "connection closed");
            return;
        };
        info!(conn = %conn, student_id = %student.id, "student left");
        let _ = self.fanout.publish(
            &Audience::Teachers,
            &ServerEvent::StudentLeft(StudentNotice {
                id: student.id,
                name: student.name,
            }),
        );
        let _ = self
            .fanout
            .publish(&Audience::Teachers, &ServerEvent::StudentList(self.registry.roster()));
    }

    fn on_expired(&mut self, poll_id: &PollId) {
        let is_current = self
            .current
            .as_ref()
            .is_some_and(|p| &p.id == poll_id && p.is_active());
        if !is_current {
            debug!(poll_id = %poll_id, "stale poll timer ignored");
            return;
        }
        if let Some(results) = self.close_current(CloseReason::Timer) {
            let _ = self.fanout.publish(&Audience::All, &ServerEvent::Closed(results));
        }
    }

    /// Close the current poll if it is active and return its final results.
    fn close_current(&mut self, reason: CloseReason) -> Option<PollResults> {
        let poll = self.current.as_mut()?;
        if !poll.close() {
            return None;
        }
        if let Some(timer) = self.timer.take() {
            timer.disarm();
        }
        let results = aggregate(poll, &self.ledger, self.registry.student_count());
        info!(
            poll_id = %poll.id,
            reason = reason.as_str(),
            total_votes = results.total_votes,
            correct_percentage = results.correct_percentage,
            "poll closed"
        );
        self.metrics
            .counter_inc("polls.closed", &[("reason", reason.as_str())], 1);
        Some(results)
    }

    fn disarm_timer(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.disarm();
        }
    }

    fn results(&self) -> Option<PollResults> {
        self.current
            .as_ref()
            .map(|poll| aggregate(poll, &self.ledger, self.registry.student_count()))
    }

    fn publish_snapshot(&self) {
        let _ = self.snapshot_tx.send_replace(PollSnapshot {
            poll: self.current.clone(),
            results: self.results(),
            students: self.registry.student_count(),
        });
    }
}
