//! Client against a live server.

use std::time::Duration;

use chrono::Utc;
use livepoll_client::{ClientState, PollClient};
use livepoll_core::ids::StudentId;
use livepoll_core::poll::{PollDraft, PollStatus};
use livepoll_core::protocol::{InboundEvent, ServerEvent};
use livepoll_core::resync::Resync;
use livepoll_server::{ServerConfig, ServerHandle};
use livepoll_telemetry::TelemetryGuard;
use tokio::sync::mpsc;
use tokio::time::timeout;

const TIMEOUT: Duration = Duration::from_secs(5);

async fn boot_server() -> ServerHandle {
    let config = ServerConfig {
        host: "127.0.0.1".into(),
        port: 0,
        ..Default::default()
    };
    livepoll_server::start(config, &TelemetryGuard::detached())
        .await
        .unwrap()
}

/// Apply events to `state` until one matches `pred`.
async fn apply_until(
    events: &mut mpsc::Receiver<ServerEvent>,
    state: &mut ClientState,
    pred: impl Fn(&ServerEvent) -> bool,
) -> ServerEvent {
    loop {
        let event = timeout(TIMEOUT, events.recv())
            .await
            .expect("timeout waiting for event")
            .expect("event stream closed");
        state.apply(&event);
        if pred(&event) {
            return event;
        }
    }
}

fn draft(limit: u64) -> PollDraft {
    PollDraft::new("2 + 2?", &["3", "4", "5"], "4", limit)
}

#[tokio::test]
async fn answer_and_duplicate() {
    let server = boot_server().await;
    let (teacher, _teacher_events) = PollClient::connect(&server.ws_url()).await.unwrap();
    teacher.join_teacher().await.unwrap();

    let (student, mut events) = PollClient::connect(&server.ws_url()).await.unwrap();
    let mut state = ClientState::student(StudentId::from_raw("s1"), "Ada");
    let join = student.join_student(StudentId::from_raw("s1"), "Ada").await.unwrap();
    assert!(!join.has_answered);
    assert!(!join.rejoined);

    let poll_id = teacher.create_poll(draft(30)).await.unwrap();
    apply_until(&mut events, &mut state, |e| matches!(e, ServerEvent::NewPoll(_))).await;
    assert_eq!(state.poll.as_ref().unwrap().id, poll_id);
    assert!(state.can_answer(Utc::now()));

    assert!(student.answer("4").await.unwrap());
    state.mark_answered();
    let err = student.answer("5").await.unwrap_err();
    assert_eq!(err.code(), Some("DUPLICATE_ANSWER"));
    assert!(!state.can_answer(Utc::now()));

    server.shutdown().await;
}

#[tokio::test]
async fn rejoin_after_disconnect_keeps_vote() {
    let server = boot_server().await;
    let (teacher, _t) = PollClient::connect(&server.ws_url()).await.unwrap();
    teacher.join_teacher().await.unwrap();
    let _ = teacher.create_poll(draft(30)).await.unwrap();

    let (first, _events) = PollClient::connect(&server.ws_url()).await.unwrap();
    first.join_student(StudentId::from_raw("s1"), "Ada").await.unwrap();
    assert!(!first.answer("3").await.unwrap());
    first.close().await;

    let (second, mut events) = PollClient::connect(&server.ws_url()).await.unwrap();
    let join = second.join_student(StudentId::from_raw("s1"), "Ada").await.unwrap();
    assert!(join.has_answered);

    let mut state = ClientState::student(StudentId::from_raw("s1"), "Ada");
    apply_until(&mut events, &mut state, |e| matches!(e, ServerEvent::Results(_))).await;
    let results = state.results.as_ref().unwrap();
    assert_eq!(results.total_votes, 1);
    assert_eq!(results.total_students, 1);
    assert!(matches!(state.resync(Utc::now()), Resync::Counting { .. }));

    let err = second.answer("4").await.unwrap_err();
    assert_eq!(err.code(), Some("DUPLICATE_ANSWER"));

    server.shutdown().await;
}

#[tokio::test]
async fn kicked_student_loses_identity() {
    let server = boot_server().await;
    let (teacher, _t) = PollClient::connect(&server.ws_url()).await.unwrap();
    teacher.join_teacher().await.unwrap();

    let (student, mut events) = PollClient::connect(&server.ws_url()).await.unwrap();
    let mut state = ClientState::student(StudentId::from_raw("s1"), "Ada");
    student.join_student(StudentId::from_raw("s1"), "Ada").await.unwrap();

    assert!(teacher.kick(StudentId::from_raw("s1")).await.unwrap());
    apply_until(&mut events, &mut state, |e| matches!(e, ServerEvent::StudentKicked(_))).await;
    assert!(state.identity.is_none());
    assert!(state.kicked.is_some());

    assert!(!teacher.kick(StudentId::from_raw("s1")).await.unwrap());

    let _ = teacher.create_poll(draft(30)).await.unwrap();
    let err = student.answer("4").await.unwrap_err();
    assert_eq!(err.code(), Some("UNKNOWN_STUDENT"));

    server.shutdown().await;
}

#[tokio::test]
async fn timer_close_reaches_client() {
    let server = boot_server().await;
    let (teacher, _t) = PollClient::connect(&server.ws_url()).await.unwrap();
    teacher.join_teacher().await.unwrap();

    let (student, mut events) = PollClient::connect(&server.ws_url()).await.unwrap();
    let mut state = ClientState::student(StudentId::from_raw("s1"), "Ada");
    student.join_student(StudentId::from_raw("s1"), "Ada").await.unwrap();

    let poll_id = teacher.create_poll(draft(1)).await.unwrap();
    let closed =
        apply_until(&mut events, &mut state, |e| matches!(e, ServerEvent::Closed(_))).await;
    let ServerEvent::Closed(results) = closed else {
        unreachable!()
    };
    assert_eq!(results.poll_id, poll_id);
    assert_eq!(results.status, PollStatus::Closed);
    assert_eq!(state.resync(Utc::now()), Resync::Closed);

    let err = student.answer("4").await.unwrap_err();
    assert_eq!(err.code(), Some("NO_ACTIVE_POLL"));

    server.shutdown().await;
}

#[tokio::test]
async fn validation_errors_surface_as_rejections() {
    let server = boot_server().await;
    let (teacher, _t) = PollClient::connect(&server.ws_url()).await.unwrap();
    teacher.join_teacher().await.unwrap();

    let err = teacher
        .create_poll(PollDraft::new("Q", &["A", "B"], "C", 30))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Some("VALIDATION_ERROR"));

    let err = teacher.close_poll().await.unwrap_err();
    assert_eq!(err.code(), Some("NO_ACTIVE_POLL"));

    server.shutdown().await;
}

#[tokio::test]
async fn undrained_events_do_not_block_acks() {
    let server = boot_server().await;
    let (teacher, _events) = PollClient::connect(&server.ws_url()).await.unwrap();
    let teacher = teacher.with_ack_timeout(Duration::from_secs(2));
    teacher.join_teacher().await.unwrap();

    // Each create pushes about four events to the teacher, well past the
    // event buffer after a hundred rounds.
    for round in 0..100 {
        if let Err(e) = teacher.create_poll(draft(30)).await {
            panic!("create #{round} failed: {e}");
        }
    }

    server.shutdown().await;
}

#[tokio::test]
async fn notify_failure_comes_back_as_error_event() {
    let server = boot_server().await;
    let (student, mut events) = PollClient::connect(&server.ws_url()).await.unwrap();
    let mut state = ClientState::new();

    student
        .notify(InboundEvent::Answer {
            answer: "4".into(),
        })
        .await
        .unwrap();
    let event = apply_until(&mut events, &mut state, |e| matches!(e, ServerEvent::Error(_))).await;
    let ServerEvent::Error(notice) = event else {
        unreachable!()
    };
    assert_eq!(notice.code, "NO_ACTIVE_POLL");
    assert_eq!(state.last_error.as_ref(), Some(&notice));

    server.shutdown().await;
}
