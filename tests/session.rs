mod common;

use common::*;
use mousaada_chat::api::events::ServerEvent;
use mousaada_chat::api::models::{CompletionAction, ConversationStatus, FileUpload, MessageType};
use mousaada_chat::lifecycle::ComposerState;
use mousaada_chat::store::InboundOutcome;
use mousaada_chat::{AdminError, ApiError, SendError, SendRejected, SessionUpdate};
use tokio::time::{Duration, Instant};

#[tokio::test]
async fn select_loads_history_and_zeroes_only_that_badge() {
    let (mut session, api) = session_with(vec![
        with_unread(conversation("c1", "U2", "Sara"), 3),
        with_unread(conversation("c2", "U3", "Yassine"), 2),
    ])
    .await;
    api.state().history.insert(
        "c1".into(),
        vec![message("m1", "c1", "U2", "salam", 0), message("m2", "c1", "U2", "are you there?", 5_000)],
    );
    assert_eq!(session.store().unread_total(), 5);

    session.select("c1").await.unwrap();

    assert_eq!(session.store().messages().len(), 2);
    assert_eq!(session.store().conversation("c1").unwrap().unread_for(LOCAL), 0);
    assert_eq!(session.store().conversation("c2").unwrap().unread_for(LOCAL), 2);
    assert_eq!(session.store().unread_total(), 2);
    assert_eq!(api.calls(), vec!["conversations", "messages c1", "read c1"]);
}

#[tokio::test]
async fn failed_read_mark_keeps_the_badge() {
    let (mut session, api) = session_with(vec![with_unread(conversation("c1", "U2", "Sara"), 3)]).await;
    api.state().fail_all = Some(Failure::Status(500));

    assert!(session.select("c1").await.is_err());
    assert_eq!(session.store().unread_total(), 3);
}

#[tokio::test]
async fn send_then_echo_keeps_one_copy() {
    let (mut session, api) = session_with(vec![conversation("c1", "U2", "Sara")]).await;
    session.select("c1").await.unwrap();

    session.composer_input("hi");
    session.send().await.unwrap();

    let msgs = session.store().messages();
    assert_eq!(msgs.len(), 1);
    assert_eq!(msgs[0].server_id(), Some("m1"));
    assert!(!msgs[0].is_sending());
    assert_eq!(session.store().composer_text(), "");
    assert_eq!(api.state().sent[0].1.content, "hi");

    let mut echo = msgs[0].clone();
    echo.created_at += chrono::TimeDelta::milliseconds(40);
    let update = session.handle_server_event(
        ServerEvent::MessageReceived { message: echo, conversation_id: "c1".into() },
        Instant::now(),
    );
    assert_eq!(
        update,
        SessionUpdate::Message { conversation_id: "c1".into(), outcome: InboundOutcome::Duplicate }
    );
    assert_eq!(session.store().messages().len(), 1);
}

#[tokio::test]
async fn failed_send_restores_composer() {
    let (mut session, api) = session_with(vec![conversation("c1", "U2", "Sara")]).await;
    session.select("c1").await.unwrap();
    api.state().fail_send = Some(Failure::Status(500));

    session.composer_input("  hello there ");
    let err = session.send().await.unwrap_err();

    assert!(matches!(err, SendError::Send(ApiError::Http { status: 500, .. })));
    assert!(session.store().messages().is_empty());
    assert_eq!(session.store().composer_text(), "  hello there ");
    assert!(!session.store().is_sending("c1"));
    assert_eq!(api.called("conversations"), 1);
}

#[tokio::test]
async fn conflict_on_send_resyncs_the_list() {
    let (mut session, api) = session_with(vec![conversation("c1", "U2", "Sara")]).await;
    session.select("c1").await.unwrap();
    {
        let mut state = api.state();
        state.fail_send = Some(Failure::Status(409));
        state.conversations = vec![with_status(conversation("c1", "U2", "Sara"), ConversationStatus::Closed)];
    }

    session.composer_input("still there?");
    assert!(session.send().await.is_err());

    assert_eq!(api.called("conversations"), 2);
    assert_eq!(session.store().current().unwrap().status, ConversationStatus::Closed);
    assert!(!session.store().composer_state().unwrap().is_enabled());
    assert_eq!(session.store().composer_text(), "still there?");
}

#[tokio::test]
async fn unauthorized_marks_session_logged_out() {
    let (mut session, api) = session_with(vec![conversation("c1", "U2", "Sara")]).await;
    api.state().fail_all = Some(Failure::Unauthorized);

    assert!(matches!(session.refresh_conversations().await, Err(ApiError::Unauthorized)));
    assert!(session.is_logged_out());
}

#[tokio::test]
async fn closed_conversation_never_reaches_the_network() {
    let (mut session, api) = session_with(vec![with_status(
        conversation("c1", "U2", "Sara"),
        ConversationStatus::Closed,
    )])
    .await;
    session.select("c1").await.unwrap();

    session.composer_input("hello?");
    let err = session.send().await.unwrap_err();

    assert!(matches!(
        err,
        SendError::Rejected(SendRejected::ConversationInactive(ConversationStatus::Closed))
    ));
    assert_eq!(api.called("send"), 0);
    assert_eq!(session.store().composer_text(), "hello?");
}

#[tokio::test]
async fn empty_and_unselected_sends_are_rejected() {
    let (mut session, api) = session_with(vec![conversation("c1", "U2", "Sara")]).await;

    session.composer_input("orphan");
    assert_eq!(session.store().composer_text(), "");
    assert!(matches!(session.send().await, Err(SendError::Rejected(SendRejected::EmptyContent))));

    session.select("c1").await.unwrap();
    session.composer_input("   ");
    assert!(matches!(session.send().await, Err(SendError::Rejected(SendRejected::EmptyContent))));
    assert_eq!(api.called("send"), 0);
}

#[tokio::test]
async fn realtime_status_events_lock_the_composer() {
    let (mut session, _api) = session_with(vec![conversation("c1", "U2", "Sara")]).await;
    session.select("c1").await.unwrap();
    let now = Instant::now();

    let update = session.handle_server_event(
        ServerEvent::TaskCompleted {
            conversation_id: "c1".into(),
            action: CompletionAction::KeepOpen,
            message: Some(message("sys1", "c1", "admin", "Task marked as completed", 1_000)),
        },
        now,
    );
    assert_eq!(update, SessionUpdate::Status { conversation_id: "c1".into(), open: true });
    let conv = session.store().current().unwrap();
    assert_eq!(conv.status, ConversationStatus::Completed);
    assert!(conv.task_completed);
    assert!(matches!(session.store().composer_state(), Some(ComposerState::Disabled { .. })));
    assert_eq!(session.store().messages().len(), 1);

    session.handle_server_event(
        ServerEvent::ConversationClosed { conversation_id: "c1".into(), message: None },
        now,
    );
    assert_eq!(session.store().current().unwrap().status, ConversationStatus::Closed);

    // a stale list still saying active cannot reopen it
    session.refresh_conversations().await.unwrap();
    assert_eq!(session.store().current().unwrap().status, ConversationStatus::Closed);
}

#[tokio::test]
async fn inbound_for_background_conversation_counts_unread() {
    let (mut session, _api) = session_with(vec![
        conversation("c1", "U2", "Sara"),
        conversation("c2", "U3", "Yassine"),
    ])
    .await;
    session.select("c1").await.unwrap();

    let update = session.handle_server_event(
        ServerEvent::MessageReceived {
            message: message("m9", "c2", "U3", "ping", 0),
            conversation_id: "c2".into(),
        },
        Instant::now(),
    );
    assert_eq!(
        update,
        SessionUpdate::Message { conversation_id: "c2".into(), outcome: InboundOutcome::Counted }
    );
    assert_eq!(session.store().unread_total(), 1);
    assert!(session.store().messages().is_empty());
    assert_eq!(
        session.store().conversation("c2").unwrap().last_message.as_ref().unwrap().content,
        "ping"
    );
}

#[tokio::test]
async fn read_receipt_flips_own_messages() {
    let (mut session, api) = session_with(vec![conversation("c1", "U2", "Sara")]).await;
    api.state().history.insert(
        "c1".into(),
        vec![message("m1", "c1", LOCAL, "first", 0), message("m2", "c1", "U2", "reply", 1_000)],
    );
    session.select("c1").await.unwrap();

    let update = session.handle_server_event(
        ServerEvent::MessagesRead { user_id: "U2".into(), conversation_id: Some("c1".into()) },
        Instant::now(),
    );
    assert_eq!(update, SessionUpdate::ReadReceipt { flipped: 1 });
    assert!(session.store().messages()[0].is_read);
    assert!(!session.store().messages()[1].is_read);
}

#[tokio::test(start_paused = true)]
async fn typing_indicator_expires_through_poll() {
    let (mut session, _api) = session_with(vec![conversation("c1", "U2", "Sara")]).await;
    session.select("c1").await.unwrap();

    session.handle_server_event(
        ServerEvent::TypingStart { conversation_id: "c1".into(), user_id: Some("U2".into()) },
        Instant::now(),
    );
    assert_eq!(session.store().typing_users(Instant::now()), vec!["U2"]);

    let started = Instant::now();
    assert_eq!(session.poll().await, SessionUpdate::TypingExpired);
    assert!(started.elapsed() >= Duration::from_secs(2));
    assert!(session.store().typing_users(Instant::now()).is_empty());
    assert!(session.store().next_typing_deadline().is_none());
}

#[tokio::test]
async fn oversized_file_is_rejected_before_upload() {
    let (mut session, api) = session_with(vec![conversation("c1", "U2", "Sara")]).await;
    session.select("c1").await.unwrap();

    let big = FileUpload {
        file_name: "scan.pdf".into(),
        mime_type: "application/pdf".into(),
        bytes: vec![0; 50 * 1024 * 1024 + 1],
    };
    assert!(matches!(
        session.send_file(big).await,
        Err(SendError::Rejected(SendRejected::FileTooLarge { .. }))
    ));
    assert_eq!(api.called("upload"), 0);
}

#[tokio::test]
async fn file_send_uploads_then_references() {
    let (mut session, api) = session_with(vec![conversation("c1", "U2", "Sara")]).await;
    session.select("c1").await.unwrap();

    let file = FileUpload {
        file_name: "brief.pdf".into(),
        mime_type: "application/pdf".into(),
        bytes: b"%PDF-1.4".to_vec(),
    };
    session.send_file(file).await.unwrap();

    let (_, body) = api.state().sent[0].clone();
    assert_eq!(body.file_url.as_deref(), Some("/uploads/brief.pdf"));
    assert_eq!(body.message_type, Some(MessageType::Pdf));
    assert_eq!(session.store().messages().len(), 1);
    assert!(!session.store().is_sending("c1"));
}

#[tokio::test]
async fn failed_upload_sends_nothing() {
    let (mut session, api) = session_with(vec![conversation("c1", "U2", "Sara")]).await;
    session.select("c1").await.unwrap();
    api.state().fail_upload = Some(Failure::Status(413));

    let file = FileUpload { file_name: "a.png".into(), mime_type: "image/png".into(), bytes: vec![1, 2, 3] };
    assert!(matches!(session.send_file(file).await, Err(SendError::Upload(_))));
    assert_eq!(api.called("send"), 0);
    assert!(!session.store().is_sending("c1"));
}

#[tokio::test]
async fn code_lookup_validates_then_opens() {
    let (mut session, api) = session_with(vec![]).await;
    api.state().lookups.insert("CONV-A1B2C3".into(), conversation("c7", "U9", "Nadia"));

    assert!(matches!(session.lookup_code("conv-12").await, Err(ApiError::InvalidCode(_))));
    assert_eq!(api.called("search"), 0);

    let found = session.lookup_code(" conv-a1b2c3 ").await.unwrap();
    assert_eq!(found.conversation.id, "c7");
    assert_eq!(session.store().current_id(), Some("c7"));
    assert_eq!(api.calls().last().unwrap(), "search CONV-A1B2C3");
}

#[tokio::test]
async fn close_requires_confirmation() {
    let (mut session, api) = session_with(vec![conversation("c1", "U2", "Sara")]).await;
    session.select("c1").await.unwrap();

    assert!(matches!(
        session.close_conversation("c1", false).await,
        Err(AdminError::NotConfirmed)
    ));
    assert_eq!(api.called("leave"), 0);

    session.close_conversation("c1", true).await.unwrap();
    assert_eq!(api.called("leave c1"), 1);
    assert_eq!(session.store().current().unwrap().status, ConversationStatus::Closed);
    assert_eq!(
        session.store().composer_state().and_then(|s| s.banner()),
        Some("This conversation has been closed. No new messages can be sent.")
    );
}

#[tokio::test]
async fn complete_task_with_close_sets_both_flags() {
    let (mut session, api) = session_with(vec![conversation("c1", "U2", "Sara")]).await;

    session.complete_task("c1", CompletionAction::CloseConversation).await.unwrap();

    let conv = session.store().conversation("c1").unwrap();
    assert_eq!(conv.status, ConversationStatus::Closed);
    assert!(conv.task_completed);
    assert_eq!(api.called("complete c1 CloseConversation"), 1);
    assert_eq!(api.called("conversations"), 2);
}

#[tokio::test]
async fn closed_conversation_cannot_be_completed() {
    let (mut session, api) = session_with(vec![with_status(
        conversation("c1", "U2", "Sara"),
        ConversationStatus::Closed,
    )])
    .await;

    let err = session.complete_task("c1", CompletionAction::KeepOpen).await.unwrap_err();
    assert!(matches!(err, AdminError::Transition(_)));
    assert_eq!(api.called("complete"), 0);
}

#[tokio::test]
async fn failed_admin_action_leaves_state_untouched() {
    let (mut session, api) = session_with(vec![conversation("c1", "U2", "Sara")]).await;
    api.state().fail_all = Some(Failure::Status(500));

    assert!(session.close_conversation("c1", true).await.is_err());
    assert_eq!(session.store().conversation("c1").unwrap().status, ConversationStatus::Active);
}

#[tokio::test]
async fn task_and_partner_moderation_calls() {
    let (mut session, api) = session_with(vec![]).await;

    session.approve_task("t1").await.unwrap();
    session.reject_task("t2", Some("  incomplete brief ")).await.unwrap();
    session.reject_task("t3", Some("   ")).await.unwrap();
    session.approve_partner_request("p1").await.unwrap();
    session.reject_partner_request("p2").await.unwrap();

    let calls = api.calls();
    assert!(calls.contains(&"approve-task t1".to_string()));
    assert!(calls.contains(&"reject-task t2 incomplete brief".to_string()));
    assert!(calls.contains(&"reject-task t3 -".to_string()));
    assert!(calls.contains(&"approve-partner p1".to_string()));
    assert!(calls.contains(&"reject-partner p2".to_string()));
}

#[tokio::test]
async fn cached_list_shows_until_the_first_fetch() {
    let api = FakeApi::with_conversations(vec![
        conversation("c1", "U2", "Sara"),
        conversation("c2", "U3", "Yassine"),
    ]);
    let mut session = mousaada_chat::ChatSession::new(api.clone(), LOCAL, Default::default());

    session.warm_start(vec![with_unread(conversation("c1", "U2", "Sara"), 4)]);
    assert_eq!(session.store().len(), 1);
    assert_eq!(session.store().unread_total(), 4);
    assert!(api.calls().is_empty());

    session.refresh_conversations().await.unwrap();
    assert_eq!(session.store().len(), 2);
    assert_eq!(session.store().unread_total(), 0);

    // a late cache read never overwrites fetched data
    session.warm_start(vec![with_unread(conversation("c9", "U9", "Old"), 1)]);
    assert_eq!(session.store().len(), 2);
    assert!(session.store().conversation("c9").is_none());
}
