use log::{error, info, warn};
use std::process::ExitCode;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use mousaada_chat::api::models::{CompletionAction, FileUpload};
use mousaada_chat::storage::ConversationCache;
use mousaada_chat::store::InboundOutcome;
use mousaada_chat::{
    ApiClient, ChannelClient, ChatSession, ListFilter, ListQuery, SendError, SessionOptions,
    SessionUpdate, Settings,
};

const WARM_START_LIMIT: usize = 20;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init();

    let mut settings = Settings::load().with_overrides(|key| std::env::var(key).ok());
    if !settings.is_authenticated() {
        error!("no server or token configured, set MOUSAADA_BASE_URL and MOUSAADA_TOKEN");
        return ExitCode::FAILURE;
    }
    let Some(user_id) = settings.user_id.clone() else {
        error!("user_id missing from {:?}", Settings::toml_path());
        return ExitCode::FAILURE;
    };

    let mut cache = match ConversationCache::open_default() {
        Ok(cache) => Some(cache),
        Err(e) => {
            warn!("conversation cache unavailable: {e}");
            None
        }
    };

    let api = match ApiClient::new(&settings.api_base(), settings.token.clone()) {
        Ok(api) => api,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let options = SessionOptions {
        store: settings.store_options(),
        max_upload_bytes: settings.max_upload_bytes,
    };
    let mut session = ChatSession::new(api, user_id, options);

    if let Some(cache) = cache.as_ref() {
        match cache.conversations(Some(WARM_START_LIMIT)) {
            Ok(cached) if !cached.is_empty() => {
                info!("{} conversations from last session", cached.len());
                session.warm_start(cached);
                print_list(&session);
            }
            Ok(_) => {}
            Err(e) => warn!("could not read cache: {e}"),
        }
    }

    match session.refresh_conversations().await {
        Ok(()) => {
            store_cache(&session, cache.as_mut());
            print_list(&session);
        }
        Err(e) => error!("could not load conversations: {e}"),
    }

    match settings.websocket_url() {
        Ok(url) => session.attach_channel(ChannelClient::new(url, settings.reconnect_policy())),
        Err(e) => warn!("realtime disabled, bad websocket url: {e}"),
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        if session.is_logged_out() {
            break;
        }
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            line = lines.next_line() => match line {
                Ok(Some(line)) => {
                    run_command(&mut session, line.trim()).await;
                    store_cache(&session, cache.as_mut());
                }
                Ok(None) => break,
                Err(e) => {
                    warn!("stdin: {e}");
                    break;
                }
            },
            update = session.poll() => {
                let status_changed = matches!(update, SessionUpdate::Status { .. });
                report(&session, update);
                if status_changed {
                    store_cache(&session, cache.as_mut());
                }
            }
        }
    }

    session.shutdown();
    if session.is_logged_out() {
        settings.clear_token();
        if let Err(e) = settings.save() {
            warn!("could not forget token: {e}");
        }
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

async fn run_command(session: &mut ChatSession<ApiClient>, line: &str) {
    let (cmd, arg) = line.split_once(' ').map(|(c, a)| (c, a.trim())).unwrap_or((line, ""));
    match cmd {
        "" => {}
        "/list" => {
            if let Err(e) = session.refresh_conversations().await {
                error!("could not refresh: {e}");
            }
            print_list(session);
        }
        "/open" => match session.select(arg).await {
            Ok(()) => print_messages(session),
            Err(e) => error!("{e}"),
        },
        "/code" => match session.lookup_code(arg).await {
            Ok(found) => {
                info!("found {}", found.conversation.id);
                print_messages(session);
            }
            Err(e) => error!("{e}"),
        },
        "/file" => match tokio::fs::read(arg).await {
            Ok(bytes) => {
                let file_name = std::path::Path::new(arg)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| arg.to_string());
                let upload = FileUpload { file_name, mime_type: "application/octet-stream".into(), bytes };
                report_send(session.send_file(upload).await);
            }
            Err(e) => error!("{arg}: {e}"),
        },
        "/close" => match session.store().current_id().map(str::to_string) {
            Some(id) => match session.close_conversation(&id, arg == "yes").await {
                Ok(_) => info!("conversation closed"),
                Err(e) => error!("{e} (use /close yes)"),
            },
            None => error!("no conversation selected"),
        },
        "/complete" | "/complete-close" => {
            let action = if cmd == "/complete" { CompletionAction::KeepOpen } else { CompletionAction::CloseConversation };
            match session.store().current_id().map(str::to_string) {
                Some(id) => {
                    if let Err(e) = session.complete_task(&id, action).await {
                        error!("{e}");
                    }
                }
                None => error!("no conversation selected"),
            }
        }
        "/reconnect" => {
            if !session.reconnect() {
                warn!("no channel to reconnect");
            }
        }
        _ => {
            session.composer_input(line);
            report_send(session.send().await);
        }
    }
}

/// Mirrors the current list into the warm-start cache.
fn store_cache(session: &ChatSession<ApiClient>, cache: Option<&mut ConversationCache>) {
    let Some(cache) = cache else {
        return;
    };
    let store = session.store();
    let archived = ListQuery { filter: ListFilter::Archived, ..Default::default() };
    let list: Vec<_> = store
        .list(&ListQuery::default())
        .into_iter()
        .chain(store.list(&archived))
        .cloned()
        .collect();
    if let Err(e) = cache.upsert_conversations(&list) {
        warn!("could not update cache: {e}");
    }
}

fn report_send(result: Result<(), SendError>) {
    match result {
        Ok(()) => {}
        Err(SendError::Rejected(reason)) => warn!("not sent: {reason}"),
        Err(e) => error!("{e}"),
    }
}

fn report(session: &ChatSession<ApiClient>, update: SessionUpdate) {
    match update {
        SessionUpdate::Message { outcome: InboundOutcome::Appended, .. } => {
            if let Some(last) = session.store().messages().last() {
                println!("[{}] {}", last.sender_id, last.content);
            }
        }
        SessionUpdate::Message { outcome: InboundOutcome::Counted, .. } => {
            info!("unread: {}", session.store().unread_total());
        }
        SessionUpdate::Message { .. } => {}
        SessionUpdate::Status { conversation_id, .. } => {
            if let Some(conv) = session.store().conversation(&conversation_id) {
                info!("{conversation_id} is now {}", conv.status);
            }
            if let Some(banner) = session.store().composer_state().and_then(|s| s.banner()) {
                println!("-- {banner}");
            }
        }
        SessionUpdate::Typing { .. } | SessionUpdate::TypingExpired => {
            let now = tokio::time::Instant::now();
            let typing = session.store().typing_users(now);
            if !typing.is_empty() {
                println!("-- {} typing", typing.join(", "));
            }
        }
        SessionUpdate::ChannelDown => warn!("realtime channel down, /reconnect to retry"),
        SessionUpdate::Presence { .. } | SessionUpdate::ReadReceipt { .. } => {}
    }
}

fn print_list(session: &ChatSession<ApiClient>) {
    let store = session.store();
    for conv in store.list(&ListQuery::default()) {
        let unread = conv.unread_for(store.local_user());
        println!(
            "{}  {:<24} {:<10} {}",
            conv.id,
            conv.counterpart_name(store.local_user()),
            conv.status,
            if unread > 0 { format!("({unread})") } else { String::new() },
        );
    }
    println!("unread: {}", store.unread_total());
}

fn print_messages(session: &ChatSession<ApiClient>) {
    for msg in session.store().messages() {
        let marker = if msg.is_sending() { " (sending)" } else { "" };
        println!("[{}] {}{}", msg.sender_id, msg.content, marker);
    }
    if let Some(banner) = session.store().composer_state().and_then(|s| s.banner()) {
        println!("-- {banner}");
    }
}
