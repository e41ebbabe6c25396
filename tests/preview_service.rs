//! Integration tests for link previews: chat message in, preview out,
//! retraction by reaction. The mock server plays the forward proxy.

mod common;

use common::*;
use feedrelay::chat::ChatError;
use feedrelay::preview::{
    InboundMessage, PreviewError, PreviewRetractionTracker, PreviewService, PreviewStyle,
    ReactionEvent, TrackerSettings,
};
use feedrelay::settings::{MemorySettings, SettingsStore};
use pretty_assertions::assert_eq;
use std::sync::Arc;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, Request, ResponseTemplate};

const ENDPOINT: &str = "http://instagram.test/graphql/query/";
const AUTHOR: u64 = 42;

const POST_JSON: &str = r#"{
    "data": {"shortcode_media": {
        "is_video": false,
        "display_url": "https://cdn.test/a.jpg",
        "owner": {"username": "dusty", "full_name": "Dusty Bot"},
        "edge_media_to_caption": {"edges": [{"node": {"text": "caption"}}]},
        "taken_at_timestamp": 1600000000
    }}
}"#;

fn for_shortcode(shortcode: &'static str) -> impl Fn(&Request) -> bool + Send + Sync + 'static {
    move |req: &Request| req.url.query().is_some_and(|q| q.contains(shortcode))
}

async fn mount_post(server: &MockServer, shortcode: &'static str, body: &str) {
    Mock::given(method("GET"))
        .and(path("/graphql/query/"))
        .and(query_param("query_hash", "505f2f2dfcfce5b99cb7ac4155cbf299"))
        .and(for_shortcode(shortcode))
        .respond_with(ResponseTemplate::new(200).set_body_string(body))
        .mount(server)
        .await;
}

/// Mounts a post mock that must never be hit.
async fn forbid_lookups(server: &MockServer) {
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(POST_JSON))
        .expect(0)
        .mount(server)
        .await;
}

/// Settings where the test server has automatic previews on.
async fn server_opted_in() -> Arc<MemorySettings> {
    let settings = store(vec![]);
    settings
        .modify(SERVER, Box::new(|s| s.auto_previews = true))
        .await
        .unwrap();
    settings
}

async fn service_with(
    server: &MockServer,
    chat: Arc<FakeChat>,
    settings: Arc<MemorySettings>,
) -> PreviewService {
    let tracker = PreviewRetractionTracker::new(chat.clone(), TrackerSettings::default());
    PreviewService::new(fetcher_via(&server.uri()).await, chat, settings, tracker, 8)
        .with_endpoint(ENDPOINT)
}

async fn service(server: &MockServer, chat: Arc<FakeChat>) -> PreviewService {
    service_with(server, chat, server_opted_in().await).await
}

fn message(content: &str) -> InboundMessage {
    InboundMessage {
        id: 1,
        destination: destination(),
        author_id: AUTHOR,
        author_is_bot: false,
        content: content.to_string(),
    }
}

#[tokio::test]
async fn test_link_in_chat_gets_preview() {
    let server = MockServer::start().await;
    mount_post(&server, "GoodPost1", POST_JSON).await;
    let chat = FakeChat::new();
    let service = service(&server, chat.clone()).await;

    let posted = service
        .handle_message(&message("look https://www.instagram.com/p/GoodPost1/"))
        .await;

    assert_eq!(posted, 1);
    let state = chat.state.lock().unwrap();
    let (sent, outgoing) = state.sent[0].clone();
    let embed = outgoing.embed.unwrap();
    assert_eq!(embed.author_name.as_deref(), Some("Dusty Bot"));
    assert_eq!(embed.url.as_deref(), Some("https://instagram.com/p/GoodPost1/"));
    assert_eq!(state.reactions, vec![(sent.id, service.tracker().emoji().to_string())]);
    assert!(service.tracker().is_registered(sent.id));
}

#[tokio::test]
async fn test_bot_messages_are_ignored() {
    let server = MockServer::start().await;
    forbid_lookups(&server).await;
    let chat = FakeChat::new();
    let service = service(&server, chat.clone()).await;

    let mut from_bot = message("https://instagram.com/p/GoodPost1");
    from_bot.author_is_bot = true;

    assert_eq!(service.handle_message(&from_bot).await, 0);
    assert_eq!(chat.sent_count(), 0);
}

#[tokio::test]
async fn test_unsendable_channel_is_ignored() {
    let server = MockServer::start().await;
    forbid_lookups(&server).await;
    let chat = FakeChat::new();
    chat.with_state(|s| s.send_allowance = Some(0));
    let service = service(&server, chat.clone()).await;

    let posted = service
        .handle_message(&message("https://instagram.com/p/GoodPost1"))
        .await;
    assert_eq!(posted, 0);
}

#[tokio::test]
async fn test_no_preview_without_opt_in() {
    let server = MockServer::start().await;
    forbid_lookups(&server).await;
    let chat = FakeChat::new();
    let service = service_with(&server, chat.clone(), store(vec![])).await;

    let posted = service
        .handle_message(&message("https://instagram.com/p/GoodPost1"))
        .await;

    assert_eq!(posted, 0);
    assert_eq!(chat.sent_count(), 0);
}

#[tokio::test]
async fn test_user_opt_in_previews_in_any_server() {
    let server = MockServer::start().await;
    mount_post(&server, "GoodPost1", POST_JSON).await;
    let chat = FakeChat::new();
    let settings = store(vec![]);
    settings
        .modify_user(
            AUTHOR,
            Box::new(|u| {
                u.auto_previews = true;
                u.preview_style = Some(PreviewStyle::Text);
            }),
        )
        .await
        .unwrap();
    let service = service_with(&server, chat.clone(), settings).await;

    let posted = service
        .handle_message(&message("https://instagram.com/p/GoodPost1"))
        .await;

    assert_eq!(posted, 1);
    let texts = chat.sent_texts();
    assert_eq!(texts.len(), 1);
    assert!(texts[0].starts_with("**Dusty Bot**"));
}

#[tokio::test]
async fn test_user_style_beats_server_style() {
    let server = MockServer::start().await;
    mount_post(&server, "GoodPost1", POST_JSON).await;
    let chat = FakeChat::new();
    let settings = server_opted_in().await;
    settings
        .modify(SERVER, Box::new(|s| s.preview_style = Some(PreviewStyle::Embed)))
        .await
        .unwrap();
    settings
        .modify_user(AUTHOR, Box::new(|u| u.preview_style = Some(PreviewStyle::Text)))
        .await
        .unwrap();
    let service = service_with(&server, chat.clone(), settings).await;

    service
        .handle_message(&message("https://instagram.com/p/GoodPost1"))
        .await;

    let state = chat.state.lock().unwrap();
    assert_eq!(state.sent.len(), 1);
    assert_eq!(state.sent[0].1.embed, None);
}

#[tokio::test]
async fn test_preview_command_message_is_left_to_command() {
    let server = MockServer::start().await;
    forbid_lookups(&server).await;
    let chat = FakeChat::new();
    let service = service(&server, chat.clone()).await;

    let posted = service
        .handle_message(&message(">ig https://instagram.com/p/GoodPost1"))
        .await;

    assert_eq!(posted, 0);
    assert_eq!(chat.sent_count(), 0);
}

#[tokio::test]
async fn test_failed_link_does_not_block_others() {
    let server = MockServer::start().await;
    mount_post(&server, "BrokenPost", r#"{"data": {"shortcode_media": null}}"#).await;
    mount_post(&server, "GoodPost1", POST_JSON).await;
    let chat = FakeChat::new();
    let service = service(&server, chat.clone()).await;

    let posted = service
        .handle_message(&message(
            "https://instagram.com/p/BrokenPost https://instagram.com/reel/GoodPost1",
        ))
        .await;

    assert_eq!(posted, 1);
    assert_eq!(chat.sent_count(), 1);
}

#[tokio::test]
async fn test_text_style_registers_whole_group() {
    let server = MockServer::start().await;
    mount_post(&server, "GoodPost1", POST_JSON).await;
    let chat = FakeChat::new();
    let service = service(&server, chat.clone()).await;

    let primary = service
        .post_preview("GoodPost1", destination(), PreviewStyle::Text, AUTHOR)
        .await
        .unwrap()
        .unwrap();

    let texts = chat.sent_texts();
    assert_eq!(texts.len(), 1);
    assert!(texts[0].starts_with("**Dusty Bot**"));
    assert!(texts[0].contains("<https://instagram.com/p/GoodPost1/>"));
    assert!(service.tracker().is_registered(primary));
}

#[tokio::test]
async fn test_partial_send_still_registers_sent_messages() {
    let long_caption = format!("{}\n{}", "x".repeat(1500), "y".repeat(1500));
    let body = serde_json::json!({
        "data": {"shortcode_media": {
            "is_video": false,
            "display_url": "https://cdn.test/a.jpg",
            "owner": {"username": "dusty", "full_name": "Dusty Bot"},
            "edge_media_to_caption": {"edges": [{"node": {"text": long_caption}}]},
            "taken_at_timestamp": 1600000000
        }}
    })
    .to_string();
    let server = MockServer::start().await;
    mount_post(&server, "LongPost1", &body).await;
    let chat = FakeChat::new();
    // The caption needs two messages; posting is revoked after the first
    chat.with_state(|s| s.send_allowance = Some(1));
    let service = service(&server, chat.clone()).await;

    let result = service
        .post_preview("LongPost1", destination(), PreviewStyle::Text, AUTHOR)
        .await;

    assert!(matches!(
        result,
        Err(PreviewError::Chat(ChatError::PermissionDenied(_)))
    ));
    let state = chat.state.lock().unwrap();
    assert_eq!(state.sent.len(), 1);
    let first = state.sent[0].0.id;
    assert_eq!(
        state.reactions,
        vec![(first, service.tracker().emoji().to_string())]
    );
    assert!(service.tracker().is_registered(first));
}

#[tokio::test]
async fn test_command_reports_blocked_proxies() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/graphql/query/"))
        .respond_with(
            ResponseTemplate::new(302)
                .insert_header("Location", "http://instagram.test/accounts/login/"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/accounts/login/"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>login</html>"))
        .mount(&server)
        .await;
    let chat = FakeChat::new();
    let service = service(&server, chat.clone()).await;

    let posted = service
        .preview_command(
            &message("https://instagram.com/p/GoodPost1"),
            Some(PreviewStyle::Embed),
        )
        .await;

    assert_eq!(posted, 0);
    assert_eq!(
        chat.sent_texts(),
        vec!["The site has blocked all of our IP addresses. Please try again later.".to_string()]
    );
}

#[tokio::test]
async fn test_command_in_unsendable_channel_stays_quiet() {
    let server = MockServer::start().await;
    forbid_lookups(&server).await;
    let chat = FakeChat::new();
    chat.with_state(|s| s.send_allowance = Some(0));
    let service = service(&server, chat.clone()).await;

    let posted = service
        .preview_command(&message("https://instagram.com/p/GoodPost1"), None)
        .await;

    assert_eq!(posted, 0);
    assert_eq!(chat.sent_count(), 0);
}

#[tokio::test]
async fn test_command_uses_author_style() {
    let server = MockServer::start().await;
    mount_post(&server, "GoodPost1", POST_JSON).await;
    let chat = FakeChat::new();
    // No automatic previews anywhere; the command works regardless
    let settings = store(vec![]);
    settings
        .modify_user(AUTHOR, Box::new(|u| u.preview_style = Some(PreviewStyle::Text)))
        .await
        .unwrap();
    let service = service_with(&server, chat.clone(), settings).await;

    let posted = service
        .preview_command(&message(">ig https://instagram.com/p/GoodPost1"), None)
        .await;

    assert_eq!(posted, 1);
    let state = chat.state.lock().unwrap();
    assert_eq!(state.sent[0].1.embed, None);
    assert!(state.sent[0].1.text.as_ref().unwrap().starts_with("**Dusty Bot**"));
}

#[tokio::test]
async fn test_command_without_link() {
    let server = MockServer::start().await;
    let chat = FakeChat::new();
    let service = service(&server, chat.clone()).await;

    let posted = service
        .preview_command(&message("https://example.com/p/nope"), None)
        .await;

    assert_eq!(posted, 0);
    assert_eq!(chat.sent_texts(), vec!["Not a valid post link.".to_string()]);
}

#[tokio::test]
async fn test_reaction_retracts_preview() {
    let server = MockServer::start().await;
    mount_post(&server, "GoodPost1", POST_JSON).await;
    let chat = FakeChat::new();
    let service = service(&server, chat.clone()).await;
    let primary = service
        .post_preview("GoodPost1", destination(), PreviewStyle::Embed, AUTHOR)
        .await
        .unwrap()
        .unwrap();
    let emoji = service.tracker().emoji().to_string();

    // The bot's own affordance reaction does not count
    let own = ReactionEvent {
        message_id: primary,
        user_id: BOT_ID,
        emoji: emoji.clone(),
    };
    assert!(!service.handle_reaction(&own).await);

    let other_emoji = ReactionEvent {
        message_id: primary,
        user_id: AUTHOR,
        emoji: "👍".to_string(),
    };
    assert!(!service.handle_reaction(&other_emoji).await);

    let retract = ReactionEvent {
        message_id: primary,
        user_id: AUTHOR,
        emoji,
    };
    assert!(service.handle_reaction(&retract).await);
    assert_eq!(chat.deleted(), vec![primary]);
}

#[tokio::test]
async fn test_on_message_runs_detached() {
    let server = MockServer::start().await;
    mount_post(&server, "GoodPost1", POST_JSON).await;
    let chat = FakeChat::new();
    let service = service(&server, chat.clone()).await;

    service
        .on_message(message("<https://instagram.com/p/GoodPost1>"))
        .await
        .unwrap();

    assert_eq!(chat.sent_count(), 1);
}
