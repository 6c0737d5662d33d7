//! Live event and push payload construction.

use {
    courier_common::{Message, MessageKind},
    courier_push::{Platform, PushPayload},
    serde_json::json,
};

/// Event name of the live broadcast for a new message.
pub const MESSAGE_EVENT: &str = "message.new";
/// Push body for messages whose content is not shown in a preview.
pub const GENERIC_BODY: &str = "New message";

pub fn live_payload(message: &Message) -> serde_json::Value {
    json!({
        "id": message.id,
        "dialogId": message.dialog_id,
        "senderId": message.sender_id,
        "content": message.content,
        "type": message.kind,
    })
}

/// First `max_chars` characters of `content`, with an ellipsis when cut.
pub fn preview(content: &str, max_chars: usize) -> String {
    let trimmed = content.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let mut cut: String = trimmed.chars().take(max_chars.saturating_sub(1)).collect();
    cut.push('…');
    cut
}

/// Settings that shape push payloads.
#[derive(Debug, Clone, Default)]
pub struct PayloadOptions {
    pub preview_chars: usize,
    pub web_url_base: Option<String>,
}

/// Platform-appropriate notification for `message`. `Unknown` carries every
/// platform hint since the provider is not known yet.
pub fn push_payload(message: &Message, platform: Platform, options: &PayloadOptions) -> PushPayload {
    let body = match message.kind {
        MessageKind::Text => preview(&message.content, options.preview_chars),
        MessageKind::Image | MessageKind::File | MessageKind::System => GENERIC_BODY.to_string(),
    };
    let dialog_id = message.dialog_id.clone();
    let url = options
        .web_url_base
        .as_deref()
        .map(|base| format!("{}/dialogs/{dialog_id}", base.trim_end_matches('/')));
    let (ios, android, web) = match platform {
        Platform::Ios => (true, false, false),
        Platform::Android => (false, true, false),
        Platform::Web => (false, false, true),
        Platform::Unknown => (true, true, true),
    };

    PushPayload {
        title: message.sender_id.to_string(),
        body,
        message_id: message.id.clone(),
        thread_id: ios.then(|| dialog_id.clone()),
        collapse_key: android.then(|| dialog_id.clone()),
        url: if web { url } else { None },
        dialog_id,
    }
}
