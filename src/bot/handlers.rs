use crate::bot::keyboards::CallbackAction;
use crate::bot::{staff, survey};
use crate::state::SharedState;
use anyhow::Result;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use serde_json::json;
use teloxide::prelude::*;
use teloxide::types::{CallbackQuery, Message, Update, UpdateKind};

const SECRET_HEADER: &str = "x-telegram-bot-api-secret-token";

const FAILURE_NOTICE: &str = "Что-то пошло не так. Попробуйте ещё раз чуть позже.";

const HELP: &str = "Отсканируйте QR-код на столе или отправьте /bill <номер счёта>, \
    оцените визит и получите подарок на следующее посещение 🎁";

pub fn routes(state: SharedState) -> Router {
    Router::new()
        .route("/telegram/webhook", post(handle_update))
        .with_state(state)
}

async fn handle_update(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Json(update): Json<Update>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    if !secret_matches(state.config.webhook_secret.as_deref(), &headers) {
        tracing::warn!("Rejected webhook call with a bad secret token");
        return Err(StatusCode::UNAUTHORIZED);
    }

    let bot = state.bot.clone();
    let update_id = update.id;
    let (chat_id, handled) = match update.kind {
        UpdateKind::Message(message) => (
            Some(message.chat.id),
            handle_message(&bot, &state, message).await,
        ),
        UpdateKind::CallbackQuery(callback) => (
            callback.message.as_ref().map(|m| m.chat.id),
            handle_callback(&bot, &state, callback).await,
        ),
        _ => (None, Ok(())),
    };

    if let Err(e) = handled {
        tracing::error!("Failed to handle update {}: {:#}", update_id, e);
        if let Some(chat_id) = chat_id {
            bot.send_message(chat_id, FAILURE_NOTICE).await.ok();
        }
        return Err(StatusCode::INTERNAL_SERVER_ERROR);
    }

    Ok(Json(json!({"status": "ok"})))
}

fn secret_matches(expected: Option<&str>, headers: &HeaderMap) -> bool {
    match expected {
        None => true,
        Some(expected) => {
            headers.get(SECRET_HEADER).and_then(|v| v.to_str().ok()) == Some(expected)
        }
    }
}

/// Splits `/cmd@bot args` into a lower-case command and its arguments.
/// Commands addressed to another bot are ignored.
pub fn parse_command<'a>(text: &'a str, bot_username: &str) -> Option<(String, &'a str)> {
    let text = text.trim();
    if !text.starts_with('/') {
        return None;
    }
    let (head, args) = match text.split_once(char::is_whitespace) {
        Some((head, args)) => (head, args.trim()),
        None => (text, ""),
    };
    let command = match head.split_once('@') {
        Some((command, mention)) => {
            if !mention.eq_ignore_ascii_case(bot_username) {
                return None;
            }
            command
        }
        None => head,
    };
    Some((command.to_lowercase(), args))
}

async fn handle_message(bot: &Bot, state: &SharedState, msg: Message) -> Result<()> {
    let Some(from) = msg.from() else {
        return Ok(());
    };
    let Some(text) = msg.text() else {
        return Ok(());
    };

    if let Some((command, args)) = parse_command(text, &state.config.bot_username) {
        return match command.as_str() {
            "/start" => survey::handle_start(bot, state, &msg, from, args).await,
            "/bill" => survey::handle_bill(bot, state, &msg, from, args).await,
            "/help" => {
                bot.send_message(msg.chat.id, HELP).await?;
                Ok(())
            }
            cmd if staff::is_staff_command(cmd) => {
                staff::handle_command(bot, state, &msg, from, cmd, args).await
            }
            _ => Ok(()),
        };
    }

    // comments only come from private chats
    if !msg.chat.is_private() {
        return Ok(());
    }
    survey::on_text(bot, state, &msg, from, text).await
}

async fn handle_callback(bot: &Bot, state: &SharedState, q: CallbackQuery) -> Result<()> {
    let Some(action) = q.data.as_deref().and_then(CallbackAction::parse) else {
        tracing::debug!("Unknown callback payload {:?}", q.data);
        bot.answer_callback_query(&q.id).await?;
        return Ok(());
    };

    match action {
        CallbackAction::StartFeedback => survey::start_questions(bot, state, &q).await,
        CallbackAction::Rules => survey::send_rules(bot, state, &q).await,
        CallbackAction::Terms => survey::send_terms(bot, &q).await,
        CallbackAction::Rate(dim, value) => survey::on_rating(bot, state, &q, dim, value).await,
        CallbackAction::CallManager(feedback_id) => {
            survey::on_escalation(bot, state, &q, feedback_id, true).await
        }
        CallbackAction::Continue(feedback_id) => {
            survey::on_escalation(bot, state, &q, feedback_id, false).await
        }
        CallbackAction::Acknowledge(feedback_id) => {
            staff::acknowledge(bot, state, &q, feedback_id).await
        }
        CallbackAction::ShowCode(code) => survey::show_code(bot, state, &q, &code).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_parse_command() {
        assert_eq!(
            parse_command("/start visit_T1_ab", "feedback_bot"),
            Some(("/start".to_string(), "visit_T1_ab"))
        );
        assert_eq!(parse_command("/STATS  week ", "feedback_bot"), Some(("/stats".to_string(), "week")));
        assert_eq!(parse_command("/export", "feedback_bot"), Some(("/export".to_string(), "")));
        assert_eq!(parse_command("hello", "feedback_bot"), None);
    }

    #[test]
    fn test_parse_command_with_mention() {
        assert_eq!(
            parse_command("/redeem@Feedback_Bot rb-abc", "feedback_bot"),
            Some(("/redeem".to_string(), "rb-abc"))
        );
        assert_eq!(parse_command("/redeem@other_bot RB-ABC", "feedback_bot"), None);
    }

    #[test]
    fn test_secret_matches() {
        let mut headers = HeaderMap::new();
        assert!(secret_matches(None, &headers));
        assert!(!secret_matches(Some("hook"), &headers));

        headers.insert(SECRET_HEADER, HeaderValue::from_static("wrong"));
        assert!(!secret_matches(Some("hook"), &headers));

        headers.insert(SECRET_HEADER, HeaderValue::from_static("hook"));
        assert!(secret_matches(Some("hook"), &headers));
    }
}
