//! Staff side: alerts to the managers chat, code redemption and reports.
use crate::bot::html::html;
use crate::bot::keyboards::manager_kb;
use crate::config::Config;
use crate::db::{self, FeedbackRow, FeedbackStats, RedeemError, RewardRow};
use crate::domain::models::{RatingDimension, StatsPeriod};
use crate::export;
use crate::state::SharedState;
use crate::time_utils;
use anyhow::Result;
use sqlx::SqlitePool;
use teloxide::prelude::*;
use teloxide::types::{CallbackQuery, InputFile, Message, ParseMode, User};

pub const STAFF_COMMANDS: [&str; 4] = ["/redeem", "/gifts", "/stats", "/export"];

const NOT_STAFF: &str = "⛔ Команда доступна только персоналу.";

pub fn is_staff_command(command: &str) -> bool {
    STAFF_COMMANDS.contains(&command)
}

fn display_name(user: &User) -> String {
    match &user.username {
        Some(username) => format!("@{username}"),
        None => user.first_name.clone(),
    }
}

pub fn alert_message(row: &FeedbackRow, username: Option<&str>, comment: Option<&str>) -> String {
    let ratings = row.ratings();
    let scores = RatingDimension::ALL
        .iter()
        .map(|dim| {
            let value = ratings
                .get(*dim)
                .map(|v| v.to_string())
                .unwrap_or_else(|| "—".to_string());
            format!("{}: {}", dim.short_label(), value)
        })
        .collect::<Vec<_>>()
        .join(" · ");

    let guest = match username {
        Some(name) => format!("@{} (id {})", html(name), row.user_id),
        None => format!("id {}", row.user_id),
    };

    let mut text = format!(
        "🚨 <b>Гостю нужна помощь</b> (отзыв #{})\n\
        Гость: {guest}\n\
        Визит: <code>{}</code>\n\
        {scores}",
        row.id,
        html(&row.visit_id)
    );
    if let Some(comment) = comment.or(row.comment.as_deref()).filter(|c| !c.is_empty()) {
        text.push_str(&format!("\nКомментарий: {}", html(comment)));
    }
    text
}

/// Claims the single alert a feedback may raise. Disabled alerts are logged
/// and leave the flag unclaimed.
pub async fn claim_alert_slot(pool: &SqlitePool, config: &Config, feedback_id: i64) -> Result<bool> {
    if !config.alerts_enabled() {
        tracing::warn!("MANAGERS_CHAT_ID not set, alert for feedback {} dropped", feedback_id);
        return Ok(false);
    }
    if !db::claim_alert(pool, feedback_id).await? {
        tracing::debug!("Alert for feedback {} already sent", feedback_id);
        return Ok(false);
    }
    Ok(true)
}

/// Sends at most one alert per feedback. Delivery failures are logged and
/// never interrupt the guest's survey.
pub async fn raise_alert(
    bot: &Bot,
    state: &SharedState,
    row: &FeedbackRow,
    username: Option<&str>,
    comment: Option<&str>,
) -> Result<()> {
    if !claim_alert_slot(&state.pool, &state.config, row.id).await? {
        return Ok(());
    }

    let text = alert_message(row, username, comment);
    let sent = bot
        .send_message(ChatId(state.config.managers_chat_id), text)
        .parse_mode(ParseMode::Html)
        .reply_markup(manager_kb(row.id))
        .await;
    match sent {
        Ok(_) => tracing::info!("Alert sent for feedback {}", row.id),
        Err(e) => tracing::warn!("Failed to deliver alert for feedback {}: {}", row.id, e),
    }
    Ok(())
}

/// "Accepted" button under an alert.
pub async fn acknowledge(bot: &Bot, state: &SharedState, q: &CallbackQuery, feedback_id: i64) -> Result<()> {
    let staff_id = q.from.id.0 as i64;
    let Some(msg) = q.message.as_ref() else {
        bot.answer_callback_query(&q.id).await?;
        return Ok(());
    };
    if !state.config.is_staff(staff_id, msg.chat.id.0) {
        bot.answer_callback_query(&q.id)
            .text("Недостаточно прав")
            .show_alert(true)
            .await?;
        return Ok(());
    }

    if !db::acknowledge_alert(&state.pool, feedback_id, staff_id, time_utils::now()).await? {
        bot.answer_callback_query(&q.id).text("Уже принято").await?;
        return Ok(());
    }

    tracing::info!("Alert for feedback {} acknowledged by {}", feedback_id, staff_id);
    bot.answer_callback_query(&q.id).text("Принято").await?;
    bot.edit_message_reply_markup(msg.chat.id, msg.id).await?;
    bot.send_message(
        msg.chat.id,
        format!("✅ Принял(а): {}", html(display_name(&q.from))),
    )
    .parse_mode(ParseMode::Html)
    .await?;
    Ok(())
}

pub fn redeem_reply(code: &str, outcome: Result<RewardRow, RedeemError>) -> Result<String> {
    let code = html(code);
    let text = match outcome {
        Ok(row) => format!("✅ Код <code>{code}</code> погашен.\nПриз: <b>{}</b>", html(&row.title)),
        Err(RedeemError::NotFound) => format!("❌ Код <code>{code}</code> не найден."),
        Err(RedeemError::Expired) => format!("⌛️ Срок действия кода <code>{code}</code> истёк."),
        Err(RedeemError::NotRedeemable(status)) if status == "redeemed" => {
            format!("⚠️ Код <code>{code}</code> уже погашен.")
        }
        Err(RedeemError::NotRedeemable(status)) => {
            format!("⚠️ Код <code>{code}</code> недействителен (статус: {}).", html(status))
        }
        Err(RedeemError::InvalidExpiry(_)) => format!(
            "⚠️ У кода <code>{code}</code> некорректный срок действия. Обратитесь к администратору."
        ),
        Err(RedeemError::Db(e)) => return Err(e.into()),
    };
    Ok(text)
}

fn period_label(period: StatsPeriod) -> &'static str {
    match period {
        StatsPeriod::Today => "сегодня",
        StatsPeriod::Week => "7 дней",
        StatsPeriod::Month => "30 дней",
    }
}

pub fn stats_message(period: StatsPeriod, stats: &FeedbackStats) -> String {
    let avg = |value: Option<f64>| {
        value
            .map(|v| format!("{v:.2}"))
            .unwrap_or_else(|| "—".to_string())
    };
    format!(
        "📊 Статистика за {}\n\
        Отзывов: {}\n\
        Сервис: {}\n\
        Вкус: {}\n\
        Скорость: {}\n\
        Чистота: {}",
        period_label(period),
        stats.count,
        avg(stats.avg_service),
        avg(stats.avg_taste),
        avg(stats.avg_speed),
        avg(stats.avg_clean)
    )
}

pub async fn handle_command(
    bot: &Bot,
    state: &SharedState,
    msg: &Message,
    from: &User,
    command: &str,
    args: &str,
) -> Result<()> {
    let staff_id = from.id.0 as i64;
    if !state.config.is_staff(staff_id, msg.chat.id.0) {
        tracing::warn!("User {} tried staff command {}", staff_id, command);
        bot.send_message(msg.chat.id, NOT_STAFF).await?;
        return Ok(());
    }

    match command {
        "/redeem" => {
            let code = args.trim().to_uppercase();
            if code.is_empty() {
                bot.send_message(msg.chat.id, "Использование: /redeem &lt;КОД&gt;")
                    .parse_mode(ParseMode::Html)
                    .await?;
                return Ok(());
            }
            let outcome = db::redeem_reward(&state.pool, &code, staff_id, time_utils::now()).await;
            if outcome.is_ok() {
                tracing::info!("Promo {} redeemed by {}", code, staff_id);
            }
            let reply = redeem_reply(&code, outcome)?;
            bot.send_message(msg.chat.id, reply)
                .parse_mode(ParseMode::Html)
                .await?;
        }
        "/gifts" => {
            let text = format!("🎁 Призы и шансы:\n{}", state.prizes.describe());
            bot.send_message(msg.chat.id, text).await?;
        }
        "/stats" => {
            let Ok(period) = StatsPeriod::try_from(args) else {
                bot.send_message(msg.chat.id, "Использование: /stats [today|week|month]")
                    .await?;
                return Ok(());
            };
            let since = time_utils::period_start(period, time_utils::now());
            let stats = db::feedback_stats(&state.pool, since).await?;
            bot.send_message(msg.chat.id, stats_message(period, &stats)).await?;
        }
        "/export" => {
            let rows = db::export_rows(&state.pool).await?;
            let csv = export::render_csv(&rows);
            tracing::info!("Export of {} rows requested by {}", rows.len(), staff_id);
            bot.send_document(
                msg.chat.id,
                InputFile::memory(csv.into_bytes()).file_name(export::EXPORT_FILE_NAME),
            )
            .caption(format!("Строк: {}", rows.len()))
            .await?;
        }
        _ => {}
    }
    Ok(())
}
