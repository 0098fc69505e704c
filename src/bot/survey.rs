//! Guest side of the bot: visit entry, the rating steps, the comment and the
//! prize wheel. Every step reads and writes the durable survey session, so a
//! restart in the middle of a survey loses nothing.
use crate::bot::html::html;
use crate::bot::keyboards::{escalation_kb, prize_kb, rating_kb, start_kb};
use crate::bot::staff;
use crate::db::{self, invitations::Invitation, IssuedReward, RewardRow, SurveySession, VisitUsage};
use crate::domain::models::{RatingDimension, SurveyStep};
use crate::domain::survey::{self, RatingPress, TextAction};
use crate::state::SharedState;
use crate::time_utils;
use crate::token;
use anyhow::Result;
use rand::rngs::StdRng;
use rand::SeedableRng;
use teloxide::prelude::*;
use teloxide::types::{CallbackQuery, Message, ParseMode, User};

const WELCOME_VISIT: &str = "👋 Добро пожаловать в <b>Рибамбель</b>!\n\
    Оцените визит (1 минута) — и мы разыграем для вас <b>подарок на следующее посещение</b> 🎁";
const WELCOME_GENERIC: &str = "👋 Добро пожаловать в <b>Рибамбель</b>!\n\
    Сканируйте QR-код на столе или отправьте /bill &lt;номер счёта&gt;, чтобы участвовать в розыгрыше подарков.";
const INVITATION: &str = "🙏 Спасибо, что были у нас в <b>Рибамбель</b>!\n\
    Оцените визит (1 минута) — и получите <b>подарок на следующее посещение</b> 🎁";
const ALREADY_USED: &str = "❗️ По этому визиту отзыв уже был оставлен.\nСпасибо за участие!";
const SESSION_EXPIRED: &str = "Опрос не найден или устарел. Отсканируйте QR-код ещё раз.";
const ESCALATION_PROMPT: &str = "Нам важно исправить ситуацию. Позвать менеджера сейчас?";
const COMMENT_PROMPT: &str =
    "Оставите короткий комментарий? Напишите сообщением или отправьте «-» чтобы пропустить.";
const MANAGER_CALLED: &str =
    "✅ Менеджер уже уведомлён и подойдёт к вам. А пока напишите комментарий, пожалуйста.";
const USE_BUTTONS: &str = "Пожалуйста, выберите оценку кнопками выше ⭐";
const BILL_USAGE: &str = "Использование: /bill &lt;номер счёта&gt;";
const BILL_NOT_FOUND: &str = "Счёт с таким номером не найден. Проверьте номер на чеке.";
const BILL_RATE_LIMITED: &str = "Слишком много попыток. Попробуйте через несколько минут.";

/// How a guest reached the survey; only the greeting differs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
    Link,
    Bill,
    Invitation,
}

fn user_key(user: &User) -> i64 {
    user.id.0 as i64
}

pub fn rules_text(valid_days: i64) -> String {
    format!(
        "🎯 <b>Правила акции</b>\n\
        • После короткой оценки вы получаете случайный приз на следующее посещение.\n\
        • Промокод действует {valid_days} дней. Один код = один стол.\n\
        • Не суммируется с другими акциями (если не указано иначе)."
    )
}

pub fn terms_text() -> &'static str {
    "• Приз действует в течение указанного срока.\n\
    • 1 код = 1 стол. Не суммируется с другими акциями (если не указано иначе).\n\
    • Предъявите код до закрытия счёта."
}

pub fn reward_message(reward: &IssuedReward) -> String {
    format!(
        "🎉 Вам выпал приз: <b>{}</b>\n\
        Ваш промокод: <code>{}</code>\n\
        Действует до <b>{}</b>.\n\
        Покажите код официанту перед закрытием счёта.",
        html(&reward.prize.label),
        html(&reward.code),
        time_utils::format_date(reward.valid_until)
    )
}

pub fn code_card(row: &RewardRow) -> String {
    let valid = time_utils::parse_timestamp(&row.valid_until)
        .map(time_utils::format_date)
        .unwrap_or_else(|| "-".to_string());
    format!(
        "🎟 Промокод <code>{}</code>\nПриз: <b>{}</b>\nСтатус: {}\nДействует до: {}",
        html(&row.code),
        html(&row.title),
        html(&row.status),
        valid
    )
}

/// `/start [payload]`: a signed visit link opens the survey, anything else
/// gets the generic welcome.
pub async fn handle_start(
    bot: &Bot,
    state: &SharedState,
    msg: &Message,
    from: &User,
    payload: &str,
) -> Result<()> {
    let user_id = user_key(from);
    db::ensure_guest(&state.pool, user_id, from.username.as_deref()).await?;

    if let Some(bill) = payload.strip_prefix("bill_") {
        return handle_bill(bot, state, msg, from, bill).await;
    }

    match token::parse_start_payload(payload, &state.config.secret_key) {
        Some(visit_id) => {
            begin_visit(bot, state, msg.chat.id, user_id, &visit_id, Entry::Link).await?;
        }
        None => {
            if !payload.is_empty() {
                tracing::debug!("Rejected start payload from user {}", user_id);
            }
            bot.send_message(msg.chat.id, WELCOME_GENERIC)
                .parse_mode(ParseMode::Html)
                .await?;
        }
    }
    Ok(())
}

/// `/bill <number>`: a bill imported from the till opens the survey.
pub async fn handle_bill(
    bot: &Bot,
    state: &SharedState,
    msg: &Message,
    from: &User,
    bill: &str,
) -> Result<()> {
    let bill = bill.trim();
    if bill.is_empty() {
        bot.send_message(msg.chat.id, BILL_USAGE)
            .parse_mode(ParseMode::Html)
            .await?;
        return Ok(());
    }

    let user_id = user_key(from);
    if !state.bill_limiter.try_acquire(user_id).await {
        tracing::warn!("Bill lookup rate limit hit by user {}", user_id);
        bot.send_message(msg.chat.id, BILL_RATE_LIMITED).await?;
        return Ok(());
    }

    match db::invitations::find_invitation(&state.pool, bill).await? {
        Some(invitation) => {
            db::ensure_guest(&state.pool, user_id, from.username.as_deref()).await?;
            begin_visit(bot, state, msg.chat.id, user_id, &invitation.bill_id, Entry::Bill).await?;
        }
        None => {
            bot.send_message(msg.chat.id, BILL_NOT_FOUND).await?;
        }
    }
    Ok(())
}

/// Opens the survey for an unused visit. Returns false when the visit was
/// already used; guests who came by link or bill are told so.
pub async fn begin_visit(
    bot: &Bot,
    state: &SharedState,
    chat_id: ChatId,
    user_id: i64,
    visit_id: &str,
    entry: Entry,
) -> Result<bool> {
    let usable = db::visit_usage(&state.pool, visit_id, user_id).await? != VisitUsage::Used
        && db::record_visit(&state.pool, visit_id, user_id).await?;
    if !usable {
        tracing::info!("Visit {} already used, user {}", visit_id, user_id);
        if entry != Entry::Invitation {
            bot.send_message(chat_id, ALREADY_USED).await?;
        }
        return Ok(false);
    }

    db::open_session(
        &state.pool,
        user_id,
        visit_id,
        state.config.session_ttl_minutes,
        time_utils::now(),
    )
    .await?;

    let greeting = match entry {
        Entry::Link | Entry::Bill => WELCOME_VISIT,
        Entry::Invitation => INVITATION,
    };
    bot.send_message(chat_id, greeting)
        .parse_mode(ParseMode::Html)
        .reply_markup(start_kb())
        .await?;
    tracing::info!("Survey opened for user {} visit {} ({:?})", user_id, visit_id, entry);
    Ok(true)
}

pub async fn send_invitation(bot: &Bot, state: &SharedState, invitation: &Invitation) -> Result<bool> {
    begin_visit(
        bot,
        state,
        ChatId(invitation.chat_id),
        invitation.chat_id,
        &invitation.bill_id,
        Entry::Invitation,
    )
    .await
}

async fn send_step_prompt(
    bot: &Bot,
    state: &SharedState,
    chat_id: ChatId,
    session: &SurveySession,
) -> Result<()> {
    match session.step {
        SurveyStep::Rating(dim) => {
            bot.send_message(chat_id, dim.prompt())
                .parse_mode(ParseMode::Html)
                .reply_markup(rating_kb(dim))
                .await?;
        }
        SurveyStep::Escalation => {
            let row = db::find_feedback(&state.pool, session.user_id, &session.visit_id)
                .await?
                .ok_or_else(|| anyhow::anyhow!("escalation without feedback for {}", session.user_id))?;
            bot.send_message(chat_id, ESCALATION_PROMPT)
                .reply_markup(escalation_kb(row.id))
                .await?;
        }
        SurveyStep::Comment => {
            bot.send_message(chat_id, COMMENT_PROMPT).await?;
        }
    }
    Ok(())
}

/// "Start" button: shows the question the guest is currently on.
pub async fn start_questions(bot: &Bot, state: &SharedState, q: &CallbackQuery) -> Result<()> {
    bot.answer_callback_query(&q.id).await?;
    let Some(msg) = q.message.as_ref() else {
        return Ok(());
    };
    let user_id = user_key(&q.from);
    match db::load_session(&state.pool, user_id, time_utils::now()).await? {
        Some(session) => send_step_prompt(bot, state, msg.chat.id, &session).await,
        None => {
            bot.send_message(msg.chat.id, SESSION_EXPIRED).await?;
            Ok(())
        }
    }
}

pub async fn on_rating(
    bot: &Bot,
    state: &SharedState,
    q: &CallbackQuery,
    dim: RatingDimension,
    value: i64,
) -> Result<()> {
    let Some(msg) = q.message.as_ref() else {
        bot.answer_callback_query(&q.id).await?;
        return Ok(());
    };
    if !survey::is_valid_rating(value) {
        bot.answer_callback_query(&q.id).text("Некорректная оценка").await?;
        return Ok(());
    }

    let user_id = user_key(&q.from);
    let now = time_utils::now();
    let Some(session) = db::load_session(&state.pool, user_id, now).await? else {
        bot.answer_callback_query(&q.id)
            .text(SESSION_EXPIRED)
            .show_alert(true)
            .await?;
        return Ok(());
    };

    let before = db::find_feedback(&state.pool, user_id, &session.visit_id)
        .await?
        .map(|row| row.ratings())
        .unwrap_or_default();
    match survey::classify_rating_press(session.step, dim, before.get(dim).is_some()) {
        RatingPress::Current => {}
        RatingPress::NotReached => {
            bot.answer_callback_query(&q.id)
                .text("Ответьте, пожалуйста, на текущий вопрос")
                .await?;
            return Ok(());
        }
        RatingPress::Correction => {
            let row = db::store_rating(&state.pool, user_id, &session.visit_id, dim, value, now).await?;
            bot.answer_callback_query(&q.id).text("Оценка обновлена").await?;
            let next = survey::step_after_correction(session.step, &before, &row.ratings(), row.alert_sent);
            if next != session.step {
                db::set_session_step(&state.pool, user_id, next, state.config.session_ttl_minutes, now)
                    .await?;
                let session = SurveySession { step: next, ..session };
                send_step_prompt(bot, state, msg.chat.id, &session).await?;
            }
            return Ok(());
        }
    }

    let row = db::store_rating(&state.pool, user_id, &session.visit_id, dim, value, now).await?;
    let next = survey::step_after_rating(dim, &row.ratings());
    db::set_session_step(&state.pool, user_id, next, state.config.session_ttl_minutes, now).await?;
    bot.answer_callback_query(&q.id).await?;

    match next {
        SurveyStep::Rating(next_dim) => {
            bot.edit_message_text(msg.chat.id, msg.id, next_dim.prompt())
                .parse_mode(ParseMode::Html)
                .reply_markup(rating_kb(next_dim))
                .await?;
        }
        SurveyStep::Escalation => {
            bot.edit_message_text(msg.chat.id, msg.id, ESCALATION_PROMPT)
                .reply_markup(escalation_kb(row.id))
                .await?;
        }
        SurveyStep::Comment => {
            bot.edit_message_text(msg.chat.id, msg.id, COMMENT_PROMPT).await?;
        }
    }
    Ok(())
}

/// Answer to the "call a manager?" offer. Either way the survey moves on to
/// the comment.
pub async fn on_escalation(
    bot: &Bot,
    state: &SharedState,
    q: &CallbackQuery,
    feedback_id: i64,
    call_manager: bool,
) -> Result<()> {
    let Some(msg) = q.message.as_ref() else {
        bot.answer_callback_query(&q.id).await?;
        return Ok(());
    };
    let user_id = user_key(&q.from);
    let now = time_utils::now();

    let session = db::load_session(&state.pool, user_id, now).await?;
    let row = db::find_feedback_by_id(&state.pool, feedback_id).await?;
    let (Some(session), Some(row)) = (session, row) else {
        bot.answer_callback_query(&q.id).text(SESSION_EXPIRED).await?;
        return Ok(());
    };
    if session.step != SurveyStep::Escalation
        || row.user_id != user_id
        || row.visit_id != session.visit_id
    {
        bot.answer_callback_query(&q.id).text(SESSION_EXPIRED).await?;
        return Ok(());
    }

    db::set_session_step(
        &state.pool,
        user_id,
        SurveyStep::Comment,
        state.config.session_ttl_minutes,
        now,
    )
    .await?;

    if call_manager {
        staff::raise_alert(bot, state, &row, q.from.username.as_deref(), None).await?;
        bot.answer_callback_query(&q.id).text("Менеджер уведомлён").await?;
        bot.edit_message_text(msg.chat.id, msg.id, MANAGER_CALLED).await?;
    } else {
        bot.answer_callback_query(&q.id).await?;
        bot.edit_message_text(msg.chat.id, msg.id, COMMENT_PROMPT).await?;
    }
    Ok(())
}

/// Free text from a guest. Only meaningful at the comment step; guests who
/// are not mid-survey are ignored.
pub async fn on_text(
    bot: &Bot,
    state: &SharedState,
    msg: &Message,
    from: &User,
    text: &str,
) -> Result<()> {
    let user_id = user_key(from);
    let session = db::load_session(&state.pool, user_id, time_utils::now()).await?;
    match survey::text_action(session.as_ref().map(|s| s.step)) {
        TextAction::Ignore => return Ok(()),
        TextAction::UseButtons => {
            bot.send_message(msg.chat.id, USE_BUTTONS).await?;
            return Ok(());
        }
        TextAction::Comment => {}
    }
    let Some(session) = session else {
        return Ok(());
    };

    let row = db::find_feedback(&state.pool, user_id, &session.visit_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("comment step without feedback for user {user_id}"))?;

    if let Some(missing) = row.ratings().first_unanswered() {
        tracing::warn!("User {} reached the comment with `{}` unanswered", user_id, missing.as_str());
        let session = SurveySession {
            step: SurveyStep::Rating(missing),
            ..session
        };
        db::set_session_step(
            &state.pool,
            user_id,
            session.step,
            state.config.session_ttl_minutes,
            time_utils::now(),
        )
        .await?;
        return send_step_prompt(bot, state, msg.chat.id, &session).await;
    }

    let comment = survey::normalize_comment(text);
    let merged = survey::merge_comment(row.comment.as_deref(), &comment);
    db::save_comment(&state.pool, row.id, &merged).await?;

    if survey::has_negative_trigger(&merged) {
        staff::raise_alert(bot, state, &row, from.username.as_deref(), Some(&merged)).await?;
    }

    run_prize_flow(bot, state, msg.chat.id, user_id, &session.visit_id).await
}

async fn run_prize_flow(
    bot: &Bot,
    state: &SharedState,
    chat_id: ChatId,
    user_id: i64,
    visit_id: &str,
) -> Result<()> {
    bot.send_message(chat_id, "🎡 Запускаем колесо подарков…").await?;

    let mut rng = StdRng::from_entropy();
    let reward = db::issue_reward(
        &state.pool,
        &mut rng,
        &state.prizes,
        user_id,
        visit_id,
        state.config.promo_valid_days,
        time_utils::now(),
    )
    .await?;
    let Some(reward) = reward else {
        tracing::warn!("Visit {} of user {} already rewarded", visit_id, user_id);
        bot.send_message(chat_id, ALREADY_USED).await?;
        return Ok(());
    };
    tracing::info!(
        "Issued {} ({}) to user {} for visit {}",
        reward.code,
        reward.prize.key,
        user_id,
        visit_id
    );

    bot.send_message(chat_id, reward_message(&reward))
        .parse_mode(ParseMode::Html)
        .reply_markup(prize_kb(&reward.code))
        .await?;
    Ok(())
}

/// "Show code" button; only the owner or staff may see a code.
pub async fn show_code(bot: &Bot, state: &SharedState, q: &CallbackQuery, code: &str) -> Result<()> {
    let user_id = user_key(&q.from);
    let chat_id = q.message.as_ref().map(|m| m.chat.id);
    let row = db::find_reward(&state.pool, code).await?;

    let visible = row.filter(|r| {
        r.user_id == user_id
            || state
                .config
                .is_staff(user_id, chat_id.map(|c| c.0).unwrap_or(user_id))
    });
    let (Some(row), Some(chat_id)) = (visible, chat_id) else {
        bot.answer_callback_query(&q.id)
            .text("Код не найден")
            .show_alert(true)
            .await?;
        return Ok(());
    };

    bot.answer_callback_query(&q.id).await?;
    bot.send_message(chat_id, code_card(&row))
        .parse_mode(ParseMode::Html)
        .await?;
    Ok(())
}

pub async fn send_rules(bot: &Bot, state: &SharedState, q: &CallbackQuery) -> Result<()> {
    bot.answer_callback_query(&q.id).await?;
    if let Some(msg) = q.message.as_ref() {
        bot.send_message(msg.chat.id, rules_text(state.config.promo_valid_days))
            .parse_mode(ParseMode::Html)
            .await?;
    }
    Ok(())
}

pub async fn send_terms(bot: &Bot, q: &CallbackQuery) -> Result<()> {
    bot.answer_callback_query(&q.id).await?;
    if let Some(msg) = q.message.as_ref() {
        bot.send_message(msg.chat.id, terms_text()).await?;
    }
    Ok(())
}
