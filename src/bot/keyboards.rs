//! Inline keyboards and the callback payloads they carry.
use crate::domain::models::{RatingDimension, MAX_RATING, MIN_RATING};
use teloxide::types::{InlineKeyboardButton, InlineKeyboardMarkup};

const START_FEEDBACK: &str = "start_feedback";
const RULES: &str = "rules";
const TERMS: &str = "terms";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackAction {
    StartFeedback,
    Rules,
    Terms,
    Rate(RatingDimension, i64),
    CallManager(i64),
    Continue(i64),
    Acknowledge(i64),
    ShowCode(String),
}

impl CallbackAction {
    pub fn parse(data: &str) -> Option<Self> {
        match data {
            START_FEEDBACK => return Some(CallbackAction::StartFeedback),
            RULES => return Some(CallbackAction::Rules),
            TERMS => return Some(CallbackAction::Terms),
            _ => {}
        }

        let (kind, rest) = data.split_once(':')?;
        match kind {
            "rate" => {
                let (dim, value) = rest.split_once(':')?;
                let dim = RatingDimension::try_from(dim).ok()?;
                Some(CallbackAction::Rate(dim, value.parse().ok()?))
            }
            "callmgr" => rest.parse().ok().map(CallbackAction::CallManager),
            "cont" => rest.parse().ok().map(CallbackAction::Continue),
            "ack" => rest.parse().ok().map(CallbackAction::Acknowledge),
            "show" if !rest.is_empty() => Some(CallbackAction::ShowCode(rest.to_string())),
            _ => None,
        }
    }
}

pub fn start_kb() -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::callback("Начать", START_FEEDBACK),
        InlineKeyboardButton::callback("Правила акции", RULES),
    ]])
}

pub fn rating_kb(dim: RatingDimension) -> InlineKeyboardMarkup {
    let row: Vec<InlineKeyboardButton> = (MIN_RATING..=MAX_RATING)
        .map(|i| InlineKeyboardButton::callback(format!("⭐{i}"), format!("rate:{}:{i}", dim.as_str())))
        .collect();
    InlineKeyboardMarkup::new(vec![row])
}

pub fn escalation_kb(feedback_id: i64) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::callback("🆘 Позвать менеджера", format!("callmgr:{feedback_id}")),
        InlineKeyboardButton::callback("Нет, продолжить", format!("cont:{feedback_id}")),
    ]])
}

pub fn manager_kb(feedback_id: i64) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![InlineKeyboardButton::callback(
        "Принято",
        format!("ack:{feedback_id}"),
    )]])
}

pub fn prize_kb(code: &str) -> InlineKeyboardMarkup {
    InlineKeyboardMarkup::new(vec![vec![
        InlineKeyboardButton::callback("Показать код", format!("show:{code}")),
        InlineKeyboardButton::callback("Условия", TERMS),
    ]])
}
