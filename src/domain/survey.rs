use crate::domain::models::{RatingDimension, Ratings, SurveyStep, MAX_RATING, MIN_RATING};

/// Ratings at or below this value offer the guest a manager right away.
pub const LOW_RATING_THRESHOLD: i64 = 3;

/// Substrings (lowercase) that flag a comment as a complaint.
pub const NEGATIVE_TRIGGERS: &[&str] = &[
    "холод", "солен", "солё", "долго", "волос", "гряз", "невкус", "остыл", "плохо", "хам",
    "опозд",
];

pub const SKIP_COMMENT: &str = "-";

pub fn is_valid_rating(value: i64) -> bool {
    (MIN_RATING..=MAX_RATING).contains(&value)
}

/// Step that follows a stored answer for `answered`.
pub fn step_after_rating(answered: RatingDimension, ratings: &Ratings) -> SurveyStep {
    match answered.next() {
        Some(next) => SurveyStep::Rating(next),
        None if ratings.has_low(LOW_RATING_THRESHOLD) => SurveyStep::Escalation,
        None => SurveyStep::Comment,
    }
}

/// What a rating button press means for the survey at `step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RatingPress {
    /// Answer to the question the guest is on.
    Current,
    /// Button from an older keyboard for a question already answered.
    Correction,
    /// Question the guest has not reached yet.
    NotReached,
}

pub fn classify_rating_press(step: SurveyStep, dim: RatingDimension, answered: bool) -> RatingPress {
    if step == SurveyStep::Rating(dim) {
        RatingPress::Current
    } else if answered {
        RatingPress::Correction
    } else {
        RatingPress::NotReached
    }
}

/// Step after a correction. A survey that was clean and turns low at the
/// comment step goes back to the manager offer, unless an alert already went
/// out. Otherwise the position does not move.
pub fn step_after_correction(
    step: SurveyStep,
    before: &Ratings,
    after: &Ratings,
    alert_sent: bool,
) -> SurveyStep {
    let turned_low =
        !before.has_low(LOW_RATING_THRESHOLD) && after.has_low(LOW_RATING_THRESHOLD);
    if step == SurveyStep::Comment && turned_low && !alert_sent {
        SurveyStep::Escalation
    } else {
        step
    }
}

/// How free text from a guest is handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextAction {
    Ignore,
    UseButtons,
    Comment,
}

pub fn text_action(step: Option<SurveyStep>) -> TextAction {
    match step {
        None => TextAction::Ignore,
        Some(SurveyStep::Comment) => TextAction::Comment,
        Some(_) => TextAction::UseButtons,
    }
}

/// `-` means the guest skipped the comment.
pub fn normalize_comment(text: &str) -> String {
    let trimmed = text.trim();
    if trimmed == SKIP_COMMENT {
        String::new()
    } else {
        trimmed.to_string()
    }
}

/// Appends a new comment to an earlier one on a separate line.
pub fn merge_comment(existing: Option<&str>, new: &str) -> String {
    match existing.map(str::trim).filter(|s| !s.is_empty()) {
        Some(old) if !new.is_empty() => format!("{old}\n{new}"),
        Some(old) => old.to_string(),
        None => new.to_string(),
    }
}

/// Plain substring match, case-insensitive, not tokenized.
pub fn has_negative_trigger(comment: &str) -> bool {
    let lowered = comment.to_lowercase();
    NEGATIVE_TRIGGERS.iter().any(|k| lowered.contains(k))
}
