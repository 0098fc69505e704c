use serde::{Deserialize, Serialize};
use sqlx::FromRow;

pub const MIN_RATING: i64 = 1;
pub const MAX_RATING: i64 = 5;

/// The four survey questions, asked in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RatingDimension {
    Service,
    Taste,
    Speed,
    Clean,
}

impl RatingDimension {
    pub const ALL: [RatingDimension; 4] = [
        RatingDimension::Service,
        RatingDimension::Taste,
        RatingDimension::Speed,
        RatingDimension::Clean,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RatingDimension::Service => "service",
            RatingDimension::Taste => "taste",
            RatingDimension::Speed => "speed",
            RatingDimension::Clean => "clean",
        }
    }

    pub fn prompt(&self) -> &'static str {
        match self {
            RatingDimension::Service => "Оцените <b>сервис</b>:",
            RatingDimension::Taste => "Оцените <b>вкус блюд</b>:",
            RatingDimension::Speed => "Оцените <b>скорость подачи</b>:",
            RatingDimension::Clean => "Оцените <b>чистоту и атмосферу</b>:",
        }
    }

    pub fn short_label(&self) -> &'static str {
        match self {
            RatingDimension::Service => "Сервис",
            RatingDimension::Taste => "Вкус",
            RatingDimension::Speed => "Скорость",
            RatingDimension::Clean => "Чистота",
        }
    }

    pub fn next(&self) -> Option<RatingDimension> {
        match self {
            RatingDimension::Service => Some(RatingDimension::Taste),
            RatingDimension::Taste => Some(RatingDimension::Speed),
            RatingDimension::Speed => Some(RatingDimension::Clean),
            RatingDimension::Clean => None,
        }
    }
}

impl TryFrom<&str> for RatingDimension {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim() {
            "service" => Ok(RatingDimension::Service),
            "taste" => Ok(RatingDimension::Taste),
            "speed" => Ok(RatingDimension::Speed),
            "clean" => Ok(RatingDimension::Clean),
            _ => Err(()),
        }
    }
}

/// Where a guest currently is in the survey. Persisted in `survey_sessions.step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SurveyStep {
    Rating(RatingDimension),
    Escalation,
    Comment,
}

impl SurveyStep {
    pub const FIRST: SurveyStep = SurveyStep::Rating(RatingDimension::Service);

    pub fn as_str(&self) -> &'static str {
        match self {
            SurveyStep::Rating(dim) => dim.as_str(),
            SurveyStep::Escalation => "escalation",
            SurveyStep::Comment => "comment",
        }
    }
}

impl TryFrom<&str> for SurveyStep {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim() {
            "escalation" => Ok(SurveyStep::Escalation),
            "comment" => Ok(SurveyStep::Comment),
            other => RatingDimension::try_from(other).map(SurveyStep::Rating),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RewardStatus {
    Issued,
    Redeemed,
    Expired,
}

impl RewardStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RewardStatus::Issued => "issued",
            RewardStatus::Redeemed => "redeemed",
            RewardStatus::Expired => "expired",
        }
    }
}

impl TryFrom<&str> for RewardStatus {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_lowercase().as_str() {
            "issued" => Ok(RewardStatus::Issued),
            "redeemed" => Ok(RewardStatus::Redeemed),
            "expired" => Ok(RewardStatus::Expired),
            _ => Err(()),
        }
    }
}

/// Partial answers of one (user, visit) pair.
#[derive(Debug, Clone, Default, PartialEq, Eq, FromRow)]
pub struct Ratings {
    pub service: Option<i64>,
    pub taste: Option<i64>,
    pub speed: Option<i64>,
    pub clean: Option<i64>,
}

impl Ratings {
    pub fn get(&self, dim: RatingDimension) -> Option<i64> {
        match dim {
            RatingDimension::Service => self.service,
            RatingDimension::Taste => self.taste,
            RatingDimension::Speed => self.speed,
            RatingDimension::Clean => self.clean,
        }
    }

    #[cfg(test)]
    pub fn set(&mut self, dim: RatingDimension, value: i64) {
        match dim {
            RatingDimension::Service => self.service = Some(value),
            RatingDimension::Taste => self.taste = Some(value),
            RatingDimension::Speed => self.speed = Some(value),
            RatingDimension::Clean => self.clean = Some(value),
        }
    }

    pub fn first_unanswered(&self) -> Option<RatingDimension> {
        RatingDimension::ALL
            .iter()
            .copied()
            .find(|dim| self.get(*dim).is_none())
    }

    /// True when any answered question is at or below `threshold`.
    pub fn has_low(&self, threshold: i64) -> bool {
        RatingDimension::ALL
            .iter()
            .filter_map(|dim| self.get(*dim))
            .any(|v| v <= threshold)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatsPeriod {
    Today,
    Week,
    Month,
}

impl StatsPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            StatsPeriod::Today => "today",
            StatsPeriod::Week => "week",
            StatsPeriod::Month => "month",
        }
    }
}

impl TryFrom<&str> for StatsPeriod {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim().to_lowercase().as_str() {
            "" | "today" => Ok(StatsPeriod::Today),
            "week" => Ok(StatsPeriod::Week),
            "month" => Ok(StatsPeriod::Month),
            _ => Err(()),
        }
    }
}
