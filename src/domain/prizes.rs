//! Prize pool and the weighted draw behind the "wheel of gifts".
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

pub const CODE_PREFIX: &str = "RB-";
const CODE_LEN: usize = 7;
const CODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

#[derive(Error, Debug)]
pub enum PrizePoolError {
    #[error("prize pool is empty")]
    Empty,
    #[error("prize `{0}` has zero weight")]
    ZeroWeight(String),
    #[error("failed to read prize file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse prize file: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prize {
    pub key: String,
    #[serde(alias = "title")]
    pub label: String,
    #[serde(alias = "type")]
    pub category: String,
    pub weight: u32,
}

impl Prize {
    fn new(key: &str, label: &str, category: &str, weight: u32) -> Self {
        Self {
            key: key.to_string(),
            label: label.to_string(),
            category: category.to_string(),
            weight,
        }
    }
}

/// Non-empty, positively weighted list of prizes. Order matters for the draw.
#[derive(Debug, Clone)]
pub struct PrizePool {
    prizes: Vec<Prize>,
    total_weight: u64,
}

impl PrizePool {
    pub fn new(prizes: Vec<Prize>) -> Result<Self, PrizePoolError> {
        if prizes.is_empty() {
            return Err(PrizePoolError::Empty);
        }
        if let Some(p) = prizes.iter().find(|p| p.weight == 0) {
            return Err(PrizePoolError::ZeroWeight(p.key.clone()));
        }
        let total_weight = prizes.iter().map(|p| p.weight as u64).sum();
        Ok(Self {
            prizes,
            total_weight,
        })
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, PrizePoolError> {
        let raw = std::fs::read_to_string(path)?;
        let prizes: Vec<Prize> = serde_json::from_str(&raw)?;
        Self::new(prizes)
    }

    pub fn default_pool() -> Self {
        let prizes = vec![
            Prize::new("coffee", "Городок в будний день в подарок", "gift", 20),
            Prize::new("dessert", "Десерт с витрины в подарок", "gift", 20),
            Prize::new("lemonade", "Любой лимонад 0.4 в подарок", "gift", 15),
            Prize::new("disc10", "Скидка 20% на завтрак", "discount", 15),
            Prize::new("pizza", "Пицца Маргарита", "gift", 10),
            Prize::new("kids", "Детский кулинарный мастер класс (бесплатно)", "service", 10),
            Prize::new("disc20", "Скидка 20% на завтрак", "discount", 5),
            Prize::new("chef", "Скидка 10% на банкет", "gift", 5),
        ];
        Self {
            total_weight: prizes.iter().map(|p| p.weight as u64).sum(),
            prizes,
        }
    }

    pub fn prizes(&self) -> &[Prize] {
        &self.prizes
    }

    pub fn total_weight(&self) -> u64 {
        self.total_weight
    }

    /// Cumulative-sum draw: a uniform integer in `[0, total)` picks the first
    /// prize whose running total exceeds it, so each prize wins with
    /// probability `weight / total`.
    pub fn draw<R: Rng + ?Sized>(&self, rng: &mut R) -> &Prize {
        let roll = rng.gen_range(0..self.total_weight);
        let mut upto = 0u64;
        for prize in &self.prizes {
            upto += prize.weight as u64;
            if roll < upto {
                return prize;
            }
        }
        // unreachable while total_weight is the sum of the weights
        &self.prizes[self.prizes.len() - 1]
    }

    /// `/gifts` listing with each weight as a share of the total.
    pub fn describe(&self) -> String {
        self.prizes
            .iter()
            .map(|p| {
                let share = p.weight as f64 * 100.0 / self.total_weight as f64;
                format!("- {}: {} ({:.0}%)", p.label, p.weight, share)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Human-presentable promo code, e.g. `RB-7K2QX9A`.
pub fn generate_code<R: Rng + ?Sized>(rng: &mut R) -> String {
    let body: String = (0..CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
        .collect();
    format!("{CODE_PREFIX}{body}")
}
