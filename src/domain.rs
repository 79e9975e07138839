use std::fmt;
use std::str::FromStr;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::KiraError;

pub const MIN_CONFIDENCE_THRESHOLD: u32 = 150;
pub const MAX_CONFIDENCE_THRESHOLD: u32 = 1000;
pub const HIGH_CONFIDENCE_SCORE: u32 = 700;
pub const MEDIUM_CONFIDENCE_SCORE: u32 = 400;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    Full,
    Physical,
    Functional,
}

impl NetworkType {
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkType::Full => "full",
            NetworkType::Physical => "physical",
            NetworkType::Functional => "functional",
        }
    }

    /// STRING only distinguishes physical and functional networks; the full
    /// network is the functional one.
    pub fn string_param(&self) -> &'static str {
        match self {
            NetworkType::Physical => "physical",
            NetworkType::Full | NetworkType::Functional => "functional",
        }
    }

    pub fn interaction_type(&self) -> &'static str {
        self.string_param()
    }
}

impl fmt::Display for NetworkType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for NetworkType {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "full" => Ok(NetworkType::Full),
            "physical" => Ok(NetworkType::Physical),
            "functional" => Ok(NetworkType::Functional),
            _ => Err(KiraError::InvalidNetworkType(value.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum IdFormat {
    Symbol,
    Ensembl,
    Uniprot,
    Entrez,
}

impl IdFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            IdFormat::Symbol => "symbol",
            IdFormat::Ensembl => "ensembl",
            IdFormat::Uniprot => "uniprot",
            IdFormat::Entrez => "entrez",
        }
    }

    /// Normalizes a raw identifier for this format, or explains why it can
    /// never resolve.
    pub fn normalize(&self, raw: &str) -> Result<String, String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err("empty identifier".to_string());
        }
        match self {
            IdFormat::Symbol | IdFormat::Uniprot => Ok(trimmed.to_uppercase()),
            IdFormat::Ensembl => {
                let upper = trimmed.to_uppercase();
                let base = match upper.split_once('.') {
                    Some((base, version))
                        if !version.is_empty() && version.chars().all(|ch| ch.is_ascii_digit()) =>
                    {
                        base.to_string()
                    }
                    _ => upper,
                };
                if !base.starts_with("ENS") {
                    return Err(format!("not an Ensembl identifier: {trimmed}"));
                }
                Ok(base)
            }
            IdFormat::Entrez => {
                if trimmed.chars().all(|ch| ch.is_ascii_digit()) {
                    Ok(trimmed.to_string())
                } else {
                    Err(format!("not an Entrez gene id: {trimmed}"))
                }
            }
        }
    }
}

impl fmt::Display for IdFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for IdFormat {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "symbol" => Ok(IdFormat::Symbol),
            "ensembl" => Ok(IdFormat::Ensembl),
            "uniprot" => Ok(IdFormat::Uniprot),
            "entrez" => Ok(IdFormat::Entrez),
            _ => Err(KiraError::InvalidIdFormat(value.to_string())),
        }
    }
}

/// NCBI taxonomy id of the organism the genes belong to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Species(u32);

impl Species {
    pub const HUMAN: Species = Species(9606);

    pub fn taxon_id(&self) -> u32 {
        self.0
    }
}

impl Default for Species {
    fn default() -> Self {
        Species::HUMAN
    }
}

impl fmt::Display for Species {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Species {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let normalized = value.trim();
        match normalized.parse::<u32>() {
            Ok(taxon) if taxon > 0 => Ok(Self(taxon)),
            _ => Err(KiraError::InvalidSpecies(value.to_string())),
        }
    }
}

/// Minimum interaction score on STRING's 0-1000 scale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct ConfidenceThreshold(u32);

impl ConfidenceThreshold {
    pub fn new(value: u32) -> Result<Self, KiraError> {
        if !(MIN_CONFIDENCE_THRESHOLD..=MAX_CONFIDENCE_THRESHOLD).contains(&value) {
            return Err(KiraError::InvalidThreshold(value));
        }
        Ok(Self(value))
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl Default for ConfidenceThreshold {
    fn default() -> Self {
        Self(MEDIUM_CONFIDENCE_SCORE)
    }
}

impl TryFrom<u32> for ConfidenceThreshold {
    type Error = KiraError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ConfidenceThreshold> for u32 {
    fn from(value: ConfidenceThreshold) -> Self {
        value.0
    }
}

impl fmt::Display for ConfidenceThreshold {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfidenceLevel {
    Low,
    Medium,
    High,
}

impl ConfidenceLevel {
    pub fn classify(score: u32) -> Self {
        if score >= HIGH_CONFIDENCE_SCORE {
            ConfidenceLevel::High
        } else if score >= MEDIUM_CONFIDENCE_SCORE {
            ConfidenceLevel::Medium
        } else {
            ConfidenceLevel::Low
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfidenceLevel::Low => "low",
            ConfidenceLevel::Medium => "medium",
            ConfidenceLevel::High => "high",
        }
    }
}

impl fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ConfidenceLevel {
    type Err = KiraError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "low" => Ok(ConfidenceLevel::Low),
            "medium" => Ok(ConfidenceLevel::Medium),
            "high" => Ok(ConfidenceLevel::High),
            other => Err(KiraError::Store(format!("unknown confidence level: {other}"))),
        }
    }
}
