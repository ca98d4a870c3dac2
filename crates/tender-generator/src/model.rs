use std::fmt;
use std::str::FromStr;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::error::{SectionGenerationFailure, ValidationError};

/// Minimum description length (characters, after trimming) accepted for generation.
pub const MIN_DESCRIPTION_CHARS: usize = 20;

/// Structured project description supplied by the requester. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ProjectBrief {
    pub title: String,
    pub location: String,
    /// Free-form, e.g. "6 months".
    pub duration: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<Budget>,
    pub description: String,
}

impl ProjectBrief {
    pub fn new(
        title: impl Into<String>,
        location: impl Into<String>,
        duration: impl Into<String>,
        description: impl Into<String>,
    ) -> Self {
        Self {
            title: title.into(),
            location: location.into(),
            duration: duration.into(),
            budget: None,
            description: description.into(),
        }
    }

    pub fn with_budget(mut self, budget: Budget) -> Self {
        self.budget = Some(budget);
        self
    }

    /// Reject briefs that would only produce garbage.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.title.trim().is_empty() {
            return Err(ValidationError::EmptyTitle);
        }
        let description = self.description.trim();
        if description.is_empty() {
            return Err(ValidationError::EmptyDescription);
        }
        let len = description.chars().count();
        if len < MIN_DESCRIPTION_CHARS {
            return Err(ValidationError::DescriptionTooShort {
                len,
                min: MIN_DESCRIPTION_CHARS,
            });
        }
        Ok(())
    }

    pub fn budget_display(&self) -> String {
        match &self.budget {
            Some(budget) => budget.to_string(),
            None => "Not specified".to_string(),
        }
    }
}

/// Project budget: either a plain amount or free text such as "USD 2.5M".
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum Budget {
    Amount(f64),
    Text(String),
}

impl fmt::Display for Budget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Budget::Amount(amount) => write!(f, "{amount}"),
            Budget::Text(text) => f.write_str(text.trim()),
        }
    }
}

/// One of the six fixed parts of a tender document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SectionId {
    NoticeInvitingTender,
    BriefIntroduction,
    InstructionToBidders,
    ScopeOfWork,
    TermsAndConditions,
    PriceBid,
}

impl SectionId {
    pub fn as_str(self) -> &'static str {
        self.spec().id_str
    }

    pub fn spec(self) -> &'static SectionSpec {
        let idx = SECTIONS
            .iter()
            .position(|s| s.id == self)
            .unwrap_or_default();
        &SECTIONS[idx]
    }
}

impl fmt::Display for SectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SectionId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SECTIONS
            .iter()
            .find(|spec| spec.id_str.eq_ignore_ascii_case(s.trim()))
            .map(|spec| spec.id)
            .ok_or_else(|| format!("unknown section id: {s}"))
    }
}

/// Static description of a section.
#[derive(Debug)]
pub struct SectionSpec {
    pub id: SectionId,
    id_str: &'static str,
    pub display_name: &'static str,
    /// What the section is for; used in the generation instruction.
    pub purpose: &'static str,
}

/// Canonical document order. Output always follows it.
pub static SECTIONS: [SectionSpec; 6] = [
    SectionSpec {
        id: SectionId::NoticeInvitingTender,
        id_str: "NOTICE_INVITING_TENDER",
        display_name: "NOTICE INVITING TENDER",
        purpose: "formally announces the tender, naming the issuing authority, the work, key dates, \
                  bid security and where tender documents can be obtained and submitted",
    },
    SectionSpec {
        id: SectionId::BriefIntroduction,
        id_str: "BRIEF_INTRODUCTION",
        display_name: "BRIEF INTRODUCTION",
        purpose: "introduces the project, its background, objectives and location to prospective bidders",
    },
    SectionSpec {
        id: SectionId::InstructionToBidders,
        id_str: "INSTRUCTION_TO_BIDDERS",
        display_name: "INSTRUCTION TO BIDDERS",
        purpose: "tells bidders how to prepare, sign, seal and submit bids, eligibility requirements, \
                  clarification procedure and how bids will be evaluated",
    },
    SectionSpec {
        id: SectionId::ScopeOfWork,
        id_str: "SCOPE_OF_WORK",
        display_name: "SCOPE OF WORK",
        purpose: "defines the work to be executed, deliverables, technical requirements, standards and \
                  the completion schedule",
    },
    SectionSpec {
        id: SectionId::TermsAndConditions,
        id_str: "TERMS_AND_CONDITIONS",
        display_name: "TERMS AND CONDITIONS",
        purpose: "sets out the contractual terms: payment, securities, liquidated damages, defects \
                  liability, termination, dispute resolution and governing law",
    },
    SectionSpec {
        id: SectionId::PriceBid,
        id_str: "PRICE_BID",
        display_name: "PRICE BID",
        purpose: "provides the schedule of quantities and the price format bidders must complete, \
                  including taxes and validity of the offer",
    },
];

/// Fixed-dimension embedding of one query text. Never cached across requests.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingVector(Vec<f32>);

impl EmbeddingVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn dimensions(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }
}

/// A historical section returned by a similarity query.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievedNeighbor {
    pub text: String,
    pub section: SectionId,
    /// Cosine similarity in `[-1, 1]`.
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SectionStatus {
    Success,
    Failed,
}

/// Output of generating one section. A retry produces a new value rather than mutating one.
#[derive(Debug, Clone, PartialEq)]
pub struct SectionResult {
    section: SectionId,
    text: String,
    status: SectionStatus,
    error: Option<String>,
    attempts: u32,
}

impl SectionResult {
    pub fn success(section: SectionId, text: String, attempts: u32) -> Self {
        Self {
            section,
            text,
            status: SectionStatus::Success,
            error: None,
            attempts,
        }
    }

    pub fn failed(section: SectionId, error: impl Into<String>, attempts: u32) -> Self {
        Self {
            section,
            text: String::new(),
            status: SectionStatus::Failed,
            error: Some(error.into()),
            attempts,
        }
    }

    pub fn section(&self) -> SectionId {
        self.section
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn status(&self) -> SectionStatus {
        self.status
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Generation attempts made; zero when the section failed before generation.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_success(&self) -> bool {
        self.status == SectionStatus::Success
    }
}

impl From<SectionGenerationFailure> for SectionResult {
    fn from(failure: SectionGenerationFailure) -> Self {
        SectionResult::failed(failure.section, failure.source.to_string(), failure.attempts)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocumentStatus {
    Complete,
    Partial,
}

/// The generated tender: one result per section, in canonical order.
#[derive(Debug, Clone)]
pub struct TenderDocument {
    brief: ProjectBrief,
    sections: Vec<SectionResult>,
    overall_status: DocumentStatus,
}

impl TenderDocument {
    /// Arrange results in canonical order. A section with no result is recorded as failed,
    /// and a later result for the same section replaces an earlier one.
    pub fn assemble(brief: ProjectBrief, results: Vec<SectionResult>) -> Self {
        let mut slots: [Option<SectionResult>; 6] = Default::default();
        for result in results {
            if let Some(idx) = SECTIONS.iter().position(|s| s.id == result.section) {
                slots[idx] = Some(result);
            }
        }

        let sections: Vec<SectionResult> = slots
            .into_iter()
            .zip(SECTIONS.iter())
            .map(|(slot, spec)| {
                slot.unwrap_or_else(|| {
                    SectionResult::failed(spec.id, "section was not generated", 0)
                })
            })
            .collect();

        let overall_status = if sections.iter().all(SectionResult::is_success) {
            DocumentStatus::Complete
        } else {
            DocumentStatus::Partial
        };

        Self {
            brief,
            sections,
            overall_status,
        }
    }

    pub fn brief(&self) -> &ProjectBrief {
        &self.brief
    }

    pub fn sections(&self) -> &[SectionResult] {
        &self.sections
    }

    pub fn overall_status(&self) -> DocumentStatus {
        self.overall_status
    }

    pub fn failed_sections(&self) -> impl Iterator<Item = &SectionResult> {
        self.sections.iter().filter(|s| !s.is_success())
    }
}
