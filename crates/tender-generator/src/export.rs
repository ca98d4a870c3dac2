/// Text and structured renditions of a finished `TenderDocument`.
///
/// Both are pure functions of the document, so exporting twice yields identical bytes.
use std::sync::OnceLock;

use regex::Regex;
use schemars::JsonSchema;
use serde::Serialize;

use crate::model::{DocumentStatus, ProjectBrief, SectionStatus, TenderDocument};

pub const FAILED_PLACEHOLDER: &str = "[This section could not be generated.]";

/// Six headed sections in canonical order. Failed sections keep their heading and show a
/// placeholder line.
pub fn to_text(document: &TenderDocument) -> String {
    document
        .sections()
        .iter()
        .map(|section| {
            let body = if section.is_success() {
                section.text()
            } else {
                FAILED_PLACEHOLDER
            };
            format!("# {}\n\n{}", section.section().spec().display_name, body)
        })
        .collect::<Vec<_>>()
        .join("\n\n")
        + "\n"
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct StructuredTender {
    pub brief: ProjectBrief,
    pub sections: Vec<StructuredSection>,
    pub overall_status: DocumentStatus,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
pub struct StructuredSection {
    pub id: String,
    pub display_name: String,
    pub status: SectionStatus,
    pub text: String,
}

pub fn to_structured(document: &TenderDocument) -> StructuredTender {
    StructuredTender {
        brief: document.brief().clone(),
        sections: document
            .sections()
            .iter()
            .map(|section| StructuredSection {
                id: section.section().as_str().to_string(),
                display_name: section.section().spec().display_name.to_string(),
                status: section.status(),
                text: section.text().to_string(),
            })
            .collect(),
        overall_status: document.overall_status(),
    }
}

pub fn to_json(document: &TenderDocument) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(&to_structured(document))
}

/// Download file name without extension, e.g. `tender_municipal_road_resurfacing`.
pub fn file_stem(brief: &ProjectBrief) -> String {
    static WHITESPACE: OnceLock<Regex> = OnceLock::new();
    let re = WHITESPACE.get_or_init(|| Regex::new(r"\s+").expect("valid regex"));
    let title = brief.title.trim().to_lowercase();
    format!("tender_{}", re.replace_all(&title, "_"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{SectionId, SectionResult, SECTIONS};

    fn brief() -> ProjectBrief {
        ProjectBrief::new(
            "Municipal Road Resurfacing",
            "Springfield",
            "6 months",
            "Resurface 12km of arterial road including drainage upgrades.",
        )
    }

    fn document(failed: &[SectionId]) -> TenderDocument {
        let results = SECTIONS
            .iter()
            .map(|s| {
                if failed.contains(&s.id) {
                    SectionResult::failed(s.id, "rate limited", 3)
                } else {
                    SectionResult::success(s.id, format!("Body of {}.", s.display_name), 1)
                }
            })
            .collect();
        TenderDocument::assemble(brief(), results)
    }

    #[test]
    fn text_export_has_six_headings_in_order() {
        let text = to_text(&document(&[]));
        let headings: Vec<&str> = text.lines().filter(|l| l.starts_with("# ")).collect();
        assert_eq!(
            headings,
            vec![
                "# NOTICE INVITING TENDER",
                "# BRIEF INTRODUCTION",
                "# INSTRUCTION TO BIDDERS",
                "# SCOPE OF WORK",
                "# TERMS AND CONDITIONS",
                "# PRICE BID",
            ]
        );
        assert!(text.contains("# SCOPE OF WORK\n\nBody of SCOPE OF WORK.\n\n# TERMS AND CONDITIONS"));
        assert!(!text.contains(FAILED_PLACEHOLDER));
    }

    #[test]
    fn failed_sections_render_placeholder() {
        let text = to_text(&document(&[SectionId::PriceBid]));
        assert!(text.ends_with(&format!("# PRICE BID\n\n{FAILED_PLACEHOLDER}\n")));
        assert_eq!(text.matches("# ").count(), 6);
    }

    #[test]
    fn structured_export_shape() {
        let doc = document(&[SectionId::BriefIntroduction]);
        let value = serde_json::to_value(to_structured(&doc)).unwrap();

        assert_eq!(value["overall_status"], "PARTIAL");
        assert_eq!(value["brief"]["title"], "Municipal Road Resurfacing");
        assert!(value["brief"].get("budget").is_none());
        let sections = value["sections"].as_array().unwrap();
        assert_eq!(sections.len(), 6);
        assert_eq!(sections[1]["id"], "BRIEF_INTRODUCTION");
        assert_eq!(sections[1]["display_name"], "BRIEF INTRODUCTION");
        assert_eq!(sections[1]["status"], "FAILED");
        assert_eq!(sections[1]["text"], "");
        assert_eq!(sections[3]["status"], "SUCCESS");

        let ids: Vec<&str> = sections.iter().map(|s| s["id"].as_str().unwrap()).collect();
        let canonical: Vec<&str> = SECTIONS.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, canonical);
    }

    #[test]
    fn exports_are_idempotent() {
        let doc = document(&[SectionId::TermsAndConditions]);
        assert_eq!(to_text(&doc), to_text(&doc));
        assert_eq!(to_json(&doc).unwrap(), to_json(&doc).unwrap());
    }

    #[test]
    fn file_stem_from_title() {
        assert_eq!(file_stem(&brief()), "tender_municipal_road_resurfacing");
        let mut b = brief();
        b.title = "  Bridge\tRepair  Phase 2 ".to_string();
        assert_eq!(file_stem(&b), "tender_bridge_repair_phase_2");
    }
}
