//! Deterministic classification of completed agent responses.
//!
//! A finished response is partitioned into ordered, typed sections the UI
//! renders as tabs. Classification is a pure function of the final text:
//! identical input always yields a structurally identical section/tab list,
//! however the chunks arrived. Anything the classifier cannot make sense of
//! folds into a `summary` section — a partially structured response still
//! renders.

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

/// Delimiters of the reserved template block.
pub const TEMPLATE_OPEN: &str = "<template>";
pub const TEMPLATE_CLOSE: &str = "</template>";

/// Section types, in keyword-table priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SectionType {
    Template,
    Architecture,
    Cost,
    Resources,
    Progress,
    Summary,
}

impl SectionType {
    pub fn slug(self) -> &'static str {
        match self {
            Self::Template => "template",
            Self::Architecture => "architecture",
            Self::Cost => "cost",
            Self::Resources => "resources",
            Self::Progress => "progress",
            Self::Summary => "summary",
        }
    }

    fn icon(self) -> &'static str {
        match self {
            Self::Template => "file-code",
            Self::Architecture => "layers",
            Self::Cost => "dollar-sign",
            Self::Resources => "server",
            Self::Progress => "activity",
            Self::Summary => "file-text",
        }
    }
}

/// Ordered (keyword, type) table applied to heading text; first
/// case-insensitive substring match wins.
const TYPE_KEYWORDS: &[(&str, SectionType)] = &[
    ("architecture", SectionType::Architecture),
    ("cost", SectionType::Cost),
    ("resource", SectionType::Resources),
    ("progress", SectionType::Progress),
    ("deployment", SectionType::Progress),
];

/// A typed block extracted from the response. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Section {
    #[serde(rename = "type")]
    pub section_type: SectionType,
    pub title: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// UI handle derived 1:1 from a section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Tab {
    pub id: String,
    pub label: String,
    pub icon: String,
    /// Index into [`ParsedResponse::sections`].
    pub section: usize,
}

/// Classification result surfaced to the UI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedResponse {
    pub raw: String,
    pub sections: Vec<Section>,
    pub tabs: Vec<Tab>,
}

fn heading_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^(#{1,2})[ \t]+(.*)$").expect("valid heading regex"))
}

/// Partition `raw` into ordered sections and derive their tabs.
pub fn classify(raw: &str) -> ParsedResponse {
    // (source offset, section) pairs; sorted at the end so the template
    // block lands at its first-appearance position among the narrative.
    let mut placed: Vec<(usize, Section)> = Vec::new();

    let (narrative, template) = extract_template(raw);
    if let Some((offset, section)) = template {
        placed.push((offset, section));
    }

    for (offset, section) in split_narrative(&narrative.text, &narrative.offset_map) {
        placed.push((offset, section));
    }

    placed.sort_by_key(|(offset, _)| *offset);
    let sections: Vec<Section> = placed.into_iter().map(|(_, s)| s).collect();
    let tabs = derive_tabs(&sections);

    ParsedResponse {
        raw: raw.to_string(),
        sections,
        tabs,
    }
}

/// Narrative text with a mapping back to source offsets after the template
/// block was cut out.
struct Narrative {
    text: String,
    /// (cut position in narrative text, bytes removed at that position).
    offset_map: Option<(usize, usize)>,
}

fn source_offset(map: &Option<(usize, usize)>, narrative_pos: usize) -> usize {
    match map {
        Some((cut_at, removed)) if narrative_pos >= *cut_at => narrative_pos + removed,
        _ => narrative_pos,
    }
}

/// Extract the first template block, if any. An unterminated open tag is a
/// malformed span: it stays in the narrative and falls into `summary`.
fn extract_template(raw: &str) -> (Narrative, Option<(usize, Section)>) {
    let Some(open) = raw.find(TEMPLATE_OPEN) else {
        return (
            Narrative {
                text: raw.to_string(),
                offset_map: None,
            },
            None,
        );
    };
    let body_start = open + TEMPLATE_OPEN.len();
    let Some(close_rel) = raw[body_start..].find(TEMPLATE_CLOSE) else {
        tracing::warn!("unterminated template block, folding into narrative");
        return (
            Narrative {
                text: raw.to_string(),
                offset_map: None,
            },
            None,
        );
    };

    let body = &raw[body_start..body_start + close_rel];
    let end = body_start + close_rel + TEMPLATE_CLOSE.len();
    let narrative = Narrative {
        text: format!("{}{}", &raw[..open], &raw[end..]),
        offset_map: Some((open, end - open)),
    };

    let content = body.trim_matches('\n').to_string();
    if content.trim().is_empty() {
        return (narrative, None);
    }

    let format = infer_template_format(&content);
    let section = Section {
        section_type: SectionType::Template,
        title: "Template".to_string(),
        content,
        metadata: Some(serde_json::json!({ "format": format })),
    };
    (narrative, Some((open, section)))
}

/// Brace- or bracket-leading content is JSON; everything else is treated as
/// line-oriented structured config.
fn infer_template_format(content: &str) -> &'static str {
    match content.trim_start().chars().next() {
        Some('{') | Some('[') => "json",
        _ => "yaml",
    }
}

/// Split narrative text at top-level headings (level <= 2) into typed
/// sections, keyed by their source offset.
fn split_narrative(
    narrative: &str,
    offset_map: &Option<(usize, usize)>,
) -> Vec<(usize, Section)> {
    let mut out = Vec::new();
    if narrative.trim().is_empty() {
        return out;
    }

    let headings: Vec<(usize, usize, String)> = heading_re()
        .captures_iter(narrative)
        .map(|caps| {
            let whole = caps.get(0).expect("match has group 0");
            let title = caps.get(2).map_or("", |m| m.as_str()).trim().to_string();
            (whole.start(), whole.end(), title)
        })
        .collect();

    if headings.is_empty() {
        out.push((
            source_offset(offset_map, 0),
            summary_section("Summary", narrative),
        ));
        return out;
    }

    // Untitled leading text before the first heading.
    let leading = &narrative[..headings[0].0];
    if !leading.trim().is_empty() {
        out.push((
            source_offset(offset_map, 0),
            summary_section("Summary", leading),
        ));
    }

    for (index, (start, end, title)) in headings.iter().enumerate() {
        let body_end = headings
            .get(index + 1)
            .map_or(narrative.len(), |next| next.0);
        let body = narrative[*end..body_end].trim();
        if body.is_empty() {
            continue;
        }
        let section_type = infer_type(title);
        out.push((
            source_offset(offset_map, *start),
            Section {
                section_type,
                title: if title.is_empty() {
                    "Summary".to_string()
                } else {
                    title.clone()
                },
                content: body.to_string(),
                metadata: None,
            },
        ));
    }

    out
}

fn summary_section(title: &str, content: &str) -> Section {
    Section {
        section_type: SectionType::Summary,
        title: title.to_string(),
        content: content.trim().to_string(),
        metadata: None,
    }
}

fn infer_type(heading: &str) -> SectionType {
    let lowered = heading.to_lowercase();
    for (keyword, section_type) in TYPE_KEYWORDS {
        if lowered.contains(keyword) {
            return *section_type;
        }
    }
    SectionType::Summary
}

/// Derive one tab per section. The first section of a type keeps the bare
/// type id; repeats get an occurrence suffix so ids stay unique.
fn derive_tabs(sections: &[Section]) -> Vec<Tab> {
    let mut seen: std::collections::HashMap<&'static str, usize> = std::collections::HashMap::new();
    sections
        .iter()
        .enumerate()
        .map(|(index, section)| {
            let slug = section.section_type.slug();
            let occurrence = seen.entry(slug).and_modify(|n| *n += 1).or_insert(1);
            let id = if *occurrence == 1 {
                slug.to_string()
            } else {
                format!("{slug}-{occurrence}")
            };
            Tab {
                id,
                label: section.title.clone(),
                icon: section.section_type.icon().to_string(),
                section: index,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_headings_two_sections() {
        let parsed = classify("## Architecture\nUses X.\n## Cost\nLow.\n");

        assert_eq!(parsed.sections.len(), 2);
        assert_eq!(parsed.sections[0].section_type, SectionType::Architecture);
        assert_eq!(parsed.sections[0].content, "Uses X.");
        assert_eq!(parsed.sections[1].section_type, SectionType::Cost);
        assert_eq!(parsed.tabs[0].id, "architecture");
        assert_eq!(parsed.tabs[1].id, "cost");
    }

    #[test]
    fn test_template_before_narrative_keeps_order() {
        let raw = "<template>\n{\"Resources\": {}}\n</template>\n## Architecture\nTwo tiers.\n";
        let parsed = classify(raw);

        assert_eq!(parsed.sections[0].section_type, SectionType::Template);
        assert_eq!(parsed.sections[1].section_type, SectionType::Architecture);
    }

    #[test]
    fn test_template_after_narrative_reverses_order() {
        let raw = "## Architecture\nTwo tiers.\n<template>\n{\"Resources\": {}}\n</template>\n";
        let parsed = classify(raw);

        assert_eq!(parsed.sections[0].section_type, SectionType::Architecture);
        assert_eq!(parsed.sections[1].section_type, SectionType::Template);
    }

    #[test]
    fn test_template_format_inference() {
        let json = classify("<template>{\"a\": 1}</template>\nbody\n");
        assert_eq!(
            json.sections[0].metadata,
            Some(serde_json::json!({"format": "json"}))
        );

        let yaml = classify("<template>\nResources:\n  Bucket: {}\n</template>\nbody\n");
        assert_eq!(
            yaml.sections[0].metadata,
            Some(serde_json::json!({"format": "yaml"}))
        );
    }

    #[test]
    fn test_unterminated_template_folds_into_summary() {
        let parsed = classify("<template>\nnever closed");
        assert_eq!(parsed.sections.len(), 1);
        assert_eq!(parsed.sections[0].section_type, SectionType::Summary);
        assert!(parsed.sections[0].content.contains("<template>"));
    }

    #[test]
    fn test_second_template_block_stays_in_narrative() {
        let raw = "<template>{\"a\":1}</template>\ntext\n<template>{\"b\":2}</template>\n";
        let parsed = classify(raw);
        let templates = parsed
            .sections
            .iter()
            .filter(|s| s.section_type == SectionType::Template)
            .count();
        assert_eq!(templates, 1);
    }

    #[test]
    fn test_untitled_leading_text_becomes_summary() {
        let parsed = classify("Here is the plan.\n## Cost\nCheap.\n");
        assert_eq!(parsed.sections[0].section_type, SectionType::Summary);
        assert_eq!(parsed.sections[0].content, "Here is the plan.");
        assert_eq!(parsed.sections[1].section_type, SectionType::Cost);
    }

    #[test]
    fn test_empty_bodied_heading_dropped() {
        let parsed = classify("## Architecture\n\n## Cost\nLow.\n");
        assert_eq!(parsed.sections.len(), 1);
        assert_eq!(parsed.sections[0].section_type, SectionType::Cost);
    }

    #[test]
    fn test_no_headings_single_summary() {
        let parsed = classify("Just a plain answer.");
        assert_eq!(parsed.sections.len(), 1);
        assert_eq!(parsed.sections[0].section_type, SectionType::Summary);
        assert_eq!(parsed.tabs[0].id, "summary");
    }

    #[test]
    fn test_repeated_type_gets_occurrence_suffix() {
        let parsed = classify("## Cost\nDev.\n## Cost breakdown\nProd.\n");
        assert_eq!(parsed.sections.len(), 2);
        assert_eq!(parsed.tabs[0].id, "cost");
        assert_eq!(parsed.tabs[1].id, "cost-2");
    }

    #[test]
    fn test_deployment_keyword_maps_to_progress() {
        let parsed = classify("## Deployment status\nRolling out.\n");
        assert_eq!(parsed.sections[0].section_type, SectionType::Progress);
    }

    #[test]
    fn test_level_three_heading_not_split() {
        let parsed = classify("## Architecture\nTop.\n### Detail\nNested.\n");
        assert_eq!(parsed.sections.len(), 1);
        assert!(parsed.sections[0].content.contains("### Detail"));
    }

    #[test]
    fn test_idempotent() {
        let raw = "intro\n<template>\n{\"x\":1}\n</template>\n## Cost\nLow.\n## Cost\nHigh.\n";
        let first = classify(raw);
        let second = classify(raw);
        assert_eq!(first, second);
    }

    #[test]
    fn test_tabs_reference_their_sections() {
        let parsed = classify("## Architecture\nA.\n## Resources\nB.\n");
        for tab in &parsed.tabs {
            let section = &parsed.sections[tab.section];
            assert_eq!(tab.label, section.title);
        }
    }
}
