use crate::analysis::enrichment::{
    enhance_rows, group_by_themes, identify_hot_items, kind_breakdown, severity_stats, ThemeVocabulary,
};
use crate::analysis::readiness::{is_full_score, is_incomplete, percent_of};
use crate::models::draft::DraftOptions;
use crate::models::work_item::WorkItemRow;

const SYSTEM_INSTRUCTION: &str = "You are a release manager assistant. Output only valid JSON matching the specified schema. Keep text concise and operational.";

/// Appended to the user instruction when the previous answer failed to parse.
pub const STRICT_JSON_DIRECTIVE: &str =
    "\n\n**CRITICAL: Respond with ONLY the JSON object, no markdown formatting, no explanations.**";

const EXAMPLE_OUTPUT: &str = r#"{
  "purpose": "Fixes critical search performance issues and adds historical data export for compliance.",
  "highlights": [
    "- Improved SearchElse performance under high load — Bug 196681, PBI 195883",
    "- Fixed FTP upload failures causing missed scheduled deliveries — Bug 196682, 196683",
    "- Added Historical Data export API for audit requirements — PBI 195884"
  ],
  "primaryRisk": "Without Bug 196681, SearchElse keeps timing out for warehouse users at peak hours and delays order processing. PBI 195884 must ship before the Feb 15 compliance audit.",
  "blastRadius": "Affects: SearchElse module (warehouse users during peak hours), FTP upload scheduler (nightly deliveries to external partners), Historical Data API (compliance team, external auditors).",
  "buildReadiness": "6/6 items at full score and critical bugs validated by QA with no blockers. Minor documentation gaps do not affect functionality. Recommend: PROCEED to production."
}"#;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptPair {
    pub system: String,
    pub user: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadinessStats {
    pub total: usize,
    pub full_score: usize,
    pub incomplete: usize,
    pub readiness_percent: u32,
}

pub fn readiness_stats(rows: &[WorkItemRow]) -> ReadinessStats {
    let full_score = rows
        .iter()
        .filter(|row| is_full_score(row.score.as_deref()))
        .count();
    let incomplete = rows.iter().filter(|row| is_incomplete(row)).count();

    ReadinessStats {
        total: rows.len(),
        full_score,
        incomplete,
        readiness_percent: percent_of(full_score, rows.len()),
    }
}

fn join_ids(ids: &[i64]) -> String {
    if ids.is_empty() {
        return "None".to_string();
    }
    ids.iter().map(i64::to_string).collect::<Vec<_>>().join(", ")
}

/// Deterministic instruction pair for one release. No I/O.
pub fn build_prompt(
    release_id: &str,
    rows: &[WorkItemRow],
    options: &DraftOptions,
    vocabulary: &ThemeVocabulary,
) -> PromptPair {
    let enhanced = enhance_rows(rows);
    let hot_items = identify_hot_items(rows, &options.severity_keywords);
    let themes = group_by_themes(rows, vocabulary);
    let stats = readiness_stats(rows);
    let severity = severity_stats(rows).summary();
    let (pbi_count, bug_count) = kind_breakdown(rows);

    // Serializing plain structs of strings and integers cannot fail.
    let dataset = serde_json::to_string_pretty(&enhanced).unwrap_or_else(|_| "[]".to_string());
    let theme_names = if themes.is_empty() {
        "None".to_string()
    } else {
        themes.keys().cloned().collect::<Vec<_>>().join(", ")
    };
    let max_highlights = options.max_highlights;

    let user = format!(
        r#"Generate an approval request for release {release_id}.

**Dataset ({total} items):**
{dataset}

**Hot Items (prioritize):** {hot}

**Themes detected:** {theme_names}

**Readiness Stats:**
- Total Items: {total} ({pbi_count} PBIs, {bug_count} Bugs)
- Full Score: {full} ({percent}%)
- Incomplete: {incomplete}
- High Severity: {severity}

**Output Requirements:**
Return a JSON object with these fields:

1. **purpose** (string): 1-2 lines describing the business value or key defects fixed. Use description, devNotes and qaNotes to understand actual outcomes.

2. **highlights** (array of strings): between 1 and {max_highlights} bullet points. Each bullet must:
   - Start with "-"
   - Describe the outcome or improvement (use devNotes/qaNotes for specifics)
   - End with ticket IDs in the format: — Bug 196681, 196682 or — PBI 195883
   - Prioritize hot items (especially Critical/High severity bugs) and group by theme when possible

3. **primaryRisk** (string): 2-3 lines describing SPECIFIC operational or business risks if this release is delayed or rejected. No generic phrases such as "users may experience issues".
   - Reference the specific Critical/High bugs or features from the highlights
   - Describe impact on affected user groups, business processes or deadlines
   - Connect directly to the outcomes stated in purpose and ticket descriptions

4. **blastRadius** (string): SPECIFIC systems, modules, user groups or processes touched by this release.
   - Name modules/components from ticket titles and descriptions
   - Identify user groups and automated processes
   - Format: "Affects: [Module/Component] ([user group]), [System/Process] ([purpose])"

5. **buildReadiness** (string): 3-4 lines assessing build readiness from:
   - Completion percentage ({percent}%)
   - Number of incomplete items ({incomplete})
   - Severity distribution (Critical/High severity items: {severity})
   - Hot items status
   - Quality signals from devNotes/qaNotes
   - End with a go/no-go recommendation

**Example Output:**
{example}

**Important:**
- Keep highlights concise (1 line each)
- Always end highlights with ticket IDs
- Focus on business impact, not technical details
- Use plain text, no markdown formatting
- Base insights on actual devNotes and qaNotes content when available
- Make the buildReadiness assessment realistic and actionable"#,
        total = stats.total,
        hot = join_ids(&hot_items),
        full = stats.full_score,
        percent = stats.readiness_percent,
        incomplete = stats.incomplete,
        example = EXAMPLE_OUTPUT,
    );

    PromptPair {
        system: SYSTEM_INSTRUCTION.to_string(),
        user,
    }
}
