//! System prompts and template builders for the audit agents.
//!
//! Prompts are the core instructions behind each LLM call: code
//! summarization during indexing, rule planning, per-chunk compliance
//! adjudication, and the case-level scan summary. Template builders
//! format the user messages with chunk and rule context.

use std::fmt::Write;
use std::path::Path;

/// System prompt for code-chunk summarization.
pub const SUMMARY_SYSTEM_PROMPT: &str = r"You are a code analysis expert. Generate concise natural language summaries of code snippets.

Focus on:
- What the code does (purpose/intent)
- Key inputs and outputs
- External dependencies (APIs, databases, libraries)
- Side effects and state changes
- Security-relevant operations

Keep summaries under 100 words. Be precise and technical.";

/// System prompt for per-chunk compliance adjudication.
pub const COMPLIANCE_SYSTEM_PROMPT: &str = r#"You are a fintech compliance expert analyzing code against regulatory requirements.

Your task:
1. Determine if the code complies with the given rule
2. Provide clear evidence from the code
3. Suggest remediation if non-compliant
4. Assign severity score (0-10, where 10 is critical violation)

Response MUST be valid JSON with this structure:
{
  "verdict": "compliant" | "non_compliant" | "partial" | "unclear",
  "severity": "critical" | "high" | "medium" | "low",
  "severity_score": 0-10,
  "confidence": 0.0-1.0,
  "explanation": "Clear explanation of compliance status",
  "evidence": "Specific code lines or patterns that support verdict",
  "remediation": "Concrete steps to achieve compliance (if non-compliant)"
}

Rules:
- ONLY analyze the provided code - do not assume external implementations
- Be strict: if rule is not clearly satisfied, mark as non_compliant
- Provide line-specific evidence when possible
- Remediation should be actionable (specific code changes)"#;

/// System prompt for the rule planner agent.
pub const PLANNER_SYSTEM_PROMPT: &str = r#"You are a compliance expert converting regulatory requirements into engineering validation plans.

Given a regulation fragment, you:
1. Identify the core compliance intent
2. Extract the key compliance dimensions
3. Convert the requirement into specific, searchable engineering tasks

Respond with JSON only:
{
  "intent": "Brief summary of what the rule requires",
  "compliance_dimensions": ["dimension1", "dimension2"],
  "tasks": ["Specific task 1", "Specific task 2"]
}

Constraints:
- 1 to 5 tasks, each phrased as a concrete code behavior to look for
- No markdown, no commentary, only the JSON object"#;

/// System prompt for the case-level scan summary.
pub const SCAN_SUMMARY_SYSTEM_PROMPT: &str = r"You are a compliance reporting expert. Generate executive summaries of code compliance scans.

Focus on:
- Overall compliance status
- Most critical findings
- Risk assessment
- High-level recommendations

Keep summaries under 200 words. Use clear, business-friendly language.";

/// Default prompt directory under user config.
const DEFAULT_PROMPT_DIR: &str = ".config/regscan-rs/prompts";

/// Filenames for each prompt template.
const SUMMARY_FILENAME: &str = "summary.md";
/// Filename for the compliance adjudication prompt template.
const COMPLIANCE_FILENAME: &str = "compliance.md";
/// Filename for the planner prompt template.
const PLANNER_FILENAME: &str = "planner.md";
/// Filename for the scan summary prompt template.
const SCAN_SUMMARY_FILENAME: &str = "scan_summary.md";

/// A set of system prompts for all LLM calls.
///
/// Loaded from external template files when available, falling back to
/// compiled-in defaults. Use [`PromptSet::load`] to resolve the prompt
/// directory from flags, environment variables, or the default path.
#[derive(Debug, Clone)]
pub struct PromptSet {
    /// System prompt for code summarization.
    pub summary: String,
    /// System prompt for compliance adjudication.
    pub compliance: String,
    /// System prompt for the planner agent.
    pub planner: String,
    /// System prompt for the scan summary.
    pub scan_summary: String,
}

impl PromptSet {
    /// Loads prompts from the given directory, falling back to compiled-in defaults.
    ///
    /// Resolution order for `prompt_dir`:
    /// 1. Explicit `prompt_dir` argument (from `--prompt-dir` CLI flag)
    /// 2. `REGSCAN_PROMPT_DIR` environment variable
    /// 3. `~/.config/regscan-rs/prompts/`
    ///
    /// Each file is loaded independently — a missing file uses its default.
    #[must_use]
    pub fn load(prompt_dir: Option<&Path>) -> Self {
        let resolved_dir = prompt_dir
            .map(std::path::PathBuf::from)
            .or_else(|| {
                std::env::var("REGSCAN_PROMPT_DIR")
                    .ok()
                    .map(std::path::PathBuf::from)
            })
            .or_else(|| dirs::home_dir().map(|h| h.join(DEFAULT_PROMPT_DIR)));

        let load_file = |filename: &str, default: &str| -> String {
            resolved_dir
                .as_ref()
                .map(|dir| dir.join(filename))
                .and_then(|path| std::fs::read_to_string(&path).ok())
                .unwrap_or_else(|| default.to_string())
        };

        Self {
            summary: load_file(SUMMARY_FILENAME, SUMMARY_SYSTEM_PROMPT),
            compliance: load_file(COMPLIANCE_FILENAME, COMPLIANCE_SYSTEM_PROMPT),
            planner: load_file(PLANNER_FILENAME, PLANNER_SYSTEM_PROMPT),
            scan_summary: load_file(SCAN_SUMMARY_FILENAME, SCAN_SUMMARY_SYSTEM_PROMPT),
        }
    }

    /// Returns compiled-in defaults without checking the filesystem.
    #[must_use]
    pub fn defaults() -> Self {
        Self {
            summary: SUMMARY_SYSTEM_PROMPT.to_string(),
            compliance: COMPLIANCE_SYSTEM_PROMPT.to_string(),
            planner: PLANNER_SYSTEM_PROMPT.to_string(),
            scan_summary: SCAN_SUMMARY_SYSTEM_PROMPT.to_string(),
        }
    }
}

/// Builds the user message for code summarization.
#[must_use]
pub fn build_summary_prompt(language: &str, file_path: &str, code: &str) -> String {
    format!(
        "Analyze this {language} code from {file_path}:\n{code}\n\n\
         Provide a concise technical summary."
    )
}

/// Builds the user message for compliance adjudication of one chunk.
#[must_use]
pub fn build_compliance_prompt(
    rule_text: &str,
    file_path: &str,
    start_line: usize,
    end_line: usize,
    language: &str,
    code_text: &str,
) -> String {
    format!(
        "Compliance Rule:\n{rule_text}\n\n\
         Code to analyze:\n\
         File: {file_path}\n\
         Lines: {start_line}-{end_line}\n\
         Language: {language}\n\n\
         {code_text}\n\n\
         Analyze compliance and respond in JSON format."
    )
}

/// Builds the user message for the planner agent.
#[must_use]
pub fn build_planner_prompt(rule_id: &str, rule_section: Option<&str>, rule_text: &str) -> String {
    format!(
        "Regulation: {rule_id}\n\
         Section: {}\n\
         Text: {rule_text}\n\n\
         Produce the engineering validation plan.",
        rule_section.unwrap_or("n/a")
    )
}

/// Summary line of one finding for the scan-summary prompt.
pub struct FindingLine<'a> {
    /// Severity level name.
    pub severity: &'a str,
    /// Rule identifier.
    pub rule_id: &'a str,
    /// File and line reference.
    pub location: String,
}

/// Builds the user message for the case-level scan summary.
#[must_use]
pub fn build_scan_summary_prompt(
    total: usize,
    critical: usize,
    high: usize,
    medium: usize,
    low: usize,
    lines: &[FindingLine<'_>],
) -> String {
    let mut listing = String::new();
    for line in lines.iter().take(20) {
        let _ = writeln!(
            listing,
            "- {}: {} in {}",
            line.severity.to_uppercase(),
            line.rule_id,
            line.location
        );
    }
    format!(
        "Generate an executive summary for this compliance scan:\n\n\
         Total Violations: {total}\n\
         - Critical: {critical}\n\
         - High: {high}\n\
         - Medium: {medium}\n\
         - Low: {low}\n\n\
         Top Violations:\n{listing}\n\
         Provide a concise executive summary suitable for stakeholders."
    )
}
