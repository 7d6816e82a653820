//! Prompt builders for the three stages.
//!
//! Each prompt spells out the JSON schema the matching report type
//! deserialises from.

use mender_common::{Edit, Finding, Language};

pub fn scanner_prompt(code: &str, language: Language, context: Option<&str>) -> String {
    let lang = language.display_name();
    let mut prompt = format!(
        r#"You are an expert {lang} code QA engineer. Critically analyse the code below for
syntax errors, logical errors, undefined or misused variables and likely runtime exceptions.

Rules:
1. Never report broken code as correct. Missing colons, brackets or bad indentation are errors.
2. Do not invent variables or APIs that are not present.
3. Style problems are warnings, never errors.

Return a JSON object with exactly this structure:
{{
    "errors": [
        {{
            "error_id": "ERR-001",
            "type": "SyntaxError",
            "severity": "high",
            "line_number": 1,
            "message": "Short description of the error",
            "suggestion": "How to fix it"
        }}
    ],
    "warnings": [
        {{
            "warning_id": "WARN-001",
            "type": "CodeQuality",
            "line_number": 1,
            "message": "Warning description"
        }}
    ],
    "code_quality_score": 5.0,
    "analysis_summary": "Summary of issues found"
}}

If no errors are found, "errors" must be [].
"#
    );
    if let Some(context) = context {
        prompt.push_str(&format!("\nContext from the author: {}\n", context));
    }
    prompt.push_str(&format!(
        "\nAnalyse this code:\n```{}\n{}\n```",
        language.as_str(),
        code
    ));
    prompt
}

pub fn fixer_prompt(
    code: &str,
    language: Language,
    context: Option<&str>,
    errors: &[Finding],
) -> String {
    let lang = language.display_name();
    let mut prompt = format!(
        r#"You are an expert {lang} code fixer. Fix ALL of the listed errors while keeping the
original logic and structure.

Rules:
1. Return the COMPLETE fixed code, never a placeholder or an excerpt.
2. Only fix what is broken. Do not add features.

Return a JSON object with exactly this structure:
{{
    "fixed_code": "the complete corrected code",
    "changes": [
        {{
            "change_id": "FIX-001",
            "type": "correction",
            "line_number": 1,
            "original_line": "the original line",
            "fixed_line": "the corrected line",
            "reason": "why the change was needed"
        }}
    ],
    "explanation": "Brief summary of what was fixed",
    "confidence_score": 0.9
}}
"#
    );
    if let Some(context) = context {
        prompt.push_str(&format!("\nContext from the author: {}\n", context));
    }
    prompt.push_str(&format!(
        "\nFix this code:\n```{}\n{}\n```\n\nErrors to fix:\n{}",
        language.as_str(),
        code,
        format_findings(errors)
    ));
    prompt
}

pub fn validator_prompt(
    original: &str,
    fixed: &str,
    language: Language,
    errors: &[Finding],
    changes: &[Edit],
) -> String {
    let lang = language.display_name();
    let tag = language.as_str();
    format!(
        r#"You are an expert {lang} code validator. Verify that the fixed code resolves every
reported error without changing the intended behaviour.

Checklist:
1. Syntax: all syntax errors are fixed.
2. Logic: the original behaviour is preserved.
3. Regressions: no new errors were introduced.
4. Appropriateness: each fix is correct and idiomatic.

Set "validation_status" to "approved" only if every check passes, "needs_revision" if
issues remain that another fix could address, or "rejected" if the fix is wrong.

Return a JSON object with exactly this structure:
{{
    "validation_status": "approved",
    "confidence_score": 0.9,
    "checks_performed": [
        {{"check_name": "syntax", "passed": true, "details": "No syntax errors", "severity": "info"}}
    ],
    "issues_found": [],
    "recommendations": [],
    "final_verdict": "Clear summary of the decision"
}}

ORIGINAL CODE:
```{tag}
{original}
```

FIXED CODE:
```{tag}
{fixed}
```

Errors that were reported:
{errors}

Changes that were applied:
{changes}
"#,
        errors = format_findings(errors),
        changes = format_edits(changes),
    )
}

fn format_findings(findings: &[Finding]) -> String {
    if findings.is_empty() {
        return "(none)".to_string();
    }
    findings
        .iter()
        .map(|f| {
            let line = f.line.map(|l| format!("line {}", l)).unwrap_or_else(|| "line ?".to_string());
            let mut entry = format!("- [{}] {} ({}): {}", f.id, f.category, line, f.description);
            if let Some(suggestion) = &f.suggestion {
                entry.push_str(&format!(" Suggestion: {}", suggestion));
            }
            entry
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_edits(edits: &[Edit]) -> String {
    if edits.is_empty() {
        return "(none)".to_string();
    }
    edits
        .iter()
        .map(|e| {
            let line = e.line.map(|l| l.to_string()).unwrap_or_else(|| "?".to_string());
            format!(
                "- line {}: `{}` -> `{}` ({})",
                line, e.original, e.replacement, e.rationale
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
