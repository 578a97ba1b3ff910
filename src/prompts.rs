use std::collections::HashMap;

use crate::error::{Error, Result};

const GENERATE_SPECS_TEMPLATE: &str = "\
Write the design specs for PRD `{{ prd_id }}` ({{ prd_path }}) into {{ specs_dir }}.

PRD body:
{{ prd_body }}

Produce one or more Markdown files under that directory, one per work unit, each starting
with YAML frontmatter containing at least `task:`, `status: pending`, `depends_on:`, and
`backpressure:`.
";

const REVIEW_TEMPLATE: &str = "\
You are reviewing the specs for PRD `{{ prd_id }}`.

PRD file: {{ prd_path }}
Specs directory: {{ specs_dir }}

Score each of the following criteria from 0 to 100: completeness, consistency, testability, architecture.

Respond with exactly one JSON object matching this schema and nothing else:
{\"verdict\": \"pass\" | \"needs_revision\", \"score\": {\"completeness\": int, \"consistency\": int, \"testability\": int, \"architecture\": int}, \"feedback\": [{\"section\": string, \"issue\": string, \"suggestion\": string}]}

`feedback` MUST be non-empty when verdict is \"needs_revision\".
";

const FEEDBACK_APPLY_TEMPLATE: &str = "\
Apply the following review feedback to the specs for PRD `{{ prd_id }}` under {{ specs_dir }}.

Feedback:
{{ feedback }}

Edit the spec files directly to address every item.
";

const GENERATE_TASKS_TEMPLATE: &str = "\
Decompose the reviewed specs for PRD `{{ prd_id }}` under {{ specs_dir }} into individually
completable task files under specs/tasks/{{ prd_id }}/, each with YAML frontmatter
(`task:`, `status: pending`, `depends_on:`, `backpressure:`).
";

const CONFLICT_RESOLVE_TEMPLATE: &str = "\
Resolve the git merge conflicts in the following files, in the working directory {{ worktree }}:

{{ files }}

Edit each file to remove conflict markers and reconcile both sides, then run `git add` on each
resolved file. Do not leave any conflict markers (`<<<<<<<`, `=======`, `>>>>>>>`) in place.
";

const DRIFT_CLASSIFY_TEMPLATE: &str = "\
The body of PRD `{{ prd_id }}` changed while units {{ in_progress_units }} are in progress.

Diff summary: {{ diff_summary }}

--- previous body ---
{{ old_body }}

--- new body ---
{{ new_body }}

Classify this change as significant or not, and list which in-progress units (if any) it affects.
Respond with exactly one JSON object: {\"significant\": bool, \"affected_units\": [string], \"recommendation\": string}
";

/// Prompt template engine: embedded default templates rendered with `upon`,
/// one fixed template per phase instead of user-overridable files on disk.
pub struct PromptEngine;

impl PromptEngine {
    pub fn new() -> Self {
        Self
    }

    fn template(phase: &str) -> Result<&'static str> {
        match phase {
            "generate_specs" => Ok(GENERATE_SPECS_TEMPLATE),
            "review" => Ok(REVIEW_TEMPLATE),
            "feedback_apply" => Ok(FEEDBACK_APPLY_TEMPLATE),
            "generate_tasks" => Ok(GENERATE_TASKS_TEMPLATE),
            "conflict_resolve" => Ok(CONFLICT_RESOLVE_TEMPLATE),
            "drift_classify" => Ok(DRIFT_CLASSIFY_TEMPLATE),
            _ => Err(Error::Oracle(format!("unknown prompt phase: {phase}"))),
        }
    }

    pub fn render(&self, phase: &str, vars: &HashMap<String, String>) -> Result<String> {
        let template = Self::template(phase)?;
        let engine = upon::Engine::new();
        let compiled = engine
            .compile(template)
            .map_err(|e| Error::Oracle(format!("template compile error: {e}")))?;
        compiled
            .render(&engine, upon::to_value(vars).map_err(|e| Error::Oracle(e.to_string()))?)
            .to_string()
            .map_err(|e| Error::Oracle(format!("template render error: {e}")))
    }
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn review_template_renders_prd_id() {
        let engine = PromptEngine::new();
        let mut vars = HashMap::new();
        vars.insert("prd_id".to_string(), "feat-1".to_string());
        vars.insert("prd_path".to_string(), "/p/feat-1.md".to_string());
        vars.insert("specs_dir".to_string(), "/p/specs/feat-1".to_string());
        let rendered = engine.render("review", &vars).unwrap();
        assert!(rendered.contains("feat-1"));
        assert!(rendered.contains("needs_revision"));
    }

    #[test]
    fn unknown_phase_errors() {
        let engine = PromptEngine::new();
        let err = engine.render("deploy", &HashMap::new()).unwrap_err();
        assert!(err.to_string().contains("unknown prompt phase"));
    }
}
