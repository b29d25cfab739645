//! Task generation boundary.
//!
//! The long-running tools delegate content generation (tasks from a PRD,
//! subtasks for a task, complexity scores, tasks from a prompt, rewrites of
//! existing tasks) to a [`TaskGenerator`]. [`HeuristicGenerator`] is an offline implementation
//! that derives everything from the text it is given; a model-backed
//! generator plugs in behind the same trait.
//!
//! Generators receive the [`OperationContext`] of the operation they run in
//! and are expected to stop at their next cancellation point once it fires.

use async_ops::OperationContext;
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::tasks::{Priority, Subtask, SubtaskDraft, Task, TaskDraft, TaskId, TaskRevision};

/// Result of scoring one task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComplexityAssessment {
    /// 1 (trivial) to 10
    pub score: u8,
    pub recommended_subtasks: usize,
    pub reasoning: String,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TaskGenerator: Send + Sync {
    /// Breaks a product requirements document into at most `max_tasks`
    /// drafts. Draft dependencies are 1-based positions within the batch.
    async fn generate_tasks(
        &self,
        prd: &str,
        max_tasks: usize,
        ctx: &OperationContext,
    ) -> anyhow::Result<Vec<TaskDraft>>;

    /// Proposes `count` subtasks for `task`. `guidance` is free-form extra
    /// context from the caller, empty when none was given.
    async fn expand_task(
        &self,
        task: &Task,
        count: usize,
        guidance: &str,
        ctx: &OperationContext,
    ) -> anyhow::Result<Vec<SubtaskDraft>>;

    async fn assess_complexity(
        &self,
        task: &Task,
        ctx: &OperationContext,
    ) -> anyhow::Result<ComplexityAssessment>;

    /// Drafts a single task from a natural-language request.
    async fn draft_task(&self, prompt: &str, ctx: &OperationContext) -> anyhow::Result<TaskDraft>;

    /// Rewrites `task` so it reflects `prompt`: new information, a changed
    /// approach, or a correction.
    async fn revise_task(
        &self,
        task: &Task,
        prompt: &str,
        ctx: &OperationContext,
    ) -> anyhow::Result<TaskRevision>;

    /// Writes up `prompt` as implementation notes for `subtask` of `parent`.
    async fn note_subtask(
        &self,
        parent: &Task,
        subtask: &Subtask,
        prompt: &str,
        ctx: &OperationContext,
    ) -> anyhow::Result<String>;
}

const HIGH_PRIORITY_MARKERS: &[&str] = &["must", "critical", "core", "required", "security"];
const LOW_PRIORITY_MARKERS: &[&str] = &["nice to have", "optional", "later", "stretch"];
const COMPLEXITY_MARKERS: &[&str] = &[
    "integrat",
    "migrat",
    "concurren",
    "distributed",
    "secur",
    "performance",
    "real-time",
    "sync",
];
const TITLE_LIMIT: usize = 80;

/// Offline generator driven by document structure and keywords.
///
/// - PRDs: every list item becomes a task; the enclosing heading becomes
///   its description, and items under the same heading form a chain
/// - Expansion: the task's sentences become subtasks, padded with the
///   standard design / implement / test / document phases
/// - Complexity: text length, dependency fan-in and domain keywords
#[derive(Debug, Clone)]
pub struct HeuristicGenerator {
    heading: Regex,
    list_item: Regex,
    sentence_end: Regex,
}

impl HeuristicGenerator {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            heading: Regex::new(r"^\s{0,3}#{1,6}\s+(.+?)\s*#*\s*$")?,
            list_item: Regex::new(r"^\s*(?:[-*+]|\d+[.)])\s+(?:\[[ xX]\]\s+)?(.+?)\s*$")?,
            sentence_end: Regex::new(r"[.!?]+(?:\s+|$)")?,
        })
    }

    fn priority_of(text: &str) -> Priority {
        let lower = text.to_lowercase();
        if HIGH_PRIORITY_MARKERS.iter().any(|m| lower.contains(m)) {
            Priority::High
        } else if LOW_PRIORITY_MARKERS.iter().any(|m| lower.contains(m)) {
            Priority::Low
        } else {
            Priority::Medium
        }
    }

    fn sentences<'a>(&self, text: &'a str) -> Vec<&'a str> {
        self.sentence_end
            .split(text)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect()
    }
}

/// Subtask count suggested for a complexity score.
pub fn recommended_subtasks(score: u8) -> usize {
    (score as usize).div_ceil(2).max(2)
}

/// Cuts `text` to the title limit on a word boundary.
fn title_from(text: &str) -> String {
    let text = text.trim().trim_end_matches(['.', ':', ';']);
    if text.chars().count() <= TITLE_LIMIT {
        return text.to_string();
    }

    let mut title = String::new();
    for word in text.split_whitespace() {
        if title.chars().count() + word.chars().count() + 1 > TITLE_LIMIT {
            break;
        }
        if !title.is_empty() {
            title.push(' ');
        }
        title.push_str(word);
    }
    if title.is_empty() {
        title = text.chars().take(TITLE_LIMIT).collect();
    }
    title
}

#[async_trait]
impl TaskGenerator for HeuristicGenerator {
    async fn generate_tasks(
        &self,
        prd: &str,
        max_tasks: usize,
        ctx: &OperationContext,
    ) -> anyhow::Result<Vec<TaskDraft>> {
        let mut drafts: Vec<TaskDraft> = Vec::new();
        let mut section = String::new();
        let mut section_start: Option<usize> = None;

        for line in prd.lines() {
            if drafts.len() >= max_tasks {
                break;
            }
            ctx.check()?;

            if let Some(caps) = self.heading.captures(line) {
                section = caps[1].to_string();
                section_start = None;
                continue;
            }

            let Some(caps) = self.list_item.captures(line) else {
                continue;
            };
            let item = &caps[1];

            let position = drafts.len() + 1;
            let dependencies = match section_start {
                Some(_) => vec![(position - 1) as TaskId],
                None => Vec::new(),
            };
            if section_start.is_none() {
                section_start = Some(position);
            }

            drafts.push(TaskDraft {
                title: title_from(item),
                description: if section.is_empty() {
                    item.to_string()
                } else {
                    format!("{}: {}", section, item)
                },
                details: item.to_string(),
                test_strategy: format!("Verify that {}", item.trim_end_matches('.')),
                priority: Self::priority_of(&format!("{} {}", section, item)),
                dependencies,
            });
            tokio::task::yield_now().await;
        }

        // Unstructured documents: fall back to one task per paragraph.
        if drafts.is_empty() {
            for paragraph in prd.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
                if drafts.len() >= max_tasks {
                    break;
                }
                ctx.check()?;

                let first = self.sentences(paragraph).first().copied().unwrap_or(paragraph);
                drafts.push(TaskDraft {
                    title: title_from(first),
                    description: paragraph.to_string(),
                    details: paragraph.to_string(),
                    test_strategy: format!("Verify that {}", first.trim_end_matches('.')),
                    priority: Self::priority_of(paragraph),
                    dependencies: Vec::new(),
                });
            }
        }

        if drafts.is_empty() {
            anyhow::bail!("the document contains no requirements to turn into tasks");
        }
        Ok(drafts)
    }

    async fn expand_task(
        &self,
        task: &Task,
        count: usize,
        guidance: &str,
        ctx: &OperationContext,
    ) -> anyhow::Result<Vec<SubtaskDraft>> {
        let source = format!("{} {} {}", task.details, guidance, task.description);
        let mut steps: Vec<String> = self
            .sentences(&source)
            .into_iter()
            .map(title_from)
            .collect();
        steps.dedup();

        let phases = ["Design", "Implement", "Test", "Document"];
        let mut phase = 0;
        while steps.len() < count {
            let label = match phases.get(phase) {
                Some(verb) => format!("{} {}", verb, task.title),
                None => format!("Refine {} (part {})", task.title, phase - phases.len() + 1),
            };
            steps.push(title_from(&label));
            phase += 1;
        }
        steps.truncate(count);

        let mut drafts = Vec::with_capacity(steps.len());
        for (index, step) in steps.into_iter().enumerate() {
            ctx.check()?;
            drafts.push(SubtaskDraft {
                description: format!("Part {} of task {}: {}", index + 1, task.id, step),
                title: step,
                details: String::new(),
                dependencies: if index == 0 {
                    Vec::new()
                } else {
                    vec![index as TaskId]
                },
            });
            tokio::task::yield_now().await;
        }
        Ok(drafts)
    }

    async fn assess_complexity(
        &self,
        task: &Task,
        ctx: &OperationContext,
    ) -> anyhow::Result<ComplexityAssessment> {
        ctx.check()?;

        let text = format!("{} {} {}", task.title, task.description, task.details).to_lowercase();
        let words = text.split_whitespace().count();
        let markers: Vec<&str> = COMPLEXITY_MARKERS
            .iter()
            .copied()
            .filter(|m| text.contains(m))
            .collect();

        let raw = 1 + words / 25 + task.dependencies.len() + 2 * markers.len();
        let score = raw.clamp(1, 10) as u8;
        let recommended_subtasks = recommended_subtasks(score);

        let reasoning = if markers.is_empty() {
            format!(
                "{} words, {} dependencies",
                words,
                task.dependencies.len()
            )
        } else {
            format!(
                "{} words, {} dependencies, mentions {}",
                words,
                task.dependencies.len(),
                markers.join(", ")
            )
        };

        Ok(ComplexityAssessment {
            score,
            recommended_subtasks,
            reasoning,
        })
    }

    async fn draft_task(&self, prompt: &str, ctx: &OperationContext) -> anyhow::Result<TaskDraft> {
        ctx.check()?;

        let prompt = prompt.trim();
        let first = self.sentences(prompt).first().copied().unwrap_or(prompt);
        if first.is_empty() {
            anyhow::bail!("prompt is empty");
        }

        Ok(TaskDraft {
            title: title_from(first),
            description: prompt.to_string(),
            details: prompt.to_string(),
            test_strategy: format!("Verify that {}", first.trim_end_matches('.')),
            priority: Self::priority_of(prompt),
            dependencies: Vec::new(),
        })
    }

    async fn revise_task(
        &self,
        task: &Task,
        prompt: &str,
        ctx: &OperationContext,
    ) -> anyhow::Result<TaskRevision> {
        ctx.check()?;

        let prompt = prompt.trim();
        if prompt.is_empty() {
            anyhow::bail!("prompt is empty");
        }

        let details = if task.details.trim().is_empty() {
            prompt.to_string()
        } else {
            format!("{}\n\n{}", task.details.trim_end(), prompt)
        };
        let test_strategy = if task.test_strategy.trim().is_empty() {
            let first = self.sentences(prompt).first().copied().unwrap_or(prompt);
            format!("Verify that {}", first.trim_end_matches('.'))
        } else {
            task.test_strategy.clone()
        };
        // Prompts only ever raise urgency.
        let priority = match Self::priority_of(prompt) {
            Priority::High => Priority::High,
            _ => task.priority,
        };

        Ok(TaskRevision {
            title: task.title.clone(),
            description: task.description.clone(),
            details,
            test_strategy,
            priority,
        })
    }

    async fn note_subtask(
        &self,
        _parent: &Task,
        _subtask: &Subtask,
        prompt: &str,
        ctx: &OperationContext,
    ) -> anyhow::Result<String> {
        ctx.check()?;

        let lines: Vec<String> = self
            .sentences(prompt)
            .into_iter()
            .map(|sentence| format!("- {}", sentence))
            .collect();
        if lines.is_empty() {
            anyhow::bail!("prompt is empty");
        }
        Ok(lines.join("\n"))
    }
}
