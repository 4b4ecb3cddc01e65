//! Pipeline stage definitions
//!
//! Each role in the discussion is a plain data record: a name, the system
//! prompt the role speaks with, a prompt template, and whether the stage calls
//! the LLM at all. The orchestrator iterates the list in order.
//!
//! Templates use `{placeholder}` slots filled from the per-query session:
//! `{query}`, `{knowledge}`, `{design}`, `{validation}`, `{history}`.

/// Sentinel every LLM stage is asked to end its reply with
pub const STAGE_DONE_MARKER: &str = "<<STAGE_DONE>>";

/// Sentinel that ends the whole discussion. Only counts as a standalone
/// token, so words such as "TERMINATED" are plain text.
pub const TERMINATE_MARKER: &str = "TERMINATE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageKind {
    Retrieval,
    Design,
    Validation,
    Synthesis,
}

impl StageKind {
    /// Template slot holding this stage's output
    pub fn slot(&self) -> &'static str {
        match self {
            StageKind::Retrieval => "knowledge",
            StageKind::Design => "design",
            StageKind::Validation => "validation",
            StageKind::Synthesis => "answer",
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineStage {
    pub kind: StageKind,
    pub name: &'static str,
    pub system_prompt: &'static str,
    pub prompt_template: &'static str,
    pub uses_llm: bool,
}

impl PipelineStage {
    pub fn completion_marker(&self) -> &'static str {
        match self.kind {
            StageKind::Synthesis => TERMINATE_MARKER,
            _ => STAGE_DONE_MARKER,
        }
    }

    /// Whether `reply` signals that this stage is finished
    pub fn is_complete(&self, reply: &str) -> bool {
        reply.contains(STAGE_DONE_MARKER) || (self.kind == StageKind::Synthesis && has_terminate_marker(reply))
    }

    pub fn render<'a, F>(&self, lookup: F) -> String
    where
        F: Fn(&str) -> Option<&'a str>,
    {
        render_template(self.prompt_template, lookup)
    }
}

const RETRIEVER_SYSTEM: &str = "你负责从知识库中检索相关信息，提供给研究助手使用。";

const DESIGNER_SYSTEM: &str = "你是一个专业的科研流程专家，擅长蛋白质结构分析和生物信息学工作流程设计。请基于检索到的知识和用户需求，设计合理的工作流程。";

const DESIGN_TEMPLATE: &str = "用户问题：{query}

知识库检索结果：
{knowledge}

请设计一个结构化的工作流程：按顺序列出每个步骤、使用的工具或数据库，以及每一步的输入与输出。
完成后在最后一行单独输出 <<STAGE_DONE>>。";

const VALIDATOR_SYSTEM: &str = "你负责验证工作流程的合理性和完整性，检查是否有遗漏步骤。";

const VALIDATION_TEMPLATE: &str = "用户问题：{query}

待验证的工作流程：
{design}

请检查该流程的正确性与完整性：指出遗漏的步骤、顺序问题或不合适的工具，并给出改进建议。
完成后在最后一行单独输出 <<STAGE_DONE>>。";

const SYNTHESIZER_SYSTEM: &str = "你是一个专业的生物信息学专家，负责提供专业分析、回答用户问题并生成详细的工作流程。";

const SYNTHESIS_TEMPLATE: &str = "用户问题：{query}

知识库检索结果：
{knowledge}

工作流程设计：
{design}

验证意见：
{validation}

近期对话：
{history}

请综合以上内容，为用户给出最终的专业回答，包含完整的工作流程步骤和必要说明，不要提及内部讨论过程。
回答结束后单独输出 TERMINATE。";

/// retrieval → design → validation → synthesis
pub fn default_pipeline() -> Vec<PipelineStage> {
    vec![
        PipelineStage {
            kind: StageKind::Retrieval,
            name: "Knowledge_Retriever",
            system_prompt: RETRIEVER_SYSTEM,
            prompt_template: "{knowledge}",
            uses_llm: false,
        },
        PipelineStage {
            kind: StageKind::Design,
            name: "Research_Assistant",
            system_prompt: DESIGNER_SYSTEM,
            prompt_template: DESIGN_TEMPLATE,
            uses_llm: true,
        },
        PipelineStage {
            kind: StageKind::Validation,
            name: "Workflow_Validator",
            system_prompt: VALIDATOR_SYSTEM,
            prompt_template: VALIDATION_TEMPLATE,
            uses_llm: true,
        },
        PipelineStage {
            kind: StageKind::Synthesis,
            name: "Bioinformatics_Expert",
            system_prompt: SYNTHESIZER_SYSTEM,
            prompt_template: SYNTHESIS_TEMPLATE,
            uses_llm: true,
        },
    ]
}

/// Follow-up sent when a reply stops before its sentinel
pub fn continuation_prompt(marker: &str) -> String {
    format!("请继续完成上面的内容，结束时单独输出 {}。", marker)
}

/// Fill `{slot}` placeholders in one pass; substituted text is never re-scanned.
/// Unknown slots render empty, unmatched braces are kept literally.
pub fn render_template<'a, F>(template: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<&'a str>,
{
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) if is_slot_name(&after[..close]) => {
                out.push_str(lookup(&after[..close]).unwrap_or(""));
                rest = &after[close + 1..];
            }
            _ => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn is_slot_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_lowercase() || c == '_')
}

/// Byte ranges of `TERMINATE` not glued to an ASCII word character
fn terminate_spans(text: &str) -> impl Iterator<Item = (usize, usize)> + '_ {
    let is_word = |c: Option<char>| c.is_some_and(|c| c.is_ascii_alphanumeric() || c == '_');
    text.match_indices(TERMINATE_MARKER).filter_map(move |(start, marker)| {
        let end = start + marker.len();
        let before = text[..start].chars().next_back();
        let after = text[end..].chars().next();
        (!is_word(before) && !is_word(after)).then_some((start, end))
    })
}

pub fn has_terminate_marker(text: &str) -> bool {
    terminate_spans(text).next().is_some()
}

/// Remove every sentinel and surrounding blank space
pub fn strip_markers(text: &str) -> String {
    let text = text.replace(STAGE_DONE_MARKER, "");
    let mut out = String::with_capacity(text.len());
    let mut copied = 0;
    for (start, end) in terminate_spans(&text) {
        out.push_str(&text[copied..start]);
        copied = end;
    }
    out.push_str(&text[copied..]);
    out.trim().to_string()
}
