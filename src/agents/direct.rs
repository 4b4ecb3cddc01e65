//! Direct answer path
//!
//! Two plain completions (workflow draft, then final answer) with no system
//! role and no sentinels. Used when the staged discussion cannot produce an
//! answer.

use tracing::debug;

use crate::agents::stages::strip_markers;
use crate::config::ModelConfig;
use crate::knowledge::{format_bullets, RetrievalResult};
use crate::llm::LLM;
use crate::types::{AppError, AppResult, LLMMessage, LLMRequest};

pub fn design_prompt(query: &str, knowledge: &str) -> String {
    format!(
        "基于以下知识：\n{knowledge}\n\n用户问题：{query}\n\n请设计一个结构化的工作流程，按顺序列出步骤和所需工具："
    )
}

pub fn synthesis_prompt(query: &str, knowledge: &str, design: &str) -> String {
    format!(
        "基于以下知识：\n{knowledge}\n\n参考流程：\n{design}\n\n用户问题：{query}\n\n请生成专业、详细的回答："
    )
}

/// Design call followed by the synthesis call; the second reply is the answer
pub async fn answer(
    llm: &LLM,
    model_name: &str,
    query: &str,
    knowledge: &str,
    model: &ModelConfig,
) -> AppResult<String> {
    let design = complete(llm, model_name, design_prompt(query, knowledge), model).await?;
    debug!(design_len = design.len(), "Direct design drafted");
    complete(llm, model_name, synthesis_prompt(query, knowledge, &design), model).await
}

async fn complete(llm: &LLM, model_name: &str, prompt: String, model: &ModelConfig) -> AppResult<String> {
    let request = LLMRequest::with_model_config(
        llm.provider_name(),
        model_name,
        vec![LLMMessage::user(prompt)],
        model,
    );
    let response = llm.create_chat_completion(&request).await?;
    let content = strip_markers(&response.content);
    if content.is_empty() {
        return Err(AppError::MalformedResponse("empty completion".to_string()));
    }
    Ok(content)
}

/// Last-resort reply: the error, then the keyword matches (positive scores only)
pub fn error_response(error: &AppError, matches: &[RetrievalResult]) -> String {
    let mut response = format!("API错误: {}\n\n抱歉，暂时无法生成完整回答。", error);

    if !matches.is_empty() {
        response.push_str("\n\n知识库中的相关内容：\n");
        response.push_str(&format_bullets(matches));
    }
    response
}
