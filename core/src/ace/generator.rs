//! Generator - 基于 playbook 上下文产出结构化分析
//!
//! 对 Playbook 只读。每次调用恰好发起一次补全请求，解析失败的
//! 重试由管线层决定。

use crate::ace::error::AceError;
use crate::ace::types::AnalysisDraft;
use crate::ace::types::AnalysisTask;
use crate::ace::types::Bullet;
use crate::ace::types::CompletionConfig;
use crate::llm::CompletionClient;
use crate::llm::CompletionOptions;
use regex::Regex;
use serde::Deserialize;
use std::sync::Arc;
use std::sync::LazyLock;

/// fenced JSON 代码块
static JSON_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"```(?:json)?\s*\n([\s\S]+?)\n\s*```").unwrap());

/// 从补全文本里取出 JSON 负载
///
/// 优先取第一个 fenced 代码块，没有代码块时把整段文本当 JSON。
pub(crate) fn extract_json_payload(text: &str) -> &str {
    if let Some(cap) = JSON_BLOCK.captures(text) {
        if let Some(block) = cap.get(1) {
            return block.as_str();
        }
    }
    text.trim()
}

/// 把 bullet 快照格式化成 prompt 上下文
///
/// bullets 已按 section 顺序 + 插入顺序排好，这里只负责分组标题
/// 和带 id 的行格式，id 让模型能够引用具体条目。
pub(crate) fn format_playbook_context(bullets: &[Bullet]) -> String {
    if bullets.is_empty() {
        return "(playbook is empty)".to_string();
    }

    let mut output = String::new();
    let mut current_section = None;

    for bullet in bullets {
        if current_section != Some(bullet.section) {
            if current_section.is_some() {
                output.push('\n');
            }
            output.push_str(&format!("## {}\n", bullet.section.title()));
            current_section = Some(bullet.section);
        }
        output.push_str(&format!("- [{}] {}\n", bullet.id, bullet.content));
    }

    output
}

/// 结构化草稿的 JSON 形状
#[derive(Debug, Deserialize)]
struct DraftPayload {
    analysis: String,

    #[serde(default)]
    cited_bullets: Vec<String>,
}

/// 解析补全输出为草稿
fn parse_draft(text: &str) -> Result<AnalysisDraft, AceError> {
    let payload = extract_json_payload(text);

    let parsed: DraftPayload = serde_json::from_str(payload)
        .map_err(|err| AceError::Parse(format!("draft is not valid JSON: {err}")))?;

    if parsed.analysis.trim().is_empty() {
        return Err(AceError::Parse("draft analysis is empty".to_string()));
    }

    Ok(AnalysisDraft {
        content: parsed.analysis,
        cited_bullets: parsed.cited_bullets,
    })
}

/// Generator
pub struct Generator {
    client: Arc<dyn CompletionClient>,
    options: CompletionOptions,
}

impl Generator {
    pub fn new(client: Arc<dyn CompletionClient>, config: &CompletionConfig) -> Self {
        Self {
            client,
            options: CompletionOptions {
                model: config.model.clone(),
                temperature: config.temperature,
                max_tokens: config.max_tokens,
                stream: config.stream,
            },
        }
    }

    /// 产出一版分析草稿
    ///
    /// 恰好一次补全调用；输出要求为 JSON
    /// `{"analysis": "...", "cited_bullets": ["sr-001", ...]}`。
    pub async fn generate(
        &self,
        task: &AnalysisTask,
        context: &[Bullet],
    ) -> Result<AnalysisDraft, AceError> {
        let prompt = self.build_prompt(task, context);

        tracing::debug!(
            "generating analysis for task {} with {} context bullets",
            task.task_id,
            context.len()
        );

        let completion = self.client.complete(&prompt, &self.options).await?;
        parse_draft(&completion.text)
    }

    fn build_prompt(&self, task: &AnalysisTask, context: &[Bullet]) -> String {
        let mut attributes = String::new();
        for (key, value) in &task.attributes {
            attributes.push_str(&format!("- {key}: {value}\n"));
        }
        if attributes.is_empty() {
            attributes.push_str("(none)\n");
        }

        format!(
            "You are a product marketing and packaging analyst.\n\
             \n\
             # Curated playbook\n\
             {playbook}\n\
             # Product\n\
             Name: {name}\n\
             Category: {category}\n\
             Brief: {brief}\n\
             Attributes:\n\
             {attributes}\n\
             Apply the playbook heuristics that are relevant. Respond with JSON:\n\
             {{\"analysis\": \"<markdown analysis>\", \"cited_bullets\": [\"<ids of playbook entries you actually used>\"]}}\n",
            playbook = format_playbook_context(context),
            name = task.product_name,
            category = task.category,
            brief = task.brief,
        )
    }
}
