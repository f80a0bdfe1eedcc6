//! 集成测试公用的测试替身
//!
//! ScriptedClient 按脚本逐条吐响应，RoleAwareClient 按 prompt 区分
//! Generator/Reflector 调用，StubSimilarity 返回预设的语义分数。

#![allow(dead_code)]

use async_trait::async_trait;
use shelfsense_core::ace::PlaybookConfig;
use shelfsense_core::llm::Completion;
use shelfsense_core::llm::CompletionClient;
use shelfsense_core::llm::CompletionOptions;
use shelfsense_core::llm::ProviderError;
use shelfsense_core::llm::SimilarityProvider;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;

/// 生成一条合法的草稿 JSON
pub fn draft_json(analysis: &str, cited: &[&str]) -> String {
    let cited: Vec<String> = cited.iter().map(|id| format!("\"{id}\"")).collect();
    format!(
        "{{\"analysis\": \"{analysis}\", \"cited_bullets\": [{}]}}",
        cited.join(", ")
    )
}

/// 生成一条 ADD 提案 JSON
pub fn add_proposal_json(section: &str, content: &str) -> String {
    format!(
        "[{{\"op\": \"add\", \"section\": \"{section}\", \"content\": \"{content}\", \"rationale\": \"test\"}}]"
    )
}

/// 指向临时目录的 playbook 配置
pub fn playbook_config(dir: &std::path::Path, cap: usize) -> PlaybookConfig {
    PlaybookConfig {
        path: dir.to_string_lossy().to_string(),
        max_bullets_per_section: cap,
        ..PlaybookConfig::default()
    }
}

/// 按脚本逐条吐响应的补全客户端
///
/// 脚本耗尽后返回空提案数组，让管线自然收敛。
pub struct ScriptedClient {
    responses: Mutex<VecDeque<Result<String, ProviderError>>>,
    pub prompts: Mutex<Vec<String>>,
    pub calls: AtomicUsize,
}

impl ScriptedClient {
    pub fn new(responses: Vec<Result<String, ProviderError>>) -> Self {
        Self {
            responses: Mutex::new(responses.into_iter().collect()),
            prompts: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompt(&self, index: usize) -> String {
        self.prompts.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl CompletionClient for ScriptedClient {
    async fn complete(
        &self,
        prompt: &str,
        _options: &CompletionOptions,
    ) -> Result<Completion, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(prompt.to_string());

        match self.responses.lock().unwrap().pop_front() {
            Some(Ok(text)) => Ok(Completion { text }),
            Some(Err(err)) => Err(err),
            None => Ok(Completion {
                text: "[]".to_string(),
            }),
        }
    }

    fn name(&self) -> &str {
        "scripted"
    }
}

/// 永不收敛的 Reflector 每轮提出的内容（彼此词法差异足够大，
/// 不会被去重合并成同一条）
const FRESH_HEURISTICS: &[&str] = &[
    "Always verify allergen disclosure placement",
    "Shelf color blocking beats isolated facings",
    "Price endings signal perceived value tier",
    "Claims need third-party certification backup",
    "Matte finishes photograph better for social feeds",
    "Window cutouts build trust for textured foods",
    "Launch copy should name the usage occasion",
    "Single-origin stories justify premium pricing",
];

/// 按 prompt 区分角色的客户端
///
/// Generator 调用返回固定草稿；Reflector 调用每次提出一条
/// 内容都不同的 ADD 提案，模拟永不收敛的 Reflector。
pub struct RoleAwareClient {
    reflections: AtomicUsize,
}

impl RoleAwareClient {
    pub fn new() -> Self {
        Self {
            reflections: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl CompletionClient for RoleAwareClient {
    async fn complete(
        &self,
        prompt: &str,
        _options: &CompletionOptions,
    ) -> Result<Completion, ProviderError> {
        // Reflector 的 prompt 带提案说明，Generator 的不带
        if prompt.contains("Propose playbook changes") {
            let n = self.reflections.fetch_add(1, Ordering::SeqCst);
            let content = FRESH_HEURISTICS[n % FRESH_HEURISTICS.len()];
            Ok(Completion {
                text: add_proposal_json("sr", content),
            })
        } else {
            Ok(Completion {
                text: draft_json("Draft under revision.", &[]),
            })
        }
    }

    fn name(&self) -> &str {
        "role-aware"
    }
}

/// 返回预设分数的语义相似度替身，未登记的组合落到默认分
pub struct StubSimilarity {
    scores: HashMap<(String, String), f32>,
    default: f32,
}

impl StubSimilarity {
    pub fn new(default: f32) -> Self {
        Self {
            scores: HashMap::new(),
            default,
        }
    }

    pub fn with_pair(mut self, a: &str, b: &str, score: f32) -> Self {
        self.scores.insert((a.to_string(), b.to_string()), score);
        self.scores.insert((b.to_string(), a.to_string()), score);
        self
    }
}

#[async_trait]
impl SimilarityProvider for StubSimilarity {
    async fn similarity(&self, text_a: &str, text_b: &str) -> Result<f32, ProviderError> {
        Ok(self
            .scores
            .get(&(text_a.to_string(), text_b.to_string()))
            .copied()
            .unwrap_or(self.default))
    }
}
