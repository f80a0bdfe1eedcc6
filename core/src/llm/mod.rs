//! 模型补全能力的领域边界
//!
//! 核心管线只依赖这里定义的 trait，不关心具体厂商。
//! HTTP 客户端、重试策略、流式解析都属于 provider 实现的职责，
//! 在这一层只透传配置。

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

/// 补全能力调用失败
#[derive(Debug, Error)]
pub enum ProviderError {
    /// 请求超时
    #[error("completion request timed out")]
    Timeout,

    /// 被限流
    #[error("provider rate limited the request")]
    RateLimited,

    /// 认证失败
    #[error("provider authentication failed: {0}")]
    Auth(String),

    /// 响应格式不符合 API 约定
    #[error("malformed provider response: {0}")]
    MalformedResponse(String),
}

/// 一次补全调用的透传选项
///
/// 这些选项由配置层组装，核心管线不解释其含义。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CompletionOptions {
    /// 模型标识
    pub model: String,

    /// 采样温度（0.0 - 1.0）
    pub temperature: f32,

    /// 生成 token 上限
    pub max_tokens: u32,

    /// 是否流式返回
    pub stream: bool,
}

impl Default for CompletionOptions {
    fn default() -> Self {
        Self {
            model: "gpt-4o-mini".to_string(),
            temperature: 0.2,
            max_tokens: 2048,
            stream: false,
        }
    }
}

/// 补全结果
#[derive(Debug, Clone)]
pub struct Completion {
    /// 模型返回的完整文本
    pub text: String,
}

/// 补全能力 trait
///
/// Generator 和 Reflector 通过它调用外部模型。实现方自行决定
/// 重试策略，这里的一次 `complete` 调用对核心来说就是一次调用。
#[async_trait]
pub trait CompletionClient: Send + Sync {
    /// 发送一次补全请求
    async fn complete(
        &self,
        prompt: &str,
        options: &CompletionOptions,
    ) -> Result<Completion, ProviderError>;

    /// Provider 名称（用于日志）
    fn name(&self) -> &str {
        "unknown"
    }
}

/// 语义相似度能力
///
/// 启用语义去重时由 PlaybookManager 调用，返回 [0, 1] 区间的分数。
/// 不可用时由调用方回退到词法算法。
#[async_trait]
pub trait SimilarityProvider: Send + Sync {
    /// 计算两段文本的语义相似度
    async fn similarity(&self, text_a: &str, text_b: &str) -> Result<f32, ProviderError>;
}
