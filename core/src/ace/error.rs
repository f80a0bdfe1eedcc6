//! ACE 管线的错误分类
//!
//! 每一类错误对应一种恢复策略：Validation 跳过当前提案，
//! Provider 中止当前 pass，Parse 在 pass 内有限重试，
//! NotFound 记日志后跳过，Capacity 视为内部不变量被破坏。

use crate::llm::ProviderError;
use thiserror::Error;

/// ACE 核心错误
#[derive(Debug, Error)]
pub enum AceError {
    /// 输入校验失败（空内容、未知 section 等），局部可恢复
    #[error("validation failed: {0}")]
    Validation(String),

    /// 补全能力调用失败，向上传播并中止当前 pass
    #[error(transparent)]
    Provider(#[from] ProviderError),

    /// 模型输出不符合预期的结构化格式
    #[error("failed to parse model output: {0}")]
    Parse(String),

    /// EDIT/DEPRECATE 引用了不存在的 bullet
    #[error("bullet not found: {0}")]
    NotFound(String),

    /// 容量不变量被破坏，正常流程中不应出现
    #[error("section {0} exceeded its capacity invariant")]
    Capacity(String),

    /// 持久化层读写或序列化失败
    #[error("storage failure: {0}")]
    Storage(String),
}

impl From<std::io::Error> for AceError {
    fn from(err: std::io::Error) -> Self {
        AceError::Storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_is_transparent() {
        let err: AceError = ProviderError::Timeout.into();
        assert_eq!(err.to_string(), "completion request timed out");
    }

    #[test]
    fn test_io_error_maps_to_storage() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: AceError = io.into();
        assert!(matches!(err, AceError::Storage(_)));
    }
}
