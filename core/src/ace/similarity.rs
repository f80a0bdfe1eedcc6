//! 相似度计算模块
//!
//! 去重判定的两条路径：
//! 1. 语义路径：外部 SimilarityProvider（embedding 比较）
//! 2. 词法路径：编辑距离 + N-gram 的加权组合，无外部依赖
//!
//! PlaybookManager 通过 SimilarityEngine 统一调用，按配置选路。

use crate::ace::error::AceError;
use crate::llm::SimilarityProvider;
use std::collections::HashMap;
use std::sync::Arc;

/// 词法相似度计算器
pub struct SimilarityCalculator;

impl SimilarityCalculator {
    /// 计算 Levenshtein 编辑距离
    ///
    /// 允许的编辑操作：插入、删除、替换字符。
    pub fn levenshtein_distance(s1: &str, s2: &str) -> usize {
        let len1 = s1.chars().count();
        let len2 = s2.chars().count();

        // 边界情况
        if len1 == 0 {
            return len2;
        }
        if len2 == 0 {
            return len1;
        }

        let mut matrix = vec![vec![0; len2 + 1]; len1 + 1];

        for (i, row) in matrix.iter_mut().enumerate() {
            row[0] = i;
        }
        for j in 0..=len2 {
            matrix[0][j] = j;
        }

        let chars1: Vec<char> = s1.chars().collect();
        let chars2: Vec<char> = s2.chars().collect();

        for (i, c1) in chars1.iter().enumerate() {
            for (j, c2) in chars2.iter().enumerate() {
                let cost = if c1 == c2 { 0 } else { 1 };

                matrix[i + 1][j + 1] = std::cmp::min(
                    std::cmp::min(
                        matrix[i][j + 1] + 1, // 删除
                        matrix[i + 1][j] + 1, // 插入
                    ),
                    matrix[i][j] + cost, // 替换
                );
            }
        }

        matrix[len1][len2]
    }

    /// 归一化编辑距离相似度，范围 0.0（完全不同）- 1.0（完全相同）
    pub fn similarity_score(s1: &str, s2: &str) -> f32 {
        let distance = Self::levenshtein_distance(s1, s2) as f32;
        let max_len = s1.chars().count().max(s2.chars().count()) as f32;

        if max_len == 0.0 {
            return 1.0;
        }

        1.0 - (distance / max_len)
    }

    /// 计算 N-gram 相似度
    ///
    /// 把文本切成连续 n 字符片段，比较两个多重集的重叠率。
    pub fn ngram_similarity(s1: &str, s2: &str, n: usize) -> f32 {
        let ngrams1 = Self::extract_ngrams(s1, n);
        let ngrams2 = Self::extract_ngrams(s2, n);

        if ngrams1.is_empty() && ngrams2.is_empty() {
            return 1.0;
        }

        if ngrams1.is_empty() || ngrams2.is_empty() {
            return 0.0;
        }

        let mut intersection = 0;
        let mut total = 0;

        for (gram, count1) in &ngrams1 {
            if let Some(count2) = ngrams2.get(gram) {
                intersection += count1.min(count2);
            }
            total += count1;
        }

        for (gram, count2) in &ngrams2 {
            if !ngrams1.contains_key(gram) {
                total += count2;
            }
        }

        if total == 0 {
            return 0.0;
        }

        intersection as f32 / total as f32
    }

    /// 提取 N-grams
    pub fn extract_ngrams(text: &str, n: usize) -> HashMap<String, usize> {
        let mut ngrams = HashMap::new();
        let chars: Vec<char> = text.chars().collect();

        if chars.len() < n {
            return ngrams;
        }

        for i in 0..=chars.len() - n {
            let gram: String = chars[i..i + n].iter().collect();
            *ngrams.entry(gram).or_insert(0) += 1;
        }

        ngrams
    }

    /// 组合相似度
    ///
    /// 40% Levenshtein + 30% 2-gram + 30% 3-gram 的加权平均。
    pub fn combined_similarity(s1: &str, s2: &str) -> f32 {
        let lev_score = Self::similarity_score(s1, s2);
        let bigram_score = Self::ngram_similarity(s1, s2, 2);
        let trigram_score = Self::ngram_similarity(s1, s2, 3);

        lev_score * 0.4 + bigram_score * 0.3 + trigram_score * 0.3
    }

    /// 归一化文本：小写、去标点、压缩空白
    pub fn normalize_text(text: &str) -> String {
        let normalized: String = text
            .to_lowercase()
            .chars()
            .filter(|c| c.is_alphanumeric() || c.is_whitespace())
            .collect();

        let words: Vec<&str> = normalized.split_whitespace().collect();
        words.join(" ")
    }
}

/// 相似度引擎
///
/// 优先语义路径；provider 出错且允许回退时降级到词法路径。
/// 两条路径都不可用时报 ValidationError。
pub struct SimilarityEngine {
    provider: Option<Arc<dyn SimilarityProvider>>,
    semantic_enabled: bool,
    lexical_fallback: bool,
}

impl SimilarityEngine {
    pub fn new(
        provider: Option<Arc<dyn SimilarityProvider>>,
        semantic_enabled: bool,
        lexical_fallback: bool,
    ) -> Self {
        Self {
            provider,
            semantic_enabled,
            lexical_fallback,
        }
    }

    /// 只用词法路径的引擎
    pub fn lexical() -> Self {
        Self::new(None, false, true)
    }

    /// 计算两段文本的相似度，范围 [0, 1]
    pub async fn score(&self, a: &str, b: &str) -> Result<f32, AceError> {
        if self.semantic_enabled {
            match &self.provider {
                Some(provider) => match provider.similarity(a, b).await {
                    Ok(score) => return Ok(score.clamp(0.0, 1.0)),
                    Err(err) if self.lexical_fallback => {
                        tracing::warn!("semantic similarity failed, using lexical fallback: {err}");
                    }
                    Err(err) => return Err(err.into()),
                },
                None if !self.lexical_fallback => {
                    return Err(AceError::Validation(
                        "semantic dedup enabled but no similarity provider configured".to_string(),
                    ));
                }
                None => {}
            }
        }

        if !self.lexical_fallback && !self.semantic_enabled {
            return Err(AceError::Validation(
                "no similarity capability configured".to_string(),
            ));
        }

        let a_norm = SimilarityCalculator::normalize_text(a);
        let b_norm = SimilarityCalculator::normalize_text(b);
        Ok(SimilarityCalculator::combined_similarity(&a_norm, &b_norm).clamp(0.0, 1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ProviderError;
    use async_trait::async_trait;

    #[test]
    fn test_levenshtein_distance() {
        assert_eq!(SimilarityCalculator::levenshtein_distance("hello", "hello"), 0);
        assert_eq!(
            SimilarityCalculator::levenshtein_distance("kitten", "sitting"),
            3
        );
        assert_eq!(SimilarityCalculator::levenshtein_distance("", "hello"), 5);
        assert_eq!(SimilarityCalculator::levenshtein_distance("hello", ""), 5);
        assert_eq!(SimilarityCalculator::levenshtein_distance("hello", "hallo"), 1);
    }

    #[test]
    fn test_similarity_score() {
        assert_eq!(SimilarityCalculator::similarity_score("hello", "hello"), 1.0);

        let score = SimilarityCalculator::similarity_score("hello", "world");
        assert!(score < 1.0 && score > 0.0);

        let score = SimilarityCalculator::similarity_score("hello", "hallo");
        assert!(score > 0.6);
    }

    #[test]
    fn test_ngram_extraction() {
        let ngrams = SimilarityCalculator::extract_ngrams("hello", 2);

        assert_eq!(ngrams.get("he"), Some(&1));
        assert_eq!(ngrams.get("el"), Some(&1));
        assert_eq!(ngrams.get("ll"), Some(&1));
        assert_eq!(ngrams.get("lo"), Some(&1));
        assert_eq!(ngrams.len(), 4);
    }

    #[test]
    fn test_combined_similarity() {
        assert_eq!(SimilarityCalculator::combined_similarity("hello", "hello"), 1.0);

        let score = SimilarityCalculator::combined_similarity("hello", "hallo");
        assert!(score > 0.45);

        let score = SimilarityCalculator::combined_similarity("hello", "world");
        assert!(score < 0.4);
    }

    #[test]
    fn test_normalize_text() {
        assert_eq!(
            SimilarityCalculator::normalize_text("Hello,  World!"),
            "hello world"
        );
        assert_eq!(
            SimilarityCalculator::normalize_text("hello  world   test"),
            "hello world test"
        );
    }

    #[test]
    fn test_near_duplicate_heuristics_score_high() {
        let a = SimilarityCalculator::normalize_text("Use clear front-of-pack labeling.");
        let b = SimilarityCalculator::normalize_text("use clear front-of-pack labeling");
        assert_eq!(SimilarityCalculator::combined_similarity(&a, &b), 1.0);

        let c = SimilarityCalculator::normalize_text("Use clear front-of-pack labelling");
        assert!(SimilarityCalculator::combined_similarity(&a, &c) > 0.85);
    }

    struct FixedProvider(f32);

    #[async_trait]
    impl SimilarityProvider for FixedProvider {
        async fn similarity(&self, _a: &str, _b: &str) -> Result<f32, ProviderError> {
            Ok(self.0)
        }
    }

    struct BrokenProvider;

    #[async_trait]
    impl SimilarityProvider for BrokenProvider {
        async fn similarity(&self, _a: &str, _b: &str) -> Result<f32, ProviderError> {
            Err(ProviderError::Timeout)
        }
    }

    #[tokio::test]
    async fn test_engine_prefers_semantic_path() {
        let engine = SimilarityEngine::new(Some(Arc::new(FixedProvider(0.93))), true, true);
        let score = engine.score("a", "b").await.unwrap();
        assert_eq!(score, 0.93);
    }

    #[tokio::test]
    async fn test_engine_falls_back_to_lexical() {
        let engine = SimilarityEngine::new(Some(Arc::new(BrokenProvider)), true, true);
        let score = engine.score("hello", "hello").await.unwrap();
        assert_eq!(score, 1.0);
    }

    #[tokio::test]
    async fn test_engine_errors_without_any_capability() {
        let engine = SimilarityEngine::new(None, true, false);
        let err = engine.score("a", "b").await.unwrap_err();
        assert!(matches!(err, AceError::Validation(_)));
    }
}
