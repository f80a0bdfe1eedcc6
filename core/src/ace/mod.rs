//! ACE - Agentic Context Engineering 管线
//!
//! Generator → Reflector → Curator 的闭环，围着一份共享的
//! bullet playbook 转：
//! 1. Generate: 带着 playbook 上下文产出分析草稿
//! 2. Reflect: 审视草稿，提出 ADD/EDIT/DEPRECATE 提案
//! 3. Curate: 验证提案并落库（去重、容量、淘汰都在这一步兜底）
//! 4. 有实质变更就回到 Generate，否则终止

pub mod cli;
pub mod config_loader;
pub mod curator;
pub mod error;
pub mod generator;
pub mod pipeline;
pub mod playbook;
pub mod reflector;
pub mod similarity;
pub mod storage;
pub mod types;

use crate::llm::CompletionClient;
use crate::llm::SimilarityProvider;
use std::sync::Arc;

pub use cli::AceCliHandler;
pub use cli::AceCommand;
pub use config_loader::AceConfigLoader;
pub use config_loader::default_home;
pub use config_loader::load_ace_config;
pub use curator::Curator;
pub use error::AceError;
pub use generator::Generator;
pub use pipeline::ACEPipeline;
pub use pipeline::PipelineState;
pub use playbook::AddOutcome;
pub use playbook::ConfidenceAgeUsage;
pub use playbook::EvictionPolicy;
pub use playbook::PlaybookManager;
pub use playbook::PlaybookStats;
pub use reflector::Reflector;
pub use similarity::SimilarityCalculator;
pub use similarity::SimilarityEngine;
pub use storage::PlaybookStorage;
pub use types::AceConfig;
pub use types::AnalysisDraft;
pub use types::AnalysisTask;
pub use types::Bullet;
pub use types::BulletId;
pub use types::BulletMetadata;
pub use types::CompletionConfig;
pub use types::CurationReport;
pub use types::PipelineConfig;
pub use types::Playbook;
pub use types::PlaybookConfig;
pub use types::Proposal;
pub use types::QualitySignal;
pub use types::Section;
pub use types::TaskOutcome;
pub use types::TaskStatus;

/// ACE 引擎 - 多任务共享的入口
///
/// 持有共享 PlaybookManager；每个分析任务通过 [`AceEngine::pipeline`]
/// 拿到自己的管线实例，并发任务只在写同一个 section 时互相等待。
pub struct AceEngine {
    config: AceConfig,
    client: Arc<dyn CompletionClient>,
    manager: Arc<PlaybookManager>,
}

impl AceEngine {
    /// 创建引擎并挂载持久化的 playbook
    pub async fn new(
        config: AceConfig,
        client: Arc<dyn CompletionClient>,
        similarity: Option<Arc<dyn SimilarityProvider>>,
    ) -> Result<Self, AceError> {
        let engine = SimilarityEngine::new(
            similarity,
            config.playbook.enable_semantic_dedup,
            config.playbook.enable_lexical_fallback,
        );

        let manager = Arc::new(PlaybookManager::new(config.playbook.clone(), engine)?);
        manager.load().await?;

        let stats = manager.stats().await;
        tracing::info!(
            "ACE engine ready: {} bullets, playbook version {}",
            stats.total_bullets,
            stats.version
        );

        Ok(Self {
            config,
            client,
            manager,
        })
    }

    /// 共享的 PlaybookManager
    pub fn manager(&self) -> Arc<PlaybookManager> {
        Arc::clone(&self.manager)
    }

    /// 为一个任务构建独立管线
    pub fn pipeline(&self) -> ACEPipeline {
        ACEPipeline::new(
            Arc::clone(&self.client),
            Arc::clone(&self.manager),
            &self.config,
        )
    }

    /// 跑一个任务（便捷入口）
    pub async fn run_task(
        &self,
        task: &AnalysisTask,
        signal: Option<&QualitySignal>,
    ) -> TaskOutcome {
        self.pipeline().run(task, signal).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Completion;
    use crate::llm::CompletionOptions;
    use crate::llm::ProviderError;
    use async_trait::async_trait;
    use tempfile::tempdir;

    struct EchoClient;

    #[async_trait]
    impl CompletionClient for EchoClient {
        async fn complete(
            &self,
            _prompt: &str,
            _options: &CompletionOptions,
        ) -> Result<Completion, ProviderError> {
            Ok(Completion {
                text: "{\"analysis\": \"fine\", \"cited_bullets\": []}".to_string(),
            })
        }
    }

    fn test_config(dir: &std::path::Path) -> AceConfig {
        AceConfig {
            playbook: PlaybookConfig {
                path: dir.to_string_lossy().to_string(),
                ..PlaybookConfig::default()
            },
            ..AceConfig::default()
        }
    }

    #[tokio::test]
    async fn test_engine_creation_mounts_empty_playbook() {
        let temp_dir = tempdir().unwrap();
        let engine = AceEngine::new(test_config(temp_dir.path()), Arc::new(EchoClient), None)
            .await
            .unwrap();
        assert_eq!(engine.manager().stats().await.total_bullets, 0);
    }

    #[tokio::test]
    async fn test_engine_runs_task_to_completion() {
        let temp_dir = tempdir().unwrap();
        let engine = AceEngine::new(test_config(temp_dir.path()), Arc::new(EchoClient), None)
            .await
            .unwrap();

        // EchoClient 的回复不是提案数组，Reflector 解析耗尽后按
        // 零提案收敛，任务在第一个 pass 之后正常结束
        let task = AnalysisTask::new("Trail Mix", "snacks", "Quick shelf check");
        let outcome = engine.run_task(&task, None).await;

        assert_eq!(outcome.status, TaskStatus::Completed);
        assert_eq!(outcome.passes, 1);
        assert_eq!(outcome.result.unwrap().content, "fine");
    }
}
