//! ACEPipeline - 单个任务的 Generate → Reflect → Curate 状态机
//!
//! 每个任务一个管线实例，多个管线共享同一个 PlaybookManager。
//! 循环被 `max_reflector_iterations` 硬性封顶，Reflector 永不收敛
//! 也能保证终止。任务可以在任何状态边界被取消：每条提案都是
//! 全有或全无的，取消只是不再发起后续 pass，Playbook 停留在
//! 最后一次完整 CURATE 之后的状态。

use crate::ace::curator::Curator;
use crate::ace::error::AceError;
use crate::ace::generator::Generator;
use crate::ace::playbook::PlaybookManager;
use crate::ace::reflector::Reflector;
use crate::ace::types::AceConfig;
use crate::ace::types::AnalysisDraft;
use crate::ace::types::AnalysisTask;
use crate::ace::types::Bullet;
use crate::ace::types::CurationReport;
use crate::ace::types::PipelineConfig;
use crate::ace::types::Proposal;
use crate::ace::types::QualitySignal;
use crate::ace::types::Section;
use crate::ace::types::TaskOutcome;
use crate::ace::types::TaskStatus;
use crate::llm::CompletionClient;
use std::sync::Arc;

/// 解析失败在单个 pass 内的重试上限
const PARSE_RETRY_LIMIT: u32 = 2;

/// 管线状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Init,
    Generate,
    Reflect,
    Curate,
    Terminate,
}

/// ACE 管线
pub struct ACEPipeline {
    generator: Generator,
    reflector: Reflector,
    curator: Curator,
    manager: Arc<PlaybookManager>,
    config: PipelineConfig,
    sections: Vec<Section>,
}

impl ACEPipeline {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        manager: Arc<PlaybookManager>,
        config: &AceConfig,
    ) -> Self {
        Self {
            generator: Generator::new(Arc::clone(&client), &config.completion),
            reflector: Reflector::new(client, &config.completion),
            curator: Curator::new(Arc::clone(&manager)),
            manager,
            config: config.pipeline.clone(),
            sections: Section::all().to_vec(),
        }
    }

    /// 限定本任务相关的 section（默认全部）
    pub fn with_sections(mut self, sections: Vec<Section>) -> Self {
        self.sections = sections;
        self
    }

    /// 跑完一个任务
    ///
    /// 终态永远是 TERMINATE：要么收敛（一个 pass 没有实质变更），
    /// 要么触到迭代上限。Provider 失败时优雅降级，返回最近一次
    /// 成功的草稿（如果有）。
    pub async fn run(&self, task: &AnalysisTask, signal: Option<&QualitySignal>) -> TaskOutcome {
        let mut state = PipelineState::Init;
        let mut last_draft: Option<AnalysisDraft> = None;
        let mut pending: Vec<Proposal> = Vec::new();
        let mut cumulative = CurationReport::default();
        let mut passes = 0u32;

        loop {
            state = match state {
                PipelineState::Init => {
                    tracing::debug!("task {} attached to shared playbook", task.task_id);
                    PipelineState::Generate
                }

                PipelineState::Generate => {
                    let context = self.manager.get_context(&self.sections).await;
                    match self.generate_with_retry(task, &context).await {
                        Ok(draft) => {
                            self.manager.mark_cited(&draft.cited_bullets).await;
                            last_draft = Some(draft);
                            PipelineState::Reflect
                        }
                        Err(err) => {
                            return Self::failed(task, last_draft, passes, cumulative, err);
                        }
                    }
                }

                PipelineState::Reflect => {
                    let Some(draft) = last_draft.as_ref() else {
                        // 不应该发生：REFLECT 只会跟在成功的 GENERATE 后面
                        return Self::failed(
                            task,
                            None,
                            passes,
                            cumulative,
                            AceError::Validation("reflect reached without a draft".to_string()),
                        );
                    };

                    let context = self.manager.get_context(&self.sections).await;
                    match self.reflect_with_retry(task, draft, signal, &context).await {
                        Ok(proposals) => {
                            pending = proposals;
                            PipelineState::Curate
                        }
                        Err(err) => {
                            return Self::failed(task, last_draft, passes, cumulative, err);
                        }
                    }
                }

                PipelineState::Curate => {
                    passes += 1;
                    let proposals = std::mem::take(&mut pending);

                    let report = match self.curator.apply(&task.task_id, &proposals).await {
                        Ok(report) => report,
                        Err(err) => {
                            return Self::failed(task, last_draft, passes, cumulative, err);
                        }
                    };
                    cumulative.absorb(&report);

                    // 落盘失败不丢内存状态，留给下一次 flush
                    if let Err(err) = self.manager.save().await {
                        tracing::warn!("playbook flush failed after pass {passes}: {err}");
                    }

                    if !report.has_material_change() {
                        tracing::debug!("task {} converged after pass {passes}", task.task_id);
                        PipelineState::Terminate
                    } else if passes >= self.config.max_reflector_iterations {
                        tracing::debug!(
                            "task {} reached iteration cap ({passes} passes)",
                            task.task_id
                        );
                        PipelineState::Terminate
                    } else {
                        // 让下一个 GENERATE 看到刚更新过的 playbook
                        PipelineState::Generate
                    }
                }

                PipelineState::Terminate => {
                    tracing::info!(
                        "task {} finished: {} passes, {:?}",
                        task.task_id,
                        passes,
                        cumulative
                    );
                    return TaskOutcome {
                        task_id: task.task_id.clone(),
                        result: last_draft,
                        status: TaskStatus::Completed,
                        passes,
                        cumulative,
                    };
                }
            };
        }
    }

    /// GENERATE，解析失败时在 pass 内重试
    async fn generate_with_retry(
        &self,
        task: &AnalysisTask,
        context: &[Bullet],
    ) -> Result<AnalysisDraft, AceError> {
        let mut last_err = AceError::Parse("generator produced no output".to_string());

        for attempt in 0..=PARSE_RETRY_LIMIT {
            match self.generator.generate(task, context).await {
                Ok(draft) => return Ok(draft),
                Err(AceError::Parse(msg)) => {
                    tracing::warn!("generator parse failure (attempt {attempt}): {msg}");
                    last_err = AceError::Parse(msg);
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_err)
    }

    /// REFLECT，解析重试耗尽后按零提案处理，保证循环仍能收敛
    async fn reflect_with_retry(
        &self,
        task: &AnalysisTask,
        draft: &AnalysisDraft,
        signal: Option<&QualitySignal>,
        context: &[Bullet],
    ) -> Result<Vec<Proposal>, AceError> {
        for attempt in 0..=PARSE_RETRY_LIMIT {
            match self.reflector.reflect(task, draft, signal, context).await {
                Ok(proposals) => return Ok(proposals),
                Err(AceError::Parse(msg)) => {
                    tracing::warn!("reflector parse failure (attempt {attempt}): {msg}");
                }
                Err(err) => return Err(err),
            }
        }

        tracing::warn!("reflector output unusable, treating pass as zero proposals");
        Ok(Vec::new())
    }

    /// 失败出口：能降级就带上最后一次成功的草稿
    fn failed(
        task: &AnalysisTask,
        last_draft: Option<AnalysisDraft>,
        passes: u32,
        cumulative: CurationReport,
        err: AceError,
    ) -> TaskOutcome {
        tracing::error!("task {} failed: {err}", task.task_id);
        TaskOutcome {
            task_id: task.task_id.clone(),
            result: last_draft,
            status: TaskStatus::Failed(err.to_string()),
            passes,
            cumulative,
        }
    }
}
