//! Curator - 把 Reflector 提案落到 Playbook 上
//!
//! 提案逐条应用，一条失败不影响其他条：Validation/NotFound 记日志
//! 后跳过，计入 rejected；Capacity 这类不变量破坏则直接中止。
//! 已经应用成功的提案保持已提交状态，不回滚。

use crate::ace::error::AceError;
use crate::ace::playbook::AddOutcome;
use crate::ace::playbook::PlaybookManager;
use crate::ace::types::CurationReport;
use crate::ace::types::Proposal;
use std::sync::Arc;

/// Curator
pub struct Curator {
    manager: Arc<PlaybookManager>,
}

impl Curator {
    pub fn new(manager: Arc<PlaybookManager>) -> Self {
        Self { manager }
    }

    /// 应用一个 pass 的提案列表，返回 diff 报告
    pub async fn apply(
        &self,
        task_id: &str,
        proposals: &[Proposal],
    ) -> Result<CurationReport, AceError> {
        let mut report = CurationReport::default();

        for proposal in proposals {
            match proposal {
                Proposal::Add {
                    section,
                    content,
                    rationale,
                } => match self.manager.add_or_merge(*section, content, Some(task_id)).await {
                    Ok(AddOutcome::Added(id)) => {
                        report.added += 1;
                        tracing::debug!("added {id}: {rationale}");
                    }
                    Ok(AddOutcome::Merged(id)) => {
                        report.merged += 1;
                        tracing::debug!("merged into {id}: {rationale}");
                    }
                    Err(AceError::Validation(msg)) => {
                        report.rejected += 1;
                        tracing::warn!("rejected add proposal: {msg}");
                    }
                    Err(err) => return Err(err),
                },

                Proposal::Edit {
                    bullet_id,
                    new_content,
                    rationale,
                } => match self.manager.edit(bullet_id, new_content).await {
                    Ok(()) => {
                        report.edited += 1;
                        tracing::debug!("edited {bullet_id}: {rationale}");
                    }
                    Err(AceError::NotFound(id)) => {
                        report.rejected += 1;
                        tracing::warn!("edit targets unknown bullet {id}, skipping");
                    }
                    Err(AceError::Validation(msg)) => {
                        report.rejected += 1;
                        tracing::warn!("rejected edit proposal: {msg}");
                    }
                    Err(err) => return Err(err),
                },

                Proposal::Deprecate {
                    bullet_id,
                    rationale,
                } => match self.manager.remove(bullet_id).await {
                    Ok(()) => {
                        report.deprecated += 1;
                        tracing::debug!("deprecated {bullet_id}: {rationale}");
                    }
                    Err(AceError::NotFound(id)) => {
                        report.rejected += 1;
                        tracing::warn!("deprecate targets unknown bullet {id}, skipping");
                    }
                    Err(err) => return Err(err),
                },
            }
        }

        tracing::info!(
            "curation pass: {} added, {} merged, {} edited, {} deprecated, {} rejected",
            report.added,
            report.merged,
            report.edited,
            report.deprecated,
            report.rejected
        );

        Ok(report)
    }
}
