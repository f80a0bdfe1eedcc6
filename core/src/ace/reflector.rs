//! Reflector - 审视草稿，产出 playbook 变更提案
//!
//! 输出是 ADD/EDIT/DEPRECATE 提案列表。提案不直接落库，全部经
//! Curator 验证后才生效。空提案列表是收敛信号，不是错误。

use crate::ace::error::AceError;
use crate::ace::generator::extract_json_payload;
use crate::ace::generator::format_playbook_context;
use crate::ace::types::AnalysisDraft;
use crate::ace::types::AnalysisTask;
use crate::ace::types::Bullet;
use crate::ace::types::CompletionConfig;
use crate::ace::types::Proposal;
use crate::ace::types::QualitySignal;
use crate::ace::types::Section;
use crate::llm::CompletionClient;
use crate::llm::CompletionOptions;
use serde::Deserialize;
use std::sync::Arc;

/// 提案的 JSON 形状（模型输出）
#[derive(Debug, Deserialize)]
struct ProposalPayload {
    op: String,

    #[serde(default)]
    section: Option<String>,

    #[serde(default)]
    bullet_id: Option<String>,

    #[serde(default)]
    content: Option<String>,

    #[serde(default)]
    rationale: Option<String>,
}

impl ProposalPayload {
    /// 转成强类型提案；字段不完整或取值未知时返回 None
    fn into_proposal(self) -> Option<Proposal> {
        let rationale = self.rationale.unwrap_or_default();
        match self.op.to_lowercase().as_str() {
            "add" => {
                let section = Section::from_code(self.section.as_deref()?)?;
                Some(Proposal::Add {
                    section,
                    content: self.content?,
                    rationale,
                })
            }
            "edit" => Some(Proposal::Edit {
                bullet_id: self.bullet_id?,
                new_content: self.content?,
                rationale,
            }),
            "deprecate" => Some(Proposal::Deprecate {
                bullet_id: self.bullet_id?,
                rationale,
            }),
            _ => None,
        }
    }
}

/// 解析补全输出为提案列表
///
/// 整体不是合法 JSON 时报 Parse（管线层会有限重试）；
/// 单个元素不完整时跳过并记日志，不拖垮整个 pass。
fn parse_proposals(text: &str) -> Result<Vec<Proposal>, AceError> {
    let payload = extract_json_payload(text);

    let parsed: Vec<ProposalPayload> = serde_json::from_str(payload)
        .map_err(|err| AceError::Parse(format!("proposals are not valid JSON: {err}")))?;

    let mut proposals = Vec::new();
    for entry in parsed {
        let op = entry.op.clone();
        match entry.into_proposal() {
            Some(proposal) => proposals.push(proposal),
            None => tracing::warn!("skipping malformed proposal with op '{op}'"),
        }
    }

    Ok(proposals)
}

/// Reflector
pub struct Reflector {
    client: Arc<dyn CompletionClient>,
    options: CompletionOptions,
}

impl Reflector {
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

    /// 审视一版草稿，产出提案
    ///
    /// 每个 pass 重新看一遍当前 playbook 和最新草稿；没有可改进
    /// 之处时返回空列表。
    pub async fn reflect(
        &self,
        task: &AnalysisTask,
        draft: &AnalysisDraft,
        signal: Option<&QualitySignal>,
        context: &[Bullet],
    ) -> Result<Vec<Proposal>, AceError> {
        let prompt = self.build_prompt(task, draft, signal, context);

        tracing::debug!("reflecting on task {}", task.task_id);

        let completion = self.client.complete(&prompt, &self.options).await?;
        let proposals = parse_proposals(&completion.text)?;

        tracing::debug!("reflector produced {} proposals", proposals.len());
        Ok(proposals)
    }

    fn build_prompt(
        &self,
        task: &AnalysisTask,
        draft: &AnalysisDraft,
        signal: Option<&QualitySignal>,
        context: &[Bullet],
    ) -> String {
        let signal_block = match signal {
            Some(signal) => format!("# Quality signal ({})\n{}\n", signal.source, signal.notes),
            None => String::new(),
        };

        format!(
            "You maintain a playbook of product-analysis heuristics.\n\
             \n\
             # Current playbook\n\
             {playbook}\n\
             # Task\n\
             {name} ({category}): {brief}\n\
             \n\
             # Latest analysis draft\n\
             {draft}\n\
             {signal_block}\
             Propose playbook changes as a JSON array. Allowed operations:\n\
             {{\"op\": \"add\", \"section\": \"sr|ch|pp|st|gtm\", \"content\": \"...\", \"rationale\": \"...\"}}\n\
             {{\"op\": \"edit\", \"bullet_id\": \"...\", \"content\": \"...\", \"rationale\": \"...\"}}\n\
             {{\"op\": \"deprecate\", \"bullet_id\": \"...\", \"rationale\": \"...\"}}\n\
             Return [] when the playbook already covers this task well.\n",
            playbook = format_playbook_context(context),
            name = task.product_name,
            category = task.category,
            brief = task.brief,
            draft = draft.content,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::Completion;
    use crate::llm::ProviderError;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct CapturingClient {
        prompts: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CompletionClient for CapturingClient {
        async fn complete(
            &self,
            prompt: &str,
            _options: &CompletionOptions,
        ) -> Result<Completion, ProviderError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            Ok(Completion {
                text: "[]".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_reflect_feeds_signal_and_playbook_into_prompt() {
        let client = Arc::new(CapturingClient {
            prompts: Mutex::new(Vec::new()),
        });
        let reflector = Reflector::new(client.clone(), &CompletionConfig::default());

        let task = AnalysisTask::new("Oat Bar", "snacks", "Check claim hygiene");
        let draft = AnalysisDraft {
            content: "Claims look aggressive.".to_string(),
            cited_bullets: Vec::new(),
        };
        let signal = QualitySignal {
            source: "review panel".to_string(),
            notes: "Overstated health claims".to_string(),
        };
        let context = vec![Bullet::new(
            "pp-001".to_string(),
            Section::PitfallPatterns,
            "Beware unverifiable superlatives".to_string(),
            None,
        )];

        let proposals = reflector
            .reflect(&task, &draft, Some(&signal), &context)
            .await
            .unwrap();
        assert!(proposals.is_empty());

        let prompt = client.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("review panel"));
        assert!(prompt.contains("Overstated health claims"));
        assert!(prompt.contains("[pp-001]"));
        assert!(prompt.contains("Claims look aggressive."));
    }

    #[test]
    fn test_parse_proposals_maps_all_ops() {
        let text = r#"[
            {"op": "add", "section": "sr", "content": "Reward honest portions", "rationale": "seen twice"},
            {"op": "edit", "bullet_id": "ch-002", "content": "Updated heuristic", "rationale": "stale"},
            {"op": "deprecate", "bullet_id": "pp-001", "rationale": "harmful"}
        ]"#;

        let proposals = parse_proposals(text).unwrap();
        assert_eq!(proposals.len(), 3);
        assert!(matches!(
            &proposals[0],
            Proposal::Add {
                section: Section::ScoringRules,
                ..
            }
        ));
        assert!(matches!(&proposals[1], Proposal::Edit { bullet_id, .. } if bullet_id == "ch-002"));
        assert!(
            matches!(&proposals[2], Proposal::Deprecate { bullet_id, .. } if bullet_id == "pp-001")
        );
    }

    #[test]
    fn test_parse_proposals_empty_array_is_convergence() {
        let proposals = parse_proposals("[]").unwrap();
        assert!(proposals.is_empty());
    }

    #[test]
    fn test_parse_proposals_skips_malformed_entries() {
        let text = r#"[
            {"op": "add", "section": "nope", "content": "x"},
            {"op": "edit", "bullet_id": "sr-001"},
            {"op": "teleport"},
            {"op": "add", "section": "gtm", "content": "Bundle with samplers", "rationale": "works"}
        ]"#;

        let proposals = parse_proposals(text).unwrap();
        assert_eq!(proposals.len(), 1);
        assert!(matches!(
            &proposals[0],
            Proposal::Add {
                section: Section::GoToMarket,
                ..
            }
        ));
    }

    #[test]
    fn test_parse_proposals_rejects_non_json() {
        let err = parse_proposals("I have no proposals today").unwrap_err();
        assert!(matches!(err, AceError::Parse(_)));
    }

    #[test]
    fn test_parse_proposals_accepts_fenced_block() {
        let text = "Changes:\n```json\n[{\"op\": \"deprecate\", \"bullet_id\": \"st-003\", \"rationale\": \"obsolete\"}]\n```";
        let proposals = parse_proposals(text).unwrap();
        assert_eq!(proposals.len(), 1);
    }
}
