//! PlaybookManager - Playbook 的唯一修改入口
//!
//! 所有写操作都经过这里，不变量在这里兜底：
//! 1. bullet id 全局唯一（section 前缀 + 单调序号，不复用）
//! 2. 每个 section 任何时刻不超过 `max_bullets_per_section`
//! 3. 同一 section 内相似度达到阈值的内容合并而不是新增
//!
//! 并发模型：同一 section 的写事务用 per-section 锁串行化，
//! 不同 section 可以并行走完整个相似度判定；读取永远拿到
//! 一致的快照，不会观察到写到一半的状态。

use crate::ace::error::AceError;
use crate::ace::similarity::SimilarityEngine;
use crate::ace::storage::PlaybookStorage;
use crate::ace::types::Bullet;
use crate::ace::types::BulletId;
use crate::ace::types::Playbook;
use crate::ace::types::PlaybookConfig;
use crate::ace::types::Section;
use chrono::DateTime;
use chrono::Utc;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tokio::sync::Mutex;
use tokio::sync::RwLock;

/// `add_or_merge` 的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AddOutcome {
    /// 新 bullet 入库
    Added(BulletId),

    /// 命中近重复，既有 bullet 被强化
    Merged(BulletId),
}

impl AddOutcome {
    /// 无论新增还是合并，拿到目标 bullet id
    pub fn bullet_id(&self) -> &str {
        match self {
            AddOutcome::Added(id) => id,
            AddOutcome::Merged(id) => id,
        }
    }
}

/// 淘汰策略
///
/// section 满员且必须接纳新 bullet 时，由策略挑出牺牲者。
/// 默认实现按 最低置信度 → 最早创建 → 最少引用 排序，这个顺序
/// 是从配置面推断的默认值，允许按真实使用数据替换。
pub trait EvictionPolicy: Send + Sync {
    /// 返回应被淘汰的 bullet 下标；空序列返回 None
    fn select_victim(&self, bullets: &[Bullet]) -> Option<usize>;
}

/// 默认淘汰策略：置信度最低者先走，其次最旧，再次引用最少
pub struct ConfidenceAgeUsage;

impl EvictionPolicy for ConfidenceAgeUsage {
    fn select_victim(&self, bullets: &[Bullet]) -> Option<usize> {
        bullets
            .iter()
            .enumerate()
            .min_by(|(_, a), (_, b)| {
                a.metadata
                    .confidence
                    .partial_cmp(&b.metadata.confidence)
                    .unwrap_or(Ordering::Equal)
                    .then_with(|| a.created_at.cmp(&b.created_at))
                    .then_with(|| a.metadata.citation_count.cmp(&b.metadata.citation_count))
            })
            .map(|(index, _)| index)
    }
}

/// Playbook 统计信息
#[derive(Debug, Clone)]
pub struct PlaybookStats {
    pub total_bullets: usize,
    pub version: u64,
    pub last_updated: DateTime<Utc>,
    pub bullets_by_section: BTreeMap<Section, usize>,
    pub total_reinforcements: u64,
    pub total_citations: u64,
}

/// 英文停用词表（搜索时过滤的高频无意义词）
const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "is", "are", "was", "were", "be", "been", "being", "to", "of", "in", "for",
    "on", "with", "at", "by", "from", "as", "it", "its", "this", "that", "these", "those", "and",
    "or", "but", "not", "no", "so", "if", "then", "can", "could", "will", "would", "should", "do",
    "does", "did", "has", "have", "had", "your", "my", "our", "their",
];

/// 提取查询关键词：按非字母数字切分，过滤停用词和过短的词
fn extract_keywords(query: &str) -> Vec<String> {
    let mut keywords: Vec<String> = query
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|word| word.len() >= 2 && !STOP_WORDS.contains(word))
        .map(str::to_string)
        .collect();

    keywords.sort();
    keywords.dedup();
    keywords
}

/// Playbook 管理器
pub struct PlaybookManager {
    config: PlaybookConfig,
    storage: PlaybookStorage,
    similarity: SimilarityEngine,
    eviction: Box<dyn EvictionPolicy>,
    playbook: RwLock<Playbook>,
    section_locks: BTreeMap<Section, Mutex<()>>,
}

impl PlaybookManager {
    /// 创建管理器（内存中是空 playbook，调用 `load` 挂载持久化状态）
    pub fn new(config: PlaybookConfig, similarity: SimilarityEngine) -> Result<Self, AceError> {
        let expanded = shellexpand::tilde(&config.path).to_string();
        let storage = PlaybookStorage::new(PathBuf::from(expanded))?;

        let section_locks = Section::all()
            .into_iter()
            .map(|section| (section, Mutex::new(())))
            .collect();

        Ok(Self {
            config,
            storage,
            similarity,
            eviction: Box::new(ConfidenceAgeUsage),
            playbook: RwLock::new(Playbook::new()),
            section_locks,
        })
    }

    /// 替换淘汰策略
    pub fn with_eviction_policy(mut self, policy: Box<dyn EvictionPolicy>) -> Self {
        self.eviction = policy;
        self
    }

    /// 从持久化存储加载 playbook
    pub async fn load(&self) -> Result<(), AceError> {
        let loaded = self.storage.load_playbook().await?;
        *self.playbook.write().await = loaded;
        Ok(())
    }

    /// 原子落盘当前 playbook
    pub async fn save(&self) -> Result<(), AceError> {
        let snapshot = self.playbook.read().await.clone();
        self.storage.save_playbook(&snapshot).await
    }

    /// 新增或合并一条启发
    ///
    /// 对 section 内每条既有 bullet 计算相似度；最高分达到阈值就
    /// 强化命中的 bullet 并返回它的 id，否则新增。新增导致超员时
    /// 先按策略淘汰一条再插入。整个操作对同 section 的并发调用者
    /// 是一个事务。
    pub async fn add_or_merge(
        &self,
        section: Section,
        content: &str,
        source_task: Option<&str>,
    ) -> Result<AddOutcome, AceError> {
        let content = content.trim();
        if content.is_empty() {
            return Err(AceError::Validation(
                "bullet content must not be empty".to_string(),
            ));
        }

        // 同 section 写事务串行化；相似度计算（可能走网络）发生在
        // section 锁内、全局写锁外，不阻塞其他 section 和读者。
        let section_lock = self
            .section_locks
            .get(&section)
            .ok_or_else(|| AceError::Validation(format!("unknown section {section:?}")))?;
        let _guard = section_lock.lock().await;

        let existing: Vec<(BulletId, String)> = {
            let playbook = self.playbook.read().await;
            playbook
                .section_bullets(section)
                .iter()
                .map(|b| (b.id.clone(), b.content.clone()))
                .collect()
        };

        let mut best: Option<(BulletId, f32)> = None;
        for (id, other) in &existing {
            let score = self.similarity.score(content, other).await?;
            if best.as_ref().is_none_or(|(_, s)| score > *s) {
                best = Some((id.clone(), score));
            }
        }

        if let Some((id, score)) = best {
            if score >= self.config.dedup_similarity_threshold {
                let mut playbook = self.playbook.write().await;
                let bullet = playbook
                    .find_bullet_mut(&id)
                    .ok_or_else(|| AceError::NotFound(id.clone()))?;
                bullet.reinforce();
                playbook.touch();
                tracing::debug!("merged near-duplicate into {id} (similarity {score:.2})");
                return Ok(AddOutcome::Merged(id));
            }
        }

        let mut playbook = self.playbook.write().await;

        if playbook.section_bullets(section).len() >= self.config.max_bullets_per_section {
            let victim = self
                .eviction
                .select_victim(playbook.section_bullets(section))
                .map(|index| playbook.section_bullets(section)[index].id.clone());

            if let Some(victim_id) = victim {
                tracing::info!(
                    "section {:?} is at capacity, evicting {victim_id}",
                    section
                );
                playbook.remove_bullet(&victim_id);
            }
        }

        // 淘汰后仍然放不下说明不变量已被破坏
        if playbook.section_bullets(section).len() >= self.config.max_bullets_per_section {
            return Err(AceError::Capacity(format!("{section:?}")));
        }

        let id = playbook.allocate_id(section);
        let bullet = Bullet::new(
            id.clone(),
            section,
            content.to_string(),
            source_task.map(str::to_string),
        );
        playbook.push_bullet(bullet);

        tracing::debug!("added bullet {id} to {:?}", section);
        Ok(AddOutcome::Added(id))
    }

    /// 取请求 section 的一致性快照，按 section 顺序 + 插入顺序拼接
    pub async fn get_context(&self, sections: &[Section]) -> Vec<Bullet> {
        let playbook = self.playbook.read().await;
        sections
            .iter()
            .flat_map(|section| playbook.section_bullets(*section).iter().cloned())
            .collect()
    }

    /// 修正既有 bullet 的内容
    pub async fn edit(&self, bullet_id: &str, new_content: &str) -> Result<(), AceError> {
        let new_content = new_content.trim();
        if new_content.is_empty() {
            return Err(AceError::Validation(
                "bullet content must not be empty".to_string(),
            ));
        }

        let mut playbook = self.playbook.write().await;
        let bullet = playbook
            .find_bullet_mut(bullet_id)
            .ok_or_else(|| AceError::NotFound(bullet_id.to_string()))?;

        bullet.content = new_content.to_string();
        bullet.updated_at = Utc::now();
        playbook.touch();

        tracing::debug!("edited bullet {bullet_id}");
        Ok(())
    }

    /// 删除 bullet（id 不回收）
    pub async fn remove(&self, bullet_id: &str) -> Result<(), AceError> {
        let mut playbook = self.playbook.write().await;
        playbook
            .remove_bullet(bullet_id)
            .ok_or_else(|| AceError::NotFound(bullet_id.to_string()))?;

        tracing::debug!("removed bullet {bullet_id}");
        Ok(())
    }

    /// 记录一次 Generator 引用
    ///
    /// 未知 id 不报错：Generator 偶尔会引用幻觉出来的 id，
    /// 这里过滤掉即可。
    pub async fn mark_cited(&self, bullet_ids: &[BulletId]) {
        if bullet_ids.is_empty() {
            return;
        }

        let mut playbook = self.playbook.write().await;
        for id in bullet_ids {
            match playbook.find_bullet_mut(id) {
                Some(bullet) => bullet.record_citation(),
                None => tracing::debug!("citation for unknown bullet {id}, ignoring"),
            }
        }
        playbook.touch();
    }

    /// 统计信息
    pub async fn stats(&self) -> PlaybookStats {
        let playbook = self.playbook.read().await;

        let mut bullets_by_section = BTreeMap::new();
        let mut total_reinforcements = 0u64;
        let mut total_citations = 0u64;

        for (section, bullets) in &playbook.sections {
            bullets_by_section.insert(*section, bullets.len());
            for bullet in bullets {
                total_reinforcements += u64::from(bullet.metadata.reinforce_count);
                total_citations += u64::from(bullet.metadata.citation_count);
            }
        }

        PlaybookStats {
            total_bullets: playbook.total_bullets(),
            version: playbook.version,
            last_updated: playbook.last_updated,
            bullets_by_section,
            total_reinforcements,
            total_citations,
        }
    }

    /// 关键词搜索（管理用，不是检索引擎）
    ///
    /// 简单的三层打分：整句包含 > 关键词命中 > 元数据加成。
    pub async fn search(&self, query: &str, limit: usize) -> Vec<Bullet> {
        let playbook = self.playbook.read().await;
        let query_lower = query.to_lowercase();
        let keywords = extract_keywords(&query_lower);

        let mut results: Vec<(Bullet, f32)> = Vec::new();

        for bullets in playbook.sections.values() {
            for bullet in bullets {
                let content_lower = bullet.content.to_lowercase();
                let mut score: f32 = 0.0;
                let mut match_count = 0u32;

                if content_lower.contains(&query_lower) {
                    score += 15.0;
                    match_count += 3;
                }

                for keyword in &keywords {
                    if content_lower.contains(keyword) {
                        score += match keyword.len() {
                            2..=3 => 2.0,
                            4..=6 => 4.0,
                            _ => 5.0,
                        };
                        match_count += 1;
                    }
                }

                // 元数据加成只给质量足够的匹配
                if match_count >= 2 {
                    score += bullet.metadata.confidence * 3.0;
                    score += (bullet.metadata.citation_count.min(5)) as f32 * 0.5;
                }

                if score > 2.0 {
                    results.push((bullet.clone(), score));
                }
            }
        }

        results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(Ordering::Equal));

        results
            .into_iter()
            .take(limit)
            .map(|(bullet, _)| bullet)
            .collect()
    }

    /// 清空 playbook（默认先归档快照）
    pub async fn clear(&self, archive: bool) -> Result<(), AceError> {
        let snapshot = self.playbook.read().await.clone();
        if archive {
            self.storage.archive(&snapshot).await?;
        } else {
            tracing::warn!("clearing playbook without archive");
        }

        let empty = Playbook::new();
        {
            let mut playbook = self.playbook.write().await;
            *playbook = empty.clone();
        }
        self.storage.save_playbook(&empty).await?;

        tracing::info!("Playbook cleared");
        Ok(())
    }

    pub fn config(&self) -> &PlaybookConfig {
        &self.config
    }
}
