//! ACE 框架的核心数据结构
//!
//! Bullet 是最小知识单元，Playbook 按 section 分区持有有序的
//! bullet 序列。顺序决定拼接进 prompt 的先后，因此是语义的一部分。

use chrono::DateTime;
use chrono::Utc;
use serde::Deserialize;
use serde::Serialize;
use std::collections::BTreeMap;
use uuid::Uuid;

/// Bullet 标识符，形如 `sr-014`
pub type BulletId = String;

// ============================================================================
// Section（固定分区）
// ============================================================================

/// Playbook 的固定分区
///
/// 每个 section 有一个短前缀，用于命名该分区内的 bullet。
/// 枚举声明顺序就是拼接上下文时的 section 顺序。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Section {
    /// 评分规则
    ScoringRules,

    /// 品类相关启发
    CategoryHeuristics,

    /// 踩坑模式
    PitfallPatterns,

    /// 结构化表达模式
    StructuralPatterns,

    /// 上市/渠道规则
    GoToMarket,
}

impl Section {
    /// 全部 section，按上下文拼接顺序
    pub fn all() -> [Section; 5] {
        [
            Section::ScoringRules,
            Section::CategoryHeuristics,
            Section::PitfallPatterns,
            Section::StructuralPatterns,
            Section::GoToMarket,
        ]
    }

    /// bullet id 前缀
    pub fn prefix(self) -> &'static str {
        match self {
            Section::ScoringRules => "sr",
            Section::CategoryHeuristics => "ch",
            Section::PitfallPatterns => "pp",
            Section::StructuralPatterns => "st",
            Section::GoToMarket => "gtm",
        }
    }

    /// prompt 中的小节标题
    pub fn title(self) -> &'static str {
        match self {
            Section::ScoringRules => "Scoring Rules",
            Section::CategoryHeuristics => "Category Heuristics",
            Section::PitfallPatterns => "Pitfall Patterns",
            Section::StructuralPatterns => "Structural Patterns",
            Section::GoToMarket => "Go-To-Market Rules",
        }
    }

    /// 从前缀码解析（Reflector 输出用短码指定 section）
    pub fn from_code(code: &str) -> Option<Section> {
        match code.trim().to_lowercase().as_str() {
            "sr" | "scoring_rules" => Some(Section::ScoringRules),
            "ch" | "category_heuristics" => Some(Section::CategoryHeuristics),
            "pp" | "pitfall_patterns" => Some(Section::PitfallPatterns),
            "st" | "structural_patterns" => Some(Section::StructuralPatterns),
            "gtm" | "go_to_market" => Some(Section::GoToMarket),
            _ => None,
        }
    }
}

// ============================================================================
// Bullet
// ============================================================================

/// 细粒度元数据
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BulletMetadata {
    /// 置信度（0.0 - 1.0）
    pub confidence: f32,

    /// 被强化次数（重复内容合并进来的次数）
    pub reinforce_count: u32,

    /// 被 Generator 引用次数
    pub citation_count: u32,

    /// 来源任务 id（首次创建时，可选）
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_task: Option<String>,
}

impl Default for BulletMetadata {
    fn default() -> Self {
        Self {
            confidence: 0.5,
            reinforce_count: 0,
            citation_count: 0,
            source_task: None,
        }
    }
}

/// 一条可引用的启发/规则
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Bullet {
    /// 唯一标识符，section 前缀 + 单调递增序号，分配后不变、不复用
    pub id: BulletId,

    /// 所属 section，生命周期内不变
    pub section: Section,

    /// 具体内容，非空
    pub content: String,

    /// 创建时间
    pub created_at: DateTime<Utc>,

    /// 最后更新时间
    pub updated_at: DateTime<Utc>,

    /// 元数据
    pub metadata: BulletMetadata,
}

impl Bullet {
    /// 创建新 bullet（id 由 Playbook 分配）
    pub fn new(
        id: BulletId,
        section: Section,
        content: String,
        source_task: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            section,
            content,
            created_at: now,
            updated_at: now,
            metadata: BulletMetadata {
                source_task,
                ..BulletMetadata::default()
            },
        }
    }

    /// 强化：重复内容合并时调用
    pub fn reinforce(&mut self) {
        self.metadata.reinforce_count += 1;
        self.metadata.confidence = (self.metadata.confidence + 0.1).min(1.0);
        self.updated_at = Utc::now();
    }

    /// 记录一次引用
    pub fn record_citation(&mut self) {
        self.metadata.citation_count += 1;
        self.updated_at = Utc::now();
    }
}

// ============================================================================
// Playbook
// ============================================================================

/// Playbook - 按 section 分区的有序 bullet 集合
///
/// 持久化时整体序列化为一个 JSON 文档，`next_seq` 随文档一起保存，
/// 保证 bullet id 在删除后也不会被复用。
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Playbook {
    /// 版本号（每次变更 +1，用于追踪）
    pub version: u64,

    /// 最后更新时间
    pub last_updated: DateTime<Utc>,

    /// 各 section 的 bullet 序列（插入顺序）
    pub sections: BTreeMap<Section, Vec<Bullet>>,

    /// 各 section 的下一个 id 序号
    pub next_seq: BTreeMap<Section, u64>,
}

impl Playbook {
    /// 创建空 playbook，每个 section 一个空序列
    pub fn new() -> Self {
        let mut sections = BTreeMap::new();
        let mut next_seq = BTreeMap::new();
        for section in Section::all() {
            sections.insert(section, Vec::new());
            next_seq.insert(section, 1);
        }
        Self {
            version: 1,
            last_updated: Utc::now(),
            sections,
            next_seq,
        }
    }

    /// 分配该 section 的下一个 bullet id
    ///
    /// 序号单调递增，删除不回收。
    pub fn allocate_id(&mut self, section: Section) -> BulletId {
        let seq = self.next_seq.entry(section).or_insert(1);
        let id = format!("{}-{:03}", section.prefix(), seq);
        *seq += 1;
        id
    }

    /// 该 section 当前的 bullet 序列
    pub fn section_bullets(&self, section: Section) -> &[Bullet] {
        self.sections.get(&section).map(Vec::as_slice).unwrap_or(&[])
    }

    /// 追加 bullet 到所属 section 尾部
    pub fn push_bullet(&mut self, bullet: Bullet) {
        self.sections.entry(bullet.section).or_default().push(bullet);
        self.touch();
    }

    /// 按 id 查找
    pub fn find_bullet(&self, id: &str) -> Option<&Bullet> {
        self.sections.values().flatten().find(|b| b.id == id)
    }

    /// 按 id 查找（可变引用）
    pub fn find_bullet_mut(&mut self, id: &str) -> Option<&mut Bullet> {
        self.sections.values_mut().flatten().find(|b| b.id == id)
    }

    /// 按 id 删除，返回被删除的 bullet
    pub fn remove_bullet(&mut self, id: &str) -> Option<Bullet> {
        for bullets in self.sections.values_mut() {
            if let Some(pos) = bullets.iter().position(|b| b.id == id) {
                let removed = bullets.remove(pos);
                self.touch();
                return Some(removed);
            }
        }
        None
    }

    /// 总 bullet 数
    pub fn total_bullets(&self) -> usize {
        self.sections.values().map(Vec::len).sum()
    }

    /// 变更记账
    pub fn touch(&mut self) {
        self.version += 1;
        self.last_updated = Utc::now();
    }
}

impl Default for Playbook {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Reflector 提案（Curator 的唯一输入）
// ============================================================================

/// Playbook 变更提案
///
/// 提案本身不具备修改 Playbook 的权限，只有 Curator 能把它
/// 落到 PlaybookManager 上。rationale 仅用于审计日志。
#[derive(Debug, Clone, PartialEq)]
pub enum Proposal {
    /// 新增启发
    Add {
        section: Section,
        content: String,
        rationale: String,
    },

    /// 修正既有 bullet 的内容
    Edit {
        bullet_id: BulletId,
        new_content: String,
        rationale: String,
    },

    /// 废弃有害或过时的 bullet
    Deprecate {
        bullet_id: BulletId,
        rationale: String,
    },
}

impl Proposal {
    /// 审计用 rationale
    pub fn rationale(&self) -> &str {
        match self {
            Proposal::Add { rationale, .. } => rationale,
            Proposal::Edit { rationale, .. } => rationale,
            Proposal::Deprecate { rationale, .. } => rationale,
        }
    }
}

/// Curator 单个 pass 的 diff 报告
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurationReport {
    pub added: u32,
    pub merged: u32,
    pub edited: u32,
    pub deprecated: u32,
    pub rejected: u32,
}

impl CurationReport {
    /// 是否产生了实质变更
    ///
    /// 合并只强化元数据、不改变 prompt 上下文内容，因此不算实质变更，
    /// 一个只有 merge 的 pass 会让管线收敛。
    pub fn has_material_change(&self) -> bool {
        self.added + self.edited + self.deprecated > 0
    }

    /// 累加另一个 pass 的报告
    pub fn absorb(&mut self, other: &CurationReport) {
        self.added += other.added;
        self.merged += other.merged;
        self.edited += other.edited;
        self.deprecated += other.deprecated;
        self.rejected += other.rejected;
    }
}

// ============================================================================
// 任务输入/输出
// ============================================================================

/// 一次产品分析任务的结构化输入
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnalysisTask {
    /// 任务 id（bullet 溯源用）
    pub task_id: String,

    /// 产品名
    pub product_name: String,

    /// 品类
    pub category: String,

    /// 分析要求
    pub brief: String,

    /// 其他结构化属性（配料、claims、包装描述等）
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl AnalysisTask {
    /// 创建任务，自动分配 task id
    pub fn new(
        product_name: impl Into<String>,
        category: impl Into<String>,
        brief: impl Into<String>,
    ) -> Self {
        Self {
            task_id: Uuid::new_v4().to_string(),
            product_name: product_name.into(),
            category: category.into(),
            brief: brief.into(),
            attributes: BTreeMap::new(),
        }
    }
}

/// Generator 的结构化输出
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisDraft {
    /// 分析正文（markdown）
    pub content: String,

    /// 本次生成实际引用的 bullet id 集合
    pub cited_bullets: Vec<BulletId>,
}

/// 外部质量信号（ground truth、用户反馈、评分 rubric 等）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QualitySignal {
    /// 信号来源描述
    pub source: String,

    /// 信号内容
    pub notes: String,
}

/// 任务终态
#[derive(Debug, Clone, PartialEq)]
pub enum TaskStatus {
    /// 正常结束
    Completed,

    /// 失败（携带原因；result 里可能仍有最后一次成功的草稿）
    Failed(String),
}

/// 一次管线运行的最终产出
#[derive(Debug, Clone)]
pub struct TaskOutcome {
    pub task_id: String,

    /// 最近一次成功的 Generator 输出，失败且从未生成成功时为 None
    pub result: Option<AnalysisDraft>,

    pub status: TaskStatus,

    /// 实际执行的 pass 数
    pub passes: u32,

    /// 全部 pass 的累计 diff
    pub cumulative: CurationReport,
}

// ============================================================================
// 配置
// ============================================================================

/// 补全能力配置（透传给 provider）
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CompletionConfig {
    pub provider: String,
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vision_model: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    pub stream: bool,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            vision_model: None,
            temperature: 0.2,
            max_tokens: 2048,
            stream: false,
        }
    }
}

/// Playbook 配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PlaybookConfig {
    /// 存储目录
    pub path: String,

    /// 每个 section 的 bullet 上限
    pub max_bullets_per_section: usize,

    /// 去重相似度阈值
    pub dedup_similarity_threshold: f32,

    /// 是否启用语义去重
    pub enable_semantic_dedup: bool,

    /// 语义能力不可用时是否回退到词法算法
    pub enable_lexical_fallback: bool,
}

impl Default for PlaybookConfig {
    fn default() -> Self {
        Self {
            path: "~/.shelfsense/playbook".to_string(),
            max_bullets_per_section: 50,
            dedup_similarity_threshold: 0.85,
            enable_semantic_dedup: false,
            enable_lexical_fallback: true,
        }
    }
}

/// 管线配置
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Reflector/Curator 循环的硬上限
    pub max_reflector_iterations: u32,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_reflector_iterations: 3,
        }
    }
}

/// 顶层配置
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct AceConfig {
    pub completion: CompletionConfig,
    pub playbook: PlaybookConfig,
    pub pipeline: PipelineConfig,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_section_prefixes_are_distinct() {
        let prefixes: std::collections::HashSet<_> =
            Section::all().iter().map(|s| s.prefix()).collect();
        assert_eq!(prefixes.len(), Section::all().len());
    }

    #[test]
    fn test_section_from_code_round_trip() {
        for section in Section::all() {
            assert_eq!(Section::from_code(section.prefix()), Some(section));
        }
        assert_eq!(Section::from_code("nope"), None);
    }

    #[test]
    fn test_allocate_id_is_monotonic_and_prefixed() {
        let mut playbook = Playbook::new();
        let a = playbook.allocate_id(Section::ScoringRules);
        let b = playbook.allocate_id(Section::ScoringRules);
        let c = playbook.allocate_id(Section::GoToMarket);
        assert_eq!(a, "sr-001");
        assert_eq!(b, "sr-002");
        assert_eq!(c, "gtm-001");
    }

    #[test]
    fn test_allocate_id_never_reused_after_removal() {
        let mut playbook = Playbook::new();
        let id = playbook.allocate_id(Section::PitfallPatterns);
        playbook.push_bullet(Bullet::new(
            id.clone(),
            Section::PitfallPatterns,
            "Watch for hidden sugar claims".to_string(),
            None,
        ));
        assert!(playbook.remove_bullet(&id).is_some());
        let next = playbook.allocate_id(Section::PitfallPatterns);
        assert_ne!(next, id);
        assert_eq!(next, "pp-002");
    }

    #[test]
    fn test_playbook_new_has_one_list_per_section() {
        let playbook = Playbook::new();
        assert_eq!(playbook.sections.len(), Section::all().len());
        assert_eq!(playbook.total_bullets(), 0);
    }

    #[test]
    fn test_playbook_json_round_trip() {
        let mut playbook = Playbook::new();
        for section in Section::all() {
            let id = playbook.allocate_id(section);
            playbook.push_bullet(Bullet::new(
                id,
                section,
                format!("Heuristic for {}", section.title()),
                Some("task-1".to_string()),
            ));
        }
        let json = serde_json::to_string(&playbook).expect("serialize");
        let loaded: Playbook = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(loaded, playbook);
    }

    #[test]
    fn test_reinforce_bumps_counters_and_confidence() {
        let mut bullet = Bullet::new(
            "sr-001".to_string(),
            Section::ScoringRules,
            "Prefer transparent ingredient lists".to_string(),
            None,
        );
        bullet.reinforce();
        bullet.reinforce();
        assert_eq!(bullet.metadata.reinforce_count, 2);
        assert!(bullet.metadata.confidence > 0.5);
        assert!(bullet.metadata.confidence <= 1.0);
    }

    #[test]
    fn test_curation_report_material_change() {
        let mut report = CurationReport::default();
        assert!(!report.has_material_change());
        report.merged = 5;
        report.rejected = 2;
        assert!(!report.has_material_change());
        report.edited = 1;
        assert!(report.has_material_change());
    }
}
