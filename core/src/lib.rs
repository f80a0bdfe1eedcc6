//! shelfsense-core
//!
//! 产品营销/包装分析的 ACE（Agentic Context Engineering）核心：
//! 一份按 section 分区、带去重与容量不变量的启发式 playbook，
//! 以及围绕它的 Generator / Reflector / Curator 闭环管线。
//!
//! 模型补全能力和语义相似度能力是外部协作方，以 [`llm`] 模块中的
//! trait 形式注入；本 crate 不包含任何具体厂商的 HTTP 客户端。

pub mod ace;
pub mod llm;

pub use ace::AceEngine;
