//! Playbook 管理命令处理
//!
//! 提供用户检查和维护 playbook 的命令行接口。

use anyhow::Context;
use anyhow::Result;
use std::path::Path;
use std::path::PathBuf;

use super::config_loader::AceConfigLoader;
use super::playbook::PlaybookManager;
use super::similarity::SimilarityEngine;
use super::types::AceConfig;
use super::types::Section;

/// 管理命令
#[derive(Debug, Clone)]
pub enum AceCommand {
    /// 显示 playbook 状态和统计信息
    Status,

    /// 显示最近更新的 bullets
    Show { limit: usize },

    /// 关键词搜索 playbook
    Search { query: String },

    /// 清空 playbook
    Clear {
        /// 是否跳过归档直接删除
        no_archive: bool,
    },

    /// 显示配置信息
    Config,
}

/// CLI 命令处理器
pub struct AceCliHandler {
    home: PathBuf,
}

impl AceCliHandler {
    pub fn new(home: &Path) -> Self {
        Self {
            home: home.to_path_buf(),
        }
    }

    /// 执行命令
    pub async fn execute(&self, command: AceCommand) -> Result<()> {
        match command {
            AceCommand::Status => self.handle_status().await,
            AceCommand::Show { limit } => self.handle_show(limit).await,
            AceCommand::Search { query } => self.handle_search(&query).await,
            AceCommand::Clear { no_archive } => self.handle_clear(no_archive).await,
            AceCommand::Config => self.handle_config().await,
        }
    }

    async fn load_manager(&self) -> Result<(AceConfig, PlaybookManager)> {
        let config = AceConfigLoader::new(&self.home)
            .load_or_create()
            .await
            .context("failed to load configuration")?;

        // 管理命令不需要语义去重，词法引擎足够
        let manager = PlaybookManager::new(config.playbook.clone(), SimilarityEngine::lexical())
            .context("failed to open playbook storage")?;
        manager.load().await.context("failed to load playbook")?;

        Ok((config, manager))
    }

    async fn handle_status(&self) -> Result<()> {
        let (config, manager) = self.load_manager().await?;
        let stats = manager.stats().await;

        println!("📚 shelfsense playbook status\n");
        println!("Configuration:");
        println!("  Storage: {}", config.playbook.path);
        println!(
            "  Capacity per section: {}",
            config.playbook.max_bullets_per_section
        );
        println!(
            "  Dedup threshold: {:.2}",
            config.playbook.dedup_similarity_threshold
        );
        println!();

        println!("Playbook:");
        println!("  Version: {}", stats.version);
        println!("  Total bullets: {}", stats.total_bullets);
        println!("  Reinforcements: {}", stats.total_reinforcements);
        println!("  Citations: {}", stats.total_citations);
        println!();

        println!("Bullets by section:");
        for (section, count) in &stats.bullets_by_section {
            println!("  {}: {}", section.title(), count);
        }

        Ok(())
    }

    async fn handle_show(&self, limit: usize) -> Result<()> {
        let (_config, manager) = self.load_manager().await?;

        let mut bullets = manager.get_context(&Section::all()).await;
        bullets.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));

        println!("📚 Most recently updated bullets\n");
        for bullet in bullets.iter().take(limit) {
            println!("[{}] {}", bullet.id, bullet.content);
            println!(
                "    confidence {:.2}, reinforced {}x, cited {}x",
                bullet.metadata.confidence,
                bullet.metadata.reinforce_count,
                bullet.metadata.citation_count
            );
        }

        Ok(())
    }

    async fn handle_search(&self, query: &str) -> Result<()> {
        let (_config, manager) = self.load_manager().await?;
        let results = manager.search(query, 10).await;

        if results.is_empty() {
            println!("No bullets match '{query}'");
            return Ok(());
        }

        println!("🔍 {} result(s) for '{query}'\n", results.len());
        for bullet in results {
            println!("[{}] ({}) {}", bullet.id, bullet.section.title(), bullet.content);
        }

        Ok(())
    }

    async fn handle_clear(&self, no_archive: bool) -> Result<()> {
        let (_config, manager) = self.load_manager().await?;
        manager.clear(!no_archive).await?;

        if no_archive {
            println!("⚠️  Playbook cleared without archive");
        } else {
            println!("✅ Playbook archived and cleared");
        }

        Ok(())
    }

    async fn handle_config(&self) -> Result<()> {
        let loader = AceConfigLoader::new(&self.home);
        let config = loader.load_or_create().await?;

        println!("Config file: {}", loader.config_path().display());
        println!();
        println!("{}", toml::to_string_pretty(&config)?);

        Ok(())
    }
}
