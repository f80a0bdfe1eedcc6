//! 配置加载
//!
//! 配置放在应用主目录下的 `shelfsense.toml`。文件不存在时写出
//! 默认配置，保证首次运行就有一份可编辑的模板。

use crate::ace::types::AceConfig;
use anyhow::Context;
use anyhow::Result;
use std::path::Path;
use std::path::PathBuf;
use tokio::fs;

/// 配置文件名
pub const CONFIG_FILE_NAME: &str = "shelfsense.toml";

/// 默认应用主目录：`~/.shelfsense`
pub fn default_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".shelfsense")
}

/// 配置加载器
pub struct AceConfigLoader {
    home: PathBuf,
}

impl AceConfigLoader {
    pub fn new(home: impl AsRef<Path>) -> Self {
        Self {
            home: home.as_ref().to_path_buf(),
        }
    }

    /// 配置文件完整路径
    pub fn config_path(&self) -> PathBuf {
        self.home.join(CONFIG_FILE_NAME)
    }

    /// 加载配置；文件不存在时先创建默认配置
    pub async fn load_or_create(&self) -> Result<AceConfig> {
        let path = self.config_path();

        if !path.exists() {
            let config = AceConfig::default();
            self.write_default(&config)
                .await
                .with_context(|| format!("failed to create config at {}", path.display()))?;
            tracing::info!("created default config at {}", path.display());
            return Ok(config);
        }

        let content = fs::read_to_string(&path)
            .await
            .with_context(|| format!("failed to read config at {}", path.display()))?;

        let config: AceConfig =
            toml::from_str(&content).context("failed to parse config TOML")?;

        Ok(config)
    }

    async fn write_default(&self, config: &AceConfig) -> Result<()> {
        fs::create_dir_all(&self.home).await?;

        let body = toml::to_string_pretty(config).context("failed to serialize config")?;
        let content = format!(
            "# shelfsense configuration\n\
             # completion: pass-through options for the model provider\n\
             # playbook: dedup threshold, per-section capacity and storage path\n\
             # pipeline: reflection loop bound\n\n\
             {body}"
        );

        fs::write(self.config_path(), content).await?;
        Ok(())
    }
}

/// 便捷入口
pub async fn load_ace_config(home: &Path) -> Result<AceConfig> {
    AceConfigLoader::new(home).load_or_create().await
}
