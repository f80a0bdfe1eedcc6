//! shelfsense 命令行入口
//!
//! 薄封装：解析参数、初始化日志，然后把命令交给 core 的
//! `AceCliHandler` 执行。

use anyhow::Result;
use clap::Parser;
use clap::Subcommand;
use shelfsense_core::ace::AceCliHandler;
use shelfsense_core::ace::AceCommand;
use shelfsense_core::ace::default_home;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "shelfsense", about = "Playbook-steered product analysis", version)]
struct Cli {
    /// 应用主目录（默认 ~/.shelfsense）
    #[arg(long, global = true)]
    home: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// 显示 playbook 状态和统计信息
    Status,

    /// 显示最近更新的 bullets
    Show {
        /// 显示条数
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },

    /// 关键词搜索 playbook
    Search {
        /// 查询串
        query: String,
    },

    /// 清空 playbook（默认先归档）
    Clear {
        /// 跳过归档直接删除
        #[arg(long)]
        no_archive: bool,
    },

    /// 显示配置信息
    Config,
}

impl From<Command> for AceCommand {
    fn from(command: Command) -> Self {
        match command {
            Command::Status => AceCommand::Status,
            Command::Show { limit } => AceCommand::Show { limit },
            Command::Search { query } => AceCommand::Search { query },
            Command::Clear { no_archive } => AceCommand::Clear { no_archive },
            Command::Config => AceCommand::Config,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let home = cli.home.unwrap_or_else(default_home);

    let handler = AceCliHandler::new(&home);
    handler.execute(cli.command.into()).await
}
