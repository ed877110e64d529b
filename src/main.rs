//! Nexus - 命令行入口
//!
//! 初始化日志、加载配置、创建补全服务与宇宙库，然后进入逐行命令循环。

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use nexus::cli::Session;
use nexus::config::load_config;
use nexus::library::JsonDirLibrary;
use nexus::llm::create_llm_from_config;
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    nexus::observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;

    let data_dir = cfg.app.data_dir();
    let library = JsonDirLibrary::new(&data_dir)
        .with_context(|| format!("Failed to open universe library at {}", data_dir.display()))?;
    let llm = create_llm_from_config(&cfg);

    let mut session = Session::new(llm, Arc::new(library), &cfg);
    session.spawn_progress_view();
    println!("{}", nexus::cli::HELP);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("{} ", session.prompt());
        let _ = std::io::stdout().flush();

        let Some(line) = lines.next_line().await.context("Failed to read stdin")? else {
            break;
        };
        if !session.handle_line(&line).await {
            break;
        }
    }
    Ok(())
}
