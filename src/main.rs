//! # 证书生命周期引擎主程序入口
//!
//! 从标准输入逐行读取 JSON 工具调用，把响应逐行写到标准输出。
//! 日志写到标准错误，不会混入响应流。

use pki_engine::app::{AppConfig, LifecycleOrchestrator};
use pki_engine::tools::handle_line;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_writer(std::io::stderr)
        .init();

    tracing::info!("证书生命周期引擎启动");

    // 加载配置
    let config = AppConfig::load()?;
    let orchestrator = LifecycleOrchestrator::initialize(config).await?;
    tracing::info!("CA指纹: {}", orchestrator.ca_certificate().fingerprint);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }

        let response = handle_line(&orchestrator, &line).await;
        let mut output = serde_json::to_vec(&response)?;
        output.push(b'\n');
        stdout.write_all(&output).await?;
        stdout.flush().await?;
    }

    tracing::info!("输入结束，引擎关闭");
    Ok(())
}
