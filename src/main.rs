use anyhow::Result;
use gradi_flow::utils::logging;
use gradi_flow::{App, Config};

#[tokio::main]
async fn main() -> Result<()> {
    // 加载配置
    let config = Config::from_env();

    // 初始化日志
    logging::init(config.verbose_logging, &config.output_log_file)?;

    // 初始化并运行应用
    App::initialize(config).await?.run().await?;

    Ok(())
}
