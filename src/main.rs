use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use harvest::Application;
use harvest_config::{AppConfig, LogFormat};
use harvest_domain::WorkflowSpec;
use harvest_observability::{init_logging, init_metrics_exporter};
use serde::Serialize;
use serde_json::Value;
use tokio::signal;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "harvest", version, about = "数据采集作业与ETL流水线编排引擎")]
struct Cli {
    /// 配置文件路径，缺省时按默认路径查找
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// 日志级别，覆盖配置文件
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// 日志格式 (json|pretty)，覆盖配置文件
    #[arg(long, value_name = "FORMAT")]
    log_format: Option<LogFormat>,

    /// 打印合并后的配置并退出
    #[arg(long)]
    print_config: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// 启动后台健康监控与工作流调度，直到收到关闭信号
    Serve,
    /// 运行一次采集作业并等待其结束
    RunScraper {
        scraper_id: String,
        #[arg(long, default_value_t = 300)]
        timeout_seconds: u64,
    },
    /// 从 JSON 或 TOML 文件创建工作流并立即执行
    RunWorkflow {
        file: PathBuf,
        /// JSON 格式的执行参数
        #[arg(long)]
        params: Option<String>,
        /// 按计划调度而不是立即执行，随后进入服务模式
        #[arg(long)]
        schedule: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("加载配置失败")?;

    if cli.print_config {
        print!("{}", config.to_toml()?);
        return Ok(());
    }

    let log_level = cli
        .log_level
        .clone()
        .unwrap_or_else(|| config.observability.log_level.clone());
    let log_format = cli.log_format.unwrap_or(config.observability.log_format);
    init_logging(&log_level, log_format)?;
    if config.observability.metrics_enabled {
        init_metrics_exporter(&config.observability.metrics_listen)?;
    }

    info!(
        config = cli.config.as_deref().unwrap_or("<默认>"),
        "启动编排引擎"
    );

    let app = Application::new(config).await?;
    let result = run(&app, cli.command.unwrap_or(Commands::Serve)).await;
    app.shutdown().await;

    if let Err(e) = &result {
        error!(error = %e, "命令执行失败");
    }
    result
}

async fn run(app: &Application, command: Commands) -> Result<()> {
    match command {
        Commands::Serve => app.serve(shutdown_signal()).await,
        Commands::RunScraper {
            scraper_id,
            timeout_seconds,
        } => {
            let job = app
                .run_scraper_to_completion(&scraper_id, Duration::from_secs(timeout_seconds))
                .await?;
            print_json(&job)
        }
        Commands::RunWorkflow {
            file,
            params,
            schedule,
        } => {
            let spec = read_workflow_spec(&file)?;
            let params = match params {
                Some(raw) => serde_json::from_str(&raw).context("执行参数不是合法的JSON")?,
                None => Value::Object(Default::default()),
            };
            let workflow_id = app.create_workflow(&spec).await?;

            if schedule {
                app.schedule_workflow(workflow_id, None, params).await?;
                print_json(&app.get_workflow_status(workflow_id).await?)?;
                return app.serve(shutdown_signal()).await;
            }

            let execution = app.execute_workflow(workflow_id, params).await?;
            print_json(&execution)?;
            if !execution.success {
                bail!(
                    "工作流执行失败: {}",
                    execution.error.as_deref().unwrap_or("未知错误")
                );
            }
            Ok(())
        }
    }
}

fn read_workflow_spec(path: &Path) -> Result<WorkflowSpec> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("读取工作流文件失败: {}", path.display()))?;
    let spec = match path.extension().and_then(|ext| ext.to_str()) {
        Some("toml") => toml::from_str(&content).context("解析TOML工作流失败")?,
        _ => serde_json::from_str(&content).context("解析JSON工作流失败")?,
    };
    Ok(spec)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "无法监听Ctrl+C信号");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "无法监听SIGTERM信号");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("收到Ctrl+C信号"),
        _ = terminate => info!("收到SIGTERM信号"),
    }
}
