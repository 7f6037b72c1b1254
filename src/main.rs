//! Porter - Rust 单智能体任务执行引擎
//!
//! 入口：初始化日志与配置，从命令行取任务描述，运行到终态并打印结果与轨迹摘要。

use anyhow::Context;
use porter::agent::{create_inference_from_config, Agent};
use porter::config::load_config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    porter::observability::init();

    let description: String = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    if description.trim().is_empty() {
        eprintln!("Usage: porter <task description>");
        std::process::exit(2);
    }

    let cfg = load_config(None).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        porter::config::AppConfig::default()
    });

    let infer = create_inference_from_config(&cfg);
    let agent = Agent::new(&cfg, infer).context("Failed to build agent")?;

    let result = agent
        .submit(&description)
        .await
        .context("Task run failed")?;

    println!("task    : {}", result.task_id);
    println!("status  : {:?}", result.status);
    if !result.succeeded_steps.is_empty() {
        println!("success : {}", result.succeeded_steps.join(", "));
    }
    if !result.failed_steps.is_empty() {
        println!("failed  : {}", result.failed_steps.join(", "));
    }
    if !result.skipped_steps.is_empty() {
        println!("skipped : {}", result.skipped_steps.join(", "));
    }
    if let Some(summary) = &result.error_summary {
        println!("error   : {}", summary);
    }

    println!("--- decision trace ---");
    for entry in agent.trace_for(&result.task_id).context("Trace read failed")? {
        println!("#{:<3} {}", entry.sequence_no, entry.kind.as_str());
    }

    Ok(())
}
