//! `taskwright config` and `taskwright check-config`.

use anyhow::Context;
use std::path::Path;
use taskwright_config::EngineConfig;

pub fn show(path_only: bool) -> anyhow::Result<()> {
    if path_only {
        println!("{}", EngineConfig::config_dir().join("config.toml").display());
    } else {
        print!("{}", EngineConfig::default_toml());
    }
    Ok(())
}

pub fn check(path: &Path, json: bool) -> anyhow::Result<()> {
    if !path.exists() {
        anyhow::bail!("no config file at {}", path.display());
    }
    let config = EngineConfig::load_from(path).with_context(|| format!("invalid config {}", path.display()))?;

    if json {
        let summary = serde_json::json!({
            "valid": true,
            "path": path,
            "max_steps": config.agent.max_steps,
            "project_concurrency": config.orchestrator.project_concurrency,
            "store": config.store.backend,
            "agents": config.agents.iter().map(|a| &a.agent_type).collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!("Config OK: {}", path.display());
    println!("   Max steps:     {}", config.agent.max_steps);
    println!("   Attempts:      {}", config.agent.max_attempts);
    println!("   Escalation:    {}s timeout", config.escalation.timeout_secs);
    println!("   Concurrency:   {}", config.orchestrator.project_concurrency);
    println!("   Store:         {}", config.store.backend);
    println!("   Agents:        {}", config.agents.len());
    for agent in &config.agents {
        let tools = if agent.allowed_tools.is_empty() {
            "all tools".to_string()
        } else {
            agent.allowed_tools.join(", ")
        };
        println!("     - {} ({tools})", agent.agent_type);
    }
    Ok(())
}
