// CLI commands for running code and managing Runbox workers
use anyhow::{Context, Result};
use runbox_common::types::{ExecutionRequest, Language};
use runbox_executor::{ExecutionService, LanguageConfigManager, ServiceSettings, Strategy};
use std::fs;
use std::path::Path;

fn targets(language: Option<Language>) -> Vec<Language> {
    match language {
        Some(lang) => vec![lang],
        None => Language::ALL.to_vec(),
    }
}

async fn connect(strategy: Strategy) -> Result<ExecutionService> {
    let mut settings = ServiceSettings::from_env()?;
    settings.strategy = strategy;
    ExecutionService::connect(settings)
        .await
        .context("Failed to connect to Docker (is the daemon running?)")
}

/// Pick stdin for a run: inline text wins, then a file, else nothing
pub fn resolve_input(input: Option<String>, input_file: Option<&Path>) -> Result<String> {
    if let Some(input) = input {
        return Ok(input);
    }
    match input_file {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("Failed to read input file {}", path.display())),
        None => Ok(String::new()),
    }
}

/// Run one file; returns whether the program succeeded
pub async fn run_file(language: Language, file: &Path, input: &str, ephemeral: bool, json: bool) -> Result<bool> {
    let code = fs::read_to_string(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let strategy = if ephemeral { Strategy::Ephemeral } else { Strategy::Persistent };

    if !json {
        println!("🚀 Running {} ({:?} strategy)...", file.display(), strategy);
    }
    let service = connect(strategy).await?;
    let request = ExecutionRequest::new(code, language.id(), input);
    let result = service.coordinator().run(&request).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", "─".repeat(60));
        print!("{}", result.output);
        if !result.output.ends_with('\n') {
            println!();
        }
        println!("{}", "─".repeat(60));
        if result.error {
            println!("❌ Failed ({})", result.execution_time);
        } else {
            println!("✅ Finished in {}", result.execution_time);
        }
        if !ephemeral {
            println!("\n💡 The {} worker keeps running; stop it with: runbox-cli stop --language {}", language, language);
        }
    }
    Ok(!result.error)
}

pub async fn build_images(language: Option<Language>) -> Result<()> {
    let service = connect(Strategy::Persistent).await?;
    let pool = service.pool().context("persistent strategy has a worker pool")?;

    for lang in targets(language) {
        println!("🔨 Building {} worker image...", lang.display_name());
        pool.build_image(lang)
            .await
            .with_context(|| format!("Failed to build {} worker image", lang))?;
        println!("✅ {} worker image built", lang.display_name());
    }
    Ok(())
}

pub async fn start_workers(language: Option<Language>) -> Result<()> {
    let service = connect(Strategy::Persistent).await?;
    let pool = service.pool().context("persistent strategy has a worker pool")?;

    let mut failed = 0;
    for lang in targets(language) {
        println!("🐳 Starting {} worker...", lang.display_name());
        let outcome = async {
            pool.build_image(lang).await?;
            pool.start_container(lang).await
        }
        .await;
        match outcome {
            Ok(handle) => {
                let port = handle.host_port.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string());
                println!("✅ {} worker running (container {}, port {})", lang, short_id(&handle.container_id), port);
            }
            Err(e) => {
                failed += 1;
                println!("❌ {} worker failed to start: {}", lang, e);
            }
        }
    }
    if failed > 0 {
        anyhow::bail!("{} worker(s) failed to start", failed);
    }
    Ok(())
}

pub async fn stop_workers(language: Option<Language>) -> Result<()> {
    let service = connect(Strategy::Persistent).await?;
    let pool = service.pool().context("persistent strategy has a worker pool")?;

    for lang in targets(language) {
        if pool.adopt(lang).await?.is_none() {
            println!("⚠️  No {} worker found", lang);
            continue;
        }
        pool.stop_container(lang)
            .await
            .with_context(|| format!("Failed to stop {} worker", lang))?;
        println!("🗑️  {} worker stopped and removed", lang);
    }
    Ok(())
}

pub async fn show_status() -> Result<()> {
    let service = connect(Strategy::Persistent).await?;
    let pool = service.pool().context("persistent strategy has a worker pool")?;

    println!("📋 Workers:\n");
    println!("{:<12} {:<10} {:<14} {:<8}", "LANGUAGE", "STATE", "CONTAINER", "PORT");
    println!("{}", "─".repeat(48));
    for lang in Language::ALL {
        match pool.inspect_worker(lang).await? {
            Some(status) => println!(
                "{:<12} {:<10} {:<14} {:<8}",
                lang.id(),
                if status.running { "running" } else { "stopped" },
                short_id(&status.id),
                status.host_port.map(|p| p.to_string()).unwrap_or_else(|| "-".to_string())
            ),
            None => println!("{:<12} {:<10} {:<14} {:<8}", lang.id(), "absent", "-", "-"),
        }
    }
    Ok(())
}

pub fn list_languages() -> Result<()> {
    let settings = ServiceSettings::from_env()?;
    let manager = LanguageConfigManager::load_or_builtin(&settings.config_path)?;

    println!("📋 Supported Languages:\n");
    println!("{:<12} {:<12} {:<12} {:<30} {:<10}", "ID", "NAME", "VERSION", "WORKER IMAGE", "LIMITS");
    println!("{}", "─".repeat(90));
    for lang in Language::ALL {
        let config = manager.get(lang);
        println!(
            "{:<12} {:<12} {:<12} {:<30} {:.1}/{} MB",
            lang.id(),
            config.display_name,
            config.version,
            config.worker_image,
            config.cpu_limit,
            config.memory_limit_mb
        );
    }
    println!("\n✅ Total: {} language(s)", Language::ALL.len());
    Ok(())
}

fn short_id(id: &str) -> &str {
    id.get(..12).unwrap_or(id)
}
