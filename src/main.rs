use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use stratforge::config::ConfigManager;
use stratforge::engines::evaluation::SyntheticOracle;
use stratforge::engines::generation::{ConsoleProgressCallback, PopulationManager};

#[derive(Parser, Debug)]
#[command(name = "stratforge")]
#[command(about = "Evolve trading-strategy parameter sets against a fitness oracle")]
struct Args {
    /// TOML or JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Continue from the newest checkpoint in checkpoint.directory
    #[arg(long)]
    resume: bool,

    /// Write the default configuration to this path and exit
    #[arg(long)]
    write_default_config: Option<PathBuf>,
}

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let manager = ConfigManager::new();

    if let Some(path) = &args.write_default_config {
        manager.save_to_file(path)?;
        log::info!("Default configuration written to {}", path.display());
        return Ok(());
    }
    if let Some(path) = &args.config {
        manager
            .load_from_file(path)
            .with_context(|| format!("loading configuration from {}", path.display()))?;
    }

    let config = manager.get();
    let registry = Arc::new(config.templates.registry()?);
    let oracle = Arc::new(SyntheticOracle::new(config.evolution.seed.unwrap_or(7), registry));

    let mut population = if args.resume {
        PopulationManager::resume(config, oracle)?
    } else {
        PopulationManager::new(config, oracle)?
    };

    let cancel = population.cancel_handle();
    std::thread::spawn(move || {
        // Typing "stop" requests a graceful stop with a final checkpoint
        let mut line = String::new();
        while std::io::stdin().read_line(&mut line).map(|n| n > 0).unwrap_or(false) {
            if line.trim() == "stop" {
                log::warn!("Stop requested, finishing the current generation");
                cancel.store(true, Ordering::SeqCst);
                return;
            }
            line.clear();
        }
    });

    let result = population.run(&mut ConsoleProgressCallback);
    println!("{}", serde_json::to_string_pretty(&population.report())?);
    result?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parses_config_and_resume() {
        let args = Args::try_parse_from(["stratforge", "-c", "run.toml", "--resume"]).unwrap();
        assert_eq!(args.config, Some(PathBuf::from("run.toml")));
        assert!(args.resume);
        assert!(args.write_default_config.is_none());
    }

    #[test]
    fn test_rejects_unknown_flag() {
        assert!(Args::try_parse_from(["stratforge", "--generations", "5"]).is_err());
    }
}
