//! `ironloop config`: Configuration management commands.

use ironloop_config::AppConfig;
use std::path::Path;

use super::load_config;

pub fn validate(path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    let config = match load_config(path) {
        Ok(config) => config,
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    };
    println!("   ✅ Config parsed and validated");

    let mut warnings = Vec::new();
    if !config.recovery.enabled {
        warnings.push("Recovery is disabled; model failures will block tasks".to_string());
    }
    if config.agent.max_iterations < 3 && config.agent.force_final_answer {
        warnings.push(format!(
            "max_iterations = {} leaves no room before the forced final answer",
            config.agent.max_iterations
        ));
    }
    let disabled: Vec<&str> = config
        .recovery
        .order
        .iter()
        .filter(|kind| !config.recovery.settings_for(**kind).enabled)
        .map(|kind| kind.as_str())
        .collect();
    if !disabled.is_empty() {
        warnings.push(format!("Disabled strategies: {}", disabled.join(", ")));
    }

    if warnings.is_empty() {
        println!("   ✅ All checks passed");
    } else {
        println!();
        for w in &warnings {
            println!("   ⚠️  {w}");
        }
    }

    println!();
    println!("   Model:       {}", config.model);
    println!("   Iterations:  {}", config.agent.max_iterations);
    println!("   Recovery:    {}", if config.recovery.enabled { "on" } else { "off" });
    println!("   Strategies:  {}", config.recovery.order.len());

    Ok(())
}

pub fn show(path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config(path).map_err(|e| format!("Failed to load config: {e}"))?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

pub fn path(path: Option<&Path>) -> Result<(), Box<dyn std::error::Error>> {
    let config_path = match path {
        Some(path) => path.to_path_buf(),
        None => AppConfig::config_dir().join("config.toml"),
    };
    println!("{}", config_path.display());
    Ok(())
}

pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    let dir = AppConfig::config_dir();
    let config_path = dir.join("config.toml");
    if config_path.exists() {
        println!("   ⚠️  {} already exists, leaving it untouched", config_path.display());
        return Ok(());
    }

    write_default(&config_path)?;
    println!("   ✅ Wrote {}", config_path.display());
    Ok(())
}

fn write_default(config_path: &Path) -> std::io::Result<()> {
    if let Some(dir) = config_path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    std::fs::write(config_path, AppConfig::default_toml())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_path_is_valid() {
        let path = AppConfig::config_dir().join("config.toml");
        assert!(path.to_str().unwrap().contains("config.toml"));
    }

    #[test]
    fn written_default_loads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        write_default(&path).unwrap();

        let config = load_config(Some(&path)).unwrap();
        assert_eq!(config.model, "gpt-4o");
        assert_eq!(config.recovery.order.len(), 6);
    }

    #[test]
    fn validate_rejects_broken_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[recovery]\nglobal_max_attempts = 0\n").unwrap();
        assert!(validate(Some(&path)).is_err());
    }
}
