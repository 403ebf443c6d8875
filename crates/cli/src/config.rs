use anyhow::{Context, Result};
use tracing::debug;
use workhorse_core::PoolConfig;

use crate::cli::CliArgs;

/// Resolve the pool configuration.
/// Priority: command-line flag > environment > config file > defaults.
pub fn resolve(args: &CliArgs) -> Result<PoolConfig> {
    let mut config = PoolConfig::load(args.config.as_deref()).with_context(|| match &args.config {
        Some(path) => format!("failed to load config from {}", path.display()),
        None => "failed to load config".to_string(),
    })?;
    apply_flags(&mut config, args);
    config.validate().context("invalid pool configuration")?;
    debug!(config = %config.summary(), "resolved pool config");
    Ok(config)
}

fn apply_flags(config: &mut PoolConfig, args: &CliArgs) {
    if let Some(size) = args.size {
        config.size = Some(size);
    }
    if let Some(ms) = args.timeout_ms {
        config.timeout_ms = Some(ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn parse(argv: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(std::iter::once("workhorse").chain(argv.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let args = parse(&[]);
        assert_eq!(args.tasks, 16);
        assert_eq!(args.limit, 2_000_000);
        assert!(args.kill.is_none());
        assert!(!args.json);
    }

    #[test]
    fn test_flags_override_config() {
        let args = parse(&["--size", "3", "--timeout-ms", "250"]);
        let mut config = PoolConfig::default().with_size(8);
        apply_flags(&mut config, &args);
        assert_eq!(config.size, Some(3));
        assert_eq!(config.timeout_ms, Some(250));
    }

    #[test]
    fn test_absent_flags_keep_config() {
        let args = parse(&["--tasks", "4"]);
        let mut config = PoolConfig::default().with_size(8);
        apply_flags(&mut config, &args);
        assert_eq!(config.size, Some(8));
        assert_eq!(config.timeout_ms, None);
    }

    #[test]
    fn test_resolve_reads_file() {
        let path = std::env::temp_dir().join(format!("workhorse-cli-{}.toml", std::process::id()));
        let file = PoolConfig::default().with_name("from-file").with_size(2);
        std::fs::write(&path, toml::to_string(&file).unwrap()).unwrap();

        let args = parse(&["--config", path.to_str().unwrap(), "--timeout-ms", "500"]);
        let config = resolve(&args).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.name, "from-file");
        assert_eq!(config.timeout_ms, Some(500));
    }

    #[test]
    fn test_resolve_rejects_zero_timeout() {
        let args = parse(&["--timeout-ms", "0"]);
        let err = resolve(&args).unwrap_err();
        assert!(format!("{err:#}").contains("invalid pool configuration"));
    }
}
