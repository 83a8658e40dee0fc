use std::env;
use tempfile::tempdir;

#[cfg(test)]
mod config_tests {
    use super::*;
    use s3du::config::{Config, MAX_PAGE_SIZE};
    use s3du::inventory::FileErrorPolicy;
    use s3du::{ConfigError, RollupDepth};

    #[test]
    fn test_default_config_values() {
        let config = Config::default();

        // Logging defaults
        assert_eq!(config.logging.level, "WARN");
        assert_eq!(config.logging.format, "pretty");
        assert_eq!(config.logging.output, "console");

        // Scan defaults
        assert_eq!(config.scan.delimiter, "/");
        assert_eq!(config.scan.depth, RollupDepth::Unbounded);
        assert_eq!(config.scan.display_limit, 1000);
        assert_eq!(config.scan.prefix, "");
        assert_eq!(config.scan.page_size, 1000);

        // Source and export defaults
        assert_eq!(config.source.max_retries, 3);
        assert_eq!(config.export.on_file_error, FileErrorPolicy::Fail);

        // Output defaults
        assert!(!config.output.human_readable);
        assert_eq!(config.output.timezone, "+00:00");
    }

    #[test]
    fn test_env_variable_override() {
        env::set_var("S3DU_DISPLAY_LIMIT", "25");
        env::set_var("S3DU_DEPTH", "3");
        env::set_var("S3DU_DELIMITER", "::");

        let mut config = Config::default();
        config
            .apply_env_overrides()
            .expect("Failed to apply env overrides");

        assert_eq!(config.scan.display_limit, 25);
        assert_eq!(config.scan.depth, RollupDepth::Limited(3));
        assert_eq!(config.scan.delimiter, "::");

        env::set_var("S3DU_DEPTH", "deep");
        let mut config = Config::default();
        assert!(config.apply_env_overrides().is_err());

        // Cleanup
        env::remove_var("S3DU_DISPLAY_LIMIT");
        env::remove_var("S3DU_DEPTH");
        env::remove_var("S3DU_DELIMITER");
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();

        // Valid config
        assert!(config.validate().is_ok());

        // Page size out of range
        config.scan.page_size = MAX_PAGE_SIZE + 1;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidPageSize {
                got: MAX_PAGE_SIZE + 1,
                max: MAX_PAGE_SIZE
            })
        );

        // Empty delimiter
        config = Config::default();
        config.scan.delimiter = String::new();
        assert_eq!(config.validate(), Err(ConfigError::EmptyDelimiter));

        // Unknown log format
        config = Config::default();
        config.logging.format = "xml".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { field: "logging.format", .. })
        ));

        // Unknown log output
        config = Config::default();
        config.logging.output = "syslog".to_string();
        assert!(config.validate().is_err());

        // Named zones are not offsets
        config = Config::default();
        config.output.timezone = "Europe/Paris".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidTimezone(_))
        ));
    }

    #[test]
    fn test_display_options_follow_output_section() {
        let mut config = Config::default();
        config.output.human_readable = true;
        config.output.timezone = "-05:00".to_string();

        let options = config.display_options(false).unwrap();
        assert!(options.human);
        assert!(!options.color);
        assert_eq!(options.offset.local_minus_utc(), -5 * 3600);
    }

    #[test]
    fn test_retry_policy_from_source_section() {
        let mut config = Config::default();
        config.source.max_retries = 7;
        config.source.retry_base_delay_ms = 50;

        let policy = config.retry_policy();
        assert_eq!(policy.max_retries, 7);
        assert_eq!(policy.base_delay.as_millis(), 50);
    }

    #[cfg(feature = "toml")]
    #[test]
    fn test_config_file_round_trip() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("s3du.toml");

        let mut config = Config::default();
        config.scan.depth = RollupDepth::Limited(2);
        config.scan.prefix = "logs/".to_string();
        config.export.on_file_error = FileErrorPolicy::Skip;

        config.save_to_file(&config_path).unwrap();
        let loaded = Config::load_from_file(&config_path).unwrap();

        assert_eq!(loaded, config);
    }

    #[cfg(feature = "toml")]
    #[test]
    fn test_unbounded_depth_serializes_as_all() {
        let text = Config::default().to_toml().unwrap();
        assert!(text.contains("depth = \"all\""), "{text}");
    }

    #[cfg(feature = "toml")]
    #[test]
    fn test_bad_config_file_is_an_error() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("s3du.toml");
        std::fs::write(&config_path, "[scan\ndepth = ").unwrap();

        assert!(Config::load_from_file(&config_path).is_err());
    }
}
