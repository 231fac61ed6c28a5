//! Configuration file loading for CLI defaults.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use expediente_core::Settings;

/// `key = value` file overriding [`Settings`] defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileConfig {
    /// Directory holding one folder per project.
    pub base_dir: Option<PathBuf>,
    /// Portal scheme and host.
    pub portal_url: Option<String>,
    /// Primary download pool size (1..=100).
    pub concurrency: Option<usize>,
    /// Attachment download pool size (1..=100).
    pub attachment_concurrency: Option<usize>,
    /// Completed downloads between checkpoints (1..=1000).
    pub checkpoint_every: Option<usize>,
    pub page_timeout_secs: Option<u64>,
    pub download_timeout_secs: Option<u64>,
    pub print_timeout_secs: Option<u64>,
    /// Nested archive limit (1..=100).
    pub max_archive_depth: Option<usize>,
    pub browser_binary: Option<String>,
    pub office_binary: Option<String>,
    pub unrar_binary: Option<String>,
    pub sevenzip_binary: Option<String>,
}

impl FileConfig {
    /// Validates config values against runtime constraints.
    pub fn validate(&self) -> Result<()> {
        validate_range("concurrency", self.concurrency, 1..=100)?;
        validate_range("attachment_concurrency", self.attachment_concurrency, 1..=100)?;
        validate_range("checkpoint_every", self.checkpoint_every, 1..=1000)?;
        validate_range("max_archive_depth", self.max_archive_depth, 1..=100)?;
        validate_timeout_secs("page_timeout_secs", self.page_timeout_secs)?;
        validate_timeout_secs("download_timeout_secs", self.download_timeout_secs)?;
        validate_timeout_secs("print_timeout_secs", self.print_timeout_secs)?;

        if let Some(portal_url) = &self.portal_url
            && url::Url::parse(portal_url).is_err()
        {
            bail!("Invalid config value for `portal_url`: '{portal_url}' is not an absolute URL");
        }
        Ok(())
    }

    /// Overlays the values present in the file onto `settings`.
    pub fn apply(&self, settings: &mut Settings) {
        if let Some(base_dir) = &self.base_dir {
            settings.base_dir.clone_from(base_dir);
        }
        if let Some(portal_url) = &self.portal_url {
            settings.portal_url.clone_from(portal_url);
        }
        if let Some(value) = self.concurrency {
            settings.concurrency = value;
        }
        if let Some(value) = self.attachment_concurrency {
            settings.attachment_concurrency = value;
        }
        if let Some(value) = self.checkpoint_every {
            settings.checkpoint_every = value;
        }
        if let Some(value) = self.page_timeout_secs {
            settings.page_timeout_secs = value;
        }
        if let Some(value) = self.download_timeout_secs {
            settings.download_timeout_secs = value;
        }
        if let Some(value) = self.print_timeout_secs {
            settings.print_timeout_secs = value;
        }
        if let Some(value) = self.max_archive_depth {
            settings.max_archive_depth = value;
        }
        if let Some(value) = &self.browser_binary {
            settings.browser_binary.clone_from(value);
        }
        if let Some(value) = &self.office_binary {
            settings.office_binary.clone_from(value);
        }
        if let Some(value) = &self.unrar_binary {
            settings.unrar_binary.clone_from(value);
        }
        if let Some(value) = &self.sevenzip_binary {
            settings.sevenzip_binary.clone_from(value);
        }
    }
}

fn validate_range(
    field: &str,
    value: Option<usize>,
    range: std::ops::RangeInclusive<usize>,
) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !range.contains(&value) {
        bail!(
            "Invalid config value for `{field}`: {value}. Expected range: {}..={}",
            range.start(),
            range.end()
        );
    }
    Ok(())
}

fn validate_timeout_secs(field: &str, value: Option<u64>) -> Result<()> {
    let Some(value) = value else {
        return Ok(());
    };
    if !(1..=3600).contains(&value) {
        bail!("Invalid config value for `{field}`: {value}. Expected range: 1..=3600");
    }
    Ok(())
}

/// Resolves the default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/expediente/config.toml`
/// 2. `$HOME/.config/expediente/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(
            PathBuf::from(xdg_config_home)
                .join("expediente")
                .join("config.toml"),
        );
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("expediente")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads the config file named on the command line, or the default one when
/// it exists. An explicit path that does not exist is an error.
pub fn load_file_config(explicit: Option<&Path>) -> Result<Option<FileConfig>> {
    if let Some(path) = explicit {
        return read_file_config(path).map(Some);
    }
    match resolve_default_config_path() {
        Some(path) if path.exists() => read_file_config(&path).map(Some),
        _ => Ok(None),
    }
}

fn read_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!(
                "Invalid config syntax on line {}: expected key = value",
                line_index + 1
            );
        };

        let key = raw_key.trim();
        let value = raw_value.trim();
        let context = || format!("Invalid `{key}` value on line {}", line_index + 1);

        match key {
            "base_dir" => {
                let raw = parse_string_literal(value).with_context(context)?;
                cfg.base_dir = Some(PathBuf::from(raw));
            }
            "portal_url" => {
                cfg.portal_url = Some(parse_string_literal(value).with_context(context)?);
            }
            "concurrency" => {
                cfg.concurrency = Some(parse_integer_usize(value).with_context(context)?);
            }
            "attachment_concurrency" => {
                let parsed = parse_integer_usize(value).with_context(context)?;
                cfg.attachment_concurrency = Some(parsed);
            }
            "checkpoint_every" => {
                cfg.checkpoint_every = Some(parse_integer_usize(value).with_context(context)?);
            }
            "page_timeout_secs" => {
                cfg.page_timeout_secs = Some(parse_integer_u64(value).with_context(context)?);
            }
            "download_timeout_secs" => {
                cfg.download_timeout_secs = Some(parse_integer_u64(value).with_context(context)?);
            }
            "print_timeout_secs" => {
                cfg.print_timeout_secs = Some(parse_integer_u64(value).with_context(context)?);
            }
            "max_archive_depth" => {
                cfg.max_archive_depth = Some(parse_integer_usize(value).with_context(context)?);
            }
            "browser_binary" => {
                cfg.browser_binary = Some(parse_string_literal(value).with_context(context)?);
            }
            "office_binary" => {
                cfg.office_binary = Some(parse_string_literal(value).with_context(context)?);
            }
            "unrar_binary" => {
                cfg.unrar_binary = Some(parse_string_literal(value).with_context(context)?);
            }
            "sevenzip_binary" => {
                cfg.sevenzip_binary = Some(parse_string_literal(value).with_context(context)?);
            }
            unknown => {
                bail!(
                    "Unknown configuration key: '{}' on line {}",
                    unknown,
                    line_index + 1
                );
            }
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    let inner = &raw_value[1..raw_value.len() - 1];
    if inner.trim().is_empty() {
        bail!("Expected non-empty string");
    }
    Ok(inner.to_string())
}

fn parse_integer_u64(raw_value: &str) -> Result<u64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i128>()?;
    if value < 0 {
        bail!("Expected non-negative integer");
    }
    u64::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u64"))
}

fn parse_integer_usize(raw_value: &str) -> Result<usize> {
    let value = parse_integer_u64(raw_value)?;
    usize::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for usize"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_config_partial_fields() {
        let cfg = parse_config_str(
            r#"
concurrency = 4
base_dir = "/srv/expedientes"
"#,
        )
        .expect("partial config should parse");
        assert_eq!(cfg.concurrency, Some(4));
        assert_eq!(cfg.base_dir, Some(PathBuf::from("/srv/expedientes")));
        assert!(cfg.portal_url.is_none());
    }

    #[test]
    fn test_parse_config_supports_inline_comments() {
        let cfg = parse_config_str(
            r#"
attachment_concurrency = 2 # slow portal
browser_binary = "chromium-browser#stable" # hash inside the string
"#,
        )
        .expect("config with comments should parse");
        assert_eq!(cfg.attachment_concurrency, Some(2));
        assert_eq!(cfg.browser_binary.as_deref(), Some("chromium-browser#stable"));
    }

    #[test]
    fn test_parse_config_rejects_invalid_concurrency() {
        let err = parse_config_str("concurrency = 0").expect_err("invalid concurrency expected");
        assert!(err.to_string().contains("concurrency"));
    }

    #[test]
    fn test_parse_config_rejects_numeric_values_with_trailing_tokens() {
        let err = parse_config_str("max_archive_depth = 4 levels")
            .expect_err("expected trailing token error");
        assert!(format!("{err:#}").contains("max_archive_depth"));
    }

    #[test]
    fn test_parse_config_rejects_invalid_timeout_value() {
        let err = parse_config_str("print_timeout_secs = 0").expect_err("invalid timeout expected");
        assert!(err.to_string().contains("print_timeout_secs"));
    }

    #[test]
    fn test_parse_config_rejects_relative_portal_url() {
        let err = parse_config_str(r#"portal_url = "seia.sea.gob.cl""#)
            .expect_err("relative url expected to fail");
        assert!(err.to_string().contains("portal_url"));
    }

    #[test]
    fn test_parse_config_rejects_unknown_keys() {
        let err = parse_config_str("rate_limit = 123").expect_err("unknown key error expected");
        assert!(err.to_string().contains("Unknown configuration key"));
        assert!(err.to_string().contains("rate_limit"));
    }

    #[test]
    fn test_apply_overlays_only_present_values() {
        let cfg = parse_config_str(
            r#"
checkpoint_every = 25
office_binary = "/opt/libreoffice/program/soffice"
"#,
        )
        .expect("config should parse");
        let mut settings = Settings::default();
        cfg.apply(&mut settings);
        assert_eq!(settings.checkpoint_every, 25);
        assert_eq!(settings.office_binary, "/opt/libreoffice/program/soffice");
        assert_eq!(settings.concurrency, Settings::default().concurrency);
    }

    #[test]
    fn test_load_file_config_reports_missing_explicit_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("nope.toml");
        let err = load_file_config(Some(&missing)).expect_err("missing file should fail");
        assert!(err.to_string().contains("nope.toml"));
    }
}
