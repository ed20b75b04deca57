//! Validation helpers applied to settings snapshots before acceptance.

use std::collections::HashSet;

use crate::error::{ConfigError, ConfigResult};
use crate::model::EngineSettings;

/// Validate an engine settings snapshot.
///
/// # Errors
///
/// Returns an error when any mapping carries an empty prefix or a duplicate
/// name, or when the numeric knobs are out of range.
pub fn validate_settings(settings: &EngineSettings) -> ConfigResult<()> {
    if settings.cache_budget_bytes == 0 {
        return Err(invalid_field(
            "engine",
            "cache_budget_bytes",
            Some("0"),
            "must be positive",
        ));
    }
    if settings.worker_count == 0 {
        return Err(invalid_field(
            "engine",
            "worker_count",
            Some("0"),
            "must be at least 1",
        ));
    }

    let mut names = HashSet::new();
    for mapping in &settings.mappings {
        if mapping.name.trim().is_empty() {
            return Err(invalid_field("mappings", "name", None, "must not be empty"));
        }
        if !names.insert(mapping.name.as_str()) {
            return Err(ConfigError::DuplicateMapping {
                name: mapping.name.clone(),
            });
        }
        for (field, value) in [
            ("logical_root", &mapping.logical_root),
            ("engine_root", &mapping.engine_root),
            ("cache_root", &mapping.cache_root),
        ] {
            if value.trim().is_empty() {
                return Err(invalid_field(
                    "mappings",
                    field,
                    Some(mapping.name.as_str()),
                    "prefix must not be empty",
                ));
            }
        }
        if mapping
            .external_cache_root
            .as_deref()
            .is_some_and(|root| root.trim().is_empty())
        {
            return Err(invalid_field(
                "mappings",
                "external_cache_root",
                Some(mapping.name.as_str()),
                "prefix must not be empty",
            ));
        }
    }

    Ok(())
}

fn invalid_field(
    section: &str,
    field: &str,
    value: Option<&str>,
    reason: &'static str,
) -> ConfigError {
    ConfigError::InvalidField {
        section: section.to_string(),
        field: field.to_string(),
        value: value.map(str::to_string),
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{PathMapping, VerifyMode};

    fn sample_mapping(name: &str) -> PathMapping {
        PathMapping {
            name: name.to_string(),
            logical_root: "/lib/Movies".to_string(),
            engine_root: "/mnt/user/Movies".to_string(),
            cache_root: "/mnt/cache/Movies".to_string(),
            external_cache_root: None,
            cacheable: true,
            enabled: true,
        }
    }

    fn sample_settings() -> EngineSettings {
        EngineSettings {
            mappings: vec![sample_mapping("movies")],
            cache_budget_bytes: 1024,
            retention_hours: 12,
            worker_count: 4,
            free_space_margin_bytes: 0,
            verify: VerifyMode::Size,
        }
    }

    #[test]
    fn accepts_valid_settings() {
        validate_settings(&sample_settings()).expect("valid settings should pass");
    }

    #[test]
    fn rejects_zero_budget() {
        let mut settings = sample_settings();
        settings.cache_budget_bytes = 0;
        let err = validate_settings(&settings).expect_err("zero budget should fail");
        assert!(matches!(err, ConfigError::InvalidField { .. }));
    }

    #[test]
    fn rejects_zero_workers() {
        let mut settings = sample_settings();
        settings.worker_count = 0;
        assert!(validate_settings(&settings).is_err());
    }

    #[test]
    fn rejects_duplicate_mapping_names() {
        let mut settings = sample_settings();
        settings.mappings.push(sample_mapping("movies"));
        let err = validate_settings(&settings).expect_err("duplicate names should fail");
        assert!(matches!(err, ConfigError::DuplicateMapping { name } if name == "movies"));
    }

    #[test]
    fn rejects_empty_prefixes() {
        let mut settings = sample_settings();
        settings.mappings[0].logical_root = "  ".to_string();
        assert!(validate_settings(&settings).is_err());

        let mut settings = sample_settings();
        settings.mappings[0].external_cache_root = Some(String::new());
        assert!(validate_settings(&settings).is_err());
    }
}
