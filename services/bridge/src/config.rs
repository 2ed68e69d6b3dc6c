//! Daemon configuration.
//!
//! A single JSON file with four sections: `Icinga`, `RT`, `Cache`, `Ticket`.
//! Key spelling is part of the on-disk contract and follows the historical
//! deployments, hence the explicit renames. Missing fields default to their
//! zero values; `check` decides what is actually required.

use icinga_client::{Filter, FilterSet};
use serde::{Deserialize, Serialize};
use std::path::Path;

// ---------------------------------------------------------------------------
// Config types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "Icinga")]
    pub icinga: IcingaConfig,
    #[serde(rename = "RT")]
    pub rt: RtConfig,
    #[serde(rename = "Cache")]
    pub cache: CacheConfig,
    #[serde(rename = "Ticket")]
    pub ticket: TicketConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IcingaConfig {
    #[serde(rename = "URL", default)]
    pub url: String,
    #[serde(rename = "User", default)]
    pub user: String,
    #[serde(rename = "Password", default)]
    pub password: String,
    #[serde(rename = "Insecure", default)]
    pub insecure: bool,
    #[serde(rename = "Retries", default)]
    pub retries: u32,
    /// Server-side filter expression passed through to the events API.
    #[serde(rename = "Filter", default)]
    pub filter: String,
    /// Local admission filter applied before the engine.
    #[serde(rename = "LocalFilter", default, skip_serializing_if = "Option::is_none")]
    pub local_filter: Option<LocalFilter>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RtConfig {
    #[serde(rename = "URL", default)]
    pub url: String,
    #[serde(rename = "User", default)]
    pub user: String,
    #[serde(rename = "Password", default)]
    pub password: String,
    #[serde(rename = "Insecure", default)]
    pub insecure: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(rename = "File", default)]
    pub file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TicketConfig {
    /// Path to the mapping rule file.
    #[serde(rename = "Mappings", default)]
    pub mappings: String,
    #[serde(rename = "Nobody", default)]
    pub nobody: String,
    #[serde(rename = "Queue", default)]
    pub queue: String,
    /// Ticket statuses treated as "closed", i.e. "no prior event".
    #[serde(rename = "ClosedStatus", default)]
    pub closed_status: Vec<String>,
}

/// Either a disjunctive or a conjunctive filter list; never both.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LocalFilter {
    #[serde(rename = "All", default, skip_serializing_if = "Option::is_none")]
    pub all: Option<Vec<Filter>>,
    #[serde(rename = "Any", default, skip_serializing_if = "Option::is_none")]
    pub any: Option<Vec<Filter>>,
}

impl LocalFilter {
    /// The configured matcher, if any filters are set. `check` has already
    /// rejected configs with both variants present.
    pub fn to_set(&self) -> Option<FilterSet> {
        match (&self.all, &self.any) {
            (Some(all), _) => Some(FilterSet::All(all.clone())),
            (None, Some(any)) => Some(FilterSet::Any(any.clone())),
            (None, None) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading config file '{path}': {reason}")]
    Io { path: String, reason: String },
    #[error("writing config file '{path}': {reason}")]
    Write { path: String, reason: String },
    #[error("parse error: {0}")]
    Parse(String),
    #[error("{0}")]
    Invalid(String),
}

// ---------------------------------------------------------------------------
// Load / save / check
// ---------------------------------------------------------------------------

/// Load a configuration file.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    let json = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    load_from_str(&json)
}

/// Parse a configuration from a JSON string.
pub fn load_from_str(json: &str) -> Result<Config, ConfigError> {
    serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Write a configuration as pretty-printed JSON.
pub fn save(path: &Path, config: &Config) -> Result<(), ConfigError> {
    let json = serde_json::to_string_pretty(config).map_err(|e| ConfigError::Write {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;
    std::fs::write(path, json).map_err(|e| ConfigError::Write {
        path: path.display().to_string(),
        reason: e.to_string(),
    })
}

/// Validate a loaded configuration.
pub fn check(config: &Config) -> Result<(), ConfigError> {
    let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_owned()));

    if config.icinga.url.is_empty() {
        return invalid("Icinga.URL must be set");
    }
    if config.icinga.user.is_empty() {
        return invalid("Icinga.User must be set");
    }
    if config.icinga.retries == 0 {
        return invalid("Icinga.Retries must be > 0");
    }
    if let Some(filter) = &config.icinga.local_filter {
        if filter.all.is_some() && filter.any.is_some() {
            return invalid("only one of LocalFilter.All and LocalFilter.Any may be set");
        }
    }
    if config.ticket.queue.is_empty() {
        return invalid("Ticket.Queue must be set");
    }
    if config.ticket.nobody.is_empty() {
        return invalid("Ticket.Nobody must be set");
    }
    if config.ticket.mappings.is_empty() {
        return invalid("Ticket.Mappings must be set");
    }
    if config.ticket.closed_status.is_empty() {
        return invalid("Ticket.ClosedStatus must be set");
    }
    if config.cache.file.is_empty() {
        return invalid("Cache.File must be set");
    }

    Ok(())
}

/// The configuration written by `--example`.
pub fn example() -> Config {
    Config {
        icinga: IcingaConfig {
            url: "https://monitoring.example.com:5665".to_owned(),
            user: "root".to_owned(),
            password: "secret".to_owned(),
            insecure: true,
            retries: 5,
            filter: String::new(),
            local_filter: None,
        },
        rt: RtConfig {
            url: "https://support.example.com".to_owned(),
            user: "apiuser".to_owned(),
            password: "secret".to_owned(),
            insecure: true,
        },
        cache: CacheConfig {
            file: "/var/lib/icinga2rt/icinga2rt.sqlite3".to_owned(),
        },
        ticket: TicketConfig {
            mappings: "/etc/bytemine/mappings.csv".to_owned(),
            nobody: "Nobody".to_owned(),
            queue: "general".to_owned(),
            closed_status: vec!["deleted".to_owned()],
        },
    }
}

#[cfg(test)]
mod tests {
    use super::{check, example, load_from_str};

    #[test]
    fn example_config_passes_validation() {
        check(&example()).unwrap();
    }

    #[test]
    fn example_config_round_trips_through_json() {
        let json = serde_json::to_string_pretty(&example()).unwrap();
        assert!(json.contains(r#""Icinga""#));
        assert!(json.contains(r#""URL""#));
        assert!(json.contains(r#""ClosedStatus""#));

        let back = load_from_str(&json).unwrap();
        check(&back).unwrap();
        assert_eq!(back.icinga.retries, 5);
        assert_eq!(back.ticket.nobody, "Nobody");
    }

    #[test]
    fn missing_required_fields_are_rejected() {
        let cases = [
            ("Icinga.URL", {
                let mut c = example();
                c.icinga.url.clear();
                c
            }),
            ("Icinga.User", {
                let mut c = example();
                c.icinga.user.clear();
                c
            }),
            ("Icinga.Retries", {
                let mut c = example();
                c.icinga.retries = 0;
                c
            }),
            ("Ticket.Queue", {
                let mut c = example();
                c.ticket.queue.clear();
                c
            }),
            ("Ticket.Nobody", {
                let mut c = example();
                c.ticket.nobody.clear();
                c
            }),
            ("Ticket.Mappings", {
                let mut c = example();
                c.ticket.mappings.clear();
                c
            }),
            ("Ticket.ClosedStatus", {
                let mut c = example();
                c.ticket.closed_status.clear();
                c
            }),
            ("Cache.File", {
                let mut c = example();
                c.cache.file.clear();
                c
            }),
        ];

        for (name, config) in cases {
            assert!(check(&config).is_err(), "{name} should be required");
        }
    }

    #[test]
    fn local_filter_allows_at_most_one_variant() {
        let json = r#"{
            "Icinga": {
                "URL": "https://monitoring.example.com:5665",
                "User": "root",
                "Password": "secret",
                "Retries": 5,
                "LocalFilter": {
                    "All": [{"Host": "a"}],
                    "Any": [{"Host": "b"}]
                }
            },
            "RT": {"URL": "https://support.example.com", "User": "u", "Password": "p"},
            "Cache": {"File": "/tmp/cache.sqlite3"},
            "Ticket": {
                "Mappings": "/tmp/mappings.csv",
                "Nobody": "Nobody",
                "Queue": "general",
                "ClosedStatus": ["deleted"]
            }
        }"#;
        let config = load_from_str(json).unwrap();
        assert!(check(&config).is_err());
    }

    #[test]
    fn local_filter_converts_to_the_right_matcher() {
        use icinga_client::FilterSet;

        let json = r#"{
            "Icinga": {
                "URL": "https://monitoring.example.com:5665",
                "User": "root",
                "Password": "secret",
                "Retries": 5,
                "LocalFilter": {"Any": [{"Host": "web-01"}]}
            },
            "RT": {"URL": "https://support.example.com", "User": "u", "Password": "p"},
            "Cache": {"File": "/tmp/cache.sqlite3"},
            "Ticket": {
                "Mappings": "/tmp/mappings.csv",
                "Nobody": "Nobody",
                "Queue": "general",
                "ClosedStatus": ["deleted"]
            }
        }"#;
        let config = load_from_str(json).unwrap();
        check(&config).unwrap();

        let set = config.icinga.local_filter.unwrap().to_set().unwrap();
        assert!(matches!(set, FilterSet::Any(ref filters) if filters.len() == 1));
    }

    #[test]
    fn garbage_json_is_a_parse_error() {
        assert!(load_from_str("{not json").is_err());
    }
}
