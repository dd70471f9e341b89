// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;

use regex::bytes::Regex;
use serde::Deserialize;
use tracing::debug;

use crate::config::{deserialize_bool_from_anything, deserialize_string_list};
use crate::entry::{check_tag_name, Entry, EntryTag, Tagger};
use crate::errors::{ConfigError, ProcessError};
use crate::processors::{compile_with_group, Processor};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegexRouterConfig {
    #[serde(rename = "Regex", default)]
    pub regex: String,

    /// Capture group holding the routing value.
    #[serde(rename = "Route_Extraction", default)]
    pub route_extraction: String,

    /// `<value>:<tag>` pairs. An empty tag drops entries with that value.
    #[serde(rename = "Route", default, deserialize_with = "deserialize_string_list")]
    pub routes: Vec<String>,

    #[serde(
        rename = "Drop_Misses",
        default,
        deserialize_with = "deserialize_bool_from_anything"
    )]
    pub drop_misses: bool,
}

/// A parsed `Route` line, before the tag is negotiated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteSpec {
    pub value: String,
    /// `None` drops matching entries.
    pub tag: Option<String>,
}

impl RouteSpec {
    /// Splits at the last `:` so values may contain colons.
    pub fn parse(line: &str) -> Result<Self, ConfigError> {
        let (value, tag) = line
            .rsplit_once(':')
            .ok_or_else(|| ConfigError::MalformedRoute(line.to_string()))?;
        let (value, tag) = (value.trim(), tag.trim());
        if value.is_empty() {
            return Err(ConfigError::MalformedRoute(line.to_string()));
        }
        if tag.is_empty() {
            return Ok(RouteSpec {
                value: value.to_string(),
                tag: None,
            });
        }
        check_tag_name(tag)?;
        Ok(RouteSpec {
            value: value.to_string(),
            tag: Some(tag.to_string()),
        })
    }
}

impl RegexRouterConfig {
    /// Validates everything that does not need a tagger.
    pub fn validate(&self) -> Result<(Regex, usize, Vec<RouteSpec>), ConfigError> {
        if self.route_extraction.is_empty() {
            return Err(ConfigError::MissingField("Route_Extraction"));
        }
        let (regex, group) = compile_with_group(&self.regex, &self.route_extraction)?;
        if self.routes.is_empty() {
            return Err(ConfigError::MissingField("Route"));
        }
        let mut specs: Vec<RouteSpec> = Vec::with_capacity(self.routes.len());
        for line in &self.routes {
            let spec = RouteSpec::parse(line)?;
            if specs.iter().any(|s| s.value == spec.value) {
                return Err(ConfigError::Duplicate {
                    kind: "route",
                    value: spec.value,
                });
            }
            specs.push(spec);
        }
        Ok((regex, group, specs))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    Retag(EntryTag),
    Drop,
}

/// Re-tags or drops entries based on a regex capture.
pub struct RegexRouter {
    regex: Regex,
    group: usize,
    routes: HashMap<Vec<u8>, Route>,
    drop_misses: bool,
}

impl RegexRouter {
    pub fn new(config: RegexRouterConfig, tagger: &dyn Tagger) -> Result<Self, ConfigError> {
        let (regex, group, specs) = config.validate()?;
        let mut routes = HashMap::with_capacity(specs.len());
        for spec in specs {
            let route = match &spec.tag {
                Some(name) => {
                    let tag = tagger.negotiate_tag(name)?;
                    debug!("Routing {:?} to tag {} ({})", spec.value, name, tag);
                    Route::Retag(tag)
                }
                None => Route::Drop,
            };
            routes.insert(spec.value.into_bytes(), route);
        }
        Ok(RegexRouter {
            regex,
            group,
            routes,
            drop_misses: config.drop_misses,
        })
    }

    fn route(&self, data: &[u8]) -> Option<Route> {
        let captures = self.regex.captures(data)?;
        let value = captures.get(self.group)?;
        self.routes.get(value.as_bytes()).copied()
    }
}

#[async_trait::async_trait]
impl Processor for RegexRouter {
    async fn process(&mut self, mut entry: Entry) -> Result<Vec<Entry>, ProcessError> {
        match self.route(&entry.data) {
            Some(Route::Retag(tag)) => {
                entry.tag = tag;
                Ok(vec![entry])
            }
            Some(Route::Drop) => Ok(Vec::new()),
            None if self.drop_misses => Ok(Vec::new()),
            None => Ok(vec![entry]),
        }
    }

    fn name(&self) -> &'static str {
        "regexrouter"
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::errors::TagError;
    use std::sync::Mutex;

    /// Hands out tags in negotiation order, starting at 1.
    #[derive(Default)]
    struct SequentialTagger {
        names: Mutex<Vec<String>>,
    }

    impl Tagger for SequentialTagger {
        fn negotiate_tag(&self, name: &str) -> Result<EntryTag, TagError> {
            let mut names = self.names.lock().unwrap();
            if let Some(i) = names.iter().position(|n| n == name) {
                return Ok(EntryTag(i as u16 + 1));
            }
            names.push(name.to_string());
            Ok(EntryTag(names.len() as u16))
        }

        fn lookup_tag(&self, tag: EntryTag) -> Option<String> {
            let names = self.names.lock().unwrap();
            names.get(usize::from(tag.0).checked_sub(1)?).cloned()
        }
    }

    fn config(routes: &[&str], drop_misses: bool) -> RegexRouterConfig {
        RegexRouterConfig {
            regex: r"app=(?P<app>\S+)".to_string(),
            route_extraction: "app".to_string(),
            routes: routes.iter().map(|r| r.to_string()).collect(),
            drop_misses,
        }
    }

    #[tokio::test]
    async fn test_route_and_drop_misses() {
        let tagger = SequentialTagger::default();
        let mut router = RegexRouter::new(config(&["X:t1"], true), &tagger).unwrap();

        let out = router
            .process(Entry::new(EntryTag(0), "level=info app=X"))
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(tagger.lookup_tag(out[0].tag).as_deref(), Some("t1"));

        let out = router
            .process(Entry::new(EntryTag(0), "level=info app=Y"))
            .await
            .unwrap();
        assert!(out.is_empty());

        let out = router
            .process(Entry::new(EntryTag(0), "no capture here"))
            .await
            .unwrap();
        assert!(out.is_empty());
    }

    #[tokio::test]
    async fn test_misses_pass_through() {
        let tagger = SequentialTagger::default();
        let mut router = RegexRouter::new(config(&["X:t1", "noisy:"], false), &tagger).unwrap();

        let out = router
            .process(Entry::new(EntryTag(9), "app=Y"))
            .await
            .unwrap();
        assert_eq!(out[0].tag, EntryTag(9));

        let out = router
            .process(Entry::new(EntryTag(9), "app=noisy"))
            .await
            .unwrap();
        assert!(out.is_empty());

        let out = router
            .process(Entry::new(EntryTag(9), b"\xff\xfe binary"))
            .await
            .unwrap();
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn test_route_parsing() {
        assert_eq!(
            RouteSpec::parse("host:8080:web").unwrap(),
            RouteSpec {
                value: "host:8080".to_string(),
                tag: Some("web".to_string())
            }
        );
        assert_eq!(RouteSpec::parse("spam:").unwrap().tag, None);
        assert!(matches!(
            RouteSpec::parse("notaroute"),
            Err(ConfigError::MalformedRoute(_))
        ));
        assert!(matches!(
            RouteSpec::parse(":tag"),
            Err(ConfigError::MalformedRoute(_))
        ));
        assert!(matches!(
            RouteSpec::parse("x:bad tag"),
            Err(ConfigError::Tag(TagError::ForbiddenCharacter { .. }))
        ));
    }

    #[test]
    fn test_config_validation() {
        assert!(matches!(
            config(&["a:t1", "a:t2"], false).validate(),
            Err(ConfigError::Duplicate { .. })
        ));
        assert!(matches!(
            config(&[], false).validate(),
            Err(ConfigError::MissingField("Route"))
        ));

        let mut bad_group = config(&["a:t1"], false);
        bad_group.route_extraction = "nope".to_string();
        assert!(matches!(
            bad_group.validate(),
            Err(ConfigError::MissingCaptureName(_))
        ));
    }
}
