//! robots.txt evaluation.
//!
//! Rules come from the group naming our user agent, falling back to `*`.
//! The longest matching pattern decides; on a tie, `Allow` wins. Patterns
//! support `*` wildcards and a trailing `$` anchor.

use tracing::{info, warn};
use url::Url;

use crate::config::Settings;
use crate::error::FetchError;
use crate::fetch::Fetch;

pub trait CrawlPolicy: Send + Sync {
    fn is_allowed(&self, url: &str) -> bool;
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Rule {
    allow: bool,
    pattern: String,
}

#[derive(Debug, Clone)]
enum Access {
    AllowAll,
    DisallowAll,
    Rules(Vec<Rule>),
}

#[derive(Debug, Clone)]
pub struct RobotsPolicy {
    access: Access,
}

impl RobotsPolicy {
    pub fn allow_all() -> Self {
        RobotsPolicy { access: Access::AllowAll }
    }

    pub fn disallow_all() -> Self {
        RobotsPolicy { access: Access::DisallowAll }
    }

    pub fn parse(content: &str, user_agent: &str) -> Self {
        let groups = parse_groups(content);
        let agent = user_agent.to_lowercase();

        // A group naming our agent applies even when it has no rules.
        let names_agent = |g: &&Group| {
            agent != "*" && g.agents.iter().any(|a| a != "*" && agent.contains(a.as_str()))
        };
        let rules: Vec<Rule> = if groups.iter().any(|g| names_agent(&g)) {
            groups
                .iter()
                .filter(names_agent)
                .flat_map(|g| g.rules.iter().cloned())
                .collect()
        } else {
            groups
                .iter()
                .filter(|g| g.agents.iter().any(|a| a == "*"))
                .flat_map(|g| g.rules.iter().cloned())
                .collect()
        };

        RobotsPolicy {
            access: Access::Rules(rules),
        }
    }

    fn path_allowed(&self, path: &str) -> bool {
        let rules = match &self.access {
            Access::AllowAll => return true,
            Access::DisallowAll => return false,
            Access::Rules(rules) => rules,
        };

        let mut longest_allow = None;
        let mut longest_disallow = None;
        for rule in rules.iter().filter(|r| pattern_matches(path, &r.pattern)) {
            let slot = if rule.allow {
                &mut longest_allow
            } else {
                &mut longest_disallow
            };
            *slot = Some(slot.unwrap_or(0).max(rule.pattern.len()));
        }

        match (longest_allow, longest_disallow) {
            (_, None) => true,
            (None, Some(_)) => false,
            (Some(a), Some(d)) => a >= d,
        }
    }
}

impl CrawlPolicy for RobotsPolicy {
    fn is_allowed(&self, url: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return false;
        };
        let path = match parsed.query() {
            Some(q) => format!("{}?{}", parsed.path(), q),
            None => parsed.path().to_string(),
        };
        self.path_allowed(&path)
    }
}

struct Group {
    agents: Vec<String>,
    rules: Vec<Rule>,
}

fn parse_groups(content: &str) -> Vec<Group> {
    let mut groups: Vec<Group> = Vec::new();
    let mut collecting_agents = false;

    for line in content.lines() {
        let line = line.split('#').next().unwrap_or_default().trim();
        let Some((directive, value)) = line.split_once(':') else {
            continue;
        };
        let value = value.trim();

        match directive.trim().to_lowercase().as_str() {
            "user-agent" => {
                if !collecting_agents {
                    groups.push(Group {
                        agents: Vec::new(),
                        rules: Vec::new(),
                    });
                }
                collecting_agents = true;
                if let Some(group) = groups.last_mut() {
                    group.agents.push(value.to_lowercase());
                }
            }
            directive @ ("allow" | "disallow") => {
                collecting_agents = false;
                // An empty Disallow allows everything and adds nothing.
                if value.is_empty() {
                    continue;
                }
                if let Some(group) = groups.last_mut() {
                    group.rules.push(Rule {
                        allow: directive == "allow",
                        pattern: value.to_string(),
                    });
                }
            }
            _ => collecting_agents = false,
        }
    }

    groups
}

fn pattern_matches(path: &str, pattern: &str) -> bool {
    let (pattern, anchored) = match pattern.strip_suffix('$') {
        Some(p) => (p, true),
        None => (pattern, false),
    };
    let pieces: Vec<&str> = pattern.split('*').collect();
    let Some((first, rest)) = pieces.split_first() else {
        return true;
    };
    let Some(mut remaining) = path.strip_prefix(first) else {
        return false;
    };

    for (i, piece) in rest.iter().enumerate() {
        if anchored && i + 1 == rest.len() {
            return remaining.ends_with(piece);
        }
        match remaining.find(piece) {
            Some(idx) => remaining = &remaining[idx + piece.len()..],
            None => return false,
        }
    }
    !anchored || remaining.is_empty()
}

/// Fetch and parse `<base_url>/robots.txt`.
///
/// 401/403 disallow everything, any other client error allows everything.
/// A network failure falls back to allow-all with a warning.
pub async fn load<F: Fetch>(fetcher: &F, settings: &Settings) -> anyhow::Result<RobotsPolicy> {
    let robots_url = Url::parse(&settings.base_url)?.join("/robots.txt")?;
    info!(url = %robots_url, "Fetching robots.txt");

    let policy = match fetcher.fetch(robots_url.as_str()).await {
        Ok(page) => RobotsPolicy::parse(&page.body, &settings.robots_user_agent),
        Err(FetchError::Status { status: 401 | 403, .. }) => {
            warn!("robots.txt is access-controlled; treating every URL as disallowed");
            RobotsPolicy::disallow_all()
        }
        Err(FetchError::Status { status, .. }) if (400..500).contains(&status) => {
            RobotsPolicy::allow_all()
        }
        Err(e) => {
            warn!(error = %e, "robots.txt unavailable; allowing all URLs");
            RobotsPolicy::allow_all()
        }
    };
    Ok(policy)
}
