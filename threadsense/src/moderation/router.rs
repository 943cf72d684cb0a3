// Community -> specialist agent routing
use regex::Regex;

use crate::error::ThreadSenseError;
use common::AgentConfig;

/// Agent key used when no group matches
pub const GENERAL_AGENT: &str = "general";

/// Built-in routing table, in priority order. Patterns are anchored when compiled.
const BUILTIN_GROUPS: &[(&str, &[&str])] = &[
    (
        "science",
        &[
            "science",
            "askscience",
            "technology",
            "tech",
            "programming",
            "machinelearning",
            "datascience",
            "compsci",
            "physics",
            "biology",
            "chemistry",
            "space",
            "futurology",
        ],
    ),
    (
        "askreddit",
        &[
            "askreddit",
            "unpopularopinion",
            "changemyview",
            "nostupidquestions",
            "explainlikeimfive",
            "tooafraidtoask",
            "todayilearned",
        ],
    ),
    (
        "worldnews",
        &[
            "worldnews",
            "news",
            "politics",
            "geopolitics",
            "europe",
            "economics",
            "ukpolitics",
        ],
    ),
    (
        "askhistorians",
        &[
            "askhistorians",
            "history",
            "wwii",
            "ancienthistory",
            "militaryhistory",
            "badhistory",
        ],
    ),
];

/// Resolved specialist agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentProfile {
    pub key: String,
    /// Opaque id handed to the agent capability
    pub agent_id: String,
    /// System prompt describing the agent
    pub persona: String,
}

impl AgentProfile {
    fn new(key: &str, agent_id: Option<&str>, persona: Option<&str>) -> Self {
        Self {
            key: key.to_string(),
            agent_id: agent_id
                .map(str::to_string)
                .unwrap_or_else(|| format!("agent-{}", key)),
            persona: persona
                .map(str::to_string)
                .unwrap_or_else(|| default_persona(key)),
        }
    }
}

fn default_persona(key: &str) -> String {
    if key == GENERAL_AGENT {
        "You are a general-purpose Reddit moderator. You apply Reddit's sitewide content policy: \
         no harassment, hate, threats, doxxing, spam or illegal content. You are fair and concise."
            .to_string()
    } else {
        format!(
            "You are the moderation specialist for r/{key}. You know the norms and rules of r/{key} \
             as well as Reddit's sitewide content policy, and you judge threads the way an experienced \
             r/{key} moderator would. You are fair and concise."
        )
    }
}

struct AgentGroup {
    profile: AgentProfile,
    patterns: Vec<Regex>,
}

/// Ordered routing table from community name to agent. Immutable once built.
pub struct TopicRouter {
    groups: Vec<AgentGroup>,
    general: AgentProfile,
}

impl TopicRouter {
    /// Build from `[[agents]]` config entries, in file order. An empty list selects the
    /// built-in table. An entry keyed `general` overrides the default agent's id and persona.
    pub fn from_config(agents: &[AgentConfig]) -> Result<Self, ThreadSenseError> {
        if agents.iter().all(|a| a.key == GENERAL_AGENT) {
            let mut router = Self::builtin()?;
            if let Some(general) = agents.first() {
                router.general =
                    AgentProfile::new(GENERAL_AGENT, general.agent_id.as_deref(), general.persona.as_deref());
            }
            return Ok(router);
        }

        let mut groups = Vec::new();
        let mut general = AgentProfile::new(GENERAL_AGENT, None, None);
        for agent in agents {
            let key = agent.key.trim().to_lowercase();
            let profile = AgentProfile::new(&key, agent.agent_id.as_deref(), agent.persona.as_deref());
            if key == GENERAL_AGENT {
                general = profile;
                continue;
            }
            let patterns = compile_patterns(&key, agent.patterns.iter().map(String::as_str))?;
            groups.push(AgentGroup { profile, patterns });
        }

        Ok(Self { groups, general })
    }

    pub fn builtin() -> Result<Self, ThreadSenseError> {
        let groups = BUILTIN_GROUPS
            .iter()
            .map(|(key, patterns)| {
                Ok(AgentGroup {
                    profile: AgentProfile::new(key, None, None),
                    patterns: compile_patterns(key, patterns.iter().copied())?,
                })
            })
            .collect::<Result<Vec<_>, ThreadSenseError>>()?;

        Ok(Self {
            groups,
            general: AgentProfile::new(GENERAL_AGENT, None, None),
        })
    }

    /// `classify(community) -> agent key`: first group with a matching pattern, else `general`
    pub fn classify(&self, community: &str) -> &str {
        &self.route(community).key
    }

    /// Same lookup as [`classify`](Self::classify), returning the whole profile
    pub fn route(&self, community: &str) -> &AgentProfile {
        let name = community.trim().to_lowercase();
        self.groups
            .iter()
            .find(|group| group.patterns.iter().any(|re| re.is_match(&name)))
            .map(|group| &group.profile)
            .unwrap_or(&self.general)
    }

    /// Profile for an agent key; unknown keys resolve to the general agent
    pub fn profile(&self, key: &str) -> &AgentProfile {
        self.groups
            .iter()
            .map(|g| &g.profile)
            .find(|p| p.key.eq_ignore_ascii_case(key))
            .unwrap_or(&self.general)
    }

    /// Agent keys in routing order, `general` last
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.groups
            .iter()
            .map(|g| g.profile.key.as_str())
            .chain(std::iter::once(self.general.key.as_str()))
    }
}

fn compile_patterns<'a>(
    key: &str,
    patterns: impl Iterator<Item = &'a str>,
) -> Result<Vec<Regex>, ThreadSenseError> {
    patterns
        .map(|pattern| {
            let inner = pattern.trim().trim_start_matches('^').trim_end_matches('$');
            Regex::new(&format!("^(?:{})$", inner.to_lowercase())).map_err(|e| {
                ThreadSenseError::configuration(format!(
                    "invalid routing pattern '{}' for agent '{}': {}",
                    pattern, key, e
                ))
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn agent(key: &str, patterns: &[&str]) -> AgentConfig {
        AgentConfig {
            key: key.to_string(),
            agent_id: None,
            persona: None,
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
        }
    }

    #[test]
    fn routing_is_case_insensitive_and_deterministic() {
        let router = TopicRouter::builtin().unwrap();
        for _ in 0..3 {
            assert_eq!(router.classify("science"), "science");
            assert_eq!(router.classify("SCIENCE"), "science");
        }
        assert_eq!(router.classify("technology"), router.classify("science"));
        assert_eq!(router.classify("xyz123"), GENERAL_AGENT);
    }

    #[test]
    fn builtin_table_groups() {
        let router = TopicRouter::builtin().unwrap();
        let cases = [
            ("programming", "science"),
            ("machinelearning", "science"),
            ("askreddit", "askreddit"),
            ("unpopularopinion", "askreddit"),
            ("changemyview", "askreddit"),
            ("worldnews", "worldnews"),
            ("politics", "worldnews"),
            ("geopolitics", "worldnews"),
            ("askhistorians", "askhistorians"),
            ("history", "askhistorians"),
            ("wwii", "askhistorians"),
            ("unknown", GENERAL_AGENT),
            ("random", GENERAL_AGENT),
        ];
        for (community, expected) in cases {
            assert_eq!(router.classify(community), expected, "r/{}", community);
        }
    }

    #[test]
    fn patterns_match_whole_name_only() {
        let router = TopicRouter::builtin().unwrap();
        // "tech" must not swallow "techsupport", nor "news" swallow "worldnewsfeed"
        assert_eq!(router.classify("techsupport"), GENERAL_AGENT);
        assert_eq!(router.classify("worldnewsfeed"), GENERAL_AGENT);
    }

    #[test]
    fn config_order_decides_overlaps() {
        let agents = vec![
            agent("first", &["tech.*"]),
            agent("second", &["technology"]),
            agent("general", &[]),
        ];
        let router = TopicRouter::from_config(&agents).unwrap();
        assert_eq!(router.classify("technology"), "first");
        assert_eq!(router.classify("Tech"), "first");
        assert_eq!(router.classify("science"), GENERAL_AGENT);
        assert_eq!(
            router.keys().collect::<Vec<_>>(),
            vec!["first", "second", GENERAL_AGENT]
        );
    }

    #[test]
    fn explicit_anchors_are_tolerated() {
        let router = TopicRouter::from_config(&[agent("science", &["^science$"])]).unwrap();
        assert_eq!(router.classify("science"), "science");
        assert_eq!(router.classify("sciences"), GENERAL_AGENT);
    }

    #[test]
    fn invalid_pattern_is_a_configuration_error() {
        let err = TopicRouter::from_config(&[agent("broken", &["(unclosed"])])
            .err()
            .expect("invalid regex must fail");
        assert!(matches!(err, ThreadSenseError::Configuration(_)));
    }

    #[test]
    fn profiles_resolve_with_general_fallback() {
        let mut general = agent("general", &[]);
        general.agent_id = Some("agent-xyz".to_string());
        let router = TopicRouter::from_config(&[general]).unwrap();

        assert_eq!(router.profile("science").agent_id, "agent-science");
        assert_eq!(router.profile("nope").agent_id, "agent-xyz");
        assert!(router.route("history").persona.contains("r/askhistorians"));
    }
}
