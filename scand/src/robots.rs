use std::time::Duration;

use once_cell::sync::Lazy;
use regex::Regex;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use scan_db::PgPool;
use serde::{Deserialize, Serialize};

/// User agents whose restrictions this crawler honors, regardless of which
/// agent issued the request. Includes this system's own token plus the
/// major AI crawlers, so a site owner who blocks "GPTBot" is also honored
/// even when we identify as `scand-research-bot`.
pub const WATCHED_USER_AGENTS: &[&str] = &[
    "scand-research-bot",
    "gptbot",
    "chatgpt-user",
    "claudebot",
    "claude-web",
    "anthropic-ai",
    "google-extended",
];

const DEFAULT_CRAWL_DELAY_SECS: f64 = 10.0;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RobotsRule {
    pub path: String,
    pub allowed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RobotsGroup {
    pub agents: Vec<String>,
    pub rules: Vec<RobotsRule>,
    pub crawl_delay: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ParsedRobotsTxt {
    pub groups: Vec<RobotsGroup>,
    /// Tri-state hint from a `# ai-input: yes/no` comment. `None` means unset.
    pub ai_input: Option<bool>,
    /// Tri-state hint from a `# ai-train: yes/no` comment.
    pub ai_train: Option<bool>,
}

/// Line-oriented robots.txt parser.
///
/// - A line matching `^\s*#\s*(.*)` is a comment; if its body starts with
///   `ai-input:` or `ai-train:` it sets the corresponding tri-state hint.
/// - Otherwise, text after an un-escaped `#` is stripped, then the line is
///   split on the first `:`. Lines without `:` are ignored.
/// - Repeated `user-agent` lines extend the current group unless the group
///   has already seen `allow`/`disallow` lines, in which case a new group
///   starts.
pub fn parse_robots_txt(raw: &str) -> ParsedRobotsTxt {
    let mut parsed = ParsedRobotsTxt::default();
    let mut current = RobotsGroup::default();
    let mut in_rules = false;

    let flush = |parsed: &mut ParsedRobotsTxt, current: RobotsGroup| {
        if !current.agents.is_empty() {
            parsed.groups.push(current);
        }
    };

    for raw_line in raw.lines() {
        if let Some(comment) = comment_body(raw_line) {
            let lower = comment.trim().to_ascii_lowercase();
            if let Some(v) = lower.strip_prefix("ai-input:") {
                parsed.ai_input = Some(parse_yes_no(v.trim()));
            } else if let Some(v) = lower.strip_prefix("ai-train:") {
                parsed.ai_train = Some(parse_yes_no(v.trim()));
            }
            continue;
        }

        let stripped = strip_inline_comment(raw_line);
        let line = stripped.trim();
        if line.is_empty() {
            continue;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim();

        match key.as_str() {
            "user-agent" => {
                if in_rules {
                    let finished = std::mem::take(&mut current);
                    flush(&mut parsed, finished);
                    in_rules = false;
                }
                current.agents.push(value.to_ascii_lowercase());
            }
            "disallow" => {
                if current.agents.is_empty() {
                    current.agents.push("*".to_string());
                }
                current.rules.push(RobotsRule {
                    path: value.to_string(),
                    allowed: false,
                });
                in_rules = true;
            }
            "allow" => {
                if current.agents.is_empty() {
                    current.agents.push("*".to_string());
                }
                current.rules.push(RobotsRule {
                    path: value.to_string(),
                    allowed: true,
                });
                in_rules = true;
            }
            "crawl-delay" => {
                if let Ok(v) = value.parse::<f64>() {
                    current.crawl_delay = Some(v);
                }
            }
            _ => {}
        }
    }
    flush(&mut parsed, current);
    parsed
}

fn comment_body(line: &str) -> Option<&str> {
    let trimmed = line.trim_start();
    trimmed.strip_prefix('#').map(|rest| rest.trim_start())
}

fn strip_inline_comment(line: &str) -> &str {
    match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

fn parse_yes_no(v: &str) -> bool {
    matches!(v, "yes" | "true" | "1")
}

/// Longest case-insensitive substring match against the group's agent
/// tokens, falling back to the `*` group. `None` if neither exists.
fn find_matching_group<'a>(parsed: &'a ParsedRobotsTxt, user_agent: &str) -> Option<&'a RobotsGroup> {
    let ua = user_agent.to_ascii_lowercase();
    let mut best: Option<&RobotsGroup> = None;
    let mut best_len = 0usize;
    let mut wildcard: Option<&RobotsGroup> = None;

    for group in &parsed.groups {
        for agent in &group.agents {
            if agent == "*" {
                if wildcard.is_none() {
                    wildcard = Some(group);
                }
                continue;
            }
            if ua.contains(agent.as_str()) && agent.len() > best_len {
                best = Some(group);
                best_len = agent.len();
            }
        }
    }
    best.or(wildcard)
}

fn glob_to_regex(pattern: &str) -> Regex {
    let mut out = String::from("^");
    let mut chars = pattern.chars().peekable();
    let mut trailing_dollar = false;
    while let Some(c) = chars.next() {
        if c == '$' && chars.peek().is_none() {
            trailing_dollar = true;
            break;
        }
        if c == '*' {
            out.push_str(".*");
        } else {
            out.push_str(&regex::escape(&c.to_string()));
        }
    }
    if trailing_dollar {
        out.push('$');
    } else {
        out.push_str(".*");
    }
    // A pattern sourced directly from a robots.txt file; a construction
    // failure here would be a bug in glob_to_regex, not bad user input.
    Regex::new(&out).unwrap_or_else(|_| Regex::new("^$").unwrap())
}

/// Longest matching rule path for the group wins; empty rule paths never
/// match. Ties on length favor `Disallow` over `Allow`, independent of
/// which came first in the file.
fn most_specific_rule<'a>(group: &'a RobotsGroup, path: &str) -> Option<&'a RobotsRule> {
    let mut best: Option<&RobotsRule> = None;
    let mut best_len = 0usize;
    for rule in &group.rules {
        if rule.path.is_empty() {
            continue;
        }
        if !glob_to_regex(&rule.path).is_match(path) {
            continue;
        }
        let len = rule.path.len();
        let replace = match best {
            None => true,
            Some(current) => len > best_len || (len == best_len && !rule.allowed && current.allowed),
        };
        if replace {
            best = Some(rule);
            best_len = len;
        }
    }
    best
}

/// Returns `false` if `ai_input` is explicitly `no`, or if any watched
/// agent's applicable rule is a `Disallow`. Otherwise `true`.
pub fn is_path_allowed(parsed: &ParsedRobotsTxt, path: &str) -> bool {
    if parsed.ai_input == Some(false) {
        return false;
    }
    for agent in WATCHED_USER_AGENTS {
        let Some(group) = find_matching_group(parsed, agent) else {
            continue;
        };
        if let Some(rule) = most_specific_rule(group, path) {
            if !rule.allowed {
                return false;
            }
        }
    }
    true
}

/// Maximum `crawl_delay` across the matching groups of all watched agents,
/// defaulting to 10 seconds when none is specified.
pub fn get_crawl_delay(parsed: &ParsedRobotsTxt) -> f64 {
    let mut delay = None;
    for agent in WATCHED_USER_AGENTS {
        if let Some(group) = find_matching_group(parsed, agent) {
            if let Some(d) = group.crawl_delay {
                delay = Some(delay.map_or(d, |cur: f64| cur.max(d)));
            }
        }
    }
    delay.unwrap_or(DEFAULT_CRAWL_DELAY_SECS)
}

/// Coarse site-level AI-crawling signal, independent of a specific path:
/// true if `ai_input` is explicitly `no`, or any AI-specific watched agent
/// carries a blanket `Disallow: /`.
pub fn is_ai_blocked(parsed: &ParsedRobotsTxt) -> bool {
    if parsed.ai_input == Some(false) {
        return true;
    }
    for agent in WATCHED_USER_AGENTS {
        if *agent == "scand-research-bot" {
            continue;
        }
        if let Some(group) = find_matching_group(parsed, agent) {
            if let Some(rule) = most_specific_rule(group, "/") {
                if !rule.allowed && rule.path == "/" {
                    return true;
                }
            }
        }
    }
    false
}

#[derive(Debug, sqlx::FromRow)]
struct RobotsTxtCacheRow {
    rules_json: String,
    crawl_delay: Option<f64>,
    next_check_at: DateTime<Utc>,
}

static HTTP_CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .user_agent(crate::config::USER_AGENT)
        .build()
        .expect("robots http client")
});

/// Fetches, caches, and evaluates robots.txt policy for a domain, backed by
/// the `robots_txt_cache` table.
pub struct RobotsPolicy<'a> {
    pool: &'a PgPool,
}

impl<'a> RobotsPolicy<'a> {
    pub fn new(pool: &'a PgPool) -> Self {
        Self { pool }
    }

    /// Returns the parsed rules and crawl delay for `domain`, refreshing the
    /// cache entry if it is missing or stale.
    pub async fn get_robots_rules(&self, domain: &str) -> anyhow::Result<(ParsedRobotsTxt, f64)> {
        let domain = domain.trim().to_ascii_lowercase();
        let now = Utc::now();

        let existing = sqlx::query_as::<_, RobotsTxtCacheRow>(
            "SELECT rules_json, crawl_delay, next_check_at
               FROM robots_txt_cache
              WHERE domain = $1",
        )
        .bind(&domain)
        .fetch_optional(self.pool)
        .await?;

        if let Some(row) = &existing {
            if row.next_check_at > now {
                let parsed: ParsedRobotsTxt = serde_json::from_str(&row.rules_json)
                    .unwrap_or_default();
                let delay = row.crawl_delay.unwrap_or(DEFAULT_CRAWL_DELAY_SECS);
                return Ok((parsed, delay));
            }
        }

        let body = fetch_robots_txt(&domain).await;
        let parsed = parse_robots_txt(&body);
        let delay = get_crawl_delay(&parsed);
        let blocked = is_ai_blocked(&parsed);
        let rules_json = serde_json::to_string(&parsed).unwrap_or_default();
        let next_check_at = now + ChronoDuration::hours(24);

        sqlx::query(
            "INSERT INTO robots_txt_cache (domain, raw_content, rules_json, crawl_delay, ai_blocked, fetched_at, next_check_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (domain) DO UPDATE SET
               raw_content = EXCLUDED.raw_content,
               rules_json = EXCLUDED.rules_json,
               crawl_delay = EXCLUDED.crawl_delay,
               ai_blocked = EXCLUDED.ai_blocked,
               fetched_at = EXCLUDED.fetched_at,
               next_check_at = EXCLUDED.next_check_at",
        )
        .bind(&domain)
        .bind(&body)
        .bind(&rules_json)
        .bind(delay)
        .bind(blocked)
        .bind(now)
        .bind(next_check_at)
        .execute(self.pool)
        .await?;

        Ok((parsed, delay))
    }

    /// Parses `url`'s hostname and returns `(allowed, crawl_delay_seconds)`.
    /// An unparseable or empty hostname is treated as disallowed.
    pub async fn check_url_allowed(&self, url: &str) -> anyhow::Result<(bool, f64)> {
        let Ok(parsed_url) = url::Url::parse(url) else {
            return Ok((false, DEFAULT_CRAWL_DELAY_SECS));
        };
        let Some(host) = parsed_url.host_str() else {
            return Ok((false, DEFAULT_CRAWL_DELAY_SECS));
        };
        if host.is_empty() {
            return Ok((false, DEFAULT_CRAWL_DELAY_SECS));
        }

        let (parsed, delay) = self.get_robots_rules(host).await?;
        let allowed = is_path_allowed(&parsed, parsed_url.path());
        Ok((allowed, delay))
    }
}

async fn fetch_robots_txt(domain: &str) -> String {
    let url = format!("https://{domain}/robots.txt");
    match HTTP_CLIENT.get(&url).send().await {
        Ok(resp) if resp.status().is_success() => resp.text().await.unwrap_or_default(),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_basic_groups_and_delay() {
        let txt = "\
User-agent: *\n\
Disallow: /private\n\
Allow: /private/open\n\
Crawl-delay: 2.5\n\
";
        let parsed = parse_robots_txt(txt);
        assert!(is_path_allowed(&parsed, "/"));
        assert!(!is_path_allowed(&parsed, "/private/index.html"));
        assert!(is_path_allowed(&parsed, "/private/open/file"));
        assert_eq!(get_crawl_delay(&parsed), 2.5);
    }

    #[test]
    fn agent_specificity_prefers_longest_match() {
        let txt = "\
User-agent: gptbot\n\
Disallow: /blocked\n\
\n\
User-agent: *\n\
Allow: /\n\
";
        let parsed = parse_robots_txt(txt);
        assert!(!is_path_allowed(&parsed, "/blocked/page"));
    }

    #[test]
    fn ai_input_false_blocks_everything() {
        let txt = "\
# ai-input: no\n\
User-agent: *\n\
Allow: /\n\
";
        let parsed = parse_robots_txt(txt);
        assert!(!is_path_allowed(&parsed, "/anything"));
        assert!(is_ai_blocked(&parsed));
    }

    #[test]
    fn glob_star_and_dollar_anchor() {
        let txt = "\
User-agent: *\n\
Disallow: /private/*/secret$\n\
";
        let parsed = parse_robots_txt(txt);
        assert!(!is_path_allowed(&parsed, "/private/foo/secret"));
        assert!(is_path_allowed(&parsed, "/private/foo/secret/more"));
    }

    #[test]
    fn default_crawl_delay_is_ten_seconds() {
        let parsed = parse_robots_txt("User-agent: *\nAllow: /\n");
        assert_eq!(get_crawl_delay(&parsed), 10.0);
    }

    #[test]
    fn repeated_user_agent_after_rules_starts_new_group() {
        let txt = "\
User-agent: a\n\
Disallow: /x\n\
User-agent: a\n\
Allow: /y\n\
";
        let parsed = parse_robots_txt(txt);
        assert_eq!(parsed.groups.len(), 2);
    }

    #[test]
    fn equal_length_rule_tie_favors_disallow_regardless_of_order() {
        let disallow_first = "\
User-agent: *\n\
Disallow: /x\n\
Allow: /x\n\
";
        let parsed = parse_robots_txt(disallow_first);
        assert!(!is_path_allowed(&parsed, "/x"));

        let allow_first = "\
User-agent: *\n\
Allow: /x\n\
Disallow: /x\n\
";
        let parsed = parse_robots_txt(allow_first);
        assert!(!is_path_allowed(&parsed, "/x"));
    }
}
