//! Pure routing of a task description to an assistant CLI, plus the shell
//! command builders the Supervisor uses to spawn it.

use crate::agent::AgentType;
use regex::Regex;

/// Category a rule routes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Deep,
    Visual,
    Code,
    Git,
    Local,
    Research,
    Quick,
}

impl Category {
    fn as_str(self) -> &'static str {
        match self {
            Category::Deep => "deep",
            Category::Visual => "visual",
            Category::Code => "code",
            Category::Git => "git",
            Category::Local => "local",
            Category::Research => "research",
            Category::Quick => "quick",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Result of [`route_task`].
#[derive(Debug, Clone)]
pub struct RouteResult {
    pub cli: AgentType,
    pub category: Category,
    pub rationale: String,
    pub confidence: f64,
}

struct Rule {
    keywords: &'static [(&'static str, f64)],
    cli: AgentType,
    category: Category,
    rationale: &'static str,
}

/// Build the fixed, ordered rule table. Constructed fresh per call: routing
/// is not a hot path, so there's no need to cache compiled regexes behind a
/// lazy static.
fn rules() -> Vec<Rule> {
    vec![
        Rule {
            keywords: &[
                ("architect", 3.0),
                ("plan", 2.0),
                ("refactor", 2.0),
                ("why", 1.0),
                ("how does", 1.0),
                ("system design", 3.0),
                ("debug", 2.0),
            ],
            cli: AgentType::Claude,
            category: Category::Deep,
            rationale: "deep reasoning task",
        },
        Rule {
            keywords: &[
                ("frontend", 3.0),
                ("\\bui\\b", 2.0),
                ("css", 2.0),
                ("react", 2.0),
                ("tailwind", 2.0),
                ("layout", 2.0),
                ("style", 1.0),
                ("design", 1.0),
            ],
            cli: AgentType::Gemini,
            category: Category::Visual,
            rationale: "visual/frontend task",
        },
        Rule {
            keywords: &[
                ("complete", 2.0),
                ("boilerplate", 3.0),
                ("scaffold", 3.0),
                ("snippet", 2.0),
                ("\\btest\\b", 2.0),
            ],
            cli: AgentType::Codex,
            category: Category::Code,
            rationale: "code generation task",
        },
        Rule {
            keywords: &[
                ("commit", 2.0),
                ("\\bpr\\b", 2.0),
                ("github", 2.0),
                ("branch", 2.0),
                ("merge", 2.0),
            ],
            cli: AgentType::Copilot,
            category: Category::Git,
            rationale: "git/github task",
        },
        Rule {
            keywords: &[
                ("private", 3.0),
                ("offline", 3.0),
                ("confidential", 3.0),
                ("sensitive", 3.0),
            ],
            cli: AgentType::Llm,
            category: Category::Local,
            rationale: "local/private task",
        },
        Rule {
            keywords: &[("docs", 2.0), ("explain", 2.0), ("what is", 1.0)],
            cli: AgentType::Qwen,
            category: Category::Research,
            rationale: "research/explanation task",
        },
    ]
}

/// Route a task description to a CLI. If `preferred_cli` is provided,
/// short-circuits with `confidence=1.0` and a category derived from the CLI.
pub fn route_task(goal: &str, preferred_cli: Option<AgentType>) -> RouteResult {
    if let Some(cli) = preferred_cli {
        return RouteResult {
            cli,
            category: default_category_for(cli),
            rationale: "explicit preference".to_string(),
            confidence: 1.0,
        };
    }

    let mut best: Option<(usize, f64, f64)> = None; // (rule index, matched weight, rule total weight)
    for (index, rule) in rules().iter().enumerate() {
        let mut matched = 0.0;
        let mut total = 0.0;
        for (pattern, weight) in rule.keywords {
            total += weight;
            let re = Regex::new(&format!("(?i){}", pattern)).expect("router pattern is valid");
            if re.is_match(goal) {
                matched += weight;
            }
        }
        if matched > 0.0 {
            let is_better = match best {
                None => true,
                Some((_, best_matched, _)) => matched > best_matched,
            };
            if is_better {
                best = Some((index, matched, total));
            }
        }
    }

    match best {
        Some((index, matched, total)) => {
            let rule = &rules()[index];
            RouteResult {
                cli: rule.cli,
                category: rule.category,
                rationale: rule.rationale.to_string(),
                confidence: (matched / total).min(1.0),
            }
        }
        None => RouteResult {
            cli: AgentType::Claude,
            category: Category::Deep,
            rationale: "default".to_string(),
            confidence: 0.5,
        },
    }
}

fn default_category_for(cli: AgentType) -> Category {
    match cli {
        AgentType::Gemini => Category::Visual,
        AgentType::Codex => Category::Code,
        AgentType::Copilot => Category::Git,
        AgentType::Llm => Category::Local,
        AgentType::Qwen => Category::Quick,
        AgentType::Claude => Category::Deep,
    }
}

/// Target shell platform, parameterized so quoting logic is testable
/// without `cfg(target_os)` gating.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Posix,
    Windows,
}

pub fn current_platform() -> Platform {
    if cfg!(windows) {
        Platform::Windows
    } else {
        Platform::Posix
    }
}

/// Single-quote `value` for the given shell, collapsing internal newlines
/// to spaces first.
fn shell_quote(value: &str, platform: Platform) -> String {
    let collapsed = value.replace(['\n', '\r'], " ");
    match platform {
        Platform::Posix => {
            let escaped = collapsed.replace('\'', "'\"'\"'");
            format!("'{}'", escaped)
        }
        Platform::Windows => {
            let escaped = collapsed.replace('\'', "''");
            format!("'{}'", escaped)
        }
    }
}

/// Build a shell-safe, single-quoted one-line command for `cli`.
pub fn build_one_shot_command(cli: AgentType, goal: &str, platform: Platform) -> String {
    format!("{} -p {}", cli.command(), shell_quote(goal, platform))
}

/// Spawn spec for an interactive PTY: `{cmd, args, cwd}`.
#[derive(Debug, Clone)]
pub struct SpawnSpec {
    pub cmd: String,
    pub args: Vec<String>,
    pub cwd: String,
}

pub fn build_spawn_spec(cli: AgentType, cwd: &str, platform: Platform) -> SpawnSpec {
    let shell = match platform {
        Platform::Posix => "/bin/sh",
        Platform::Windows => "cmd.exe",
    };
    let shell_flag = match platform {
        Platform::Posix => "-c",
        Platform::Windows => "/C",
    };
    SpawnSpec {
        cmd: shell.to_string(),
        args: vec![shell_flag.to_string(), cli.command().to_string()],
        cwd: cwd.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn routes_deep_keywords_to_claude() {
        let result = route_task("please architect a new subsystem", None);
        assert_eq!(result.cli, AgentType::Claude);
        assert_eq!(result.category, Category::Deep);
    }

    #[test]
    fn routes_visual_keywords_to_gemini() {
        let result = route_task("fix the css layout on the frontend", None);
        assert_eq!(result.cli, AgentType::Gemini);
        assert_eq!(result.category, Category::Visual);
    }

    #[test]
    fn debug_routes_to_deep() {
        let result = route_task("help me debug this crash", None);
        assert_eq!(result.category, Category::Deep);
    }

    #[test]
    fn test_keyword_routes_to_code() {
        let result = route_task("write a test for this function", None);
        assert_eq!(result.category, Category::Code);
    }

    #[test]
    fn unmatched_goal_returns_default() {
        let result = route_task("zzz qqq wibble", None);
        assert_eq!(result.cli, AgentType::Claude);
        assert_eq!(result.category, Category::Deep);
        assert_eq!(result.rationale, "default");
        assert_eq!(result.confidence, 0.5);
    }

    #[test]
    fn preferred_cli_short_circuits() {
        let result = route_task("anything at all", Some(AgentType::Codex));
        assert_eq!(result.cli, AgentType::Codex);
        assert_eq!(result.category, Category::Code);
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn confidence_never_exceeds_one() {
        let result = route_task("architect architect architect plan refactor why", None);
        assert!(result.confidence <= 1.0);
    }

    #[test]
    fn posix_quoting_escapes_single_quotes() {
        let quoted = shell_quote("it's a test", Platform::Posix);
        assert_eq!(quoted, "'it'\"'\"'s a test'");
    }

    #[test]
    fn windows_quoting_doubles_single_quotes() {
        let quoted = shell_quote("it's a test", Platform::Windows);
        assert_eq!(quoted, "'it''s a test'");
    }

    #[test]
    fn one_shot_command_collapses_newlines() {
        let command = build_one_shot_command(AgentType::Claude, "line one\nline two", Platform::Posix);
        assert!(!command.contains('\n'));
    }

    proptest::proptest! {
        #[test]
        fn routing_is_deterministic(goal in ".*") {
            let first = route_task(&goal, None);
            let second = route_task(&goal, None);
            prop_assert_eq!(first.cli, second.cli);
            prop_assert_eq!(first.category, second.category);
            prop_assert_eq!(first.confidence, second.confidence);
        }

        #[test]
        fn posix_quoted_string_has_no_bare_newlines(goal in ".*") {
            let quoted = shell_quote(&goal, Platform::Posix);
            prop_assert!(!quoted.contains('\n'));
        }
    }
}
