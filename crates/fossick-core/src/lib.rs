//! Core domain model and scoring engine for Fossick.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "fossick-core";

/// Closed category set derived from keyword matching over aggregated text fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Web,
    Mobile,
    Ai,
    DevTools,
    Data,
    Game,
    Other,
}

impl Category {
    pub const ALL: [Category; 7] = [
        Category::Web,
        Category::Mobile,
        Category::Ai,
        Category::DevTools,
        Category::Data,
        Category::Game,
        Category::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Web => "web",
            Category::Mobile => "mobile",
            Category::Ai => "ai",
            Category::DevTools => "dev-tools",
            Category::Data => "data",
            Category::Game => "game",
            Category::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Option<Category> {
        Category::ALL.into_iter().find(|c| c.as_str() == value)
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical persisted repository representation. Immutable once fetched;
/// replaced wholesale whenever a refresh cycle re-observes the same ID.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repo {
    pub id: i64,
    pub name: String,
    pub full_name: String,
    pub owner_login: String,
    pub owner_avatar: String,
    pub html_url: String,
    pub description: String,
    pub language: String,
    pub topics: Vec<String>,
    #[serde(rename = "stargazers_count")]
    pub stargazers: i32,
    #[serde(rename = "forks_count")]
    pub forks: i32,
    pub pushed_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub idea_score: i32,
    pub category: Category,
    pub fetched_at: DateTime<Utc>,
}

/// Bounded 0-100 heuristic combining diminishing-returns popularity signals
/// with completeness signals. Log-scaling keeps a handful of very popular
/// repos from saturating the score on stars alone; the description and topic
/// bonuses reward repos that documented intent even without traction.
pub fn compute_idea_score(stars: i32, forks: i32, description: &str, topics: &[String]) -> i32 {
    let stars = f64::from(stars.max(0));
    let forks = f64::from(forks.max(0));
    let has_desc = if description.is_empty() { 0.0 } else { 10.0 };
    let desc_len = description.len().min(120) as f64;
    let has_topics = if topics.is_empty() { 0.0 } else { 5.0 };

    let score = (stars + 1.0).log2() * 8.0
        + (forks + 1.0).log2() * 4.0
        + has_desc
        + desc_len / 12.0
        + has_topics;

    (score.round() as i32).min(100)
}

/// One (category, word-boundary pattern) classification rule.
#[derive(Debug, Clone)]
pub struct CategoryRule {
    pub category: Category,
    pub pattern: Regex,
}

/// Ordered keyword classifier. Rules are evaluated top-to-bottom and the
/// first match wins, so the rule order is a deliberate priority: a repo
/// matching both web and ai vocabulary classifies as web.
#[derive(Debug, Clone)]
pub struct Classifier {
    rules: Vec<CategoryRule>,
}

const DEFAULT_RULES: [(Category, &str); 6] = [
    (
        Category::Web,
        r"\b(react|vue|angular|svelte|next|nuxt|web\s?app|frontend|dashboard|website|html|css|django|flask|rails|express)\b",
    ),
    (
        Category::Mobile,
        r"\b(ios|android|flutter|react.native|swift|kotlin|mobile)\b",
    ),
    (
        Category::Ai,
        r"\b(machine.learning|deep.learning|neural|nlp|gpt|llm|ai|ml|tensorflow|pytorch|model|transformer|diffusion)\b",
    ),
    (
        Category::DevTools,
        r"\b(cli|sdk|api|library|framework|plugin|extension|tool|linter|compiler|devtool|package)\b",
    ),
    (
        Category::Data,
        r"\b(data|analytics|scraper|crawler|etl|pipeline|database|visualization|chart)\b",
    ),
    (
        Category::Game,
        r"\b(game|unity|godot|phaser|rpg|puzzle|arcade|gameplay)\b",
    ),
];

impl Classifier {
    pub fn new(rules: Vec<CategoryRule>) -> Self {
        Self { rules }
    }

    /// Concatenates all text fields into one lowercased blob and tests the
    /// rules in order; no match falls through to `Category::Other`.
    pub fn classify(
        &self,
        name: &str,
        description: &str,
        topics: &[String],
        language: &str,
    ) -> Category {
        let text = format!("{name} {description} {} {language}", topics.join(" ")).to_lowercase();
        self.rules
            .iter()
            .find(|rule| rule.pattern.is_match(&text))
            .map(|rule| rule.category)
            .unwrap_or(Category::Other)
    }
}

impl Default for Classifier {
    fn default() -> Self {
        let rules = DEFAULT_RULES
            .into_iter()
            .map(|(category, pattern)| CategoryRule {
                category,
                pattern: Regex::new(pattern).expect("default category pattern compiles"),
            })
            .collect();
        Self::new(rules)
    }
}
