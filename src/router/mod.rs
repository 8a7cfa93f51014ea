//! Tier routing for tierdispatch
//!
//! Holds the request classification types (plan, complexity, task type), the
//! tier identifiers and the [`TierRouter`] that maps a classified request to
//! a tier and a concrete model id under the subscription-plan policy.

pub mod models;
pub mod tier;

pub use models::{ModelTable, builtin_model};
pub use tier::{ModelChoice, ModelSource, TierQuotaSnapshot, TierRouter};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Backend tier identifier
///
/// Tiers are ordered by cost: `Free < Pro < Enterprise`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TierId {
    Free,
    Pro,
    Enterprise,
}

impl TierId {
    /// All tiers, cheapest first
    pub const ALL: [TierId; 3] = [TierId::Free, TierId::Pro, TierId::Enterprise];

    /// Convert to string representation for logging and metrics labels
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Pro => "pro",
            Self::Enterprise => "enterprise",
        }
    }
}

impl fmt::Display for TierId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller's subscription plan, already resolved by the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    #[default]
    Free,
    Pro,
    Enterprise,
}

impl Plan {
    /// Highest tier this plan may ever be routed to
    pub fn max_tier(&self) -> TierId {
        match self {
            Self::Free => TierId::Free,
            Self::Pro => TierId::Pro,
            Self::Enterprise => TierId::Enterprise,
        }
    }

    /// Whether the plan may use the given tier at all
    pub fn allows(&self, tier: TierId) -> bool {
        tier <= self.max_tier()
    }

    /// Queue priority used when the caller does not supply one
    pub fn default_priority(&self) -> i32 {
        match self {
            Self::Free => 0,
            Self::Pro => 5,
            Self::Enterprise => 10,
        }
    }

    /// Whether smart (task-type based) model routing applies to this plan
    pub fn is_elevated(&self) -> bool {
        !matches!(self, Self::Free)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Free => "free",
            Self::Pro => "pro",
            Self::Enterprise => "enterprise",
        }
    }
}

/// Estimated task complexity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    #[default]
    Light,
    Medium,
    Heavy,
}

impl Complexity {
    /// Estimate complexity from the prompt text
    ///
    /// Long prompts or prompts asking for whole systems are heavy; moderately
    /// long prompts or multi-step asks are medium; everything else is light.
    pub fn estimate(prompt: &str) -> Self {
        const HEAVY_MARKERS: &[&str] = &[
            "architecture",
            "full application",
            "entire",
            "end-to-end",
            "complete system",
            "comprehensive",
        ];
        const MEDIUM_MARKERS: &[&str] = &[
            "step by step",
            "explain",
            "compare",
            "refactor",
            "analyze",
            "analyse",
        ];

        let lower = prompt.to_lowercase();
        let chars = prompt.chars().count();

        if chars > 2_000 || HEAVY_MARKERS.iter().any(|m| lower.contains(m)) {
            Self::Heavy
        } else if chars > 500 || MEDIUM_MARKERS.iter().any(|m| lower.contains(m)) {
            Self::Medium
        } else {
            Self::Light
        }
    }

    /// Whether this complexity justifies escalating above the free tier
    pub fn wants_escalation(&self) -> bool {
        matches!(self, Self::Medium | Self::Heavy)
    }
}

/// Classified task type used for smart model routing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskType {
    Reasoning,
    Design,
    Code,
    Research,
    #[default]
    Chat,
}

impl TaskType {
    pub const ALL: [TaskType; 5] = [
        TaskType::Reasoning,
        TaskType::Design,
        TaskType::Code,
        TaskType::Research,
        TaskType::Chat,
    ];

    /// Keyword classification of a prompt
    ///
    /// Rules are checked in order: code, design, reasoning, research. Prompts
    /// matching none of them are chat.
    pub fn classify(prompt: &str) -> Self {
        const CODE: &[&str] = &[
            "code", "function", "bug", "compile", "implement", "script", "api", "sql", "regex",
            "python", "rust", "javascript", "typescript", "kode",
        ];
        const DESIGN: &[&str] = &[
            "design", "layout", "ui", "ux", "navbar", "component", "landing page", "css",
            "mockup", "desain",
        ];
        const REASONING: &[&str] = &[
            "why", "prove", "solve", "calculate", "logic", "reason", "math", "derive", "mengapa",
        ];
        const RESEARCH: &[&str] = &[
            "research", "summarize", "summarise", "sources", "compare", "history", "overview",
            "riset",
        ];

        let lower = prompt.to_lowercase();
        let words: Vec<&str> = lower
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
            .collect();
        let hit = |keywords: &[&str]| {
            keywords.iter().any(|k| {
                if k.contains(' ') {
                    lower.contains(k)
                } else {
                    words.contains(k)
                }
            })
        };

        if hit(CODE) {
            Self::Code
        } else if hit(DESIGN) {
            Self::Design
        } else if hit(REASONING) {
            Self::Reasoning
        } else if hit(RESEARCH) {
            Self::Research
        } else {
            Self::Chat
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reasoning => "reasoning",
            Self::Design => "design",
            Self::Code => "code",
            Self::Research => "research",
            Self::Chat => "chat",
        }
    }
}
