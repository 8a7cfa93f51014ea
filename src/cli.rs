//! Command-line interface for tierdispatch
//!
//! Provides argument parsing and subcommand handling for the tierdispatch binary.

use clap::{Parser, Subcommand};

/// Tiered request dispatcher for hosted LLM providers
#[derive(Parser)]
#[command(name = "tierdispatch")]
#[command(version)]
#[command(about = "Tiered request dispatcher for hosted LLM providers")]
#[command(
    long_about = "tierdispatch queues generation requests by plan priority, rate-limits \
    them, routes each to a free, pro or enterprise backend tier and retries with \
    provider failover. Repeated prompts are served from a similarity cache."
)]
pub struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml", global = true)]
    pub config: String,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the HTTP server (default)
    Serve,
    /// Generate a template configuration file
    Config {
        /// Output file path (prints to stdout if not specified)
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Load and validate the configuration file, then exit
    Check,
}

/// Generate template configuration content
pub fn generate_config_template() -> &'static str {
    r#"# tierdispatch Configuration
# ==========================
#
# HTTP server, rate limiter, retry policy, response cache, providers and
# backend tiers.

# ─────────────────────────────────────────────────────────────────────────────
# SERVER
# ─────────────────────────────────────────────────────────────────────────────

[server]
# IP address to bind to (0.0.0.0 for all interfaces, 127.0.0.1 for localhost only)
host = "0.0.0.0"
port = 3000

# Upper bound for a whole generate request, queue wait included (1-300)
request_timeout_seconds = 120

# ─────────────────────────────────────────────────────────────────────────────
# RATE LIMITER
# ─────────────────────────────────────────────────────────────────────────────
#
# Sliding one-second window. Up to max_requests_per_second + burst_allowance
# admissions per window, at most max_concurrent in flight.

[limiter]
max_requests_per_second = 10
max_concurrent = 5
cooldown_ms = 1000
burst_allowance = 2
# A request waiting longer than this for a slot fails with a rate-limit error
admission_timeout_ms = 30000

# ─────────────────────────────────────────────────────────────────────────────
# RETRY
# ─────────────────────────────────────────────────────────────────────────────
#
# Attempts alternate between a tier's primary and fallback provider. Delay
# before attempt n+1 is min(initial * multiplier^(n-1), max) + random jitter.

[retry]
max_retries = 3
initial_delay_ms = 1000
max_delay_ms = 10000
backoff_multiplier = 2.0
jitter_ms = 500

# ─────────────────────────────────────────────────────────────────────────────
# RESPONSE CACHE
# ─────────────────────────────────────────────────────────────────────────────

[cache]
enabled = true
ttl_seconds = 3600
# Minimum Jaccard similarity between prompt token sets for a cache hit
similarity_threshold = 0.7
# Subscription plan whose capacity below sizes the cache (free, pro, enterprise)
plan = "free"

# Maximum entries, chosen by the operator's subscription plan
[cache.capacity]
free = 50
pro = 200
enterprise = 500

# ─────────────────────────────────────────────────────────────────────────────
# QUEUE
# ─────────────────────────────────────────────────────────────────────────────

[queue]
# Dispatch loops draining the priority queue; each holds one limiter slot
workers = 1

# ─────────────────────────────────────────────────────────────────────────────
# PROVIDERS
# ─────────────────────────────────────────────────────────────────────────────
#
# OpenAI-compatible HTTP APIs. base_url is the API root; requests are sent to
# {base_url}/chat/completions. The API key is read from api_key_env.

[[providers]]
name = "groq"
base_url = "https://api.groq.com/openai/v1"
api_key_env = "GROQ_API_KEY"
timeout_seconds = 60

[[providers]]
name = "openrouter"
base_url = "https://openrouter.ai/api/v1"
api_key_env = "OPENROUTER_API_KEY"
timeout_seconds = 90

# ─────────────────────────────────────────────────────────────────────────────
# TIERS
# ─────────────────────────────────────────────────────────────────────────────
#
# A plan may use its own tier and every tier below it. The free tier is the
# fallback for every plan and must exist.
#
#   - endpoint: primary provider name
#   - default_model: model used when nothing more specific applies
#   - models: further model ids this tier serves
#   - cost_per_request: added to cost-to-date on every provider call
#   - max_requests_per_day: daily quota (omit for unlimited)
#   - fallback_endpoint / fallback_model: used on alternate retry attempts

[[tiers]]
id = "free"
endpoint = "groq"
default_model = "llama-3.1-8b-instant"
cost_per_request = 0.0
max_requests_per_day = 1000
fallback_endpoint = "openrouter"
fallback_model = "meta-llama/llama-3.1-8b-instruct:free"

[[tiers]]
id = "pro"
endpoint = "groq"
default_model = "llama-3.3-70b-versatile"
models = ["deepseek-r1-distill-llama-70b", "qwen-2.5-coder-32b", "llama-3.1-8b-instant"]
cost_per_request = 0.002
max_requests_per_day = 5000
fallback_endpoint = "openrouter"

[[tiers]]
id = "enterprise"
endpoint = "openrouter"
default_model = "gpt-4o"
models = ["deepseek-r1", "claude-3-5-sonnet", "gpt-4o-mini"]
cost_per_request = 0.01
fallback_endpoint = "groq"
fallback_model = "llama-3.3-70b-versatile"

# ─────────────────────────────────────────────────────────────────────────────
# SMART ROUTING
# ─────────────────────────────────────────────────────────────────────────────
#
# Pro and enterprise requests pick a model by task type (reasoning, design,
# code, research, chat). Entries here override the built-in table.

[routing]
smart_routing = true

[routing.pro]
code = "qwen-2.5-coder-32b"

[routing.enterprise]
research = "gpt-4o"

# ─────────────────────────────────────────────────────────────────────────────
# OBSERVABILITY
# ─────────────────────────────────────────────────────────────────────────────

[observability]
# trace, debug, info, warn, error (RUST_LOG takes precedence)
log_level = "info"
"#
}
