//! Primary/fallback provider alternation
//!
//! Odd attempts go to the primary provider, even attempts to the fallback.
//! When no fallback is configured an even attempt fails immediately with
//! `FallbackUnavailable`, so the retry loop moves on to the next (primary)
//! attempt instead of stalling. No provider is reached on such an attempt.

use crate::error::DispatchError;
use crate::providers::Provider;
use crate::router::TierId;
use std::sync::Arc;

/// Which side of the pair served an attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptRole {
    Primary,
    Fallback,
}

impl AttemptRole {
    pub fn for_attempt(attempt: u32) -> Self {
        if attempt % 2 == 1 {
            Self::Primary
        } else {
            Self::Fallback
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Fallback => "fallback",
        }
    }
}

/// Provider and model chosen for one attempt
#[derive(Clone)]
pub struct ProviderRoute<'a> {
    pub provider: &'a Arc<dyn Provider>,
    pub model: &'a str,
    pub role: AttemptRole,
}

/// Primary and optional fallback provider for one tier
#[derive(Clone)]
pub struct ProviderPair {
    tier: TierId,
    primary: Arc<dyn Provider>,
    primary_model: String,
    fallback: Option<(Arc<dyn Provider>, String)>,
}

impl std::fmt::Debug for ProviderPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderPair")
            .field("tier", &self.tier)
            .field("primary", &self.primary.name())
            .field("primary_model", &self.primary_model)
            .field(
                "fallback",
                &self.fallback.as_ref().map(|(p, m)| (p.name(), m.as_str())),
            )
            .finish()
    }
}

impl ProviderPair {
    pub fn new(tier: TierId, primary: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        Self {
            tier,
            primary,
            primary_model: model.into(),
            fallback: None,
        }
    }

    pub fn with_fallback(mut self, provider: Arc<dyn Provider>, model: impl Into<String>) -> Self {
        self.fallback = Some((provider, model.into()));
        self
    }

    pub fn tier(&self) -> TierId {
        self.tier
    }

    pub fn has_fallback(&self) -> bool {
        self.fallback.is_some()
    }

    /// Provider to call on a given 1-based attempt
    ///
    /// # Errors
    /// `FallbackUnavailable` on even attempts when no fallback is configured.
    pub fn for_attempt(&self, attempt: u32) -> Result<ProviderRoute<'_>, DispatchError> {
        match AttemptRole::for_attempt(attempt) {
            AttemptRole::Primary => Ok(ProviderRoute {
                provider: &self.primary,
                model: &self.primary_model,
                role: AttemptRole::Primary,
            }),
            AttemptRole::Fallback => match &self.fallback {
                Some((provider, model)) => Ok(ProviderRoute {
                    provider,
                    model,
                    role: AttemptRole::Fallback,
                }),
                None => Err(DispatchError::FallbackUnavailable { tier: self.tier }),
            },
        }
    }
}
