//! Session data: user profile, subscription and the in-memory session.

use std::fmt;

use chrono::{DateTime, Utc};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Plan / SubscriptionStatus
// ─────────────────────────────────────────────────────────────────────────────

/// Purchasable credit plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Starter,
    Pro,
    Enterprise,
}

impl Plan {
    pub const ALL: [Plan; 3] = [Plan::Starter, Plan::Pro, Plan::Enterprise];

    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Starter => "starter",
            Plan::Pro => "pro",
            Plan::Enterprise => "enterprise",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
    }

    /// Credits granted when the plan's checkout completes.
    pub fn credits(&self) -> u32 {
        match self {
            Plan::Starter => 10,
            Plan::Pro => 50,
            Plan::Enterprise => 200,
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Active,
    Canceled,
    PastDue,
    Unpaid,
}

// ─────────────────────────────────────────────────────────────────────────────
// UserProfile
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    pub id: String,
    pub status: SubscriptionStatus,
    pub plan: Plan,
    pub current_period_end: DateTime<Utc>,
    #[serde(default)]
    pub cancel_at_period_end: bool,
}

/// Server-side user record. `credits` is the authoritative balance at the
/// time of the fetch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, rename = "photoURL", skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    #[serde(default)]
    pub credits: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription: Option<Subscription>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

impl UserProfile {
    /// Display name, falling back to the email address.
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .filter(|n| !n.trim().is_empty())
            .unwrap_or(&self.email)
    }

    pub fn plan(&self) -> Option<Plan> {
        self.subscription.as_ref().map(|s| s.plan)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

/// An authenticated session held in memory.
///
/// The credit balance lives in `profile.credits` and is adjusted locally
/// after submissions until the next profile sync.
#[derive(Clone)]
pub struct Session {
    pub token: SecretString,
    pub token_issued_at: DateTime<Utc>,
    pub profile: UserProfile,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("token", &"[REDACTED]")
            .field("token_issued_at", &self.token_issued_at)
            .field("user_id", &self.profile.id)
            .field("credits", &self.profile.credits)
            .finish()
    }
}

impl Session {
    pub fn user_id(&self) -> &str {
        &self.profile.id
    }

    pub fn credit_balance(&self) -> u32 {
        self.profile.credits
    }
}

/// Read-only view of the session for display. Carries no token.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub user_id: String,
    pub email: String,
    pub display_name: Option<String>,
    pub credit_balance: u32,
    pub subscription_plan: Option<Plan>,
    pub token_issued_at: DateTime<Utc>,
    pub optimistic: bool,
}

impl SessionSnapshot {
    pub(crate) fn of(session: &Session, optimistic: bool) -> Self {
        Self {
            user_id: session.profile.id.clone(),
            email: session.profile.email.clone(),
            display_name: session.profile.display_name.clone(),
            credit_balance: session.profile.credits,
            subscription_plan: session.profile.plan(),
            token_issued_at: session.token_issued_at,
            optimistic,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
