//! Account endpoints: profile updates, checkout and subscription.

use reqwest::Method;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::api::client::{ApiClient, Auth};
use crate::error::AppError;
use crate::session::{Plan, Subscription, UserProfile};

/// Partial profile update. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(rename = "photoURL", skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
}

impl ProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.display_name.is_none() && self.photo_url.is_none()
    }
}

#[derive(Serialize)]
struct CheckoutRequest {
    plan: Plan,
}

/// Hosted checkout page to redirect the user to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CheckoutSession {
    pub checkout_url: String,
    pub session_id: String,
}

impl ApiClient {
    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<UserProfile, AppError> {
        if update.is_empty() {
            return Err(AppError::Validation {
                field: "profile".to_string(),
                message: "Nothing to update".to_string(),
            });
        }
        self.send_for_data(Method::PUT, "/api/user/profile", Some(update), Auth::Bearer)
            .await
    }

    pub async fn create_checkout_session(&self, plan: Plan) -> Result<CheckoutSession, AppError> {
        let session: CheckoutSession = self
            .send_for_data(
                Method::POST,
                "/api/payments/checkout",
                Some(&CheckoutRequest { plan }),
                Auth::Bearer,
            )
            .await?;
        info!("[API] Checkout session created for plan {}", plan);
        Ok(session)
    }

    /// Returns `None` when the user has no subscription.
    pub async fn get_subscription(&self) -> Result<Option<Subscription>, AppError> {
        let envelope = self
            .send::<(), Subscription>(Method::GET, "/api/payments/subscription", None, Auth::Bearer)
            .await?;
        Ok(envelope.data)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
