//! Session lifecycle: sign-in, token refresh, sign-out and credit balance.

mod model;
mod store;

pub use model::{Plan, Session, SessionSnapshot, Subscription, SubscriptionStatus, UserProfile};
pub use store::{
    AuthState, SessionEvent, SessionStore, SignOutReason, SignUpOutcome, DEFAULT_REFRESH_INTERVAL,
};

#[cfg(test)]
pub(crate) use store::tests as test_support;
