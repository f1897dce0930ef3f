//! Caller identity extracted from request headers.
//!
//! The storefront backend authenticates shoppers and forwards their id in
//! `X-User-ID`; requests without it are guest checkouts. Admin console calls
//! carry `X-Caller-Role: admin`. These headers are trusted only because the
//! service is reachable from the storefront backend alone.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use service_core::error::AppError;

use crate::models::AccessScope;

pub const USER_ID_HEADER: &str = "X-User-ID";
pub const CALLER_ROLE_HEADER: &str = "X-Caller-Role";

#[derive(Debug, Clone, Default)]
pub struct CallerContext {
    /// `None` for guest checkout.
    pub user_id: Option<String>,
    pub is_admin: bool,
}

impl CallerContext {
    /// Scope for shopper-facing operations: own rows or guest rows only.
    pub fn customer_scope(&self) -> AccessScope {
        match &self.user_id {
            Some(user_id) => AccessScope::Customer(user_id.clone()),
            None => AccessScope::Guest,
        }
    }

    /// Like [`customer_scope`](Self::customer_scope), elevated for admins.
    pub fn scope(&self) -> AccessScope {
        if self.is_admin {
            AccessScope::Service
        } else {
            self.customer_scope()
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for CallerContext
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let user_id = match parts.headers.get(USER_ID_HEADER) {
            Some(value) => {
                let value = value.to_str().map_err(|_| {
                    AppError::BadRequest(anyhow::anyhow!("Invalid {} header", USER_ID_HEADER))
                })?;
                let value = value.trim();
                (!value.is_empty()).then(|| value.to_string())
            }
            None => None,
        };

        let is_admin = parts
            .headers
            .get(CALLER_ROLE_HEADER)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|role| role.eq_ignore_ascii_case("admin"));

        let span = tracing::Span::current();
        if let Some(ref uid) = user_id {
            span.record("user_id", uid.as_str());
        }

        Ok(CallerContext { user_id, is_admin })
    }
}
