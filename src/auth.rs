use uuid::Uuid;

use crate::domain::order::OrderError;

// ============================================================================
// Authorization - consumed decision, no credential checking here
// ============================================================================
//
// The transport layer verifies the caller (tokens, sessions) and hands over
// a `RequestContext`. Administrative lifecycle operations take an
// `AdminGrant`, which only `authorize` can produce, so a call site cannot
// reach them without the gate having said yes.
//
// ============================================================================

#[derive(Debug, Clone)]
pub struct RequestContext {
    pub request_id: Uuid,
    /// Identity asserted by the transport layer, if any
    pub principal: Option<String>,
    /// Raw bearer credential, passed through untouched for the gate
    pub credential: Option<String>,
}

impl RequestContext {
    pub fn anonymous() -> Self {
        Self {
            request_id: Uuid::now_v7(),
            principal: None,
            credential: None,
        }
    }

    pub fn with_credential(principal: impl Into<String>, credential: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::now_v7(),
            principal: Some(principal.into()),
            credential: Some(credential.into()),
        }
    }
}

/// "Is this caller allowed to administer orders?"
pub trait AuthorizationGate: Send + Sync {
    fn is_authorized(&self, ctx: &RequestContext) -> bool;
}

impl<F> AuthorizationGate for F
where
    F: Fn(&RequestContext) -> bool + Send + Sync,
{
    fn is_authorized(&self, ctx: &RequestContext) -> bool {
        self(ctx)
    }
}

/// Proof that the gate approved a request.
#[derive(Debug, Clone)]
pub struct AdminGrant {
    principal: Option<String>,
    request_id: Uuid,
}

impl AdminGrant {
    pub fn principal(&self) -> Option<&str> {
        self.principal.as_deref()
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }
}

pub fn authorize(gate: &dyn AuthorizationGate, ctx: &RequestContext) -> Result<AdminGrant, OrderError> {
    if !gate.is_authorized(ctx) {
        tracing::warn!(
            request_id = %ctx.request_id,
            principal = ?ctx.principal,
            "Administrative request refused"
        );
        return Err(OrderError::Unauthorized);
    }

    Ok(AdminGrant {
        principal: ctx.principal.clone(),
        request_id: ctx.request_id,
    })
}

#[cfg(test)]
pub(crate) fn test_grant() -> AdminGrant {
    AdminGrant {
        principal: Some("test-admin".to_string()),
        request_id: Uuid::now_v7(),
    }
}
