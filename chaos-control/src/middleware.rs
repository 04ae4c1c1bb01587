use axum::{extract::Request, middleware::Next, response::Response};

/// Header the fronting authenticator sets to the caller's email.
pub const IDENTITY_HEADER: &str = "x-chaos-user-email";

/// Caller identity as asserted by the fronting authenticator, if any.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActingIdentity(pub Option<String>);

impl ActingIdentity {
    pub fn as_deref(&self) -> Option<&str> {
        self.0.as_deref()
    }
}

/// Middleware: lift the identity header into a request extension.
///
/// Authentication happens upstream; a missing or unreadable header is treated
/// as an anonymous caller, never rejected.
pub async fn acting_identity(mut req: Request, next: Next) -> Response {
    let identity = req
        .headers()
        .get(IDENTITY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty());
    req.extensions_mut().insert(ActingIdentity(identity));
    next.run(req).await
}
