use std::sync::LazyLock;

use axum::{extract::FromRequestParts, http::request::Parts};
use regex::Regex;

use super::ApiError;
use crate::AppState;

static TENANT_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._:-]{0,127}$").unwrap());

/// Tenant scope taken from the header set by the upstream gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tenant(pub String);

impl Tenant {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

pub fn parse_tenant(value: Option<&str>, header: &str) -> Result<Tenant, ApiError> {
    let value = value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::Validation(format!("missing {header} header")))?;

    if !TENANT_ID.is_match(value) {
        return Err(ApiError::Validation(format!("malformed {header} header")));
    }
    Ok(Tenant(value.to_string()))
}

impl FromRequestParts<AppState> for Tenant {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = state.config.server.tenant_header.as_str();
        let value = match parts.headers.get(header) {
            Some(v) => Some(
                v.to_str()
                    .map_err(|_| ApiError::Validation(format!("malformed {header} header")))?,
            ),
            None => None,
        };
        parse_tenant(value, header)
    }
}
