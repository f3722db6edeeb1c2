//! Cloud endpoints used by session operations
//!
//! Signup and password reset each exist in several historical variants that
//! differ only in path and parameter names. Each family is one enum so the
//! session manager has a single code path per operation and the deprecated
//! entry points are plain routing aliases.

use serde::Serialize;

use cloud_transport::{path_segment, ApiRequest};

use crate::error::AuthError;

/// OAuth token exchange endpoint
pub const TOKEN_PATH: &str = "/oauth/token";

/// Optional extended account information sent with signup
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AccountInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    pub business_account: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub company_name: Option<String>,
}

impl AccountInfo {
    pub fn validate(&self) -> Result<(), AuthError> {
        if self.business_account
            && self.company_name.as_deref().map_or(true, |name| name.trim().is_empty())
        {
            return Err(AuthError::InvalidAccountInfo(
                "business accounts require a company name".to_string(),
            ));
        }
        Ok(())
    }
}

/// Where a new account is created
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignupEndpoint {
    /// Developer account with extended account info
    User,
    /// Developer account, original username/password-only form
    LegacyUser,
    /// Customer of a product
    Customer { product_id: u32 },
    /// Customer of an organization (superseded by product customers)
    OrgCustomer { org_slug: String },
}

impl SignupEndpoint {
    pub fn path(&self) -> String {
        match self {
            SignupEndpoint::User | SignupEndpoint::LegacyUser => "/v1/users".to_string(),
            SignupEndpoint::Customer { product_id } => format!("/v1/products/{product_id}/customers"),
            SignupEndpoint::OrgCustomer { org_slug } => format!("/v1/orgs/{}/customers", path_segment(org_slug)),
        }
    }

    /// Build the signup request; account info is dropped by the legacy variant
    pub fn request(
        &self,
        username: &str,
        password: &str,
        account_info: Option<&AccountInfo>,
    ) -> Result<ApiRequest, AuthError> {
        let login_field = match self {
            SignupEndpoint::User | SignupEndpoint::LegacyUser => "username",
            SignupEndpoint::Customer { .. } | SignupEndpoint::OrgCustomer { .. } => "email",
        };

        let mut request = ApiRequest::post(self.path())
            .param(login_field, username)
            .param("password", password);

        let sends_account_info = !matches!(
            self,
            SignupEndpoint::LegacyUser | SignupEndpoint::OrgCustomer { .. }
        );
        if let (true, Some(info)) = (sends_account_info, account_info) {
            let encoded = serde_json::to_string(info)
                .map_err(|e| AuthError::InvalidAccountInfo(e.to_string()))?;
            request = request.param("account_info", encoded);
        }

        Ok(request)
    }

    /// Customer endpoints authenticate as the OAuth client
    pub fn uses_client_credentials(&self) -> bool {
        matches!(
            self,
            SignupEndpoint::Customer { .. } | SignupEndpoint::OrgCustomer { .. }
        )
    }
}

/// Where a password reset email is requested
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasswordResetEndpoint {
    User,
    Customer { product_id: u32 },
    OrgCustomer { org_slug: String },
}

impl PasswordResetEndpoint {
    pub fn request(&self, email: &str) -> ApiRequest {
        match self {
            PasswordResetEndpoint::User => {
                ApiRequest::post("/v1/user/password-reset").param("username", email)
            }
            PasswordResetEndpoint::Customer { product_id } => {
                ApiRequest::post(format!("/v1/products/{product_id}/customers/reset_password"))
                    .param("email", email)
            }
            PasswordResetEndpoint::OrgCustomer { org_slug } => {
                ApiRequest::post(format!("/v1/orgs/{}/customers/reset_password", path_segment(org_slug)))
                    .param("email", email)
            }
        }
    }
}
