//! Core business logic for the authentication system.
//!
//! This service handles account creation, credential checks and the session
//! token lifecycle, orchestrating the credential service, token service and
//! identity store.

use validator::Validate;

use super::errors::LoginError;
use super::middleware::{authorize, Operation};
use super::models::{LoginRequest, RegisterRequest};
use super::password::CredentialService;
use super::tokens::{TokenPair, TokenService};
use crate::database::models::{Identity, NewIdentity};
use crate::database::IdentityStore;
use crate::errors::{ServiceError, ServiceResult};

#[derive(Clone)]
pub struct AuthService {
    store: IdentityStore,
    credentials: CredentialService,
    tokens: TokenService,
}

impl AuthService {
    pub fn new(store: IdentityStore, credentials: CredentialService, tokens: TokenService) -> Self {
        Self {
            store,
            credentials,
            tokens,
        }
    }

    /// Creates an identity with no mentor and no mentees.
    #[tracing::instrument(skip_all, fields(username = %request.username))]
    pub async fn register(&self, request: RegisterRequest) -> ServiceResult<Identity> {
        authorize(None, Operation::Register)?;
        let request = request.normalized();
        request.validate()?;

        let password_hash = self.credentials.hash_blocking(request.password).await?;
        let identity = self
            .store
            .create(NewIdentity {
                username: request.username,
                password_hash,
                email: request.email,
                phone_number: request.phone_number,
            })
            .await?;

        tracing::info!(id = identity.id, "user registered");
        Ok(identity)
    }

    #[tracing::instrument(skip_all, fields(username = %request.username))]
    pub async fn login(&self, request: LoginRequest) -> ServiceResult<TokenPair> {
        authorize(None, Operation::Login)?;
        request.validate()?;

        let identity = match self.store.find_by_username(&request.username).await {
            Ok(identity) => identity,
            Err(ServiceError::NotFound(_)) => {
                self.credentials
                    .verify_unknown_blocking(request.password)
                    .await?;
                tracing::warn!("login for unknown username");
                return Err(LoginError::BadCredentials.into());
            }
            Err(err) => return Err(err),
        };

        let matches = self
            .credentials
            .verify_blocking(request.password, identity.password_hash)
            .await?;
        if !matches {
            tracing::warn!(id = identity.id, "login with wrong password");
            return Err(LoginError::BadCredentials.into());
        }

        let pair = self.tokens.issue_pair(identity.id)?;
        tracing::info!(id = identity.id, "user logged in");
        Ok(pair)
    }

    pub async fn refresh(&self, refresh_token: &str) -> ServiceResult<TokenPair> {
        authorize(None, Operation::Refresh)?;
        self.tokens.refresh(refresh_token).await
    }

    pub async fn logout(&self, refresh_token: &str) -> ServiceResult<()> {
        authorize(None, Operation::Logout)?;
        self.tokens.revoke(refresh_token).await
    }
}
