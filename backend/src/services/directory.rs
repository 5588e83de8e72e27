//! Directory reads: the paginated identity listing and the identity view.
//!
//! Every identity handed back to a client goes through [`IdentityView`]:
//! `mentor` only when set, `mentees` only when non-empty, never a password.

use serde::Serialize;
use sqlx::SqliteConnection;

use crate::auth::{authorize, Operation};
use crate::config::PaginationConfig;
use crate::database::models::{Identity, IdentityId, IdentitySummary, Page};
use crate::database::{queries, IdentityStore};
use crate::errors::{ServiceError, ServiceResult};

/// Detail view of one identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentityView {
    pub id: IdentityId,
    pub username: String,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mentor: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub mentees: Vec<String>,
}

/// Builds the view of `identity`, resolving mentor and mentee usernames
/// through `conn` so it sees the same snapshot as the caller.
pub async fn identity_view(
    conn: &mut SqliteConnection,
    identity: Identity,
) -> ServiceResult<IdentityView> {
    let mentor = match identity.mentor_id {
        Some(mentor_id) => queries::find_identity(conn, mentor_id)
            .await?
            .map(|mentor| mentor.username),
        None => None,
    };
    let mentees = queries::mentee_usernames(conn, identity.id).await?;

    Ok(IdentityView {
        id: identity.id,
        username: identity.username,
        email: identity.email,
        phone_number: identity.phone_number,
        mentor,
        mentees,
    })
}

#[derive(Clone)]
pub struct DirectoryService {
    store: IdentityStore,
    pagination: PaginationConfig,
}

impl DirectoryService {
    pub fn new(store: IdentityStore, pagination: PaginationConfig) -> Self {
        Self { store, pagination }
    }

    /// One page of `{id, username, is_mentor}` in creation order.
    pub async fn list(
        &self,
        caller: Option<IdentityId>,
        page: Option<u32>,
        page_size: Option<u32>,
    ) -> ServiceResult<Page<IdentitySummary>> {
        authorize(caller, Operation::ListIdentities)?;

        let page_size = page_size.unwrap_or(self.pagination.default_page_size);
        if page_size == 0 || page_size > self.pagination.max_page_size {
            return Err(ServiceError::invalid(
                "page_size",
                format!(
                    "page_size must be between 1 and {}",
                    self.pagination.max_page_size
                ),
            ));
        }
        self.store.list_all(page.unwrap_or(1), page_size).await
    }

    pub async fn detail(&self, caller: Option<IdentityId>, id: IdentityId) -> ServiceResult<IdentityView> {
        authorize(caller, Operation::ReadIdentity(id))?;

        let mut tx = self.store.database().begin().await?;
        let identity = queries::get_identity(&mut tx, id).await?;
        let view = identity_view(&mut tx, identity).await?;
        tx.commit().await?;
        Ok(view)
    }
}
