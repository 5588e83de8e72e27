//! Request and response shapes for the user directory endpoints.

use serde::{Deserialize, Serialize};

use crate::database::models::{IdentityId, IdentitySummary, Page};

pub use crate::services::{IdentityView, ProfileUpdate};

/// Query string of `GET users`.
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct UserSummary {
    pub id: IdentityId,
    pub username: String,
    pub is_mentor: bool,
}

impl From<IdentitySummary> for UserSummary {
    fn from(summary: IdentitySummary) -> Self {
        Self {
            id: summary.id,
            username: summary.username,
            is_mentor: summary.is_mentor,
        }
    }
}

/// One page of the directory. `next`/`previous` are page numbers.
#[derive(Debug, Serialize)]
pub struct UserListResponse {
    pub count: i64,
    pub next: Option<u32>,
    pub previous: Option<u32>,
    pub results: Vec<UserSummary>,
}

impl From<Page<IdentitySummary>> for UserListResponse {
    fn from(page: Page<IdentitySummary>) -> Self {
        Self {
            count: page.count,
            next: page.next,
            previous: page.previous,
            results: page.results.into_iter().map(UserSummary::from).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn list_response_shape() {
        let page = Page {
            count: 3,
            next: Some(2),
            previous: None,
            results: vec![IdentitySummary {
                id: 1,
                username: "alice".to_string(),
                is_mentor: true,
            }],
        };
        let json = serde_json::to_value(UserListResponse::from(page)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "count": 3,
                "next": 2,
                "previous": null,
                "results": [{"id": 1, "username": "alice", "is_mentor": true}],
            })
        );
    }
}
