//! Database query functions (Data Access Objects).
//!
//! The free functions take a `&mut SqliteConnection` so callers can compose
//! several of them inside one transaction. [`IdentityStore`] wraps them for
//! callers that need a single self-contained operation.

use sqlx::SqliteConnection;

use super::models::{
    Identity, IdentityId, IdentitySummary, NewIdentity, Page, RevocationReason, RevokedToken,
};
use super::Database;
use crate::errors::{FieldErrors, ServiceError, ServiceResult};
use crate::validation;

#[derive(sqlx::FromRow)]
struct SummaryRow {
    id: IdentityId,
    username: String,
    mentee_count: i64,
}

impl From<SummaryRow> for IdentitySummary {
    fn from(row: SummaryRow) -> Self {
        Self {
            id: row.id,
            username: row.username,
            is_mentor: row.mentee_count > 0,
        }
    }
}

/// Re-checks the store invariants on a username / email / phone triple.
pub fn check_identity_fields(
    username: &str,
    email: Option<&str>,
    phone_number: Option<&str>,
) -> ServiceResult<()> {
    let mut errors = FieldErrors::default();
    if let Err(err) = validation::validate_username(username) {
        errors.push("username", validation::message_of(&err));
    }
    if let Some(Err(err)) = email.map(validation::validate_email) {
        errors.push("email", validation::message_of(&err));
    }
    if let Some(Err(err)) = phone_number.map(validation::validate_phone_number) {
        errors.push("phone_number", validation::message_of(&err));
    }
    errors.into_result()
}

pub async fn insert_identity(
    conn: &mut SqliteConnection,
    new: &NewIdentity,
    now: i64,
) -> ServiceResult<Identity> {
    check_identity_fields(
        &new.username,
        new.email.as_deref(),
        new.phone_number.as_deref(),
    )?;

    let identity = sqlx::query_as::<_, Identity>(
        r#"
        INSERT INTO identities (username, password_hash, email, phone_number, mentor_id, created_at)
        VALUES (?, ?, ?, ?, NULL, ?)
        RETURNING id, username, password_hash, email, phone_number, mentor_id, created_at
        "#,
    )
    .bind(&new.username)
    .bind(&new.password_hash)
    .bind(&new.email)
    .bind(&new.phone_number)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;

    Ok(identity)
}

pub async fn find_identity(
    conn: &mut SqliteConnection,
    id: IdentityId,
) -> ServiceResult<Option<Identity>> {
    let identity = sqlx::query_as::<_, Identity>(
        "SELECT id, username, password_hash, email, phone_number, mentor_id, created_at \
         FROM identities WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(identity)
}

pub async fn get_identity(conn: &mut SqliteConnection, id: IdentityId) -> ServiceResult<Identity> {
    find_identity(conn, id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("user {} not found", id)))
}

pub async fn find_by_username(
    conn: &mut SqliteConnection,
    username: &str,
) -> ServiceResult<Option<Identity>> {
    let identity = sqlx::query_as::<_, Identity>(
        "SELECT id, username, password_hash, email, phone_number, mentor_id, created_at \
         FROM identities WHERE username = ?",
    )
    .bind(username)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(identity)
}

pub async fn exists(conn: &mut SqliteConnection, id: IdentityId) -> ServiceResult<bool> {
    let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM identities WHERE id = ?")
        .bind(id)
        .fetch_optional(&mut *conn)
        .await?;
    Ok(found.is_some())
}

pub async fn count_identities(conn: &mut SqliteConnection) -> ServiceResult<i64> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM identities")
        .fetch_one(&mut *conn)
        .await?;
    Ok(count)
}

/// Summaries in primary key order.
pub async fn list_summaries(
    conn: &mut SqliteConnection,
    limit: i64,
    offset: i64,
) -> ServiceResult<Vec<IdentitySummary>> {
    let rows = sqlx::query_as::<_, SummaryRow>(
        r#"
        SELECT i.id, i.username,
               (SELECT COUNT(*) FROM identities m WHERE m.mentor_id = i.id) AS mentee_count
        FROM identities i
        ORDER BY i.id
        LIMIT ? OFFSET ?
        "#,
    )
    .bind(limit)
    .bind(offset)
    .fetch_all(&mut *conn)
    .await?;
    Ok(rows.into_iter().map(IdentitySummary::from).collect())
}

/// Usernames of everyone whose mentor is `id`, in primary key order.
pub async fn mentee_usernames(
    conn: &mut SqliteConnection,
    id: IdentityId,
) -> ServiceResult<Vec<String>> {
    let names = sqlx::query_scalar::<_, String>(
        "SELECT username FROM identities WHERE mentor_id = ? ORDER BY id",
    )
    .bind(id)
    .fetch_all(&mut *conn)
    .await?;
    Ok(names)
}

/// Writes every mutable column of `identity` back to its row.
pub async fn save_identity(conn: &mut SqliteConnection, identity: &Identity) -> ServiceResult<()> {
    check_identity_fields(
        &identity.username,
        identity.email.as_deref(),
        identity.phone_number.as_deref(),
    )?;
    if identity.mentor_id == Some(identity.id) {
        return Err(ServiceError::invalid("mentor", "a user cannot be their own mentor"));
    }

    let result = sqlx::query(
        r#"
        UPDATE identities
        SET username = ?, password_hash = ?, email = ?, phone_number = ?, mentor_id = ?
        WHERE id = ?
        "#,
    )
    .bind(&identity.username)
    .bind(&identity.password_hash)
    .bind(&identity.email)
    .bind(&identity.phone_number)
    .bind(identity.mentor_id)
    .bind(identity.id)
    .execute(&mut *conn)
    .await?;

    if result.rows_affected() == 0 {
        return Err(ServiceError::NotFound(format!("user {} not found", identity.id)));
    }
    Ok(())
}

/// Points `id` at `mentor`, or clears its mentor. No cycle check.
pub async fn set_mentor(
    conn: &mut SqliteConnection,
    id: IdentityId,
    mentor: Option<IdentityId>,
) -> ServiceResult<()> {
    if let Some(mentor_id) = mentor {
        if mentor_id == id {
            return Err(ServiceError::invalid("mentor", "a user cannot be their own mentor"));
        }
        if !exists(conn, mentor_id).await? {
            return Err(ServiceError::invalid("mentor", "mentor not found"));
        }
    }

    let result = sqlx::query("UPDATE identities SET mentor_id = ? WHERE id = ?")
        .bind(mentor)
        .bind(id)
        .execute(&mut *conn)
        .await?;
    if result.rows_affected() == 0 {
        return Err(ServiceError::NotFound(format!("user {} not found", id)));
    }
    Ok(())
}

/// Makes `mentees` exactly the set of identities mentored by `mentor_id`.
///
/// Former mentees absent from the new set get their mentor cleared. Identities
/// mentored by someone else are only touched if they appear in `mentees`.
pub async fn replace_mentees(
    conn: &mut SqliteConnection,
    mentor_id: IdentityId,
    mentees: &[IdentityId],
) -> ServiceResult<()> {
    if mentees.contains(&mentor_id) {
        return Err(ServiceError::invalid("mentees", "a user cannot be their own mentee"));
    }
    if !exists(conn, mentor_id).await? {
        return Err(ServiceError::NotFound(format!("user {} not found", mentor_id)));
    }

    sqlx::query("UPDATE identities SET mentor_id = NULL WHERE mentor_id = ?")
        .bind(mentor_id)
        .execute(&mut *conn)
        .await?;

    for mentee in mentees {
        let result = sqlx::query("UPDATE identities SET mentor_id = ? WHERE id = ?")
            .bind(mentor_id)
            .bind(mentee)
            .execute(&mut *conn)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ServiceError::invalid("mentees", format!("user {} not found", mentee)));
        }
    }
    Ok(())
}

/// Records `token_id` as unusable. Returns `false` if it already was.
pub async fn insert_revocation(
    conn: &mut SqliteConnection,
    token_id: &str,
    subject_id: IdentityId,
    reason: RevocationReason,
    revoked_at: i64,
    expires_at: i64,
) -> ServiceResult<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO revoked_tokens (token_id, subject_id, reason, revoked_at, expires_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT (token_id) DO NOTHING
        "#,
    )
    .bind(token_id)
    .bind(subject_id)
    .bind(reason)
    .bind(revoked_at)
    .bind(expires_at)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn find_revocation(
    conn: &mut SqliteConnection,
    token_id: &str,
) -> ServiceResult<Option<RevokedToken>> {
    let record = sqlx::query_as::<_, RevokedToken>(
        "SELECT token_id, subject_id, reason, revoked_at, expires_at \
         FROM revoked_tokens WHERE token_id = ?",
    )
    .bind(token_id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(record)
}

/// Deletes records whose token expired before `cutoff`.
pub async fn purge_revocations(conn: &mut SqliteConnection, cutoff: i64) -> ServiceResult<u64> {
    let result = sqlx::query("DELETE FROM revoked_tokens WHERE expires_at < ?")
        .bind(cutoff)
        .execute(&mut *conn)
        .await?;
    Ok(result.rows_affected())
}

/// Page bookkeeping for a 1-based `page` over `count` rows.
pub(crate) fn page_bounds(page: u32, page_size: u32, count: i64) -> ServiceResult<(i64, i64)> {
    if page == 0 {
        return Err(ServiceError::invalid("page", "page must be a positive integer"));
    }
    if page_size == 0 {
        return Err(ServiceError::invalid("page_size", "page_size must be a positive integer"));
    }
    let limit = i64::from(page_size);
    let offset = i64::from(page - 1) * limit;
    if page > 1 && offset >= count {
        return Err(ServiceError::NotFound("invalid page".to_string()));
    }
    Ok((limit, offset))
}

/// Identity Store: the identity table plus the mentor relation.
#[derive(Clone, Debug)]
pub struct IdentityStore {
    db: Database,
}

impl IdentityStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub async fn create(&self, new: NewIdentity) -> ServiceResult<Identity> {
        let mut conn = self.db.acquire().await?;
        let identity = insert_identity(&mut conn, &new, chrono::Utc::now().timestamp()).await?;
        tracing::debug!(id = identity.id, username = %identity.username, "identity created");
        Ok(identity)
    }

    pub async fn get(&self, id: IdentityId) -> ServiceResult<Identity> {
        let mut conn = self.db.acquire().await?;
        get_identity(&mut conn, id).await
    }

    pub async fn find_by_username(&self, username: &str) -> ServiceResult<Identity> {
        let mut conn = self.db.acquire().await?;
        find_by_username(&mut conn, username)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("user '{}' not found", username)))
    }

    pub async fn list_all(&self, page: u32, page_size: u32) -> ServiceResult<Page<IdentitySummary>> {
        let mut tx = self.db.begin().await?;
        let count = count_identities(&mut tx).await?;
        let (limit, offset) = page_bounds(page, page_size, count)?;
        let results = list_summaries(&mut tx, limit, offset).await?;
        tx.commit().await?;

        Ok(Page {
            count,
            next: (offset + limit < count).then_some(page + 1),
            previous: (page > 1).then(|| page - 1),
            results,
        })
    }

    pub async fn mentees_of(&self, id: IdentityId) -> ServiceResult<Vec<String>> {
        let mut conn = self.db.acquire().await?;
        mentee_usernames(&mut conn, id).await
    }

    pub async fn set_mentor(&self, id: IdentityId, mentor: Option<IdentityId>) -> ServiceResult<()> {
        let mut tx = self.db.begin().await?;
        set_mentor(&mut tx, id, mentor).await?;
        tx.commit().await?;
        Ok(())
    }

    pub async fn replace_mentees(
        &self,
        id: IdentityId,
        mentees: &[IdentityId],
    ) -> ServiceResult<()> {
        let mut tx = self.db.begin().await?;
        replace_mentees(&mut tx, id, mentees).await?;
        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;

    async fn store() -> IdentityStore {
        let db = Database::connect(&DatabaseConfig::in_memory())
            .await
            .expect("in-memory database");
        IdentityStore::new(db)
    }

    fn new_identity(username: &str) -> NewIdentity {
        NewIdentity {
            username: username.to_string(),
            password_hash: format!("hash-of-{}", username),
            email: None,
            phone_number: None,
        }
    }

    #[tokio::test]
    async fn create_and_lookup() {
        let store = store().await;
        let alice = store.create(new_identity("alice")).await.unwrap();

        assert_eq!(store.get(alice.id).await.unwrap(), alice);
        assert_eq!(store.find_by_username("alice").await.unwrap().id, alice.id);
        assert_eq!(alice.mentor_id, None);
        assert!(matches!(
            store.find_by_username("nobody").await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(store.get(999).await, Err(ServiceError::NotFound(_))));
    }

    #[tokio::test]
    async fn duplicate_username_conflicts() {
        let store = store().await;
        store.create(new_identity("alice")).await.unwrap();
        let err = store.create(new_identity("alice")).await.unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));
    }

    #[tokio::test]
    async fn invalid_phone_rejected_on_create() {
        let store = store().await;
        let mut new = new_identity("alice");
        new.phone_number = Some("12-34".to_string());
        let err = store.create(new).await.unwrap_err();
        match err {
            ServiceError::Validation(fields) => assert!(fields.get("phone_number").is_some()),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn set_mentor_rejects_self_and_unknown() {
        let store = store().await;
        let alice = store.create(new_identity("alice")).await.unwrap();
        let bob = store.create(new_identity("bob")).await.unwrap();

        assert!(matches!(
            store.set_mentor(alice.id, Some(alice.id)).await,
            Err(ServiceError::Validation(_))
        ));
        assert!(matches!(
            store.set_mentor(alice.id, Some(4242)).await,
            Err(ServiceError::Validation(_))
        ));

        store.set_mentor(alice.id, Some(bob.id)).await.unwrap();
        assert_eq!(store.get(alice.id).await.unwrap().mentor_id, Some(bob.id));
        assert_eq!(store.get(bob.id).await.unwrap().mentor_id, None);

        store.set_mentor(alice.id, None).await.unwrap();
        assert_eq!(store.get(alice.id).await.unwrap().mentor_id, None);
    }

    #[tokio::test]
    async fn mentor_cycles_are_permitted() {
        let store = store().await;
        let alice = store.create(new_identity("alice")).await.unwrap();
        let bob = store.create(new_identity("bob")).await.unwrap();

        store.set_mentor(alice.id, Some(bob.id)).await.unwrap();
        store.set_mentor(bob.id, Some(alice.id)).await.unwrap();

        assert_eq!(store.get(alice.id).await.unwrap().mentor_id, Some(bob.id));
        assert_eq!(store.get(bob.id).await.unwrap().mentor_id, Some(alice.id));
    }

    #[tokio::test]
    async fn replace_mentees_is_a_full_replace() {
        let store = store().await;
        let a = store.create(new_identity("a")).await.unwrap();
        let b = store.create(new_identity("b")).await.unwrap();
        let c = store.create(new_identity("c")).await.unwrap();
        let d = store.create(new_identity("d")).await.unwrap();
        let e = store.create(new_identity("e")).await.unwrap();
        let other = store.create(new_identity("other")).await.unwrap();

        store.replace_mentees(a.id, &[d.id]).await.unwrap();
        store.set_mentor(e.id, Some(other.id)).await.unwrap();

        store.replace_mentees(a.id, &[b.id, c.id]).await.unwrap();

        assert_eq!(store.find_by_username("b").await.unwrap().mentor_id, Some(a.id));
        assert_eq!(store.find_by_username("c").await.unwrap().mentor_id, Some(a.id));
        assert_eq!(store.find_by_username("d").await.unwrap().mentor_id, None);
        assert_eq!(store.find_by_username("e").await.unwrap().mentor_id, Some(other.id));
        assert_eq!(store.mentees_of(a.id).await.unwrap(), vec!["b", "c"]);

        store.replace_mentees(a.id, &[]).await.unwrap();
        assert!(store.mentees_of(a.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn replace_mentees_rejects_self() {
        let store = store().await;
        let a = store.create(new_identity("a")).await.unwrap();
        let b = store.create(new_identity("b")).await.unwrap();
        store.replace_mentees(a.id, &[b.id]).await.unwrap();

        let err = store.replace_mentees(a.id, &[a.id]).await.unwrap_err();
        assert!(matches!(err, ServiceError::Validation(_)));
        // rolled back: b still mentored by a
        assert_eq!(store.get(b.id).await.unwrap().mentor_id, Some(a.id));
    }

    #[tokio::test]
    async fn list_all_paginates_in_creation_order() {
        let store = store().await;
        let mentor = store.create(new_identity("u0")).await.unwrap();
        for i in 1..5 {
            store.create(new_identity(&format!("u{}", i))).await.unwrap();
        }
        let u1 = store.find_by_username("u1").await.unwrap();
        store.set_mentor(u1.id, Some(mentor.id)).await.unwrap();

        let first = store.list_all(1, 2).await.unwrap();
        assert_eq!(first.count, 5);
        assert_eq!(first.next, Some(2));
        assert_eq!(first.previous, None);
        let names: Vec<_> = first.results.iter().map(|s| s.username.as_str()).collect();
        assert_eq!(names, vec!["u0", "u1"]);
        assert!(first.results[0].is_mentor);
        assert!(!first.results[1].is_mentor);

        let last = store.list_all(3, 2).await.unwrap();
        assert_eq!(last.results.len(), 1);
        assert_eq!(last.next, None);
        assert_eq!(last.previous, Some(2));

        assert!(matches!(store.list_all(4, 2).await, Err(ServiceError::NotFound(_))));
        assert!(matches!(store.list_all(0, 2).await, Err(ServiceError::Validation(_))));
    }

    #[tokio::test]
    async fn empty_directory_has_a_first_page() {
        let store = store().await;
        let page = store.list_all(1, 20).await.unwrap();
        assert_eq!(page.count, 0);
        assert!(page.results.is_empty());
        assert_eq!(page.next, None);
    }

    #[tokio::test]
    async fn revocations_insert_once_and_purge() {
        let store = store().await;
        let mut conn = store.database().acquire().await.unwrap();

        assert!(insert_revocation(&mut conn, "jti-1", 1, RevocationReason::Logout, 10, 100)
            .await
            .unwrap());
        assert!(!insert_revocation(&mut conn, "jti-1", 1, RevocationReason::Rotated, 11, 100)
            .await
            .unwrap());

        let record = find_revocation(&mut conn, "jti-1").await.unwrap().unwrap();
        assert_eq!(record.reason, RevocationReason::Logout);

        assert_eq!(purge_revocations(&mut conn, 100).await.unwrap(), 0);
        assert_eq!(purge_revocations(&mut conn, 101).await.unwrap(), 1);
        assert!(find_revocation(&mut conn, "jti-1").await.unwrap().is_none());
    }
}
