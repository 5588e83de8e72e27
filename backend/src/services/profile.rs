//! Partial updates of a single identity, applied by its owner.
//!
//! Argon2 work happens before the write transaction opens. Everything else,
//! including mentor and mentee resolution, runs inside one transaction so a
//! failed update leaves the row and its mentees untouched.

use std::collections::BTreeSet;

use serde::{Deserialize, Deserializer};
use sqlx::SqliteConnection;

use super::directory::{identity_view, IdentityView};
use crate::auth::{authorize, CredentialService, Operation};
use crate::database::models::{Identity, IdentityId};
use crate::database::{queries, IdentityStore};
use crate::errors::{FieldErrors, ServiceError, ServiceResult};
use crate::validation;

/// Body of `PUT`/`PATCH users/{id}`. Absent fields are left alone.
///
/// For the nullable fields an explicit `null` is distinct from absence:
/// `Some(None)` clears the value, `None` leaves it as is.
#[derive(Debug, Default, Clone, Deserialize)]
#[serde(default)]
pub struct ProfileUpdate {
    pub username: Option<String>,
    #[serde(deserialize_with = "present")]
    pub email: Option<Option<String>>,
    #[serde(deserialize_with = "present")]
    pub phone_number: Option<Option<String>>,
    #[serde(deserialize_with = "present")]
    pub mentor: Option<Option<String>>,
    pub mentees: Option<Vec<String>>,
    pub old_password: Option<String>,
    pub new_password: Option<String>,
}

fn present<'de, D, T>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

impl ProfileUpdate {
    /// Format checks that need no store access.
    fn check_fields(&self) -> FieldErrors {
        let mut errors = FieldErrors::default();

        if let Some(username) = &self.username {
            if let Err(err) = validation::validate_username(username) {
                errors.push("username", validation::message_of(&err));
            }
        }
        if let Some(email) = validation::non_blank(self.email.clone().flatten()) {
            if let Err(err) = validation::validate_email(&email) {
                errors.push("email", validation::message_of(&err));
            }
        }
        if let Some(phone) = validation::non_blank(self.phone_number.clone().flatten()) {
            if let Err(err) = validation::validate_phone_number(&phone) {
                errors.push("phone_number", validation::message_of(&err));
            }
        }
        match (&self.new_password, &self.old_password) {
            (Some(new), _) if new.is_empty() => {
                errors.push("new_password", "this field may not be blank");
            }
            (Some(_), None) => errors.push("old_password", "old_password is required"),
            _ => {}
        }
        errors
    }
}

/// Resolves `usernames` to ids, dropping the ones that match no identity.
///
/// Order of first appearance is kept and duplicates are collapsed.
pub async fn resolve_best_effort(
    conn: &mut SqliteConnection,
    usernames: &[String],
) -> ServiceResult<Vec<IdentityId>> {
    let mut seen = BTreeSet::new();
    let mut resolved = Vec::with_capacity(usernames.len());
    for username in usernames {
        match queries::find_by_username(conn, username).await? {
            Some(identity) => {
                if seen.insert(identity.id) {
                    resolved.push(identity.id);
                }
            }
            None => tracing::debug!(%username, "dropping unknown mentee"),
        }
    }
    Ok(resolved)
}

#[derive(Clone)]
pub struct ProfileUpdateEngine {
    store: IdentityStore,
    credentials: CredentialService,
}

impl ProfileUpdateEngine {
    pub fn new(store: IdentityStore, credentials: CredentialService) -> Self {
        Self { store, credentials }
    }

    /// Guard checks for an update of `target`, in order: caller present,
    /// target exists, caller owns target. Returns the target as stored.
    pub async fn check_access(
        &self,
        caller: Option<IdentityId>,
        target: IdentityId,
    ) -> ServiceResult<Identity> {
        if caller.is_none() {
            return Err(ServiceError::unauthenticated());
        }
        let identity = self.store.get(target).await?;
        authorize(caller, Operation::UpdateIdentity(target))?;
        Ok(identity)
    }

    #[tracing::instrument(skip(self, update))]
    pub async fn apply(
        &self,
        caller: Option<IdentityId>,
        target: IdentityId,
        update: ProfileUpdate,
    ) -> ServiceResult<IdentityView> {
        let snapshot = self.check_access(caller, target).await?;

        let mut errors = update.check_fields();

        let mut new_hash = None;
        if let (Some(new_password), Some(old_password)) =
            (update.new_password.clone(), update.old_password.clone())
        {
            if errors.is_empty() {
                let matches = self
                    .credentials
                    .verify_blocking(old_password, snapshot.password_hash.clone())
                    .await?;
                if matches {
                    new_hash = Some(self.credentials.hash_blocking(new_password).await?);
                } else {
                    errors.push("old_password", "old password incorrect");
                }
            }
        }
        errors.into_result()?;

        let mut tx = self.store.database().begin().await?;
        let mut identity = queries::get_identity(&mut tx, target).await?;

        if let Some(hash) = new_hash {
            if identity.password_hash != snapshot.password_hash {
                return Err(ServiceError::Unavailable(
                    "password changed concurrently, retry the request".to_string(),
                ));
            }
            identity.password_hash = hash;
        }

        if let Some(username) = update.username {
            if username != identity.username {
                if let Some(holder) = queries::find_by_username(&mut tx, &username).await? {
                    if holder.id != identity.id {
                        return Err(ServiceError::Conflict("username already taken".to_string()));
                    }
                }
                identity.username = username;
            }
        }
        if let Some(email) = update.email {
            identity.email = validation::non_blank(email);
        }
        if let Some(phone_number) = update.phone_number {
            identity.phone_number = validation::non_blank(phone_number);
        }

        if let Some(mentor) = update.mentor {
            identity.mentor_id = match validation::non_blank(mentor) {
                None => None,
                Some(name) => {
                    let mentor = queries::find_by_username(&mut tx, &name)
                        .await?
                        .ok_or_else(|| ServiceError::invalid("mentor", "mentor not found"))?;
                    if mentor.id == identity.id {
                        return Err(ServiceError::invalid(
                            "mentor",
                            "a user cannot be their own mentor",
                        ));
                    }
                    Some(mentor.id)
                }
            };
        }

        queries::save_identity(&mut tx, &identity).await?;

        if let Some(mentees) = update.mentees {
            let ids = resolve_best_effort(&mut tx, &mentees).await?;
            queries::replace_mentees(&mut tx, identity.id, &ids).await?;
        }

        let view = identity_view(&mut tx, identity).await?;
        tx.commit().await?;

        tracing::info!(id = target, "profile updated");
        Ok(view)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DatabaseConfig, PasswordConfig};
    use crate::database::models::NewIdentity;
    use crate::database::Database;

    struct Fixture {
        engine: ProfileUpdateEngine,
        store: IdentityStore,
        credentials: CredentialService,
    }

    async fn fixture() -> Fixture {
        let db = Database::connect(&DatabaseConfig::in_memory()).await.unwrap();
        let store = IdentityStore::new(db);
        let credentials = CredentialService::new(&PasswordConfig::minimal()).unwrap();
        Fixture {
            engine: ProfileUpdateEngine::new(store.clone(), credentials.clone()),
            store,
            credentials,
        }
    }

    impl Fixture {
        async fn create(&self, username: &str, password: &str) -> Identity {
            self.store
                .create(NewIdentity {
                    username: username.to_string(),
                    password_hash: self.credentials.hash(password).unwrap(),
                    email: None,
                    phone_number: None,
                })
                .await
                .unwrap()
        }
    }

    fn parse(body: serde_json::Value) -> ProfileUpdate {
        serde_json::from_value(body).unwrap()
    }

    #[test]
    fn null_and_absent_are_distinct() {
        let update = parse(serde_json::json!({"mentor": null, "unknown": 1}));
        assert_eq!(update.mentor, Some(None));
        assert_eq!(update.email, None);

        let update = parse(serde_json::json!({"email": "a@example.com"}));
        assert_eq!(update.email, Some(Some("a@example.com".to_string())));
    }

    #[tokio::test]
    async fn sets_mentor_by_username() {
        let f = fixture().await;
        let alice = f.create("alice", "pw1").await;
        let bob = f.create("bob", "pw2").await;

        let view = f
            .engine
            .apply(Some(alice.id), alice.id, parse(serde_json::json!({"mentor": "bob"})))
            .await
            .unwrap();
        assert_eq!(view.mentor.as_deref(), Some("bob"));
        assert_eq!(f.store.mentees_of(bob.id).await.unwrap(), vec!["alice"]);

        let view = f
            .engine
            .apply(Some(alice.id), alice.id, parse(serde_json::json!({"mentor": ""})))
            .await
            .unwrap();
        assert_eq!(view.mentor, None);
        assert_eq!(f.store.get(alice.id).await.unwrap().mentor_id, None);
    }

    #[tokio::test]
    async fn unknown_or_self_mentor_is_rejected() {
        let f = fixture().await;
        let alice = f.create("alice", "pw1").await;

        for mentor in ["nobody", "alice"] {
            let err = f
                .engine
                .apply(
                    Some(alice.id),
                    alice.id,
                    parse(serde_json::json!({"mentor": mentor, "email": "a@example.com"})),
                )
                .await
                .unwrap_err();
            assert!(matches!(err, ServiceError::Validation(_)), "{mentor}: {err:?}");
        }
        // nothing committed alongside the failed mentor
        assert_eq!(f.store.get(alice.id).await.unwrap().email, None);
    }

    #[tokio::test]
    async fn password_change_requires_matching_old_password() {
        let f = fixture().await;
        let alice = f.create("alice", "pw1").await;

        let missing = f
            .engine
            .apply(Some(alice.id), alice.id, parse(serde_json::json!({"new_password": "x"})))
            .await
            .unwrap_err();
        match missing {
            ServiceError::Validation(fields) => assert!(fields.get("old_password").is_some()),
            other => panic!("unexpected error: {other:?}"),
        }

        let wrong = f
            .engine
            .apply(
                Some(alice.id),
                alice.id,
                parse(serde_json::json!({"old_password": "wrong", "new_password": "x"})),
            )
            .await
            .unwrap_err();
        assert!(wrong.to_string().contains("old password incorrect"));
        let stored = f.store.get(alice.id).await.unwrap();
        assert!(f.credentials.verify("pw1", &stored.password_hash));

        f.engine
            .apply(
                Some(alice.id),
                alice.id,
                parse(serde_json::json!({"old_password": "pw1", "new_password": "pw9"})),
            )
            .await
            .unwrap();
        let stored = f.store.get(alice.id).await.unwrap();
        assert!(f.credentials.verify("pw9", &stored.password_hash));
        assert!(!f.credentials.verify("pw1", &stored.password_hash));
    }

    #[tokio::test]
    async fn mentees_replace_and_drop_unknown_names() {
        let f = fixture().await;
        let a = f.create("a", "pw").await;
        f.create("b", "pw").await;
        f.create("c", "pw").await;
        let d = f.create("d", "pw").await;
        f.store.replace_mentees(a.id, &[d.id]).await.unwrap();

        let view = f
            .engine
            .apply(
                Some(a.id),
                a.id,
                parse(serde_json::json!({"mentees": ["b", "ghost", "c", "b"]})),
            )
            .await
            .unwrap();
        assert_eq!(view.mentees, vec!["b", "c"]);
        assert_eq!(f.store.get(d.id).await.unwrap().mentor_id, None);

        let view = f
            .engine
            .apply(Some(a.id), a.id, parse(serde_json::json!({"mentees": []})))
            .await
            .unwrap();
        assert!(view.mentees.is_empty());
    }

    #[tokio::test]
    async fn fields_are_validated_and_assigned() {
        let f = fixture().await;
        let alice = f.create("alice", "pw").await;
        f.create("bob", "pw").await;

        let err = f
            .engine
            .apply(
                Some(alice.id),
                alice.id,
                parse(serde_json::json!({"phone_number": "12", "email": "nope"})),
            )
            .await
            .unwrap_err();
        match err {
            ServiceError::Validation(fields) => {
                assert!(fields.get("phone_number").is_some());
                assert!(fields.get("email").is_some());
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let err = f
            .engine
            .apply(Some(alice.id), alice.id, parse(serde_json::json!({"username": "bob"})))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Conflict(_)));

        let view = f
            .engine
            .apply(
                Some(alice.id),
                alice.id,
                parse(serde_json::json!({
                    "username": "alicia",
                    "email": "alicia@example.com",
                    "phone_number": "+2348012345678",
                })),
            )
            .await
            .unwrap();
        assert_eq!(view.username, "alicia");
        assert_eq!(view.email.as_deref(), Some("alicia@example.com"));
        assert_eq!(view.phone_number.as_deref(), Some("+2348012345678"));

        let view = f
            .engine
            .apply(Some(alice.id), alice.id, parse(serde_json::json!({"email": null})))
            .await
            .unwrap();
        assert_eq!(view.email, None);
        assert_eq!(view.phone_number.as_deref(), Some("+2348012345678"));
    }

    #[tokio::test]
    async fn guard_order() {
        let f = fixture().await;
        let alice = f.create("alice", "pw").await;
        let bob = f.create("bob", "pw").await;
        let update = || parse(serde_json::json!({"username": ""}));

        assert!(matches!(
            f.engine.apply(None, alice.id, update()).await,
            Err(ServiceError::Unauthenticated(_))
        ));
        assert!(matches!(
            f.engine.apply(Some(bob.id), 999, update()).await,
            Err(ServiceError::NotFound(_))
        ));
        assert!(matches!(
            f.engine.apply(Some(bob.id), alice.id, update()).await,
            Err(ServiceError::Forbidden(_))
        ));
        assert!(matches!(
            f.engine.apply(Some(alice.id), alice.id, update()).await,
            Err(ServiceError::Validation(_))
        ));
    }
}
