//! User directory on top of any mutable store.
//!
//! Wraps a [`Mutator`] with the user-specific rules that must hold no
//! matter which backend is underneath: clear-text passwords are hashed
//! with Argon2 before they reach the store, the stored hash never appears
//! in default read output, and email lookup can opt into the hash for
//! credential checks.

use serde_json::Value;
use strata_query::{
    ConvertMode, Filter, FilterValue, Mutator, Page, QuerySpec, Record, RecordId, RecordShape,
    Result, SchemaDescriptor, StoreError,
};
use tracing::warn;

pub mod password;

/// Clear-text field accepted on create/edit input
pub const PASSWORD_FIELD: &str = "password";
/// Stored field holding the Argon2 hash
pub const HASH_FIELD: &str = "hashed_password";

/// Schema for a user collection
///
/// The instance shape excludes the stored hash, so default conversion
/// strips it from every read.
pub fn user_schema() -> SchemaDescriptor {
    let base = RecordShape::new(
        "user",
        ["email", "is_active", "is_superuser", "first_name", "last_name"],
    );
    let mut create = base.clone();
    create.name = "user_create".to_string();
    create.fields.push(PASSWORD_FIELD.to_string());
    let mut edit = create.clone();
    edit.name = "user_edit".to_string();
    let mut instance = base.clone();
    instance.name = "user_instance".to_string();
    SchemaDescriptor::new(base, create, edit, instance)
}

/// Instance shape plus the stored hash, for credential checks only
pub fn secret_shape() -> RecordShape {
    let mut shape = user_schema().instance;
    shape.name = "user_secret".to_string();
    shape.fields.push(HASH_FIELD.to_string());
    shape
}

/// User-aware wrapper around any mutable store
pub struct UserDirectory<C> {
    store: C,
}

impl<C: Mutator> UserDirectory<C> {
    pub fn new(store: C) -> Self {
        Self { store }
    }

    /// The wrapped store, for queries with no user-specific rules
    pub fn store(&self) -> &C {
        &self.store
    }

    /// Replace a clear-text `password` field with its stored hash
    fn hash_in_place(record: &mut Record) -> Result<()> {
        let clear = match record.remove(PASSWORD_FIELD) {
            Some(Value::String(s)) => s,
            Some(_) => {
                return Err(StoreError::invalid_operation(
                    "password must be a string",
                ))
            }
            None => return Ok(()),
        };
        record.insert(
            HASH_FIELD.to_string(),
            Value::from(password::hash_password(&clear)?),
        );
        Ok(())
    }

    pub async fn create_user(&self, mut input: Record) -> Result<Record> {
        Self::hash_in_place(&mut input)?;
        self.store.create(input).await
    }

    /// Partial edit; a `password` field in the patch rotates the hash
    pub async fn edit_user(&self, id: &RecordId, mut patch: Record) -> Result<Record> {
        Self::hash_in_place(&mut patch)?;
        self.store.edit(id, patch).await
    }

    pub async fn get_user(&self, id: &RecordId) -> Result<Record> {
        self.store.fetch_one(id, &ConvertMode::Default).await
    }

    pub async fn get_users(&self, spec: &QuerySpec) -> Result<Page> {
        self.store.fetch_page(spec).await
    }

    pub async fn delete_user(&self, id: &RecordId) -> Result<()> {
        self.store.delete(id).await
    }

    /// Look a user up by email; `include_password` widens the output to
    /// the secret shape carrying the stored hash
    pub async fn get_user_by_email(
        &self,
        email: &str,
        include_password: bool,
    ) -> Result<Option<Record>> {
        let filter = Filter::from([("email".to_string(), FilterValue::eq(email))]);
        let convert = if include_password {
            ConvertMode::As(secret_shape())
        } else {
            ConvertMode::Default
        };
        match self.store.fetch_first(&filter, None, &convert).await {
            Ok(user) => Ok(Some(user)),
            Err(StoreError::NotFound(_)) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Return the user with this input's email, creating it on first sight
    pub async fn get_or_create_user(&self, input: Record) -> Result<Record> {
        let email = input
            .get("email")
            .and_then(Value::as_str)
            .ok_or_else(|| StoreError::invalid_operation("input must carry an email"))?;
        match self.get_user_by_email(email, false).await? {
            Some(user) => Ok(user),
            None => self.create_user(input).await,
        }
    }

    /// Credential check; unknown users and hashless records both verify
    /// as false
    pub async fn verify_password(&self, email: &str, clear: &str) -> Result<bool> {
        let user = match self.get_user_by_email(email, true).await? {
            Some(user) => user,
            None => return Ok(false),
        };
        let stored = match user.get(HASH_FIELD).and_then(Value::as_str) {
            Some(hash) => hash,
            None => {
                warn!("user '{}' has no stored password hash", email);
                return Ok(false);
            }
        };
        Ok(password::verify_password(clear, stored))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use strata_embedded::EmbeddedAdapter;
    use strata_query::PageFetcher;

    fn user_input(email: &str) -> Record {
        let mut r = Record::new();
        r.insert("email".to_string(), json!(email));
        r.insert("is_active".to_string(), json!(true));
        r.insert("is_superuser".to_string(), json!(false));
        r.insert("first_name".to_string(), json!("Ada"));
        r.insert("last_name".to_string(), json!("Lovelace"));
        r.insert(PASSWORD_FIELD.to_string(), json!("hunter2"));
        r
    }

    fn directory() -> UserDirectory<EmbeddedAdapter> {
        UserDirectory::new(EmbeddedAdapter::new(user_schema()))
    }

    #[tokio::test]
    async fn create_hashes_and_hides_the_password() {
        let dir = directory();
        let created = dir.create_user(user_input("ada@example.com")).await.unwrap();
        assert!(created.get(PASSWORD_FIELD).is_none());
        assert!(created.get(HASH_FIELD).is_none());

        let secret = dir
            .get_user_by_email("ada@example.com", true)
            .await
            .unwrap()
            .unwrap();
        let hash = secret.get(HASH_FIELD).and_then(Value::as_str).unwrap();
        assert!(hash.starts_with("$argon2"));
        assert_ne!(hash, "hunter2");
    }

    #[tokio::test]
    async fn default_lookup_excludes_the_hash() {
        let dir = directory();
        dir.create_user(user_input("ada@example.com")).await.unwrap();
        let user = dir
            .get_user_by_email("ada@example.com", false)
            .await
            .unwrap()
            .unwrap();
        assert!(user.get(HASH_FIELD).is_none());
        assert_eq!(user.get("email"), Some(&json!("ada@example.com")));
    }

    #[tokio::test]
    async fn verify_password_checks_credentials() {
        let dir = directory();
        dir.create_user(user_input("ada@example.com")).await.unwrap();
        assert!(dir.verify_password("ada@example.com", "hunter2").await.unwrap());
        assert!(!dir.verify_password("ada@example.com", "wrong").await.unwrap());
        assert!(!dir.verify_password("nobody@example.com", "hunter2").await.unwrap());
    }

    #[tokio::test]
    async fn edit_with_password_rotates_the_hash() {
        let dir = directory();
        let created = dir.create_user(user_input("ada@example.com")).await.unwrap();
        let id = strata_query::RecordId::from_value(created.get("id").unwrap()).unwrap();

        let mut patch = Record::new();
        patch.insert(PASSWORD_FIELD.to_string(), json!("correct horse"));
        dir.edit_user(&id, patch).await.unwrap();

        assert!(dir.verify_password("ada@example.com", "correct horse").await.unwrap());
        assert!(!dir.verify_password("ada@example.com", "hunter2").await.unwrap());
    }

    #[tokio::test]
    async fn get_or_create_is_idempotent_per_email() {
        let dir = directory();
        let first = dir.get_or_create_user(user_input("ada@example.com")).await.unwrap();
        let second = dir.get_or_create_user(user_input("ada@example.com")).await.unwrap();
        assert_eq!(first.get("id"), second.get("id"));
        assert_eq!(dir.store().count(None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn non_string_passwords_are_rejected() {
        let dir = directory();
        let mut input = user_input("ada@example.com");
        input.insert(PASSWORD_FIELD.to_string(), json!(42));
        let err = dir.create_user(input).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidOperation(_)));
    }
}
