pub mod account;
pub mod feedback;
mod password;
pub mod relationship;
pub mod suggestion;
mod tokens;

use std::sync::Arc;

use lokcet_shared::collections::{self, USERS};
use lokcet_shared::errors::{AppError, AppResult, ErrorCode};
use lokcet_shared::store::{DocumentStore, DocumentStoreExt};

use crate::models::User;

/// Reads a user document, deleted or not.
pub(crate) async fn fetch_user(store: &Arc<dyn DocumentStore>, user_id: &str) -> AppResult<Option<User>> {
    Ok(store.get_as::<User>(&collections::doc(USERS, user_id)).await?)
}

/// Reads a live user; missing and soft-deleted users are both not found.
pub(crate) async fn load_user(store: &Arc<dyn DocumentStore>, user_id: &str) -> AppResult<User> {
    match fetch_user(store, user_id).await? {
        Some(user) if !user.is_deleted => Ok(user),
        _ => Err(AppError::new(ErrorCode::UserNotFound, format!("user {user_id} not found"))),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;

    use lokcet_messaging::MessagingService;
    use lokcet_shared::clients::push::RecordingNotifier;
    use lokcet_shared::collections::{self, USERS};
    use lokcet_shared::store::{to_document, DocumentStore, MemoryStore};

    use super::relationship::RelationshipService;
    use crate::models::{Location, User};

    pub struct Fixture {
        pub store: MemoryStore,
        pub notifier: Arc<RecordingNotifier>,
        pub messaging: MessagingService,
        pub relationships: RelationshipService,
    }

    pub fn fixture() -> Fixture {
        let store = MemoryStore::new();
        let notifier = Arc::new(RecordingNotifier::new());
        let shared: Arc<dyn DocumentStore> = Arc::new(store.clone());
        let messaging = MessagingService::new(shared.clone(), notifier.clone());
        let relationships = RelationshipService::new(shared, notifier.clone(), messaging.clone());
        Fixture {
            store,
            notifier,
            messaging,
            relationships,
        }
    }

    pub fn user(id: &str) -> User {
        User {
            id: id.into(),
            first_name: id.to_uppercase(),
            ..User::default()
        }
    }

    pub fn located(id: &str, phone: &str, latitude: f64, longitude: f64) -> User {
        User {
            phone: phone.into(),
            location: Location { latitude, longitude },
            ..user(id)
        }
    }

    pub async fn seed(store: &MemoryStore, users: &[User]) {
        for user in users {
            store
                .set(&collections::doc(USERS, &user.id), to_document(user).unwrap())
                .await
                .unwrap();
        }
    }
}
