use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;

use lokcet_messaging::{chat_room_upsert, room_id, MessagingService};
use lokcet_shared::clients::push::{notify_user, Notifier, PushData};
use lokcet_shared::collections::{self, USERS};
use lokcet_shared::errors::{AppError, AppResult, ErrorCode};
use lokcet_shared::store::{
    DocPath, DocumentStore, DocumentStoreExt, FieldUpdate, Precondition, Snapshot, StoreError, StoreResult, WriteBatch,
};

use super::{fetch_user, load_user};
use crate::geo::MAX_DISTANCE_KM;
use crate::models::{FriendRelation, User};

/// Which relationship list of a user to resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FriendListKind {
    Friends,
    /// Incoming requests.
    Requests,
    /// Outgoing requests.
    Waiting,
}

impl FriendListKind {
    fn ids(self, user: &User) -> &[String] {
        match self {
            Self::Friends => &user.friends,
            Self::Requests => &user.friend_requests,
            Self::Waiting => &user.friend_wait_list,
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            Self::Friends => "friends",
            Self::Requests => "requests",
            Self::Waiting => "waiting",
        }
    }
}

#[derive(Clone)]
pub struct RelationshipService {
    pub(crate) store: Arc<dyn DocumentStore>,
    notifier: Arc<dyn Notifier>,
    messaging: MessagingService,
    pub(crate) max_distance_km: f64,
}

impl RelationshipService {
    pub fn new(store: Arc<dyn DocumentStore>, notifier: Arc<dyn Notifier>, messaging: MessagingService) -> Self {
        Self {
            store,
            notifier,
            messaging,
            max_distance_km: MAX_DISTANCE_KM,
        }
    }

    /// Radius used by friend suggestions.
    pub fn with_max_distance_km(mut self, km: f64) -> Self {
        self.max_distance_km = km;
        self
    }

    pub async fn relation(&self, user_id: &str, other_id: &str) -> AppResult<FriendRelation> {
        let (me, other) = tokio::try_join!(load_user(&self.store, user_id), load_user(&self.store, other_id))?;
        Ok(FriendRelation::between(&me, &other))
    }

    /// Sends a friend request from `user_id` to `friend_id`.
    pub async fn add_friend(&self, user_id: &str, friend_id: &str) -> AppResult<()> {
        if user_id == friend_id {
            return Err(AppError::new(ErrorCode::CannotBefriendSelf, "cannot send a friend request to yourself"));
        }
        let (me, friend) = tokio::try_join!(load_user(&self.store, user_id), load_user(&self.store, friend_id))?;

        match FriendRelation::between(&me, &friend) {
            FriendRelation::Friends => {
                return Err(AppError::new(ErrorCode::AlreadyFriends, "users are already friends"));
            }
            FriendRelation::Requested | FriendRelation::Incoming => {
                return Err(AppError::new(ErrorCode::AlreadyRequested, "a friend request is already pending"));
            }
            FriendRelation::None => {}
        }

        match self.store.commit(friend_request_batch(user_id, friend_id)).await {
            Err(StoreError::PreconditionFailed(path)) => {
                tracing::warn!(user_id = %user_id, friend_id = %friend_id, %path, "friend request crossed a concurrent one");
                return Err(AppError::new(ErrorCode::AlreadyRequested, "a friend request is already pending"));
            }
            result => result?,
        }

        metrics::counter!("friend_transitions_total", "transition" => "request").increment(1);
        tracing::info!(user_id = %user_id, friend_id = %friend_id, "friend request sent");

        self.notify(friend_id, &me, "Lời mời kết bạn", "đã gửi cho bạn lời mời kết bạn", "friend_request")
            .await;
        Ok(())
    }

    /// `user_id` accepts the pending request sent by `friend_id`, which also
    /// opens their chat room.
    pub async fn accept_friend(&self, user_id: &str, friend_id: &str) -> AppResult<()> {
        let (me, friend) = tokio::try_join!(load_user(&self.store, user_id), load_user(&self.store, friend_id))?;
        if !me.friend_requests.iter().any(|id| id == friend_id) || !friend.friend_wait_list.iter().any(|id| id == user_id) {
            return Err(AppError::new(ErrorCode::NotInWaitList, "no pending request from this user"));
        }

        let batch = WriteBatch::new()
            .update(
                user_path(user_id),
                vec![
                    FieldUpdate::array_remove("friendRequests", [friend_id]),
                    FieldUpdate::array_union("friends", [friend_id]),
                ],
            )
            .update(
                user_path(friend_id),
                vec![
                    FieldUpdate::array_remove("friendWaitList", [user_id]),
                    FieldUpdate::array_union("friends", [user_id]),
                ],
            )
            .extend(chat_room_upsert(user_id, friend_id));
        self.store.commit(batch).await?;

        metrics::counter!("friend_transitions_total", "transition" => "accept").increment(1);
        tracing::info!(user_id = %user_id, friend_id = %friend_id, room_id = %room_id(user_id, friend_id), "friend request accepted");

        self.notify(friend_id, &me, "Bạn mới", "đã chấp nhận lời mời kết bạn", "friend_accepted")
            .await;
        Ok(())
    }

    /// `user_id` declines the pending request sent by `friend_id`.
    pub async fn reject_friend(&self, user_id: &str, friend_id: &str) -> AppResult<()> {
        let me = load_user(&self.store, user_id).await?;
        if !me.friend_requests.iter().any(|id| id == friend_id) {
            return Err(AppError::new(ErrorCode::NotInWaitList, "no pending request from this user"));
        }

        let mut batch = WriteBatch::new().update(
            user_path(user_id),
            vec![FieldUpdate::array_remove("friendRequests", [friend_id])],
        );
        if fetch_user(&self.store, friend_id).await?.is_some() {
            batch = batch.update(
                user_path(friend_id),
                vec![FieldUpdate::array_remove("friendWaitList", [user_id])],
            );
        }
        self.store.commit(batch).await?;

        metrics::counter!("friend_transitions_total", "transition" => "reject").increment(1);
        tracing::info!(user_id = %user_id, friend_id = %friend_id, "friend request rejected");
        Ok(())
    }

    /// `user_id` cancels the request it sent to `friend_id`.
    pub async fn remove_waited_friend(&self, user_id: &str, friend_id: &str) -> AppResult<()> {
        let me = load_user(&self.store, user_id).await?;
        if !me.friend_wait_list.iter().any(|id| id == friend_id) {
            return Err(AppError::new(ErrorCode::NotInWaitList, "no pending request to this user"));
        }

        let mut batch = WriteBatch::new().update(
            user_path(user_id),
            vec![FieldUpdate::array_remove("friendWaitList", [friend_id])],
        );
        if fetch_user(&self.store, friend_id).await?.is_some() {
            batch = batch.update(
                user_path(friend_id),
                vec![FieldUpdate::array_remove("friendRequests", [user_id])],
            );
        }
        self.store.commit(batch).await?;

        metrics::counter!("friend_transitions_total", "transition" => "cancel").increment(1);
        tracing::info!(user_id = %user_id, friend_id = %friend_id, "friend request cancelled");
        Ok(())
    }

    /// Ends a friendship and deletes the pair's chat room.
    pub async fn remove_friend(&self, user_id: &str, friend_id: &str) -> AppResult<()> {
        let me = load_user(&self.store, user_id).await?;
        let friend = fetch_user(&self.store, friend_id).await?;
        let listed_by_friend = friend
            .as_ref()
            .is_some_and(|f| f.friends.iter().any(|id| id == user_id));
        if !me.friends.iter().any(|id| id == friend_id) && !listed_by_friend {
            return Err(AppError::new(ErrorCode::NotFriends, "users are not friends"));
        }

        let room = room_id(user_id, friend_id);
        let mut batch = WriteBatch::new().update(
            user_path(user_id),
            vec![FieldUpdate::array_remove("friends", [friend_id])],
        );
        if friend.is_some() {
            batch = batch.update(
                user_path(friend_id),
                vec![FieldUpdate::array_remove("friends", [user_id])],
            );
        }
        let batch = batch.extend(self.messaging.chat_room_deletion(&room).await?);
        self.store.commit(batch).await?;

        metrics::counter!("friend_transitions_total", "transition" => "remove").increment(1);
        tracing::info!(user_id = %user_id, friend_id = %friend_id, room_id = %room, "friend removed");
        Ok(())
    }

    /// Current users of one relationship list, in list order. Missing and
    /// soft-deleted users are skipped.
    pub async fn list(&self, user_id: &str, kind: FriendListKind) -> AppResult<Vec<User>> {
        let me = load_user(&self.store, user_id).await?;
        resolve_users(&self.store, kind.ids(&me)).await
    }

    /// Live version of [`Self::list`], re-resolved on every change of the
    /// user's document.
    pub fn watch_list(&self, user_id: &str, kind: FriendListKind) -> BoxStream<'static, AppResult<Vec<User>>> {
        let store = self.store.clone();
        let path = user_path(user_id);
        Box::pin(async_stream::stream! {
            let mut watch = store.watch_document(path.clone());
            while let Some(emission) = watch.next().await {
                let resolved = resolve_emission(&store, emission, kind).await;
                if let Err(e) = &resolved {
                    tracing::warn!(path = %path, list = kind.as_str(), error = %e, "friend list resolution failed");
                }
                yield resolved;
            }
        })
    }

    pub fn friend_list(&self, user_id: &str) -> BoxStream<'static, AppResult<Vec<User>>> {
        self.watch_list(user_id, FriendListKind::Friends)
    }

    pub fn request_friend_list(&self, user_id: &str) -> BoxStream<'static, AppResult<Vec<User>>> {
        self.watch_list(user_id, FriendListKind::Requests)
    }

    pub fn waited_friend_list(&self, user_id: &str) -> BoxStream<'static, AppResult<Vec<User>>> {
        self.watch_list(user_id, FriendListKind::Waiting)
    }

    async fn notify(&self, recipient_id: &str, sender: &User, title: &str, action: &str, kind: &str) {
        let body = format!("{} {action}", sender.display_name());
        let data = PushData {
            kind: kind.to_string(),
            sender_id: sender.id.clone(),
            message: None,
            image_url: None,
        };
        notify_user(self.store.as_ref(), self.notifier.as_ref(), recipient_id, title, body.trim(), data).await;
    }
}

/// Request writes guarded against the relation changing after it was read,
/// so two crossing requests cannot both land.
pub(crate) fn friend_request_batch(user_id: &str, friend_id: &str) -> WriteBatch {
    WriteBatch::new()
        .require(user_path(user_id), Precondition::array_lacks("friendRequests", friend_id))
        .require(user_path(user_id), Precondition::array_lacks("friends", friend_id))
        .require(user_path(friend_id), Precondition::array_lacks("friendRequests", user_id))
        .update(user_path(user_id), vec![FieldUpdate::array_union("friendWaitList", [friend_id])])
        .update(user_path(friend_id), vec![FieldUpdate::array_union("friendRequests", [user_id])])
}

pub(crate) fn user_path(user_id: &str) -> DocPath {
    collections::doc(USERS, user_id)
}

async fn resolve_emission(
    store: &Arc<dyn DocumentStore>,
    emission: StoreResult<Option<Snapshot>>,
    kind: FriendListKind,
) -> AppResult<Vec<User>> {
    let user: User = emission?
        .ok_or_else(|| AppError::new(ErrorCode::UserNotFound, "user not found"))?
        .decode()?;
    resolve_users(store, kind.ids(&user)).await
}

/// Parallel point reads, keeping the order of `ids`.
pub(crate) async fn resolve_users(store: &Arc<dyn DocumentStore>, ids: &[String]) -> AppResult<Vec<User>> {
    let reads = ids.iter().map(|id| {
        let path = user_path(id);
        async move { store.get_as::<User>(&path).await }
    });
    let users = futures::future::try_join_all(reads).await?;
    Ok(users.into_iter().flatten().filter(|u| !u.is_deleted).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_support::{fixture, seed, user};
    use lokcet_shared::collections::CHAT_ROOMS;
    use lokcet_shared::store::to_document;

    async fn stored(store: &lokcet_shared::store::MemoryStore, id: &str) -> User {
        store.get_as::<User>(&user_path(id)).await.unwrap().unwrap()
    }

    async fn befriend(fx: &crate::services::test_support::Fixture, a: &str, b: &str) {
        fx.relationships.add_friend(a, b).await.unwrap();
        fx.relationships.accept_friend(b, a).await.unwrap();
    }

    #[tokio::test]
    async fn request_fills_both_lists() {
        let fx = fixture();
        seed(&fx.store, &[user("a"), user("b")]).await;

        fx.relationships.add_friend("a", "b").await.unwrap();

        assert_eq!(stored(&fx.store, "a").await.friend_wait_list, vec!["b"]);
        assert_eq!(stored(&fx.store, "b").await.friend_requests, vec!["a"]);
        assert_eq!(fx.relationships.relation("a", "b").await.unwrap(), FriendRelation::Requested);
        assert_eq!(fx.relationships.relation("b", "a").await.unwrap(), FriendRelation::Incoming);
    }

    #[tokio::test]
    async fn crossing_requests_leave_one_pending() {
        let fx = fixture();
        seed(&fx.store, &[user("a"), user("b")]).await;
        // Both sides decided on a stale "no relation" read.
        let from_a = friend_request_batch("a", "b");
        let from_b = friend_request_batch("b", "a");

        fx.store.commit(from_a).await.unwrap();
        let err = fx.store.commit(from_b).await.unwrap_err();
        assert!(matches!(err, StoreError::PreconditionFailed(_)));

        let (a, b) = (stored(&fx.store, "a").await, stored(&fx.store, "b").await);
        assert_eq!(a.friend_wait_list, vec!["b"]);
        assert!(a.friend_requests.is_empty());
        assert_eq!(b.friend_requests, vec!["a"]);
        assert!(b.friend_wait_list.is_empty());
        assert_eq!(fx.relationships.relation("a", "b").await.unwrap(), FriendRelation::Requested);
    }

    #[tokio::test]
    async fn reverse_request_is_rejected() {
        let fx = fixture();
        seed(&fx.store, &[user("a"), user("b")]).await;
        fx.relationships.add_friend("a", "b").await.unwrap();

        let err = fx.relationships.add_friend("b", "a").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::AlreadyRequested);
        let err = fx.relationships.add_friend("a", "b").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::AlreadyRequested);

        assert!(stored(&fx.store, "b").await.friend_wait_list.is_empty());
        assert!(stored(&fx.store, "a").await.friend_requests.is_empty());
    }

    #[tokio::test]
    async fn invalid_requests_are_rejected() {
        let fx = fixture();
        let mut gone = user("gone");
        gone.is_deleted = true;
        seed(&fx.store, &[user("a"), gone]).await;

        let err = fx.relationships.add_friend("a", "a").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::CannotBefriendSelf);
        let err = fx.relationships.add_friend("a", "gone").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::UserNotFound);
        let err = fx.relationships.add_friend("a", "nobody").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::UserNotFound);
    }

    #[tokio::test]
    async fn accept_makes_friends_and_opens_room() {
        let fx = fixture();
        seed(&fx.store, &[user("a"), user("b")]).await;
        fx.relationships.add_friend("a", "b").await.unwrap();

        fx.relationships.accept_friend("b", "a").await.unwrap();

        let a = stored(&fx.store, "a").await;
        let b = stored(&fx.store, "b").await;
        assert_eq!(a.friends, vec!["b"]);
        assert_eq!(b.friends, vec!["a"]);
        assert!(a.friend_wait_list.is_empty() && a.friend_requests.is_empty());
        assert!(b.friend_wait_list.is_empty() && b.friend_requests.is_empty());
        let room = fx.messaging.get_chat_room(&room_id("b", "a")).await.unwrap();
        assert_eq!(room.id, "a_b");

        let err = fx.relationships.add_friend("b", "a").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::AlreadyFriends);
    }

    #[tokio::test]
    async fn accept_requires_a_pending_request() {
        let fx = fixture();
        seed(&fx.store, &[user("a"), user("b")]).await;

        let err = fx.relationships.accept_friend("b", "a").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotInWaitList);

        fx.relationships.add_friend("a", "b").await.unwrap();
        // The requester cannot accept its own request.
        let err = fx.relationships.accept_friend("a", "b").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotInWaitList);
    }

    #[tokio::test]
    async fn reject_and_cancel_clear_both_sides() {
        let fx = fixture();
        seed(&fx.store, &[user("a"), user("b"), user("c")]).await;
        fx.relationships.add_friend("a", "b").await.unwrap();
        fx.relationships.add_friend("a", "c").await.unwrap();

        fx.relationships.reject_friend("b", "a").await.unwrap();
        fx.relationships.remove_waited_friend("a", "c").await.unwrap();

        for id in ["a", "b", "c"] {
            let u = stored(&fx.store, id).await;
            assert!(u.friend_wait_list.is_empty(), "{id}");
            assert!(u.friend_requests.is_empty(), "{id}");
        }
        let err = fx.relationships.remove_waited_friend("a", "c").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotInWaitList);
        let err = fx.relationships.reject_friend("b", "a").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotInWaitList);
    }

    #[tokio::test]
    async fn remove_friend_deletes_the_room() {
        let fx = fixture();
        seed(&fx.store, &[user("a"), user("b")]).await;
        befriend(&fx, "a", "b").await;
        fx.messaging.send_message("a", "b", "hi").await.unwrap();

        fx.relationships.remove_friend("b", "a").await.unwrap();

        assert!(stored(&fx.store, "a").await.friends.is_empty());
        assert!(stored(&fx.store, "b").await.friends.is_empty());
        assert!(fx.store.get(&collections::doc(CHAT_ROOMS, "a_b")).await.unwrap().is_none());
        let mut messages = fx.messaging.message_list("a_b");
        assert!(messages.next().await.unwrap().unwrap().is_empty());
        assert_eq!(fx.relationships.relation("a", "b").await.unwrap(), FriendRelation::None);

        let err = fx.relationships.remove_friend("b", "a").await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NotFriends);
    }

    #[tokio::test]
    async fn at_most_one_relation_holds_through_transitions() {
        let fx = fixture();
        seed(&fx.store, &[user("a"), user("b")]).await;

        let check = |a: User, b: User| {
            let states = [
                a.friend_wait_list.contains(&b.id) || b.friend_requests.contains(&a.id),
                b.friend_wait_list.contains(&a.id) || a.friend_requests.contains(&b.id),
                a.friends.contains(&b.id) || b.friends.contains(&a.id),
            ];
            assert!(states.iter().filter(|s| **s).count() <= 1);
        };

        let _ = fx.relationships.add_friend("a", "b").await;
        check(stored(&fx.store, "a").await, stored(&fx.store, "b").await);
        let _ = fx.relationships.add_friend("b", "a").await;
        check(stored(&fx.store, "a").await, stored(&fx.store, "b").await);
        let _ = fx.relationships.accept_friend("b", "a").await;
        check(stored(&fx.store, "a").await, stored(&fx.store, "b").await);
        let _ = fx.relationships.add_friend("a", "b").await;
        check(stored(&fx.store, "a").await, stored(&fx.store, "b").await);
        let _ = fx.relationships.remove_friend("a", "b").await;
        check(stored(&fx.store, "a").await, stored(&fx.store, "b").await);
    }

    #[tokio::test]
    async fn friend_list_keeps_order_and_skips_deleted_users() {
        let fx = fixture();
        let mut me = user("me");
        me.friends = vec!["z".into(), "gone".into(), "missing".into(), "a".into()];
        let mut gone = user("gone");
        gone.is_deleted = true;
        seed(&fx.store, &[me, user("z"), user("a"), gone]).await;

        let friends = fx.relationships.list("me", FriendListKind::Friends).await.unwrap();
        let ids: Vec<_> = friends.iter().map(|u| u.id.as_str()).collect();
        assert_eq!(ids, vec!["z", "a"]);
    }

    #[tokio::test]
    async fn request_stream_follows_the_user_document() {
        let fx = fixture();
        seed(&fx.store, &[user("a"), user("b"), user("c")]).await;

        let mut requests = fx.relationships.request_friend_list("b");
        assert!(requests.next().await.unwrap().unwrap().is_empty());

        fx.relationships.add_friend("a", "b").await.unwrap();
        let listed = requests.next().await.unwrap().unwrap();
        assert_eq!(listed.iter().map(|u| u.id.as_str()).collect::<Vec<_>>(), vec!["a"]);

        fx.relationships.add_friend("c", "b").await.unwrap();
        let listed = requests.next().await.unwrap().unwrap();
        assert_eq!(listed.iter().map(|u| u.id.as_str()).collect::<Vec<_>>(), vec!["a", "c"]);
    }

    #[tokio::test]
    async fn dropping_a_list_stream_releases_its_watch() {
        let fx = fixture();
        seed(&fx.store, &[user("a")]).await;
        let mut friends = fx.relationships.friend_list("a");
        friends.next().await.unwrap().unwrap();
        assert_eq!(fx.store.watcher_count(), 1);
        drop(friends);
        assert_eq!(fx.store.watcher_count(), 0);
    }

    #[tokio::test]
    async fn request_notifies_the_target() {
        let fx = fixture();
        seed(&fx.store, &[user("a"), user("b")]).await;
        let token = lokcet_shared::clients::push::FcmToken { user_id: "b".into(), token: "tok".into() };
        fx.store
            .set(&collections::doc(collections::FCM_TOKENS, "b"), to_document(&token).unwrap())
            .await
            .unwrap();

        fx.relationships.add_friend("a", "b").await.unwrap();

        let sent = fx.notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].data.kind, "friend_request");
        assert_eq!(sent[0].body, "A đã gửi cho bạn lời mời kết bạn");
    }
}
