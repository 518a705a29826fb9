use std::collections::HashSet;

use futures::stream::BoxStream;
use futures::StreamExt;
use serde::Serialize;

use lokcet_shared::collections::{self, USERS};
use lokcet_shared::errors::{AppError, AppResult, ErrorCode};
use lokcet_shared::store::{DocumentStoreExt, Query};

use super::load_user;
use super::relationship::{user_path, RelationshipService};
use crate::geo::{distance_km, normalize_phone};
use crate::models::{FriendRelation, Location, User, UserSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionReason {
    Contact,
    Nearby,
    /// Users without a location, offered when nothing else matched.
    Fallback,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FriendSuggestion {
    pub user: UserSummary,
    pub reason: SuggestionReason,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance_km: Option<f64>,
}

impl FriendSuggestion {
    fn new(user: &User, reason: SuggestionReason, distance_km: Option<f64>) -> Self {
        Self {
            user: UserSummary::from(user),
            reason,
            distance_km,
        }
    }
}

/// Ranks `candidates` for `me`: contact matches first, then users within
/// `max_distance_km` of `location` by ascending distance. Users already
/// related to `me` are excluded and results are unique per phone number.
/// When neither signal matches anyone, users without a location are offered.
pub fn suggest_friends(
    me: &User,
    candidates: &[User],
    contacts: &[String],
    location: Option<Location>,
    max_distance_km: f64,
) -> Vec<FriendSuggestion> {
    let pool: Vec<&User> = candidates
        .iter()
        .filter(|c| c.id != me.id && !c.is_deleted)
        .filter(|c| FriendRelation::between(me, c) == FriendRelation::None)
        .collect();

    let contacts: HashSet<String> = contacts
        .iter()
        .map(|p| normalize_phone(p))
        .filter(|p| !p.is_empty())
        .collect();
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::new();

    for user in &pool {
        let phone = normalize_phone(&user.phone);
        if !phone.is_empty() && contacts.contains(&phone) && seen.insert(dedup_key(user)) {
            out.push(FriendSuggestion::new(user, SuggestionReason::Contact, None));
        }
    }

    if let Some(origin) = location.filter(|l| !l.is_unset()) {
        let mut nearby: Vec<(f64, &User)> = pool
            .iter()
            .filter(|u| !u.location.is_unset())
            .map(|u| (distance_km(origin, u.location), *u))
            .filter(|(d, _)| *d <= max_distance_km)
            .collect();
        nearby.sort_by(|a, b| a.0.total_cmp(&b.0).then_with(|| a.1.id.cmp(&b.1.id)));
        for (d, user) in nearby {
            if seen.insert(dedup_key(user)) {
                out.push(FriendSuggestion::new(user, SuggestionReason::Nearby, Some(d)));
            }
        }
    }

    if out.is_empty() {
        for user in pool.iter().filter(|u| u.location.is_unset()) {
            if seen.insert(dedup_key(user)) {
                out.push(FriendSuggestion::new(user, SuggestionReason::Fallback, None));
            }
        }
    }

    out
}

fn dedup_key(user: &User) -> String {
    let phone = normalize_phone(&user.phone);
    if phone.is_empty() {
        format!("id:{}", user.id)
    } else {
        phone
    }
}

impl RelationshipService {
    /// Suggestions for `user_id`. `location` defaults to the stored one.
    pub async fn suggestions(
        &self,
        user_id: &str,
        contacts: &[String],
        location: Option<Location>,
    ) -> AppResult<Vec<FriendSuggestion>> {
        let me = load_user(&self.store, user_id).await?;
        self.rank(&me, contacts, location).await
    }

    /// Live suggestions, recomputed on every change of the user's document.
    pub fn suggest_friend_list(
        &self,
        user_id: &str,
        contacts: Vec<String>,
        location: Option<Location>,
    ) -> BoxStream<'static, AppResult<Vec<FriendSuggestion>>> {
        let service = self.clone();
        let path = user_path(user_id);
        Box::pin(async_stream::stream! {
            let mut watch = service.store.watch_document(path);
            while let Some(emission) = watch.next().await {
                let me = match emission {
                    Ok(Some(snapshot)) => snapshot.decode::<User>().map_err(AppError::from),
                    Ok(None) => Err(AppError::new(ErrorCode::UserNotFound, "user not found")),
                    Err(e) => Err(AppError::from(e)),
                };
                match me {
                    Ok(me) => yield service.rank(&me, &contacts, location).await,
                    Err(e) => yield Err(e),
                }
            }
        })
    }

    async fn rank(&self, me: &User, contacts: &[String], location: Option<Location>) -> AppResult<Vec<FriendSuggestion>> {
        let query = Query::new(collections::collection(USERS)).where_eq("isDeleted", false);
        let candidates = self.store.query_as::<User>(&query).await?;
        let origin = location.or(Some(me.location));
        let suggestions = suggest_friends(me, &candidates, contacts, origin, self.max_distance_km);
        tracing::debug!(user_id = %me.id, candidates = candidates.len(), suggestions = suggestions.len(), "suggestions ranked");
        Ok(suggestions)
    }
}
