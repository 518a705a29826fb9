//! Three-state operation results for presentation layers.

use std::future::Future;

use futures::{Stream, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::errors::{AppError, AppResult};

/// Progress of one tracked operation. `Cancelled` means the caller abandoned
/// the operation, which is not a failure.
#[derive(Debug)]
pub enum OpState<T> {
    Loading,
    Ready(T),
    Failed(AppError),
    Cancelled,
}

impl<T> OpState<T> {
    pub fn is_loading(&self) -> bool {
        matches!(self, Self::Loading)
    }

    pub fn ready(&self) -> Option<&T> {
        match self {
            Self::Ready(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&AppError> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> OpState<U> {
        match self {
            Self::Loading => OpState::Loading,
            Self::Ready(value) => OpState::Ready(f(value)),
            Self::Failed(err) => OpState::Failed(err),
            Self::Cancelled => OpState::Cancelled,
        }
    }
}

impl<T> From<AppResult<T>> for OpState<T> {
    fn from(result: AppResult<T>) -> Self {
        match result {
            Ok(value) => Self::Ready(value),
            Err(err) => Self::Failed(err),
        }
    }
}

/// Emits `Loading`, then the outcome of `fut`, or `Cancelled` if the token
/// fires first.
pub fn track<T, F>(token: CancellationToken, fut: F) -> impl Stream<Item = OpState<T>> + Send
where
    T: Send + 'static,
    F: Future<Output = AppResult<T>> + Send + 'static,
{
    async_stream::stream! {
        yield OpState::Loading;
        let state = tokio::select! {
            biased;
            _ = token.cancelled() => OpState::Cancelled,
            result = fut => OpState::from(result),
        };
        if matches!(state, OpState::Cancelled) {
            tracing::debug!("tracked operation abandoned");
        }
        yield state;
    }
}

/// Emits `Loading` once, then one state per item of `stream` until it ends or
/// the token fires.
pub fn track_stream<T, S>(token: CancellationToken, stream: S) -> impl Stream<Item = OpState<T>> + Send
where
    T: Send + 'static,
    S: Stream<Item = AppResult<T>> + Send + 'static,
{
    async_stream::stream! {
        yield OpState::Loading;
        let mut stream = Box::pin(stream);
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => None,
                item = stream.next() => Some(item),
            };
            match next {
                None => {
                    yield OpState::Cancelled;
                    break;
                }
                Some(None) => break,
                Some(Some(result)) => yield OpState::from(result),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::ErrorCode;

    #[tokio::test]
    async fn success_is_preceded_by_loading() {
        let states: Vec<_> = track(CancellationToken::new(), async { Ok(7) }).collect().await;
        assert_eq!(states.len(), 2);
        assert!(states[0].is_loading());
        assert_eq!(states[1].ready(), Some(&7));
    }

    #[tokio::test]
    async fn failure_carries_the_error() {
        let fut = async { Err::<(), _>(AppError::new(ErrorCode::AlreadyFriends, "already friends")) };
        let states: Vec<_> = track(CancellationToken::new(), fut).collect().await;
        assert_eq!(states[1].error().map(AppError::code), Some(ErrorCode::AlreadyFriends));
    }

    #[tokio::test]
    async fn cancellation_is_not_a_failure() {
        let token = CancellationToken::new();
        token.cancel();
        let states: Vec<_> = track(token, futures::future::pending::<AppResult<()>>()).collect().await;
        assert!(matches!(states[1], OpState::Cancelled));
    }

    #[tokio::test]
    async fn stream_tracking_stops_on_cancel() {
        let token = CancellationToken::new();
        let source = futures::stream::iter(vec![Ok(1), Ok(2)]).chain(futures::stream::pending());
        let mut states = Box::pin(track_stream(token.clone(), source));

        assert!(states.next().await.unwrap().is_loading());
        assert_eq!(states.next().await.unwrap().ready(), Some(&1));
        assert_eq!(states.next().await.unwrap().ready(), Some(&2));
        token.cancel();
        assert!(matches!(states.next().await, Some(OpState::Cancelled)));
        assert!(states.next().await.is_none());
    }
}
