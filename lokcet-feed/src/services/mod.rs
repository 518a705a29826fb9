mod counters;
mod images;
mod reactions;

use std::sync::Arc;

use lokcet_messaging::MessagingService;
use lokcet_shared::clients::blob::BlobStore;
use lokcet_shared::clients::kv::KeyValueStore;
use lokcet_shared::clients::push::Notifier;
use lokcet_shared::store::DocumentStore;

use crate::models::Visibility;

pub use reactions::ReactionOutcome;

/// Image bytes and metadata for an upload.
#[derive(Debug, Clone)]
pub struct NewImage {
    pub bytes: Vec<u8>,
    pub content_type: String,
    pub caption: String,
    pub visibility: Visibility,
}

#[derive(Clone)]
pub struct FeedService {
    store: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
    kv: Arc<dyn KeyValueStore>,
    notifier: Arc<dyn Notifier>,
    messaging: MessagingService,
}

impl FeedService {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        blobs: Arc<dyn BlobStore>,
        kv: Arc<dyn KeyValueStore>,
        notifier: Arc<dyn Notifier>,
        messaging: MessagingService,
    ) -> Self {
        Self {
            store,
            blobs,
            kv,
            notifier,
            messaging,
        }
    }
}
