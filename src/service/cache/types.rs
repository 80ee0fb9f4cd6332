use std::sync::Arc;

/// A cached value, or a marker that the lookup found nothing.
#[derive(PartialEq, Debug, Clone)]
pub enum CacheEntry<T> {
    Positive(Arc<T>),
    Negative,
}
