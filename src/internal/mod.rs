// src/internal/mod.rs

pub(crate) mod cache_padded;

pub(crate) use self::cache_padded::CachePadded;
