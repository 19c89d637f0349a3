//! Macros for indexer error handling.
//!
//! Provides shorthands for building and returning [`crate::error::IndexerError`] values.

/// Creates an [`crate::error::IndexerError`] from an error kind and a static description.
///
/// Accepts optional dynamic detail (use `detail =` to move an owned [`String`]) and an optional
/// source error.
#[macro_export]
macro_rules! indexer_error {
    ($kind:expr, $desc:expr) => {
        $crate::error::IndexerError::from(($kind, $desc))
    };
    ($kind:expr, $desc:expr, source: $source:expr) => {
        $crate::error::IndexerError::from(($kind, $desc)).with_source($source)
    };
    ($kind:expr, $desc:expr, detail = $detail:expr) => {
        $crate::error::IndexerError::from(($kind, $desc, $detail))
    };
    ($kind:expr, $desc:expr, detail = $detail:expr, source: $source:expr) => {
        $crate::error::IndexerError::from(($kind, $desc, $detail)).with_source($source)
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        $crate::error::IndexerError::from(($kind, $desc, $detail.to_string()))
    };
    ($kind:expr, $desc:expr, $detail:expr, source: $source:expr) => {
        $crate::error::IndexerError::from(($kind, $desc, $detail.to_string()))
            .with_source($source)
    };
}

/// Creates an [`crate::error::IndexerError`] and returns it from the current function.
///
/// Takes the same arguments as [`indexer_error!`].
#[macro_export]
macro_rules! bail {
    ($kind:expr, $desc:expr) => {
        return ::core::result::Result::Err($crate::indexer_error!($kind, $desc))
    };
    ($kind:expr, $desc:expr, source: $source:expr) => {
        return ::core::result::Result::Err($crate::indexer_error!($kind, $desc, source: $source))
    };
    ($kind:expr, $desc:expr, detail = $detail:expr) => {
        return ::core::result::Result::Err($crate::indexer_error!($kind, $desc, detail = $detail))
    };
    ($kind:expr, $desc:expr, detail = $detail:expr, source: $source:expr) => {
        return ::core::result::Result::Err($crate::indexer_error!(
            $kind,
            $desc,
            detail = $detail,
            source: $source
        ))
    };
    ($kind:expr, $desc:expr, $detail:expr) => {
        return ::core::result::Result::Err($crate::indexer_error!($kind, $desc, $detail))
    };
    ($kind:expr, $desc:expr, $detail:expr, source: $source:expr) => {
        return ::core::result::Result::Err($crate::indexer_error!(
            $kind,
            $desc,
            $detail,
            source: $source
        ))
    };
}
