//! Source composition for `ZygoteConfig`.

pub mod merge_policy;
pub mod service;
