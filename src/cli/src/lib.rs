//! A3S OCM CLI - resolve component versions, cache their resources and
//! render localized or configured manifests.

pub mod commands;
pub mod context;
pub mod output;
