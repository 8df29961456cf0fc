//! wa-cli
//!
//! The embedded command-line surface for the campaign core (component K,
//! `spec.md` §4.K): drives a [`wa_runtime::ControlPlane`] directly against
//! the on-disk stores, the way `wa-daemon` drives the same control plane
//! behind HTTP.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod commands;
pub mod format;
