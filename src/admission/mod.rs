//! Admission control in front of the request pipeline.

pub mod client;
mod guard;
mod middleware;

pub use client::Principal;
pub use guard::{Admission, AdmissionControl, AdmissionRequest};
pub use middleware::{enforce, protect, too_many_requests, AdmissionState};
