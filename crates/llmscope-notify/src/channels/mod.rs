pub mod email;
pub mod pagerduty;
pub mod slack;
pub mod webhook;
