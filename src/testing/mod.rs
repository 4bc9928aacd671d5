//! Test doubles for exercising sessions without a broker

pub mod mocks;

pub use mocks::{MockCall, MockLink, MockLinkFactory};
