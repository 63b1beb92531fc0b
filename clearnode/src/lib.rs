#![deny(rust_2018_idioms)]
#![deny(clippy::all)]

pub mod application;
pub mod auth;
pub mod db;
pub mod error;
pub mod handlers;
pub mod ledger;
pub mod reconciler;
pub mod subscriptions;
pub mod ws;

pub use application::Application;
pub use error::HandlerError;
