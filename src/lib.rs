//! Feedkeeper - A multi-user RSS aggregator
//!
//! This crate provides a multi-user RSS aggregator with a JSON API.
//! Users register accounts, subscribe to feed URLs, and a background
//! poller ingests new posts from every subscribed feed.

pub mod auth;
pub mod config;
pub mod db;
pub mod fetcher;
pub mod routes;
