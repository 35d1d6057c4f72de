//! Video Processing Service
//!
//! Accepts uploaded videos, records each one as a job, and lets a pool of
//! workers extract the duration (ffprobe) and a thumbnail (ffmpeg) through a
//! lease-based, compare-and-set state machine backed by PostgreSQL and a
//! Redis Streams job queue.

pub mod app_state;
pub mod config;
pub mod db;
pub mod models;
pub mod routes;
pub mod services;
