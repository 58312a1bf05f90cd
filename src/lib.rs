// Copyright 2026 Gleaner Contributors
// SPDX-License-Identifier: Apache-2.0

//! Gleaner — lazy-content materialization and continuation planning engine.
//!
//! Extracts structured records from dynamically-rendered pages (questions and
//! answers, product reviews, analytics trend series) and decides what
//! follow-up fetch work the host scheduler should run next. The library
//! exposes the engine core — watcher, extractor, assembler, validator,
//! planner — plus the handler pipelines wired over it.

#![allow(
    dead_code,
    unused_imports,
    clippy::new_without_default,
    clippy::should_implement_trait
)]

pub mod error;
pub mod events;
pub mod extract;
pub mod materialize;
pub mod pipelines;
pub mod plan;
pub mod schema;
pub mod scheduler;
pub mod session;
pub mod view;
