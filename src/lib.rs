//! Storage engine and VCF ingestion pipeline for the AnyVar variation
//! registry.
//!
//! The crate registers GA4GH VRS variation objects under their canonical
//! digest identifiers, persists them in a content-addressed relational
//! store with a batched background write path, annotates and ingests VCF
//! files, and schedules those runs through an asynchronous job queue.

pub mod anyvar;
pub mod common;
pub mod config;
pub mod mapping;
pub mod queueing;
pub mod storage;
pub mod translate;
pub mod vcf;
pub mod vrs;
