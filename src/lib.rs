//! Intent-to-SQL template service.
//!
//! A prompt is embedded, ranked against a catalog of parameterised SQL
//! templates, and either bound and executed (rows streamed back as NDJSON)
//! or answered with the closest templates as suggestions.

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod interfaces;
