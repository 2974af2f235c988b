//! Schemacraft - Schema Design Session Engine
//!
//! The in-memory core of an interactive database-schema designer: tables,
//! fields, indexes and relations, their canvas positions, snapshot-based
//! undo/redo, dirty tracking against the last saved state, and the codec for
//! the escaped JSON blobs the schema-design backend stores.
//!
//! A [`core::SessionEngine`] is created per open designer and talks to the
//! backend only through the ports in [`core::persistence`].

pub mod core;
