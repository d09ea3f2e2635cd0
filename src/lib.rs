//! A database-to-GraphQL bridge core.
//!
//! Downstream GraphQL operations are translated into upstream operations
//! for a Prisma query-engine subprocess, which is started lazily per
//! schema, shared by concurrent requests and reaped after idling.
//!
//! The pieces fit together like this: a [`planner::Planner`] walks the
//! downstream operation and emits a fetch input with variable
//! placeholders; the [`engine::lazy::EngineRegistry`] supervises one
//! engine subprocess per Prisma schema; a [`source::Source`] binds the two
//! at request time, sanitizing the input and retrying while the engine
//! restarts.

pub mod config;
pub mod engine;
pub mod error;
pub mod plan;
pub mod planner;
pub mod source;
mod upstream;

pub use config::Configuration;
pub use config::SingleTypeField;
pub use engine::lazy::EngineRegistry;
pub use engine::lazy::LazyEngine;
pub use engine::PrismaEngine;
pub use error::EngineError;
pub use error::FetchError;
pub use error::PlanError;
pub use plan::DataSourceConfiguration;
pub use plan::FetchConfiguration;
pub use plan::FieldConfiguration;
pub use planner::Planner;
pub use planner::PlannerFactory;
pub use source::Source;
