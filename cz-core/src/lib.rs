//! cz-core: chess domain layer for the caissa search core.
//!
//! Wraps `cozy_chess` into the position/move contract the search core
//! consumes (legal moves, transitions, zobrist hash, game outcome) and
//! defines the unified YAML configuration schema shared by the driver
//! binaries.

pub mod config;
pub mod moves;
pub mod position;

pub use config::{Config, ConfigError};
pub use moves::{move_from_uci, move_to_uci, MoveParseError};
pub use position::{Outcome, Position, PositionError};

pub use cozy_chess::{Board, Color, File, GameStatus, Move, Piece, Rank, Square};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
