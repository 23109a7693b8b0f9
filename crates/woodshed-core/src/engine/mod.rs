//! The session engine: chain assembly, lock-free control plumbing,
//! feedback governing, and lifecycle management.

pub mod atomics;
pub mod chain;
pub mod command;
pub mod gc;
pub mod governor;
pub mod session;

pub use atomics::SessionAtomics;
pub use chain::{ChainSource, ProcessChain, MAX_BLOCK_FRAMES};
pub use command::{command_channel, CommandSender, SessionCommand};
pub use gc::AudioGc;
pub use governor::{GovernorConfig, GovernorState, HighpassEnergy};
pub use session::{Engine, Session, SessionSource, SessionState, SourceControl};
