//! Opcode dispatch table and handler registry
//!
//! A table is assembled once through [`DispatchTableBuilder`] and then shared
//! read-only by every session of one protocol. Each inbound frame goes
//! through lookup, state check, size check and permission check before its
//! handler runs.

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

use super::{Session, StateSet};
use crate::error::SessionError;
use crate::protocol::MessageReader;

/// Account security tiers, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountLevel {
    Player = 0,
    Moderator = 1,
    GameMaster = 2,
    Administrator = 3,
    Console = 4,
}

impl AccountLevel {
    /// Map a stored level, clamping anything above the top tier.
    pub fn from_level(level: i64) -> Self {
        match level {
            i64::MIN..=0 => Self::Player,
            1 => Self::Moderator,
            2 => Self::GameMaster,
            3 => Self::Administrator,
            _ => Self::Console,
        }
    }

    pub fn level(self) -> i64 {
        self as i64
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "player" => Some(Self::Player),
            "moderator" | "mod" => Some(Self::Moderator),
            "gamemaster" | "gm" => Some(Self::GameMaster),
            "administrator" | "admin" => Some(Self::Administrator),
            "console" => Some(Self::Console),
            _ => None,
        }
    }
}

impl fmt::Display for AccountLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Player => "player",
            Self::Moderator => "moderator",
            Self::GameMaster => "gamemaster",
            Self::Administrator => "administrator",
            Self::Console => "console",
        };
        write!(f, "{}", name)
    }
}

/// Accepted body length for one opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodySize {
    Exact(usize),
    AtLeast(usize),
    Between(usize, usize),
}

impl BodySize {
    pub fn check(self, name: &'static str, len: usize) -> Result<(), SessionError> {
        let (min, max) = match self {
            Self::Exact(n) => (n, Some(n)),
            Self::AtLeast(n) => (n, None),
            Self::Between(min, max) => (min, Some(max)),
        };
        if len < min {
            return Err(SessionError::TruncatedMessage { name, len, min });
        }
        match max {
            Some(max) if len > max => Err(SessionError::OversizedMessage { name, len, max }),
            _ => Ok(()),
        }
    }
}

pub type HandlerResult<S> = Result<Outcome<S>, SessionError>;

/// Work to apply to the session once a suspended lookup finishes.
pub type Continuation<S> = Box<dyn FnOnce(&mut S) -> HandlerResult<S> + Send>;

pub type Pending<S> = Pin<Box<dyn Future<Output = Continuation<S>> + Send>>;

pub type Handler<S> = Arc<dyn Fn(&mut S, &mut MessageReader<'_>) -> HandlerResult<S> + Send + Sync>;

/// What a handler wants the shell to do next.
pub enum Outcome<S> {
    Continue,
    Close,
    /// Stop parsing frames until the future yields a continuation.
    Suspend(Pending<S>),
}

impl<S> Outcome<S> {
    pub fn suspend<F>(future: F) -> Self
    where
        F: Future<Output = Continuation<S>> + Send + 'static,
    {
        Outcome::Suspend(Box::pin(future))
    }
}

impl<S> fmt::Debug for Outcome<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Continue => f.write_str("Continue"),
            Self::Close => f.write_str("Close"),
            Self::Suspend(_) => f.write_str("Suspend(..)"),
        }
    }
}

/// Box a closure as a [`Continuation`].
pub fn continuation<S, F>(f: F) -> Continuation<S>
where
    F: FnOnce(&mut S) -> HandlerResult<S> + Send + 'static,
{
    Box::new(f)
}

pub struct DispatchEntry<S> {
    pub opcode: u16,
    pub name: &'static str,
    pub states: StateSet,
    pub size: BodySize,
    pub security: AccountLevel,
    pub handler: Handler<S>,
}

impl<S> DispatchEntry<S> {
    pub fn new<F>(opcode: u16, name: &'static str, states: StateSet, size: BodySize, handler: F) -> Self
    where
        F: Fn(&mut S, &mut MessageReader<'_>) -> HandlerResult<S> + Send + Sync + 'static,
    {
        Self {
            opcode,
            name,
            states,
            size,
            security: AccountLevel::Player,
            handler: Arc::new(handler),
        }
    }

    pub fn with_security(mut self, security: AccountLevel) -> Self {
        self.security = security;
        self
    }
}

impl<S> Clone for DispatchEntry<S> {
    fn clone(&self) -> Self {
        Self {
            opcode: self.opcode,
            name: self.name,
            states: self.states,
            size: self.size,
            security: self.security,
            handler: self.handler.clone(),
        }
    }
}

impl<S> fmt::Debug for DispatchEntry<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchEntry")
            .field("opcode", &format_args!("0x{:04X}", self.opcode))
            .field("name", &self.name)
            .field("states", &self.states)
            .field("size", &self.size)
            .field("security", &self.security)
            .finish()
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Opcode 0x{opcode:04X} ({name}) registered twice")]
    Duplicate { opcode: u16, name: &'static str },

    #[error("Opcode 0x{opcode:04X} ({name}) outside the table (limit 0x{limit:04X})")]
    OutOfRange {
        opcode: u16,
        name: &'static str,
        limit: u16,
    },
}

pub struct DispatchTableBuilder<S> {
    limit: u16,
    entries: Vec<Option<DispatchEntry<S>>>,
}

impl<S> DispatchTableBuilder<S> {
    /// Builder for opcodes in `0..limit`.
    pub fn new(limit: u16) -> Self {
        Self {
            limit,
            entries: (0..limit).map(|_| None).collect(),
        }
    }

    pub fn register(&mut self, entry: DispatchEntry<S>) -> Result<&mut Self, DispatchError> {
        let slot = self
            .entries
            .get_mut(entry.opcode as usize)
            .ok_or(DispatchError::OutOfRange {
                opcode: entry.opcode,
                name: entry.name,
                limit: self.limit,
            })?;
        if slot.is_some() {
            return Err(DispatchError::Duplicate {
                opcode: entry.opcode,
                name: entry.name,
            });
        }
        *slot = Some(entry);
        Ok(self)
    }

    pub fn build(self) -> DispatchTable<S> {
        let len = self.entries.iter().filter(|e| e.is_some()).count();
        DispatchTable {
            entries: self.entries.into_boxed_slice(),
            len,
        }
    }
}

/// Immutable opcode table, shared across sessions behind an `Arc`.
pub struct DispatchTable<S> {
    entries: Box<[Option<DispatchEntry<S>>]>,
    len: usize,
}

impl<S> DispatchTable<S> {
    pub fn get(&self, opcode: u16) -> Option<&DispatchEntry<S>> {
        self.entries.get(opcode as usize).and_then(Option::as_ref)
    }

    /// Number of registered opcodes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn entries(&self) -> impl Iterator<Item = &DispatchEntry<S>> {
        self.entries.iter().filter_map(Option::as_ref)
    }
}

impl<S: Session> DispatchTable<S> {
    /// Validate one frame against its entry and run the handler.
    pub fn dispatch(&self, session: &mut S, opcode: u16, body: &[u8]) -> HandlerResult<S> {
        let entry = self
            .get(opcode)
            .ok_or(SessionError::UnknownMessage { opcode })?;

        let state = session.state();
        if !entry.states.contains(state) {
            return Err(SessionError::InvalidState {
                name: entry.name,
                state,
            });
        }

        entry.size.check(entry.name, body.len())?;

        if session.security() < entry.security {
            return Err(SessionError::PermissionDenied { name: entry.name });
        }

        debug!("{} <- {} ({} bytes)", session.peer(), entry.name, body.len());

        let mut reader = MessageReader::new(body);
        let outcome = (entry.handler)(session, &mut reader)?;
        if !reader.is_empty() {
            trace!("{} left {} bytes unread", entry.name, reader.remaining());
        }
        Ok(outcome)
    }
}
