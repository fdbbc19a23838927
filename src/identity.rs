//! Identity resolution of confirmed tracks against the known-offender index.

mod index;
mod resolver;

pub use index::{IdentityRecord, IndexSnapshot, OffenderIndex, OffenderIndexHandle};
pub use resolver::{
    IdentityResolver, MatchEvent, MatchOutcome, ResolutionPolicy, ResolverConfig, UnknownReason,
};
