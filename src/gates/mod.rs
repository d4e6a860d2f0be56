pub mod closure;
pub mod compat;
pub mod contender;
pub mod frame;
pub mod mece;

pub use closure::{check_closure, ClosureIssue, ClosureIssueCode};
pub use compat::{resolve_effective_tau, CapSource, TauResolution};
pub use contender::{check_contender_space, ContenderIssue};
pub use frame::frame_adequacy_score;
pub use mece::{check_mece_certificate, MeceAssessment, MeceIssue, MeceIssueCode};
