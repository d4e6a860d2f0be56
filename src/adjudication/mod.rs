pub mod discriminator;
pub mod queue;
pub mod verdict;

pub use discriminator::{
    validate_discriminators, DiscriminatorLedger, DiscriminatorRejection, DiscriminatorValidation,
    QuoteFinding,
};
pub use queue::{PairQueue, PairTask};
pub use verdict::compute_pair_verdict;
