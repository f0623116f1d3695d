mod common;
mod events;
mod leases;
mod pricing;
mod rollups;

pub use events::SqliteEventRepo;
pub use leases::SqliteLeaseRepo;
pub use pricing::SqlitePricingRepo;
pub use rollups::SqliteRollupRepo;
