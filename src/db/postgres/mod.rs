mod common;
mod events;
mod leases;
mod pricing;
mod rollups;

pub use events::PostgresEventRepo;
pub use leases::PostgresLeaseRepo;
pub use pricing::PostgresPricingRepo;
pub use rollups::PostgresRollupRepo;
