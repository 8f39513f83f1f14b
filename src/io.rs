/// CSV export of market replay results.
pub mod export;
