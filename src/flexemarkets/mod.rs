// ─── Actors ───
pub mod coordinator;
pub mod executor;
pub mod feed;
pub mod holdings;
pub mod messages;

// ─── Marketplace access ───
pub mod client;

// ─── CAPM decision logic ───
pub mod payoff;
pub mod strategy;

pub mod types;
