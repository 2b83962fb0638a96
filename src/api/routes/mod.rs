pub mod health;
pub mod measurements;
pub mod monitors;
pub mod stats;
