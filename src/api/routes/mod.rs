pub mod check;
pub mod events;
pub mod health;
pub mod stats;
