pub mod drivers;
pub mod health;
