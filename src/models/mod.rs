pub mod booking;
pub mod email;
pub mod health;
pub mod message;
pub mod retry;
pub mod status;
pub mod validation;
