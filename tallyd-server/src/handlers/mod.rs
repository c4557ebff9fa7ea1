pub mod health;
pub mod proof_ws;
pub mod webhook;
