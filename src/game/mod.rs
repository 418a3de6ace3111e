pub mod constants;
pub mod spatial;
pub mod state;
