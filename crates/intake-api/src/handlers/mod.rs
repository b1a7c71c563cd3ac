pub mod intake;
pub mod sessions;
pub mod workers;
