pub mod coordinator;
pub mod pipe;

pub use pipe::{Pipe, Upcall, UpcallKey};
