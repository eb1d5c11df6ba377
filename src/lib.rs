/* src/lib.rs */

pub mod ingest;
pub mod server;
pub mod setup;
