pub mod audio;
pub mod collate;
pub mod corpus;
pub mod features;
pub mod loader;
