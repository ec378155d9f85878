pub mod builder;
pub mod defaults;
pub mod device;
pub mod runtime;
pub mod traits;
