pub mod alphabet;
pub mod greedy;
pub mod loss;
pub mod metrics;
