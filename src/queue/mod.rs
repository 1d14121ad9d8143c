mod consumer;
mod topology;

pub use consumer::Consumer;
pub use topology::{declare as declare_topology, publish, EXCHANGE, FAILED_QUEUE, FAILED_ROUTING_KEY};
