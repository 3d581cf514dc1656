mod collector;

pub use collector::{MetricsCollector, MetricsRegistry, RequestOutcome, Timer};
