/// Monitoring engine module - probes targets on a fixed cadence
///
/// This module is responsible for:
/// - Running the external echo probe and parsing its latency summary
/// - Driving drift-corrected polling cycles over all targets
/// - Handing every cycle's results to storage
pub mod prober;
pub mod rtt;
pub mod scheduler;
pub mod types;

pub use prober::{Prober, SystemPing};
pub use scheduler::CycleScheduler;
