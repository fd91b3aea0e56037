pub mod paper;
pub mod simulation;

pub use paper::PaperAdapter;
pub use simulation::SimulationAdapter;
