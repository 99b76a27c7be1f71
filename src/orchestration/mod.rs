pub mod candidates;
pub mod decision;
pub mod driver;
pub mod error;
pub mod evidence;
pub mod flow_graph;
pub mod forensics;
pub mod interruption;
pub mod navigator;
pub mod progress;
pub mod replay;
pub mod run_state;
pub mod run_store;
pub mod sidequest;
