pub mod bitget;
pub mod lifecycle;
pub mod scanner;
pub mod supervisor;

pub use bitget::BitgetClient;
pub use lifecycle::{PositionOrchestrator, StrategyContext, TaskRegistry, TaskState};
pub use scanner::{diff_symbols, CandidateScanner};
pub use supervisor::{StrategySupervisor, SupervisorHandle};
