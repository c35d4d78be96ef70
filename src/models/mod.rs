// Data models (structs)
pub mod command;
pub mod continuous;
pub mod envelope;
pub mod job_result;
pub mod machine;
pub mod queue;
pub mod settings;
pub mod upload;

pub use command::*;
pub use continuous::*;
pub use envelope::*;
pub use job_result::*;
pub use machine::*;
pub use queue::*;
pub use settings::*;
pub use upload::*;
