//! Script graphs: the typed step model, the JSON document format they are
//! authored in, and the manager that caches scripts and resolves the script
//! for a dialled number.

pub mod document;
pub mod manager;
pub mod model;

pub use manager::ScriptManager;
pub use model::{PhoneMapping, Script, ScriptError, ScriptStatus, Step, StepData, StepType};
