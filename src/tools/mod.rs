pub mod filesystem;
pub mod policy;
pub mod registry;
pub mod schema;
pub mod shell;

pub use filesystem::{FileReadTool, FileWriteTool, ReadOutput, WriteMode};
pub use policy::{CommandPolicy, FsError, Workspace};
pub use registry::{Tool, ToolDescriptor, ToolOutcome, ToolRegistry, ToolSpec};
pub use schema::args_schema;
pub use shell::{ShellOutput, ShellRunTool};
